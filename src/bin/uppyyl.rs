//! `uppyyl`: process entry point. Parses the process-level flags, loads
//! configuration (C10), installs the `tracing` subscriber (C11), and hands
//! stdin/stdout to the REPL (C12).

use clap::Parser;
use std::path::PathBuf;
use uppyyl::cli::Repl;
use uppyyl::config::ConfigLoader;
use uppyyl::model::UnimplementedLoader;
use uppyyl::observability;

/// Interactive simulator for networks of timed automata.
#[derive(Parser)]
#[command(name = "uppyyl")]
#[command(about = "Interactive simulator for networks of timed automata (NTA)")]
#[command(version)]
struct Cli {
    /// Path to a `uppyyl.toml` configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    let mut config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };
    if cli.verbose > 0 {
        let level = observability::level_for_verbosity(&config.logging.level, cli.verbose);
        config.logging.level = level.to_string().to_lowercase();
    }
    if observability::init(&config.logging).is_err() {
        eprintln!("warning: tracing subscriber already initialized");
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut repl = Repl::new(UnimplementedLoader, config.random.seed, config.engine.max_trace_len);
    let code = repl.run(stdin.lock(), stdout.lock());
    std::process::exit(code);
}
