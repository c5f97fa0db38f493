//! Line-oriented REPL (C12): drives an [`Engine`] through exactly the
//! commands of §6.3, against a pluggable [`ModelLoader`]. The command
//! language is hand-parsed token-by-token rather than going through `clap`,
//! matching the source CLI's plain command loop.

use crate::engine::Engine;
use crate::model::ModelLoader;
use std::io::{BufRead, Write};

/// What the REPL does after handling one line.
enum Dispatch {
    Continue,
    Exit(i32),
}

pub struct Repl<L: ModelLoader> {
    loader: L,
    engine: Option<Engine>,
    max_trace_len: usize,
    seed: Option<u64>,
}

impl<L: ModelLoader> Repl<L> {
    pub fn new(loader: L, seed: Option<u64>, max_trace_len: usize) -> Self {
        Self { loader, engine: None, max_trace_len, seed }
    }

    /// Runs the command loop over `input` until `x`/`q` or EOF. Returns the
    /// process exit code: 0 on normal exit, non-zero on load failure.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut output: W) -> i32 {
        let mut line = String::new();
        loop {
            line.clear();
            let _ = write!(output, "> ");
            let _ = output.flush();
            match input.read_line(&mut line) {
                Ok(0) => return 0,
                Ok(_) => {}
                Err(e) => {
                    let _ = writeln!(output, "io error: {e}");
                    return 1;
                }
            }
            match self.dispatch(line.trim(), &mut output) {
                Dispatch::Continue => {}
                Dispatch::Exit(code) => return code,
            }
        }
    }

    fn dispatch<W: Write>(&mut self, line: &str, out: &mut W) -> Dispatch {
        if line.is_empty() {
            return Dispatch::Continue;
        }
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();

        if cmd == "x" || cmd == "q" {
            return Dispatch::Exit(0);
        }
        if let Some(idx) = cmd.strip_prefix('t').filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())) {
            let i: usize = idx.parse().unwrap_or(usize::MAX);
            self.fire(i, out);
            return Dispatch::Continue;
        }
        match cmd {
            "load" => match rest.first() {
                None => {
                    let _ = writeln!(out, "usage: load <path>");
                }
                Some(path) => match self.load(path) {
                    Ok(()) => {
                        let _ = writeln!(out, "loaded {path}");
                    }
                    Err(e) => {
                        let _ = writeln!(out, "load failed: {e}");
                        return Dispatch::Exit(1);
                    }
                },
            },
            "state" => self.print_state(out),
            "seq" => self.print_enabled(out),
            "g" => match optional_arg(&rest) {
                Some(n) => self.goto(n, out),
                None => {
                    let _ = writeln!(out, "usage: g <n>");
                }
            },
            "f" => self.forward(optional_arg(&rest).unwrap_or(1), out),
            "b" => self.back(optional_arg(&rest).unwrap_or(1), out),
            "r" => self.random_run(optional_arg(&rest).unwrap_or(1), out),
            "" => {}
            other => {
                let _ = writeln!(out, "unknown command: {other}");
            }
        }
        Dispatch::Continue
    }

    fn load(&mut self, path: &str) -> Result<(), String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let system = self.loader.load(&content).map_err(|e| e.to_string())?;
        let engine = Engine::new(system, self.seed)
            .map_err(|e| e.to_string())?
            .with_max_trace_len(self.max_trace_len);
        self.engine = Some(engine);
        Ok(())
    }

    fn print_state<W: Write>(&self, out: &mut W) {
        let Some(engine) = &self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        let sim = engine.current();
        let mut locs: Vec<(&String, &String)> = sim.locations.iter().collect();
        locs.sort_by_key(|(inst, _)| inst.as_str());
        for (inst, loc) in locs {
            let _ = writeln!(out, "{inst} @ {loc}");
        }
        let _ = writeln!(out, "{}", sim.dbm);
        let _ = writeln!(out, "{}", sim.vars.to_raw());
    }

    fn print_enabled<W: Write>(&self, out: &mut W) {
        let Some(engine) = &self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        match engine.enabled() {
            Ok(transitions) => {
                for (i, t) in transitions.iter().enumerate() {
                    let parts: Vec<String> = t
                        .candidates
                        .iter()
                        .map(|c| format!("{}:{}", c.instance, c.edge_id))
                        .collect();
                    let _ = writeln!(out, "t{i}: {}", parts.join(" + "));
                }
            }
            Err(e) => {
                let _ = writeln!(out, "error: {e}");
            }
        }
    }

    fn fire<W: Write>(&mut self, i: usize, out: &mut W) {
        let Some(engine) = &mut self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        if let Err(e) = engine.fire(i) {
            let _ = writeln!(out, "error: {e}");
        }
    }

    fn goto<W: Write>(&mut self, idx: usize, out: &mut W) {
        let Some(engine) = &mut self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        if let Err(e) = engine.goto(idx) {
            let _ = writeln!(out, "error: {e}");
        }
    }

    fn forward<W: Write>(&mut self, n: usize, out: &mut W) {
        let Some(engine) = &mut self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        if let Err(e) = engine.forward(n) {
            let _ = writeln!(out, "error: {e}");
        }
    }

    fn back<W: Write>(&mut self, n: usize, out: &mut W) {
        let Some(engine) = &mut self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        engine.back(n);
        let _ = writeln!(out, "position {}", engine.position());
    }

    fn random_run<W: Write>(&mut self, n: usize, out: &mut W) {
        let Some(engine) = &mut self.engine else {
            let _ = writeln!(out, "no model loaded");
            return;
        };
        match engine.random_run(n) {
            Ok(fired) => {
                let _ = writeln!(out, "fired {fired} transition(s)");
            }
            Err(e) => {
                let _ = writeln!(out, "error: {e}");
            }
        }
    }
}

/// Parses an optional single positional numeric argument (`f`, `b`, `r`,
/// `g` all take one). Absent means "use the caller's default".
fn optional_arg(rest: &[&str]) -> Option<usize> {
    rest.first().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn exit_command_returns_zero() {
        let mut repl = Repl::new(crate::model::UnimplementedLoader, None, 0);
        let input = Cursor::new(b"x\n".to_vec());
        let mut output = Vec::new();
        assert_eq!(repl.run(input, &mut output), 0);
    }

    #[test]
    fn load_failure_exits_nonzero() {
        let mut repl = Repl::new(crate::model::UnimplementedLoader, None, 0);
        let input = Cursor::new(b"load /nonexistent/model.xml\n".to_vec());
        let mut output = Vec::new();
        assert_eq!(repl.run(input, &mut output), 1);
    }

    #[test]
    fn unknown_command_does_not_exit() {
        let mut repl = Repl::new(crate::model::UnimplementedLoader, None, 0);
        let input = Cursor::new(b"bogus\nx\n".to_vec());
        let mut output = Vec::new();
        assert_eq!(repl.run(input, &mut output), 0);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("unknown command: bogus"));
    }

    #[test]
    fn eof_exits_zero() {
        let mut repl = Repl::new(crate::model::UnimplementedLoader, None, 0);
        let input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        assert_eq!(repl.run(input, &mut output), 0);
    }
}
