//! `uppyyl`: an interactive simulator for networks of timed automata (NTA)
//! in the Uppaal modeling language.
//!
//! The crate is organized the way the simulation pipeline runs: a loaded
//! [`model::System`] is turned into an initial [`engine::SimState`] by
//! [`engine::instantiate`], and every subsequent step runs through
//! [`engine::Engine`].

pub mod ast;
pub mod cli;
pub mod config;
pub mod dbm;
pub mod engine;
pub mod error;
pub mod eval;
pub mod model;
pub mod observability;
pub mod state;
pub mod value;

pub use engine::{Engine, SimState};
pub use error::{EvalError, LoadError, ParseError, SimulationError, StateError};
pub use model::{ModelLoader, System};
