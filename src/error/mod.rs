//! Layered error taxonomy for the simulator.
//!
//! Each public entry point returns one of these enums rather than a single
//! catch-all error: callers that only care about "did the step succeed"
//! match on the outer variant, callers that want the root cause follow the
//! `#[source]`/`#[from]` chain down to the originating [`EvalError`] or
//! [`DbmError`].

use thiserror::Error;

/// Raised by the (out-of-scope) parser. The engine never constructs one of
/// these itself; it exists so callers plugging in a parser have a stable
/// type to convert into.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error: {message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<(usize, usize)>,
}

/// Invalid references inside a loaded [`crate::model::System`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("template `{0}` has no init location")]
    MissingInitLocation(String),
    #[error("unknown template `{0}` referenced by system declaration")]
    UnknownTemplate(String),
    #[error("duplicate instance name `{0}`")]
    DuplicateInstanceName(String),
    #[error("could not resolve parameter `{param}` of template `{template}`")]
    UnresolvedParameter { template: String, param: String },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// The kind of failure inside the AST evaluator, independent of where in the
/// tree it occurred (the node tag is attached by [`EvalError`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalErrorKind {
    #[error("unknown AST node")]
    UnknownNode,
    #[error("undefined name `{0}`")]
    UndefinedName(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: i64, len: usize },
    #[error("division by zero")]
    DivByZero,
    #[error("value {value} out of range [{lo}, {hi}]")]
    OutOfRange { value: i32, lo: i32, hi: i32 },
    #[error("expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("name `{0}` already defined in this scope")]
    Redefined(String),
    #[error("popped an empty local scope stack")]
    StackUnderflow,
    #[error("unary operator not applicable: {0}")]
    BadOp(String),
    #[error("undefined member `{0}`")]
    UndefinedMember(String),
}

/// An evaluator failure, tagged with the AST node kind it occurred on so the
/// CLI can print a useful one-line diagnostic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (in {node_tag})")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub node_tag: &'static str,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, node_tag: &'static str) -> Self {
        Self { kind, node_tag }
    }
}

/// Failures inside the DBM algebra itself (as opposed to failures in the
/// transition engine's use of it).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbmError {
    #[error("interval for clock has no integer point")]
    EmptyInterval,
    #[error("unknown clock `{0}`")]
    UnknownClock(String),
}

/// Fatal failures during a single [`crate::engine::Engine::step`] call.
/// Unlike [`EvalError`]s raised while testing a candidate's guard/update
/// (which only discard that candidate), these propagate to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("malformed clock expression: {0}")]
    MalformedClockExpr(String),
    #[error("invariant references undefined name `{0}`")]
    UndefinedInvariantName(String),
    #[error("DBM operation referenced unknown clock `{0}`")]
    UnknownClock(String),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Dbm(#[from] DbmError),
}

/// Invalid requests against the current simulator state (as opposed to
/// failures while computing the next one).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("requested transition {requested} but only {available} are enabled")]
    FireIndexOutOfRange { requested: usize, available: usize },
    #[error("requested step {requested} but trace only has {trace_len} entries")]
    GotoOutOfRange { requested: usize, trace_len: usize },
    #[error("popped an empty local scope stack")]
    PopEmptyScope,
}
