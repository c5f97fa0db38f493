//! The model object graph (C5): templates, locations, edges, and their
//! labels, each owning both an AST and the text it was produced from.
//!
//! Classification of a guard as clock-vs-variable, and of an assignment as
//! update-vs-reset, happens once here at load time (§4.5); the engine never
//! re-classifies during simulation.

use crate::ast::{self, ClockGuard, Invariant, Reset, Select, Sync, Update, VariableGuard};
use std::collections::HashMap;

/// Opaque identifiers, stable within one loaded [`System`].
pub type LocationId = String;
pub type EdgeId = String;

/// A location: id, name, urgency flags (mutually exclusive), invariants.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    urgent: bool,
    committed: bool,
    pub invariants: Vec<Invariant>,
    /// Opaque view coordinates, carried only for round-tripping (§6.2);
    /// the engine never reads them.
    pub view: Option<(i32, i32)>,
}

impl Location {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            urgent: false,
            committed: false,
            invariants: Vec::new(),
            view: None,
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Setting urgent clears committed and vice versa (§4.5).
    pub fn set_urgent(&mut self, urgent: bool) {
        self.urgent = urgent;
        if urgent {
            self.committed = false;
        }
    }

    pub fn set_committed(&mut self, committed: bool) {
        self.committed = committed;
        if committed {
            self.urgent = false;
        }
    }
}

/// An edge: source/target by id, its guard/update/reset/select/sync labels.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub source: LocationId,
    pub target: LocationId,
    pub clock_guards: Vec<ClockGuard>,
    pub variable_guards: Vec<VariableGuard>,
    pub updates: Vec<Update>,
    pub resets: Vec<Reset>,
    pub selects: Vec<Select>,
    pub sync: Option<Sync>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            clock_guards: Vec::new(),
            variable_guards: Vec::new(),
            updates: Vec::new(),
            resets: Vec::new(),
            selects: Vec::new(),
            sync: None,
        }
    }
}

/// A parameterized automaton blueprint: locations, edges, and its own local
/// declaration, keyed by name for instantiation (C6).
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub id: String,
    pub parameters: Vec<ast::Parameter>,
    pub declaration: ast::Declaration,
    pub locations: HashMap<LocationId, Location>,
    pub edges: HashMap<EdgeId, Edge>,
    pub init_location: LocationId,
}

impl Template {
    pub fn new(name: impl Into<String>, id: impl Into<String>, init_location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            parameters: Vec::new(),
            declaration: ast::Declaration::default(),
            locations: HashMap::new(),
            edges: HashMap::new(),
            init_location: init_location.into(),
        }
    }

    /// Outgoing edges of `loc`, in a stable order (by edge id) so that
    /// enumeration (§4.7 Stage 1) is deterministic.
    pub fn outgoing(&self, loc: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.values().filter(|e| e.source == loc).collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }
}

/// The whole loaded model: global declaration, system composition, and the
/// template library. Queries are kept as opaque text+AST, never evaluated
/// (Non-goal: temporal-logic model checking).
#[derive(Debug, Clone, Default)]
pub struct System {
    pub declaration: ast::Declaration,
    pub system: ast::SystemDecl,
    pub templates: HashMap<String, Template>,
    /// Named derived-template nodes (`id(params) = Template(args);` or
    /// `id = Template(args);`) referenced by the system's composition list.
    pub instantiations: Vec<ast::Instantiation>,
    pub queries: Vec<ast::Query>,
}

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }
}

/// Loads a [`System`] from some external representation (XML, a future
/// textual format, or an in-memory builder in tests). The XML format
/// itself (§6.2) is out of scope for this crate; this trait is the seam a
/// caller's loader plugs into.
pub trait ModelLoader {
    type Error: std::error::Error;

    fn load(&self, source: &str) -> Result<System, Self::Error>;
}

/// Ships as the default so the CLI always has *something* that implements
/// [`ModelLoader`] before a real one is wired in; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedLoader;

impl ModelLoader for UnimplementedLoader {
    type Error = crate::error::ParseError;

    fn load(&self, _source: &str) -> Result<System, Self::Error> {
        Err(crate::error::ParseError {
            message: "no model loader configured".into(),
            span: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgent_and_committed_are_mutually_exclusive() {
        let mut loc = Location::new("l0", "Idle");
        loc.set_committed(true);
        assert!(loc.is_committed());
        loc.set_urgent(true);
        assert!(loc.is_urgent());
        assert!(!loc.is_committed());
    }

    #[test]
    fn outgoing_edges_are_sorted_by_id() {
        let mut tpl = Template::new("A", "t0", "l0");
        tpl.locations.insert("l0".into(), Location::new("l0", "Idle"));
        tpl.edges.insert("e2".into(), Edge::new("e2", "l0", "l0"));
        tpl.edges.insert("e1".into(), Edge::new("e1", "l0", "l0"));
        let ids: Vec<&str> = tpl.outgoing("l0").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[test]
    fn unimplemented_loader_reports_load_error() {
        let loader = UnimplementedLoader;
        assert!(loader.load("whatever").is_err());
    }
}
