//! Stable paths into a [`crate::state::ProgramState`].
//!
//! A [`Path`] is what a [`crate::value::Value::Reference`] stores instead of
//! a raw pointer. It survives a [`crate::state::ProgramState::copy`] because
//! it names a *location*, not an address; [`Path::resolve`] re-walks it
//! against whichever state tree is current.

use serde::{Deserialize, Serialize};

/// Which of the two declaration sections (`const` vs `var`) a variable was
/// declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    Const,
    Var,
}

/// Which scope tier a variable lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeRef {
    Global,
    Instance(String),
    /// Index into the active local-scope stack, counted from the bottom so
    /// the index stays meaningful after a copy re-creates the stack.
    Local(usize),
}

/// One step from a variable's root value down into an array element or
/// struct field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

/// A stable address: section + scope + base variable name + chain of
/// field/index accesses into that variable's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    pub section: Section,
    pub scope: ScopeRef,
    pub base: String,
    pub chain: Vec<PathSegment>,
}

impl Path {
    pub fn new(section: Section, scope: ScopeRef, base: impl Into<String>) -> Self {
        Self {
            section,
            scope,
            base: base.into(),
            chain: Vec::new(),
        }
    }

    /// Returns a new path extended by one field access.
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut chain = self.chain.clone();
        chain.push(PathSegment::Field(name.into()));
        Self { chain, ..self.clone() }
    }

    /// Returns a new path extended by one index access.
    pub fn index(&self, idx: usize) -> Self {
        let mut chain = self.chain.clone();
        chain.push(PathSegment::Index(idx));
        Self { chain, ..self.clone() }
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            ScopeRef::Global => write!(f, "{}", self.base)?,
            ScopeRef::Instance(name) => write!(f, "{}.{}", name, self.base)?,
            ScopeRef::Local(idx) => write!(f, "local#{}.{}", idx, self.base)?,
        }
        for seg in &self.chain {
            match seg {
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
            }
        }
        Ok(())
    }
}
