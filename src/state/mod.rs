//! The scoped program state (C3): global/instance/local variable tiers,
//! lookup order, and the copy-with-reference-rebinding contract that
//! backtracking relies on.

mod path;

pub use path::{Path, PathSegment, ScopeRef, Section};

use crate::error::EvalErrorKind;
use crate::value::Value;
use std::collections::HashMap;

/// A declared variable: its current value plus the stable path references
/// to it are anchored on.
#[derive(Debug, Clone)]
pub struct Variable {
    pub value: Value,
    pub path: Path,
}

impl Variable {
    pub fn new(value: Value, path: Path) -> Self {
        Self { value, path }
    }
}

/// One tier's `const`/`var` bindings (used for the global tier, each
/// instance tier, and each local scope).
#[derive(Debug, Clone, Default)]
struct Bindings {
    consts: HashMap<String, Variable>,
    vars: HashMap<String, Variable>,
}

impl Bindings {
    fn contains(&self, name: &str) -> bool {
        self.consts.contains_key(name) || self.vars.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&Variable> {
        self.consts.get(name).or_else(|| self.vars.get(name))
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        if self.consts.contains_key(name) {
            self.consts.get_mut(name)
        } else {
            self.vars.get_mut(name)
        }
    }

    fn insert(&mut self, name: String, var: Variable, is_const: bool) -> Result<(), EvalErrorKind> {
        if self.contains(&name) {
            return Err(EvalErrorKind::Redefined(name));
        }
        if is_const {
            self.consts.insert(name, var);
        } else {
            self.vars.insert(name, var);
        }
        Ok(())
    }

    /// Unconditional insert/replace, used by `add`/`set` (§4.3) for
    /// parameters, functions, and type bindings installed by the loader.
    fn set(&mut self, name: String, var: Variable, is_const: bool) {
        self.consts.remove(&name);
        self.vars.remove(&name);
        if is_const {
            self.consts.insert(name, var);
        } else {
            self.vars.insert(name, var);
        }
    }
}

/// One pushed local scope, named for diagnostics (`push_local(name)`).
#[derive(Debug, Clone)]
struct LocalScope {
    #[allow(dead_code)]
    name: String,
    bindings: Bindings,
}

/// Which scope is presently receiving `define`/`lookup` calls for
/// non-local names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ActiveScope {
    Global { access_instances: bool },
    Instance(String),
}

/// The full three-tier program state: global, per-instance, and a stack of
/// local scopes, with exactly one "active" instance/global tier.
#[derive(Debug, Clone)]
pub struct ProgramState {
    global: Bindings,
    instances: HashMap<String, Bindings>,
    /// Preserves creation order so `Cartesian product` instantiation
    /// (C6) and transition enumeration (C7) can iterate instances
    /// deterministically by name without re-sorting a `HashMap`.
    instance_order: Vec<String>,
    locals: Vec<LocalScope>,
    active: ActiveScope,
}

impl Default for ProgramState {
    fn default() -> Self {
        Self {
            global: Bindings::default(),
            instances: HashMap::new(),
            instance_order: Vec::new(),
            locals: Vec::new(),
            active: ActiveScope::Global { access_instances: false },
        }
    }
}

impl ProgramState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_names(&self) -> &[String] {
        &self.instance_order
    }

    pub fn activate_global(&mut self, access_instances: bool) {
        self.active = ActiveScope::Global { access_instances };
    }

    pub fn activate_instance(&mut self, name: &str) {
        self.active = ActiveScope::Instance(name.to_string());
    }

    pub fn active_instance(&self) -> Option<&str> {
        match &self.active {
            ActiveScope::Instance(name) => Some(name.as_str()),
            ActiveScope::Global { .. } => None,
        }
    }

    /// Allocates a new instance tier; fails if the name is already taken.
    pub fn new_instance_scope(&mut self, name: &str) -> Result<(), EvalErrorKind> {
        if self.instances.contains_key(name) {
            return Err(EvalErrorKind::Redefined(name.to_string()));
        }
        self.instances.insert(name.to_string(), Bindings::default());
        self.instance_order.push(name.to_string());
        Ok(())
    }

    pub fn push_local(&mut self, name: impl Into<String>) {
        self.locals.push(LocalScope {
            name: name.into(),
            bindings: Bindings::default(),
        });
    }

    pub fn pop_local(&mut self) -> Result<(), EvalErrorKind> {
        self.locals.pop().map(|_| ()).ok_or(EvalErrorKind::StackUnderflow)
    }

    pub fn local_depth(&self) -> usize {
        self.locals.len()
    }

    fn active_tier_mut(&mut self) -> &mut Bindings {
        match &self.active {
            ActiveScope::Global { .. } => &mut self.global,
            ActiveScope::Instance(name) => self
                .instances
                .get_mut(name.as_str())
                .expect("active instance scope must exist"),
        }
    }

    /// Allocates `name` in the currently innermost scope (top local scope
    /// if any are pushed, else the active instance/global tier), failing
    /// on a name collision within that scope.
    pub fn define(&mut self, name: &str, value: Value, is_const: bool) -> Result<Path, EvalErrorKind> {
        let path = self.path_for_new(name);
        let var = Variable::new(value, path.clone());
        if let Some(top) = self.locals.last_mut() {
            top.bindings.insert(name.to_string(), var, is_const)?;
        } else {
            self.active_tier_mut().insert(name.to_string(), var, is_const)?;
        }
        Ok(path)
    }

    /// Unconditional insert (used for parameters, function bindings, type
    /// aliases): never fails on collision.
    pub fn add(&mut self, name: &str, value: Value, is_const: bool) -> Path {
        let path = self.path_for_new(name);
        let var = Variable::new(value, path.clone());
        if let Some(top) = self.locals.last_mut() {
            top.bindings.set(name.to_string(), var, is_const);
        } else {
            self.active_tier_mut().set(name.to_string(), var, is_const);
        }
        path
    }

    fn path_for_new(&self, name: &str) -> Path {
        let scope = if !self.locals.is_empty() {
            ScopeRef::Local(self.locals.len() - 1)
        } else {
            match &self.active {
                ActiveScope::Global { .. } => ScopeRef::Global,
                ActiveScope::Instance(n) => ScopeRef::Instance(n.clone()),
            }
        };
        Path::new(Section::Var, scope, name)
    }

    /// Base path (no chain) of a plain name, in lookup order: innermost
    /// local up through outer locals, then the active instance, then
    /// global. Does not dereference `Value::Reference` — callers building
    /// an lvalue chain (Dot/ArrayAccess) need the un-dereferenced base.
    pub fn lookup_path(&self, name: &str) -> Result<Path, EvalErrorKind> {
        for local in self.locals.iter().rev() {
            if let Some(v) = local.bindings.get(name) {
                return Ok(v.path.clone());
            }
        }
        if let ActiveScope::Instance(inst) = &self.active {
            if let Some(tier) = self.instances.get(inst) {
                if let Some(v) = tier.get(name) {
                    return Ok(v.path.clone());
                }
            }
        }
        if let Some(v) = self.global.get(name) {
            return Ok(v.path.clone());
        }
        Err(EvalErrorKind::UndefinedName(name.to_string()))
    }

    /// Resolves `name` against the lookup order of §3 and auto-dereferences
    /// any `Value::Reference`, returning an owned copy (the invariant §4.3
    /// cares about is that this always matches `lookup` + `assign` applied
    /// directly, not that the result aliases internal storage).
    pub fn lookup_value(&self, name: &str) -> Result<Value, EvalErrorKind> {
        let path = self.lookup_path(name)?;
        self.deref_value(&path)
    }

    fn deref_value(&self, path: &Path) -> Result<Value, EvalErrorKind> {
        match self.resolve_value(path)? {
            Value::Reference(inner) => self.deref_value(inner),
            other => Ok(other.copy()),
        }
    }

    fn base_variable(&self, scope: &ScopeRef, base: &str) -> Result<&Variable, EvalErrorKind> {
        match scope {
            ScopeRef::Global => self
                .global
                .get(base)
                .ok_or_else(|| EvalErrorKind::UndefinedName(base.to_string())),
            ScopeRef::Instance(name) => self
                .instances
                .get(name)
                .and_then(|t| t.get(base))
                .ok_or_else(|| EvalErrorKind::UndefinedName(base.to_string())),
            ScopeRef::Local(idx) => self
                .locals
                .get(*idx)
                .and_then(|l| l.bindings.get(base))
                .ok_or_else(|| EvalErrorKind::UndefinedName(base.to_string())),
        }
    }

    fn base_variable_mut(&mut self, scope: &ScopeRef, base: &str) -> Result<&mut Variable, EvalErrorKind> {
        match scope {
            ScopeRef::Global => self
                .global
                .get_mut(base)
                .ok_or_else(|| EvalErrorKind::UndefinedName(base.to_string())),
            ScopeRef::Instance(name) => self
                .instances
                .get_mut(name)
                .and_then(|t| t.get_mut(base))
                .ok_or_else(|| EvalErrorKind::UndefinedName(base.to_string())),
            ScopeRef::Local(idx) => self
                .locals
                .get_mut(*idx)
                .and_then(|l| l.bindings.get_mut(base))
                .ok_or_else(|| EvalErrorKind::UndefinedName(base.to_string())),
        }
    }

    /// Resolves a [`Path`] (base variable plus field/index chain) against
    /// *this* state tree without following a trailing reference. This is
    /// the crux of the reference-rebinding contract: a reference stores
    /// only the path, so resolving it against a copied tree automatically
    /// "rebinds" it.
    pub fn resolve_value(&self, path: &Path) -> Result<&Value, EvalErrorKind> {
        let var = self.base_variable(&path.scope, &path.base)?;
        let mut val = &var.value;
        for seg in &path.chain {
            val = val.navigate(seg)?;
        }
        Ok(val)
    }

    fn resolve_value_mut(&mut self, path: &Path) -> Result<&mut Value, EvalErrorKind> {
        let var = self.base_variable_mut(&path.scope, &path.base)?;
        let mut val = &mut var.value;
        for seg in &path.chain {
            val = val.navigate_mut(seg)?;
        }
        Ok(val)
    }

    /// Assigns `src` at `path`, chasing through any `Value::Reference`
    /// found there so the pointee is what actually gets mutated.
    pub fn assign_path(&mut self, path: &Path, src: &Value) -> Result<(), EvalErrorKind> {
        let mut target = path.clone();
        loop {
            match self.resolve_value(&target)? {
                Value::Reference(inner) => target = (**inner).clone(),
                _ => break,
            }
        }
        self.resolve_value_mut(&target)?.assign(src)
    }

    /// Resolves `name`, then assigns via the value-kind rules in §4.2.
    pub fn assign(&mut self, name: &str, src: &Value) -> Result<(), EvalErrorKind> {
        let path = self.lookup_path(name)?;
        self.assign_path(&path, src)
    }

    /// Chases through any `Value::Reference`s starting at `path`, returning
    /// the final non-reference path they resolve to. Used by the transition
    /// engine to identify a channel or shared variable by its ultimate
    /// storage location rather than wherever a reference parameter happens
    /// to sit in a particular instance's scope.
    pub fn canonical_path(&self, path: &Path) -> Result<Path, EvalErrorKind> {
        let mut target = path.clone();
        loop {
            match self.resolve_value(&target)? {
                Value::Reference(inner) => target = (**inner).clone(),
                _ => return Ok(target),
            }
        }
    }

    /// True while the active scope is global *and* `activate_global` was
    /// called with `access_instances`, i.e. bare instance names resolve as
    /// `Value::InstanceRef` pseudo-variables (§9 "instance scope accessor").
    pub fn access_instances(&self) -> bool {
        matches!(self.active, ActiveScope::Global { access_instances: true })
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Deep-copies the full variable tier. Every `Value::Reference`
    /// contained in the new tree still names the same path, which —
    /// because references never store raw pointers — means it already
    /// resolves correctly against the copy; `verify_references` double
    /// checks this (property 6).
    pub fn copy(&self) -> ProgramState {
        let copied = ProgramState {
            global: self.global.deep_copy(),
            instances: self
                .instances
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_copy()))
                .collect(),
            instance_order: self.instance_order.clone(),
            locals: self
                .locals
                .iter()
                .map(|l| LocalScope {
                    name: l.name.clone(),
                    bindings: l.bindings.deep_copy(),
                })
                .collect(),
            active: self.active.clone(),
        };
        debug_assert!(copied.verify_references().is_ok());
        copied
    }

    /// Walks every variable looking for `Value::Reference`s and confirms
    /// each still resolves. Used by `copy()` (debug builds) and by tests
    /// exercising property 6.
    pub fn verify_references(&self) -> Result<(), EvalErrorKind> {
        for var in self.global.consts.values().chain(self.global.vars.values()) {
            self.verify_value(&var.value)?;
        }
        for tier in self.instances.values() {
            for var in tier.consts.values().chain(tier.vars.values()) {
                self.verify_value(&var.value)?;
            }
        }
        for local in &self.locals {
            for var in local.bindings.consts.values().chain(local.bindings.vars.values()) {
                self.verify_value(&var.value)?;
            }
        }
        Ok(())
    }

    fn verify_value(&self, value: &Value) -> Result<(), EvalErrorKind> {
        match value {
            Value::Reference(path) => self.resolve_value(path).map(|_| ()),
            Value::Array(items) => {
                for item in items {
                    self.verify_value(item)?;
                }
                Ok(())
            }
            Value::Struct(fields) => {
                for (_, v) in fields {
                    self.verify_value(v)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Raw, serializable snapshot of the whole tier, used for property-5
    /// equality checks and the CLI's `state` command.
    pub fn to_raw(&self) -> serde_json::Value {
        use crate::value::RawValue;
        fn bindings_raw(b: &Bindings) -> serde_json::Value {
            let mut entries: Vec<(String, RawValue)> = b
                .consts
                .iter()
                .chain(b.vars.iter())
                .map(|(k, v)| (k.clone(), v.value.get_raw()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::to_value(entries).unwrap_or(serde_json::Value::Null)
        }
        let mut instances: Vec<(String, serde_json::Value)> = self
            .instances
            .iter()
            .map(|(k, v)| (k.clone(), bindings_raw(v)))
            .collect();
        instances.sort_by(|a, b| a.0.cmp(&b.0));
        serde_json::json!({
            "global": bindings_raw(&self.global),
            "instances": instances.into_iter().collect::<HashMap<_, _>>(),
        })
    }
}

impl Bindings {
    fn deep_copy(&self) -> Bindings {
        Bindings {
            consts: self
                .consts
                .iter()
                .map(|(k, v)| (k.clone(), Variable::new(v.value.copy(), v.path.clone())))
                .collect(),
            vars: self
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), Variable::new(v.value.copy(), v.path.clone())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_lookup_roundtrips() {
        let mut state = ProgramState::new();
        state.define("x", Value::Int(5), false).unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(5)));
    }

    #[test]
    fn redefine_fails() {
        let mut state = ProgramState::new();
        state.define("x", Value::Int(5), false).unwrap();
        let err = state.define("x", Value::Int(1), false).unwrap_err();
        assert!(matches!(err, EvalErrorKind::Redefined(_)));
    }

    #[test]
    fn local_shadows_global() {
        let mut state = ProgramState::new();
        state.define("x", Value::Int(1), false).unwrap();
        state.push_local("block");
        state.define("x", Value::Int(2), false).unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(2)));
        state.pop_local().unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(1)));
    }

    #[test]
    fn pop_empty_fails() {
        let mut state = ProgramState::new();
        assert!(matches!(state.pop_local(), Err(EvalErrorKind::StackUnderflow)));
    }

    #[test]
    fn assign_through_lookup_matches_statement_level() {
        let mut state = ProgramState::new();
        state.define("x", Value::Int(1), false).unwrap();
        state.assign("x", &Value::Int(9)).unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(9)));
    }

    #[test]
    fn copy_is_independent_and_equal() {
        let mut state = ProgramState::new();
        state.define("x", Value::Int(1), false).unwrap();
        let copy = state.copy();
        assert_eq!(state.to_raw(), copy.to_raw());
        state.assign("x", &Value::Int(2)).unwrap();
        assert_ne!(state.to_raw(), copy.to_raw());
    }

    #[test]
    fn reference_resolves_against_copy() {
        let mut state = ProgramState::new();
        let path = state.define("x", Value::Int(7), false).unwrap();
        state.define("r", Value::Reference(Box::new(path)), false).unwrap();
        let copy = state.copy();
        assert!(matches!(copy.lookup_value("r").unwrap(), Value::Int(7)));
    }

    #[test]
    fn reference_assignment_forwards_to_pointee() {
        let mut state = ProgramState::new();
        let path = state.define("x", Value::Int(1), false).unwrap();
        state.define("r", Value::Reference(Box::new(path)), false).unwrap();
        state.assign("r", &Value::Int(42)).unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(42)));
    }

    #[test]
    fn array_element_path_navigates() {
        let mut state = ProgramState::new();
        let base = state
            .define("arr", Value::Array(vec![Value::Int(1), Value::Int(2)]), false)
            .unwrap();
        let elem_path = base.index(1);
        assert!(matches!(state.resolve_value(&elem_path).unwrap(), Value::Int(2)));
        state.assign_path(&elem_path, &Value::Int(9)).unwrap();
        assert!(matches!(state.resolve_value(&elem_path).unwrap(), Value::Int(9)));
    }

    #[test]
    fn instance_scope_isolated_from_global() {
        let mut state = ProgramState::new();
        state.new_instance_scope("A").unwrap();
        state.activate_instance("A");
        state.define("x", Value::Int(3), false).unwrap();
        state.activate_global(false);
        assert!(matches!(
            state.lookup_value("x"),
            Err(EvalErrorKind::UndefinedName(_))
        ));
    }
}
