//! The AST evaluator (C4): walks declarations, expressions, and statements
//! against a [`ProgramState`], hosting every side effect described in §4.4.
//!
//! The evaluator is a thin, stateless dispatcher — all mutable state lives
//! in the [`ProgramState`] it is given, and function values only carry their
//! `Rc<FunctionDef>` (§9 "mutually recursive state/evaluator": the
//! evaluator is passed at call sites rather than stored on the value).

use crate::ast::{self, AssignOp, BinOp, BlockItem, Decl, Expr, FunctionDef, IncrDecrOp, Stmt, TypeExpr};
use crate::error::{EvalError, EvalErrorKind};
use crate::state::{Path, ProgramState};
use crate::value::{FunctionValue, TypeDesc, Value};
use std::rc::Rc;

/// Result of executing a statement: the last expression-statement's value
/// (diagnostic only, Uppaal statements have no overall value) plus whether
/// a `return` unwound through it.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub value: Option<Value>,
    pub returned: bool,
}

impl ExecOutcome {
    fn normal(value: Option<Value>) -> Self {
        Self { value, returned: false }
    }

    fn returned(value: Option<Value>) -> Self {
        Self { value, returned: true }
    }
}

/// The evaluator proper. It carries no state of its own; every method takes
/// the [`ProgramState`] it should act on.
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates `expr` for its value (rvalue position).
    pub fn eval_value(&self, expr: &Expr, state: &mut ProgramState) -> Result<Value, EvalError> {
        let tag = expr.tag();
        self.eval_value_inner(expr, state).map_err(|k| EvalError::new(k, tag))
    }

    fn eval_value_inner(&self, expr: &Expr, state: &mut ProgramState) -> Result<Value, EvalErrorKind> {
        match expr {
            Expr::Integer(v) => Ok(Value::Int(*v)),
            Expr::Boolean(v) => Ok(Value::Bool(*v)),
            Expr::Variable(name) => {
                if state.access_instances() && state.has_instance(name) {
                    return Ok(Value::InstanceRef(name.clone()));
                }
                state.lookup_value(name)
            }
            Expr::Binary { op: BinOp::Dot, left, right } => self.eval_dot(left, right, state),
            Expr::Binary { op: BinOp::ArrayAccess, left, right } => {
                let base = self.eval_value(left, state)?;
                let idx = coerce_index(&self.eval_value(right, state)?)?;
                base.navigate(&crate::state::PathSegment::Index(idx)).map(|v| v.clone())
            }
            Expr::Binary { op, left, right } if op.is_short_circuiting() => {
                let l = self.eval_value(left, state)?;
                let l_bool = match &l {
                    Value::Bool(b) => *b,
                    other => return Err(EvalErrorKind::TypeMismatch {
                        expected: "bool".into(),
                        found: other.type_name().into(),
                    }),
                };
                match (op, l_bool) {
                    (BinOp::LogAnd, false) => Ok(Value::Bool(false)),
                    (BinOp::LogOr, true) => Ok(Value::Bool(true)),
                    (BinOp::LogImply, false) => Ok(Value::Bool(true)),
                    _ => self.eval_value(right, state).and_then(|r| l.apply_binary(*op, &r)),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval_value(left, state)?;
                let r = self.eval_value(right, state)?;
                l.apply_binary(*op, &r)
            }
            Expr::Unary { op, expr } => self.eval_value(expr, state)?.apply_unary(*op),
            Expr::IncrDecr { op, expr } => self.eval_incr_decr(*op, expr, state),
            Expr::Assign { op, left, right } => self.eval_assign(*op, left, right, state),
            Expr::Ternary { cond, then_branch, else_branch } => {
                let c = self.eval_value(cond, state)?;
                match c {
                    Value::Bool(true) => self.eval_value(then_branch, state),
                    Value::Bool(false) => self.eval_value(else_branch, state),
                    other => Err(EvalErrorKind::TypeMismatch {
                        expected: "bool".into(),
                        found: other.type_name().into(),
                    }),
                }
            }
            Expr::FuncCall { name, args } => self.eval_func_call(name, args, state),
            Expr::ForAll { var, domain, body } => self.eval_fold(var, domain, body, state, Fold::ForAll),
            Expr::Exists { var, domain, body } => self.eval_fold(var, domain, body, state, Fold::Exists),
            Expr::Sum { var, domain, body } => self.eval_fold(var, domain, body, state, Fold::Sum),
        }
    }

    /// Evaluates `expr` for its place (lvalue position): the path an
    /// assignment or increment should target.
    pub fn eval_place(&self, expr: &Expr, state: &mut ProgramState) -> Result<Path, EvalError> {
        let tag = expr.tag();
        self.eval_place_inner(expr, state).map_err(|k| EvalError::new(k, tag))
    }

    fn eval_place_inner(&self, expr: &Expr, state: &mut ProgramState) -> Result<Path, EvalErrorKind> {
        match expr {
            Expr::Variable(name) => state.lookup_path(name),
            Expr::Binary { op: BinOp::Dot, left, right } => {
                let field = match &**right {
                    Expr::Variable(name) => name.clone(),
                    _ => {
                        return Err(EvalErrorKind::BadOp("Dot right operand must name a field".into()))
                    }
                };
                // `Tmpl(1,2).x` / a bare instance name used as a pseudo-variable
                // (§4.6's "callable accessor") address an instance scope
                // directly rather than a field chain into an ordinary value.
                let instance_accessor = match &**left {
                    Expr::Variable(_) | Expr::FuncCall { .. } => match self.eval_value_inner(left, state)? {
                        Value::InstanceRef(inst) => Some(inst),
                        _ => None,
                    },
                    _ => None,
                };
                match instance_accessor {
                    Some(inst) => Ok(Path::new(crate::state::Section::Var, crate::state::ScopeRef::Instance(inst), field)),
                    None => {
                        let base = self.eval_place_inner(left, state)?;
                        Ok(base.field(field))
                    }
                }
            }
            Expr::Binary { op: BinOp::ArrayAccess, left, right } => {
                let base = self.eval_place_inner(left, state)?;
                let idx = coerce_index(&self.eval_value_inner(right, state)?)?;
                Ok(base.index(idx))
            }
            other => Err(EvalErrorKind::BadOp(format!("{} is not an lvalue", other.tag()))),
        }
    }

    fn eval_dot(&self, left: &Expr, right: &Expr, state: &mut ProgramState) -> Result<Value, EvalErrorKind> {
        let field = match right {
            Expr::Variable(name) => name,
            _ => return Err(EvalErrorKind::BadOp("Dot right operand must name a field".into())),
        };
        let left_val = self.eval_value_inner(left, state)?;
        match left_val {
            Value::InstanceRef(inst) => {
                let path = Path::new(crate::state::Section::Var, crate::state::ScopeRef::Instance(inst), field.clone());
                state.resolve_value(&path).map(|v| v.clone())
            }
            Value::Struct(fields) => fields
                .into_iter()
                .find(|(n, _)| n == field)
                .map(|(_, v)| v)
                .ok_or_else(|| EvalErrorKind::UndefinedMember(field.clone())),
            other => Err(EvalErrorKind::TypeMismatch {
                expected: "struct or instance".into(),
                found: other.type_name().into(),
            }),
        }
    }

    fn eval_incr_decr(&self, op: IncrDecrOp, expr: &Expr, state: &mut ProgramState) -> Result<Value, EvalErrorKind> {
        let path = self.eval_place_inner(expr, state)?;
        let current = coerce_to_plain_int(state.resolve_value(&path)?)?;
        let delta = match op {
            IncrDecrOp::PostIncr | IncrDecrOp::PreIncr => 1,
            IncrDecrOp::PostDecr | IncrDecrOp::PreDecr => -1,
        };
        let updated = current.wrapping_add(delta);
        state.assign_path(&path, &Value::Int(updated))?;
        let result = match op {
            IncrDecrOp::PostIncr | IncrDecrOp::PostDecr => current,
            IncrDecrOp::PreIncr | IncrDecrOp::PreDecr => updated,
        };
        Ok(Value::Int(result))
    }

    fn eval_assign(&self, op: AssignOp, left: &Expr, right: &Expr, state: &mut ProgramState) -> Result<Value, EvalErrorKind> {
        let path = self.eval_place_inner(left, state)?;
        let rhs = self.eval_value_inner(right, state)?;
        let new_value = match op.underlying_binop() {
            None => rhs,
            Some(binop) => {
                let current = state.resolve_value(&path)?.clone();
                current.apply_binary(binop, &rhs)?
            }
        };
        state.assign_path(&path, &new_value)?;
        Ok(state.resolve_value(&path)?.clone())
    }

    fn eval_func_call(&self, name: &str, args: &[Expr], state: &mut ProgramState) -> Result<Value, EvalErrorKind> {
        // A generated instance accessor (§4.6): `Tmpl(1,2)` addresses the
        // instance scope named "Tmpl(1,2)" rather than calling a function.
        if state.access_instances() {
            let mut arg_values = Vec::with_capacity(args.len());
            for a in args {
                arg_values.push(self.eval_value_inner(a, state)?);
            }
            let generated = format_instance_name(name, &arg_values);
            if state.has_instance(&generated) {
                return Ok(Value::InstanceRef(generated));
            }
        }
        let func = match state.lookup_value(name)? {
            Value::Function(f) => f,
            other => {
                return Err(EvalErrorKind::TypeMismatch {
                    expected: "function".into(),
                    found: other.type_name().into(),
                })
            }
        };
        self.call_function(&func, args, state)
    }

    /// Calls `func` with `args` evaluated in the caller's current scope,
    /// per the by-reference/by-value parameter binding rules in §4.4.
    pub fn call_function(&self, func: &FunctionValue, args: &[Expr], state: &mut ProgramState) -> Result<Value, EvalErrorKind> {
        let def: &FunctionDef = &func.def;
        if args.len() != def.params.len() {
            return Err(EvalErrorKind::ArityMismatch {
                expected: def.params.len(),
                found: args.len(),
            });
        }
        // Reference parameters snapshot the argument's path before the new
        // scope is pushed (the path must be resolved against the caller's
        // scope, not the callee's).
        let mut bindings: Vec<(String, Value, bool)> = Vec::with_capacity(args.len());
        for (param, arg) in def.params.iter().zip(args.iter()) {
            let pname = param.var.name.clone();
            if param.is_ref {
                let path = self.eval_place_inner(arg, state)?;
                bindings.push((pname, Value::Reference(Box::new(path)), param.var.is_const));
            } else {
                let val = self.eval_value_inner(arg, state)?;
                bindings.push((pname, val.copy(), param.var.is_const));
            }
        }
        state.push_local(format!("call:{}", def.name));
        for (pname, val, is_const) in bindings {
            state.add(&pname, val, is_const);
        }
        let outcome = self.exec_stmt_inner(&def.body, state);
        state.pop_local().expect("just pushed");
        let outcome = outcome?;
        Ok(outcome.value.unwrap_or(Value::Void))
    }

    /// Executes `stmt`, propagating `returned` upward per §4.4.
    pub fn exec_stmt(&self, stmt: &Stmt, state: &mut ProgramState) -> Result<ExecOutcome, EvalError> {
        let tag = stmt.tag();
        self.exec_stmt_inner(stmt, state).map_err(|k| EvalError::new(k, tag))
    }

    fn exec_stmt_inner(&self, stmt: &Stmt, state: &mut ProgramState) -> Result<ExecOutcome, EvalErrorKind> {
        match stmt {
            Stmt::Empty => Ok(ExecOutcome::normal(None)),
            Stmt::Expr(e) => Ok(ExecOutcome::normal(Some(self.eval_value_inner(e, state)?))),
            Stmt::Block(items) => self.exec_block(items, state),
            Stmt::If { cond, then_branch, else_branch } => {
                let c = self.eval_value_inner(cond, state)?;
                match (c, else_branch) {
                    (Value::Bool(true), _) => self.exec_stmt_inner(then_branch, state),
                    (Value::Bool(false), Some(e)) => self.exec_stmt_inner(e, state),
                    (Value::Bool(false), None) => Ok(ExecOutcome::normal(None)),
                    (other, _) => Err(EvalErrorKind::TypeMismatch {
                        expected: "bool".into(),
                        found: other.type_name().into(),
                    }),
                }
            }
            Stmt::While { cond, body } => {
                loop {
                    match self.eval_value_inner(cond, state)? {
                        Value::Bool(true) => {
                            let out = self.exec_stmt_inner(body, state)?;
                            if out.returned {
                                return Ok(out);
                            }
                        }
                        Value::Bool(false) => return Ok(ExecOutcome::normal(None)),
                        other => {
                            return Err(EvalErrorKind::TypeMismatch {
                                expected: "bool".into(),
                                found: other.type_name().into(),
                            })
                        }
                    }
                }
            }
            Stmt::DoWhile { body, cond } => loop {
                let out = self.exec_stmt_inner(body, state)?;
                if out.returned {
                    return Ok(out);
                }
                match self.eval_value_inner(cond, state)? {
                    Value::Bool(true) => continue,
                    Value::Bool(false) => return Ok(ExecOutcome::normal(None)),
                    other => {
                        return Err(EvalErrorKind::TypeMismatch {
                            expected: "bool".into(),
                            found: other.type_name().into(),
                        })
                    }
                }
            },
            Stmt::For { init, cond, step, body } => {
                if let Some(init) = init {
                    self.exec_stmt_inner(init, state)?;
                }
                loop {
                    if let Some(cond) = cond {
                        match self.eval_value_inner(cond, state)? {
                            Value::Bool(true) => {}
                            Value::Bool(false) => return Ok(ExecOutcome::normal(None)),
                            other => {
                                return Err(EvalErrorKind::TypeMismatch {
                                    expected: "bool".into(),
                                    found: other.type_name().into(),
                                })
                            }
                        }
                    }
                    let out = self.exec_stmt_inner(body, state)?;
                    if out.returned {
                        return Ok(out);
                    }
                    if let Some(step) = step {
                        self.eval_value_inner(step, state)?;
                    }
                }
            }
            Stmt::Iteration { var, domain, body } => {
                let ty = self.eval_type(domain, state)?;
                let values = domain_values(&ty)?;
                state.push_local(format!("iter:{}", var));
                let mut out = ExecOutcome::normal(None);
                for v in values {
                    state.add(var, Value::default_construct(&ty), true);
                    state.assign(var, &v)?;
                    out = self.exec_stmt_inner(body, state)?;
                    if out.returned {
                        break;
                    }
                }
                state.pop_local().expect("just pushed");
                Ok(out)
            }
            Stmt::Return(expr) => {
                let v = match expr {
                    Some(e) => Some(self.eval_value_inner(e, state)?),
                    None => None,
                };
                Ok(ExecOutcome::returned(v))
            }
        }
    }

    fn exec_block(&self, items: &[BlockItem], state: &mut ProgramState) -> Result<ExecOutcome, EvalErrorKind> {
        state.push_local("block");
        let result = (|| {
            let mut out = ExecOutcome::normal(None);
            for item in items {
                match item {
                    BlockItem::Decl(d) => self.eval_decl(d, state)?,
                    BlockItem::Stmt(s) => {
                        out = self.exec_stmt_inner(s, state)?;
                        if out.returned {
                            return Ok(out);
                        }
                    }
                }
            }
            Ok(out)
        })();
        state.pop_local().expect("just pushed");
        result
    }

    /// Evaluates a declaration, installing its binding(s) into the active
    /// scope (global evaluation) or innermost local scope (block evaluation).
    pub fn eval_decl(&self, decl: &Decl, state: &mut ProgramState) -> Result<(), EvalErrorKind> {
        match decl {
            Decl::Function(def) => {
                state.define(&def.name, Value::Function(FunctionValue { def: def.clone() }), true)?;
                Ok(())
            }
            Decl::TypeAlias { name, ty } => {
                let desc = self.eval_type(ty, state)?;
                state.define(name, type_marker(desc), true)?;
                Ok(())
            }
            Decl::Variables { ty, vars } => {
                let desc = self.eval_type(ty, state)?;
                for v in vars {
                    let elem_ty = if v.array_dims.is_empty() {
                        desc.clone()
                    } else {
                        let mut dims = Vec::with_capacity(v.array_dims.len());
                        for d in &v.array_dims {
                            dims.push(coerce_index(&self.eval_value_inner(d, state)?)?);
                        }
                        wrap_array(desc.clone(), &dims)
                    };
                    let mut value = Value::default_construct(&elem_ty);
                    if let Some(init) = &v.init {
                        let init_val = self.eval_value_inner(init, state)?;
                        value.assign(&init_val)?;
                    }
                    state.define(&v.name, value, v.is_const)?;
                }
                Ok(())
            }
        }
    }

    /// Resolves a type expression to a concrete [`TypeDesc`], evaluating
    /// any bound/size sub-expressions against the active scope.
    pub fn eval_type(&self, ty: &TypeExpr, state: &mut ProgramState) -> Result<TypeDesc, EvalErrorKind> {
        match ty {
            TypeExpr::Int => Ok(TypeDesc::Int),
            TypeExpr::Bool => Ok(TypeDesc::Bool),
            TypeExpr::Clock => Ok(TypeDesc::Clock),
            TypeExpr::Void => Ok(TypeDesc::Void),
            TypeExpr::Chan { broadcast, urgent } => Ok(TypeDesc::Chan { broadcast: *broadcast, urgent: *urgent }),
            TypeExpr::BoundedInt { lower, upper } => {
                let lo = coerce_to_plain_int(&self.eval_value_inner(lower, state)?)?;
                let hi = coerce_to_plain_int(&self.eval_value_inner(upper, state)?)?;
                Ok(TypeDesc::BoundedInt { lo, hi })
            }
            TypeExpr::Scalar { size } => {
                let n = coerce_to_plain_int(&self.eval_value_inner(size, state)?)?;
                Ok(TypeDesc::Scalar { size: n })
            }
            TypeExpr::Array { elem, size } => {
                let n = coerce_index(&self.eval_value_inner(size, state)?)?;
                let elem_ty = self.eval_type(elem, state)?;
                Ok(TypeDesc::Array { elem: Box::new(elem_ty), len: n })
            }
            TypeExpr::Struct { fields } => {
                let mut out = Vec::new();
                for f in fields {
                    let fty = self.eval_type(&f.ty, state)?;
                    for v in &f.vars {
                        out.push((v.name.clone(), fty.clone()));
                    }
                }
                Ok(TypeDesc::Struct { fields: out })
            }
            TypeExpr::Custom(name) => match state.lookup_value(name)? {
                Value::Struct(fields) => Ok(TypeDesc::Struct {
                    fields: fields.iter().map(|(n, v)| (n.clone(), type_of(v))).collect(),
                }),
                _ => Err(EvalErrorKind::UndefinedName(name.clone())),
            },
        }
    }

    fn eval_fold(&self, var: &str, domain: &TypeExpr, body: &Expr, state: &mut ProgramState, kind: Fold) -> Result<Value, EvalErrorKind> {
        let ty = self.eval_type(domain, state)?;
        let values = domain_values(&ty)?;
        state.push_local(format!("fold:{}", var));
        let mut sum = 0i32;
        let mut result = match kind {
            Fold::ForAll => true,
            Fold::Exists => false,
            Fold::Sum => false,
        };
        let outcome = (|| -> Result<(), EvalErrorKind> {
            for v in values {
                state.add(var, Value::default_construct(&ty), true);
                state.assign(var, &v)?;
                let b = self.eval_value_inner(body, state)?;
                match kind {
                    Fold::ForAll => {
                        let ok = matches!(b, Value::Bool(true));
                        if !ok {
                            result = false;
                            return Ok(());
                        }
                    }
                    Fold::Exists => {
                        if matches!(b, Value::Bool(true)) {
                            result = true;
                            return Ok(());
                        }
                    }
                    Fold::Sum => {
                        sum = sum.wrapping_add(coerce_to_plain_int(&b)?);
                    }
                }
            }
            Ok(())
        })();
        state.pop_local().expect("just pushed");
        outcome?;
        Ok(match kind {
            Fold::Sum => Value::Int(sum),
            _ => Value::Bool(result),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fold {
    ForAll,
    Exists,
    Sum,
}

fn coerce_to_plain_int(v: &Value) -> Result<i32, EvalErrorKind> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::BoundedInt { val, .. } => Ok(*val),
        Value::Bool(b) => Ok(if *b { 1 } else { 0 }),
        Value::Scalar { val, .. } => Ok(*val),
        other => Err(EvalErrorKind::TypeMismatch {
            expected: "int".into(),
            found: other.type_name().into(),
        }),
    }
}

fn coerce_index(v: &Value) -> Result<usize, EvalErrorKind> {
    let i = coerce_to_plain_int(v)?;
    usize::try_from(i).map_err(|_| EvalErrorKind::OutOfBounds { index: i as i64, len: 0 })
}

fn wrap_array(elem: TypeDesc, dims: &[usize]) -> TypeDesc {
    dims.iter().rev().fold(elem, |acc, &len| TypeDesc::Array { elem: Box::new(acc), len })
}

fn type_of(v: &Value) -> TypeDesc {
    match v {
        Value::Int(_) => TypeDesc::Int,
        Value::BoundedInt { lo, hi, .. } => TypeDesc::BoundedInt { lo: *lo, hi: *hi },
        Value::Bool(_) => TypeDesc::Bool,
        Value::Scalar { size, .. } => TypeDesc::Scalar { size: *size },
        Value::Clock { .. } => TypeDesc::Clock,
        Value::Chan { broadcast, urgent, .. } => TypeDesc::Chan { broadcast: *broadcast, urgent: *urgent },
        Value::Array(items) => TypeDesc::Array {
            elem: Box::new(items.first().map(type_of).unwrap_or(TypeDesc::Void)),
            len: items.len(),
        },
        Value::Struct(fields) => TypeDesc::Struct {
            fields: fields.iter().map(|(n, v)| (n.clone(), type_of(v))).collect(),
        },
        Value::Function(_) => TypeDesc::Void,
        Value::Reference(_) | Value::InstanceRef(_) | Value::Void => TypeDesc::Void,
    }
}

/// A type alias binds to a zero-sized marker; only `eval_type`'s
/// `TypeExpr::Custom` branch ever reads it back, via `type_of` over a
/// constructed default value, so any default-constructible value works.
fn type_marker(desc: TypeDesc) -> Value {
    Value::default_construct(&desc)
}

/// Enumerates the integer values of a bounded-int/scalar iteration domain.
/// `pub(crate)` so the instantiation logic in [`crate::engine`] can reuse it
/// for ranged-parameter Cartesian enumeration (§4.6) and select-value
/// domains (§4.7 Stage 1).
pub(crate) fn domain_values(ty: &TypeDesc) -> Result<Vec<Value>, EvalErrorKind> {
    match ty {
        TypeDesc::BoundedInt { lo, hi } => Ok((*lo..=*hi).map(Value::Int).collect()),
        TypeDesc::Scalar { size } => Ok((0..*size).map(Value::Int).collect()),
        other => Err(EvalErrorKind::TypeMismatch {
            expected: "bounded int or scalar domain".into(),
            found: other.name(),
        }),
    }
}

/// Builds the generated instance name `Template(v1,…,vk)` used by ranged
/// instantiation (§4.6).
pub fn format_instance_name(template: &str, args: &[Value]) -> String {
    if args.is_empty() {
        return template.to_string();
    }
    let parts: Vec<String> = args
        .iter()
        .map(|v| match v {
            Value::Int(i) => i.to_string(),
            Value::BoundedInt { val, .. } => val.to_string(),
            Value::Scalar { val, .. } => val.to_string(),
            other => other.get_raw_display(),
        })
        .collect();
    format!("{}({})", template, parts.join(","))
}

impl Value {
    fn get_raw_display(&self) -> String {
        format!("{:?}", self.get_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VariableId;

    fn decl_int(name: &str, init: Option<Expr>, is_const: bool) -> Decl {
        Decl::Variables {
            ty: TypeExpr::Int,
            vars: vec![VariableId { name: name.into(), array_dims: vec![], init, is_const }],
        }
    }

    #[test]
    fn arithmetic_and_assignment_roundtrip() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        ev.eval_decl(&decl_int("x", Some(Expr::Integer(1)), false), &mut state).unwrap();
        let assign = Expr::Assign {
            op: AssignOp::AddAssign,
            left: Box::new(Expr::Variable("x".into())),
            right: Box::new(Expr::Integer(4)),
        };
        let v = ev.eval_value(&assign, &mut state).unwrap();
        assert!(matches!(v, Value::Int(5)));
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(5)));
    }

    #[test]
    fn short_circuit_and_skips_right_side() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        let expr = Expr::Binary {
            op: BinOp::LogAnd,
            left: Box::new(Expr::Boolean(false)),
            right: Box::new(Expr::FuncCall { name: "undefined_fn".into(), args: vec![] }),
        };
        let v = ev.eval_value(&expr, &mut state).unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }

    #[test]
    fn if_else_picks_branch() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        ev.eval_decl(&decl_int("x", Some(Expr::Integer(0)), false), &mut state).unwrap();
        let stmt = Stmt::If {
            cond: Expr::Boolean(true),
            then_branch: Box::new(Stmt::Expr(Expr::Assign {
                op: AssignOp::Assign,
                left: Box::new(Expr::Variable("x".into())),
                right: Box::new(Expr::Integer(9)),
            })),
            else_branch: None,
        };
        ev.exec_stmt(&stmt, &mut state).unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(9)));
    }

    #[test]
    fn function_call_binds_params_and_returns() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        let def = Rc::new(FunctionDef {
            name: "inc".into(),
            params: vec![ast::Parameter {
                is_ref: false,
                ty: TypeExpr::Int,
                var: VariableId { name: "n".into(), array_dims: vec![], init: None, is_const: false },
            }],
            body: Stmt::Return(Some(Expr::Binary {
                op: BinOp::Add,
                left: Box::new(Expr::Variable("n".into())),
                right: Box::new(Expr::Integer(1)),
            })),
            ret_type: TypeExpr::Int,
        });
        ev.eval_decl(&Decl::Function(def), &mut state).unwrap();
        let call = Expr::FuncCall { name: "inc".into(), args: vec![Expr::Integer(41)] };
        let v = ev.eval_value(&call, &mut state).unwrap();
        assert!(matches!(v, Value::Int(42)));
    }

    #[test]
    fn reference_parameter_mutates_caller_variable() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        ev.eval_decl(&decl_int("x", Some(Expr::Integer(1)), false), &mut state).unwrap();
        let def = Rc::new(FunctionDef {
            name: "bump".into(),
            params: vec![ast::Parameter {
                is_ref: true,
                ty: TypeExpr::Int,
                var: VariableId { name: "r".into(), array_dims: vec![], init: None, is_const: false },
            }],
            body: Stmt::Expr(Expr::Assign {
                op: AssignOp::AddAssign,
                left: Box::new(Expr::Variable("r".into())),
                right: Box::new(Expr::Integer(10)),
            }),
            ret_type: TypeExpr::Void,
        });
        ev.eval_decl(&Decl::Function(def), &mut state).unwrap();
        let call = Expr::FuncCall { name: "bump".into(), args: vec![Expr::Variable("x".into())] };
        ev.eval_value(&call, &mut state).unwrap();
        assert!(matches!(state.lookup_value("x").unwrap(), Value::Int(11)));
    }

    #[test]
    fn for_all_short_circuits_on_false() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        let expr = Expr::ForAll {
            var: "i".into(),
            domain: Box::new(TypeExpr::BoundedInt {
                lower: Box::new(Expr::Integer(0)),
                upper: Box::new(Expr::Integer(3)),
            }),
            body: Box::new(Expr::Binary {
                op: BinOp::LessThan,
                left: Box::new(Expr::Variable("i".into())),
                right: Box::new(Expr::Integer(2)),
            }),
        };
        let v = ev.eval_value(&expr, &mut state).unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }

    #[test]
    fn array_index_assignment() {
        let mut state = ProgramState::new();
        let ev = Evaluator::new();
        state.define("arr", Value::Array(vec![Value::Int(0), Value::Int(0)]), false).unwrap();
        let assign = Expr::Assign {
            op: AssignOp::Assign,
            left: Box::new(Expr::Binary {
                op: BinOp::ArrayAccess,
                left: Box::new(Expr::Variable("arr".into())),
                right: Box::new(Expr::Integer(1)),
            }),
            right: Box::new(Expr::Integer(7)),
        };
        ev.eval_value(&assign, &mut state).unwrap();
        assert!(matches!(state.lookup_value("arr").unwrap(), Value::Array(items) if matches!(items[1], Value::Int(7))));
    }
}
