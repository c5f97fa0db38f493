//! Instantiation (C6): builds the initial [`SimState`] from a loaded
//! [`System`] per SPEC_FULL.md §4.6.

use crate::ast::{self, Expr, TypeExpr};
use crate::dbm::Dbm;
use crate::error::{EvalError, LoadError};
use crate::eval::{domain_values, format_instance_name, Evaluator};
use crate::model::{System, Template};
use crate::state::ProgramState;
use crate::value::Value;
use std::collections::HashMap;

/// The fully materialized initial state: per-instance active locations,
/// the owning template of each instance (for edge lookup), the variable
/// tree, and the shared DBM over every discovered clock.
#[derive(Debug, Clone)]
pub struct SimState {
    pub locations: HashMap<String, String>,
    pub template_of: HashMap<String, String>,
    pub vars: ProgramState,
    pub dbm: Dbm,
}

/// Qualifies a clock's AST name with its owning instance, the way the
/// shared DBM keys per-instance clocks to avoid two instances' same-named
/// local clock colliding. Global clocks (`instance = None`) are unqualified.
pub fn qualify_clock(instance: Option<&str>, name: &str) -> String {
    match instance {
        Some(inst) => format!("{}.{}", inst, name),
        None => name.to_string(),
    }
}

fn wrap_decl_err(kind: crate::error::EvalErrorKind) -> LoadError {
    LoadError::from(EvalError::new(kind, "Declaration"))
}

fn collect_clock_names(decl: &ast::Declaration) -> Vec<String> {
    decl.items
        .iter()
        .filter_map(|item| match item {
            ast::Decl::Variables { ty: TypeExpr::Clock, vars } => Some(vars),
            _ => None,
        })
        .flat_map(|vars| vars.iter().map(|v| v.name.clone()))
        .collect()
}

fn composed_names(system: &System) -> Vec<String> {
    system.system.process_groups.iter().flatten().cloned().collect()
}

fn cartesian(domains: &[Vec<Value>]) -> Vec<Vec<Value>> {
    domains.iter().fold(vec![Vec::new()], |acc, domain| {
        acc.into_iter()
            .flat_map(|combo| {
                domain.iter().map(move |v| {
                    let mut next = combo.clone();
                    next.push(v.clone());
                    next
                })
            })
            .collect()
    })
}

fn domains_for_params(
    ev: &Evaluator,
    state: &mut ProgramState,
    params: &[ast::Parameter],
) -> Result<Vec<Vec<Value>>, LoadError> {
    let mut domains = Vec::with_capacity(params.len());
    for p in params {
        let ty = ev.eval_type(&p.ty, state).map_err(wrap_decl_err)?;
        domains.push(domain_values(&ty).map_err(wrap_decl_err)?);
    }
    Ok(domains)
}

/// Binds `args` (arbitrary expressions, evaluated in whatever scope is
/// currently active) into a freshly created instance scope named
/// `instance_name`, per the by-reference/by-value parameter rules of §4.4,
/// then evaluates the template's own local declaration inside that scope.
fn bind_instance(
    ev: &Evaluator,
    state: &mut ProgramState,
    tpl: &Template,
    instance_name: &str,
    args: &[Expr],
) -> Result<(), LoadError> {
    if args.len() != tpl.parameters.len() {
        return Err(LoadError::UnresolvedParameter {
            template: tpl.name.clone(),
            param: format!("expected {} argument(s), found {}", tpl.parameters.len(), args.len()),
        });
    }
    let mut bindings = Vec::with_capacity(args.len());
    for (param, arg) in tpl.parameters.iter().zip(args.iter()) {
        if param.is_ref {
            let path = ev.eval_place(arg, state)?;
            bindings.push((param.var.name.clone(), Value::Reference(Box::new(path)), param.var.is_const));
        } else {
            let val = ev.eval_value(arg, state)?;
            bindings.push((param.var.name.clone(), val.copy(), param.var.is_const));
        }
    }
    bind_ranged_instance_with(ev, state, tpl, instance_name, bindings)
}

/// Binds an already-evaluated parameter list (name, value, is_const) into a
/// fresh instance scope. Shared by explicit argument binding and by ranged
/// Cartesian-product instantiation, which has no argument ASTs to evaluate.
fn bind_ranged_instance_with(
    ev: &Evaluator,
    state: &mut ProgramState,
    tpl: &Template,
    instance_name: &str,
    bindings: Vec<(String, Value, bool)>,
) -> Result<(), LoadError> {
    state
        .new_instance_scope(instance_name)
        .map_err(|_| LoadError::DuplicateInstanceName(instance_name.to_string()))?;
    state.activate_instance(instance_name);
    for (name, val, is_const) in bindings {
        state.add(&name, val, is_const);
    }
    for decl in &tpl.declaration.items {
        ev.eval_decl(decl, state).map_err(wrap_decl_err)?;
    }
    state.activate_global(false);
    Ok(())
}

fn bind_ranged_instance(
    ev: &Evaluator,
    state: &mut ProgramState,
    tpl: &Template,
    instance_name: &str,
    combo: &[Value],
) -> Result<(), LoadError> {
    let bindings = tpl
        .parameters
        .iter()
        .zip(combo.iter())
        .map(|(param, val)| (param.var.name.clone(), val.copy(), param.var.is_const))
        .collect();
    bind_ranged_instance_with(ev, state, tpl, instance_name, bindings)
}

fn instantiate_from_node(
    ev: &Evaluator,
    state: &mut ProgramState,
    system: &System,
    inst: &ast::Instantiation,
    locations: &mut HashMap<String, String>,
    template_of: &mut HashMap<String, String>,
    clocks: &mut Vec<String>,
) -> Result<(), LoadError> {
    let tpl = system
        .template(&inst.template_name)
        .ok_or_else(|| LoadError::UnknownTemplate(inst.template_name.clone()))?;

    if inst.params.is_empty() {
        bind_instance(ev, state, tpl, &inst.instance_name, &inst.args)?;
        locations.insert(inst.instance_name.clone(), tpl.init_location.clone());
        template_of.insert(inst.instance_name.clone(), tpl.name.clone());
        clocks.extend(
            collect_clock_names(&tpl.declaration)
                .into_iter()
                .map(|c| qualify_clock(Some(&inst.instance_name), &c)),
        );
        return Ok(());
    }

    // A parameterized alias (`id(params) = Template(args);`): enumerate the
    // alias's own parameter domains, binding them into a transient local
    // scope while evaluating `args`, then bind the target template per combo.
    let domains = domains_for_params(ev, state, &inst.params)?;
    for combo in cartesian(&domains) {
        state.push_local(format!("alias:{}", inst.instance_name));
        for (param, val) in inst.params.iter().zip(combo.iter()) {
            state.add(&param.var.name, val.copy(), param.var.is_const);
        }
        let instance_name = format_instance_name(&inst.instance_name, &combo);
        let bind_result = bind_instance(ev, state, tpl, &instance_name, &inst.args);
        state.pop_local().expect("just pushed");
        bind_result?;
        locations.insert(instance_name.clone(), tpl.init_location.clone());
        template_of.insert(instance_name.clone(), tpl.name.clone());
        clocks.extend(
            collect_clock_names(&tpl.declaration)
                .into_iter()
                .map(|c| qualify_clock(Some(&instance_name), &c)),
        );
    }
    Ok(())
}

/// Materializes the instance set and initial [`SimState`] for `system`,
/// per the six-step algorithm of §4.6.
pub fn instantiate(system: &System) -> Result<SimState, LoadError> {
    let ev = Evaluator::new();
    let mut state = ProgramState::new();
    state.activate_global(false);

    for decl in &system.declaration.items {
        ev.eval_decl(decl, &mut state).map_err(wrap_decl_err)?;
    }

    let mut locations = HashMap::new();
    let mut template_of = HashMap::new();
    let mut clocks: Vec<String> = collect_clock_names(&system.declaration);

    for name in composed_names(system) {
        if let Some(inst) = system.instantiations.iter().find(|i| i.instance_name == name) {
            instantiate_from_node(&ev, &mut state, system, inst, &mut locations, &mut template_of, &mut clocks)?;
            continue;
        }
        let tpl = system
            .template(&name)
            .ok_or_else(|| LoadError::UnknownTemplate(name.clone()))?;
        if tpl.parameters.is_empty() {
            bind_instance(&ev, &mut state, tpl, &name, &[])?;
            locations.insert(name.clone(), tpl.init_location.clone());
            template_of.insert(name.clone(), tpl.name.clone());
            clocks.extend(
                collect_clock_names(&tpl.declaration)
                    .into_iter()
                    .map(|c| qualify_clock(Some(&name), &c)),
            );
        } else {
            let domains = domains_for_params(&ev, &mut state, &tpl.parameters)?;
            for combo in cartesian(&domains) {
                let instance_name = format_instance_name(&name, &combo);
                bind_ranged_instance(&ev, &mut state, tpl, &instance_name, &combo)?;
                locations.insert(instance_name.clone(), tpl.init_location.clone());
                template_of.insert(instance_name.clone(), tpl.name.clone());
                clocks.extend(
                    collect_clock_names(&tpl.declaration)
                        .into_iter()
                        .map(|c| qualify_clock(Some(&instance_name), &c)),
                );
            }
        }
    }

    clocks.sort();
    clocks.dedup();
    let dbm = Dbm::new(&clocks, true);
    state.activate_global(false);

    Ok(SimState { locations, template_of, vars: state, dbm })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Declaration, SystemDecl, VariableId};
    use crate::model::Location;

    fn clock_template(name: &str) -> Template {
        let mut tpl = Template::new(name, format!("t_{}", name), "l0");
        tpl.locations.insert("l0".into(), Location::new("l0", "Idle"));
        tpl.declaration = Declaration {
            items: vec![ast::Decl::Variables {
                ty: TypeExpr::Clock,
                vars: vec![VariableId { name: "x".into(), array_dims: vec![], init: None, is_const: false }],
            }],
        };
        tpl
    }

    #[test]
    fn zero_param_instance_registers_qualified_clock() {
        let mut system = System::new();
        system.templates.insert("P".into(), clock_template("P"));
        system.system = SystemDecl { process_groups: vec![vec!["P".into()]] };

        let sim = instantiate(&system).unwrap();
        assert_eq!(sim.locations.get("P"), Some(&"l0".to_string()));
        assert!(sim.dbm.clocks().iter().any(|c| c == "P.x"));
    }

    #[test]
    fn ranged_instantiation_enumerates_cartesian_product() {
        let mut tpl = clock_template("P");
        tpl.parameters.push(ast::Parameter {
            is_ref: false,
            ty: TypeExpr::BoundedInt { lower: Box::new(Expr::Integer(0)), upper: Box::new(Expr::Integer(1)) },
            var: VariableId { name: "id".into(), array_dims: vec![], init: None, is_const: true },
        });
        let mut system = System::new();
        system.templates.insert("P".into(), tpl);
        system.system = SystemDecl { process_groups: vec![vec!["P".into()]] };

        let sim = instantiate(&system).unwrap();
        assert!(sim.locations.contains_key("P(0)"));
        assert!(sim.locations.contains_key("P(1)"));
        assert!(sim.dbm.clocks().iter().any(|c| c == "P(0).x"));
        assert!(sim.dbm.clocks().iter().any(|c| c == "P(1).x"));
    }

    #[test]
    fn unknown_template_in_composition_errors() {
        let mut system = System::new();
        system.system = SystemDecl { process_groups: vec![vec!["Missing".into()]] };
        assert!(matches!(instantiate(&system), Err(LoadError::UnknownTemplate(_))));
    }
}
