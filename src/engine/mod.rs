//! The transition engine (C7): enumerates, enables, fires, and publishes
//! transitions over a [`SimState`], driven by an [`Engine`] that also owns
//! the backtrackable trace the CLI navigates.

pub mod guard;
pub mod instantiate;
pub mod ops;

use crate::ast::{self, SyncOp};
use crate::error::{EvalError, SimulationError, StateError};
use crate::eval::{domain_values, Evaluator};
use crate::model::{Edge, System};
use crate::state::Path;
use crate::value::Value;
use ops::DbmOp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, warn};

pub use instantiate::{instantiate, qualify_clock, SimState};

/// One participant of a (possibly multi-instance, synchronized) transition:
/// the firing instance, the edge it takes, and its select-value bindings.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub instance: String,
    pub edge_id: String,
    pub selects: Vec<(String, Value)>,
}

/// A fully enabled transition: the candidates that fire together, the
/// state reached by firing them, and the flat DBM-op log recorded for it
/// (§4.8's audit/replay contract).
#[derive(Debug, Clone)]
pub struct EnabledTransition {
    pub candidates: Vec<Candidate>,
    pub target: SimState,
    pub ops: Vec<DbmOp>,
}

#[derive(Debug, Clone)]
struct PotentialTransition {
    candidates: Vec<Candidate>,
}

fn edge_of<'a>(system: &'a System, sim: &SimState, instance: &str, edge_id: &str) -> Option<&'a Edge> {
    let tpl_name = sim.template_of.get(instance)?;
    system.template(tpl_name)?.edges.get(edge_id)
}

fn select_combos(ev: &Evaluator, state: &mut crate::state::ProgramState, edge: &Edge) -> Result<Vec<Vec<(String, Value)>>, SimulationError> {
    let mut combos: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for sel in &edge.selects {
        let ty = ev
            .eval_type(&sel.domain, state)
            .map_err(|k| SimulationError::Eval(EvalError::new(k, "Select")))?;
        let values = domain_values(&ty).map_err(|k| SimulationError::Eval(EvalError::new(k, "Select")))?;
        let mut next = Vec::new();
        for combo in &combos {
            for v in &values {
                let mut c = combo.clone();
                c.push((sel.name.clone(), v.clone()));
                next.push(c);
            }
        }
        combos = next;
    }
    Ok(combos)
}

/// Cartesian product over each group's options, where `None` represents an
/// instance's "no-op, does not receive" choice (§4.7 Stage 1 broadcast).
fn cartesian_options<'a>(groups: &[Vec<Option<&'a Candidate>>]) -> Vec<Vec<Option<&'a Candidate>>> {
    groups.iter().fold(vec![Vec::new()], |acc, group| {
        acc.into_iter()
            .flat_map(|combo| {
                group.iter().map(move |opt| {
                    let mut next = combo.clone();
                    next.push(*opt);
                    next
                })
            })
            .collect()
    })
}

/// Stage 1: enumerates every potential transition out of `sim`'s active
/// locations, pairing synchronization candidates per channel.
fn enumerate(ev: &Evaluator, system: &System, sim: &SimState) -> Result<Vec<PotentialTransition>, SimulationError> {
    let mut state = sim.vars.clone();
    let mut silents = Vec::new();
    let mut emit_candidates: HashMap<Path, Vec<Candidate>> = HashMap::new();
    let mut recv_candidates: HashMap<Path, Vec<Candidate>> = HashMap::new();
    let mut broadcast_channels: HashMap<Path, bool> = HashMap::new();

    let mut instances: Vec<&String> = sim.locations.keys().collect();
    instances.sort();

    for inst in instances {
        let loc = &sim.locations[inst];
        let tpl_name = sim
            .template_of
            .get(inst)
            .ok_or_else(|| SimulationError::UndefinedInvariantName(inst.clone()))?;
        let tpl = system
            .template(tpl_name)
            .ok_or_else(|| SimulationError::UndefinedInvariantName(tpl_name.clone()))?;
        state.activate_instance(inst);
        for edge in tpl.outgoing(loc) {
            for selects in select_combos(ev, &mut state, edge)? {
                let cand = Candidate { instance: inst.clone(), edge_id: edge.id.clone(), selects };
                match &edge.sync {
                    None => silents.push(PotentialTransition { candidates: vec![cand] }),
                    Some(sync) => {
                        let chan_path = ev
                            .eval_place(&sync.channel, &mut state)
                            .map_err(SimulationError::Eval)?;
                        let canonical = state
                            .canonical_path(&chan_path)
                            .map_err(|k| SimulationError::Eval(EvalError::new(k, "Sync")))?;
                        let broadcast = matches!(
                            state.resolve_value(&canonical),
                            Ok(Value::Chan { broadcast: true, .. })
                        );
                        broadcast_channels.insert(canonical.clone(), broadcast);
                        match sync.op {
                            SyncOp::Emit => emit_candidates.entry(canonical).or_default().push(cand),
                            SyncOp::Receive => recv_candidates.entry(canonical).or_default().push(cand),
                        }
                    }
                }
            }
        }
    }

    let mut transitions = silents;
    let mut channel_keys: Vec<&Path> = emit_candidates.keys().collect();
    channel_keys.sort_by_key(|p| p.to_string());
    for chan in channel_keys {
        let callers = &emit_candidates[chan];
        let broadcast = *broadcast_channels.get(chan).unwrap_or(&false);
        let listeners = recv_candidates.get(chan).cloned().unwrap_or_default();
        if broadcast {
            for caller in callers {
                // The listener group set excludes the caller's own instance,
                // so it's recomputed per caller (§4.7 Stage 1: "across all
                // other instances").
                let mut by_instance: HashMap<&str, Vec<&Candidate>> = HashMap::new();
                for l in &listeners {
                    if l.instance != caller.instance {
                        by_instance.entry(l.instance.as_str()).or_default().push(l);
                    }
                }
                let mut instance_keys: Vec<&&str> = by_instance.keys().collect();
                instance_keys.sort();
                let groups: Vec<Vec<Option<&Candidate>>> = instance_keys
                    .into_iter()
                    .map(|inst| {
                        let cands = &by_instance[inst];
                        let mut opts: Vec<Option<&Candidate>> = cands.iter().map(|c| Some(*c)).collect();
                        opts.push(None);
                        opts
                    })
                    .collect();
                let combos = cartesian_options(&groups);
                for combo in &combos {
                    let mut candidates = vec![caller.clone()];
                    candidates.extend(combo.iter().filter_map(|opt| opt.map(|c| c.clone())));
                    transitions.push(PotentialTransition { candidates });
                }
            }
        } else {
            for caller in callers {
                for listener in &listeners {
                    if listener.instance != caller.instance {
                        transitions.push(PotentialTransition {
                            candidates: vec![caller.clone(), listener.clone()],
                        });
                    }
                }
            }
        }
    }
    Ok(transitions)
}

/// Stage 2: drops every potential transition that does not involve an edge
/// out of a currently committed location, if any such location is active.
fn filter_committed(system: &System, sim: &SimState, transitions: Vec<PotentialTransition>) -> Vec<PotentialTransition> {
    let committed: Vec<&str> = sim
        .locations
        .iter()
        .filter(|(inst, loc)| {
            sim.template_of
                .get(inst.as_str())
                .and_then(|t| system.template(t))
                .and_then(|tpl| tpl.locations.get(loc.as_str()))
                .map(|l| l.is_committed())
                .unwrap_or(false)
        })
        .map(|(inst, _)| inst.as_str())
        .collect();
    if committed.is_empty() {
        return transitions;
    }
    transitions
        .into_iter()
        .filter(|t| t.candidates.iter().any(|c| committed.contains(&c.instance.as_str())))
        .collect()
}

/// Resolves a bare AST clock name to the qualified key the shared DBM uses,
/// preferring an instance-local clock over a same-named global one.
fn resolve_clock_name(dbm: &crate::dbm::Dbm, instance: &str, name: &str) -> Result<String, SimulationError> {
    let qualified = qualify_clock(Some(instance), name);
    if dbm.clocks().iter().any(|c| c == &qualified) {
        Ok(qualified)
    } else if name == "t0_ref" || dbm.clocks().iter().any(|c| c == name) {
        Ok(name.to_string())
    } else {
        Err(SimulationError::UnknownClock(name.to_string()))
    }
}

fn qualify_op(op: DbmOp, dbm: &crate::dbm::Dbm, instance: &str) -> Result<DbmOp, SimulationError> {
    Ok(match op {
        DbmOp::Constraint(c1, c2, rel, v) => DbmOp::Constraint(
            resolve_clock_name(dbm, instance, &c1)?,
            resolve_clock_name(dbm, instance, &c2)?,
            rel,
            v,
        ),
        DbmOp::Reset(c, v) => DbmOp::Reset(resolve_clock_name(dbm, instance, &c)?, v),
        other => other,
    })
}

/// Stages 3-5: copies `sim`, installs select bindings, checks variable and
/// clock guards, fires updates and resets, then applies post-fire location
/// invariants (and `DelayFuture` if nothing urgent/committed is active).
/// Returns `Ok(None)` for any candidate-local failure (guard false, zone
/// emptied); genuine evaluation/DBM errors propagate as fatal.
fn enable_and_fire(ev: &Evaluator, system: &System, sim: &SimState, pt: &PotentialTransition) -> Result<Option<EnabledTransition>, SimulationError> {
    let mut target = sim.clone();
    for cand in &pt.candidates {
        target.vars.activate_instance(&cand.instance);
        target.vars.push_local(format!("select:{}:{}", cand.instance, cand.edge_id));
        for (name, val) in &cand.selects {
            target.vars.add(name, val.copy(), true);
        }
    }

    let outcome = (|| -> Result<Option<Vec<DbmOp>>, SimulationError> {
        // Variable guards.
        for cand in &pt.candidates {
            target.vars.activate_instance(&cand.instance);
            let edge = edge_of(system, sim, &cand.instance, &cand.edge_id)
                .ok_or_else(|| SimulationError::UndefinedInvariantName(cand.edge_id.clone()))?;
            for g in &edge.variable_guards {
                match ev.eval_value(&g.expr, &mut target.vars).map_err(SimulationError::Eval)? {
                    Value::Bool(true) => {}
                    Value::Bool(false) => {
                        debug!(edge = %cand.edge_id, instance = %cand.instance, "variable guard false, discarding candidate");
                        return Ok(None);
                    }
                    _ => return Err(SimulationError::MalformedClockExpr(g.text.clone())),
                }
            }
        }

        // Clock guards.
        let mut ops = Vec::new();
        for cand in &pt.candidates {
            let edge = edge_of(system, sim, &cand.instance, &cand.edge_id).expect("checked above");
            for g in &edge.clock_guards {
                for op in guard::translate_guard(&g.expr)? {
                    ops.push(qualify_op(op, &target.dbm, &cand.instance)?);
                }
            }
        }
        for op in &ops {
            op.apply(&mut target.dbm).map_err(SimulationError::from)?;
        }
        target.dbm.canonicalize();
        ops.push(DbmOp::Close);
        if target.dbm.is_empty() {
            debug!("clock guard zone empty, discarding candidate");
            return Ok(None);
        }

        // Fire: updates, then resets.
        for cand in &pt.candidates {
            target.vars.activate_instance(&cand.instance);
            let edge = edge_of(system, sim, &cand.instance, &cand.edge_id).expect("checked above");
            for u in &edge.updates {
                ev.eval_value(&u.expr, &mut target.vars).map_err(SimulationError::Eval)?;
            }
        }
        for cand in &pt.candidates {
            let edge = edge_of(system, sim, &cand.instance, &cand.edge_id).expect("checked above");
            for r in &edge.resets {
                let op = qualify_op(guard::translate_reset(&r.expr)?, &target.dbm, &cand.instance)?;
                op.apply(&mut target.dbm).map_err(SimulationError::from)?;
                ops.push(op);
            }
        }
        target.dbm.canonicalize();
        ops.push(DbmOp::Close);

        // Move active locations.
        for cand in &pt.candidates {
            let edge = edge_of(system, sim, &cand.instance, &cand.edge_id).expect("checked above");
            target.locations.insert(cand.instance.clone(), edge.target.clone());
        }

        Ok(Some(ops))
    })();

    for _ in &pt.candidates {
        target.vars.pop_local().expect("just pushed");
    }
    target.vars.activate_global(false);

    let mut ops = match outcome? {
        Some(ops) => ops,
        None => return Ok(None),
    };

    // Stage 5: post-fire location semantics. An urgent channel used to fire
    // also forbids time passage, same as an urgent/committed location.
    let any_urgent_or_committed = target.locations.iter().any(|(inst, loc)| {
        target
            .template_of
            .get(inst.as_str())
            .and_then(|t| system.template(t))
            .and_then(|tpl| tpl.locations.get(loc.as_str()))
            .map(|l| l.is_urgent() || l.is_committed())
            .unwrap_or(false)
    }) || pt.candidates.iter().any(|cand| {
        edge_of(system, sim, &cand.instance, &cand.edge_id)
            .and_then(|edge| edge.sync.as_ref())
            .map(|sync| {
                let mut probe = sim.vars.clone();
                probe.activate_instance(&cand.instance);
                ev.eval_place(&sync.channel, &mut probe)
                    .ok()
                    .and_then(|p| probe.canonical_path(&p).ok())
                    .and_then(|p| probe.resolve_value(&p).ok().cloned())
                    .map(|v| matches!(v, Value::Chan { urgent: true, .. }))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    if !any_urgent_or_committed {
        DbmOp::DelayFuture.apply(&mut target.dbm).map_err(SimulationError::from)?;
        ops.push(DbmOp::DelayFuture);
    }
    for (inst, loc) in &target.locations {
        if let Some(tpl) = target.template_of.get(inst).and_then(|t| system.template(t)) {
            if let Some(location) = tpl.locations.get(loc.as_str()) {
                for inv in &location.invariants {
                    target.vars.activate_instance(inst);
                    for op in guard::translate_guard(&inv.expr)? {
                        let op = qualify_op(op, &target.dbm, inst)?;
                        op.apply(&mut target.dbm).map_err(SimulationError::from)?;
                        ops.push(op);
                    }
                }
            }
        }
    }
    target.vars.activate_global(false);
    target.dbm.canonicalize();
    ops.push(DbmOp::Close);
    if target.dbm.is_empty() {
        debug!("post-fire invariants emptied the zone, discarding transition");
        return Ok(None);
    }

    Ok(Some(EnabledTransition { candidates: pt.candidates.clone(), target, ops }))
}

/// Runs the full Stage 1-5 pipeline over `sim`, returning every transition
/// that survives to be fired, in deterministic enumeration order.
pub fn enabled_transitions(ev: &Evaluator, system: &System, sim: &SimState) -> Result<Vec<EnabledTransition>, SimulationError> {
    let potential = filter_committed(system, sim, enumerate(ev, system, sim)?);
    let mut enabled = Vec::with_capacity(potential.len());
    for pt in potential {
        if let Some(t) = enable_and_fire(ev, system, sim, &pt)? {
            enabled.push(t);
        }
    }
    Ok(enabled)
}

/// Owns the backtrackable trace the CLI navigates, plus the RNG used by
/// random-step runs.
pub struct Engine {
    system: System,
    evaluator: Evaluator,
    trace: Vec<SimState>,
    position: usize,
    rng: StdRng,
    max_trace_len: usize,
}

impl Engine {
    /// Builds an `Engine` from a loaded `System`, instantiating its initial
    /// state (C6). `seed` fixes the RNG for reproducible random runs. The
    /// trace is unbounded until [`Engine::with_max_trace_len`] is applied.
    pub fn new(system: System, seed: Option<u64>) -> Result<Self, crate::error::LoadError> {
        let initial = instantiate(&system)?;
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            system,
            evaluator: Evaluator::new(),
            trace: vec![initial],
            position: 0,
            rng,
            max_trace_len: 0,
        })
    }

    /// Caps the in-memory trace at `max_trace_len` entries (0 = unbounded),
    /// per `EngineConfig::max_trace_len`. Oldest entries drop first; `goto`
    /// and `back` only ever see what's left once capped.
    pub fn with_max_trace_len(mut self, max_trace_len: usize) -> Self {
        self.max_trace_len = max_trace_len;
        self
    }

    fn enforce_trace_cap(&mut self) {
        if self.max_trace_len == 0 || self.trace.len() <= self.max_trace_len {
            return;
        }
        let excess = self.trace.len() - self.max_trace_len;
        self.trace.drain(0..excess);
        self.position = self.position.saturating_sub(excess);
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn current(&self) -> &SimState {
        &self.trace[self.position]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }

    /// The transitions enabled from the current position (§4.7 Stages 1-5).
    pub fn enabled(&self) -> Result<Vec<EnabledTransition>, SimulationError> {
        enabled_transitions(&self.evaluator, &self.system, self.current())
    }

    /// Fires enabled transition `i`: truncates any existing future beyond
    /// the current position, then appends the chosen target (§4.7 Stage 6).
    pub fn fire(&mut self, i: usize) -> Result<(), EngineError> {
        let mut enabled = self.enabled()?;
        let available = enabled.len();
        if i >= available {
            return Err(EngineError::State(StateError::FireIndexOutOfRange { requested: i, available }));
        }
        let chosen = enabled.swap_remove(i);
        self.trace.truncate(self.position + 1);
        self.trace.push(chosen.target);
        self.position += 1;
        self.enforce_trace_cap();
        Ok(())
    }

    /// Navigates to an already-computed trace position without firing
    /// anything new.
    pub fn goto(&mut self, idx: usize) -> Result<(), StateError> {
        if idx >= self.trace.len() {
            return Err(StateError::GotoOutOfRange { requested: idx, trace_len: self.trace.len() });
        }
        self.position = idx;
        Ok(())
    }

    /// Moves forward `n` steps: replays cached trace entries where
    /// available, otherwise extends by firing the first enumerated
    /// transition at each new step (the deterministic default path).
    pub fn forward(&mut self, n: usize) -> Result<(), EngineError> {
        for _ in 0..n {
            if self.position + 1 < self.trace.len() {
                self.position += 1;
            } else {
                self.fire(0)?;
            }
        }
        Ok(())
    }

    /// Moves back up to `n` steps, clamped at the start of the trace.
    pub fn back(&mut self, n: usize) {
        self.position = self.position.saturating_sub(n);
    }

    /// Fires `n` uniformly random enabled transitions in a row, stopping
    /// early if a state has none (property 8: deterministic given a seed).
    pub fn random_run(&mut self, n: usize) -> Result<usize, EngineError> {
        let mut fired = 0;
        for _ in 0..n {
            let enabled = self.enabled()?;
            if enabled.is_empty() {
                warn!("no enabled transitions, stopping random run early");
                break;
            }
            let idx = self.rng.gen_range(0..enabled.len());
            self.fire(idx)?;
            fired += 1;
        }
        Ok(fired)
    }
}

/// The outer error type `Engine`'s mutating operations can raise: either a
/// fatal simulation failure or an invalid request against the current
/// trace position.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    State(#[from] StateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Declaration, Expr, SystemDecl, VariableId};
    use crate::model::{Edge, Location};

    fn counter_system() -> System {
        let mut tpl = crate::model::Template::new("P", "t0", "l0");
        tpl.locations.insert("l0".into(), Location::new("l0", "Idle"));
        tpl.locations.insert("l1".into(), Location::new("l1", "Done"));
        let mut edge = Edge::new("e0", "l0", "l1");
        edge.updates.push(ast::Update {
            expr: Expr::Assign {
                op: ast::AssignOp::AddAssign,
                left: Box::new(Expr::Variable("n".into())),
                right: Box::new(Expr::Integer(1)),
            },
            text: "n += 1".into(),
        });
        tpl.edges.insert("e0".into(), edge);
        tpl.declaration = Declaration {
            items: vec![ast::Decl::Variables {
                ty: ast::TypeExpr::Int,
                vars: vec![VariableId { name: "n".into(), array_dims: vec![], init: Some(Expr::Integer(0)), is_const: false }],
            }],
        };

        let mut system = System::new();
        system.templates.insert("P".into(), tpl);
        system.system = SystemDecl { process_groups: vec![vec!["P".into()]] };
        system
    }

    #[test]
    fn silent_edge_is_enabled_and_fires() {
        let system = counter_system();
        let mut engine = Engine::new(system, Some(1)).unwrap();
        let enabled = engine.enabled().unwrap();
        assert_eq!(enabled.len(), 1);
        engine.fire(0).unwrap();
        assert_eq!(engine.current().locations.get("P"), Some(&"l1".to_string()));
    }

    #[test]
    fn fire_index_out_of_range_errors() {
        let system = counter_system();
        let mut engine = Engine::new(system, Some(1)).unwrap();
        engine.fire(0).unwrap();
        // no outgoing edges from l1
        assert!(matches!(engine.fire(0), Err(EngineError::State(StateError::FireIndexOutOfRange { .. }))));
    }

    #[test]
    fn goto_out_of_range_errors() {
        let system = counter_system();
        let engine = Engine::new(system, Some(1)).unwrap();
        let mut engine = engine;
        assert!(matches!(engine.goto(5), Err(StateError::GotoOutOfRange { .. })));
    }

    #[test]
    fn forward_then_back_round_trips_position() {
        let system = counter_system();
        let mut engine = Engine::new(system, Some(1)).unwrap();
        engine.forward(1).unwrap();
        assert_eq!(engine.position(), 1);
        engine.back(1);
        assert_eq!(engine.position(), 0);
    }

    #[test]
    fn committed_location_filters_other_instances() {
        let mut system = counter_system();
        system.templates.get_mut("P").unwrap().locations.get_mut("l0").unwrap().set_committed(true);
        let engine = Engine::new(system, Some(1)).unwrap();
        let enabled = engine.enabled().unwrap();
        assert_eq!(enabled.len(), 1);
    }

    #[test]
    fn guard_false_discards_candidate() {
        let mut system = counter_system();
        system
            .templates
            .get_mut("P")
            .unwrap()
            .edges
            .get_mut("e0")
            .unwrap()
            .variable_guards
            .push(ast::VariableGuard {
                expr: Expr::Binary {
                    op: BinOp::GreaterThan,
                    left: Box::new(Expr::Variable("n".into())),
                    right: Box::new(Expr::Integer(0)),
                },
                text: "n > 0".into(),
            });
        let engine = Engine::new(system, Some(1)).unwrap();
        let enabled = engine.enabled().unwrap();
        assert!(enabled.is_empty());
    }
}
