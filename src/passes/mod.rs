//! Pass infrastructure (spec §4.3): stage/level-gated registration, a
//! dependency-ordered scheduler, and fixpoint execution, plus the mid-level
//! pass set (§4.4) built on top of it.

pub mod algebraic_simplify;
pub mod cfg_simplify;
pub mod constant_fold;
pub mod cse;
pub mod dce;
pub mod dge;
pub mod inline;

use crate::common::error::CompileError;
use crate::ir::module::Module;
use crate::ir::value::ValueId;
use bitflags::bitflags;

bitflags! {
    /// A pass's stage mask: which points in the pipeline it may run at.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Stage: u8 {
        const PRE_OPT  = 0b0001;
        const OPT      = 0b0010;
        const POST_OPT = 0b0100;
        const PRE_EMIT = 0b1000;
    }
}

/// A pass's visitor granularity (spec §4.3): module passes see the
/// top-level value list, function passes see one function body at a time,
/// block passes see one basic block at a time.
pub enum PassBody {
    Module(fn(&mut Module) -> bool),
    Function(fn(&mut Module, ValueId) -> bool),
    Block(fn(&mut Module, ValueId, ValueId) -> bool),
}

pub struct PassDescriptor {
    pub name: &'static str,
    pub stage: Stage,
    pub min_opt_level: u32,
    pub deps: &'static [&'static str],
    pub body: PassBody,
}

/// The process-wide pass registry, built by one explicit call from the
/// driver rather than relying on global-constructor ordering (spec §9).
pub fn build_registry() -> Vec<PassDescriptor> {
    vec![
        PassDescriptor {
            name: "cfg-simplify",
            stage: Stage::OPT.union(Stage::POST_OPT),
            min_opt_level: 1,
            deps: &[],
            body: PassBody::Function(cfg_simplify::run_function),
        },
        PassDescriptor {
            name: "constant-fold",
            stage: Stage::OPT,
            min_opt_level: 1,
            deps: &[],
            body: PassBody::Block(constant_fold::run_block),
        },
        PassDescriptor {
            name: "algebraic-simplify",
            stage: Stage::OPT,
            min_opt_level: 1,
            deps: &["constant-fold"],
            body: PassBody::Block(algebraic_simplify::run_block),
        },
        PassDescriptor {
            name: "cse",
            stage: Stage::OPT,
            min_opt_level: 3,
            deps: &["algebraic-simplify"],
            body: PassBody::Block(cse::run_block),
        },
        PassDescriptor {
            name: "inline",
            stage: Stage::OPT,
            min_opt_level: 2,
            deps: &[],
            body: PassBody::Module(inline::run_module),
        },
        PassDescriptor {
            name: "dce",
            stage: Stage::OPT.union(Stage::POST_OPT),
            min_opt_level: 1,
            deps: &["algebraic-simplify", "inline"],
            body: PassBody::Function(dce::run_function),
        },
        PassDescriptor {
            name: "dge",
            stage: Stage::POST_OPT,
            min_opt_level: 0,
            deps: &["dce"],
            body: PassBody::Module(dge::run_module),
        },
    ]
}

/// `ShowInfo`: a `--dump-passes` listing of name/stage/level/deps.
pub fn describe_registry(registry: &[PassDescriptor]) -> String {
    let mut out = String::new();
    for p in registry {
        out.push_str(&format!("{:<20} stage={:?} min-O{} deps={:?}\n", p.name, p.stage, p.min_opt_level, p.deps));
    }
    out
}

pub struct PassManager {
    registry: Vec<PassDescriptor>,
}

const MAX_FIXPOINT_ITERATIONS: u32 = 32;

impl PassManager {
    pub fn new(registry: Vec<PassDescriptor>) -> PassManager {
        PassManager { registry }
    }

    /// Filters by stage/level, topologically orders by declared
    /// dependencies, then runs the ordered sequence to a fixpoint.
    pub fn run_stage(&self, module: &mut Module, stage: Stage, opt_level: u32) -> Result<(), CompileError> {
        let selected: Vec<&PassDescriptor> = self.registry.iter().filter(|p| p.stage.intersects(stage) && p.min_opt_level <= opt_level).collect();
        let ordered = topo_sort(&selected)?;

        for iteration in 0..MAX_FIXPOINT_ITERATIONS {
            let mut changed_any = false;
            for pass in &ordered {
                let changed = run_one(module, pass);
                if changed {
                    log::debug!("pass '{}' reported a change on iteration {}", pass.name, iteration);
                }
                changed_any |= changed;
            }
            if !changed_any {
                return Ok(());
            }
        }
        log::warn!("pass stage {:?} did not reach a fixpoint after {} iterations; remaining iteration skipped", stage, MAX_FIXPOINT_ITERATIONS);
        Ok(())
    }
}

fn run_one(module: &mut Module, pass: &PassDescriptor) -> bool {
    match pass.body {
        PassBody::Module(f) => f(module),
        PassBody::Function(f) => {
            let mut changed = false;
            for func in module.functions().collect::<Vec<_>>() {
                changed |= f(module, func);
            }
            changed
        }
        PassBody::Block(f) => {
            let mut changed = false;
            for func in module.functions().collect::<Vec<_>>() {
                for block in module.function_blocks(func).to_vec() {
                    changed |= f(module, func, block);
                }
            }
            changed
        }
    }
}

/// Dependency-ordered scheduling: a dependency must precede its dependent.
/// Cycles and references to passes outside the selected set are fatal
/// configuration errors (spec §4.3/§7).
fn topo_sort<'a>(selected: &[&'a PassDescriptor]) -> Result<Vec<&'a PassDescriptor>, CompileError> {
    let names: std::collections::HashMap<&str, usize> = selected.iter().enumerate().map(|(i, p)| (p.name, i)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }
    let mut marks = vec![Mark::Unvisited; selected.len()];
    let mut order = Vec::with_capacity(selected.len());

    fn visit<'a>(
        i: usize,
        selected: &[&'a PassDescriptor],
        names: &std::collections::HashMap<&str, usize>,
        marks: &mut [Mark],
        order: &mut Vec<&'a PassDescriptor>,
    ) -> Result<(), CompileError> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Visiting => return Err(CompileError::Misconfiguration(format!("cyclic pass dependency involving '{}'", selected[i].name))),
            Mark::Unvisited => {}
        }
        marks[i] = Mark::Visiting;
        for dep in selected[i].deps {
            if let Some(&j) = names.get(dep) {
                visit(j, selected, names, marks, order)?;
            }
            // A dependency not present in the selected set (filtered out by
            // stage/level) is not an error: it simply has nothing to order.
        }
        marks[i] = Mark::Done;
        order.push(selected[i]);
        Ok(())
    }

    for i in 0..selected.len() {
        visit(i, selected, &names, &mut marks, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_module(_m: &mut Module) -> bool {
        false
    }

    #[test]
    fn topo_sort_orders_dependencies_first() {
        let a = PassDescriptor { name: "a", stage: Stage::OPT, min_opt_level: 0, deps: &[], body: PassBody::Module(noop_module) };
        let b = PassDescriptor { name: "b", stage: Stage::OPT, min_opt_level: 0, deps: &["a"], body: PassBody::Module(noop_module) };
        let selected = vec![&b, &a];
        let ordered = topo_sort(&selected).unwrap();
        let pos_a = ordered.iter().position(|p| p.name == "a").unwrap();
        let pos_b = ordered.iter().position(|p| p.name == "b").unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn topo_sort_rejects_cycles() {
        let a = PassDescriptor { name: "a", stage: Stage::OPT, min_opt_level: 0, deps: &["b"], body: PassBody::Module(noop_module) };
        let b = PassDescriptor { name: "b", stage: Stage::OPT, min_opt_level: 0, deps: &["a"], body: PassBody::Module(noop_module) };
        let selected = vec![&a, &b];
        assert!(topo_sort(&selected).is_err());
    }

    #[test]
    fn run_stage_filters_by_opt_level() {
        let registry = build_registry();
        let pm = PassManager::new(registry);
        let mut m = Module::new();
        assert!(pm.run_stage(&mut m, Stage::OPT, 0).is_ok());
    }
}
