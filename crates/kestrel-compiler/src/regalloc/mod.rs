//! Register allocation.
//!
//! [`RegisterAllocation`] lowers phis into moves, computes live intervals
//! and assigns registers first-fit in order of interval start. The passes
//! after it rewrite the allocated IR into the shape the backends emit:
//! stack slots become register moves, call arguments move into the
//! outgoing window, redundant moves and constant loads disappear, and
//! registers that do not fit a short operand are spilled.

mod liveness;
mod load_const_vn;
mod lower_calls;
mod lower_store;
mod mov_elim;
mod recreate;
mod spill;

pub use liveness::{BitSet, Interval, LiveIntervals, Segment};
pub use load_const_vn::LoadConstantValueNumbering;
pub use lower_calls::LowerCalls;
pub use lower_store::LowerStoreInstrs;
pub use mov_elim::MovElimination;
pub use recreate::RecreateCheapValues;
pub use spill::SpillRegisters;

use rustc_hash::FxHashMap;

use crate::config::CompilerConfig;
use crate::error::{Error, Result};
use crate::ir::{Allocation, Function, InsertPoint, InstId, Module, Opcode, Value};
use crate::opt::Pass;

pub struct RegisterAllocation;

impl Pass for RegisterAllocation {
    fn name(&self) -> &'static str {
        "RegisterAllocation"
    }

    fn run(&self, module: &mut Module, config: &CompilerConfig) -> Result<()> {
        for id in module.function_ids() {
            let f = module.function_mut(id);
            if f.allocation.is_some() {
                continue;
            }
            let groups = lower_phis(f);
            let allocation = allocate(f, groups);
            tracing::trace!(function = %f.name, frame_size = allocation.frame_size, "allocated registers");
            check_frame_size(f, allocation.frame_size, config)?;
            f.allocation = Some(allocation);
        }
        Ok(())
    }
}

/// Fails with [`Error::ResourceLimit`] when a frame needs more registers
/// than the configuration allows.
pub(crate) fn check_frame_size(f: &Function, frame_size: u32, config: &CompilerConfig) -> Result<()> {
    if frame_size > config.max_registers {
        return Err(Error::resource_limit(
            f.name.clone(),
            format!("needs {} registers, limit is {}", frame_size, config.max_registers),
        ));
    }
    Ok(())
}

/// Union-find over instructions that must share a register.
struct Groups {
    parent: Vec<u32>,
}

impl Groups {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
        }
    }

    fn find(&mut self, id: InstId) -> InstId {
        let mut x = id.0;
        while self.parent[x as usize] != x {
            let up = self.parent[x as usize];
            self.parent[x as usize] = self.parent[up as usize];
            x = up;
        }
        InstId(x)
    }

    fn join(&mut self, a: InstId, b: InstId) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.index()] = ra.0;
        }
    }

    fn grow(&mut self, len: usize) {
        while self.parent.len() < len {
            self.parent.push(self.parent.len() as u32);
        }
    }
}

/// Replaces every phi operand with a move at the end of its predecessor
/// and routes the other uses of the phi through a copy at the top of its
/// block, so the moves of a back edge never clobber a value still in use.
/// Returns the register groups: each phi together with its moves.
fn lower_phis(f: &mut Function) -> Groups {
    let phis: Vec<InstId> = f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Phi).collect();
    let mut groups = Groups::new(f.insts.len());

    for &phi in &phis {
        let block = f.inst(phi).block;
        let copy = f.insert(InsertPoint::Start(block), Opcode::Mov, vec![Value::Inst(phi)]);
        let ids: Vec<InstId> = f.inst_ids().collect();
        for id in ids {
            if id == copy {
                continue;
            }
            for op in &mut f.inst_mut(id).operands {
                if *op == Value::Inst(phi) {
                    *op = Value::Inst(copy);
                }
            }
        }
    }

    for &phi in &phis {
        let entries: Vec<(Value, _)> = f.inst(phi).phi_entries().map(|(v, b)| (v.clone(), b)).collect();
        for (value, pred) in entries {
            let mov = f.insert(InsertPoint::BeforeTerminator(pred), Opcode::Mov, vec![value]);
            f.set_phi_entry(phi, pred, Value::Inst(mov));
            groups.grow(f.insts.len());
            groups.join(phi, mov);
        }
    }
    groups.grow(f.insts.len());
    groups
}

fn allocate(f: &Function, mut groups: Groups) -> Allocation {
    let live = LiveIntervals::compute(f);

    // group leader -> (members, merged interval)
    let mut merged: FxHashMap<InstId, (Vec<InstId>, Interval)> = FxHashMap::default();
    for id in f.inst_ids().filter(|&i| f.inst(i).op.has_value()) {
        let leader = groups.find(id);
        let entry = merged.entry(leader).or_default();
        entry.0.push(id);
        entry.1.union(live.interval(id));
    }
    let mut work: Vec<(InstId, Vec<InstId>, Interval)> =
        merged.into_iter().map(|(leader, (members, iv))| (leader, members, iv)).collect();
    work.sort_by_key(|(leader, _, iv)| (iv.start().unwrap_or(u32::MAX), leader.0));

    let mut allocation = Allocation::default();
    let mut occupied: Vec<Interval> = Vec::new();
    for (_, members, interval) in work {
        let hint = members.iter().find_map(|&m| {
            let inst = f.inst(m);
            match (inst.op, inst.operands.first()) {
                (Opcode::Mov, Some(Value::Inst(src))) => allocation.get(*src),
                _ => None,
            }
        });
        let fits = |r: u32, occupied: &[Interval]| occupied.get(r as usize).is_none_or(|o| !o.overlaps(&interval));
        let reg = match hint {
            Some(r) if fits(r, &occupied) => r,
            _ => (0..).find(|&r| fits(r, &occupied)).unwrap_or(0),
        };
        if occupied.len() <= reg as usize {
            occupied.resize(reg as usize + 1, Interval::default());
        }
        occupied[reg as usize].union(&interval);
        for m in members {
            allocation.set(m, reg);
        }
    }
    allocation
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::opt::test_util::{config, lower};
    use crate::opt::{LoadConstants, LowerArgumentsArray, Mem2Reg, run_passes};

    /// Lowers `source` through register allocation.
    pub fn allocate_source(source: &str) -> Module {
        let mut module = lower(source);
        run_passes(
            &[&Mem2Reg as &dyn Pass, &LowerArgumentsArray, &LoadConstants, &RegisterAllocation],
            &mut module,
            &config(),
            None,
        )
        .unwrap();
        module
    }

    /// Registers of two values that are live at the same time differ.
    pub fn assert_disjoint(f: &Function) {
        let live = LiveIntervals::compute(f);
        let alloc = f.allocation.as_ref().unwrap();
        let values: Vec<InstId> = f.inst_ids().filter(|&i| f.inst(i).op.has_value()).collect();
        for (i, &a) in values.iter().enumerate() {
            for &b in &values[i + 1..] {
                if alloc.get(a) == alloc.get(b) {
                    assert!(
                        !live.interval(a).overlaps(live.interval(b)),
                        "%{} and %{} share r{:?}",
                        a.0,
                        b.0,
                        alloc.get(a)
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::test_util::*;

    #[test]
    fn test_every_value_gets_a_register() {
        let module = allocate_source("function f(a, b) { return a * b + a; }");
        let f = function(&module, "f");
        let alloc = f.allocation.as_ref().unwrap();
        for id in f.inst_ids().filter(|&i| f.inst(i).op.has_value()) {
            assert!(alloc.get(id).is_some());
        }
        assert!(alloc.frame_size >= 2);
        assert_disjoint(f);
    }

    #[test]
    fn test_phis_share_register_with_their_moves() {
        let module = allocate_source("function f(n) { var s = 0; for (var i = 0; i < n; i++) { s = s + i; } return s; }");
        verify_module(&module).unwrap();
        let f = function(&module, "f");
        let alloc = f.allocation.as_ref().unwrap();
        let phis: Vec<InstId> = f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Phi).collect();
        assert_eq!(phis.len(), 2);
        for phi in phis {
            for (v, pred) in f.inst(phi).phi_entries() {
                let mov = v.as_inst().unwrap();
                assert_eq!(f.inst(mov).op, Opcode::Mov);
                assert_eq!(f.inst(mov).block, pred);
                assert_eq!(alloc.get(mov), alloc.get(phi));
            }
        }
        assert_disjoint(f);
    }

    #[test]
    fn test_swapping_loop_variables() {
        let module = allocate_source(
            "function f(n) { var a = 1, b = 2; for (var i = 0; i < n; i++) { var t = a; a = b; b = t; } return a - b; }",
        );
        verify_module(&module).unwrap();
        assert_disjoint(function(&module, "f"));
    }

    #[test]
    fn test_allocation_is_not_redone() {
        let mut module = allocate_source("function f(a) { return a + 1; }");
        let before = module.clone();
        RegisterAllocation.run(&mut module, &config()).unwrap();
        assert_eq!(before, module);
    }

    #[test]
    fn test_register_limit_is_enforced() {
        let mut module = lower("function f(a, b, c, d, e, g, h, i, j) { return a + b + c + d + e + g + h + i + j; }");
        let config = CompilerConfig {
            max_registers: 8,
            ..config()
        };
        let err = RegisterAllocation.run(&mut module, &config).unwrap_err();
        assert!(matches!(err, Error::ResourceLimit { ref function, .. } if function == "f"));
    }
}
