//! Linear-scan register allocation (spec §4.8): the textbook three-step
//! algorithm over live intervals sorted by ascending start, with an active
//! list kept sorted by ascending end.

use super::cfg::LiveInterval;
use super::mir::{PhysReg, VReg};
use crate::common::error::CompileError;
use rustc_hash::FxHashMap;

/// r4-r10: seven callee-saved registers left over once r0-r3 are reserved
/// for argument/return/scratch use and r11 is the frame pointer.
pub const ALLOCATABLE: [PhysReg; 7] = [PhysReg(4), PhysReg(5), PhysReg(6), PhysReg(7), PhysReg(8), PhysReg(9), PhysReg(10)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Register(PhysReg),
    /// Byte offset below the frame pointer.
    Spill(u32),
}

pub struct AllocationResult {
    pub assignments: FxHashMap<VReg, Assignment>,
    pub callee_saved_used: Vec<PhysReg>,
    pub spill_slots: u32,
}

struct Active {
    interval: LiveInterval,
    reg: PhysReg,
}

pub fn allocate(mut intervals: Vec<LiveInterval>) -> Result<AllocationResult, CompileError> {
    intervals.sort_by_key(|iv| iv.start);

    let mut free: Vec<PhysReg> = ALLOCATABLE.to_vec();
    free.reverse(); // pop() takes the lowest-numbered register first
    let mut active: Vec<Active> = Vec::new();
    let mut assignments: FxHashMap<VReg, Assignment> = FxHashMap::default();
    let mut callee_saved_used: Vec<PhysReg> = Vec::new();
    let mut next_spill_slot: u32 = 0;

    for interval in intervals {
        expire_old_intervals(&mut active, &mut free, interval.start);

        if let Some(reg) = free.pop() {
            assignments.insert(interval.vreg, Assignment::Register(reg));
            if !callee_saved_used.contains(&reg) {
                callee_saved_used.push(reg);
            }
            active.push(Active { interval, reg });
            active.sort_by_key(|a| a.interval.end);
            continue;
        }

        // No free register: spill whichever active interval ends latest if
        // it ends later than this one (reusing its register here is a net
        // win), otherwise spill the new interval itself.
        match active.last() {
            Some(longest) if longest.interval.end > interval.end => {
                let reg = longest.reg;
                let spilled_vreg = longest.interval.vreg;
                active.pop();
                assignments.insert(spilled_vreg, Assignment::Spill(next_spill_slot));
                next_spill_slot += 4;
                assignments.insert(interval.vreg, Assignment::Register(reg));
                active.push(Active { interval, reg });
                active.sort_by_key(|a| a.interval.end);
            }
            _ => {
                assignments.insert(interval.vreg, Assignment::Spill(next_spill_slot));
                next_spill_slot += 4;
            }
        }
    }

    Ok(AllocationResult { assignments, callee_saved_used, spill_slots: next_spill_slot })
}

fn expire_old_intervals(active: &mut Vec<Active>, free: &mut Vec<PhysReg>, start: usize) {
    let mut i = 0;
    while i < active.len() {
        if active[i].interval.end < start {
            let reg = active[i].reg;
            active.remove(i);
            free.push(reg);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(v: u32, start: usize, end: usize) -> LiveInterval {
        LiveInterval { vreg: VReg(v), start, end }
    }

    #[test]
    fn assigns_distinct_registers_to_disjoint_intervals() {
        let result = allocate(vec![iv(0, 0, 2), iv(1, 3, 5)]).unwrap();
        assert_ne!(result.assignments[&VReg(0)], result.assignments[&VReg(1)]);
        match result.assignments[&VReg(0)] {
            Assignment::Register(_) => {}
            _ => panic!("expected a register"),
        }
    }

    #[test]
    fn spills_under_register_pressure() {
        // 8 simultaneously live vregs, only 7 allocatable registers.
        let intervals: Vec<LiveInterval> = (0..8).map(|i| iv(i, 0, 100)).collect();
        let result = allocate(intervals).unwrap();
        let spilled = result.assignments.values().filter(|a| matches!(a, Assignment::Spill(_))).count();
        assert_eq!(spilled, 1);
    }

    #[test]
    fn reuses_register_from_expired_interval() {
        let result = allocate(vec![iv(0, 0, 1), iv(1, 2, 3)]).unwrap();
        assert_eq!(result.assignments[&VReg(0)], result.assignments[&VReg(1)]);
    }
}
