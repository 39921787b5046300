//! CFG construction and liveness analysis over selected MIR (spec §4.7).
//! Blocks are delimited by `Label` pseudo-ops; an instruction falls through
//! to the next block unless it is a terminator, matching how `select.rs`
//! never emits an explicit `B` out of a block that simply continues into
//! the next label.

use super::mir::{MInst, Opcode, VReg};
use rustc_hash::{FxHashMap, FxHashSet};

pub struct Cfg {
    /// Instruction index ranges `[start, end)` per block, in emission order.
    pub blocks: Vec<(String, usize, usize)>,
    pub successors: FxHashMap<usize, Vec<usize>>,
}

pub fn build_cfg(insts: &[MInst]) -> Cfg {
    let mut blocks: Vec<(String, usize, usize)> = Vec::new();
    let mut label_of = FxHashMap::default();

    let mut i = 0;
    while i < insts.len() {
        if insts[i].opcode == Opcode::Label {
            let start = i;
            let mut end = insts.len();
            for j in (i + 1)..insts.len() {
                if insts[j].opcode == Opcode::Label {
                    end = j;
                    break;
                }
            }
            let name = label_name(&insts[i]);
            label_of.insert(name.clone(), blocks.len());
            blocks.push((name, start, end));
            i = end;
        } else {
            i += 1;
        }
    }

    let mut successors: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for (idx, &(_, start, end)) in blocks.iter().enumerate() {
        let mut succ = Vec::new();
        let mut falls_through = true;
        for inst in &insts[start..end] {
            if let Some(target) = inst.label_target() {
                if let Some(&t) = label_of.get(target) {
                    succ.push(t);
                }
            }
            if inst.opcode == Opcode::B || inst.opcode == Opcode::Bx {
                falls_through = false;
            }
        }
        if falls_through && idx + 1 < blocks.len() {
            succ.push(idx + 1);
        }
        successors.insert(idx, succ);
    }

    Cfg { blocks, successors }
}

fn label_name(inst: &MInst) -> String {
    match &inst.dest {
        Some(super::mir::Operand::Label(l)) => l.clone(),
        _ => panic!("Label instruction missing its name operand"),
    }
}

/// `(var_kill, ue_var)` per block, per spec §4.7: `ue_var` is everything read
/// before any same-block redefinition; `var_kill` is everything the block
/// ever defines.
fn local_sets(insts: &[MInst], start: usize, end: usize) -> (FxHashSet<VReg>, FxHashSet<VReg>) {
    let mut var_kill = FxHashSet::default();
    let mut ue_var = FxHashSet::default();
    for inst in &insts[start..end] {
        for u in inst.uses() {
            if !var_kill.contains(&u) {
                ue_var.insert(u);
            }
        }
        if let Some(d) = inst.def() {
            var_kill.insert(d);
        }
    }
    (var_kill, ue_var)
}

pub struct Liveness {
    pub live_out: Vec<FxHashSet<VReg>>,
}

/// Iterates `live_out(B) = U_{S in succ(B)} (ue_var(S) U (live_out(S) \ var_kill(S)))`
/// to a fixpoint.
pub fn compute_liveness(insts: &[MInst], cfg: &Cfg) -> Liveness {
    let n = cfg.blocks.len();
    let locals: Vec<(FxHashSet<VReg>, FxHashSet<VReg>)> =
        cfg.blocks.iter().map(|&(_, s, e)| local_sets(insts, s, e)).collect();
    let mut live_out: Vec<FxHashSet<VReg>> = vec![FxHashSet::default(); n];

    let order = reverse_postorder(cfg);
    loop {
        let mut changed = false;
        for &b in &order {
            let mut new_live_out = FxHashSet::default();
            for &s in cfg.successors.get(&b).into_iter().flatten() {
                let (var_kill, ue_var) = &locals[s];
                for &v in ue_var {
                    new_live_out.insert(v);
                }
                for &v in &live_out[s] {
                    if !var_kill.contains(&v) {
                        new_live_out.insert(v);
                    }
                }
            }
            if new_live_out != live_out[b] {
                live_out[b] = new_live_out;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    Liveness { live_out }
}

fn reverse_postorder(cfg: &Cfg) -> Vec<usize> {
    let n = cfg.blocks.len();
    let mut visited = vec![false; n];
    let mut post = Vec::with_capacity(n);
    fn visit(b: usize, cfg: &Cfg, visited: &mut Vec<bool>, post: &mut Vec<usize>) {
        if visited[b] {
            return;
        }
        visited[b] = true;
        for &s in cfg.successors.get(&b).into_iter().flatten() {
            visit(s, cfg, visited, post);
        }
        post.push(b);
    }
    for b in 0..n {
        visit(b, cfg, &mut visited, &mut post);
    }
    post.reverse();
    post
}

/// A live interval as the conservative superset of a vreg's live range:
/// the span from its first definition or use to its last, in overall
/// instruction index, not narrowed by any intervening gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub vreg: VReg,
    pub start: usize,
    pub end: usize,
}

pub fn compute_intervals(insts: &[MInst], cfg: &Cfg, liveness: &Liveness) -> Vec<LiveInterval> {
    let mut bounds: FxHashMap<VReg, (usize, usize)> = FxHashMap::default();
    let mut touch = |v: VReg, pos: usize, bounds: &mut FxHashMap<VReg, (usize, usize)>| {
        let entry = bounds.entry(v).or_insert((pos, pos));
        entry.0 = entry.0.min(pos);
        entry.1 = entry.1.max(pos);
    };

    for (i, inst) in insts.iter().enumerate() {
        for u in inst.uses() {
            touch(u, i, &mut bounds);
        }
        if let Some(d) = inst.def() {
            touch(d, i, &mut bounds);
        }
    }

    // A vreg live out of a block is live across the block's whole span, even
    // if the block itself neither uses nor defines it at a later index.
    for (b, &(_, start, end)) in cfg.blocks.iter().enumerate() {
        for &v in &liveness.live_out[b] {
            touch(v, start, &mut bounds);
            touch(v, end.saturating_sub(1).max(start), &mut bounds);
        }
    }

    let mut intervals: Vec<LiveInterval> = bounds.into_iter().map(|(vreg, (start, end))| LiveInterval { vreg, start, end }).collect();
    intervals.sort_by_key(|iv| iv.start);
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::mir::Operand;

    fn label(name: &str) -> MInst {
        MInst::new(Opcode::Label, Some(Operand::Label(name.to_string())), vec![])
    }

    #[test]
    fn builds_fallthrough_and_branch_edges() {
        let insts = vec![
            label("entry"),
            MInst::new(Opcode::Cmp, None, vec![Operand::Virtual(VReg(0)), Operand::Imm(0)]),
            MInst::new(Opcode::Bcond, Some(Operand::Label("then".into())), vec![]),
            MInst::new(Opcode::B, Some(Operand::Label("else".into())), vec![]),
            label("then"),
            MInst::new(Opcode::B, Some(Operand::Label("merge".into())), vec![]),
            label("else"),
            MInst::new(Opcode::B, Some(Operand::Label("merge".into())), vec![]),
            label("merge"),
        ];
        let cfg = build_cfg(&insts);
        assert_eq!(cfg.blocks.len(), 4);
        assert_eq!(cfg.successors[&0].len(), 2);
    }

    #[test]
    fn loop_back_edge_keeps_counter_live_across_body() {
        // entry: mov r(0)=0 ; loop: cmp r0,10; bcond exit; add r0,r0,1; b loop; exit: mov r0 -> ret
        let v0 = VReg(0);
        let insts = vec![
            label("entry"),
            MInst::new(Opcode::Mov, Some(Operand::Virtual(v0)), vec![Operand::Imm(0)]),
            label("loop"),
            MInst::new(Opcode::Cmp, None, vec![Operand::Virtual(v0), Operand::Imm(10)]),
            MInst::new(Opcode::Bcond, Some(Operand::Label("exit".into())), vec![]),
            MInst::new(Opcode::Add, Some(Operand::Virtual(v0)), vec![Operand::Virtual(v0), Operand::Imm(1)]),
            MInst::new(Opcode::B, Some(Operand::Label("loop".into())), vec![]),
            label("exit"),
            MInst::new(Opcode::Mov, Some(Operand::Physical(super::super::mir::PhysReg(0))), vec![Operand::Virtual(v0)]),
        ];
        let cfg = build_cfg(&insts);
        let liveness = compute_liveness(&insts, &cfg);
        let loop_block = cfg.blocks.iter().position(|b| b.0 == "loop").unwrap();
        assert!(liveness.live_out[loop_block].contains(&v0));
    }
}
