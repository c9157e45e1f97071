//! Liveness analysis and live intervals.
//!
//! Instructions are numbered in allocation order. Instruction `k` reads
//! its operands at point `2k` and writes its result at `2k + 1`, so a
//! value whose last use is `k` does not overlap the result of `k`.
//! Phi operands are live out of the matching predecessor, and every
//! block of a protected region keeps its handler's live-in values alive.

use rustc_hash::FxHashMap;

use crate::ir::analysis::{innermost_handlers, reverse_postorder};
use crate::ir::{BlockId, Function, InstId, Opcode, Value};

/// Fixed-size set of instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn insert(&mut self, i: usize) {
        self.words[i / 64] |= 1 << (i % 64);
    }

    pub fn remove(&mut self, i: usize) {
        self.words[i / 64] &= !(1 << (i % 64));
    }

    pub fn contains(&self, i: usize) -> bool {
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    /// Adds every element of `other`. Returns true when the set grew.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let merged = *a | *b;
            changed |= merged != *a;
            *a = merged;
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64).filter(move |b| bits & (1 << b) != 0).map(move |b| w * 64 + b)
        })
    }
}

/// Half-open range of program points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
}

impl Segment {
    pub fn intersects(self, other: Segment) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Sorted, non-overlapping segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interval {
    segments: Vec<Segment>,
}

impl Interval {
    pub fn add(&mut self, seg: Segment) {
        if seg.start >= seg.end {
            return;
        }
        let pos = self.segments.partition_point(|s| s.start < seg.start);
        self.segments.insert(pos, seg);
        let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for s in self.segments.drain(..) {
            match merged.last_mut() {
                Some(last) if s.start <= last.end => last.end = last.end.max(s.end),
                _ => merged.push(s),
            }
        }
        self.segments = merged;
    }

    pub fn union(&mut self, other: &Interval) {
        for &s in &other.segments {
            self.add(s);
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.segments.len() && j < other.segments.len() {
            let (a, b) = (self.segments[i], other.segments[j]);
            if a.intersects(b) {
                return true;
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }

    pub fn start(&self) -> Option<u32> {
        self.segments.first().map(|s| s.start)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Live intervals of every valued instruction of a function.
#[derive(Debug, Clone)]
pub struct LiveIntervals {
    /// Blocks in numbering order: reachable blocks in reverse postorder,
    /// then the rest in layout order.
    pub order: Vec<BlockId>,
    /// Position of each instruction in the numbering, indexed by [`InstId`].
    pub numbers: Vec<Option<u32>>,
    /// Indexed by [`InstId`]; empty for valueless or erased instructions.
    pub intervals: Vec<Interval>,
    pub live_in: Vec<BitSet>,
    pub live_out: Vec<BitSet>,
}

impl LiveIntervals {
    pub fn compute(f: &Function) -> Self {
        let order = block_order(f);
        let n = f.insts.len();
        let mut numbers = vec![None; n];
        let mut k = 0u32;
        for &b in &order {
            for &id in &f.block(b).insts {
                numbers[id.index()] = Some(k);
                k += 1;
            }
        }

        let (live_in, live_out) = solve(f, &order);

        let mut intervals = vec![Interval::default(); n];
        let point = |id: InstId| numbers[id.index()].unwrap_or(0);
        for &b in &order {
            let insts = &f.block(b).insts;
            let (Some(&first), Some(&last)) = (insts.first(), insts.last()) else {
                continue;
            };
            let block_start = 2 * point(first);
            let block_end = 2 * point(last) + 2;
            let (ins, outs) = (&live_in[b.index()], &live_out[b.index()]);

            // value -> (start, end) of its range inside this block
            let mut local: FxHashMap<usize, (u32, u32)> = FxHashMap::default();
            for v in ins.iter() {
                local.insert(v, (block_start, block_start + 1));
            }
            for &id in insts {
                let inst = f.inst(id);
                let at = 2 * point(id);
                if inst.op != Opcode::Phi {
                    for op in &inst.operands {
                        if let Value::Inst(def) = op {
                            if let Some(range) = local.get_mut(&def.index()) {
                                range.1 = range.1.max(at + 1);
                            }
                        }
                    }
                }
                if inst.op.has_value() {
                    local.insert(id.index(), (at + 1, at + 2));
                }
            }
            for (v, (start, end)) in local {
                let end = if outs.contains(v) { block_end } else { end };
                intervals[v].add(Segment { start, end });
            }
        }

        Self {
            order,
            numbers,
            intervals,
            live_in,
            live_out,
        }
    }

    pub fn interval(&self, id: InstId) -> &Interval {
        &self.intervals[id.index()]
    }
}

fn block_order(f: &Function) -> Vec<BlockId> {
    let mut order = reverse_postorder(f);
    let mut seen = vec![false; f.blocks.len()];
    for b in &order {
        seen[b.index()] = true;
    }
    order.extend(f.block_ids().filter(|b| !seen[b.index()]));
    order
}

/// Backward dataflow over all blocks. Returns (live-in, live-out).
fn solve(f: &Function, order: &[BlockId]) -> (Vec<BitSet>, Vec<BitSet>) {
    let n = f.insts.len();
    let nb = f.blocks.len();
    let handlers = innermost_handlers(f);
    let mut gen_set = vec![BitSet::new(n); nb];
    let mut kill = vec![BitSet::new(n); nb];
    // Phi operands flowing out of each block.
    let mut phi_uses = vec![BitSet::new(n); nb];

    for &b in order {
        for &id in &f.block(b).insts {
            let inst = f.inst(id);
            if inst.op == Opcode::Phi {
                for (v, pred) in inst.phi_entries() {
                    if let Value::Inst(def) = v {
                        phi_uses[pred.index()].insert(def.index());
                    }
                }
            } else {
                for op in &inst.operands {
                    if let Value::Inst(def) = op {
                        if !kill[b.index()].contains(def.index()) {
                            gen_set[b.index()].insert(def.index());
                        }
                    }
                }
            }
            if inst.op.has_value() {
                kill[b.index()].insert(id.index());
            }
        }
    }

    let mut live_in = vec![BitSet::new(n); nb];
    let mut live_out = vec![BitSet::new(n); nb];
    let mut changed = true;
    while changed {
        changed = false;
        for &b in order.iter().rev() {
            let mut out = phi_uses[b.index()].clone();
            for s in f.successors(b) {
                out.union_with(&live_in[s.index()]);
            }
            if let Some(h) = handlers[b.index()] {
                out.union_with(&live_in[h.index()]);
            }
            let mut inn = out.clone();
            for v in kill[b.index()].iter() {
                inn.remove(v);
            }
            inn.union_with(&gen_set[b.index()]);
            changed |= live_out[b.index()].union_with(&out);
            changed |= live_in[b.index()].union_with(&inn);
        }
    }
    (live_in, live_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, FunctionKind, InsertPoint};

    #[test]
    fn test_interval_merging() {
        let mut iv = Interval::default();
        iv.add(Segment { start: 4, end: 6 });
        iv.add(Segment { start: 1, end: 3 });
        iv.add(Segment { start: 3, end: 4 });
        assert_eq!(iv.segments(), &[Segment { start: 1, end: 6 }]);

        let mut other = Interval::default();
        other.add(Segment { start: 6, end: 8 });
        assert!(!iv.overlaps(&other));
        other.add(Segment { start: 0, end: 2 });
        assert!(iv.overlaps(&other));
    }

    #[test]
    fn test_bitset() {
        let mut a = BitSet::new(130);
        a.insert(3);
        a.insert(129);
        let mut b = BitSet::new(130);
        assert!(b.union_with(&a));
        assert!(!b.union_with(&a));
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![3, 129]);
        b.remove(3);
        assert!(!b.contains(3));
    }

    #[test]
    fn test_loop_keeps_value_alive() {
        // entry: a; br header. header: cond(a) body|exit. body: br header. exit: ret a
        let mut f = Function::new(FunctionId(0), "f", vec![], None, FunctionKind::Normal, true);
        let entry = BlockId(0);
        let (header, body, exit) = (f.add_block(), f.add_block(), f.add_block());
        let a = f.insert(InsertPoint::End(entry), Opcode::LoadParam, vec![Value::Param(1)]);
        f.insert(InsertPoint::End(entry), Opcode::Branch, vec![Value::Block(header)]);
        f.insert(
            InsertPoint::End(header),
            Opcode::CondBranch,
            vec![Value::Inst(a), Value::Block(body), Value::Block(exit)],
        );
        let t = f.insert(InsertPoint::End(body), Opcode::UnaryTypeof, vec![Value::Inst(a)]);
        f.insert(InsertPoint::End(body), Opcode::Branch, vec![Value::Block(header)]);
        f.insert(InsertPoint::End(exit), Opcode::Return, vec![Value::Inst(a)]);

        let live = LiveIntervals::compute(&f);
        assert!(live.live_in[body.index()].contains(a.index()));
        assert!(live.live_out[body.index()].contains(a.index()));
        assert!(live.interval(a).overlaps(live.interval(t)));
        // the unused typeof still occupies its definition point
        assert_eq!(live.interval(t).segments().len(), 1);
    }
}
