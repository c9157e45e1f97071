//! CFG analyses: orderings, dominators, frontiers, loops and try regions.
//!
//! All results are computed from the current terminators and must be
//! recomputed after a pass edits the CFG.

use super::function::Function;
use super::instr::{BlockId, InstId, Opcode};

/// Blocks reachable from the entry in reverse postorder.
pub fn reverse_postorder(f: &Function) -> Vec<BlockId> {
    let mut visited = vec![false; f.blocks.len()];
    let mut post = Vec::with_capacity(f.blocks.len());
    // (block, next successor index)
    let mut stack = vec![(f.entry(), 0usize)];
    visited[f.entry().index()] = true;
    while let Some((b, i)) = stack.pop() {
        let succs = f.successors(b);
        if i < succs.len() {
            stack.push((b, i + 1));
            let s = succs[i];
            if !visited[s.index()] {
                visited[s.index()] = true;
                stack.push((s, 0));
            }
        } else {
            post.push(b);
        }
    }
    post.reverse();
    post
}

/// Reachability flags indexed by block.
pub fn reachable(f: &Function) -> Vec<bool> {
    let mut flags = vec![false; f.blocks.len()];
    for b in reverse_postorder(f) {
        flags[b.index()] = true;
    }
    flags
}

/// Immediate dominators of the reachable blocks.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: Vec<Option<BlockId>>,
    order: Vec<usize>,
    children: Vec<Vec<BlockId>>,
    rpo: Vec<BlockId>,
}

impl DominatorTree {
    /// Iterative algorithm of Cooper, Harvey and Kennedy.
    pub fn compute(f: &Function) -> Self {
        let rpo = reverse_postorder(f);
        let n = f.blocks.len();
        let mut order = vec![usize::MAX; n];
        for (i, b) in rpo.iter().enumerate() {
            order[b.index()] = i;
        }
        let preds = f.predecessors();
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        let entry = f.entry();
        idom[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &preds[b.index()] {
                    if idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &order, p, cur),
                    });
                }
                if new_idom.is_some() && idom[b.index()] != new_idom {
                    idom[b.index()] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for &b in rpo.iter().skip(1) {
            if let Some(d) = idom[b.index()] {
                children[d.index()].push(b);
            }
        }
        Self {
            idom,
            order,
            children,
            rpo,
        }
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom[b.index()].filter(|&d| d != b)
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.idom[b.index()].is_some()
    }

    /// True when `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }

    pub fn children(&self, b: BlockId) -> &[BlockId] {
        &self.children[b.index()]
    }

    /// Reachable blocks in reverse postorder.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Dominator tree in preorder, children in reverse postorder.
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(self.rpo.len());
        let Some(&root) = self.rpo.first() else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(b) = stack.pop() {
            out.push(b);
            let mut kids = self.children[b.index()].clone();
            kids.sort_by_key(|k| std::cmp::Reverse(self.order[k.index()]));
            stack.extend(kids);
        }
        out
    }

    /// Dominance frontier of every block.
    pub fn frontiers(&self, f: &Function) -> Vec<Vec<BlockId>> {
        let preds = f.predecessors();
        let mut df = vec![Vec::new(); f.blocks.len()];
        for &b in &self.rpo {
            let reachable_preds: Vec<BlockId> = preds[b.index()]
                .iter()
                .copied()
                .filter(|p| self.is_reachable(*p))
                .collect();
            if reachable_preds.len() < 2 {
                continue;
            }
            let Some(stop) = self.idom(b) else { continue };
            for p in reachable_preds {
                let mut runner = p;
                while runner != stop {
                    let list: &mut Vec<BlockId> = &mut df[runner.index()];
                    if !list.contains(&b) {
                        list.push(b);
                    }
                    match self.idom(runner) {
                        Some(d) => runner = d,
                        None => break,
                    }
                }
            }
        }
        df
    }

    /// True when the definition `def` is available at `user`.
    pub fn inst_dominates(&self, f: &Function, def: InstId, user: InstId) -> bool {
        let (db, ub) = (f.inst(def).block, f.inst(user).block);
        if db == ub {
            return f.index_in_block(def) < f.index_in_block(user);
        }
        self.dominates(db, ub)
    }
}

fn intersect(idom: &[Option<BlockId>], order: &[usize], a: BlockId, b: BlockId) -> BlockId {
    let (mut x, mut y) = (a, b);
    while x != y {
        while order[x.index()] > order[y.index()] {
            x = idom[x.index()].unwrap_or(x);
        }
        while order[y.index()] > order[x.index()] {
            y = idom[y.index()].unwrap_or(y);
        }
    }
    x
}

/// Loop nesting depth of every block, from natural loops of back edges.
pub fn loop_depths(f: &Function, dt: &DominatorTree) -> Vec<u32> {
    let preds = f.predecessors();
    let mut depth = vec![0u32; f.blocks.len()];
    for &header in dt.rpo() {
        let latches: Vec<BlockId> = preds[header.index()]
            .iter()
            .copied()
            .filter(|&p| dt.dominates(header, p))
            .collect();
        if latches.is_empty() {
            continue;
        }
        let mut body = vec![false; f.blocks.len()];
        body[header.index()] = true;
        let mut work = latches;
        while let Some(b) = work.pop() {
            if body[b.index()] {
                continue;
            }
            body[b.index()] = true;
            work.extend(
                preds[b.index()]
                    .iter()
                    .copied()
                    .filter(|&p| dt.is_reachable(p)),
            );
        }
        for (i, inside) in body.into_iter().enumerate() {
            if inside {
                depth[i] += 1;
            }
        }
    }
    depth
}

/// Blocks covered by one exception handler.
#[derive(Debug, Clone, PartialEq)]
pub struct TryRegion {
    pub handler: BlockId,
    pub blocks: Vec<BlockId>,
}

/// Protected regions of a function: every block reachable from a
/// `TryStart` body without leaving through the matching `TryEnd`.
pub fn try_regions(f: &Function) -> Vec<TryRegion> {
    let mut regions = Vec::new();
    for b in f.block_ids() {
        let Some(t) = f.terminator(b) else { continue };
        let inst = f.inst(t);
        if inst.op != Opcode::TryStart {
            continue;
        }
        let (Some(handler), Some(body)) = (
            inst.operands.first().and_then(|v| v.as_block()),
            inst.operands.get(1).and_then(|v| v.as_block()),
        ) else {
            continue;
        };
        let mut seen = vec![false; f.blocks.len()];
        let mut blocks = Vec::new();
        let mut work = vec![body];
        while let Some(x) = work.pop() {
            if seen[x.index()] {
                continue;
            }
            seen[x.index()] = true;
            blocks.push(x);
            let leaves = f.terminator(x).is_some_and(|t| {
                let end = f.inst(t);
                end.op == Opcode::TryEnd && end.operands.first().and_then(|v| v.as_block()) == Some(handler)
            });
            if !leaves {
                work.extend(f.successors(x));
            }
        }
        blocks.sort();
        regions.push(TryRegion { handler, blocks });
    }
    regions
}

/// Innermost handler of every block, if it is inside a protected region.
pub fn innermost_handlers(f: &Function) -> Vec<Option<BlockId>> {
    let regions = try_regions(f);
    let mut best: Vec<Option<(usize, BlockId)>> = vec![None; f.blocks.len()];
    for r in &regions {
        for b in &r.blocks {
            let slot = &mut best[b.index()];
            if slot.is_none_or(|(size, _)| r.blocks.len() < size) {
                *slot = Some((r.blocks.len(), r.handler));
            }
        }
    }
    best.into_iter().map(|o| o.map(|(_, h)| h)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, FunctionKind, InsertPoint, Value};

    /// entry -> header; header -> body | exit; body -> header.
    fn simple_loop() -> Function {
        let mut f = Function::new(FunctionId(0), "loop", vec![], None, FunctionKind::Normal, true);
        let (header, body, exit) = (f.add_block(), f.add_block(), f.add_block());
        f.insert(InsertPoint::End(BlockId(0)), Opcode::Branch, vec![Value::Block(header)]);
        let c = f.insert(InsertPoint::End(header), Opcode::LoadParam, vec![Value::Param(1)]);
        f.insert(
            InsertPoint::End(header),
            Opcode::CondBranch,
            vec![Value::Inst(c), Value::Block(body), Value::Block(exit)],
        );
        f.insert(InsertPoint::End(body), Opcode::Branch, vec![Value::Block(header)]);
        f.insert(InsertPoint::End(exit), Opcode::Return, vec![Value::undefined()]);
        f
    }

    #[test]
    fn test_dominators() {
        let f = simple_loop();
        let dt = DominatorTree::compute(&f);
        assert_eq!(dt.idom(BlockId(2)), Some(BlockId(1)));
        assert_eq!(dt.idom(BlockId(3)), Some(BlockId(1)));
        assert!(dt.dominates(BlockId(0), BlockId(3)));
        assert!(!dt.dominates(BlockId(2), BlockId(3)));
        assert_eq!(dt.preorder()[0], BlockId(0));
    }

    #[test]
    fn test_frontiers_and_loops() {
        let f = simple_loop();
        let dt = DominatorTree::compute(&f);
        let df = dt.frontiers(&f);
        assert_eq!(df[2], vec![BlockId(1)]);
        assert_eq!(df[1], vec![BlockId(1)]);
        let depth = loop_depths(&f, &dt);
        assert_eq!(depth, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_unreachable_block_is_excluded() {
        let mut f = simple_loop();
        let dead = f.add_block();
        f.insert(InsertPoint::End(dead), Opcode::Branch, vec![Value::Block(BlockId(3))]);
        let dt = DominatorTree::compute(&f);
        assert!(!dt.is_reachable(dead));
        assert!(!reachable(&f)[dead.index()]);
    }

    #[test]
    fn test_try_region() {
        let mut f = Function::new(FunctionId(0), "t", vec![], None, FunctionKind::Normal, true);
        let (handler, body, next) = (f.add_block(), f.add_block(), f.add_block());
        f.insert(
            InsertPoint::End(BlockId(0)),
            Opcode::TryStart,
            vec![Value::Block(handler), Value::Block(body)],
        );
        let e = f.insert(InsertPoint::End(handler), Opcode::Catch, vec![]);
        f.insert(InsertPoint::End(handler), Opcode::Return, vec![Value::Inst(e)]);
        f.insert(
            InsertPoint::End(body),
            Opcode::TryEnd,
            vec![Value::Block(handler), Value::Block(next)],
        );
        f.insert(InsertPoint::End(next), Opcode::Return, vec![Value::undefined()]);
        let regions = try_regions(&f);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].blocks, vec![body]);
        let handlers = innermost_handlers(&f);
        assert_eq!(handlers[body.index()], Some(handler));
        assert_eq!(handlers[next.index()], None);
    }
}
