//! Loop back-edge analysis.
//!
//! The termination checker keys its per-loop bookkeeping on stable loop
//! identities. A back edge is a CFG edge whose target is on the current DFS
//! stack; its target is the loop head. Loop ids are assigned in DFS order,
//! so they are deterministic for a given program.

use indexmap::IndexMap;

use crate::program::{BlockId, FunId, Program};

/// Stable identity of a loop (one per loop head per function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(pub u32);

/// Back edges and loop heads for every function of a program.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    /// Loop id per head block.
    heads: IndexMap<(FunId, BlockId), LoopId>,
    /// Loop id per back edge `(fun, from, to)`.
    back_edges: IndexMap<(FunId, BlockId, BlockId), LoopId>,
}

impl LoopInfo {
    /// The loop id of a back edge, or `None` for forward edges.
    pub fn back_edge(&self, fun: FunId, from: BlockId, to: BlockId) -> Option<LoopId> {
        self.back_edges.get(&(fun, from, to)).copied()
    }

    /// The loop id of a loop-head block.
    pub fn head(&self, fun: FunId, block: BlockId) -> Option<LoopId> {
        self.heads.get(&(fun, block)).copied()
    }

    pub fn loop_count(&self) -> usize {
        self.heads.len()
    }
}

/// Compute back edges for every function by iterative DFS from each entry
/// block. Unreachable blocks are ignored.
pub fn analyze_loops(program: &Program) -> LoopInfo {
    let mut info = LoopInfo::default();
    let mut next = 0u32;

    for (fi, fun) in program.functions.iter().enumerate() {
        let fid = FunId(fi as u32);
        let n = fun.blocks.len();
        if n == 0 {
            continue;
        }

        // 0 = unvisited, 1 = on stack, 2 = done
        let mut mark = vec![0u8; n];
        // (block, successor cursor)
        let mut stack: Vec<(usize, Vec<BlockId>)> = Vec::new();

        let succs = |b: usize| fun.blocks[b].term.successors().collect::<Vec<_>>();
        mark[0] = 1;
        stack.push((0, succs(0)));

        while let Some((block, rest)) = stack.last_mut() {
            let Some(succ) = rest.pop() else {
                mark[*block] = 2;
                stack.pop();
                continue;
            };
            let from = BlockId(*block as u32);
            let tgt = succ.0 as usize;
            match mark[tgt] {
                1 => {
                    // Back edge: the target is an active ancestor.
                    let loop_id = *info
                        .heads
                        .entry((fid, succ))
                        .or_insert_with(|| {
                            let id = LoopId(next);
                            next += 1;
                            id
                        });
                    info.back_edges.insert((fid, from, succ), loop_id);
                }
                0 => {
                    mark[tgt] = 1;
                    stack.push((tgt, succs(tgt)));
                }
                _ => {}
            }
        }
    }

    info
}
