//! Generic block-level dataflow framework with a worklist fixpoint solver
//!
//! Simpler than [`super::ForwardAnalysis`]: one fact per block boundary, no conditional
//! or exceptional stores. Used for auxiliary analyses such as liveness.

use super::cfg::{BasicBlock, BlockId, Cfg};
use std::collections::{HashMap, HashSet, VecDeque};

/// Direction of dataflow analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataflowDirection {
    Forward,
    Backward,
}

/// Generic trait for dataflow analyses
pub trait DataflowAnalysis {
    /// The type of facts being propagated
    type Fact: Clone + PartialEq;

    /// Direction of the analysis
    fn direction(&self) -> DataflowDirection;

    /// Initial fact for entry (forward) or exit (backward) block
    fn initial_fact(&self) -> Self::Fact;

    /// Bottom element for the lattice
    fn bottom(&self) -> Self::Fact;

    /// Join/merge facts from multiple predecessors
    fn join(&self, facts: &[Self::Fact]) -> Self::Fact;

    /// Transfer function: compute output fact from input fact for a block
    fn transfer(&self, cfg: &Cfg, block: &BasicBlock, input: &Self::Fact) -> Self::Fact;
}

/// Result of fixpoint computation
#[derive(Debug)]
pub struct FixpointResult<F> {
    /// Facts at entry of each block
    pub in_facts: HashMap<BlockId, F>,
    /// Facts at exit of each block
    pub out_facts: HashMap<BlockId, F>,
    /// Number of block visits until the fixpoint
    pub iterations: usize,
}

/// Worklist-based fixpoint solver
pub struct FixpointSolver;

impl FixpointSolver {
    /// Compute the fixpoint of `analysis` over `cfg`. Terminates for monotone transfer
    /// functions over finite-height facts.
    ///
    /// Blocks are seeded in reverse postorder for forward analyses and postorder for
    /// backward ones.
    pub fn solve<A: DataflowAnalysis>(analysis: &A, cfg: &Cfg) -> FixpointResult<A::Fact> {
        let forward = analysis.direction() == DataflowDirection::Forward;
        let (boundary, order) = if forward {
            (cfg.entry, cfg.reverse_postorder())
        } else {
            (cfg.exit, cfg.postorder())
        };

        // `before` holds what flows into a block's transfer, `after` what it produces
        let mut before: HashMap<BlockId, A::Fact> = cfg.blocks.iter().map(|b| (b.id, analysis.bottom())).collect();
        let mut after = before.clone();
        let mut worklist: VecDeque<BlockId> = order.into_iter().collect();
        let mut queued: HashSet<BlockId> = worklist.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut iterations = 0;

        while let Some(id) = worklist.pop_front() {
            queued.remove(&id);
            iterations += 1;
            let Some(block) = cfg.block(id) else {
                continue;
            };
            let (upstream, downstream) = if forward {
                (&block.predecessors, &block.successors)
            } else {
                (&block.successors, &block.predecessors)
            };

            let incoming: Vec<A::Fact> = upstream.iter().filter_map(|b| after.get(b).cloned()).collect();
            let input = if id == boundary {
                analysis.initial_fact()
            } else if incoming.is_empty() {
                analysis.bottom()
            } else {
                analysis.join(&incoming)
            };
            let output = analysis.transfer(cfg, block, &input);

            // The first visit always propagates, even when the output equals bottom
            let first = visited.insert(id);
            let changed = after.get(&id) != Some(&output);
            before.insert(id, input);
            if changed || first {
                after.insert(id, output);
                for &next in downstream {
                    if queued.insert(next) {
                        worklist.push_back(next);
                    }
                }
            }
        }

        let (in_facts, out_facts) = if forward { (before, after) } else { (after, before) };
        FixpointResult {
            in_facts,
            out_facts,
            iterations,
        }
    }
}
