//! Backward live-variable analysis over the method CFG

use super::cfg::{BasicBlock, Cfg, NodeKind};
use super::solver::{DataflowAnalysis, DataflowDirection, FixpointResult, FixpointSolver};
use crate::hir::{Body, ExprKind};
use std::collections::BTreeSet;

/// Locals whose current value may still be read
pub type LiveSet = BTreeSet<String>;

pub struct LiveVariables<'a> {
    body: &'a Body,
}

impl<'a> LiveVariables<'a> {
    pub fn new(body: &'a Body) -> Self {
        Self { body }
    }

    /// Live sets at the start and end of every block
    pub fn compute(&self, cfg: &Cfg) -> FixpointResult<LiveSet> {
        FixpointSolver::solve(self, cfg)
    }

    fn kill_target(&self, live: &mut LiveSet, target: crate::hir::ExprId) {
        if let Some(ExprKind::Local(name)) = self.body.kind(self.body.skip_parens(target)) {
            live.remove(name);
        }
    }
}

impl DataflowAnalysis for LiveVariables<'_> {
    type Fact = LiveSet;

    fn direction(&self) -> DataflowDirection {
        DataflowDirection::Backward
    }

    fn initial_fact(&self) -> LiveSet {
        LiveSet::new()
    }

    fn bottom(&self) -> LiveSet {
        LiveSet::new()
    }

    fn join(&self, facts: &[LiveSet]) -> LiveSet {
        facts.iter().flatten().cloned().collect()
    }

    fn transfer(&self, cfg: &Cfg, block: &BasicBlock, input: &LiveSet) -> LiveSet {
        let mut live = input.clone();
        for node in block.nodes.iter().rev().filter_map(|id| cfg.node(*id)) {
            match &node.kind {
                NodeKind::Expr(id) => match self.body.kind(*id) {
                    Some(ExprKind::Local(name)) => {
                        live.insert(name.clone());
                    }
                    // Plain assignment: the target local is written, not read
                    Some(ExprKind::Assign { target, .. }) => self.kill_target(&mut live, *target),
                    _ => {}
                },
                NodeKind::LocalDecl { name, .. } | NodeKind::CatchParam { name, .. } => {
                    live.remove(name);
                }
                NodeKind::Return(_) | NodeKind::Throw(_) => {}
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::builder::CfgBuilder;
    use crate::hir::{BinaryOp, BodyBuilder, JavaType, Stmt};

    #[test]
    fn test_dead_after_last_use() {
        // int x = 1; int y = x + 1; return y;
        let mut b = BodyBuilder::new();
        let one = b.int(1);
        b.declare("x", JavaType::INT, Some(one));
        let x = b.local("x", JavaType::INT);
        let one2 = b.int(1);
        let sum = b.binary(BinaryOp::Add, x, one2);
        b.declare("y", JavaType::INT, Some(sum));
        let y = b.local("y", JavaType::INT);
        b.ret(Some(y));
        let body = b.finish();

        let cfg = CfgBuilder::build(&body).unwrap();
        let result = LiveVariables::new(&body).compute(&cfg);
        let first = cfg.block(cfg.entry).unwrap().successors[0];
        assert!(result.in_facts[&first].is_empty());
    }

    #[test]
    fn test_loop_keeps_variable_live() {
        // while (i < n) { i = i + 1; }
        let mut b = BodyBuilder::new();
        let i = b.local("i", JavaType::INT);
        let n = b.local("n", JavaType::INT);
        let cond = b.binary(BinaryOp::Lt, i, n);
        let i2 = b.local("i", JavaType::INT);
        let i3 = b.local("i", JavaType::INT);
        let one = b.int(1);
        let inc = b.binary(BinaryOp::Add, i3, one);
        let assign = b.assign(i2, inc);
        b.push(Stmt::While {
            cond,
            body: vec![Stmt::Expr(assign)],
        });
        let body = b.finish();

        let cfg = CfgBuilder::build(&body).unwrap();
        let result = LiveVariables::new(&body).compute(&cfg);
        let first = cfg.block(cfg.entry).unwrap().successors[0];
        let live = &result.in_facts[&first];
        assert!(live.contains("i"));
        assert!(live.contains("n"));
    }
}
