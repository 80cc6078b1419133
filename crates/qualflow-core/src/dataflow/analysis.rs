//! Worklist fixpoint engine for forward qualifier analysis
//!
//! Each block keeps one [`TransferInput`]. A block is processed by threading its input
//! through the transfer function node by node; the output is routed along each outgoing
//! edge according to its condition:
//!
//! - unconditional edges carry the output as-is (a conditional output stays conditional)
//! - `True`/`False` edges carry the then/else store
//! - exceptional edges carry the node's exceptional store for that cause
//!
//! Inputs are merged with least upper bounds and a block is re-queued only when its input
//! changed. Once no block is pending, a last pass records the store before and after every
//! node and the value of every expression.

use super::cfg::{BasicBlock, BlockId, BlockKind, Cfg, EdgeCondition, Node, NodeId, NodeKind, SpecialKind};
use super::store::{AbstractValue, Store};
use super::transfer::{CallSite, TransferContext, TransferFunction, TransferInput, TransferResult};
use crate::error::{QualflowError, Result};
use crate::hir::{Body, ExprId, ExprKind, MethodSig};
use crate::lattice::{DynHierarchy, Qualifier};
use fnv::FnvHashMap;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

/// Progress of a [`ForwardAnalysis`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisState {
    NotStarted,
    InProgress { worklist: VecDeque<BlockId> },
    Converged,
}

/// Fixed-point results for one method body
#[derive(Debug, Clone)]
pub struct AnalysisResult<Q> {
    cfg: Cfg,
    block_inputs: FnvHashMap<BlockId, TransferInput<Q>>,
    inputs_before: FnvHashMap<NodeId, TransferInput<Q>>,
    stores_before: FnvHashMap<NodeId, Store<Q>>,
    stores_after: FnvHashMap<NodeId, Store<Q>>,
    expr_stores: FnvHashMap<ExprId, Store<Q>>,
    values: FnvHashMap<ExprId, AbstractValue<Q>>,
    regular_exit: Option<Store<Q>>,
    exceptional_exit: Option<Store<Q>>,
    iterations: usize,
}

impl<Q: Qualifier> AnalysisResult<Q> {
    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    /// Merged regular store immediately before `node`; `None` when unreachable
    pub fn store_before(&self, node: NodeId) -> Option<&Store<Q>> {
        self.stores_before.get(&node)
    }

    /// Input of `node` with the then/else split of a preceding boolean expression kept
    pub fn input_before(&self, node: NodeId) -> Option<&TransferInput<Q>> {
        self.inputs_before.get(&node)
    }

    pub fn store_after(&self, node: NodeId) -> Option<&Store<Q>> {
        self.stores_after.get(&node)
    }

    /// Store before `expr`, merged over every node that evaluates it
    pub fn store_before_expr(&self, expr: ExprId) -> Option<&Store<Q>> {
        self.expr_stores.get(&expr)
    }

    pub fn input_of(&self, block: BlockId) -> Option<&TransferInput<Q>> {
        self.block_inputs.get(&block)
    }

    pub fn value_of(&self, expr: ExprId) -> Option<&AbstractValue<Q>> {
        self.values.get(&expr)
    }

    pub fn regular_exit_store(&self) -> Option<&Store<Q>> {
        self.regular_exit.as_ref()
    }

    pub fn exceptional_exit_store(&self) -> Option<&Store<Q>> {
        self.exceptional_exit.as_ref()
    }

    /// Every reachable return node with the store after it
    pub fn return_stores(&self) -> Vec<(&Node, &Store<Q>)> {
        self.cfg
            .return_nodes()
            .filter_map(|node| self.stores_after.get(&node.id).map(|s| (node, s)))
            .collect()
    }

    /// Number of block visits until convergence
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Forward dataflow analysis driven by a checker's transfer function
pub struct ForwardAnalysis<'t, Q: Qualifier> {
    transfer: &'t dyn TransferFunction<Q>,
    state: AnalysisState,
    inputs: FnvHashMap<BlockId, TransferInput<Q>>,
    values: FnvHashMap<ExprId, AbstractValue<Q>>,
    /// Assignment context of call results, for inference
    assigned: FnvHashMap<ExprId, AbstractValue<Q>>,
    iterations: usize,
}

impl<'t, Q: Qualifier> ForwardAnalysis<'t, Q> {
    pub fn new(transfer: &'t dyn TransferFunction<Q>) -> Self {
        Self {
            transfer,
            state: AnalysisState::NotStarted,
            inputs: FnvHashMap::default(),
            values: FnvHashMap::default(),
            assigned: FnvHashMap::default(),
            iterations: 0,
        }
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    fn hierarchy(&self) -> &'t DynHierarchy<Q> {
        self.transfer.hierarchy()
    }

    /// Analyse `body` from scratch
    pub fn run(&mut self, cfg: &Cfg, body: &Body, method: &MethodSig) -> Result<AnalysisResult<Q>> {
        debug!(method = %method.qualified_name(), blocks = cfg.blocks.len(), "starting forward analysis");
        self.inputs.clear();
        self.values.clear();
        self.assigned = self.transfer.factory().declared_targets(method, body).assigned;
        self.iterations = 0;
        let initial = self.transfer.initial_store(method)?;
        self.inputs.insert(cfg.entry, TransferInput::Regular(initial));
        self.iterate(cfg, body, method)?;
        self.collect(cfg, body, method)
    }

    /// Resume from a previous fixed point; with unchanged inputs this reproduces it
    pub fn rerun(
        &mut self,
        cfg: &Cfg,
        body: &Body,
        method: &MethodSig,
        previous: &AnalysisResult<Q>,
    ) -> Result<AnalysisResult<Q>> {
        debug!(method = %method.qualified_name(), "re-running forward analysis from previous fixed point");
        self.inputs = previous.block_inputs.clone();
        self.values = previous.values.clone();
        self.assigned = self.transfer.factory().declared_targets(method, body).assigned;
        self.iterations = 0;
        self.iterate(cfg, body, method)?;
        self.collect(cfg, body, method)
    }

    fn pop(&mut self) -> Option<BlockId> {
        match &mut self.state {
            AnalysisState::InProgress { worklist } => worklist.pop_front(),
            _ => None,
        }
    }

    fn push(&mut self, block: BlockId) {
        if let AnalysisState::InProgress { worklist } = &mut self.state {
            worklist.push_back(block);
        }
    }

    fn iterate(&mut self, cfg: &Cfg, body: &Body, method: &MethodSig) -> Result<()> {
        let worklist: VecDeque<BlockId> = cfg.reverse_postorder().into_iter().collect();
        let mut in_worklist: HashSet<BlockId> = worklist.iter().copied().collect();
        self.state = AnalysisState::InProgress { worklist };

        while let Some(block_id) = self.pop() {
            in_worklist.remove(&block_id);
            let Some(input) = self.inputs.get(&block_id).cloned() else {
                continue;
            };
            let block = cfg
                .block(block_id)
                .ok_or_else(|| QualflowError::internal(format!("block {block_id} is not in the CFG")))?;
            self.iterations += 1;
            trace!(block = %block_id, kind = ?block.kind, "processing block");

            for (succ, succ_input) in self.process_block(cfg, block, body, method, input)? {
                if self.add_input(succ, succ_input) && in_worklist.insert(succ) {
                    self.push(succ);
                }
            }
        }

        self.state = AnalysisState::Converged;
        debug!(
            method = %method.qualified_name(),
            iterations = self.iterations,
            "forward analysis converged"
        );
        Ok(())
    }

    /// Merge `input` into the stored input of `block`; true when it changed
    fn add_input(&mut self, block: BlockId, input: TransferInput<Q>) -> bool {
        let h = self.hierarchy();
        let merged = match self.inputs.get(&block) {
            Some(old) => {
                let merged = old.lub(&input, h);
                if &merged == old {
                    return false;
                }
                merged
            }
            None => input,
        };
        self.inputs.insert(block, merged);
        true
    }

    /// Run `block` and compute the input each successor receives
    fn process_block(
        &mut self,
        cfg: &Cfg,
        block: &BasicBlock,
        body: &Body,
        method: &MethodSig,
        input: TransferInput<Q>,
    ) -> Result<Vec<(BlockId, TransferInput<Q>)>> {
        let h = self.hierarchy();
        let mut out = Vec::new();
        match &block.kind {
            BlockKind::Special(SpecialKind::Exit | SpecialKind::ExceptionalExit) => {}
            BlockKind::Special(SpecialKind::Entry) | BlockKind::Conditional => {
                for edge in cfg.successor_edges(block.id) {
                    out.push((edge.to, route(&edge.condition, &input, None, h)));
                }
            }
            BlockKind::Regular | BlockKind::Exception => {
                let mut current = input;
                let mut last = None;
                for &node_id in &block.nodes {
                    let node = cfg
                        .node(node_id)
                        .ok_or_else(|| QualflowError::internal(format!("node {} is missing", node_id.0)))?;
                    let before = current.clone();
                    let result = self.apply(body, method, node, current)?;
                    current = result.to_input();
                    last = Some((before, result));
                }
                for edge in cfg.successor_edges(block.id) {
                    let exceptional = match (&edge.condition, &last) {
                        (EdgeCondition::Exceptional(_), Some((before, result))) if block.kind == BlockKind::Exception => {
                            Some((before, result))
                        }
                        _ => None,
                    };
                    out.push((edge.to, route(&edge.condition, &current, exceptional, h)));
                }
            }
        }
        Ok(out)
    }

    /// Dispatch one node to the transfer function
    fn apply(
        &mut self,
        body: &Body,
        method: &MethodSig,
        node: &Node,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let t = self.transfer;
        let result = {
            let ctx = TransferContext::new(body, method, node, &self.values).with_assignments(&self.assigned);
            match &node.kind {
                NodeKind::Expr(id) => {
                    let expr = ctx.expr(*id)?;
                    let id = *id;
                    match &expr.kind {
                        ExprKind::Literal(lit) => t.visit_literal(&ctx, id, lit, input),
                        ExprKind::Local(name) => t.visit_local(&ctx, id, name, input),
                        ExprKind::This => t.visit_this(&ctx, id, input),
                        ExprKind::FieldAccess { receiver, field } => {
                            t.visit_field_access(&ctx, id, *receiver, field, input)
                        }
                        ExprKind::ArrayAccess { array, index } => {
                            t.visit_array_access(&ctx, id, *array, *index, input)
                        }
                        ExprKind::Binary { op, lhs, rhs } => t.visit_binary(&ctx, id, *op, *lhs, *rhs, input),
                        ExprKind::Unary { op, operand } => t.visit_unary(&ctx, id, *op, *operand, input),
                        ExprKind::Paren(inner) => t.visit_paren(&ctx, id, *inner, input),
                        ExprKind::Cast { target, expr } => t.visit_cast(&ctx, id, target, *expr, input),
                        ExprKind::MethodCall { receiver, method, args } => {
                            let call = CallSite {
                                id,
                                receiver: *receiver,
                                method,
                                args,
                            };
                            t.visit_method_call(&ctx, &call, input)
                        }
                        ExprKind::New { ctor, args } => {
                            let call = CallSite {
                                id,
                                receiver: None,
                                method: ctor,
                                args,
                            };
                            t.visit_new_object(&ctx, &call, input)
                        }
                        ExprKind::Assign { target, value } => t.visit_assign(&ctx, id, *target, *value, input),
                        ExprKind::CompoundAssign { op, target, value } => {
                            t.visit_compound_assign(&ctx, id, *op, *target, *value, input)
                        }
                    }
                }
                NodeKind::LocalDecl {
                    name,
                    ty,
                    annotations,
                    init,
                } => t.visit_local_decl(&ctx, name, ty, annotations, *init, input),
                NodeKind::Return(value) => t.visit_return(&ctx, *value, input),
                NodeKind::Throw(value) => t.visit_throw(&ctx, *value, input),
                NodeKind::CatchParam { name, exception } => t.visit_catch_param(&ctx, name, exception, input),
            }
        }?;
        if let (NodeKind::Expr(id), Some(value)) = (&node.kind, result.value()) {
            self.values.insert(*id, value.clone());
        }
        Ok(result)
    }

    /// Replay every reachable block once at the fixed point and record per-node stores
    fn collect(&mut self, cfg: &Cfg, body: &Body, method: &MethodSig) -> Result<AnalysisResult<Q>> {
        let h = self.hierarchy();
        let mut inputs_before = FnvHashMap::default();
        let mut stores_before = FnvHashMap::default();
        let mut stores_after = FnvHashMap::default();
        let mut expr_stores: FnvHashMap<ExprId, Store<Q>> = FnvHashMap::default();
        let mut values: FnvHashMap<ExprId, AbstractValue<Q>> = FnvHashMap::default();

        for block_id in cfg.reverse_postorder() {
            let (Some(block), Some(input)) = (cfg.block(block_id), self.inputs.get(&block_id).cloned()) else {
                continue;
            };
            let mut current = input;
            for &node_id in &block.nodes {
                let node = cfg
                    .node(node_id)
                    .ok_or_else(|| QualflowError::internal(format!("node {} is missing", node_id.0)))?;
                let before = current.regular_store(h);
                inputs_before.insert(node_id, current.clone());
                let result = self.apply(body, method, node, current)?;
                current = result.to_input();
                stores_after.insert(node_id, current.regular_store(h));

                if let NodeKind::Expr(expr) = &node.kind {
                    let merged = match expr_stores.remove(expr) {
                        Some(prev) => prev.least_upper_bound(&before, h),
                        None => before.clone(),
                    };
                    expr_stores.insert(*expr, merged);
                    if let Some(value) = result.value() {
                        let merged = match values.remove(expr) {
                            Some(prev) => prev.lub(value, h),
                            None => value.clone(),
                        };
                        values.insert(*expr, merged);
                    }
                }
                stores_before.insert(node_id, before);
            }
        }

        let regular_exit = self.inputs.get(&cfg.exit).map(|i| i.regular_store(h));
        let exceptional_exit = self.inputs.get(&cfg.exceptional_exit).map(|i| i.regular_store(h));
        self.values = values.clone();
        Ok(AnalysisResult {
            cfg: cfg.clone(),
            block_inputs: self.inputs.clone(),
            inputs_before,
            stores_before,
            stores_after,
            expr_stores,
            values,
            regular_exit,
            exceptional_exit,
            iterations: self.iterations,
        })
    }
}

/// Input carried along one edge out of a block whose output is `output`. `exceptional`
/// holds the pre-node input and result of an exception block's node.
fn route<Q: Qualifier>(
    condition: &EdgeCondition,
    output: &TransferInput<Q>,
    exceptional: Option<(&TransferInput<Q>, &TransferResult<Q>)>,
    h: &DynHierarchy<Q>,
) -> TransferInput<Q> {
    match condition {
        EdgeCondition::Unconditional => output.clone(),
        EdgeCondition::True => TransferInput::Regular(output.then_store().clone()),
        EdgeCondition::False => TransferInput::Regular(output.else_store().clone()),
        EdgeCondition::Exceptional(cause) => match exceptional {
            Some((before, result)) => match result.exceptional_store(cause) {
                Some(store) => TransferInput::Regular(store.clone()),
                None => TransferInput::Regular(before.regular_store(h)),
            },
            // End of an exceptional finally copy rethrowing
            None => TransferInput::Regular(output.regular_store(h)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::testing::{make_factory, Taint};
    use crate::dataflow::{CfgBuilder, FlowExpr};
    use crate::hir::{catch, Annotation, AnnotationValue, BodyBuilder, JavaType, Param, Stmt};
    use std::sync::Arc;

    fn make_sig() -> MethodSig {
        MethodSig::new("Test", "run")
            .with_param(Param::new("input", JavaType::string()))
            .with_param(Param::new("flag", JavaType::BOOLEAN))
            .returning(JavaType::string())
    }

    fn make_sanitizer(contract: &str) -> Arc<MethodSig> {
        MethodSig::new("Util", "sanitize")
            .static_method()
            .with_param(Param::new("x", JavaType::string()))
            .with_annotation(Annotation::marker(contract).with_arg("value", AnnotationValue::Str("#1".into())))
            .arc()
    }

    fn analyze(body: &Body, sig: &MethodSig) -> AnalysisResult<Taint> {
        let factory = make_factory();
        let transfer = factory.variant().create_transfer(Arc::clone(&factory));
        let cfg = CfgBuilder::build(body).unwrap();
        ForwardAnalysis::new(&*transfer).run(&cfg, body, sig).unwrap()
    }

    fn qual_of_s(store: Option<&Store<Taint>>) -> Option<Taint> {
        store?.get_value(&FlowExpr::local("s")).map(|v| v.qual)
    }

    #[test]
    fn test_reassignment_refines_local() {
        let mut b = BodyBuilder::new();
        let input = b.local("input", JavaType::string());
        b.declare("s", JavaType::string(), Some(input));
        let target = b.local("s", JavaType::string());
        let lit = b.string("safe");
        let assign = b.assign(target, lit);
        b.expr_stmt(assign);
        let ret = b.local("s", JavaType::string());
        b.ret(Some(ret));
        let body = b.finish();

        let result = analyze(&body, &make_sig());
        assert_eq!(result.value_of(input).map(|v| v.qual), Some(Taint::Tainted));
        assert_eq!(qual_of_s(result.store_before_expr(lit)), Some(Taint::Tainted));
        assert_eq!(result.value_of(ret).map(|v| v.qual), Some(Taint::Untainted));
        assert_eq!(qual_of_s(result.regular_exit_store()), Some(Taint::Untainted));
    }

    #[test]
    fn test_branches_merge_with_lub() {
        let build = |else_is_literal: bool| {
            let mut b = BodyBuilder::new();
            let input = b.local("input", JavaType::string());
            b.declare("s", JavaType::string(), Some(input));
            let flag = b.local("flag", JavaType::BOOLEAN);
            let then_target = b.local("s", JavaType::string());
            let then_value = b.string("a");
            let then_assign = b.assign(then_target, then_value);
            let else_target = b.local("s", JavaType::string());
            let else_value = if else_is_literal {
                b.string("b")
            } else {
                b.local("input", JavaType::string())
            };
            let else_assign = b.assign(else_target, else_value);
            b.push(Stmt::If {
                cond: flag,
                then_branch: vec![Stmt::Expr(then_assign)],
                else_branch: vec![Stmt::Expr(else_assign)],
            });
            let ret = b.local("s", JavaType::string());
            b.ret(Some(ret));
            (b.finish(), ret)
        };

        let (mixed, ret) = build(false);
        let result = analyze(&mixed, &make_sig());
        assert_eq!(result.value_of(ret).map(|v| v.qual), Some(Taint::Tainted));

        let (both_literal, ret) = build(true);
        let result = analyze(&both_literal, &make_sig());
        assert_eq!(result.value_of(ret).map(|v| v.qual), Some(Taint::Untainted));
    }

    #[test]
    fn test_call_postcondition_reaches_caller_store() {
        let sanitize = make_sanitizer("EnsuresUntainted");
        let mut b = BodyBuilder::new();
        let input = b.local("input", JavaType::string());
        b.declare("s", JavaType::string(), Some(input));
        let arg = b.local("s", JavaType::string());
        let call = b.call(None, &sanitize, vec![arg]);
        b.expr_stmt(call);
        let ret = b.local("s", JavaType::string());
        b.ret(Some(ret));
        let body = b.finish();

        let result = analyze(&body, &make_sig());
        assert_eq!(qual_of_s(result.store_before_expr(call)), Some(Taint::Tainted));
        assert_eq!(result.value_of(ret).map(|v| v.qual), Some(Taint::Untainted));
    }

    #[test]
    fn test_exceptional_postcondition_flows_to_handler() {
        let build = |contract: &str| {
            let sanitize = make_sanitizer(contract);
            let mut b = BodyBuilder::new();
            let input = b.local("input", JavaType::string());
            b.declare("s", JavaType::string(), Some(input));
            let arg = b.local("s", JavaType::string());
            let call = b.call(None, &sanitize, vec![arg]);
            let in_handler = b.local("s", JavaType::string());
            b.push(Stmt::Try {
                body: vec![Stmt::Expr(call)],
                catches: vec![catch("Exception", "e", vec![Stmt::Expr(in_handler)])],
                finally: None,
            });
            (b.finish(), in_handler)
        };

        let (body, in_handler) = build("EnsuresUntaintedOnException");
        let result = analyze(&body, &make_sig());
        assert_eq!(result.value_of(in_handler).map(|v| v.qual), Some(Taint::Untainted));
        assert!(result.store_before_expr(in_handler).is_some());

        // A normal postcondition says nothing about the exceptional path
        let (body, in_handler) = build("EnsuresUntainted");
        let result = analyze(&body, &make_sig());
        assert_eq!(result.value_of(in_handler).map(|v| v.qual), Some(Taint::Tainted));
    }

    #[test]
    fn test_loop_converges_and_rerun_is_stable() {
        let mut b = BodyBuilder::new();
        let lit = b.string("start");
        b.declare("s", JavaType::string(), Some(lit));
        let flag = b.local("flag", JavaType::BOOLEAN);
        let target = b.local("s", JavaType::string());
        let input = b.local("input", JavaType::string());
        let assign = b.assign(target, input);
        b.push(Stmt::While {
            cond: flag,
            body: vec![Stmt::Expr(assign)],
        });
        let ret = b.local("s", JavaType::string());
        b.ret(Some(ret));
        let body = b.finish();
        let sig = make_sig();

        let factory = make_factory();
        let transfer = factory.variant().create_transfer(Arc::clone(&factory));
        let cfg = CfgBuilder::build(&body).unwrap();
        let mut analysis = ForwardAnalysis::new(&*transfer);
        let first = analysis.run(&cfg, &body, &sig).unwrap();
        assert_eq!(analysis.state(), &AnalysisState::Converged);
        assert!(first.iterations() > 0);
        assert_eq!(first.value_of(ret).map(|v| v.qual), Some(Taint::Tainted));
        // The loop head sees both the entry value and the back edge
        assert_eq!(qual_of_s(first.store_before_expr(flag)), Some(Taint::Tainted));

        let second = analysis.rerun(&cfg, &body, &sig, &first).unwrap();
        assert_eq!(second.regular_exit_store(), first.regular_exit_store());
        assert_eq!(second.value_of(ret), first.value_of(ret));
    }

    #[test]
    fn test_return_stores_cover_every_return() {
        let mut b = BodyBuilder::new();
        let flag = b.local("flag", JavaType::BOOLEAN);
        let a = b.string("a");
        let input = b.local("input", JavaType::string());
        b.push(Stmt::If {
            cond: flag,
            then_branch: vec![Stmt::Return(Some(a))],
            else_branch: vec![Stmt::Return(Some(input))],
        });
        let body = b.finish();

        let result = analyze(&body, &make_sig());
        let returns = result.return_stores();
        assert_eq!(returns.len(), 2);
        assert!(result.regular_exit_store().is_some());
        assert!(result.exceptional_exit_store().is_none());
    }
}
