//! Control flow graph of a method body

use crate::hir::{Annotation, ExprId, JavaType};
use fnv::FnvHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::fmt;

/// Unique identifier for a basic block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Condition under which an edge is taken
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeCondition {
    True,
    False,
    Unconditional,
    /// An exception of the given type propagates along this edge
    Exceptional(String),
}

/// Edge in the CFG connecting two blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub condition: EdgeCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    Entry,
    Exit,
    ExceptionalExit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Regular,
    /// Exactly one node that may throw
    Exception,
    /// No nodes; routes the then/else stores of the preceding node
    Conditional,
    Special(SpecialKind),
}

/// One step of evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Evaluation of one expression, after its operands
    Expr(ExprId),
    LocalDecl {
        name: String,
        ty: JavaType,
        annotations: Vec<Annotation>,
        init: Option<ExprId>,
    },
    Return(Option<ExprId>),
    Throw(ExprId),
    /// Binding of a caught exception at the start of a handler
    CatchParam { name: String, exception: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub block: BlockId,
}

impl Node {
    pub fn expr(&self) -> Option<ExprId> {
        match &self.kind {
            NodeKind::Expr(id) => Some(*id),
            _ => None,
        }
    }
}

/// A basic block in the CFG
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub nodes: Vec<NodeId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    /// Exception blocks only: handler blocks per exception cause
    pub exceptional_successors: IndexMap<String, Vec<BlockId>>,
}

impl BasicBlock {
    pub fn new(id: BlockId, kind: BlockKind) -> Self {
        Self {
            id,
            kind,
            nodes: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            exceptional_successors: IndexMap::new(),
        }
    }
}

/// Control flow graph
#[derive(Debug, Clone)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    pub nodes: Vec<Node>,
    pub edges: Vec<CfgEdge>,
    pub entry: BlockId,
    pub exit: BlockId,
    pub exceptional_exit: BlockId,
    expr_nodes: FnvHashMap<ExprId, SmallVec<[NodeId; 1]>>,
}

impl Cfg {
    pub fn new() -> Self {
        let mut cfg = Self {
            blocks: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            exceptional_exit: BlockId(0),
            expr_nodes: FnvHashMap::default(),
        };
        cfg.entry = cfg.new_block(BlockKind::Special(SpecialKind::Entry));
        cfg.exit = cfg.new_block(BlockKind::Special(SpecialKind::Exit));
        cfg.exceptional_exit = cfg.new_block(BlockKind::Special(SpecialKind::ExceptionalExit));
        cfg
    }

    pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id, kind));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn add_node(&mut self, block: BlockId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let NodeKind::Expr(expr) = &kind {
            self.expr_nodes.entry(*expr).or_default().push(id);
        }
        self.nodes.push(Node { id, kind, block });
        if let Some(b) = self.blocks.get_mut(block.0) {
            b.nodes.push(id);
        }
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId, condition: EdgeCondition) {
        if self
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to && e.condition == condition)
        {
            return;
        }
        if let EdgeCondition::Exceptional(cause) = &condition {
            if let Some(block) = self.blocks.get_mut(from.0) {
                let handlers = block.exceptional_successors.entry(cause.clone()).or_default();
                if !handlers.contains(&to) {
                    handlers.push(to);
                }
            }
        }
        if let Some(block) = self.blocks.get_mut(from.0) {
            if !block.successors.contains(&to) {
                block.successors.push(to);
            }
        }
        if let Some(block) = self.blocks.get_mut(to.0) {
            if !block.predecessors.contains(&from) {
                block.predecessors.push(from);
            }
        }
        self.edges.push(CfgEdge { from, to, condition });
    }

    /// Outgoing edges of `block`, in insertion order
    pub fn successor_edges(&self, block: BlockId) -> impl Iterator<Item = &CfgEdge> {
        self.edges.iter().filter(move |e| e.from == block)
    }

    /// Every node evaluating `expr`. More than one when a finally body is duplicated on
    /// several paths.
    pub fn nodes_for_expr(&self, expr: ExprId) -> &[NodeId] {
        self.expr_nodes.get(&expr).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Nodes of the given kind, e.g. every return
    pub fn return_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| matches!(n.kind, NodeKind::Return(_)))
    }

    /// Get blocks in reverse postorder (useful for forward dataflow)
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut postorder = self.postorder();
        postorder.reverse();
        postorder
    }

    /// Get blocks in postorder (useful for backward dataflow)
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut result = Vec::new();
        self.dfs_postorder(self.entry, &mut visited, &mut result);
        result
    }

    fn dfs_postorder(&self, block: BlockId, visited: &mut HashSet<BlockId>, postorder: &mut Vec<BlockId>) {
        if !visited.insert(block) {
            return;
        }
        if let Some(b) = self.block(block) {
            for &succ in &b.successors {
                self.dfs_postorder(succ, visited, postorder);
            }
        }
        postorder.push(block);
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.postorder().contains(&block)
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_blocks() {
        let cfg = Cfg::new();
        assert_eq!(cfg.blocks.len(), 3);
        assert_eq!(cfg.block(cfg.entry).unwrap().kind, BlockKind::Special(SpecialKind::Entry));
        assert_eq!(cfg.block(cfg.exit).unwrap().kind, BlockKind::Special(SpecialKind::Exit));
        assert_ne!(cfg.exit, cfg.exceptional_exit);
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut cfg = Cfg::new();
        let b = cfg.new_block(BlockKind::Regular);
        cfg.add_edge(cfg.entry, b, EdgeCondition::Unconditional);
        cfg.add_edge(cfg.entry, b, EdgeCondition::Unconditional);
        assert_eq!(cfg.edges.len(), 1);
        assert_eq!(cfg.block(b).unwrap().predecessors, vec![cfg.entry]);
    }

    #[test]
    fn test_exceptional_successors_recorded() {
        let mut cfg = Cfg::new();
        let call = cfg.new_block(BlockKind::Exception);
        let handler = cfg.new_block(BlockKind::Regular);
        cfg.add_edge(call, handler, EdgeCondition::Exceptional("Throwable".into()));
        cfg.add_edge(call, cfg.exceptional_exit, EdgeCondition::Exceptional("Throwable".into()));
        let block = cfg.block(call).unwrap();
        assert_eq!(block.exceptional_successors["Throwable"], vec![handler, cfg.exceptional_exit]);
    }

    #[test]
    fn test_reverse_postorder() {
        let mut cfg = Cfg::new();
        let a = cfg.new_block(BlockKind::Regular);
        let b = cfg.new_block(BlockKind::Regular);
        cfg.add_edge(cfg.entry, a, EdgeCondition::Unconditional);
        cfg.add_edge(a, b, EdgeCondition::Unconditional);
        cfg.add_edge(b, a, EdgeCondition::Unconditional);
        cfg.add_edge(b, cfg.exit, EdgeCondition::Unconditional);

        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo[0], cfg.entry);
        let pos = |id| rpo.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(cfg.exit));
        assert!(!cfg.is_reachable(cfg.exceptional_exit));
    }

    #[test]
    fn test_expr_node_lookup() {
        let mut cfg = Cfg::new();
        let b1 = cfg.new_block(BlockKind::Regular);
        let b2 = cfg.new_block(BlockKind::Regular);
        let n1 = cfg.add_node(b1, NodeKind::Expr(ExprId(7)));
        let n2 = cfg.add_node(b2, NodeKind::Expr(ExprId(7)));
        assert_eq!(cfg.nodes_for_expr(ExprId(7)), &[n1, n2]);
        assert!(cfg.nodes_for_expr(ExprId(8)).is_empty());
        assert_eq!(cfg.node(n2).unwrap().block, b2);
    }
}
