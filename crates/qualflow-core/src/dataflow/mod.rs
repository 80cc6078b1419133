//! Flow-sensitive qualifier analysis
//!
//! This module implements the dataflow side of the framework:
//! - Control flow graph with conditional and exceptional edges, built from a [`crate::hir::Body`]
//! - Abstract values and stores keyed by trackable expressions
//! - The transfer function contract checkers plug into
//! - A forward worklist engine over that contract
//! - A generic block-level fixpoint solver, used by live-variable analysis

mod analysis;
mod builder;
mod cfg;
mod liveness;
mod solver;
mod store;
mod transfer;

pub use analysis::{AnalysisResult, AnalysisState, ForwardAnalysis};
pub use builder::{is_catch_all, CfgBuilder, UNKNOWN_CAUSE};
pub use cfg::{BasicBlock, BlockId, BlockKind, Cfg, CfgEdge, EdgeCondition, Node, NodeId, NodeKind, SpecialKind};
pub use liveness::{LiveSet, LiveVariables};
pub use solver::{DataflowAnalysis, DataflowDirection, FixpointResult, FixpointSolver};
pub use store::{AbstractValue, FlowExpr, Store};
pub use transfer::{
    defaults, CallSite, DefaultTransfer, ExceptionalStores, TransferContext, TransferFunction, TransferInput,
    TransferResult,
};
