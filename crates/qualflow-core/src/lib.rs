//! # Qualflow Core
//!
//! Engine of a pluggable type-qualifier checking framework. A checker refines the
//! types of a Java-like host program with qualifiers drawn from a lattice and reports
//! every place where a value flows somewhere its qualifier does not allow.
//!
//! ## Modules
//!
//! - **[`lattice`]** - Qualifier hierarchies and the lattice operations over them
//! - **[`qualparams`]** - Named qualifier parameters, wildcards and qualifier variables
//! - **[`hir`]** - The typed host tree the engine consumes
//! - **[`dataflow`]** - CFG construction, stores, transfer functions and the worklist engine
//! - **[`inference`]** - Type-argument and qualifier-parameter inference
//! - **[`predicate`]** - Boolean predicates over named facts
//! - **[`checker`]** - Checker strategy, qualified type factory, common visitor and sessions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use qualflow_core::prelude::*;
//!
//! let mut session = AnalysisSession::new(MyChecker, AnalysisConfig::default());
//! let diagnostics = session.analyze_unit(&unit);
//! println!("{}", render_all(&diagnostics, false));
//! println!("{}", session.report());
//! ```

pub mod checker;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod hir;
pub mod inference;
pub mod lattice;
pub mod predicate;
pub mod qualparams;
pub mod telemetry;

/// Prelude for checker implementations
pub mod prelude {
    pub use crate::checker::{
        keys, render_all, AnalysisSession, CallSignature, CheckerVariant, Contract, ContractKind, ContractTarget,
        Diagnostic, QualifiedTypeFactory, Severity, VisitContext, VisitorRule,
    };
    pub use crate::config::AnalysisConfig;
    pub use crate::dataflow::{
        defaults, AbstractValue, CallSite, DefaultTransfer, FlowExpr, Store, TransferContext, TransferFunction,
        TransferInput, TransferResult,
    };
    pub use crate::error::{QualflowError, Result};
    pub use crate::hir::{
        find_annotation, Annotation, AnnotationValue, BinaryOp, Body, BodyBuilder, ClassDecl, CompilationUnit,
        ExprId, ExprKind, JavaType, Literal, MethodDecl, MethodSig, Param, UnaryOp,
    };
    pub use crate::lattice::{DynHierarchy, GraphHierarchy, GraphHierarchyBuilder, Qualifier, QualifierHierarchy};
    pub use crate::predicate::Predicate;
    pub use crate::qualparams::{ParamValue, QualParams, QualParamsHierarchy};
}

pub use checker::{AnalysisSession, CheckerVariant, Diagnostic, SessionReport, Severity};
pub use config::AnalysisConfig;
pub use error::{QualflowError, Result};
pub use telemetry::init_tracing;
