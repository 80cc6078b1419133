//! Checker plumbing: the per-checker strategy, the qualified type factory, the common
//! visitor and the analysis session
//!
//! A checker is a [`CheckerVariant`]: it names its qualifier hierarchy, reads qualifiers
//! from annotations, supplies defaults and contracts, and may replace the transfer
//! function or add visitor rules. Everything else (CFG construction, the fixpoint,
//! assignment/argument/return/override checks, diagnostics) is shared.

mod contracts;
mod diagnostics;
mod factory;
mod session;
mod visitor;

pub use contracts::{Contract, ContractKind, ContractTarget};
pub use diagnostics::{render_all, Diagnostic, Severity};
pub use factory::{DeclaredTargets, QualifiedTypeFactory};
pub use session::{AnalysisSession, AnalyzedMethod, SessionReport};
pub use visitor::{keys, CommonVisitor, VisitContext};

use crate::dataflow::{AbstractValue, DefaultTransfer, Store, TransferFunction};
use crate::error::Result;
use crate::hir::{Annotation, ExprId, JavaType, Literal, MethodSig};
use crate::lattice::{DynHierarchy, Qualifier};
use std::fmt;
use std::sync::Arc;

/// Qualifiers of one call after instantiating the callee's signature
#[derive(Debug, Clone, PartialEq)]
pub struct CallSignature<Q> {
    pub receiver: Option<Q>,
    pub params: Vec<Q>,
    pub ret: Q,
}

impl<Q: fmt::Display> fmt::Display for CallSignature<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(f, "({}) -> {}", params.join(", "), self.ret)
    }
}

/// Strategy object describing one checker
pub trait CheckerVariant: Send + Sync + 'static {
    type Qual: Qualifier;

    /// Short name used in configuration and diagnostics
    fn name(&self) -> &'static str;

    fn create_hierarchy(&self) -> Result<Box<DynHierarchy<Self::Qual>>>;

    fn create_transfer(&self, factory: Arc<QualifiedTypeFactory<Self::Qual>>) -> Box<dyn TransferFunction<Self::Qual>> {
        Box::new(DefaultTransfer::new(factory))
    }

    fn create_store(&self) -> Store<Self::Qual> {
        Store::new()
    }

    /// The qualifier the annotations on a declaration spell out, if any
    fn qualifier_from_annotations(&self, annotations: &[Annotation], ty: &JavaType) -> Option<Self::Qual>;

    /// Qualifier of an unannotated declaration
    fn default_qualifier(&self, _ty: &JavaType, hierarchy: &DynHierarchy<Self::Qual>) -> Self::Qual {
        hierarchy.top()
    }

    fn literal_qualifier(&self, _literal: &Literal, _ty: &JavaType, hierarchy: &DynHierarchy<Self::Qual>) -> Self::Qual {
        hierarchy.bottom()
    }

    /// Contracts declared on `sig` itself
    fn contracts(&self, _sig: &MethodSig) -> Vec<Contract<Self::Qual>> {
        Vec::new()
    }

    /// Qualifiers of a call. The default reads the declaration and infers qualifiers for
    /// method type parameters.
    fn instantiate_call(
        &self,
        factory: &QualifiedTypeFactory<Self::Qual>,
        sig: &MethodSig,
        args: &[AbstractValue<Self::Qual>],
        assigned: Option<&AbstractValue<Self::Qual>>,
    ) -> Result<CallSignature<Self::Qual>> {
        factory.declared_call(sig, args, assigned)
    }

    /// Checker-specific rules run alongside the common checks
    fn visitor_rules(&self) -> Vec<Box<dyn VisitorRule<Self::Qual>>> {
        Vec::new()
    }
}

/// A checker-specific check over analysed method bodies
pub trait VisitorRule<Q: Qualifier>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once per expression, in arena order
    fn check_expr(&self, _cx: &mut VisitContext<'_, Q>, _id: ExprId) -> Result<()> {
        Ok(())
    }

    /// Called once per method with a body, after every expression was visited
    fn check_method(&self, _cx: &mut VisitContext<'_, Q>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A two-point checker used by engine tests

    use super::*;
    use crate::hir::find_annotation;
    use crate::lattice::GraphHierarchyBuilder;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum Taint {
        Tainted,
        Untainted,
    }

    impl fmt::Display for Taint {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Taint::Tainted => write!(f, "@Tainted"),
                Taint::Untainted => write!(f, "@Untainted"),
            }
        }
    }

    /// `@Untainted`/`@Tainted`, `@EnsuresUntainted(expr)` postconditions and
    /// `@RequiresUntainted(expr)` preconditions
    pub struct TaintVariant;

    impl CheckerVariant for TaintVariant {
        type Qual = Taint;

        fn name(&self) -> &'static str {
            "taint"
        }

        fn create_hierarchy(&self) -> Result<Box<DynHierarchy<Taint>>> {
            Ok(Box::new(
                GraphHierarchyBuilder::new()
                    .subtype(Taint::Untainted, Taint::Tainted)
                    .build()?,
            ))
        }

        fn qualifier_from_annotations(&self, annotations: &[Annotation], _ty: &JavaType) -> Option<Taint> {
            if find_annotation(annotations, "Untainted").is_some() {
                Some(Taint::Untainted)
            } else if find_annotation(annotations, "Tainted").is_some() {
                Some(Taint::Tainted)
            } else {
                None
            }
        }

        fn contracts(&self, sig: &MethodSig) -> Vec<Contract<Taint>> {
            let mut out = Vec::new();
            for annotation in &sig.annotations {
                let kind = if annotation.is("EnsuresUntainted") {
                    ContractKind::Postcondition
                } else if annotation.is("EnsuresUntaintedOnException") {
                    ContractKind::ExceptionalPostcondition
                } else if annotation.is("RequiresUntainted") {
                    ContractKind::Precondition
                } else {
                    continue;
                };
                for expr in annotation.str_list_arg("value") {
                    out.push(Contract::new(kind, expr, Taint::Untainted));
                }
            }
            out
        }
    }

    pub fn make_factory() -> Arc<QualifiedTypeFactory<Taint>> {
        make_factory_with(crate::hir::ClassTable::new())
    }

    pub fn make_factory_with(classes: crate::hir::ClassTable) -> Arc<QualifiedTypeFactory<Taint>> {
        Arc::new(
            QualifiedTypeFactory::new(Arc::new(TaintVariant), Arc::new(classes), Default::default())
                .expect("hierarchy builds"),
        )
    }
}
