//! Tainting checker
//!
//! Values are `@Tainted` unless proven `@Untainted`. Qualifiers are parameterized: a
//! declaration may name a qualifier for any parameter of its type (`@Untainted(param =
//! "E") List<String>`) and may use qualifier variables (`@Var("T")`) and wildcards
//! (`@Wild(lower = .., upper = ..)`). Variables in a method signature are inferred per
//! call from the arguments and the assignment context.
//!
//! Parameter values are compared by containment, so a plain qualifier only accepts
//! itself. `@Tainted` therefore stands for the range `? super @Untainted extends
//! @Tainted`, which accepts both kinds of value, while `@Untainted` is exact.

use qualflow_core::checker::{CallSignature, CheckerVariant, Contract, ContractKind, QualifiedTypeFactory};
use qualflow_core::dataflow::AbstractValue;
use qualflow_core::error::Result;
use qualflow_core::hir::{Annotation, JavaType, Literal, MethodSig};
use qualflow_core::inference::infer_qual_params;
use qualflow_core::lattice::{DynHierarchy, GraphHierarchy, GraphHierarchyBuilder};
use qualflow_core::qualparams::{ParamValue, QualParams, QualParamsHierarchy, PRIMARY};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Taint {
    Tainted,
    Untainted,
}

impl Taint {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Tainted" => Some(Taint::Tainted),
            "Untainted" => Some(Taint::Untainted),
            _ => None,
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Taint::Tainted => f.write_str("@Tainted"),
            Taint::Untainted => f.write_str("@Untainted"),
        }
    }
}

pub type TaintParams = QualParams<Taint>;

pub fn untainted() -> TaintParams {
    QualParams::primary(ParamValue::base(Taint::Untainted))
}

/// Possibly tainted: any value between `@Untainted` and `@Tainted`
pub fn tainted() -> TaintParams {
    QualParams::primary(any_taint())
}

fn any_taint() -> ParamValue<Taint> {
    ParamValue::wildcard(Taint::Untainted, Taint::Tainted)
}

pub struct TaintingChecker {
    ground: GraphHierarchy<Taint>,
}

impl TaintingChecker {
    pub fn new() -> Result<Self> {
        let ground = GraphHierarchyBuilder::new()
            .subtype(Taint::Untainted, Taint::Tainted)
            .build()?;
        Ok(Self { ground })
    }

    pub fn ground(&self) -> &GraphHierarchy<Taint> {
        &self.ground
    }

    /// The parameter value one annotation spells out, with the parameter it applies to
    fn param_value(annotation: &Annotation) -> Option<(String, ParamValue<Taint>)> {
        let param = annotation.str_arg("param").unwrap_or(PRIMARY).to_string();
        let value = if annotation.is("Untainted") {
            ParamValue::base(Taint::Untainted)
        } else if annotation.is("Tainted") {
            any_taint()
        } else if annotation.is("Var") {
            let Some(name) = annotation.str_arg("value") else {
                warn!(annotation = %annotation.name, "qualifier variable without a name");
                return None;
            };
            ParamValue::var(name, Taint::Untainted, Taint::Tainted)
        } else if annotation.is("Wild") {
            let bound = |key: &str, fallback: Taint| annotation.str_arg(key).and_then(Taint::from_name).unwrap_or(fallback);
            ParamValue::wildcard(bound("lower", Taint::Untainted), bound("upper", Taint::Tainted))
        } else {
            return None;
        };
        Some((param, value))
    }
}

impl CheckerVariant for TaintingChecker {
    type Qual = TaintParams;

    fn name(&self) -> &'static str {
        "tainting"
    }

    fn create_hierarchy(&self) -> Result<Box<DynHierarchy<TaintParams>>> {
        Ok(Box::new(QualParamsHierarchy::new(self.ground.clone())))
    }

    /// Parameters not mentioned keep the primary default when at least one is annotated
    fn qualifier_from_annotations(&self, annotations: &[Annotation], _ty: &JavaType) -> Option<TaintParams> {
        let mut params = annotations.iter().filter_map(Self::param_value).peekable();
        params.peek()?;
        let mut qual = tainted();
        for (name, value) in params {
            qual = qual.with(name, value);
        }
        Some(qual)
    }

    fn default_qualifier(&self, _ty: &JavaType, _hierarchy: &DynHierarchy<TaintParams>) -> TaintParams {
        tainted()
    }

    fn literal_qualifier(&self, literal: &Literal, _ty: &JavaType, hierarchy: &DynHierarchy<TaintParams>) -> TaintParams {
        match literal {
            Literal::Null => hierarchy.bottom(),
            _ => untainted(),
        }
    }

    fn contracts(&self, sig: &MethodSig) -> Vec<Contract<TaintParams>> {
        let mut out = Vec::new();
        for annotation in &sig.annotations {
            let kind = if annotation.is("EnsuresUntainted") {
                ContractKind::Postcondition
            } else if annotation.is("RequiresUntainted") {
                ContractKind::Precondition
            } else {
                continue;
            };
            for expr in annotation.str_list_arg("value") {
                out.push(Contract::new(kind, expr, untainted()));
            }
        }
        out
    }

    /// Declared qualifiers with every qualifier variable replaced by its inferred value
    fn instantiate_call(
        &self,
        factory: &QualifiedTypeFactory<TaintParams>,
        sig: &MethodSig,
        args: &[AbstractValue<TaintParams>],
        assigned: Option<&AbstractValue<TaintParams>>,
    ) -> Result<CallSignature<TaintParams>> {
        let declared = factory.declared_call(sig, args, assigned)?;
        let has_vars = declared
            .params
            .iter()
            .chain(declared.receiver.iter())
            .chain(std::iter::once(&declared.ret))
            .any(|q| !q.var_names().is_empty());
        if !has_vars {
            return Ok(declared);
        }

        let actuals: Vec<TaintParams> = args.iter().map(|a| a.qual.clone()).collect();
        let config = factory.config();
        let solution = infer_qual_params(
            &self.ground,
            &declared.params,
            &actuals,
            Some(&declared.ret),
            assigned.map(|a| &a.qual),
            config.conservative_uninferred,
            config.show_inference_steps,
        )
        .into_result()?;
        debug!(method = %sig.name, ?solution, "qualifier variables inferred");

        let apply = |q: &TaintParams| q.substitute_all(solution.iter(), &self.ground);
        Ok(CallSignature {
            receiver: declared.receiver.as_ref().map(apply),
            params: declared.params.iter().map(apply).collect(),
            ret: apply(&declared.ret),
        })
    }
}
