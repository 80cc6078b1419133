//! Qualified types of declarations, literals and expressions for one checker

use super::contracts::Contract;
use super::visitor::walk_stmts;
use super::{CallSignature, CheckerVariant};
use crate::config::AnalysisConfig;
use crate::dataflow::{AbstractValue, AnalysisResult, NodeId, Store};
use crate::error::{QualflowError, Result};
use crate::hir::{Annotation, Body, ClassTable, ExprId, ExprKind, JavaType, Literal, MethodSig, Stmt};
use crate::inference::{InferenceDomain, QualType, TargetBounds, TypeArgInference, TypeDomain};
use crate::lattice::{DynHierarchy, Qualifier};
use fnv::FnvHashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Declared types of the places a method body assigns to
#[derive(Debug, Clone)]
pub struct DeclaredTargets<Q> {
    /// Parameters and explicitly annotated locals
    pub locals: FnvHashMap<String, AbstractValue<Q>>,
    /// Initializers and right-hand sides, mapped to the declared type they flow into
    pub assigned: FnvHashMap<ExprId, AbstractValue<Q>>,
}

impl<Q: Qualifier> DeclaredTargets<Q> {
    /// Declared type an assignment to `target` must respect, when the target carries one
    pub fn target(&self, factory: &QualifiedTypeFactory<Q>, body: &Body, target: ExprId) -> Option<AbstractValue<Q>> {
        let expr = body.expr(target)?;
        match &expr.kind {
            ExprKind::Local(name) => self.locals.get(name).cloned(),
            ExprKind::FieldAccess { receiver, field } => {
                let owner = body.expr(*receiver).and_then(|r| r.ty.simple_name());
                Some(factory.field_value(owner, field, &expr.ty))
            }
            _ => None,
        }
    }

    pub fn assignment_context(&self, id: ExprId) -> Option<&AbstractValue<Q>> {
        self.assigned.get(&id)
    }
}

/// Computes declared and default qualified types, contracts and call signatures.
///
/// One factory is created per checker per session. It is shared (behind an `Arc`) by the
/// transfer function and the visitor.
pub struct QualifiedTypeFactory<Q: Qualifier> {
    variant: Arc<dyn CheckerVariant<Qual = Q>>,
    hierarchy: Arc<DynHierarchy<Q>>,
    classes: Arc<ClassTable>,
    config: AnalysisConfig,
    contracts: Mutex<FnvHashMap<String, Arc<Vec<Contract<Q>>>>>,
}

impl<Q: Qualifier> QualifiedTypeFactory<Q> {
    pub fn new(
        variant: Arc<dyn CheckerVariant<Qual = Q>>,
        classes: Arc<ClassTable>,
        config: AnalysisConfig,
    ) -> Result<Self> {
        let hierarchy: Arc<DynHierarchy<Q>> = Arc::from(variant.create_hierarchy()?);
        debug!(
            checker = variant.name(),
            top = %hierarchy.top(),
            bottom = %hierarchy.bottom(),
            "created qualifier hierarchy"
        );
        Ok(Self {
            variant,
            hierarchy,
            classes,
            config,
            contracts: Mutex::new(FnvHashMap::default()),
        })
    }

    pub fn hierarchy(&self) -> &DynHierarchy<Q> {
        &*self.hierarchy
    }

    pub fn variant(&self) -> &dyn CheckerVariant<Qual = Q> {
        &*self.variant
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn declared_qualifier(&self, annotations: &[Annotation], ty: &JavaType) -> Q {
        self.variant
            .qualifier_from_annotations(annotations, ty)
            .unwrap_or_else(|| self.variant.default_qualifier(ty, self.hierarchy()))
    }

    pub fn declared_type(&self, annotations: &[Annotation], ty: &JavaType) -> AbstractValue<Q> {
        AbstractValue::new(self.declared_qualifier(annotations, ty), ty.clone())
    }

    pub fn literal_value(&self, literal: &Literal, ty: &JavaType) -> AbstractValue<Q> {
        AbstractValue::new(self.variant.literal_qualifier(literal, ty, self.hierarchy()), ty.clone())
    }

    pub fn receiver_value(&self, sig: &MethodSig) -> AbstractValue<Q> {
        self.declared_type(&sig.receiver_annotations, &JavaType::declared(sig.owner.clone()))
    }

    pub fn return_value(&self, sig: &MethodSig) -> AbstractValue<Q> {
        self.declared_type(&sig.return_annotations, &sig.return_type)
    }

    pub fn param_value(&self, sig: &MethodSig, index: usize) -> Option<AbstractValue<Q>> {
        sig.params.get(index).map(|p| self.declared_type(&p.annotations, &p.ty))
    }

    /// Declared targets of `body`. A local declared without a qualifier annotation
    /// shadows a parameter of the same name and has no declared target.
    pub fn declared_targets(&self, sig: &MethodSig, body: &Body) -> DeclaredTargets<Q> {
        let mut targets = DeclaredTargets {
            locals: FnvHashMap::default(),
            assigned: FnvHashMap::default(),
        };
        for param in &sig.params {
            targets
                .locals
                .insert(param.name.clone(), self.declared_type(&param.annotations, &param.ty));
        }
        walk_stmts(&body.stmts, &mut |stmt| {
            if let Stmt::LocalDecl {
                name,
                ty,
                annotations,
                init,
            } = stmt
            {
                if self.variant.qualifier_from_annotations(annotations, ty).is_some() {
                    let value = self.declared_type(annotations, ty);
                    if let Some(init) = init {
                        targets.assigned.insert(*init, value.clone());
                    }
                    targets.locals.insert(name.clone(), value);
                } else {
                    targets.locals.remove(name);
                }
            }
        });
        for (_, expr) in body.exprs() {
            if let ExprKind::Assign { target, value } = &expr.kind {
                if let Some(target_value) = targets.target(self, body, *target) {
                    targets.assigned.insert(*value, target_value);
                }
            }
        }
        targets
    }

    /// Declared type of `owner.field`, looked up through the class table
    pub fn field_value(&self, owner: Option<&str>, field: &str, ty: &JavaType) -> AbstractValue<Q> {
        let annotations = owner
            .and_then(|o| self.classes.field_annotations(o, field))
            .unwrap_or(&[]);
        self.declared_type(annotations, ty)
    }

    /// Flow-insensitive type of an expression
    pub fn default_value(&self, body: &Body, id: ExprId) -> Result<AbstractValue<Q>> {
        let expr = body
            .expr(id)
            .ok_or_else(|| QualflowError::internal(format!("expression {} is not in the body", id.0)))?;
        let value = match &expr.kind {
            ExprKind::Literal(literal) => self.literal_value(literal, &expr.ty),
            ExprKind::FieldAccess { receiver, field } => {
                let owner = body.expr(*receiver).and_then(|r| r.ty.simple_name());
                self.field_value(owner, field, &expr.ty)
            }
            ExprKind::MethodCall { method, .. } => {
                AbstractValue::new(self.return_value(method).qual, expr.ty.clone())
            }
            ExprKind::New { ctor, .. } => self.declared_type(&ctor.return_annotations, &expr.ty),
            _ => self.declared_type(&[], &expr.ty),
        };
        Ok(value)
    }

    /// Flow-refined type of an expression after analysis
    pub fn annotated_type(&self, analysis: &AnalysisResult<Q>, body: &Body, id: ExprId) -> Result<AbstractValue<Q>> {
        match analysis.value_of(id) {
            Some(value) => Ok(value.clone()),
            None => self.default_value(body, id),
        }
    }

    pub fn store_before<'r>(&self, analysis: &'r AnalysisResult<Q>, id: ExprId) -> Option<&'r Store<Q>> {
        analysis.store_before_expr(id)
    }

    pub fn store_after<'r>(&self, analysis: &'r AnalysisResult<Q>, node: NodeId) -> Option<&'r Store<Q>> {
        analysis.store_after(node)
    }

    /// Contracts declared on `sig`, computed once per signature
    pub fn contracts_for(&self, sig: &MethodSig) -> Arc<Vec<Contract<Q>>> {
        let key = sig.qualified_name();
        let mut cache = self.contracts.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            cache
                .entry(key)
                .or_insert_with(|| Arc::new(self.variant.contracts(sig))),
        )
    }

    /// Qualifiers of a call as the checker instantiates it
    pub fn instantiate_call(
        &self,
        sig: &MethodSig,
        args: &[AbstractValue<Q>],
        assigned: Option<&AbstractValue<Q>>,
    ) -> Result<CallSignature<Q>> {
        self.variant.instantiate_call(self, sig, args, assigned)
    }

    /// Declared call qualifiers, with method type parameters inferred from the arguments
    /// and the assignment context
    pub fn declared_call(
        &self,
        sig: &MethodSig,
        args: &[AbstractValue<Q>],
        assigned: Option<&AbstractValue<Q>>,
    ) -> Result<CallSignature<Q>> {
        let receiver = (!sig.is_static && !sig.is_constructor).then(|| self.receiver_value(sig).qual);
        if sig.type_params.is_empty() {
            return Ok(CallSignature {
                receiver,
                params: sig
                    .params
                    .iter()
                    .map(|p| self.declared_qualifier(&p.annotations, &p.ty))
                    .collect(),
                ret: self.return_value(sig).qual,
            });
        }

        let h = self.hierarchy();
        let targets: Vec<String> = sig.type_params.iter().map(|tp| tp.name.clone()).collect();
        let mut domain = TypeDomain::new(h);
        for tp in &sig.type_params {
            let bounds = TargetBounds {
                lower: self
                    .variant
                    .qualifier_from_annotations(&tp.lower_annotations, &tp.upper)
                    .unwrap_or_else(|| h.bottom()),
                upper: self.declared_qualifier(&tp.upper_annotations, &tp.upper),
                ty: tp.upper.clone(),
            };
            domain = domain.with_bounds(tp.name.clone(), bounds);
        }

        let nested = |ty: &JavaType| self.declared_qualifier(&[], ty);
        let formal = |annotations: &[Annotation], ty: &JavaType| match (ty, self.variant.qualifier_from_annotations(annotations, ty)) {
            // An annotated use of a type variable fixes the qualifier
            (JavaType::TypeVar(_), Some(qual)) => QualType::Simple { qual, ty: ty.clone() },
            _ => QualType::from_java(ty, self.declared_qualifier(annotations, ty), &nested, &targets),
        };
        let formals: Vec<QualType<Q>> = sig.params.iter().map(|p| formal(&p.annotations, &p.ty)).collect();
        let ret = formal(&sig.return_annotations, &sig.return_type);
        let actuals: Vec<QualType<Q>> = args
            .iter()
            .map(|a| QualType::from_java(&a.ty, a.qual.clone(), &nested, &[]))
            .collect();
        let assignment: Vec<_> = assigned
            .map(|a| (ret.clone(), QualType::from_java(&a.ty, a.qual.clone(), &nested, &[])))
            .into_iter()
            .collect();

        let solution = TypeArgInference::new(&domain, targets.clone())
            .show_steps(self.config.show_inference_steps)
            .infer(&actuals, &formals, &assignment)
            .into_result()?;
        let qual_of = |value: &QualType<Q>| {
            domain
                .substitute(value, &solution)
                .qual()
                .cloned()
                .unwrap_or_else(|| h.top())
        };
        Ok(CallSignature {
            receiver,
            params: formals.iter().map(qual_of).collect(),
            ret: qual_of(&ret),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::testing::{make_factory, make_factory_with, Taint};
    use crate::hir::{BodyBuilder, ClassDecl, ClassTable, CompilationUnit, FieldDecl, Param, TypeParam};

    fn untainted() -> Annotation {
        Annotation::marker("Untainted")
    }

    #[test]
    fn test_declared_and_default_types() {
        let factory = make_factory();
        assert_eq!(factory.declared_qualifier(&[untainted()], &JavaType::string()), Taint::Untainted);
        assert_eq!(factory.declared_qualifier(&[], &JavaType::string()), Taint::Tainted);
        let lit = factory.literal_value(&Literal::Str("x".into()), &JavaType::string());
        assert_eq!(lit.qual, Taint::Untainted);
    }

    #[test]
    fn test_field_annotations_through_class_table() {
        let mut classes = ClassTable::new();
        classes.register_unit(&CompilationUnit::new("A.java").with_class(ClassDecl::new("A").with_field(FieldDecl {
            name: "safe".into(),
            ty: JavaType::string(),
            annotations: vec![untainted()],
        })));
        let factory = make_factory_with(classes);

        let mut b = BodyBuilder::new();
        let this = b.this("A");
        let field = b.field(this, "safe", JavaType::string());
        let body = b.finish();
        assert_eq!(factory.default_value(&body, field).unwrap().qual, Taint::Untainted);
        assert!(factory.default_value(&body, ExprId(99)).is_err());
    }

    #[test]
    fn test_generic_call_infers_from_arguments() {
        let factory = make_factory();
        let sig = MethodSig::new("Util", "id")
            .static_method()
            .with_type_param(TypeParam::new("T"))
            .with_param(Param::new("x", JavaType::TypeVar("T".into())))
            .returning(JavaType::TypeVar("T".into()));
        let arg = AbstractValue::new(Taint::Untainted, JavaType::string());
        let call = factory.declared_call(&sig, &[arg], None).unwrap();
        assert_eq!(call.ret, Taint::Untainted);
        assert_eq!(call.params, vec![Taint::Untainted]);
        assert_eq!(call.receiver, None);
    }

    #[test]
    fn test_generic_type_arguments_unify() {
        let factory = make_factory();
        let t = JavaType::TypeVar("T".into());
        let list_t = JavaType::generic("List", vec![t.clone()]);
        let sig = MethodSig::new("Util", "same")
            .static_method()
            .with_type_param(TypeParam::new("T"))
            .with_param(Param::new("a", list_t.clone()))
            .with_param(Param::new("b", list_t));
        let list = JavaType::generic("List", vec![JavaType::string()]);
        let args = [
            AbstractValue::new(Taint::Tainted, list.clone()),
            AbstractValue::new(Taint::Tainted, list),
        ];
        // Both arguments default their type argument to @Tainted
        let call = factory.declared_call(&sig, &args, None).unwrap();
        assert_eq!(call.params, vec![Taint::Tainted, Taint::Tainted]);
    }

    #[test]
    fn test_contracts_are_cached() {
        let factory = make_factory();
        let sig = MethodSig::new("A", "m").with_annotation(
            Annotation::marker("EnsuresUntainted")
                .with_arg("value", crate::hir::AnnotationValue::Str("this".into())),
        );
        let first = factory.contracts_for(&sig);
        let second = factory.contracts_for(&sig);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
    }
}
