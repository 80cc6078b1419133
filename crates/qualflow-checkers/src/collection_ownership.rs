//! Collection Ownership checker
//!
//! Tracks which reference owns a collection of resources, i.e. which one is responsible
//! for closing the elements. Ownership moves on assignment and when the collection is
//! passed to an `@OwningCollection` parameter; the previous holder is left with
//! `@NotOwningCollection`.
//!
//! A *resource collection* is an array or a `java.util` collection whose element type is
//! one of the checker's resource types.

use qualflow_core::checker::{
    CallSignature, CheckerVariant, ContractTarget, Diagnostic, QualifiedTypeFactory, VisitContext, VisitorRule,
};
use qualflow_core::dataflow::{
    defaults, AbstractValue, CallSite, FlowExpr, TransferContext, TransferFunction, TransferInput, TransferResult,
};
use qualflow_core::error::Result;
use qualflow_core::hir::{find_annotation, Annotation, Body, ExprId, ExprKind, JavaType, Literal, MethodSig};
use qualflow_core::lattice::{DynHierarchy, GraphHierarchyBuilder};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Key reported when ownership would be moved out of a field
pub const FIELD_OWNERSHIP: &str = "transfer.owningcollection.field.ownership";

const COLLECTION_TYPES: &[&str] = &[
    "Collection",
    "List",
    "ArrayList",
    "LinkedList",
    "Vector",
    "Set",
    "HashSet",
    "LinkedHashSet",
    "TreeSet",
    "Queue",
    "Deque",
    "ArrayDeque",
    "PriorityQueue",
];

const RESOURCE_TYPES: &[&str] = &[
    "AutoCloseable",
    "Closeable",
    "Socket",
    "ServerSocket",
    "InputStream",
    "OutputStream",
    "FileInputStream",
    "FileOutputStream",
    "Reader",
    "Writer",
    "BufferedReader",
    "BufferedWriter",
    "Connection",
    "Statement",
    "ResultSet",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ownership {
    NotOwning,
    Owning,
    /// Owns the collection but the elements carry no obligation yet
    OwningWithoutObligation,
    Bottom,
}

impl Ownership {
    pub fn is_owning(self) -> bool {
        matches!(self, Ownership::Owning | Ownership::OwningWithoutObligation)
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::NotOwning => write!(f, "@NotOwningCollection"),
            Ownership::Owning => write!(f, "@OwningCollection"),
            Ownership::OwningWithoutObligation => write!(f, "@OwningCollectionWithoutObligation"),
            Ownership::Bottom => write!(f, "@OwningCollectionBottom"),
        }
    }
}

/// Element types whose instances must be closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypes(BTreeSet<String>);

impl Default for ResourceTypes {
    fn default() -> Self {
        Self(RESOURCE_TYPES.iter().map(|t| t.to_string()).collect())
    }
}

impl ResourceTypes {
    fn is_resource(&self, ty: &JavaType) -> bool {
        ty.simple_name().is_some_and(|n| self.0.contains(n))
    }

    /// Arrays and collections of resources
    pub fn is_resource_collection(&self, ty: &JavaType) -> bool {
        match ty {
            JavaType::Array(component) => self.is_resource(component),
            JavaType::Declared { type_args, .. } => {
                let is_collection = ty.simple_name().is_some_and(|n| COLLECTION_TYPES.contains(&n));
                is_collection && type_args.first().is_some_and(|t| self.is_resource(t))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectionOwnershipChecker {
    resources: Arc<ResourceTypes>,
}

impl CollectionOwnershipChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat elements of type `name` as resources
    pub fn with_resource_type(mut self, name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.resources).0.insert(name.into());
        self
    }

    pub fn is_resource_collection(&self, ty: &JavaType) -> bool {
        self.resources.is_resource_collection(ty)
    }
}

impl CheckerVariant for CollectionOwnershipChecker {
    type Qual = Ownership;

    fn name(&self) -> &'static str {
        "collectionownership"
    }

    fn create_hierarchy(&self) -> Result<Box<DynHierarchy<Ownership>>> {
        Ok(Box::new(
            GraphHierarchyBuilder::new()
                .subtype(Ownership::Owning, Ownership::NotOwning)
                .subtype(Ownership::OwningWithoutObligation, Ownership::Owning)
                .subtype(Ownership::Bottom, Ownership::OwningWithoutObligation)
                .build()?,
        ))
    }

    fn create_transfer(&self, factory: Arc<QualifiedTypeFactory<Ownership>>) -> Box<dyn TransferFunction<Ownership>> {
        Box::new(CollectionOwnershipTransfer {
            factory,
            resources: Arc::clone(&self.resources),
        })
    }

    fn qualifier_from_annotations(&self, annotations: &[Annotation], _ty: &JavaType) -> Option<Ownership> {
        annotations.iter().find_map(|a| match a.name.rsplit('.').next()? {
            "NotOwningCollection" => Some(Ownership::NotOwning),
            "OwningCollection" => Some(Ownership::Owning),
            "OwningCollectionWithoutObligation" => Some(Ownership::OwningWithoutObligation),
            "OwningCollectionBottom" => Some(Ownership::Bottom),
            _ => None,
        })
    }

    fn literal_qualifier(&self, literal: &Literal, _ty: &JavaType, hierarchy: &DynHierarchy<Ownership>) -> Ownership {
        match literal {
            Literal::Null => hierarchy.bottom(),
            _ => hierarchy.top(),
        }
    }

    /// Unannotated methods returning a resource collection hand ownership to the caller
    fn instantiate_call(
        &self,
        factory: &QualifiedTypeFactory<Ownership>,
        sig: &MethodSig,
        args: &[AbstractValue<Ownership>],
        assigned: Option<&AbstractValue<Ownership>>,
    ) -> Result<CallSignature<Ownership>> {
        let mut call = factory.declared_call(sig, args, assigned)?;
        let annotated = self
            .qualifier_from_annotations(&sig.return_annotations, &sig.return_type)
            .is_some();
        if !annotated && self.is_resource_collection(&sig.return_type) {
            call.ret = if sig.is_constructor {
                Ownership::OwningWithoutObligation
            } else {
                Ownership::Owning
            };
        }
        Ok(call)
    }

    fn visitor_rules(&self) -> Vec<Box<dyn VisitorRule<Ownership>>> {
        vec![Box::new(FieldOwnershipRule)]
    }
}

/// Whether passing an `arg`-qualified collection to a `param`-qualified parameter moves ownership
fn transfers_ownership(param: Ownership, arg: Ownership) -> bool {
    match param {
        Ownership::Owning => arg.is_owning(),
        Ownership::OwningWithoutObligation => arg == Ownership::OwningWithoutObligation,
        _ => false,
    }
}

fn is_field_access(body: &Body, id: ExprId) -> bool {
    matches!(body.kind(body.skip_parens(id)), Some(ExprKind::FieldAccess { .. }))
}

pub struct CollectionOwnershipTransfer {
    factory: Arc<QualifiedTypeFactory<Ownership>>,
    resources: Arc<ResourceTypes>,
}

impl CollectionOwnershipTransfer {
    fn assume_pure(&self) -> bool {
        self.factory.config().assume_side_effect_free
    }

    /// Whether `id` reads a field declared as an owning collection
    fn is_owning_field(&self, ctx: &TransferContext<'_, Ownership>, id: ExprId) -> Result<bool> {
        let id = ctx.body.skip_parens(id);
        let Some(ExprKind::FieldAccess { receiver, field }) = ctx.body.kind(id) else {
            return Ok(false);
        };
        let owner = ctx.expr(*receiver)?.ty.simple_name();
        let declared = self.factory.field_value(owner, field, &ctx.expr(id)?.ty);
        Ok(declared.qual.is_owning())
    }

    /// Overwrite `flow` with `qual` in every normal-completion store
    fn replace(
        result: TransferResult<Ownership>,
        flow: &FlowExpr,
        qual: Ownership,
        ty: &JavaType,
    ) -> TransferResult<Ownership> {
        result.map_stores(|store| store.replace_value(flow.clone(), AbstractValue::new(qual, ty.clone())))
    }

    /// Ownership moves from `value` into `target`, unless `value` is an owning field, in
    /// which case the target only borrows it
    fn transfer_assignment(
        &self,
        ctx: &TransferContext<'_, Ownership>,
        target: FlowExpr,
        target_ty: &JavaType,
        value: ExprId,
        result: TransferResult<Ownership>,
    ) -> Result<TransferResult<Ownership>> {
        let rhs = defaults::operand_value(&self.factory, ctx, value)?;
        if !rhs.qual.is_owning() {
            return Ok(result);
        }
        if self.is_owning_field(ctx, value)? {
            return Ok(Self::replace(result, &target, Ownership::NotOwning, target_ty));
        }
        match FlowExpr::from_expr(ctx.body, value, self.assume_pure()) {
            Some(source) => {
                debug!(from = %source, to = %target, "ownership transferred by assignment");
                Ok(Self::replace(result, &source, Ownership::NotOwning, &rhs.ty))
            }
            None => Ok(result),
        }
    }

    fn transfer_arguments(
        &self,
        ctx: &TransferContext<'_, Ownership>,
        call: &CallSite<'_>,
        mut result: TransferResult<Ownership>,
    ) -> Result<TransferResult<Ownership>> {
        for (i, arg) in call.args.iter().enumerate() {
            let Some(param) = self.factory.param_value(call.method, i) else {
                break;
            };
            let value = defaults::operand_value(&self.factory, ctx, *arg)?;
            // Field arguments are reported by the visitor and keep their ownership
            if !transfers_ownership(param.qual, value.qual) || is_field_access(ctx.body, *arg) {
                continue;
            }
            if let Some(flow) = FlowExpr::from_expr(ctx.body, *arg, self.assume_pure()) {
                debug!(arg = %flow, method = %call.method.name, "ownership transferred to callee");
                result = Self::replace(result, &flow, Ownership::NotOwning, &value.ty);
            }
        }
        Ok(result)
    }

    fn field_type(&self, owner: &str, field: &str) -> JavaType {
        self.factory
            .classes()
            .class(owner)
            .and_then(|c| c.field(field))
            .map(|f| f.ty.clone())
            .unwrap_or_else(|| JavaType::declared("Object"))
    }
}

impl TransferFunction<Ownership> for CollectionOwnershipTransfer {
    fn factory(&self) -> &QualifiedTypeFactory<Ownership> {
        &self.factory
    }

    fn visit_assign(
        &self,
        ctx: &TransferContext<'_, Ownership>,
        id: ExprId,
        target: ExprId,
        value: ExprId,
        input: TransferInput<Ownership>,
    ) -> Result<TransferResult<Ownership>> {
        let result = defaults::visit_assign(&self.factory, ctx, id, target, value, input)?;
        match FlowExpr::from_expr(ctx.body, target, false) {
            Some(flow) => self.transfer_assignment(ctx, flow, &ctx.expr(target)?.ty, value, result),
            None => Ok(result),
        }
    }

    fn visit_local_decl(
        &self,
        ctx: &TransferContext<'_, Ownership>,
        name: &str,
        ty: &JavaType,
        annotations: &[Annotation],
        init: Option<ExprId>,
        input: TransferInput<Ownership>,
    ) -> Result<TransferResult<Ownership>> {
        let result = defaults::visit_local_decl(&self.factory, ctx, name, ty, annotations, init, input)?;
        match init {
            Some(init) => self.transfer_assignment(ctx, FlowExpr::local(name), ty, init, result),
            None => Ok(result),
        }
    }

    fn visit_method_call(
        &self,
        ctx: &TransferContext<'_, Ownership>,
        call: &CallSite<'_>,
        input: TransferInput<Ownership>,
    ) -> Result<TransferResult<Ownership>> {
        let result = defaults::visit_call(&self.factory, ctx, call, input)?;
        let mut result = self.transfer_arguments(ctx, call, result)?;
        let sig: &MethodSig = call.method;

        if let (true, Some(receiver)) = (sig.has_annotation("CreatesCollectionObligation"), call.receiver) {
            let value = defaults::operand_value(&self.factory, ctx, receiver)?;
            let flow = FlowExpr::from_expr(ctx.body, receiver, self.assume_pure());
            if let (Ownership::OwningWithoutObligation, Some(flow)) = (value.qual, flow) {
                result = Self::replace(result, &flow, Ownership::Owning, &value.ty);
            }
        }

        if let Some(destructor) = find_annotation(&sig.annotations, "CollectionFieldDestructor") {
            for expression in destructor.str_list_arg("value") {
                let target = match ContractTarget::parse(&expression, sig) {
                    Ok(target @ ContractTarget::ReceiverField(_)) => target,
                    _ => continue,
                };
                let ContractTarget::ReceiverField(field) = &target else { continue };
                let Some(flow) = target.at_call_site(ctx.body, call.receiver, call.args, self.assume_pure()) else {
                    continue;
                };
                let ty = self.field_type(&sig.owner, field);
                result = Self::replace(result, &flow, Ownership::OwningWithoutObligation, &ty);
            }
        }
        Ok(result)
    }

    /// Newly created resource collections are owned, with nothing to close yet
    fn visit_new_object(
        &self,
        ctx: &TransferContext<'_, Ownership>,
        call: &CallSite<'_>,
        input: TransferInput<Ownership>,
    ) -> Result<TransferResult<Ownership>> {
        let result = defaults::visit_call(&self.factory, ctx, call, input)?;
        let mut result = self.transfer_arguments(ctx, call, result)?;
        let ty = ctx.expr(call.id)?.ty.clone();
        let annotated = !call.method.return_annotations.is_empty();
        if !annotated && self.resources.is_resource_collection(&ty) {
            let value = AbstractValue::new(Ownership::OwningWithoutObligation, ty);
            result = Self::replace(result, &FlowExpr::temp_for(call.id), value.qual, &value.ty);
            result.set_value(Some(value));
        }
        Ok(result)
    }
}

/// Ownership cannot be moved out of a field into a callee
struct FieldOwnershipRule;

impl VisitorRule<Ownership> for FieldOwnershipRule {
    fn name(&self) -> &'static str {
        "collectionownership.field-ownership"
    }

    fn check_expr(&self, cx: &mut VisitContext<'_, Ownership>, id: ExprId) -> Result<()> {
        let (method, args) = match cx.body.kind(id) {
            Some(ExprKind::MethodCall { method, args, .. }) => (method, args),
            Some(ExprKind::New { ctor, args }) => (ctor, args),
            _ => return Ok(()),
        };
        for (i, arg) in args.iter().enumerate() {
            let Some(param) = cx.factory.param_value(method, i) else {
                break;
            };
            if !is_field_access(cx.body, *arg) {
                continue;
            }
            let found = cx.value_of(*arg)?.qual;
            if transfers_ownership(param.qual, found) {
                let message = format!(
                    "ownership of {} cannot be transferred out of a field",
                    cx.body.render(*arg)
                );
                cx.report_at(*arg, Diagnostic::error(FIELD_OWNERSHIP, message).with_types(param.qual, found));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualflow_core::checker::{keys, AnalysisSession};
    use qualflow_core::config::AnalysisConfig;
    use qualflow_core::hir::{BodyBuilder, ClassDecl, CompilationUnit, FieldDecl, MethodDecl, Param};

    fn sockets() -> JavaType {
        JavaType::generic("List", vec![JavaType::declared("Socket")])
    }

    fn make_ctor() -> Arc<MethodSig> {
        let mut sig = MethodSig::constructor("ArrayList");
        sig.return_type = JavaType::declared("ArrayList");
        sig.arc()
    }

    fn make_consume() -> Arc<MethodSig> {
        MethodSig::new("Pool", "adopt")
            .static_method()
            .with_param(Param::new("sockets", sockets()).annotated(Annotation::marker("OwningCollection")))
            .arc()
    }

    fn make_class(methods: Vec<MethodDecl>) -> ClassDecl {
        let mut class = ClassDecl::new("Server").with_field(FieldDecl {
            name: "open".into(),
            ty: sockets(),
            annotations: vec![Annotation::marker("OwningCollection")],
        });
        for method in methods {
            class = class.with_method(method);
        }
        class
    }

    fn analyze(method: MethodDecl) -> (Vec<Diagnostic>, qualflow_core::checker::AnalyzedMethod<Ownership>) {
        let unit = CompilationUnit::new("Server.java").with_class(make_class(vec![method]));
        let mut session = AnalysisSession::new(CollectionOwnershipChecker::new(), AnalysisConfig::default());
        let mut analyzed = session.analyze_methods(&unit).unwrap();
        let method = analyzed.remove(0);
        (method.diagnostics.clone(), method)
    }

    fn qual_at(method: &qualflow_core::checker::AnalyzedMethod<Ownership>, id: ExprId) -> Ownership {
        method.result.as_ref().unwrap().value_of(id).unwrap().qual
    }

    #[test]
    fn test_hierarchy_is_a_chain() {
        let checker = CollectionOwnershipChecker::new();
        let h = checker.create_hierarchy().unwrap();
        assert_eq!(h.top(), Ownership::NotOwning);
        assert_eq!(h.bottom(), Ownership::Bottom);
        assert!(h.is_subtype(&Ownership::OwningWithoutObligation, &Ownership::Owning));
        assert!(!h.is_subtype(&Ownership::NotOwning, &Ownership::Owning));
        assert_eq!(
            h.least_upper_bound(&Ownership::Owning, &Ownership::OwningWithoutObligation),
            Ownership::Owning
        );
    }

    #[test]
    fn test_resource_collections() {
        let checker = CollectionOwnershipChecker::new();
        assert!(checker.is_resource_collection(&sockets()));
        assert!(checker.is_resource_collection(&JavaType::Array(Box::new(JavaType::declared("java.net.Socket")))));
        assert!(!checker.is_resource_collection(&JavaType::generic("List", vec![JavaType::string()])));
        assert!(!checker.is_resource_collection(&JavaType::declared("Socket")));
        let custom = CollectionOwnershipChecker::new().with_resource_type("Lease");
        assert!(custom.is_resource_collection(&JavaType::generic("Set", vec![JavaType::declared("Lease")])));
    }

    #[test]
    fn test_assignment_moves_ownership() {
        let ctor = make_ctor();
        let mut b = BodyBuilder::new();
        let created = b.new_object(&ctor, Vec::new(), JavaType::generic("ArrayList", vec![JavaType::declared("Socket")]));
        b.declare("a", sockets(), Some(created));
        let source = b.local("a", sockets());
        b.declare("b", sockets(), Some(source));
        let old = b.local("a", sockets());
        b.expr_stmt(old);
        let new = b.local("b", sockets());
        b.expr_stmt(new);

        let (diagnostics, method) = analyze(MethodDecl::new(MethodSig::new("Server", "run"), b.finish()));
        assert!(diagnostics.is_empty());
        assert_eq!(qual_at(&method, created), Ownership::OwningWithoutObligation);
        assert_eq!(qual_at(&method, old), Ownership::NotOwning);
        assert_eq!(qual_at(&method, new), Ownership::OwningWithoutObligation);
    }

    #[test]
    fn test_owning_parameter_takes_ownership() {
        let consume = make_consume();
        let mut b = BodyBuilder::new();
        let arg = b.local("mine", sockets());
        let call = b.call(None, &consume, vec![arg]);
        b.expr_stmt(call);
        let after = b.local("mine", sockets());
        b.expr_stmt(after);
        let sig = MethodSig::new("Server", "handOff")
            .with_param(Param::new("mine", sockets()).annotated(Annotation::marker("OwningCollection")));

        let (diagnostics, method) = analyze(MethodDecl::new(sig, b.finish()));
        assert!(diagnostics.is_empty());
        assert_eq!(qual_at(&method, arg), Ownership::Owning);
        assert_eq!(qual_at(&method, after), Ownership::NotOwning);
    }

    #[test]
    fn test_not_owning_argument_rejected() {
        let consume = make_consume();
        let mut b = BodyBuilder::new();
        let arg = b.local("borrowed", sockets());
        let call = b.call(None, &consume, vec![arg]);
        b.expr_stmt(call);
        let sig = MethodSig::new("Server", "steal").with_param(Param::new("borrowed", sockets()));

        let (diagnostics, _) = analyze(MethodDecl::new(sig, b.finish()));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::ARGUMENT);
    }

    #[test]
    fn test_creates_obligation() {
        let ctor = make_ctor();
        let add = MethodSig::new("List", "add")
            .with_param(Param::new("element", JavaType::declared("Socket")))
            .returning(JavaType::BOOLEAN)
            .with_annotation(Annotation::marker("CreatesCollectionObligation"))
            .arc();
        let mut b = BodyBuilder::new();
        let created = b.new_object(&ctor, Vec::new(), JavaType::generic("ArrayList", vec![JavaType::declared("Socket")]));
        b.declare("list", sockets(), Some(created));
        let receiver = b.local("list", sockets());
        let socket = b.local("s", JavaType::declared("Socket"));
        let call = b.call(Some(receiver), &add, vec![socket]);
        b.expr_stmt(call);
        let after = b.local("list", sockets());
        b.expr_stmt(after);
        let sig = MethodSig::new("Server", "fill").with_param(Param::new("s", JavaType::declared("Socket")));

        let (_, method) = analyze(MethodDecl::new(sig, b.finish()));
        assert_eq!(qual_at(&method, receiver), Ownership::OwningWithoutObligation);
        assert_eq!(qual_at(&method, after), Ownership::Owning);
    }

    #[test]
    fn test_returned_collection_is_owned() {
        let open = MethodSig::new("Server", "openAll").static_method().returning(sockets()).arc();
        let mut b = BodyBuilder::new();
        let call = b.call(None, &open, Vec::new());
        b.declare("all", sockets(), Some(call));
        let (_, method) = analyze(MethodDecl::new(MethodSig::new("Server", "start"), b.finish()));
        assert_eq!(qual_at(&method, call), Ownership::Owning);
    }

    #[test]
    fn test_field_ownership_cannot_be_passed() {
        let consume = make_consume();
        let mut b = BodyBuilder::new();
        let this = b.this("Server");
        let field = b.field(this, "open", sockets());
        let call = b.call(None, &consume, vec![field]);
        b.expr_stmt(call);

        let (diagnostics, method) = analyze(MethodDecl::new(MethodSig::new("Server", "leak"), b.finish()));
        let found: Vec<&str> = diagnostics.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(found, vec![FIELD_OWNERSHIP]);
        insta::assert_snapshot!(diagnostics[0].message, @"ownership of this.open cannot be transferred out of a field");
        assert!(method.result.is_some());
    }

    #[test]
    fn test_field_destructor_resets_obligation() {
        let destroy = MethodSig::new("Server", "closeAll")
            .with_annotation(
                Annotation::marker("CollectionFieldDestructor")
                    .with_arg("value", qualflow_core::hir::AnnotationValue::Str("this.open".into())),
            )
            .arc();
        let mut b = BodyBuilder::new();
        let this = b.this("Server");
        let call = b.call(Some(this), &destroy, Vec::new());
        b.expr_stmt(call);
        let this_again = b.this("Server");
        let field = b.field(this_again, "open", sockets());
        b.expr_stmt(field);

        let (_, method) = analyze(MethodDecl::new(MethodSig::new("Server", "shutdown"), b.finish()));
        assert_eq!(qual_at(&method, field), Ownership::OwningWithoutObligation);
    }
}
