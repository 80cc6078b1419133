//! Transfer function contract
//!
//! A [`TransferFunction`] maps the store before a CFG node to the store(s) after it.
//! Every hook has a default in [`defaults`]; a checker overrides only the node kinds it
//! cares about and may call the default first to refine (or throw away) its result.

use super::cfg::Node;
use super::store::{AbstractValue, Store};
use crate::checker::QualifiedTypeFactory;
use crate::error::{QualflowError, Result};
use crate::hir::{Annotation, BinaryOp, Body, Expr, ExprId, JavaType, Literal, MethodSig, UnaryOp};
use crate::lattice::{DynHierarchy, Qualifier};
use fnv::FnvHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Store(s) flowing into a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferInput<Q> {
    Regular(Store<Q>),
    /// Produced by a boolean expression; routed separately by the next conditional block
    Conditional { then_store: Store<Q>, else_store: Store<Q> },
}

impl<Q: Qualifier> TransferInput<Q> {
    pub fn then_store(&self) -> &Store<Q> {
        match self {
            TransferInput::Regular(store) => store,
            TransferInput::Conditional { then_store, .. } => then_store,
        }
    }

    pub fn else_store(&self) -> &Store<Q> {
        match self {
            TransferInput::Regular(store) => store,
            TransferInput::Conditional { else_store, .. } => else_store,
        }
    }

    /// The single store that holds on both branches
    pub fn regular_store(&self, h: &DynHierarchy<Q>) -> Store<Q> {
        match self {
            TransferInput::Regular(store) => store.clone(),
            TransferInput::Conditional { then_store, else_store } => then_store.least_upper_bound(else_store, h),
        }
    }

    pub fn into_regular_store(self, h: &DynHierarchy<Q>) -> Store<Q> {
        match self {
            TransferInput::Regular(store) => store,
            TransferInput::Conditional { then_store, else_store } => then_store.least_upper_bound(&else_store, h),
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, TransferInput::Conditional { .. })
    }

    /// Merge at a join point. Two conditional inputs stay conditional.
    pub fn lub(&self, other: &Self, h: &DynHierarchy<Q>) -> Self {
        match (self, other) {
            (
                TransferInput::Conditional {
                    then_store: t1,
                    else_store: e1,
                },
                TransferInput::Conditional {
                    then_store: t2,
                    else_store: e2,
                },
            ) => TransferInput::Conditional {
                then_store: t1.least_upper_bound(t2, h),
                else_store: e1.least_upper_bound(e2, h),
            },
            _ => TransferInput::Regular(self.regular_store(h).least_upper_bound(&other.regular_store(h), h)),
        }
    }
}

/// Exceptional stores keyed by exception cause
pub type ExceptionalStores<Q> = BTreeMap<String, Store<Q>>;

/// Outcome of a node: its value plus one store, or a then/else pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult<Q> {
    Regular {
        value: Option<AbstractValue<Q>>,
        store: Store<Q>,
        exceptional: Option<ExceptionalStores<Q>>,
    },
    Conditional {
        value: Option<AbstractValue<Q>>,
        then_store: Store<Q>,
        else_store: Store<Q>,
        exceptional: Option<ExceptionalStores<Q>>,
    },
}

impl<Q: Qualifier> TransferResult<Q> {
    pub fn regular(value: Option<AbstractValue<Q>>, store: Store<Q>) -> Self {
        TransferResult::Regular {
            value,
            store,
            exceptional: None,
        }
    }

    pub fn conditional(value: Option<AbstractValue<Q>>, then_store: Store<Q>, else_store: Store<Q>) -> Self {
        TransferResult::Conditional {
            value,
            then_store,
            else_store,
            exceptional: None,
        }
    }

    /// Keep the shape of `input`: a conditional input stays conditional
    pub fn from_input(value: Option<AbstractValue<Q>>, input: TransferInput<Q>) -> Self {
        match input {
            TransferInput::Regular(store) => Self::regular(value, store),
            TransferInput::Conditional { then_store, else_store } => Self::conditional(value, then_store, else_store),
        }
    }

    pub fn with_exceptional(mut self, stores: ExceptionalStores<Q>) -> Self {
        match &mut self {
            TransferResult::Regular { exceptional, .. } | TransferResult::Conditional { exceptional, .. } => {
                *exceptional = Some(stores)
            }
        }
        self
    }

    pub fn value(&self) -> Option<&AbstractValue<Q>> {
        match self {
            TransferResult::Regular { value, .. } | TransferResult::Conditional { value, .. } => value.as_ref(),
        }
    }

    pub fn set_value(&mut self, new_value: Option<AbstractValue<Q>>) {
        match self {
            TransferResult::Regular { value, .. } | TransferResult::Conditional { value, .. } => *value = new_value,
        }
    }

    pub fn exceptional(&self) -> Option<&ExceptionalStores<Q>> {
        match self {
            TransferResult::Regular { exceptional, .. } | TransferResult::Conditional { exceptional, .. } => {
                exceptional.as_ref()
            }
        }
    }

    /// Store for an exception of type `cause`, falling back to the unknown-cause entry
    pub fn exceptional_store(&self, cause: &str) -> Option<&Store<Q>> {
        let stores = self.exceptional()?;
        stores
            .get(cause)
            .or_else(|| stores.get(super::builder::UNKNOWN_CAUSE))
    }

    /// Apply `f` to every normal-completion store
    pub fn map_stores(mut self, mut f: impl FnMut(&mut Store<Q>)) -> Self {
        match &mut self {
            TransferResult::Regular { store, .. } => f(store),
            TransferResult::Conditional {
                then_store, else_store, ..
            } => {
                f(then_store);
                f(else_store);
            }
        }
        self
    }

    /// Apply `f` to every exceptional store
    pub fn map_exceptional_stores(mut self, mut f: impl FnMut(&mut Store<Q>)) -> Self {
        match &mut self {
            TransferResult::Regular { exceptional, .. } | TransferResult::Conditional { exceptional, .. } => {
                if let Some(stores) = exceptional {
                    stores.values_mut().for_each(&mut f);
                }
            }
        }
        self
    }

    pub fn into_input(self) -> TransferInput<Q> {
        match self {
            TransferResult::Regular { store, .. } => TransferInput::Regular(store),
            TransferResult::Conditional {
                then_store, else_store, ..
            } => TransferInput::Conditional { then_store, else_store },
        }
    }

    pub fn to_input(&self) -> TransferInput<Q> {
        self.clone().into_input()
    }
}

/// What a transfer hook can see besides its input store
pub struct TransferContext<'a, Q> {
    pub body: &'a Body,
    pub method: &'a MethodSig,
    pub node: &'a Node,
    values: &'a FnvHashMap<ExprId, AbstractValue<Q>>,
    assigned: Option<&'a FnvHashMap<ExprId, AbstractValue<Q>>>,
}

impl<'a, Q: Qualifier> TransferContext<'a, Q> {
    pub fn new(
        body: &'a Body,
        method: &'a MethodSig,
        node: &'a Node,
        values: &'a FnvHashMap<ExprId, AbstractValue<Q>>,
    ) -> Self {
        Self {
            body,
            method,
            node,
            values,
            assigned: None,
        }
    }

    /// Declared types that right-hand sides flow into, see
    /// [`crate::checker::DeclaredTargets::assigned`]
    pub fn with_assignments(mut self, assigned: &'a FnvHashMap<ExprId, AbstractValue<Q>>) -> Self {
        self.assigned = Some(assigned);
        self
    }

    /// Declared type of the variable or field `id` is assigned to, if any
    pub fn assignment_context(&self, id: ExprId) -> Option<&'a AbstractValue<Q>> {
        self.assigned.and_then(|a| a.get(&id))
    }

    pub fn expr(&self, id: ExprId) -> Result<&'a Expr> {
        self.body
            .expr(id)
            .ok_or_else(|| QualflowError::internal(format!("expression {} is not in the body", id.0)))
    }

    /// Value computed for an already-evaluated subexpression
    pub fn value_of(&self, id: ExprId) -> Option<&AbstractValue<Q>> {
        self.values.get(&id)
    }

    pub fn qual_of(&self, id: ExprId) -> Option<&Q> {
        self.value_of(id).map(|v| &v.qual)
    }
}

/// A method call or object creation being evaluated
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub id: ExprId,
    pub receiver: Option<ExprId>,
    pub method: &'a Arc<MethodSig>,
    pub args: &'a [ExprId],
}

/// Per-checker transfer rules. Every hook defaults to [`defaults`].
pub trait TransferFunction<Q: Qualifier>: Send + Sync {
    fn factory(&self) -> &QualifiedTypeFactory<Q>;

    fn hierarchy(&self) -> &DynHierarchy<Q> {
        self.factory().hierarchy()
    }

    /// Store at method entry: parameters, receiver, preconditions
    fn initial_store(&self, method: &MethodSig) -> Result<Store<Q>> {
        defaults::initial_store(self.factory(), method)
    }

    fn visit_literal(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        literal: &Literal,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_literal(self.factory(), ctx, id, literal, input)
    }

    fn visit_local(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        name: &str,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_tracked(self.factory(), ctx, id, name, input)
    }

    fn visit_this(&self, ctx: &TransferContext<'_, Q>, id: ExprId, input: TransferInput<Q>) -> Result<TransferResult<Q>> {
        defaults::visit_tracked(self.factory(), ctx, id, "this", input)
    }

    fn visit_field_access(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        receiver: ExprId,
        field: &str,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let _ = receiver;
        defaults::visit_tracked(self.factory(), ctx, id, field, input)
    }

    fn visit_array_access(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        array: ExprId,
        index: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let _ = (array, index);
        defaults::visit_tracked(self.factory(), ctx, id, "[]", input)
    }

    fn visit_binary(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_binary(self.factory(), ctx, id, op, lhs, rhs, input)
    }

    fn visit_unary(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        op: UnaryOp,
        operand: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_unary(self.factory(), ctx, id, op, operand, input)
    }

    fn visit_paren(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        inner: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_paren(self.factory(), ctx, id, inner, input)
    }

    fn visit_cast(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        target: &JavaType,
        inner: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_cast(self.factory(), ctx, id, target, inner, input)
    }

    fn visit_method_call(
        &self,
        ctx: &TransferContext<'_, Q>,
        call: &CallSite<'_>,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_call(self.factory(), ctx, call, input)
    }

    fn visit_new_object(
        &self,
        ctx: &TransferContext<'_, Q>,
        call: &CallSite<'_>,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_call(self.factory(), ctx, call, input)
    }

    fn visit_assign(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        target: ExprId,
        value: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_assign(self.factory(), ctx, id, target, value, input)
    }

    fn visit_compound_assign(
        &self,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        op: BinaryOp,
        target: ExprId,
        value: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_compound_assign(self.factory(), ctx, id, op, target, value, input)
    }

    fn visit_local_decl(
        &self,
        ctx: &TransferContext<'_, Q>,
        name: &str,
        ty: &JavaType,
        annotations: &[Annotation],
        init: Option<ExprId>,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_local_decl(self.factory(), ctx, name, ty, annotations, init, input)
    }

    fn visit_return(
        &self,
        ctx: &TransferContext<'_, Q>,
        value: Option<ExprId>,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        Ok(TransferResult::from_input(value.and_then(|v| ctx.value_of(v).cloned()), input))
    }

    fn visit_throw(
        &self,
        ctx: &TransferContext<'_, Q>,
        value: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let _ = (ctx, value);
        Ok(TransferResult::regular(None, input.into_regular_store(self.hierarchy())))
    }

    fn visit_catch_param(
        &self,
        ctx: &TransferContext<'_, Q>,
        name: &str,
        exception: &str,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        defaults::visit_catch_param(self.factory(), ctx, name, exception, input)
    }
}

/// The transfer function a checker gets when it overrides nothing
pub struct DefaultTransfer<Q: Qualifier> {
    factory: Arc<QualifiedTypeFactory<Q>>,
}

impl<Q: Qualifier> DefaultTransfer<Q> {
    pub fn new(factory: Arc<QualifiedTypeFactory<Q>>) -> Self {
        Self { factory }
    }
}

impl<Q: Qualifier> TransferFunction<Q> for DefaultTransfer<Q> {
    fn factory(&self) -> &QualifiedTypeFactory<Q> {
        &self.factory
    }
}

/// Default behaviour of every hook, callable from overrides
pub mod defaults {
    use super::*;
    use crate::checker::{ContractKind, ContractTarget};
    use crate::dataflow::builder::UNKNOWN_CAUSE;
    use crate::dataflow::store::FlowExpr;
    use crate::hir::ExprKind;

    pub fn initial_store<Q: Qualifier>(factory: &QualifiedTypeFactory<Q>, method: &MethodSig) -> Result<Store<Q>> {
        let h = factory.hierarchy();
        let mut store = factory.variant().create_store();
        for param in &method.params {
            let value = factory.declared_type(&param.annotations, &param.ty);
            store.insert_value(FlowExpr::local(param.name.clone()), value, h);
        }
        if !method.is_static {
            store.insert_value(FlowExpr::This, factory.receiver_value(method), h);
        }
        for contract in factory.contracts_for(method).iter() {
            if contract.kind != ContractKind::Precondition {
                continue;
            }
            let Ok(target) = ContractTarget::parse(&contract.expression, method) else {
                continue;
            };
            let ty = target.declared_type(method);
            store.insert_value(target.in_callee(method), AbstractValue::new(contract.qualifier.clone(), ty), h);
        }
        Ok(store)
    }

    /// Declared value of `id`, refined by what `store` knows about it
    pub fn flow_value<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        store: &Store<Q>,
    ) -> Result<AbstractValue<Q>> {
        let assume_pure = factory.config().assume_side_effect_free;
        if let Some(expr) = FlowExpr::from_expr(ctx.body, id, assume_pure) {
            if let Some(value) = store.get_value(&expr) {
                return Ok(value.clone());
            }
        }
        factory.default_value(ctx.body, id)
    }

    /// Value of an evaluated subexpression, or its declared value when none was recorded
    pub fn operand_value<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
    ) -> Result<AbstractValue<Q>> {
        match ctx.value_of(id) {
            Some(value) => Ok(value.clone()),
            None => factory.default_value(ctx.body, id),
        }
    }

    pub fn visit_literal<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        literal: &Literal,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let ty = &ctx.expr(id)?.ty;
        let value = factory.literal_value(literal, ty);
        Ok(TransferResult::regular(Some(value), input.into_regular_store(factory.hierarchy())))
    }

    /// Locals, `this`, fields and array elements: whatever the store knows
    pub fn visit_tracked<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        _what: &str,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let store = input.into_regular_store(factory.hierarchy());
        let value = flow_value(factory, ctx, id, &store)?;
        Ok(TransferResult::regular(Some(value), store))
    }

    pub fn visit_binary<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        // Arithmetic and concatenation carry the join of their operands
        let value = if op.is_comparison() || op.is_short_circuit() {
            factory.default_value(ctx.body, id)?
        } else {
            let h = factory.hierarchy();
            let qual = h.least_upper_bound(
                &operand_value(factory, ctx, lhs)?.qual,
                &operand_value(factory, ctx, rhs)?.qual,
            );
            AbstractValue::new(qual, ctx.expr(id)?.ty.clone())
        };
        Ok(TransferResult::regular(Some(value), input.into_regular_store(factory.hierarchy())))
    }

    /// `!` swaps the then and else stores of its operand
    pub fn visit_unary<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        op: UnaryOp,
        _operand: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let value = factory.default_value(ctx.body, id)?;
        match (op, input) {
            (UnaryOp::Not, TransferInput::Conditional { then_store, else_store }) => {
                Ok(TransferResult::conditional(Some(value), else_store, then_store))
            }
            (_, input) => Ok(TransferResult::regular(
                Some(value),
                input.into_regular_store(factory.hierarchy()),
            )),
        }
    }

    pub fn visit_paren<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        _id: ExprId,
        inner: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let value = operand_value(factory, ctx, inner)?;
        Ok(TransferResult::from_input(Some(value), input))
    }

    pub fn visit_cast<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        _id: ExprId,
        target: &JavaType,
        inner: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let inner_value = operand_value(factory, ctx, inner)?;
        let value = AbstractValue::new(inner_value.qual, target.clone());
        Ok(TransferResult::regular(Some(value), input.into_regular_store(factory.hierarchy())))
    }

    /// Resolve a contract target to the tracked expression and type at a call site
    fn actual_target<Q: Qualifier>(
        ctx: &TransferContext<'_, Q>,
        call: &CallSite<'_>,
        target: &ContractTarget,
        assume_pure: bool,
    ) -> Option<(FlowExpr, JavaType)> {
        let flow = target.at_call_site(ctx.body, call.receiver, call.args, assume_pure)?;
        let ty = match target.actual_expr(call.receiver, call.args) {
            Some(expr) => ctx.body.expr(expr)?.ty.clone(),
            None => target.declared_type(call.method),
        };
        Some((flow, ty))
    }

    /// Method calls and object creations: havoc the heap unless the callee is pure,
    /// compute the (possibly inferred) result, then establish the callee's
    /// postconditions on the actual receiver and arguments.
    pub fn visit_call<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        call: &CallSite<'_>,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let h = factory.hierarchy();
        let assume_pure = factory.config().assume_side_effect_free;
        let mut store = input.into_regular_store(h);
        store.update_for_method_call(call.method.side_effect_free || assume_pure);

        let args = call
            .args
            .iter()
            .map(|a| operand_value(factory, ctx, *a))
            .collect::<Result<Vec<_>>>()?;
        let ty = ctx.expr(call.id)?.ty.clone();
        let assigned = ctx.assignment_context(call.id);
        let mut value = match factory.instantiate_call(call.method, &args, assigned) {
            Ok(sig) => AbstractValue::new(sig.ret, ty),
            Err(QualflowError::Unsatisfiable { .. }) => factory.default_value(ctx.body, call.id)?,
            Err(other) => return Err(other),
        };
        if let Some(expr) = FlowExpr::from_expr(ctx.body, call.id, assume_pure) {
            if let Some(known) = store.get_value(&expr) {
                value = known.most_specific(&value, h);
            }
        }
        let is_new = matches!(ctx.body.kind(call.id), Some(ExprKind::New { .. }));
        if is_new {
            store.replace_value(FlowExpr::temp_for(call.id), value.clone());
        }

        let mut exceptional = store.clone();
        let mut conditional = Vec::new();
        for contract in factory.contracts_for(call.method).iter() {
            let Ok(target) = ContractTarget::parse(&contract.expression, call.method) else {
                continue;
            };
            let Some((flow, ty)) = actual_target(ctx, call, &target, assume_pure) else {
                continue;
            };
            let established = AbstractValue::new(contract.qualifier.clone(), ty);
            match contract.kind {
                ContractKind::Postcondition => store.insert_value(flow, established, h),
                ContractKind::ExceptionalPostcondition => exceptional.insert_value(flow, established, h),
                ContractKind::ConditionalPostcondition(result) => conditional.push((result, flow, established)),
                ContractKind::Precondition => {}
            }
        }

        let mut stores = BTreeMap::new();
        stores.insert(UNKNOWN_CAUSE.to_string(), exceptional);
        let result = if conditional.is_empty() {
            TransferResult::regular(Some(value), store)
        } else {
            let mut then_store = store.clone();
            let mut else_store = store;
            for (result, flow, established) in conditional {
                let target = if result { &mut then_store } else { &mut else_store };
                target.insert_value(flow, established, h);
            }
            TransferResult::conditional(Some(value), then_store, else_store)
        };
        Ok(result.with_exceptional(stores))
    }

    pub fn visit_assign<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        _id: ExprId,
        target: ExprId,
        value: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let mut store = input.into_regular_store(factory.hierarchy());
        let rhs = operand_value(factory, ctx, value)?;
        let target_ty = ctx.expr(target)?.ty.clone();
        let assigned = AbstractValue::new(rhs.qual.clone(), target_ty);
        if let Some(flow) = FlowExpr::from_expr(ctx.body, target, false) {
            store.update_for_assignment(&flow, Some(assigned.clone()));
        }
        Ok(TransferResult::regular(Some(assigned), store))
    }

    pub fn visit_compound_assign<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        id: ExprId,
        _op: BinaryOp,
        target: ExprId,
        _value: ExprId,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let mut store = input.into_regular_store(factory.hierarchy());
        let result = factory.default_value(ctx.body, id)?;
        if let Some(flow) = FlowExpr::from_expr(ctx.body, target, false) {
            store.update_for_assignment(&flow, Some(result.clone()));
        }
        Ok(TransferResult::regular(Some(result), store))
    }

    pub fn visit_local_decl<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        ctx: &TransferContext<'_, Q>,
        name: &str,
        ty: &JavaType,
        _annotations: &[Annotation],
        init: Option<ExprId>,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let mut store = input.into_regular_store(factory.hierarchy());
        let local = FlowExpr::local(name);
        match init {
            Some(init) => {
                let value = operand_value(factory, ctx, init)?;
                store.update_for_assignment(&local, Some(AbstractValue::new(value.qual, ty.clone())));
            }
            None => store.update_for_assignment(&local, None),
        }
        Ok(TransferResult::regular(None, store))
    }

    pub fn visit_catch_param<Q: Qualifier>(
        factory: &QualifiedTypeFactory<Q>,
        _ctx: &TransferContext<'_, Q>,
        name: &str,
        exception: &str,
        input: TransferInput<Q>,
    ) -> Result<TransferResult<Q>> {
        let mut store = input.into_regular_store(factory.hierarchy());
        let ty = JavaType::declared(exception);
        let value = factory.declared_type(&[], &ty);
        store.update_for_assignment(&FlowExpr::local(name), Some(value));
        Ok(TransferResult::regular(None, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::testing::{make_factory, Taint};
    use crate::dataflow::builder::UNKNOWN_CAUSE;
    use crate::dataflow::cfg::{BlockId, NodeId, NodeKind};
    use crate::dataflow::store::FlowExpr;
    use crate::hir::{AnnotationValue, BodyBuilder, Param};

    fn make_node(id: ExprId) -> Node {
        Node {
            id: NodeId(0),
            kind: NodeKind::Expr(id),
            block: BlockId(0),
        }
    }

    fn tainted_string() -> AbstractValue<Taint> {
        AbstractValue::new(Taint::Tainted, JavaType::string())
    }

    fn untainted_string() -> AbstractValue<Taint> {
        AbstractValue::new(Taint::Untainted, JavaType::string())
    }

    fn contract(name: &str, expr: &str) -> Annotation {
        Annotation::marker(name).with_arg("value", AnnotationValue::Str(expr.into()))
    }

    #[test]
    fn test_initial_store_seeds_params_and_preconditions() {
        let factory = make_factory();
        let sig = MethodSig::new("Shell", "run")
            .with_param(Param::new("cmd", JavaType::string()))
            .with_param(Param::new("safe", JavaType::string()).annotated(Annotation::marker("Untainted")))
            .with_annotation(contract("RequiresUntainted", "this.prefix"));
        let store = defaults::initial_store(&factory, &sig).unwrap();

        assert_eq!(store.get_value(&FlowExpr::local("cmd")).unwrap().qual, Taint::Tainted);
        assert_eq!(store.get_value(&FlowExpr::local("safe")).unwrap().qual, Taint::Untainted);
        assert!(store.get_value(&FlowExpr::This).is_some());
        let prefix = FlowExpr::field(FlowExpr::This, "prefix");
        assert_eq!(store.get_value(&prefix).unwrap().qual, Taint::Untainted);
    }

    #[test]
    fn test_concatenation_joins_operands() {
        let factory = make_factory();
        let mut b = BodyBuilder::new();
        let lit = b.string("ls ");
        let arg = b.local("arg", JavaType::string());
        let concat = b.binary(BinaryOp::Add, lit, arg);
        let body = b.finish();
        let sig = MethodSig::new("Shell", "run");

        let mut values = FnvHashMap::default();
        values.insert(lit, untainted_string());
        values.insert(arg, tainted_string());
        let node = make_node(concat);
        let ctx = TransferContext::new(&body, &sig, &node, &values);
        let result =
            defaults::visit_binary(&factory, &ctx, concat, BinaryOp::Add, lit, arg, TransferInput::Regular(Store::new()))
                .unwrap();
        assert_eq!(result.value().unwrap().qual, Taint::Tainted);

        values.insert(arg, untainted_string());
        let ctx = TransferContext::new(&body, &sig, &node, &values);
        let result =
            defaults::visit_binary(&factory, &ctx, concat, BinaryOp::Add, lit, arg, TransferInput::Regular(Store::new()))
                .unwrap();
        assert_eq!(result.value().unwrap().qual, Taint::Untainted);
    }

    #[test]
    fn test_not_swaps_branch_stores() {
        let factory = make_factory();
        let h = factory.hierarchy();
        let mut b = BodyBuilder::new();
        let flag = b.local("flag", JavaType::BOOLEAN);
        let not = b.not(flag);
        let body = b.finish();
        let sig = MethodSig::new("A", "m");

        let mut then_store = Store::new();
        then_store.insert_value(FlowExpr::local("s"), untainted_string(), h);
        let else_store = Store::new();
        let values = FnvHashMap::default();
        let node = make_node(not);
        let ctx = TransferContext::new(&body, &sig, &node, &values);
        let input = TransferInput::Conditional {
            then_store: then_store.clone(),
            else_store: else_store.clone(),
        };
        let result = defaults::visit_unary(&factory, &ctx, not, UnaryOp::Not, flag, input).unwrap();
        let swapped = result.into_input();
        assert_eq!(swapped.then_store(), &else_store);
        assert_eq!(swapped.else_store(), &then_store);
    }

    #[test]
    fn test_call_havocs_heap_and_establishes_contracts() {
        let factory = make_factory();
        let h = factory.hierarchy();
        let check = MethodSig::new("Util", "check")
            .static_method()
            .with_param(Param::new("x", JavaType::string()))
            .with_annotation(contract("EnsuresUntainted", "#1"))
            .with_annotation(contract("EnsuresUntaintedOnException", "x"))
            .arc();
        let mut b = BodyBuilder::new();
        let arg = b.local("s", JavaType::string());
        let call = b.call(None, &check, vec![arg]);
        let body = b.finish();
        let sig = MethodSig::new("A", "m");

        let field = FlowExpr::field(FlowExpr::This, "cache");
        let mut store = Store::new();
        store.insert_value(FlowExpr::local("s"), tainted_string(), h);
        store.insert_value(field.clone(), untainted_string(), h);

        let mut values = FnvHashMap::default();
        values.insert(arg, tainted_string());
        let node = make_node(call);
        let ctx = TransferContext::new(&body, &sig, &node, &values);
        let site = CallSite {
            id: call,
            receiver: None,
            method: &check,
            args: &[arg],
        };
        let result = defaults::visit_call(&factory, &ctx, &site, TransferInput::Regular(store)).unwrap();

        let after = result.to_input().regular_store(h);
        assert_eq!(after.get_value(&FlowExpr::local("s")).unwrap().qual, Taint::Untainted);
        assert!(after.get_value(&field).is_none());

        let exceptional = result.exceptional_store(UNKNOWN_CAUSE).unwrap();
        assert_eq!(exceptional.get_value(&FlowExpr::local("s")).unwrap().qual, Taint::Untainted);
        assert!(exceptional.get_value(&field).is_none());
        // Unknown causes fall back to the catch-all entry
        assert!(result.exceptional_store("IOException").is_some());
    }

    #[test]
    fn test_pure_call_keeps_field_facts() {
        let factory = make_factory();
        let h = factory.hierarchy();
        let getter = MethodSig::new("A", "size").pure().returning(JavaType::INT).arc();
        let mut b = BodyBuilder::new();
        let call = b.call(None, &getter, vec![]);
        let body = b.finish();
        let sig = MethodSig::new("A", "m");

        let field = FlowExpr::field(FlowExpr::This, "cache");
        let mut store = Store::new();
        store.insert_value(field.clone(), untainted_string(), h);
        let values = FnvHashMap::default();
        let node = make_node(call);
        let ctx = TransferContext::new(&body, &sig, &node, &values);
        let site = CallSite {
            id: call,
            receiver: None,
            method: &getter,
            args: &[],
        };
        let result = defaults::visit_call(&factory, &ctx, &site, TransferInput::Regular(store)).unwrap();
        assert!(result.to_input().regular_store(h).get_value(&field).is_some());
    }

    #[test]
    fn test_conditional_input_survives_paren() {
        let factory = make_factory();
        let h = factory.hierarchy();
        let mut b = BodyBuilder::new();
        let flag = b.local("flag", JavaType::BOOLEAN);
        let paren = b.paren(flag);
        let body = b.finish();
        let sig = MethodSig::new("A", "m");

        let mut then_store = Store::new();
        then_store.insert_value(FlowExpr::local("s"), untainted_string(), h);
        let mut values = FnvHashMap::default();
        values.insert(flag, AbstractValue::new(Taint::Tainted, JavaType::BOOLEAN));
        let node = make_node(paren);
        let ctx = TransferContext::new(&body, &sig, &node, &values);
        let input = TransferInput::Conditional {
            then_store,
            else_store: Store::new(),
        };
        let result = defaults::visit_paren(&factory, &ctx, paren, flag, input).unwrap();
        assert!(result.to_input().is_conditional());
        assert_eq!(result.value().unwrap().ty, JavaType::BOOLEAN);
    }
}
