//! Checks shared by every checker: assignments, arguments, returns, overrides and contracts

use super::contracts::{Contract, ContractKind, ContractTarget};
use super::diagnostics::Diagnostic;
use super::factory::{DeclaredTargets, QualifiedTypeFactory};
use super::VisitorRule;
use crate::dataflow::{AbstractValue, AnalysisResult, NodeKind, Store, TransferInput};
use crate::error::{QualflowError, Result};
use crate::hir::{Annotation, Body, Expr, ExprId, ExprKind, JavaType, Literal, MethodDecl, MethodSig, Span, Stmt};
use crate::lattice::{DynHierarchy, Qualifier};
use std::fmt;
use tracing::{debug, trace};

/// Stable message keys of the common checks
pub mod keys {
    pub const ASSIGNMENT: &str = "assignment.type.incompatible";
    pub const ARGUMENT: &str = "argument.type.incompatible";
    pub const RETURN: &str = "return.type.incompatible";
    pub const RECEIVER: &str = "method.invocation.invalid";
    pub const OVERRIDE_RETURN: &str = "override.return.invalid";
    pub const OVERRIDE_PARAM: &str = "override.param.invalid";
    pub const PRECONDITION: &str = "contracts.precondition";
    pub const POSTCONDITION: &str = "contracts.postcondition";
    pub const EXCEPTIONAL_POSTCONDITION: &str = "contracts.exceptional.postcondition";
    pub const CONDITIONAL_POSTCONDITION: &str = "contracts.conditional.postcondition";
    pub const PRECONDITION_OVERRIDE: &str = "contracts.precondition.override.invalid";
    pub const POSTCONDITION_OVERRIDE: &str = "contracts.postcondition.override.invalid";
    pub const UNSATISFIABLE: &str = "type.arguments.unsatisfiable";
    pub const MALFORMED_CONTRACT: &str = "flowexpr.parse.error";
    pub const INTERNAL: &str = "internal.error";
}

/// Visit every statement, nested ones included, in source order
pub(crate) fn walk_stmts<'s>(stmts: &'s [Stmt], f: &mut impl FnMut(&'s Stmt)) {
    for stmt in stmts {
        f(stmt);
        match stmt {
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                walk_stmts(then_branch, f);
                walk_stmts(else_branch, f);
            }
            Stmt::While { body, .. } => walk_stmts(body, f),
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                walk_stmts(body, f);
                for clause in catches {
                    walk_stmts(&clause.body, f);
                }
                if let Some(finally) = finally {
                    walk_stmts(finally, f);
                }
            }
            Stmt::Block(stmts) => walk_stmts(stmts, f),
            Stmt::LocalDecl { .. } | Stmt::Expr(_) | Stmt::Return(_) | Stmt::Throw(_) => {}
        }
    }
}

/// Everything a check needs about the method being visited
pub struct VisitContext<'a, Q: Qualifier> {
    pub factory: &'a QualifiedTypeFactory<Q>,
    pub unit: &'a str,
    pub method: &'a MethodDecl,
    pub body: &'a Body,
    pub analysis: &'a AnalysisResult<Q>,
    targets: DeclaredTargets<Q>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, Q: Qualifier> VisitContext<'a, Q> {
    pub fn new(
        factory: &'a QualifiedTypeFactory<Q>,
        unit: &'a str,
        method: &'a MethodDecl,
        body: &'a Body,
        analysis: &'a AnalysisResult<Q>,
    ) -> Self {
        Self {
            factory,
            unit,
            method,
            body,
            analysis,
            targets: factory.declared_targets(&method.sig, body),
            diagnostics: Vec::new(),
        }
    }

    pub fn sig(&self) -> &'a MethodSig {
        &self.method.sig
    }

    pub fn hierarchy(&self) -> &'a DynHierarchy<Q> {
        self.factory.hierarchy()
    }

    pub fn expr(&self, id: ExprId) -> Result<&'a Expr> {
        self.body
            .expr(id)
            .ok_or_else(|| QualflowError::internal(format!("expression {} is not in the body", id.0)))
    }

    /// Flow-refined value of `id`
    pub fn value_of(&self, id: ExprId) -> Result<AbstractValue<Q>> {
        self.factory.annotated_type(self.analysis, self.body, id)
    }

    pub fn store_before(&self, id: ExprId) -> Option<&'a Store<Q>> {
        self.factory.store_before(self.analysis, id)
    }

    /// Declared type an assignment to `target` must respect, when the target carries one
    pub fn declared_target(&self, target: ExprId) -> Option<AbstractValue<Q>> {
        self.targets.target(self.factory, self.body, target)
    }

    /// Declared type of whatever `id` is assigned to, if anything
    pub fn assignment_context(&self, id: ExprId) -> Option<&AbstractValue<Q>> {
        self.targets.assignment_context(id)
    }

    pub fn is_subtype(&self, sub: &Q, sup: &Q) -> bool {
        self.hierarchy().is_subtype(sub, sup)
    }

    /// Record a diagnostic, filling in the unit, method and span
    pub fn report(&mut self, span: Span, diagnostic: Diagnostic) {
        let diagnostic = diagnostic
            .in_unit(self.unit)
            .in_method(self.method.sig.qualified_name())
            .at(span);
        debug!(key = %diagnostic.key, span = %diagnostic.span, "diagnostic");
        self.diagnostics.push(diagnostic);
    }

    /// Record an error at expression `id`
    pub fn report_at(&mut self, id: ExprId, diagnostic: Diagnostic) {
        let span = self.body.expr(id).map(|e| e.span).unwrap_or(self.method.span);
        self.report(span, diagnostic);
    }

    /// Report `key` unless `found <: required`
    pub fn check_subtype(&mut self, id: ExprId, key: &str, found: &Q, required: &Q, message: impl fmt::Display) -> bool {
        if self.is_subtype(found, required) {
            return true;
        }
        self.report_at(id, Diagnostic::error(key, message.to_string()).with_types(required, found));
        false
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Runs the common checks and a checker's own rules over one analysed method
pub struct CommonVisitor<Q: Qualifier> {
    rules: Vec<Box<dyn VisitorRule<Q>>>,
}

impl<Q: Qualifier> CommonVisitor<Q> {
    pub fn new(rules: Vec<Box<dyn VisitorRule<Q>>>) -> Self {
        Self { rules }
    }

    pub fn visit(&self, cx: &mut VisitContext<'_, Q>) -> Result<()> {
        let body = cx.body;
        for (id, expr) in body.exprs() {
            self.check_expr(cx, id, expr)?;
            for rule in &self.rules {
                trace!(rule = rule.name(), expr = id.0, "visitor rule");
                rule.check_expr(cx, id)?;
            }
        }

        let mut decls = Vec::new();
        walk_stmts(&body.stmts, &mut |stmt| {
            if let Stmt::LocalDecl {
                name,
                ty,
                annotations,
                init: Some(init),
            } = stmt
            {
                decls.push((name, ty, annotations, *init));
            }
        });
        for (name, ty, annotations, init) in decls {
            self.check_initializer(cx, name, ty, annotations, init)?;
        }

        self.check_returns(cx)?;
        self.check_postconditions(cx)?;
        for rule in &self.rules {
            rule.check_method(cx)?;
        }
        Ok(())
    }

    fn check_expr(&self, cx: &mut VisitContext<'_, Q>, id: ExprId, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Assign { target, value } => {
                if let Some(declared) = cx.declared_target(*target) {
                    let found = cx.value_of(*value)?;
                    let rendered = cx.body.render(*target);
                    cx.check_subtype(
                        *value,
                        keys::ASSIGNMENT,
                        &found.qual,
                        &declared.qual,
                        format_args!("incompatible types in assignment to {rendered}"),
                    );
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => self.check_call(cx, id, *receiver, method, args)?,
            ExprKind::New { ctor, args } => self.check_call(cx, id, None, ctor, args)?,
            _ => {}
        }
        Ok(())
    }

    fn check_initializer(
        &self,
        cx: &mut VisitContext<'_, Q>,
        name: &str,
        ty: &JavaType,
        annotations: &[Annotation],
        init: ExprId,
    ) -> Result<()> {
        let Some(required) = cx.factory.variant().qualifier_from_annotations(annotations, ty) else {
            return Ok(());
        };
        let found = cx.value_of(init)?;
        cx.check_subtype(
            init,
            keys::ASSIGNMENT,
            &found.qual,
            &required,
            format_args!("incompatible types in initializer of {name}"),
        );
        Ok(())
    }

    fn check_call(
        &self,
        cx: &mut VisitContext<'_, Q>,
        id: ExprId,
        receiver: Option<ExprId>,
        sig: &MethodSig,
        args: &[ExprId],
    ) -> Result<()> {
        let values = args.iter().map(|a| cx.value_of(*a)).collect::<Result<Vec<_>>>()?;
        let assigned = cx.assignment_context(id).cloned();
        let call = match cx.factory.instantiate_call(sig, &values, assigned.as_ref()) {
            Ok(call) => call,
            Err(QualflowError::Unsatisfiable { target, reason }) => {
                cx.report_at(
                    id,
                    Diagnostic::error(
                        keys::UNSATISFIABLE,
                        format!("cannot infer {target} for call to {}: {reason}", sig.name),
                    ),
                );
                return Ok(());
            }
            Err(other) => return Err(other),
        };

        for ((arg, value), (param, required)) in args.iter().zip(&values).zip(sig.params.iter().zip(&call.params)) {
            cx.check_subtype(
                *arg,
                keys::ARGUMENT,
                &value.qual,
                required,
                format_args!("incompatible argument for parameter {} of {}", param.name, sig.name),
            );
        }
        if let (Some(receiver), Some(required)) = (receiver, &call.receiver) {
            let found = cx.value_of(receiver)?;
            cx.check_subtype(
                receiver,
                keys::RECEIVER,
                &found.qual,
                required,
                format_args!("call to {} not allowed on the given receiver", sig.name),
            );
        }
        self.check_preconditions(cx, id, receiver, sig, args)
    }

    fn check_preconditions(
        &self,
        cx: &mut VisitContext<'_, Q>,
        id: ExprId,
        receiver: Option<ExprId>,
        sig: &MethodSig,
        args: &[ExprId],
    ) -> Result<()> {
        let contracts = cx.factory.contracts_for(sig);
        let assume_pure = cx.factory.config().assume_side_effect_free;
        for contract in contracts.iter().filter(|c| c.kind == ContractKind::Precondition) {
            let target = match ContractTarget::parse(&contract.expression, sig) {
                Ok(target) => target,
                Err(err) => {
                    cx.report_at(id, Diagnostic::error(keys::MALFORMED_CONTRACT, err.to_string()));
                    continue;
                }
            };
            let found = match target.at_call_site(cx.body, receiver, args, assume_pure) {
                Some(flow) => match cx.store_before(id).and_then(|s| s.get_value(&flow)) {
                    Some(value) => value.qual.clone(),
                    None => self.fallback_value(cx, &target, receiver, args, sig)?,
                },
                None => self.fallback_value(cx, &target, receiver, args, sig)?,
            };
            let site = target.actual_expr(receiver, args).unwrap_or(id);
            cx.check_subtype(
                site,
                keys::PRECONDITION,
                &found,
                &contract.qualifier,
                format_args!("precondition of {} is not satisfied: {}", sig.name, contract.expression),
            );
        }
        Ok(())
    }

    /// Qualifier of a contract target the store knows nothing about
    fn fallback_value(
        &self,
        cx: &VisitContext<'_, Q>,
        target: &ContractTarget,
        receiver: Option<ExprId>,
        args: &[ExprId],
        sig: &MethodSig,
    ) -> Result<Q> {
        match (target, target.actual_expr(receiver, args)) {
            (ContractTarget::ReceiverField(field), _) => {
                let owner = match receiver {
                    Some(r) => cx.expr(r)?.ty.simple_name().map(str::to_string),
                    None => Some(cx.sig().owner.clone()),
                };
                Ok(cx
                    .factory
                    .field_value(owner.as_deref(), field, &target.declared_type(sig))
                    .qual)
            }
            (_, Some(actual)) => Ok(cx.value_of(actual)?.qual),
            (_, None) => Ok(cx.factory.receiver_value(cx.sig()).qual),
        }
    }

    fn check_returns(&self, cx: &mut VisitContext<'_, Q>) -> Result<()> {
        let sig = cx.sig();
        if sig.is_constructor || sig.return_type == JavaType::Void {
            return Ok(());
        }
        let required = cx.factory.return_value(sig).qual;
        let returned: Vec<ExprId> = cx
            .analysis
            .cfg()
            .return_nodes()
            .filter_map(|node| match node.kind {
                NodeKind::Return(Some(e)) => Some(e),
                _ => None,
            })
            .collect();
        for expr in returned {
            let found = cx.value_of(expr)?;
            cx.check_subtype(
                expr,
                keys::RETURN,
                &found.qual,
                &required,
                format_args!("incompatible types in return from {}", sig.name),
            );
        }
        Ok(())
    }

    /// Value of a contract target inside the method, from `store` or the declaration
    fn callee_value(&self, cx: &VisitContext<'_, Q>, store: &Store<Q>, target: &ContractTarget) -> Q {
        let sig = cx.sig();
        let flow = target.in_callee(sig);
        if let Some(value) = store.get_value(&flow) {
            return value.qual.clone();
        }
        match target {
            ContractTarget::Receiver => cx.factory.receiver_value(sig).qual,
            ContractTarget::Param(i) => cx
                .factory
                .param_value(sig, *i)
                .map(|v| v.qual)
                .unwrap_or_else(|| cx.hierarchy().top()),
            ContractTarget::ReceiverField(field) => {
                cx.factory
                    .field_value(Some(&sig.owner), field, &target.declared_type(sig))
                    .qual
            }
        }
    }

    fn check_postconditions(&self, cx: &mut VisitContext<'_, Q>) -> Result<()> {
        let sig = cx.sig();
        let contracts = cx.factory.contracts_for(sig);
        if contracts.iter().all(|c| c.kind == ContractKind::Precondition) {
            return Ok(());
        }
        let returns: Vec<(Option<ExprId>, Option<TransferInput<Q>>)> = cx
            .analysis
            .cfg()
            .return_nodes()
            .map(|node| {
                let expr = match node.kind {
                    NodeKind::Return(e) => e,
                    _ => None,
                };
                (expr, cx.analysis.input_before(node.id).cloned())
            })
            .collect();

        for contract in contracts.iter() {
            let target = match ContractTarget::parse(&contract.expression, sig) {
                Ok(target) => target,
                Err(err) => {
                    cx.report(cx.method.span, Diagnostic::error(keys::MALFORMED_CONTRACT, err.to_string()));
                    continue;
                }
            };
            match contract.kind {
                ContractKind::Precondition => {}
                ContractKind::Postcondition => {
                    let Some(exit) = cx.analysis.regular_exit_store() else { continue };
                    if cx.is_subtype(&self.callee_value(cx, exit, &target), &contract.qualifier) {
                        continue;
                    }
                    // Blame the returns that miss it, or the method when the failure is a fall-through
                    let mut blamed = false;
                    for (expr, input) in &returns {
                        let Some(input) = input else { continue };
                        let store = input.regular_store(cx.hierarchy());
                        if let (Some(expr), false) = (expr, cx.is_subtype(&self.callee_value(cx, &store, &target), &contract.qualifier)) {
                            self.check_established(cx, Some(*expr), &store, &target, contract, keys::POSTCONDITION);
                            blamed = true;
                        }
                    }
                    if !blamed {
                        self.check_established(cx, None, exit, &target, contract, keys::POSTCONDITION);
                    }
                }
                ContractKind::ConditionalPostcondition(result) => {
                    for (expr, input) in &returns {
                        let (Some(expr), Some(input)) = (expr, input) else { continue };
                        let store = match cx.body.kind(cx.body.skip_parens(*expr)) {
                            // Only the matching literal result can establish it
                            Some(ExprKind::Literal(Literal::Bool(value))) if *value != result => continue,
                            Some(ExprKind::Literal(Literal::Bool(_))) => input.regular_store(cx.hierarchy()),
                            _ if result => input.then_store().clone(),
                            _ => input.else_store().clone(),
                        };
                        self.check_established(
                            cx,
                            Some(*expr),
                            &store,
                            &target,
                            contract,
                            keys::CONDITIONAL_POSTCONDITION,
                        );
                    }
                }
                ContractKind::ExceptionalPostcondition => {
                    if !cx.factory.config().check_exceptional_postconditions {
                        continue;
                    }
                    if let Some(store) = cx.analysis.exceptional_exit_store().cloned() {
                        self.check_established(
                            cx,
                            None,
                            &store,
                            &target,
                            contract,
                            keys::EXCEPTIONAL_POSTCONDITION,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn check_established(
        &self,
        cx: &mut VisitContext<'_, Q>,
        at: Option<ExprId>,
        store: &Store<Q>,
        target: &ContractTarget,
        contract: &Contract<Q>,
        key: &str,
    ) {
        let found = self.callee_value(cx, store, target);
        if cx.is_subtype(&found, &contract.qualifier) {
            return;
        }
        let message = format!(
            "{} of {} is not established: {}",
            contract.kind,
            cx.sig().name,
            contract.expression
        );
        let diagnostic = Diagnostic::error(key, message).with_types(&contract.qualifier, &found);
        match at {
            Some(id) => cx.report_at(id, diagnostic),
            None => cx.report(cx.method.span, diagnostic),
        }
    }
}

/// Override checks for one declared method: covariant return, contravariant
/// parameters, postconditions at least as strong and preconditions at most as strong
pub fn check_overrides<Q: Qualifier>(
    factory: &QualifiedTypeFactory<Q>,
    unit: &str,
    method: &MethodDecl,
) -> Vec<Diagnostic> {
    let h = factory.hierarchy();
    let sig: &MethodSig = &method.sig;
    let mut out = Vec::new();
    let mut report = |key: &str, message: String, expected: &Q, found: &Q| {
        out.push(
            Diagnostic::error(key, message)
                .with_types(expected, found)
                .in_unit(unit)
                .in_method(sig.qualified_name())
                .at(method.span),
        );
    };

    for overridden in factory.classes().overridden_methods(sig) {
        let overridden: &MethodSig = &overridden;
        let ret = factory.return_value(sig).qual;
        let overridden_ret = factory.return_value(overridden).qual;
        if sig.return_type != JavaType::Void && !h.is_subtype(&ret, &overridden_ret) {
            report(
                keys::OVERRIDE_RETURN,
                format!("{} overrides {} with an incompatible return", sig.name, overridden.qualified_name()),
                &overridden_ret,
                &ret,
            );
        }
        for (i, param) in sig.params.iter().enumerate() {
            let (Some(own), Some(theirs)) = (factory.param_value(sig, i), factory.param_value(overridden, i)) else {
                continue;
            };
            if !h.is_subtype(&theirs.qual, &own.qual) {
                report(
                    keys::OVERRIDE_PARAM,
                    format!("parameter {} of {} is incompatible with {}", param.name, sig.name, overridden.qualified_name()),
                    &theirs.qual,
                    &own.qual,
                );
            }
        }

        let own = factory.contracts_for(sig);
        let theirs = factory.contracts_for(overridden);
        let resolve = |contract: &Contract<Q>, on: &MethodSig| ContractTarget::parse(&contract.expression, on).ok();

        // Every inherited postcondition must be implied by one of ours
        for inherited in theirs.iter().filter(|c| c.kind.is_postcondition()) {
            let Some(target) = resolve(inherited, overridden) else { continue };
            let strongest = own
                .iter()
                .filter(|c| c.kind == inherited.kind && resolve(c, sig).as_ref() == Some(&target))
                .map(|c| c.qualifier.clone())
                .find(|q| h.is_subtype(q, &inherited.qualifier));
            if strongest.is_none() {
                let found = own
                    .iter()
                    .find(|c| c.kind == inherited.kind && resolve(c, sig).as_ref() == Some(&target))
                    .map(|c| c.qualifier.clone())
                    .unwrap_or_else(|| h.top());
                report(
                    keys::POSTCONDITION_OVERRIDE,
                    format!(
                        "{} of {} on {} is weaker than in {}",
                        inherited.kind,
                        sig.name,
                        inherited.expression,
                        overridden.qualified_name()
                    ),
                    &inherited.qualifier,
                    &found,
                );
            }
        }

        // Every precondition of ours must be implied by an inherited one
        for required in own.iter().filter(|c| c.kind == ContractKind::Precondition) {
            let Some(target) = resolve(required, sig) else { continue };
            let satisfied = theirs.iter().any(|c| {
                c.kind == ContractKind::Precondition
                    && resolve(c, overridden).as_ref() == Some(&target)
                    && h.is_subtype(&c.qualifier, &required.qualifier)
            });
            if !satisfied {
                report(
                    keys::PRECONDITION_OVERRIDE,
                    format!(
                        "precondition of {} on {} is stronger than in {}",
                        sig.name,
                        required.expression,
                        overridden.qualified_name()
                    ),
                    &h.top(),
                    &required.qualifier,
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::testing::{make_factory, make_factory_with, Taint};
    use crate::dataflow::{CfgBuilder, ForwardAnalysis};
    use crate::hir::{AnnotationValue, BodyBuilder, ClassDecl, ClassTable, CompilationUnit, Param};
    use std::sync::Arc;

    fn untainted() -> Annotation {
        Annotation::marker("Untainted")
    }

    fn make_sink() -> Arc<MethodSig> {
        MethodSig::new("Db", "exec")
            .static_method()
            .with_param(Param::new("q", JavaType::string()).annotated(untainted()))
            .arc()
    }

    fn run(factory: &Arc<QualifiedTypeFactory<Taint>>, method: &MethodDecl) -> Vec<Diagnostic> {
        let body = method.body.as_ref().unwrap();
        let cfg = CfgBuilder::build(body).unwrap();
        let transfer = factory.variant().create_transfer(Arc::clone(factory));
        let result = ForwardAnalysis::new(&*transfer).run(&cfg, body, &method.sig).unwrap();
        let mut cx = VisitContext::new(factory, "Test.java", method, body, &result);
        CommonVisitor::new(Vec::new()).visit(&mut cx).unwrap();
        cx.into_diagnostics()
    }

    #[test]
    fn test_tainted_argument_reported() {
        let factory = make_factory();
        let sink = make_sink();
        let mut b = BodyBuilder::new();
        let input = b.local("input", JavaType::string());
        let call = b.call(None, &sink, vec![input]);
        b.expr_stmt(call);
        let sig = MethodSig::new("Test", "run").with_param(Param::new("input", JavaType::string()));
        let method = MethodDecl::new(sig, b.finish());

        let diagnostics = run(&factory, &method);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::ARGUMENT);
        assert_eq!(diagnostics[0].found.as_deref(), Some("@Tainted"));
    }

    #[test]
    fn test_literal_concat_is_clean() {
        let factory = make_factory();
        let sink = make_sink();
        let mut b = BodyBuilder::new();
        let a = b.string("select ");
        let c = b.string("1");
        let q = b.binary(crate::hir::BinaryOp::Add, a, c);
        let call = b.call(None, &sink, vec![q]);
        b.expr_stmt(call);
        let method = MethodDecl::new(MethodSig::new("Test", "run"), b.finish());
        assert!(run(&factory, &method).is_empty());
    }

    #[test]
    fn test_annotated_local_and_return() {
        let factory = make_factory();
        let mut b = BodyBuilder::new();
        let input = b.local("input", JavaType::string());
        b.declare_annotated("safe", JavaType::string(), vec![untainted()], Some(input));
        let ret = b.local("input", JavaType::string());
        b.ret(Some(ret));
        let sig = MethodSig::new("Test", "clean")
            .with_param(Param::new("input", JavaType::string()))
            .returning(JavaType::string())
            .with_return_annotation(untainted());
        let method = MethodDecl::new(sig, b.finish());

        let found: Vec<String> = run(&factory, &method).into_iter().map(|d| d.key).collect();
        assert_eq!(found, vec![keys::ASSIGNMENT.to_string(), keys::RETURN.to_string()]);
    }

    #[test]
    fn test_postcondition_checked_at_return() {
        let factory = make_factory();
        let ensures = Annotation::marker("EnsuresUntainted").with_arg("value", AnnotationValue::Str("#1".into()));
        let mut b = BodyBuilder::new();
        b.ret(None);
        let sig = MethodSig::new("Test", "sanitize")
            .with_param(Param::new("s", JavaType::string()))
            .with_annotation(ensures);
        let method = MethodDecl::new(sig, b.finish());
        let diagnostics = run(&factory, &method);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::POSTCONDITION);
    }

    #[test]
    fn test_override_weakening_postcondition() {
        let ensures = Annotation::marker("EnsuresUntainted").with_arg("value", AnnotationValue::Str("this.name".into()));
        let base = MethodSig::new("Base", "clean").with_annotation(ensures);
        let sub = MethodSig::new("Sub", "clean");
        let unit = CompilationUnit::new("Sub.java")
            .with_class(ClassDecl::new("Base").with_method(MethodDecl::abstract_method(base)))
            .with_class(ClassDecl::new("Sub").extending("Base").with_method(MethodDecl::abstract_method(sub.clone())));
        let mut classes = ClassTable::new();
        classes.register_unit(&unit);
        let factory = make_factory_with(classes);

        let diagnostics = check_overrides(&factory, "Sub.java", &MethodDecl::abstract_method(sub));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::POSTCONDITION_OVERRIDE);
    }
}
