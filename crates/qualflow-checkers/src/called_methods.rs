//! Called Methods checker
//!
//! An accumulation analysis: the qualifier of a reference is the set of methods known to
//! have been called on it. Requirements such as "`build()` needs `a()` and `b()` first"
//! are written as receiver annotations, either as a plain set or as a boolean predicate
//! over method names.
//!
//! A call adds its method to the receiver in the regular store and in every exceptional
//! store, so a `catch` handler also knows the method was invoked.

use fnv::FnvHashMap;
use qualflow_core::checker::{
    CheckerVariant, Contract, ContractKind, Diagnostic, QualifiedTypeFactory, VisitContext, VisitorRule,
};
use qualflow_core::dataflow::{
    defaults, AbstractValue, CallSite, FlowExpr, Store, TransferContext, TransferFunction, TransferInput,
    TransferResult,
};
use qualflow_core::error::{QualflowError, Result};
use qualflow_core::hir::{find_annotation, Annotation, Body, ExprId, ExprKind, JavaType, Literal, MethodSig, Stmt};
use qualflow_core::lattice::{DynHierarchy, QualifierHierarchy};
use qualflow_core::predicate::Predicate;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{trace, warn};

/// Key reported for a `@CalledMethodsPredicate` that does not parse
pub const PREDICATE_INVALID: &str = "predicate.invalid";

const CALLED_METHODS: &str = "CalledMethods";
const CALLED_METHODS_PREDICATE: &str = "CalledMethodsPredicate";
const CALLED_METHODS_BOTTOM: &str = "CalledMethodsBottom";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CalledMethods {
    /// These methods have definitely been called. The empty set is top.
    Methods(BTreeSet<String>),
    /// The called methods satisfy this predicate
    Predicate(Arc<Predicate>),
    Bottom,
}

impl CalledMethods {
    pub fn none() -> Self {
        CalledMethods::Methods(BTreeSet::new())
    }

    pub fn of<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CalledMethods::Methods(methods.into_iter().map(Into::into).collect())
    }

    /// This qualifier with `method` also called
    pub fn with_call(&self, method: &str) -> Self {
        match self {
            CalledMethods::Methods(set) => {
                let mut set = set.clone();
                set.insert(method.to_string());
                CalledMethods::Methods(set)
            }
            // A predicate says nothing about which methods were called
            CalledMethods::Predicate(_) => CalledMethods::of([method]),
            CalledMethods::Bottom => CalledMethods::Bottom,
        }
    }
}

impl fmt::Display for CalledMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalledMethods::Methods(set) if set.is_empty() => write!(f, "@CalledMethods"),
            CalledMethods::Methods(set) => {
                let names: Vec<String> = set.iter().map(|m| format!("{m:?}")).collect();
                write!(f, "@CalledMethods({{{}}})", names.join(", "))
            }
            CalledMethods::Predicate(p) => write!(f, "@CalledMethodsPredicate(\"{p}\")"),
            CalledMethods::Bottom => write!(f, "@CalledMethodsBottom"),
        }
    }
}

/// Sets ordered by inclusion (more methods is more specific); predicates ordered by
/// implication and compared with sets by evaluating them against the set.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalledMethodsHierarchy;

impl CalledMethodsHierarchy {
    fn set_satisfies(set: &BTreeSet<String>, p: &Predicate) -> bool {
        p.evaluate(set)
    }
}

impl QualifierHierarchy for CalledMethodsHierarchy {
    type Qual = CalledMethods;

    fn top(&self) -> CalledMethods {
        CalledMethods::none()
    }

    fn bottom(&self) -> CalledMethods {
        CalledMethods::Bottom
    }

    fn is_subtype(&self, sub: &CalledMethods, sup: &CalledMethods) -> bool {
        match (sub, sup) {
            (CalledMethods::Bottom, _) => true,
            (_, CalledMethods::Bottom) => false,
            (CalledMethods::Methods(a), CalledMethods::Methods(b)) => a.is_superset(b),
            (CalledMethods::Methods(a), CalledMethods::Predicate(p)) => Self::set_satisfies(a, p),
            (CalledMethods::Predicate(p), CalledMethods::Methods(b)) => match Predicate::all_of(b.iter().cloned()) {
                Some(required) => p.implies(&required),
                None => true,
            },
            (CalledMethods::Predicate(p), CalledMethods::Predicate(q)) => p.implies(q),
        }
    }

    fn least_upper_bound(&self, a: &CalledMethods, b: &CalledMethods) -> CalledMethods {
        match (a, b) {
            (CalledMethods::Bottom, other) | (other, CalledMethods::Bottom) => other.clone(),
            (CalledMethods::Methods(x), CalledMethods::Methods(y)) => {
                CalledMethods::Methods(x.intersection(y).cloned().collect())
            }
            (CalledMethods::Methods(set), CalledMethods::Predicate(p))
            | (CalledMethods::Predicate(p), CalledMethods::Methods(set)) => {
                if Self::set_satisfies(set, p) {
                    return CalledMethods::Predicate(Arc::clone(p));
                }
                match Predicate::all_of(set.iter().cloned()) {
                    Some(called) => CalledMethods::Predicate(Arc::new(called.or((**p).clone()))),
                    None => self.top(),
                }
            }
            (CalledMethods::Predicate(p), CalledMethods::Predicate(q)) => {
                if p.implies(q) {
                    CalledMethods::Predicate(Arc::clone(q))
                } else if q.implies(p) {
                    CalledMethods::Predicate(Arc::clone(p))
                } else {
                    CalledMethods::Predicate(Arc::new((**p).clone().or((**q).clone())))
                }
            }
        }
    }

    fn greatest_lower_bound(&self, a: &CalledMethods, b: &CalledMethods) -> Result<CalledMethods> {
        let glb = match (a, b) {
            (CalledMethods::Bottom, _) | (_, CalledMethods::Bottom) => CalledMethods::Bottom,
            (CalledMethods::Methods(x), CalledMethods::Methods(y)) => {
                CalledMethods::Methods(x.union(y).cloned().collect())
            }
            (CalledMethods::Methods(set), CalledMethods::Predicate(p))
            | (CalledMethods::Predicate(p), CalledMethods::Methods(set)) => {
                if Self::set_satisfies(set, p) {
                    CalledMethods::Methods(set.clone())
                } else {
                    match Predicate::all_of(set.iter().cloned()) {
                        Some(called) => CalledMethods::Predicate(Arc::new(called.and((**p).clone()))),
                        None => CalledMethods::Predicate(Arc::clone(p)),
                    }
                }
            }
            (CalledMethods::Predicate(p), CalledMethods::Predicate(q)) => {
                if p.implies(q) {
                    CalledMethods::Predicate(Arc::clone(p))
                } else if q.implies(p) {
                    CalledMethods::Predicate(Arc::clone(q))
                } else {
                    CalledMethods::Predicate(Arc::new((**p).clone().and((**q).clone())))
                }
            }
        };
        Ok(glb)
    }
}

/// Parsed `@CalledMethodsPredicate` strings, shared by the checker and its visitor rule
#[derive(Debug, Clone, Default)]
pub struct PredicateCache {
    parsed: Arc<Mutex<FnvHashMap<String, std::result::Result<Arc<Predicate>, String>>>>,
}

impl PredicateCache {
    /// Parse `text`, reusing an earlier parse of the same string
    pub fn parse(&self, text: &str) -> Result<Arc<Predicate>> {
        let mut cache = self.parsed.lock().unwrap_or_else(PoisonError::into_inner);
        let parsed = cache
            .entry(text.to_string())
            .or_insert_with(|| Predicate::parse(text).map(Arc::new).map_err(|e| e.to_string()));
        parsed.clone().map_err(|message| QualflowError::PredicateParse {
            predicate: text.to_string(),
            message,
        })
    }

    pub fn len(&self) -> usize {
        self.parsed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Called Methods checker. Predicates are parsed once for the lifetime of the session
/// that owns the checker.
#[derive(Debug, Default)]
pub struct CalledMethodsChecker {
    predicates: PredicateCache,
}

impl CalledMethodsChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predicate(&self, text: &str) -> Result<Arc<Predicate>> {
        self.predicates.parse(text)
    }

    fn contract_kind(annotation: &Annotation) -> Option<ContractKind> {
        match annotation.name.rsplit('.').next()? {
            "EnsuresCalledMethods" => Some(ContractKind::Postcondition),
            "EnsuresCalledMethodsOnException" => Some(ContractKind::ExceptionalPostcondition),
            "RequiresCalledMethods" => Some(ContractKind::Precondition),
            "EnsuresCalledMethodsIf" => Some(ContractKind::ConditionalPostcondition(
                annotation.bool_arg("result").unwrap_or(true),
            )),
            _ => None,
        }
    }
}

impl CheckerVariant for CalledMethodsChecker {
    type Qual = CalledMethods;

    fn name(&self) -> &'static str {
        "calledmethods"
    }

    fn create_hierarchy(&self) -> Result<Box<DynHierarchy<CalledMethods>>> {
        Ok(Box::new(CalledMethodsHierarchy))
    }

    fn create_transfer(
        &self,
        factory: Arc<QualifiedTypeFactory<CalledMethods>>,
    ) -> Box<dyn TransferFunction<CalledMethods>> {
        Box::new(CalledMethodsTransfer { factory })
    }

    fn qualifier_from_annotations(&self, annotations: &[Annotation], _ty: &JavaType) -> Option<CalledMethods> {
        if find_annotation(annotations, CALLED_METHODS_BOTTOM).is_some() {
            return Some(CalledMethods::Bottom);
        }
        if let Some(called) = find_annotation(annotations, CALLED_METHODS) {
            return Some(CalledMethods::of(called.str_list_arg("value")));
        }
        let text = find_annotation(annotations, CALLED_METHODS_PREDICATE)?.str_arg("value")?;
        match self.predicate(text) {
            Ok(p) => Some(CalledMethods::Predicate(p)),
            Err(err) => {
                warn!("ignoring annotation: {err}");
                None
            }
        }
    }

    fn literal_qualifier(
        &self,
        literal: &Literal,
        _ty: &JavaType,
        hierarchy: &DynHierarchy<CalledMethods>,
    ) -> CalledMethods {
        match literal {
            Literal::Null => hierarchy.bottom(),
            _ => hierarchy.top(),
        }
    }

    /// `@EnsuresCalledMethods(value = exprs, methods = names)` and its variants
    fn contracts(&self, sig: &MethodSig) -> Vec<Contract<CalledMethods>> {
        let mut out = Vec::new();
        for annotation in &sig.annotations {
            let Some(kind) = Self::contract_kind(annotation) else {
                continue;
            };
            let qualifier = CalledMethods::of(annotation.str_list_arg("methods"));
            let expressions = match kind {
                ContractKind::ConditionalPostcondition(_) => annotation.str_list_arg("expression"),
                _ => annotation.str_list_arg("value"),
            };
            for expression in expressions {
                out.push(Contract::new(kind, expression, qualifier.clone()));
            }
        }
        out
    }

    fn visitor_rules(&self) -> Vec<Box<dyn VisitorRule<CalledMethods>>> {
        vec![Box::new(PredicateSyntaxRule {
            predicates: self.predicates.clone(),
        })]
    }
}

/// Whether `sig` returns its own receiver
fn returns_this(sig: &MethodSig) -> bool {
    !sig.is_static && find_annotation(&sig.return_annotations, "This").is_some()
}

/// Receivers a call accumulates onto: the direct receiver, then the receivers of any
/// `@This` calls it was produced by
type Receivers = SmallVec<[(FlowExpr, AbstractValue<CalledMethods>); 2]>;

/// Accumulates called methods on receivers
pub struct CalledMethodsTransfer {
    factory: Arc<QualifiedTypeFactory<CalledMethods>>,
}

impl CalledMethodsTransfer {
    /// Record `method` on `flow` in `store`, starting from `fallback` when the store
    /// knows nothing about it
    fn accumulate(&self, store: &mut Store<CalledMethods>, flow: &FlowExpr, fallback: &AbstractValue<CalledMethods>, method: &str) {
        let current = store.get_value(flow).unwrap_or(fallback);
        let updated = current.with_qual(current.qual.with_call(method));
        store.replace_value(flow.clone(), updated);
    }

    /// Every tracked expression that receives the call: the receiver itself, and the
    /// receivers behind a chain of `@This`-returning calls
    fn receivers(
        &self,
        ctx: &TransferContext<'_, CalledMethods>,
        receiver: ExprId,
    ) -> Result<Receivers> {
        let assume_pure = self.factory.config().assume_side_effect_free;
        let mut out = Receivers::new();
        let mut current = Some(receiver);
        while let Some(id) = current {
            let id = ctx.body.skip_parens(id);
            if let Some(flow) = FlowExpr::from_expr(ctx.body, id, assume_pure) {
                out.push((flow, defaults::operand_value(&self.factory, ctx, id)?));
            }
            current = match ctx.body.kind(id) {
                Some(ExprKind::MethodCall {
                    receiver: Some(inner),
                    method,
                    ..
                }) if returns_this(method) => Some(*inner),
                _ => None,
            };
        }
        Ok(out)
    }
}

impl TransferFunction<CalledMethods> for CalledMethodsTransfer {
    fn factory(&self) -> &QualifiedTypeFactory<CalledMethods> {
        &self.factory
    }

    fn visit_method_call(
        &self,
        ctx: &TransferContext<'_, CalledMethods>,
        call: &CallSite<'_>,
        input: TransferInput<CalledMethods>,
    ) -> Result<TransferResult<CalledMethods>> {
        let mut result = defaults::visit_call(&self.factory, ctx, call, input)?;
        let Some(receiver) = call.receiver else {
            return Ok(result);
        };
        let method = call.method.name.as_str();

        for (flow, fallback) in self.receivers(ctx, receiver)? {
            trace!(receiver = %flow, method, "accumulating call");
            result = result
                .map_stores(|store| self.accumulate(store, &flow, &fallback, method))
                .map_exceptional_stores(|store| self.accumulate(store, &flow, &fallback, method));
        }

        if returns_this(call.method) {
            let h = self.hierarchy();
            let receiver_value = defaults::operand_value(&self.factory, ctx, receiver)?;
            let accumulated = receiver_value.qual.with_call(method);
            if let Some(value) = result.value().cloned() {
                let qual = h.greatest_lower_bound(&value.qual, &accumulated)?;
                result.set_value(Some(value.with_qual(qual)));
            }
        }
        Ok(result)
    }
}

/// Reports `@CalledMethodsPredicate` annotations that do not parse
struct PredicateSyntaxRule {
    predicates: PredicateCache,
}

impl PredicateSyntaxRule {
    fn check(&self, cx: &mut VisitContext<'_, CalledMethods>, annotations: &[Annotation]) {
        let Some(text) = find_annotation(annotations, CALLED_METHODS_PREDICATE).and_then(|a| a.str_arg("value")) else {
            return;
        };
        if let Err(err) = self.predicates.parse(text) {
            cx.report(cx.method.span, Diagnostic::error(PREDICATE_INVALID, err.to_string()));
        }
    }
}

fn local_annotations<'b>(stmts: &'b [Stmt], out: &mut Vec<&'b [Annotation]>) {
    for stmt in stmts {
        match stmt {
            Stmt::LocalDecl { annotations, .. } => out.push(annotations),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                local_annotations(then_branch, out);
                local_annotations(else_branch, out);
            }
            Stmt::While { body, .. } | Stmt::Block(body) => local_annotations(body, out),
            Stmt::Try { body, catches, finally } => {
                local_annotations(body, out);
                for clause in catches {
                    local_annotations(&clause.body, out);
                }
                if let Some(finally) = finally {
                    local_annotations(finally, out);
                }
            }
            Stmt::Expr(_) | Stmt::Return(_) | Stmt::Throw(_) => {}
        }
    }
}

fn declared_annotations<'b>(sig: &'b MethodSig, body: &'b Body) -> Vec<&'b [Annotation]> {
    let mut out: Vec<&[Annotation]> = vec![&sig.receiver_annotations, &sig.return_annotations];
    out.extend(sig.params.iter().map(|p| p.annotations.as_slice()));
    local_annotations(&body.stmts, &mut out);
    out
}

impl VisitorRule<CalledMethods> for PredicateSyntaxRule {
    fn name(&self) -> &'static str {
        "calledmethods.predicate-syntax"
    }

    fn check_method(&self, cx: &mut VisitContext<'_, CalledMethods>) -> Result<()> {
        let sig = cx.sig();
        let body = cx.body;
        for annotations in declared_annotations(sig, body) {
            self.check(cx, annotations);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualflow_core::checker::{keys, AnalysisSession};
    use qualflow_core::config::AnalysisConfig;
    use qualflow_core::hir::{catch, AnnotationValue, BodyBuilder, ClassDecl, CompilationUnit, MethodDecl, Param};

    fn builder_ty() -> JavaType {
        JavaType::declared("Builder")
    }

    fn set(methods: &[&str]) -> CalledMethods {
        CalledMethods::of(methods.iter().copied())
    }

    fn pred(text: &str) -> CalledMethods {
        CalledMethods::Predicate(Arc::new(Predicate::parse(text).unwrap()))
    }

    fn make_setter(name: &str) -> Arc<MethodSig> {
        MethodSig::new("Builder", name)
            .returning(builder_ty())
            .with_return_annotation(Annotation::marker("This"))
            .arc()
    }

    fn make_build(required: Annotation) -> Arc<MethodSig> {
        let mut sig = MethodSig::new("Builder", "build").returning(JavaType::declared("Widget"));
        sig.receiver_annotations.push(required);
        sig.arc()
    }

    fn make_unit(methods: Vec<MethodDecl>) -> CompilationUnit {
        let mut class = ClassDecl::new("Test");
        for method in methods {
            class = class.with_method(method);
        }
        CompilationUnit::new("Test.java").with_class(class)
    }

    fn make_session() -> AnalysisSession<CalledMethodsChecker> {
        AnalysisSession::new(CalledMethodsChecker::new(), AnalysisConfig::default())
    }

    fn with_builder_param(name: &str) -> MethodSig {
        MethodSig::new("Test", name).with_param(Param::new("b", builder_ty()))
    }

    #[test]
    fn test_sets_ordered_by_inclusion() {
        let h = CalledMethodsHierarchy;
        assert!(h.is_subtype(&set(&["a", "b"]), &set(&["a"])));
        assert!(!h.is_subtype(&set(&["a"]), &set(&["a", "b"])));
        assert!(h.is_subtype(&set(&["a"]), &h.top()));
        assert_eq!(h.least_upper_bound(&set(&["a", "b"]), &set(&["b", "c"])), set(&["b"]));
        assert_eq!(
            h.greatest_lower_bound(&set(&["a"]), &set(&["c"])).unwrap(),
            set(&["a", "c"])
        );
        assert_eq!(h.least_upper_bound(&CalledMethods::Bottom, &set(&["a"])), set(&["a"]));
    }

    #[test]
    fn test_predicates_against_sets() {
        let h = CalledMethodsHierarchy;
        let either = pred("a || b");
        assert!(h.is_subtype(&set(&["b"]), &either));
        assert!(!h.is_subtype(&set(&["c"]), &either));
        assert!(h.is_subtype(&pred("a && b"), &set(&["a"])));
        assert!(!h.is_subtype(&either, &set(&["a"])));
        assert!(h.is_subtype(&pred("a && b"), &either));

        assert_eq!(h.least_upper_bound(&set(&["a"]), &either), either);
        let widened = Predicate::fact("c").or(Predicate::parse("a || b").unwrap());
        assert_eq!(
            h.least_upper_bound(&set(&["c"]), &either),
            CalledMethods::Predicate(Arc::new(widened))
        );
        assert_eq!(h.greatest_lower_bound(&set(&["a"]), &either).unwrap(), set(&["a"]));
        assert_eq!(h.least_upper_bound(&CalledMethods::none(), &either), CalledMethods::none());
    }

    #[test]
    fn test_predicate_cache_reuses_parse() {
        let checker = CalledMethodsChecker::new();
        let first = checker.predicate("a && !b").unwrap();
        let second = checker.predicate("a && !b").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(checker.predicates.len(), 1);
        assert!(matches!(
            checker.predicate("a &&"),
            Err(QualflowError::PredicateParse { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(CalledMethods::none().to_string(), "@CalledMethods");
        assert_eq!(set(&["b", "a"]).to_string(), "@CalledMethods({\"a\", \"b\"})");
        assert_eq!(pred("a || b").to_string(), "@CalledMethodsPredicate(\"a || b\")");
    }

    #[test]
    fn test_builder_chain_satisfies_receiver_requirement() {
        let set_a = make_setter("a");
        let set_b = make_setter("b");
        let required = Annotation::marker(CALLED_METHODS)
            .with_arg("value", AnnotationValue::StrList(vec!["a".into(), "b".into()]));
        let build = make_build(required);

        let chain = |calls: &[&Arc<MethodSig>]| {
            let mut b = BodyBuilder::new();
            let mut receiver = b.local("b", builder_ty());
            for sig in calls {
                receiver = b.call(Some(receiver), sig, Vec::new());
            }
            let built = b.call(Some(receiver), &build, Vec::new());
            b.expr_stmt(built);
            MethodDecl::new(with_builder_param("make"), b.finish())
        };

        assert!(make_session().analyze_unit(&make_unit(vec![chain(&[&set_a, &set_b])])).is_empty());

        let diagnostics = make_session().analyze_unit(&make_unit(vec![chain(&[&set_a])]));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::RECEIVER);
    }

    #[test]
    fn test_statement_calls_accumulate_on_local() {
        let set_a = make_setter("a");
        let set_b = make_setter("b");
        let required = Annotation::marker(CALLED_METHODS_PREDICATE).with_arg("value", AnnotationValue::Str("a && b".into()));
        let build = make_build(required);

        let mut b = BodyBuilder::new();
        let r1 = b.local("b", builder_ty());
        let first = b.call(Some(r1), &set_a, Vec::new());
        b.expr_stmt(first);
        let r2 = b.local("b", builder_ty());
        let second = b.call(Some(r2), &set_b, Vec::new());
        b.expr_stmt(second);
        let r3 = b.local("b", builder_ty());
        let built = b.call(Some(r3), &build, Vec::new());
        b.expr_stmt(built);

        let method = MethodDecl::new(with_builder_param("make"), b.finish());
        let mut session = make_session();
        let analyzed = session.analyze_methods(&make_unit(vec![method])).unwrap();
        assert!(analyzed[0].diagnostics.is_empty());
        let result = analyzed[0].result.as_ref().unwrap();
        assert_eq!(result.value_of(r3).unwrap().qual, set(&["a", "b"]));
    }

    #[test]
    fn test_catch_handler_sees_called_method() {
        let close = MethodSig::new("Resource", "close").arc();
        let resource = JavaType::declared("Resource");

        let mut b = BodyBuilder::new();
        let receiver = b.local("r", resource.clone());
        let call = b.call(Some(receiver), &close, Vec::new());
        let in_handler = b.local("r", resource.clone());
        b.push(Stmt::Try {
            body: vec![Stmt::Expr(call)],
            catches: vec![catch("Exception", "e", vec![Stmt::Expr(in_handler)])],
            finally: None,
        });
        let sig = MethodSig::new("Test", "release").with_param(Param::new("r", resource));

        let mut session = make_session();
        let analyzed = session
            .analyze_methods(&make_unit(vec![MethodDecl::new(sig, b.finish())]))
            .unwrap();
        let result = analyzed[0].result.as_ref().unwrap();
        assert_eq!(result.value_of(in_handler).unwrap().qual, set(&["close"]));
    }

    #[test]
    fn test_postcondition_must_survive_override() {
        let ensures = Annotation::marker("EnsuresCalledMethods")
            .with_arg("value", AnnotationValue::Str("this".into()))
            .with_arg("methods", AnnotationValue::Str("shutdown".into()));
        let base = MethodDecl::abstract_method(MethodSig::new("Base", "close").with_annotation(ensures));
        let sub = MethodDecl::new(MethodSig::new("Sub", "close"), BodyBuilder::new().finish());
        let unit = CompilationUnit::new("Close.java")
            .with_class(ClassDecl::new("Base").with_method(base))
            .with_class(ClassDecl::new("Sub").extending("Base").with_method(sub));

        let diagnostics = make_session().analyze_unit(&unit);
        let found: Vec<&str> = diagnostics.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(found, vec![keys::POSTCONDITION_OVERRIDE]);
    }

    #[test]
    fn test_ensures_called_methods_checked_at_exit() {
        let shutdown = MethodSig::new("Test", "shutdown").arc();
        let ensures = Annotation::marker("EnsuresCalledMethods")
            .with_arg("value", AnnotationValue::Str("this".into()))
            .with_arg("methods", AnnotationValue::Str("shutdown".into()));

        let mut b = BodyBuilder::new();
        let this = b.this("Test");
        let call = b.call(Some(this), &shutdown, Vec::new());
        b.expr_stmt(call);
        let good = MethodDecl::new(MethodSig::new("Test", "close").with_annotation(ensures.clone()), b.finish());
        let bad = MethodDecl::new(MethodSig::new("Test", "forget").with_annotation(ensures), BodyBuilder::new().finish());

        let diagnostics = make_session().analyze_unit(&make_unit(vec![good, bad]));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::POSTCONDITION);
        assert!(diagnostics[0].message.contains("forget"));
    }

    #[test]
    fn test_malformed_predicate_reported() {
        let broken = Annotation::marker(CALLED_METHODS_PREDICATE).with_arg("value", AnnotationValue::Str("a ||".into()));
        let sig = MethodSig::new("Test", "use").with_param(Param::new("b", builder_ty()).annotated(broken));
        let diagnostics = make_session().analyze_unit(&make_unit(vec![MethodDecl::new(sig, BodyBuilder::new().finish())]));
        let found: Vec<&str> = diagnostics.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(found, vec![PREDICATE_INVALID]);
    }
}
