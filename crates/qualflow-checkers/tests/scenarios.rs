use qualflow_checkers::prelude::*;
use qualflow_core::checker::{keys, AnalysisSession, Diagnostic};
use qualflow_core::hir::{
    catch, Annotation, AnnotationValue, BinaryOp, BodyBuilder, ClassDecl, CompilationUnit, JavaType, MethodDecl,
    MethodSig, Param, Stmt,
};
use qualflow_core::predicate::Predicate;
use std::collections::BTreeSet;
use std::io::Write;

fn make_unit(class: &str, methods: Vec<MethodDecl>) -> CompilationUnit {
    let mut decl = ClassDecl::new(class);
    for method in methods {
        decl = decl.with_method(method);
    }
    CompilationUnit::new(format!("{class}.java")).with_class(decl)
}

fn keys_of(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics.iter().map(|d| d.key.as_str()).collect()
}

fn ensures_closed(target: &str) -> Annotation {
    Annotation::marker("EnsuresCalledMethods")
        .with_arg("value", AnnotationValue::Str(target.into()))
        .with_arg("methods", AnnotationValue::Str("close".into()))
}

#[test]
fn test_regex_group_counts_add_up() {
    let mut b = BodyBuilder::new();
    let one = b.string("(a)");
    let two = b.string("(b)(c)");
    let joined = b.binary(BinaryOp::Add, one, two);
    b.declare("re", JavaType::string(), Some(joined));
    let method = MethodDecl::new(MethodSig::new("Patterns", "build"), b.finish());

    let mut session = AnalysisSession::new(RegexChecker, AnalysisConfig::default());
    let analyzed = session.analyze_methods(&make_unit("Patterns", vec![method])).unwrap();
    let result = analyzed[0].result.as_ref().unwrap();
    assert_eq!(result.value_of(joined).unwrap().qual, RegexQual::Regex(3));
}

#[test]
fn test_predicate_precedence() {
    let predicate = Predicate::parse("a && b || c").unwrap();
    let facts = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<BTreeSet<String>>();
    assert!(predicate.evaluate(&facts(&["a", "b"])));
    assert!(predicate.evaluate(&facts(&["c"])));
    assert!(!predicate.evaluate(&facts(&["a"])));
}

#[test]
fn test_override_must_keep_parameter_postcondition() {
    let resource = JavaType::declared("Resource");
    let parent = MethodDecl::abstract_method(
        MethodSig::new("Pool", "release")
            .with_param(Param::new("r", resource.clone()))
            .with_annotation(ensures_closed("#1")),
    );
    let child = MethodDecl::new(
        MethodSig::new("FastPool", "release").with_param(Param::new("r", resource.clone())),
        BodyBuilder::new().finish(),
    );
    let unit = CompilationUnit::new("Pool.java")
        .with_class(ClassDecl::new("Pool").with_method(parent))
        .with_class(ClassDecl::new("FastPool").extending("Pool").with_method(child));

    let mut session = AnalysisSession::new(CalledMethodsChecker::new(), AnalysisConfig::default());
    let diagnostics = session.analyze_unit(&unit);
    assert_eq!(keys_of(&diagnostics), vec![keys::POSTCONDITION_OVERRIDE]);
}

#[test]
fn test_redeclared_postcondition_is_checked_at_exit() {
    let resource = JavaType::declared("Resource");
    let close = MethodSig::new("Resource", "close").arc();
    let sig = |owner: &str| {
        MethodSig::new(owner, "release")
            .with_param(Param::new("r", resource.clone()))
            .with_annotation(ensures_closed("r"))
    };

    let mut b = BodyBuilder::new();
    let r = b.local("r", resource.clone());
    let call = b.call(Some(r), &close, Vec::new());
    b.expr_stmt(call);
    let closing = MethodDecl::new(sig("Pool"), b.finish());
    let forgetting = MethodDecl::new(sig("Leaky"), BodyBuilder::new().finish());

    let mut session = AnalysisSession::new(CalledMethodsChecker::new(), AnalysisConfig::default());
    assert!(session.analyze_unit(&make_unit("Pool", vec![closing])).is_empty());
    let diagnostics = session.analyze_unit(&make_unit("Leaky", vec![forgetting]));
    assert_eq!(keys_of(&diagnostics), vec![keys::POSTCONDITION]);
}

#[test]
fn test_called_method_reaches_exception_handler() {
    let resource = JavaType::declared("Resource");
    let close = MethodSig::new("Resource", "close").arc();
    let mut b = BodyBuilder::new();
    let r = b.local("r", resource.clone());
    let call = b.call(Some(r), &close, Vec::new());
    let in_handler = b.local("r", resource.clone());
    b.push(Stmt::Try {
        body: vec![Stmt::Expr(call)],
        catches: vec![catch("Throwable", "t", vec![Stmt::Expr(in_handler)])],
        finally: None,
    });
    let method = MethodDecl::new(
        MethodSig::new("Cleanup", "run").with_param(Param::new("r", resource)),
        b.finish(),
    );

    let mut session = AnalysisSession::new(CalledMethodsChecker::new(), AnalysisConfig::default());
    let analyzed = session.analyze_methods(&make_unit("Cleanup", vec![method])).unwrap();
    let value = analyzed[0].result.as_ref().unwrap().value_of(in_handler).unwrap();
    assert_eq!(value.qual, CalledMethods::of(["close"]));
}

#[test]
fn test_masked_shift_is_signedness_irrelevant() {
    let mut b = BodyBuilder::new();
    let x = b.local("x", JavaType::INT);
    let four = b.int(4);
    let shift = b.binary(BinaryOp::Shr, x, four);
    let paren = b.paren(shift);
    let mask = b.int(0x0F);
    let masked = b.binary(BinaryOp::BitAnd, paren, mask);
    b.expr_stmt(masked);
    let sig = MethodSig::new("Bits", "low").with_param(Param::new("x", JavaType::INT).annotated(Annotation::marker("Unsigned")));

    let mut session = AnalysisSession::new(SignednessChecker, AnalysisConfig::default());
    assert!(session
        .analyze_unit(&make_unit("Bits", vec![MethodDecl::new(sig, b.finish())]))
        .is_empty());
}

#[test]
fn test_suite_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "checkers = [\"tainting\", \"regex\"]").unwrap();
    let config = AnalysisConfig::from_file(file.path()).unwrap();

    let exec = MethodSig::new("Shell", "exec")
        .static_method()
        .with_param(Param::new("cmd", JavaType::string()).annotated(Annotation::marker("Untainted")))
        .arc();
    let mut b = BodyBuilder::new();
    let input = b.local("input", JavaType::string());
    let call = b.call(None, &exec, vec![input]);
    b.expr_stmt(call);
    let method = MethodDecl::new(
        MethodSig::new("Handler", "handle").with_param(Param::new("input", JavaType::string())),
        b.finish(),
    );

    let suite = CheckerSuite::new(config).unwrap();
    let report = suite.run(&[make_unit("Handler", vec![method])]).unwrap();
    assert_eq!(report.checkers.len(), 2);
    assert_eq!(report.error_count(), 1);
    let found: Vec<(&str, &str)> = report.diagnostics().map(|(checker, d)| (checker, d.key.as_str())).collect();
    assert_eq!(found, vec![("tainting", keys::ARGUMENT)]);
    assert!(report.to_json().unwrap().contains("\"tainting\""));
}
