//! Analysis session: runs one checker over compilation units and collects diagnostics

use super::diagnostics::{Diagnostic, Severity};
use super::factory::QualifiedTypeFactory;
use super::visitor::{check_overrides, keys, CommonVisitor, VisitContext};
use super::CheckerVariant;
use crate::config::AnalysisConfig;
use crate::dataflow::{AnalysisResult, CfgBuilder, ForwardAnalysis};
use crate::hir::{ClassTable, CompilationUnit, MethodDecl, MethodSig};
use anyhow::Context;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of analysing one method
pub struct AnalyzedMethod<Q> {
    pub sig: Arc<MethodSig>,
    /// `None` for methods without a body
    pub result: Option<AnalysisResult<Q>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Totals over everything a session reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub checker: String,
    pub units: usize,
    pub methods: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Units whose analysis was aborted by an internal error
    pub fatal: usize,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.fatal == 0
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} unit(s), {} method(s), {} error(s), {} warning(s)",
            self.checker, self.units, self.methods, self.errors, self.warnings
        )?;
        if self.fatal > 0 {
            write!(f, ", {} aborted", self.fatal)?;
        }
        Ok(())
    }
}

/// Runs one checker over any number of compilation units.
///
/// Units are registered in the class table before analysis so override checks see
/// superclasses declared in other units. An internal error aborts only the unit it
/// happened in; it is reported as a fatal diagnostic and the session carries on.
pub struct AnalysisSession<C: CheckerVariant> {
    variant: Arc<C>,
    config: AnalysisConfig,
    classes: Arc<ClassTable>,
    factory: Option<Arc<QualifiedTypeFactory<C::Qual>>>,
    diagnostics: Vec<Diagnostic>,
    units: usize,
    methods: usize,
}

impl<C: CheckerVariant> AnalysisSession<C> {
    pub fn new(variant: C, config: AnalysisConfig) -> Self {
        Self {
            variant: Arc::new(variant),
            config,
            classes: Arc::new(ClassTable::new()),
            factory: None,
            diagnostics: Vec::new(),
            units: 0,
            methods: 0,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled(self.variant.name())
    }

    /// Make the classes of `unit` visible to override and field lookups
    pub fn register_unit(&mut self, unit: &CompilationUnit) {
        Arc::make_mut(&mut self.classes).register_unit(unit);
        // The factory holds a snapshot of the class table
        self.factory = None;
    }

    pub fn factory(&mut self) -> crate::error::Result<Arc<QualifiedTypeFactory<C::Qual>>> {
        if let Some(factory) = &self.factory {
            return Ok(Arc::clone(factory));
        }
        let variant: Arc<dyn CheckerVariant<Qual = C::Qual>> = self.variant.clone();
        let factory = Arc::new(QualifiedTypeFactory::new(
            variant,
            Arc::clone(&self.classes),
            self.config.clone(),
        )?);
        self.factory = Some(Arc::clone(&factory));
        Ok(factory)
    }

    /// Analyse every method of `unit`, stopping at the first internal error
    pub fn analyze_methods(&mut self, unit: &CompilationUnit) -> anyhow::Result<Vec<AnalyzedMethod<C::Qual>>> {
        if has_unregistered_classes(&self.classes, unit) {
            self.register_unit(unit);
        }
        let factory = self.factory().context("creating the qualified type factory")?;
        let rules = self.variant.visitor_rules();
        let visitor = CommonVisitor::new(rules);

        let mut analyzed = Vec::new();
        for class in &unit.classes {
            for method in &class.methods {
                let outcome = analyze_method(&factory, &visitor, &unit.name, method)
                    .with_context(|| format!("analysing {}", method.sig.qualified_name()))?;
                analyzed.push(outcome);
            }
        }
        Ok(analyzed)
    }

    /// Analyse `unit` and return its diagnostics. They are also kept for [`Self::report`].
    pub fn analyze_unit(&mut self, unit: &CompilationUnit) -> Vec<Diagnostic> {
        if !self.is_enabled() {
            debug!(checker = self.variant.name(), unit = %unit.name, "checker disabled");
            return Vec::new();
        }
        info!(checker = self.variant.name(), unit = %unit.name, "analysing compilation unit");
        self.units += 1;
        let diagnostics = match self.analyze_methods(unit) {
            Ok(methods) => {
                self.methods += methods.len();
                methods.into_iter().flat_map(|m| m.diagnostics).collect()
            }
            Err(err) => {
                error!(checker = self.variant.name(), unit = %unit.name, "analysis aborted: {err:#}");
                vec![Diagnostic::fatal(keys::INTERNAL, format!("{err:#}")).in_unit(unit.name.clone())]
            }
        };
        self.diagnostics.extend(diagnostics.iter().cloned());
        diagnostics
    }

    /// Everything reported so far, in analysis order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn report(&self) -> SessionReport {
        let mut report = SessionReport {
            checker: self.variant.name().to_string(),
            units: self.units,
            methods: self.methods,
            ..SessionReport::default()
        };
        for diagnostic in &self.diagnostics {
            match diagnostic.severity {
                Severity::Fatal => report.fatal += 1,
                Severity::Error => report.errors += 1,
                Severity::Warning if self.config.report_warnings_as_errors => report.errors += 1,
                Severity::Warning => report.warnings += 1,
                Severity::Note => {}
            }
        }
        report
    }
}

fn has_unregistered_classes(classes: &ClassTable, unit: &CompilationUnit) -> bool {
    unit.classes.iter().any(|c| classes.class(&c.name).is_none())
}

fn analyze_method<Q: crate::lattice::Qualifier>(
    factory: &Arc<QualifiedTypeFactory<Q>>,
    visitor: &CommonVisitor<Q>,
    unit: &str,
    method: &MethodDecl,
) -> crate::error::Result<AnalyzedMethod<Q>> {
    let mut diagnostics = check_overrides(factory, unit, method);
    let Some(body) = &method.body else {
        return Ok(AnalyzedMethod {
            sig: Arc::clone(&method.sig),
            result: None,
            diagnostics,
        });
    };

    let cfg = CfgBuilder::build(body)?;
    let transfer = factory.variant().create_transfer(Arc::clone(factory));
    let result = ForwardAnalysis::new(&*transfer).run(&cfg, body, &method.sig)?;
    debug!(
        method = %method.sig.qualified_name(),
        iterations = result.iterations(),
        "fixed point reached"
    );

    let mut cx = VisitContext::new(factory, unit, method, body, &result);
    visitor.visit(&mut cx)?;
    diagnostics.extend(cx.into_diagnostics());
    diagnostics.sort_by_key(|d| d.span);
    Ok(AnalyzedMethod {
        sig: Arc::clone(&method.sig),
        result: Some(result),
        diagnostics,
    })
}
