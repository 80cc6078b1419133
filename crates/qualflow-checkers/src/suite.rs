//! Running several checkers over the same compilation units
//!
//! Each checker gets its own [`AnalysisSession`], so caches and class tables are never
//! shared between checkers. Every unit is registered with a session before any is
//! analysed.

use crate::called_methods::CalledMethodsChecker;
use crate::collection_ownership::CollectionOwnershipChecker;
use crate::regex::RegexChecker;
use crate::signedness::SignednessChecker;
use crate::tainting::TaintingChecker;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use qualflow_core::checker::{AnalysisSession, CheckerVariant, Diagnostic, SessionReport};
use qualflow_core::config::AnalysisConfig;
use qualflow_core::error::QualflowError;
use qualflow_core::hir::CompilationUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("unknown checker `{0}`")]
    UnknownChecker(String),
    #[error(transparent)]
    Config(#[from] QualflowError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckerKind {
    Regex,
    Signedness,
    CalledMethods,
    CollectionOwnership,
    Tainting,
}

impl CheckerKind {
    pub const ALL: [CheckerKind; 5] = [
        CheckerKind::Regex,
        CheckerKind::Signedness,
        CheckerKind::CalledMethods,
        CheckerKind::CollectionOwnership,
        CheckerKind::Tainting,
    ];

    /// The name the checker reports itself under, as used in `AnalysisConfig::checkers`
    pub fn name(self) -> &'static str {
        match self {
            CheckerKind::Regex => "regex",
            CheckerKind::Signedness => "signedness",
            CheckerKind::CalledMethods => "calledmethods",
            CheckerKind::CollectionOwnership => "collectionownership",
            CheckerKind::Tainting => "tainting",
        }
    }
}

impl FromStr for CheckerKind {
    type Err = SuiteError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CheckerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| SuiteError::UnknownChecker(s.to_string()))
    }
}

impl fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one checker found
#[derive(Debug, Clone, Serialize)]
pub struct CheckerRun {
    pub report: SessionReport,
    pub diagnostics: Vec<Diagnostic>,
}

/// Results of a suite run, keyed by checker name in the order the checkers ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub checkers: IndexMap<String, CheckerRun>,
}

impl SuiteReport {
    pub fn is_clean(&self) -> bool {
        self.checkers.values().all(|run| run.report.is_clean())
    }

    pub fn error_count(&self) -> usize {
        self.checkers.values().map(|run| run.report.errors).sum()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = (&str, &Diagnostic)> {
        self.checkers
            .iter()
            .flat_map(|(name, run)| run.diagnostics.iter().map(move |d| (name.as_str(), d)))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for run in self.checkers.values() {
            writeln!(f, "{}", run.report)?;
        }
        Ok(())
    }
}

pub struct CheckerSuite {
    config: AnalysisConfig,
    kinds: Vec<CheckerKind>,
}

impl CheckerSuite {
    /// Every checker named in `config.checkers`, or all of them when the list is empty
    pub fn new(config: AnalysisConfig) -> std::result::Result<Self, SuiteError> {
        config.validate()?;
        let kinds = if config.checkers.is_empty() {
            CheckerKind::ALL.to_vec()
        } else {
            config
                .checkers
                .iter()
                .map(|name| name.parse())
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(Self { config, kinds })
    }

    pub fn kinds(&self) -> &[CheckerKind] {
        &self.kinds
    }

    pub fn run(&self, units: &[CompilationUnit]) -> Result<SuiteReport> {
        let mut report = SuiteReport::default();
        for kind in &self.kinds {
            let run = match kind {
                CheckerKind::Regex => self.run_checker(RegexChecker, units),
                CheckerKind::Signedness => self.run_checker(SignednessChecker, units),
                CheckerKind::CalledMethods => self.run_checker(CalledMethodsChecker::new(), units),
                CheckerKind::CollectionOwnership => self.run_checker(CollectionOwnershipChecker::new(), units),
                CheckerKind::Tainting => {
                    let checker = TaintingChecker::new().context("building the tainting hierarchy")?;
                    self.run_checker(checker, units)
                }
            };
            info!(checker = kind.name(), summary = %run.report, "checker finished");
            report.checkers.insert(kind.name().to_string(), run);
        }
        Ok(report)
    }

    fn run_checker<C: CheckerVariant>(&self, checker: C, units: &[CompilationUnit]) -> CheckerRun {
        let mut session = AnalysisSession::new(checker, self.config.clone());
        for unit in units {
            session.register_unit(unit);
        }
        for unit in units {
            session.analyze_unit(unit);
        }
        CheckerRun {
            report: session.report(),
            diagnostics: session.diagnostics().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualflow_core::hir::{BodyBuilder, ClassDecl, JavaType, MethodDecl, MethodSig, Param};

    fn make_unit() -> CompilationUnit {
        let compile = MethodSig::new("Pattern", "compile")
            .static_method()
            .with_param(Param::new("regex", JavaType::string()))
            .returning(JavaType::declared("Pattern"))
            .arc();
        let mut b = BodyBuilder::new();
        let bad = b.string("(unclosed");
        let call = b.call(None, &compile, vec![bad]);
        b.expr_stmt(call);
        let method = MethodDecl::new(MethodSig::new("Main", "run"), b.finish());
        CompilationUnit::new("Main.java").with_class(ClassDecl::new("Main").with_method(method))
    }

    #[test]
    fn test_checker_names_round_trip() {
        for kind in CheckerKind::ALL {
            assert_eq!(kind.name().parse::<CheckerKind>().unwrap(), kind);
        }
        assert!(matches!(
            "nullness".parse::<CheckerKind>(),
            Err(SuiteError::UnknownChecker(name)) if name == "nullness"
        ));
    }

    #[test]
    fn test_config_selects_checkers() {
        let config = AnalysisConfig {
            checkers: vec!["tainting".into(), "regex".into()],
            ..AnalysisConfig::default()
        };
        let suite = CheckerSuite::new(config).unwrap();
        assert_eq!(suite.kinds(), &[CheckerKind::Tainting, CheckerKind::Regex]);
        assert_eq!(CheckerSuite::new(AnalysisConfig::default()).unwrap().kinds().len(), 5);
    }

    #[test]
    fn test_duplicate_checker_is_rejected() {
        let config = AnalysisConfig {
            checkers: vec!["regex".into(), "regex".into()],
            ..AnalysisConfig::default()
        };
        assert!(matches!(CheckerSuite::new(config), Err(SuiteError::Config(_))));
    }

    #[test]
    fn test_run_reports_per_checker() {
        let suite = CheckerSuite::new(AnalysisConfig::default()).unwrap();
        let report = suite.run(&[make_unit()]).unwrap();
        let names: Vec<&str> = report.checkers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["regex", "signedness", "calledmethods", "collectionownership", "tainting"]);
        assert!(!report.is_clean());
        assert_eq!(report.checkers["regex"].report.errors, 1);
        assert_eq!(report.checkers["signedness"].report.methods, 1);
        assert!(report.diagnostics().all(|(checker, _)| checker == "regex"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["checkers"]["regex"]["report"]["errors"], 1);
    }
}
