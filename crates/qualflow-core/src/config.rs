//! Analysis configuration

use crate::error::{QualflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options shared by every checker run in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Log every phase of type-argument inference at debug level
    pub show_inference_steps: bool,
    /// Treat every method call as side-effect free (keeps field facts across calls)
    pub assume_side_effect_free: bool,
    /// Verify exceptional postconditions at the exceptional exit
    pub check_exceptional_postconditions: bool,
    /// Use the declared upper bound instead of a wildcard for uninferred targets
    pub conservative_uninferred: bool,
    /// Promote warnings to errors when summarising a session
    pub report_warnings_as_errors: bool,
    /// Names of the checkers to run; empty means all registered checkers
    pub checkers: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            show_inference_steps: false,
            assume_side_effect_free: false,
            check_exceptional_postconditions: true,
            conservative_uninferred: false,
            report_warnings_as_errors: false,
            checkers: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Load a configuration file. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Whether the named checker should run under this configuration.
    pub fn is_enabled(&self, checker: &str) -> bool {
        self.checkers.is_empty() || self.checkers.iter().any(|c| c == checker)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(dup) = self
            .checkers
            .iter()
            .enumerate()
            .find(|(i, c)| self.checkers[..*i].contains(c))
            .map(|(_, c)| c)
        {
            return Err(QualflowError::Config(format!("checker `{dup}` listed twice")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert!(config.check_exceptional_postconditions);
        assert!(!config.assume_side_effect_free);
        assert!(config.is_enabled("regex"));
    }

    #[test]
    fn test_from_json_partial() {
        let config = AnalysisConfig::from_json_str(r#"{"checkers": ["regex"]}"#).unwrap();
        assert!(config.is_enabled("regex"));
        assert!(!config.is_enabled("signedness"));
        assert!(config.check_exceptional_postconditions);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "show_inference_steps = true").unwrap();
        writeln!(file, "checkers = [\"calledmethods\"]").unwrap();

        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert!(config.show_inference_steps);
        assert_eq!(config.checkers, vec!["calledmethods".to_string()]);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"assume_side_effect_free": true}}"#).unwrap();

        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert!(config.assume_side_effect_free);
    }

    #[test]
    fn test_duplicate_checker_rejected() {
        let config = AnalysisConfig {
            checkers: vec!["regex".into(), "regex".into()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(QualflowError::Config(_))));
    }
}
