//! # Qualflow Checkers
//!
//! Concrete qualifier checkers built on `qualflow-core`.
//!
//! ## Modules
//!
//! - **[`regex`]** - Strings that are valid regular expressions, and their group counts
//! - **[`signedness`]** - Signed and unsigned integral values
//! - **[`called_methods`]** - Methods called on an object so far, with predicates over them
//! - **[`collection_ownership`]** - Ownership of collections of resources
//! - **[`tainting`]** - Tainted and untainted values with qualifier parameters
//! - **[`suite`]** - Running several checkers over the same units
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use qualflow_checkers::prelude::*;
//!
//! let suite = CheckerSuite::new(AnalysisConfig::default())?;
//! let report = suite.run(&units)?;
//! println!("{report}");
//! ```

pub mod called_methods;
pub mod collection_ownership;
pub mod regex;
pub mod signedness;
pub mod suite;
pub mod tainting;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::called_methods::{CalledMethods, CalledMethodsChecker};
    pub use crate::collection_ownership::{CollectionOwnershipChecker, Ownership};
    pub use crate::regex::{RegexChecker, RegexQual};
    pub use crate::signedness::{Signedness, SignednessChecker};
    pub use crate::suite::{CheckerKind, CheckerRun, CheckerSuite, SuiteError, SuiteReport};
    pub use crate::tainting::{Taint, TaintParams, TaintingChecker};
    pub use qualflow_core::config::AnalysisConfig;
}

pub use crate::called_methods::CalledMethodsChecker;
pub use crate::collection_ownership::CollectionOwnershipChecker;
pub use crate::regex::RegexChecker;
pub use crate::signedness::SignednessChecker;
pub use crate::suite::{CheckerKind, CheckerSuite, SuiteReport};
pub use crate::tainting::TaintingChecker;
