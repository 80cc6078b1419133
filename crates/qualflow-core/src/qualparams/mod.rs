//! Parameterized qualifiers
//!
//! A type carries a map of named qualifier parameters. Each parameter holds a
//! [`ParamValue`]: a ground qualifier, a wildcard range, a qualifier variable, or a
//! deferred LUB over variables. [`QualParamsHierarchy`] lifts any ground hierarchy to
//! these maps using containment rather than plain subtyping.

mod hierarchy;
mod params;
mod value;

pub use hierarchy::QualParamsHierarchy;
pub use params::{QualParams, PRIMARY};
pub use value::{LubQual, ParamValue, QualVar};
