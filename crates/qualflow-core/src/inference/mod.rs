//! Inference of generic-method type arguments and qualifier parameters
//!
//! Raw argument/formal relations ([`AfConstraint`]) are reduced structurally until the
//! formal side is a bare target, then turned into target/use constraints
//! ([`TuConstraint`]) and solved in phases: equalities, then lower bounds by LUB, then
//! upper bounds by GLB, then the assignment context. The same driver works over any
//! [`InferenceDomain`]: whole qualified types or individual qualifier parameters.

mod constraints;
mod driver;
mod param_domain;
mod solvers;
mod type_domain;

pub use constraints::{AfConstraint, ConstraintMap, InferenceResult, TargetConstraints, TargetUse, TuConstraint};
pub use driver::{InferenceOutcome, TypeArgInference};
pub use param_domain::{infer_qual_params, ParamDomain};
pub use solvers::{Conflict, EqualitiesSolver, SubtypesSolver, SupertypesSolver};
pub use type_domain::{QualType, TargetBounds, TypeDomain};

use indexmap::IndexMap;
use std::fmt;

/// Constraints produced by one reduction step
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction<V> {
    pub constraints: Vec<AfConstraint<V>>,
    pub targets: Vec<TuConstraint<V>>,
}

impl<V> Default for Reduction<V> {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
            targets: Vec::new(),
        }
    }
}

/// The values inference ranges over and how they decompose
pub trait InferenceDomain {
    type Value: Clone + PartialEq + fmt::Debug + fmt::Display;

    /// The target `value` is a bare use of, if any
    fn as_target(&self, value: &Self::Value, targets: &[String]) -> Option<String>;

    /// One structural reduction step for a constraint whose formal is not a bare target
    fn reduce(&self, constraint: &AfConstraint<Self::Value>, targets: &[String], out: &mut Reduction<Self::Value>);

    /// Constraint on `target` from a relation whose formal is exactly that target
    fn target_constraint(
        &self,
        constraint: &AfConstraint<Self::Value>,
        target: String,
        bound: TargetUse<Self::Value>,
    ) -> TuConstraint<Self::Value> {
        match constraint {
            AfConstraint::A2F { .. } => TuConstraint::Supertype { target, bound },
            AfConstraint::F2A { .. } => TuConstraint::Subtype { target, bound },
            AfConstraint::FIsA { .. } => TuConstraint::Equality { target, bound },
        }
    }

    fn lub(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Meet, when one is defined
    fn glb(&self, a: &Self::Value, b: &Self::Value) -> Option<Self::Value>;

    fn is_subtype(&self, sub: &Self::Value, sup: &Self::Value) -> bool;

    fn is_equal(&self, a: &Self::Value, b: &Self::Value) -> bool {
        a == b || (self.is_subtype(a, b) && self.is_subtype(b, a))
    }

    /// Replace every solved target occurring in `value`
    fn substitute(&self, value: &Self::Value, solution: &IndexMap<String, Self::Value>) -> Self::Value;

    /// Declared lower bound of `target`
    fn lower_bound(&self, target: &str) -> Self::Value;

    /// Declared upper bound of `target`
    fn upper_bound(&self, target: &str) -> Self::Value;

    /// Placeholder for a target nothing constrains
    fn uninferred(&self, target: &str) -> Self::Value;
}
