//! Phase solvers over a [`ConstraintMap`]

use super::constraints::{ConstraintMap, InferenceResult};
use super::InferenceDomain;
use std::fmt;
use tracing::trace;

/// Two constraints on one target that no value satisfies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub target: String,
    pub reason: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.reason)
    }
}

/// Solves targets fixed by equality constraints
pub struct EqualitiesSolver;

impl EqualitiesSolver {
    /// Iterates until no target changes. Each inferred value is pushed into the
    /// constraints of related targets: equal targets get it as an equality, targets above
    /// or below get it as a bound.
    pub fn solve<D: InferenceDomain>(
        domain: &D,
        targets: &[String],
        map: &mut ConstraintMap<D::Value>,
    ) -> Result<InferenceResult<D::Value>, Conflict> {
        let mut result = InferenceResult::new();
        loop {
            let mut changed = false;
            for target in targets {
                let Some(constraints) = map.get(target).cloned() else {
                    continue;
                };

                let mut value = result.get(target).cloned();
                for candidate in &constraints.equal_values {
                    match &value {
                        None => value = Some(candidate.clone()),
                        Some(existing) if !domain.is_equal(existing, candidate) => {
                            return Err(Conflict {
                                target: target.clone(),
                                reason: format!("required to equal both {existing} and {candidate}"),
                            });
                        }
                        Some(_) => {}
                    }
                }
                if value.is_none() {
                    value = constraints
                        .equal_targets
                        .iter()
                        .find_map(|other| result.get(other).cloned());
                }
                let Some(value) = value else {
                    continue;
                };
                if !result.contains(target) {
                    trace!(target = %target, value = %value, "solved from equalities");
                    result.insert(target.clone(), value.clone());
                    changed = true;
                }

                for other in &constraints.equal_targets {
                    if let Some(existing) = result.get(other) {
                        if !domain.is_equal(existing, &value) {
                            return Err(Conflict {
                                target: other.clone(),
                                reason: format!("equal to {target} = {value} but inferred as {existing}"),
                            });
                        }
                    }
                    changed |= map.add_equal_value(other, value.clone());
                }
                // target :> other, so other <: value
                for other in &constraints.supertype_targets {
                    changed |= map.add_subtype(other, value.clone());
                }
                // target <: other, so other :> value
                for other in &constraints.subtype_targets {
                    changed |= map.add_supertype(other, value.clone());
                }
            }
            if !changed {
                break;
            }
        }
        Ok(result)
    }
}

/// Solves targets from their lower bounds by LUB
pub struct SupertypesSolver;

impl SupertypesSolver {
    /// `solved` supplies values for targets fixed in earlier phases
    pub fn solve<D: InferenceDomain>(
        domain: &D,
        remaining: &[String],
        map: &ConstraintMap<D::Value>,
        solved: &InferenceResult<D::Value>,
    ) -> InferenceResult<D::Value> {
        let mut result = InferenceResult::new();
        // A target's LUB can feed another target's; one pass per target suffices
        for _ in 0..=remaining.len() {
            let mut changed = false;
            for target in remaining {
                let Some(constraints) = map.get(target) else {
                    continue;
                };
                let below = constraints.supertypes.iter().cloned().chain(
                    constraints
                        .supertype_targets
                        .iter()
                        .filter_map(|other| result.get(other).or_else(|| solved.get(other)).cloned()),
                );
                let lub = below.reduce(|acc, v| domain.lub(&acc, &v));
                if let Some(lub) = lub {
                    if result.get(target) != Some(&lub) {
                        result.insert(target.clone(), lub);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        result
    }
}

/// Solves targets from their upper bounds by GLB, when the GLB is defined
pub struct SubtypesSolver;

impl SubtypesSolver {
    pub fn solve<D: InferenceDomain>(
        domain: &D,
        remaining: &[String],
        map: &ConstraintMap<D::Value>,
        solved: &InferenceResult<D::Value>,
    ) -> InferenceResult<D::Value> {
        let mut result = InferenceResult::new();
        for _ in 0..=remaining.len() {
            let mut changed = false;
            for target in remaining {
                let Some(constraints) = map.get(target) else {
                    continue;
                };
                let mut above = constraints.subtypes.iter().cloned().chain(
                    constraints
                        .subtype_targets
                        .iter()
                        .filter_map(|other| result.get(other).or_else(|| solved.get(other)).cloned()),
                );
                let Some(first) = above.next() else {
                    continue;
                };
                let glb = above.try_fold(first, |acc, v| domain.glb(&acc, &v));
                if let Some(glb) = glb {
                    if result.get(target) != Some(&glb) {
                        result.insert(target.clone(), glb);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inference::{AfConstraint, Reduction, TargetUse, TuConstraint};
    use indexmap::IndexMap;

    /// Integers under `<=` with named variables; enough to exercise the solvers
    #[derive(Debug, Clone, PartialEq)]
    pub enum Num {
        Lit(i64),
        Var(String),
    }

    impl fmt::Display for Num {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Num::Lit(n) => write!(f, "{n}"),
                Num::Var(v) => write!(f, "{v}"),
            }
        }
    }

    pub struct NumDomain;

    fn lit(v: &Num) -> i64 {
        match v {
            Num::Lit(n) => *n,
            Num::Var(_) => 0,
        }
    }

    impl InferenceDomain for NumDomain {
        type Value = Num;

        fn as_target(&self, value: &Num, targets: &[String]) -> Option<String> {
            match value {
                Num::Var(v) if targets.contains(v) => Some(v.clone()),
                _ => None,
            }
        }

        fn reduce(&self, _constraint: &AfConstraint<Num>, _targets: &[String], _out: &mut Reduction<Num>) {}

        fn lub(&self, a: &Num, b: &Num) -> Num {
            Num::Lit(lit(a).max(lit(b)))
        }

        fn glb(&self, a: &Num, b: &Num) -> Option<Num> {
            Some(Num::Lit(lit(a).min(lit(b))))
        }

        fn is_subtype(&self, sub: &Num, sup: &Num) -> bool {
            lit(sub) <= lit(sup)
        }

        fn substitute(&self, value: &Num, solution: &IndexMap<String, Num>) -> Num {
            match value {
                Num::Var(v) => solution.get(v).cloned().unwrap_or_else(|| value.clone()),
                other => other.clone(),
            }
        }

        fn lower_bound(&self, _target: &str) -> Num {
            Num::Lit(0)
        }

        fn upper_bound(&self, _target: &str) -> Num {
            Num::Lit(100)
        }

        fn uninferred(&self, _target: &str) -> Num {
            Num::Lit(100)
        }
    }

    fn make_targets() -> Vec<String> {
        vec!["T".to_string(), "U".to_string()]
    }

    fn eq(target: &str, value: i64) -> TuConstraint<Num> {
        TuConstraint::Equality {
            target: target.into(),
            bound: TargetUse::Value(Num::Lit(value)),
        }
    }

    #[test]
    fn test_equalities_propagate_between_targets() {
        let mut map = ConstraintMap::build(
            &make_targets(),
            &[
                eq("T", 4),
                TuConstraint::Equality {
                    target: "U".into(),
                    bound: TargetUse::Target("T".into()),
                },
            ],
        );
        let result = EqualitiesSolver::solve(&NumDomain, &make_targets(), &mut map).unwrap();
        assert_eq!(result.get("T"), Some(&Num::Lit(4)));
        assert_eq!(result.get("U"), Some(&Num::Lit(4)));
    }

    #[test]
    fn test_conflicting_equalities() {
        let mut map = ConstraintMap::build(&make_targets(), &[eq("T", 1), eq("T", 2)]);
        let conflict = EqualitiesSolver::solve(&NumDomain, &make_targets(), &mut map).unwrap_err();
        assert_eq!(conflict.target, "T");
    }

    #[test]
    fn test_supertypes_lub_and_subtypes_glb() {
        let sup = |v| TuConstraint::Supertype {
            target: "T".into(),
            bound: TargetUse::Value(Num::Lit(v)),
        };
        let sub = |v| TuConstraint::Subtype {
            target: "U".into(),
            bound: TargetUse::Value(Num::Lit(v)),
        };
        let map = ConstraintMap::build(&make_targets(), &[sup(3), sup(7), sub(9), sub(5)]);
        let none = InferenceResult::new();
        let supers = SupertypesSolver::solve(&NumDomain, &make_targets(), &map, &none);
        assert_eq!(supers.get("T"), Some(&Num::Lit(7)));
        assert!(!supers.contains("U"));
        let subs = SubtypesSolver::solve(&NumDomain, &make_targets(), &map, &none);
        assert_eq!(subs.get("U"), Some(&Num::Lit(5)));
    }

    #[test]
    fn test_equality_feeds_bounds_of_related_targets() {
        // T = 6 and U :> T
        let mut map = ConstraintMap::build(
            &make_targets(),
            &[
                eq("T", 6),
                TuConstraint::Supertype {
                    target: "U".into(),
                    bound: TargetUse::Target("T".into()),
                },
            ],
        );
        let eqs = EqualitiesSolver::solve(&NumDomain, &make_targets(), &mut map).unwrap();
        let remaining = eqs.remaining(&make_targets());
        assert_eq!(remaining, vec!["U".to_string()]);
        let supers = SupertypesSolver::solve(&NumDomain, &remaining, &map, &eqs);
        assert_eq!(supers.get("U"), Some(&Num::Lit(6)));
    }
}
