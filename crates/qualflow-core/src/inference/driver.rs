//! Phase driver shared by every inference domain

use super::constraints::{AfConstraint, ConstraintMap, InferenceResult, TargetUse, TuConstraint};
use super::solvers::{Conflict, EqualitiesSolver, SubtypesSolver, SupertypesSolver};
use super::{InferenceDomain, Reduction};
use crate::error::{QualflowError, Result};
use indexmap::IndexMap;
use tracing::debug;

/// Result of one inference run
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome<V> {
    /// A value for every target, including placeholders for unconstrained ones
    Inferred(IndexMap<String, V>),
    Unsatisfiable { target: String, reason: String },
}

impl<V> InferenceOutcome<V> {
    pub fn is_satisfiable(&self) -> bool {
        matches!(self, InferenceOutcome::Inferred(_))
    }

    pub fn into_result(self) -> Result<IndexMap<String, V>> {
        match self {
            InferenceOutcome::Inferred(values) => Ok(values),
            InferenceOutcome::Unsatisfiable { target, reason } => Err(QualflowError::Unsatisfiable { target, reason }),
        }
    }
}

impl<V> From<Conflict> for InferenceOutcome<V> {
    fn from(conflict: Conflict) -> Self {
        InferenceOutcome::Unsatisfiable {
            target: conflict.target,
            reason: conflict.reason,
        }
    }
}

/// Infers `targets` for one call from its arguments, formals and assignment context
pub struct TypeArgInference<'d, D: InferenceDomain> {
    domain: &'d D,
    targets: Vec<String>,
    show_steps: bool,
}

impl<'d, D: InferenceDomain> TypeArgInference<'d, D> {
    pub fn new(domain: &'d D, targets: Vec<String>) -> Self {
        Self {
            domain,
            targets,
            show_steps: false,
        }
    }

    /// Log every constraint and intermediate solution
    pub fn show_steps(mut self, show: bool) -> Self {
        self.show_steps = show;
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Reduce raw constraints until each one is a target/use constraint
    pub fn reduce_all(&self, constraints: Vec<AfConstraint<D::Value>>) -> Vec<TuConstraint<D::Value>> {
        let mut queue = constraints;
        let mut seen: Vec<AfConstraint<D::Value>> = Vec::new();
        let mut out = Vec::new();
        while let Some(constraint) = queue.pop() {
            if seen.contains(&constraint) {
                continue;
            }
            seen.push(constraint.clone());

            if let Some(target) = self.domain.as_target(constraint.formal(), &self.targets) {
                let bound = match self.domain.as_target(constraint.argument(), &self.targets) {
                    Some(other) => TargetUse::Target(other),
                    None => TargetUse::Value(constraint.argument().clone()),
                };
                let tu = self.domain.target_constraint(&constraint, target, bound);
                if self.show_steps {
                    debug!(from = %constraint, to = %tu, "reduced to target constraint");
                }
                out.push(tu);
                continue;
            }

            let mut reduction = Reduction::default();
            self.domain.reduce(&constraint, &self.targets, &mut reduction);
            if self.show_steps && (!reduction.constraints.is_empty() || !reduction.targets.is_empty()) {
                debug!(
                    from = %constraint,
                    nested = reduction.constraints.len(),
                    direct = reduction.targets.len(),
                    "reduced structurally"
                );
            }
            queue.extend(reduction.constraints);
            out.extend(reduction.targets);
        }
        out
    }

    /// `arguments[i]` flows into `formals[i]`; each `assignment` pair is a declared
    /// return position and the value the result is assigned to. An empty slice means the
    /// call has no assignment context.
    pub fn infer(
        &self,
        arguments: &[D::Value],
        formals: &[D::Value],
        assignment: &[(D::Value, D::Value)],
    ) -> InferenceOutcome<D::Value> {
        match self.run(arguments, formals, assignment) {
            Ok(result) => InferenceOutcome::Inferred(result),
            Err(conflict) => {
                if self.show_steps {
                    debug!(target = %conflict.target, reason = %conflict.reason, "inference unsatisfiable");
                }
                conflict.into()
            }
        }
    }

    fn argument_constraints(&self, arguments: &[D::Value], formals: &[D::Value]) -> Vec<AfConstraint<D::Value>> {
        arguments
            .iter()
            .zip(formals)
            .map(|(argument, formal)| AfConstraint::A2F {
                argument: argument.clone(),
                formal: formal.clone(),
            })
            .collect()
    }

    fn run(
        &self,
        arguments: &[D::Value],
        formals: &[D::Value],
        assignment: &[(D::Value, D::Value)],
    ) -> std::result::Result<IndexMap<String, D::Value>, Conflict> {
        let domain = self.domain;
        let targets = &self.targets;

        // Arguments
        let arg_constraints = self.argument_constraints(arguments, formals);
        let reduced = self.reduce_all(arg_constraints.clone());
        let mut map = ConstraintMap::build(targets, &reduced);
        let mut inferred = EqualitiesSolver::solve(domain, targets, &mut map)?;
        if self.show_steps {
            self.log_phase("argument equalities", &inferred);
        }

        let remaining = inferred.remaining(targets);
        let mut bounded = SupertypesSolver::solve(domain, &remaining, &map, &inferred);
        let from_subtypes = SubtypesSolver::solve(domain, &bounded.remaining(&remaining), &map, &inferred);
        bounded.merge_subordinate(&from_subtypes);
        let mut clamped = InferenceResult::new();
        for (target, value) in bounded.iter() {
            let lower = domain.lower_bound(target);
            let value = if domain.is_subtype(value, &lower) { lower } else { value.clone() };
            clamped.insert(target.clone(), value);
        }
        if self.show_steps {
            self.log_phase("argument bounds", &clamped);
        }

        if assignment.is_empty() {
            inferred.merge_subordinate(&clamped);
            return Ok(self.finish(inferred));
        }

        // Assignment context, equalities only, combined with the argument bounds
        let assign_af = assignment
            .iter()
            .map(|(ret, assigned)| AfConstraint::F2A {
                formal: ret.clone(),
                argument: assigned.clone(),
            })
            .collect();
        let mut assign_map = ConstraintMap::build(targets, &self.reduce_all(assign_af));
        let from_assignment = EqualitiesSolver::solve(domain, targets, &mut assign_map)?;
        let mut combined = InferenceResult::new();
        for target in inferred.remaining(targets) {
            let value = match (clamped.get(&target), from_assignment.get(&target)) {
                (Some(sup), Some(eq)) if domain.is_subtype(sup, eq) => eq.clone(),
                (Some(sup), _) => sup.clone(),
                (None, Some(eq)) => eq.clone(),
                (None, None) => continue,
            };
            combined.insert(target, value);
        }
        inferred.merge_subordinate(&combined);
        if inferred.is_complete(targets) {
            return Ok(self.finish(inferred));
        }

        // Still open: solve against the full assignment context
        let mut constraints = Vec::new();
        for target in inferred.remaining(targets) {
            let var = self.target_value(&target, formals, assignment);
            if let Some(var) = var {
                constraints.push(AfConstraint::F2A {
                    formal: var.clone(),
                    argument: domain.upper_bound(&target),
                });
                constraints.push(AfConstraint::A2F {
                    argument: domain.lower_bound(&target),
                    formal: var,
                });
            }
        }
        constraints.extend(arg_constraints.iter().map(|c| match c {
            AfConstraint::A2F { argument, formal } => AfConstraint::F2A {
                formal: formal.clone(),
                argument: argument.clone(),
            },
            other => other.clone(),
        }));
        for (ret, assigned) in assignment {
            constraints.push(AfConstraint::F2A {
                formal: domain.substitute(ret, inferred.as_map()),
                argument: assigned.clone(),
            });
        }

        let mut late_map = ConstraintMap::build(targets, &self.reduce_all(constraints));
        let late_eq = EqualitiesSolver::solve(domain, targets, &mut late_map)?;
        let late_remaining = late_eq.remaining(targets);
        let late_sub = SubtypesSolver::solve(domain, &late_remaining, &late_map, &late_eq);
        inferred.merge_subordinate(&late_eq);
        inferred.merge_subordinate(&late_sub);
        if self.show_steps {
            self.log_phase("assignment context", &inferred);
        }
        Ok(self.finish(inferred))
    }

    /// A value that is a bare use of `target`, taken from the formals or the returns
    fn target_value(&self, target: &str, formals: &[D::Value], assignment: &[(D::Value, D::Value)]) -> Option<D::Value> {
        formals
            .iter()
            .chain(assignment.iter().map(|(ret, _)| ret))
            .find(|v| self.domain.as_target(v, &self.targets).as_deref() == Some(target))
            .cloned()
    }

    fn finish(&self, mut inferred: InferenceResult<D::Value>) -> IndexMap<String, D::Value> {
        for target in inferred.remaining(&self.targets) {
            let placeholder = self.domain.uninferred(&target);
            if self.show_steps {
                debug!(target = %target, value = %placeholder, "uninferred");
            }
            inferred.insert(target, placeholder);
        }
        // Report in declaration order
        let values = inferred.into_map();
        self.targets
            .iter()
            .filter_map(|t| values.get(t).map(|v| (t.clone(), v.clone())))
            .collect()
    }

    fn log_phase(&self, phase: &str, result: &InferenceResult<D::Value>) {
        for (target, value) in result.iter() {
            debug!(phase, target = %target, value = %value, "inferred");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::solvers::tests::{Num, NumDomain};

    fn make_inference(domain: &NumDomain) -> TypeArgInference<'_, NumDomain> {
        TypeArgInference::new(domain, vec!["T".to_string()])
    }

    fn var() -> Num {
        Num::Var("T".into())
    }

    #[test]
    fn test_lub_of_arguments() {
        let domain = NumDomain;
        let outcome = make_inference(&domain).infer(&[Num::Lit(3), Num::Lit(8)], &[var(), var()], &[]);
        let values = outcome.into_result().unwrap();
        assert_eq!(values["T"], Num::Lit(8));
    }

    #[test]
    fn test_unconstrained_target_is_uninferred() {
        let domain = NumDomain;
        let outcome = make_inference(&domain).infer(&[Num::Lit(3)], &[Num::Lit(5)], &[]);
        assert_eq!(outcome.into_result().unwrap()["T"], Num::Lit(100));
    }

    #[test]
    fn test_assignment_context_fills_open_target() {
        let domain = NumDomain;
        let outcome = make_inference(&domain).infer(&[], &[], &[(var(), Num::Lit(40))]);
        // T <: 40 and T <: upper bound
        assert_eq!(outcome.into_result().unwrap()["T"], Num::Lit(40));
    }

    #[test]
    fn test_unsatisfiable_maps_to_error() {
        let outcome: InferenceOutcome<Num> = Conflict {
            target: "T".into(),
            reason: "no value".into(),
        }
        .into();
        assert!(!outcome.is_satisfiable());
        assert!(matches!(outcome.into_result(), Err(QualflowError::Unsatisfiable { .. })));
    }
}
