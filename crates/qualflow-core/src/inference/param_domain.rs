//! Inference over qualifier parameters (`ParamValue`s inside `QualParams`)

use super::constraints::{AfConstraint, TargetUse, TuConstraint};
use super::driver::{InferenceOutcome, TypeArgInference};
use super::{InferenceDomain, Reduction};
use crate::lattice::{Qualifier, QualifierHierarchy};
use crate::qualparams::{ParamValue, QualParams, QualVar};
use indexmap::IndexMap;

/// Targets are qualifier variables; values are parameter values over the ground
/// hierarchy `H`
pub struct ParamDomain<'h, H: QualifierHierarchy + ?Sized> {
    h: &'h H,
    vars: IndexMap<String, QualVar<H::Qual>>,
    conservative: bool,
}

impl<'h, H: QualifierHierarchy + ?Sized> ParamDomain<'h, H> {
    pub fn new(h: &'h H) -> Self {
        Self {
            h,
            vars: IndexMap::new(),
            conservative: false,
        }
    }

    /// Uninferred variables become their upper bound instead of a wildcard
    pub fn conservative(mut self, conservative: bool) -> Self {
        self.conservative = conservative;
        self
    }

    pub fn with_var(mut self, var: QualVar<H::Qual>) -> Self {
        self.vars.entry(var.name.clone()).or_insert(var);
        self
    }

    /// Register every variable occurring in `params`
    pub fn with_vars_of(mut self, params: &QualParams<H::Qual>) -> Self {
        for (_, value) in params.iter() {
            collect_vars(value, &mut self.vars);
        }
        self
    }

    pub fn targets(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    fn target_of(&self, value: &ParamValue<H::Qual>) -> Option<String> {
        match value {
            ParamValue::Var(v) if self.vars.contains_key(&v.name) => Some(v.name.clone()),
            _ => None,
        }
    }

    fn base(&self, q: H::Qual) -> TargetUse<ParamValue<H::Qual>> {
        TargetUse::Value(ParamValue::Base(q))
    }
}

fn collect_vars<Q: Qualifier>(value: &ParamValue<Q>, out: &mut IndexMap<String, QualVar<Q>>) {
    match value {
        ParamValue::Base(_) => {}
        ParamValue::Var(v) => {
            out.entry(v.name.clone()).or_insert_with(|| v.clone());
        }
        ParamValue::Wildcard { lower, upper } => {
            collect_vars(lower, out);
            collect_vars(upper, out);
        }
        ParamValue::Lub(l) => {
            for v in l.vars() {
                out.entry(v.name.clone()).or_insert_with(|| v.clone());
            }
        }
    }
}

impl<H: QualifierHierarchy + ?Sized> InferenceDomain for ParamDomain<'_, H> {
    type Value = ParamValue<H::Qual>;

    fn as_target(&self, value: &Self::Value, targets: &[String]) -> Option<String> {
        self.target_of(value).filter(|t| targets.contains(t))
    }

    fn reduce(&self, constraint: &AfConstraint<Self::Value>, targets: &[String], out: &mut Reduction<Self::Value>) {
        let h = self.h;
        let target = |v: &ParamValue<H::Qual>| self.as_target(v, targets);
        match (constraint, constraint.formal(), constraint.argument()) {
            // Argument must lie inside the formal's range
            (AfConstraint::A2F { .. } | AfConstraint::FIsA { .. }, ParamValue::Wildcard { lower, upper }, argument)
                if !argument.has_vars() =>
            {
                if let Some(t) = target(lower) {
                    out.targets.push(TuConstraint::Subtype {
                        target: t,
                        bound: self.base(argument.minimum(h)),
                    });
                }
                if let Some(u) = target(upper) {
                    out.targets.push(TuConstraint::Supertype {
                        target: u,
                        bound: self.base(argument.maximum(h)),
                    });
                }
            }
            // The formal's range must lie inside the assigned range
            (AfConstraint::F2A { .. }, ParamValue::Wildcard { lower, upper }, argument) if !argument.has_vars() => {
                let (low, high) = match argument {
                    ParamValue::Wildcard { lower, upper } => (lower.maximum(h), upper.minimum(h)),
                    other => (other.minimum(h), other.maximum(h)),
                };
                if let Some(t) = target(lower) {
                    out.targets.push(TuConstraint::Supertype {
                        target: t,
                        bound: self.base(low),
                    });
                }
                if let Some(u) = target(upper) {
                    out.targets.push(TuConstraint::Subtype {
                        target: u,
                        bound: self.base(high),
                    });
                }
            }
            _ => {}
        }
    }

    /// A variable in a non-wildcard position is invariant, except that a result flowing
    /// into a wildcard only has to fit under its upper bound
    fn target_constraint(
        &self,
        constraint: &AfConstraint<Self::Value>,
        target: String,
        bound: TargetUse<Self::Value>,
    ) -> TuConstraint<Self::Value> {
        match (constraint, &bound) {
            (AfConstraint::F2A { .. }, TargetUse::Value(ParamValue::Wildcard { upper, .. })) => TuConstraint::Subtype {
                target,
                bound: self.base(upper.minimum(self.h)),
            },
            _ => TuConstraint::Equality { target, bound },
        }
    }

    /// Bounds are ordered by their ground qualifiers here, so two plain bounds join
    /// to the ground LUB rather than to the containment range
    fn lub(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        match (a, b) {
            (ParamValue::Base(x), ParamValue::Base(y)) => ParamValue::base(self.h.least_upper_bound(x, y)),
            _ => a.lub(b, self.h),
        }
    }

    fn glb(&self, a: &Self::Value, b: &Self::Value) -> Option<Self::Value> {
        if a.has_vars() || b.has_vars() {
            return None;
        }
        let h = self.h;
        match (a, b) {
            (ParamValue::Base(x), ParamValue::Base(y)) => h.greatest_lower_bound(x, y).ok().map(ParamValue::base),
            _ => {
                let lower = h.least_upper_bound(&a.minimum(h), &b.minimum(h));
                let upper = h.greatest_lower_bound(&a.maximum(h), &b.maximum(h)).ok()?;
                Some(ParamValue::wildcard(lower, upper))
            }
        }
    }

    fn is_subtype(&self, sub: &Self::Value, sup: &Self::Value) -> bool {
        let h = self.h;
        h.is_subtype(&sub.minimum(h), &sup.minimum(h)) && h.is_subtype(&sub.maximum(h), &sup.maximum(h))
    }

    fn substitute(&self, value: &Self::Value, solution: &IndexMap<String, Self::Value>) -> Self::Value {
        solution
            .iter()
            .fold(value.clone(), |acc, (name, v)| acc.substitute(name, v, self.h))
    }

    fn lower_bound(&self, target: &str) -> Self::Value {
        match self.vars.get(target) {
            Some(v) => ParamValue::Base(v.lower.clone()),
            None => ParamValue::Base(self.h.bottom()),
        }
    }

    fn upper_bound(&self, target: &str) -> Self::Value {
        match self.vars.get(target) {
            Some(v) => ParamValue::Base(v.upper.clone()),
            None => ParamValue::Base(self.h.top()),
        }
    }

    fn uninferred(&self, target: &str) -> Self::Value {
        let (lower, upper) = match self.vars.get(target) {
            Some(v) => (v.lower.clone(), v.upper.clone()),
            None => (self.h.bottom(), self.h.top()),
        };
        if self.conservative {
            ParamValue::Base(upper)
        } else {
            ParamValue::wildcard(lower, upper)
        }
    }
}

/// Value `args` supplies for parameter `key`; sentinels stand for the ground extremes
fn param_of<H: QualifierHierarchy + ?Sized>(params: &QualParams<H::Qual>, key: &str, h: &H) -> Option<ParamValue<H::Qual>> {
    match params {
        QualParams::Top => Some(ParamValue::Base(h.top())),
        QualParams::Bottom => Some(ParamValue::Base(h.bottom())),
        QualParams::Params(_) => params.get(key).cloned(),
    }
}

/// Flatten formal/actual parameter maps key by key, keeping positions that mention variables
fn flatten<H: QualifierHierarchy + ?Sized>(
    formals: &[&QualParams<H::Qual>],
    actuals: &[&QualParams<H::Qual>],
    h: &H,
) -> (Vec<ParamValue<H::Qual>>, Vec<ParamValue<H::Qual>>) {
    let mut fs = Vec::new();
    let mut xs = Vec::new();
    for (formal, actual) in formals.iter().zip(actuals) {
        for (key, value) in formal.iter() {
            if !value.has_vars() {
                continue;
            }
            if let Some(x) = param_of(actual, key, h) {
                fs.push(value.clone());
                xs.push(x);
            }
        }
    }
    (fs, xs)
}

/// Infer the qualifier variables of one call. `formals[i]` receives `args[i]`; `ret` and
/// `assigned` give the assignment context when the result is assigned somewhere.
pub fn infer_qual_params<H: QualifierHierarchy + ?Sized>(
    h: &H,
    formals: &[QualParams<H::Qual>],
    args: &[QualParams<H::Qual>],
    ret: Option<&QualParams<H::Qual>>,
    assigned: Option<&QualParams<H::Qual>>,
    conservative: bool,
    show_steps: bool,
) -> InferenceOutcome<ParamValue<H::Qual>> {
    let mut domain = ParamDomain::new(h).conservative(conservative);
    for formal in formals.iter().chain(ret) {
        domain = domain.with_vars_of(formal);
    }
    let targets = domain.targets();
    if targets.is_empty() {
        return InferenceOutcome::Inferred(IndexMap::new());
    }

    let formal_refs: Vec<_> = formals.iter().collect();
    let arg_refs: Vec<_> = args.iter().collect();
    let (fs, xs) = flatten(&formal_refs, &arg_refs, h);
    let assignment: Vec<_> = match (ret, assigned) {
        (Some(ret), Some(assigned)) => {
            let (rs, ts) = flatten(&[ret], &[assigned], h);
            rs.into_iter().zip(ts).collect()
        }
        _ => Vec::new(),
    };

    TypeArgInference::new(&domain, targets)
        .show_steps(show_steps)
        .infer(&xs, &fs, &assignment)
}
