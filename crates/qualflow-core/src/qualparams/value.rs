//! Polymorphic qualifier expressions

use crate::error::{QualflowError, Result};
use crate::lattice::{Qualifier, QualifierHierarchy};
use std::fmt;

/// A named qualifier variable with ground bounds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualVar<Q> {
    pub name: String,
    pub lower: Q,
    pub upper: Q,
}

impl<Q: Qualifier> QualVar<Q> {
    pub fn new(name: impl Into<String>, lower: Q, upper: Q) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }
}

/// Deferred least upper bound of unresolved variables and a ground residual.
///
/// Variables are kept sorted by name and unique, so two deferred LUBs over the same
/// variables compare equal regardless of the order they were joined in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LubQual<Q> {
    vars: Vec<QualVar<Q>>,
    residual: Q,
}

impl<Q: Qualifier> LubQual<Q> {
    pub fn new(vars: impl IntoIterator<Item = QualVar<Q>>, residual: Q) -> Self {
        let mut lub = Self {
            vars: Vec::new(),
            residual,
        };
        for var in vars {
            lub.add_var(var);
        }
        lub
    }

    fn add_var(&mut self, var: QualVar<Q>) {
        match self.vars.binary_search_by(|v| v.name.cmp(&var.name)) {
            Ok(_) => {}
            Err(pos) => self.vars.insert(pos, var),
        }
    }

    pub fn vars(&self) -> &[QualVar<Q>] {
        &self.vars
    }

    pub fn residual(&self) -> &Q {
        &self.residual
    }

    pub fn contains_var(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.name == name)
    }
}

/// A qualifier in a parameter position: ground, a wildcard range, a variable, or a
/// deferred LUB.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue<Q> {
    Base(Q),
    Wildcard {
        lower: Box<ParamValue<Q>>,
        upper: Box<ParamValue<Q>>,
    },
    Var(QualVar<Q>),
    Lub(LubQual<Q>),
}

impl<Q: Qualifier> ParamValue<Q> {
    pub fn base(q: Q) -> Self {
        ParamValue::Base(q)
    }

    pub fn wildcard(lower: Q, upper: Q) -> Self {
        ParamValue::Wildcard {
            lower: Box::new(ParamValue::Base(lower)),
            upper: Box::new(ParamValue::Base(upper)),
        }
    }

    pub fn var(name: impl Into<String>, lower: Q, upper: Q) -> Self {
        ParamValue::Var(QualVar::new(name, lower, upper))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, ParamValue::Wildcard { .. })
    }

    pub fn as_base(&self) -> Option<&Q> {
        match self {
            ParamValue::Base(q) => Some(q),
            _ => None,
        }
    }

    /// Whether any variable occurs in this value
    pub fn has_vars(&self) -> bool {
        match self {
            ParamValue::Base(_) => false,
            ParamValue::Wildcard { lower, upper } => lower.has_vars() || upper.has_vars(),
            ParamValue::Var(_) | ParamValue::Lub(_) => true,
        }
    }

    /// Names of every variable occurring in this value
    pub fn var_names(&self) -> Vec<String> {
        match self {
            ParamValue::Base(_) => Vec::new(),
            ParamValue::Wildcard { lower, upper } => {
                let mut names = lower.var_names();
                for n in upper.var_names() {
                    if !names.contains(&n) {
                        names.push(n);
                    }
                }
                names
            }
            ParamValue::Var(v) => vec![v.name.clone()],
            ParamValue::Lub(l) => l.vars.iter().map(|v| v.name.clone()).collect(),
        }
    }

    /// The most precise ground qualifier this value can take
    pub fn minimum<H>(&self, h: &H) -> Q
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match self {
            ParamValue::Base(q) => q.clone(),
            ParamValue::Wildcard { lower, .. } => lower.minimum(h),
            ParamValue::Var(v) => v.lower.clone(),
            ParamValue::Lub(l) => l
                .vars
                .iter()
                .fold(l.residual.clone(), |acc, v| h.least_upper_bound(&acc, &v.lower)),
        }
    }

    /// The least precise ground qualifier this value can take
    pub fn maximum<H>(&self, h: &H) -> Q
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match self {
            ParamValue::Base(q) => q.clone(),
            ParamValue::Wildcard { upper, .. } => upper.maximum(h),
            ParamValue::Var(v) => v.upper.clone(),
            ParamValue::Lub(l) => l
                .vars
                .iter()
                .fold(l.residual.clone(), |acc, v| h.least_upper_bound(&acc, &v.upper)),
        }
    }

    /// Replace the variable `name` with `value`. Deferred LUBs fold the value into their
    /// residual and collapse to `Base` once no variables remain.
    pub fn substitute<H>(&self, name: &str, value: &ParamValue<Q>, h: &H) -> ParamValue<Q>
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match self {
            ParamValue::Base(_) => self.clone(),
            ParamValue::Var(v) if v.name == name => value.clone(),
            ParamValue::Var(_) => self.clone(),
            ParamValue::Wildcard { lower, upper } => ParamValue::Wildcard {
                lower: Box::new(lower.substitute(name, value, h)),
                upper: Box::new(upper.substitute(name, value, h)),
            },
            ParamValue::Lub(l) if !l.contains_var(name) => self.clone(),
            ParamValue::Lub(l) => {
                let remaining: Vec<QualVar<Q>> = l.vars.iter().filter(|v| v.name != name).cloned().collect();
                let rest = if remaining.is_empty() {
                    ParamValue::Base(l.residual.clone())
                } else {
                    ParamValue::Lub(LubQual::new(remaining, l.residual.clone()))
                };
                rest.lub(value, h)
            }
        }
    }

    /// Least upper bound under containment. Distinct ground values join as the smallest
    /// range containing both; anything involving a variable is deferred into a [`LubQual`].
    pub fn lub<H>(&self, other: &ParamValue<Q>, h: &H) -> ParamValue<Q>
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            _ if !self.has_vars() && !other.has_vars() => {
                // A plain value is only contained in itself, so two of them widen to a range
                let lower = h
                    .greatest_lower_bound(&self.minimum(h), &other.minimum(h))
                    .unwrap_or_else(|_| h.bottom());
                let upper = h.least_upper_bound(&self.maximum(h), &other.maximum(h));
                ParamValue::wildcard(lower, upper)
            }
            _ => {
                let mut vars = Vec::new();
                let mut residual = h.bottom();
                for side in [self, other] {
                    match side {
                        ParamValue::Var(v) => vars.push(v.clone()),
                        ParamValue::Lub(l) => {
                            vars.extend(l.vars.iter().cloned());
                            residual = h.least_upper_bound(&residual, &l.residual);
                        }
                        ParamValue::Base(q) => residual = h.least_upper_bound(&residual, q),
                        ParamValue::Wildcard { .. } => {
                            residual = h.least_upper_bound(&residual, &side.maximum(h));
                        }
                    }
                }
                ParamValue::Lub(LubQual::new(vars, residual))
            }
        }
    }

    /// Greatest lower bound under containment, `None` when no value is contained in both
    /// (two distinct plain values, or disjoint ranges). Not defined when either side
    /// mentions a variable.
    pub fn glb<H>(&self, other: &ParamValue<Q>, h: &H) -> Result<Option<ParamValue<Q>>>
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        if self == other {
            return Ok(Some(self.clone()));
        }
        if self.has_vars() || other.has_vars() {
            return Err(QualflowError::UnsupportedGlb(format!("{self} and {other}")));
        }
        if self.contained_in(other, h) {
            return Ok(Some(self.clone()));
        }
        if other.contained_in(self, h) {
            return Ok(Some(other.clone()));
        }
        match (self, other) {
            (ParamValue::Wildcard { .. }, ParamValue::Wildcard { .. }) => {
                let lower = h.least_upper_bound(&self.minimum(h), &other.minimum(h));
                let upper = h.greatest_lower_bound(&self.maximum(h), &other.maximum(h))?;
                Ok(h.is_subtype(&lower, &upper).then(|| ParamValue::wildcard(lower, upper)))
            }
            _ => Ok(None),
        }
    }

    /// Whether `self` is contained in `target`: range containment when `target` is a
    /// wildcard, equality otherwise.
    pub fn contained_in<H>(&self, target: &ParamValue<Q>, h: &H) -> bool
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match target {
            ParamValue::Wildcard { lower, upper } => {
                h.is_subtype(&lower.maximum(h), &self.minimum(h)) && h.is_subtype(&self.maximum(h), &upper.minimum(h))
            }
            _ => match (self, target) {
                (ParamValue::Base(a), ParamValue::Base(b)) => h.is_equal(a, b),
                _ => self == target,
            },
        }
    }
}

impl<Q: fmt::Display> fmt::Display for ParamValue<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Base(q) => write!(f, "{q}"),
            ParamValue::Wildcard { lower, upper } => write!(f, "? super {lower} extends {upper}"),
            ParamValue::Var(v) => write!(f, "{}", v.name),
            ParamValue::Lub(l) => {
                let mut parts: Vec<String> = l.vars.iter().map(|v| v.name.clone()).collect();
                parts.push(l.residual.to_string());
                write!(f, "lub({})", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{GraphHierarchy, GraphHierarchyBuilder};

    /// tainted > maybe > untainted
    fn make_chain() -> GraphHierarchy<&'static str> {
        GraphHierarchyBuilder::new()
            .subtype("untainted", "maybe")
            .subtype("maybe", "tainted")
            .build()
            .unwrap()
    }

    fn var(name: &str) -> ParamValue<&'static str> {
        ParamValue::var(name, "untainted", "tainted")
    }

    #[test]
    fn test_base_min_max() {
        let h = make_chain();
        let v = ParamValue::base("maybe");
        assert_eq!(v.minimum(&h), "maybe");
        assert_eq!(v.maximum(&h), "maybe");
    }

    #[test]
    fn test_containment_in_wildcard() {
        let h = make_chain();
        let range = ParamValue::wildcard("untainted", "maybe");
        assert!(ParamValue::base("untainted").contained_in(&range, &h));
        assert!(ParamValue::base("maybe").contained_in(&range, &h));
        assert!(!ParamValue::base("tainted").contained_in(&range, &h));
    }

    #[test]
    fn test_containment_without_wildcard_is_equality() {
        let h = make_chain();
        assert!(ParamValue::base("maybe").contained_in(&ParamValue::base("maybe"), &h));
        assert!(!ParamValue::base("untainted").contained_in(&ParamValue::base("maybe"), &h));
        assert!(var("T").contained_in(&var("T"), &h));
        assert!(!var("T").contained_in(&var("U"), &h));
    }

    #[test]
    fn test_lub_of_vars_is_deferred() {
        let h = make_chain();
        let lub = var("T").lub(&ParamValue::base("maybe"), &h);
        match &lub {
            ParamValue::Lub(l) => {
                assert_eq!(l.vars().len(), 1);
                assert_eq!(*l.residual(), "maybe");
            }
            other => panic!("expected deferred lub, got {other}"),
        }
        assert_eq!(lub.minimum(&h), "maybe");
        assert_eq!(lub.maximum(&h), "tainted");
    }

    #[test]
    fn test_lub_is_order_independent() {
        let h = make_chain();
        let a = var("T").lub(&var("U"), &h);
        let b = var("U").lub(&var("T"), &h);
        assert_eq!(a, b);
    }

    #[test]
    fn test_substitute_collapses_lub() {
        let h = make_chain();
        let lub = var("T").lub(&var("U"), &h);
        let partial = lub.substitute("T", &ParamValue::base("untainted"), &h);
        assert!(matches!(partial, ParamValue::Lub(_)));
        let done = partial.substitute("U", &ParamValue::base("maybe"), &h);
        assert_eq!(done, ParamValue::base("maybe"));
    }

    #[test]
    fn test_substitute_var_with_var() {
        let h = make_chain();
        let lub = var("T").lub(&ParamValue::base("untainted"), &h);
        let renamed = lub.substitute("T", &var("S"), &h);
        assert_eq!(renamed.var_names(), vec!["S".to_string()]);
    }

    #[test]
    fn test_glb_over_vars_unsupported() {
        let h = make_chain();
        let result = var("T").glb(&ParamValue::base("maybe"), &h);
        assert!(matches!(result, Err(QualflowError::UnsupportedGlb(_))));
        assert_eq!(ParamValue::base("maybe").glb(&ParamValue::base("tainted"), &h).unwrap(), None);
    }

    #[test]
    fn test_plain_values_join_as_range() {
        let h = make_chain();
        let a = ParamValue::base("untainted");
        let b = ParamValue::base("tainted");
        let lub = a.lub(&b, &h);
        assert_eq!(lub, ParamValue::wildcard("untainted", "tainted"));
        assert!(a.contained_in(&lub, &h));
        assert!(b.contained_in(&lub, &h));
    }

    #[test]
    fn test_glb_keeps_contained_value_or_intersects() {
        let h = make_chain();
        let range = ParamValue::wildcard("untainted", "tainted");
        assert_eq!(
            ParamValue::base("maybe").glb(&range, &h).unwrap(),
            Some(ParamValue::base("maybe"))
        );
        let upper = ParamValue::wildcard("maybe", "tainted");
        let lower = ParamValue::wildcard("untainted", "maybe");
        assert_eq!(upper.glb(&lower, &h).unwrap(), Some(ParamValue::wildcard("maybe", "maybe")));
        let top_only = ParamValue::wildcard("tainted", "tainted");
        assert_eq!(top_only.glb(&ParamValue::wildcard("untainted", "untainted"), &h).unwrap(), None);
        assert_eq!(ParamValue::base("untainted").glb(&upper, &h).unwrap(), None);
    }

    #[test]
    fn test_wildcard_lub_widens_range() {
        let h = make_chain();
        let a = ParamValue::wildcard("maybe", "maybe");
        let b = ParamValue::base("untainted");
        let lub = a.lub(&b, &h);
        assert_eq!(lub, ParamValue::wildcard("untainted", "maybe"));
        assert!(a.contained_in(&lub, &h));
        assert!(b.contained_in(&lub, &h));
    }
}
