//! A type's full set of qualifier parameters

use super::value::ParamValue;
use crate::error::Result;
use crate::lattice::{Qualifier, QualifierHierarchy};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter name used for a type's own (primary) qualifier
pub const PRIMARY: &str = "Main";

/// Mapping from parameter name to value, plus the TOP and BOTTOM sentinels.
///
/// The sentinels are distinct from a map whose every entry is the ground top or
/// bottom: they compare above (below) every map regardless of its key set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QualParams<Q> {
    Top,
    Bottom,
    Params(BTreeMap<String, ParamValue<Q>>),
}

impl<Q: Qualifier> QualParams<Q> {
    pub fn new() -> Self {
        QualParams::Params(BTreeMap::new())
    }

    /// A single primary parameter
    pub fn primary(value: ParamValue<Q>) -> Self {
        Self::new().with(PRIMARY, value)
    }

    pub fn with(self, name: impl Into<String>, value: ParamValue<Q>) -> Self {
        match self {
            QualParams::Params(mut map) => {
                map.insert(name.into(), value);
                QualParams::Params(map)
            }
            sentinel => sentinel,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue<Q>> {
        match self {
            QualParams::Params(map) => map.get(name),
            _ => None,
        }
    }

    pub fn primary_value(&self) -> Option<&ParamValue<Q>> {
        self.get(PRIMARY)
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, QualParams::Params(_))
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            QualParams::Params(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue<Q>)> {
        let map = match self {
            QualParams::Params(map) => Some(map),
            _ => None,
        };
        map.into_iter().flat_map(|m| m.iter())
    }

    /// Every qualifier variable mentioned by any parameter
    pub fn var_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (_, value) in self.iter() {
            for n in value.var_names() {
                if !names.contains(&n) {
                    names.push(n);
                }
            }
        }
        names
    }

    pub fn substitute<H>(&self, name: &str, value: &ParamValue<Q>, h: &H) -> Self
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match self {
            QualParams::Params(map) => QualParams::Params(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.substitute(name, value, h)))
                    .collect(),
            ),
            sentinel => sentinel.clone(),
        }
    }

    /// Substitute every variable in `values` at once
    pub fn substitute_all<'a, H>(&self, values: impl IntoIterator<Item = (&'a String, &'a ParamValue<Q>)>, h: &H) -> Self
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        values
            .into_iter()
            .fold(self.clone(), |acc, (name, value)| acc.substitute(name, value, h))
    }

    fn same_keys(a: &BTreeMap<String, ParamValue<Q>>, b: &BTreeMap<String, ParamValue<Q>>) -> bool {
        a.len() == b.len() && a.keys().zip(b.keys()).all(|(x, y)| x == y)
    }

    /// Pointwise containment over identical key sets, with sentinel short-circuits
    pub fn is_subtype<H>(&self, sup: &Self, h: &H) -> bool
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match (self, sup) {
            (_, QualParams::Top) | (QualParams::Bottom, _) => true,
            (QualParams::Top, _) | (_, QualParams::Bottom) => false,
            (QualParams::Params(a), QualParams::Params(b)) => {
                Self::same_keys(a, b) && a.iter().all(|(k, v)| b.get(k).is_some_and(|t| v.contained_in(t, h)))
            }
        }
    }

    pub fn lub<H>(&self, other: &Self, h: &H) -> Self
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match (self, other) {
            (QualParams::Bottom, x) | (x, QualParams::Bottom) => x.clone(),
            (QualParams::Top, _) | (_, QualParams::Top) => QualParams::Top,
            (QualParams::Params(a), QualParams::Params(b)) => {
                if !Self::same_keys(a, b) {
                    return QualParams::Top;
                }
                QualParams::Params(
                    a.iter()
                        .filter_map(|(k, v)| b.get(k).map(|w| (k.clone(), v.lub(w, h))))
                        .collect(),
                )
            }
        }
    }

    pub fn glb<H>(&self, other: &Self, h: &H) -> Result<Self>
    where
        H: QualifierHierarchy<Qual = Q> + ?Sized,
    {
        match (self, other) {
            (QualParams::Top, x) | (x, QualParams::Top) => Ok(x.clone()),
            (QualParams::Bottom, _) | (_, QualParams::Bottom) => Ok(QualParams::Bottom),
            (QualParams::Params(a), QualParams::Params(b)) => {
                if !Self::same_keys(a, b) {
                    return Ok(QualParams::Bottom);
                }
                let mut map = BTreeMap::new();
                for (k, v) in a {
                    if let Some(w) = b.get(k) {
                        // No value fits both sides: only bottom is below them
                        let Some(glb) = v.glb(w, h)? else {
                            return Ok(QualParams::Bottom);
                        };
                        map.insert(k.clone(), glb);
                    }
                }
                Ok(QualParams::Params(map))
            }
        }
    }
}

impl<Q: Qualifier> Default for QualParams<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: fmt::Display> fmt::Display for QualParams<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualParams::Top => write!(f, "TOP"),
            QualParams::Bottom => write!(f, "BOTTOM"),
            QualParams::Params(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "<<{}>>", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{GraphHierarchy, GraphHierarchyBuilder};
    use crate::qualparams::ParamValue;

    fn make_ground() -> GraphHierarchy<&'static str> {
        GraphHierarchyBuilder::new()
            .subtype("untainted", "tainted")
            .build()
            .unwrap()
    }

    fn params(main: ParamValue<&'static str>) -> QualParams<&'static str> {
        QualParams::primary(main)
    }

    #[test]
    fn test_sentinels() {
        let h = make_ground();
        let p = params(ParamValue::base("tainted"));
        assert!(p.is_subtype(&QualParams::Top, &h));
        assert!(QualParams::Bottom.is_subtype(&p, &h));
        assert!(!QualParams::Top.is_subtype(&p, &h));
        assert_eq!(p.lub(&QualParams::Bottom, &h), p);
        assert_eq!(QualParams::Bottom.lub(&p, &h), p);
        assert_eq!(p.lub(&QualParams::Top, &h), QualParams::Top);
        assert_eq!(p.glb(&QualParams::Top, &h).unwrap(), p);
    }

    #[test]
    fn test_pointwise_containment_is_invariant() {
        let h = make_ground();
        let untainted = params(ParamValue::base("untainted"));
        let tainted = params(ParamValue::base("tainted"));
        // Non-wildcard parameters are invariant
        assert!(!untainted.is_subtype(&tainted, &h));
        let range = params(ParamValue::wildcard("untainted", "tainted"));
        assert!(untainted.is_subtype(&range, &h));
        assert!(tainted.is_subtype(&range, &h));
    }

    #[test]
    fn test_distinct_plain_values_are_bounded() {
        let h = make_ground();
        let untainted = params(ParamValue::base("untainted"));
        let tainted = params(ParamValue::base("tainted"));
        let lub = untainted.lub(&tainted, &h);
        assert_eq!(lub, params(ParamValue::wildcard("untainted", "tainted")));
        assert!(untainted.is_subtype(&lub, &h));
        assert!(tainted.is_subtype(&lub, &h));
        assert_eq!(untainted.glb(&tainted, &h).unwrap(), QualParams::Bottom);
    }

    #[test]
    fn test_key_mismatch() {
        let h = make_ground();
        let a = params(ParamValue::base("tainted"));
        let b = a.clone().with("Elem", ParamValue::base("tainted"));
        assert!(!a.is_subtype(&b, &h));
        assert_eq!(a.lub(&b, &h), QualParams::Top);
        assert_eq!(a.glb(&b, &h).unwrap(), QualParams::Bottom);
    }

    #[test]
    fn test_substitute_all() {
        let h = make_ground();
        let p = params(ParamValue::var("Q", "untainted", "tainted"));
        let mut values = BTreeMap::new();
        values.insert("Q".to_string(), ParamValue::base("untainted"));
        let resolved = p.substitute_all(&values, &h);
        assert_eq!(resolved, params(ParamValue::base("untainted")));
        assert!(resolved.var_names().is_empty());
    }

    #[test]
    fn test_display() {
        let p = params(ParamValue::base("tainted"));
        assert_eq!(p.to_string(), "<<Main=tainted>>");
        assert_eq!(QualParams::<&str>::Top.to_string(), "TOP");
    }
}
