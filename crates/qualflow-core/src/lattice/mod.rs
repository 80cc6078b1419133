//! Qualifier lattices
//!
//! A checker's qualifiers form a bounded lattice:
//! - `top()` is the least informative qualifier, `bottom()` the most
//! - `is_subtype` is the partial order
//! - `least_upper_bound` / `greatest_lower_bound` are join and meet
//!
//! Join must be commutative and associative; the dataflow engine relies on it to make
//! the fixed point independent of merge order.

mod graph;

pub use graph::{GraphHierarchy, GraphHierarchyBuilder};

use crate::error::Result;
use std::fmt;
use std::hash::Hash;

/// A ground qualifier value. Implemented for every type with the right shape.
pub trait Qualifier: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> Qualifier for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// The partial order and lattice operations of one qualifier hierarchy
pub trait QualifierHierarchy: Send + Sync {
    type Qual: Qualifier;

    fn top(&self) -> Self::Qual;

    fn bottom(&self) -> Self::Qual;

    fn is_subtype(&self, sub: &Self::Qual, sup: &Self::Qual) -> bool;

    fn least_upper_bound(&self, a: &Self::Qual, b: &Self::Qual) -> Self::Qual;

    /// Meet. Fails for hierarchies where the meet is undefined for some operands
    /// (qualifier variables in parameterized qualifiers).
    fn greatest_lower_bound(&self, a: &Self::Qual, b: &Self::Qual) -> Result<Self::Qual>;

    /// The polymorphic qualifier of this hierarchy, if it has one
    fn polymorphic_qualifier(&self) -> Option<Self::Qual> {
        None
    }

    fn is_equal(&self, a: &Self::Qual, b: &Self::Qual) -> bool {
        a == b || (self.is_subtype(a, b) && self.is_subtype(b, a))
    }
}

/// Object-safe view used by the engine once a checker has been selected
pub type DynHierarchy<Q> = dyn QualifierHierarchy<Qual = Q>;

/// Fold [`QualifierHierarchy::least_upper_bound`] over `quals`; `None` when empty.
pub fn lub_all<'a, H, Q>(hierarchy: &H, quals: impl IntoIterator<Item = &'a Q>) -> Option<Q>
where
    H: QualifierHierarchy<Qual = Q> + ?Sized,
    Q: Qualifier,
{
    quals.into_iter().fold(None, |acc, q| match acc {
        None => Some(q.clone()),
        Some(lub) => Some(hierarchy.least_upper_bound(&lub, q)),
    })
}

/// Fold [`QualifierHierarchy::greatest_lower_bound`] over `quals`; `Ok(None)` when empty.
pub fn glb_all<'a, H, Q>(hierarchy: &H, quals: impl IntoIterator<Item = &'a Q>) -> Result<Option<Q>>
where
    H: QualifierHierarchy<Qual = Q> + ?Sized,
    Q: Qualifier,
{
    let mut acc: Option<Q> = None;
    for q in quals {
        acc = Some(match acc {
            None => q.clone(),
            Some(glb) => hierarchy.greatest_lower_bound(&glb, q)?,
        });
    }
    Ok(acc)
}

impl<H: QualifierHierarchy + ?Sized> QualifierHierarchy for Box<H> {
    type Qual = H::Qual;

    fn top(&self) -> Self::Qual {
        (**self).top()
    }

    fn bottom(&self) -> Self::Qual {
        (**self).bottom()
    }

    fn is_subtype(&self, sub: &Self::Qual, sup: &Self::Qual) -> bool {
        (**self).is_subtype(sub, sup)
    }

    fn least_upper_bound(&self, a: &Self::Qual, b: &Self::Qual) -> Self::Qual {
        (**self).least_upper_bound(a, b)
    }

    fn greatest_lower_bound(&self, a: &Self::Qual, b: &Self::Qual) -> Result<Self::Qual> {
        (**self).greatest_lower_bound(a, b)
    }

    fn polymorphic_qualifier(&self) -> Option<Self::Qual> {
        (**self).polymorphic_qualifier()
    }
}
