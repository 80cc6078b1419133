//! Lattice over [`QualParams`] lifted from a ground hierarchy

use super::params::QualParams;
use crate::error::Result;
use crate::lattice::QualifierHierarchy;

/// Wraps a ground hierarchy `H` and orders whole parameter maps
#[derive(Debug, Clone)]
pub struct QualParamsHierarchy<H> {
    ground: H,
}

impl<H: QualifierHierarchy> QualParamsHierarchy<H> {
    pub fn new(ground: H) -> Self {
        Self { ground }
    }

    pub fn ground(&self) -> &H {
        &self.ground
    }
}

impl<H: QualifierHierarchy> QualifierHierarchy for QualParamsHierarchy<H> {
    type Qual = QualParams<H::Qual>;

    fn top(&self) -> Self::Qual {
        QualParams::Top
    }

    fn bottom(&self) -> Self::Qual {
        QualParams::Bottom
    }

    fn is_subtype(&self, sub: &Self::Qual, sup: &Self::Qual) -> bool {
        sub.is_subtype(sup, &self.ground)
    }

    fn least_upper_bound(&self, a: &Self::Qual, b: &Self::Qual) -> Self::Qual {
        a.lub(b, &self.ground)
    }

    fn greatest_lower_bound(&self, a: &Self::Qual, b: &Self::Qual) -> Result<Self::Qual> {
        a.glb(b, &self.ground)
    }
}
