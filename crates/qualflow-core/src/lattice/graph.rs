//! Finite qualifier hierarchies declared as a graph of direct-supertype edges

use super::{Qualifier, QualifierHierarchy};
use crate::error::{QualflowError, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;

/// Collects `sub <: sup` edges before validating them into a [`GraphHierarchy`]
#[derive(Debug, Clone)]
pub struct GraphHierarchyBuilder<Q: Qualifier> {
    edges: Vec<(Q, Q)>,
    isolated: Vec<Q>,
    polymorphic: Option<Q>,
}

impl<Q: Qualifier> GraphHierarchyBuilder<Q> {
    pub fn new() -> Self {
        Self {
            edges: Vec::new(),
            isolated: Vec::new(),
            polymorphic: None,
        }
    }

    /// Declare `sub` as a direct subtype of `sup`
    pub fn subtype(mut self, sub: Q, sup: Q) -> Self {
        self.edges.push((sub, sup));
        self
    }

    pub fn qualifier(mut self, qual: Q) -> Self {
        self.isolated.push(qual);
        self
    }

    /// The polymorphic qualifier must already be part of the graph.
    pub fn polymorphic(mut self, qual: Q) -> Self {
        self.polymorphic = Some(qual);
        self
    }

    pub fn build(self) -> Result<GraphHierarchy<Q>> {
        GraphHierarchy::from_edges(self.edges, self.isolated, self.polymorphic)
    }
}

impl<Q: Qualifier> Default for GraphHierarchyBuilder<Q> {
    fn default() -> Self {
        Self::new()
    }
}

/// A finite lattice with precomputed subtyping, LUB and GLB tables.
///
/// Construction rejects cycles, missing or ambiguous top/bottom, and pairs without a
/// unique least upper or greatest lower bound, so every lattice operation afterwards
/// is total.
#[derive(Debug, Clone)]
pub struct GraphHierarchy<Q: Qualifier> {
    quals: Vec<Q>,
    index: HashMap<Q, usize>,
    /// `reach[a][b]` is true when `a <: b`
    reach: Vec<Vec<bool>>,
    lub: Vec<Vec<usize>>,
    glb: Vec<Vec<usize>>,
    top: usize,
    bottom: usize,
    polymorphic: Option<Q>,
}

impl<Q: Qualifier> GraphHierarchy<Q> {
    fn from_edges(edges: Vec<(Q, Q)>, isolated: Vec<Q>, polymorphic: Option<Q>) -> Result<Self> {
        let mut graph: DiGraph<Q, ()> = DiGraph::new();
        let mut nodes: HashMap<Q, NodeIndex> = HashMap::new();

        let mut node_for = |graph: &mut DiGraph<Q, ()>, q: &Q| -> NodeIndex {
            *nodes.entry(q.clone()).or_insert_with(|| graph.add_node(q.clone()))
        };

        for q in &isolated {
            node_for(&mut graph, q);
        }
        for (sub, sup) in &edges {
            let a = node_for(&mut graph, sub);
            let b = node_for(&mut graph, sup);
            graph.update_edge(a, b, ());
        }

        if graph.node_count() == 0 {
            return Err(QualflowError::InvalidHierarchy("no qualifiers declared".into()));
        }
        if is_cyclic_directed(&graph) {
            return Err(QualflowError::InvalidHierarchy("subtype edges form a cycle".into()));
        }

        let n = graph.node_count();
        let quals: Vec<Q> = graph.node_indices().map(|i| graph[i].clone()).collect();
        let index: HashMap<Q, usize> = quals.iter().cloned().enumerate().map(|(i, q)| (q, i)).collect();

        let mut reach = vec![vec![false; n]; n];
        for start in graph.node_indices() {
            let mut dfs = Dfs::new(&graph, start);
            while let Some(reached) = dfs.next(&graph) {
                reach[start.index()][reached.index()] = true;
            }
        }

        let tops: Vec<usize> = (0..n).filter(|&t| (0..n).all(|q| reach[q][t])).collect();
        let bottoms: Vec<usize> = (0..n).filter(|&b| (0..n).all(|q| reach[b][q])).collect();
        let (top, bottom) = match (tops.as_slice(), bottoms.as_slice()) {
            ([t], [b]) => (*t, *b),
            _ => {
                return Err(QualflowError::InvalidHierarchy(
                    "hierarchy must have exactly one top and one bottom".into(),
                ))
            }
        };

        let mut lub = vec![vec![top; n]; n];
        let mut glb = vec![vec![bottom; n]; n];
        for a in 0..n {
            for b in 0..n {
                let uppers: Vec<usize> = (0..n).filter(|&u| reach[a][u] && reach[b][u]).collect();
                let least = uppers.iter().copied().find(|&u| uppers.iter().all(|&v| reach[u][v]));
                let lowers: Vec<usize> = (0..n).filter(|&l| reach[l][a] && reach[l][b]).collect();
                let greatest = lowers.iter().copied().find(|&l| lowers.iter().all(|&v| reach[v][l]));
                match (least, greatest) {
                    (Some(l), Some(g)) => {
                        lub[a][b] = l;
                        glb[a][b] = g;
                    }
                    _ => {
                        return Err(QualflowError::InvalidHierarchy(format!(
                            "{} and {} have no unique bound",
                            quals[a], quals[b]
                        )))
                    }
                }
            }
        }

        if let Some(poly) = &polymorphic {
            if !index.contains_key(poly) {
                return Err(QualflowError::InvalidHierarchy(format!(
                    "polymorphic qualifier {poly} is not in the hierarchy"
                )));
            }
        }

        Ok(Self {
            quals,
            index,
            reach,
            lub,
            glb,
            top,
            bottom,
            polymorphic,
        })
    }

    pub fn qualifiers(&self) -> &[Q] {
        &self.quals
    }

    pub fn contains(&self, qual: &Q) -> bool {
        self.index.contains_key(qual)
    }

    fn idx(&self, qual: &Q) -> Option<usize> {
        self.index.get(qual).copied()
    }
}

impl<Q: Qualifier> QualifierHierarchy for GraphHierarchy<Q> {
    type Qual = Q;

    fn top(&self) -> Q {
        self.quals[self.top].clone()
    }

    fn bottom(&self) -> Q {
        self.quals[self.bottom].clone()
    }

    fn is_subtype(&self, sub: &Q, sup: &Q) -> bool {
        match (self.idx(sub), self.idx(sup)) {
            (Some(a), Some(b)) => self.reach[a][b],
            _ => false,
        }
    }

    fn least_upper_bound(&self, a: &Q, b: &Q) -> Q {
        match (self.idx(a), self.idx(b)) {
            (Some(x), Some(y)) => self.quals[self.lub[x][y]].clone(),
            _ => self.top(),
        }
    }

    fn greatest_lower_bound(&self, a: &Q, b: &Q) -> Result<Q> {
        match (self.idx(a), self.idx(b)) {
            (Some(x), Some(y)) => Ok(self.quals[self.glb[x][y]].clone()),
            _ => Err(QualflowError::UnsupportedGlb(format!("{a} and {b}"))),
        }
    }

    fn polymorphic_qualifier(&self) -> Option<Q> {
        self.polymorphic.clone()
    }
}
