//! Argument/formal constraints and their target/use normal form

use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;

/// Relation between an argument (or assignment context) and a formal that mentions
/// inference targets
#[derive(Debug, Clone, PartialEq)]
pub enum AfConstraint<V> {
    /// The argument flows into the formal: `argument <: formal`
    A2F { argument: V, formal: V },
    /// The formal flows into the argument: `formal <: argument`
    F2A { formal: V, argument: V },
    /// The formal is exactly the argument
    FIsA { formal: V, argument: V },
}

impl<V> AfConstraint<V> {
    pub fn formal(&self) -> &V {
        match self {
            AfConstraint::A2F { formal, .. } | AfConstraint::F2A { formal, .. } | AfConstraint::FIsA { formal, .. } => {
                formal
            }
        }
    }

    pub fn argument(&self) -> &V {
        match self {
            AfConstraint::A2F { argument, .. }
            | AfConstraint::F2A { argument, .. }
            | AfConstraint::FIsA { argument, .. } => argument,
        }
    }

    /// Same relation over different values
    pub fn rebuild(&self, formal: V, argument: V) -> Self {
        match self {
            AfConstraint::A2F { .. } => AfConstraint::A2F { argument, formal },
            AfConstraint::F2A { .. } => AfConstraint::F2A { formal, argument },
            AfConstraint::FIsA { .. } => AfConstraint::FIsA { formal, argument },
        }
    }

    pub fn map<W>(&self, mut f: impl FnMut(&V) -> W) -> AfConstraint<W> {
        match self {
            AfConstraint::A2F { argument, formal } => AfConstraint::A2F {
                argument: f(argument),
                formal: f(formal),
            },
            AfConstraint::F2A { formal, argument } => AfConstraint::F2A {
                formal: f(formal),
                argument: f(argument),
            },
            AfConstraint::FIsA { formal, argument } => AfConstraint::FIsA {
                formal: f(formal),
                argument: f(argument),
            },
        }
    }
}

impl<V: fmt::Display> fmt::Display for AfConstraint<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AfConstraint::A2F { argument, formal } => write!(f, "{argument} << {formal}"),
            AfConstraint::F2A { formal, argument } => write!(f, "{formal} << {argument}"),
            AfConstraint::FIsA { formal, argument } => write!(f, "{formal} = {argument}"),
        }
    }
}

/// Right-hand side of a [`TuConstraint`]: a concrete value or another target
#[derive(Debug, Clone, PartialEq)]
pub enum TargetUse<V> {
    Value(V),
    Target(String),
}

impl<V: fmt::Display> fmt::Display for TargetUse<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetUse::Value(v) => write!(f, "{v}"),
            TargetUse::Target(t) => write!(f, "{t}"),
        }
    }
}

/// Constraint on one target
#[derive(Debug, Clone, PartialEq)]
pub enum TuConstraint<V> {
    /// `target :> bound`
    Supertype { target: String, bound: TargetUse<V> },
    /// `target <: bound`
    Subtype { target: String, bound: TargetUse<V> },
    Equality { target: String, bound: TargetUse<V> },
}

impl<V> TuConstraint<V> {
    pub fn target(&self) -> &str {
        match self {
            TuConstraint::Supertype { target, .. }
            | TuConstraint::Subtype { target, .. }
            | TuConstraint::Equality { target, .. } => target,
        }
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, TuConstraint::Equality { .. })
    }
}

impl<V: fmt::Display> fmt::Display for TuConstraint<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuConstraint::Supertype { target, bound } => write!(f, "{target} :> {bound}"),
            TuConstraint::Subtype { target, bound } => write!(f, "{target} <: {bound}"),
            TuConstraint::Equality { target, bound } => write!(f, "{target} = {bound}"),
        }
    }
}

/// Everything known about one target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConstraints<V> {
    pub equal_values: Vec<V>,
    pub equal_targets: BTreeSet<String>,
    /// Values the target must be a supertype of (its lower bounds)
    pub supertypes: Vec<V>,
    pub supertype_targets: BTreeSet<String>,
    /// Values the target must be a subtype of (its upper bounds)
    pub subtypes: Vec<V>,
    pub subtype_targets: BTreeSet<String>,
}

impl<V> Default for TargetConstraints<V> {
    fn default() -> Self {
        Self {
            equal_values: Vec::new(),
            equal_targets: BTreeSet::new(),
            supertypes: Vec::new(),
            supertype_targets: BTreeSet::new(),
            subtypes: Vec::new(),
            subtype_targets: BTreeSet::new(),
        }
    }
}

fn push_unique<V: PartialEq>(list: &mut Vec<V>, value: V) -> bool {
    if list.contains(&value) {
        return false;
    }
    list.push(value);
    true
}

/// Per-target view of a set of [`TuConstraint`]s
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintMap<V> {
    targets: IndexMap<String, TargetConstraints<V>>,
}

impl<V: Clone + PartialEq> ConstraintMap<V> {
    pub fn build(targets: &[String], constraints: &[TuConstraint<V>]) -> Self {
        let mut map = Self {
            targets: targets
                .iter()
                .map(|t| (t.clone(), TargetConstraints::default()))
                .collect(),
        };
        for constraint in constraints {
            map.add(constraint.clone());
        }
        map
    }

    pub fn add(&mut self, constraint: TuConstraint<V>) {
        match constraint {
            TuConstraint::Equality { target, bound } => match bound {
                TargetUse::Value(v) => {
                    self.add_equal_value(&target, v);
                }
                TargetUse::Target(other) if other != target => {
                    self.entry(&target).equal_targets.insert(other.clone());
                    self.entry(&other).equal_targets.insert(target);
                }
                TargetUse::Target(_) => {}
            },
            TuConstraint::Supertype { target, bound } => match bound {
                TargetUse::Value(v) => {
                    self.add_supertype(&target, v);
                }
                TargetUse::Target(other) if other != target => {
                    self.entry(&target).supertype_targets.insert(other.clone());
                    self.entry(&other).subtype_targets.insert(target);
                }
                TargetUse::Target(_) => {}
            },
            TuConstraint::Subtype { target, bound } => match bound {
                TargetUse::Value(v) => {
                    self.add_subtype(&target, v);
                }
                TargetUse::Target(other) if other != target => {
                    self.entry(&target).subtype_targets.insert(other.clone());
                    self.entry(&other).supertype_targets.insert(target);
                }
                TargetUse::Target(_) => {}
            },
        }
    }

    fn entry(&mut self, target: &str) -> &mut TargetConstraints<V> {
        self.targets.entry(target.to_string()).or_default()
    }

    /// True when the value was not already recorded
    pub fn add_equal_value(&mut self, target: &str, value: V) -> bool {
        push_unique(&mut self.entry(target).equal_values, value)
    }

    /// True when the value was not already recorded
    pub fn add_supertype(&mut self, target: &str, value: V) -> bool {
        push_unique(&mut self.entry(target).supertypes, value)
    }

    /// True when the value was not already recorded
    pub fn add_subtype(&mut self, target: &str, value: V) -> bool {
        push_unique(&mut self.entry(target).subtypes, value)
    }

    pub fn get(&self, target: &str) -> Option<&TargetConstraints<V>> {
        self.targets.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &String> {
        self.targets.keys()
    }
}

/// Partial solution: inferred value per target, in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult<V> {
    values: IndexMap<String, V>,
}

impl<V: Clone> InferenceResult<V> {
    pub fn new() -> Self {
        Self { values: IndexMap::new() }
    }

    pub fn get(&self, target: &str) -> Option<&V> {
        self.values.get(target)
    }

    pub fn insert(&mut self, target: impl Into<String>, value: V) {
        self.values.insert(target.into(), value);
    }

    pub fn contains(&self, target: &str) -> bool {
        self.values.contains_key(target)
    }

    pub fn is_complete(&self, targets: &[String]) -> bool {
        targets.iter().all(|t| self.values.contains_key(t))
    }

    /// Targets without a value yet
    pub fn remaining(&self, targets: &[String]) -> Vec<String> {
        targets.iter().filter(|t| !self.values.contains_key(*t)).cloned().collect()
    }

    /// Add `other`'s values for targets this result does not solve; existing values win
    pub fn merge_subordinate(&mut self, other: &InferenceResult<V>) {
        for (target, value) in &other.values {
            if !self.values.contains_key(target) {
                self.values.insert(target.clone(), value.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &IndexMap<String, V> {
        &self.values
    }

    pub fn into_map(self) -> IndexMap<String, V> {
        self.values
    }
}

impl<V: Clone> Default for InferenceResult<V> {
    fn default() -> Self {
        Self::new()
    }
}
