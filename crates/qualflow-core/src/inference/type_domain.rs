//! Inference over qualified types, for generic-method type arguments

use super::constraints::AfConstraint;
use super::{InferenceDomain, Reduction};
use crate::hir::JavaType;
use crate::lattice::{DynHierarchy, Qualifier};
use indexmap::IndexMap;
use std::fmt;

/// A Java type with a qualifier on every position that can carry one
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QualType<Q> {
    /// Bare use of a method type parameter
    Var(String),
    Declared {
        qual: Q,
        name: String,
        args: Vec<QualType<Q>>,
    },
    Array {
        qual: Q,
        component: Box<QualType<Q>>,
    },
    /// Primitives, null and anything without nested positions
    Simple { qual: Q, ty: JavaType },
}

impl<Q: Qualifier> QualType<Q> {
    pub fn qual(&self) -> Option<&Q> {
        match self {
            QualType::Var(_) => None,
            QualType::Declared { qual, .. } | QualType::Array { qual, .. } | QualType::Simple { qual, .. } => Some(qual),
        }
    }

    pub fn with_qual(&self, new: Q) -> Self {
        match self {
            QualType::Var(_) => self.clone(),
            QualType::Declared { name, args, .. } => QualType::Declared {
                qual: new,
                name: name.clone(),
                args: args.clone(),
            },
            QualType::Array { component, .. } => QualType::Array {
                qual: new,
                component: component.clone(),
            },
            QualType::Simple { ty, .. } => QualType::Simple { qual: new, ty: ty.clone() },
        }
    }

    /// Qualify `ty`: `top` on the outermost position, `nested` on the rest.
    /// Type variables named in `targets` become [`QualType::Var`].
    pub fn from_java(ty: &JavaType, top: Q, nested: &dyn Fn(&JavaType) -> Q, targets: &[String]) -> Self {
        match ty {
            JavaType::TypeVar(name) if targets.contains(name) => QualType::Var(name.clone()),
            JavaType::Declared { name, type_args } => QualType::Declared {
                qual: top,
                name: name.clone(),
                args: type_args
                    .iter()
                    .map(|arg| Self::from_java(arg, nested(arg), nested, targets))
                    .collect(),
            },
            JavaType::Array(component) => QualType::Array {
                qual: top,
                component: Box::new(Self::from_java(component, nested(component), nested, targets)),
            },
            other => QualType::Simple {
                qual: top,
                ty: other.clone(),
            },
        }
    }

    /// Whether the type mentions target `name` anywhere
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            QualType::Var(v) => v == name,
            QualType::Declared { args, .. } => args.iter().any(|a| a.mentions(name)),
            QualType::Array { component, .. } => component.mentions(name),
            QualType::Simple { .. } => false,
        }
    }
}

impl<Q: fmt::Display> fmt::Display for QualType<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualType::Var(name) => write!(f, "{name}"),
            QualType::Declared { qual, name, args } => {
                write!(f, "{qual} {name}")?;
                if !args.is_empty() {
                    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                    write!(f, "<{}>", args.join(", "))?;
                }
                Ok(())
            }
            QualType::Array { qual, component } => write!(f, "{component} {qual} []"),
            QualType::Simple { qual, ty } => write!(f, "{qual} {ty}"),
        }
    }
}

/// Declared bounds of one method type parameter
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBounds<Q> {
    pub lower: Q,
    pub upper: Q,
    /// Erased upper bound type
    pub ty: JavaType,
}

pub struct TypeDomain<'h, Q: Qualifier> {
    hierarchy: &'h DynHierarchy<Q>,
    bounds: IndexMap<String, TargetBounds<Q>>,
}

impl<'h, Q: Qualifier> TypeDomain<'h, Q> {
    pub fn new(hierarchy: &'h DynHierarchy<Q>) -> Self {
        Self {
            hierarchy,
            bounds: IndexMap::new(),
        }
    }

    pub fn with_bounds(mut self, target: impl Into<String>, bounds: TargetBounds<Q>) -> Self {
        self.bounds.insert(target.into(), bounds);
        self
    }

    pub fn targets(&self) -> Vec<String> {
        self.bounds.keys().cloned().collect()
    }

    fn bound_type(&self, target: &str, qual: Q) -> QualType<Q> {
        let ty = self
            .bounds
            .get(target)
            .map(|b| b.ty.clone())
            .unwrap_or_else(|| JavaType::declared("Object"));
        QualType::Simple { qual, ty }
    }

    fn map_qual(&self, a: &QualType<Q>, b: &QualType<Q>, f: impl Fn(&Q, &Q) -> Option<Q>) -> Option<QualType<Q>> {
        match (a.qual(), b.qual()) {
            (Some(x), Some(y)) => f(x, y).map(|q| a.with_qual(q)),
            (None, _) => Some(b.clone()),
            (_, None) => Some(a.clone()),
        }
    }
}

impl<Q: Qualifier> InferenceDomain for TypeDomain<'_, Q> {
    type Value = QualType<Q>;

    fn as_target(&self, value: &QualType<Q>, targets: &[String]) -> Option<String> {
        match value {
            QualType::Var(name) if targets.contains(name) => Some(name.clone()),
            _ => None,
        }
    }

    fn reduce(&self, constraint: &AfConstraint<QualType<Q>>, _targets: &[String], out: &mut Reduction<QualType<Q>>) {
        match (constraint.formal(), constraint.argument()) {
            (
                QualType::Declared {
                    name: formal_name,
                    args: formal_args,
                    ..
                },
                QualType::Declared {
                    name: arg_name,
                    args: arg_args,
                    ..
                },
            ) if formal_name == arg_name => {
                // Type arguments are invariant
                for (formal, argument) in formal_args.iter().zip(arg_args) {
                    out.constraints.push(AfConstraint::FIsA {
                        formal: formal.clone(),
                        argument: argument.clone(),
                    });
                }
            }
            (QualType::Array { component: formal, .. }, QualType::Array { component: argument, .. }) => {
                out.constraints
                    .push(constraint.rebuild((**formal).clone(), (**argument).clone()));
            }
            _ => {}
        }
    }

    fn lub(&self, a: &QualType<Q>, b: &QualType<Q>) -> QualType<Q> {
        self.map_qual(a, b, |x, y| Some(self.hierarchy.least_upper_bound(x, y)))
            .unwrap_or_else(|| a.clone())
    }

    fn glb(&self, a: &QualType<Q>, b: &QualType<Q>) -> Option<QualType<Q>> {
        self.map_qual(a, b, |x, y| self.hierarchy.greatest_lower_bound(x, y).ok())
    }

    fn is_subtype(&self, sub: &QualType<Q>, sup: &QualType<Q>) -> bool {
        match (sub, sup) {
            (QualType::Var(a), QualType::Var(b)) => a == b,
            (
                QualType::Declared {
                    qual: q1,
                    name: n1,
                    args: a1,
                },
                QualType::Declared {
                    qual: q2,
                    name: n2,
                    args: a2,
                },
            ) if n1 == n2 => {
                self.hierarchy.is_subtype(q1, q2)
                    && a1.len() == a2.len()
                    && a1.iter().zip(a2).all(|(x, y)| self.is_equal(x, y))
            }
            (
                QualType::Array {
                    qual: q1,
                    component: c1,
                },
                QualType::Array {
                    qual: q2,
                    component: c2,
                },
            ) => self.hierarchy.is_subtype(q1, q2) && self.is_subtype(c1, c2),
            _ => match (sub.qual(), sup.qual()) {
                (Some(a), Some(b)) => self.hierarchy.is_subtype(a, b),
                _ => false,
            },
        }
    }

    fn substitute(&self, value: &QualType<Q>, solution: &IndexMap<String, QualType<Q>>) -> QualType<Q> {
        match value {
            QualType::Var(name) => solution.get(name).cloned().unwrap_or_else(|| value.clone()),
            QualType::Declared { qual, name, args } => QualType::Declared {
                qual: qual.clone(),
                name: name.clone(),
                args: args.iter().map(|a| self.substitute(a, solution)).collect(),
            },
            QualType::Array { qual, component } => QualType::Array {
                qual: qual.clone(),
                component: Box::new(self.substitute(component, solution)),
            },
            QualType::Simple { .. } => value.clone(),
        }
    }

    fn lower_bound(&self, target: &str) -> QualType<Q> {
        let qual = self
            .bounds
            .get(target)
            .map(|b| b.lower.clone())
            .unwrap_or_else(|| self.hierarchy.bottom());
        self.bound_type(target, qual)
    }

    fn upper_bound(&self, target: &str) -> QualType<Q> {
        let qual = self
            .bounds
            .get(target)
            .map(|b| b.upper.clone())
            .unwrap_or_else(|| self.hierarchy.top());
        self.bound_type(target, qual)
    }

    fn uninferred(&self, target: &str) -> QualType<Q> {
        self.upper_bound(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::TypeArgInference;
    use crate::lattice::GraphHierarchyBuilder;

    fn make_hierarchy() -> Box<DynHierarchy<&'static str>> {
        Box::new(
            GraphHierarchyBuilder::new()
                .subtype("@Untainted", "@Tainted")
                .build()
                .unwrap(),
        )
    }

    fn string(qual: &'static str) -> QualType<&'static str> {
        QualType::Simple {
            qual,
            ty: JavaType::string(),
        }
    }

    fn list(qual: &'static str, arg: QualType<&'static str>) -> QualType<&'static str> {
        QualType::Declared {
            qual,
            name: "List".into(),
            args: vec![arg],
        }
    }

    fn make_domain<'a>(h: &'a DynHierarchy<&'static str>) -> TypeDomain<'a, &'static str> {
        TypeDomain::new(h).with_bounds(
            "T",
            TargetBounds {
                lower: "@Untainted",
                upper: "@Tainted",
                ty: JavaType::declared("Object"),
            },
        )
    }

    #[test]
    fn test_identity_picks_lub_of_arguments() {
        let h = make_hierarchy();
        let domain = make_domain(&*h);
        let t = QualType::Var("T".to_string());
        let values = TypeArgInference::new(&domain, domain.targets())
            .infer(&[string("@Untainted"), string("@Tainted")], &[t.clone(), t], &[])
            .into_result()
            .unwrap();
        assert_eq!(values["T"].qual(), Some(&"@Tainted"));
    }

    #[test]
    fn test_type_arguments_are_invariant() {
        let h = make_hierarchy();
        let domain = make_domain(&*h);
        let formal = list("@Tainted", QualType::Var("T".into()));
        let a = list("@Untainted", string("@Untainted"));
        let b = list("@Untainted", string("@Tainted"));
        let outcome = TypeArgInference::new(&domain, domain.targets()).infer(&[a, b], &[formal.clone(), formal], &[]);
        assert!(!outcome.is_satisfiable());
    }

    #[test]
    fn test_structural_subtyping() {
        let h = make_hierarchy();
        let domain = make_domain(&*h);
        assert!(domain.is_subtype(
            &list("@Untainted", string("@Tainted")),
            &list("@Tainted", string("@Tainted"))
        ));
        assert!(!domain.is_subtype(
            &list("@Untainted", string("@Untainted")),
            &list("@Tainted", string("@Tainted"))
        ));
        let ty = JavaType::generic("List", vec![JavaType::TypeVar("T".into())]);
        let qualified = QualType::from_java(&ty, "@Tainted", &|_| "@Untainted", &["T".to_string()]);
        assert_eq!(qualified, list("@Tainted", QualType::Var("T".into())));
        assert!(qualified.mentions("T"));
    }

    #[test]
    fn test_uninferred_uses_upper_bound() {
        let h = make_hierarchy();
        let domain = make_domain(&*h);
        let values = TypeArgInference::new(&domain, domain.targets())
            .infer(&[], &[], &[])
            .into_result()
            .unwrap();
        assert_eq!(values["T"].qual(), Some(&"@Tainted"));
    }
}
