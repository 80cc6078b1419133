//! Abstract values and per-program-point stores

use crate::hir::{Body, ExprId, ExprKind, JavaType, Literal};
use crate::lattice::{DynHierarchy, Qualifier};
use indexmap::IndexMap;
use std::fmt;

/// A normalised expression whose qualifier a [`Store`] can track
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlowExpr {
    Local(String),
    This,
    Field {
        receiver: Box<FlowExpr>,
        field: String,
    },
    ArrayAccess {
        array: Box<FlowExpr>,
        index: Box<FlowExpr>,
    },
    /// A call to a side-effect-free method; the receiver is absent for static calls
    MethodCall {
        receiver: Option<Box<FlowExpr>>,
        method: String,
        args: Vec<FlowExpr>,
    },
    /// Synthesised temporary for a call or object-creation result
    Temp(String),
    Literal(String),
}

impl FlowExpr {
    pub fn local(name: impl Into<String>) -> Self {
        FlowExpr::Local(name.into())
    }

    pub fn field(receiver: FlowExpr, field: impl Into<String>) -> Self {
        FlowExpr::Field {
            receiver: Box::new(receiver),
            field: field.into(),
        }
    }

    /// Temporary naming the result of expression `id`
    pub fn temp_for(id: ExprId) -> Self {
        FlowExpr::Temp(format!("tmp#{}", id.0))
    }

    /// Normalise a host expression. Calls are only trackable when the callee is
    /// side-effect-free (or `assume_pure` is set); anything else yields `None`.
    pub fn from_expr(body: &Body, id: ExprId, assume_pure: bool) -> Option<FlowExpr> {
        match body.kind(id)? {
            ExprKind::Local(name) => Some(FlowExpr::Local(name.clone())),
            ExprKind::This => Some(FlowExpr::This),
            ExprKind::Paren(inner) => FlowExpr::from_expr(body, *inner, assume_pure),
            ExprKind::FieldAccess { receiver, field } => Some(FlowExpr::Field {
                receiver: Box::new(FlowExpr::from_expr(body, *receiver, assume_pure)?),
                field: field.clone(),
            }),
            ExprKind::ArrayAccess { array, index } => Some(FlowExpr::ArrayAccess {
                array: Box::new(FlowExpr::from_expr(body, *array, assume_pure)?),
                index: Box::new(FlowExpr::from_expr(body, *index, assume_pure)?),
            }),
            ExprKind::Literal(lit) => Some(FlowExpr::Literal(render_literal(lit))),
            ExprKind::MethodCall { receiver, method, args } => {
                if !(method.side_effect_free || assume_pure) {
                    return None;
                }
                let receiver = match receiver {
                    Some(r) => Some(Box::new(FlowExpr::from_expr(body, *r, assume_pure)?)),
                    None if method.is_static => None,
                    None => Some(Box::new(FlowExpr::This)),
                };
                let args = args
                    .iter()
                    .map(|a| FlowExpr::from_expr(body, *a, assume_pure))
                    .collect::<Option<Vec<_>>>()?;
                Some(FlowExpr::MethodCall {
                    receiver,
                    method: method.name.clone(),
                    args,
                })
            }
            _ => None,
        }
    }

    /// Whether `other` occurs anywhere inside `self` (including `self` itself)
    pub fn contains(&self, other: &FlowExpr) -> bool {
        if self == other {
            return true;
        }
        match self {
            FlowExpr::Field { receiver, .. } => receiver.contains(other),
            FlowExpr::ArrayAccess { array, index } => array.contains(other) || index.contains(other),
            FlowExpr::MethodCall { receiver, args, .. } => {
                receiver.as_ref().is_some_and(|r| r.contains(other)) || args.iter().any(|a| a.contains(other))
            }
            _ => false,
        }
    }

    /// Whether code outside the current method can change this expression's value
    pub fn is_heap_dependent(&self) -> bool {
        match self {
            FlowExpr::Field { .. } | FlowExpr::ArrayAccess { .. } | FlowExpr::MethodCall { .. } => true,
            FlowExpr::Local(_) | FlowExpr::This | FlowExpr::Temp(_) | FlowExpr::Literal(_) => false,
        }
    }

    pub fn is_trackable(&self) -> bool {
        !matches!(self, FlowExpr::Literal(_))
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(i) => i.to_string(),
        Literal::Long(i) => format!("{i}L"),
        Literal::Char(c) => format!("'{c}'"),
        Literal::Str(s) => format!("\"{s}\""),
        Literal::Bool(b) => b.to_string(),
        Literal::Null => "null".to_string(),
    }
}

impl fmt::Display for FlowExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowExpr::Local(name) | FlowExpr::Temp(name) | FlowExpr::Literal(name) => write!(f, "{name}"),
            FlowExpr::This => write!(f, "this"),
            FlowExpr::Field { receiver, field } => write!(f, "{receiver}.{field}"),
            FlowExpr::ArrayAccess { array, index } => write!(f, "{array}[{index}]"),
            FlowExpr::MethodCall { receiver, method, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                match receiver {
                    Some(r) => write!(f, "{r}.{method}({})", args.join(", ")),
                    None => write!(f, "{method}({})", args.join(", ")),
                }
            }
        }
    }
}

/// A qualifier attached to an underlying type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbstractValue<Q> {
    pub qual: Q,
    pub ty: JavaType,
}

impl<Q: Qualifier> AbstractValue<Q> {
    pub fn new(qual: Q, ty: JavaType) -> Self {
        Self { qual, ty }
    }

    pub fn with_qual(&self, qual: Q) -> Self {
        Self {
            qual,
            ty: self.ty.clone(),
        }
    }

    pub fn lub(&self, other: &Self, h: &DynHierarchy<Q>) -> Self {
        self.with_qual(h.least_upper_bound(&self.qual, &other.qual))
    }

    /// The more precise of the two. Falls back to `other` when the meet is undefined.
    pub fn most_specific(&self, other: &Self, h: &DynHierarchy<Q>) -> Self {
        match h.greatest_lower_bound(&self.qual, &other.qual) {
            Ok(qual) => other.with_qual(qual),
            Err(_) => other.clone(),
        }
    }

    pub fn is_subtype_of(&self, other: &Self, h: &DynHierarchy<Q>) -> bool {
        h.is_subtype(&self.qual, &other.qual)
    }
}

impl<Q: fmt::Display> fmt::Display for AbstractValue<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.qual, self.ty)
    }
}

/// Map from tracked expressions to what is known about them at one program point.
///
/// Stores are values: branches clone them and merges build a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store<Q> {
    values: IndexMap<FlowExpr, AbstractValue<Q>>,
}

impl<Q: Qualifier> Store<Q> {
    pub fn new() -> Self {
        Self {
            values: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowExpr, &AbstractValue<Q>)> {
        self.values.iter()
    }

    pub fn get_value(&self, expr: &FlowExpr) -> Option<&AbstractValue<Q>> {
        self.values.get(expr)
    }

    /// Record `value` for `expr`, keeping the most specific of the old and new value
    pub fn insert_value(&mut self, expr: FlowExpr, value: AbstractValue<Q>, h: &DynHierarchy<Q>) {
        if !expr.is_trackable() {
            return;
        }
        let merged = match self.values.get(&expr) {
            Some(old) => old.most_specific(&value, h),
            None => value,
        };
        self.values.insert(expr, merged);
    }

    /// Overwrite whatever was known about `expr`
    pub fn replace_value(&mut self, expr: FlowExpr, value: AbstractValue<Q>) {
        if expr.is_trackable() {
            self.values.insert(expr, value);
        }
    }

    pub fn clear_value(&mut self, expr: &FlowExpr) {
        self.values.shift_remove(expr);
    }

    /// Forget everything that may depend on `target`, then record its new value.
    ///
    /// Writing a field also invalidates every field of the same name (aliasing) and all
    /// call results; writing an array element invalidates every array element.
    pub fn update_for_assignment(&mut self, target: &FlowExpr, value: Option<AbstractValue<Q>>) {
        let aliasing = |key: &FlowExpr| match (target, key) {
            (FlowExpr::Field { field: a, .. }, FlowExpr::Field { field: b, .. }) => a == b,
            (FlowExpr::ArrayAccess { .. }, FlowExpr::ArrayAccess { .. }) => true,
            (FlowExpr::Field { .. } | FlowExpr::ArrayAccess { .. }, FlowExpr::MethodCall { .. }) => true,
            _ => false,
        };
        self.values
            .retain(|key, _| !(key != target && key.contains(target)) && !(key != target && aliasing(key)));
        match value {
            Some(v) => self.replace_value(target.clone(), v),
            None => self.clear_value(target),
        }
    }

    /// Drop heap-dependent facts after a call unless the callee cannot change them
    pub fn update_for_method_call(&mut self, side_effect_free: bool) {
        if side_effect_free {
            return;
        }
        self.values.retain(|key, _| !key.is_heap_dependent());
    }

    /// Join: only expressions known in both stores survive, with the LUB of their values
    pub fn least_upper_bound(&self, other: &Store<Q>, h: &DynHierarchy<Q>) -> Store<Q> {
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| other.values.get(k).map(|w| (k.clone(), v.lub(w, h))))
            .collect();
        Store { values }
    }

    /// Whether every fact here is also known in `other`, at least as precisely
    pub fn is_subset_of(&self, other: &Store<Q>, h: &DynHierarchy<Q>) -> bool {
        self.values
            .iter()
            .all(|(k, v)| other.values.get(k).is_some_and(|w| w.is_subtype_of(v, h)))
    }
}

impl<Q: Qualifier> Default for Store<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: fmt::Display> fmt::Display for Store<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {}", v.qual)?;
        }
        write!(f, "}}")
    }
}
