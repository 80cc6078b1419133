//! Method contracts: pre- and postconditions on receiver, parameters and fields

use crate::dataflow::FlowExpr;
use crate::error::{QualflowError, Result};
use crate::hir::{Body, ExprId, JavaType, MethodSig};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    /// Must hold at every call site, before the call
    Precondition,
    /// Holds after normal completion
    Postcondition,
    /// Holds when the method completes by throwing
    ExceptionalPostcondition,
    /// Holds after normal completion when the boolean result equals the flag
    ConditionalPostcondition(bool),
}

impl ContractKind {
    pub fn is_postcondition(self) -> bool {
        !matches!(self, ContractKind::Precondition)
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::Precondition => write!(f, "precondition"),
            ContractKind::Postcondition => write!(f, "postcondition"),
            ContractKind::ExceptionalPostcondition => write!(f, "exceptional postcondition"),
            ContractKind::ConditionalPostcondition(result) => write!(f, "postcondition when result is {result}"),
        }
    }
}

/// One contract: `expression` has `qualifier` at the point `kind` names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract<Q> {
    pub kind: ContractKind,
    pub expression: String,
    pub qualifier: Q,
}

impl<Q> Contract<Q> {
    pub fn new(kind: ContractKind, expression: impl Into<String>, qualifier: Q) -> Self {
        Self {
            kind,
            expression: expression.into(),
            qualifier,
        }
    }

    pub fn precondition(expression: impl Into<String>, qualifier: Q) -> Self {
        Self::new(ContractKind::Precondition, expression, qualifier)
    }

    pub fn postcondition(expression: impl Into<String>, qualifier: Q) -> Self {
        Self::new(ContractKind::Postcondition, expression, qualifier)
    }
}

/// Resolved contract expression, independent of how it was spelled
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContractTarget {
    Receiver,
    /// Zero-based parameter index
    Param(usize),
    ReceiverField(String),
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl ContractTarget {
    /// Resolve `this`, `#n` (1-based), a parameter name, `this.f` or a bare field name
    pub fn parse(expression: &str, sig: &MethodSig) -> Result<Self> {
        let expression = expression.trim();
        let malformed = || QualflowError::MalformedExpression(expression.to_string());
        if expression == "this" {
            return if sig.is_static { Err(malformed()) } else { Ok(ContractTarget::Receiver) };
        }
        if let Some(index) = expression.strip_prefix('#') {
            let n: usize = index.parse().map_err(|_| malformed())?;
            if n == 0 || n > sig.params.len() {
                return Err(malformed());
            }
            return Ok(ContractTarget::Param(n - 1));
        }
        if let Some(field) = expression.strip_prefix("this.") {
            if !is_identifier(field) || sig.is_static {
                return Err(malformed());
            }
            return Ok(ContractTarget::ReceiverField(field.to_string()));
        }
        if let Some(index) = sig.param_index(expression) {
            return Ok(ContractTarget::Param(index));
        }
        if is_identifier(expression) && !sig.is_static {
            return Ok(ContractTarget::ReceiverField(expression.to_string()));
        }
        Err(malformed())
    }

    /// The tracked expression inside the callee's own body
    pub fn in_callee(&self, sig: &MethodSig) -> FlowExpr {
        match self {
            ContractTarget::Receiver => FlowExpr::This,
            ContractTarget::Param(i) => match sig.params.get(*i) {
                Some(param) => FlowExpr::local(param.name.clone()),
                None => FlowExpr::Temp(format!("#{}", i + 1)),
            },
            ContractTarget::ReceiverField(field) => FlowExpr::field(FlowExpr::This, field.clone()),
        }
    }

    /// Host expression at a call site the target maps to; `None` for an implicit receiver
    pub fn actual_expr(&self, receiver: Option<ExprId>, args: &[ExprId]) -> Option<ExprId> {
        match self {
            ContractTarget::Receiver | ContractTarget::ReceiverField(_) => receiver,
            ContractTarget::Param(i) => args.get(*i).copied(),
        }
    }

    /// The tracked expression at a call site; `None` when the actual is not trackable
    pub fn at_call_site(
        &self,
        body: &Body,
        receiver: Option<ExprId>,
        args: &[ExprId],
        assume_pure: bool,
    ) -> Option<FlowExpr> {
        let receiver_expr = || match receiver {
            Some(r) => FlowExpr::from_expr(body, r, assume_pure),
            None => Some(FlowExpr::This),
        };
        match self {
            ContractTarget::Receiver => receiver_expr(),
            ContractTarget::Param(i) => FlowExpr::from_expr(body, *args.get(*i)?, assume_pure),
            ContractTarget::ReceiverField(field) => Some(FlowExpr::field(receiver_expr()?, field.clone())),
        }
    }

    /// Declared type of the target in the callee
    pub fn declared_type(&self, sig: &MethodSig) -> JavaType {
        match self {
            ContractTarget::Receiver => JavaType::declared(sig.owner.clone()),
            ContractTarget::Param(i) => sig.params.get(*i).map(|p| p.ty.clone()).unwrap_or(JavaType::Void),
            ContractTarget::ReceiverField(_) => JavaType::declared("Object"),
        }
    }
}
