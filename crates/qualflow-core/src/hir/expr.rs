//! Expression arena and statements of a method body

use super::decl::MethodSig;
use super::types::{Annotation, JavaType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Index of an expression in its [`Body`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source position, 1-based
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Long(i64),
    Char(char),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr)
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Local(String),
    This,
    FieldAccess {
        receiver: ExprId,
        field: String,
    },
    ArrayAccess {
        array: ExprId,
        index: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Paren(ExprId),
    Cast {
        target: JavaType,
        expr: ExprId,
    },
    /// `receiver.method(args)`; a missing receiver is an implicit `this` or a static call
    MethodCall {
        receiver: Option<ExprId>,
        method: Arc<MethodSig>,
        args: Vec<ExprId>,
    },
    New {
        ctor: Arc<MethodSig>,
        args: Vec<ExprId>,
    },
    Assign {
        target: ExprId,
        value: ExprId,
    },
    CompoundAssign {
        op: BinaryOp,
        target: ExprId,
        value: ExprId,
    },
}

/// A typed expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: JavaType,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub exception: String,
    pub binding: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    LocalDecl {
        name: String,
        ty: JavaType,
        annotations: Vec<Annotation>,
        init: Option<ExprId>,
    },
    Expr(ExprId),
    If {
        cond: ExprId,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While {
        cond: ExprId,
        body: Vec<Stmt>,
    },
    Return(Option<ExprId>),
    Throw(ExprId),
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
    Block(Vec<Stmt>),
}

/// Arena-owned method body; every expression is addressed by [`ExprId`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    exprs: Vec<Expr>,
    pub stmts: Vec<Stmt>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn expr(&self, id: ExprId) -> Option<&Expr> {
        self.exprs.get(id.index())
    }

    pub fn kind(&self, id: ExprId) -> Option<&ExprKind> {
        self.expr(id).map(|e| &e.kind)
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn exprs(&self) -> impl Iterator<Item = (ExprId, &Expr)> {
        self.exprs.iter().enumerate().map(|(i, e)| (ExprId(i as u32), e))
    }

    /// Strip any number of enclosing parentheses
    pub fn skip_parens(&self, mut id: ExprId) -> ExprId {
        while let Some(ExprKind::Paren(inner)) = self.kind(id) {
            id = *inner;
        }
        id
    }

    /// Direct subexpressions, in evaluation order
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match self.kind(id) {
            Some(ExprKind::FieldAccess { receiver, .. }) => vec![*receiver],
            Some(ExprKind::ArrayAccess { array, index }) => vec![*array, *index],
            Some(ExprKind::Binary { lhs, rhs, .. }) => vec![*lhs, *rhs],
            Some(ExprKind::Unary { operand, .. }) => vec![*operand],
            Some(ExprKind::Paren(inner)) => vec![*inner],
            Some(ExprKind::Cast { expr, .. }) => vec![*expr],
            Some(ExprKind::MethodCall { receiver, args, .. }) => {
                receiver.iter().chain(args.iter()).copied().collect()
            }
            Some(ExprKind::New { args, .. }) => args.clone(),
            Some(ExprKind::Assign { target, value }) | Some(ExprKind::CompoundAssign { target, value, .. }) => {
                vec![*target, *value]
            }
            _ => Vec::new(),
        }
    }

    /// The expression whose direct child is `id`, found through the arena rather than
    /// by tree identity.
    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.exprs()
            .map(|(pid, _)| pid)
            .find(|&pid| self.children(pid).contains(&id))
    }

    /// Parent of every expression, indexed by [`ExprId::index`]. Visitors build this once
    /// per body instead of calling [`Body::parent`] repeatedly.
    pub fn parent_map(&self) -> Vec<Option<ExprId>> {
        let mut parents = vec![None; self.exprs.len()];
        for (id, _) in self.exprs() {
            for child in self.children(id) {
                if let Some(slot) = parents.get_mut(child.index()) {
                    *slot = Some(id);
                }
            }
        }
        parents
    }

    /// Render an expression as source text, used in diagnostics
    pub fn render(&self, id: ExprId) -> String {
        let Some(expr) = self.expr(id) else {
            return "<?>".to_string();
        };
        match &expr.kind {
            ExprKind::Literal(Literal::Int(i)) => i.to_string(),
            ExprKind::Literal(Literal::Long(i)) => format!("{i}L"),
            ExprKind::Literal(Literal::Char(c)) => format!("'{c}'"),
            ExprKind::Literal(Literal::Str(s)) => format!("\"{s}\""),
            ExprKind::Literal(Literal::Bool(b)) => b.to_string(),
            ExprKind::Literal(Literal::Null) => "null".to_string(),
            ExprKind::Local(name) => name.clone(),
            ExprKind::This => "this".to_string(),
            ExprKind::FieldAccess { receiver, field } => format!("{}.{field}", self.render(*receiver)),
            ExprKind::ArrayAccess { array, index } => {
                format!("{}[{}]", self.render(*array), self.render(*index))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                format!("{} {} {}", self.render(*lhs), op.symbol(), self.render(*rhs))
            }
            ExprKind::Unary { op, operand } => {
                let sym = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                format!("{sym}{}", self.render(*operand))
            }
            ExprKind::Paren(inner) => format!("({})", self.render(*inner)),
            ExprKind::Cast { target, expr } => format!("({target}) {}", self.render(*expr)),
            ExprKind::MethodCall { receiver, method, args } => {
                let args: Vec<String> = args.iter().map(|a| self.render(*a)).collect();
                match receiver {
                    Some(r) => format!("{}.{}({})", self.render(*r), method.name, args.join(", ")),
                    None => format!("{}({})", method.name, args.join(", ")),
                }
            }
            ExprKind::New { ctor, args } => {
                let args: Vec<String> = args.iter().map(|a| self.render(*a)).collect();
                format!("new {}({})", ctor.owner, args.join(", "))
            }
            ExprKind::Assign { target, value } => {
                format!("{} = {}", self.render(*target), self.render(*value))
            }
            ExprKind::CompoundAssign { op, target, value } => {
                format!("{} {}= {}", self.render(*target), op.symbol(), self.render(*value))
            }
        }
    }
}
