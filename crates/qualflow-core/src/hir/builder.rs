//! Convenience builder for method bodies

use super::decl::MethodSig;
use super::expr::{BinaryOp, Body, CatchClause, Expr, ExprId, ExprKind, Literal, Span, Stmt, UnaryOp};
use super::types::{Annotation, JavaType};
use std::sync::Arc;

/// Builds a [`Body`] expression by expression.
///
/// Result types are computed the way javac would for the supported operators, so callers
/// only spell out types for locals, fields and casts. Every expression gets a span whose
/// line is the index of the statement currently being built.
pub struct BodyBuilder {
    body: Body,
    line: u32,
    column: u32,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self {
            body: Body::new(),
            line: 1,
            column: 1,
        }
    }

    fn alloc(&mut self, kind: ExprKind, ty: JavaType) -> ExprId {
        let span = Span::new(self.line, self.column);
        self.column += 1;
        self.body.alloc(Expr { kind, ty, span })
    }

    pub fn ty(&self, id: ExprId) -> JavaType {
        self.body.expr(id).map(|e| e.ty.clone()).unwrap_or(JavaType::Void)
    }

    pub fn int(&mut self, value: i64) -> ExprId {
        self.alloc(ExprKind::Literal(Literal::Int(value)), JavaType::INT)
    }

    pub fn long(&mut self, value: i64) -> ExprId {
        self.alloc(ExprKind::Literal(Literal::Long(value)), JavaType::LONG)
    }

    pub fn char_lit(&mut self, value: char) -> ExprId {
        self.alloc(ExprKind::Literal(Literal::Char(value)), JavaType::CHAR)
    }

    pub fn string(&mut self, value: &str) -> ExprId {
        self.alloc(ExprKind::Literal(Literal::Str(value.to_string())), JavaType::string())
    }

    pub fn boolean(&mut self, value: bool) -> ExprId {
        self.alloc(ExprKind::Literal(Literal::Bool(value)), JavaType::BOOLEAN)
    }

    pub fn null(&mut self) -> ExprId {
        self.alloc(ExprKind::Literal(Literal::Null), JavaType::Null)
    }

    pub fn local(&mut self, name: &str, ty: JavaType) -> ExprId {
        self.alloc(ExprKind::Local(name.to_string()), ty)
    }

    pub fn this(&mut self, class: &str) -> ExprId {
        self.alloc(ExprKind::This, JavaType::declared(class))
    }

    pub fn field(&mut self, receiver: ExprId, field: &str, ty: JavaType) -> ExprId {
        self.alloc(
            ExprKind::FieldAccess {
                receiver,
                field: field.to_string(),
            },
            ty,
        )
    }

    pub fn array_access(&mut self, array: ExprId, index: ExprId) -> ExprId {
        let ty = match self.ty(array) {
            JavaType::Array(component) => *component,
            other => other,
        };
        self.alloc(ExprKind::ArrayAccess { array, index }, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        let ty = if op.is_comparison() || op.is_short_circuit() {
            JavaType::BOOLEAN
        } else if op == BinaryOp::Add && (lt.is_string() || rt.is_string()) {
            JavaType::string()
        } else if op.is_shift() {
            lt
        } else if lt == JavaType::LONG || rt == JavaType::LONG {
            JavaType::LONG
        } else {
            lt
        };
        self.alloc(ExprKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        let ty = self.ty(operand);
        self.alloc(ExprKind::Unary { op, operand }, ty)
    }

    pub fn not(&mut self, operand: ExprId) -> ExprId {
        self.unary(UnaryOp::Not, operand)
    }

    pub fn paren(&mut self, inner: ExprId) -> ExprId {
        let ty = self.ty(inner);
        self.alloc(ExprKind::Paren(inner), ty)
    }

    pub fn cast(&mut self, target: JavaType, expr: ExprId) -> ExprId {
        self.alloc(
            ExprKind::Cast {
                target: target.clone(),
                expr,
            },
            target,
        )
    }

    pub fn call(&mut self, receiver: Option<ExprId>, method: &Arc<MethodSig>, args: Vec<ExprId>) -> ExprId {
        let ty = method.return_type.clone();
        self.alloc(
            ExprKind::MethodCall {
                receiver,
                method: Arc::clone(method),
                args,
            },
            ty,
        )
    }

    /// Call with an explicit result type, for generic methods whose return type mentions
    /// type variables.
    pub fn call_typed(
        &mut self,
        receiver: Option<ExprId>,
        method: &Arc<MethodSig>,
        args: Vec<ExprId>,
        ty: JavaType,
    ) -> ExprId {
        self.alloc(
            ExprKind::MethodCall {
                receiver,
                method: Arc::clone(method),
                args,
            },
            ty,
        )
    }

    pub fn new_object(&mut self, ctor: &Arc<MethodSig>, args: Vec<ExprId>, ty: JavaType) -> ExprId {
        self.alloc(
            ExprKind::New {
                ctor: Arc::clone(ctor),
                args,
            },
            ty,
        )
    }

    pub fn assign(&mut self, target: ExprId, value: ExprId) -> ExprId {
        let ty = self.ty(target);
        self.alloc(ExprKind::Assign { target, value }, ty)
    }

    pub fn compound_assign(&mut self, op: BinaryOp, target: ExprId, value: ExprId) -> ExprId {
        let ty = self.ty(target);
        self.alloc(ExprKind::CompoundAssign { op, target, value }, ty)
    }

    /// Append a top-level statement
    pub fn push(&mut self, stmt: Stmt) -> &mut Self {
        self.body.stmts.push(stmt);
        self.line += 1;
        self.column = 1;
        self
    }

    pub fn declare(&mut self, name: &str, ty: JavaType, init: Option<ExprId>) -> &mut Self {
        self.declare_annotated(name, ty, Vec::new(), init)
    }

    pub fn declare_annotated(
        &mut self,
        name: &str,
        ty: JavaType,
        annotations: Vec<Annotation>,
        init: Option<ExprId>,
    ) -> &mut Self {
        self.push(Stmt::LocalDecl {
            name: name.to_string(),
            ty,
            annotations,
            init,
        })
    }

    pub fn expr_stmt(&mut self, expr: ExprId) -> &mut Self {
        self.push(Stmt::Expr(expr))
    }

    pub fn ret(&mut self, expr: Option<ExprId>) -> &mut Self {
        self.push(Stmt::Return(expr))
    }

    pub fn finish(self) -> Body {
        self.body
    }
}

impl Default for BodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for a catch clause
pub fn catch(exception: &str, binding: &str, body: Vec<Stmt>) -> CatchClause {
    CatchClause {
        exception: exception.to_string(),
        binding: binding.to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_result_types() {
        let mut b = BodyBuilder::new();
        let s = b.string("(a)");
        let i = b.int(1);
        let concat = b.binary(BinaryOp::Add, s, i);
        let cmp = b.binary(BinaryOp::Lt, i, i);
        let l = b.long(3);
        let wide = b.binary(BinaryOp::Mul, i, l);
        assert!(b.ty(concat).is_string());
        assert_eq!(b.ty(cmp), JavaType::BOOLEAN);
        assert_eq!(b.ty(wide), JavaType::LONG);
    }

    #[test]
    fn test_spans_follow_statements() {
        let mut b = BodyBuilder::new();
        let x = b.int(1);
        b.declare("x", JavaType::INT, Some(x));
        let y = b.int(2);
        b.declare("y", JavaType::INT, Some(y));
        let body = b.finish();
        assert_eq!(body.expr(x).unwrap().span.line, 1);
        assert_eq!(body.expr(y).unwrap().span.line, 2);
        assert_eq!(body.stmts.len(), 2);
    }

    #[test]
    fn test_render_and_parent() {
        let mut b = BodyBuilder::new();
        let x = b.local("x", JavaType::INT);
        let four = b.int(4);
        let shr = b.binary(BinaryOp::Shr, x, four);
        let p = b.paren(shr);
        let mask = b.int(0x0F);
        let and = b.binary(BinaryOp::BitAnd, p, mask);
        let body = b.finish();
        assert_eq!(body.render(and), "(x >> 4) & 15");
        assert_eq!(body.parent(shr), Some(p));
        assert_eq!(body.parent(p), Some(and));
        assert_eq!(body.skip_parens(p), shr);
    }
}
