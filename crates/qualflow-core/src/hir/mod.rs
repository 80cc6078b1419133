//! Typed host tree consumed by the engine
//!
//! A small Java-like tree: underlying types, annotations, an arena of typed
//! expressions per method body, statements, and class/method declarations.
//! Expressions are addressed by [`ExprId`] so later phases can map them to CFG
//! nodes without relying on object identity.

mod builder;
mod decl;
mod expr;
mod types;

pub use builder::{catch, BodyBuilder};
pub use decl::{ClassDecl, ClassTable, CompilationUnit, FieldDecl, MethodDecl, MethodSig, Param, TypeParam};
pub use expr::{BinaryOp, Body, CatchClause, Expr, ExprId, ExprKind, Literal, Span, Stmt, UnaryOp};
pub use types::{find_annotation, Annotation, AnnotationValue, JavaType, PrimitiveKind};
