//! Lowering of method bodies into a [`Cfg`]

use super::cfg::{BlockId, BlockKind, Cfg, EdgeCondition, NodeKind};
use crate::error::{QualflowError, Result};
use crate::hir::{BinaryOp, Body, CatchClause, ExprId, ExprKind, Stmt, UnaryOp};
use tracing::trace;

/// Exception cause used for calls, whose thrown types are not declared in the host tree
pub const UNKNOWN_CAUSE: &str = "Throwable";

/// Whether a catch clause of this type catches every exception
pub fn is_catch_all(exception: &str) -> bool {
    let simple = exception.rsplit('.').next().unwrap_or(exception);
    simple == "Throwable" || simple == "Exception"
}

#[derive(Clone)]
struct TryFrame<'a> {
    catches: Vec<(String, BlockId)>,
    finally: Option<&'a [Stmt]>,
    /// Copy of the finally body run when an exception escapes this frame
    exceptional_finally: Option<BlockId>,
}

/// Builder for constructing a CFG from a method body.
///
/// Calls and object creations sit alone in exception blocks. Short-circuit operators
/// in conditions become chains of conditional blocks. Finally bodies are copied onto
/// every path that leaves the protected region: normal completion, each return, and
/// exceptional exit.
pub struct CfgBuilder<'a> {
    body: &'a Body,
    cfg: Cfg,
    current: Option<BlockId>,
    try_stack: Vec<TryFrame<'a>>,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(body: &'a Body) -> Self {
        Self {
            body,
            cfg: Cfg::new(),
            current: None,
            try_stack: Vec::new(),
        }
    }

    pub fn build(body: &'a Body) -> Result<Cfg> {
        Self::new(body).build_body()
    }

    pub fn build_body(mut self) -> Result<Cfg> {
        let first = self.cfg.new_block(BlockKind::Regular);
        let entry = self.cfg.entry;
        self.cfg.add_edge(entry, first, EdgeCondition::Unconditional);
        self.current = Some(first);

        let body = self.body;
        self.build_stmts(&body.stmts)?;

        // Falling off the end is an implicit `return;`
        if self.current.is_some() {
            self.build_return(None)?;
        }
        trace!(
            blocks = self.cfg.blocks.len(),
            nodes = self.cfg.nodes.len(),
            "built control flow graph"
        );
        Ok(self.cfg)
    }

    fn current_regular(&mut self) -> BlockId {
        if let Some(id) = self.current {
            if self.cfg.block(id).is_some_and(|b| b.kind == BlockKind::Regular) {
                return id;
            }
        }
        let fresh = self.cfg.new_block(BlockKind::Regular);
        if let Some(prev) = self.current {
            self.cfg.add_edge(prev, fresh, EdgeCondition::Unconditional);
        }
        self.current = Some(fresh);
        fresh
    }

    fn goto(&mut self, to: BlockId) {
        if let Some(from) = self.current.take() {
            self.cfg.add_edge(from, to, EdgeCondition::Unconditional);
        }
    }

    fn expr_kind(&self, id: ExprId) -> Result<&'a ExprKind> {
        self.body
            .kind(id)
            .ok_or_else(|| QualflowError::internal(format!("expression {} is not in the body", id.0)))
    }

    fn build_stmts(&mut self, stmts: &'a [Stmt]) -> Result<()> {
        for stmt in stmts {
            self.build_stmt(stmt)?;
        }
        Ok(())
    }

    fn build_stmt(&mut self, stmt: &'a Stmt) -> Result<()> {
        match stmt {
            Stmt::LocalDecl {
                name,
                ty,
                annotations,
                init,
            } => {
                if let Some(init) = init {
                    self.build_expr(*init)?;
                }
                let block = self.current_regular();
                self.cfg.add_node(
                    block,
                    NodeKind::LocalDecl {
                        name: name.clone(),
                        ty: ty.clone(),
                        annotations: annotations.clone(),
                        init: *init,
                    },
                );
            }
            Stmt::Expr(expr) => self.build_expr(*expr)?,
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.build_if(*cond, then_branch, else_branch)?,
            Stmt::While { cond, body } => self.build_while(*cond, body)?,
            Stmt::Return(value) => self.build_return(*value)?,
            Stmt::Throw(value) => self.build_throw(*value)?,
            Stmt::Try { body, catches, finally } => self.build_try(body, catches, finally.as_deref())?,
            Stmt::Block(stmts) => self.build_stmts(stmts)?,
        }
        Ok(())
    }

    fn build_if(&mut self, cond: ExprId, then_branch: &'a [Stmt], else_branch: &'a [Stmt]) -> Result<()> {
        let then_block = self.cfg.new_block(BlockKind::Regular);
        let else_block = self.cfg.new_block(BlockKind::Regular);
        self.build_condition(cond, then_block, else_block)?;

        self.current = Some(then_block);
        self.build_stmts(then_branch)?;
        let then_end = self.current.take();

        self.current = Some(else_block);
        self.build_stmts(else_branch)?;
        let else_end = self.current.take();

        let ends: Vec<BlockId> = then_end.into_iter().chain(else_end).collect();
        if !ends.is_empty() {
            let join = self.cfg.new_block(BlockKind::Regular);
            for end in ends {
                self.cfg.add_edge(end, join, EdgeCondition::Unconditional);
            }
            self.current = Some(join);
        }
        Ok(())
    }

    fn build_while(&mut self, cond: ExprId, body: &'a [Stmt]) -> Result<()> {
        let header = self.cfg.new_block(BlockKind::Regular);
        self.goto(header);
        self.current = Some(header);

        let body_block = self.cfg.new_block(BlockKind::Regular);
        let exit_block = self.cfg.new_block(BlockKind::Regular);
        self.build_condition(cond, body_block, exit_block)?;

        self.current = Some(body_block);
        self.build_stmts(body)?;
        self.goto(header);

        self.current = Some(exit_block);
        Ok(())
    }

    fn is_short_circuit(&self, id: ExprId) -> bool {
        match self.body.kind(self.body.skip_parens(id)) {
            Some(ExprKind::Binary { op, .. }) => op.is_short_circuit(),
            Some(ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            }) => self.is_short_circuit(*operand),
            _ => false,
        }
    }

    /// Lower a boolean expression so that control reaches `on_true` or `on_false`
    fn build_condition(&mut self, cond: ExprId, on_true: BlockId, on_false: BlockId) -> Result<()> {
        match self.expr_kind(cond)? {
            ExprKind::Paren(inner) => self.build_condition(*inner, on_true, on_false),
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let rhs_block = self.cfg.new_block(BlockKind::Regular);
                self.build_condition(*lhs, rhs_block, on_false)?;
                self.current = Some(rhs_block);
                self.build_condition(*rhs, on_true, on_false)
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let rhs_block = self.cfg.new_block(BlockKind::Regular);
                self.build_condition(*lhs, on_true, rhs_block)?;
                self.current = Some(rhs_block);
                self.build_condition(*rhs, on_true, on_false)
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } if self.is_short_circuit(*operand) => self.build_condition(*operand, on_false, on_true),
            _ => {
                self.build_expr(cond)?;
                let from = self.current_regular();
                let branch = self.cfg.new_block(BlockKind::Conditional);
                self.cfg.add_edge(from, branch, EdgeCondition::Unconditional);
                self.cfg.add_edge(branch, on_true, EdgeCondition::True);
                self.cfg.add_edge(branch, on_false, EdgeCondition::False);
                self.current = None;
                Ok(())
            }
        }
    }

    fn build_expr(&mut self, id: ExprId) -> Result<()> {
        match self.expr_kind(id)? {
            ExprKind::Binary { op, lhs, rhs } if op.is_short_circuit() => {
                let rhs_block = self.cfg.new_block(BlockKind::Regular);
                let join = self.cfg.new_block(BlockKind::Regular);
                if *op == BinaryOp::And {
                    self.build_condition(*lhs, rhs_block, join)?;
                } else {
                    self.build_condition(*lhs, join, rhs_block)?;
                }
                self.current = Some(rhs_block);
                self.build_expr(*rhs)?;
                self.goto(join);
                self.current = Some(join);
                self.emit(id);
            }
            ExprKind::Assign { target, value } => {
                self.build_lvalue(*target)?;
                self.build_expr(*value)?;
                self.emit(id);
            }
            ExprKind::MethodCall { .. } | ExprKind::New { .. } => {
                for child in self.body.children(id) {
                    self.build_expr(child)?;
                }
                self.emit_throwing(id, UNKNOWN_CAUSE);
            }
            _ => {
                for child in self.body.children(id) {
                    self.build_expr(child)?;
                }
                self.emit(id);
            }
        }
        Ok(())
    }

    /// Evaluate the parts of an assignment target that are read, not the target itself
    fn build_lvalue(&mut self, target: ExprId) -> Result<()> {
        match self.expr_kind(target)? {
            ExprKind::Local(_) => Ok(()),
            ExprKind::Paren(inner) => self.build_lvalue(*inner),
            ExprKind::FieldAccess { receiver, .. } => self.build_expr(*receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.build_expr(*array)?;
                self.build_expr(*index)
            }
            _ => self.build_expr(target),
        }
    }

    fn emit(&mut self, id: ExprId) {
        let block = self.current_regular();
        self.cfg.add_node(block, NodeKind::Expr(id));
    }

    fn emit_throwing(&mut self, id: ExprId, cause: &str) {
        let block = self.cfg.new_block(BlockKind::Exception);
        self.goto(block);
        self.cfg.add_node(block, NodeKind::Expr(id));
        self.add_exceptional_edges(block, cause);

        let next = self.cfg.new_block(BlockKind::Regular);
        self.cfg.add_edge(block, next, EdgeCondition::Unconditional);
        self.current = Some(next);
    }

    /// Route an exception of type `cause` raised in `from` to the handlers that may
    /// catch it, innermost try first, ending at the exceptional exit when nothing
    /// catches it for certain.
    fn add_exceptional_edges(&mut self, from: BlockId, cause: &str) {
        let unknown = cause == UNKNOWN_CAUSE;
        for frame in self.try_stack.iter().rev() {
            for (exception, handler) in &frame.catches {
                if is_catch_all(exception) || exception == cause {
                    self.cfg
                        .add_edge(from, *handler, EdgeCondition::Exceptional(cause.to_string()));
                    return;
                }
                if unknown {
                    self.cfg
                        .add_edge(from, *handler, EdgeCondition::Exceptional(cause.to_string()));
                }
            }
            if let Some(finally) = frame.exceptional_finally {
                self.cfg
                    .add_edge(from, finally, EdgeCondition::Exceptional(cause.to_string()));
                return;
            }
        }
        let exit = self.cfg.exceptional_exit;
        self.cfg.add_edge(from, exit, EdgeCondition::Exceptional(cause.to_string()));
    }

    fn build_return(&mut self, value: Option<ExprId>) -> Result<()> {
        if let Some(value) = value {
            self.build_expr(value)?;
        }
        self.inline_finally_bodies()?;
        let block = self.current_regular();
        self.cfg.add_node(block, NodeKind::Return(value));
        let exit = self.cfg.exit;
        self.cfg.add_edge(block, exit, EdgeCondition::Unconditional);
        self.current = None;
        Ok(())
    }

    /// Copy every enclosing finally body onto the current path, innermost first. Each
    /// copy is built with only the frames outside it active.
    fn inline_finally_bodies(&mut self) -> Result<()> {
        let saved = self.try_stack.clone();
        for idx in (0..saved.len()).rev() {
            if let Some(finally) = saved[idx].finally {
                self.try_stack.truncate(idx);
                self.build_stmts(finally)?;
            }
        }
        self.try_stack = saved;
        Ok(())
    }

    fn build_throw(&mut self, value: ExprId) -> Result<()> {
        self.build_expr(value)?;
        let cause = self
            .body
            .expr(value)
            .and_then(|e| e.ty.simple_name().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_CAUSE.to_string());

        let block = self.cfg.new_block(BlockKind::Exception);
        self.goto(block);
        self.cfg.add_node(block, NodeKind::Throw(value));
        self.add_exceptional_edges(block, &cause);
        self.current = None;
        Ok(())
    }

    fn build_exceptional_finally(&mut self, finally: &'a [Stmt]) -> Result<BlockId> {
        let saved = self.current.take();
        let start = self.cfg.new_block(BlockKind::Regular);
        self.current = Some(start);
        self.build_stmts(finally)?;
        if let Some(end) = self.current.take() {
            // Rethrow once the finally body completes
            self.add_exceptional_edges(end, UNKNOWN_CAUSE);
        }
        self.current = saved;
        Ok(start)
    }

    fn build_try(
        &mut self,
        body: &'a [Stmt],
        catches: &'a [CatchClause],
        finally: Option<&'a [Stmt]>,
    ) -> Result<()> {
        let exceptional_finally = match finally {
            Some(f) => Some(self.build_exceptional_finally(f)?),
            None => None,
        };
        let handlers: Vec<(String, BlockId)> = catches
            .iter()
            .map(|c| (c.exception.clone(), self.cfg.new_block(BlockKind::Regular)))
            .collect();

        self.try_stack.push(TryFrame {
            catches: handlers.clone(),
            finally,
            exceptional_finally,
        });
        self.build_stmts(body)?;
        self.try_stack.pop();
        let mut ends: Vec<BlockId> = self.current.take().into_iter().collect();

        // Exceptions from a catch body skip the sibling handlers but still run finally
        self.try_stack.push(TryFrame {
            catches: Vec::new(),
            finally,
            exceptional_finally,
        });
        for (clause, (_, handler)) in catches.iter().zip(&handlers) {
            self.cfg.add_node(
                *handler,
                NodeKind::CatchParam {
                    name: clause.binding.clone(),
                    exception: clause.exception.clone(),
                },
            );
            self.current = Some(*handler);
            self.build_stmts(&clause.body)?;
            ends.extend(self.current.take());
        }
        self.try_stack.pop();

        if ends.is_empty() {
            return Ok(());
        }
        let join = self.cfg.new_block(BlockKind::Regular);
        for end in ends {
            self.cfg.add_edge(end, join, EdgeCondition::Unconditional);
        }
        self.current = Some(join);
        if let Some(finally) = finally {
            self.build_stmts(finally)?;
        }
        Ok(())
    }
}
