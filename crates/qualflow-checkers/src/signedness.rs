//! Signedness checker
//!
//! Integral values are either signed or unsigned. Operations whose result depends on
//! the interpretation of the most significant bit (division, remainder, ordering
//! comparisons, right shifts) are rejected on the wrong kind of operand, and the two
//! kinds may not be mixed in one operation.
//!
//! A right shift is allowed on either kind when the bits it could corrupt are thrown
//! away afterwards, by a mask (`(x >> 4) & 0x0F`) or by a narrowing cast
//! (`(byte) (x >> 24)`).

use qualflow_core::checker::{CheckerVariant, Diagnostic, QualifiedTypeFactory, VisitContext, VisitorRule};
use qualflow_core::dataflow::{
    defaults, AbstractValue, TransferContext, TransferFunction, TransferInput, TransferResult,
};
use qualflow_core::error::Result;
use qualflow_core::hir::{find_annotation, Annotation, BinaryOp, Body, ExprId, ExprKind, JavaType, Literal, PrimitiveKind};
use qualflow_core::lattice::{DynHierarchy, GraphHierarchyBuilder, QualifierHierarchy};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signedness {
    Unknown,
    Signed,
    Unsigned,
    /// Both signed and unsigned: non-negative constants
    Glb,
    Bottom,
}

impl fmt::Display for Signedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signedness::Unknown => "@UnknownSignedness",
            Signedness::Signed => "@Signed",
            Signedness::Unsigned => "@Unsigned",
            Signedness::Glb => "@SignednessGlb",
            Signedness::Bottom => "@SignednessBottom",
        };
        f.write_str(name)
    }
}

/// Diagnostic keys
pub mod keys {
    pub const OPERATION_UNSIGNED_LHS: &str = "operation.unsignedlhs";
    pub const OPERATION_UNSIGNED_RHS: &str = "operation.unsignedrhs";
    pub const SHIFT_SIGNED: &str = "shift.signed";
    pub const SHIFT_UNSIGNED: &str = "shift.unsigned";
    pub const COMPARISON_UNSIGNED_LHS: &str = "comparison.unsignedlhs";
    pub const COMPARISON_UNSIGNED_RHS: &str = "comparison.unsignedrhs";
    pub const COMPARISON_MIXED_LHS: &str = "comparison.mixed.unsignedlhs";
    pub const COMPARISON_MIXED_RHS: &str = "comparison.mixed.unsignedrhs";
    pub const OPERATION_MIXED_LHS: &str = "operation.mixed.unsignedlhs";
    pub const OPERATION_MIXED_RHS: &str = "operation.mixed.unsignedrhs";
    pub const COMPOUND_UNSIGNED_VARIABLE: &str = "compound.assignment.unsigned.variable";
    pub const COMPOUND_UNSIGNED_EXPRESSION: &str = "compound.assignment.unsigned.expression";
    pub const COMPOUND_SHIFT_SIGNED: &str = "compound.assignment.shift.signed";
    pub const COMPOUND_SHIFT_UNSIGNED: &str = "compound.assignment.shift.unsigned";
    pub const COMPOUND_MIXED_VARIABLE: &str = "compound.assignment.mixed.unsigned.variable";
    pub const COMPOUND_MIXED_EXPRESSION: &str = "compound.assignment.mixed.unsigned.expression";
}

/// Whether masking the result of a shift by `shift` bits with `mask` discards every bit
/// the shift could have filled with the sign.
///
/// An `int` mask is compared on its low 32 bits. For `&` the top `shift` bits of the mask
/// must all be 0; for `|` they must all be 1.
pub fn mask_ignores_msb(mask_op: BinaryOp, shift: i64, mask: i64, mask_is_long: bool) -> bool {
    if shift == 0 {
        return true;
    }
    let mut bits = mask as u64;
    if !mask_is_long {
        bits <<= 32;
    }
    // Keep the `shift` most significant bits, moved down to the bottom
    let distance = ((64 - shift) & 0x3F) as u32;
    let top = bits >> distance;
    match mask_op {
        BinaryOp::BitAnd => top == 0,
        BinaryOp::BitOr => {
            let ones = 1i32.wrapping_shl(shift as u32).wrapping_sub(1);
            top as i64 == i64::from(ones)
        }
        _ => false,
    }
}

/// Whether a narrowing cast of a shift result drops every bit the shift could corrupt
pub fn cast_ignores_msb(shift_kind: PrimitiveKind, cast_kind: PrimitiveKind, shift: i64) -> bool {
    // Shifts promote their left operand to int unless it is a long
    let (shift_bits, amount) = match shift_kind {
        PrimitiveKind::Long => (64, shift & 0x3F),
        PrimitiveKind::Byte | PrimitiveKind::Short | PrimitiveKind::Char | PrimitiveKind::Int => (32, shift & 0x1F),
        _ => return false,
    };
    let cast_bits = match cast_kind {
        PrimitiveKind::Byte | PrimitiveKind::Char => 8,
        PrimitiveKind::Short => 16,
        PrimitiveKind::Int => 32,
        PrimitiveKind::Long => 64,
        _ => return false,
    };
    amount == 0 || amount <= shift_bits - cast_bits
}

fn integer_literal(body: &Body, id: ExprId) -> Option<(i64, bool)> {
    match body.kind(id)? {
        ExprKind::Literal(Literal::Int(n)) => Some((*n, false)),
        ExprKind::Literal(Literal::Long(n)) => Some((*n, true)),
        _ => None,
    }
}

/// The expression that contains `id` once parentheses are skipped, and the child of it
/// that leads back to `id`
fn enclosing(body: &Body, id: ExprId) -> Option<(ExprId, ExprId)> {
    let mut child = id;
    let mut parent = body.parent(id)?;
    while let Some(ExprKind::Paren(_)) = body.kind(parent) {
        child = parent;
        parent = body.parent(parent)?;
    }
    Some((parent, child))
}

fn is_masked_shift(body: &Body, shift: ExprId, amount: ExprId) -> bool {
    let Some((parent, child)) = enclosing(body, shift) else {
        return false;
    };
    let Some(ExprKind::Binary { op, lhs, rhs }) = body.kind(parent) else {
        return false;
    };
    if !matches!(op, BinaryOp::BitAnd | BinaryOp::BitOr) {
        return false;
    }
    let mask = body.skip_parens(if *rhs == child { *lhs } else { *rhs });
    match (integer_literal(body, amount), integer_literal(body, mask)) {
        (Some((shift, _)), Some((mask, is_long))) => mask_ignores_msb(*op, shift, mask, is_long),
        _ => false,
    }
}

fn is_casted_shift(body: &Body, shift: ExprId, amount: ExprId) -> bool {
    let Some((parent, _)) = enclosing(body, shift) else {
        return false;
    };
    let Some(ExprKind::Cast { target, .. }) = body.kind(parent) else {
        return false;
    };
    let (Some(cast_kind), Some(shift_kind)) = (
        target.primitive_kind().filter(|_| target.is_primitive()),
        body.expr(shift).and_then(|e| e.ty.primitive_kind()),
    ) else {
        return false;
    };
    match integer_literal(body, amount) {
        Some((amount, _)) => cast_ignores_msb(shift_kind, cast_kind, amount),
        None => false,
    }
}

/// Whether the right shift `shift` only feeds bits that are later discarded
pub fn shift_ignores_msb(body: &Body, shift: ExprId) -> bool {
    let Some(ExprKind::Binary { op, rhs, .. }) = body.kind(shift) else {
        return false;
    };
    op.is_shift() && (is_masked_shift(body, shift, *rhs) || is_casted_shift(body, shift, *rhs))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignednessChecker;

impl CheckerVariant for SignednessChecker {
    type Qual = Signedness;

    fn name(&self) -> &'static str {
        "signedness"
    }

    fn create_hierarchy(&self) -> Result<Box<DynHierarchy<Signedness>>> {
        Ok(Box::new(
            GraphHierarchyBuilder::new()
                .subtype(Signedness::Signed, Signedness::Unknown)
                .subtype(Signedness::Unsigned, Signedness::Unknown)
                .subtype(Signedness::Glb, Signedness::Signed)
                .subtype(Signedness::Glb, Signedness::Unsigned)
                .subtype(Signedness::Bottom, Signedness::Glb)
                .build()?,
        ))
    }

    fn create_transfer(&self, factory: Arc<QualifiedTypeFactory<Signedness>>) -> Box<dyn TransferFunction<Signedness>> {
        Box::new(SignednessTransfer { factory })
    }

    fn qualifier_from_annotations(&self, annotations: &[Annotation], _ty: &JavaType) -> Option<Signedness> {
        [
            ("Unsigned", Signedness::Unsigned),
            ("Signed", Signedness::Signed),
            ("SignednessGlb", Signedness::Glb),
            ("UnknownSignedness", Signedness::Unknown),
            ("SignednessBottom", Signedness::Bottom),
        ]
        .into_iter()
        .find(|(name, _)| find_annotation(annotations, name).is_some())
        .map(|(_, qual)| qual)
    }

    /// Chars are unsigned, other numbers signed
    fn default_qualifier(&self, ty: &JavaType, hierarchy: &DynHierarchy<Signedness>) -> Signedness {
        if is_floating(ty) {
            return Signedness::Signed;
        }
        match ty.primitive_kind() {
            Some(PrimitiveKind::Char) => Signedness::Unsigned,
            Some(kind) if kind.is_integral() => Signedness::Signed,
            _ => hierarchy.top(),
        }
    }

    fn literal_qualifier(&self, literal: &Literal, ty: &JavaType, hierarchy: &DynHierarchy<Signedness>) -> Signedness {
        match literal {
            Literal::Int(_) | Literal::Long(_) => Signedness::Glb,
            Literal::Char(_) => Signedness::Unsigned,
            Literal::Null => hierarchy.bottom(),
            _ => self.default_qualifier(ty, hierarchy),
        }
    }

    fn visitor_rules(&self) -> Vec<Box<dyn VisitorRule<Signedness>>> {
        vec![Box::new(BinaryOperandRule), Box::new(CompoundAssignmentRule)]
    }
}

fn is_floating(ty: &JavaType) -> bool {
    match ty {
        JavaType::Primitive(kind) => matches!(kind, PrimitiveKind::Float | PrimitiveKind::Double),
        JavaType::Declared { name, .. } => name == "Float" || name == "Double",
        _ => false,
    }
}

/// Shifts keep the signedness of their left operand unless the sign bits are discarded,
/// and a cast to `char` is unsigned
pub struct SignednessTransfer {
    factory: Arc<QualifiedTypeFactory<Signedness>>,
}

impl TransferFunction<Signedness> for SignednessTransfer {
    fn factory(&self) -> &QualifiedTypeFactory<Signedness> {
        &self.factory
    }

    fn visit_binary(
        &self,
        ctx: &TransferContext<'_, Signedness>,
        id: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        input: TransferInput<Signedness>,
    ) -> Result<TransferResult<Signedness>> {
        if !op.is_shift() {
            return defaults::visit_binary(&self.factory, ctx, id, op, lhs, rhs, input);
        }
        let qual = if op != BinaryOp::Shl && shift_ignores_msb(ctx.body, id) {
            Signedness::Glb
        } else {
            defaults::operand_value(&self.factory, ctx, lhs)?.qual
        };
        let value = AbstractValue::new(qual, ctx.expr(id)?.ty.clone());
        Ok(TransferResult::regular(Some(value), input.into_regular_store(self.hierarchy())))
    }

    fn visit_cast(
        &self,
        ctx: &TransferContext<'_, Signedness>,
        id: ExprId,
        target: &JavaType,
        inner: ExprId,
        input: TransferInput<Signedness>,
    ) -> Result<TransferResult<Signedness>> {
        if target.primitive_kind() == Some(PrimitiveKind::Char) {
            let value = AbstractValue::new(Signedness::Unsigned, target.clone());
            return Ok(TransferResult::regular(Some(value), input.into_regular_store(self.hierarchy())));
        }
        defaults::visit_cast(&self.factory, ctx, id, target, inner, input)
    }
}

/// Operand checks on binary operators
struct BinaryOperandRule;

impl VisitorRule<Signedness> for BinaryOperandRule {
    fn name(&self) -> &'static str {
        "signedness.binary"
    }

    fn check_expr(&self, cx: &mut VisitContext<'_, Signedness>, id: ExprId) -> Result<()> {
        let Some(&ExprKind::Binary { op, lhs, rhs }) = cx.body.kind(id) else {
            return Ok(());
        };
        let l = cx.value_of(lhs)?.qual;
        let r = cx.value_of(rhs)?.qual;
        let sym = op.symbol();
        use Signedness::{Signed, Unsigned};

        match op {
            BinaryOp::Div | BinaryOp::Rem => {
                if l == Unsigned {
                    report(cx, lhs, keys::OPERATION_UNSIGNED_LHS, format!("unsigned left operand of {sym}"), l);
                } else if r == Unsigned {
                    report(cx, rhs, keys::OPERATION_UNSIGNED_RHS, format!("unsigned right operand of {sym}"), r);
                }
            }
            BinaryOp::Shr => {
                if l == Unsigned && !shift_ignores_msb(cx.body, id) {
                    report(cx, lhs, keys::SHIFT_SIGNED, format!("signed shift {sym} of an unsigned value"), l);
                }
            }
            BinaryOp::UShr => {
                if l == Signed && !shift_ignores_msb(cx.body, id) {
                    report(cx, lhs, keys::SHIFT_UNSIGNED, format!("unsigned shift {sym} of a signed value"), l);
                }
            }
            BinaryOp::Shl => {}
            _ if op.is_ordering() => {
                if l == Unsigned {
                    report(cx, lhs, keys::COMPARISON_UNSIGNED_LHS, format!("unsigned left operand of {sym}"), l);
                } else if r == Unsigned {
                    report(cx, rhs, keys::COMPARISON_UNSIGNED_RHS, format!("unsigned right operand of {sym}"), r);
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if l == Unsigned && r == Signed {
                    report(cx, id, keys::COMPARISON_MIXED_LHS, format!("comparison {sym} of unsigned and signed"), l);
                } else if l == Signed && r == Unsigned {
                    report(cx, id, keys::COMPARISON_MIXED_RHS, format!("comparison {sym} of signed and unsigned"), r);
                }
            }
            _ => {
                if l == Unsigned && r == Signed {
                    report(cx, id, keys::OPERATION_MIXED_LHS, format!("{sym} of unsigned and signed"), l);
                } else if l == Signed && r == Unsigned {
                    report(cx, id, keys::OPERATION_MIXED_RHS, format!("{sym} of signed and unsigned"), r);
                }
            }
        }
        Ok(())
    }
}

/// The same checks for `op=`
struct CompoundAssignmentRule;

impl VisitorRule<Signedness> for CompoundAssignmentRule {
    fn name(&self) -> &'static str {
        "signedness.compound"
    }

    fn check_expr(&self, cx: &mut VisitContext<'_, Signedness>, id: ExprId) -> Result<()> {
        let Some(&ExprKind::CompoundAssign { op, target, value }) = cx.body.kind(id) else {
            return Ok(());
        };
        let var = cx.value_of(target)?.qual;
        let expr = cx.value_of(value)?.qual;
        let sym = op.symbol();
        use Signedness::{Signed, Unsigned};

        match op {
            BinaryOp::Div | BinaryOp::Rem => {
                if var == Unsigned {
                    report(cx, target, keys::COMPOUND_UNSIGNED_VARIABLE, format!("unsigned variable in {sym}="), var);
                } else if expr == Unsigned {
                    report(cx, value, keys::COMPOUND_UNSIGNED_EXPRESSION, format!("unsigned operand of {sym}="), expr);
                }
            }
            BinaryOp::Shr => {
                if var == Unsigned {
                    report(cx, target, keys::COMPOUND_SHIFT_SIGNED, format!("{sym}= on an unsigned variable"), var);
                }
            }
            BinaryOp::UShr => {
                if var == Signed {
                    report(cx, target, keys::COMPOUND_SHIFT_UNSIGNED, format!("{sym}= on a signed variable"), var);
                }
            }
            BinaryOp::Shl => {}
            _ => {
                if var == Unsigned && expr == Signed {
                    report(cx, value, keys::COMPOUND_MIXED_VARIABLE, format!("signed operand of {sym}= on unsigned"), expr);
                } else if var == Signed && expr == Unsigned {
                    report(cx, value, keys::COMPOUND_MIXED_EXPRESSION, format!("unsigned operand of {sym}= on signed"), expr);
                }
            }
        }
        Ok(())
    }
}

fn report(cx: &mut VisitContext<'_, Signedness>, at: ExprId, key: &str, message: String, found: Signedness) {
    let expected = match found {
        Signedness::Unsigned => Signedness::Signed,
        _ => Signedness::Unsigned,
    };
    cx.report_at(at, Diagnostic::error(key, message).with_types(expected, found));
}
