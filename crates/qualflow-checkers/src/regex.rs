//! Regex checker
//!
//! Tracks whether a string is a syntactically valid regular expression and, if so, how
//! many capturing groups it has. `Pattern.compile` only accepts regexes, and
//! `Matcher.group(k)` is only valid when the matched pattern has at least `k` groups.
//!
//! Group counts come from the `regex` crate's parser. Java-only syntax such as
//! backreferences is therefore classified as a partial regex.

use qualflow_core::checker::{CallSignature, CheckerVariant, Diagnostic, QualifiedTypeFactory, VisitContext, VisitorRule};
use qualflow_core::dataflow::{
    defaults, AbstractValue, CallSite, FlowExpr, TransferContext, TransferFunction, TransferInput, TransferResult,
};
use qualflow_core::error::Result;
use qualflow_core::hir::{find_annotation, Annotation, BinaryOp, Body, ExprId, ExprKind, JavaType, Literal, MethodSig};
use qualflow_core::lattice::{DynHierarchy, QualifierHierarchy};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Key reported when `group(k)` asks for more groups than the pattern has
pub const GROUP_COUNT_INVALID: &str = "group.count.invalid";
/// Key reported when the group index is not a literal
pub const GROUP_COUNT_UNKNOWN: &str = "group.count.unknown";

/// Stand-in for "some regex" when a partial regex is concatenated with a full one
const REGEX_PLACEHOLDER: &str = "e";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegexQual {
    Unknown,
    /// A valid regex with at least this many capturing groups
    Regex(u32),
    /// A string that is not a regex on its own but may become one when concatenated
    Partial(String),
    Poly,
    Bottom,
}

impl fmt::Display for RegexQual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegexQual::Unknown => write!(f, "@UnknownRegex"),
            RegexQual::Regex(0) => write!(f, "@Regex"),
            RegexQual::Regex(n) => write!(f, "@Regex({n})"),
            RegexQual::Partial(text) => write!(f, "@PartialRegex({text:?})"),
            RegexQual::Poly => write!(f, "@PolyRegex"),
            RegexQual::Bottom => write!(f, "@RegexBottom"),
        }
    }
}

impl RegexQual {
    /// Classify a string constant
    pub fn of_text(text: &str) -> Self {
        match group_count(text) {
            Some(groups) => RegexQual::Regex(groups),
            None => RegexQual::Partial(text.to_string()),
        }
    }

    pub fn group_count(&self) -> Option<u32> {
        match self {
            RegexQual::Regex(n) => Some(*n),
            _ => None,
        }
    }
}

/// Number of capturing groups in `text`, or `None` when it does not parse
pub fn group_count(text: &str) -> Option<u32> {
    let re = regex::Regex::new(text).ok()?;
    u32::try_from(re.captures_len().saturating_sub(1)).ok()
}

/// Qualifier of `lhs + rhs` for string concatenation
pub fn concat(lhs: &RegexQual, rhs: &RegexQual) -> RegexQual {
    use RegexQual::*;
    match (lhs, rhs) {
        (Regex(a), Regex(b)) => Regex(a.saturating_add(*b)),
        (Poly, Poly) | (Poly, Regex(_)) | (Regex(_), Poly) => Poly,
        (Partial(a), Partial(b)) => RegexQual::of_text(&format!("{a}{b}")),
        (Regex(_), Partial(b)) => Partial(format!("{REGEX_PLACEHOLDER}{b}")),
        (Partial(a), Regex(_)) => Partial(format!("{a}{REGEX_PLACEHOLDER}")),
        _ => Unknown,
    }
}

/// `UnknownRegex` above everything, `RegexBottom` below. Regexes are ordered by group
/// count (more groups is more specific); partial regexes only relate to themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexHierarchy;

impl QualifierHierarchy for RegexHierarchy {
    type Qual = RegexQual;

    fn top(&self) -> RegexQual {
        RegexQual::Unknown
    }

    fn bottom(&self) -> RegexQual {
        RegexQual::Bottom
    }

    fn is_subtype(&self, sub: &RegexQual, sup: &RegexQual) -> bool {
        match (sub, sup) {
            (_, RegexQual::Unknown) | (RegexQual::Bottom, _) => true,
            (RegexQual::Regex(a), RegexQual::Regex(b)) => a >= b,
            (RegexQual::Partial(a), RegexQual::Partial(b)) => a == b,
            (RegexQual::Poly, RegexQual::Poly) => true,
            _ => false,
        }
    }

    fn least_upper_bound(&self, a: &RegexQual, b: &RegexQual) -> RegexQual {
        if self.is_subtype(a, b) {
            b.clone()
        } else if self.is_subtype(b, a) {
            a.clone()
        } else {
            RegexQual::Unknown
        }
    }

    fn greatest_lower_bound(&self, a: &RegexQual, b: &RegexQual) -> Result<RegexQual> {
        let glb = if self.is_subtype(a, b) {
            a.clone()
        } else if self.is_subtype(b, a) {
            b.clone()
        } else {
            RegexQual::Bottom
        };
        Ok(glb)
    }

    fn polymorphic_qualifier(&self) -> Option<RegexQual> {
        Some(RegexQual::Poly)
    }
}

fn is_method(sig: &MethodSig, owner: &str, name: &str) -> bool {
    sig.name == name && sig.owner.rsplit('.').next() == Some(owner)
}

fn int_literal(body: &Body, id: ExprId) -> Option<u32> {
    match body.kind(body.skip_parens(id))? {
        ExprKind::Literal(Literal::Int(n)) => u32::try_from(*n).ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexChecker;

impl CheckerVariant for RegexChecker {
    type Qual = RegexQual;

    fn name(&self) -> &'static str {
        "regex"
    }

    fn create_hierarchy(&self) -> Result<Box<DynHierarchy<RegexQual>>> {
        Ok(Box::new(RegexHierarchy))
    }

    fn create_transfer(&self, factory: Arc<QualifiedTypeFactory<RegexQual>>) -> Box<dyn TransferFunction<RegexQual>> {
        Box::new(RegexTransfer { factory })
    }

    fn qualifier_from_annotations(&self, annotations: &[Annotation], _ty: &JavaType) -> Option<RegexQual> {
        if let Some(regex) = find_annotation(annotations, "Regex") {
            let groups = regex.int_arg("value").and_then(|n| u32::try_from(n).ok()).unwrap_or(0);
            return Some(RegexQual::Regex(groups));
        }
        if let Some(partial) = find_annotation(annotations, "PartialRegex") {
            return Some(RegexQual::Partial(partial.str_arg("value").unwrap_or_default().to_string()));
        }
        annotations.iter().find_map(|a| match a.name.as_str() {
            "PolyRegex" => Some(RegexQual::Poly),
            "UnknownRegex" => Some(RegexQual::Unknown),
            "RegexBottom" => Some(RegexQual::Bottom),
            _ => None,
        })
    }

    fn literal_qualifier(&self, literal: &Literal, _ty: &JavaType, hierarchy: &DynHierarchy<RegexQual>) -> RegexQual {
        match literal {
            Literal::Str(text) => RegexQual::of_text(text),
            Literal::Char(c) => RegexQual::of_text(&c.to_string()),
            Literal::Null => hierarchy.bottom(),
            _ => hierarchy.top(),
        }
    }

    /// `Pattern.compile(s)` requires a regex and yields a pattern with the same group count
    fn instantiate_call(
        &self,
        factory: &QualifiedTypeFactory<RegexQual>,
        sig: &MethodSig,
        args: &[AbstractValue<RegexQual>],
        assigned: Option<&AbstractValue<RegexQual>>,
    ) -> Result<CallSignature<RegexQual>> {
        let mut call = factory.declared_call(sig, args, assigned)?;
        if is_method(sig, "Pattern", "compile") && !call.params.is_empty() {
            call.params[0] = RegexQual::Regex(0);
            call.ret = match args.first().map(|a| &a.qual) {
                Some(RegexQual::Regex(n)) => RegexQual::Regex(*n),
                Some(RegexQual::Bottom) => RegexQual::Bottom,
                _ => call.ret,
            };
        }
        Ok(call)
    }

    fn visitor_rules(&self) -> Vec<Box<dyn VisitorRule<RegexQual>>> {
        vec![Box::new(GroupCountRule)]
    }
}

/// String concatenation and the `RegexUtil`/`Pattern` helpers
pub struct RegexTransfer {
    factory: Arc<QualifiedTypeFactory<RegexQual>>,
}

impl RegexTransfer {
    fn concatenation(
        &self,
        ctx: &TransferContext<'_, RegexQual>,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<RegexQual> {
        let l = defaults::operand_value(&self.factory, ctx, lhs)?;
        let r = defaults::operand_value(&self.factory, ctx, rhs)?;
        Ok(concat(&l.qual, &r.qual))
    }
}

impl TransferFunction<RegexQual> for RegexTransfer {
    fn factory(&self) -> &QualifiedTypeFactory<RegexQual> {
        &self.factory
    }

    fn visit_binary(
        &self,
        ctx: &TransferContext<'_, RegexQual>,
        id: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        input: TransferInput<RegexQual>,
    ) -> Result<TransferResult<RegexQual>> {
        let ty = &ctx.expr(id)?.ty;
        if op != BinaryOp::Add || !ty.is_string() {
            return defaults::visit_binary(&self.factory, ctx, id, op, lhs, rhs, input);
        }
        let value = AbstractValue::new(self.concatenation(ctx, lhs, rhs)?, ty.clone());
        trace!(expr = id.0, value = %value, "string concatenation");
        Ok(TransferResult::regular(Some(value), input.into_regular_store(self.hierarchy())))
    }

    fn visit_compound_assign(
        &self,
        ctx: &TransferContext<'_, RegexQual>,
        id: ExprId,
        op: BinaryOp,
        target: ExprId,
        value: ExprId,
        input: TransferInput<RegexQual>,
    ) -> Result<TransferResult<RegexQual>> {
        let ty = &ctx.expr(target)?.ty;
        if op != BinaryOp::Add || !ty.is_string() {
            return defaults::visit_compound_assign(&self.factory, ctx, id, op, target, value, input);
        }
        let result = AbstractValue::new(self.concatenation(ctx, target, value)?, ty.clone());
        let mut store = input.into_regular_store(self.hierarchy());
        if let Some(flow) = FlowExpr::from_expr(ctx.body, target, false) {
            store.update_for_assignment(&flow, Some(result.clone()));
        }
        Ok(TransferResult::regular(Some(result), store))
    }

    fn visit_method_call(
        &self,
        ctx: &TransferContext<'_, RegexQual>,
        call: &CallSite<'_>,
        input: TransferInput<RegexQual>,
    ) -> Result<TransferResult<RegexQual>> {
        let mut result = defaults::visit_call(&self.factory, ctx, call, input)?;
        let sig: &MethodSig = call.method;
        let ty = ctx.expr(call.id)?.ty.clone();

        if is_method(sig, "Pattern", "matcher") {
            // A matcher has the groups of its pattern
            if let Some(qual) = call.receiver.and_then(|r| ctx.qual_of(r)) {
                result.set_value(Some(AbstractValue::new(qual.clone(), ty)));
            }
        } else if is_method(sig, "RegexUtil", "asRegex") {
            let groups = call.args.get(1).map_or(Some(0), |a| int_literal(ctx.body, *a));
            if let Some(groups) = groups {
                result.set_value(Some(AbstractValue::new(RegexQual::Regex(groups), ty)));
            }
        } else if is_method(sig, "RegexUtil", "isRegex") {
            let groups = call.args.get(1).map_or(Some(0), |a| int_literal(ctx.body, *a));
            let checked = call
                .args
                .first()
                .and_then(|a| FlowExpr::from_expr(ctx.body, *a, false).map(|flow| (*a, flow)));
            if let (Some(groups), Some((arg, flow))) = (groups, checked) {
                let refined = AbstractValue::new(RegexQual::Regex(groups), ctx.expr(arg)?.ty.clone());
                let value = result.value().cloned();
                let exceptional = result.exceptional().cloned();
                let input = result.into_input();
                let mut then_store = input.then_store().clone();
                then_store.insert_value(flow, refined, self.hierarchy());
                result = TransferResult::conditional(value, then_store, input.else_store().clone());
                if let Some(stores) = exceptional {
                    result = result.with_exceptional(stores);
                }
            }
        }
        Ok(result)
    }
}

/// `matcher.group(k)` needs a matcher with at least `k` groups
struct GroupCountRule;

impl VisitorRule<RegexQual> for GroupCountRule {
    fn name(&self) -> &'static str {
        "regex.group-count"
    }

    fn check_expr(&self, cx: &mut VisitContext<'_, RegexQual>, id: ExprId) -> Result<()> {
        let Some(ExprKind::MethodCall {
            receiver: Some(receiver),
            method,
            args,
        }) = cx.body.kind(id)
        else {
            return Ok(());
        };
        if !is_method(method, "Matcher", "group") || args.len() != 1 {
            return Ok(());
        }
        let found = cx.value_of(*receiver)?.qual;
        if found == RegexQual::Bottom {
            return Ok(());
        }
        let available = found.group_count().unwrap_or(0);
        match int_literal(cx.body, args[0]) {
            Some(requested) if requested > available => {
                let diagnostic = Diagnostic::error(
                    GROUP_COUNT_INVALID,
                    format!("group {requested} requested but the pattern has {available} group(s)"),
                )
                .with_types(&RegexQual::Regex(requested), &found);
                cx.report_at(args[0], diagnostic);
            }
            Some(_) => {}
            None => cx.report_at(
                args[0],
                Diagnostic::warning(GROUP_COUNT_UNKNOWN, "group index is not a constant"),
            ),
        }
        Ok(())
    }
}
