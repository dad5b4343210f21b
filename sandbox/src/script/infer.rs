//! Flow-insensitive value-kind inference for call sites.

use std::collections::{HashMap, HashSet};

use super::ast::{BinaryOp, Expr, ExprKind, Literal, LogicalOp, Module, Stmt, StmtKind, Target, UnaryOp};
use super::interp::is_builtin;
use super::value::ValueKind;
use super::{CallSite, CallTarget};

/// Variable name to its kind across every assignment; `None` means mixed or unknown.
type Bindings = HashMap<String, Option<ValueKind>>;

pub(super) fn call_sites(module: &Module, externals: &HashSet<String>) -> Vec<CallSite> {
    let bindings = bindings(module);
    let mut sites = Vec::new();
    Stmt::walk_all(&module.body, &mut |stmt| {
        for expr in stmt.expressions() {
            expr.walk(&mut |node| {
                if let ExprKind::Call {
                    callee,
                    args,
                    kwargs,
                } = &node.kind
                {
                    let target = if bindings.contains_key(callee) {
                        CallTarget::Variable
                    } else if externals.contains(callee) {
                        CallTarget::External
                    } else if is_builtin(callee) {
                        CallTarget::Builtin
                    } else {
                        CallTarget::Unknown
                    };
                    sites.push(CallSite {
                        function: callee.clone(),
                        target,
                        line: node.line,
                        positional: args.iter().map(|arg| kind_of(arg, &bindings)).collect(),
                        keywords: kwargs
                            .iter()
                            .map(|(name, value)| (name.clone(), kind_of(value, &bindings)))
                            .collect(),
                    });
                }
            });
        }
    });
    sites
}

fn merge(a: Option<ValueKind>, b: Option<ValueKind>) -> Option<ValueKind> {
    match (a, b) {
        (Some(x), Some(y)) if x == y => Some(x),
        (Some(ValueKind::Int), Some(ValueKind::Float)) | (Some(ValueKind::Float), Some(ValueKind::Int)) => {
            Some(ValueKind::Float)
        }
        _ => None,
    }
}

fn bindings(module: &Module) -> Bindings {
    let mut bindings = Bindings::new();
    // Assignments can depend on each other in any order; a few passes settle them.
    for _ in 0..4 {
        let mut next = Bindings::new();
        Stmt::walk_all(&module.body, &mut |stmt| {
            let (name, kind) = match &stmt.kind {
                StmtKind::Assign {
                    target: Target::Name(name),
                    value,
                } => (name, kind_of(value, &bindings)),
                StmtKind::AugAssign {
                    target: Target::Name(name),
                    op,
                    value,
                } => {
                    let current = bindings.get(name).copied().flatten();
                    (name, arith_kind(*op, current, kind_of(value, &bindings)))
                }
                StmtKind::For { var, .. } => (var, None),
                _ => return,
            };
            next.entry(name.clone())
                .and_modify(|existing| *existing = merge(*existing, kind))
                .or_insert(kind);
        });
        if next == bindings {
            break;
        }
        bindings = next;
    }
    bindings
}

fn arith_kind(op: BinaryOp, left: Option<ValueKind>, right: Option<ValueKind>) -> Option<ValueKind> {
    use ValueKind::{Float, Int, List, Str};
    match (op, left?, right?) {
        (BinaryOp::Add, Str, Str) => Some(Str),
        (BinaryOp::Add, List, List) => Some(List),
        (BinaryOp::Div, Int | Float, Int | Float) => Some(Float),
        (_, Int, Int) => Some(Int),
        (_, Int | Float, Int | Float) => Some(Float),
        _ => None,
    }
}

pub(super) fn kind_of(expr: &Expr, bindings: &Bindings) -> Option<ValueKind> {
    match &expr.kind {
        ExprKind::Literal(literal) => Some(match literal {
            Literal::None => ValueKind::None,
            Literal::Bool(_) => ValueKind::Bool,
            Literal::Int(_) => ValueKind::Int,
            Literal::Float(_) => ValueKind::Float,
            Literal::Str(_) => ValueKind::Str,
        }),
        ExprKind::List(_) => Some(ValueKind::List),
        ExprKind::Dict(_) => Some(ValueKind::Dict),
        ExprKind::Name(name) => bindings.get(name).copied().flatten(),
        ExprKind::Call { callee, .. } if !bindings.contains_key(callee) => match callee.as_str() {
            "str" => Some(ValueKind::Str),
            "len" | "int" => Some(ValueKind::Int),
            "float" => Some(ValueKind::Float),
            "bool" => Some(ValueKind::Bool),
            "sorted" | "range" => Some(ValueKind::List),
            _ => None,
        },
        ExprKind::Method { method, .. } => match method.as_str() {
            "upper" | "lower" | "strip" | "replace" | "join" => Some(ValueKind::Str),
            "split" | "keys" | "values" => Some(ValueKind::List),
            "startswith" | "endswith" => Some(ValueKind::Bool),
            _ => None,
        },
        ExprKind::Unary { op: UnaryOp::Not, .. } | ExprKind::Compare { .. } => Some(ValueKind::Bool),
        ExprKind::Unary { operand, .. } => match kind_of(operand, bindings) {
            Some(kind @ (ValueKind::Int | ValueKind::Float)) => Some(kind),
            _ => None,
        },
        ExprKind::Binary { op, left, right } => {
            arith_kind(*op, kind_of(left, bindings), kind_of(right, bindings))
        }
        ExprKind::Logical { op, left, right } => {
            let (left, right) = (kind_of(left, bindings), kind_of(right, bindings));
            match op {
                LogicalOp::And | LogicalOp::Or if left == right => left,
                _ => None,
            }
        }
        ExprKind::Call { .. } | ExprKind::Index { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;

    fn sites(source: &str, externals: &[&str]) -> Vec<CallSite> {
        let module = parse(source).expect("parse");
        let externals = externals.iter().map(ToString::to_string).collect();
        call_sites(&module, &externals)
    }

    #[test]
    fn infers_literal_and_variable_kinds() {
        let found = sites(
            "amount = 4\nif x:\n    amount = 2.5\nlabel = 'n' + str(amount)\njournal_add(amount, memo=label, when=today())\n",
            &["journal_add"],
        );
        let call = found
            .iter()
            .find(|site| site.function == "journal_add")
            .expect("journal_add site");
        assert_eq!(call.target, CallTarget::External);
        assert_eq!(call.line, 5);
        assert_eq!(call.positional, vec![Some(ValueKind::Float)]);
        assert_eq!(
            call.keywords,
            vec![
                ("memo".to_string(), Some(ValueKind::Str)),
                ("when".to_string(), None),
            ]
        );
        let today = found.iter().find(|site| site.function == "today").expect("today");
        assert_eq!(today.target, CallTarget::Unknown);
    }

    #[test]
    fn mixed_assignments_are_unknown() {
        let found = sites("v = 'a'\nv = 1\nf(v)\n", &["f"]);
        assert_eq!(found[0].positional, vec![None]);
    }

    #[test]
    fn loop_variables_and_subscripts_are_unknown() {
        let found = sites("for t in items:\n    f(t, t['amount'], abs(3))\n", &["f"]);
        let f = found.iter().find(|site| site.function == "f").expect("f");
        assert_eq!(f.positional, vec![None, None, None]);
        let abs = found.iter().find(|site| site.function == "abs").expect("abs");
        assert_eq!(abs.target, CallTarget::Builtin);
    }
}
