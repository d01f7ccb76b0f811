//! Render a [`SourceUnit`] back to Python source.
//!
//! Output uses four-space indentation and only the parentheses precedence
//! requires. Comments and original layout are not preserved, except inside
//! f-strings and raw nodes, which are written as they were read. The result
//! parses back to an equivalent tree.

use crate::tree::{
    BoolOp, Comprehension, Expr, ExprKind, ImportName, Keyword, Operator, Param,
    ParamKind, SourceUnit, Stmt, StmtKind, Target, UnaryOp,
};

const INDENT: &str = "    ";

pub fn serialize(unit: &SourceUnit) -> String {
    let mut out = String::new();
    write_block(&unit.body, 0, &mut out);
    out
}

pub fn expression(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, 0, &mut out);
    out
}

fn line(depth: usize, text: &str, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

fn write_block(stmts: &[Stmt], depth: usize, out: &mut String) {
    if stmts.is_empty() {
        line(depth, "pass", out);
        return;
    }
    for stmt in stmts {
        write_stmt(stmt, depth, out);
    }
}

fn target(t: &Target) -> String {
    match t {
        Target::Tuple(items) => match items.as_slice() {
            [] => "()".to_string(),
            [only] => format!("{},", nested_target(only)),
            _ => items.iter().map(nested_target).collect::<Vec<_>>().join(", "),
        },
        other => nested_target(other),
    }
}

fn nested_target(t: &Target) -> String {
    match t {
        Target::Name(name) => name.clone(),
        Target::Attribute { value, attr } => {
            let mut s = String::new();
            write_expr(value, PREC_ATOM, &mut s);
            format!("{s}.{attr}")
        }
        Target::Subscript { value, index } => {
            let mut s = String::new();
            write_expr(value, PREC_ATOM, &mut s);
            format!("{s}[{}]", expression(index))
        }
        Target::Tuple(_) => format!("({})", target(t)),
    }
}

fn import_names(names: &[ImportName]) -> String {
    names
        .iter()
        .map(|n| match &n.alias {
            Some(alias) => format!("{} as {}", n.name, alias),
            None => n.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| {
            let mut s = match p.kind {
                ParamKind::Normal => p.name.clone(),
                ParamKind::VarArgs => format!("*{}", p.name),
                ParamKind::KwArgs => format!("**{}", p.name),
                ParamKind::KwOnlyMarker => return "*".to_string(),
                ParamKind::PosOnlyMarker => return "/".to_string(),
            };
            if let Some(annotation) = &p.annotation {
                s.push_str(": ");
                s.push_str(annotation);
            }
            if let Some(d) = &p.default {
                s.push_str(if p.annotation.is_some() { " = " } else { "=" });
                write_expr(d, PREC_TEST, &mut s);
            }
            s
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn keyword(k: &Keyword) -> String {
    let mut s = String::new();
    match &k.name {
        Some(name) => {
            s.push_str(name);
            s.push('=');
            write_expr(&k.value, PREC_TEST, &mut s);
        }
        None => {
            s.push_str("**");
            write_expr(&k.value, PREC_BOR, &mut s);
        }
    }
    s
}

fn decorators(decorators: &[Expr], depth: usize, out: &mut String) {
    for d in decorators {
        line(depth, &format!("@{}", expression(d)), out);
    }
}

/// Re-indent a verbatim statement: continuation lines that start with its
/// original indentation move to `depth`, the rest are left alone.
fn write_raw(text: &str, indent: &str, depth: usize, out: &mut String) {
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        line(depth, first, out);
    }
    for rest in lines {
        match rest.strip_prefix(indent) {
            _ if rest.trim().is_empty() => out.push('\n'),
            Some(tail) => line(depth, tail, out),
            None => {
                out.push_str(rest);
                out.push('\n');
            }
        }
    }
}

fn write_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    match &stmt.kind {
        StmtKind::Expr(e) => line(depth, &expression(e), out),
        StmtKind::Assign { targets, value } => {
            let mut text = String::new();
            for t in targets {
                text.push_str(&target(t));
                text.push_str(" = ");
            }
            text.push_str(&expression(value));
            line(depth, &text, out)
        }
        StmtKind::AugAssign { target: t, op, value } => line(
            depth,
            &format!("{} {}= {}", target(t), op.symbol(), expression(value)),
            out,
        ),
        StmtKind::AnnAssign {
            target: t,
            annotation,
            value,
        } => match value {
            Some(v) => line(
                depth,
                &format!("{}: {} = {}", nested_target(t), annotation, expression(v)),
                out,
            ),
            None => line(depth, &format!("{}: {}", nested_target(t), annotation), out),
        },
        StmtKind::Return(None) => line(depth, "return", out),
        StmtKind::Return(Some(e)) => line(depth, &format!("return {}", expression(e)), out),
        StmtKind::Raise(None) => line(depth, "raise", out),
        StmtKind::Raise(Some(e)) => line(depth, &format!("raise {}", expression(e)), out),
        StmtKind::Pass => line(depth, "pass", out),
        StmtKind::Break => line(depth, "break", out),
        StmtKind::Continue => line(depth, "continue", out),
        StmtKind::If { test, body, orelse } => {
            line(depth, &format!("if {}:", expression(test)), out);
            write_block(body, depth + 1, out);
            write_orelse(orelse, depth, out);
        }
        StmtKind::While { test, body, orelse } => {
            line(depth, &format!("while {}:", expression(test)), out);
            write_block(body, depth + 1, out);
            if !orelse.is_empty() {
                line(depth, "else:", out);
                write_block(orelse, depth + 1, out);
            }
        }
        StmtKind::For {
            target: t,
            iter,
            body,
            orelse,
        } => {
            line(
                depth,
                &format!("for {} in {}:", target(t), expression(iter)),
                out,
            );
            write_block(body, depth + 1, out);
            if !orelse.is_empty() {
                line(depth, "else:", out);
                write_block(orelse, depth + 1, out);
            }
        }
        StmtKind::FunctionDef(def) => {
            decorators(&def.decorators, depth, out);
            let head = match &def.returns {
                Some(r) => format!("def {}({}) -> {}:", def.name, params(&def.params), r),
                None => format!("def {}({}):", def.name, params(&def.params)),
            };
            line(depth, &head, out);
            write_block(&def.body, depth + 1, out);
        }
        StmtKind::ClassDef(class) => {
            decorators(&class.decorators, depth, out);
            let mut args: Vec<String> = class.bases.iter().map(expression).collect();
            args.extend(class.keywords.iter().map(keyword));
            if args.is_empty() {
                line(depth, &format!("class {}:", class.name), out);
            } else {
                line(depth, &format!("class {}({}):", class.name, args.join(", ")), out);
            }
            write_block(&class.body, depth + 1, out);
        }
        StmtKind::Import(names) => line(depth, &format!("import {}", import_names(names)), out),
        StmtKind::ImportFrom { module, names } => line(
            depth,
            &format!("from {} import {}", module, import_names(names)),
            out,
        ),
        StmtKind::Assert { test, msg } => match msg {
            Some(m) => line(
                depth,
                &format!("assert {}, {}", expression(test), expression(m)),
                out,
            ),
            None => line(depth, &format!("assert {}", expression(test)), out),
        },
        StmtKind::With {
            context,
            alias,
            body,
        } => {
            match alias {
                Some(a) => line(depth, &format!("with {} as {}:", expression(context), a), out),
                None => line(depth, &format!("with {}:", expression(context)), out),
            }
            write_block(body, depth + 1, out);
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            line(depth, "try:", out);
            write_block(body, depth + 1, out);
            for h in handlers {
                let head = match (&h.kind, &h.name) {
                    (Some(k), Some(n)) => format!("except {} as {}:", expression(k), n),
                    (Some(k), None) => format!("except {}:", expression(k)),
                    _ => "except:".to_string(),
                };
                line(depth, &head, out);
                write_block(&h.body, depth + 1, out);
            }
            if !orelse.is_empty() {
                line(depth, "else:", out);
                write_block(orelse, depth + 1, out);
            }
            if !finalbody.is_empty() || handlers.is_empty() {
                line(depth, "finally:", out);
                write_block(finalbody, depth + 1, out);
            }
        }
        StmtKind::Raw { text, indent } => write_raw(text, indent, depth, out),
    }
}

fn write_orelse(orelse: &[Stmt], depth: usize, out: &mut String) {
    match orelse {
        [] => {}
        [Stmt {
            kind: StmtKind::If { test, body, orelse },
            ..
        }] => {
            line(depth, &format!("elif {}:", expression(test)), out);
            write_block(body, depth + 1, out);
            write_orelse(orelse, depth, out);
        }
        _ => {
            line(depth, "else:", out);
            write_block(orelse, depth + 1, out);
        }
    }
}

// Binding strength, loosest first. Raw text that is not an atom gets
// PREC_RAW, so it is parenthesized everywhere except at the top level.
const PREC_RAW: u8 = 0;
const PREC_TEST: u8 = 1;
const PREC_OR: u8 = 2;
const PREC_AND: u8 = 3;
const PREC_NOT: u8 = 4;
const PREC_CMP: u8 = 5;
const PREC_BOR: u8 = 6;
const PREC_BXOR: u8 = 7;
const PREC_BAND: u8 = 8;
const PREC_SHIFT: u8 = 9;
const PREC_ARITH: u8 = 10;
const PREC_TERM: u8 = 11;
const PREC_UNARY: u8 = 12;
const PREC_POWER: u8 = 13;
const PREC_ATOM: u8 = 15;

fn binop_prec(op: Operator) -> u8 {
    match op {
        Operator::BitOr => PREC_BOR,
        Operator::BitXor => PREC_BXOR,
        Operator::BitAnd => PREC_BAND,
        Operator::LShift | Operator::RShift => PREC_SHIFT,
        Operator::Add | Operator::Sub => PREC_ARITH,
        Operator::Mult | Operator::Div | Operator::FloorDiv | Operator::Mod => PREC_TERM,
        Operator::Pow => PREC_POWER,
        _ => PREC_CMP,
    }
}

fn precedence(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Raw { atom: false, .. } => PREC_RAW,
        ExprKind::IfExp { .. }
        | ExprKind::Lambda { .. }
        | ExprKind::Starred(_)
        | ExprKind::Slice { .. } => PREC_TEST,
        ExprKind::BoolOp { op: BoolOp::Or, .. } => PREC_OR,
        ExprKind::BoolOp { op: BoolOp::And, .. } => PREC_AND,
        ExprKind::UnaryOp {
            op: UnaryOp::Not, ..
        } => PREC_NOT,
        ExprKind::Compare { .. } => PREC_CMP,
        ExprKind::BinOp { op, .. } => binop_prec(op.kind),
        ExprKind::UnaryOp { .. } => PREC_UNARY,
        // Negative literals print with a sign and bind like unary minus.
        ExprKind::Int(v) if *v < 0 => PREC_UNARY,
        ExprKind::Float(v) if v.is_sign_negative() => PREC_UNARY,
        _ => PREC_ATOM,
    }
}

/// Write `expr`, parenthesized when it binds looser than `min_prec`.
fn write_expr(expr: &Expr, min_prec: u8, out: &mut String) {
    let prec = precedence(expr);
    let wrap = prec < min_prec;
    if wrap {
        out.push('(');
    }
    match &expr.kind {
        ExprKind::Name(n) => out.push_str(n),
        ExprKind::Int(v) => out.push_str(&v.to_string()),
        ExprKind::Float(v) => out.push_str(&format_float(*v)),
        ExprKind::Str(s) => out.push_str(&quote(s)),
        ExprKind::Bool(true) => out.push_str("True"),
        ExprKind::Bool(false) => out.push_str("False"),
        ExprKind::NoneLit => out.push_str("None"),
        ExprKind::BinOp { left, op, right } => {
            // `**` is right-associative; everything else groups to the left.
            let (lmin, rmin) = if op.kind == Operator::Pow {
                (prec + 1, prec)
            } else {
                (prec, prec + 1)
            };
            write_expr(left, lmin, out);
            out.push(' ');
            out.push_str(op.kind.symbol());
            out.push(' ');
            write_expr(right, rmin, out);
        }
        ExprKind::UnaryOp { op, operand } => {
            match op {
                UnaryOp::Not => out.push_str("not "),
                UnaryOp::Neg => out.push('-'),
                UnaryOp::Pos => out.push('+'),
                UnaryOp::Invert => out.push('~'),
            }
            write_expr(operand, prec, out);
        }
        ExprKind::BoolOp { op, left, right } => {
            write_expr(left, prec, out);
            out.push_str(match op {
                BoolOp::And => " and ",
                BoolOp::Or => " or ",
            });
            write_expr(right, prec + 1, out);
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => {
            write_expr(left, PREC_CMP + 1, out);
            for (op, comparator) in ops.iter().zip(comparators) {
                out.push(' ');
                out.push_str(op.kind.symbol());
                out.push(' ');
                write_expr(comparator, PREC_CMP + 1, out);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            write_expr(func, PREC_ATOM, out);
            out.push('(');
            let mut parts: Vec<String> = args
                .iter()
                .map(|a| {
                    let mut s = String::new();
                    write_expr(a, PREC_TEST, &mut s);
                    s
                })
                .collect();
            parts.extend(keywords.iter().map(keyword));
            out.push_str(&parts.join(", "));
            out.push(')');
        }
        ExprKind::Attribute { value, attr } => {
            if matches!(value.kind, ExprKind::Int(_)) {
                out.push('(');
                write_expr(value, 0, out);
                out.push(')');
            } else {
                write_expr(value, PREC_ATOM, out);
            }
            out.push('.');
            out.push_str(attr);
        }
        ExprKind::Subscript { value, index } => {
            write_expr(value, PREC_ATOM, out);
            out.push('[');
            write_expr(index, 0, out);
            out.push(']');
        }
        ExprKind::List(items) => {
            out.push('[');
            out.push_str(&join_items(items));
            out.push(']');
        }
        ExprKind::Tuple(items) => {
            out.push('(');
            out.push_str(&join_items(items));
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        ExprKind::IfExp { test, body, orelse } => {
            write_expr(body, PREC_OR, out);
            out.push_str(" if ");
            write_expr(test, PREC_OR, out);
            out.push_str(" else ");
            write_expr(orelse, PREC_TEST, out);
        }
        ExprKind::Ellipsis => out.push_str("..."),
        ExprKind::Slice { lower, upper, step } => {
            if let Some(e) = lower {
                write_expr(e, PREC_TEST, out);
            }
            out.push(':');
            if let Some(e) = upper {
                write_expr(e, PREC_TEST, out);
            }
            if let Some(e) = step {
                out.push(':');
                write_expr(e, PREC_TEST, out);
            }
        }
        ExprKind::Dict(items) => {
            out.push('{');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                match &item.key {
                    Some(k) => {
                        write_expr(k, PREC_TEST, out);
                        out.push_str(": ");
                        write_expr(&item.value, PREC_TEST, out);
                    }
                    None => {
                        out.push_str("**");
                        write_expr(&item.value, PREC_BOR, out);
                    }
                }
            }
            out.push('}');
        }
        ExprKind::Lambda { params: p, body } => {
            if p.is_empty() {
                out.push_str("lambda: ");
            } else {
                out.push_str("lambda ");
                out.push_str(&params(p));
                out.push_str(": ");
            }
            write_expr(body, PREC_TEST, out);
        }
        ExprKind::ListComp { elt, clauses } => {
            out.push('[');
            write_expr(elt, PREC_TEST, out);
            write_clauses(clauses, out);
            out.push(']');
        }
        ExprKind::GeneratorExp { elt, clauses } => {
            out.push('(');
            write_expr(elt, PREC_TEST, out);
            write_clauses(clauses, out);
            out.push(')');
        }
        ExprKind::DictComp {
            key,
            value,
            clauses,
        } => {
            out.push('{');
            write_expr(key, PREC_TEST, out);
            out.push_str(": ");
            write_expr(value, PREC_TEST, out);
            write_clauses(clauses, out);
            out.push('}');
        }
        ExprKind::Starred(value) => {
            out.push('*');
            write_expr(value, PREC_BOR, out);
        }
        ExprKind::FString { text, .. } => out.push_str(text),
        ExprKind::Raw { text, .. } => out.push_str(text),
    }
    if wrap {
        out.push(')');
    }
}

fn write_clauses(clauses: &[Comprehension], out: &mut String) {
    for clause in clauses {
        out.push_str(" for ");
        out.push_str(&target(&clause.target));
        out.push_str(" in ");
        write_expr(&clause.iter, PREC_OR, out);
        for cond in &clause.ifs {
            out.push_str(" if ");
            write_expr(cond, PREC_OR, out);
        }
    }
}

fn join_items(items: &[Expr]) -> String {
    items
        .iter()
        .map(|i| {
            let mut s = String::new();
            write_expr(i, PREC_TEST, &mut s);
            s
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_float(v: f64) -> String {
    if v.is_infinite() {
        return if v > 0.0 { "1e999".into() } else { "-1e999".into() };
    }
    // Debug keeps a decimal point or exponent, so the literal stays a float.
    format!("{v:?}")
}

/// Python-style repr of a string literal.
pub fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}
