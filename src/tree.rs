//! Owned syntax tree for the unit under test.
//!
//! Every node is plain owned data, so `Clone` is a deep copy that shares
//! nothing with the original. Spans refer to the text the tree was parsed
//! from and survive cloning, which is what lets a mutant point back at the
//! original source line.

use serde::{Deserialize, Serialize};

/// Location of a node in the text it was parsed from. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    Arithmetic,
    Comparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mult => "*",
            Operator::Div => "/",
            Operator::FloorDiv => "//",
            Operator::Mod => "%",
            Operator::Pow => "**",
            Operator::LShift => "<<",
            Operator::RShift => ">>",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::BitAnd => "&",
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtE => "<=",
            Operator::Gt => ">",
            Operator::GtE => ">=",
            Operator::Is => "is",
            Operator::IsNot => "is not",
            Operator::In => "in",
            Operator::NotIn => "not in",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Operator> {
        let op = match symbol {
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mult,
            "/" => Operator::Div,
            "//" => Operator::FloorDiv,
            "%" => Operator::Mod,
            "**" => Operator::Pow,
            "<<" => Operator::LShift,
            ">>" => Operator::RShift,
            "|" => Operator::BitOr,
            "^" => Operator::BitXor,
            "&" => Operator::BitAnd,
            "==" => Operator::Eq,
            "!=" | "<>" => Operator::NotEq,
            "<" => Operator::Lt,
            "<=" => Operator::LtE,
            ">" => Operator::Gt,
            ">=" => Operator::GtE,
            "is" => Operator::Is,
            "is not" => Operator::IsNot,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            _ => return None,
        };
        Some(op)
    }

    pub fn family(self) -> Family {
        match self {
            Operator::Eq
            | Operator::NotEq
            | Operator::Lt
            | Operator::LtE
            | Operator::Gt
            | Operator::GtE
            | Operator::Is
            | Operator::IsNot
            | Operator::In
            | Operator::NotIn => Family::Comparison,
            _ => Family::Arithmetic,
        }
    }
}

/// An operator token in the tree: the unit the mutation engine rewrites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpToken {
    pub kind: Operator,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Ellipsis,
    BinOp {
        left: Box<Expr>,
        op: OpToken,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Chained comparison: `left ops[0] comparators[0] ops[1] comparators[1] ...`
    Compare {
        left: Box<Expr>,
        ops: Vec<OpToken>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    /// `lower:upper:step`, only valid as a subscript index.
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<DictItem>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        clauses: Vec<Comprehension>,
    },
    /// Evaluated eagerly, like a list comprehension.
    GeneratorExp {
        elt: Box<Expr>,
        clauses: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clauses: Vec<Comprehension>,
    },
    /// `*value` in a call, list or tuple.
    Starred(Box<Expr>),
    /// An f-string. `text` is the literal as written and is what gets
    /// serialized; the parts are only used for evaluation.
    FString {
        text: String,
        parts: Vec<FStringPart>,
    },
    /// Valid source the interpreter does not model, kept verbatim.
    ///
    /// `atom` is false for forms like `yield x` or `await x` that need
    /// parentheses wherever they are embedded.
    Raw {
        text: String,
        atom: bool,
    },
}

/// One entry of a dict display; a missing key means `**value`.
#[derive(Debug, Clone, PartialEq)]
pub struct DictItem {
    pub key: Option<Expr>,
    pub value: Expr,
}

/// `for target in iter if ifs[0] if ifs[1] ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Value {
        expr: Expr,
        /// `r`, `s` or `a` from `!r`, `!s`, `!a`.
        conversion: Option<char>,
        spec: String,
    },
}

/// A keyword argument; a missing name means `**value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attribute { value: Expr, attr: String },
    Subscript { value: Expr, index: Expr },
    /// `a, b` or `(a, b)` or `[a, b]`.
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Normal,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
    /// Bare `*`: the parameters after it are keyword-only.
    KwOnlyMarker,
    /// `/`: the parameters before it are positional-only.
    PosOnlyMarker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Expr>,
    /// Annotation source text. Never evaluated.
    pub annotation: Option<String>,
}

impl Param {
    pub fn named(name: impl Into<String>, default: Option<Expr>) -> Self {
        Param {
            name: name.into(),
            kind: ParamKind::Normal,
            default,
            annotation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub decorators: Vec<Expr>,
    pub params: Vec<Param>,
    /// Return annotation source text.
    pub returns: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub decorators: Vec<Expr>,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value` has two targets, assigned left to right.
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    /// Augmented assignment is not a mutation site, so its operator is a bare kind.
    AugAssign {
        target: Target,
        op: Operator,
        value: Expr,
    },
    /// `target: annotation` or `target: annotation = value`.
    AnnAssign {
        target: Target,
        annotation: String,
        value: Option<Expr>,
    },
    Return(Option<Expr>),
    Raise(Option<Expr>),
    Pass,
    Break,
    Continue,
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Import(Vec<ImportName>),
    /// `names` holds a single `*` entry for a wildcard import.
    ImportFrom {
        module: String,
        names: Vec<ImportName>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    With {
        context: Expr,
        alias: Option<String>,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    /// A statement the interpreter does not model, kept verbatim.
    ///
    /// `indent` is the whitespace that preceded it in the original text;
    /// continuation lines starting with it are re-indented on output.
    Raw {
        text: String,
        indent: String,
    },
}

/// A parsed module.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub body: Vec<Stmt>,
}

impl SourceUnit {
    /// All mutable operator tokens in source order.
    pub fn operator_sites(&self) -> Vec<OpToken> {
        let mut sites = Vec::new();
        for stmt in &self.body {
            stmt_ops(stmt, &mut |op| sites.push(*op));
        }
        sites
    }

    /// Visit every operator token mutably, in the same order as `operator_sites`.
    pub fn for_each_operator_mut(&mut self, f: &mut dyn FnMut(&mut OpToken)) {
        for stmt in &mut self.body {
            stmt_ops_mut(stmt, f);
        }
    }

    /// Top-level function and method names, in declaration order.
    pub fn function_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_function_names(&self.body, &mut names);
        names
    }
}

fn collect_function_names(stmts: &[Stmt], names: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => names.push(def.name.clone()),
            StmtKind::ClassDef(class) => collect_function_names(&class.body, names),
            _ => {}
        }
    }
}

/// Operator walkers in source order, once over shared and once over
/// mutable references. f-string parts and raw nodes hold no sites: they
/// are serialized from their text.
macro_rules! operator_walkers {
    ($block:ident, $stmt:ident, $expr:ident, $target:ident, $params:ident, $clauses:ident $(, $m:tt)?) => {
        fn $block(stmts: &$($m)? [Stmt], f: &mut dyn FnMut(&$($m)? OpToken)) {
            for stmt in stmts {
                $stmt(stmt, f);
            }
        }

        fn $target(target: &$($m)? Target, f: &mut dyn FnMut(&$($m)? OpToken)) {
            match target {
                Target::Name(_) => {}
                Target::Attribute { value, .. } => $expr(value, f),
                Target::Subscript { value, index } => {
                    $expr(value, f);
                    $expr(index, f);
                }
                Target::Tuple(items) => {
                    for item in items {
                        $target(item, f);
                    }
                }
            }
        }

        fn $params(params: &$($m)? [Param], f: &mut dyn FnMut(&$($m)? OpToken)) {
            for param in params {
                if let Some(d) = &$($m)? param.default {
                    $expr(d, f);
                }
            }
        }

        fn $clauses(clauses: &$($m)? [Comprehension], f: &mut dyn FnMut(&$($m)? OpToken)) {
            for clause in clauses {
                $target(&$($m)? clause.target, f);
                $expr(&$($m)? clause.iter, f);
                for cond in &$($m)? clause.ifs {
                    $expr(cond, f);
                }
            }
        }

        fn $stmt(stmt: &$($m)? Stmt, f: &mut dyn FnMut(&$($m)? OpToken)) {
            match &$($m)? stmt.kind {
                StmtKind::Expr(e) => $expr(e, f),
                StmtKind::Assign { targets, value } => {
                    for target in targets {
                        $target(target, f);
                    }
                    $expr(value, f);
                }
                StmtKind::AugAssign { target, value, .. } => {
                    $target(target, f);
                    $expr(value, f);
                }
                StmtKind::AnnAssign { target, value, .. } => {
                    $target(target, f);
                    if let Some(v) = value {
                        $expr(v, f);
                    }
                }
                StmtKind::Return(e) | StmtKind::Raise(e) => {
                    if let Some(e) = e {
                        $expr(e, f);
                    }
                }
                StmtKind::Pass | StmtKind::Break | StmtKind::Continue | StmtKind::Raw { .. } => {}
                StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
                    $expr(test, f);
                    $block(body, f);
                    $block(orelse, f);
                }
                StmtKind::For {
                    target,
                    iter,
                    body,
                    orelse,
                } => {
                    $target(target, f);
                    $expr(iter, f);
                    $block(body, f);
                    $block(orelse, f);
                }
                StmtKind::FunctionDef(def) => {
                    for d in &$($m)? def.decorators {
                        $expr(d, f);
                    }
                    $params(&$($m)? def.params, f);
                    $block(&$($m)? def.body, f);
                }
                StmtKind::ClassDef(class) => {
                    for d in &$($m)? class.decorators {
                        $expr(d, f);
                    }
                    for base in &$($m)? class.bases {
                        $expr(base, f);
                    }
                    for k in &$($m)? class.keywords {
                        $expr(&$($m)? k.value, f);
                    }
                    $block(&$($m)? class.body, f);
                }
                StmtKind::Import(_) | StmtKind::ImportFrom { .. } => {}
                StmtKind::Assert { test, msg } => {
                    $expr(test, f);
                    if let Some(m) = msg {
                        $expr(m, f);
                    }
                }
                StmtKind::With { context, body, .. } => {
                    $expr(context, f);
                    $block(body, f);
                }
                StmtKind::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                } => {
                    $block(body, f);
                    for h in handlers {
                        if let Some(k) = &$($m)? h.kind {
                            $expr(k, f);
                        }
                        $block(&$($m)? h.body, f);
                    }
                    $block(orelse, f);
                    $block(finalbody, f);
                }
            }
        }

        fn $expr(expr: &$($m)? Expr, f: &mut dyn FnMut(&$($m)? OpToken)) {
            match &$($m)? expr.kind {
                ExprKind::Name(_)
                | ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Str(_)
                | ExprKind::Bool(_)
                | ExprKind::NoneLit
                | ExprKind::Ellipsis
                | ExprKind::FString { .. }
                | ExprKind::Raw { .. } => {}
                ExprKind::BinOp { left, op, right } => {
                    $expr(left, f);
                    f(op);
                    $expr(right, f);
                }
                ExprKind::UnaryOp { operand, .. } | ExprKind::Starred(operand) => $expr(operand, f),
                ExprKind::BoolOp { left, right, .. } => {
                    $expr(left, f);
                    $expr(right, f);
                }
                ExprKind::Compare {
                    left,
                    ops,
                    comparators,
                } => {
                    $expr(left, f);
                    for (op, comparator) in ops.into_iter().zip(comparators) {
                        f(op);
                        $expr(comparator, f);
                    }
                }
                ExprKind::Call {
                    func,
                    args,
                    keywords,
                } => {
                    $expr(func, f);
                    for a in args {
                        $expr(a, f);
                    }
                    for k in keywords {
                        $expr(&$($m)? k.value, f);
                    }
                }
                ExprKind::Attribute { value, .. } => $expr(value, f),
                ExprKind::Subscript { value, index } => {
                    $expr(value, f);
                    $expr(index, f);
                }
                ExprKind::Slice { lower, upper, step } => {
                    for part in [lower, upper, step] {
                        if let Some(e) = part {
                            $expr(e, f);
                        }
                    }
                }
                ExprKind::List(items) | ExprKind::Tuple(items) => {
                    for item in items {
                        $expr(item, f);
                    }
                }
                ExprKind::Dict(items) => {
                    for item in items {
                        if let Some(k) = &$($m)? item.key {
                            $expr(k, f);
                        }
                        $expr(&$($m)? item.value, f);
                    }
                }
                ExprKind::IfExp { test, body, orelse } => {
                    $expr(body, f);
                    $expr(test, f);
                    $expr(orelse, f);
                }
                ExprKind::Lambda { params, body } => {
                    $params(params, f);
                    $expr(body, f);
                }
                ExprKind::ListComp { elt, clauses } | ExprKind::GeneratorExp { elt, clauses } => {
                    $expr(elt, f);
                    $clauses(clauses, f);
                }
                ExprKind::DictComp { key, value, clauses } => {
                    $expr(key, f);
                    $expr(value, f);
                    $clauses(clauses, f);
                }
            }
        }
    };
}

operator_walkers!(block_ops, stmt_ops, expr_ops, target_ops, param_ops, clause_ops);
operator_walkers!(
    block_ops_mut,
    stmt_ops_mut,
    expr_ops_mut,
    target_ops_mut,
    param_ops_mut,
    clause_ops_mut,
    mut
);
