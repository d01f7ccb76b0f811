use std::iter::Peekable;
use std::str::Chars;

use log::trace;
use tree_sitter::{Node, Parser};

use crate::error::{Error, Result};
use crate::tree::{
    BoolOp, ClassDef, Comprehension, DictItem, ExceptHandler, Expr, ExprKind, FStringPart, Family,
    FunctionDef, ImportName, Keyword, OpToken, Operator, Param, ParamKind, SourceUnit, Span, Stmt,
    StmtKind, Target, UnaryOp,
};

/// Parse Python source into an owned [`SourceUnit`].
///
/// Fails with [`Error::Parse`] only on syntax errors. Valid constructs the
/// tree does not model (sets, `yield`, `async def`, `match`, ...) become raw
/// nodes that keep their source text.
pub fn parse(source: &str) -> Result<SourceUnit> {
    let mut parser = Parser::new();
    let language = tree_sitter_python::LANGUAGE;
    parser
        .set_language(&language.into())
        .map_err(|e| Error::parse(0, 0, format!("failed to load Python grammar: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| Error::parse(1, 1, "parser returned no tree"))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(first_syntax_error(root));
    }

    let lower = Lower { source };
    Ok(SourceUnit {
        body: lower.block(root),
    })
}

fn first_syntax_error(node: Node) -> Error {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "invalid syntax".to_string()
        };
        return Error::parse(pos.row + 1, pos.column + 1, message);
    }
    let count = node.child_count();
    for i in 0..count {
        if let Some(child) = node.child(i) {
            if child.has_error() {
                return first_syntax_error(child);
            }
        }
    }
    let pos = node.start_position();
    Error::parse(pos.row + 1, pos.column + 1, "invalid syntax")
}

fn span(node: Node) -> Span {
    let pos = node.start_position();
    Span {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        line: pos.row + 1,
        column: pos.column + 1,
    }
}

fn unsupported(node: Node, what: &str) -> Error {
    let pos = node.start_position();
    Error::parse(
        pos.row + 1,
        pos.column + 1,
        format!("unsupported syntax: {what}"),
    )
}

/// Named children, without comments.
fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| !c.is_extra())
        .collect()
}

fn field<'t>(node: Node<'t>, name: &str) -> Result<Node<'t>> {
    node.child_by_field_name(name)
        .ok_or_else(|| unsupported(node, &format!("{} without {}", node.kind(), name)))
}

fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| !c.is_named() && c.kind() == token);
    found
}

/// Kinds that carry their own brackets, so raw text of them never needs more.
const BRACKETED: &[&str] = &[
    "parenthesized_expression",
    "list",
    "tuple",
    "dictionary",
    "set",
    "list_comprehension",
    "set_comprehension",
    "dictionary_comprehension",
    "generator_expression",
];

/// Kinds that bind tightest as long as they fit on one line.
const PRIMARY: &[&str] = &[
    "identifier",
    "string",
    "concatenated_string",
    "call",
    "attribute",
    "subscript",
];

struct Lower<'s> {
    source: &'s str,
}

impl<'s> Lower<'s> {
    fn text(&self, node: Node) -> &'s str {
        &self.source[node.start_byte()..node.end_byte()]
    }

    fn block(&self, node: Node) -> Vec<Stmt> {
        named_children(node)
            .into_iter()
            .map(|child| self.statement(child))
            .collect()
    }

    fn identifier(&self, node: Node) -> Result<String> {
        let text = self.text(node).trim();
        if text.is_empty() || !text.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(unsupported(node, &format!("expected a name, found `{text}`")));
        }
        Ok(text.to_string())
    }

    fn statement(&self, node: Node) -> Stmt {
        match self.lower_statement(node) {
            Ok(stmt) => stmt,
            Err(e) => {
                trace!("line {}: keeping `{}` as written ({e})", node.start_position().row + 1, node.kind());
                self.raw_statement(node)
            }
        }
    }

    fn raw_statement(&self, node: Node) -> Stmt {
        let start = node.start_byte();
        let line_start = self.source[..start].rfind('\n').map_or(0, |i| i + 1);
        let prefix = &self.source[line_start..start];
        let indent = if prefix.trim().is_empty() {
            prefix.to_string()
        } else {
            String::new()
        };
        Stmt {
            kind: StmtKind::Raw {
                text: self.text(node).to_string(),
                indent,
            },
            span: span(node),
        }
    }

    fn lower_statement(&self, node: Node) -> Result<Stmt> {
        let kind = match node.kind() {
            "expression_statement" => return self.expression_statement(node),
            "return_statement" => {
                StmtKind::Return(named_children(node).first().map(|c| self.expression(*c)))
            }
            "raise_statement" => {
                if node.child_by_field_name("cause").is_some() {
                    return Err(unsupported(node, "raise ... from"));
                }
                StmtKind::Raise(named_children(node).first().map(|c| self.expression(*c)))
            }
            "pass_statement" => StmtKind::Pass,
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "if_statement" => return self.if_statement(node),
            "while_statement" => StmtKind::While {
                test: self.expression(field(node, "condition")?),
                body: self.block(field(node, "body")?),
                orelse: self.else_body(node)?,
            },
            "for_statement" => {
                if has_token(node, "async") {
                    return Err(unsupported(node, "async for"));
                }
                StmtKind::For {
                    target: self.target(field(node, "left")?)?,
                    iter: self.expression(field(node, "right")?),
                    body: self.block(field(node, "body")?),
                    orelse: self.else_body(node)?,
                }
            }
            "function_definition" => StmtKind::FunctionDef(self.function_definition(node, Vec::new())?),
            "class_definition" => StmtKind::ClassDef(self.class_definition(node, Vec::new())?),
            "decorated_definition" => {
                let decorators = named_children(node)
                    .into_iter()
                    .filter(|c| c.kind() == "decorator")
                    .map(|d| {
                        named_children(d)
                            .first()
                            .map(|e| self.expression(*e))
                            .ok_or_else(|| unsupported(d, "empty decorator"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let definition = field(node, "definition")?;
                match definition.kind() {
                    "function_definition" => {
                        StmtKind::FunctionDef(self.function_definition(definition, decorators)?)
                    }
                    "class_definition" => {
                        StmtKind::ClassDef(self.class_definition(definition, decorators)?)
                    }
                    other => return Err(unsupported(definition, other)),
                }
            }
            "import_statement" => {
                let mut cursor = node.walk();
                let names = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| self.import_name(n))
                    .collect::<Result<Vec<_>>>()?;
                StmtKind::Import(names)
            }
            "future_import_statement" => {
                let mut cursor = node.walk();
                let names = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| self.import_name(n))
                    .collect::<Result<Vec<_>>>()?;
                StmtKind::ImportFrom {
                    module: "__future__".to_string(),
                    names,
                }
            }
            "import_from_statement" => {
                let module = field(node, "module_name")?;
                if module.kind() == "relative_import" {
                    return Err(unsupported(module, "relative import"));
                }
                let names = if named_children(node).iter().any(|c| c.kind() == "wildcard_import") {
                    vec![ImportName {
                        name: "*".to_string(),
                        alias: None,
                    }]
                } else {
                    let mut cursor = node.walk();
                    node.children_by_field_name("name", &mut cursor)
                        .map(|n| self.import_name(n))
                        .collect::<Result<Vec<_>>>()?
                };
                StmtKind::ImportFrom {
                    module: self.text(module).to_string(),
                    names,
                }
            }
            "assert_statement" => {
                let children = named_children(node);
                let test = children
                    .first()
                    .ok_or_else(|| unsupported(node, "empty assert"))?;
                StmtKind::Assert {
                    test: self.expression(*test),
                    msg: children.get(1).map(|m| self.expression(*m)),
                }
            }
            "with_statement" => return self.with_statement(node),
            "try_statement" => return self.try_statement(node),
            other => return Err(unsupported(node, other)),
        };
        Ok(Stmt {
            kind,
            span: span(node),
        })
    }

    fn expression_statement(&self, node: Node) -> Result<Stmt> {
        let children = named_children(node);
        let kind = match children.as_slice() {
            [only] if only.kind() == "assignment" => self.assignment(*only)?,
            [only] if only.kind() == "augmented_assignment" => {
                let op_node = field(*only, "operator")?;
                let symbol = op_node.kind().trim_end_matches('=');
                let op = Operator::from_symbol(symbol)
                    .filter(|op| op.family() == Family::Arithmetic)
                    .ok_or_else(|| unsupported(op_node, op_node.kind()))?;
                StmtKind::AugAssign {
                    target: self.target(field(*only, "left")?)?,
                    op,
                    value: self.expression(field(*only, "right")?),
                }
            }
            [only] => StmtKind::Expr(self.expression(*only)),
            many => StmtKind::Expr(Expr {
                kind: ExprKind::Tuple(many.iter().map(|c| self.expression(*c)).collect()),
                span: span(node),
            }),
        };
        Ok(Stmt {
            kind,
            span: span(node),
        })
    }

    fn assignment(&self, node: Node) -> Result<StmtKind> {
        let left = field(node, "left")?;
        if let Some(annotation) = node.child_by_field_name("type") {
            return Ok(StmtKind::AnnAssign {
                target: self.target(left)?,
                annotation: self.text(annotation).to_string(),
                value: node.child_by_field_name("right").map(|r| self.expression(r)),
            });
        }
        let mut targets = vec![self.target(left)?];
        let mut right = field(node, "right")?;
        while right.kind() == "assignment" {
            if right.child_by_field_name("type").is_some() {
                return Err(unsupported(right, "annotation in chained assignment"));
            }
            targets.push(self.target(field(right, "left")?)?);
            right = field(right, "right")?;
        }
        Ok(StmtKind::Assign {
            targets,
            value: self.expression(right),
        })
    }

    fn target(&self, node: Node) -> Result<Target> {
        match node.kind() {
            "identifier" | "keyword_identifier" => Ok(Target::Name(self.identifier(node)?)),
            "attribute" => Ok(Target::Attribute {
                value: self.expression(field(node, "object")?),
                attr: self.identifier(field(node, "attribute")?)?,
            }),
            "subscript" => Ok(Target::Subscript {
                value: self.expression(field(node, "value")?),
                index: self.subscript_index(node)?,
            }),
            "pattern_list" | "tuple_pattern" | "list_pattern" => Ok(Target::Tuple(
                named_children(node)
                    .into_iter()
                    .map(|c| self.target(c))
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Err(unsupported(node, &format!("assignment to {other}"))),
        }
    }

    fn else_body(&self, node: Node) -> Result<Vec<Stmt>> {
        match node.child_by_field_name("alternative") {
            Some(alt) => Ok(self.block(field(alt, "body")?)),
            None => Ok(Vec::new()),
        }
    }

    fn if_statement(&self, node: Node) -> Result<Stmt> {
        let mut cursor = node.walk();
        let alternatives: Vec<Node> = node
            .children_by_field_name("alternative", &mut cursor)
            .collect();

        // Fold `elif` clauses from the back into nested ifs.
        let mut orelse = Vec::new();
        for alt in alternatives.iter().rev() {
            match alt.kind() {
                "else_clause" => orelse = self.block(field(*alt, "body")?),
                "elif_clause" => {
                    let nested = Stmt {
                        kind: StmtKind::If {
                            test: self.expression(field(*alt, "condition")?),
                            body: self.block(field(*alt, "consequence")?),
                            orelse,
                        },
                        span: span(*alt),
                    };
                    orelse = vec![nested];
                }
                other => return Err(unsupported(*alt, other)),
            }
        }

        Ok(Stmt {
            kind: StmtKind::If {
                test: self.expression(field(node, "condition")?),
                body: self.block(field(node, "consequence")?),
                orelse,
            },
            span: span(node),
        })
    }

    fn function_definition(&self, node: Node, decorators: Vec<Expr>) -> Result<FunctionDef> {
        if has_token(node, "async") {
            return Err(unsupported(node, "async function"));
        }
        if node.child_by_field_name("type_parameters").is_some() {
            return Err(unsupported(node, "type parameters"));
        }
        Ok(FunctionDef {
            name: self.identifier(field(node, "name")?)?,
            decorators,
            params: self.parameters(field(node, "parameters")?)?,
            returns: node
                .child_by_field_name("return_type")
                .map(|t| self.text(t).to_string()),
            body: self.block(field(node, "body")?),
        })
    }

    fn parameters(&self, node: Node) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        for param in named_children(node) {
            let p = match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    self.bare_parameter(param)?
                }
                "default_parameter" => Param::named(
                    self.identifier(field(param, "name")?)?,
                    Some(self.expression(field(param, "value")?)),
                ),
                "typed_parameter" => {
                    let annotation = field(param, "type")?;
                    let inner = named_children(param)
                        .into_iter()
                        .find(|c| c.id() != annotation.id())
                        .ok_or_else(|| unsupported(param, "typed parameter without name"))?;
                    Param {
                        annotation: Some(self.text(annotation).to_string()),
                        ..self.bare_parameter(inner)?
                    }
                }
                "typed_default_parameter" => Param {
                    annotation: Some(self.text(field(param, "type")?).to_string()),
                    ..Param::named(
                        self.identifier(field(param, "name")?)?,
                        Some(self.expression(field(param, "value")?)),
                    )
                },
                "keyword_separator" => Param {
                    kind: ParamKind::KwOnlyMarker,
                    ..Param::named("", None)
                },
                "positional_separator" => Param {
                    kind: ParamKind::PosOnlyMarker,
                    ..Param::named("", None)
                },
                other => return Err(unsupported(param, &format!("parameter kind {other}"))),
            };
            params.push(p);
        }
        Ok(params)
    }

    /// `name`, `*name` or `**name`.
    fn bare_parameter(&self, node: Node) -> Result<Param> {
        let kind = match node.kind() {
            "identifier" => return Ok(Param::named(self.identifier(node)?, None)),
            "list_splat_pattern" => ParamKind::VarArgs,
            "dictionary_splat_pattern" => ParamKind::KwArgs,
            other => return Err(unsupported(node, &format!("parameter kind {other}"))),
        };
        let name = named_children(node)
            .first()
            .ok_or_else(|| unsupported(node, "unnamed splat parameter"))
            .and_then(|n| self.identifier(*n))?;
        Ok(Param {
            kind,
            ..Param::named(name, None)
        })
    }

    fn class_definition(&self, node: Node, decorators: Vec<Expr>) -> Result<ClassDef> {
        if node.child_by_field_name("type_parameters").is_some() {
            return Err(unsupported(node, "type parameters"));
        }
        let mut bases = Vec::new();
        let mut keywords = Vec::new();
        if let Some(args) = node.child_by_field_name("superclasses") {
            for base in named_children(args) {
                match base.kind() {
                    "keyword_argument" => keywords.push(Keyword {
                        name: Some(self.identifier(field(base, "name")?)?),
                        value: self.expression(field(base, "value")?),
                    }),
                    "list_splat" | "dictionary_splat" => {
                        return Err(unsupported(base, "unpacking in class bases"));
                    }
                    _ => bases.push(self.expression(base)),
                }
            }
        }
        Ok(ClassDef {
            name: self.identifier(field(node, "name")?)?,
            decorators,
            bases,
            keywords,
            body: self.block(field(node, "body")?),
        })
    }

    fn import_name(&self, node: Node) -> Result<ImportName> {
        match node.kind() {
            "dotted_name" => Ok(ImportName {
                name: self.text(node).to_string(),
                alias: None,
            }),
            "aliased_import" => Ok(ImportName {
                name: self.text(field(node, "name")?).to_string(),
                alias: Some(self.identifier(field(node, "alias")?)?),
            }),
            other => Err(unsupported(node, other)),
        }
    }

    /// Split `expr as name` into its parts.
    fn as_pattern(&self, node: Node) -> Result<(Expr, Option<String>)> {
        if node.kind() != "as_pattern" {
            return Ok((self.expression(node), None));
        }
        let children = named_children(node);
        let value = children
            .first()
            .ok_or_else(|| unsupported(node, "empty as-pattern"))?;
        let alias = match node.child_by_field_name("alias").or(children.get(1).copied()) {
            Some(a) => Some(self.identifier(a)?),
            None => None,
        };
        Ok((self.expression(*value), alias))
    }

    fn with_statement(&self, node: Node) -> Result<Stmt> {
        if has_token(node, "async") {
            return Err(unsupported(node, "async with"));
        }
        let clause = named_children(node)
            .into_iter()
            .find(|c| c.kind() == "with_clause")
            .ok_or_else(|| unsupported(node, "with statement without clause"))?;
        let items = named_children(clause);
        let [item] = items.as_slice() else {
            return Err(unsupported(clause, "with statement with several items"));
        };
        let value = match item.child_by_field_name("value") {
            Some(v) => v,
            None => *named_children(*item)
                .first()
                .ok_or_else(|| unsupported(*item, "empty with item"))?,
        };
        let (context, alias) = self.as_pattern(value)?;
        Ok(Stmt {
            kind: StmtKind::With {
                context,
                alias,
                body: self.block(field(node, "body")?),
            },
            span: span(node),
        })
    }

    fn try_statement(&self, node: Node) -> Result<Stmt> {
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "block" => {}
                "except_clause" => handlers.push(self.except_clause(child)?),
                "else_clause" => orelse = self.block(field(child, "body")?),
                "finally_clause" => {
                    let body = named_children(child)
                        .into_iter()
                        .find(|c| c.kind() == "block")
                        .ok_or_else(|| unsupported(child, "finally without body"))?;
                    finalbody = self.block(body);
                }
                other => return Err(unsupported(child, other)),
            }
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body: self.block(field(node, "body")?),
                handlers,
                orelse,
                finalbody,
            },
            span: span(node),
        })
    }

    fn except_clause(&self, node: Node) -> Result<ExceptHandler> {
        let children = named_children(node);
        let body = children
            .iter()
            .rev()
            .find(|c| c.kind() == "block")
            .ok_or_else(|| unsupported(node, "except without body"))?;
        let heads: Vec<Node> = children
            .iter()
            .copied()
            .filter(|c| c.kind() != "block")
            .collect();
        let (kind, name) = match heads.as_slice() {
            [] => (None, None),
            [single] => {
                let (kind, name) = self.as_pattern(*single)?;
                (Some(kind), name)
            }
            [kind, alias] => (Some(self.expression(*kind)), Some(self.identifier(*alias)?)),
            _ => return Err(unsupported(node, "except clause shape")),
        };
        Ok(ExceptHandler {
            kind,
            name,
            body: self.block(*body),
            span: span(node),
        })
    }

    /// Lower `node`, keeping it as raw text when it has no counterpart in the tree.
    fn expression(&self, node: Node) -> Expr {
        match self.lower_expression(node) {
            Ok(expr) => expr,
            Err(e) => {
                trace!("line {}: keeping `{}` as written ({e})", node.start_position().row + 1, node.kind());
                let text = self.text(node).to_string();
                let atom = BRACKETED.contains(&node.kind())
                    || (PRIMARY.contains(&node.kind()) && !text.contains('\n'));
                Expr {
                    kind: ExprKind::Raw { text, atom },
                    span: span(node),
                }
            }
        }
    }

    fn lower_expression(&self, node: Node) -> Result<Expr> {
        let kind = match node.kind() {
            "identifier" | "keyword_identifier" => ExprKind::Name(self.identifier(node)?),
            "integer" => ExprKind::Int(self.integer(node)?),
            "float" => {
                let text = self.text(node).replace('_', "");
                if text.ends_with(['j', 'J']) {
                    return Err(unsupported(node, "complex literal"));
                }
                let value = text
                    .parse::<f64>()
                    .map_err(|_| unsupported(node, "float literal"))?;
                ExprKind::Float(value)
            }
            "string" | "concatenated_string" => self.string_literal(node)?,
            "true" => ExprKind::Bool(true),
            "false" => ExprKind::Bool(false),
            "none" => ExprKind::NoneLit,
            "ellipsis" => ExprKind::Ellipsis,
            "parenthesized_expression" => {
                let inner = named_children(node);
                let [inner] = inner.as_slice() else {
                    return Err(unsupported(node, "parenthesized expression"));
                };
                // Failures propagate so the parentheses stay with the raw text.
                return self.lower_expression(*inner);
            }
            "binary_operator" => {
                let op_node = field(node, "operator")?;
                let op = Operator::from_symbol(op_node.kind())
                    .filter(|op| op.family() == Family::Arithmetic)
                    .ok_or_else(|| unsupported(op_node, op_node.kind()))?;
                ExprKind::BinOp {
                    left: Box::new(self.expression(field(node, "left")?)),
                    op: OpToken {
                        kind: op,
                        span: span(op_node),
                    },
                    right: Box::new(self.expression(field(node, "right")?)),
                }
            }
            "unary_operator" => {
                let op_node = field(node, "operator")?;
                let op = match op_node.kind() {
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Pos,
                    "~" => UnaryOp::Invert,
                    other => return Err(unsupported(op_node, other)),
                };
                ExprKind::UnaryOp {
                    op,
                    operand: Box::new(self.expression(field(node, "argument")?)),
                }
            }
            "not_operator" => ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(self.expression(field(node, "argument")?)),
            },
            "boolean_operator" => {
                let op_node = field(node, "operator")?;
                let op = match op_node.kind() {
                    "and" => BoolOp::And,
                    "or" => BoolOp::Or,
                    other => return Err(unsupported(op_node, other)),
                };
                ExprKind::BoolOp {
                    op,
                    left: Box::new(self.expression(field(node, "left")?)),
                    right: Box::new(self.expression(field(node, "right")?)),
                }
            }
            "comparison_operator" => return self.comparison(node),
            "call" => self.call(node)?,
            "attribute" => ExprKind::Attribute {
                value: Box::new(self.expression(field(node, "object")?)),
                attr: self.identifier(field(node, "attribute")?)?,
            },
            "subscript" => ExprKind::Subscript {
                value: Box::new(self.expression(field(node, "value")?)),
                index: Box::new(self.subscript_index(node)?),
            },
            "list" => ExprKind::List(self.elements(node)),
            "tuple" | "expression_list" => ExprKind::Tuple(self.elements(node)),
            "dictionary" => {
                let mut items = Vec::new();
                for child in named_children(node) {
                    items.push(match child.kind() {
                        "pair" => DictItem {
                            key: Some(self.expression(field(child, "key")?)),
                            value: self.expression(field(child, "value")?),
                        },
                        "dictionary_splat" => DictItem {
                            key: None,
                            value: self.splat_operand(child)?,
                        },
                        other => return Err(unsupported(child, other)),
                    });
                }
                ExprKind::Dict(items)
            }
            "conditional_expression" => {
                let parts = named_children(node);
                let [body, test, orelse] = parts.as_slice() else {
                    return Err(unsupported(node, "conditional expression"));
                };
                ExprKind::IfExp {
                    test: Box::new(self.expression(*test)),
                    body: Box::new(self.expression(*body)),
                    orelse: Box::new(self.expression(*orelse)),
                }
            }
            "lambda" => ExprKind::Lambda {
                params: match node.child_by_field_name("parameters") {
                    Some(p) => self.parameters(p)?,
                    None => Vec::new(),
                },
                body: Box::new(self.expression(field(node, "body")?)),
            },
            "list_comprehension" => ExprKind::ListComp {
                elt: Box::new(self.expression(field(node, "body")?)),
                clauses: self.comprehension_clauses(node)?,
            },
            "generator_expression" => ExprKind::GeneratorExp {
                elt: Box::new(self.expression(field(node, "body")?)),
                clauses: self.comprehension_clauses(node)?,
            },
            "dictionary_comprehension" => {
                let pair = field(node, "body")?;
                ExprKind::DictComp {
                    key: Box::new(self.expression(field(pair, "key")?)),
                    value: Box::new(self.expression(field(pair, "value")?)),
                    clauses: self.comprehension_clauses(node)?,
                }
            }
            other => return Err(unsupported(node, other)),
        };
        Ok(Expr {
            kind,
            span: span(node),
        })
    }

    fn call(&self, node: Node) -> Result<ExprKind> {
        let func = Box::new(self.expression(field(node, "function")?));
        let arguments = field(node, "arguments")?;
        if arguments.kind() == "generator_expression" {
            return Ok(ExprKind::Call {
                func,
                args: vec![self.expression(arguments)],
                keywords: Vec::new(),
            });
        }
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        for arg in named_children(arguments) {
            match arg.kind() {
                "keyword_argument" => keywords.push(Keyword {
                    name: Some(self.identifier(field(arg, "name")?)?),
                    value: self.expression(field(arg, "value")?),
                }),
                "dictionary_splat" => keywords.push(Keyword {
                    name: None,
                    value: self.splat_operand(arg)?,
                }),
                _ => args.push(self.element(arg)?),
            }
        }
        Ok(ExprKind::Call {
            func,
            args,
            keywords,
        })
    }

    fn splat_operand(&self, node: Node) -> Result<Expr> {
        named_children(node)
            .first()
            .map(|c| self.expression(*c))
            .ok_or_else(|| unsupported(node, "empty unpacking"))
    }

    /// An item of a list, tuple or argument list, where `*value` may appear.
    fn element(&self, node: Node) -> Result<Expr> {
        if node.kind() == "list_splat" {
            return Ok(Expr {
                kind: ExprKind::Starred(Box::new(self.splat_operand(node)?)),
                span: span(node),
            });
        }
        Ok(self.expression(node))
    }

    fn elements(&self, node: Node) -> Vec<Expr> {
        named_children(node)
            .into_iter()
            .map(|c| self.element(c).unwrap_or_else(|_| self.expression(c)))
            .collect()
    }

    fn subscript_index(&self, node: Node) -> Result<Expr> {
        let mut cursor = node.walk();
        let subscripts: Vec<Node> = node
            .children_by_field_name("subscript", &mut cursor)
            .collect();
        let [index] = subscripts.as_slice() else {
            return Err(unsupported(node, "subscript with several indices"));
        };
        if index.kind() == "slice" {
            return Ok(self.slice(*index));
        }
        Ok(self.expression(*index))
    }

    fn slice(&self, node: Node) -> Expr {
        let mut bounds: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut slot = 0;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.is_extra() {
                continue;
            }
            if !child.is_named() {
                if child.kind() == ":" {
                    slot += 1;
                }
                continue;
            }
            if let Some(bound) = bounds.get_mut(slot) {
                *bound = Some(Box::new(self.expression(child)));
            }
        }
        let [lower, upper, step] = bounds;
        Expr {
            kind: ExprKind::Slice { lower, upper, step },
            span: span(node),
        }
    }

    fn comprehension_clauses(&self, node: Node) -> Result<Vec<Comprehension>> {
        let mut clauses: Vec<Comprehension> = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "for_in_clause" => {
                    if has_token(child, "async") {
                        return Err(unsupported(child, "async comprehension"));
                    }
                    let mut cursor = child.walk();
                    let right: Vec<Node> = child
                        .children_by_field_name("right", &mut cursor)
                        .filter(|n| n.is_named())
                        .collect();
                    let [iter] = right.as_slice() else {
                        return Err(unsupported(child, "comprehension over several iterables"));
                    };
                    clauses.push(Comprehension {
                        target: self.target(field(child, "left")?)?,
                        iter: self.expression(*iter),
                        ifs: Vec::new(),
                    });
                }
                "if_clause" => {
                    let cond = named_children(child)
                        .first()
                        .map(|c| self.expression(*c))
                        .ok_or_else(|| unsupported(child, "empty if clause"))?;
                    clauses
                        .last_mut()
                        .ok_or_else(|| unsupported(child, "if clause before for"))?
                        .ifs
                        .push(cond);
                }
                _ => {}
            }
        }
        if clauses.is_empty() {
            return Err(unsupported(node, "comprehension without for clause"));
        }
        Ok(clauses)
    }

    fn comparison(&self, node: Node) -> Result<Expr> {
        let mut operands = Vec::new();
        let mut ops = Vec::new();
        let count = node.child_count();
        for i in 0..count {
            let Some(child) = node.child(i) else { continue };
            if child.is_extra() {
                continue;
            }
            if child.is_named() {
                operands.push(self.expression(child));
            } else if let Some(op) = Operator::from_symbol(child.kind()) {
                ops.push(OpToken {
                    kind: op,
                    span: span(child),
                });
            }
        }
        if operands.len() != ops.len() + 1 || ops.is_empty() {
            return Err(unsupported(node, "comparison shape"));
        }
        let mut operands = operands.into_iter();
        let left = operands
            .next()
            .ok_or_else(|| unsupported(node, "comparison shape"))?;
        Ok(Expr {
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators: operands.collect(),
            },
            span: span(node),
        })
    }

    fn integer(&self, node: Node) -> Result<i64> {
        let text = self.text(node).replace('_', "").to_ascii_lowercase();
        if text.ends_with(['j', 'l']) {
            return Err(unsupported(node, "integer suffix"));
        }
        let (digits, radix) = if let Some(rest) = text.strip_prefix("0x") {
            (rest, 16)
        } else if let Some(rest) = text.strip_prefix("0o") {
            (rest, 8)
        } else if let Some(rest) = text.strip_prefix("0b") {
            (rest, 2)
        } else {
            (text.as_str(), 10)
        };
        i64::from_str_radix(digits, radix)
            .map_err(|_| unsupported(node, "integer literal out of range"))
    }

    /// A string or implicitly concatenated strings, plain or formatted.
    fn string_literal(&self, node: Node) -> Result<ExprKind> {
        let pieces = if node.kind() == "concatenated_string" {
            named_children(node)
        } else {
            vec![node]
        };
        let mut formatted = false;
        for piece in &pieces {
            let prefix = string_prefix(self.text(*piece));
            if prefix.contains('b') {
                return Err(unsupported(*piece, "bytes literal"));
            }
            formatted |= prefix.contains('f');
        }
        if !formatted {
            let mut joined = String::new();
            for piece in pieces {
                joined.push_str(&self.plain_string(piece)?);
            }
            return Ok(ExprKind::Str(joined));
        }

        let mut parts = Vec::new();
        for piece in &pieces {
            if string_prefix(self.text(*piece)).contains('f') {
                self.fstring_parts(*piece, &mut parts)?;
            } else {
                parts.push(FStringPart::Literal(self.plain_string(*piece)?));
            }
        }
        // Pieces rejoined on one line: the original breaks may sit outside brackets.
        let text = pieces
            .iter()
            .map(|p| self.text(*p))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(ExprKind::FString { text, parts })
    }

    fn plain_string(&self, node: Node) -> Result<String> {
        let text = self.text(node);
        let prefix = string_prefix(text);
        let rest = &text[prefix.len()..];
        let quote_len = if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
            3
        } else {
            1
        };
        if rest.len() < quote_len * 2 {
            return Err(unsupported(node, "string literal"));
        }
        let body = &rest[quote_len..rest.len() - quote_len];
        if prefix.to_ascii_lowercase().contains('r') {
            Ok(body.to_string())
        } else {
            unescape(body).map_err(|what| unsupported(node, &what))
        }
    }

    fn fstring_parts(&self, node: Node, parts: &mut Vec<FStringPart>) -> Result<()> {
        let raw = string_prefix(self.text(node))
            .to_ascii_lowercase()
            .contains('r');
        for child in named_children(node) {
            match child.kind() {
                "string_start" | "string_end" => {}
                "string_content" => {
                    let text = self.text(child).replace("{{", "{").replace("}}", "}");
                    let text = if raw {
                        text
                    } else {
                        unescape(&text).map_err(|what| unsupported(child, &what))?
                    };
                    parts.push(FStringPart::Literal(text));
                }
                "interpolation" => {
                    if has_token(child, "=") {
                        return Err(unsupported(child, "self-documenting f-string field"));
                    }
                    let conversion = child
                        .child_by_field_name("type_conversion")
                        .and_then(|c| self.text(c).trim_start_matches('!').chars().next());
                    let spec = match child.child_by_field_name("format_specifier") {
                        Some(s) => {
                            if named_children(s).iter().any(|c| c.kind() == "format_expression") {
                                return Err(unsupported(s, "nested format field"));
                            }
                            let text = self.text(s);
                            text.strip_prefix(':').unwrap_or(text).to_string()
                        }
                        None => String::new(),
                    };
                    parts.push(FStringPart::Value {
                        expr: self.expression(field(child, "expression")?),
                        conversion,
                        spec,
                    });
                }
                other => return Err(unsupported(child, other)),
            }
        }
        Ok(())
    }
}

/// The letters before the opening quote, as written.
fn string_prefix(text: &str) -> &str {
    let quote_at = text.find(['"', '\'']).unwrap_or(0);
    &text[..quote_at]
}

/// Decode the backslash escapes of a non-raw `str` literal. Unknown
/// escapes keep their backslash. `\N{...}` is refused: there is no name
/// table to resolve it against.
fn unescape(body: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = next as u32 - '0' as u32;
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).ok_or_else(|| format!("octal escape {code:o}"))?);
            }
            'x' => out.push(hex_escape(&mut chars, 'x', 2)?),
            'u' => out.push(hex_escape(&mut chars, 'u', 4)?),
            'U' => out.push(hex_escape(&mut chars, 'U', 8)?),
            'N' => return Err("named unicode escape".to_string()),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn hex_escape(
    chars: &mut Peekable<Chars>,
    letter: char,
    digits: usize,
) -> std::result::Result<char, String> {
    let hex: String = (0..digits).filter_map(|_| chars.next()).collect();
    if hex.chars().count() != digits || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("truncated \\{letter} escape"));
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid \\{letter}{hex} escape"))
}
