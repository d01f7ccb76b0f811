use mutcheck::Error;
use mutcheck::parser;
use mutcheck::tree::{ExprKind, FStringPart, Operator, ParamKind, StmtKind, Target};

#[test]
fn parses_function_definitions() {
    let source = r#"
def add(a, b):
    return a + b

def scale(x, factor=2):
    return x * factor
"#;
    let unit = parser::parse(source).unwrap();
    assert_eq!(unit.body.len(), 2);
    assert_eq!(unit.function_names(), vec!["add", "scale"]);

    let StmtKind::FunctionDef(scale) = &unit.body[1].kind else {
        panic!("expected a function definition");
    };
    assert_eq!(scale.params.len(), 2);
    assert!(scale.params[0].default.is_none());
    assert!(matches!(
        scale.params[1].default.as_ref().map(|d| &d.kind),
        Some(ExprKind::Int(2))
    ));
}

#[test]
fn operator_sites_in_source_order() {
    let source = r#"
def check(x, y):
    if x > 0 and y <= 10:
        return x + y * 2
    return x - y
"#;
    let unit = parser::parse(source).unwrap();
    let kinds: Vec<Operator> = unit.operator_sites().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Operator::Gt,
            Operator::LtE,
            Operator::Add,
            Operator::Mult,
            Operator::Sub
        ]
    );
}

#[test]
fn operator_spans_point_at_the_token() {
    let source = "def f(a, b):\n    return a >= b\n";
    let unit = parser::parse(source).unwrap();
    let sites = unit.operator_sites();
    assert_eq!(sites.len(), 1);
    let span = sites[0].span;
    assert_eq!(&source[span.start_byte..span.end_byte], ">=");
    assert_eq!(span.line, 2);
    assert_eq!(span.column, 14);
}

#[test]
fn chained_comparison_has_one_site_per_operator() {
    let unit = parser::parse("ok = 0 < x <= 10\n").unwrap();
    let StmtKind::Assign { value, .. } = &unit.body[0].kind else {
        panic!("expected an assignment");
    };
    let ExprKind::Compare { ops, comparators, .. } = &value.kind else {
        panic!("expected a comparison");
    };
    assert_eq!(ops.len(), 2);
    assert_eq!(comparators.len(), 2);
    assert_eq!(ops[0].kind, Operator::Lt);
    assert_eq!(ops[1].kind, Operator::LtE);
}

#[test]
fn docstrings_and_comments_are_not_sites() {
    let source = r#"
def positive(x):
    """Returns True if x > 0 and x < 10"""
    # x + 1 would also work
    return x > 0
"#;
    let unit = parser::parse(source).unwrap();
    let sites = unit.operator_sites();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].kind, Operator::Gt);
    assert_eq!(sites[0].span.line, 5);
}

#[test]
fn elif_folds_into_nested_if() {
    let source = r#"
def sign(x):
    if x > 0:
        return 1
    elif x < 0:
        return -1
    else:
        return 0
"#;
    let unit = parser::parse(source).unwrap();
    let StmtKind::FunctionDef(f) = &unit.body[0].kind else {
        panic!("expected a function definition");
    };
    let StmtKind::If { orelse, .. } = &f.body[0].kind else {
        panic!("expected an if statement");
    };
    assert_eq!(orelse.len(), 1);
    assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
}

#[test]
fn augmented_assignment_is_not_a_site() {
    let unit = parser::parse("total = 0\ntotal += 5\n").unwrap();
    assert!(unit.operator_sites().is_empty());
    assert!(matches!(
        unit.body[1].kind,
        StmtKind::AugAssign {
            op: Operator::Add,
            ..
        }
    ));
}

#[test]
fn parses_classes_try_and_with() {
    let source = r#"
import unittest
from calculator import add as plus

class TestAdd(unittest.TestCase):
    def test_add(self):
        try:
            self.assertEqual(plus(1, 2), 3)
        except (TypeError, ValueError) as e:
            raise
        finally:
            pass

    def test_raises(self):
        with self.assertRaises(TypeError) as ctx:
            plus(1, None)
"#;
    let unit = parser::parse(source).unwrap();
    assert_eq!(unit.body.len(), 3);
    assert!(matches!(unit.body[0].kind, StmtKind::Import(_)));
    let StmtKind::ImportFrom { module, names } = &unit.body[1].kind else {
        panic!("expected from-import");
    };
    assert_eq!(module, "calculator");
    assert_eq!(names[0].alias.as_deref(), Some("plus"));
    let StmtKind::ClassDef(class) = &unit.body[2].kind else {
        panic!("expected a class");
    };
    assert_eq!(class.name, "TestAdd");
    assert_eq!(class.bases.len(), 1);
    assert_eq!(class.body.len(), 2);
}

#[test]
fn string_escapes_are_decoded() {
    let unit = parser::parse(r#"s = "tab\there\n""#).unwrap();
    let StmtKind::Assign { value, .. } = &unit.body[0].kind else {
        panic!("expected an assignment");
    };
    assert_eq!(value.kind, ExprKind::Str("tab\there\n".into()));
}

#[test]
fn hex_and_underscored_integers() {
    let unit = parser::parse("a = 0xff\nb = 1_000\n").unwrap();
    let values: Vec<&ExprKind> = unit
        .body
        .iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Assign { value, .. } => Some(&value.kind),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![&ExprKind::Int(255), &ExprKind::Int(1000)]);
}

#[test]
fn empty_source_parses_to_empty_unit() {
    let unit = parser::parse("").unwrap();
    assert!(unit.body.is_empty());
    assert!(unit.operator_sites().is_empty());
}

// --- errors ---

#[test]
fn syntax_error_reports_position() {
    let err = parser::parse("def broken(:\n    return 1\n").unwrap_err();
    match err {
        Error::Parse { line, .. } => assert_eq!(line, 1),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn named_escape_is_kept_as_written() {
    // `\N{...}` is valid Python; it is kept as written rather than refused.
    let unit = parser::parse("s = \"\\N{BULLET}\"\n").unwrap();
    let StmtKind::Assign { value, .. } = &unit.body[0].kind else {
        panic!("expected an assignment");
    };
    assert!(matches!(&value.kind, ExprKind::Raw { atom: true, .. }));
    assert!(parser::parse("s = 'open\n").is_err());
}

// --- forms beyond the evaluated core ---

fn assigned(unit: &mutcheck::tree::SourceUnit, i: usize) -> &ExprKind {
    match &unit.body[i].kind {
        StmtKind::Assign { value, .. } => &value.kind,
        other => panic!("expected an assignment, got {other:?}"),
    }
}

#[test]
fn lambda_with_default_and_body_site() {
    let unit = parser::parse("f = lambda x, y=1: x + y\n").unwrap();
    let ExprKind::Lambda { params, body } = assigned(&unit, 0) else {
        panic!("expected a lambda");
    };
    assert_eq!(params.len(), 2);
    assert!(params[1].default.is_some());
    assert!(matches!(body.kind, ExprKind::BinOp { .. }));
    assert_eq!(unit.operator_sites().len(), 1);
}

#[test]
fn decorators_stay_on_their_definition() {
    let source = "@staticmethod\n@cache(size=2)\ndef f():\n    return 1\n";
    let unit = parser::parse(source).unwrap();
    let StmtKind::FunctionDef(def) = &unit.body[0].kind else {
        panic!("expected a function definition");
    };
    assert_eq!(def.name, "f");
    assert_eq!(def.decorators.len(), 2);
    assert_eq!(def.decorators[0].kind, ExprKind::Name("staticmethod".into()));
    assert!(matches!(def.decorators[1].kind, ExprKind::Call { .. }));
}

#[test]
fn comprehensions_are_mutation_sites() {
    let source = "xs = [x * 2 for x in range(3) if x > 0]\nd = {k: v - 1 for k, v in pairs}\n";
    let unit = parser::parse(source).unwrap();
    let ExprKind::ListComp { clauses, .. } = assigned(&unit, 0) else {
        panic!("expected a list comprehension");
    };
    assert_eq!(clauses.len(), 1);
    assert_eq!(clauses[0].ifs.len(), 1);
    let ExprKind::DictComp { clauses, .. } = assigned(&unit, 1) else {
        panic!("expected a dict comprehension");
    };
    assert!(matches!(&clauses[0].target, Target::Tuple(names) if names.len() == 2));

    let kinds: Vec<Operator> = unit.operator_sites().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![Operator::Mult, Operator::Gt, Operator::Sub]);
}

#[test]
fn dict_slice_and_fstring_literals() {
    let source = "d = {'a': 1, **rest}\nt = xs[1:-1]\ns = f\"{name!r:>8} = {n + 1}\"\n";
    let unit = parser::parse(source).unwrap();
    let ExprKind::Dict(items) = assigned(&unit, 0) else {
        panic!("expected a dict");
    };
    assert_eq!(items.len(), 2);
    assert!(items[1].key.is_none());

    let ExprKind::Subscript { index, .. } = assigned(&unit, 1) else {
        panic!("expected a subscript");
    };
    let ExprKind::Slice { lower, upper, step } = &index.kind else {
        panic!("expected a slice");
    };
    assert!(lower.is_some() && upper.is_some() && step.is_none());

    let ExprKind::FString { text, parts } = assigned(&unit, 2) else {
        panic!("expected an f-string");
    };
    assert_eq!(text, "f\"{name!r:>8} = {n + 1}\"");
    let FStringPart::Value {
        conversion, spec, ..
    } = &parts[0]
    else {
        panic!("expected a replacement field");
    };
    assert_eq!(*conversion, Some('r'));
    assert_eq!(spec, ">8");
    assert_eq!(parts[1], FStringPart::Literal(" = ".into()));
    // Operators inside an f-string are kept with its text, not mutated.
    assert!(unit.operator_sites().is_empty());
}

#[test]
fn unpacking_targets_and_star_parameters() {
    let source = "a, (b, c) = 1, (2, 3)\ndef f(x, /, *args, key=None, **kw):\n    return args\n";
    let unit = parser::parse(source).unwrap();
    let StmtKind::Assign { targets, .. } = &unit.body[0].kind else {
        panic!("expected an assignment");
    };
    let [Target::Tuple(outer)] = targets.as_slice() else {
        panic!("expected one tuple target");
    };
    assert!(matches!(&outer[1], Target::Tuple(inner) if inner.len() == 2));

    let StmtKind::FunctionDef(def) = &unit.body[1].kind else {
        panic!("expected a function definition");
    };
    let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ParamKind::Normal,
            ParamKind::PosOnlyMarker,
            ParamKind::VarArgs,
            ParamKind::Normal,
            ParamKind::KwArgs
        ]
    );
}

#[test]
fn imports_of_every_shape() {
    let unit = parser::parse("from calculator import *\nfrom . import calculator\n").unwrap();
    let StmtKind::ImportFrom { module, names } = &unit.body[0].kind else {
        panic!("expected from-import");
    };
    assert_eq!(module, "calculator");
    assert_eq!(names[0].name, "*");
    assert!(matches!(&unit.body[1].kind, StmtKind::Raw { text, .. } if text == "from . import calculator"));
}

#[test]
fn unmodelled_statements_are_kept_verbatim() {
    let source = "async def fetch():\n    return 1\n\ndef f():\n    global counter\n    counter = 1\n";
    let unit = parser::parse(source).unwrap();
    let StmtKind::Raw { text, indent } = &unit.body[0].kind else {
        panic!("expected a raw statement");
    };
    assert!(text.starts_with("async def fetch():"));
    assert_eq!(indent, "");

    let StmtKind::FunctionDef(def) = &unit.body[1].kind else {
        panic!("expected a function definition");
    };
    assert!(
        matches!(&def.body[0].kind, StmtKind::Raw { text, indent } if text == "global counter" && indent == "    ")
    );
}

#[test]
fn unmodelled_expressions_are_kept_verbatim() {
    let unit = parser::parse("s = {1, 2}\ndef g():\n    x = yield 1\n").unwrap();
    assert_eq!(
        assigned(&unit, 0),
        &ExprKind::Raw {
            text: "{1, 2}".into(),
            atom: true
        }
    );
    let StmtKind::FunctionDef(def) = &unit.body[1].kind else {
        panic!("expected a function definition");
    };
    let StmtKind::Assign { value, .. } = &def.body[0].kind else {
        panic!("expected an assignment");
    };
    assert_eq!(
        value.kind,
        ExprKind::Raw {
            text: "yield 1".into(),
            atom: false
        }
    );
}
