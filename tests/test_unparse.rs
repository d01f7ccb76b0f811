use mutcheck::parser;
use mutcheck::unparse;

/// Serializing twice must give the same text as serializing once.
fn assert_fixpoint(source: &str) -> String {
    let first = unparse::serialize(&parser::parse(source).unwrap());
    let second = unparse::serialize(&parser::parse(&first).unwrap());
    assert_eq!(first, second, "serialization is not stable for:\n{source}");
    first
}

#[test]
fn simple_function() {
    let out = assert_fixpoint("def add(a,b):\n  return a+b\n");
    assert_eq!(out, "def add(a, b):\n    return a + b\n");
}

#[test]
fn keeps_required_parentheses() {
    let out = assert_fixpoint("x = (a + b) * c\ny = a - (b - c)\nz = -(a ** 2)\n");
    assert!(out.contains("(a + b) * c"), "{out}");
    assert!(out.contains("a - (b - c)"), "{out}");
}

#[test]
fn drops_redundant_parentheses() {
    let out = assert_fixpoint("x = (a * b) + c\n");
    assert_eq!(out, "x = a * b + c\n");
}

#[test]
fn power_is_right_associative() {
    let out = assert_fixpoint("x = 2 ** 3 ** 2\ny = (2 ** 3) ** 2\n");
    assert!(out.contains("x = 2 ** 3 ** 2"), "{out}");
    assert!(out.contains("y = (2 ** 3) ** 2"), "{out}");
}

#[test]
fn control_flow_and_classes() {
    assert_fixpoint(
        r#"
import unittest
from calculator import add, divide as div

class TestCalc(unittest.TestCase):
    def setUp(self):
        self.values = [1, 2, 3]

    def test_loop(self):
        total = 0
        for v in self.values:
            if v % 2 == 0:
                continue
            elif v > 10:
                break
            else:
                total += v
        while total > 100:
            total -= 1
        self.assertEqual(total, 4)

    def test_raises(self):
        with self.assertRaises(ValueError):
            div(1, 0)

def helper(x, y=None):
    try:
        return x / y
    except ZeroDivisionError as e:
        return None
    finally:
        pass
"#,
    );
}

#[test]
fn literals_survive() {
    let out = assert_fixpoint(
        "a = 'it\\'s'\nb = \"tab\\t\"\nc = 1.5\nd = None\ne = (1,)\nf = ()\ng = x if x else -1\n",
    );
    assert!(out.contains("e = (1,)"), "{out}");
    assert!(out.contains("f = ()"), "{out}");
    assert!(out.contains("1.5"), "{out}");
}

#[test]
fn comparison_chain_and_membership() {
    let out = assert_fixpoint("ok = 0 <= x < 10 and y not in items and z is not None\n");
    assert!(out.contains("0 <= x < 10"), "{out}");
    assert!(out.contains("y not in items"), "{out}");
    assert!(out.contains("z is not None"), "{out}");
}

#[test]
fn quote_matches_python_repr() {
    assert_eq!(unparse::quote("abc"), "'abc'");
    assert_eq!(unparse::quote("it's"), "\"it's\"");
    assert_eq!(unparse::quote("a\nb"), "'a\\nb'");
}

#[test]
fn expression_renders_single_node() {
    let unit = parser::parse("x = a  *  (b+1)\n").unwrap();
    let mutcheck::tree::StmtKind::Assign { value, .. } = &unit.body[0].kind else {
        panic!("expected an assignment");
    };
    assert_eq!(unparse::expression(value), "a * (b + 1)");
}

#[test]
fn dicts_slices_and_unpacking() {
    let out = assert_fixpoint(
        "d = {'a':1,**rest}\nt = xs[1:-1]\nu = xs[::2]\na, (b, c) = 1, (2, 3)\nfirst, *rest = items\n",
    );
    assert!(out.contains("d = {'a': 1, **rest}"), "{out}");
    assert!(out.contains("t = xs[1:-1]"), "{out}");
    assert!(out.contains("u = xs[::2]"), "{out}");
    assert!(out.contains("a, (b, c) = (1, (2, 3))"), "{out}");
    assert!(out.contains("first, *rest = items"), "{out}");
}

#[test]
fn lambdas_comprehensions_and_fstrings() {
    let out = assert_fixpoint(
        "f = lambda x,y=1: x+y\nxs = [x*2 for x in range(3) if x>0]\ng = sum(x for x in xs)\nd = {k:v for k,v in pairs}\ns = f\"{name!r:>8} = {n+1}\"\n",
    );
    assert!(out.contains("f = lambda x, y=1: x + y"), "{out}");
    assert!(out.contains("xs = [x * 2 for x in range(3) if x > 0]"), "{out}");
    assert!(out.contains("d = {k: v for k, v in pairs}"), "{out}");
    // f-strings are written back as they were.
    assert!(out.contains("s = f\"{name!r:>8} = {n+1}\""), "{out}");
}

#[test]
fn decorators_and_star_parameters() {
    let out = assert_fixpoint(
        "@staticmethod\n@cache(size=2)\ndef f(x, /, *args, key=None, **kw) -> int:\n    return g(*args, **kw)\n",
    );
    assert!(out.starts_with("@staticmethod\n@cache(size=2)\ndef f("), "{out}");
    assert!(out.contains("def f(x, /, *args, key=None, **kw) -> int:"), "{out}");
    assert!(out.contains("return g(*args, **kw)"), "{out}");
}

#[test]
fn imports_and_unmodelled_statements_are_kept() {
    let source = "from calculator import *\nfrom . import helpers\n\nclass A:\n  async def f(self):\n    await g()\n\n  def h(self):\n    global counter\n    x = yield 1\n";
    let out = assert_fixpoint(source);
    assert!(out.contains("from calculator import *"), "{out}");
    assert!(out.contains("from . import helpers"), "{out}");
    assert!(out.contains("    async def f(self):\n      await g()\n"), "{out}");
    assert!(out.contains("        global counter\n"), "{out}");
    assert!(out.contains("x = yield 1"), "{out}");
}

#[test]
fn escapes_are_decoded_and_written_back() {
    let out = assert_fixpoint(r"s = '\b|\012|\U0001F600|\a|\d'
");
    assert_eq!(out, "s = '\\x08|\\n|\u{1F600}|\\x07|\\\\d'\n");
}
