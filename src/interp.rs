//! Tree-walking evaluator for the supported Python subset.
//!
//! One `Interpreter` serves exactly one suite run. It owns its module table,
//! so nothing loaded during a run is visible to any other run.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::trace;

use crate::collaborator::Budget;
use crate::error::Error;
use crate::unparse::quote;
use crate::format::format_value;
use crate::tree::{
    BoolOp, ClassDef, Comprehension, DictItem, ExceptHandler, Expr, ExprKind, FStringPart,
    FunctionDef, ImportName, Keyword, Operator, Param, ParamKind, SourceUnit, Stmt,
    StmtKind, Target, UnaryOp,
};
use crate::value::{
    self, Builtin, Class, Function, Instance, Module, Namespace, Num, OpError, RaisesContext,
    Value,
};

const RECURSION_LIMIT: usize = 200;

/// Budget checks happen once per this many ticks.
const CHECK_EVERY: u64 = 64;

const EXCEPTIONS: &[(&str, &str)] = &[
    ("BaseException", ""),
    ("Exception", "BaseException"),
    ("KeyboardInterrupt", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("AssertionError", "Exception"),
    ("AttributeError", "Exception"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("MemoryError", "Exception"),
    ("NameError", "Exception"),
    ("RuntimeError", "Exception"),
    ("NotImplementedError", "RuntimeError"),
    ("RecursionError", "RuntimeError"),
    ("StopIteration", "Exception"),
    ("SyntaxError", "Exception"),
    ("TypeError", "Exception"),
    ("ValueError", "Exception"),
];

const BUILTIN_FUNCTIONS: &[(&str, Builtin)] = &[
    ("print", Builtin::Print),
    ("len", Builtin::Len),
    ("abs", Builtin::Abs),
    ("range", Builtin::Range),
    ("int", Builtin::Int),
    ("float", Builtin::Float),
    ("str", Builtin::Str),
    ("bool", Builtin::Bool),
    ("isinstance", Builtin::IsInstance),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("list", Builtin::List),
    ("tuple", Builtin::Tuple),
    ("dict", Builtin::Dict),
    ("round", Builtin::Round),
    ("sum", Builtin::Sum),
    ("sorted", Builtin::Sorted),
    ("any", Builtin::Any),
    ("all", Builtin::All),
    ("enumerate", Builtin::Enumerate),
    ("zip", Builtin::Zip),
];

const TEST_CASE_METHODS: &[(&str, Builtin)] = &[
    ("assertEqual", Builtin::AssertEqual),
    ("assertEquals", Builtin::AssertEqual),
    ("assertNotEqual", Builtin::AssertNotEqual),
    ("assertTrue", Builtin::AssertTrue),
    ("assertFalse", Builtin::AssertFalse),
    ("assertIsNone", Builtin::AssertIsNone),
    ("assertIsNotNone", Builtin::AssertIsNotNone),
    ("assertAlmostEqual", Builtin::AssertAlmostEqual),
    ("assertLess", Builtin::AssertLess),
    ("assertGreater", Builtin::AssertGreater),
    ("assertIn", Builtin::AssertIn),
    ("assertRaises", Builtin::AssertRaises),
    ("fail", Builtin::Fail),
];

pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Non-local exit out of evaluation.
#[derive(Debug)]
pub enum Unwind {
    /// A Python exception, catchable by `try`.
    Raise(Value),
    /// The budget ran out. Never caught by Python code.
    Halt(Error),
}

pub type Exec<T> = std::result::Result<T, Unwind>;

struct Frame {
    locals: Namespace,
    /// Scopes of the enclosing functions, innermost first.
    enclosing: Vec<Namespace>,
    globals: Namespace,
    /// `locals` belongs to a function or comprehension, so closures made here capture it.
    function_scope: bool,
}

impl Frame {
    fn module(globals: Namespace) -> Frame {
        Frame {
            locals: globals.clone(),
            enclosing: Vec::new(),
            globals,
            function_scope: false,
        }
    }

    fn closure(&self) -> Vec<Namespace> {
        let mut scopes = Vec::with_capacity(self.enclosing.len() + 1);
        if self.function_scope {
            scopes.push(self.locals.clone());
        }
        scopes.extend(self.enclosing.iter().cloned());
        scopes
    }
}

pub struct Interpreter {
    budget: Budget,
    builtins: Namespace,
    modules: RefCell<HashMap<String, Value>>,
    exceptions: HashMap<&'static str, Rc<Class>>,
    test_case: Rc<Class>,
    handling: RefCell<Vec<Value>>,
    /// Scopes captured by closures; emptied on drop to break `Rc` cycles.
    captured: RefCell<Vec<Weak<RefCell<HashMap<String, Value>>>>>,
    ticks: Cell<u64>,
    depth: Cell<usize>,
}

impl Interpreter {
    pub fn new(budget: Budget) -> Self {
        let builtins = value::namespace();
        let mut exceptions: HashMap<&'static str, Rc<Class>> = HashMap::new();
        {
            let mut names = builtins.borrow_mut();
            for &(name, base) in EXCEPTIONS {
                let bases = exceptions.get(base).cloned().into_iter().collect();
                let class = Class::new(name, bases);
                names.insert(name.to_string(), Value::Class(class.clone()));
                exceptions.insert(name, class);
            }
            for &(name, builtin) in BUILTIN_FUNCTIONS {
                names.insert(name.to_string(), Value::Builtin(builtin));
            }
            names.insert("object".into(), Value::Class(Class::new("object", Vec::new())));
        }

        let test_case = Class::new("TestCase", Vec::new());
        {
            let mut attrs = test_case.attrs.borrow_mut();
            for &(name, builtin) in TEST_CASE_METHODS {
                attrs.insert(name.to_string(), Value::Builtin(builtin));
            }
        }

        let interp = Interpreter {
            budget,
            builtins,
            modules: RefCell::new(HashMap::new()),
            exceptions,
            test_case: test_case.clone(),
            handling: RefCell::new(Vec::new()),
            captured: RefCell::new(Vec::new()),
            ticks: Cell::new(0),
            depth: Cell::new(0),
        };
        interp.register_module(
            "unittest",
            synthetic_module("unittest", [("TestCase", Value::Class(test_case))]),
        );
        interp.register_module(
            "pytest",
            synthetic_module("pytest", [("raises", Value::Builtin(Builtin::PytestRaises))]),
        );
        interp
    }

    pub fn test_case_class(&self) -> Rc<Class> {
        self.test_case.clone()
    }

    /// Make `module` importable as `name`.
    pub fn register_module(&self, name: &str, module: Value) {
        self.modules.borrow_mut().insert(name.to_string(), module);
    }

    /// Execute `unit` as a module named `name` and register it on success.
    pub fn exec_module(&self, name: &str, unit: &SourceUnit) -> Exec<Value> {
        let globals = value::namespace();
        globals
            .borrow_mut()
            .insert("__name__".into(), Value::str(name));
        let frame = Frame::module(globals.clone());
        self.exec_block(&unit.body, &frame)?;
        let module = Value::Module(Rc::new(Module {
            name: name.to_string(),
            globals,
        }));
        self.register_module(name, module.clone());
        Ok(module)
    }

    pub fn is_assertion_error(&self, exc: &Value) -> bool {
        self.exceptions
            .get("AssertionError")
            .is_some_and(|class| is_instance_of(exc, class))
    }

    fn exception_class(&self, kind: &str) -> Rc<Class> {
        match self.exceptions.get(kind) {
            Some(class) => class.clone(),
            None => Class::new(kind, Vec::new()),
        }
    }

    fn new_exception(&self, kind: &str, args: Vec<Value>) -> Value {
        Value::Instance(Rc::new(Instance {
            class: self.exception_class(kind),
            fields: RefCell::new(HashMap::from([(
                "args".to_string(),
                Value::Tuple(Rc::new(args)),
            )])),
        }))
    }

    fn raise<T>(&self, kind: &str, message: impl Into<String>) -> Exec<T> {
        let message: String = message.into();
        Err(Unwind::Raise(
            self.new_exception(kind, vec![Value::str(&message)]),
        ))
    }

    fn op<T>(&self, result: std::result::Result<T, OpError>) -> Exec<T> {
        result.map_err(|e| Unwind::Raise(self.new_exception(e.kind, vec![Value::str(&e.message)])))
    }

    fn tick(&self) -> Exec<()> {
        let n = self.ticks.get().wrapping_add(1);
        self.ticks.set(n);
        if n % CHECK_EVERY == 0 {
            self.budget.check().map_err(Unwind::Halt)?;
        }
        Ok(())
    }

    // ---- statements ----

    fn exec_block(&self, body: &[Stmt], frame: &Frame) -> Exec<Flow> {
        for stmt in body {
            match self.exec(stmt, frame)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&self, stmt: &Stmt, frame: &Frame) -> Exec<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, frame)?;
            }
            StmtKind::Assign { targets, value } => {
                let v = self.eval(value, frame)?;
                for target in targets {
                    self.assign(target, v.clone(), frame)?;
                }
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let v = self.eval(value, frame)?;
                    self.assign(target, v, frame)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.load_target(target, frame)?;
                let rhs = self.eval(value, frame)?;
                let v = self.op(value::binary(*op, &current, &rhs))?;
                self.assign(target, v, frame)?;
            }
            StmtKind::Return(e) => {
                let v = match e {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::Raise(e) => {
                let exc = match e {
                    Some(e) => {
                        let v = self.eval(e, frame)?;
                        self.make_exception(v)?
                    }
                    None => {
                        let active = self.handling.borrow().last().cloned();
                        match active {
                            Some(v) => v,
                            None => return self.raise("RuntimeError", "No active exception to reraise"),
                        }
                    }
                };
                return Err(Unwind::Raise(exc));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, frame)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, frame);
            }
            StmtKind::While { test, body, orelse } => loop {
                self.tick()?;
                if !self.eval(test, frame)?.truthy() {
                    return self.exec_block(orelse, frame);
                }
                match self.exec_block(body, frame)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    ret => return Ok(ret),
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, frame)?;
                let items = self.op(value::iterate(&iterable))?;
                for item in items {
                    self.tick()?;
                    self.assign(target, item, frame)?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        ret => return Ok(ret),
                    }
                }
                return self.exec_block(orelse, frame);
            }
            StmtKind::FunctionDef(def) => {
                let f = self.make_function(def, frame)?;
                frame.locals.borrow_mut().insert(def.name.clone(), f);
            }
            StmtKind::ClassDef(def) => {
                let class = self.make_class(def, frame)?;
                frame.locals.borrow_mut().insert(def.name.clone(), class);
            }
            StmtKind::Import(names) => {
                for ImportName { name, alias } in names {
                    let module = self.import(name)?;
                    let bound = alias.clone().unwrap_or_else(|| name.clone());
                    frame.locals.borrow_mut().insert(bound, module);
                }
            }
            // Compiler directives; nothing to do at run time.
            StmtKind::ImportFrom { module, .. } if module == "__future__" => {}
            StmtKind::ImportFrom { module, names } => {
                let source = self.import(module)?;
                self.import_from(&source, module, names, frame)?;
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, frame)?.truthy() {
                    let args = match msg {
                        Some(m) => vec![self.eval(m, frame)?],
                        None => Vec::new(),
                    };
                    return Err(Unwind::Raise(self.new_exception("AssertionError", args)));
                }
            }
            StmtKind::With {
                context,
                alias,
                body,
            } => return self.exec_with(context, alias.as_deref(), body, frame),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, frame),
            StmtKind::Raw { text, .. } => return self.unsupported_syntax(text),
        }
        Ok(Flow::Normal)
    }

    fn import(&self, name: &str) -> Exec<Value> {
        let found = self.modules.borrow().get(name).cloned();
        match found {
            Some(module) => Ok(module),
            None => self.raise("ModuleNotFoundError", format!("No module named '{name}'")),
        }
    }

    fn import_from(
        &self,
        source: &Value,
        module_name: &str,
        names: &[ImportName],
        frame: &Frame,
    ) -> Exec<()> {
        let Value::Module(module) = source else {
            return self.raise("ImportError", format!("'{module_name}' is not a module"));
        };
        for ImportName { name, alias } in names {
            if name == "*" {
                let public: Vec<(String, Value)> = module
                    .globals
                    .borrow()
                    .iter()
                    .filter(|(k, _)| !k.starts_with('_'))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                frame.locals.borrow_mut().extend(public);
                continue;
            }
            let found = module.globals.borrow().get(name).cloned();
            let Some(v) = found else {
                return self.raise(
                    "ImportError",
                    format!("cannot import name '{name}' from '{module_name}'"),
                );
            };
            let bound = alias.clone().unwrap_or_else(|| name.clone());
            frame.locals.borrow_mut().insert(bound, v);
        }
        Ok(())
    }

    fn exec_with(
        &self,
        context: &Expr,
        alias: Option<&str>,
        body: &[Stmt],
        frame: &Frame,
    ) -> Exec<Flow> {
        let ctx_value = self.eval(context, frame)?;
        let Value::Raises(ctx) = &ctx_value else {
            return self.raise(
                "TypeError",
                format!(
                    "'{}' object does not support the context manager protocol",
                    ctx_value.type_name()
                ),
            );
        };
        if let Some(alias) = alias {
            frame
                .locals
                .borrow_mut()
                .insert(alias.to_string(), ctx_value.clone());
        }
        match self.exec_block(body, frame) {
            Err(Unwind::Raise(exc)) => {
                if self.exception_matches(&exc, &ctx.expected)? {
                    *ctx.caught.borrow_mut() = Some(exc);
                    Ok(Flow::Normal)
                } else {
                    Err(Unwind::Raise(exc))
                }
            }
            Err(halt) => Err(halt),
            Ok(_) => self.raise("AssertionError", not_raised_message(ctx)),
        }
    }

    fn exec_try(
        &self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        frame: &Frame,
    ) -> Exec<Flow> {
        let mut result = self.exec_block(body, frame);
        if let Err(Unwind::Raise(exc)) = &result {
            let exc = exc.clone();
            for handler in handlers {
                let hit = match &handler.kind {
                    None => Ok(true),
                    Some(kind) => self
                        .eval(kind, frame)
                        .and_then(|pattern| self.exception_matches(&exc, &pattern)),
                };
                match hit {
                    Ok(false) => continue,
                    Ok(true) => {
                        if let Some(name) = &handler.name {
                            frame.locals.borrow_mut().insert(name.clone(), exc.clone());
                        }
                        self.handling.borrow_mut().push(exc.clone());
                        result = self.exec_block(&handler.body, frame);
                        self.handling.borrow_mut().pop();
                    }
                    Err(e) => result = Err(e),
                }
                break;
            }
        } else if matches!(result, Ok(Flow::Normal)) {
            result = self.exec_block(orelse, frame);
        }

        if finalbody.is_empty() || matches!(result, Err(Unwind::Halt(_))) {
            return result;
        }
        match self.exec_block(finalbody, frame)? {
            Flow::Normal => result,
            other => Ok(other),
        }
    }

    fn unsupported_syntax<T>(&self, text: &str) -> Exec<T> {
        let first = text.lines().next().unwrap_or_default().trim();
        let snippet: String = first.chars().take(60).collect();
        self.raise("NotImplementedError", format!("unsupported syntax: {snippet}"))
    }

    fn make_function(&self, def: &FunctionDef, frame: &Frame) -> Exec<Value> {
        let decorators = self.eval_all(&def.decorators, frame)?;
        let func = self.build_function(&def.name, &def.params, Rc::new(def.body.clone()), frame)?;
        self.decorate(Value::Function(func), decorators)
    }

    /// Decorators are evaluated top to bottom and applied bottom to top.
    fn decorate(&self, mut target: Value, decorators: Vec<Value>) -> Exec<Value> {
        for decorator in decorators.into_iter().rev() {
            target = self.call(&decorator, vec![target], Vec::new())?;
        }
        Ok(target)
    }

    fn build_function(
        &self,
        name: &str,
        params: &[Param],
        body: Rc<Vec<Stmt>>,
        frame: &Frame,
    ) -> Exec<Rc<Function>> {
        let mut names = Vec::with_capacity(params.len());
        let mut defaults = Vec::with_capacity(params.len());
        let mut positional = None;
        let mut posonly = 0;
        let mut varargs = None;
        let mut kwargs = None;
        for param in params {
            match param.kind {
                ParamKind::Normal => {
                    names.push(param.name.clone());
                    defaults.push(match &param.default {
                        Some(d) => Some(self.eval(d, frame)?),
                        None => None,
                    });
                }
                ParamKind::VarArgs => {
                    varargs = Some(param.name.clone());
                    positional.get_or_insert(names.len());
                }
                ParamKind::KwOnlyMarker => {
                    positional.get_or_insert(names.len());
                }
                ParamKind::KwArgs => kwargs = Some(param.name.clone()),
                ParamKind::PosOnlyMarker => posonly = names.len(),
            }
        }
        if frame.function_scope {
            let mut captured = self.captured.borrow_mut();
            let scope = Rc::downgrade(&frame.locals);
            if !captured.last().is_some_and(|last| last.ptr_eq(&scope)) {
                captured.push(scope);
            }
        }
        Ok(Rc::new(Function {
            name: name.to_string(),
            positional: positional.unwrap_or(names.len()),
            posonly,
            params: names,
            defaults,
            varargs,
            kwargs,
            body,
            globals: frame.globals.clone(),
            closure: frame.closure(),
        }))
    }

    fn make_class(&self, def: &ClassDef, frame: &Frame) -> Exec<Value> {
        if let Some(keyword) = def.keywords.first() {
            return self.raise(
                "NotImplementedError",
                format!(
                    "class keyword '{}' is not supported",
                    keyword.name.as_deref().unwrap_or("**")
                ),
            );
        }
        let decorators = self.eval_all(&def.decorators, frame)?;
        let mut bases = Vec::with_capacity(def.bases.len());
        for base in &def.bases {
            match self.eval(base, frame)? {
                Value::Class(class) => bases.push(class),
                other => {
                    return self.raise(
                        "TypeError",
                        format!("bases must be classes, not '{}'", other.type_name()),
                    );
                }
            }
        }
        let namespace = value::namespace();
        let class_frame = Frame {
            locals: namespace.clone(),
            enclosing: frame.closure(),
            globals: frame.globals.clone(),
            function_scope: false,
        };
        let module_name = frame
            .globals
            .borrow()
            .get("__name__")
            .cloned()
            .unwrap_or(Value::None);
        namespace
            .borrow_mut()
            .insert("__module__".to_string(), module_name);
        self.exec_block(&def.body, &class_frame)?;
        let attrs = std::mem::take(&mut *namespace.borrow_mut());
        let class = Value::Class(Rc::new(Class {
            name: def.name.clone(),
            bases,
            attrs: RefCell::new(attrs),
        }));
        self.decorate(class, decorators)
    }

    fn make_exception(&self, v: Value) -> Exec<Value> {
        let base = self.exception_class("BaseException");
        match &v {
            Value::Class(class) if class.is_subclass_of(&base) => {
                self.call(&v, Vec::new(), Vec::new())
            }
            Value::Instance(inst) if inst.class.is_subclass_of(&base) => Ok(v),
            _ => self.raise("TypeError", "exceptions must derive from BaseException"),
        }
    }

    fn exception_matches(&self, exc: &Value, pattern: &Value) -> Exec<bool> {
        match pattern {
            Value::Class(class) => Ok(is_instance_of(exc, class)),
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.exception_matches(exc, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => self.raise(
                "TypeError",
                "catching classes that do not inherit from BaseException is not allowed",
            ),
        }
    }

    // ---- assignment ----

    fn assign(&self, target: &Target, v: Value, frame: &Frame) -> Exec<()> {
        match target {
            Target::Name(name) => {
                frame.locals.borrow_mut().insert(name.clone(), v);
                Ok(())
            }
            Target::Attribute { value: base, attr } => {
                let obj = self.eval(base, frame)?;
                self.set_attr(&obj, attr, v)
            }
            Target::Subscript { value: base, index } => {
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return self.raise("NotImplementedError", "slice assignment is not supported");
                }
                let obj = self.eval(base, frame)?;
                let idx = self.eval(index, frame)?;
                self.set_item(&obj, &idx, v)
            }
            Target::Tuple(targets) => {
                let items = self.op(value::iterate(&v))?;
                if items.len() < targets.len() {
                    return self.raise(
                        "ValueError",
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    );
                }
                if items.len() > targets.len() {
                    return self.raise(
                        "ValueError",
                        format!("too many values to unpack (expected {})", targets.len()),
                    );
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, frame)?;
                }
                Ok(())
            }
        }
    }

    fn load_target(&self, target: &Target, frame: &Frame) -> Exec<Value> {
        match target {
            Target::Name(name) => self.lookup(name, frame),
            Target::Attribute { value: base, attr } => {
                let obj = self.eval(base, frame)?;
                self.get_attr(&obj, attr)
            }
            Target::Subscript { value: base, index } => {
                let obj = self.eval(base, frame)?;
                self.subscript(&obj, index, frame)
            }
            Target::Tuple(_) => self.raise(
                "SyntaxError",
                "illegal expression for augmented assignment",
            ),
        }
    }

    fn set_attr(&self, obj: &Value, name: &str, v: Value) -> Exec<()> {
        match obj {
            Value::Instance(inst) => {
                inst.fields.borrow_mut().insert(name.to_string(), v);
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), v);
            }
            Value::Module(module) => {
                module.globals.borrow_mut().insert(name.to_string(), v);
            }
            other => {
                return self.raise(
                    "AttributeError",
                    format!("'{}' object attribute '{name}' is read-only", other.type_name()),
                );
            }
        }
        Ok(())
    }

    fn set_item(&self, obj: &Value, idx: &Value, v: Value) -> Exec<()> {
        if let Value::Dict(entries) = obj {
            let stored = value::dict_insert(&mut entries.borrow_mut(), idx.clone(), v);
            return self.op(stored);
        }
        let Value::List(items) = obj else {
            return self.raise(
                "TypeError",
                format!("'{}' object does not support item assignment", obj.type_name()),
            );
        };
        let Value::Int(i) = idx else {
            return self.raise(
                "TypeError",
                format!("list indices must be integers, not {}", idx.type_name()),
            );
        };
        let mut items = items.borrow_mut();
        let len = items.len() as i64;
        let pos = if *i < 0 { len + i } else { *i };
        if pos < 0 || pos >= len {
            drop(items);
            return self.raise("IndexError", "list assignment index out of range");
        }
        items[pos as usize] = v;
        Ok(())
    }

    /// `obj[index]`, where a slice index is taken apart rather than evaluated.
    fn subscript(&self, obj: &Value, index: &Expr, frame: &Frame) -> Exec<Value> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            let idx = self.eval(index, frame)?;
            return self.op(value::index(obj, &idx));
        };
        let mut bounds = [None, None, None];
        for (slot, part) in bounds.iter_mut().zip([lower, upper, step]) {
            let Some(part) = part else { continue };
            *slot = match self.eval(part, frame)? {
                Value::None => None,
                Value::Int(i) => Some(i),
                Value::Bool(b) => Some(b as i64),
                other => {
                    return self.raise(
                        "TypeError",
                        format!(
                            "slice indices must be integers or None, not {}",
                            other.type_name()
                        ),
                    );
                }
            };
        }
        let [lower, upper, step] = bounds;
        self.op(value::slice(obj, lower, upper, step))
    }

    // ---- expressions ----

    fn lookup(&self, name: &str, frame: &Frame) -> Exec<Value> {
        let found = frame
            .locals
            .borrow()
            .get(name)
            .cloned()
            .or_else(|| {
                frame
                    .enclosing
                    .iter()
                    .find_map(|scope| scope.borrow().get(name).cloned())
            })
            .or_else(|| frame.globals.borrow().get(name).cloned())
            .or_else(|| self.builtins.borrow().get(name).cloned());
        match found {
            Some(v) => Ok(v),
            None => self.raise("NameError", format!("name '{name}' is not defined")),
        }
    }

    fn eval(&self, expr: &Expr, frame: &Frame) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Name(name) => self.lookup(name, frame),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::NoneLit => Ok(Value::None),
            ExprKind::BinOp { left, op, right } => {
                let a = self.eval(left, frame)?;
                let b = self.eval(right, frame)?;
                self.op(value::binary(op.kind, &a, &b))
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(operand, frame)?;
                self.unary(*op, v)
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(left, frame)?;
                match (op, l.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(right, frame),
                }
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut lhs = self.eval(left, frame)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let rhs = self.eval(comparator, frame)?;
                    if !self.compare(op.kind, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let f = self.eval(func, frame)?;
                let arg_values = self.eval_items(args, frame)?;
                let kwargs = self.eval_keywords(keywords, frame)?;
                self.call(&f, arg_values, kwargs)
            }
            ExprKind::Attribute { value: base, attr } => {
                let obj = self.eval(base, frame)?;
                self.get_attr(&obj, attr)
            }
            ExprKind::Subscript { value: base, index } => {
                let obj = self.eval(base, frame)?;
                self.subscript(&obj, index, frame)
            }
            ExprKind::Slice { .. } => self.raise("TypeError", "slice outside of a subscript"),
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items, frame)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_items(items, frame)?)),
            ExprKind::Dict(items) => self.eval_dict(items, frame),
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, frame)?.truthy() {
                    self.eval(body, frame)
                } else {
                    self.eval(orelse, frame)
                }
            }
            ExprKind::Ellipsis => Ok(Value::Ellipsis),
            ExprKind::Lambda { params, body } => {
                let ret = Stmt {
                    kind: StmtKind::Return(Some((**body).clone())),
                    span: body.span,
                };
                let func = self.build_function("<lambda>", params, Rc::new(vec![ret]), frame)?;
                Ok(Value::Function(func))
            }
            ExprKind::ListComp { elt, clauses } | ExprKind::GeneratorExp { elt, clauses } => {
                let mut out = Vec::new();
                self.comprehension(clauses, frame, &mut |scope: &Frame| {
                    if out.len() >= value::MAX_SEQUENCE {
                        return self.raise("MemoryError", "comprehension too large");
                    }
                    out.push(self.eval(elt, scope)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            ExprKind::DictComp {
                key,
                value: val,
                clauses,
            } => {
                let mut entries = Vec::new();
                self.comprehension(clauses, frame, &mut |scope: &Frame| {
                    let k = self.eval(key, scope)?;
                    let v = self.eval(val, scope)?;
                    self.op(value::dict_insert(&mut entries, k, v))
                })?;
                Ok(Value::dict(entries))
            }
            ExprKind::Starred(_) => {
                self.raise("SyntaxError", "can't use starred expression here")
            }
            ExprKind::FString { parts, .. } => self.eval_fstring(parts, frame),
            ExprKind::Raw { text, .. } => self.unsupported_syntax(text),
        }
    }

    fn eval_all(&self, exprs: &[Expr], frame: &Frame) -> Exec<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    /// Items of a list, tuple or argument list, with `*value` spread in place.
    fn eval_items(&self, items: &[Expr], frame: &Frame) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let spread = self.eval(inner, frame)?;
                    let spread = self.op(value::iterate(&spread))?;
                    if values.len() + spread.len() > value::MAX_SEQUENCE {
                        return self.raise("MemoryError", "sequence too large");
                    }
                    values.extend(spread);
                }
                _ => values.push(self.eval(item, frame)?),
            }
        }
        Ok(values)
    }

    fn eval_keywords(&self, keywords: &[Keyword], frame: &Frame) -> Exec<Vec<(String, Value)>> {
        let mut kwargs = Vec::with_capacity(keywords.len());
        for k in keywords {
            let v = self.eval(&k.value, frame)?;
            match &k.name {
                Some(name) => kwargs.push((name.clone(), v)),
                None => {
                    let Value::Dict(entries) = &v else {
                        return self.raise(
                            "TypeError",
                            format!(
                                "argument after ** must be a mapping, not {}",
                                v.type_name()
                            ),
                        );
                    };
                    for (key, item) in entries.borrow().iter() {
                        let Value::Str(key) = key else {
                            return self.raise("TypeError", "keywords must be strings");
                        };
                        kwargs.push((key.to_string(), item.clone()));
                    }
                }
            }
        }
        Ok(kwargs)
    }

    fn eval_dict(&self, items: &[DictItem], frame: &Frame) -> Exec<Value> {
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            match &item.key {
                Some(key) => {
                    let k = self.eval(key, frame)?;
                    let v = self.eval(&item.value, frame)?;
                    self.op(value::dict_insert(&mut entries, k, v))?;
                }
                None => {
                    let Value::Dict(other) = self.eval(&item.value, frame)? else {
                        return self.raise("TypeError", "'**' operand must be a mapping");
                    };
                    let other = other.borrow().clone();
                    for (k, v) in other {
                        self.op(value::dict_insert(&mut entries, k, v))?;
                    }
                }
            }
        }
        Ok(Value::dict(entries))
    }

    /// Run `emit` once per binding the clauses produce, in a scope of its own.
    /// The first iterable is evaluated in the enclosing scope.
    fn comprehension(
        &self,
        clauses: &[Comprehension],
        frame: &Frame,
        emit: &mut dyn FnMut(&Frame) -> Exec<()>,
    ) -> Exec<()> {
        let Some((first, rest)) = clauses.split_first() else {
            return Ok(());
        };
        let source = self.eval(&first.iter, frame)?;
        let items = self.op(value::iterate(&source))?;
        let scope = Frame {
            locals: value::namespace(),
            enclosing: frame.closure(),
            globals: frame.globals.clone(),
            function_scope: true,
        };
        for item in items {
            self.tick()?;
            self.assign(&first.target, item, &scope)?;
            if self.clause_holds(first, &scope)? {
                self.inner_clauses(rest, &scope, emit)?;
            }
        }
        Ok(())
    }

    fn inner_clauses(
        &self,
        clauses: &[Comprehension],
        scope: &Frame,
        emit: &mut dyn FnMut(&Frame) -> Exec<()>,
    ) -> Exec<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(scope);
        };
        let source = self.eval(&clause.iter, scope)?;
        for item in self.op(value::iterate(&source))? {
            self.tick()?;
            self.assign(&clause.target, item, scope)?;
            if self.clause_holds(clause, scope)? {
                self.inner_clauses(rest, scope, emit)?;
            }
        }
        Ok(())
    }

    fn clause_holds(&self, clause: &Comprehension, scope: &Frame) -> Exec<bool> {
        for cond in &clause.ifs {
            if !self.eval(cond, scope)?.truthy() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_fstring(&self, parts: &[FStringPart], frame: &Frame) -> Exec<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Value {
                    expr,
                    conversion,
                    spec,
                } => {
                    let v = self.eval(expr, frame)?;
                    let v = match conversion {
                        Some('r') => Value::str(&v.repr()),
                        Some('s') => Value::str(&v.display()),
                        Some('a') => Value::str(&ascii(&v.repr())),
                        Some(other) => {
                            return self.raise(
                                "ValueError",
                                format!("unknown conversion specifier {other}"),
                            );
                        }
                        None => v,
                    };
                    out.push_str(&self.op(format_value(&v, spec))?);
                }
            }
            if out.len() > value::MAX_SEQUENCE {
                return self.raise("MemoryError", "string too large");
            }
        }
        Ok(Value::str(&out))
    }

    fn unary(&self, op: UnaryOp, v: Value) -> Exec<Value> {
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Invert => "~",
            UnaryOp::Not => return Ok(Value::Bool(!v.truthy())),
        };
        match (op, Num::of(&v)) {
            (UnaryOp::Neg, Some(Num::I(i))) => match i.checked_neg() {
                Some(n) => Ok(Value::Int(n)),
                None => self.raise("OverflowError", "integer overflow"),
            },
            (UnaryOp::Neg, Some(Num::F(f))) => Ok(Value::Float(-f)),
            (UnaryOp::Pos, Some(Num::I(i))) => Ok(Value::Int(i)),
            (UnaryOp::Pos, Some(Num::F(f))) => Ok(Value::Float(f)),
            (UnaryOp::Invert, Some(Num::I(i))) => Ok(Value::Int(!i)),
            _ => self.raise(
                "TypeError",
                format!("bad operand type for unary {symbol}: '{}'", v.type_name()),
            ),
        }
    }

    fn compare(&self, op: Operator, a: &Value, b: &Value) -> Exec<bool> {
        match op {
            Operator::Eq => Ok(value::py_eq(a, b)),
            Operator::NotEq => Ok(!value::py_eq(a, b)),
            Operator::Lt | Operator::LtE | Operator::Gt | Operator::GtE => {
                self.op(value::ordering(op, a, b))
            }
            Operator::Is => Ok(value::py_is(a, b)),
            Operator::IsNot => Ok(!value::py_is(a, b)),
            Operator::In => self.op(value::contains(b, a)),
            Operator::NotIn => self.op(value::contains(b, a)).map(|found| !found),
            other => self.raise(
                "TypeError",
                format!("'{}' is not a comparison operator", other.symbol()),
            ),
        }
    }

    pub fn get_attr(&self, obj: &Value, name: &str) -> Exec<Value> {
        match obj {
            Value::Instance(inst) => {
                let field = inst.fields.borrow().get(name).cloned();
                if let Some(v) = field {
                    return Ok(v);
                }
                match inst.class.lookup(name) {
                    Some(method @ (Value::Function(_) | Value::Builtin(_))) => {
                        Ok(Value::BoundMethod(Rc::new((obj.clone(), method))))
                    }
                    Some(v) => Ok(v),
                    None => self.raise(
                        "AttributeError",
                        format!("'{}' object has no attribute '{name}'", inst.class.name),
                    ),
                }
            }
            Value::Class(class) => match class.lookup(name) {
                Some(v) => Ok(v),
                None => self.raise(
                    "AttributeError",
                    format!("type object '{}' has no attribute '{name}'", class.name),
                ),
            },
            Value::Module(module) => {
                let found = module.globals.borrow().get(name).cloned();
                match found {
                    Some(v) => Ok(v),
                    None => self.raise(
                        "AttributeError",
                        format!("module '{}' has no attribute '{name}'", module.name),
                    ),
                }
            }
            Value::List(_) if name == "append" => Ok(Value::BoundMethod(Rc::new((
                obj.clone(),
                Value::Builtin(Builtin::ListAppend),
            )))),
            Value::Dict(_) if dict_method(name).is_some() => {
                let method = dict_method(name).map_or(Value::None, Value::Builtin);
                Ok(Value::BoundMethod(Rc::new((obj.clone(), method))))
            }
            Value::Raises(ctx) if name == ctx.attr => {
                let caught = ctx.caught.borrow().clone();
                match caught {
                    Some(exc) => Ok(exc),
                    None => self.raise("AttributeError", format!("no exception recorded in '{name}'")),
                }
            }
            other => self.raise(
                "AttributeError",
                format!("'{}' object has no attribute '{name}'", other.type_name()),
            ),
        }
    }

    // ---- calls ----

    pub fn call(&self, f: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        self.tick()?;
        match f {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::BoundMethod(bound) => {
                let (receiver, method) = &**bound;
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend(args);
                self.call(method, full, kwargs)
            }
            Value::Class(class) => self.instantiate(class, args, kwargs),
            other => self.raise(
                "TypeError",
                format!("'{}' object is not callable", other.type_name()),
            ),
        }
    }

    fn call_function(
        &self,
        func: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let depth = self.depth.get();
        if depth >= RECURSION_LIMIT {
            return self.raise("RecursionError", "maximum recursion depth exceeded");
        }
        let frame = Frame {
            locals: self.bind(func, args, kwargs)?,
            enclosing: func.closure.clone(),
            globals: func.globals.clone(),
            function_scope: true,
        };
        self.depth.set(depth + 1);
        let result = self.exec_block(&func.body, &frame);
        self.depth.set(depth);
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    fn bind(
        &self,
        func: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Namespace> {
        let name = &func.name;
        let given = args.len();
        if given > func.positional && func.varargs.is_none() {
            return self.raise(
                "TypeError",
                format!(
                    "{name}() takes {} positional arguments but {given} were given",
                    func.positional
                ),
            );
        }
        let mut slots: Vec<Option<Value>> = vec![None; func.params.len()];
        let mut extra = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < func.positional {
                slots[i] = Some(arg);
            } else {
                extra.push(arg);
            }
        }
        let mut extra_kw = Vec::new();
        for (key, v) in kwargs {
            match func.params.iter().position(|p| *p == key) {
                Some(i) if i >= func.posonly && slots[i].is_none() => slots[i] = Some(v),
                Some(i) if i >= func.posonly => {
                    return self.raise(
                        "TypeError",
                        format!("{name}() got multiple values for argument '{key}'"),
                    );
                }
                _ if func.kwargs.is_some() => extra_kw.push((Value::str(&key), v)),
                Some(_) => {
                    return self.raise(
                        "TypeError",
                        format!(
                            "{name}() got some positional-only arguments passed as keyword arguments: '{key}'"
                        ),
                    );
                }
                None => {
                    return self.raise(
                        "TypeError",
                        format!("{name}() got an unexpected keyword argument '{key}'"),
                    );
                }
            }
        }

        let locals = value::namespace();
        {
            let mut scope = locals.borrow_mut();
            for (i, slot) in slots.into_iter().enumerate() {
                let v = match slot.or_else(|| func.defaults[i].clone()) {
                    Some(v) => v,
                    None => {
                        drop(scope);
                        let kind = if i < func.positional { "positional" } else { "keyword-only" };
                        return self.raise(
                            "TypeError",
                            format!(
                                "{name}() missing required {kind} argument: '{}'",
                                func.params[i]
                            ),
                        );
                    }
                };
                scope.insert(func.params[i].clone(), v);
            }
            if let Some(varargs) = &func.varargs {
                scope.insert(varargs.clone(), Value::tuple(extra));
            }
            if let Some(kwargs) = &func.kwargs {
                let mut entries = Vec::with_capacity(extra_kw.len());
                for (k, v) in extra_kw {
                    if value::dict_insert(&mut entries, k, v).is_err() {
                        break;
                    }
                }
                scope.insert(kwargs.clone(), Value::dict(entries));
            }
        }
        Ok(locals)
    }

    fn instantiate(
        &self,
        class: &Rc<Class>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let is_exception = class.is_subclass_of(&self.exception_class("BaseException"));
        let mut fields = HashMap::new();
        if is_exception {
            fields.insert("args".to_string(), Value::Tuple(Rc::new(args.clone())));
        }
        let obj = Value::Instance(Rc::new(Instance {
            class: class.clone(),
            fields: RefCell::new(fields),
        }));

        match class.lookup("__init__") {
            Some(init) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(obj.clone());
                full.extend(args);
                if !matches!(self.call(&init, full, kwargs)?, Value::None) {
                    return self.raise("TypeError", "__init__() should return None");
                }
            }
            None => {
                let takes_args = is_exception || class.is_subclass_of(&self.test_case);
                if !takes_args && (!args.is_empty() || !kwargs.is_empty()) {
                    return self.raise(
                        "TypeError",
                        format!("{}() takes no arguments", class.name),
                    );
                }
            }
        }
        Ok(obj)
    }

    fn call_builtin(
        &self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match builtin {
            Builtin::Print => Ok(Value::None),
            Builtin::Len => match args.as_slice() {
                [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
                [Value::List(items)] => Ok(Value::Int(items.borrow().len() as i64)),
                [Value::Tuple(items)] => Ok(Value::Int(items.len() as i64)),
                [Value::Dict(entries)] => Ok(Value::Int(entries.borrow().len() as i64)),
                [other] => self.raise(
                    "TypeError",
                    format!("object of type '{}' has no len()", other.type_name()),
                ),
                _ => self.arity("len", 1, args.len()),
            },
            Builtin::Abs => match args.as_slice() {
                [v] => match Num::of(v) {
                    Some(Num::I(i)) => match i.checked_abs() {
                        Some(n) => Ok(Value::Int(n)),
                        None => self.raise("OverflowError", "integer overflow"),
                    },
                    Some(Num::F(f)) => Ok(Value::Float(f.abs())),
                    None => self.raise(
                        "TypeError",
                        format!("bad operand type for abs(): '{}'", v.type_name()),
                    ),
                },
                _ => self.arity("abs", 1, args.len()),
            },
            Builtin::Range => {
                let mut bounds = Vec::with_capacity(args.len());
                for a in &args {
                    match Num::of(a) {
                        Some(Num::I(i)) => bounds.push(i),
                        _ => {
                            return self.raise(
                                "TypeError",
                                format!(
                                    "'{}' object cannot be interpreted as an integer",
                                    a.type_name()
                                ),
                            );
                        }
                    }
                }
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return self.arity("range", 3, args.len()),
                };
                self.op(value::range(start, stop, step))
            }
            Builtin::Int => match args.as_slice() {
                [] => Ok(Value::Int(0)),
                [v] => self.to_int(v),
                _ => self.arity("int", 1, args.len()),
            },
            Builtin::Float => match args.as_slice() {
                [] => Ok(Value::Float(0.0)),
                [Value::Str(s)] => match s.trim().parse::<f64>() {
                    Ok(f) => Ok(Value::Float(f)),
                    Err(_) => self.raise(
                        "ValueError",
                        format!("could not convert string to float: {}", quote(s)),
                    ),
                },
                [v] => match Num::of(v) {
                    Some(n) => Ok(Value::Float(n.as_f64())),
                    None => self.raise(
                        "TypeError",
                        format!("float() argument must be a string or a number, not '{}'", v.type_name()),
                    ),
                },
                _ => self.arity("float", 1, args.len()),
            },
            Builtin::Str => match args.as_slice() {
                [] => Ok(Value::str("")),
                [v] => Ok(Value::str(&v.display())),
                _ => self.arity("str", 1, args.len()),
            },
            Builtin::Bool => match args.as_slice() {
                [] => Ok(Value::Bool(false)),
                [v] => Ok(Value::Bool(v.truthy())),
                _ => self.arity("bool", 1, args.len()),
            },
            Builtin::IsInstance => match args.as_slice() {
                [obj, pattern] => self.isinstance(obj, pattern).map(Value::Bool),
                _ => self.arity("isinstance", 2, args.len()),
            },
            Builtin::Min | Builtin::Max => self.extremum(builtin, args, kwargs),
            Builtin::List => match args.as_slice() {
                [] => Ok(Value::list(Vec::new())),
                [v] => self.op(value::iterate(v)).map(Value::list),
                _ => self.arity("list", 1, args.len()),
            },
            Builtin::Tuple => match args.as_slice() {
                [] => Ok(Value::tuple(Vec::new())),
                [v] => self.op(value::iterate(v)).map(Value::tuple),
                _ => self.arity("tuple", 1, args.len()),
            },
            Builtin::Dict => self.make_dict(args, kwargs),
            Builtin::Round => self.round(&args),
            Builtin::Sum => {
                let (iterable, start) = match args.as_slice() {
                    [iterable] => (iterable, keyword_arg(&kwargs, "start").unwrap_or(Value::Int(0))),
                    [iterable, start] => (iterable, start.clone()),
                    _ => return self.arity("sum", 2, args.len()),
                };
                let mut total = start;
                for item in self.op(value::iterate(iterable))? {
                    self.tick()?;
                    total = self.op(value::binary(Operator::Add, &total, &item))?;
                }
                Ok(total)
            }
            Builtin::Sorted => match args.as_slice() {
                [iterable] => {
                    let items = self.op(value::iterate(iterable))?;
                    let key = keyword_arg(&kwargs, "key").filter(|k| !matches!(k, Value::None));
                    let reverse = keyword_arg(&kwargs, "reverse").is_some_and(|r| r.truthy());
                    self.sorted(items, key.as_ref(), reverse).map(Value::list)
                }
                _ => self.arity("sorted", 1, args.len()),
            },
            Builtin::Any | Builtin::All => match args.as_slice() {
                [iterable] => {
                    let want = builtin == Builtin::Any;
                    let hit = self
                        .op(value::iterate(iterable))?
                        .iter()
                        .any(|item| item.truthy() == want);
                    Ok(Value::Bool(hit == want))
                }
                _ => self.arity(if builtin == Builtin::Any { "any" } else { "all" }, 1, args.len()),
            },
            Builtin::Enumerate => {
                let (iterable, start) = match args.as_slice() {
                    [iterable] => (iterable, keyword_arg(&kwargs, "start").unwrap_or(Value::Int(0))),
                    [iterable, start] => (iterable, start.clone()),
                    _ => return self.arity("enumerate", 2, args.len()),
                };
                let Value::Int(start) = start else {
                    return self.raise(
                        "TypeError",
                        format!("'{}' object cannot be interpreted as an integer", start.type_name()),
                    );
                };
                let items = self.op(value::iterate(iterable))?;
                Ok(Value::list(
                    items
                        .into_iter()
                        .zip(start..)
                        .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
                        .collect(),
                ))
            }
            Builtin::Zip => {
                let mut columns = Vec::with_capacity(args.len());
                for a in &args {
                    columns.push(self.op(value::iterate(a))?);
                }
                let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
                Ok(Value::list(
                    (0..rows)
                        .map(|r| Value::tuple(columns.iter().map(|c| c[r].clone()).collect()))
                        .collect(),
                ))
            }
            Builtin::DictGet
            | Builtin::DictKeys
            | Builtin::DictValues
            | Builtin::DictItems
            | Builtin::DictPop => self.dict_method(builtin, &args),
            Builtin::ListAppend => match args.as_slice() {
                [Value::List(items), item] => {
                    if items.borrow().len() >= value::MAX_SEQUENCE {
                        return self.raise("MemoryError", "list too large");
                    }
                    items.borrow_mut().push(item.clone());
                    Ok(Value::None)
                }
                _ => self.arity("append", 1, args.len().saturating_sub(1)),
            },
            Builtin::PytestRaises => match args.split_first() {
                Some((expected, [])) => Ok(raises_context(expected.clone(), "value")),
                Some((expected, [func, rest @ ..])) => {
                    self.call_expecting(expected, func, rest.to_vec(), kwargs)
                }
                None => self.arity("raises", 1, 0),
            },
            assertion => self.assertion(assertion, args, kwargs),
        }
    }

    fn arity<T>(&self, name: &str, expected: usize, given: usize) -> Exec<T> {
        self.raise(
            "TypeError",
            format!("{name}() takes {expected} argument(s) ({given} given)"),
        )
    }

    fn to_int(&self, v: &Value) -> Exec<Value> {
        match v {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::Float(f) => {
                if f.is_nan() {
                    self.raise("ValueError", "cannot convert float NaN to integer")
                } else if f.is_infinite() || f.abs() >= 9.2e18 {
                    self.raise("OverflowError", "cannot convert float infinity to integer")
                } else {
                    Ok(Value::Int(f.trunc() as i64))
                }
            }
            Value::Str(s) => match s.trim().replace('_', "").parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => self.raise(
                    "ValueError",
                    format!("invalid literal for int() with base 10: {}", quote(s)),
                ),
            },
            other => self.raise(
                "TypeError",
                format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ),
            ),
        }
    }

    fn round(&self, args: &[Value]) -> Exec<Value> {
        match args {
            [v] => match Num::of(v) {
                Some(Num::I(i)) => Ok(Value::Int(i)),
                Some(Num::F(f)) => self.to_int(&Value::Float(f.round_ties_even())),
                None => self.raise(
                    "TypeError",
                    format!("type {} doesn't define __round__ method", v.type_name()),
                ),
            },
            [v, Value::Int(places)] => match Num::of(v) {
                Some(Num::I(i)) => Ok(Value::Int(i)),
                Some(Num::F(f)) => {
                    let scale = 10f64.powi((*places).clamp(-308, 308) as i32);
                    Ok(Value::Float((f * scale).round_ties_even() / scale))
                }
                None => self.raise(
                    "TypeError",
                    format!("type {} doesn't define __round__ method", v.type_name()),
                ),
            },
            _ => self.arity("round", 2, args.len()),
        }
    }

    fn isinstance(&self, obj: &Value, pattern: &Value) -> Exec<bool> {
        Ok(match pattern {
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.isinstance(obj, item)? {
                        return Ok(true);
                    }
                }
                false
            }
            Value::Class(class) => is_instance_of(obj, class),
            Value::Builtin(Builtin::Int) => matches!(obj, Value::Int(_) | Value::Bool(_)),
            Value::Builtin(Builtin::Float) => matches!(obj, Value::Float(_)),
            Value::Builtin(Builtin::Str) => matches!(obj, Value::Str(_)),
            Value::Builtin(Builtin::Bool) => matches!(obj, Value::Bool(_)),
            Value::Builtin(Builtin::List) => matches!(obj, Value::List(_)),
            Value::Builtin(Builtin::Tuple) => matches!(obj, Value::Tuple(_)),
            Value::Builtin(Builtin::Dict) => matches!(obj, Value::Dict(_)),
            _ => {
                return self.raise(
                    "TypeError",
                    "isinstance() arg 2 must be a type or tuple of types",
                );
            }
        })
    }

    fn extremum(
        &self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let (name, op) = if builtin == Builtin::Min {
            ("min", Operator::Lt)
        } else {
            ("max", Operator::Gt)
        };
        let key = keyword_arg(&kwargs, "key").filter(|k| !matches!(k, Value::None));
        let items = match args.as_slice() {
            [single] => self.op(value::iterate(single))?,
            _ => args,
        };
        let mut items = items.into_iter();
        let Some(mut best) = items.next() else {
            if let Some(default) = keyword_arg(&kwargs, "default") {
                return Ok(default);
            }
            return self.raise("ValueError", format!("{name}() arg is an empty sequence"));
        };
        let mut best_key = self.sort_key(key.as_ref(), &best)?;
        for item in items {
            let item_key = self.sort_key(key.as_ref(), &item)?;
            if self.op(value::ordering(op, &item_key, &best_key))? {
                best = item;
                best_key = item_key;
            }
        }
        Ok(best)
    }

    fn sort_key(&self, key: Option<&Value>, item: &Value) -> Exec<Value> {
        match key {
            Some(f) => self.call(f, vec![item.clone()], Vec::new()),
            None => Ok(item.clone()),
        }
    }

    /// Stable merge sort; comparisons can raise, so `slice::sort_by` will not do.
    fn sorted(&self, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> Exec<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            keyed.push((self.sort_key(key, &item)?, item));
        }
        let sorted = self.merge_sort(keyed, reverse)?;
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    fn merge_sort(
        &self,
        mut items: Vec<(Value, Value)>,
        reverse: bool,
    ) -> Exec<Vec<(Value, Value)>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, reverse)?;
        let right = self.merge_sort(right, reverse)?;
        let mut out = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
            self.tick()?;
            let (first, second) = if reverse { (&l.0, &r.0) } else { (&r.0, &l.0) };
            let take_right = self.op(value::ordering(Operator::Lt, first, second))?;
            let next = if take_right { right.next() } else { left.next() };
            out.extend(next);
        }
        out.extend(left);
        out.extend(right);
        Ok(out)
    }

    fn make_dict(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let mut entries = Vec::new();
        match args.as_slice() {
            [] => {}
            [Value::Dict(other)] => entries = other.borrow().clone(),
            [pairs] => {
                for pair in self.op(value::iterate(pairs))? {
                    let kv = self.op(value::iterate(&pair))?;
                    let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
                        Unwind::Raise(self.new_exception(
                            "ValueError",
                            vec![Value::str(&format!(
                                "dictionary update sequence element has length {}; 2 is required",
                                kv.len()
                            ))],
                        ))
                    })?;
                    self.op(value::dict_insert(&mut entries, k, v))?;
                }
            }
            _ => return self.arity("dict", 1, args.len()),
        }
        for (k, v) in kwargs {
            self.op(value::dict_insert(&mut entries, Value::str(&k), v))?;
        }
        Ok(Value::dict(entries))
    }

    fn dict_method(&self, builtin: Builtin, args: &[Value]) -> Exec<Value> {
        let Some((Value::Dict(entries), rest)) = args.split_first() else {
            return self.raise("TypeError", "descriptor requires a 'dict' object");
        };
        match (builtin, rest) {
            (Builtin::DictGet, [key, default @ ..]) if default.len() <= 1 => {
                self.op(value::hashable(key))?;
                let found = value::dict_lookup(&entries.borrow(), key);
                Ok(found.or_else(|| default.first().cloned()).unwrap_or(Value::None))
            }
            (Builtin::DictKeys, []) => Ok(Value::list(
                entries.borrow().iter().map(|(k, _)| k.clone()).collect(),
            )),
            (Builtin::DictValues, []) => Ok(Value::list(
                entries.borrow().iter().map(|(_, v)| v.clone()).collect(),
            )),
            (Builtin::DictItems, []) => Ok(Value::list(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )),
            (Builtin::DictPop, [key, default @ ..]) if default.len() <= 1 => {
                self.op(value::hashable(key))?;
                let position = entries.borrow().iter().position(|(k, _)| value::py_eq(k, key));
                match (position, default.first()) {
                    (Some(i), _) => Ok(entries.borrow_mut().remove(i).1),
                    (None, Some(d)) => Ok(d.clone()),
                    (None, None) => self.raise("KeyError", key.repr()),
                }
            }
            (other, _) => self.raise(
                "TypeError",
                format!("{other:?}() called with {} argument(s)", rest.len()),
            ),
        }
    }

    /// Call `func` and require it to raise something matching `expected`.
    fn call_expecting(
        &self,
        expected: &Value,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match self.call(func, args, kwargs) {
            Err(Unwind::Raise(exc)) => {
                if self.exception_matches(&exc, expected)? {
                    Ok(Value::None)
                } else {
                    Err(Unwind::Raise(exc))
                }
            }
            Err(halt) => Err(halt),
            Ok(_) => self.raise(
                "AssertionError",
                format!("{} not raised by {}", expected_name(expected), callable_name(func)),
            ),
        }
    }

    fn assertion(
        &self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        // args[0] is the TestCase instance.
        let rest = args.get(1..).unwrap_or(&[]);
        let kwarg = |key: &str| kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        let msg = |extra: &[Value]| extra.first().cloned().or_else(|| kwarg("msg"));

        match (builtin, rest) {
            (Builtin::AssertEqual, [first, second, extra @ ..]) => {
                if value::py_eq(first, second) {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} != {}", first.repr(), second.repr()), msg(extra))
            }
            (Builtin::AssertNotEqual, [first, second, extra @ ..]) => {
                if !value::py_eq(first, second) {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} == {}", first.repr(), second.repr()), msg(extra))
            }
            (Builtin::AssertTrue, [expr, extra @ ..]) => {
                if expr.truthy() {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} is not true", expr.repr()), msg(extra))
            }
            (Builtin::AssertFalse, [expr, extra @ ..]) => {
                if !expr.truthy() {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} is not false", expr.repr()), msg(extra))
            }
            (Builtin::AssertIsNone, [expr, extra @ ..]) => {
                if matches!(expr, Value::None) {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} is not None", expr.repr()), msg(extra))
            }
            (Builtin::AssertIsNotNone, [expr, extra @ ..]) => {
                if !matches!(expr, Value::None) {
                    return Ok(Value::None);
                }
                self.fail_with("unexpectedly None".to_string(), msg(extra))
            }
            (Builtin::AssertLess, [a, b, extra @ ..]) => {
                if self.op(value::ordering(Operator::Lt, a, b))? {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} not less than {}", a.repr(), b.repr()), msg(extra))
            }
            (Builtin::AssertGreater, [a, b, extra @ ..]) => {
                if self.op(value::ordering(Operator::Gt, a, b))? {
                    return Ok(Value::None);
                }
                self.fail_with(format!("{} not greater than {}", a.repr(), b.repr()), msg(extra))
            }
            (Builtin::AssertIn, [member, container, extra @ ..]) => {
                if self.op(value::contains(container, member))? {
                    return Ok(Value::None);
                }
                self.fail_with(
                    format!("{} not found in {}", member.repr(), container.repr()),
                    msg(extra),
                )
            }
            (Builtin::AssertAlmostEqual, [first, second, extra @ ..]) => {
                if value::py_eq(first, second) {
                    return Ok(Value::None);
                }
                let (Some(a), Some(b)) = (Num::of(first), Num::of(second)) else {
                    return self.raise(
                        "TypeError",
                        format!(
                            "unsupported operand type(s) for -: '{}' and '{}'",
                            first.type_name(),
                            second.type_name()
                        ),
                    );
                };
                let diff = (a.as_f64() - b.as_f64()).abs();
                if let Some(delta) = kwarg("delta").as_ref().and_then(Num::of) {
                    if diff <= delta.as_f64() {
                        return Ok(Value::None);
                    }
                    return self.fail_with(
                        format!("{} != {} within {} delta", first.repr(), second.repr(), value::float_repr(delta.as_f64())),
                        kwarg("msg"),
                    );
                }
                let places = match extra.first().cloned().or_else(|| kwarg("places")) {
                    Some(Value::Int(p)) => p,
                    _ => 7,
                };
                let scale = 10f64.powi(places.clamp(-308, 308) as i32);
                if (diff * scale).round_ties_even() == 0.0 {
                    return Ok(Value::None);
                }
                self.fail_with(
                    format!("{} != {} within {places} places", first.repr(), second.repr()),
                    extra.get(1).cloned().or_else(|| kwarg("msg")),
                )
            }
            (Builtin::Fail, extra) => {
                let args = msg(extra).into_iter().collect();
                Err(Unwind::Raise(self.new_exception("AssertionError", args)))
            }
            (Builtin::AssertRaises, [expected]) => Ok(raises_context(expected.clone(), "exception")),
            (Builtin::AssertRaises, [expected, func, extra @ ..]) => {
                self.call_expecting(expected, func, extra.to_vec(), kwargs)
            }
            (other, _) => self.raise(
                "TypeError",
                format!("{other:?}() called with {} argument(s)", rest.len()),
            ),
        }
    }

    fn fail_with(&self, standard: String, msg: Option<Value>) -> Exec<Value> {
        let message = match msg {
            Some(Value::None) | None => standard,
            Some(m) => format!("{standard} : {}", m.display()),
        };
        trace!("assertion failed: {message}");
        self.raise("AssertionError", message)
    }
}

impl Drop for Interpreter {
    /// Functions hold their module namespace and namespaces hold the
    /// functions, so the tables are emptied to let the `Rc`s go.
    fn drop(&mut self) {
        let modules = std::mem::take(&mut *self.modules.borrow_mut());
        for module in modules.into_values() {
            if let Value::Module(m) = module {
                let globals = std::mem::take(&mut *m.globals.borrow_mut());
                drop(globals);
            }
        }
        let captured = std::mem::take(&mut *self.captured.borrow_mut());
        for scope in captured.iter().filter_map(Weak::upgrade) {
            let names = std::mem::take(&mut *scope.borrow_mut());
            drop(names);
        }
        let builtins = std::mem::take(&mut *self.builtins.borrow_mut());
        drop(builtins);
        self.test_case.attrs.borrow_mut().clear();
    }
}

fn synthetic_module<const N: usize>(name: &str, members: [(&str, Value); N]) -> Value {
    let globals = value::namespace();
    {
        let mut scope = globals.borrow_mut();
        scope.insert("__name__".into(), Value::str(name));
        for (key, v) in members {
            scope.insert(key.to_string(), v);
        }
    }
    Value::Module(Rc::new(Module {
        name: name.to_string(),
        globals,
    }))
}

fn keyword_arg(kwargs: &[(String, Value)], key: &str) -> Option<Value> {
    kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

fn dict_method(name: &str) -> Option<Builtin> {
    Some(match name {
        "get" => Builtin::DictGet,
        "keys" => Builtin::DictKeys,
        "values" => Builtin::DictValues,
        "items" => Builtin::DictItems,
        "pop" => Builtin::DictPop,
        _ => return None,
    })
}

/// `ascii()`: a repr with non-ASCII characters escaped.
fn ascii(repr: &str) -> String {
    let mut out = String::with_capacity(repr.len());
    for c in repr.chars() {
        match c as u32 {
            0..=0x7f => out.push(c),
            n @ 0x80..=0xff => out.push_str(&format!("\\x{n:02x}")),
            n @ 0x100..=0xffff => out.push_str(&format!("\\u{n:04x}")),
            n => out.push_str(&format!("\\U{n:08x}")),
        }
    }
    out
}

fn raises_context(expected: Value, attr: &'static str) -> Value {
    Value::Raises(Rc::new(RaisesContext {
        expected,
        caught: RefCell::new(None),
        attr,
    }))
}

fn is_instance_of(obj: &Value, class: &Rc<Class>) -> bool {
    matches!(obj, Value::Instance(inst) if inst.class.is_subclass_of(class))
}

fn expected_name(expected: &Value) -> String {
    match expected {
        Value::Class(class) => class.name.clone(),
        Value::Tuple(items) => {
            let names: Vec<String> = items.iter().map(expected_name).collect();
            format!("({})", names.join(", "))
        }
        other => other.repr(),
    }
}

fn callable_name(func: &Value) -> String {
    match func {
        Value::Function(f) => f.name.clone(),
        Value::BoundMethod(bound) => callable_name(&bound.1),
        other => other.repr(),
    }
}

fn not_raised_message(ctx: &RaisesContext) -> String {
    if ctx.attr == "value" {
        format!("DID NOT RAISE {}", ctx.expected.repr())
    } else {
        format!("{} not raised", expected_name(&ctx.expected))
    }
}

/// `"ValueError: message"`, or just the type name when there is no message.
pub fn describe(exc: &Value) -> String {
    let message = exc.display();
    if message.is_empty() {
        exc.type_name()
    } else {
        format!("{}: {message}", exc.type_name())
    }
}

/// A module's globals, sorted by name.
pub fn module_globals(module: &Value) -> Vec<(String, Value)> {
    let Value::Module(m) = module else {
        return Vec::new();
    };
    let mut entries: Vec<(String, Value)> = m
        .globals
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// One global of a module, if defined.
pub fn global(module: &Value, name: &str) -> Option<Value> {
    match module {
        Value::Module(m) => m.globals.borrow().get(name).cloned(),
        _ => None,
    }
}
