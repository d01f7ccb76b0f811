//! In-process test collaborator: runs a unittest/pytest style test file
//! through the interpreter against a loaded unit.

use std::path::Path;
use std::rc::Rc;

use log::{debug, trace};

use crate::collaborator::{Budget, LoadedUnit, SuiteResult, TestCollaborator};
use crate::error::{Error, Result};
use crate::interp::{self, Exec, Interpreter, Unwind};
use crate::parser;
use crate::tree::SourceUnit;
use crate::value::{Class, Value};

/// Each run gets its own thread so deep recursion in the code under test
/// can't exhaust a worker's stack.
const SUITE_STACK_SIZE: usize = 64 * 1024 * 1024;

pub struct UnittestSuite {
    module_name: String,
    tree: SourceUnit,
}

enum TestStatus {
    Passed,
    Failed(String),
    Errored(String),
}

impl UnittestSuite {
    pub fn new(module_name: impl Into<String>, source: &str) -> Result<Self> {
        Ok(UnittestSuite {
            module_name: module_name.into(),
            tree: parser::parse(source)?,
        })
    }

    /// Read and parse a test file; its stem becomes the module name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::new(module_stem(path), &source)
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    fn run_isolated(&self, unit: &LoadedUnit, budget: &Budget) -> Result<SuiteResult> {
        let interp = Interpreter::new(budget.clone());

        let module = interp
            .exec_module(&unit.name, &unit.tree)
            .map_err(|e| unwind_error(e, &format!("loading {}", unit.name)))?;
        interp.register_module(&unit.module_name, module);

        let tests = interp
            .exec_module(&self.module_name, &self.tree)
            .map_err(|e| unwind_error(e, &format!("importing {}", self.module_name)))?;

        let mut result = SuiteResult::default();
        let test_case = interp.test_case_class();
        for (name, item) in interp::module_globals(&tests) {
            if !defined_in(&item, &tests) {
                continue;
            }
            match &item {
                Value::Class(class) if is_test_class(class, &test_case) => {
                    for method in test_methods(class) {
                        let status = run_method(&interp, &item, &method, &test_case)
                            .map_err(|e| unwind_error(e, &method))?;
                        record(&mut result, &format!("{name}.{method}"), status);
                    }
                }
                Value::Function(_) if name.starts_with("test") => {
                    let status = classify(&interp, interp.call(&item, Vec::new(), Vec::new()))
                        .map_err(|e| unwind_error(e, &name))?;
                    record(&mut result, &name, status);
                }
                _ => {}
            }
        }
        Ok(result)
    }
}

impl TestCollaborator for UnittestSuite {
    fn run_suite(&self, unit: &LoadedUnit, budget: &Budget) -> Result<SuiteResult> {
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name(format!("suite-{}", unit.name))
                .stack_size(SUITE_STACK_SIZE)
                .spawn_scoped(scope, || self.run_isolated(unit, budget))
                .map_err(|source| Error::Spawn {
                    what: "test thread".into(),
                    source,
                })?;
            handle
                .join()
                .map_err(|_| Error::Execution(format!("interpreter panicked while testing {}", unit.name)))?
        })
    }
}

/// `tests/test_calc.py` -> `test_calc`
pub fn module_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string())
}

/// Only what the test module defines is collected, not what it imports.
fn defined_in(item: &Value, module: &Value) -> bool {
    let Value::Module(module) = module else {
        return false;
    };
    match item {
        Value::Function(f) => Rc::ptr_eq(&f.globals, &module.globals),
        Value::Class(c) => matches!(
            c.attrs.borrow().get("__module__"),
            Some(Value::Str(m)) if m.as_ref() == module.name
        ),
        _ => false,
    }
}

fn is_test_class(class: &Rc<Class>, test_case: &Rc<Class>) -> bool {
    if Rc::ptr_eq(class, test_case) {
        return false;
    }
    class.is_subclass_of(test_case) || class.name.starts_with("Test")
}

/// `test*` methods across the class hierarchy, sorted by name.
fn test_methods(class: &Rc<Class>) -> Vec<String> {
    let mut names: Vec<String> = class
        .mro()
        .iter()
        .flat_map(|c| {
            c.attrs
                .borrow()
                .iter()
                .filter(|(k, v)| k.starts_with("test") && matches!(v, Value::Function(_)))
                .map(|(k, _)| k.clone())
                .collect::<Vec<_>>()
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

fn run_method(
    interp: &Interpreter,
    class: &Value,
    method: &str,
    test_case: &Rc<Class>,
) -> Exec<TestStatus> {
    let is_unittest = matches!(class, Value::Class(c) if c.is_subclass_of(test_case));
    let args = if is_unittest {
        vec![Value::str(method)]
    } else {
        Vec::new()
    };
    let instance = match interp.call(class, args, Vec::new()) {
        Ok(instance) => instance,
        Err(e) => return classify(interp, Err(e)).map(as_error),
    };

    let hook = |name: &str| -> Exec<()> {
        match interp.get_attr(&instance, name) {
            Ok(f) => interp.call(&f, Vec::new(), Vec::new()).map(drop),
            Err(Unwind::Raise(_)) => Ok(()),
            Err(halt) => Err(halt),
        }
    };

    let setup = classify(interp, hook("setUp").map(|_| Value::None))?;
    if !matches!(setup, TestStatus::Passed) {
        return Ok(as_error(setup));
    }

    let body = interp
        .get_attr(&instance, method)
        .and_then(|f| interp.call(&f, Vec::new(), Vec::new()));
    let status = classify(interp, body)?;

    let teardown = classify(interp, hook("tearDown").map(|_| Value::None))?;
    match (status, teardown) {
        (TestStatus::Passed, TestStatus::Passed) => Ok(TestStatus::Passed),
        (TestStatus::Passed, failed) => Ok(as_error(failed)),
        (status, _) => Ok(status),
    }
}

/// Sort a test body's outcome into pass, failure or error; budget exits propagate.
fn classify(interp: &Interpreter, outcome: Exec<Value>) -> Exec<TestStatus> {
    match outcome {
        Ok(_) => Ok(TestStatus::Passed),
        Err(Unwind::Raise(exc)) if interp.is_assertion_error(&exc) => {
            Ok(TestStatus::Failed(interp::describe(&exc)))
        }
        Err(Unwind::Raise(exc)) => Ok(TestStatus::Errored(interp::describe(&exc))),
        Err(halt) => Err(halt),
    }
}

/// Problems in fixtures count as errors whatever raised them.
fn as_error(status: TestStatus) -> TestStatus {
    match status {
        TestStatus::Failed(msg) => TestStatus::Errored(msg),
        other => other,
    }
}

fn record(result: &mut SuiteResult, name: &str, status: TestStatus) {
    result.tests_run += 1;
    match status {
        TestStatus::Passed => trace!("{name} ... ok"),
        TestStatus::Failed(msg) => {
            debug!("{name} ... FAIL: {msg}");
            result.failures += 1;
        }
        TestStatus::Errored(msg) => {
            debug!("{name} ... ERROR: {msg}");
            result.errors += 1;
        }
    }
}

fn unwind_error(unwind: Unwind, context: &str) -> Error {
    match unwind {
        Unwind::Halt(e) => e,
        Unwind::Raise(exc) => Error::Execution(format!("{context}: {}", interp::describe(&exc))),
    }
}
