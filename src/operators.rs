//! Mutation catalog: which operator gets replaced by which.
//!
//! The standard catalog is built once per process and never changes.
//! Lookups go through a hash index keyed by the original operator.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::tree::Operator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRule {
    pub original: Operator,
    pub replacement: Operator,
    pub label: &'static str,
}

const fn rule(original: Operator, replacement: Operator, label: &'static str) -> MutationRule {
    MutationRule {
        original,
        replacement,
        label,
    }
}

/// Arithmetic operator rules, in declaration order.
pub const ARITHMETIC_RULES: &[MutationRule] = &[
    rule(Operator::Add, Operator::Sub, "+ to -"),
    rule(Operator::Sub, Operator::Add, "- to +"),
    rule(Operator::Mult, Operator::Div, "* to /"),
    rule(Operator::Div, Operator::Mult, "/ to *"),
    rule(Operator::FloorDiv, Operator::Div, "// to /"),
    rule(Operator::Mod, Operator::Div, "% to /"),
    rule(Operator::Pow, Operator::Mult, "** to *"),
];

/// Comparison operator rules, in declaration order.
pub const COMPARISON_RULES: &[MutationRule] = &[
    rule(Operator::Eq, Operator::NotEq, "== to !="),
    rule(Operator::NotEq, Operator::Eq, "!= to =="),
    rule(Operator::Lt, Operator::Gt, "< to >"),
    rule(Operator::Gt, Operator::Lt, "> to <"),
    rule(Operator::LtE, Operator::GtE, "<= to >="),
    rule(Operator::GtE, Operator::LtE, ">= to <="),
];

static STANDARD: LazyLock<Catalog> = LazyLock::new(|| Catalog {
    rules: ARITHMETIC_RULES
        .iter()
        .chain(COMPARISON_RULES)
        .copied()
        .collect(),
    index: build_index(ARITHMETIC_RULES.iter().chain(COMPARISON_RULES)),
});

fn build_index<'a>(rules: impl Iterator<Item = &'a MutationRule>) -> HashMap<Operator, Vec<usize>> {
    let mut index: HashMap<Operator, Vec<usize>> = HashMap::new();
    for (i, r) in rules.enumerate() {
        index.entry(r.original).or_default().push(i);
    }
    index
}

#[derive(Debug)]
pub struct Catalog {
    rules: Vec<MutationRule>,
    index: HashMap<Operator, Vec<usize>>,
}

impl Catalog {
    /// The process-wide standard catalog.
    pub fn standard() -> &'static Catalog {
        &STANDARD
    }

    /// Build a custom catalog. Every rule must stay inside one operator family.
    pub fn new(rules: Vec<MutationRule>) -> Result<Catalog> {
        if let Some(bad) = rules
            .iter()
            .find(|r| r.original.family() != r.replacement.family())
        {
            return Err(Error::Catalog(format!(
                "rule `{}` crosses operator families",
                bad.label
            )));
        }
        if let Some(bad) = rules.iter().find(|r| r.original == r.replacement) {
            return Err(Error::Catalog(format!(
                "rule `{}` replaces an operator with itself",
                bad.label
            )));
        }
        let index = build_index(rules.iter());
        Ok(Catalog { rules, index })
    }

    pub fn rules(&self) -> &[MutationRule] {
        &self.rules
    }

    /// Rules whose original is `op`, in declaration order.
    pub fn rules_for(&self, op: Operator) -> impl Iterator<Item = &MutationRule> + '_ {
        self.index
            .get(&op)
            .into_iter()
            .flatten()
            .map(|&i| &self.rules[i])
    }

    pub fn has_rule(&self, op: Operator) -> bool {
        self.index.contains_key(&op)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
