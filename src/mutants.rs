use serde::{Deserialize, Serialize};

use crate::tree::{Operator, SourceUnit, Span};

/// How many sites one mutant rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Only the triggering operator token.
    #[default]
    Single,
    /// Every token of the triggering operator kind across the unit.
    All,
}

/// One replaced operator token, located in the original text.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub span: Span,
    pub replacement: Operator,
}

#[derive(Debug, Clone)]
pub struct Mutant {
    /// Position in generation order.
    pub index: usize,
    pub label: &'static str,
    pub line: usize,
    pub original: Operator,
    pub replacement: Operator,
    pub tree: SourceUnit,
    pub edits: Vec<Edit>,
}

impl Mutant {
    /// Apply this mutant's edits to the original text, keeping its layout.
    pub fn apply_to(&self, source: &str) -> String {
        let mut edits: Vec<&Edit> = self.edits.iter().collect();
        edits.sort_by_key(|e| e.span.start_byte);

        let mut result = String::with_capacity(source.len());
        let mut cursor = 0;
        for edit in edits {
            if edit.span.start_byte < cursor || edit.span.end_byte > source.len() {
                continue;
            }
            result.push_str(&source[cursor..edit.span.start_byte]);
            result.push_str(edit.replacement.symbol());
            cursor = edit.span.end_byte;
        }
        result.push_str(&source[cursor..]);
        result
    }
}

/// Result of running the suite against one mutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub index: usize,
    pub label: String,
    pub line: usize,
    pub caught: bool,
    #[serde(default)]
    pub timed_out: bool,
    pub failures: usize,
    pub errors: usize,
    pub original_code: String,
    pub mutated_code: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}
