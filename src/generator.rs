use std::iter::FusedIterator;

use crate::mutants::{Edit, Granularity, Mutant};
use crate::operators::{Catalog, MutationRule};
use crate::tree::{OpToken, SourceUnit};

/// Lazily produce one mutant per (operator site, matching rule).
///
/// Sites are visited in source order and rules in catalog declaration order,
/// so two generations over the same unit yield the same sequence. The unit
/// is only cloned when a mutant is actually requested.
pub fn generate<'a>(
    unit: &'a SourceUnit,
    catalog: &'a Catalog,
    granularity: Granularity,
) -> Mutants<'a> {
    let sites = unit
        .operator_sites()
        .into_iter()
        .filter(|site| catalog.has_rule(site.kind))
        .collect();
    Mutants {
        unit,
        catalog,
        granularity,
        sites,
        site: 0,
        rule: 0,
        next_index: 0,
    }
}

pub struct Mutants<'a> {
    unit: &'a SourceUnit,
    catalog: &'a Catalog,
    granularity: Granularity,
    sites: Vec<OpToken>,
    site: usize,
    rule: usize,
    next_index: usize,
}

impl Mutants<'_> {
    fn build(&self, site: OpToken, rule: &MutationRule) -> Mutant {
        let mut tree = self.unit.clone();
        let mut edits = Vec::new();
        let granularity = self.granularity;
        tree.for_each_operator_mut(&mut |op| {
            let hit = match granularity {
                Granularity::Single => op.span.start_byte == site.span.start_byte,
                Granularity::All => op.kind == rule.original,
            };
            if hit {
                op.kind = rule.replacement;
                edits.push(Edit {
                    span: op.span,
                    replacement: rule.replacement,
                });
            }
        });
        Mutant {
            index: self.next_index,
            label: rule.label,
            line: site.span.line,
            original: rule.original,
            replacement: rule.replacement,
            tree,
            edits,
        }
    }
}

impl Iterator for Mutants<'_> {
    type Item = Mutant;

    fn next(&mut self) -> Option<Mutant> {
        let catalog = self.catalog;
        while let Some(&site) = self.sites.get(self.site) {
            if let Some(rule) = catalog.rules_for(site.kind).nth(self.rule) {
                let mutant = self.build(site, rule);
                self.rule += 1;
                self.next_index += 1;
                return Some(mutant);
            }
            self.site += 1;
            self.rule = 0;
        }
        None
    }
}

impl FusedIterator for Mutants<'_> {}
