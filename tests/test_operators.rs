use mutcheck::Error;
use mutcheck::operators::{self, Catalog, MutationRule};
use mutcheck::tree::{Family, Operator};

#[test]
fn standard_catalog_has_thirteen_rules() {
    let catalog = Catalog::standard();
    assert_eq!(catalog.len(), 13);
    assert!(!catalog.is_empty());
    assert_eq!(operators::ARITHMETIC_RULES.len(), 7);
    assert_eq!(operators::COMPARISON_RULES.len(), 6);
}

#[test]
fn arithmetic_rules_come_first_in_declaration_order() {
    let labels: Vec<&str> = Catalog::standard().rules().iter().map(|r| r.label).collect();
    assert_eq!(
        labels,
        vec![
            "+ to -", "- to +", "* to /", "/ to *", "// to /", "% to /", "** to *",
            "== to !=", "!= to ==", "< to >", "> to <", "<= to >=", ">= to <=",
        ]
    );
}

#[test]
fn every_rule_stays_in_its_family() {
    for rule in Catalog::standard().rules() {
        assert_eq!(
            rule.original.family(),
            rule.replacement.family(),
            "rule {} crosses families",
            rule.label
        );
        assert_ne!(rule.original, rule.replacement);
    }
}

#[test]
fn rules_for_looks_up_by_original() {
    let catalog = Catalog::standard();
    let add: Vec<&MutationRule> = catalog.rules_for(Operator::Add).collect();
    assert_eq!(add.len(), 1);
    assert_eq!(add[0].replacement, Operator::Sub);

    let lte: Vec<&MutationRule> = catalog.rules_for(Operator::LtE).collect();
    assert_eq!(lte.len(), 1);
    assert_eq!(lte[0].replacement, Operator::GtE);
}

#[test]
fn operators_without_rules_are_skipped() {
    let catalog = Catalog::standard();
    for op in [
        Operator::BitAnd,
        Operator::LShift,
        Operator::Is,
        Operator::NotIn,
    ] {
        assert!(!catalog.has_rule(op), "{op:?} should have no rule");
        assert_eq!(catalog.rules_for(op).count(), 0);
    }
    assert!(catalog.has_rule(Operator::Mod));
    assert!(catalog.has_rule(Operator::NotEq));
}

#[test]
fn standard_catalog_is_shared() {
    assert!(std::ptr::eq(Catalog::standard(), Catalog::standard()));
}

#[test]
fn custom_catalog_keeps_several_rules_per_operator() {
    let catalog = Catalog::new(vec![
        MutationRule {
            original: Operator::Gt,
            replacement: Operator::GtE,
            label: "> to >=",
        },
        MutationRule {
            original: Operator::Gt,
            replacement: Operator::Lt,
            label: "> to <",
        },
    ])
    .unwrap();
    let labels: Vec<&str> = catalog.rules_for(Operator::Gt).map(|r| r.label).collect();
    assert_eq!(labels, vec!["> to >=", "> to <"]);
}

#[test]
fn custom_catalog_rejects_cross_family_rule() {
    let err = Catalog::new(vec![MutationRule {
        original: Operator::Add,
        replacement: Operator::Eq,
        label: "+ to ==",
    }])
    .unwrap_err();
    assert!(matches!(err, Error::Catalog(_)));
}

#[test]
fn operator_symbols_round_trip() {
    for rule in Catalog::standard().rules() {
        assert_eq!(Operator::from_symbol(rule.original.symbol()), Some(rule.original));
    }
    assert_eq!(Operator::from_symbol("<>"), Some(Operator::NotEq));
    assert_eq!(Operator::NotIn.family(), Family::Comparison);
    assert_eq!(Operator::Pow.family(), Family::Arithmetic);
}
