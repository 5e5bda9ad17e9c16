use bigdecimal::BigDecimal;
use price_match_rust::formula::{compile, evaluate, EvalContext};
use price_match_rust::models::{
    parse_decimal, CalculationConfig, CustomerPricingConfig, ErrorStrategy, MatchConfig,
    MatchFieldPair, MatchOutcome, NoMatchPolicy, OutputConfig, OutputFieldSpec, RoundingMode,
    COST_AMOUNT_FIELD, SELL_AMOUNT_FIELD,
};
use price_match_rust::service::{match_usage, BatchFailure};
use price_match_rust::{
    run_batch, BatchOptions, BatchOutcome, FormulaCache, PriceIndex, Progress, Record, RunConfig,
};
use serde_json::json;

fn records(values: serde_json::Value) -> Vec<Record> {
    match values {
        serde_json::Value::Array(items) => items.into_iter().map(Record::from_json).collect(),
        other => vec![Record::from_json(other)],
    }
}

fn decimal(s: &str) -> BigDecimal {
    parse_decimal(s).unwrap()
}

fn run(usage: &[Record], catalog: &[Record], config: &RunConfig, options: &BatchOptions) -> BatchOutcome {
    let cache = FormulaCache::new();
    run_batch(usage, catalog, config, options, &cache, &mut |_: &Progress| {}).unwrap()
}

fn amount(outcome: &BatchOutcome, row: usize, field: &str) -> Option<BigDecimal> {
    outcome.outputs[row].fields.get(field).and_then(|v| v.to_decimal())
}

#[test]
fn test_end_to_end_sell_amount() {
    let catalog = records(json!([{"product": "A", "cost": 2, "sell": 5}]));
    let usage = records(json!([{"product": "A", "qty": 3}]));
    let config = RunConfig::new(
        MatchConfig::flat(vec![MatchFieldPair::same("product")]),
        CalculationConfig::new("qty").with_sell("sell"),
        OutputConfig::default(),
    );

    let outcome = run(&usage, &catalog, &config, &BatchOptions::default());
    assert!(outcome.is_complete());
    assert_eq!(outcome.outputs.len(), 1);
    assert_eq!(amount(&outcome, 0, SELL_AMOUNT_FIELD), Some(decimal("15")));
    assert!(outcome.outputs[0].fields.get(COST_AMOUNT_FIELD).is_none());
}

#[test]
fn test_cost_and_sell_with_formula_output() {
    let catalog = records(json!([{"product": "A", "cost": 2, "sell": 5}]));
    let usage = records(json!([{"product": "A", "qty": 3}]));
    let config = RunConfig::new(
        MatchConfig::flat(vec![MatchFieldPair::same("product")]),
        CalculationConfig::new("qty").with_cost("cost").with_sell("sell"),
        OutputConfig::with_fields(vec![
            OutputFieldSpec::usage("product"),
            OutputFieldSpec::calculated("(price.sell - price.cost) * usage", "margin"),
        ]),
    );

    let outcome = run(&usage, &catalog, &config, &BatchOptions::default());
    let names: Vec<_> = outcome.outputs[0].fields.field_names().cloned().collect();
    assert_eq!(names, vec!["product", "margin", COST_AMOUNT_FIELD, SELL_AMOUNT_FIELD]);
    assert_eq!(amount(&outcome, 0, "margin"), Some(decimal("9")));
    assert_eq!(amount(&outcome, 0, COST_AMOUNT_FIELD), Some(decimal("6")));
}

#[test]
fn test_flat_matching_is_deterministic() {
    let catalog = records(json!([
        {"product": "A", "region": "EU", "sell": 1},
        {"product": "A", "region": "US", "sell": 2},
    ]));
    let config = MatchConfig::flat(vec![MatchFieldPair::same("product"), MatchFieldPair::same("region")]);
    let index = PriceIndex::build(&catalog, &config);
    let usage = Record::from_json(json!({"product": "A", "region": "US"}));

    let first = match_usage(&usage, &index, &config);
    for _ in 0..5 {
        assert_eq!(match_usage(&usage, &index, &config), first);
    }
    assert_eq!(first.items, vec![&catalog[1]]);
}

#[test]
fn test_pair_order_does_not_change_match() {
    let catalog = records(json!([{"product": "A", "region": "EU", "sell": 1}]));
    let usage = Record::from_json(json!({"product": "A", "region": "EU"}));

    let forward = MatchConfig::flat(vec![MatchFieldPair::same("product"), MatchFieldPair::same("region")]);
    let reverse = MatchConfig::flat(vec![MatchFieldPair::same("region"), MatchFieldPair::same("product")]);
    for config in [forward, reverse] {
        let index = PriceIndex::build(&catalog, &config);
        assert!(match_usage(&usage, &index, &config).is_matched());
    }
}

#[test]
fn test_hierarchical_round_trip() {
    let catalog = records(json!([{"a": "A", "b": "B", "c": "C", "sell": 1}]));
    let config = MatchConfig::hierarchical(vec![
        MatchFieldPair::same("a"),
        MatchFieldPair::same("b"),
        MatchFieldPair::same("c"),
    ]);
    let index = PriceIndex::build(&catalog, &config);

    let exact = Record::from_json(json!({"a": "A", "b": "B", "c": "C"}));
    assert_eq!(match_usage(&exact, &index, &config).items, vec![&catalog[0]]);

    for differing in [
        json!({"a": "X", "b": "B", "c": "C"}),
        json!({"a": "A", "b": "X", "c": "C"}),
        json!({"a": "A", "b": "B", "c": "X"}),
    ] {
        let result = match_usage(&Record::from_json(differing), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::NoMatch);
    }
}

#[test]
fn test_duplicate_keys_are_ambiguous() {
    let catalog = records(json!([
        {"product": "A", "sell": 1},
        {"product": "A", "sell": 2},
    ]));
    let config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
    let index = PriceIndex::build(&catalog, &config);
    let result = match_usage(&Record::from_json(json!({"product": "A"})), &index, &config);
    assert_eq!(result.outcome, MatchOutcome::Ambiguous);
    assert!(!result.is_matched());
}

#[test]
fn test_customer_price_beats_generic() {
    let catalog = records(json!([
        {"product": "A", "sell": 1},
        {"product": "A", "sell": 9, "customer": "C1"},
    ]));
    let usage = records(json!([{"product": "A", "qty": 2, "customer": "C1"}]));
    let mut matching = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
    matching.customer_pricing = Some(CustomerPricingConfig {
        price_customer_field: "customer".into(),
        usage_customer_field: "customer".into(),
    });
    let config = RunConfig::new(matching, CalculationConfig::new("qty").with_sell("sell"), OutputConfig::default());

    let outcome = run(&usage, &catalog, &config, &BatchOptions::default());
    assert!(outcome.outputs[0].customer_specific);
    assert_eq!(amount(&outcome, 0, SELL_AMOUNT_FIELD), Some(decimal("18")));
}

#[test]
fn test_formula_is_decimal_exact() {
    let expr = compile("usage.quantity * price.unitPrice").unwrap();
    let usage = Record::from_json(json!({"quantity": 5}));
    let price = Record::from_json(json!({"unitPrice": "10.99"}));
    let value = evaluate(&expr, &EvalContext::new(&usage, Some(&price))).unwrap();
    assert_eq!(value.to_decimal(), Some(decimal("54.95")));
    assert_eq!(value.to_string(), "54.95");
}

#[test]
fn test_rounding_directions() {
    let catalog = records(json!([{"product": "A", "sell": "12.345"}]));
    let usage = records(json!([{"product": "A", "qty": 1}]));

    for (rounding, expected) in [
        (RoundingMode::Up { decimal_places: 2 }, "12.35"),
        (RoundingMode::Down { decimal_places: 2 }, "12.34"),
        (RoundingMode::None, "12.345"),
    ] {
        let config = RunConfig::new(
            MatchConfig::flat(vec![MatchFieldPair::same("product")]),
            CalculationConfig::new("qty").with_sell("sell").with_rounding(rounding),
            OutputConfig::default(),
        );
        let outcome = run(&usage, &catalog, &config, &BatchOptions::default());
        assert_eq!(amount(&outcome, 0, SELL_AMOUNT_FIELD), Some(decimal(expected)));
    }
}

fn strategy_fixture() -> (Vec<Record>, Vec<Record>, RunConfig) {
    let catalog = records(json!([{"product": "A", "sell": 1}]));
    let usage = records(json!([
        {"product": "A", "qty": 1},
        {"product": "A", "qty": 2},
        {"product": "missing", "qty": 3},
        {"product": "A", "qty": 4},
        {"product": "A", "qty": 5},
        {"product": "A", "qty": 6},
    ]));
    let mut matching = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
    matching.no_match_policy = NoMatchPolicy::Error;
    let config = RunConfig::new(matching, CalculationConfig::new("qty").with_sell("sell"), OutputConfig::default());
    (usage, catalog, config)
}

#[test]
fn test_skip_batch_continues_after_failed_chunk() {
    let (usage, catalog, config) = strategy_fixture();
    let options = BatchOptions::default()
        .with_chunk_size(2)
        .with_strategy(ErrorStrategy::SkipBatch);
    let outcome = run(&usage, &catalog, &config, &options);

    let indexes: Vec<_> = outcome.outputs.iter().map(|r| r.usage_index).collect();
    assert_eq!(indexes, vec![0, 1, 4, 5]);
    assert!(matches!(outcome.failures.as_slice(), [BatchFailure::Chunk { chunk: 1, .. }]));
    assert!(outcome.aborted.is_none());
}

#[test]
fn test_stop_all_drops_failed_and_later_chunks() {
    let (usage, catalog, config) = strategy_fixture();
    let options = BatchOptions::default()
        .with_chunk_size(2)
        .with_strategy(ErrorStrategy::StopAll);
    let outcome = run(&usage, &catalog, &config, &options);

    let indexes: Vec<_> = outcome.outputs.iter().map(|r| r.usage_index).collect();
    assert_eq!(indexes, vec![0, 1]);
    assert!(outcome.aborted.is_some());
}

#[test]
fn test_invalid_config_rejected_before_processing() {
    let (usage, catalog, mut config) = strategy_fixture();
    config.calculation.quantity_field.clear();
    let cache = FormulaCache::new();
    let mut calls = 0;
    let result = run_batch(
        &usage,
        &catalog,
        &config,
        &BatchOptions::default(),
        &cache,
        &mut |_: &Progress| calls += 1,
    );
    let err = result.unwrap_err();
    assert!(err.is_fatal_input());
    assert_eq!(err.code(), "config_error");
    assert_eq!(calls, 0);
}

#[test]
fn test_run_config_from_json_document() {
    let config: RunConfig = serde_json::from_value(json!({
        "match": {
            "pairs": [{"price_field": "sku", "usage_field": "item"}],
            "no_match_policy": "include"
        },
        "calculation": {
            "quantity_field": "qty",
            "sell_price_field": "sell",
            "rounding": {"direction": "up", "decimal_places": 1}
        },
        "output": {
            "fields": [{"source": "copy_from_usage", "field": "item"}]
        }
    }))
    .unwrap();
    let catalog = records(json!([{"sku": "S1", "sell": "0.333"}]));
    let usage = records(json!([{"item": "S1", "qty": 1}, {"item": "S2", "qty": 1}]));

    let outcome = run(&usage, &catalog, &config, &BatchOptions::default());
    assert_eq!(outcome.outputs.len(), 2);
    assert_eq!(amount(&outcome, 0, SELL_AMOUNT_FIELD), Some(decimal("0.4")));
    assert_eq!(outcome.outputs[1].outcome, MatchOutcome::NoMatch);
    assert!(amount(&outcome, 1, SELL_AMOUNT_FIELD).is_none());
}
