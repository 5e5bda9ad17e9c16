use super::index::{composite_key, PriceIndex};
use crate::models::{
    Diagnostics, MatchAttempt, MatchConfig, MatchMode, MatchResult, PartialMatchPolicy, Record,
    Value,
};

/// 匹配服务: 扁平 / 层级两种模式 + 可选客户专属定价阶段
pub struct Matcher<'i, 'a> {
    index: &'i PriceIndex<'a>,
    config: &'i MatchConfig,
}

impl<'i, 'a> Matcher<'i, 'a> {
    pub fn new(index: &'i PriceIndex<'a>, config: &'i MatchConfig) -> Self {
        Self { index, config }
    }

    /// 匹配单条用量记录; 挂载诊断时记录本次尝试
    pub fn match_record(
        &self,
        usage_index: usize,
        usage: &Record,
        diagnostics: Option<&mut Diagnostics>,
    ) -> MatchResult<'a> {
        let result = self.resolve(usage);

        if let Some(diag) = diagnostics {
            diag.record_match(MatchAttempt {
                usage_index,
                usage: usage.clone(),
                fields_tried: self.fields_tried(usage),
                matched_item: result.first().filter(|_| result.is_matched()).cloned(),
                success: result.is_matched(),
                reason: result
                    .reason
                    .clone()
                    .unwrap_or_else(|| result.outcome.to_string()),
            });
        }

        result
    }

    fn resolve(&self, usage: &Record) -> MatchResult<'a> {
        if let Some(result) = self.match_customer(usage) {
            return result;
        }
        match self.config.mode {
            MatchMode::Flat => self.match_flat(usage),
            MatchMode::Hierarchical => self.match_hierarchical(usage),
        }
    }

    fn fields_tried(&self, usage: &Record) -> Vec<(String, Value)> {
        let mut fields: Vec<(String, Value)> = self
            .config
            .pairs
            .iter()
            .map(|p| {
                let value = usage.get_ci(&p.usage_field).cloned().unwrap_or_default();
                (p.usage_field.clone(), value)
            })
            .collect();
        if let Some(cp) = &self.config.customer_pricing {
            let value = usage.get_ci(&cp.usage_customer_field).cloned().unwrap_or_default();
            fields.push((cp.usage_customer_field.clone(), value));
        }
        fields
    }

    /// 客户阶段: 0 条返回 None 交给通用阶段
    fn match_customer(&self, usage: &Record) -> Option<MatchResult<'a>> {
        let cp = self.config.customer_pricing.as_ref()?;
        let customer_id = usage.get_ci(&cp.usage_customer_field).and_then(Value::non_blank)?;

        let candidates: Vec<&'a Record> = self
            .index
            .customer_candidates(customer_id)
            .iter()
            .map(|&i| self.index.item(i))
            .filter(|item| {
                item.get_ci(&cp.price_customer_field)
                    .is_some_and(|v| v.loosely_equals(customer_id))
                    && self.config.pairs.iter().all(|p| {
                        match (item.get_ci(&p.price_field), usage.get_ci(&p.usage_field)) {
                            (Some(pv), Some(uv)) => !pv.is_null() && pv.loosely_equals(uv),
                            _ => false,
                        }
                    })
            })
            .collect();

        match candidates.len() {
            0 => None,
            1 => Some(
                MatchResult::customer(candidates[0])
                    .with_reason(format!("customer-specific price for '{}'", customer_id)),
            ),
            n => Some(MatchResult::customer_ambiguous(
                candidates,
                format!("{} customer-specific prices for '{}'", n, customer_id),
            )),
        }
    }

    fn match_flat(&self, usage: &Record) -> MatchResult<'a> {
        let Some(key) = composite_key(usage, &self.config.pairs, |p| p.usage_field.as_str()) else {
            return MatchResult::no_match("usage record is missing a match field");
        };

        let hits = self.index.lookup(&key);
        match hits.len() {
            0 => MatchResult::no_match(format!("no price for key {}", display_key(&key))),
            1 => MatchResult::matched(self.index.items(hits)),
            // 数据存在但不唯一: 不得静默取第一条
            n if !self.config.multi_match_allowed => MatchResult::ambiguous(
                self.index.items(hits),
                format!("{} prices share key {}", n, display_key(&key)),
            ),
            _ => MatchResult::matched(self.index.items(hits)),
        }
    }

    fn match_hierarchical(&self, usage: &Record) -> MatchResult<'a> {
        let wildcard = self.config.wildcard_value();
        let levels = self.config.pairs.len();
        let mut node = self.index.tree();

        for (depth, pair) in self.config.pairs.iter().enumerate() {
            let value = usage.get_ci(&pair.usage_field).and_then(Value::key_part);
            let next = value
                .as_deref()
                .and_then(|v| node.child(v))
                .or_else(|| wildcard.and_then(|w| node.child(w)));

            if let Some(child) = next {
                node = child;
                continue;
            }

            let shown = value.unwrap_or_else(|| "<missing>".to_string());
            let failure = format!(
                "no price at level {} ({} = {})",
                depth + 1,
                pair.usage_field,
                shown
            );
            if self.config.partial_match_policy == PartialMatchPolicy::NoMatch || depth == 0 {
                return MatchResult::no_match(failure);
            }
            return match node.first() {
                Some(first) => MatchResult::matched(vec![self.index.item(first)]).with_reason(format!(
                    "partial match: {} of {} levels matched; {}",
                    depth, levels, failure
                )),
                None => MatchResult::no_match(failure),
            };
        }

        match node.items() {
            [] => MatchResult::no_match("empty hierarchy leaf"),
            items if self.config.multi_match_allowed => MatchResult::matched(self.index.items(items)),
            // 目录顺序决定并列
            [first, ..] => MatchResult::matched(vec![self.index.item(*first)]),
        }
    }
}

fn display_key(key: &str) -> String {
    format!("[{}]", key.replace(super::index::KEY_SEPARATOR, ", "))
}

/// 便捷入口: 单条匹配
pub fn match_usage<'a>(usage: &Record, index: &PriceIndex<'a>, config: &MatchConfig) -> MatchResult<'a> {
    Matcher::new(index, config).match_record(0, usage, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerPricingConfig, MatchFieldPair, MatchOutcome, WildcardConfig};
    use serde_json::json;

    fn records(values: serde_json::Value) -> Vec<Record> {
        match values {
            serde_json::Value::Array(items) => items.into_iter().map(Record::from_json).collect(),
            _ => vec![],
        }
    }

    fn usage(value: serde_json::Value) -> Record {
        Record::from_json(value)
    }

    fn hierarchy_config() -> MatchConfig {
        MatchConfig::hierarchical(vec![
            MatchFieldPair::same("l1"),
            MatchFieldPair::same("l2"),
            MatchFieldPair::same("l3"),
        ])
    }

    #[test]
    fn test_flat_match_is_deterministic() {
        let catalog = records(json!([
            {"product": "A", "sell": 5},
            {"product": "B", "sell": 7},
        ]));
        let config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
        let index = PriceIndex::build(&catalog, &config);
        let u = usage(json!({"product": "B"}));
        let first = match_usage(&u, &index, &config);
        let second = match_usage(&u, &index, &config);
        assert_eq!(first, second);
        assert_eq!(first.outcome, MatchOutcome::Matched);
        assert_eq!(first.items, vec![&catalog[1]]);
    }

    #[test]
    fn test_case_insensitive_field_names() {
        let catalog = records(json!([{"Product": "A"}]));
        let config = MatchConfig::flat(vec![MatchFieldPair::new("product", "PRODUCT")]);
        let index = PriceIndex::build(&catalog, &config);
        assert!(match_usage(&usage(json!({"product": "A"})), &index, &config).is_matched());
    }

    #[test]
    fn test_pair_order_does_not_change_outcome() {
        let catalog = records(json!([{"a": "1", "b": "2"}]));
        let u = usage(json!({"a": "1", "b": "2"}));
        let ab = MatchConfig::flat(vec![MatchFieldPair::same("a"), MatchFieldPair::same("b")]);
        let ba = MatchConfig::flat(vec![MatchFieldPair::same("b"), MatchFieldPair::same("a")]);
        let idx_ab = PriceIndex::build(&catalog, &ab);
        let idx_ba = PriceIndex::build(&catalog, &ba);
        assert!(match_usage(&u, &idx_ab, &ab).is_matched());
        assert!(match_usage(&u, &idx_ba, &ba).is_matched());
    }

    #[test]
    fn test_duplicate_keys_are_ambiguous() {
        let catalog = records(json!([
            {"product": "A", "sell": 5},
            {"product": "A", "sell": 6},
        ]));
        let mut config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
        let index = PriceIndex::build(&catalog, &config);
        let u = usage(json!({"product": "A"}));

        let result = match_usage(&u, &index, &config);
        assert_eq!(result.outcome, MatchOutcome::Ambiguous);
        assert_eq!(result.items.len(), 2);

        config.multi_match_allowed = true;
        let result = match_usage(&u, &index, &config);
        assert_eq!(result.outcome, MatchOutcome::Matched);
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_missing_usage_field_is_no_match() {
        let catalog = records(json!([{"product": "A"}]));
        let config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
        let index = PriceIndex::build(&catalog, &config);
        let result = match_usage(&usage(json!({"qty": 1})), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::NoMatch);
        assert!(result.items.is_empty());
    }

    #[test]
    fn test_hierarchy_round_trip() {
        let catalog = records(json!([{"l1": "A", "l2": "B", "l3": "C"}]));
        let config = hierarchy_config();
        let index = PriceIndex::build(&catalog, &config);

        let hit = match_usage(&usage(json!({"l1": "A", "l2": "B", "l3": "C"})), &index, &config);
        assert!(hit.is_matched());
        assert_eq!(hit.reason, None);

        for miss in [
            json!({"l1": "X", "l2": "B", "l3": "C"}),
            json!({"l1": "A", "l2": "X", "l3": "C"}),
            json!({"l1": "A", "l2": "B", "l3": "X"}),
        ] {
            let result = match_usage(&usage(miss), &index, &config);
            assert_eq!(result.outcome, MatchOutcome::NoMatch);
        }
    }

    #[test]
    fn test_hierarchy_is_case_sensitive_on_values() {
        let catalog = records(json!([{"l1": "A", "l2": "B", "l3": "C"}]));
        let config = hierarchy_config();
        let index = PriceIndex::build(&catalog, &config);
        let result = match_usage(&usage(json!({"l1": "a", "l2": "B", "l3": "C"})), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_hierarchy_wildcard_fallback() {
        let catalog = records(json!([
            {"l1": "A", "l2": "*", "l3": "C", "rate": 1},
            {"l1": "A", "l2": "B", "l3": "C", "rate": 2},
        ]));
        let mut config = hierarchy_config();
        config.wildcard = Some(WildcardConfig::default());
        let index = PriceIndex::build(&catalog, &config);

        let exact = match_usage(&usage(json!({"l1": "A", "l2": "B", "l3": "C"})), &index, &config);
        assert_eq!(exact.items, vec![&catalog[1]]);

        let wild = match_usage(&usage(json!({"l1": "A", "l2": "Z", "l3": "C"})), &index, &config);
        assert_eq!(wild.items, vec![&catalog[0]]);
    }

    #[test]
    fn test_hierarchy_best_match_returns_partial() {
        let catalog = records(json!([
            {"l1": "A", "l2": "B", "l3": "C", "rate": 1},
            {"l1": "A", "l2": "B", "l3": "D", "rate": 2},
        ]));
        let mut config = hierarchy_config();
        config.partial_match_policy = PartialMatchPolicy::BestMatch;
        let index = PriceIndex::build(&catalog, &config);

        let result = match_usage(&usage(json!({"l1": "A", "l2": "B", "l3": "Z"})), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::Matched);
        assert_eq!(result.items, vec![&catalog[0]]);
        assert!(result.reason.unwrap().starts_with("partial match: 2 of 3"));

        let none = match_usage(&usage(json!({"l1": "Q", "l2": "B", "l3": "C"})), &index, &config);
        assert_eq!(none.outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_hierarchy_leaf_tie_breaks_by_catalog_order() {
        let catalog = records(json!([
            {"l1": "A", "l2": "B", "l3": "C", "rate": 1},
            {"l1": "A", "l2": "B", "l3": "C", "rate": 2},
        ]));
        let config = hierarchy_config();
        let index = PriceIndex::build(&catalog, &config);
        let result = match_usage(&usage(json!({"l1": "A", "l2": "B", "l3": "C"})), &index, &config);
        assert_eq!(result.items, vec![&catalog[0]]);
    }

    fn customer_config() -> MatchConfig {
        let mut config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
        config.customer_pricing = Some(CustomerPricingConfig {
            price_customer_field: "customer_id".into(),
            usage_customer_field: "customer".into(),
        });
        config
    }

    #[test]
    fn test_customer_price_takes_priority() {
        let catalog = records(json!([
            {"product": "A", "sell": 1},
            {"product": "a", "sell": 9, "customer_id": "ACME"},
        ]));
        let config = customer_config();
        let index = PriceIndex::build(&catalog, &config);

        let result = match_usage(&usage(json!({"product": "A", "customer": "acme"})), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::Matched);
        assert!(result.customer_specific);
        assert_eq!(result.items, vec![&catalog[1]]);

        let generic = match_usage(&usage(json!({"product": "A", "customer": "other"})), &index, &config);
        assert!(!generic.customer_specific);
        assert_eq!(generic.items, vec![&catalog[0]]);
    }

    #[test]
    fn test_customer_duplicates_are_customer_ambiguous() {
        let catalog = records(json!([
            {"product": "A", "sell": 2, "customer_id": "ACME"},
            {"product": "A", "sell": 3, "customer_id": "acme"},
            {"product": "A", "sell": 1},
        ]));
        let config = customer_config();
        let index = PriceIndex::build(&catalog, &config);
        let result = match_usage(&usage(json!({"product": "A", "customer": "Acme"})), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::CustomerAmbiguous);
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_generic_phase_ignores_customer_prices() {
        let catalog = records(json!([{"product": "A", "sell": 2, "customer_id": "ACME"}]));
        let config = customer_config();
        let index = PriceIndex::build(&catalog, &config);
        let result = match_usage(&usage(json!({"product": "A"})), &index, &config);
        assert_eq!(result.outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_diagnostics_record_attempts() {
        let catalog = records(json!([{"product": "A"}]));
        let config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
        let index = PriceIndex::build(&catalog, &config);
        let matcher = Matcher::new(&index, &config);
        let mut diag = Diagnostics::new();
        matcher.match_record(0, &usage(json!({"product": "A"})), Some(&mut diag));
        matcher.match_record(1, &usage(json!({"product": "Z"})), Some(&mut diag));
        assert_eq!(diag.match_attempts.len(), 2);
        assert!(diag.match_attempts[0].success);
        assert!(diag.match_attempts[0].matched_item.is_some());
        assert!(!diag.match_attempts[1].success);
        assert_eq!(diag.match_attempts[1].fields_tried[0].1, Value::from("Z"));
    }
}
