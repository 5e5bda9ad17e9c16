use crate::models::{fold_case, MatchConfig, MatchFieldPair, MatchMode, Record, Value};
use indexmap::IndexMap;
use std::collections::HashMap;

/// 组合键分隔符 (数据中不应出现)
pub const KEY_SEPARATOR: char = '\u{1F}';

/// 按字段对顺序构建组合键; 任一字段缺失返回 None
pub fn composite_key<'p>(
    record: &Record,
    pairs: &'p [MatchFieldPair],
    field_of: impl Fn(&'p MatchFieldPair) -> &'p str,
) -> Option<String> {
    let mut key = String::new();
    for (i, pair) in pairs.iter().enumerate() {
        let part = record.get_ci(field_of(pair)).and_then(Value::key_part)?;
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&part);
    }
    Some(key)
}

/// 客户标识索引键 (字符串忽略大小写)
pub(crate) fn customer_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(fold_case(s)),
        other => other.key_part(),
    }
}

/// 层级树节点: 第 d 层子节点以第 d 个价格字段的值为键
#[derive(Debug, Default)]
pub struct HierarchyNode {
    children: IndexMap<String, HierarchyNode>,
    /// 叶子上的价格项 (目录顺序)
    items: Vec<usize>,
    /// 子树中目录顺序最靠前的价格项
    first: Option<usize>,
}

impl HierarchyNode {
    pub fn child(&self, key: &str) -> Option<&HierarchyNode> {
        self.children.get(key)
    }

    pub fn items(&self) -> &[usize] {
        &self.items
    }

    pub fn first(&self) -> Option<usize> {
        self.first
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn insert(&mut self, path: &[String], item: usize) {
        self.first.get_or_insert(item);
        match path.split_first() {
            None => self.items.push(item),
            Some((head, rest)) => self
                .children
                .entry(head.clone())
                .or_default()
                .insert(rest, item),
        }
    }
}

/// 价格索引: 每次运行构建一次, 之后只读
#[derive(Debug)]
pub struct PriceIndex<'a> {
    catalog: &'a [Record],
    mode: MatchMode,
    flat: HashMap<String, Vec<usize>>,
    tree: HierarchyNode,
    /// 客户标识 -> 带该标识的价格项
    customer: HashMap<String, Vec<usize>>,
    indexed: usize,
    excluded: usize,
}

impl<'a> PriceIndex<'a> {
    /// 构建索引; 从不失败, 缺少键字段的价格项被排除且永远不会匹配
    pub fn build(catalog: &'a [Record], config: &MatchConfig) -> Self {
        let mut index = Self {
            catalog,
            mode: config.mode,
            flat: HashMap::new(),
            tree: HierarchyNode::default(),
            customer: HashMap::new(),
            indexed: 0,
            excluded: 0,
        };

        for (idx, item) in catalog.iter().enumerate() {
            // 客户专属价格只参与客户阶段
            if let Some(cp) = &config.customer_pricing {
                let tagged = item
                    .get_ci(&cp.price_customer_field)
                    .and_then(Value::non_blank)
                    .and_then(customer_key);
                if let Some(key) = tagged {
                    index.customer.entry(key).or_default().push(idx);
                    index.indexed += 1;
                    continue;
                }
            }

            let added = match config.mode {
                MatchMode::Flat => index.add_flat(idx, item, &config.pairs),
                MatchMode::Hierarchical => index.add_hierarchical(idx, item, &config.pairs),
            };
            if added {
                index.indexed += 1;
            } else {
                index.excluded += 1;
            }
        }

        tracing::debug!(
            "Price index built: mode={:?}, catalog={}, indexed={}, excluded={}, customer_ids={}",
            index.mode,
            catalog.len(),
            index.indexed,
            index.excluded,
            index.customer.len()
        );
        index
    }

    fn add_flat(&mut self, idx: usize, item: &Record, pairs: &[MatchFieldPair]) -> bool {
        match composite_key(item, pairs, |p| p.price_field.as_str()) {
            Some(key) => {
                self.flat.entry(key).or_default().push(idx);
                true
            }
            None => false,
        }
    }

    fn add_hierarchical(&mut self, idx: usize, item: &Record, pairs: &[MatchFieldPair]) -> bool {
        let path: Option<Vec<String>> = pairs
            .iter()
            .map(|p| item.get_ci(&p.price_field).and_then(Value::key_part))
            .collect();
        match path {
            Some(path) => {
                self.tree.insert(&path, idx);
                true
            }
            None => false,
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn item(&self, idx: usize) -> &'a Record {
        &self.catalog[idx]
    }

    pub fn items(&self, indexes: &[usize]) -> Vec<&'a Record> {
        indexes.iter().map(|&i| self.item(i)).collect()
    }

    /// 扁平模式查找
    pub fn lookup(&self, key: &str) -> &[usize] {
        self.flat.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tree(&self) -> &HierarchyNode {
        &self.tree
    }

    /// 带同一客户标识的候选价格项
    pub fn customer_candidates(&self, customer_id: &Value) -> &[usize] {
        customer_key(customer_id)
            .and_then(|k| self.customer.get(&k))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_customer_prices(&self) -> bool {
        !self.customer.is_empty()
    }

    pub fn catalog_len(&self) -> usize {
        self.catalog.len()
    }

    pub fn indexed_count(&self) -> usize {
        self.indexed
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CustomerPricingConfig;
    use serde_json::json;

    fn records(values: serde_json::Value) -> Vec<Record> {
        match values {
            serde_json::Value::Array(items) => items.into_iter().map(Record::from_json).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_flat_index_skips_missing_fields() {
        let catalog = records(json!([
            {"product": "A", "region": "EU"},
            {"product": "A"},
            {"product": "A", "region": "EU"},
        ]));
        let config = MatchConfig::flat(vec![MatchFieldPair::same("product"), MatchFieldPair::same("region")]);
        let index = PriceIndex::build(&catalog, &config);
        assert_eq!(index.indexed_count(), 2);
        assert_eq!(index.excluded_count(), 1);
        let key = format!("A{}EU", KEY_SEPARATOR);
        assert_eq!(index.lookup(&key), &[0, 2]);
    }

    #[test]
    fn test_key_order_follows_pairs() {
        let record = Record::from_json(json!({"a": "1", "b": "2"}));
        let ab = [MatchFieldPair::same("a"), MatchFieldPair::same("b")];
        let ba = [MatchFieldPair::same("b"), MatchFieldPair::same("a")];
        let k1 = composite_key(&record, &ab, |p| p.price_field.as_str()).unwrap();
        let k2 = composite_key(&record, &ba, |p| p.price_field.as_str()).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_hierarchy_tracks_first_item() {
        let catalog = records(json!([
            {"l1": "A", "l2": "X"},
            {"l1": "A", "l2": "Y"},
            {"l1": "B", "l2": "X"},
        ]));
        let config = MatchConfig::hierarchical(vec![MatchFieldPair::same("l1"), MatchFieldPair::same("l2")]);
        let index = PriceIndex::build(&catalog, &config);
        let a = index.tree().child("A").unwrap();
        assert_eq!(a.child_count(), 2);
        assert_eq!(a.first(), Some(0));
        assert_eq!(a.child("Y").unwrap().items(), &[1]);
        assert_eq!(index.tree().child("B").unwrap().first(), Some(2));
    }

    #[test]
    fn test_customer_items_kept_out_of_generic_index() {
        let catalog = records(json!([
            {"product": "A", "customer": "ACME"},
            {"product": "A", "customer": ""},
            {"product": "A", "customer": "ÉCOLE"},
        ]));
        let mut config = MatchConfig::flat(vec![MatchFieldPair::same("product")]);
        config.customer_pricing = Some(CustomerPricingConfig {
            price_customer_field: "customer".into(),
            usage_customer_field: "customer".into(),
        });
        let index = PriceIndex::build(&catalog, &config);
        assert_eq!(index.lookup("A"), &[1]);
        assert_eq!(index.customer_candidates(&Value::from("acme")), &[0]);
        assert_eq!(index.customer_candidates(&Value::from("école")), &[2]);
        assert!(index.has_customer_prices());
    }
}
