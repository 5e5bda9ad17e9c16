use super::decimal::{canonical, parse_decimal};
use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 大小写折叠 (逐字符 Unicode 小写); 字段名与客户标识共用同一规则
pub fn fold_case(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).collect()
}

/// 记录字段值 (价格目录与用量数据共用)
///
/// 数字统一为 `BigDecimal`, 反序列化时即完成转换, 核心内部不出现二进制浮点。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(BigDecimal),
    String(String),
    Array(Vec<Value>),
    Object(Record),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// 数值视图: 数字直接返回, 数字字符串解析 (CSV 来源常见)
    pub fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Number(n) => Some(n.clone()),
            Value::String(s) => parse_decimal(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// 组合键片段; null 视为缺失
    pub fn key_part(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(canonical(n).to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(serde_json::Value::from(other.clone()).to_string()),
        }
    }

    /// 客户定价比较: 字符串忽略大小写, 其余严格相等
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => fold_case(a) == fold_case(b),
            (a, b) => a == b,
        }
    }

    /// 非空客户标识 (空白字符串视为未设置)
    pub fn non_blank(&self) -> Option<&Value> {
        match self {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            v => Some(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", canonical(n)),
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", serde_json::Value::from(other.clone())),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<BigDecimal> for Value {
    fn from(n: BigDecimal) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(BigDecimal::from(n))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            // to_string 即原始数字文本; 指数超限时保留原文, 作为非数字处理
            serde_json::Value::Number(n) => {
                let text = n.to_string();
                match parse_decimal(&text) {
                    Some(d) => Value::Number(d),
                    None => Value::String(text),
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(Record::from(map)),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => decimal_to_json(&n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(record) => serde_json::Value::Object(
                record
                    .fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

fn decimal_to_json(n: &BigDecimal) -> serde_json::Value {
    let text = canonical(n).to_string();
    serde_json::Number::from_str(&text)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::String(text))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// 有序记录: 字段名 -> 值 (PriceItem / UsageItem 结构相同)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// 精确字段名查找
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// 忽略大小写的字段查找: 先精确命中, 再按 `fold_case` 扫描
    pub fn get_ci(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            let wanted = fold_case(name);
            self.fields
                .iter()
                .find(|(k, _)| fold_case(k) == wanted)
                .map(|(_, v)| v)
        })
    }

    /// 嵌套路径查找 (每段忽略大小写)
    pub fn get_path_ci(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.get_ci(first)?;
        for segment in rest {
            match current {
                Value::Object(record) => current = record.get_ci(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Record {
    /// 从 JSON 对象构建 (非对象返回空记录)
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => Record::from(map),
            _ => Record::new(),
        }
    }
}
