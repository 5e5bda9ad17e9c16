use crate::models::{CalculatedRecord, Value};
use indexmap::IndexSet;

/// 固定列
const META_COLUMNS: [&str; 2] = ["usage_index", "match_outcome"];

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => v.to_string(),
    }
}

/// 导出计算结果为 CSV: 固定列 + 全部输出字段 (按首次出现顺序), 缺失字段留空
pub fn export_to_csv(outputs: &[CalculatedRecord]) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    use csv::Writer;

    let columns: IndexSet<&str> = outputs
        .iter()
        .flat_map(|record| record.fields.field_names())
        .map(String::as_str)
        .collect();

    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(META_COLUMNS.iter().copied().chain(columns.iter().copied()))?;

    for record in outputs {
        let mut row = vec![record.usage_index.to_string(), record.outcome.to_string()];
        row.extend(columns.iter().map(|name| cell(record.fields.get(name))));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}
