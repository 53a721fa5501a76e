//! Field statistics over a bulk file
//!
//! Reports, for every top-level key, how many records carry it and which JSON types
//! its values take. Useful to check an export's shape before writing a mapper.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncBufRead;

use super::scanner::{parse_record, ElementScanner};
use super::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldStats {
    /// Records in which the key appears
    pub present: u64,
    pub types: BTreeSet<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub records: u64,
    pub malformed: u64,
    pub fields: BTreeMap<String, FieldStats>,
}

impl SchemaReport {
    /// Keys present in every analyzed record
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, stats)| self.records > 0 && stats.present == self.records)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaAnalyzer {
    limit: Option<u64>,
}

impl SchemaAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `limit` well-formed records
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub async fn analyze_file(&self, path: &Path) -> Result<SchemaReport> {
        let scanner = ElementScanner::open(path).await?;
        self.analyze(scanner).await
    }

    pub async fn analyze<R: AsyncBufRead + Unpin>(
        &self,
        mut scanner: ElementScanner<R>,
    ) -> Result<SchemaReport> {
        let mut report = SchemaReport::default();

        while let Some(element) = scanner.next_element().await? {
            if self.limit.is_some_and(|limit| report.records >= limit) {
                break;
            }

            let Ok(Value::Object(map)) = parse_record(&element) else {
                report.malformed += 1;
                continue;
            };

            report.records += 1;
            for (key, value) in map {
                let stats = report.fields.entry(key).or_default();
                stats.present += 1;
                stats.types.insert(json_type(&value));
            }
        }

        Ok(report)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_analyze_collects_field_types() {
        let input = r#"[
            {"id": "a", "cmc": 3, "power": "2", "colors": ["G"]},
            {"id": "b", "cmc": 1.5, "power": null},
            oops
        ]"#;

        let report = SchemaAnalyzer::new()
            .analyze(ElementScanner::new(input.as_bytes()))
            .await
            .unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.fields["id"].present, 2);
        assert_eq!(report.fields["colors"].present, 1);
        assert_eq!(
            report.fields["cmc"].types,
            BTreeSet::from(["integer", "number"])
        );
        assert_eq!(report.fields["power"].types, BTreeSet::from(["null", "string"]));
        assert_eq!(report.required_fields(), vec!["cmc", "id", "power"]);
    }

    #[tokio::test]
    async fn test_analyze_respects_limit() {
        let input = r#"[{"a":1},{"a":2},{"b":3}]"#;
        let report = SchemaAnalyzer::new()
            .with_limit(2)
            .analyze(ElementScanner::new(input.as_bytes()))
            .await
            .unwrap();

        assert_eq!(report.records, 2);
        assert!(!report.fields.contains_key("b"));
    }
}
