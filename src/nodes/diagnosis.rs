//! Diagnosis node: fixed analysis algorithms over a record collection.
//!
//! Consumes the collection resolved as its input (normally via
//! `inputKey`) and writes a structured finding to `outputKey`. Each
//! algorithm is fixed:
//!
//! - `error_detection` counts ERROR/FATAL records and groups by module.
//! - `pattern_analysis` surfaces repeated messages.
//! - `anomaly_detection` flags values beyond mean ± 3σ.
//! - `performance_analysis` partitions by `value > slowThreshold`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::context::ExecutionContext;
use crate::model::NodeSpec;
use crate::node::{Node, NodeError, NodeExecutionResult, ValidationReport};
use crate::types::DiagnosisType;
use crate::utils::value::{opt_f64, opt_str, shape_of};

/// Default slow threshold (ms) for performance analysis.
const DEFAULT_SLOW_THRESHOLD: f64 = 1000.0;
/// How many repeated messages pattern analysis reports.
const TOP_PATTERNS: usize = 10;

pub struct DiagnosisNode {
    node_id: String,
    diagnosis_type: Option<DiagnosisType>,
    raw_type: String,
    output_key: Option<String>,
    slow_threshold: f64,
}

impl DiagnosisNode {
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, NodeError> {
        let raw_type = opt_str(&spec.config, "diagnosisType").unwrap_or_default();
        Ok(Self {
            node_id: spec.id.clone(),
            diagnosis_type: raw_type.parse().ok(),
            raw_type,
            output_key: opt_str(&spec.config, "outputKey"),
            slow_threshold: opt_f64(&spec.config, "slowThreshold")
                .unwrap_or(DEFAULT_SLOW_THRESHOLD),
        })
    }
}

#[async_trait]
impl Node for DiagnosisNode {
    fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if self.diagnosis_type.is_none() {
            report.error(
                "config.diagnosisType",
                if self.raw_type.is_empty() {
                    "diagnosisType is required".to_owned()
                } else {
                    format!("unknown diagnosis type '{}'", self.raw_type)
                },
            );
        }
        if self.output_key.is_none() {
            report.error("config.outputKey", "outputKey is required");
        }
        if self.slow_threshold <= 0.0 {
            report.warning("config.slowThreshold", "non-positive threshold");
        }
        report
    }

    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let diagnosis_type = self.diagnosis_type.ok_or_else(|| NodeError::InvalidConfig {
            message: format!("unknown diagnosis type '{}'", self.raw_type),
        })?;

        if input.is_null() {
            return Err(NodeError::Diagnosis {
                message: "no input".into(),
            });
        }
        let Value::Array(records) = input else {
            return Err(NodeError::Diagnosis {
                message: format!("expected a collection, found {}", shape_of(&input)),
            });
        };

        let finding = match diagnosis_type {
            DiagnosisType::ErrorDetection => error_detection(&records),
            DiagnosisType::PatternAnalysis => pattern_analysis(&records),
            DiagnosisType::AnomalyDetection => anomaly_detection(&records),
            DiagnosisType::PerformanceAnalysis => {
                performance_analysis(&records, self.slow_threshold)
            }
        };

        if let Some(key) = &self.output_key {
            ctx.set(key.clone(), finding.clone());
        }

        Ok(NodeExecutionResult::success(&self.node_id)
            .with_output(finding)
            .with_metadata("records_analyzed", Value::from(records.len() as u64))
            .with_metadata("diagnosis_type", json!(diagnosis_type.to_string())))
    }
}

fn field<'v>(record: &'v Value, key: &str) -> Option<&'v Value> {
    record.as_object().and_then(|o| o.get(key))
}

fn error_detection(records: &[Value]) -> Value {
    let mut items = Vec::new();
    // BTreeMap keeps module grouping deterministic.
    let mut by_module: BTreeMap<String, u64> = BTreeMap::new();
    for record in records {
        let level = field(record, "level")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase();
        if level == "ERROR" || level == "FATAL" {
            let module = field(record, "module")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned();
            *by_module.entry(module).or_insert(0) += 1;
            items.push(record.clone());
        }
    }
    let issue_count = items.len();
    json!({
        "issueCount": issue_count,
        "items": items,
        "byModule": by_module,
        "summary": format!("{issue_count} error record(s) in {} record(s)", records.len()),
    })
}

fn pattern_analysis(records: &[Value]) -> Value {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for record in records {
        let message = field(record, "message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| record.as_str().map(str::to_owned));
        if let Some(message) = message {
            *counts.entry(message).or_insert(0) += 1;
        }
    }
    let mut repeated: Vec<(String, u64)> = counts.into_iter().filter(|(_, n)| *n > 1).collect();
    repeated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    repeated.truncate(TOP_PATTERNS);

    let issue_count = repeated.len();
    let items: Vec<Value> = repeated
        .into_iter()
        .map(|(message, count)| json!({"message": message, "count": count}))
        .collect();
    json!({
        "issueCount": issue_count,
        "items": items,
        "summary": format!("{issue_count} repeated message pattern(s)"),
    })
}

fn anomaly_detection(records: &[Value]) -> Value {
    let values: Vec<(usize, f64)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| field(r, "value").and_then(Value::as_f64).map(|v| (i, v)))
        .collect();

    if values.len() < 2 {
        return json!({
            "issueCount": 0,
            "items": [],
            "summary": "not enough numeric values for anomaly detection",
        });
    }

    let n = values.len() as f64;
    let mean = values.iter().map(|(_, v)| v).sum::<f64>() / n;
    let variance = values.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let items: Vec<Value> = values
        .iter()
        .filter(|(_, v)| std_dev > 0.0 && (v - mean).abs() > 3.0 * std_dev)
        .map(|(i, _)| records[*i].clone())
        .collect();

    let issue_count = items.len();
    json!({
        "issueCount": issue_count,
        "items": items,
        "mean": mean,
        "stdDev": std_dev,
        "summary": format!("{issue_count} value(s) beyond three standard deviations"),
    })
}

fn performance_analysis(records: &[Value], slow_threshold: f64) -> Value {
    let mut slow = Vec::new();
    let mut fast = 0u64;
    for record in records {
        match field(record, "value").and_then(Value::as_f64) {
            Some(v) if v > slow_threshold => slow.push(record.clone()),
            Some(_) => fast += 1,
            None => {}
        }
    }
    let issue_count = slow.len();
    json!({
        "issueCount": issue_count,
        "items": slow,
        "fastCount": fast,
        "slowThresholdMs": slow_threshold,
        "summary": format!("{issue_count} record(s) above {slow_threshold} ms"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;
    use serde_json::json;

    fn node(config: Value) -> DiagnosisNode {
        let spec = NodeSpec::new("diag", "diag", NodeType::Diagnosis)
            .with_config(config.as_object().unwrap().clone());
        DiagnosisNode::from_spec(&spec).unwrap()
    }

    #[tokio::test]
    async fn error_detection_groups_by_module() {
        let node = node(json!({"diagnosisType": "error_detection", "outputKey": "finding"}));
        let ctx = ExecutionContext::new("wf");
        let records = json!([
            {"level": "INFO", "module": "auth"},
            {"level": "ERROR", "module": "auth"},
            {"level": "fatal", "module": "db"},
            {"level": "ERROR", "module": "auth"},
        ]);
        node.execute(records, &ctx).await.unwrap();
        let finding = ctx.get("finding").unwrap();
        assert_eq!(finding["issueCount"], json!(3));
        assert_eq!(finding["byModule"]["auth"], json!(2));
        assert_eq!(finding["byModule"]["db"], json!(1));
    }

    #[tokio::test]
    async fn pattern_analysis_reports_repeats_only() {
        let node = node(json!({"diagnosisType": "pattern_analysis", "outputKey": "f"}));
        let ctx = ExecutionContext::new("wf");
        let records = json!([
            {"message": "timeout"},
            {"message": "timeout"},
            {"message": "once"},
        ]);
        node.execute(records, &ctx).await.unwrap();
        let finding = ctx.get("f").unwrap();
        assert_eq!(finding["issueCount"], json!(1));
        assert_eq!(finding["items"][0]["count"], json!(2));
    }

    #[tokio::test]
    async fn anomaly_detection_flags_extreme_values() {
        let node = node(json!({"diagnosisType": "anomaly_detection", "outputKey": "f"}));
        let ctx = ExecutionContext::new("wf");
        let mut records: Vec<Value> = (0..20).map(|i| json!({"value": 100 + (i % 3)})).collect();
        records.push(json!({"value": 100_000}));
        node.execute(Value::Array(records), &ctx).await.unwrap();
        let finding = ctx.get("f").unwrap();
        assert_eq!(finding["issueCount"], json!(1));
        assert_eq!(finding["items"][0]["value"], json!(100_000));
    }

    #[tokio::test]
    async fn performance_analysis_partitions_on_threshold() {
        let node = node(json!({
            "diagnosisType": "performance_analysis",
            "outputKey": "f",
            "slowThreshold": 200,
        }));
        let ctx = ExecutionContext::new("wf");
        let records = json!([
            {"value": 100}, {"value": 250}, {"value": 300}, {"other": true},
        ]);
        node.execute(records, &ctx).await.unwrap();
        let finding = ctx.get("f").unwrap();
        assert_eq!(finding["issueCount"], json!(2));
        assert_eq!(finding["fastCount"], json!(1));
    }

    #[tokio::test]
    async fn missing_input_is_a_no_input_failure() {
        let node = node(json!({"diagnosisType": "error_detection", "outputKey": "f"}));
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("no input"));
    }

    #[tokio::test]
    async fn non_collection_input_names_the_offending_type() {
        let node = node(json!({"diagnosisType": "error_detection", "outputKey": "f"}));
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(json!({"not": "a list"}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn unknown_diagnosis_type_fails_validation() {
        let node = node(json!({"diagnosisType": "vibes", "outputKey": "f"}));
        assert!(!node.validate().is_valid());
    }
}
