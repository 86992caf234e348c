//! perfmetric CLI support
//!
//! Reads JSON metric files (arrays of objects with `MetricName`, `MetricExpr`
//! and optionally `MetricThreshold`), runs every formula through the perfmetric
//! engine and writes the canonical text back. Other fields such as
//! `ScaleUnit` and `MetricGroup` are carried through untouched. Fixups and the event catalog are data passed in by
//! the caller; nothing architecture-specific lives here.

pub mod config;

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use perfmetric::{
    Expr, ExprError, Formula, FormulaSet, PEBS, expand_pebs, parse, rewrite_in_terms_of_others,
    simplify,
};
use serde_json::{Map, Value};
use thiserror::Error;

pub use config::{EventCatalog, FixupTable, Substitution};

pub const NAME_FIELD: &str = "MetricName";
pub const EXPR_FIELD: &str = "MetricExpr";
pub const THRESHOLD_FIELD: &str = "MetricThreshold";

/// Spelling of the retire-latency placeholder in metric files
pub const PEBS_MARKER: &str = "$PEBS";

#[derive(Error, Debug)]
pub enum CliError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: expected a JSON array of metric objects")]
    NotAnArray { path: String },
}

/// How a metric file is processed
#[derive(Debug, Clone, Default)]
pub struct MetricOptions {
    pub fixups: FixupTable,
    pub catalog: Option<EventCatalog>,
    /// Express metrics in terms of each other
    pub rewrite: bool,
}

/// Outcome of processing one metric file
#[derive(Debug, Clone, Default)]
pub struct MetricReport {
    /// Metric objects in input order, `MetricExpr` replaced by canonical text
    pub metrics: Vec<Value>,
    /// Metrics dropped because their formula did not parse, with the reason
    pub skipped: Vec<(String, String)>,
    /// Metrics whose threshold did not parse and was left as written
    pub bad_thresholds: Vec<(String, String)>,
    /// `(metric, event)` pairs naming events missing from the catalog
    pub unknown_events: Vec<(String, String)>,
    /// Metrics rewritten in terms of other metrics
    pub rewritten: Vec<String>,
}

/// Canonicalize every formula of a metric list
pub fn process_metrics(metrics: Vec<Value>, options: &MetricOptions) -> MetricReport {
    let mut report = MetricReport::default();
    let mut set = FormulaSet::new();
    // `None` marks entries passed through untouched
    let mut entries: Vec<(Option<String>, Map<String, Value>)> = Vec::new();

    for metric in metrics {
        let mut object = match metric {
            Value::Object(object) => object,
            other => {
                log::warn!("skipping non-object metric entry: {other}");
                continue;
            }
        };
        let (Some(name), Some(text)) = (
            object.get(NAME_FIELD).and_then(Value::as_str),
            object.get(EXPR_FIELD).and_then(Value::as_str),
        ) else {
            entries.push((None, object));
            continue;
        };
        let name = name.to_string();

        match parse_formula(&name, text, options, &mut set) {
            Ok(()) => {
                if let Err(e) = canonicalize_threshold(&name, &mut object, options) {
                    log::warn!("leaving threshold of `{name}` as written: {e}");
                    report.bad_thresholds.push((name.clone(), e.to_string()));
                }
                entries.push((Some(name), object));
            }
            Err(e) => {
                log::warn!("skipping metric `{name}`: {e}");
                report.skipped.push((name, e.to_string()));
            }
        }
    }

    let mut definitions: IndexMap<String, Expr> =
        set.iter().map(|(name, expr)| (name.to_string(), simplify(expr))).collect();
    if options.rewrite {
        for (name, expr) in rewrite_in_terms_of_others(&set) {
            log::info!("metric `{name}` rewritten as `{expr}`");
            report.rewritten.push(name.clone());
            definitions.insert(name, expr);
        }
    }

    if let Some(catalog) = &options.catalog {
        report.unknown_events = unknown_events(&definitions, catalog);
    }

    for (name, mut object) in entries {
        if let Some(expr) = name.as_ref().and_then(|n| definitions.get(n)) {
            object.insert(EXPR_FIELD.to_string(), Value::String(expr.to_string()));
        }
        report.metrics.push(Value::Object(object));
    }
    report
}

/// Fixups, then parse, then expand `$PEBS`
fn prepare(name: &str, text: &str, options: &MetricOptions) -> Result<Expr, ExprError> {
    let fixed = options.fixups.apply(text);
    if fixed != text {
        log::debug!("fixups changed `{name}`: `{text}` -> `{fixed}`");
    }
    if fixed.contains(PEBS_MARKER) {
        let expr = parse(&fixed.replace(PEBS_MARKER, PEBS))?;
        return Ok(expand_pebs(expr));
    }
    Ok(parse(&fixed)?)
}

fn parse_formula(
    name: &str,
    text: &str,
    options: &MetricOptions,
    set: &mut FormulaSet,
) -> Result<(), ExprError> {
    let expr = prepare(name, text, options)?;
    set.push(Formula::new(name, expr))
}

/// Replace a string `MetricThreshold` with its simplified canonical text
fn canonicalize_threshold(
    name: &str,
    object: &mut Map<String, Value>,
    options: &MetricOptions,
) -> Result<(), ExprError> {
    let Some(text) = object.get(THRESHOLD_FIELD).and_then(Value::as_str) else {
        return Ok(());
    };
    let canonical = simplify(&prepare(name, text, options)?).to_string();
    object.insert(THRESHOLD_FIELD.to_string(), Value::String(canonical));
    Ok(())
}

/// Event names that are neither in the catalog, other metrics nor `#` constants
///
/// Both checks ignore case.
fn unknown_events(
    definitions: &IndexMap<String, Expr>,
    catalog: &EventCatalog,
) -> Vec<(String, String)> {
    let metric_names: HashSet<String> =
        definitions.keys().map(|n| n.to_ascii_lowercase()).collect();
    let mut unknown = Vec::new();
    for (metric, expr) in definitions {
        for event in expr.event_names() {
            if event.starts_with('#')
                || metric_names.contains(&event.to_ascii_lowercase())
                || catalog.contains(event)
            {
                continue;
            }
            log::warn!("metric `{metric}` references unknown event `{event}`");
            unknown.push((metric.clone(), event.to_string()));
        }
    }
    unknown
}

/// Read a metric file, process it and return the report
pub fn process_metric_file(
    path: &Path,
    options: &MetricOptions,
) -> Result<MetricReport, CliError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: display.clone(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: display.clone(),
        source,
    })?;
    let Value::Array(metrics) = value else {
        return Err(CliError::NotAnArray { path: display });
    };
    log::info!("processing {} metric entries from {display}", metrics.len());
    Ok(process_metrics(metrics, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exprs(report: &MetricReport) -> Vec<(String, String)> {
        report
            .metrics
            .iter()
            .filter_map(|m| {
                Some((
                    m.get(NAME_FIELD)?.as_str()?.to_string(),
                    m.get(EXPR_FIELD)?.as_str()?.to_string(),
                ))
            })
            .collect()
    }

    #[test]
    fn canonicalizes_and_preserves_fields() {
        let metrics = vec![json!({
            "BriefDescription": "Instructions per cycle",
            "MetricName": "IPC",
            "MetricExpr": "INST_RETIRED.ANY/CPU_CLK_UNHALTED.THREAD + 0",
            "MetricGroup": "Ret"
        })];
        let report = process_metrics(metrics, &MetricOptions::default());
        assert_eq!(
            exprs(&report),
            vec![("IPC".to_string(), "INST_RETIRED.ANY / CPU_CLK_UNHALTED.THREAD".to_string())]
        );
        let keys: Vec<&String> = report.metrics[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["BriefDescription", "MetricName", "MetricExpr", "MetricGroup"]);
    }

    #[test]
    fn skips_unparseable_metric_and_continues() {
        let metrics = vec![
            json!({"MetricName": "bad", "MetricExpr": "min(a)"}),
            json!({"MetricName": "good", "MetricExpr": "a * 2"}),
        ];
        let report = process_metrics(metrics, &MetricOptions::default());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "bad");
        assert_eq!(exprs(&report), vec![("good".to_string(), "a * 2".to_string())]);
    }

    #[test]
    fn passes_through_entries_without_formula() {
        let metrics = vec![json!({"EventName": "INST_RETIRED.ANY"}), json!(42)];
        let report = process_metrics(metrics, &MetricOptions::default());
        assert_eq!(report.metrics, vec![json!({"EventName": "INST_RETIRED.ANY"})]);
    }

    #[test]
    fn rewrites_in_terms_of_other_metrics() {
        let metrics = vec![
            json!({"MetricName": "A", "MetricExpr": "EVENT.X / EVENT.Y"}),
            json!({"MetricName": "B", "MetricExpr": "(EVENT.X / EVENT.Y) * 100"}),
        ];
        let options = MetricOptions {
            rewrite: true,
            ..Default::default()
        };
        let report = process_metrics(metrics, &options);
        assert_eq!(report.rewritten, vec!["B".to_string()]);
        assert_eq!(
            exprs(&report),
            vec![
                ("A".to_string(), "EVENT.X / EVENT.Y".to_string()),
                ("B".to_string(), "A * 100".to_string())
            ]
        );
    }

    #[test]
    fn applies_fixups_before_parsing() {
        let metrics = vec![json!({
            "MetricName": "slots",
            "MetricExpr": "TOPDOWN.SLOTS:perf_metrics"
        })];
        let options = MetricOptions {
            fixups: FixupTable {
                substitutions: vec![Substitution {
                    from: "TOPDOWN.SLOTS:perf_metrics".into(),
                    to: "4 * CPU_CLK_UNHALTED.THREAD".into(),
                }],
            },
            ..Default::default()
        };
        let report = process_metrics(metrics, &options);
        assert_eq!(
            exprs(&report),
            vec![("slots".to_string(), "4 * CPU_CLK_UNHALTED.THREAD".to_string())]
        );
    }

    #[test]
    fn flags_events_missing_from_catalog() {
        let metrics = vec![
            json!({"MetricName": "A", "MetricExpr": "INST_RETIRED.ANY / CYCLES"}),
            json!({"MetricName": "B", "MetricExpr": "A * #smt_on + UOPS_ISSUED.ANY"}),
        ];
        let options = MetricOptions {
            catalog: Some(
                ["inst_retired.any".to_string(), "cycles".to_string()]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        let report = process_metrics(metrics, &options);
        assert_eq!(
            report.unknown_events,
            vec![("B".to_string(), "UOPS_ISSUED.ANY".to_string())]
        );
    }

    #[test]
    fn metric_references_ignore_case() {
        let metrics = vec![
            json!({"MetricName": "IPC", "MetricExpr": "INST_RETIRED.ANY / CYCLES"}),
            json!({"MetricName": "ipc_pct", "MetricExpr": "ipc * 100"}),
        ];
        let options = MetricOptions {
            catalog: Some(
                ["INST_RETIRED.ANY".to_string(), "CYCLES".to_string()]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        let report = process_metrics(metrics, &options);
        assert!(report.unknown_events.is_empty(), "{:?}", report.unknown_events);
    }

    #[test]
    fn canonicalizes_thresholds() {
        let metrics = vec![
            json!({
                "MetricName": "tma_frontend_bound",
                "MetricExpr": "IDQ_UOPS_NOT_DELIVERED.CORE / SLOTS",
                "MetricThreshold": "tma_frontend_bound > 0.15 & (tma_info_thread_ipc / 4 > 0.35 + 0)",
                "ScaleUnit": "100%"
            }),
            json!({
                "MetricName": "tma_other",
                "MetricExpr": "1 - tma_frontend_bound",
                "MetricThreshold": "tma_other > min(0.1"
            }),
        ];
        let report = process_metrics(metrics, &MetricOptions::default());
        assert_eq!(
            report.metrics[0][THRESHOLD_FIELD],
            json!("tma_frontend_bound > 0.15 & tma_info_thread_ipc / 4 > 0.35")
        );
        assert_eq!(report.metrics[0]["ScaleUnit"], json!("100%"));
        assert_eq!(report.metrics[1][THRESHOLD_FIELD], json!("tma_other > min(0.1"));
        assert_eq!(report.bad_thresholds.len(), 1);
        assert_eq!(report.bad_thresholds[0].0, "tma_other");
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn expands_pebs_placeholder() {
        let metrics = vec![json!({
            "MetricName": "tma_l3_hit_latency",
            "MetricExpr": "MEM_LOAD_RETIRED.L3_HIT * min($PEBS, 24) / CYCLES",
            "MetricThreshold": "MEM_LOAD_RETIRED.L3_HIT * $PEBS > 100"
        })];
        let report = process_metrics(metrics, &MetricOptions::default());
        assert_eq!(
            exprs(&report),
            vec![(
                "tma_l3_hit_latency".to_string(),
                "MEM_LOAD_RETIRED.L3_HIT * min(MEM_LOAD_RETIRED.L3_HIT:R, 24) / CYCLES".to_string()
            )]
        );
        assert_eq!(
            report.metrics[0][THRESHOLD_FIELD],
            json!("MEM_LOAD_RETIRED.L3_HIT * MEM_LOAD_RETIRED.L3_HIT:R > 100")
        );
    }

    #[test]
    fn duplicate_metric_names_keep_first() {
        let metrics = vec![
            json!({"MetricName": "A", "MetricExpr": "x"}),
            json!({"MetricName": "A", "MetricExpr": "y"}),
        ];
        let report = process_metrics(metrics, &MetricOptions::default());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(exprs(&report), vec![("A".to_string(), "x".to_string())]);
    }
}
