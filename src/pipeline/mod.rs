//! In-process preview pipeline.
//!
//! Applies cleaning, casts, filters, arithmetic and rules to rows that were
//! already fetched, batch by batch, with the same semantics as the SQL
//! compilers. Two modes:
//!
//! - **pipeline**: the caller's explicit ordered steps
//! - **legacy**: clean → cast → filter → arithmetic → condition → count,
//!   built from the request's top-level fields
//!
//! ```
//! use qail_etl::ast::{FilterCondition, FilterOperator, PipelineStep};
//! use qail_etl::pipeline::PipelineExecutor;
//!
//! let mut pipeline = PipelineExecutor::new(vec![
//!     PipelineStep::clean(),
//!     PipelineStep::Filter {
//!         conditions: vec![FilterCondition::new("amount", FilterOperator::Gt, "10")],
//!     },
//! ]);
//! let row = serde_json::json!({"amount": 12}).as_object().cloned().unwrap();
//! assert_eq!(pipeline.apply(vec![row]).unwrap().len(), 1);
//! ```

pub(crate) mod steps;

use serde::Serialize;

use crate::ast::{PipelineStep, TransformSpec};
use crate::engine::Row;
use crate::error::{EtlError, EtlResult};
use crate::transpiler::alias::resolve_alias;
use crate::transpiler::casts::CastRegistry;

use self::steps::Hints;

/// How the step list was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Explicit,
    Legacy,
}

/// One human-readable log line per logical step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub step: String,
    pub detail: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.detail)
    }
}

/// De-duplicated transformation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformLog {
    entries: Vec<LogEntry>,
}

impl TransformLog {
    /// Record an entry unless an identical one exists.
    pub fn record(&mut self, step: impl Into<String>, detail: impl Into<String>) {
        let entry = LogEntry {
            step: step.into(),
            detail: detail.into(),
        };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs a step list over successive batches.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    steps: Vec<PipelineStep>,
    mode: PipelineMode,
    log: TransformLog,
    counted: Option<usize>,
}

impl PipelineExecutor {
    /// Explicit pipeline mode.
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self {
            steps,
            mode: PipelineMode::Explicit,
            log: TransformLog::default(),
            counted: None,
        }
    }

    /// Legacy mode: the fixed sequence over the request's own fields.
    /// Stages without input are skipped; cleaning always runs.
    pub fn legacy(spec: &TransformSpec) -> Self {
        let mut steps = vec![PipelineStep::clean()];
        if !spec.conversions.is_empty() {
            steps.push(PipelineStep::Cast {
                conversions: spec.conversions.clone(),
            });
        }
        if !spec.conditions.is_empty() {
            steps.push(PipelineStep::Filter {
                conditions: spec.conditions.clone(),
            });
        }
        if !spec.operations.is_empty() {
            steps.push(PipelineStep::Arithmetic {
                operations: spec.operations.clone(),
            });
        }
        if !spec.rules.is_empty() {
            steps.push(PipelineStep::Condition {
                rules: spec.rules.clone(),
            });
        }
        if spec.count {
            steps.push(PipelineStep::Count);
        }
        Self {
            mode: PipelineMode::Legacy,
            ..Self::new(steps)
        }
    }

    /// Explicit mode when the request carries a pipeline, legacy otherwise.
    pub fn for_spec(spec: &TransformSpec) -> Self {
        if spec.pipeline.is_empty() {
            Self::legacy(spec)
        } else {
            Self::new(spec.pipeline.clone())
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn log(&self) -> &TransformLog {
        &self.log
    }

    /// Whether a count step runs (the caller must then scan every batch).
    pub fn counts(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, PipelineStep::Count))
    }

    /// Rows that reached the count step so far.
    pub fn count(&self) -> Option<usize> {
        self.counted
    }

    /// Run every step over one batch.
    ///
    /// The first failing step aborts with [`EtlError::PipelineStep`].
    pub fn apply(&mut self, mut rows: Vec<Row>) -> EtlResult<Vec<Row>> {
        let mut hints = Hints::new();
        for (index, step) in self.steps.iter().enumerate() {
            let before = rows.len();
            rows = run_step(step, rows, &mut hints, &mut self.counted)?;
            tracing::debug!(step = step.name(), index, before, after = rows.len(), "pipeline step");
            self.log.record(step.name(), describe(step));
        }
        Ok(rows)
    }
}

fn run_step(step: &PipelineStep, rows: Vec<Row>, hints: &mut Hints, counted: &mut Option<usize>) -> EtlResult<Vec<Row>> {
    match step {
        PipelineStep::Clean {
            trim,
            empty_as_null,
            drop_empty_rows,
        } => Ok(steps::clean(rows, *trim, *empty_as_null, *drop_empty_rows)),
        PipelineStep::Cast { conversions } => {
            let registry = CastRegistry::from_conversions(conversions);
            let casts: Vec<(String, _)> = registry
                .iter()
                .map(|(column, target)| (resolve_alias(column), target))
                .collect();
            for (key, target) in &casts {
                hints.insert(key.clone(), *target);
            }
            rows.into_iter()
                .map(|mut row| -> EtlResult<Row> {
                    for (key, target) in &casts {
                        let cell = row
                            .get_mut(key)
                            .ok_or_else(|| EtlError::step(format!("cast:{}", key), "unknown column"))?;
                        *cell = steps::cast_value(cell, *target)
                            .map_err(|cause| EtlError::step(format!("cast:{}", key), cause))?;
                    }
                    Ok(row)
                })
                .collect()
        }
        PipelineStep::Filter { conditions } => {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                let mut keep = true;
                for condition in conditions {
                    let matched = steps::matches_condition(&row, condition, hints)
                        .map_err(|cause| EtlError::step(format!("filter:{}", condition.column.trim()), cause))?;
                    if !matched {
                        keep = false;
                        break;
                    }
                }
                if keep {
                    kept.push(row);
                }
            }
            Ok(kept)
        }
        PipelineStep::Arithmetic { operations } => rows
            .into_iter()
            .map(|mut row| -> EtlResult<Row> {
                for operation in operations {
                    let column = operation.result_column.trim();
                    let value = steps::evaluate_operation(&row, operation)
                        .map_err(|cause| EtlError::step(format!("arithmetic:{}", column), cause))?;
                    row.insert(column.to_string(), value);
                }
                Ok(row)
            })
            .collect(),
        PipelineStep::Condition { rules } => {
            let mut kept = Vec::with_capacity(rows.len());
            'rows: for mut row in rows {
                for (i, rule) in rules.iter().enumerate() {
                    let outcome = steps::evaluate_rule(&row, rule, hints)
                        .map_err(|cause| EtlError::step(format!("condition:{}", rule_label(rule, i)), cause))?;
                    if let Some((column, value)) = outcome.projection {
                        row.insert(column, value);
                    }
                    if !outcome.keep {
                        continue 'rows;
                    }
                }
                kept.push(row);
            }
            Ok(kept)
        }
        PipelineStep::Count => {
            *counted = Some(counted.unwrap_or(0) + rows.len());
            Ok(rows)
        }
    }
}

fn rule_label(rule: &crate::ast::ConditionRule, index: usize) -> String {
    if !rule.id.trim().is_empty() {
        return rule.id.trim().to_string();
    }
    match rule.result_column.as_deref().map(str::trim) {
        Some(column) if !column.is_empty() => column.to_string(),
        _ => format!("#{}", index + 1),
    }
}

fn describe(step: &PipelineStep) -> String {
    match step {
        PipelineStep::Clean {
            trim,
            empty_as_null,
            drop_empty_rows,
        } => {
            let mut parts = Vec::new();
            if *trim {
                parts.push("trim text");
            }
            if *empty_as_null {
                parts.push("empty text as null");
            }
            if *drop_empty_rows {
                parts.push("drop empty rows");
            }
            if parts.is_empty() {
                "no-op".to_string()
            } else {
                parts.join(", ")
            }
        }
        PipelineStep::Cast { conversions } => CastRegistry::from_conversions(conversions)
            .iter()
            .map(|(column, target)| format!("{} as {}", column, target))
            .collect::<Vec<_>>()
            .join(", "),
        PipelineStep::Filter { conditions } => conditions
            .iter()
            .map(|c| match c.value.as_ref().and_then(crate::ast::values::json_to_text) {
                Some(value) => format!("{} {} {}", c.column.trim(), c.operator, value),
                None => format!("{} {}", c.column.trim(), c.operator),
            })
            .collect::<Vec<_>>()
            .join(" and "),
        PipelineStep::Arithmetic { operations } => operations
            .iter()
            .map(|op| {
                format!(
                    "{} = {} {} {}",
                    op.result_column.trim(),
                    op.left_operand.text(),
                    op.operator,
                    op.right_operand.text()
                )
            })
            .collect::<Vec<_>>()
            .join(", "),
        PipelineStep::Condition { rules } => rules
            .iter()
            .map(|rule| {
                let test = format!(
                    "{} {} {}",
                    rule.left_operand.text(),
                    rule.comparator,
                    rule.right_operand.text()
                );
                match (rule.result_column.as_deref(), rule.should_filter) {
                    (Some(column), true) => format!("{} -> {} (filter)", test, column.trim()),
                    (Some(column), false) => format!("{} -> {}", test, column.trim()),
                    (None, _) => format!("keep where {}", test),
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        PipelineStep::Count => "count rows".to_string(),
    }
}
