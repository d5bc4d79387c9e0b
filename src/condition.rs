//! Condition evaluation shared by phases, checklists, and custom gate checks.
//!
//! A condition is one of five kinds. `field_value` conditions compare a dotted
//! path into the work item (or, with an `instance.` prefix, into the workflow
//! instance) against an expected value. The other kinds look up runtime
//! records on the instance by id.
//!
//! Every evaluation yields a `ConditionResult`, pass or fail, so callers can
//! keep a complete audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::{WorkItem, WorkflowInstance};

/// Closed set of comparison operators for field conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    Exists,
    NotExists,
    /// Array field contains every expected value (or, with no expected value, every element is truthy).
    All,
    /// Array field contains some expected value (or some element is truthy).
    /// A scalar field passes when it is one of the expected values.
    Any,
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComparisonOperator::Equals => "equals",
            ComparisonOperator::NotEquals => "not_equals",
            ComparisonOperator::GreaterThan => "greater_than",
            ComparisonOperator::LessThan => "less_than",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::NotContains => "not_contains",
            ComparisonOperator::Exists => "exists",
            ComparisonOperator::NotExists => "not_exists",
            ComparisonOperator::All => "all",
            ComparisonOperator::Any => "any",
        };
        write!(f, "{}", name)
    }
}

/// `field operator value` comparison against a dotted path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub operator: ComparisonOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldCondition {
    pub fn new(field: &str, operator: ComparisonOperator, value: Option<Value>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }
}

fn default_approval_count() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionKind {
    FieldValue(FieldCondition),
    /// The gate's stored result passed or was bypassed.
    QualityGate { gate_id: String },
    /// The runtime checklist is complete.
    Checklist { checklist_id: String },
    /// At least this many minutes have passed since the current phase started.
    TimeElapsed { minimum_minutes: i64 },
    /// The current phase holds at least `count` approvals (for `role`, if given).
    Approval {
        #[serde(default)]
        role: Option<String>,
        #[serde(default = "default_approval_count")]
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    FieldValue,
    QualityGate,
    Checklist,
    TimeElapsed,
    Approval,
}

impl ConditionKind {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            ConditionKind::FieldValue(_) => ConditionType::FieldValue,
            ConditionKind::QualityGate { .. } => ConditionType::QualityGate,
            ConditionKind::Checklist { .. } => ConditionType::Checklist,
            ConditionKind::TimeElapsed { .. } => ConditionType::TimeElapsed,
            ConditionKind::Approval { .. } => ConditionType::Approval,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: ConditionKind,
}

impl Condition {
    pub fn new(id: &str, kind: ConditionKind) -> Self {
        Self {
            id: id.to_string(),
            description: None,
            kind,
        }
    }

    pub fn field(id: &str, field: &str, operator: ComparisonOperator, value: Option<Value>) -> Self {
        Self::new(
            id,
            ConditionKind::FieldValue(FieldCondition::new(field, operator, value)),
        )
    }

    pub fn gate(id: &str, gate_id: &str) -> Self {
        Self::new(
            id,
            ConditionKind::QualityGate {
                gate_id: gate_id.to_string(),
            },
        )
    }

    pub fn checklist(id: &str, checklist_id: &str) -> Self {
        Self::new(
            id,
            ConditionKind::Checklist {
                checklist_id: checklist_id.to_string(),
            },
        )
    }
}

/// Audit record of one condition evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionResult {
    pub condition_id: String,
    pub kind: ConditionType,
    pub passed: bool,
    #[serde(default)]
    pub actual: Option<Value>,
    #[serde(default)]
    pub expected: Option<Value>,
    pub message: String,
    pub evaluated_at: DateTime<Utc>,
}

/// What a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub work_item: &'a WorkItem,
    pub instance: Option<&'a WorkflowInstance>,
    pub now: DateTime<Utc>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        work_item: &'a WorkItem,
        instance: Option<&'a WorkflowInstance>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            work_item,
            instance,
            now,
        }
    }

    /// Resolve a dotted path.
    ///
    /// `instance.<path>` reads the workflow instance; `work_item.<path>` or a bare
    /// path reads the work item. A bare path that misses falls back to
    /// `custom_fields.<path>`.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("instance.") {
            let root = serde_json::to_value(self.instance?).ok()?;
            return lookup_path(&root, rest).cloned();
        }

        let root = serde_json::to_value(self.work_item).ok()?;
        if let Some(rest) = path
            .strip_prefix("work_item.")
            .or_else(|| path.strip_prefix("workItem."))
        {
            return lookup_path(&root, rest).cloned();
        }

        lookup_path(&root, path)
            .or_else(|| {
                root.get("custom_fields")
                    .and_then(|custom| lookup_path(custom, path))
            })
            .cloned()
    }
}

/// Walk a dotted path through objects and (numerically indexed) arrays.
pub fn lookup_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn order(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Apply an operator to a resolved value.
pub fn compare(
    operator: ComparisonOperator,
    actual: Option<&Value>,
    expected: Option<&Value>,
) -> bool {
    let null = Value::Null;
    let present = actual.filter(|v| !v.is_null());

    match operator {
        ComparisonOperator::Equals => {
            values_equal(actual.unwrap_or(&null), expected.unwrap_or(&null))
        }
        ComparisonOperator::NotEquals => {
            !values_equal(actual.unwrap_or(&null), expected.unwrap_or(&null))
        }
        ComparisonOperator::GreaterThan => match (present, expected) {
            (Some(a), Some(e)) => order(a, e) == Some(std::cmp::Ordering::Greater),
            _ => false,
        },
        ComparisonOperator::LessThan => match (present, expected) {
            (Some(a), Some(e)) => order(a, e) == Some(std::cmp::Ordering::Less),
            _ => false,
        },
        ComparisonOperator::Contains => match (present, expected) {
            (Some(a), Some(e)) => contains(a, e),
            _ => false,
        },
        ComparisonOperator::NotContains => match (present, expected) {
            (Some(a), Some(e)) => !contains(a, e),
            (None, _) => true,
            (Some(_), None) => false,
        },
        ComparisonOperator::Exists => present.is_some(),
        ComparisonOperator::NotExists => present.is_none(),
        ComparisonOperator::All => match (present, expected) {
            (Some(Value::Array(items)), Some(Value::Array(wanted))) => wanted
                .iter()
                .all(|w| items.iter().any(|i| values_equal(i, w))),
            (Some(Value::Array(items)), None) => {
                !items.is_empty() && items.iter().all(is_truthy)
            }
            (Some(scalar), Some(Value::Array(wanted))) => {
                !wanted.is_empty() && wanted.iter().all(|w| values_equal(scalar, w))
            }
            _ => false,
        },
        ComparisonOperator::Any => match (present, expected) {
            (Some(Value::Array(items)), Some(Value::Array(wanted))) => wanted
                .iter()
                .any(|w| items.iter().any(|i| values_equal(i, w))),
            (Some(Value::Array(items)), None) => items.iter().any(is_truthy),
            (Some(scalar), Some(Value::Array(wanted))) => {
                wanted.iter().any(|w| values_equal(scalar, w))
            }
            _ => false,
        },
    }
}

/// Evaluate a bare field condition. Returns the pass flag and the resolved value.
pub fn evaluate_field(
    condition: &FieldCondition,
    ctx: &EvaluationContext<'_>,
) -> (bool, Option<Value>) {
    let actual = ctx.resolve(&condition.field);
    let passed = compare(condition.operator, actual.as_ref(), condition.value.as_ref());
    (passed, actual)
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "nothing".to_string(),
        Some(Value::String(s)) => format!("'{}'", s),
        Some(other) => other.to_string(),
    }
}

/// Evaluate one condition and record the outcome.
pub fn evaluate(condition: &Condition, ctx: &EvaluationContext<'_>) -> ConditionResult {
    let (passed, actual, expected, message) = match &condition.kind {
        ConditionKind::FieldValue(field) => {
            let (passed, actual) = evaluate_field(field, ctx);
            let message = if passed {
                format!("Field '{}' {} {}", field.field, field.operator, render(field.value.as_ref()))
            } else {
                format!(
                    "Field '{}' expected {} {}, found {}",
                    field.field,
                    field.operator,
                    render(field.value.as_ref()),
                    render(actual.as_ref())
                )
            };
            (passed, actual, field.value.clone(), message)
        }
        ConditionKind::QualityGate { gate_id } => {
            let expected = Some(json!({ "passed": true }));
            match ctx.instance.and_then(|i| i.gate_result(gate_id)) {
                Some(result) => {
                    let passed = result.is_satisfied();
                    let actual = json!({
                        "passed": result.passed,
                        "score": result.score,
                        "bypassed": result.bypass.is_some(),
                    });
                    let message = match (result.passed, result.bypass.is_some()) {
                        (true, _) => format!("Quality gate '{}' passed ({:.1})", gate_id, result.score),
                        (false, true) => format!("Quality gate '{}' bypassed", gate_id),
                        (false, false) => format!(
                            "Quality gate '{}' failed: score {:.1} of {:.1} required",
                            gate_id, result.score, result.passing_score
                        ),
                    };
                    (passed, Some(actual), expected, message)
                }
                None => (
                    false,
                    None,
                    expected,
                    format!("Quality gate '{}' has not been evaluated", gate_id),
                ),
            }
        }
        ConditionKind::Checklist { checklist_id } => {
            let expected = Some(json!({ "is_complete": true }));
            match ctx.instance.and_then(|i| i.checklist(checklist_id)) {
                Some(checklist) => {
                    let actual = json!({
                        "completed_items": checklist.completed_items,
                        "total_items": checklist.total_items,
                        "is_complete": checklist.is_complete,
                    });
                    let message = if checklist.is_complete {
                        format!("Checklist '{}' is complete", checklist_id)
                    } else {
                        format!(
                            "Checklist '{}' is incomplete ({}/{} items, {}/{} required)",
                            checklist_id,
                            checklist.completed_items,
                            checklist.total_items,
                            checklist.completed_required_items,
                            checklist.required_items
                        )
                    };
                    (checklist.is_complete, Some(actual), expected, message)
                }
                None => (
                    false,
                    None,
                    expected,
                    format!("Checklist '{}' has not been initialized", checklist_id),
                ),
            }
        }
        ConditionKind::TimeElapsed { minimum_minutes } => {
            let expected = Some(json!(minimum_minutes));
            match ctx.instance {
                Some(instance) => {
                    let elapsed = (ctx.now - instance.current_phase_started_at).num_minutes();
                    let passed = elapsed >= *minimum_minutes;
                    let message = if passed {
                        format!("{} minutes elapsed in phase (minimum {})", elapsed, minimum_minutes)
                    } else {
                        format!(
                            "Only {} of {} minutes elapsed in phase",
                            elapsed, minimum_minutes
                        )
                    };
                    (passed, Some(json!(elapsed)), expected, message)
                }
                None => (false, None, expected, "No workflow instance to time".to_string()),
            }
        }
        ConditionKind::Approval { role, count } => {
            let expected = Some(json!(count));
            match ctx.instance {
                Some(instance) => {
                    let found = instance
                        .approvals_for(&instance.current_phase_id, role.as_deref())
                        .count();
                    let passed = found >= *count;
                    let who = role
                        .as_deref()
                        .map(|r| format!(" from role '{}'", r))
                        .unwrap_or_default();
                    let message = if passed {
                        format!("{} approval(s){} recorded", found, who)
                    } else {
                        format!("{} of {} approval(s){} recorded", found, count, who)
                    };
                    (passed, Some(json!(found)), expected, message)
                }
                None => (false, None, expected, "No workflow instance to approve".to_string()),
            }
        }
    };

    ConditionResult {
        condition_id: condition.id.clone(),
        kind: condition.kind.condition_type(),
        passed,
        actual,
        expected,
        message,
        evaluated_at: ctx.now,
    }
}

pub fn evaluate_all(conditions: &[Condition], ctx: &EvaluationContext<'_>) -> Vec<ConditionResult> {
    conditions.iter().map(|c| evaluate(c, ctx)).collect()
}
