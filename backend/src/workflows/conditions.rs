// Trigger conditions - pure predicate evaluation against event payloads.
//
// All conditions on a trigger are ANDed; a trigger with no conditions
// always matches.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "condition_operator", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// Substring test on strings, membership test on arrays
    Contains,
    GreaterThan,
    LessThan,
    /// Value is a list the field must appear in
    In,
    NotIn,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TriggerCondition {
    pub id: Uuid,
    pub trigger_id: Uuid,
    /// Field to evaluate; supports dot notation for nested payload fields
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
    pub sort_order: i32,
}

impl TriggerCondition {
    pub fn new(field: &str, operator: ConditionOperator, value: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id: Uuid::nil(),
            field: field.to_string(),
            operator,
            value,
            sort_order: 0,
        }
    }
}

/// Evaluate all conditions against a payload. Empty slice matches.
pub fn evaluate_all(conditions: &[TriggerCondition], payload: &serde_json::Value) -> bool {
    conditions.iter().all(|c| evaluate(c, payload))
}

/// Evaluate one condition against a payload.
pub fn evaluate(condition: &TriggerCondition, payload: &serde_json::Value) -> bool {
    let field_value = lookup(payload, &condition.field);

    match condition.operator {
        ConditionOperator::Equals => field_value
            .map(|v| v == &condition.value)
            .unwrap_or(false),
        ConditionOperator::NotEquals => field_value
            .map(|v| v != &condition.value)
            .unwrap_or(true),
        ConditionOperator::Contains => match field_value {
            Some(serde_json::Value::String(s)) => condition
                .value
                .as_str()
                .map(|needle| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Some(serde_json::Value::Array(items)) => items.contains(&condition.value),
            _ => false,
        },
        ConditionOperator::GreaterThan => numeric_compare(field_value, &condition.value)
            .map(|(v, c)| v > c)
            .unwrap_or(false),
        ConditionOperator::LessThan => numeric_compare(field_value, &condition.value)
            .map(|(v, c)| v < c)
            .unwrap_or(false),
        ConditionOperator::In => match (field_value, condition.value.as_array()) {
            (Some(v), Some(list)) => list.contains(v),
            _ => false,
        },
        ConditionOperator::NotIn => match (field_value, condition.value.as_array()) {
            (Some(v), Some(list)) => !list.contains(v),
            _ => true,
        },
    }
}

fn numeric_compare<'a>(
    field_value: Option<&'a serde_json::Value>,
    condition_value: &serde_json::Value,
) -> Option<(f64, f64)> {
    Some((field_value?.as_f64()?, condition_value.as_f64()?))
}

/// Walk a dot-separated path into a JSON payload.
fn lookup<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: ConditionOperator, value: serde_json::Value) -> TriggerCondition {
        TriggerCondition::new(field, operator, value)
    }

    #[test]
    fn test_equals_and_not_equals() {
        let payload = json!({"status": "completed"});

        assert!(evaluate(&cond("status", ConditionOperator::Equals, json!("completed")), &payload));
        assert!(!evaluate(&cond("status", ConditionOperator::Equals, json!("cancelled")), &payload));
        assert!(evaluate(&cond("status", ConditionOperator::NotEquals, json!("cancelled")), &payload));
        // missing field: equals fails, not_equals passes
        assert!(!evaluate(&cond("missing", ConditionOperator::Equals, json!("x")), &payload));
        assert!(evaluate(&cond("missing", ConditionOperator::NotEquals, json!("x")), &payload));
    }

    #[test]
    fn test_contains_substring() {
        let payload = json!({"title": "Emergency fence repair"});

        assert!(evaluate(&cond("title", ConditionOperator::Contains, json!("fence")), &payload));
        assert!(evaluate(&cond("title", ConditionOperator::Contains, json!("EMERGENCY")), &payload));
        assert!(!evaluate(&cond("title", ConditionOperator::Contains, json!("deck")), &payload));
    }

    #[test]
    fn test_contains_array_membership() {
        let payload = json!({"tags": ["vip", "net-30"]});

        assert!(evaluate(&cond("tags", ConditionOperator::Contains, json!("vip")), &payload));
        assert!(!evaluate(&cond("tags", ConditionOperator::Contains, json!("cod")), &payload));
    }

    #[test]
    fn test_numeric_comparisons() {
        let payload = json!({"total": 1250.0});

        assert!(evaluate(&cond("total", ConditionOperator::GreaterThan, json!(1000)), &payload));
        assert!(!evaluate(&cond("total", ConditionOperator::GreaterThan, json!(2000)), &payload));
        assert!(evaluate(&cond("total", ConditionOperator::LessThan, json!(2000)), &payload));
        // non-numeric field never compares
        let text = json!({"total": "a lot"});
        assert!(!evaluate(&cond("total", ConditionOperator::GreaterThan, json!(0)), &text));
    }

    #[test]
    fn test_in_and_not_in() {
        let payload = json!({"status": "sent"});

        assert!(evaluate(
            &cond("status", ConditionOperator::In, json!(["sent", "approved"])),
            &payload
        ));
        assert!(!evaluate(
            &cond("status", ConditionOperator::In, json!(["declined"])),
            &payload
        ));
        assert!(evaluate(
            &cond("status", ConditionOperator::NotIn, json!(["declined"])),
            &payload
        ));
        // missing field: in fails, not_in passes
        assert!(!evaluate(&cond("missing", ConditionOperator::In, json!(["x"])), &payload));
        assert!(evaluate(&cond("missing", ConditionOperator::NotIn, json!(["x"])), &payload));
    }

    #[test]
    fn test_dot_path_lookup() {
        let payload = json!({"client": {"tier": "vip"}});

        assert!(evaluate(&cond("client.tier", ConditionOperator::Equals, json!("vip")), &payload));
        assert!(!evaluate(&cond("client.missing", ConditionOperator::Equals, json!("vip")), &payload));
    }

    #[test]
    fn test_zero_conditions_always_match() {
        assert!(evaluate_all(&[], &json!({"anything": true})));
    }

    #[test]
    fn test_conditions_are_anded() {
        let payload = json!({"status": "completed", "total": 500});
        let pass = cond("status", ConditionOperator::Equals, json!("completed"));
        let fail = cond("total", ConditionOperator::GreaterThan, json!(1000));

        assert!(evaluate_all(&[pass.clone()], &payload));
        assert!(!evaluate_all(&[pass, fail], &payload));
    }
}
