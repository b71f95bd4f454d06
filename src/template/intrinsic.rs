//! CloudFormation intrinsic function helpers
//!
//! Handles produced by providers are plain `serde_json::Value`s holding
//! either literals (for caller-supplied infrastructure) or intrinsics such as
//! `{"Ref": ...}` (for resources created in the same template).

use serde_json::{json, Map, Value};

/// `{"Ref": logical_id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": [format, {vars}]}`
///
/// Variables with no entries collapse to the short `{"Fn::Sub": format}` form.
pub fn sub<I, K>(format: &str, vars: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let vars: Map<String, Value> = vars.into_iter().map(|(k, v)| (k.into(), v)).collect();
    if vars.is_empty() {
        json!({ "Fn::Sub": format })
    } else {
        json!({ "Fn::Sub": [format, vars] })
    }
}

/// `{"Fn::Join": [separator, [parts]]}`
pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

/// `{"Fn::Select": [index, list]}`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// `{"Fn::GetAZs": ""}` for the stack's region
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// The `AWS::AccountId` pseudo parameter
pub fn account_id() -> Value {
    reference("AWS::AccountId")
}

/// The `AWS::Partition` pseudo parameter
pub fn partition() -> Value {
    reference("AWS::Partition")
}

/// Dynamic reference into a Secrets Manager JSON secret
///
/// Produces `{{resolve:secretsmanager:<arn>:SecretString:<key>::}}` so that
/// database master credentials never appear in the template.
pub fn resolve_secret(secret_arn: Value, key: &str) -> Value {
    join(
        "",
        vec![
            json!("{{resolve:secretsmanager:"),
            secret_arn,
            json!(format!(":SecretString:{key}::}}}}")),
        ],
    )
}

/// Returns true when the value is an intrinsic function object
pub fn is_intrinsic(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.len() == 1 && obj.keys().all(|k| k == "Ref" || k.starts_with("Fn::")))
        .unwrap_or(false)
}
