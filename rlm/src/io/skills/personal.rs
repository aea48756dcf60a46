//! Personal-vertical skills.
//!
//! These only record intent: nothing is persisted and no external service is
//! contacted. Each returns a confirmation line the generator can reason over.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::{SkillContext, parse_params};

fn kb_health() -> String {
    "kb_health".to_string()
}

fn kb_finance() -> String {
    "kb_finance".to_string()
}

fn kb_social() -> String {
    "kb_social".to_string()
}

fn kb_email() -> String {
    "kb_email".to_string()
}

fn render_pairs(map: &Map<String, Value>) -> String {
    if map.is_empty() {
        return "no metrics".to_string();
    }
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}: {s}"),
            other => format!("{k}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Deserialize)]
struct TrackHealthParams {
    #[serde(default)]
    metrics: Map<String, Value>,
    #[serde(default = "kb_health")]
    kb_name: String,
}

pub fn track_health(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: TrackHealthParams = parse_params("track_health", params)?;
    Ok(format!(
        "Tracked to {} (stub): {}",
        params.kb_name,
        render_pairs(&params.metrics)
    ))
}

#[derive(Debug, Deserialize)]
struct TrackHealthMetricsParams {
    #[serde(default)]
    metrics: Map<String, Value>,
    timestamp: Option<String>,
    #[serde(default = "kb_health")]
    kb_name: String,
}

pub fn track_health_metrics(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: TrackHealthMetricsParams = parse_params("track_health_metrics", params)?;
    if params.metrics.is_empty() {
        return Ok("[track_health_metrics] No metrics provided; skipped.".to_string());
    }
    info!(
        kb = %params.kb_name,
        count = params.metrics.len(),
        timestamp = params.timestamp.as_deref().unwrap_or(""),
        "health metrics recorded"
    );
    Ok(format!(
        "[track_health_metrics] Logged {} metric(s) to {}",
        params.metrics.len(),
        params.kb_name
    ))
}

#[derive(Debug, Deserialize)]
struct HealthReminderParams {
    #[serde(rename = "type")]
    kind: String,
    frequency: String,
}

pub fn health_reminder(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: HealthReminderParams = parse_params("health_reminder", params)?;
    Ok(format!(
        "[health_reminder] Reminder set: {} ({})",
        params.kind, params.frequency
    ))
}

#[derive(Debug, Deserialize)]
struct ManageFinanceParams {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default = "kb_finance")]
    kb_name: String,
}

fn first_number(data: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| data.get(*key).and_then(Value::as_f64))
}

pub fn manage_finance(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: ManageFinanceParams = parse_params("manage_finance", params)?;
    let keys: Vec<&str> = params.data.keys().map(String::as_str).collect();
    let mut summary = format!(
        "Finance summary for {}: data keys=[{}]",
        params.kb_name,
        keys.join(", ")
    );
    let total = first_number(&params.data, &["total", "budget"]).unwrap_or(0.0);
    let spent = first_number(&params.data, &["spent", "expenses"]).unwrap_or(0.0);
    summary.push_str(&format!(" remainder={:.2} (stub)", total - spent));
    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct TrackTransactionsParams {
    #[serde(default)]
    transactions: Vec<Value>,
}

pub fn track_transactions(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: TrackTransactionsParams = parse_params("track_transactions", params)?;
    Ok(format!(
        "[track_transactions] Logged {} transactions",
        params.transactions.len()
    ))
}

#[derive(Debug, Deserialize)]
struct BudgetAlertParams {
    category: String,
    limit: f64,
}

pub fn budget_alert(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: BudgetAlertParams = parse_params("budget_alert", params)?;
    info!(category = %params.category, limit = params.limit, "budget alert recorded");
    Ok(format!("[budget_alert] Alert set for {}", params.category))
}

#[derive(Debug, Deserialize)]
struct PostSocialParams {
    content: String,
    #[serde(default = "default_platform")]
    platform: String,
    #[serde(default = "kb_social")]
    kb_name: String,
}

fn default_platform() -> String {
    "stub".to_string()
}

pub fn post_social(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: PostSocialParams = parse_params("post_social", params)?;
    Ok(format!(
        "Post logged to {}: platform={} content_len={}. No real post sent.",
        params.kb_name,
        params.platform,
        params.content.chars().count()
    ))
}

#[derive(Debug, Deserialize)]
struct ManageEmailParams {
    #[serde(default = "default_email_action")]
    action: String,
    #[serde(default)]
    content: String,
    #[serde(default = "kb_email")]
    kb_name: String,
}

fn default_email_action() -> String {
    "read".to_string()
}

pub fn manage_email(params: &Map<String, Value>, _ctx: &SkillContext) -> Result<String> {
    let params: ManageEmailParams = parse_params("manage_email", params)?;
    Ok(format!(
        "Email {} stub for {}: content_len={}. No real email accessed or sent.",
        params.action.to_ascii_lowercase(),
        params.kb_name,
        params.content.chars().count()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::skills::{TestOutcome, TestRequest, TestRunner};
    use anyhow::bail;
    use serde_json::json;
    use std::sync::Arc;

    struct NoTests;

    impl TestRunner for NoTests {
        fn run(&self, _request: &TestRequest) -> Result<TestOutcome> {
            bail!("unused")
        }
    }

    fn ctx() -> SkillContext {
        SkillContext::new(".", Arc::new(NoTests))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn track_health_lists_metrics() {
        let out = track_health(&params(json!({"metrics": {"steps": 9000}})), &ctx()).expect("run");
        assert_eq!(out, "Tracked to kb_health (stub): steps: 9000");
    }

    #[test]
    fn health_metrics_skip_when_empty() {
        let out = track_health_metrics(&params(json!({})), &ctx()).expect("run");
        assert!(out.contains("skipped"));
    }

    #[test]
    fn finance_computes_remainder() {
        let out = manage_finance(
            &params(json!({"data": {"budget": 100, "spent": 42.5}})),
            &ctx(),
        )
        .expect("run");
        assert!(out.contains("remainder=57.50"));
    }

    #[test]
    fn transactions_and_alerts_confirm() {
        let out = track_transactions(
            &params(json!({"transactions": [{"amount": 1}, {"amount": 2}]})),
            &ctx(),
        )
        .expect("run");
        assert_eq!(out, "[track_transactions] Logged 2 transactions");

        let out = budget_alert(
            &params(json!({"category": "food", "limit": 300})),
            &ctx(),
        )
        .expect("run");
        assert_eq!(out, "[budget_alert] Alert set for food");
    }

    #[test]
    fn budget_alert_requires_limit() {
        assert!(budget_alert(&params(json!({"category": "food"})), &ctx()).is_err());
    }

    #[test]
    fn social_and_email_never_send() {
        let out = post_social(&params(json!({"content": "hi"})), &ctx()).expect("run");
        assert!(out.contains("No real post sent"));
        let out = manage_email(&params(json!({"action": "SEND"})), &ctx()).expect("run");
        assert!(out.starts_with("Email send stub"));
    }
}
