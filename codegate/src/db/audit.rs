//! Audit-log entities and their persistence. Appends are best-effort: the
//! response pipeline spawns them and never waits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTrigger {
    Secret,
    Pii,
    MaliciousPackage,
    DeprecatedPackage,
    ArchivedPackage,
    Policy,
}

impl AlertTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTrigger::Secret => "secret",
            AlertTrigger::Pii => "pii",
            AlertTrigger::MaliciousPackage => "malicious_package",
            AlertTrigger::DeprecatedPackage => "deprecated_package",
            AlertTrigger::ArchivedPackage => "archived_package",
            AlertTrigger::Policy => "policy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "secret" => Some(AlertTrigger::Secret),
            "pii" => Some(AlertTrigger::Pii),
            "malicious_package" => Some(AlertTrigger::MaliciousPackage),
            "deprecated_package" => Some(AlertTrigger::DeprecatedPackage),
            "archived_package" => Some(AlertTrigger::ArchivedPackage),
            "policy" => Some(AlertTrigger::Policy),
            _ => None,
        }
    }
}

/// At least one of `code_snippet` and `trigger_string` is always present;
/// the constructors enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub prompt_id: String,
    pub code_snippet: Option<String>,
    pub trigger_string: Option<String>,
    pub trigger_type: AlertTrigger,
    pub trigger_category: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertRecord {
    pub fn for_trigger_string(
        prompt_id: &str,
        trigger_type: AlertTrigger,
        trigger_string: String,
        trigger_category: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_owned(),
            code_snippet: None,
            trigger_string: Some(trigger_string),
            trigger_type,
            trigger_category,
            timestamp: Utc::now(),
        }
    }

    pub fn for_code_snippet(
        prompt_id: &str,
        trigger_type: AlertTrigger,
        code_snippet: String,
        trigger_category: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_owned(),
            code_snippet: Some(code_snippet),
            trigger_string: None,
            trigger_type,
            trigger_category,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub workspace_id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub request: serde_json::Value,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub prompt_id: String,
    pub timestamp: DateTime<Utc>,
    pub output: serde_json::Value,
}

pub async fn insert_prompt(pool: &SqlitePool, record: &PromptRecord) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO prompts (id, workspace_id, timestamp, provider, request, type) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.workspace_id)
    .bind(record.timestamp.to_rfc3339())
    .bind(&record.provider)
    .bind(record.request.to_string())
    .bind(&record.kind)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_output(pool: &SqlitePool, record: &OutputRecord) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO outputs (id, prompt_id, timestamp, output) VALUES (?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.prompt_id)
    .bind(record.timestamp.to_rfc3339())
    .bind(record.output.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_alert(pool: &SqlitePool, record: &AlertRecord) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO alerts (id, prompt_id, code_snippet, trigger_string, trigger_type, \
         trigger_category, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.prompt_id)
    .bind(&record.code_snippet)
    .bind(&record.trigger_string)
    .bind(record.trigger_type.as_str())
    .bind(&record.trigger_category)
    .bind(record.timestamp.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| DbError::BadRow(format!("bad timestamp `{}`: {}", raw, err)))
}

pub async fn list_prompts(pool: &SqlitePool, limit: i64) -> Result<Vec<PromptRecord>, DbError> {
    let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
        "SELECT id, workspace_id, timestamp, provider, request, type \
         FROM prompts ORDER BY timestamp DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(id, workspace_id, timestamp, provider, request, kind)| {
            Ok(PromptRecord {
                id,
                workspace_id,
                timestamp: parse_timestamp(&timestamp)?,
                provider,
                request: serde_json::from_str(&request)
                    .map_err(|err| DbError::BadRow(err.to_string()))?,
                kind,
            })
        })
        .collect()
}

pub async fn list_alerts(pool: &SqlitePool, limit: i64) -> Result<Vec<AlertRecord>, DbError> {
    let rows: Vec<(String, String, Option<String>, Option<String>, String, Option<String>, String)> =
        sqlx::query_as(
            "SELECT id, prompt_id, code_snippet, trigger_string, trigger_type, \
             trigger_category, timestamp FROM alerts ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(
            |(id, prompt_id, code_snippet, trigger_string, trigger_type, trigger_category, timestamp)| {
                Ok(AlertRecord {
                    id,
                    prompt_id,
                    code_snippet,
                    trigger_string,
                    trigger_type: AlertTrigger::parse(&trigger_type).ok_or_else(|| {
                        DbError::BadRow(format!("unknown trigger type `{}`", trigger_type))
                    })?,
                    trigger_category,
                    timestamp: parse_timestamp(&timestamp)?,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite;

    #[tokio::test]
    async fn prompt_alert_round_trip() {
        let pool = sqlite::init_in_memory().await.expect("db");
        let prompt = PromptRecord {
            id: "p1".into(),
            workspace_id: "w1".into(),
            timestamp: Utc::now(),
            provider: "ollama".into(),
            request: serde_json::json!({"model": "q"}),
            kind: "chat".into(),
        };
        insert_prompt(&pool, &prompt).await.expect("insert prompt");
        let alert = AlertRecord::for_trigger_string(
            "p1",
            AlertTrigger::Secret,
            "github_personal_access_token".into(),
            Some("GitHub".into()),
        );
        insert_alert(&pool, &alert).await.expect("insert alert");

        let prompts = list_prompts(&pool, 10).await.expect("list prompts");
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].provider, "ollama");

        let alerts = list_alerts(&pool, 10).await.expect("list alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].trigger_type, AlertTrigger::Secret);
        assert!(alerts[0].trigger_string.is_some());
    }
}
