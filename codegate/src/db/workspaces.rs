//! SQL behind the workspace registry. The registry owns the in-memory
//! snapshot; every mutation lands here first.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use llm_client::provider::{ProviderAuth, ProviderKind};

use crate::mux::types::{MuxMatcherType, MuxRule};
use crate::workspace::types::{ProviderEndpoint, Session, Workspace, WorkspaceState};

use super::DbError;

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| DbError::BadRow(format!("bad timestamp `{}`: {}", raw, err)))
}

fn auth_columns(auth: &ProviderAuth) -> (&'static str, Option<String>) {
    match auth {
        ProviderAuth::None => ("none", None),
        ProviderAuth::ApiKey(key) => ("api_key", Some(key.clone())),
        ProviderAuth::Bearer(token) => ("bearer", Some(token.clone())),
    }
}

fn auth_from_columns(kind: &str, key: Option<String>) -> Result<ProviderAuth, DbError> {
    match (kind, key) {
        ("none", _) => Ok(ProviderAuth::None),
        ("api_key", Some(key)) => Ok(ProviderAuth::ApiKey(key)),
        ("bearer", Some(token)) => Ok(ProviderAuth::Bearer(token)),
        (kind, None) => Err(DbError::BadRow(format!(
            "auth kind `{}` stored without a key",
            kind
        ))),
        (kind, _) => Err(DbError::BadRow(format!("unknown auth kind `{}`", kind))),
    }
}

pub async fn load_workspaces(pool: &SqlitePool) -> Result<Vec<Workspace>, DbError> {
    let rows: Vec<(String, String, String, Option<String>, String)> = sqlx::query_as(
        "SELECT id, name, state, custom_instructions, created_at FROM workspaces ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    let mut workspaces = Vec::with_capacity(rows.len());
    for (id, name, state, custom_instructions, created_at) in rows {
        let mut workspace = Workspace::new(id.clone(), name);
        workspace.set_state(
            WorkspaceState::parse(&state)
                .ok_or_else(|| DbError::BadRow(format!("unknown workspace state `{}`", state)))?,
        );
        workspace.set_custom_instructions(custom_instructions);
        workspace.set_created_at(parse_timestamp(&created_at)?);
        workspace.set_mux_rules(load_mux_rules(pool, &id).await?);
        workspaces.push(workspace);
    }
    Ok(workspaces)
}

async fn load_mux_rules(pool: &SqlitePool, workspace_id: &str) -> Result<Vec<MuxRule>, DbError> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT provider_endpoint_id, model_name, matcher_type, matcher \
         FROM muxes WHERE workspace_id = ? ORDER BY position",
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(endpoint_id, model, matcher_type, matcher)| {
            let matcher_type = MuxMatcherType::parse(&matcher_type)
                .ok_or_else(|| DbError::BadRow(format!("unknown matcher `{}`", matcher_type)))?;
            MuxRule::new(endpoint_id, model, matcher_type, matcher)
                .map_err(|err| DbError::BadRow(err.to_string()))
        })
        .collect()
}

pub async fn upsert_workspace(pool: &SqlitePool, workspace: &Workspace) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO workspaces (id, name, state, custom_instructions, created_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET name = excluded.name, state = excluded.state, \
         custom_instructions = excluded.custom_instructions",
    )
    .bind(workspace.id())
    .bind(workspace.name())
    .bind(workspace.state().as_str())
    .bind(workspace.custom_instructions())
    .bind(workspace.created_at().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Replaces the ordered rule list in one transaction; positions are the
/// list indexes, so existing rules never renumber on append.
pub async fn replace_mux_rules(
    pool: &SqlitePool,
    workspace_id: &str,
    rules: &[MuxRule],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM muxes WHERE workspace_id = ?")
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;
    for (position, rule) in rules.iter().enumerate() {
        sqlx::query(
            "INSERT INTO muxes (id, workspace_id, position, provider_endpoint_id, model_name, \
             matcher_type, matcher) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(workspace_id)
        .bind(position as i64)
        .bind(rule.provider_endpoint_id())
        .bind(rule.model_name())
        .bind(rule.matcher_type().as_str())
        .bind(rule.matcher())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn delete_workspace(pool: &SqlitePool, workspace_id: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM workspaces WHERE id = ?")
        .bind(workspace_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_endpoints(pool: &SqlitePool) -> Result<Vec<ProviderEndpoint>, DbError> {
    let rows: Vec<(String, String, String, String, String, Option<String>)> = sqlx::query_as(
        "SELECT id, name, kind, base_url, auth_kind, api_key FROM provider_endpoints ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(id, name, kind, base_url, auth_kind, api_key)| {
            let kind: ProviderKind = serde_json::from_value(serde_json::Value::String(kind.clone()))
                .map_err(|_| DbError::BadRow(format!("unknown provider kind `{}`", kind)))?;
            Ok(ProviderEndpoint::new(
                id,
                name,
                kind,
                base_url,
                auth_from_columns(&auth_kind, api_key)?,
            ))
        })
        .collect()
}

pub async fn upsert_endpoint(
    pool: &SqlitePool,
    endpoint: &ProviderEndpoint,
) -> Result<(), DbError> {
    let (auth_kind, api_key) = auth_columns(endpoint.auth());
    let kind = serde_json::to_value(endpoint.kind())
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_default();
    sqlx::query(
        "INSERT INTO provider_endpoints (id, name, kind, base_url, auth_kind, api_key) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET name = excluded.name, kind = excluded.kind, \
         base_url = excluded.base_url, auth_kind = excluded.auth_kind, api_key = excluded.api_key",
    )
    .bind(endpoint.id())
    .bind(endpoint.name())
    .bind(kind)
    .bind(endpoint.base_url())
    .bind(auth_kind)
    .bind(api_key)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_endpoint(pool: &SqlitePool, endpoint_id: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM provider_endpoints WHERE id = ?")
        .bind(endpoint_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_session(pool: &SqlitePool) -> Result<Option<Session>, DbError> {
    let row: Option<(String, String, String)> =
        sqlx::query_as("SELECT id, active_workspace_id, updated_at FROM sessions LIMIT 1")
            .fetch_optional(pool)
            .await?;
    match row {
        Some((id, active_workspace_id, _updated_at)) => {
            Ok(Some(Session::new(id, active_workspace_id)))
        }
        None => Ok(None),
    }
}

/// There is exactly one session row; activation rewrites it in place.
pub async fn save_session(pool: &SqlitePool, session: &Session) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO sessions (id, active_workspace_id, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET active_workspace_id = excluded.active_workspace_id, \
         updated_at = excluded.updated_at",
    )
    .bind(session.id())
    .bind(session.active_workspace_id())
    .bind(session.updated_at().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
