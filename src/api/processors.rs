//! Document processor endpoints, scoped to the session's active organization.
//!
//! Runs are recorded locally and executed by an external execution function
//! invoked over HTTP with a service bearer token.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::CurrentUser;
use crate::db::{
    CreateProcessorRequest, ExecuteRunRequest, OrgRole, Processor, ProcessorRun, RunStatus,
    UpdateProcessorRequest,
};
use crate::AppState;

use super::error::ApiError;
use super::organizations::require_org_role;
use super::validation::validate_uuid;

/// The active organization from the session claim, or 400 when none is
/// stamped (the picker has not been answered yet)
fn active_organization(user: &CurrentUser) -> Result<String, ApiError> {
    user.organization_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("No active organization selected"))
}

async fn fetch_processor(
    pool: &crate::db::DbPool,
    organization_id: &str,
    processor_id: &str,
) -> Result<Processor, ApiError> {
    sqlx::query_as::<_, Processor>(
        "SELECT * FROM processors WHERE id = ? AND organization_id = ?",
    )
    .bind(processor_id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Processor not found"))
}

/// List processors in the active organization
pub async fn list_processors(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<Processor>>, ApiError> {
    let organization_id = active_organization(&user)?;
    require_org_role(&state.db, &organization_id, &user.id, OrgRole::Viewer).await?;

    let processors: Vec<Processor> = sqlx::query_as(
        "SELECT * FROM processors WHERE organization_id = ? ORDER BY created_at DESC",
    )
    .bind(&organization_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(processors))
}

/// Create a processor (member+)
pub async fn create_processor(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateProcessorRequest>,
) -> Result<(StatusCode, Json<Processor>), ApiError> {
    let organization_id = active_organization(&user)?;
    let membership =
        require_org_role(&state.db, &organization_id, &user.id, OrgRole::Member).await?;
    if !membership.role_enum().can_manage_processors() {
        return Err(ApiError::forbidden(
            "You don't have permission to manage processors",
        ));
    }

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation_field("name", "Name is required"));
    }
    if name.len() > 100 {
        return Err(ApiError::validation_field(
            "name",
            "Name is too long (max 100 characters)",
        ));
    }

    let config = req
        .config
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO processors (id, organization_id, name, description, config, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&organization_id)
    .bind(name)
    .bind(&req.description)
    .bind(&config)
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let processor: Processor = sqlx::query_as("SELECT * FROM processors WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!("Created processor '{}' in {}", processor.name, organization_id);

    Ok((StatusCode::CREATED, Json(processor)))
}

/// Get a processor
pub async fn get_processor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Processor>, ApiError> {
    if let Err(e) = validate_uuid(&id, "processor_id") {
        return Err(ApiError::validation_field("processor_id", e));
    }

    let organization_id = active_organization(&user)?;
    require_org_role(&state.db, &organization_id, &user.id, OrgRole::Viewer).await?;

    let processor = fetch_processor(&state.db, &organization_id, &id).await?;
    Ok(Json(processor))
}

/// Update a processor (member+)
pub async fn update_processor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
    Json(req): Json<UpdateProcessorRequest>,
) -> Result<Json<Processor>, ApiError> {
    if let Err(e) = validate_uuid(&id, "processor_id") {
        return Err(ApiError::validation_field("processor_id", e));
    }

    let organization_id = active_organization(&user)?;
    let membership =
        require_org_role(&state.db, &organization_id, &user.id, OrgRole::Member).await?;
    if !membership.role_enum().can_manage_processors() {
        return Err(ApiError::forbidden(
            "You don't have permission to manage processors",
        ));
    }

    fetch_processor(&state.db, &organization_id, &id).await?;

    let now = chrono::Utc::now().to_rfc3339();
    let config = req.config.map(|v| v.to_string());

    sqlx::query(
        r#"
        UPDATE processors SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            config = COALESCE(?, config),
            updated_at = ?
        WHERE id = ? AND organization_id = ?
        "#,
    )
    .bind(&req.name)
    .bind(&req.description)
    .bind(&config)
    .bind(&now)
    .bind(&id)
    .bind(&organization_id)
    .execute(&state.db)
    .await?;

    let processor = fetch_processor(&state.db, &organization_id, &id).await?;
    Ok(Json(processor))
}

/// Delete a processor (member+)
pub async fn delete_processor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    if let Err(e) = validate_uuid(&id, "processor_id") {
        return Err(ApiError::validation_field("processor_id", e));
    }

    let organization_id = active_organization(&user)?;
    let membership =
        require_org_role(&state.db, &organization_id, &user.id, OrgRole::Member).await?;
    if !membership.role_enum().can_manage_processors() {
        return Err(ApiError::forbidden(
            "You don't have permission to manage processors",
        ));
    }

    let result = sqlx::query("DELETE FROM processors WHERE id = ? AND organization_id = ?")
        .bind(&id)
        .bind(&organization_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Processor not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Execute a processor against a document (member+).
///
/// Records the run, invokes the external execution function, and stores
/// the result or error before answering.
pub async fn execute_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
    Json(req): Json<ExecuteRunRequest>,
) -> Result<(StatusCode, Json<ProcessorRun>), ApiError> {
    if let Err(e) = validate_uuid(&id, "processor_id") {
        return Err(ApiError::validation_field("processor_id", e));
    }
    if req.document_name.trim().is_empty() {
        return Err(ApiError::validation_field(
            "document_name",
            "Document name is required",
        ));
    }

    let organization_id = active_organization(&user)?;
    let membership =
        require_org_role(&state.db, &organization_id, &user.id, OrgRole::Member).await?;
    if !membership.role_enum().can_manage_processors() {
        return Err(ApiError::forbidden(
            "You don't have permission to execute processors",
        ));
    }

    let processor = fetch_processor(&state.db, &organization_id, &id).await?;

    let execution_url = state
        .config
        .processors
        .execution_url
        .clone()
        .ok_or_else(|| ApiError::internal("Processor execution is not configured"))?;

    let run_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO processor_runs (id, processor_id, organization_id, document_name, status, started_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run_id)
    .bind(&id)
    .bind(&organization_id)
    .bind(&req.document_name)
    .bind(RunStatus::Running.to_string())
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let config: serde_json::Value =
        serde_json::from_str(&processor.config).unwrap_or_else(|_| json!({}));
    let payload = json!({
        "processor_id": processor.id,
        "processor_config": config,
        "document_name": req.document_name,
        "document_text": req.document_text,
    });

    let mut request = state.http.post(&execution_url).json(&payload);
    if let Some(token) = &state.config.processors.service_token {
        request = request.bearer_auth(token);
    }

    let outcome = request.send().await;
    let finished = chrono::Utc::now().to_rfc3339();
    match outcome {
        Ok(response) if response.status().is_success() => {
            let result: serde_json::Value = response.json().await.unwrap_or_else(|_| json!({}));
            sqlx::query(
                "UPDATE processor_runs SET status = ?, result = ?, finished_at = ? WHERE id = ?",
            )
            .bind(RunStatus::Completed.to_string())
            .bind(result.to_string())
            .bind(&finished)
            .bind(&run_id)
            .execute(&state.db)
            .await?;
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                run_id = %run_id,
                status = %status,
                "Execution function returned an error"
            );
            sqlx::query(
                "UPDATE processor_runs SET status = ?, error = ?, finished_at = ? WHERE id = ?",
            )
            .bind(RunStatus::Failed.to_string())
            .bind(format!("Execution function returned {}: {}", status, body))
            .bind(&finished)
            .bind(&run_id)
            .execute(&state.db)
            .await?;
        }
        Err(err) => {
            tracing::error!(run_id = %run_id, "Execution function unreachable: {}", err);
            sqlx::query(
                "UPDATE processor_runs SET status = ?, error = ?, finished_at = ? WHERE id = ?",
            )
            .bind(RunStatus::Failed.to_string())
            .bind(format!("Execution function unreachable: {}", err))
            .bind(&finished)
            .bind(&run_id)
            .execute(&state.db)
            .await?;
        }
    }

    let run: ProcessorRun = sqlx::query_as("SELECT * FROM processor_runs WHERE id = ?")
        .bind(&run_id)
        .fetch_one(&state.db)
        .await?;

    Ok((StatusCode::CREATED, Json(run)))
}

/// List runs for a processor
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Vec<ProcessorRun>>, ApiError> {
    if let Err(e) = validate_uuid(&id, "processor_id") {
        return Err(ApiError::validation_field("processor_id", e));
    }

    let organization_id = active_organization(&user)?;
    require_org_role(&state.db, &organization_id, &user.id, OrgRole::Viewer).await?;
    fetch_processor(&state.db, &organization_id, &id).await?;

    let runs: Vec<ProcessorRun> = sqlx::query_as(
        "SELECT * FROM processor_runs WHERE processor_id = ? ORDER BY created_at DESC",
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(runs))
}

/// Get a single run
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path((id, run_id)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<Json<ProcessorRun>, ApiError> {
    if let Err(e) = validate_uuid(&id, "processor_id") {
        return Err(ApiError::validation_field("processor_id", e));
    }
    if let Err(e) = validate_uuid(&run_id, "run_id") {
        return Err(ApiError::validation_field("run_id", e));
    }

    let organization_id = active_organization(&user)?;
    require_org_role(&state.db, &organization_id, &user.id, OrgRole::Viewer).await?;

    let run: ProcessorRun = sqlx::query_as(
        "SELECT * FROM processor_runs WHERE id = ? AND processor_id = ? AND organization_id = ?",
    )
    .bind(&run_id)
    .bind(&id)
    .bind(&organization_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Run not found"))?;

    Ok(Json(run))
}
