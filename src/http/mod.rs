//! Minimal HTTP surface (§4.L, named Non-goal detail notwithstanding): wires
//! the engine behind a handful of `axum` routes. No auth middleware, no
//! pagination, no rate limiting — those are the named Non-goals.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::engine::{Engine, EngineError};

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/check", post(check))
        .route("/v1/roles", post(create_role_v2).get(list_roles_v2))
        .route(
            "/v1/roles/{id}",
            get(get_role_v2).put(update_role_v2).delete(delete_role_v2),
        )
        .route("/v1/role-bindings", post(create_role_binding).get(list_role_bindings))
        .route(
            "/v1/role-bindings/{id}",
            get(get_role_binding).put(update_role_binding).delete(delete_role_binding),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Mirrors the teacher's `ApiError`/`ErrorResponse` shape: a status code plus
/// a single `error` string field, never a raw error debug dump.
struct ApiError(EngineError);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidNamespace(_)
            | EngineError::InvalidType(_)
            | EngineError::InvalidArgument(_)
            | EngineError::InvalidRelationship { .. }
            | EngineError::InvalidRoleBindingSubjectType { .. }
            | EngineError::InvalidAction(_)
            | EngineError::CreateRoleBindingWithNoSubjects => StatusCode::BAD_REQUEST,
            EngineError::RoleAlreadyExists { .. } | EngineError::RoleNameTaken { .. } => StatusCode::CONFLICT,
            EngineError::ActionNotAssigned { .. }
            | EngineError::ScopeNotAssigned
            | EngineError::ResourceDoesNotSupportRoleBindingV2(_) => StatusCode::FORBIDDEN,
            EngineError::DeleteRoleInUse(_) => StatusCode::CONFLICT,
            EngineError::RoleHasTooManyResources(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ if self.0.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CheckRequest {
    subject: String,
    action: String,
    resource: String,
}

#[derive(Serialize)]
struct CheckResponse {
    allowed: bool,
}

async fn check(State(engine): State<Engine>, Json(req): Json<CheckRequest>) -> Result<Json<CheckResponse>, ApiError> {
    let subject = engine.new_resource_from_id_string(&req.subject)?;
    let resource = engine.new_resource_from_id_string(&req.resource)?;
    let allowed = match engine.subject_has_permission(&subject, &req.action, &resource).await {
        Ok(()) => true,
        Err(EngineError::ActionNotAssigned { .. }) => false,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(CheckResponse { allowed }))
}

#[derive(Deserialize)]
struct CreateRoleRequest {
    actor: String,
    owner: String,
    name: String,
    actions: Vec<String>,
}

#[derive(Serialize)]
struct RoleResponse {
    id: uuid::Uuid,
    name: String,
    resource_id: String,
}

impl From<crate::store::models::Role> for RoleResponse {
    fn from(r: crate::store::models::Role) -> Self {
        Self {
            id: r.id,
            name: r.name,
            resource_id: r.resource_id,
        }
    }
}

async fn create_role_v2(
    State(engine): State<Engine>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<Json<RoleResponse>, ApiError> {
    let owner = engine.new_resource_from_id_string(&req.owner)?;
    let role = engine
        .create_role_v2(&req.actor, &owner, &req.name, &req.actions)
        .await?;
    Ok(Json(role.into()))
}

#[derive(Deserialize)]
struct ListRolesQuery {
    owner: String,
}

async fn list_roles_v2(
    State(engine): State<Engine>,
    axum::extract::Query(q): axum::extract::Query<ListRolesQuery>,
) -> Result<Json<Vec<RoleResponse>>, ApiError> {
    let owner = engine.new_resource_from_id_string(&q.owner)?;
    let roles = engine.list_roles_v2(&owner).await?;
    Ok(Json(roles.into_iter().map(|(r, _inherited)| r.into()).collect()))
}

async fn get_role_v2(State(engine): State<Engine>, Path(id): Path<uuid::Uuid>) -> Result<Json<RoleResponse>, ApiError> {
    Ok(Json(engine.get_role_v2(id).await?.into()))
}

#[derive(Deserialize)]
struct UpdateRoleRequest {
    actor: String,
    name: Option<String>,
    actions: Option<Vec<String>>,
}

async fn update_role_v2(
    State(engine): State<Engine>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<RoleResponse>, ApiError> {
    let role = engine
        .update_role_v2(&req.actor, id, req.name.as_deref(), req.actions.as_deref())
        .await?;
    Ok(Json(role.into()))
}

#[derive(Deserialize)]
struct DeleteRoleRequest {
    owner: String,
}

async fn delete_role_v2(
    State(engine): State<Engine>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<DeleteRoleRequest>,
) -> Result<StatusCode, ApiError> {
    let owner = engine.new_resource_from_id_string(&req.owner)?;
    engine.delete_role_v2(&owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SubjectSpec {
    id: String,
    relation: Option<String>,
}

#[derive(Deserialize)]
struct CreateRoleBindingRequest {
    actor: String,
    resource: String,
    role_id: uuid::Uuid,
    manager: Option<String>,
    subjects: Vec<SubjectSpec>,
}

#[derive(Serialize)]
struct RoleBindingResponse {
    id: uuid::Uuid,
    resource_id: String,
    manager: Option<String>,
}

impl From<crate::store::models::RoleBinding> for RoleBindingResponse {
    fn from(r: crate::store::models::RoleBinding) -> Self {
        Self {
            id: r.id,
            resource_id: r.resource_id,
            manager: r.manager,
        }
    }
}

async fn create_role_binding(
    State(engine): State<Engine>,
    Json(req): Json<CreateRoleBindingRequest>,
) -> Result<Json<RoleBindingResponse>, ApiError> {
    let resource = engine.new_resource_from_id_string(&req.resource)?;
    let mut subjects = Vec::new();
    for s in &req.subjects {
        subjects.push((engine.new_resource_from_id_string(&s.id)?, s.relation.clone()));
    }
    let binding = engine
        .create_role_binding(&req.actor, &resource, req.role_id, req.manager.as_deref(), &subjects)
        .await?;
    Ok(Json(binding.into()))
}

#[derive(Deserialize)]
struct ListRoleBindingsQuery {
    resource: String,
    role_id: Option<uuid::Uuid>,
}

async fn list_role_bindings(
    State(engine): State<Engine>,
    axum::extract::Query(q): axum::extract::Query<ListRoleBindingsQuery>,
) -> Result<Json<Vec<RoleBindingResponse>>, ApiError> {
    let resource = engine.new_resource_from_id_string(&q.resource)?;
    let bindings = engine.list_role_bindings(&resource, q.role_id).await?;
    Ok(Json(bindings.into_iter().map(Into::into).collect()))
}

async fn get_role_binding(
    State(engine): State<Engine>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<RoleBindingResponse>, ApiError> {
    Ok(Json(engine.get_role_binding(id).await?.into()))
}

#[derive(Deserialize)]
struct UpdateRoleBindingRequest {
    actor: String,
    subjects: Vec<SubjectSpec>,
}

async fn update_role_binding(
    State(engine): State<Engine>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<UpdateRoleBindingRequest>,
) -> Result<Json<RoleBindingResponse>, ApiError> {
    let mut subjects = Vec::new();
    for s in &req.subjects {
        subjects.push((engine.new_resource_from_id_string(&s.id)?, s.relation.clone()));
    }
    let binding = engine.update_role_binding(&req.actor, id, &subjects).await?;
    Ok(Json(binding.into()))
}

#[derive(Deserialize)]
struct DeleteRoleBindingRequest {
    resource: String,
}

async fn delete_role_binding(
    State(engine): State<Engine>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<DeleteRoleBindingRequest>,
) -> Result<StatusCode, ApiError> {
    let resource = engine.new_resource_from_id_string(&req.resource)?;
    engine.delete_role_binding(&resource, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
