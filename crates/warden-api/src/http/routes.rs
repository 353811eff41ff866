//! Admin API routes and handlers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;
use warden_domain::authz::SubjectFilter;
use warden_domain::model::Resource;
use warden_domain::{ObjectRef, Principal, RelationFilter, SubjectRef};
use warden_server::services::parse_tuple;
use warden_server::CreateResource;
use warden_storage::ResourceFilter;

use super::state::AppState;
use crate::errors::ApiError;
use crate::middleware::{
    cors_layer, AccessLogLayer, MetricsLayer, RequestIdLayer, RequestMetrics,
};
use crate::observability::{metrics_handler, MetricsState};

/// Default request body size limit (1MB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// JSON extractor that rejects malformed bodies with 400 and the API error
/// shape instead of axum's plain-text 422. Oversized bodies keep 413.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    Err(ApiError::new(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "payload_too_large",
                        rejection.body_text(),
                    ))
                } else {
                    Err(ApiError::invalid_argument(rejection.body_text()))
                }
            }
        }
    }
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/schema", get(get_schema))
        .route("/v1/check", post(check))
        .route(
            "/v1/relations",
            post(create_relation)
                .get(list_relations)
                .delete(delete_relations),
        )
        .route("/v1/resources", post(create_resource).get(list_resources))
        .route(
            "/v1/resources/:id",
            get(get_resource).delete(delete_resource),
        )
        .route("/ready", get(readiness_check))
}

/// Admin router without `/metrics`.
pub fn create_router(state: AppState, body_limit: usize) -> Router {
    api_routes()
        .route("/health", get(health_check))
        .with_state(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(AccessLogLayer::new("admin"))
        .layer(MetricsLayer::new(Arc::new(RequestMetrics::new()), "admin"))
        .layer(RequestIdLayer::new())
        .layer(cors_layer())
}

/// Admin router with the metrics endpoint (at `metrics_path`) and `/health`
/// served outside the body limit.
pub fn create_router_with_observability(
    state: AppState,
    metrics_state: MetricsState,
    metrics_path: &str,
    body_limit: usize,
) -> Router {
    let api_router = api_routes()
        .with_state(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(body_limit));

    let observability_router = Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_check))
        .with_state(metrics_state);

    api_router
        .merge(observability_router)
        .layer(AccessLogLayer::new("admin"))
        .layer(MetricsLayer::new(Arc::new(RequestMetrics::new()), "admin"))
        .layer(RequestIdLayer::new())
        .layer(cors_layer())
}

// ============================================================
// Health
// ============================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Ready when the graph backend answers a relation read.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.adapter.list(&RelationFilter::namespace("user")).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "checks": { "authz_backend": "ok" }
            })),
        ),
        Err(e) => {
            error!("readiness check failed: authz backend unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "checks": { "authz_backend": "unavailable" }
                })),
            )
        }
    }
}

// ============================================================
// Schema & checks
// ============================================================

async fn get_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.schema.to_string(),
    )
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let identity = headers
        .get(&state.identity_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::unauthenticated("missing identity"))?;
    state
        .principals
        .resolve_identity(identity)
        .await
        .map_err(|e| state.error(e))
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// `namespace:id`; the id may be a slug.
    pub object: String,
    pub permission: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

async fn check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let principal = authenticate(&state, &headers).await?;
    let object = ObjectRef::parse(&body.object).map_err(|e| state.error(e))?;
    if body.permission.is_empty() {
        return Err(ApiError::invalid_argument("permission is required"));
    }
    let allowed = state
        .authorizer
        .check_authorization(Some(&principal), &object, &body.permission)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(CheckResponse { allowed }))
}

// ============================================================
// Relations
// ============================================================

#[derive(Debug, Deserialize)]
pub struct RelationRequest {
    pub object: String,
    pub relation: String,
    pub subject: String,
}

/// Query of list and delete: `namespace` is required.
#[derive(Debug, Default, Deserialize)]
pub struct RelationQuery {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    /// `namespace:id` or `namespace:id#relation`.
    #[serde(default)]
    pub subject: Option<String>,
}

impl RelationQuery {
    fn into_filter(self) -> Result<RelationFilter, ApiError> {
        if self.namespace.is_empty() {
            return Err(ApiError::invalid_argument("namespace is required"));
        }
        let subject = self
            .subject
            .as_deref()
            .map(SubjectRef::parse)
            .transpose()
            .map_err(|e| ApiError::invalid_argument(e.to_string()))?;
        Ok(RelationFilter {
            namespace: self.namespace,
            object_id: self.object_id,
            relation: self.relation,
            subject: subject.as_ref().map(SubjectFilter::from),
        })
    }
}

async fn create_relation(
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<RelationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tuple = parse_tuple(&body.object, &body.relation, &body.subject)
        .map_err(|e| state.error(e))?;
    let record = state
        .relations
        .create(&tuple)
        .await
        .map_err(|e| state.error(e))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_relations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = query.into_filter()?;
    let records = state
        .relations
        .list(&filter)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(serde_json::json!({ "relations": records })))
}

async fn delete_relations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelationQuery>,
) -> Result<StatusCode, ApiError> {
    let filter = query.into_filter()?;
    state
        .relations
        .delete(&filter)
        .await
        .map_err(|e| state.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Resources
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub name: String,
    pub namespace: String,
    /// Project id or slug.
    pub project: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceQuery {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub owner_user_id: Option<String>,
}

async fn create_resource(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<CreateResourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = authenticate(&state, &headers).await?;
    let resource = state
        .resources
        .create(
            &principal,
            CreateResource {
                name: body.name,
                namespace_id: body.namespace,
                project: body.project,
                organization: body.organization,
                group: body.group,
            },
        )
        .await
        .map_err(|e| state.error(e))?;
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Vec<Resource>>, ApiError> {
    let filter = ResourceFilter {
        namespace_id: query.namespace,
        organization_id: query.organization_id,
        project_id: query.project_id,
        owner_user_id: query.owner_user_id,
    };
    let resources = state
        .resources
        .list(&filter)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(resources))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Resource>, ApiError> {
    let resource = state.resources.get(&id).await.map_err(|e| state.error(e))?;
    Ok(Json(resource))
}

async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .resources
        .delete(&id)
        .await
        .map_err(|e| state.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}
