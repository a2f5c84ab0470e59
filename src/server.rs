//! HTTP surface: actuator endpoints, the activity API and the users API

use crate::activity::{ActivityReport, ActivityService, ActivitySummary};
use crate::error::{FieldError, WeaverError, error_code};
use crate::features::{DeleteResult, Feature, FeatureList, FeatureStore, FeatureUpdate};
use crate::health::{self, HealthChecker};
use crate::info::{InfoContributor, InfoReport};
use crate::metrics::METRICS;
use crate::users::{User, UserPayload, UserService};
use axum::{
    Json, Router,
    extract::{FromRef, MatchedPath, Path, Query, Request, State},
    http::{StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared handles for every route
#[derive(Clone, FromRef)]
pub struct AppState {
    pub health: Arc<HealthChecker>,
    pub features: Arc<FeatureStore>,
    pub users: Arc<UserService>,
    pub activity: Arc<ActivityService>,
    pub info: Arc<InfoContributor>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/actuator/health", get(health::liveness_handler))
        .route("/actuator/health/readiness", get(health::readiness_handler))
        .route(
            "/actuator/health/components",
            get(health::components_handler),
        )
        .route("/actuator/metrics", get(metrics_handler))
        .route("/actuator/info", get(info_handler))
        .route("/actuator/features", get(list_features))
        .route(
            "/actuator/features/{name}",
            get(get_feature).post(set_feature).delete(delete_feature),
        )
        .route("/api/actuator-demo/login", post(login))
        .route("/api/actuator-demo/logout", post(logout))
        .route("/api/actuator-demo/register", post(register))
        .route("/api/actuator-demo/order", post(create_order))
        .route("/api/actuator-demo/order/complete", post(complete_order))
        .route("/api/actuator-demo/error", post(record_error))
        .route("/api/actuator-demo/metrics-summary", get(metrics_summary))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/search", get(search_users))
        .route(
            "/api/users/{id}",
            get(get_user)
                .put(update_user)
                .patch(patch_user)
                .delete(delete_user),
        )
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    METRICS.record_http_request(&method, &route, status, elapsed);
    tracing::debug!(
        method = %method,
        route = %route,
        status = status,
        elapsed_ms = elapsed.as_millis() as u64,
        "request served"
    );
    response
}

/// Error body for every failed API call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
}

/// A failure bound to the request path it happened on
#[derive(Debug)]
pub struct ApiError {
    error: anyhow::Error,
    path: String,
}

impl ApiError {
    pub fn new(error: impl Into<anyhow::Error>, uri: &Uri) -> Self {
        Self {
            error: error.into(),
            path: uri.path().to_string(),
        }
    }

    fn body(&self) -> ErrorResponse {
        let code = error_code(&self.error);
        let status = code.status_code();
        let typed = self
            .error
            .chain()
            .find_map(|cause| cause.downcast_ref::<WeaverError>());
        let field_errors = typed.map(|e| e.field_errors().to_vec()).unwrap_or_default();

        let (error, message) = if !field_errors.is_empty() {
            ("Validation Failed".to_string(), "Invalid request body".to_string())
        } else if status == StatusCode::INTERNAL_SERVER_ERROR {
            (reason(status), "An unexpected error occurred".to_string())
        } else {
            (reason(status), self.error.to_string())
        };

        ErrorResponse {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error,
            message,
            path: self.path.clone(),
            field_errors,
        }
    }
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Error").to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = error_code(&self.error);
        let status = code.status_code();
        METRICS.record_error(code.category(), "http");
        if status.is_server_error() {
            tracing::error!(path = %self.path, error = ?self.error, "request failed");
        } else {
            tracing::debug!(path = %self.path, error = %self.error, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        METRICS.encode(),
    )
}

async fn info_handler(State(info): State<Arc<InfoContributor>>) -> Json<InfoReport> {
    Json(info.report())
}

#[derive(Debug, Deserialize)]
struct UsernameParams {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct RegisterParams {
    #[serde(default)]
    username: String,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderParams {
    #[serde(default)]
    product_type: String,
    amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteOrderParams {
    #[serde(default)]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorParams {
    #[serde(rename = "type", default)]
    error_type: String,
}

async fn login(
    State(activity): State<Arc<ActivityService>>,
    Query(params): Query<UsernameParams>,
    uri: Uri,
) -> ApiResult<Json<ActivityReport>> {
    activity
        .login(&params.username)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn logout(
    State(activity): State<Arc<ActivityService>>,
    Query(params): Query<UsernameParams>,
    uri: Uri,
) -> ApiResult<Json<ActivityReport>> {
    activity
        .logout(&params.username)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn register(
    State(activity): State<Arc<ActivityService>>,
    Query(params): Query<RegisterParams>,
    uri: Uri,
) -> ApiResult<Json<ActivityReport>> {
    activity
        .register(&params.username, params.source.as_deref())
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn create_order(
    State(activity): State<Arc<ActivityService>>,
    Query(params): Query<OrderParams>,
    uri: Uri,
) -> ApiResult<Json<ActivityReport>> {
    activity
        .create_order(&params.product_type, params.amount)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn complete_order(
    State(activity): State<Arc<ActivityService>>,
    Query(params): Query<CompleteOrderParams>,
    uri: Uri,
) -> ApiResult<Json<ActivityReport>> {
    activity
        .complete_order(&params.order_id)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn record_error(
    State(activity): State<Arc<ActivityService>>,
    Query(params): Query<ErrorParams>,
    uri: Uri,
) -> ApiResult<Json<ActivityReport>> {
    activity
        .record_error(&params.error_type)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn metrics_summary(State(activity): State<Arc<ActivityService>>) -> Json<ActivitySummary> {
    Json(activity.summary())
}

async fn list_features(State(features): State<Arc<FeatureStore>>) -> Json<FeatureList> {
    Json(features.list())
}

async fn get_feature(
    State(features): State<Arc<FeatureStore>>,
    Path(name): Path<String>,
    uri: Uri,
) -> ApiResult<Json<Feature>> {
    features
        .get(&name)
        .map(Json)
        .ok_or_else(|| ApiError::new(WeaverError::not_found("Feature", "name", &name), &uri))
}

async fn set_feature(
    State(features): State<Arc<FeatureStore>>,
    Path(name): Path<String>,
    Json(update): Json<FeatureUpdate>,
) -> Json<Feature> {
    Json(features.set(&name, update))
}

async fn delete_feature(
    State(features): State<Arc<FeatureStore>>,
    Path(name): Path<String>,
) -> Json<DeleteResult> {
    Json(features.delete(&name))
}

async fn list_users(State(users): State<Arc<UserService>>) -> Json<Vec<User>> {
    Json(users.list())
}

/// Optional case-insensitive substring filters
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSearch {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
}

async fn search_users(
    State(users): State<Arc<UserService>>,
    Query(search): Query<UserSearch>,
) -> Json<Vec<User>> {
    Json(users.search(
        search.first_name.as_deref(),
        search.last_name.as_deref(),
        search.email.as_deref(),
    ))
}

async fn get_user(
    State(users): State<Arc<UserService>>,
    Path(id): Path<u64>,
    uri: Uri,
) -> ApiResult<Json<User>> {
    users.get(id).map(Json).map_err(|e| ApiError::new(e, &uri))
}

async fn create_user(
    State(users): State<Arc<UserService>>,
    uri: Uri,
    Json(payload): Json<UserPayload>,
) -> ApiResult<Response> {
    let user = users.create(payload).map_err(|e| ApiError::new(e, &uri))?;
    let location = format!("/api/users/{}", user.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(user),
    )
        .into_response())
}

async fn update_user(
    State(users): State<Arc<UserService>>,
    Path(id): Path<u64>,
    uri: Uri,
    Json(payload): Json<UserPayload>,
) -> ApiResult<Json<User>> {
    users
        .update(id, payload)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn patch_user(
    State(users): State<Arc<UserService>>,
    Path(id): Path<u64>,
    uri: Uri,
    Json(patch): Json<UserPayload>,
) -> ApiResult<Json<User>> {
    users
        .patch(id, patch)
        .map(Json)
        .map_err(|e| ApiError::new(e, &uri))
}

async fn delete_user(
    State(users): State<Arc<UserService>>,
    Path(id): Path<u64>,
    uri: Uri,
) -> ApiResult<StatusCode> {
    users.delete(id).map_err(|e| ApiError::new(e, &uri))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn uri(path: &str) -> Uri {
        path.parse().unwrap()
    }

    #[test]
    fn error_body_for_typed_errors() {
        let body = ApiError::new(WeaverError::not_found("User", "id", 9), &uri("/api/users/9")).body();
        assert_eq!(body.status, 404);
        assert_eq!(body.error, "Not Found");
        assert_eq!(body.message, "User not found with id: 9");
        assert_eq!(body.path, "/api/users/9");

        let body = ApiError::new(
            WeaverError::validation("email", "Invalid email format"),
            &uri("/api/users"),
        )
        .body();
        assert_eq!(body.status, 400);
        assert_eq!(body.error, "Validation Failed");
        assert_eq!(body.field_errors.len(), 1);

        let body = ApiError::new(
            WeaverError::AccessDenied {
                operation: "OrderService.cancel".into(),
                required: vec!["ADMIN".into()],
            },
            &uri("/x"),
        )
        .body();
        assert_eq!(body.status, 403);
    }

    #[test]
    fn untyped_errors_hide_details() {
        let body = ApiError::new(anyhow!("db password leaked"), &uri("/api/users")).body();
        assert_eq!(body.status, 500);
        assert_eq!(body.message, "An unexpected error occurred");
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("fieldErrors").is_none());
    }
}
