//! Router-level tests for the actuator endpoints and the users API

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use weaver::config::{AppConfig, RunMode};
use weaver::demo::Application;
use weaver::server;

fn app() -> Router {
    let config = AppConfig {
        mode: RunMode::Serve,
        ..AppConfig::default()
    };
    let application = Application::build(&config).unwrap();
    server::router(application.app_state())
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

#[tokio::test]
async fn health_endpoints() {
    let router = app();

    let (status, body) = send(&router, Method::GET, "/actuator/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&router, Method::GET, "/actuator/health/readiness", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    let (status, body) = send(&router, Method::GET, "/actuator/health/components", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["components"]["components"].is_object());
    assert_eq!(
        body["components"]["auditBuffer"]["details"]["used"],
        json!(0)
    );
}

#[tokio::test]
async fn metrics_endpoint_serves_openmetrics_text() {
    let router = app();
    send(&router, Method::GET, "/api/users", None).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/actuator/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("application/openmetrics-text"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("weaver_http_requests_total"));
    assert!(text.ends_with("# EOF\n"));
}

#[tokio::test]
async fn feature_toggles() {
    let router = app();

    let (status, body) = send(&router, Method::GET, "/actuator/features", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 4);
    assert_eq!(body["features"]["experimental"]["enabled"], false);

    let (status, body) = send(
        &router,
        Method::POST,
        "/actuator/features/experimental",
        Some(json!({"enabled": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);
    assert_eq!(body["description"], "Enable experimental features");
    assert!(body["lastModified"].is_string());

    let (status, _) = send(&router, Method::GET, "/actuator/features/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, Method::DELETE, "/actuator/features/caching", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "deleted", "feature": "caching"}));

    let (_, body) = send(&router, Method::DELETE, "/actuator/features/caching", None).await;
    assert_eq!(body["status"], "not_found");
}

#[tokio::test]
async fn user_crud_round() {
    let router = app();

    let (status, body) = send(&router, Method::GET, "/api/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/users",
        Some(json!({"firstName": "Dana", "lastName": "Scully", "email": "dana@fbi.gov", "age": 35})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().unwrap();
    assert_eq!(id, 4);

    let (status, body) = send(&router, Method::GET, &format!("/api/users/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "dana@fbi.gov");

    let (status, body) = send(
        &router,
        Method::PATCH,
        &format!("/api/users/{id}"),
        Some(json!({"lastName": "Mulder"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lastName"], "Mulder");
    assert_eq!(body["age"], 35);

    let (status, body) = send(
        &router,
        Method::PUT,
        &format!("/api/users/{id}"),
        Some(json!({"firstName": "Fox", "lastName": "Mulder", "email": "fox@fbi.gov"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("age").is_none());

    let (status, body) = send(&router, Method::DELETE, &format!("/api/users/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(&router, Method::GET, &format!("/api/users/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], format!("User not found with id: {id}"));
    assert_eq!(body["path"], format!("/api/users/{id}"));
}

#[tokio::test]
async fn user_errors_map_to_error_response() {
    let router = app();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/users",
        Some(json!({"firstName": "X", "email": "not-an-email", "age": -3})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation Failed");
    assert_eq!(body["status"], 400);
    let fields: Vec<&str> = body["fieldErrors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    for field in ["firstName", "lastName", "email", "age"] {
        assert!(fields.contains(&field), "missing {field} in {fields:?}");
    }

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/users",
        Some(json!({"firstName": "Alice", "lastName": "Again", "email": "alice@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (status, _) = send(&router, Method::DELETE, "/api/users/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_search_filters_by_query() {
    let router = app();

    let (status, body) = send(&router, Method::GET, "/api/users/search?lastName=Smith", None).await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["firstName"], "Alice");

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/users/search?firstName=b&email=EXAMPLE.COM",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["email"], "bob@example.com");

    let (_, body) = send(&router, Method::GET, "/api/users/search", None).await;
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    let (_, body) = send(&router, Method::GET, "/api/users/search?lastName=Nobody", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn invalid_email_is_rejected_over_http() {
    let router = app();
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/users",
        Some(json!({"firstName": "Xavier", "lastName": "Dash", "email": "x@-.-"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fieldErrors"][0]["field"], "email");
    assert_eq!(body["fieldErrors"][0]["message"], "Invalid email format");
}

#[tokio::test]
async fn activity_sessions_and_orders() {
    let router = app();

    let (status, body) = send(&router, Method::POST, "/api/actuator-demo/login?username=john", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "User john logged in");
    assert_eq!(body["activeUsers"], 1);

    send(&router, Method::POST, "/api/actuator-demo/login?username=jane", None).await;
    let (_, body) = send(&router, Method::POST, "/api/actuator-demo/logout?username=john", None).await;
    assert_eq!(body["activeUsers"], 1);

    let (status, _) = send(&router, Method::POST, "/api/actuator-demo/logout?username=john", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/actuator-demo/register?username=john",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User john registered from web");

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/actuator-demo/order?productType=electronics&amount=99.99",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Order created for electronics");
    assert_eq!(body["amount"], 99.99);
    assert_eq!(body["pendingOrders"], 1);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/actuator-demo/order/complete?orderId=123",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Order 123 completed");
    assert_eq!(body["pendingOrders"], 0);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/actuator-demo/order/complete?orderId=124",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["path"], "/api/actuator-demo/order/complete");

    let (status, body) = send(&router, Method::POST, "/api/actuator-demo/error?type=validation", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "error_recorded", "errorType": "validation"}));

    let (status, body) = send(&router, Method::GET, "/api/actuator-demo/metrics-summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeUsers"], 1);
    assert_eq!(body["pendingOrders"], 0);
}

#[tokio::test]
async fn activity_moves_business_metrics() {
    let router = app();
    send(&router, Method::POST, "/api/actuator-demo/register?username=metrics&source=mobile", None).await;
    send(
        &router,
        Method::POST,
        "/api/actuator-demo/order?productType=books&amount=12.5",
        None,
    )
    .await;

    let (status, text) = send(&router, Method::GET, "/actuator/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = text.as_str().unwrap_or_default().to_string();
    assert!(text.contains("weaver_user_registrations_total"));
    assert!(text.contains("weaver_orders_created_total"));
    assert!(text.contains("weaver_order_amount_count"));
}

#[tokio::test]
async fn activity_rejects_missing_parameters() {
    let router = app();

    let (status, body) = send(&router, Method::POST, "/api/actuator-demo/login", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fieldErrors"][0]["field"], "username");

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/actuator-demo/order?productType=&amount=-1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fieldErrors"].as_array().map(Vec::len), Some(2));

    let (status, _) = send(&router, Method::GET, "/api/actuator-demo/login", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn info_endpoint() {
    let router = app();
    let (status, body) = send(&router, Method::GET, "/actuator/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["application"]["name"], "weaver");
    assert_eq!(body["application"]["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["application"]["startTime"].is_string());
    assert_eq!(body["system"]["os"], std::env::consts::OS);
    assert!(body["runtime"]["availableProcessors"].as_u64().unwrap() >= 1);
    assert!(body["uptime"]["formatted"].as_str().unwrap().ends_with('s'));
}
