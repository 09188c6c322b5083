use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode, header},
};
use axum_multicurrency_shop::{
    app::{REQUEST_ID_HEADER, build_app},
    config::AppConfig,
    db::create_orm_conn,
    routes::health::health_check,
    state::AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup_state() -> anyhow::Result<(AppState, TempDir)> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("health.db").display());
    let orm = create_orm_conn(&url).await?;
    Ok((AppState::new(orm, AppConfig::new(url)), dir))
}

async fn json_body(response: axum::response::Response) -> anyhow::Result<serde_json::Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn health_check_reports_database() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;

    let response = health_check(State(state)).await;
    assert_eq!(response.0.message, "Health check");

    let data = response.0.data.expect("health data");
    assert_eq!(data.status, "ok");
    assert!(data.database);
    Ok(())
}

#[tokio::test]
async fn app_serves_health_with_a_request_id() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let app = build_app(state);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let body = json_body(response).await?;
    assert_eq!(body["data"]["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn unknown_routes_get_the_error_envelope() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let app = build_app(state);

    let response = app
        .oneshot(
            Request::get("/api/nope")
                .header(REQUEST_ID_HEADER, "req-123")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-123");

    let body = json_body(response).await?;
    assert_eq!(body["message"], "Not Found");
    assert_eq!(body["data"]["error"], "Not Found");
    Ok(())
}

#[tokio::test]
async fn cors_allows_only_the_storefront_origin() -> anyhow::Result<()> {
    let (state, _dir) = setup_state().await?;
    let frontend = state.config.frontend_url.clone();
    let app = build_app(state);

    let preflight = |origin: &str| {
        Request::options("/api/products")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
    };

    let allowed = app.clone().oneshot(preflight(&frontend)?).await?;
    assert_eq!(
        allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        frontend.as_str()
    );

    let denied = app.oneshot(preflight("https://evil.example")?).await?;
    assert!(!denied.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    Ok(())
}
