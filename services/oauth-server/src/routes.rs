//! HTTP surface of the callback service
//!
//! Endpoints:
//! - GET|POST /         : encode `custom-state`, 307 to the provider's consent page
//! - GET|POST /callback : decode `state`, exchange `code`, persist the token
//! - GET /health        : liveness and token file presence
//! - GET /metrics       : Prometheus text exposition
//!
//! Parameters are read the way an HTML form handler sees them: fields of an
//! urlencoded POST body first, then the query string. A POST with any other
//! content type is read from the query string alone. When a key repeats, the
//! first value wins.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use google_auth::{CodeExchanger, OAuthClient, TokenStore, decode_state, encode_state};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};
use url::form_urlencoded;

use crate::error::FlowError;
use crate::metrics;

/// Form parameter carrying the caller's correlation value.
pub const CUSTOM_STATE_PARAM: &str = "custom-state";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Request parameters in lookup order: urlencoded POST body, then query.
struct FormParams(Vec<(String, String)>);

impl<S: Send + Sync> FromRequest<S> for FormParams {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let query = req.uri().query().map(str::to_owned);
        let form_body = *req.method() == Method::POST
            && req
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE));

        let mut pairs = Vec::new();
        if form_body {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            pairs.extend(form_urlencoded::parse(&body).into_owned());
        }
        if let Some(query) = query {
            pairs.extend(form_urlencoded::parse(query.as_bytes()).into_owned());
        }
        Ok(Self(pairs))
    }
}

/// Shared, read-only state for all handlers.
#[derive(Clone)]
pub struct AppState {
    oauth: Arc<OAuthClient>,
    exchanger: Arc<dyn CodeExchanger>,
    store: TokenStore,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

impl AppState {
    pub fn new(
        oauth: Arc<OAuthClient>,
        exchanger: Arc<dyn CodeExchanger>,
        store: TokenStore,
        prometheus: PrometheusHandle,
    ) -> Self {
        Self {
            oauth,
            exchanger,
            store,
            started_at: Instant::now(),
            prometheus,
        }
    }
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds the number of requests handled at once.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(start_flow).post(start_flow))
        .route("/callback", get(callback).post(callback))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn form_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// GET|POST /: redirect the user-agent to the provider's consent page.
async fn start_flow(State(state): State<AppState>, FormParams(pairs): FormParams) -> Response {
    let request_id = new_request_id();

    match authorization_redirect(&state.oauth, form_value(&pairs, CUSTOM_STATE_PARAM)) {
        Ok(url) => {
            metrics::record_redirect("redirected");
            info!(request_id, "redirecting to authorization endpoint");
            Redirect::temporary(&url).into_response()
        }
        Err(e) => {
            e.log("/", &request_id);
            metrics::record_redirect(e.outcome());
            e.into_response()
        }
    }
}

/// Validate the correlation value and build the authorization URL.
fn authorization_redirect(
    oauth: &OAuthClient,
    custom_state: Option<&str>,
) -> Result<String, FlowError> {
    let custom_state = custom_state.unwrap_or_default();
    if custom_state.trim().is_empty() {
        return Err(FlowError::InvalidRequest("empty custom state"));
    }
    Ok(oauth.authorization_url(&encode_state(custom_state)))
}

/// GET|POST /callback: complete the flow and persist the token.
async fn callback(State(state): State<AppState>, FormParams(pairs): FormParams) -> Response {
    let request_id = new_request_id();
    info!(request_id, "callback requested");

    match complete_flow(&state, &pairs, &request_id).await {
        Ok(()) => {
            metrics::record_callback("ok");
            StatusCode::OK.into_response()
        }
        Err(e) => {
            e.log("/callback", &request_id);
            metrics::record_callback(e.outcome());
            e.into_response()
        }
    }
}

/// validate state -> validate code -> exchange -> persist.
///
/// Each step is terminal on failure. The store is only written after a
/// successful exchange.
async fn complete_flow(
    state: &AppState,
    pairs: &[(String, String)],
    request_id: &str,
) -> Result<(), FlowError> {
    // A missing parameter decodes as empty and is rejected below
    let correlation = decode_state(form_value(pairs, "state").unwrap_or_default())
        .map_err(FlowError::InvalidState)?;
    if correlation.trim().is_empty() {
        return Err(FlowError::InvalidState(google_auth::Error::InvalidState(
            "state is empty".into(),
        )));
    }
    info!(request_id, state = %correlation, "callback state decoded");

    let code = form_value(pairs, "code").unwrap_or_default();
    if code.trim().is_empty() {
        if let Some(provider_error) = form_value(pairs, "error") {
            warn!(request_id, provider_error, "provider returned an error instead of a code");
        }
        return Err(FlowError::InvalidRequest("empty code"));
    }

    let started = Instant::now();
    let exchanged = state.exchanger.exchange(code).await;
    metrics::record_exchange_duration(exchanged.is_ok(), started.elapsed().as_secs_f64());
    let token = exchanged.map_err(FlowError::ExchangeFailed)?;

    state
        .store
        .save(&token)
        .await
        .map_err(FlowError::PersistenceFailed)?;

    info!(
        request_id,
        state = %correlation,
        path = %state.store.path().display(),
        has_refresh_token = token.refresh_token.is_some(),
        "token persisted"
    );
    Ok(())
}

/// GET /health: uptime and whether a token has been stored yet.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let token_present = tokio::fs::try_exists(state.store.path())
        .await
        .unwrap_or(false);

    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "healthy",
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "token_file": state.store.path().display().to_string(),
            "token_present": token_present,
        })
        .to_string(),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header::LOCATION;
    use chrono::{TimeZone, Utc};
    use common::{OAuthConfig, Secret};
    use google_auth::Token;
    use std::collections::HashMap;
    use std::future::Future;
    use std::path::{Path, PathBuf};
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    /// Token exchanger double that records every code it is given.
    struct FakeExchanger {
        token: Option<Token>,
        calls: AtomicUsize,
        codes: Mutex<Vec<String>>,
    }

    impl FakeExchanger {
        fn succeeding(token: Token) -> Arc<Self> {
            Arc::new(Self {
                token: Some(token),
                calls: AtomicUsize::new(0),
                codes: Mutex::new(vec![]),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                token: None,
                calls: AtomicUsize::new(0),
                codes: Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CodeExchanger for FakeExchanger {
        fn exchange<'a>(
            &'a self,
            code: &'a str,
        ) -> Pin<Box<dyn Future<Output = google_auth::Result<Token>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.codes.lock().unwrap().push(code.to_string());
                self.token.clone().ok_or_else(|| {
                    google_auth::Error::InvalidCredentials("invalid_grant (400 Bad Request)".into())
                })
            })
        }
    }

    fn test_oauth_config(token_file: &Path, token_url: Option<String>) -> OAuthConfig {
        OAuthConfig {
            client_id: "client-123.apps.googleusercontent.com".into(),
            client_secret: Secret::new("GOCSPX-test".into()),
            redirect_url: "http://localhost:8080/callback".into(),
            scopes: vec!["https://www.googleapis.com/auth/drive".into()],
            token_file: token_file.to_path_buf(),
            auth_url: None,
            token_url,
            request_timeout_secs: 5,
        }
    }

    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_app(token_file: &Path, exchanger: Arc<dyn CodeExchanger>) -> Router {
        let config = test_oauth_config(token_file, None);
        let oauth = Arc::new(OAuthClient::new(reqwest::Client::new(), &config).unwrap());
        let state = AppState::new(
            oauth,
            exchanger,
            TokenStore::new(token_file),
            test_prometheus_handle(),
        );
        build_router(state, 16)
    }

    fn test_token(suffix: &str) -> Token {
        Token {
            access_token: format!("ya29.{suffix}"),
            token_type: "Bearer".into(),
            refresh_token: Some(format!("1//{suffix}")),
            expiry: Some(Utc.with_ymd_and_hms(2026, 10, 18, 13, 0, 0).unwrap()),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn encode_query(value: &str) -> String {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }

    fn callback_uri(state: &str, code: &str) -> String {
        format!(
            "/callback?state={}&code={}",
            encode_query(state),
            encode_query(code)
        )
    }

    async fn body_string(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn location_params(response: &Response) -> HashMap<String, String> {
        let location = response.headers()[LOCATION].to_str().unwrap();
        let url = url::Url::parse(location).unwrap();
        url.query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn start_redirects_with_encoded_state() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app.oneshot(get("/?custom-state=user-42")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()[LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/auth?"));

        let params = location_params(&response);
        assert_eq!(decode_state(&params["state"]).unwrap(), "user-42");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["client_id"], "client-123.apps.googleusercontent.com");
        assert_eq!(params["redirect_uri"], "http://localhost:8080/callback");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/drive");
    }

    #[tokio::test]
    async fn start_state_survives_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());
        let value = "team=ops & user/é?x=1 ";

        let response = app
            .oneshot(get(&format!("/?custom-state={}", encode_query(value))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            decode_state(&location_params(&response)["state"]).unwrap(),
            value
        );
    }

    #[tokio::test]
    async fn start_rejects_blank_state_without_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        for uri in ["/", "/?custom-state=", "/?custom-state=%20%20%09", "/?other=x"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(
                response.status(),
                StatusCode::UNPROCESSABLE_ENTITY,
                "{uri} must be rejected"
            );
            assert!(response.headers().get(LOCATION).is_none());
            assert_eq!(body_string(response).await, "empty custom state");
        }
    }

    #[tokio::test]
    async fn start_uses_first_value_of_repeated_param() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app
            .oneshot(get("/?custom-state=first&custom-state=second"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            decode_state(&location_params(&response)["state"]).unwrap(),
            "first"
        );
    }

    #[tokio::test]
    async fn start_accepts_posted_form() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("custom-state=session-7"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            decode_state(&location_params(&response)["state"]).unwrap(),
            "session-7"
        );
    }

    #[tokio::test]
    async fn start_redirects_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let a = app.clone().oneshot(get("/?custom-state=a")).await.unwrap();
        let b = app.oneshot(get("/?custom-state=b")).await.unwrap();

        assert_eq!(decode_state(&location_params(&a)["state"]).unwrap(), "a");
        assert_eq!(decode_state(&location_params(&b)["state"]).unwrap(), "b");
        assert!(!dir.path().join("token.json").exists(), "no side effects");
    }

    #[tokio::test]
    async fn callback_rejects_undecodable_state_before_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let exchanger = FakeExchanger::succeeding(test_token("x"));
        let app = test_app(&dir.path().join("token.json"), exchanger.clone());

        let response = app
            .oneshot(get("/callback?state=%21%21not-base64&code=4/0Ab"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_string(response).await, "decoding state failed");
        assert_eq!(exchanger.calls(), 0, "exchange must not be attempted");
        assert!(!dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn callback_rejects_missing_state() {
        let dir = tempfile::tempdir().unwrap();
        let exchanger = FakeExchanger::succeeding(test_token("x"));
        let app = test_app(&dir.path().join("token.json"), exchanger.clone());

        let response = app.oneshot(get("/callback?code=4/0Ab")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn callback_rejects_empty_code_before_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let exchanger = FakeExchanger::succeeding(test_token("x"));
        let app = test_app(&dir.path().join("token.json"), exchanger.clone());
        let state = encode_state("user-42");

        for uri in [
            callback_uri(&state, ""),
            callback_uri(&state, "   "),
            format!("/callback?state={}", encode_query(&state)),
            format!(
                "/callback?state={}&error=access_denied",
                encode_query(&state)
            ),
        ] {
            let response = app.clone().oneshot(get(&uri)).await.unwrap();
            assert_eq!(
                response.status(),
                StatusCode::UNPROCESSABLE_ENTITY,
                "{uri} must be rejected"
            );
            assert_eq!(body_string(response).await, "empty code");
        }
        assert_eq!(exchanger.calls(), 0, "exchange must not be attempted");
    }

    #[tokio::test]
    async fn callback_exchange_failure_leaves_store_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");
        let store = TokenStore::new(&token_file);
        store.save(&test_token("previous")).await.unwrap();

        let exchanger = FakeExchanger::failing();
        let app = test_app(&token_file, exchanger.clone());

        let response = app
            .oneshot(get(&callback_uri(&encode_state("user-42"), "4/0Ab")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "exchange token failed");
        assert_eq!(exchanger.calls(), 1, "no retry on failure");
        assert_eq!(store.load().await.unwrap(), test_token("previous"));
    }

    #[tokio::test]
    async fn callback_success_persists_token() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");
        let exchanger = FakeExchanger::succeeding(test_token("fresh"));
        let app = test_app(&token_file, exchanger.clone());

        let response = app
            .oneshot(get(&callback_uri(&encode_state("user-42"), "4/0Ab-code")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "");
        assert_eq!(*exchanger.codes.lock().unwrap(), vec!["4/0Ab-code"]);
        assert_eq!(
            TokenStore::new(&token_file).load().await.unwrap(),
            test_token("fresh")
        );
    }

    #[tokio::test]
    async fn callback_persistence_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("missing-dir").join("token.json");
        let app = test_app(&token_file, FakeExchanger::succeeding(test_token("x")));

        let response = app
            .oneshot(get(&callback_uri(&encode_state("user-42"), "4/0Ab")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "saving token failed");
    }

    #[tokio::test]
    async fn sequential_callbacks_keep_latest_token() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");

        for suffix in ["t1", "t2"] {
            let app = test_app(&token_file, FakeExchanger::succeeding(test_token(suffix)));
            let response = app
                .oneshot(get(&callback_uri(&encode_state("user-42"), "code")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(
            TokenStore::new(&token_file).load().await.unwrap(),
            test_token("t2")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callbacks_leave_a_complete_token() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");

        let mut handles = vec![];
        for i in 0..8 {
            let app = test_app(
                &token_file,
                FakeExchanger::succeeding(test_token(&format!("c{i}"))),
            );
            handles.push(tokio::spawn(async move {
                app.oneshot(get(&callback_uri(&encode_state("user"), "code")))
                    .await
                    .unwrap()
                    .status()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), StatusCode::OK);
        }

        let stored = TokenStore::new(&token_file).load().await.unwrap();
        let winner = stored.access_token.trim_start_matches("ya29.").to_string();
        assert_eq!(stored, test_token(&winner), "last writer wins, no mixing");
    }

    #[tokio::test]
    async fn health_reports_token_presence() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");
        let app = test_app(&token_file, FakeExchanger::failing());

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["token_present"], false);

        TokenStore::new(&token_file)
            .save(&test_token("x"))
            .await
            .unwrap();
        let response = app.oneshot(get("/health")).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["token_present"], true);
        assert!(
            !json.to_string().contains("ya29"),
            "health must never expose tokens"
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text_format() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app.oneshot(get("/metrics")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app.oneshot(get("/admin")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Mock Google token endpoint that accepts one authorization code.
    async fn start_token_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/token",
            axum::routing::post(|Form(form): Form<HashMap<String, String>>| async move {
                match form.get("code").map(String::as_str) {
                    Some("4/0Ab-html") => {
                        return (StatusCode::OK, "<html>sign in</html>".to_string());
                    }
                    Some("4/0Ab-huge-expiry") => {
                        return (
                            StatusCode::OK,
                            serde_json::json!({
                                "access_token": "ya29.from-google",
                                "expires_in": i64::MAX,
                                "token_type": "Bearer"
                            })
                            .to_string(),
                        );
                    }
                    _ => {}
                }
                if form.get("code").map(String::as_str) == Some("4/0Ab-valid")
                    && form.get("client_secret").map(String::as_str) == Some("GOCSPX-test")
                {
                    (
                        StatusCode::OK,
                        serde_json::json!({
                            "access_token": "ya29.from-google",
                            "refresh_token": "1//from-google",
                            "expires_in": 3599,
                            "token_type": "Bearer"
                        })
                        .to_string(),
                    )
                } else {
                    (
                        StatusCode::BAD_REQUEST,
                        serde_json::json!({ "error": "invalid_grant" }).to_string(),
                    )
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    fn real_client_app(token_file: &Path, token_url: String) -> Router {
        let config = test_oauth_config(token_file, Some(token_url));
        let oauth = Arc::new(OAuthClient::new(reqwest::Client::new(), &config).unwrap());
        let exchanger: Arc<dyn CodeExchanger> = oauth.clone();
        build_router(
            AppState::new(
                oauth,
                exchanger,
                TokenStore::new(token_file),
                test_prometheus_handle(),
            ),
            16,
        )
    }

    #[tokio::test]
    async fn full_flow_against_mock_provider() {
        let dir = tempfile::tempdir().unwrap();
        let token_file: PathBuf = dir.path().join("token.json");
        let app = real_client_app(&token_file, start_token_server().await);

        // Step 1: start, capture the state the provider would echo back
        let response = app
            .clone()
            .oneshot(get("/?custom-state=drive-bootstrap"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let state = location_params(&response)["state"].clone();

        // Step 2: provider redirects back with a code
        let response = app
            .clone()
            .oneshot(get(&callback_uri(&state, "4/0Ab-valid")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = TokenStore::new(&token_file).load().await.unwrap();
        assert_eq!(stored.access_token, "ya29.from-google");
        assert_eq!(stored.refresh_token.as_deref(), Some("1//from-google"));
        assert!(stored.expiry.unwrap() > Utc::now());

        // A rejected code afterwards leaves the stored token alone
        let response = app
            .oneshot(get(&callback_uri(&state, "4/0Ab-reused")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(TokenStore::new(&token_file).load().await.unwrap(), stored);
    }

    #[tokio::test]
    async fn unusable_token_response_is_500_and_nothing_stored() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");
        let app = real_client_app(&token_file, start_token_server().await);
        let state = encode_state("drive-bootstrap");

        for code in ["4/0Ab-html", "4/0Ab-huge-expiry"] {
            let response = app
                .clone()
                .oneshot(get(&callback_uri(&state, code)))
                .await
                .unwrap();
            assert_eq!(
                response.status(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "{code} must fail the exchange"
            );
            assert_eq!(body_string(response).await, "exchange token failed");
        }
        assert!(!token_file.exists());
    }

    fn form_post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn post_without_form_body_reads_query() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/?custom-state=from-query")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            decode_state(&location_params(&response)["state"]).unwrap(),
            "from-query"
        );
    }

    #[tokio::test]
    async fn post_body_takes_precedence_over_query() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir.path().join("token.json"), FakeExchanger::failing());

        let response = app
            .oneshot(form_post(
                "/?custom-state=from-query",
                "custom-state=from-body",
            ))
            .await
            .unwrap();

        assert_eq!(
            decode_state(&location_params(&response)["state"]).unwrap(),
            "from-body"
        );
    }

    #[tokio::test]
    async fn callback_merges_query_and_posted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token.json");
        let exchanger = FakeExchanger::succeeding(test_token("merged"));
        let app = test_app(&token_file, exchanger.clone());

        let uri = format!("/callback?state={}", encode_query(&encode_state("user-42")));
        let response = app
            .oneshot(form_post(&uri, "code=4%2F0Ab-posted"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*exchanger.codes.lock().unwrap(), vec!["4/0Ab-posted"]);
        assert_eq!(
            TokenStore::new(&token_file).load().await.unwrap(),
            test_token("merged")
        );
    }
}
