//! HTTP server: router, handlers and the session cookie

use axum::{
    Json, Router,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;
use std::time::Duration;
use timetrack_api::{
    ActiveClientsResponse, AuthResponse, ConflictResponse, CurrentSessionBody, DocumentProblem,
    ErrorBody, ErrorCode, HealthResponse, HealthStatus, LoginRequest, SESSION_COOKIE,
    SaveRequest, SaveResponse, Session, VERSION_HEADER, routes,
};
use timetrack_store::{DocumentStore, SaveOutcome, SessionStore, StoreError};
use timetrack_util::{AuthToken, ClientId, UserId};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Client id the server records when it edits the current session itself
pub const SERVER_CLIENT_ID: &str = "timetrackd";

/// Attempts for a server-side current-session edit that keeps losing races
const CURRENT_SESSION_ATTEMPTS: u32 = 3;

/// Single-user login settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub session_lifetime: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".into(),
            password: "admin".into(),
            session_lifetime: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Shared router state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub auth: Arc<AuthConfig>,
    server_client: ClientId,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sessions: Arc<dyn SessionStore>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            auth: Arc::new(auth),
            server_client: ClientId::parse(SERVER_CLIENT_ID).unwrap_or_default(),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(routes::LOGIN, post(login))
        .route(routes::LOGOUT, post(logout))
        .route(routes::DATA, get(get_data).head(head_data).post(save_data))
        .route(routes::ACTIVE_CLIENTS, get(active_clients))
        .route(
            routes::CURRENT_SESSION,
            get(get_current_session)
                .post(set_current_session)
                .delete(clear_current_session),
        )
        .route(routes::HEALTH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Errors a handler can answer with
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    InvalidRequest(String),
    InvalidDocument(Vec<DocumentProblem>),
    Conflict(ConflictResponse),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new(ErrorCode::Unauthorized, "Unauthorized")),
            )
                .into_response(),
            ApiError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new(ErrorCode::InvalidRequest, message)),
            )
                .into_response(),
            ApiError::InvalidDocument(problems) => {
                let message = problems
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody::new(ErrorCode::InvalidDocument, message)),
                )
                    .into_response()
            }
            ApiError::Conflict(body) => (StatusCode::CONFLICT, Json(body)).into_response(),
            ApiError::Internal(message) => {
                error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody::new(ErrorCode::InternalError, "Internal server error")),
                )
                    .into_response()
            }
        }
    }
}

/// The user behind a valid session cookie
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE)
            .map(|c| AuthToken::from(c.value().to_string()))
            .ok_or(ApiError::Unauthorized)?;

        state
            .sessions
            .validate(&token)
            .map(|session| CurrentUser(session.user_id))
            .ok_or(ApiError::Unauthorized)
    }
}

fn session_cookie(token: &AuthToken, lifetime: Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(
            i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX),
        ))
        .build()
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;

    let user = (req.username == state.auth.username && req.password == state.auth.password)
        .then(|| UserId::parse(&req.username).ok())
        .flatten();
    let Some(user) = user else {
        warn!(username = %req.username, "Login rejected");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(AuthResponse::denied("Invalid credentials")),
        )
            .into_response());
    };

    let session = state.sessions.create(user);
    info!(user_id = %session.user_id, "User logged in");

    let jar = jar.add(session_cookie(&session.token, state.auth.session_lifetime));
    Ok((jar, Json(AuthResponse::ok("Login successful"))).into_response())
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let token = AuthToken::from(cookie.value().to_string());
        if state.sessions.invalidate(&token) {
            info!("User logged out");
        }
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(AuthResponse::ok("Logout successful")))
}

async fn get_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    let versioned = state.store.load(&user).await?;
    Ok((
        [(VERSION_HEADER, versioned.version.to_string())],
        Json(versioned),
    )
        .into_response())
}

async fn head_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> impl IntoResponse {
    let version = state.store.get_version(&user).await;
    [(VERSION_HEADER, version.to_string())]
}

/// Answer for a save that lost the lock race: report what is stored now
async fn busy(state: &AppState, user: &UserId) -> ApiError {
    match state.store.load(user).await {
        Ok(current) => ApiError::Conflict(ConflictResponse::busy(current.version, current.document)),
        Err(e) => e.into(),
    }
}

async fn save_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Json<SaveResponse>, ApiError> {
    let Json(req) = body?;

    let problems = req.data.validate();
    if !problems.is_empty() {
        warn!(user_id = %user, client_id = %req.client_id, ?problems, "Rejecting invalid document");
        return Err(ApiError::InvalidDocument(problems));
    }

    let outcome = state
        .store
        .save(&user, req.data, &req.client_id, req.expected_version)
        .await?;

    match outcome {
        SaveOutcome::Saved { version } => Ok(Json(SaveResponse::saved(version))),
        SaveOutcome::Conflict { version, document } => Err(ApiError::Conflict(
            ConflictResponse::version_mismatch(version, document),
        )),
        SaveOutcome::Busy => Err(busy(&state, &user).await),
    }
}

async fn active_clients(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<ActiveClientsResponse> {
    let clients = state.store.get_active_clients(&user).await;
    Json(ActiveClientsResponse { clients })
}

async fn get_current_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CurrentSessionBody>, ApiError> {
    let versioned = state.store.load(&user).await?;
    Ok(Json(CurrentSessionBody {
        current_session: versioned.document.current_session,
    }))
}

async fn set_current_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<CurrentSessionBody>, JsonRejection>,
) -> Result<Json<SaveResponse>, ApiError> {
    let Json(body) = body?;

    if let Some(session) = &body.current_session
        && !session.is_running()
    {
        return Err(ApiError::InvalidRequest(
            "Current session must not have an end time".into(),
        ));
    }

    replace_current_session(&state, &user, body.current_session).await
}

async fn clear_current_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SaveResponse>, ApiError> {
    replace_current_session(&state, &user, None).await
}

async fn replace_current_session(
    state: &AppState,
    user: &UserId,
    session: Option<Session>,
) -> Result<Json<SaveResponse>, ApiError> {
    let running = session.is_some();
    let outcome = timetrack_store::replace_current_session(
        state.store.as_ref(),
        user,
        &state.server_client,
        session,
        CURRENT_SESSION_ATTEMPTS,
    )
    .await?;

    match outcome {
        SaveOutcome::Saved { version } => {
            debug!(user_id = %user, version, running, "Current session updated");
            Ok(Json(SaveResponse::saved(version)))
        }
        SaveOutcome::Conflict { version, document } => Err(ApiError::Conflict(
            ConflictResponse::version_mismatch(version, document),
        )),
        SaveOutcome::Busy => Err(busy(state, user).await),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.is_healthy() {
        (StatusCode::OK, Json(HealthResponse::new(HealthStatus::Ok)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new(HealthStatus::Degraded)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, header};
    use tempfile::tempdir;
    use timetrack_api::{Document, Project, VersionedDocument};
    use timetrack_store::{FileStore, MemorySessionStore, StoreSettings};
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreSettings::default()).unwrap();
        let auth = AuthConfig::default();
        let sessions = MemorySessionStore::new(auth.session_lifetime);
        let state = AppState::new(Arc::new(store), Arc::new(sessions), auth);
        Harness {
            app: router(state),
            _dir: dir,
        }
    }

    fn json_request(method: Method, uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn empty_request(method: Method, uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                routes::LOGIN,
                None,
                serde_json::json!({"username": "admin", "password": "admin"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.contains("HttpOnly"));
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn save_body(document: &Document, expected: Option<u64>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "data": document,
            "clientId": "client_test",
        });
        if let Some(v) = expected {
            body["expectedVersion"] = v.into();
        }
        body
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(json_request(
                Method::POST,
                routes::LOGIN,
                None,
                serde_json::json!({"username": "admin", "password": "wrong"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_data_routes_require_session() {
        let h = harness();
        for (method, uri) in [
            (Method::GET, routes::DATA),
            (Method::HEAD, routes::DATA),
            (Method::GET, routes::ACTIVE_CLIENTS),
            (Method::GET, routes::CURRENT_SESSION),
            (Method::DELETE, routes::CURRENT_SESSION),
        ] {
            let response = h
                .app
                .clone()
                .oneshot(empty_request(method.clone(), uri, Some("timetracker_session=bogus")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_load_default_document() {
        let h = harness();
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::GET, routes::DATA, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[VERSION_HEADER], "0");

        let body: VersionedDocument = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body, VersionedDocument::starter());
    }

    #[tokio::test]
    async fn test_save_conflict_flow() {
        let h = harness();
        let cookie = login(&h.app).await;
        let d0 = Document::starter();
        let mut d1 = Document::starter();
        d1.upsert_project(Project::new("Reading", "#123456"));

        let response = h
            .app
            .clone()
            .oneshot(json_request(Method::POST, routes::DATA, Some(&cookie), save_body(&d0, Some(0))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"success": true, "version": 1}));

        let response = h
            .app
            .clone()
            .oneshot(json_request(Method::POST, routes::DATA, Some(&cookie), save_body(&d1, Some(0))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let conflict = body_json(response).await;
        assert_eq!(conflict["actualVersion"], 1);
        assert_eq!(conflict["code"], "conflict");
        let stored: Document = serde_json::from_value(conflict["currentData"].clone()).unwrap();
        assert_eq!(stored, d0);

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::HEAD, routes::DATA, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[VERSION_HEADER], "1");

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::GET, routes::ACTIVE_CLIENTS, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["clients"], serde_json::json!(["client_test"]));
    }

    #[tokio::test]
    async fn test_invalid_document_rejected() {
        let h = harness();
        let cookie = login(&h.app).await;
        let mut doc = Document::starter();
        doc.projects.push(Project::new("General", "#000000"));

        let response = h
            .app
            .clone()
            .oneshot(json_request(Method::POST, routes::DATA, Some(&cookie), save_body(&doc, None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "invalid_document");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let h = harness();
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(json_request(
                Method::POST,
                routes::DATA,
                Some(&cookie),
                serde_json::json!({"nope": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "invalid_request");
    }

    #[tokio::test]
    async fn test_current_session_round_trip() {
        let h = harness();
        let cookie = login(&h.app).await;
        let running = Session::start("General", "focus", timetrack_util::now());

        let response = h
            .app
            .clone()
            .oneshot(json_request(
                Method::POST,
                routes::CURRENT_SESSION,
                Some(&cookie),
                serde_json::json!({"currentSession": running}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["version"], 1);

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::GET, routes::CURRENT_SESSION, Some(&cookie)))
            .await
            .unwrap();
        let body: CurrentSessionBody = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.current_session, Some(running));

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::DELETE, routes::CURRENT_SESSION, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["version"], 2);

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::GET, routes::CURRENT_SESSION, Some(&cookie)))
            .await
            .unwrap();
        assert!(body_json(response).await["currentSession"].is_null());
    }

    #[tokio::test]
    async fn test_stopped_current_session_rejected() {
        let h = harness();
        let cookie = login(&h.app).await;
        let mut stopped = Session::start("General", "", timetrack_util::now());
        stopped.stop(timetrack_util::now());

        let response = h
            .app
            .clone()
            .oneshot(json_request(
                Method::POST,
                routes::CURRENT_SESSION,
                Some(&cookie),
                serde_json::json!({"currentSession": stopped}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_invalidates_session() {
        let h = harness();
        let cookie = login(&h.app).await;

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::POST, routes::LOGOUT, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cleared.starts_with("timetracker_session="));

        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::GET, routes::DATA, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(empty_request(Method::GET, routes::HEALTH, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[test]
    fn test_session_cookie_max_age() {
        let token = AuthToken::new();

        let cookie = session_cookie(&token, Duration::from_secs(24 * 60 * 60));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(86_400)));
        assert_eq!(cookie.http_only(), Some(true));

        // lifetimes past i64 seconds clamp instead of going negative
        let cookie = session_cookie(&token, Duration::MAX);
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(i64::MAX)));
    }
}
