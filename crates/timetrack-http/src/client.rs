//! HTTP client for the timetrack server

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use timetrack_api::{
    ActiveClientsResponse, AuthResponse, ConflictResponse, CurrentSessionBody, ErrorBody,
    HealthResponse, LoginRequest, SaveReply, SaveRequest, SaveResponse, Session,
    VERSION_HEADER, VersionedDocument, routes,
};
use timetrack_util::ClientId;
use tracing::debug;

use crate::{HttpError, HttpResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one timetrack server.
///
/// Keeps the login cookie between requests.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpClient {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:3000`)
    pub fn new(base_url: impl Into<String>) -> HttpResult<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in; the session cookie is kept for later requests
    pub async fn login(&self, username: &str, password: &str) -> HttpResult<()> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self.http.post(self.url(routes::LOGIN)).json(&body).send().await?;
        let reply: AuthResponse = json_body(check(response).await?).await?;
        debug!(message = %reply.message, "Logged in");
        Ok(())
    }

    pub async fn logout(&self) -> HttpResult<()> {
        let response = self.http.post(self.url(routes::LOGOUT)).send().await?;
        check(response).await?;
        Ok(())
    }

    /// Fetch the document and its version
    pub async fn load(&self) -> HttpResult<VersionedDocument> {
        let response = self.http.get(self.url(routes::DATA)).send().await?;
        json_body(check(response).await?).await
    }

    /// Versioned save. A 409 is a normal reply, not an error.
    pub async fn save(&self, request: &SaveRequest) -> HttpResult<SaveReply> {
        let response = self.http.post(self.url(routes::DATA)).json(request).send().await?;

        if response.status() == StatusCode::CONFLICT {
            let conflict: ConflictResponse = json_body(response).await?;
            return Ok(SaveReply::Conflict(conflict));
        }

        let saved: SaveResponse = json_body(check(response).await?).await?;
        Ok(SaveReply::Saved(saved))
    }

    /// Stored version without transferring the document
    pub async fn probe_version(&self) -> HttpResult<u64> {
        let response = self.http.head(self.url(routes::DATA)).send().await?;
        let response = check(response).await?;

        let header = response
            .headers()
            .get(VERSION_HEADER)
            .ok_or_else(|| HttpError::InvalidResponse(format!("missing {VERSION_HEADER} header")))?;
        header
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| HttpError::InvalidResponse(format!("bad {VERSION_HEADER} header")))
    }

    pub async fn active_clients(&self) -> HttpResult<Vec<ClientId>> {
        let response = self.http.get(self.url(routes::ACTIVE_CLIENTS)).send().await?;
        let body: ActiveClientsResponse = json_body(check(response).await?).await?;
        Ok(body.clients)
    }

    pub async fn current_session(&self) -> HttpResult<Option<Session>> {
        let response = self.http.get(self.url(routes::CURRENT_SESSION)).send().await?;
        let body: CurrentSessionBody = json_body(check(response).await?).await?;
        Ok(body.current_session)
    }

    /// Replace only the in-progress session
    pub async fn save_current_session(&self, session: &Session) -> HttpResult<SaveResponse> {
        let body = CurrentSessionBody {
            current_session: Some(session.clone()),
        };
        let response = self
            .http
            .post(self.url(routes::CURRENT_SESSION))
            .json(&body)
            .send()
            .await?;
        json_body(check(response).await?).await
    }

    pub async fn clear_current_session(&self) -> HttpResult<SaveResponse> {
        let response = self.http.delete(self.url(routes::CURRENT_SESSION)).send().await?;
        json_body(check(response).await?).await
    }

    pub async fn health(&self) -> HttpResult<HealthResponse> {
        let response = self.http.get(self.url(routes::HEALTH)).send().await?;
        json_body(check(response).await?).await
    }
}

/// Map non-2xx answers to errors
async fn check(response: Response) -> HttpResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(HttpError::Unauthorized);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(HttpError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn json_body<T: DeserializeOwned>(response: Response) -> HttpResult<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
