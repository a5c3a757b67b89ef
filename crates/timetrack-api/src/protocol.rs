//! Request and response bodies of the timetrack HTTP API

use serde::{Deserialize, Serialize};
use timetrack_util::ClientId;

use crate::{Document, Session, API_VERSION};

/// Route paths shared by the server and the HTTP client
pub mod routes {
    pub const LOGIN: &str = "/api/auth/login";
    pub const LOGOUT: &str = "/api/auth/logout";
    pub const DATA: &str = "/api/data";
    pub const ACTIVE_CLIENTS: &str = "/api/data/clients";
    pub const CURRENT_SESSION: &str = "/api/current-session";
    pub const HEALTH: &str = "/health";
}

/// Response header carrying the stored document version
pub const VERSION_HEADER: &str = "x-data-version";

/// Cookie holding the login session token
pub const SESSION_COOKIE: &str = "timetracker_session";

/// Body of `POST /api/data`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub data: Document,
    /// Version the client last saw. `None` skips the version check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    pub client_id: ClientId,
}

/// Successful save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    pub version: u64,
}

impl SaveResponse {
    pub fn saved(version: u64) -> Self {
        Self {
            success: true,
            version,
        }
    }
}

/// Body of a 409 answer: the write was not applied
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResponse {
    pub error: String,
    pub code: ErrorCode,
    pub actual_version: u64,
    pub current_data: Document,
}

impl ConflictResponse {
    pub fn version_mismatch(actual_version: u64, current_data: Document) -> Self {
        Self {
            error: "Data was modified by another client".into(),
            code: ErrorCode::Conflict,
            actual_version,
            current_data,
        }
    }

    pub fn busy(actual_version: u64, current_data: Document) -> Self {
        Self {
            error: "Data is locked by another writer".into(),
            code: ErrorCode::Busy,
            actual_version,
            current_data,
        }
    }
}

/// What a save request came back with, as seen by a client
#[derive(Debug, Clone)]
pub enum SaveReply {
    Saved(SaveResponse),
    Conflict(ConflictResponse),
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    InvalidRequest,
    InvalidDocument,
    Conflict,
    Busy,
    InternalError,
}

/// Generic error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Body of `POST /api/auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Answer to login and logout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

impl AuthResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Body of `GET /api/data/clients`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveClientsResponse {
    pub clients: Vec<ClientId>,
}

/// Body of the current-session endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSessionBody {
    #[serde(default)]
    pub current_session: Option<Session>,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub api_version: u32,
}

impl HealthResponse {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: API_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_request_wire_format() {
        let client_id = ClientId::parse("client_abc").unwrap();
        let req = SaveRequest {
            data: Document::starter(),
            expected_version: Some(3),
            client_id,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["expectedVersion"], 3);
        assert_eq!(json["clientId"], "client_abc");

        let without_version = r#"{"data": {"sessions": [], "projects": []}, "clientId": "c1"}"#;
        let parsed: SaveRequest = serde_json::from_str(without_version).unwrap();
        assert_eq!(parsed.expected_version, None);
    }

    #[test]
    fn conflict_response_wire_format() {
        let body = ConflictResponse::version_mismatch(4, Document::empty());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["actualVersion"], 4);
        assert_eq!(json["code"], "conflict");
        assert!(json["currentData"]["sessions"].is_array());
    }

    #[test]
    fn current_session_body_accepts_null() {
        let parsed: CurrentSessionBody = serde_json::from_str(r#"{"currentSession": null}"#).unwrap();
        assert!(parsed.current_session.is_none());
        let parsed: CurrentSessionBody = serde_json::from_str("{}").unwrap();
        assert!(parsed.current_session.is_none());
    }
}
