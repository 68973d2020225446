//! Role-based authentication against the school-management backend.
//!
//! The backend exposes one login endpoint per user role (admin, teacher,
//! student). Each endpoint accepts the same credential pair and returns a
//! role-specific profile plus a bearer token on success. This module wraps
//! the three endpoints behind the [`RoleAuthenticator`] trait so the
//! resolver can probe them in order without knowing about HTTP.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::BackendConfig;

/// The three user roles recognized by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    /// Stable string tag, used as the persisted role marker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Path of this role's login endpoint, relative to the backend base URL.
    pub fn login_path(&self) -> &'static str {
        match self {
            Role::Admin => "admin/login",
            Role::Teacher => "teacher/login",
            Role::Student => "student/login",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role tag: {}", other)),
        }
    }
}

/// One email/password pair. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Backend-owned profile snapshot returned by a successful login.
///
/// The verification flag is absent for admin accounts and for accounts
/// created before the flag existed; absence reads as verified. Fields this
/// client does not model are carried through opaquely so a round trip through
/// the session store does not lose them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// Assigned class, present for student profiles.
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub assigned_class: Option<String>,
    /// Taught subject, present for teacher profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RoleProfile {
    pub fn is_verified(&self) -> bool {
        self.verified.unwrap_or(true)
    }
}

/// Result of one accepted probe: the bearer token and the profile snapshot.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub token: String,
    pub profile: RoleProfile,
}

/// One rejected probe. Transport errors (including timeouts) are folded in
/// here so the resolver treats them like any other rejection and moves on to
/// the next role.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProbeError {
    pub role: Role,
    pub message: String,
}

#[async_trait]
pub trait RoleAuthenticator: Send + Sync {
    /// Perform exactly one authentication attempt against the given role's
    /// endpoint. No local state is mutated on any path.
    async fn authenticate(
        &self,
        role: Role,
        credentials: &Credentials,
    ) -> Result<AuthGrant, ProbeError>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    profile: RoleProfile,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// [`RoleAuthenticator`] over the real REST backend.
pub struct HttpAuthenticator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthenticator {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to construct HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn login_url(&self, role: Role) -> String {
        format!("{}/{}", self.base_url, role.login_path())
    }
}

#[async_trait]
impl RoleAuthenticator for HttpAuthenticator {
    async fn authenticate(
        &self,
        role: Role,
        credentials: &Credentials,
    ) -> Result<AuthGrant, ProbeError> {
        let url = self.login_url(role);
        debug!(%role, %url, "sending login probe");

        let request = LoginRequest {
            email: &credentials.email,
            password: &credentials.password,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_failure(role, &e))?;

        let status = response.status();
        if status.is_success() {
            let body: LoginResponse = response.json().await.map_err(|e| ProbeError {
                role,
                message: format!("malformed login response: {}", e),
            })?;
            return Ok(AuthGrant {
                token: body.token,
                profile: body.profile,
            });
        }

        // The backend reports rejections as an HTTP error status with a
        // JSON message field; fall back to the status line when it is absent.
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_else(|_| format!("login rejected with status {}", status));

        Err(ProbeError { role, message })
    }
}

fn transport_failure(role: Role, error: &reqwest::Error) -> ProbeError {
    let message = if error.is_timeout() {
        "login request timed out".to_string()
    } else {
        format!("network error: {}", error)
    };
    ProbeError { role, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_round_trip() {
        for role in [Role::Admin, Role::Teacher, Role::Student] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("principal".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn login_paths_are_per_role() {
        assert_eq!(Role::Admin.login_path(), "admin/login");
        assert_eq!(Role::Teacher.login_path(), "teacher/login");
        assert_eq!(Role::Student.login_path(), "student/login");
    }

    #[test]
    fn profile_deserializes_backend_payload() {
        let json = r#"{
            "_id": "stu-42",
            "name": "Ama Mensah",
            "email": "ama@gmail.com",
            "verified": false,
            "class": "JHS 2",
            "guardian": "Kofi Mensah"
        }"#;

        let profile: RoleProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, "stu-42");
        assert_eq!(profile.assigned_class.as_deref(), Some("JHS 2"));
        assert!(!profile.is_verified());
        // Unknown fields survive a store round trip
        assert_eq!(
            profile.extra.get("guardian").and_then(|v| v.as_str()),
            Some("Kofi Mensah")
        );
    }

    #[test]
    fn missing_verification_flag_reads_as_verified() {
        let json = r#"{"id": "adm-1", "name": "Head", "email": "head@gmail.com"}"#;
        let profile: RoleProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.verified, None);
        assert!(profile.is_verified());
    }

    #[test]
    fn login_url_joins_without_double_slash() {
        let config = BackendConfig {
            base_url: "http://localhost:3000/".to_string(),
            timeout_secs: 5,
        };
        let authenticator = HttpAuthenticator::new(&config).unwrap();
        assert_eq!(
            authenticator.login_url(Role::Teacher),
            "http://localhost:3000/teacher/login"
        );
    }
}
