//! Session resolution: ordered role probing with a verification gate.
//!
//! The caller does not know which role a credential pair belongs to, so the
//! resolver probes the role endpoints in a fixed order and stops at the
//! first acceptance. Probes are strictly sequential; firing the three
//! endpoints concurrently would trip per-endpoint failed-login counters and
//! lose the deterministic "first role that accepts wins" semantics.
//!
//! When every probe is rejected, the message of the *last* probe (student)
//! is what the user sees. That mirrors the shipped behavior of the mobile
//! client and is kept deliberately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::{Credentials, ProbeError, Role, RoleAuthenticator};
use crate::error::SessionError;
use crate::session::{Session, SessionStore};

/// Fixed probing order. First acceptance wins; on rejection the next role
/// is tried.
pub const PROBE_ORDER: [Role; 3] = [Role::Admin, Role::Teacher, Role::Student];

lazy_static! {
    /// Regex for the basic shape of an email address; the domain allow-list
    /// check runs after this.
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
}

/// What a successful resolution reports back to the caller.
///
/// `active` is false when the account authenticated but still awaits
/// verification by an administrator; the session is persisted either way so
/// the holding screen can display who is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub role: Role,
    pub active: bool,
}

/// Validate a credential pair against the configured email allow-list.
pub fn validate_credentials(
    credentials: &Credentials,
    allowed_domains: &[String],
) -> Result<(), String> {
    if credentials.email.is_empty() {
        return Err("Email is required".to_string());
    }
    if credentials.password.is_empty() {
        return Err("Password is required".to_string());
    }

    if !EMAIL_REGEX.is_match(&credentials.email) {
        return Err("Invalid email address".to_string());
    }

    let domain = credentials
        .email
        .rsplit('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if !allowed_domains.iter().any(|d| d.eq_ignore_ascii_case(&domain)) {
        return Err(format!(
            "Email provider is not recognized. Accepted providers: {}",
            allowed_domains.join(", ")
        ));
    }

    Ok(())
}

/// Clears the in-flight flag when the resolution ends, including when the
/// caller drops the resolve future mid-probe.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Turns one credential pair into at most one persisted session.
pub struct SessionResolver {
    authenticator: Arc<dyn RoleAuthenticator>,
    store: SessionStore,
    allowed_domains: Vec<String>,
    in_flight: AtomicBool,
}

impl SessionResolver {
    pub fn new(
        authenticator: Arc<dyn RoleAuthenticator>,
        store: SessionStore,
        allowed_domains: Vec<String>,
    ) -> Self {
        Self {
            authenticator,
            store,
            allowed_domains,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Resolve without external cancellation.
    pub async fn resolve(&self, credentials: &Credentials) -> Result<SessionOutcome, SessionError> {
        self.resolve_with_cancel(credentials, CancellationToken::new())
            .await
    }

    /// Resolve a credential pair into a persisted session.
    ///
    /// Validation runs before any probe; a failed resolution never touches
    /// the store; a cancelled one never touches it either, even when a probe
    /// already succeeded. At most one resolution runs at a time per
    /// resolver; a re-entrant call fails with [`SessionError::Busy`].
    pub async fn resolve_with_cancel(
        &self,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        validate_credentials(credentials, &self.allowed_domains)
            .map_err(SessionError::Validation)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        self.probe_and_persist(credentials, cancel).await
    }

    async fn probe_and_persist(
        &self,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let mut last_failure: Option<ProbeError> = None;

        for role in PROBE_ORDER {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            debug!(%role, "probing role endpoint");
            match self.authenticator.authenticate(role, credentials).await {
                Ok(grant) => {
                    let active = match role {
                        // Admin accounts are never gated, flag or no flag
                        Role::Admin => true,
                        Role::Teacher | Role::Student => grant.profile.is_verified(),
                    };

                    // The caller may have gone away while the probe was in
                    // flight; never persist a session nobody is waiting for.
                    if cancel.is_cancelled() {
                        return Err(SessionError::Cancelled);
                    }

                    self.store.save(&grant.token, &grant.profile, role).await?;
                    info!(%role, active, "session resolved");
                    return Ok(SessionOutcome { role, active });
                }
                Err(failure) => {
                    debug!(role = %failure.role, message = %failure.message, "role probe rejected");
                    last_failure = Some(failure);
                }
            }
        }

        let failure = last_failure.unwrap_or(ProbeError {
            role: Role::Student,
            message: "no role endpoint accepted the credentials".to_string(),
        });
        Err(SessionError::Auth {
            role: failure.role,
            message: failure.message,
        })
    }

    /// The currently persisted session, if any.
    pub async fn current(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.store.load().await?)
    }

    /// Drop the persisted session. Safe when not logged in.
    pub async fn logout(&self) -> Result<(), SessionError> {
        Ok(self.store.clear().await?)
    }
}
