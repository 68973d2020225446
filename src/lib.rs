pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod resolver;
pub mod session;

pub use error::SessionError;

use std::sync::Arc;

use anyhow::Result;

use auth::HttpAuthenticator;
use config::Config;
use resolver::SessionResolver;
use session::{KvStore, SessionStore};

/// Explicit session context: the single owner of the resolver and the
/// persisted session. Callers receive this by injection instead of reading
/// ambient storage keys.
pub struct ClientContext {
    pub config: Config,
    pub resolver: SessionResolver,
}

impl ClientContext {
    pub fn new(config: Config, kv: Arc<dyn KvStore>) -> Result<Self> {
        let authenticator = Arc::new(HttpAuthenticator::new(&config.backend)?);
        let resolver = SessionResolver::new(
            authenticator,
            SessionStore::new(kv),
            config.auth.allowed_email_domains.clone(),
        );
        Ok(Self { config, resolver })
    }
}
