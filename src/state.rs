use std::sync::Arc;

use crate::config::{AppConfig, SessionBackend};
use crate::error::StoreResult;
use crate::identity::{FileIdentityStore, IdentityStore};
use crate::login::LoginFlow;
use crate::login_log::LoginLog;
use crate::mailer::{CodeMailer, LogMailer};
use crate::problem::ProblemFlow;
use crate::profile::ProfileFlow;
use crate::session::{FileSessionStore, MemorySessionStore, SessionStore};
use crate::throttle::RateLimiter;

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub identity: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub mailer: Arc<dyn CodeMailer>,
    pub login_log: LoginLog,
    /// Limiter for POST /login (None = disabled)
    pub login_limiter: Option<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        identity: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn CodeMailer>,
    ) -> Self {
        let login_log = LoginLog::new(config.data_dir.join("admin").join("login.log"));
        let login_limiter = config
            .login_rate_limit
            .map(|(max, window)| RateLimiter::new(max, window));
        Self {
            config,
            identity,
            sessions,
            mailer,
            login_log,
            login_limiter,
        }
    }

    /// Production wiring: file identity store, configured session backend, log mailer
    pub async fn from_config(config: AppConfig) -> StoreResult<Self> {
        let identity = FileIdentityStore::new(&config.data_dir);
        identity.init().await?;

        let sessions: Arc<dyn SessionStore> = match config.session_backend {
            SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
            SessionBackend::File => {
                Arc::new(FileSessionStore::new(config.data_dir.join("sessions")))
            }
        };

        Ok(Self::new(
            config,
            Arc::new(identity),
            sessions,
            Arc::new(LogMailer),
        ))
    }

    pub fn login_flow(&self) -> LoginFlow<'_> {
        LoginFlow {
            store: self.identity.as_ref(),
            mailer: self.mailer.as_ref(),
            log: &self.login_log,
            window: self.config.confirm_window,
        }
    }

    pub fn profile_flow(&self) -> ProfileFlow<'_> {
        ProfileFlow {
            store: self.identity.as_ref(),
            min_field_chars: self.config.min_field_chars,
            user_id_start: self.config.user_id_start,
        }
    }

    pub fn problem_flow(&self) -> ProblemFlow<'_> {
        ProblemFlow {
            store: self.identity.as_ref(),
        }
    }
}
