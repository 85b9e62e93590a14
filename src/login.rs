//! Email confirmation state machine.
//!
//! `AwaitingEmail -> AwaitingConfirmation -> Confirmed(NewUser | ReturningUser)`
//!
//! The flow only mutates the [`Session`] it is given and talks to storage
//! through [`IdentityStore`]; the HTTP layer decides what to render or where
//! to redirect from the returned [`LoginState`].

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

use crate::error::StoreError;
use crate::identity::IdentityStore;
use crate::login_log::LoginLog;
use crate::mailer::CodeMailer;
use crate::session::Session;
use crate::types::{UserId, UserSlot};
use crate::validate::{normalize_email, EmailError};

/// No 0/O or 1/I/L, codes are typed in by hand
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

/// Generate a random confirmation code
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    AwaitingEmail,
    AwaitingConfirmation,
    Confirmed(ConfirmedAs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmedAs {
    /// Email not in the index yet; profile must be filled in first
    NewUser,
    ReturningUser(UserId),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("{0}")]
    InvalidEmail(#[from] EmailError),

    #[error("The confirmation code did not match. A new code has been sent.")]
    ConfirmationMismatch,

    #[error("This login has already been confirmed")]
    AlreadyConfirmed,

    #[error("No confirmation code has been issued; enter your email first")]
    NoPendingCode,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LoginError {
    /// Everything except storage failures is reported inline and re-prompted
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LoginError::Store(_))
    }
}

/// Login operations over one session
pub struct LoginFlow<'a> {
    pub store: &'a dyn IdentityStore,
    pub mailer: &'a dyn CodeMailer,
    pub log: &'a LoginLog,
    /// Confirmations younger than this are reused for the same IP
    pub window: chrono::Duration,
}

impl LoginFlow<'_> {
    /// Start (or restart) a login with `raw_email`
    pub async fn begin(
        &self,
        session: &mut Session,
        raw_email: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginState, LoginError> {
        let email = normalize_email(raw_email)?;

        let userid = match self.store.lookup(&email).await? {
            Some(id) => UserSlot::Assigned(id),
            None => UserSlot::New,
        };

        tracing::info!(email = %email, userid = ?userid, "Login started");

        session.email = Some(email);
        session.userid = userid;
        session.confirmation_time = None;
        session.login_time = Some(now);
        session.confirm = None;
        session.problem = None;

        let state = self.resolve(session, now).await?;
        if state == LoginState::AwaitingConfirmation {
            self.issue_code(session).await;
        }
        Ok(state)
    }

    /// Check a submitted confirmation code
    pub async fn confirm(
        &self,
        session: &mut Session,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginState, LoginError> {
        if session.confirmation_time.is_some() {
            if let Some(email) = &session.email {
                self.log.append(email, session.login_time, None).await;
            }
            return Err(LoginError::AlreadyConfirmed);
        }
        let (Some(email), Some(expected)) = (session.email.clone(), session.confirm.clone())
        else {
            if let Some(email) = &session.email {
                self.log.append(email, session.login_time, None).await;
            }
            return Err(LoginError::NoPendingCode);
        };

        if submitted.trim() != expected {
            tracing::warn!(email = %email, "Confirmation code mismatch");
            self.log.append(&email, session.login_time, None).await;
            self.issue_code(session).await;
            return Err(LoginError::ConfirmationMismatch);
        }

        // Store first; the session only becomes confirmed once the record holds it
        if let UserSlot::Assigned(id) = session.userid {
            if let Err(e) = self
                .store
                .record_confirmation(id, &session.ipaddr, now)
                .await
            {
                self.log.append(&email, session.login_time, None).await;
                return Err(e.into());
            }
        }

        session.confirmation_time = Some(now);
        session.confirm = None;
        self.log.append(&email, session.login_time, Some(now)).await;
        tracing::info!(email = %email, "Login confirmed");

        Ok(self.resolve(session, now).await?)
    }

    /// Current state, applying auto-confirmation for a recently confirmed IP
    pub async fn resolve(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<LoginState, StoreError> {
        if session.email.is_none() {
            return Ok(LoginState::AwaitingEmail);
        }

        if session.confirmation_time.is_none() {
            if let UserSlot::Assigned(id) = session.userid {
                let last = self
                    .store
                    .load_record(id)
                    .await?
                    .and_then(|r| r.confirmed_at(&session.ipaddr));
                if let Some(at) = last {
                    if now - at < self.window {
                        tracing::info!(user_id = id, ipaddr = %session.ipaddr, "Auto-confirmed from earlier login");
                        session.confirmation_time = Some(at);
                        session.confirm = None;
                    }
                }
            }
        }

        if session.confirmation_time.is_none() {
            return Ok(LoginState::AwaitingConfirmation);
        }

        Ok(match session.userid {
            UserSlot::Assigned(id) => LoginState::Confirmed(ConfirmedAs::ReturningUser(id)),
            UserSlot::New => LoginState::Confirmed(ConfirmedAs::NewUser),
            UserSlot::Unassigned => LoginState::AwaitingEmail,
        })
    }

    async fn issue_code(&self, session: &mut Session) {
        let code = generate_code();
        if let Some(email) = &session.email {
            self.mailer.send_code(email, &code).await;
        }
        session.confirm = Some(code);
    }
}
