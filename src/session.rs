//! Cookie-keyed browser sessions.
//!
//! Every request passes through [`session_middleware`], which loads (or
//! creates) the [`Session`] for the cookie token, hands handlers a
//! [`SessionContext`] through request extensions, and persists the session
//! once the handler has produced its response.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::error::{AppError, StoreError, StoreResult};
use crate::fsutil::write_atomic;
use crate::state::AppState;
use crate::types::{SessionToken, UserSlot};

pub const SESSION_COOKIE: &str = "problemdesk_session";
const TOKEN_LENGTH: usize = 32;
const TOKEN_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Per-browser login state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub ipaddr: String,
    pub email: Option<String>,
    pub userid: UserSlot,
    pub confirmation_time: Option<DateTime<Utc>>,
    /// When the current email was entered
    pub login_time: Option<DateTime<Utc>>,
    /// Outstanding one-time confirmation code
    pub confirm: Option<String>,
    /// Currently selected problem
    #[serde(default)]
    pub problem: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn new(ipaddr: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            ipaddr: ipaddr.into(),
            email: None,
            userid: UserSlot::Unassigned,
            confirmation_time: None,
            login_time: None,
            confirm: None,
            problem: None,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation_time.is_some()
    }
}

/// Generate a random session token
pub fn generate_token() -> SessionToken {
    let mut rng = rand::rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_CHARS[rng.random_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

/// Tokens come from the client; only accept the shape we hand out
fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| TOKEN_CHARS.contains(&b))
}

/// Key-value storage for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, token: &str) -> StoreResult<Option<Session>>;
    async fn save(&self, token: &str, session: &Session) -> StoreResult<()>;
    async fn remove(&self, token: &str) -> StoreResult<()>;
    /// Drop sessions not seen since `cutoff`; returns how many were removed
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// In-process session map, lost on restart
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, token: &str) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn save(&self, token: &str, session: &Session) -> StoreResult<()> {
        self.sessions
            .write()
            .await
            .insert(token.to_string(), session.clone());
        Ok(())
    }

    async fn remove(&self, token: &str) -> StoreResult<()> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen >= cutoff);
        Ok(before - sessions.len())
    }
}

/// One JSON file per session under `<data_dir>/sessions/`
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}.json", token))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, token: &str) -> StoreResult<Option<Session>> {
        let path = self.path(token);
        let content = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        match serde_json::from_slice(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // Sessions are disposable; start over instead of failing the request
                tracing::warn!(path = %path.display(), "Discarding unreadable session: {}", e);
                Ok(None)
            }
        }
    }

    async fn save(&self, token: &str, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_vec(session)?;
        write_atomic(&self.path(token), &json).await
    }

    async fn remove(&self, token: &str) -> StoreResult<()> {
        let path = self.path(token);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(token) = name.strip_suffix(".json") else {
                continue;
            };
            if !is_well_formed_token(token) {
                continue;
            }
            let stale = match self.load(token).await? {
                Some(session) => session.last_seen < cutoff,
                None => true,
            };
            if stale {
                self.remove(token).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Handle to the current request's session
#[derive(Clone)]
pub struct SessionContext {
    token: SessionToken,
    session: Arc<Mutex<Session>>,
    ended: Arc<AtomicBool>,
}

impl SessionContext {
    pub fn new(token: SessionToken, session: Session) -> Self {
        Self {
            token,
            session: Arc::new(Mutex::new(session)),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    /// Forget the session once the response is produced
    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((name, token)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && is_well_formed_token(token) {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// Address of the browser, from the socket or (behind a trusted proxy) forwarding headers
pub fn client_addr(request: &Request<Body>, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        let headers = request.headers();
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return Some(addr.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Load or create the session, run the handler, then persist the session
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(ipaddr) = client_addr(&request, state.config.trust_proxy) else {
        return AppError::Config("client address unavailable".to_string()).into_response();
    };

    let existing = match cookie_token(request.headers()) {
        Some(token) => match state.sessions.load(&token).await {
            Ok(Some(session)) if session.ipaddr == ipaddr => Some((token, session)),
            Ok(Some(session)) => {
                tracing::info!(
                    old = %session.ipaddr,
                    new = %ipaddr,
                    "Client address changed, starting a new session"
                );
                if let Err(e) = state.sessions.remove(&token).await {
                    tracing::warn!("Failed to drop stale session: {}", e);
                }
                None
            }
            Ok(None) => None,
            Err(e) => return AppError::from(e).into_response(),
        },
        None => None,
    };

    let (token, session, is_new) = match existing {
        Some((token, session)) => (token, session, false),
        None => (generate_token(), Session::new(ipaddr), true),
    };

    let ctx = SessionContext::new(token, session);
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;

    if ctx.is_ended() {
        if let Err(e) = state.sessions.remove(ctx.token()).await {
            tracing::warn!("Failed to remove session: {}", e);
        }
        if let Ok(value) = HeaderValue::from_str(&format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            SESSION_COOKIE
        )) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        return response;
    }

    let mut session = ctx.snapshot().await;
    session.last_seen = Utc::now();
    if let Err(e) = state.sessions.save(ctx.token(), &session).await {
        return AppError::from(e).into_response();
    }

    if is_new {
        if let Ok(value) = HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE,
            ctx.token()
        )) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

/// Spawn a background task that drops sessions idle for longer than `max_idle`
pub fn spawn_session_sweeper(state: Arc<AppState>, max_idle: chrono::Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;

            match state.sessions.purge_idle(Utc::now() - max_idle).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "Purged idle sessions"),
                Err(e) => tracing::warn!("Session sweep failed: {}", e),
            }
        }
    });
}
