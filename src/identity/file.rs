use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{CreateProblem, IdentityStore};
use crate::error::{StoreError, StoreResult};
use crate::fsutil::write_atomic;
use crate::types::{UploadRecord, UserId, UserRecord};
use crate::validate::check_problem_name;

/// Flat-file identity store rooted at the configured data directory
pub struct FileIdentityStore {
    root: PathBuf,
    /// One async mutex per user id; every logical commit for a user holds it.
    /// Only the table's own `Arc` left means the lock is idle.
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl FileIdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the top-level directories so later writes only fail on real problems
    pub async fn init(&self) -> StoreResult<()> {
        for dir in [self.email_index_dir(), self.users_dir(), self.uploads_root()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn admin_dir(&self) -> PathBuf {
        self.root.join("admin")
    }

    fn email_index_dir(&self) -> PathBuf {
        self.admin_dir().join("email_index")
    }

    fn record_path(&self, user_id: UserId) -> PathBuf {
        self.admin_dir().join(format!("user{}.json", user_id))
    }

    fn users_dir(&self) -> PathBuf {
        self.root.join("users")
    }

    fn workspace_dir(&self, user_id: UserId) -> PathBuf {
        self.users_dir().join(format!("user{}", user_id))
    }

    fn uploads_root(&self) -> PathBuf {
        self.root.join("uploads")
    }

    fn uploads_dir(&self, user_id: UserId) -> PathBuf {
        self.uploads_root().join(format!("user{}", user_id))
    }

    /// Index files are named after the email; refuse anything that could escape the directory
    fn index_path(&self, email: &str) -> Option<PathBuf> {
        if email.is_empty() || email.starts_with('.') || email.contains(['/', '\\', '\0']) {
            return None;
        }
        Some(self.email_index_dir().join(email))
    }

    /// Lock for one user's commits. Entries nobody holds are dropped on the way,
    /// so the table only grows with concurrently active users.
    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.retain(|id, lock| *id == user_id || Arc::strong_count(lock) > 1);
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_index_entry(&self, path: &Path) -> StoreResult<Option<UserId>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match content.trim().parse::<UserId>() {
                Ok(id) if id > 0 => Ok(Some(id)),
                _ => {
                    tracing::warn!(path = %path.display(), "Email index entry does not hold a user id");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn write_record(&self, user_id: UserId, record: &UserRecord) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(user_id), &json).await
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn lookup(&self, email: &str) -> StoreResult<Option<UserId>> {
        match self.index_path(email) {
            Some(path) => self.read_index_entry(&path).await,
            None => Ok(None),
        }
    }

    async fn load_record(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        let path = self.record_path(user_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        if content.trim().is_empty() {
            return Err(StoreError::CorruptRecord {
                user_id,
                reason: "empty file".to_string(),
            });
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::CorruptRecord {
                user_id,
                reason: e.to_string(),
            })
    }

    async fn save_record(&self, user_id: UserId, record: &UserRecord) -> StoreResult<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.write_record(user_id, record).await
    }

    async fn record_confirmation(
        &self,
        user_id: UserId,
        ipaddr: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut record = self.load_record(user_id).await?.unwrap_or_default();
        record.confirmation_time.insert(ipaddr.to_string(), at);
        self.write_record(user_id, &record).await?;

        tracing::debug!(user_id, ipaddr, "Recorded confirmation");
        Ok(())
    }

    async fn allocate_user_id(&self, preferred_start: UserId) -> StoreResult<UserId> {
        let users = self.users_dir();
        tokio::fs::create_dir_all(&users)
            .await
            .map_err(|e| StoreError::io(&users, e))?;

        let mut candidate = preferred_start.max(1);
        loop {
            let dir = self.workspace_dir(candidate);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    tracing::info!(user_id = candidate, "Allocated user id");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => candidate += 1,
                Err(e) => return Err(StoreError::io(&dir, e)),
            }
        }
    }

    async fn commit_emails(&self, user_id: UserId, emails: &[String]) -> StoreResult<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let keep: HashSet<&str> = emails.iter().map(String::as_str).collect();
        let body = user_id.to_string();

        for email in &keep {
            let Some(path) = self.index_path(email) else {
                tracing::warn!(email, "Refusing to index unsafe email");
                continue;
            };
            write_atomic(&path, body.as_bytes()).await?;
        }

        for stale in self.emails_for(user_id).await? {
            if keep.contains(stale.as_str()) {
                continue;
            }
            if let Some(path) = self.index_path(&stale) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => tracing::info!(user_id, email = %stale, "Removed email from index"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::io(&path, e)),
                }
            }
        }

        Ok(())
    }

    async fn emails_for(&self, user_id: UserId) -> StoreResult<Vec<String>> {
        let dir = self.email_index_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut emails = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if self.read_index_entry(&entry.path()).await? == Some(user_id) {
                emails.push(name);
            }
        }
        emails.sort();
        Ok(emails)
    }

    async fn list_problems(&self, user_id: UserId) -> StoreResult<Vec<String>> {
        let dir = self.workspace_dir(user_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut problems = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if check_problem_name(&name).is_ok() {
                    problems.push(name);
                }
            }
        }
        problems.sort();
        Ok(problems)
    }

    async fn create_problem(&self, user_id: UserId, name: &str) -> StoreResult<CreateProblem> {
        let workspace = self.workspace_dir(user_id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| StoreError::io(&workspace, e))?;

        let dir = workspace.join(name);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {
                tracing::info!(user_id, problem = name, "Created problem");
                Ok(CreateProblem::Created)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(CreateProblem::AlreadyExists),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    async fn store_upload(
        &self,
        user_id: UserId,
        original_name: &str,
        problem: Option<&str>,
        data: &[u8],
    ) -> StoreResult<UploadRecord> {
        let dir = self.uploads_dir(user_id);
        let stored_as = ulid::Ulid::new().to_string();

        write_atomic(&dir.join(&stored_as), data).await?;

        let record = UploadRecord {
            stored_as: stored_as.clone(),
            original_name: original_name.to_string(),
            size: data.len() as u64,
            sha256: hex::encode(Sha256::digest(data)),
            uploaded_at: Utc::now(),
            problem: problem.map(str::to_string),
        };
        let meta = serde_json::to_vec_pretty(&record)?;
        write_atomic(&dir.join(format!("{}.json", stored_as)), &meta).await?;

        tracing::info!(
            user_id,
            stored_as = %stored_as,
            original_name,
            size = record.size,
            "Stored upload"
        );
        Ok(record)
    }
}
