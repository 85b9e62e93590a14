//! Identity storage: email index, user records and per-user workspaces.
//!
//! Flow code only talks to the [`IdentityStore`] trait; [`FileIdentityStore`]
//! is the flat-file backend laid out as
//!
//! ```text
//! admin/email_index/<email>     body = user id
//! admin/user<id>.json           profile + per-IP confirmation map
//! users/user<id>/<problem>/     problem directories
//! uploads/user<id>/<ulid>       uploaded bytes (+ <ulid>.json metadata)
//! ```

mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::types::{UploadRecord, UserId, UserRecord};

pub use file::FileIdentityStore;

/// Outcome of a problem creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateProblem {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve an email to its user id.
    ///
    /// `None` when the index entry is missing or does not hold a valid id.
    async fn lookup(&self, email: &str) -> StoreResult<Option<UserId>>;

    /// Load a user record; `None` when no record exists.
    ///
    /// Empty or unparseable content is reported as `StoreError::CorruptRecord`.
    async fn load_record(&self, user_id: UserId) -> StoreResult<Option<UserRecord>>;

    /// Replace the user record as a whole
    async fn save_record(&self, user_id: UserId, record: &UserRecord) -> StoreResult<()>;

    /// Merge one IP -> timestamp entry into the record and rewrite it
    async fn record_confirmation(
        &self,
        user_id: UserId,
        ipaddr: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Permanently claim the smallest free user id `>= preferred_start`
    async fn allocate_user_id(&self, preferred_start: UserId) -> StoreResult<UserId>;

    /// Point every email at `user_id`, then drop index entries for `user_id`
    /// that are not in `emails`
    async fn commit_emails(&self, user_id: UserId, emails: &[String]) -> StoreResult<()>;

    /// All emails currently indexed to `user_id`, sorted
    async fn emails_for(&self, user_id: UserId) -> StoreResult<Vec<String>>;

    /// Problem names owned by `user_id`, sorted
    async fn list_problems(&self, user_id: UserId) -> StoreResult<Vec<String>>;

    /// Create a problem directory. `name` must already be validated.
    async fn create_problem(&self, user_id: UserId, name: &str) -> StoreResult<CreateProblem>;

    /// Store uploaded bytes under a collision-free name
    async fn store_upload(
        &self,
        user_id: UserId,
        original_name: &str,
        problem: Option<&str>,
        data: &[u8],
    ) -> StoreResult<UploadRecord>;
}
