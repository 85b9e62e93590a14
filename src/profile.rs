//! Profile form: validation of name/organization/location and the email list,
//! and the commit that turns a confirmed session into a stored user.

use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::error::{AppError, StoreError};
use crate::identity::IdentityStore;
use crate::session::Session;
use crate::types::{UserId, UserRecord, UserSlot};
use crate::validate::{escape_html, normalize_email};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("must not be empty")]
    Empty,

    #[error("is too short (at least {min} characters)")]
    TooShort { min: usize },
}

/// Check one text field; returns the trimmed value.
///
/// Length is counted on the HTML-escaped value, ignoring whitespace.
pub fn check_text_field(raw: &str, min_chars: usize) -> Result<String, FieldError> {
    let trimmed = raw.trim();
    let escaped = escape_html(trimmed);
    if escaped.is_empty() {
        return Err(FieldError::Empty);
    }
    let significant = escaped.chars().filter(|c| !c.is_whitespace()).count();
    if significant < min_chars {
        return Err(FieldError::TooShort { min: min_chars });
    }
    Ok(trimmed.to_string())
}

/// A form field as shown to the user: their value plus an optional inline error
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    pub value: String,
    pub error: Option<String>,
}

impl FieldState {
    fn ok(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            error: None,
        }
    }
}

/// Everything needed to (re)display the profile form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileForm {
    pub full_name: FieldState,
    pub organization: FieldState,
    pub location: FieldState,
    pub emails: Vec<FieldState>,
    /// Form-level error not tied to a single field
    pub error: Option<String>,
}

impl ProfileForm {
    pub fn error_count(&self) -> usize {
        [&self.full_name, &self.organization, &self.location]
            .into_iter()
            .chain(self.emails.iter())
            .filter(|f| f.error.is_some())
            .count()
            + usize::from(self.error.is_some())
    }
}

/// Parsed `POST /profile-edit` body
#[derive(Debug, Clone, Default)]
pub struct ProfileSubmission {
    pub full_name: String,
    pub organization: String,
    pub location: String,
    /// `email{i}` values keyed by `i`
    pub emails: BTreeMap<usize, String>,
    /// `i` for every `delete{i}` present
    pub deletes: HashSet<usize>,
    pub submit: bool,
}

impl ProfileSubmission {
    /// Build from urlencoded pairs; a missing text field is a malformed request
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, AppError> {
        let mut full_name = None;
        let mut organization = None;
        let mut location = None;
        let mut emails = BTreeMap::new();
        let mut deletes = HashSet::new();
        let mut submit = false;

        for (key, value) in pairs {
            match key.as_str() {
                "full_name" => full_name = Some(value.clone()),
                "organization" => organization = Some(value.clone()),
                "location" => location = Some(value.clone()),
                "submit" => submit = true,
                _ => {
                    if let Some(i) = key.strip_prefix("email").and_then(|n| n.parse().ok()) {
                        emails.insert(i, value.clone());
                    } else if let Some(i) = key.strip_prefix("delete").and_then(|n| n.parse().ok())
                    {
                        deletes.insert(i);
                    }
                }
            }
        }

        let require = |field: Option<String>, name: &str| {
            field.ok_or_else(|| AppError::MalformedRequest(format!("missing field `{}`", name)))
        };

        Ok(Self {
            full_name: require(full_name, "full_name")?,
            organization: require(organization, "organization")?,
            location: require(location, "location")?,
            emails,
            deletes,
            submit,
        })
    }
}

/// Result of handling a submission
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileOutcome {
    Saved(UserId),
    Redisplay(ProfileForm),
}

pub struct ProfileFlow<'a> {
    pub store: &'a dyn IdentityStore,
    pub min_field_chars: usize,
    pub user_id_start: UserId,
}

impl ProfileFlow<'_> {
    /// Form pre-filled from the stored record (or the login email for new users)
    pub async fn current_form(&self, session: &Session) -> Result<ProfileForm, StoreError> {
        match session.userid {
            UserSlot::Assigned(id) => {
                let record = self.store.load_record(id).await?.unwrap_or_default();
                let emails = self
                    .store
                    .emails_for(id)
                    .await?
                    .into_iter()
                    .map(FieldState::ok)
                    .collect();
                Ok(ProfileForm {
                    full_name: FieldState::ok(record.full_name),
                    organization: FieldState::ok(record.organization),
                    location: FieldState::ok(record.location),
                    emails,
                    error: None,
                })
            }
            _ => Ok(ProfileForm {
                emails: session.email.iter().cloned().map(FieldState::ok).collect(),
                ..Default::default()
            }),
        }
    }

    /// Validate `submission`; commit it when it is an Update without errors
    pub async fn submit(
        &self,
        session: &mut Session,
        submission: &ProfileSubmission,
    ) -> Result<ProfileOutcome, AppError> {
        let (form, emails) = self.validate(session, submission).await?;

        if !submission.submit || form.error_count() > 0 {
            return Ok(ProfileOutcome::Redisplay(form));
        }

        let user_id = self.commit(session, &form, &emails).await?;
        Ok(ProfileOutcome::Saved(user_id))
    }

    async fn validate(
        &self,
        session: &Session,
        submission: &ProfileSubmission,
    ) -> Result<(ProfileForm, Vec<String>), StoreError> {
        let text = |raw: &str| match check_text_field(raw, self.min_field_chars) {
            Ok(value) => FieldState::ok(value),
            Err(e) => FieldState {
                value: raw.trim().to_string(),
                error: Some(e.to_string()),
            },
        };

        let mut form = ProfileForm {
            full_name: text(&submission.full_name),
            organization: text(&submission.organization),
            location: text(&submission.location),
            emails: Vec::new(),
            error: None,
        };

        let own_id = session.userid.user_id();
        let mut accepted: Vec<String> = Vec::new();
        for (i, raw) in &submission.emails {
            if submission.deletes.contains(i) || raw.trim().is_empty() {
                continue;
            }
            match normalize_email(raw) {
                Ok(email) => {
                    if accepted.contains(&email) {
                        continue;
                    }
                    let owner = self.store.lookup(&email).await?;
                    let error = match owner {
                        Some(other) if Some(other) != own_id => {
                            Some("is already registered to another account".to_string())
                        }
                        _ => None,
                    };
                    if error.is_none() {
                        accepted.push(email.clone());
                    }
                    form.emails.push(FieldState {
                        value: email,
                        error,
                    });
                }
                Err(e) => form.emails.push(FieldState {
                    value: raw.trim().to_string(),
                    error: Some(e.to_string()),
                }),
            }
        }

        if form.emails.is_empty() {
            form.error = Some("At least one email address is required".to_string());
        }

        Ok((form, accepted))
    }

    async fn commit(
        &self,
        session: &mut Session,
        form: &ProfileForm,
        emails: &[String],
    ) -> Result<UserId, AppError> {
        let user_id = match session.userid {
            UserSlot::Assigned(id) => id,
            // The id stays reserved by its workspace directory even if the commit fails
            UserSlot::New => self.store.allocate_user_id(self.user_id_start).await?,
            UserSlot::Unassigned => {
                return Err(AppError::Config("profile saved without a login".to_string()))
            }
        };

        // Read before any write so an unreadable record leaves the index untouched
        let mut record: UserRecord = self.store.load_record(user_id).await?.unwrap_or_default();
        self.store.commit_emails(user_id, emails).await?;

        record.full_name = form.full_name.value.clone();
        record.organization = form.organization.value.clone();
        record.location = form.location.value.clone();
        if let Some(at) = session.confirmation_time {
            record
                .confirmation_time
                .entry(session.ipaddr.clone())
                .and_modify(|t| *t = (*t).max(at))
                .or_insert(at);
        }
        self.store.save_record(user_id, &record).await?;
        session.userid = UserSlot::Assigned(user_id);

        tracing::info!(user_id, emails = emails.len(), "Profile saved");
        Ok(user_id)
    }
}
