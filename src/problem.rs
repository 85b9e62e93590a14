//! Problem selection: list, create and select per-user problem directories,
//! and accept file uploads into the user's workspace.

use crate::error::StoreError;
use crate::identity::{CreateProblem, IdentityStore};
use crate::session::Session;
use crate::types::{UploadRecord, UserId};
use crate::validate::check_problem_name;

/// A file part received from the browser
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Fields of a `POST /problem` submission
#[derive(Debug, Clone, Default)]
pub struct ProblemSubmission {
    pub goto_problem: bool,
    pub new_problem: Option<String>,
    pub problem: Option<String>,
    pub upload: bool,
    pub file: Option<UploadedFile>,
}

/// What the problem page shows after handling a request
#[derive(Debug, Clone, Default)]
pub struct ProblemView {
    pub problems: Vec<String>,
    pub selected: Option<String>,
    pub notices: Vec<String>,
    pub errors: Vec<String>,
    /// Stored upload and its contents, echoed back
    pub upload: Option<(UploadRecord, Vec<u8>)>,
}

pub struct ProblemFlow<'a> {
    pub store: &'a dyn IdentityStore,
}

impl ProblemFlow<'_> {
    pub async fn view(&self, session: &Session, user_id: UserId) -> Result<ProblemView, StoreError> {
        let problems = self.store.list_problems(user_id).await?;
        let selected = session
            .problem
            .clone()
            .filter(|p| problems.contains(p));
        Ok(ProblemView {
            problems,
            selected,
            ..Default::default()
        })
    }

    /// Apply one submission. `new_problem` wins over `problem` when both are given.
    pub async fn submit(
        &self,
        session: &mut Session,
        user_id: UserId,
        submission: ProblemSubmission,
    ) -> Result<ProblemView, StoreError> {
        let mut notices = Vec::new();
        let mut errors = Vec::new();

        let new_name = submission
            .new_problem
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let picked = submission
            .problem
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(raw) = new_name {
            match check_problem_name(raw) {
                Err(e) => errors.push(format!("{}: \"{}\"", e, raw)),
                Ok(name) => match self.store.create_problem(user_id, name).await? {
                    CreateProblem::Created => {
                        session.problem = Some(name.to_string());
                        notices.push(format!("Created problem {}", name));
                    }
                    CreateProblem::AlreadyExists => {
                        errors.push(format!("Problem {} already exists", name));
                    }
                },
            }
        } else if let Some(raw) = picked {
            let known = self.store.list_problems(user_id).await?;
            match check_problem_name(raw) {
                Ok(name) if known.iter().any(|p| p == name) => {
                    session.problem = Some(name.to_string());
                    if submission.goto_problem {
                        notices.push(format!("Working on problem {}", name));
                    }
                }
                _ => errors.push(format!("Unknown problem \"{}\"", raw)),
            }
        } else if submission.goto_problem {
            errors.push("Select a problem first".to_string());
        }

        let mut upload = None;
        if submission.upload {
            match submission.file {
                Some(file) if !file.file_name.is_empty() => {
                    let record = self
                        .store
                        .store_upload(user_id, &file.file_name, session.problem.as_deref(), &file.data)
                        .await?;
                    notices.push(format!(
                        "Uploaded {} ({} bytes)",
                        record.original_name, record.size
                    ));
                    upload = Some((record, file.data));
                }
                _ => errors.push("No file was selected for upload".to_string()),
            }
        }

        let mut view = self.view(session, user_id).await?;
        view.notices = notices;
        view.errors = errors;
        view.upload = upload;
        Ok(view)
    }
}
