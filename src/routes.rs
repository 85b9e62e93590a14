//! Page handlers and router assembly

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::FormRejection,
        DefaultBodyLimit, State,
    },
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Extension, Form, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::error::AppError;
use crate::login::{ConfirmedAs, LoginError, LoginState};
use crate::pages;
use crate::problem::{ProblemSubmission, UploadedFile};
use crate::profile::{ProfileOutcome, ProfileSubmission};
use crate::session::{session_middleware, Session, SessionContext};
use crate::state::AppState;
use crate::throttle::login_rate_limit_middleware;
use crate::types::UserSlot;

/// Build the application router. Static assets are served from `static_dir`.
pub fn router(state: Arc<AppState>, static_dir: impl AsRef<Path>) -> Router {
    let pages = Router::new()
        .route("/", get(root))
        .route(
            "/login",
            get(login_page).post(login_submit).fallback(reject_method),
        )
        .route(
            "/profile-edit",
            get(profile_page).post(profile_submit).fallback(reject_method),
        )
        .route(
            "/problem",
            get(problem_page).post(problem_submit).fallback(reject_method),
        )
        .route("/logout", get(logout).post(logout).fallback(reject_method))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            login_rate_limit_middleware,
        ));

    Router::new()
        .merge(pages)
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Redirect {
    Redirect::to("/login")
}

async fn reject_method() -> AppError {
    AppError::MalformedRequest("only GET and POST are supported".to_string())
}

async fn logout(Extension(ctx): Extension<SessionContext>) -> Redirect {
    ctx.end();
    Redirect::to("/login")
}

/// Where a resolved login state sends the browser, or the login page to show
fn render_login(state: LoginState, session: &Session, error: Option<&str>) -> Response {
    match state {
        LoginState::AwaitingEmail => pages::login_email(error, "").into_response(),
        LoginState::AwaitingConfirmation => {
            pages::login_confirm(session.email.as_deref().unwrap_or_default(), error)
                .into_response()
        }
        LoginState::Confirmed(ConfirmedAs::NewUser) => Redirect::to("/profile-edit").into_response(),
        LoginState::Confirmed(ConfirmedAs::ReturningUser(_)) => {
            Redirect::to("/problem").into_response()
        }
    }
}

async fn login_page(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Response, AppError> {
    let mut session = ctx.lock().await;
    let login = state.login_flow().resolve(&mut session, Utc::now()).await?;
    Ok(render_login(login, &session, None))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: Option<String>,
    pub confirm: Option<String>,
}

async fn login_submit(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Response, AppError> {
    let Form(form) = form.map_err(|e| AppError::MalformedRequest(e.body_text()))?;
    let flow = state.login_flow();
    let now = Utc::now();
    let mut session = ctx.lock().await;

    // A new address restarts the flow even if a code was also sent
    let result = match (&form.email, &form.confirm) {
        (Some(email), _) => flow.begin(&mut session, email, now).await,
        (None, Some(code)) => flow.confirm(&mut session, code, now).await,
        (None, None) => {
            return Err(AppError::MalformedRequest(
                "expected field `email` or `confirm`".to_string(),
            ))
        }
    };

    match result {
        Ok(login) => Ok(render_login(login, &session, None)),
        Err(LoginError::Store(e)) => Err(e.into()),
        Err(LoginError::InvalidEmail(e)) => {
            tracing::info!("Rejected email address: {}", e);
            let typed = form.email.as_deref().unwrap_or_default();
            Ok(pages::login_email(Some(&e.to_string()), typed).into_response())
        }
        Err(e) => {
            tracing::warn!(email = ?session.email, "Login attempt rejected: {}", e);
            let login = flow.resolve(&mut session, now).await?;
            let message = e.to_string();
            let error = (e.is_recoverable() && !matches!(e, LoginError::AlreadyConfirmed))
                .then_some(message.as_str());
            Ok(render_login(login, &session, error))
        }
    }
}

/// Redirect for sessions that may not see a page yet
async fn gate(
    state: &AppState,
    session: &mut Session,
    require_profile: bool,
) -> Result<Option<Response>, AppError> {
    match state.login_flow().resolve(session, Utc::now()).await? {
        LoginState::Confirmed(ConfirmedAs::NewUser) if require_profile => {
            Ok(Some(Redirect::to("/profile-edit").into_response()))
        }
        LoginState::Confirmed(_) => Ok(None),
        _ => Ok(Some(Redirect::to("/login").into_response())),
    }
}

async fn profile_page(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Response, AppError> {
    let mut session = ctx.lock().await;
    if let Some(redirect) = gate(&state, &mut session, false).await? {
        return Ok(redirect);
    }
    let form = state.profile_flow().current_form(&session).await?;
    Ok(pages::profile(&form, session.userid == UserSlot::New).into_response())
}

async fn profile_submit(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Result<Response, AppError> {
    let Form(pairs) = form.map_err(|e| AppError::MalformedRequest(e.body_text()))?;
    let mut session = ctx.lock().await;
    if let Some(redirect) = gate(&state, &mut session, false).await? {
        return Ok(redirect);
    }

    let submission = ProfileSubmission::from_pairs(&pairs)?;
    let first_time = session.userid == UserSlot::New;
    match state.profile_flow().submit(&mut session, &submission).await? {
        ProfileOutcome::Saved(_) => Ok(Redirect::to("/problem").into_response()),
        ProfileOutcome::Redisplay(form) => Ok(pages::profile(&form, first_time).into_response()),
    }
}

async fn problem_page(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Response, AppError> {
    let mut session = ctx.lock().await;
    if let Some(redirect) = gate(&state, &mut session, true).await? {
        return Ok(redirect);
    }
    let Some(user_id) = session.userid.user_id() else {
        return Ok(Redirect::to("/login").into_response());
    };
    let view = state.problem_flow().view(&session, user_id).await?;
    let email = session.email.clone().unwrap_or_default();
    Ok(pages::problems(&view, &email).into_response())
}

/// Strip any directory part a browser may send along with the file name
fn base_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim()
}

async fn read_problem_submission(mut multipart: Multipart) -> Result<ProblemSubmission, AppError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        AppError::MalformedRequest(format!("unreadable form data: {}", e.body_text()))
    };

    let mut submission = ProblemSubmission::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "goto_problem" => submission.goto_problem = true,
            "upload" => submission.upload = true,
            "new_problem" => submission.new_problem = Some(field.text().await.map_err(malformed)?),
            "problem" => submission.problem = Some(field.text().await.map_err(malformed)?),
            "file" => {
                let file_name = base_name(field.file_name().unwrap_or_default()).to_string();
                let data = field.bytes().await.map_err(malformed)?;
                submission.file = Some(UploadedFile {
                    file_name,
                    data: data.to_vec(),
                });
            }
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }
    Ok(submission)
}

async fn problem_submit(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let mut session = ctx.lock().await;
    if let Some(redirect) = gate(&state, &mut session, true).await? {
        return Ok(redirect);
    }
    let Some(user_id) = session.userid.user_id() else {
        return Ok(Redirect::to("/login").into_response());
    };

    // Only a logged-in user's upload is read off the wire
    let multipart = multipart.map_err(|e| AppError::MalformedRequest(e.body_text()))?;
    let submission = read_problem_submission(multipart).await?;

    let view = state
        .problem_flow()
        .submit(&mut session, user_id, submission)
        .await?;
    let email = session.email.clone().unwrap_or_default();
    Ok(pages::problems(&view, &email).into_response())
}
