use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Extension;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use problemdesk::config::{AppConfig, SessionBackend};
use problemdesk::identity::{FileIdentityStore, IdentityStore};
use problemdesk::mailer::CapturingMailer;
use problemdesk::routes;
use problemdesk::session::{MemorySessionStore, SESSION_COOKIE};
use problemdesk::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const EMAIL: &str = "ada@example.org";
const BOUNDARY: &str = "XPROBLEMDESKBOUNDARY";

struct TestApp {
    dir: TempDir,
    app: Router,
    mailer: CapturingMailer,
    identity: Arc<FileIdentityStore>,
    cookie: Option<String>,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            session_backend: SessionBackend::Memory,
            ..Default::default()
        };
        tweak(&mut config);

        let identity = Arc::new(FileIdentityStore::new(dir.path()));
        identity.init().await.unwrap();
        let mailer = CapturingMailer::new();

        let state = Arc::new(AppState::new(
            config,
            identity.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(mailer.clone()),
        ));
        let app = routes::router(state, dir.path().join("static"))
            .layer(Extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000)))));

        Self {
            dir,
            app,
            mailer,
            identity,
            cookie: None,
        }
    }

    async fn send(&mut self, mut req: Request<Body>) -> Response<Body> {
        if let Some(cookie) = &self.cookie {
            req.headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }
        let resp = self.app.clone().oneshot(req).await.unwrap();
        for value in resp.headers().get_all(header::SET_COOKIE) {
            let pair = value.to_str().unwrap().split(';').next().unwrap().to_string();
            if pair.ends_with('=') {
                self.cookie = None;
            } else if pair.starts_with(SESSION_COOKIE) {
                self.cookie = Some(pair);
            }
        }
        resp
    }

    async fn get(&mut self, path: &str) -> Response<Body> {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        self.send(req).await
    }

    async fn post_form(&mut self, path: &str, body: &str) -> Response<Body> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    async fn post_multipart(
        &mut self,
        fields: &[(&str, &str)],
        file: Option<(&str, &[u8])>,
    ) -> Response<Body> {
        let mut body: Vec<u8> = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/problem")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(req).await
    }

    /// Enter the email and confirm with the mailed code
    async fn log_in(&mut self, email: &str) -> Response<Body> {
        let resp = self.post_form("/login", &format!("email={}", email)).await;
        if resp.status() == StatusCode::SEE_OTHER {
            return resp;
        }
        assert_eq!(resp.status(), StatusCode::OK);
        let code = self.mailer.last_code_for(email).await.expect("code sent");
        self.post_form("/login", &format!("confirm={}", code)).await
    }

    async fn save_profile(&mut self) -> Response<Body> {
        self.post_form(
            "/profile-edit",
            "full_name=Ada+Lovelace&organization=Analytical+Engines&location=London&email0=ada%40example.org&submit=Update",
        )
        .await
    }
}

async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn location(resp: &Response<Body>) -> &str {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// End-to-end: new user registers, creates problems, uploads, then logs in again
#[tokio::test]
async fn test_full_registration_flow() {
    let mut t = TestApp::new().await;

    // 1. First visit gets a session and the email prompt
    let resp = t.get("/login").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(t.cookie.is_some(), "session cookie should be set");
    assert!(body_text(resp).await.contains("name=\"email\""));

    // 2. Enter email
    let resp = t.post_form("/login", "email=Ada%40Example.org").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("name=\"confirm\""));

    // 3. Wrong code is rejected and a new one is mailed
    assert!(t.mailer.last_code_for(EMAIL).await.is_some());
    let resp = t.post_form("/login", "confirm=WRONG0").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("did not match"));
    assert_eq!(t.mailer.sent_count().await, 2);

    // 4. Correct (latest) code confirms a new user -> profile
    let code = t.mailer.last_code_for(EMAIL).await.unwrap();
    let resp = t.post_form("/login", &format!("confirm={}", code)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/profile-edit");

    // Problems are off limits until the profile exists
    let resp = t.get("/problem").await;
    assert_eq!(location(&resp), "/profile-edit");

    // 5. Profile form is pre-filled with the login email
    let resp = t.get("/profile-edit").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("value=\"ada@example.org\""));

    // 6. Too-short name is reported inline
    let resp = t
        .post_form(
            "/profile-edit",
            "full_name=Abcd&organization=Analytical+Engines&location=London&email0=ada%40example.org&submit=Update",
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let page = body_text(resp).await;
    assert!(page.contains("too short"));
    assert!(page.contains("value=\"Abcd\""));
    assert_eq!(t.identity.lookup(EMAIL).await.unwrap(), None);

    // 7. Valid profile commits and redirects
    let resp = t.save_profile().await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/problem");
    assert_eq!(t.identity.lookup(EMAIL).await.unwrap(), Some(1));
    let record = t.identity.load_record(1).await.unwrap().unwrap();
    assert_eq!(record.full_name, "Ada Lovelace");
    assert!(record.confirmed_at("10.0.0.1").is_some());

    // 8. Problem page
    let resp = t.get("/problem").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("no problems yet"));

    let resp = t.post_multipart(&[("new_problem", "heat")], None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("Created problem heat"));
    assert!(t.dir.path().join("users/user1/heat").is_dir());

    let resp = t.post_multipart(&[("new_problem", "123")], None).await;
    assert!(body_text(resp).await.contains("at least one letter"));

    let resp = t.post_multipart(&[("new_problem", "heat")], None).await;
    assert!(body_text(resp).await.contains("already exists"));

    // 9. Upload is echoed back escaped
    let resp = t
        .post_multipart(&[("upload", "1")], Some(("../mesh.txt", b"a < b")))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let page = body_text(resp).await;
    assert!(page.contains("<pre>a &lt; b</pre>"));
    assert!(page.contains("mesh.txt"));
    let stored = std::fs::read_dir(t.dir.path().join("uploads/user1")).unwrap().count();
    assert_eq!(stored, 2, "data file plus metadata sidecar");

    // 10. Log out, log back in from the same address: auto-confirmed
    let resp = t.get("/logout").await;
    assert_eq!(location(&resp), "/login");
    let sent_before = t.mailer.sent_count().await;
    let resp = t.post_form("/login", "email=ada%40example.org").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/problem");
    assert_eq!(t.mailer.sent_count().await, sent_before);

    // 11. Login log has one failure and one success
    let log = std::fs::read_to_string(t.dir.path().join("admin/login.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(",FAILED"));
    assert!(lines[1].starts_with("ada@example.org,"));
}

#[tokio::test]
async fn test_invalid_email_is_reprompted() {
    let mut t = TestApp::new().await;
    let resp = t.post_form("/login", "email=not+an+email").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let page = body_text(resp).await;
    assert!(page.contains("illegal characters"));
    assert!(page.contains("name=\"email\""));
    assert_eq!(t.mailer.sent_count().await, 0);
}

#[tokio::test]
async fn test_confirm_twice_redirects_without_changing_time() {
    let mut t = TestApp::new().await;
    t.identity
        .commit_emails(5, &[EMAIL.to_string()])
        .await
        .unwrap();

    let resp = t.log_in(EMAIL).await;
    assert_eq!(location(&resp), "/problem");
    let first = t
        .identity
        .load_record(5)
        .await
        .unwrap()
        .unwrap()
        .confirmed_at("10.0.0.1");

    let code = t.mailer.last_code_for(EMAIL).await.unwrap();
    let resp = t.post_form("/login", &format!("confirm={}", code)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let second = t
        .identity
        .load_record(5)
        .await
        .unwrap()
        .unwrap()
        .confirmed_at("10.0.0.1");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unsupported_method_is_malformed() {
    let mut t = TestApp::new().await;
    let req = Request::builder()
        .method(Method::PUT)
        .uri("/login")
        .body(Body::empty())
        .unwrap();
    let resp = t.send(req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("Malformed request"));
}

#[tokio::test]
async fn test_login_post_without_fields_is_malformed() {
    let mut t = TestApp::new().await;
    let resp = t.post_form("/login", "").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_post_missing_field_is_malformed() {
    let mut t = TestApp::new().await;
    t.log_in(EMAIL).await;
    let resp = t
        .post_form("/profile-edit", "full_name=Ada+Lovelace&submit=Update")
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("organization"));
}

#[tokio::test]
async fn test_pages_require_login() {
    let mut t = TestApp::new().await;
    let resp = t.get("/problem").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    let resp = t.get("/profile-edit").await;
    assert_eq!(location(&resp), "/login");

    let resp = t.get("/").await;
    assert_eq!(location(&resp), "/login");
}

#[tokio::test]
async fn test_problem_post_is_gated_before_body_is_read() {
    let mut t = TestApp::new().await;
    // Body is not valid multipart; an unconfirmed session never gets that far
    let req = Request::builder()
        .method(Method::POST)
        .uri("/problem")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from("not multipart at all"))
        .unwrap();
    let resp = t.send(req).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    // Once logged in, the same body is read and rejected
    t.identity
        .commit_emails(3, &[EMAIL.to_string()])
        .await
        .unwrap();
    let resp = t.log_in(EMAIL).await;
    assert_eq!(location(&resp), "/problem");
    let req = Request::builder()
        .method(Method::POST)
        .uri("/problem")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from("not multipart at all"))
        .unwrap();
    let resp = t.send(req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_client_address_is_system_error() {
    let t = TestApp::new().await;
    let dir = TempDir::new().unwrap();
    let state = Arc::new(AppState::new(
        AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
        t.identity.clone(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(t.mailer.clone()),
    ));
    let app = routes::router(state, dir.path());
    let resp = app
        .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(resp).await.starts_with("System error"));
}

#[tokio::test]
async fn test_corrupt_record_is_system_error() {
    let mut t = TestApp::new().await;
    t.identity
        .commit_emails(9, &[EMAIL.to_string()])
        .await
        .unwrap();
    std::fs::write(t.dir.path().join("admin/user9.json"), "{not json").unwrap();

    let resp = t.post_form("/login", "email=ada%40example.org").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(resp).await.contains("Corrupt record for user 9"));
    assert_eq!(
        std::fs::read_to_string(t.dir.path().join("admin/user9.json")).unwrap(),
        "{not json"
    );
}

#[tokio::test]
async fn test_login_rate_limit() {
    let mut t = TestApp::with_config(|c| {
        c.login_rate_limit = Some((2, std::time::Duration::from_secs(60)));
    })
    .await;

    assert_eq!(
        t.post_form("/login", "email=ada%40example.org").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        t.post_form("/login", "confirm=AAAAAA").await.status(),
        StatusCode::OK
    );
    let resp = t.post_form("/login", "confirm=BBBBBB").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    // Page views are not limited
    assert_eq!(t.get("/login").await.status(), StatusCode::OK);
}
