use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tower::ServiceExt;
use tower_cookies::{CookieManagerLayer, Cookies};
use tracing_subscriber::{Layer, layer::{Context, SubscriberExt}};

use sesh::{
    AuthContext, CurrentSession, MemoryStore, SessionCookie, SessionError, SessionEvent,
    SessionGate, SessionPolicy, UserSessions, require_session,
    testing::{MemoryUserDelegate, RecordingEventSink, TestUser},
};

struct Harness {
    delegate: Arc<MemoryUserDelegate>,
    events: Arc<RecordingEventSink>,
    sessions: UserSessions<MemoryUserDelegate>,
    cookie: SessionCookie,
    hit: Arc<AtomicBool>,
}

impl Harness {
    fn new(timeout: Duration) -> Self {
        let delegate = Arc::new(MemoryUserDelegate::new());
        let events = Arc::new(RecordingEventSink::new());
        let policy = SessionPolicy::new(Arc::new(MemoryStore::new()), timeout)
            .with_event_sink(events.clone());

        Self {
            sessions: UserSessions::new(policy, delegate.clone()),
            delegate,
            events,
            cookie: SessionCookie::default(),
            hit: Arc::new(AtomicBool::new(false)),
        }
    }

    fn gate(&self) -> SessionGate<MemoryUserDelegate> {
        SessionGate::new(self.sessions.clone(), self.cookie.clone())
    }

    fn router(&self, gate: SessionGate<MemoryUserDelegate>) -> Router {
        let hit = self.hit.clone();
        let sessions = self.sessions.clone();
        let cookie = self.cookie.clone();

        let gated = Router::new()
            .route(
                "/private",
                get(move |context: AuthContext<TestUser>| {
                    let hit = hit.clone();
                    async move {
                        hit.store(true, Ordering::SeqCst);
                        context.user().username.clone()
                    }
                }),
            )
            .route(
                "/session",
                get(|CurrentSession(session): CurrentSession| async move { session.account_id }),
            )
            .route(
                "/logout",
                post(move |cookies: Cookies, context: AuthContext<TestUser>| {
                    let sessions = sessions.clone();
                    let cookie = cookie.clone();
                    async move {
                        sessions.user_did_logout(&context).await?;
                        cookie.clear(&cookies);
                        Ok::<_, SessionError>(StatusCode::OK)
                    }
                }),
            )
            .route_layer(from_fn_with_state(gate, require_session::<MemoryUserDelegate>));

        Router::new()
            .merge(gated)
            .route(
                "/ungated",
                get(|context: AuthContext<TestUser>| async move { context.user().id.clone() }),
            )
            .layer(CookieManagerLayer::new())
    }

    fn app(&self) -> Router {
        self.router(self.gate())
    }

    fn handler_ran(&self) -> bool {
        self.hit.load(Ordering::SeqCst)
    }
}

/// Counts `ERROR` events.
#[derive(Clone, Default)]
struct ErrorCounter(Arc<AtomicUsize>);

impl ErrorCounter {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn get_with_cookie(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn missing_unknown_and_expired_sessions_are_indistinguishable() {
    let live = Harness::new(Duration::minutes(5));
    let stale = Harness::new(Duration::seconds(-5));
    let user = stale.delegate.insert("1", "wilbur");
    let expired_key = stale.sessions.user_did_authenticate(&user).await.unwrap();
    let expired_cookie = format!("{}={}", stale.cookie.name(), expired_key.expose());

    let missing = live
        .app()
        .oneshot(get_with_cookie("/private", None))
        .await
        .unwrap();
    let unknown = live
        .app()
        .oneshot(get_with_cookie("/private", Some("sesh-session-key=deadbeef")))
        .await
        .unwrap();
    let expired = stale
        .app()
        .oneshot(get_with_cookie("/private", Some(&expired_cookie)))
        .await
        .unwrap();

    let mut bodies = Vec::new();
    for response in [missing, unknown, expired] {
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        bodies.push(body_string(response).await);
    }
    assert_eq!(bodies[0], r#"{"error":"Unauthorized"}"#);
    assert!(bodies.iter().all(|body| body == &bodies[0]));

    assert!(!live.handler_ran());
    assert!(!stale.handler_ran());
    assert_eq!(live.events.matching(SessionEvent::SessionNotFound).len(), 1);
    assert_eq!(stale.events.matching(SessionEvent::SessionExpired).len(), 1);
}

#[tokio::test]
async fn empty_cookie_counts_as_no_session() {
    let harness = Harness::new(Duration::minutes(5));

    let response = harness
        .app()
        .oneshot(get_with_cookie("/private", Some("sesh-session-key=")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(harness.events.all().is_empty());
}

#[tokio::test]
async fn valid_session_reaches_the_handler_with_its_user() {
    let harness = Harness::new(Duration::minutes(5));
    let user = harness.delegate.insert("42", "some-pig");

    let mut request = get_with_cookie("/private", None);
    harness
        .sessions
        .authenticate_test_request(&mut request, &user, &harness.cookie)
        .await
        .unwrap();

    let response = harness.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "some-pig");
    assert!(harness.handler_ran());
}

#[tokio::test]
async fn current_session_extractor_sees_the_account() {
    let harness = Harness::new(Duration::minutes(5));
    let user = harness.delegate.insert("17", "fern");

    let mut request = get_with_cookie("/session", None);
    harness
        .sessions
        .authenticate_test_request(&mut request, &user, &harness.cookie)
        .await
        .unwrap();

    let response = harness.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "17");
}

#[tokio::test]
async fn identity_fetch_failure_is_a_server_error() {
    let harness = Harness::new(Duration::minutes(5));
    let user = harness.delegate.insert("5", "templeton");

    let mut request = get_with_cookie("/private", None);
    harness
        .sessions
        .authenticate_test_request(&mut request, &user, &harness.cookie)
        .await
        .unwrap();
    harness.delegate.remove("5");

    let response = harness.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, r#"{"error":"Internal server error"}"#);
    assert!(!harness.handler_ran());
}

#[tokio::test]
async fn unexpected_gate_failures_are_logged_once() {
    let errors = ErrorCounter::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(errors.clone()));

    let harness = Harness::new(Duration::minutes(5));
    let user = harness.delegate.insert("8", "fern");
    let mut request = get_with_cookie("/private", None);
    harness
        .sessions
        .authenticate_test_request(&mut request, &user, &harness.cookie)
        .await
        .unwrap();
    harness.delegate.remove("8");

    let response = harness.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn custom_rejection_handler_receives_the_typed_cause() {
    let harness = Harness::new(Duration::minutes(5));
    let gate = harness.gate().with_rejection_handler(|error| match error {
        SessionError::NoSession => Redirect::to("/login").into_response(),
        other => other.into_response(),
    });

    let redirected = harness
        .router(gate.clone())
        .oneshot(get_with_cookie("/private", None))
        .await
        .unwrap();
    assert_eq!(redirected.status(), StatusCode::SEE_OTHER);
    assert_eq!(redirected.headers()[header::LOCATION], "/login");

    let unknown = harness
        .router(gate)
        .oneshot(get_with_cookie("/private", Some("sesh-session-key=deadbeef")))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert!(!harness.handler_ran());
}

#[tokio::test]
async fn auth_context_outside_a_gate_is_a_server_error() {
    let harness = Harness::new(Duration::minutes(5));

    let response = harness
        .app()
        .oneshot(get_with_cookie("/ungated", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn logout_clears_the_cookie_and_the_session() {
    let harness = Harness::new(Duration::minutes(5));
    let user = harness.delegate.insert("8", "charlotte");
    let key = harness.sessions.user_did_authenticate(&user).await.unwrap();
    let cookie = format!("sesh-session-key={}", key.expose());

    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("sesh-session-key=;"));
    assert!(set_cookie.contains("Max-Age=-1"));
    assert!(set_cookie.contains("Path=/"));
    assert_eq!(harness.delegate.pointer("8"), None);
    assert_eq!(harness.events.matching(SessionEvent::SessionDestroyed).len(), 1);

    let after = harness
        .app()
        .oneshot(get_with_cookie("/private", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn second_login_locks_out_the_first_device() {
    let harness = Harness::new(Duration::minutes(5));
    let user = harness.delegate.insert("11", "avery");

    let first = harness.sessions.user_did_authenticate(&user).await.unwrap();
    let second = harness.sessions.user_did_authenticate(&user).await.unwrap();

    let old_device = harness
        .app()
        .oneshot(get_with_cookie(
            "/private",
            Some(&format!("sesh-session-key={}", first.expose())),
        ))
        .await
        .unwrap();
    let new_device = harness
        .app()
        .oneshot(get_with_cookie(
            "/private",
            Some(&format!("sesh-session-key={}", second.expose())),
        ))
        .await
        .unwrap();

    assert_eq!(old_device.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(new_device.status(), StatusCode::OK);
    assert_eq!(harness.delegate.pointer("11"), Some(second.pointer()));

    let displaced = harness
        .events
        .only_matching(SessionEvent::ConcurrentLoginDisplaced)
        .unwrap();
    assert_eq!(displaced.fields["session_hash"], first.hash());
    assert_eq!(displaced.fields["account_id"], "11");
}
