use std::io;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use ampchat_api::config::FeedSettings;
use ampchat_api::origin::{AllowList, OriginGuard};
use ampchat_api::routes::request_span;
use ampchat_api::{AppState, AppStateInner, router};
use ampchat_crypto::TokenCodec;
use ampchat_db::{Database, models::NewUser};

/// Collects formatted log output so the test can inspect it.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn request_logs_carry_the_path_but_not_the_token() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let db = Database::open_in_memory().unwrap();
    let alice = db
        .create_user(&NewUser { fullname: Some("Alice"), ..Default::default() })
        .unwrap();
    let chat = db.create_chat_room().unwrap();
    db.add_to_roster(chat, alice).unwrap();

    let state: AppState = Arc::new(AppStateInner {
        db,
        codec: TokenCodec::new(Some("logging-test-secret")),
        guard: OriginGuard::new(AllowList::new(["example.org"])),
        feed: FeedSettings::default(),
    });
    let token = state
        .codec
        .mint(alice, chat, chrono::Utc::now().timestamp() + 3600)
        .unwrap();
    let app = router(state).layer(TraceLayer::new_for_http().make_span_with(request_span));

    let valid = format!("/amp/chat/{}?{}", chat, token.query_string());
    let forged = format!("/amp/chat/{}?rt=deadbeefcafef00d&uid={}&exp=9999999999", chat, alice);
    for uri in [valid, forged] {
        let resp = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let output = logs.contents();
    assert!(output.contains(&format!("/amp/chat/{}", chat)), "no request span in:\n{output}");
    assert!(!output.contains(&token.signature), "signed token leaked:\n{output}");
    assert!(!output.contains("deadbeef"), "forged token leaked:\n{output}");
    assert!(!output.contains("rt="), "query string leaked:\n{output}");
}
