#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rocket::config::LogLevel;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::{Client, LocalResponse};
use serde_json::{json, Value};

use voting_backend::config::AppConfig;
use voting_backend::identity::{Claims, TokenVerifier};
use voting_backend::models::Role;
use voting_backend::store::{MemoryStore, SharedStore};

pub const SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub client: Client,
    pub store: Arc<MemoryStore>,
    verifier: TokenVerifier,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::memory(SECRET)).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: SharedStore = store.clone();
        let figment = rocket::Config::figment().merge(("log_level", LogLevel::Off));
        let rocket = voting_backend::build_with_store(figment, config, shared).expect("valid config");
        let client = Client::tracked(rocket).await.expect("valid rocket instance");
        let verifier = TokenVerifier::new(SECRET.as_bytes()).expect("valid secret");
        Self { client, store, verifier }
    }

    pub fn bearer(&self, subject: &str, role: Role, email_verified: bool) -> Header<'static> {
        let token = self.verifier.issue(&Claims {
            sub: subject.to_string(),
            role,
            email_verified,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        });
        Header::new("Authorization", format!("Bearer {token}"))
    }

    pub fn admin(&self) -> Header<'static> {
        self.bearer("admin-1", Role::Admin, true)
    }

    pub fn voter(&self, subject: &str) -> Header<'static> {
        self.bearer(subject, Role::Voter, true)
    }

    /// Creates a session through the admin API and asserts it succeeded.
    pub async fn create_session(&self, body: Value) -> Value {
        let response = self
            .client
            .post("/api/vote/sessions")
            .header(ContentType::JSON)
            .header(self.admin())
            .body(body.to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        json_body(response).await
    }

    /// Casts a ballot the way a browser would, with address and user agent.
    pub async fn cast(&self, auth: Header<'static>, body: Value) -> LocalResponse<'_> {
        let remote: SocketAddr = "203.0.113.7:51000".parse().expect("valid address");
        self.client
            .post("/api/vote/cast")
            .header(ContentType::JSON)
            .header(Header::new("User-Agent", "integration-test/1.0"))
            .header(auth)
            .remote(remote)
            .body(body.to_string())
            .dispatch()
            .await
    }
}

pub async fn json_body(response: LocalResponse<'_>) -> Value {
    response.into_json::<Value>().await.expect("JSON body")
}

/// Body of a session that is open now, with results announced at `announce`.
pub fn open_session(id: &str, announce: DateTime<Utc>) -> Value {
    let now = Utc::now();
    json!({
        "title": format!("Election {id}"),
        "sessionId": id,
        "candidates": [
            { "id": "alice", "name": "Alice" },
            { "id": "bob", "name": "Bob" }
        ],
        "votingStartTime": now - Duration::minutes(5),
        "votingEndTime": now + Duration::hours(1),
        "resultAnnouncementTime": announce,
    })
}
