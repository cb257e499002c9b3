//! Mock objects and fake implementations for testing
//!
//! An in-memory member directory, a scripted session issuer, and a wiremock
//! identity provider serving discovery, JWKS and token endpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::directory::{DirectoryError, MemberDirectory, MemberUpdate, NewMember, SessionIssuer};
use crate::models::MemberRecord;

use super::fixtures::{TestFixtures, TEST_RSA_KID};

/// Member directory keyed by email, with switchable failure modes
#[derive(Default)]
pub struct InMemoryDirectory {
    members: Mutex<HashMap<String, MemberRecord>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    hide_next_lookup: AtomicBool,
    fail_lookups: AtomicBool,
    fail_updates: AtomicBool,
    correlation_ids: Mutex<Vec<String>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_member(&self, id: &str, email: &str) {
        self.members.lock().unwrap().insert(
            email.to_string(),
            MemberRecord {
                id: id.to_string(),
                email: email.to_string(),
                custom_fields: serde_json::Map::new(),
            },
        );
    }

    /// Make the next lookup miss, as if another login created the member
    /// between lookup and create
    pub fn hide_next_lookup(&self) {
        self.hide_next_lookup.store(true, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    pub fn member(&self, email: &str) -> Option<MemberRecord> {
        self.members.lock().unwrap().get(email).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Correlation ids of every call, in order
    pub fn correlation_ids(&self) -> Vec<String> {
        self.correlation_ids.lock().unwrap().clone()
    }

    fn record_call(&self, correlation_id: &str) {
        self.correlation_ids
            .lock()
            .unwrap()
            .push(correlation_id.to_string());
    }
}

#[async_trait]
impl MemberDirectory for InMemoryDirectory {
    async fn find_by_email(
        &self,
        email: &str,
        correlation_id: &str,
    ) -> Result<Option<MemberRecord>, DirectoryError> {
        self.record_call(correlation_id);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("lookup disabled".to_string()));
        }
        if self.hide_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.member(email))
    }

    async fn create(
        &self,
        member: &NewMember,
        correlation_id: &str,
    ) -> Result<MemberRecord, DirectoryError> {
        self.record_call(correlation_id);
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut members = self.members.lock().unwrap();
        if members.contains_key(&member.email) {
            return Err(DirectoryError::Conflict);
        }

        let id = format!("mem_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = MemberRecord {
            id,
            email: member.email.clone(),
            custom_fields: member.custom_fields.clone(),
        };
        members.insert(member.email.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        member_id: &str,
        update: &MemberUpdate,
        correlation_id: &str,
    ) -> Result<MemberRecord, DirectoryError> {
        self.record_call(correlation_id);
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("update disabled".to_string()));
        }

        let mut members = self.members.lock().unwrap();
        let record = members
            .values_mut()
            .find(|record| record.id == member_id)
            .ok_or(DirectoryError::NotFound)?;
        record.custom_fields.clone_from(&update.custom_fields);
        Ok(record.clone())
    }
}

/// Session issuer returning fixed artifacts and counting calls
#[derive(Default)]
pub struct ScriptedSessionIssuer {
    token: Option<String>,
    magic_link: Option<String>,
    token_calls: AtomicUsize,
    magic_link_calls: AtomicUsize,
    last_destination: Mutex<Option<String>>,
}

impl ScriptedSessionIssuer {
    #[must_use]
    pub fn new(token: Option<&str>, magic_link: Option<&str>) -> Self {
        Self {
            token: token.map(ToString::to_string),
            magic_link: magic_link.map(ToString::to_string),
            ..Self::default()
        }
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn magic_link_calls(&self) -> usize {
        self.magic_link_calls.load(Ordering::SeqCst)
    }

    pub fn last_destination(&self) -> Option<String> {
        self.last_destination.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionIssuer for ScriptedSessionIssuer {
    async fn issue_session_token(&self, _member_id: &str, _correlation_id: &str) -> Option<String> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.token.clone()
    }

    async fn issue_magic_link(
        &self,
        _member_id: &str,
        destination: &str,
        _correlation_id: &str,
    ) -> Option<String> {
        self.magic_link_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_destination.lock().unwrap() = Some(destination.to_string());
        self.magic_link.clone()
    }
}

/// Wiremock identity provider
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    /// Start a provider serving discovery and JWKS
    pub async fn start() -> Self {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(Self::discovery_document(&server.uri())),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestFixtures::jwks_json()))
            .mount(&server)
            .await;

        Self { server }
    }

    #[must_use]
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    #[must_use]
    pub fn discovery_document(base: &str) -> Value {
        json!({
            "issuer": "https://login.example.com/{tenantid}/v2.0",
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/keys"),
        })
    }

    /// Answer the code exchange for `code` with an ID token signed over `claims`
    pub async fn issue_id_token(&self, code: &str, claims: &Value) {
        let id_token = TestFixtures::sign_rs256(claims, TEST_RSA_KID);
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": id_token,
            })))
            .mount(&self.server)
            .await;
    }

    /// Reject the code exchange with an OAuth error body
    pub async fn reject_code(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: The provided authorization code has expired.",
            })))
            .mount(&self.server)
            .await;
    }
}
