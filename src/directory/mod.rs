//! Membership directory bridge
//!
//! The login flow talks to the directory through two traits: [`MemberDirectory`]
//! for the member record itself and [`SessionIssuer`] for turning a member id
//! into a session artifact. [`DirectoryClient`] implements both against the
//! directory's REST API.

pub mod candidates;
pub mod client;
pub mod upsert;

pub use candidates::{CandidateMethod, EndpointCandidate};
pub use client::{DirectoryClient, DirectoryConfig};
pub use upsert::{upsert_member, UpsertAction, UpsertOutcome, UpsertPolicy};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::AuthFlowError;
use crate::models::MemberRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("member not found")]
    NotFound,
    #[error("a member with this email already exists")]
    Conflict,
    #[error("directory request failed: {0}")]
    Unavailable(String),
    #[error("unexpected directory response: {0}")]
    InvalidResponse(String),
}

impl From<DirectoryError> for AuthFlowError {
    fn from(error: DirectoryError) -> Self {
        AuthFlowError::DirectoryUnavailable(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanConnection {
    #[serde(rename = "planId")]
    pub plan_id: String,
}

/// Member creation payload
#[derive(Clone, Serialize, PartialEq)]
pub struct NewMember {
    pub email: String,
    pub password: String,
    #[serde(rename = "firstName", skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(rename = "lastName", skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(rename = "customFields")]
    pub custom_fields: Map<String, Value>,
    /// Free-form metadata; carries the IdP subject and display name
    pub json: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<PlanConnection>,
}

impl std::fmt::Debug for NewMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewMember")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("custom_fields", &self.custom_fields)
            .field("plans", &self.plans)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemberUpdate {
    #[serde(rename = "customFields")]
    pub custom_fields: Map<String, Value>,
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// `Ok(None)` when no member has this email
    async fn find_by_email(
        &self,
        email: &str,
        correlation_id: &str,
    ) -> Result<Option<MemberRecord>, DirectoryError>;

    async fn create(
        &self,
        member: &NewMember,
        correlation_id: &str,
    ) -> Result<MemberRecord, DirectoryError>;

    async fn update(
        &self,
        member_id: &str,
        update: &MemberUpdate,
        correlation_id: &str,
    ) -> Result<MemberRecord, DirectoryError>;
}

/// Issues session artifacts for an existing member
///
/// Implementations log their own failures; `None` means the mechanism is not
/// available for this member right now.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue_session_token(&self, member_id: &str, correlation_id: &str) -> Option<String>;

    async fn issue_magic_link(
        &self,
        member_id: &str,
        destination: &str,
        correlation_id: &str,
    ) -> Option<String>;
}
