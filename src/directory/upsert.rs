use serde_json::{json, Map, Value};

use crate::directory::{DirectoryError, MemberDirectory, MemberUpdate, NewMember, PlanConnection};
use crate::error::AuthFlowError;
use crate::models::{MemberRecord, NormalizedProfile};
use crate::settings::DirectorySettings;
use crate::utils::crypto::generate_member_password;
use crate::utils::logging::LoggingHelper;

const MEMBER_PASSWORD_LENGTH: usize = 24;

/// How a verified profile is mapped onto a directory member
#[derive(Debug, Clone)]
pub struct UpsertPolicy {
    pub default_plan_id: Option<String>,
    /// Custom attribute slot mirroring the given name
    pub first_name_field: String,
    /// Custom attribute slot mirroring the family name
    pub last_name_field: String,
}

impl UpsertPolicy {
    #[must_use]
    pub fn from_settings(settings: &DirectorySettings) -> Self {
        Self {
            default_plan_id: settings
                .default_plan_id
                .clone()
                .filter(|plan| !plan.trim().is_empty()),
            first_name_field: settings.first_name_field.clone(),
            last_name_field: settings.last_name_field.clone(),
        }
    }

    fn name_fields<'p>(&self, profile: &'p NormalizedProfile) -> [(&str, &'p str); 2] {
        [
            (self.first_name_field.as_str(), profile.given_name.as_str()),
            (self.last_name_field.as_str(), profile.family_name.as_str()),
        ]
    }

    #[must_use]
    pub fn new_member(&self, profile: &NormalizedProfile) -> NewMember {
        let custom_fields: Map<String, Value> = self
            .name_fields(profile)
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(field, value)| (field.to_string(), json!(value)))
            .collect();

        NewMember {
            email: profile.email.clone(),
            password: generate_member_password(MEMBER_PASSWORD_LENGTH),
            first_name: profile.given_name.clone(),
            last_name: profile.family_name.clone(),
            custom_fields,
            json: json!({
                "idp_sub": profile.subject,
                "name": profile.display_name,
            }),
            plans: self
                .default_plan_id
                .iter()
                .map(|plan_id| PlanConnection {
                    plan_id: plan_id.clone(),
                })
                .collect(),
        }
    }

    /// Custom fields after synchronizing names, or `None` when nothing changes
    ///
    /// Existing keys are kept; only non-empty name values overwrite.
    #[must_use]
    pub fn merged_fields(
        &self,
        existing: &Map<String, Value>,
        profile: &NormalizedProfile,
    ) -> Option<Map<String, Value>> {
        let mut merged = existing.clone();
        let mut changed = false;

        for (field, value) in self.name_fields(profile) {
            if value.is_empty() || existing.get(field).and_then(Value::as_str) == Some(value) {
                continue;
            }
            merged.insert(field.to_string(), json!(value));
            changed = true;
        }

        changed.then_some(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

impl UpsertAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub member: MemberRecord,
    pub action: UpsertAction,
}

/// Find or create the member for `profile`, keyed by its normalized email
///
/// A duplicate-email conflict on create means another login raced this one;
/// the member is re-fetched and the update path taken.
///
/// # Errors
///
/// Returns `DirectoryUnavailable` when lookup or create fails
pub async fn upsert_member(
    directory: &dyn MemberDirectory,
    profile: &NormalizedProfile,
    policy: &UpsertPolicy,
    correlation_id: &str,
) -> Result<UpsertOutcome, AuthFlowError> {
    if let Some(existing) = directory
        .find_by_email(&profile.email, correlation_id)
        .await? {
        return Ok(synchronize(directory, existing, profile, policy, correlation_id).await);
    }

    match directory
        .create(&policy.new_member(profile), correlation_id)
        .await {
        Ok(member) => Ok(UpsertOutcome {
            member,
            action: UpsertAction::Created,
        }),
        Err(DirectoryError::Conflict) => {
            log::info!(
                "[{}] Member already exists on create, re-fetching",
                correlation_id
            );
            let existing = directory
                .find_by_email(&profile.email, correlation_id)
                .await?
                .ok_or_else(|| {
                    AuthFlowError::DirectoryUnavailable(
                        "create reported a conflict but the member cannot be found".to_string(),
                    )
                })?;
            Ok(synchronize(directory, existing, profile, policy, correlation_id).await)
        }
        Err(e) => Err(e.into()),
    }
}

async fn synchronize(
    directory: &dyn MemberDirectory,
    existing: MemberRecord,
    profile: &NormalizedProfile,
    policy: &UpsertPolicy,
    correlation_id: &str,
) -> UpsertOutcome {
    let Some(custom_fields) = policy.merged_fields(&existing.custom_fields, profile) else {
        return UpsertOutcome {
            member: existing,
            action: UpsertAction::Unchanged,
        };
    };

    match directory
        .update(&existing.id, &MemberUpdate { custom_fields }, correlation_id)
        .await
    {
        Ok(mut updated) => {
            if updated.email.is_empty() {
                updated.email.clone_from(&existing.email);
            }
            UpsertOutcome {
                member: updated,
                action: UpsertAction::Updated,
            }
        }
        Err(e) => {
            // The member exists; a stale name is not worth failing the login
            LoggingHelper::log_external_call_failed(
                correlation_id,
                "PATCH /members/{id}",
                None,
                &e.to_string(),
            );
            UpsertOutcome {
                member: existing,
                action: UpsertAction::Unchanged,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock::InMemoryDirectory;

    fn policy() -> UpsertPolicy {
        UpsertPolicy {
            default_plan_id: Some("pln_free".to_string()),
            first_name_field: "first-name".to_string(),
            last_name_field: "last-name".to_string(),
        }
    }

    fn profile(given: &str, family: &str) -> NormalizedProfile {
        NormalizedProfile {
            subject: "sub-1".to_string(),
            email: "ada@example.com".to_string(),
            given_name: given.to_string(),
            family_name: family.to_string(),
            display_name: format!("{given} {family}").trim().to_string(),
            raw_claims: json!({}),
        }
    }

    #[test]
    fn test_new_member_mirrors_names_and_metadata() {
        let member = policy().new_member(&profile("Ada", "Lovelace"));

        assert_eq!(member.first_name, "Ada");
        assert_eq!(member.custom_fields["first-name"], "Ada");
        assert_eq!(member.custom_fields["last-name"], "Lovelace");
        assert_eq!(member.json["idp_sub"], "sub-1");
        assert_eq!(member.json["name"], "Ada Lovelace");
        assert_eq!(member.plans[0].plan_id, "pln_free");
        assert_eq!(member.password.len(), MEMBER_PASSWORD_LENGTH);
    }

    #[test]
    fn test_merged_fields_keeps_existing_keys() {
        let mut existing = Map::new();
        existing.insert("first-name".to_string(), json!("Ada"));
        existing.insert("company".to_string(), json!("Analytical Engines"));

        let merged = policy()
            .merged_fields(&existing, &profile("Ada", "Lovelace"))
            .unwrap();
        assert_eq!(merged["company"], "Analytical Engines");
        assert_eq!(merged["last-name"], "Lovelace");

        // Empty names never overwrite
        assert_eq!(policy().merged_fields(&existing, &profile("", "")), None);
        // Already in sync
        assert_eq!(policy().merged_fields(&merged, &profile("Ada", "Lovelace")), None);
    }

    #[tokio::test]
    async fn test_first_login_creates_member() {
        let directory = InMemoryDirectory::new();
        let outcome = upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "c")
            .await
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert_eq!(outcome.member.email, "ada@example.com");
        assert_eq!(directory.member_count(), 1);
    }

    #[tokio::test]
    async fn test_second_login_takes_update_path() {
        let directory = InMemoryDirectory::new();
        let first = upsert_member(&directory, &profile("Ada", ""), &policy(), "c1")
            .await
            .unwrap();
        let second = upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "c2")
            .await
            .unwrap();

        assert_eq!(second.action, UpsertAction::Updated);
        assert_eq!(second.member.id, first.member.id);
        assert_eq!(second.member.custom_fields["last-name"], "Lovelace");
        assert_eq!(directory.member_count(), 1);
        assert_eq!(directory.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_profile_skips_update() {
        let directory = InMemoryDirectory::new();
        upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "c1")
            .await
            .unwrap();
        let again = upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "c2")
            .await
            .unwrap();

        assert_eq!(again.action, UpsertAction::Unchanged);
        assert_eq!(directory.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_conflict_refetches_and_updates() {
        let directory = InMemoryDirectory::new();
        directory.insert_member("mem_race", "ada@example.com");
        directory.hide_next_lookup();

        let outcome = upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "c")
            .await
            .unwrap();

        assert_eq!(outcome.member.id, "mem_race");
        assert_eq!(outcome.action, UpsertAction::Updated);
        assert_eq!(directory.member_count(), 1);
    }

    #[tokio::test]
    async fn test_every_directory_call_carries_correlation_id() {
        let directory = InMemoryDirectory::new();
        directory.insert_member("mem_race", "ada@example.com");
        directory.hide_next_lookup();

        upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "tx-42")
            .await
            .unwrap();

        // lookup, conflicting create, re-fetch, update
        assert_eq!(directory.correlation_ids(), vec!["tx-42"; 4]);
    }

    #[tokio::test]
    async fn test_lookup_failure_aborts() {
        let directory = InMemoryDirectory::new();
        directory.fail_lookups();

        assert!(matches!(
            upsert_member(&directory, &profile("Ada", ""), &policy(), "c").await,
            Err(AuthFlowError::DirectoryUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_update_failure_keeps_existing_member() {
        let directory = InMemoryDirectory::new();
        directory.insert_member("mem_1", "ada@example.com");
        directory.fail_updates();

        let outcome = upsert_member(&directory, &profile("Ada", "Lovelace"), &policy(), "c")
            .await
            .unwrap();
        assert_eq!(outcome.member.id, "mem_1");
        assert_eq!(outcome.action, UpsertAction::Unchanged);
    }
}
