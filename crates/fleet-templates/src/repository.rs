//! TemplateRepository — publish, promote, and query golden templates.

use fleet_core::{compare_versions, parse_version};
use fleet_state::*;
use serde::Deserialize;
use tracing::info;

use crate::diff::{compare_definitions, validate_definition, TemplateDiff};
use crate::error::{TemplateError, TemplateResult};

/// Input to [`TemplateRepository::publish_template_version`].
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub workflow_name: String,
    pub version: String,
    pub definition: serde_json::Value,
    #[serde(default)]
    pub changelog: String,
    pub published_by: String,
}

#[derive(Clone)]
pub struct TemplateRepository {
    store: StateStore,
}

impl TemplateRepository {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Insert a new, non-current template version.
    pub fn publish_template_version(&self, req: PublishRequest) -> TemplateResult<TemplateVersion> {
        validate_workflow_name(&req.workflow_name)?;
        let version = parse_version(&req.version)
            .map_err(|_| TemplateError::InvalidVersion(req.version.clone()))?
            .to_string();
        validate_definition(&req.definition)?;

        let template = TemplateVersion {
            workflow_name: req.workflow_name,
            version,
            definition: req.definition,
            changelog: req.changelog,
            is_current: false,
            is_canary: false,
            published_by: req.published_by,
            published_at: epoch_secs(),
            promoted_at: None,
        };

        self.store.write(|tx| {
            tx.insert_template(&template).map_err(|e| match e {
                StateError::AlreadyExists(_) => TemplateError::Duplicate {
                    workflow: template.workflow_name.clone(),
                    version: template.version.clone(),
                },
                other => other.into(),
            })?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::TemplatePublished, &template.published_by)
                    .versions(None, &template.version)
                    .details(serde_json::json!({ "workflow": template.workflow_name })),
            )?;
            Ok::<_, TemplateError>(())
        })?;

        info!(
            workflow = %template.workflow_name,
            version = %template.version,
            "template published"
        );
        Ok(template)
    }

    /// Make `version` the single current version of `workflow`, clearing its
    /// canary flag. The previous current is demoted in the same transaction.
    pub fn promote_to_current_version(
        &self,
        workflow: &str,
        version: &str,
        promoted_by: &str,
    ) -> TemplateResult<TemplateVersion> {
        let version = canonical(version);
        let version = version.as_str();
        let (promoted, previous) = self.store.write(|tx| {
            let mut target = tx
                .get_template(workflow, version)?
                .ok_or_else(|| not_found(workflow, version))?;

            let mut previous = None;
            for mut other in tx.list_templates(workflow)? {
                if other.is_current && other.version != version {
                    other.is_current = false;
                    tx.put_template(&other)?;
                    previous = Some(other.version);
                }
            }

            target.is_current = true;
            target.is_canary = false;
            target.promoted_at = Some(epoch_secs());
            tx.put_template(&target)?;

            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::TemplatePromoted, promoted_by)
                    .versions(previous.as_deref(), version)
                    .details(serde_json::json!({ "workflow": workflow })),
            )?;
            Ok::<_, TemplateError>((target, previous))
        })?;

        info!(
            %workflow,
            %version,
            previous = previous.as_deref().unwrap_or("-"),
            "template promoted"
        );
        Ok(promoted)
    }

    /// Flag a version as canary. Does not affect `is_current`.
    pub fn mark_canary(&self, workflow: &str, version: &str) -> TemplateResult<TemplateVersion> {
        let version = canonical(version);
        self.store.write(|tx| {
            let mut template = tx
                .get_template(workflow, &version)?
                .ok_or_else(|| not_found(workflow, &version))?;
            template.is_canary = true;
            tx.put_template(&template)?;
            Ok(template)
        })
    }

    pub fn get_template_version(
        &self,
        workflow: &str,
        version: &str,
    ) -> TemplateResult<TemplateVersion> {
        let version = canonical(version);
        self.store
            .get_template(workflow, &version)?
            .ok_or_else(|| not_found(workflow, &version))
    }

    pub fn get_current_version(&self, workflow: &str) -> TemplateResult<Option<TemplateVersion>> {
        Ok(self
            .store
            .list_templates(workflow)?
            .into_iter()
            .find(|t| t.is_current))
    }

    /// All versions of a workflow, ascending semver order.
    pub fn list_versions(&self, workflow: &str) -> TemplateResult<Vec<TemplateVersion>> {
        let mut versions = self.store.list_templates(workflow)?;
        versions.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(versions)
    }

    pub fn compare_template_versions(
        &self,
        workflow: &str,
        from: &str,
        to: &str,
    ) -> TemplateResult<TemplateDiff> {
        let old = self.get_template_version(workflow, from)?;
        let new = self.get_template_version(workflow, to)?;
        Ok(compare_definitions(&old.definition, &new.definition))
    }
}

/// Workflow names are keys of the form `{name}@{version}`, so they are
/// restricted to ASCII alphanumerics, `_` and `-`.
fn validate_workflow_name(name: &str) -> TemplateResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TemplateError::InvalidWorkflowName(name.to_string()))
    }
}

/// Stored versions are in canonical semver form; lookups accept the same
/// spellings publish does.
fn canonical(version: &str) -> String {
    parse_version(version).map_or_else(|_| version.to_string(), |v| v.to_string())
}

fn not_found(workflow: &str, version: &str) -> TemplateError {
    TemplateError::NotFound {
        workflow: workflow.to_string(),
        version: version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo() -> (StateStore, TemplateRepository) {
        let store = StateStore::open_in_memory().unwrap();
        (store.clone(), TemplateRepository::new(store))
    }

    fn req(version: &str, nodes: serde_json::Value) -> PublishRequest {
        PublishRequest {
            workflow_name: "email_1".into(),
            version: version.into(),
            definition: json!({ "nodes": nodes, "connections": {} }),
            changelog: format!("release {version}"),
            published_by: "ops".into(),
        }
    }

    #[test]
    fn published_versions_start_non_current() {
        let (_, repo) = repo();
        let t = repo.publish_template_version(req("1.0.0", json!([]))).unwrap();
        assert!(!t.is_current && !t.is_canary);
        assert!(repo.get_current_version("email_1").unwrap().is_none());
    }

    #[test]
    fn publish_rejects_duplicates_bad_versions_and_bad_payloads() {
        let (_, repo) = repo();
        repo.publish_template_version(req("1.0.0", json!([]))).unwrap();
        assert!(matches!(
            repo.publish_template_version(req("1.0.0", json!([]))),
            Err(TemplateError::Duplicate { .. })
        ));
        assert!(matches!(
            repo.publish_template_version(req("latest", json!([]))),
            Err(TemplateError::InvalidVersion(_))
        ));
        let mut bad = req("1.1.0", json!([]));
        bad.definition = json!({ "nodes": [] });
        assert!(matches!(
            repo.publish_template_version(bad),
            Err(TemplateError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn publish_rejects_workflow_names_outside_the_key_alphabet() {
        let (_, repo) = repo();
        for name in ["email_1@beta", "", "email 1", "a/b"] {
            let mut r = req("1.0.0", json!([]));
            r.workflow_name = name.into();
            assert!(
                matches!(
                    repo.publish_template_version(r),
                    Err(TemplateError::InvalidWorkflowName(_))
                ),
                "{name:?} accepted"
            );
        }
        let mut ok = req("1.0.0", json!([]));
        ok.workflow_name = "Email-Onboarding_2".into();
        repo.publish_template_version(ok).unwrap();
    }

    #[test]
    fn version_spellings_collapse_to_one_key() {
        let (_, repo) = repo();
        repo.publish_template_version(req("1.0.0", json!([]))).unwrap();
        assert!(matches!(
            repo.publish_template_version(req("v1.0.0", json!([]))),
            Err(TemplateError::Duplicate { .. })
        ));
        assert!(matches!(
            repo.publish_template_version(req(" 1.0.0 ", json!([]))),
            Err(TemplateError::Duplicate { .. })
        ));
        let t = repo.publish_template_version(req("v1.1.0", json!([]))).unwrap();
        assert_eq!(t.version, "1.1.0");

        let versions: Vec<_> = repo
            .list_versions("email_1")
            .unwrap()
            .into_iter()
            .map(|t| t.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);

        repo.promote_to_current_version("email_1", "v1.1.0", "ops").unwrap();
        let current = repo.get_current_version("email_1").unwrap().unwrap();
        assert_eq!(current.version, "1.1.0");
        assert_eq!(repo.get_template_version("email_1", "v1.1.0").unwrap().version, "1.1.0");
    }

    #[test]
    fn promotion_is_exclusive() {
        let (_, repo) = repo();
        repo.publish_template_version(req("1.0.0", json!([]))).unwrap();
        repo.publish_template_version(req("1.1.0", json!([]))).unwrap();
        repo.mark_canary("email_1", "1.1.0").unwrap();

        repo.promote_to_current_version("email_1", "1.0.0", "ops").unwrap();
        repo.promote_to_current_version("email_1", "1.1.0", "ops").unwrap();

        let current = repo.get_current_version("email_1").unwrap().unwrap();
        assert_eq!(current.version, "1.1.0");
        assert!(!current.is_canary);
        assert!(!repo.get_template_version("email_1", "1.0.0").unwrap().is_current);
        let currents = repo
            .list_versions("email_1")
            .unwrap()
            .into_iter()
            .filter(|t| t.is_current)
            .count();
        assert_eq!(currents, 1);
    }

    #[test]
    fn promoting_missing_version_changes_nothing() {
        let (_, repo) = repo();
        repo.publish_template_version(req("1.0.0", json!([]))).unwrap();
        repo.promote_to_current_version("email_1", "1.0.0", "ops").unwrap();
        assert!(matches!(
            repo.promote_to_current_version("email_1", "9.9.9", "ops"),
            Err(TemplateError::NotFound { .. })
        ));
        let current = repo.get_current_version("email_1").unwrap().unwrap();
        assert_eq!(current.version, "1.0.0");
    }

    #[test]
    fn versions_list_in_semver_order() {
        let (_, repo) = repo();
        for v in ["1.10.0", "1.2.0", "1.9.1"] {
            repo.publish_template_version(req(v, json!([]))).unwrap();
        }
        let versions: Vec<_> = repo
            .list_versions("email_1")
            .unwrap()
            .into_iter()
            .map(|t| t.version)
            .collect();
        assert_eq!(versions, vec!["1.2.0", "1.9.1", "1.10.0"]);
    }

    #[test]
    fn compare_reports_removed_nodes_as_breaking() {
        let (_, repo) = repo();
        repo.publish_template_version(req("1.0.0", json!([{"name": "A"}, {"name": "B"}])))
            .unwrap();
        repo.publish_template_version(req("1.1.0", json!([{"name": "A"}]))).unwrap();
        let diff = repo.compare_template_versions("email_1", "1.0.0", "1.1.0").unwrap();
        assert_eq!(diff.removed, vec!["B"]);
        assert!(diff.breaking);
    }

    #[test]
    fn publish_and_promote_are_audited() {
        let (store, repo) = repo();
        repo.publish_template_version(req("1.0.0", json!([]))).unwrap();
        repo.promote_to_current_version("email_1", "1.0.0", "ops").unwrap();
        let history = store.list_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, HistoryAction::TemplatePromoted);
        assert_eq!(history[1].action, HistoryAction::TemplatePublished);
    }
}
