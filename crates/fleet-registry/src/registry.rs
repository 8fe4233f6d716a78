//! Version registry — reads and transitions of `TenantVersionRow`.

use std::collections::BTreeMap;

use fleet_core::{check_compatibility, CompatibilityReport, Component, WorkflowKind};
use fleet_state::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};

/// Label used for tenants that have never reported a version.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Version histogram and in-flight counts for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub component: Component,
    pub total_tenants: u64,
    /// Tenant count per recorded version.
    pub versions: BTreeMap<String, u64>,
    pub updating: u64,
    pub failed: u64,
    pub rollback: u64,
}

/// Service over the tenant version rows.
#[derive(Clone)]
pub struct VersionRegistry {
    store: StateStore,
}

impl VersionRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Create a tenant row if it does not exist yet. An existing row is
    /// returned unchanged; the registry only changes versions through
    /// [`record_version_update`](Self::record_version_update).
    pub fn register_tenant(
        &self,
        tenant_id: &str,
        initial_versions: &[(Component, &str)],
    ) -> RegistryResult<TenantVersionRow> {
        let row = self.store.write(|tx| {
            if let Some(existing) = tx.get_tenant(tenant_id)? {
                return Ok::<_, StateError>(existing);
            }
            let mut row = TenantVersionRow::new(tenant_id, epoch_secs());
            for (component, version) in initial_versions {
                row.set_version(*component, version);
            }
            tx.put_tenant(&row)?;
            Ok(row)
        })?;
        debug!(tenant = %tenant_id, "tenant registered");
        Ok(row)
    }

    pub fn get_tenant(&self, tenant_id: &str) -> RegistryResult<TenantVersionRow> {
        self.store
            .get_tenant(tenant_id)?
            .ok_or_else(|| RegistryError::TenantNotFound(tenant_id.to_string()))
    }

    pub fn list_tenants(&self) -> RegistryResult<Vec<TenantVersionRow>> {
        Ok(self.store.list_tenants()?)
    }

    /// The version a tenant runs for a component, `None` if never recorded.
    pub fn get_component_version(
        &self,
        tenant_id: &str,
        component: Component,
    ) -> RegistryResult<Option<String>> {
        let row = self.get_tenant(tenant_id)?;
        Ok(row.version(component).map(str::to_string))
    }

    /// Record a completed update: set the version and return the tenant to
    /// `current`.
    pub fn record_version_update(
        &self,
        tenant_id: &str,
        component: Component,
        new_version: &str,
    ) -> RegistryResult<TenantVersionRow> {
        let row = self.store.write(|tx| {
            let mut row = tx
                .get_tenant(tenant_id)?
                .ok_or_else(|| RegistryError::TenantNotFound(tenant_id.to_string()))?;
            let previous = row.version(component).map(str::to_string);
            let now = epoch_secs();
            row.set_version(component, new_version);
            row.update_status = UpdateStatus::Current;
            row.updated_at = now;
            row.last_version_change_at = Some(now);
            tx.put_tenant(&row)?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::TenantUpdated, "registry")
                    .tenant(tenant_id)
                    .component(component)
                    .versions(previous.as_deref(), new_version)
                    .affected(1),
            )?;
            Ok::<_, RegistryError>(row)
        })?;
        info!(tenant = %tenant_id, %component, version = %new_version, "version recorded");
        Ok(row)
    }

    pub fn set_update_status(&self, tenant_id: &str, status: UpdateStatus) -> RegistryResult<()> {
        self.store.write(|tx| {
            let mut row = tx
                .get_tenant(tenant_id)?
                .ok_or_else(|| RegistryError::TenantNotFound(tenant_id.to_string()))?;
            row.update_status = status;
            row.updated_at = epoch_secs();
            tx.put_tenant(&row)?;
            Ok::<_, RegistryError>(())
        })?;
        debug!(tenant = %tenant_id, ?status, "update status set");
        Ok(())
    }

    /// Set the same status on many tenants in one transaction. Unknown
    /// tenants are skipped. Returns the number of rows changed.
    pub fn set_update_status_many(
        &self,
        tenant_ids: &[TenantId],
        status: UpdateStatus,
    ) -> RegistryResult<u64> {
        let changed = self.store.write(|tx| set_status_in(tx, tenant_ids, status))?;
        debug!(count = changed, ?status, "bulk update status set");
        Ok(changed)
    }

    pub fn mark_updating(&self, tenant_ids: &[TenantId]) -> RegistryResult<u64> {
        self.set_update_status_many(tenant_ids, UpdateStatus::Updating)
    }

    /// Tenants whose recorded version differs from `target_version` and
    /// that are not already `updating`.
    pub fn get_tenants_needing_update(
        &self,
        component: Component,
        target_version: &str,
    ) -> RegistryResult<Vec<TenantVersionRow>> {
        let rows = self.store.list_tenants()?;
        Ok(rows
            .into_iter()
            .filter(|r| needs_update(r, component, target_version))
            .collect())
    }

    pub fn get_version_summary(&self, component: Component) -> RegistryResult<VersionSummary> {
        let rows = self.store.list_tenants()?;
        Ok(summarize(component, &rows))
    }

    /// Check a version triple against the static compatibility matrix.
    pub fn check_version_compatibility(
        &self,
        dashboard_version: &str,
        agent_version: &str,
        workflow_version: &str,
    ) -> CompatibilityReport {
        check_compatibility(dashboard_version, agent_version, workflow_version)
    }

    /// Check the triple a tenant actually runs for one of its workflows.
    pub fn check_tenant_compatibility(
        &self,
        tenant_id: &str,
        workflow: WorkflowKind,
    ) -> RegistryResult<CompatibilityReport> {
        let row = self.get_tenant(tenant_id)?;
        let version = |c: Component| row.version(c).unwrap_or(UNKNOWN_VERSION).to_string();
        Ok(check_compatibility(
            &version(Component::Dashboard),
            &version(Component::Agent),
            &version(Component::Workflow(workflow)),
        ))
    }
}

/// The drift predicate shared by every "needs update" query.
pub fn needs_update(row: &TenantVersionRow, component: Component, target_version: &str) -> bool {
    row.update_status != UpdateStatus::Updating && row.drifts_from(component, target_version)
}

/// [`VersionRegistry::get_tenants_needing_update`] inside a larger transaction.
pub fn needing_update_in(
    tx: &StoreTxn,
    component: Component,
    target_version: &str,
) -> StateResult<Vec<TenantVersionRow>> {
    Ok(tx
        .list_tenants()?
        .into_iter()
        .filter(|r| needs_update(r, component, target_version))
        .collect())
}

/// Bulk status change usable inside a larger transaction.
pub fn set_status_in(
    tx: &StoreTxn,
    tenant_ids: &[TenantId],
    status: UpdateStatus,
) -> StateResult<u64> {
    let now = epoch_secs();
    let mut changed = 0;
    for id in tenant_ids {
        if let Some(mut row) = tx.get_tenant(id)? {
            row.update_status = status;
            row.updated_at = now;
            tx.put_tenant(&row)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Build a version histogram from a set of rows.
pub fn summarize(component: Component, rows: &[TenantVersionRow]) -> VersionSummary {
    let mut summary = VersionSummary {
        component,
        total_tenants: rows.len() as u64,
        versions: BTreeMap::new(),
        updating: 0,
        failed: 0,
        rollback: 0,
    };
    for row in rows {
        let version = row.version(component).unwrap_or(UNKNOWN_VERSION);
        *summary.versions.entry(version.to_string()).or_insert(0) += 1;
        match row.update_status {
            UpdateStatus::Updating => summary.updating += 1,
            UpdateStatus::Failed => summary.failed += 1,
            UpdateStatus::Rollback => summary.rollback += 1,
            UpdateStatus::Current => {}
        }
    }
    summary
}
