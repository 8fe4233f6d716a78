//! Static cross-component compatibility matrix.
//!
//! A (dashboard, agent, workflow) version triple is compatible only when a
//! rule in [`COMPATIBILITY_MATRIX`] matches all three. Nothing is inferred:
//! no matching rule means incompatible.

use serde::{Deserialize, Serialize};

use crate::version::{parse_version, VersionRange};

/// Support lifecycle of a compatibility rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Stable,
    Current,
    Future,
    Deprecated,
}

/// One row of the matrix. Ranges use the syntax in [`crate::version`].
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityRule {
    pub dashboard: &'static str,
    pub agent: &'static str,
    pub workflow: &'static str,
    pub lifecycle: Lifecycle,
}

/// First matching rule wins.
pub const COMPATIBILITY_MATRIX: &[CompatibilityRule] = &[
    CompatibilityRule {
        dashboard: "1.2.x",
        agent: "1.2.x",
        workflow: "1.1.x - 1.2.x",
        lifecycle: Lifecycle::Current,
    },
    CompatibilityRule {
        dashboard: "1.0.x - 1.2.x",
        agent: "1.1.x",
        workflow: "1.0.x - 1.1.x",
        lifecycle: Lifecycle::Stable,
    },
    CompatibilityRule {
        dashboard: "1.3.x+",
        agent: "1.3.x+",
        workflow: "1.2.x+",
        lifecycle: Lifecycle::Future,
    },
    CompatibilityRule {
        dashboard: "1.0.x",
        agent: "1.0.x",
        workflow: "1.0.x",
        lifecycle: Lifecycle::Deprecated,
    },
];

/// Outcome of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    /// Lifecycle of the matching rule; `None` when incompatible.
    pub lifecycle: Option<Lifecycle>,
    pub reason: String,
}

impl CompatibilityReport {
    fn incompatible(reason: String) -> Self {
        Self {
            compatible: false,
            lifecycle: None,
            reason,
        }
    }
}

/// Check a version triple against the static matrix.
pub fn check_compatibility(dashboard: &str, agent: &str, workflow: &str) -> CompatibilityReport {
    check_against(COMPATIBILITY_MATRIX, dashboard, agent, workflow)
}

/// Check a version triple against an arbitrary rule set.
pub fn check_against(
    rules: &[CompatibilityRule],
    dashboard: &str,
    agent: &str,
    workflow: &str,
) -> CompatibilityReport {
    let (dash_v, agent_v, wf_v) = match (
        parse_version(dashboard),
        parse_version(agent),
        parse_version(workflow),
    ) {
        (Ok(d), Ok(a), Ok(w)) => (d, a, w),
        (d, a, w) => {
            let bad: Vec<String> = [d.err(), a.err(), w.err()]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect();
            return CompatibilityReport::incompatible(bad.join("; "));
        }
    };

    let matches = |range: &str, v: &semver::Version| {
        range
            .parse::<VersionRange>()
            .is_ok_and(|r| r.matches(v))
    };

    for rule in rules {
        if matches(rule.dashboard, &dash_v)
            && matches(rule.agent, &agent_v)
            && matches(rule.workflow, &wf_v)
        {
            return CompatibilityReport {
                compatible: true,
                lifecycle: Some(rule.lifecycle),
                reason: format!(
                    "dashboard {} / agent {} / workflow {}",
                    rule.dashboard, rule.agent, rule.workflow
                ),
            };
        }
    }

    CompatibilityReport::incompatible(format!(
        "no compatibility rule covers dashboard {dashboard}, agent {agent}, workflow {workflow}"
    ))
}
