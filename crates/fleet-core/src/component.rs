//! Independently versioned pieces of a tenant's stack.
//!
//! `Component` is the single source of truth for the component set. Every
//! place that needs to map a component onto storage goes through
//! [`Component::ALL`] and [`Component::as_str`], so the set and its stored
//! representation cannot drift apart.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The workflow types every tenant runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkflowKind {
    #[serde(rename = "email_preparation")]
    EmailPreparation,
    #[serde(rename = "email_1")]
    Email1,
    #[serde(rename = "email_2")]
    Email2,
    #[serde(rename = "email_3")]
    Email3,
    #[serde(rename = "research_report")]
    ResearchReport,
    #[serde(rename = "reply_tracker")]
    ReplyTracker,
    #[serde(rename = "opt_out")]
    OptOut,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 7] = [
        WorkflowKind::EmailPreparation,
        WorkflowKind::Email1,
        WorkflowKind::Email2,
        WorkflowKind::Email3,
        WorkflowKind::ResearchReport,
        WorkflowKind::ReplyTracker,
        WorkflowKind::OptOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::EmailPreparation => "email_preparation",
            WorkflowKind::Email1 => "email_1",
            WorkflowKind::Email2 => "email_2",
            WorkflowKind::Email3 => "email_3",
            WorkflowKind::ResearchReport => "research_report",
            WorkflowKind::ReplyTracker => "reply_tracker",
            WorkflowKind::OptOut => "opt_out",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownComponent(s.to_string()))
    }
}

/// A versioned component of a tenant runtime.
///
/// Serialized as its canonical string: `dashboard`, `agent`, or
/// `workflow:<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Component {
    Dashboard,
    Agent,
    Workflow(WorkflowKind),
}

impl Component {
    /// Every component, in storage order.
    pub const ALL: [Component; 9] = [
        Component::Dashboard,
        Component::Agent,
        Component::Workflow(WorkflowKind::EmailPreparation),
        Component::Workflow(WorkflowKind::Email1),
        Component::Workflow(WorkflowKind::Email2),
        Component::Workflow(WorkflowKind::Email3),
        Component::Workflow(WorkflowKind::ResearchReport),
        Component::Workflow(WorkflowKind::ReplyTracker),
        Component::Workflow(WorkflowKind::OptOut),
    ];

    /// Canonical string form, also used as the stored field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Dashboard => "dashboard",
            Component::Agent => "agent",
            Component::Workflow(WorkflowKind::EmailPreparation) => "workflow:email_preparation",
            Component::Workflow(WorkflowKind::Email1) => "workflow:email_1",
            Component::Workflow(WorkflowKind::Email2) => "workflow:email_2",
            Component::Workflow(WorkflowKind::Email3) => "workflow:email_3",
            Component::Workflow(WorkflowKind::ResearchReport) => "workflow:research_report",
            Component::Workflow(WorkflowKind::ReplyTracker) => "workflow:reply_tracker",
            Component::Workflow(WorkflowKind::OptOut) => "workflow:opt_out",
        }
    }

    /// The agent is the only component updated through the blue-green swap.
    pub fn is_agent(&self) -> bool {
        matches!(self, Component::Agent)
    }

    pub fn workflow(&self) -> Option<WorkflowKind> {
        match self {
            Component::Workflow(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard" => Ok(Component::Dashboard),
            "agent" | "sidecar" => Ok(Component::Agent),
            other => match other.strip_prefix("workflow:") {
                Some(kind) => Ok(Component::Workflow(kind.parse()?)),
                None => Err(CoreError::UnknownComponent(other.to_string())),
            },
        }
    }
}

impl TryFrom<String> for Component {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Component> for String {
    fn from(c: Component) -> Self {
        c.as_str().to_string()
    }
}
