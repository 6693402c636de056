//! Crew roles and members.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewRole {
    /// Decides assignees in hierarchical mode. At most one per crew.
    Manager,
    Worker,
    Reviewer,
    Specialist,
}

impl CrewRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrewRole::Manager => "manager",
            CrewRole::Worker => "worker",
            CrewRole::Reviewer => "reviewer",
            CrewRole::Specialist => "specialist",
        }
    }
}

/// A registered agent taking part in a crew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewMember {
    pub agent_id: String,
    pub role: CrewRole,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Tasks the member may run at once; `None` uses the crew default.
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
}

impl CrewMember {
    pub fn new(agent_id: impl Into<String>, role: CrewRole) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            skills: Vec::new(),
            max_concurrent_tasks: None,
        }
    }

    pub fn manager(agent_id: impl Into<String>) -> Self {
        Self::new(agent_id, CrewRole::Manager)
    }

    pub fn worker(agent_id: impl Into<String>) -> Self {
        Self::new(agent_id, CrewRole::Worker)
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = Some(max);
        self
    }

    /// Whether the member's skills cover every required skill.
    pub fn has_skills(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.skills.contains(s))
    }
}
