//! Crew: role-based team execution.
//!
//! A [`Crew`] owns an ordered task list, a roster of [`CrewMember`]s and a
//! shared key-value memory. [`Crew::execute`] runs eligible tasks (all
//! dependencies complete) sequentially, in concurrent waves, or with a
//! Manager choosing the assignee of each task.

#[allow(clippy::module_inception)]
mod crew;
mod member;
mod report;
mod task;

pub use crew::{Crew, CrewDefinition, TaskDefinition};
pub use member::{CrewMember, CrewRole};
pub use report::{CrewReport, ExecutionMode, TaskReport};
pub use task::{Task, TaskSpec, TaskStatus};
