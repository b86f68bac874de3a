//! The persistence collaborator contract (§6.4).
//!
//! Four repository traits, each exposing only the operations the core uses.
//! Concrete backends (file/SQL) are out-of-scope collaborators; this crate
//! ships an in-memory reference implementation (used by the Activator and
//! Worker's own tests) and a sqlite implementation built on `sqlx`, to show
//! the contract is satisfiable by a real backend without coupling the core
//! to it.

mod memory;
pub mod sqlite;
mod traits;

pub use memory::InMemoryRepositories;
pub use traits::{
  ExecutionContextRepository, ListOptions, ListPage, NodeRepository, ScheduleRepository,
  TriggerMatch, InputCoordinationRepository, WorkflowRepository,
};
