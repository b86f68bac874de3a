//! Shared data model for Operion: workflows, nodes, connections, executions,
//! node results, input coordination state, schedules, source events and
//! domain lifecycle events.
//!
//! This crate has no I/O of its own — it is pure data plus the invariants
//! from spec §3 that can be checked without a repository.

mod connection;
mod domain_event;
mod error;
mod execution;
mod input_state;
mod node;
mod node_result;
mod port;
mod schedule;
mod source_event;
mod work_item;
mod workflow;

pub use connection::Connection;
pub use domain_event::{DomainEvent, PublishedTriggerNode};
pub use error::{Error, ErrorKind, Result};
pub use execution::{ExecutionContext, ExecutionStatus};
pub use input_state::{NodeInputState, WaitMode};
pub use node::{NodeCategory, WorkflowNode};
pub use node_result::{NodeResult, NodeResultStatus};
pub use port::{PortRef, PORT_ERROR, PORT_SUCCESS};
pub use schedule::Schedule;
pub use source_event::SourceEvent;
pub use work_item::NodeExecuteItem;
pub use workflow::{Workflow, WorkflowStatus};
