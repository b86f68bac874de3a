//! Canonical topic names.
//!
//! §6.1 describes the domain-event family as `workflow.*`/`trigger.*` and
//! the source-event family as `source.*` — a wildcard prefix convention
//! transports like kafka support natively. Our [`crate::EventBus`] trait
//! addresses one flat topic per call, so the five domain-event kinds and
//! the open-ended provider `event_type`s both collapse onto one topic each
//! here; readers that need per-kind routing switch on the deserialized
//! payload instead of the topic name.

pub const DOMAIN_EVENTS: &str = "workflow-events";
pub const SOURCE_EVENTS: &str = "source-events";
pub const NODE_EXECUTE: &str = "node.execute";
