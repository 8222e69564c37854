//! Shared value types and configuration.
//! The routing crate and its callers depend on this one.

pub mod config;
pub mod cursor;
pub mod node;
pub mod topic;

pub use cursor::{Cursor, SyncCursorResponse};
pub use node::{Node, NodeId, RawNodeRecord};
pub use topic::{Topic, TopicError, TopicKind};
