//! Routing and membership for a gateway node.
//!
//! Registry → selectors (which peer handles a topic) and client manager
//! (connections to peers) → cursor tracker (has the peer caught up?).

pub mod client_manager;
pub mod cursor_tracker;
pub mod notifier;
pub mod registry;
pub mod selector;
pub mod telemetry;
pub mod transport;

pub use client_manager::{ClientError, ClientManager};
pub use cursor_tracker::{MetadataClientConstructor, NodeCursorTracker, TrackerError};
pub use notifier::{CancelSubscription, Notifier, Subscription};
pub use registry::{LedgerRegistry, LedgerSource, NodeRegistry, RegistryError, StaticRegistry};
pub use selector::{new_node_selector, NodeSelector, SelectorError, SelectorStrategy};
pub use telemetry::ClientMetrics;
pub use transport::{MetadataApiClient, SyncCursorStream, Transport, TransportError};
