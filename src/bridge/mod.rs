//! # Bridge Module
//!
//! Pushes vessel telemetry to openHASP display nodes over MQTT.
//!
//! ## Architecture
//!
//! ```text
//! TelemetryBus ──PathValue──► DebouncedPublisher ──► PublishGate ──► broker
//!                                     ▲                   ▲
//!                                     │ spawn / cancel    │ ConnectionState
//!                                     │                   │
//!                               BridgeSession ◄──BrokerEvent── broker watcher
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! bridge/
//! ├── binding.rs   - Display nodes and path bindings
//! ├── debounce.rs  - Leading-edge debounced publishers
//! ├── error.rs     - BridgeError
//! ├── gate.rs      - Connection-gated publishing
//! ├── registry.rs  - Time-limited subscriptions
//! ├── session.rs   - Session state machine, handle and Bridge
//! └── topic.rs     - Topic and payload formats
//! ```

pub mod binding;
pub mod debounce;
pub mod error;
pub mod gate;
pub mod registry;
pub mod session;
pub mod topic;

pub use binding::{DisplayNode, PathBinding};
pub use debounce::{DebouncedPublisher, Debouncer};
pub use error::BridgeError;
pub use gate::PublishGate;
pub use registry::{SubscriptionEntry, SubscriptionRegistry};
pub use session::{Bridge, SessionHandle, SessionSettings, SessionStatus, StatusLevel};
