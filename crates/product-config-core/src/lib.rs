//! Public entry points for the product-config core crate.
//!
//! The crate implements a remote-configuration cache for embedding hosts:
//! application-supplied defaults, a throttled backend fetch, and an
//! explicit activation step that decides when fetched values become
//! visible. Persistence and networking are collaborator traits supplied by
//! the host, so the controller itself never opens sockets or chooses file
//! formats beyond whole-snapshot JSON.

pub mod cache;
pub mod events;
pub mod registry;
pub mod response;
pub mod service;
pub mod settings;
pub mod store;
pub mod transport;

pub use cache::{
    ConfigCache, DEFAULT_VALUE_FOR_BOOLEAN, DEFAULT_VALUE_FOR_DOUBLE, DEFAULT_VALUE_FOR_LONG,
    DEFAULT_VALUE_FOR_STRING,
};
pub use events::{ConfigEvent, EventStream};
pub use registry::ControllerRegistry;
pub use response::{FetchPayload, PayloadError};
pub use service::{ControllerConfig, ControllerSnapshot, FetchDispatch, ProductConfigController};
pub use settings::{FetchSettings, DEFAULT_MIN_FETCH_INTERVAL_SECONDS};
pub use store::{namespace_for, FileStore, MemoryStore, SnapshotStore, StoreError};
pub use transport::{FetchTransport, NoopTransport};
