//! Peripheral services that publish status onto the event bus.

pub mod error_boundary;
pub mod network;
pub mod preferences;

pub use error_boundary::{BoundaryConfig, ErrorBoundary};
pub use network::NetworkMonitor;
pub use preferences::PreferencesManager;
