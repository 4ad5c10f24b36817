mod app;
mod config;
mod correlation;
mod dispatcher;
mod envelope;
mod error;
mod gateway;
mod launcher;
mod placement;
mod shutdown;
mod sidecar;
mod store;
mod transport;

pub use app::ForwardError;
pub use app::LocalApp;
pub use config::Config;
pub use correlation::CorrelationTable;
pub use correlation::Pending;
pub use dispatcher::DispatchError;
pub use dispatcher::Dispatcher;
pub use dispatcher::Outcome;
pub use envelope::DecodeError;
pub use envelope::Envelope;
pub use envelope::LocalRequest;
pub use envelope::RequestId;
pub use error::CallError;
pub use error::GatewayError;
pub use error::StoreError;
pub use error::StoreResultExt;
pub use error::TransportError;
pub use gateway::Gateway;
pub use gateway::GatewayState;
pub use gateway::router;
pub use launcher::launch;
pub use placement::Instances;
pub use placement::PlacementDirectory;
pub use shutdown::Shutdown;
pub use shutdown::ShutdownCause;
pub use shutdown::ShutdownReason;
pub use sidecar::Sidecar;
pub use sidecar::run;
pub use store::MemoryStore;
pub use store::Store;
pub use transport::Delivery;
pub use transport::Inbox;
pub use transport::LocalBus;
pub use transport::Transport;
