//! Client-side list synchronization.
//!
//! - [`FetchGateway`]: bulk fetch of the subject's records
//! - [`IdentityTracker`]: set of record IDs held by the store
//! - [`ChangeListener`]: realtime notifications into change events
//! - [`ReconcilingStore`]: single reducer merging every source
//! - [`AddMedicationPipeline`]: optimistic add flow
//! - [`SyncSession`]: ties the above to one subject at a time

mod gateway;
mod identity;
mod listener;
mod pipeline;
mod session;
mod store;

pub use gateway::*;
pub use identity::*;
pub use listener::*;
pub use pipeline::*;
pub use session::*;
pub use store::*;
