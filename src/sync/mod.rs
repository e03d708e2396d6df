//! Clock-synchronization phase: identity announce, timestamp exchange, and
//! offset estimation over the unreliable datagram channel.

pub mod announcer;
pub mod endpoint;
pub mod listener;
pub mod offset;

pub use announcer::IdentityAnnouncer;
pub use endpoint::DatagramEndpoint;
pub use listener::{SyncEvent, SyncListener, MSG_STOP_COLLECTION, MSG_STOP_SYNC};
pub use offset::{OffsetEstimator, OffsetState, TimestampSample};
