//! Workshop sessions, the isolation boundary for live views.
//!
//! Exactly one `WorkshopSession` is current at any instant. Participants are
//! bound to the session that was current at their first contact; rotating
//! hides them from live views without touching their data.

pub mod registry;

pub use registry::{SessionRegistry, WorkshopSession};
