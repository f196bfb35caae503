//! Facilitator-facing operations.

pub mod routes;
pub mod service;
pub mod themes;

pub use routes::{FacilitatorRouteState, facilitator_routes};
pub use service::{FacilitatorService, ParticipantListing, SessionInfo};
pub use themes::{Theme, ThemeSummarizer};
