//! Group formation and co-creation.
//!
//! `partition::form_groups` is the deterministic core: the same profiled
//! candidates and target size always give the same membership. Rationales
//! are attached afterwards and never feed back into the partition.

pub mod cocreation;
pub mod model;
pub mod partition;
pub mod rationale;
pub mod routes;

pub use cocreation::{CoCreationService, GroupBoot, GroupChatResponse};
pub use model::{Group, GroupCandidate, GroupListing, GroupPlan, GroupTurn};
pub use partition::form_groups;
pub use rationale::{RationaleWriter, describe_group, rationale_bullets};
pub use routes::{GroupRouteState, group_routes};
