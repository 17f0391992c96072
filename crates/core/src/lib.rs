//! `warden-core`: identity and time primitives shared by every warden crate.
//!
//! This crate contains no I/O and no authentication logic.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{GroupId, RoleAssignmentId, RoleId, ServicePrincipalId, UserId};
