//! Small shared types used by every wagate crate.

pub mod events;
pub mod time;
pub mod types;

pub use events::{EventKind, EventSet, UnknownEventKind};
pub use types::{ApiEnvelope, TenantId, generate_token};
