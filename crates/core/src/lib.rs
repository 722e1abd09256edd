//! Core business logic for scoutreg.
//!
//! The engine behind the registration portal: the group forest, the
//! authorization closures over it, the permission request/grant/revoke
//! workflow, and the flat-role escalation view. Persistence and mail
//! delivery stay behind the repository and notifier seams.

pub mod services;

pub use services::*;
