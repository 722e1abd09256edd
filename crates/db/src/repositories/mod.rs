//! Repositories for database access.

pub mod event;
pub mod group;
pub mod user;
pub mod user_permission;

pub use event::EventRepository;
pub use group::GroupRepository;
pub use user::UserRepository;
pub use user_permission::PermissionRepository;
