//! Database entities.

pub mod event;
pub mod group;
pub mod user;
pub mod user_permission;

pub use event::Entity as Event;
pub use group::Entity as Group;
pub use user::Entity as User;
pub use user_permission::Entity as UserPermission;
