//! Business logic services.

#![allow(missing_docs)]

pub mod authorization;
pub mod escalation;
pub mod event;
pub mod group;
pub mod notification;
pub mod org_tree;
pub mod permission;
pub mod user;

pub use authorization::{
    grantable_user_ids, has_group_permission, managed_group_ids, managed_user_ids, ApprovalRoute,
    AuthorizationService,
};
pub use escalation::{may_set_manager_flag, EscalationService, ManagerLevel};
pub use event::{CreateEventInput, EventService, UpdateEventInput};
pub use group::{CreateGroupInput, GroupSeed, GroupService, ImportSummary, UpdateGroupInput};
pub use notification::{
    NoOpNotifier, Notice, NoticeBuilder, Notifier, NotifierService, SmtpNotifier,
};
pub use org_tree::OrgTree;
pub use permission::PermissionService;
pub use user::{RegisterInput, UpdateProfileInput, UserService};
