//! User entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    /// Login email address, lowercased. Doubles as the stable id that
    /// permission rows reference.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Argon2 password hash.
    pub password_hash: String,

    /// Display name.
    pub name: String,

    /// Superusers sit above the group forest and manage everything.
    #[sea_orm(default_value = false)]
    pub is_superuser: bool,

    /// When the account was registered.
    pub created_at: DateTimeWithTimeZone,

    /// Last successful login.
    #[sea_orm(nullable)]
    pub last_login: Option<DateTimeWithTimeZone>,

    /// Pending password-reset token.
    #[sea_orm(unique, nullable)]
    pub reset_token: Option<String>,

    /// Expiry of the pending password-reset token.
    #[sea_orm(nullable)]
    pub reset_token_expires_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_permission::Entity")]
    Permissions,
}

impl Related<super::user_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Permissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
