//! Group entity for organizational units.
//!
//! Groups form a forest: national associations at the roots, regional
//! bodies below them, local chapters at the leaves. `parent_id` is the
//! only structural column; everything else is descriptive.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Group entity - one organizational unit in the forest.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "group")]
pub struct Model {
    /// Stable identifier. Seeded groups keep their slug-like ids
    /// (e.g. `bdp-bawue`), newly created groups get a ULID.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Parent group, NULL for roots.
    #[sea_orm(indexed, nullable)]
    pub parent_id: Option<String>,

    /// Group name.
    pub name: String,

    /// Level label, e.g. "Land", "Region", "Stamm".
    #[sea_orm(nullable)]
    pub level: Option<String>,

    /// Street address (optional).
    #[sea_orm(nullable)]
    pub street: Option<String>,

    /// Postal code (optional).
    #[sea_orm(nullable)]
    pub zip: Option<String>,

    /// City (optional).
    #[sea_orm(nullable)]
    pub city: Option<String>,

    /// Website URL (optional).
    #[sea_orm(nullable)]
    pub website: Option<String>,

    /// Instagram handle or URL (optional).
    #[sea_orm(nullable)]
    pub instagram: Option<String>,

    /// Facebook page URL (optional).
    #[sea_orm(nullable)]
    pub facebook: Option<String>,

    /// Whether the group is shown in public listings.
    #[sea_orm(default_value = true)]
    pub display: bool,

    /// Free-form attributes (JSON) for additional metadata.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub attributes: Option<serde_json::Value>,

    /// When the group was created.
    pub created_at: DateTimeWithTimeZone,

    /// When the group was last updated.
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Human-readable name, prefixed with the level label when present
    /// (e.g. "Stamm Greif" rather than just "Greif").
    pub fn display_name(&self) -> String {
        match self.level.as_deref() {
            Some(level) if !level.is_empty() => format!("{level} {}", self.name),
            _ => self.name.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentId",
        to = "Column::Id",
        on_delete = "Cascade"
    )]
    Parent,
    #[sea_orm(has_many = "super::event::Entity")]
    Events,
    #[sea_orm(has_many = "super::user_permission::Entity")]
    Permissions,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl Related<super::user_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Permissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
