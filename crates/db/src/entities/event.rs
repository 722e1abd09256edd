//! Event entity.
//!
//! Every event is owned by exactly one group; authorization on an event
//! is authorization on its owning group.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event entity - a published activity of a group.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "event")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Group that owns this event.
    #[sea_orm(indexed)]
    pub group_id: String,

    /// Event title.
    pub title: String,

    /// Contact email address (optional).
    #[sea_orm(nullable)]
    pub email: Option<String>,

    /// Contact phone number (optional).
    #[sea_orm(nullable)]
    pub tel: Option<String>,

    /// Venue latitude (optional).
    #[sea_orm(nullable)]
    pub lat: Option<f64>,

    /// Venue longitude (optional).
    #[sea_orm(nullable)]
    pub lon: Option<f64>,

    /// When the event starts.
    pub starts_at: DateTimeWithTimeZone,

    /// When the event ends (optional for single-day events).
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTimeWithTimeZone>,

    /// Event description (optional).
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// Promotional photo (optional).
    #[sea_orm(nullable)]
    pub photo: Option<Vec<u8>>,

    /// When the event was created.
    pub created_at: DateTimeWithTimeZone,

    /// When the event was last updated.
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::group::Entity",
        from = "Column::GroupId",
        to = "super::group::Column::Id",
        on_delete = "Cascade"
    )]
    Group,
}

impl Related<super::group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
