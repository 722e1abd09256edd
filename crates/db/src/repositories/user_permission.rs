//! Permission repository.

use std::sync::Arc;

use crate::entities::{UserPermission, user_permission};
use scoutreg_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    sea_query::Expr,
};

/// Permission repository for database operations.
#[derive(Clone)]
pub struct PermissionRepository {
    db: Arc<DatabaseConnection>,
}

impl PermissionRepository {
    /// Create a new permission repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a permission by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<user_permission::Model>> {
        UserPermission::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a permission by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<user_permission::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Permission not found: {id}")))
    }

    /// All permission rows of a user (granted and pending), oldest first.
    pub async fn find_by_user(&self, user_id: &str) -> AppResult<Vec<user_permission::Model>> {
        UserPermission::find()
            .filter(user_permission::Column::UserId.eq(user_id))
            .order_by_asc(user_permission::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Granted permission rows of a user, oldest first.
    pub async fn find_granted_by_user(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<user_permission::Model>> {
        UserPermission::find()
            .filter(user_permission::Column::UserId.eq(user_id))
            .filter(user_permission::Column::Granted.eq(true))
            .order_by_asc(user_permission::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// The row for a (user, group) pair, if any.
    pub async fn find_by_user_and_group(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> AppResult<Option<user_permission::Model>> {
        UserPermission::find()
            .filter(user_permission::Column::UserId.eq(user_id))
            .filter(user_permission::Column::GroupId.eq(group_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All permission rows on the given groups (granted and pending).
    pub async fn find_by_group_ids(
        &self,
        group_ids: &[String],
    ) -> AppResult<Vec<user_permission::Model>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        UserPermission::find()
            .filter(user_permission::Column::GroupId.is_in(group_ids.to_vec()))
            .order_by_asc(user_permission::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Granted permission rows on the given groups.
    pub async fn find_granted_by_group_ids(
        &self,
        group_ids: &[String],
    ) -> AppResult<Vec<user_permission::Model>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        UserPermission::find()
            .filter(user_permission::Column::GroupId.is_in(group_ids.to_vec()))
            .filter(user_permission::Column::Granted.eq(true))
            .order_by_asc(user_permission::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Pending requests on the given groups, oldest first.
    pub async fn find_pending_by_group_ids(
        &self,
        group_ids: &[String],
    ) -> AppResult<Vec<user_permission::Model>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        UserPermission::find()
            .filter(user_permission::Column::GroupId.is_in(group_ids.to_vec()))
            .filter(user_permission::Column::Granted.eq(false))
            .order_by_asc(user_permission::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new permission row.
    pub async fn create(
        &self,
        model: user_permission::ActiveModel,
    ) -> AppResult<user_permission::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a permission row.
    pub async fn update(
        &self,
        model: user_permission::ActiveModel,
    ) -> AppResult<user_permission::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a permission row by ID.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        UserPermission::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Delete all permission rows on the given groups, returning the
    /// number of deleted rows.
    pub async fn delete_by_group_ids(&self, group_ids: &[String]) -> AppResult<u64> {
        if group_ids.is_empty() {
            return Ok(0);
        }

        let result = UserPermission::delete_many()
            .filter(user_permission::Column::GroupId.is_in(group_ids.to_vec()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Re-key all rows of a user to a new user ID (email change),
    /// returning the number of affected rows.
    pub async fn update_user_id(&self, old_id: &str, new_id: &str) -> AppResult<u64> {
        let result = UserPermission::update_many()
            .col_expr(user_permission::Column::UserId, Expr::value(new_id))
            .filter(user_permission::Column::UserId.eq(old_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
