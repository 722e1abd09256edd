//! Event repository.

use std::sync::Arc;

use crate::entities::{Event, event};
use scoutreg_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};

/// Event repository for database operations.
#[derive(Clone)]
pub struct EventRepository {
    db: Arc<DatabaseConnection>,
}

impl EventRepository {
    /// Create a new event repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an event by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<event::Model>> {
        Event::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find an event by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<event::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event not found: {id}")))
    }

    /// Find the events of a single group, soonest first.
    pub async fn find_by_group_id(&self, group_id: &str) -> AppResult<Vec<event::Model>> {
        Event::find()
            .filter(event::Column::GroupId.eq(group_id))
            .order_by_asc(event::Column::StartsAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the events of a set of groups, soonest first.
    pub async fn find_by_group_ids(&self, group_ids: &[String]) -> AppResult<Vec<event::Model>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        Event::find()
            .filter(event::Column::GroupId.is_in(group_ids.to_vec()))
            .order_by_asc(event::Column::StartsAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find events that are not over yet: the end (or, without an end,
    /// the start) lies at or after the cutoff.
    pub async fn find_current(
        &self,
        cutoff: chrono::DateTime<chrono::FixedOffset>,
    ) -> AppResult<Vec<event::Model>> {
        Event::find()
            .filter(
                Condition::any()
                    .add(event::Column::EndsAt.gte(cutoff))
                    .add(
                        Condition::all()
                            .add(event::Column::EndsAt.is_null())
                            .add(event::Column::StartsAt.gte(cutoff)),
                    ),
            )
            .order_by_asc(event::Column::StartsAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new event.
    pub async fn create(&self, model: event::ActiveModel) -> AppResult<event::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update an event.
    pub async fn update(&self, model: event::ActiveModel) -> AppResult<event::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete an event by ID.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        Event::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Delete all events owned by the given groups, returning the number
    /// of deleted rows.
    pub async fn delete_by_group_ids(&self, group_ids: &[String]) -> AppResult<u64> {
        if group_ids.is_empty() {
            return Ok(0);
        }

        let result = Event::delete_many()
            .filter(event::Column::GroupId.is_in(group_ids.to_vec()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_event(id: &str, group_id: &str, title: &str) -> event::Model {
        event::Model {
            id: id.to_string(),
            group_id: group_id.to_string(),
            title: title.to_string(),
            email: None,
            tel: None,
            lat: None,
            lon: None,
            starts_at: (Utc::now() + Duration::days(7)).into(),
            ends_at: None,
            description: None,
            photo: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_by_group_ids() {
        let ev1 = create_test_event("ev1", "bdp-bawue", "Landeslager");
        let ev2 = create_test_event("ev2", "bdp-bawue-r1", "Hajk");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[ev1, ev2]])
                .into_connection(),
        );

        let repo = EventRepository::new(db);
        let result = repo
            .find_by_group_ids(&["bdp-bawue".to_string(), "bdp-bawue-r1".to_string()])
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_group_ids_empty() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let repo = EventRepository::new(db);
        let result = repo.find_by_group_ids(&[]).await.unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_find_current() {
        let ev = create_test_event("ev1", "bdp-bawue", "Sommerlager");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[ev]])
                .into_connection(),
        );

        let repo = EventRepository::new(db);
        let result = repo.find_current(Utc::now().into()).await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "Sommerlager");
    }

    #[tokio::test]
    async fn test_delete_by_group_ids() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 2,
                }])
                .into_connection(),
        );

        let repo = EventRepository::new(db);
        let deleted = repo
            .delete_by_group_ids(&["bdp-bawue".to_string()])
            .await
            .unwrap();

        assert_eq!(deleted, 2);
    }
}
