//! Per-user activity feed (Son created, updated, deleted).

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::{Database, RecentActivity};

pub struct ActivityLog {
    db: Arc<dyn Database>,
}

impl ActivityLog {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Append an entry. Failures are logged and swallowed.
    pub async fn record(&self, user_id: &str, action_type: &str, description: String) {
        let activity = RecentActivity {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            action_type: action_type.to_string(),
            description,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.db.insert_activity(&activity).await {
            warn!(user_id, action_type, error = %e, "Failed to log activity");
        }
    }

    pub async fn recent(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<RecentActivity>, DatabaseError> {
        self.db.list_recent_activity(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn recent_returns_newest_first_with_limit() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let log = ActivityLog::new(db);

        for i in 0..12 {
            log.record("u1", "son_created", format!("Created Son: {i}")).await;
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        log.record("u2", "son_created", "other".into()).await;

        let recent = log.recent("u1", 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].description, "Created Son: 11");
        assert!(recent.iter().all(|a| a.user_id == "u1"));
    }
}
