//! Per-user Son CRUD with activity-feed entries for every mutation.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::SonError;
use crate::logs::ActivityLog;
use crate::sons::model::{NewSon, Son, check_delay};
use crate::store::Database;

pub struct SonService {
    db: Arc<dyn Database>,
    activity: Arc<ActivityLog>,
}

impl SonService {
    pub fn new(db: Arc<dyn Database>, activity: Arc<ActivityLog>) -> Self {
        Self { db, activity }
    }

    pub async fn create(&self, user_id: &str, input: NewSon) -> Result<Son, SonError> {
        validate(&input)?;
        let now = Utc::now();
        let son = Son {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: input.name.trim().to_string(),
            trigger: input.trigger,
            delay: input.delay,
            actions: input.actions,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_son(&son).await?;
        info!(son_id = %son.id, user_id, trigger = %son.trigger, "Created son");

        self.activity
            .record(user_id, "son_created", format!("Created Son: {}", son.name))
            .await;
        Ok(son)
    }

    /// Fetch a Son the caller owns.
    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<Son, SonError> {
        let son = self.db.get_son(id).await?.ok_or(SonError::NotFound(id))?;
        if son.user_id != user_id {
            return Err(SonError::Forbidden(id));
        }
        Ok(son)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Son>, SonError> {
        Ok(self.db.list_sons(user_id).await?)
    }

    /// Replace every client-editable field. `id`, owner and `created_at` are kept.
    pub async fn update(&self, user_id: &str, id: Uuid, input: NewSon) -> Result<Son, SonError> {
        validate(&input)?;
        let existing = self.get(user_id, id).await?;
        let son = Son {
            name: input.name.trim().to_string(),
            trigger: input.trigger,
            delay: input.delay,
            actions: input.actions,
            enabled: input.enabled,
            updated_at: Utc::now(),
            ..existing
        };
        if !self.db.update_son(&son).await? {
            return Err(SonError::NotFound(id));
        }
        info!(son_id = %id, user_id, "Updated son");

        self.activity
            .record(user_id, "son_updated", format!("Updated Son: {}", son.name))
            .await;
        Ok(son)
    }

    pub async fn delete(&self, user_id: &str, id: Uuid) -> Result<(), SonError> {
        self.get(user_id, id).await?;
        if !self.db.delete_son(user_id, id).await? {
            return Err(SonError::NotFound(id));
        }
        info!(son_id = %id, user_id, "Deleted son");

        self.activity
            .record(user_id, "son_deleted", format!("Deleted Son: {id}"))
            .await;
        Ok(())
    }
}

fn validate(input: &NewSon) -> Result<(), SonError> {
    if input.name.trim().is_empty() {
        return Err(SonError::Invalid("name must not be empty".into()));
    }
    check_delay(&input.delay).map_err(SonError::Invalid)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::types::TriggerType;
    use crate::store::LibSqlBackend;

    async fn service() -> (SonService, Arc<ActivityLog>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let activity = Arc::new(ActivityLog::new(db.clone()));
        (SonService::new(db, activity.clone()), activity)
    }

    fn input(name: &str) -> NewSon {
        serde_json::from_value(json!({
            "name": name,
            "trigger": "post_published",
            "delay": "1h",
            "actions": [{"type": "create_campaign", "parameters": {"name": "x"}}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_get_list() {
        let (svc, _) = service().await;
        let son = svc.create("u1", input("  Announce  ")).await.unwrap();
        assert_eq!(son.name, "Announce");
        assert_eq!(son.trigger, TriggerType::PostPublished);

        let fetched = svc.get("u1", son.id).await.unwrap();
        assert_eq!(fetched.actions, son.actions);
        assert_eq!(svc.list("u1").await.unwrap().len(), 1);
        assert!(svc.list("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_users_cannot_read_or_modify() {
        let (svc, _) = service().await;
        let son = svc.create("u1", input("Mine")).await.unwrap();

        assert!(matches!(svc.get("u2", son.id).await, Err(SonError::Forbidden(_))));
        assert!(matches!(
            svc.update("u2", son.id, input("Stolen")).await,
            Err(SonError::Forbidden(_))
        ));
        assert!(matches!(svc.delete("u2", son.id).await, Err(SonError::Forbidden(_))));
        assert!(matches!(
            svc.get("u1", Uuid::new_v4()).await,
            Err(SonError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_keeps_identity_and_records_activity() {
        let (svc, activity) = service().await;
        let son = svc.create("u1", input("Before")).await.unwrap();

        let mut changed = input("After");
        changed.enabled = false;
        let updated = svc.update("u1", son.id, changed).await.unwrap();
        assert_eq!(updated.id, son.id);
        assert_eq!(updated.created_at, son.created_at);
        assert!(!updated.enabled);

        svc.delete("u1", son.id).await.unwrap();
        assert!(matches!(svc.get("u1", son.id).await, Err(SonError::NotFound(_))));

        let kinds: Vec<_> = activity
            .recent("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action_type)
            .collect();
        assert_eq!(kinds, ["son_deleted", "son_updated", "son_created"]);
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let (svc, _) = service().await;
        assert!(matches!(svc.create("u1", input("   ")).await, Err(SonError::Invalid(_))));
    }

    #[tokio::test]
    async fn delay_beyond_a_year_is_rejected() {
        let (svc, _) = service().await;
        let mut far = input("Far");
        far.delay = "20000000000w".into();
        assert!(matches!(svc.create("u1", far).await, Err(SonError::Invalid(_))));
    }
}
