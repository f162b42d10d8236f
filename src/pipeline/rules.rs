//! Rule matcher: selects the Sons that should fire for a trigger.

use tracing::debug;

use crate::pipeline::types::TriggerType;
use crate::sons::model::Son;

/// Keep enabled Sons whose trigger equals `trigger`, preserving input order.
pub fn match_sons(trigger: TriggerType, sons: &[Son]) -> Vec<Son> {
    let matched: Vec<Son> = sons
        .iter()
        .filter(|son| son.enabled && son.trigger == trigger)
        .cloned()
        .collect();
    debug!(
        trigger = %trigger,
        candidates = sons.len(),
        matched = matched.len(),
        "Matched sons"
    );
    matched
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn son(name: &str, trigger: TriggerType, enabled: bool) -> Son {
        Son {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            name: name.into(),
            trigger,
            delay: "0".into(),
            actions: Vec::new(),
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn only_enabled_matching_sons_are_kept() {
        let sons = vec![
            son("a", TriggerType::MemberCreated, true),
            son("b", TriggerType::PostPublished, true),
            son("c", TriggerType::MemberCreated, false),
        ];
        let matched = match_sons(TriggerType::MemberCreated, &sons);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0], sons[0]);
    }

    #[test]
    fn order_is_preserved() {
        let sons = vec![
            son("first", TriggerType::PostPublished, true),
            son("skip", TriggerType::MemberDeleted, true),
            son("second", TriggerType::PostPublished, true),
            son("third", TriggerType::PostPublished, true),
        ];
        let names: Vec<_> = match_sons(TriggerType::PostPublished, &sons)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn no_candidates_yields_empty() {
        assert!(match_sons(TriggerType::PagePublished, &[]).is_empty());
    }
}
