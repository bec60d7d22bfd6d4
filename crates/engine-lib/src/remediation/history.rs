//! Append-only audit trail of remediation actions

use crate::error::HistoryError;
use crate::models::{ActionStatus, RemediationAction};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Every action created during the engine's lifetime, in creation order.
///
/// Entries are never removed; status changes go through [`transition`]
/// which only allows forward moves and freezes terminal records.
///
/// [`transition`]: ActionHistory::transition
#[derive(Debug, Default)]
pub struct ActionHistory {
    actions: RwLock<Vec<RemediationAction>>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, action: RemediationAction) {
        self.actions.write().await.push(action);
    }

    /// Move an action to `status`, returning the updated record
    pub async fn transition(
        &self,
        action_id: &str,
        status: ActionStatus,
        details: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RemediationAction, HistoryError> {
        let mut actions = self.actions.write().await;
        let action = actions
            .iter_mut()
            .rev()
            .find(|a| a.action_id == action_id)
            .ok_or_else(|| HistoryError::UnknownAction(action_id.to_string()))?;

        if !action.status.can_transition_to(status) {
            return Err(HistoryError::IllegalTransition {
                action_id: action_id.to_string(),
                from: action.status,
                to: status,
            });
        }

        action.status = status;
        if details.is_some() {
            action.details = details;
        }
        if status.is_terminal() {
            action.finished_at = Some(now);
        }
        Ok(action.clone())
    }

    pub async fn get(&self, action_id: &str) -> Option<RemediationAction> {
        self.actions
            .read()
            .await
            .iter()
            .rev()
            .find(|a| a.action_id == action_id)
            .cloned()
    }

    /// Most recent first, optionally filtered by service
    pub async fn list(&self, service: Option<&str>, limit: Option<usize>) -> Vec<RemediationAction> {
        self.actions
            .read()
            .await
            .iter()
            .rev()
            .filter(|a| service.map_or(true, |s| a.service == s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.actions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.read().await.is_empty()
    }

    pub async fn count_with_status(&self, status: ActionStatus) -> usize {
        self.actions
            .read()
            .await
            .iter()
            .filter(|a| a.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use chrono::Duration;

    fn action(id: &str, service: &str, at: DateTime<Utc>) -> RemediationAction {
        RemediationAction {
            action_id: id.to_string(),
            policy_name: "p".to_string(),
            service: service.to_string(),
            action: ActionKind::Alert,
            reason: "orders.latency = 0.90".to_string(),
            status: ActionStatus::Pending,
            timestamp: at,
            finished_at: None,
            details: None,
        }
    }

    #[tokio::test]
    async fn test_list_most_recent_first_with_filter() {
        let history = ActionHistory::new();
        let t0 = Utc::now();
        history.append(action("a1", "orders", t0)).await;
        history.append(action("a2", "users", t0 + Duration::seconds(1))).await;
        history.append(action("a3", "orders", t0 + Duration::seconds(2))).await;

        let all: Vec<String> = history
            .list(None, None)
            .await
            .into_iter()
            .map(|a| a.action_id)
            .collect();
        assert_eq!(all, vec!["a3", "a2", "a1"]);

        let orders = history.list(Some("orders"), Some(1)).await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].action_id, "a3");

        assert!(history.list(Some("payments"), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_transitions_are_forward_only() {
        let history = ActionHistory::new();
        let now = Utc::now();
        history.append(action("a1", "orders", now)).await;

        let err = history
            .transition("a1", ActionStatus::Completed, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::IllegalTransition { .. }));

        history
            .transition("a1", ActionStatus::Executing, None, now)
            .await
            .unwrap();
        let done = history
            .transition("a1", ActionStatus::Completed, Some("ok".to_string()), now)
            .await
            .unwrap();
        assert_eq!(done.finished_at, Some(now));
        assert_eq!(done.details.as_deref(), Some("ok"));

        // terminal records are frozen
        assert!(history
            .transition("a1", ActionStatus::Failed, None, now)
            .await
            .is_err());
        assert_eq!(
            history.get("a1").await.unwrap().status,
            ActionStatus::Completed
        );
        assert_eq!(history.count_with_status(ActionStatus::Completed).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let history = ActionHistory::new();
        let err = history
            .transition("missing", ActionStatus::Executing, None, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, HistoryError::UnknownAction("missing".to_string()));
        assert!(history.is_empty().await);
    }
}
