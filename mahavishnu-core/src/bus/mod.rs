//! Message Bus: cross-repo messaging with HMAC-authenticated senders.

pub mod canonical;
pub mod store;

use crate::error::{BusError, InvalidTransition, Unauthenticated};
use crate::model::{Message, MessageStatus, Priority};
use dashmap::DashMap;
use mahavishnu_common::ids::{MessageId, RepoName};
use std::collections::BTreeMap;
use std::sync::Arc;
use store::BusStore;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<MessageStatus>,
    pub priority: Option<Priority>,
    pub sender: Option<String>,
}

pub struct MessageBus {
    store: Arc<dyn BusStore>,
    secrets: DashMap<String, Vec<u8>>,
    registered_repos: DashMap<String, ()>,
}

impl MessageBus {
    pub fn new(store: Arc<dyn BusStore>) -> Self {
        Self {
            store,
            secrets: DashMap::new(),
            registered_repos: DashMap::new(),
        }
    }

    pub fn register_repo(&self, repo: impl Into<String>, hmac_secret: Vec<u8>) {
        let repo = repo.into();
        self.registered_repos.insert(repo.clone(), ());
        self.secrets.insert(repo, hmac_secret);
    }

    fn known(&self, repo: &str) -> bool {
        self.registered_repos.contains_key(repo)
    }

    fn secret_for(&self, repo: &str) -> Vec<u8> {
        self.secrets
            .get(repo)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Rejects unknown sender or recipient repos.
    #[allow(clippy::too_many_arguments)]
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        context: BTreeMap<String, String>,
        in_reply_to: Option<MessageId>,
    ) -> Result<MessageId, BusError> {
        if !self.known(from) || !self.known(to) {
            return Err(BusError::UnknownRepo(if !self.known(from) {
                from.to_string()
            } else {
                to.to_string()
            }));
        }

        let mut message = Message {
            message_id: MessageId::new(),
            from_repo: RepoName::new(from),
            to_repo: RepoName::new(to),
            subject: subject.into(),
            body: body.into(),
            priority,
            in_reply_to,
            workflow_id: None,
            timestamp: chrono::Utc::now(),
            signature: Vec::new(),
            context,
        };
        let canonical = canonical::canonical_form(&message);
        message.signature = canonical::sign(&canonical, &self.secret_for(from));

        let id = message.message_id;
        self.store
            .append(message)
            .await
            .map_err(BusError::StoreUnavailable)?;
        info!(message_id = %id, from, to, "message sent");
        Ok(id)
    }

    /// Priority-descending, ties by timestamp descending then `message_id`
    /// lexicographically descending.
    pub async fn list(&self, repo: &str, filters: ListFilter) -> Vec<Message> {
        let mut entries = self.store.list_for(repo).await;
        if let Some(status) = filters.status {
            entries.retain(|(_, s)| *s == status);
        }
        if let Some(priority) = filters.priority {
            entries.retain(|(m, _)| m.priority == priority);
        }
        if let Some(sender) = &filters.sender {
            entries.retain(|(m, _)| &m.from_repo.0 == sender);
        }
        entries.sort_by(|(a, _), (b, _)| {
            priority_rank(b.priority)
                .cmp(&priority_rank(a.priority))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| b.message_id.to_string().cmp(&a.message_id.to_string()))
        });
        entries.into_iter().map(|(m, _)| m).collect()
    }

    /// Valid transitions: `unread -> read`, `{unread,read} -> archived`.
    pub async fn acknowledge(
        &self,
        message_id: MessageId,
        new_status: MessageStatus,
    ) -> Result<(), BusError> {
        let (message, current) = self
            .store
            .get(&message_id)
            .await
            .ok_or_else(|| BusError::UnknownRepo(message_id.to_string()))?;

        self.verify(&message)?;

        let valid = matches!(
            (current, new_status),
            (MessageStatus::Unread, MessageStatus::Read)
                | (MessageStatus::Unread, MessageStatus::Archived)
                | (MessageStatus::Read, MessageStatus::Archived)
        );
        if !valid {
            return Err(InvalidTransition {
                from: status_name(current),
                to: status_name(new_status),
            }
            .into());
        }
        self.store
            .append_status(message_id, new_status)
            .await
            .map_err(BusError::StoreUnavailable)?;
        Ok(())
    }

    /// Creates a new message whose body is the original's canonical form,
    /// preserves priority, sets `in_reply_to`.
    pub async fn forward(
        &self,
        message_id: MessageId,
        to: &str,
        prepend: Option<String>,
    ) -> Result<MessageId, BusError> {
        let (original, _) = self
            .store
            .get(&message_id)
            .await
            .ok_or_else(|| BusError::UnknownRepo(message_id.to_string()))?;
        self.verify(&original)?;

        let canonical = canonical::canonical_form(&original);
        let body = match prepend {
            Some(prefix) => format!("{prefix}\n{canonical}"),
            None => canonical,
        };
        self.send(
            &original.to_repo.0,
            to,
            original.subject.clone(),
            body,
            original.priority,
            original.context.clone(),
            Some(original.in_reply_to.unwrap_or(message_id)),
        )
        .await
    }

    fn verify(&self, message: &Message) -> Result<(), BusError> {
        let canonical = canonical::canonical_form(message);
        let secret = self.secret_for(&message.from_repo.0);
        if canonical::verify(&canonical, &secret, &message.signature) {
            Ok(())
        } else {
            Err(Unauthenticated(format!(
                "signature verification failed for message {}",
                message.message_id
            ))
            .into())
        }
    }
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Urgent => 3,
    }
}

fn status_name(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Unread => "unread",
        MessageStatus::Read => "read",
        MessageStatus::Archived => "archived",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemoryBusStore;
    use test_r::test;

    fn bus() -> MessageBus {
        let bus = MessageBus::new(Arc::new(MemoryBusStore::new()));
        bus.register_repo("r1", b"secret-1".to_vec());
        bus.register_repo("r2", b"secret-2".to_vec());
        bus
    }

    #[tokio::test]
    async fn send_requires_known_repos() {
        let bus = bus();
        let result = bus
            .send(
                "r1",
                "ghost",
                "s",
                "b",
                Priority::Normal,
                BTreeMap::new(),
                None,
            )
            .await;
        assert!(matches!(result, Err(BusError::UnknownRepo(_))));
    }

    #[tokio::test]
    async fn priority_then_timestamp_ordering() {
        let bus = bus();
        for priority in [
            Priority::Normal,
            Priority::Urgent,
            Priority::Low,
            Priority::High,
            Priority::Urgent,
        ] {
            bus.send("r1", "r2", "s", "b", priority, BTreeMap::new(), None)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let listed = bus.list("r2", ListFilter::default()).await;
        let priorities: Vec<Priority> = listed.iter().map(|m| m.priority).collect();
        assert_eq!(
            priorities,
            vec![
                Priority::Urgent,
                Priority::Urgent,
                Priority::High,
                Priority::Normal,
                Priority::Low,
            ]
        );
    }

    #[tokio::test]
    async fn acknowledge_enforces_valid_transitions() {
        let bus = bus();
        let id = bus
            .send("r1", "r2", "s", "b", Priority::Normal, BTreeMap::new(), None)
            .await
            .unwrap();
        bus.acknowledge(id, MessageStatus::Archived).await.unwrap();
        let result = bus.acknowledge(id, MessageStatus::Read).await;
        assert!(matches!(result, Err(BusError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn forward_preserves_in_reply_to_root() {
        let bus = bus();
        let original = bus
            .send("r1", "r2", "s", "b", Priority::Normal, BTreeMap::new(), None)
            .await
            .unwrap();
        let forwarded = bus.forward(original, "r1", None).await.unwrap();
        let (message, _) = bus.store.get(&forwarded).await.unwrap();
        assert_eq!(message.in_reply_to, Some(original));
    }
}
