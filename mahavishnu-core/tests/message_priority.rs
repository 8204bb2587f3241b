//! Scenario: messages list back in priority-descending order (ties by
//! recency), exercised against a real `Registry`-wired bus rather than the
//! bus in isolation.

use super::test_registry;
use mahavishnu_core::bus::ListFilter;
use mahavishnu_core::model::{InterPoolStrategy, Priority};
use mahavishnu_test_support::FakeContainerRuntime;
use std::collections::BTreeMap;
use std::sync::Arc;
use test_r::test;

#[tokio::test]
async fn messages_list_priority_descending_then_recency_descending() {
    let (registry, _clock) = test_registry(
        InterPoolStrategy::LeastLoaded,
        Arc::new(FakeContainerRuntime::new()),
    );
    registry.bus.register_repo("sender", b"sender-secret".to_vec());
    registry.bus.register_repo("receiver", b"receiver-secret".to_vec());

    for priority in [
        Priority::Normal,
        Priority::Urgent,
        Priority::Low,
        Priority::High,
        Priority::Urgent,
    ] {
        registry
            .bus
            .send(
                "sender",
                "receiver",
                "subject",
                "body",
                priority,
                BTreeMap::new(),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let listed = registry.bus.list("receiver", ListFilter::default()).await;
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
