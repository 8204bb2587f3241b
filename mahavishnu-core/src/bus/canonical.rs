//! Canonical message form for signing and forwarding.

use crate::model::{Message, Priority};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Deterministic serialization of `{message_id, from, to, subject, body,
/// priority, timestamp, context(sorted keys)}`. `BTreeMap` already sorts by
/// key, so `serde_json` serialization of `context` is stable.
pub fn canonical_form(message: &Message) -> String {
    let context_json: serde_json::Map<String, serde_json::Value> = message
        .context
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::json!({
        "message_id": message.message_id.to_string(),
        "from": message.from_repo.0,
        "to": message.to_repo.0,
        "subject": message.subject,
        "body": message.body,
        "priority": priority_rank(message.priority),
        "timestamp": message.timestamp.to_rfc3339(),
        "context": context_json,
    })
    .to_string()
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
        Priority::Urgent => 3,
    }
}

pub fn sign(canonical: &str, secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(canonical.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

pub fn verify(canonical: &str, secret: &[u8], signature: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(canonical.as_bytes());
    mac.verify_slice(signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use mahavishnu_common::ids::{MessageId, RepoName};
    use std::collections::BTreeMap;
    use test_r::test;

    fn sample() -> Message {
        Message {
            message_id: MessageId::new(),
            from_repo: RepoName::new("a"),
            to_repo: RepoName::new("b"),
            subject: "hello".into(),
            body: "world".into(),
            priority: Priority::Normal,
            in_reply_to: None,
            workflow_id: None,
            timestamp: chrono::Utc::now(),
            signature: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn canonical_form_is_deterministic() {
        let message = sample();
        assert_eq!(canonical_form(&message), canonical_form(&message));
    }

    #[test]
    fn signature_round_trips() {
        let message = sample();
        let canonical = canonical_form(&message);
        let sig = sign(&canonical, b"secret");
        assert!(verify(&canonical, b"secret", &sig));
        assert!(!verify(&canonical, b"wrong-secret", &sig));
    }
}
