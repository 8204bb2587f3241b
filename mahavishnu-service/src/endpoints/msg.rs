//! `msg.*` tool endpoints over the Message Bus.

use crate::tool_surface::MahavishnuError;
use mahavishnu_common::ids::MessageId;
use mahavishnu_common::SafeDisplay;
use mahavishnu_core::bus::ListFilter;
use mahavishnu_core::model::{Message, MessageStatus, Priority};
use mahavishnu_core::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct MsgSendRequest {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct MsgSendResponse {
    pub message_id: MessageId,
}

pub async fn msg_send(
    registry: &Registry,
    req: MsgSendRequest,
) -> Result<MsgSendResponse, MahavishnuError> {
    let message_id = registry
        .bus
        .send(
            &req.from,
            &req.to,
            req.subject,
            req.body,
            req.priority,
            req.context,
            None,
        )
        .await?;
    Ok(MsgSendResponse { message_id })
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message_id: MessageId,
    pub from_repo: String,
    pub to_repo: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub in_reply_to: Option<MessageId>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            message_id: m.message_id,
            from_repo: m.from_repo.0,
            to_repo: m.to_repo.0,
            subject: m.subject,
            body: m.body,
            priority: m.priority,
            in_reply_to: m.in_reply_to,
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MsgListRequest {
    pub repo: String,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub sender: Option<String>,
}

pub async fn msg_list(
    registry: &Registry,
    req: MsgListRequest,
) -> Result<Vec<MessageResponse>, MahavishnuError> {
    let filters = ListFilter {
        status: req.status,
        priority: req.priority,
        sender: req.sender,
    };
    Ok(registry
        .bus
        .list(&req.repo, filters)
        .await
        .into_iter()
        .map(MessageResponse::from)
        .collect())
}

#[derive(Debug, Deserialize)]
pub struct MsgAckRequest {
    pub message_id: MessageId,
    pub new_status: MessageStatus,
}

pub async fn msg_ack(registry: &Registry, req: MsgAckRequest) -> Result<(), MahavishnuError> {
    registry.bus.acknowledge(req.message_id, req.new_status).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct MsgForwardRequest {
    pub message_id: MessageId,
    pub to: String,
    #[serde(default)]
    pub prepend: Option<String>,
}

pub async fn msg_forward(
    registry: &Registry,
    req: MsgForwardRequest,
) -> Result<MsgSendResponse, MahavishnuError> {
    let message_id = registry
        .bus
        .forward(req.message_id, &req.to, req.prepend)
        .await?;
    Ok(MsgSendResponse { message_id })
}

#[derive(Debug, Deserialize)]
pub struct MsgBroadcastRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct MsgBroadcastResponse {
    /// One entry per requested recipient, in request order. A recipient
    /// that failed (e.g. unknown repo) is reported inline rather than
    /// aborting the rest of the broadcast — best-effort, partial delivery.
    pub sent: Vec<BroadcastOutcome>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastOutcome {
    pub to: String,
    pub message_id: Option<MessageId>,
    pub error: Option<String>,
}

pub async fn msg_broadcast(
    registry: &Registry,
    req: MsgBroadcastRequest,
) -> Result<MsgBroadcastResponse, MahavishnuError> {
    let mut sent = Vec::with_capacity(req.to.len());
    for to in req.to {
        let result = registry
            .bus
            .send(
                &req.from,
                &to,
                req.subject.clone(),
                req.body.clone(),
                req.priority,
                req.context.clone(),
                None,
            )
            .await;
        sent.push(match result {
            Ok(message_id) => BroadcastOutcome {
                to,
                message_id: Some(message_id),
                error: None,
            },
            Err(e) => BroadcastOutcome {
                to,
                message_id: None,
                error: Some(e.to_safe_string()),
            },
        });
    }
    Ok(MsgBroadcastResponse { sent })
}
