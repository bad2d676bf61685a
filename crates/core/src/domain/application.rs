use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TransitionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub i64);

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a chat actor. Webhook-sourced submitters carry synthetic
/// negative ids so they can never collide with a real chat account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub i64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a transport message, used to edit or retire the
/// single outstanding broadcast per application.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Closed,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationSource {
    Chat,
    Webhook,
}

impl ApplicationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Webhook => "webhook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Self::Chat),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

/// Payload for creating a pending application. Field presence is validated
/// upstream (intake engine or webhook handler) before this is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewApplication {
    pub submitter_id: ActorId,
    pub submitter_name: String,
    pub address: String,
    pub phone: String,
    pub task: String,
    pub comment: Option<String>,
    pub photo_ref: Option<String>,
    pub source: ApplicationSource,
}

/// A single service request with lifecycle status. Payload fields are
/// immutable after creation; only status and its companion metadata move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Application {
    pub id: ApplicationId,
    pub submitter_id: ActorId,
    pub submitter_name: String,
    pub address: String,
    pub phone: String,
    pub task: String,
    pub comment: Option<String>,
    pub photo_ref: Option<String>,
    pub source: ApplicationSource,
    pub status: ApplicationStatus,
    pub claimant_id: Option<ActorId>,
    pub claimant_name: Option<String>,
    pub return_reason: Option<String>,
    pub returned_by_id: Option<ActorId>,
    pub returned_by_name: Option<String>,
    pub close_reason: Option<String>,
    pub closed_by_id: Option<ActorId>,
    pub closed_by_name: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub broadcast_ref: Option<MessageRef>,
    pub created_at: DateTime<Utc>,
}

impl Application {
    /// Accept is guarded: only a pending application can gain a claimant.
    pub fn can_accept(&self) -> Result<(), TransitionError> {
        match self.status {
            ApplicationStatus::Pending => Ok(()),
            ApplicationStatus::Accepted => Err(TransitionError::NotPending),
            ApplicationStatus::Closed => Err(TransitionError::AlreadyClosed),
        }
    }

    /// Returning to the pool is reserved for the current claimant.
    pub fn can_release(&self, actor: ActorId) -> Result<(), TransitionError> {
        self.claimant_guard(actor)
    }

    /// Close is reserved for the current claimant as well.
    pub fn can_close(&self, actor: ActorId) -> Result<(), TransitionError> {
        self.claimant_guard(actor)
    }

    pub fn is_claimant(&self, actor: ActorId) -> bool {
        self.status == ApplicationStatus::Accepted && self.claimant_id == Some(actor)
    }

    fn claimant_guard(&self, actor: ActorId) -> Result<(), TransitionError> {
        match self.status {
            ApplicationStatus::Closed => Err(TransitionError::AlreadyClosed),
            ApplicationStatus::Pending => Err(TransitionError::NotClaimant),
            ApplicationStatus::Accepted if self.claimant_id == Some(actor) => Ok(()),
            ApplicationStatus::Accepted => Err(TransitionError::NotClaimant),
        }
    }
}
