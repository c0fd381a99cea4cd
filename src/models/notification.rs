use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ClaimSubmitted,
    ClaimApproved,
    ClaimRejected,
    ClaimReopened,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ClaimSubmitted => "claim_submitted",
            NotificationKind::ClaimApproved => "claim_approved",
            NotificationKind::ClaimRejected => "claim_rejected",
            NotificationKind::ClaimReopened => "claim_reopened",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationModel {
    pub id: i64,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

/// One page of a user's inbox plus the counters shown next to it.
#[derive(Debug, Clone)]
pub struct NotificationPage {
    pub total: i64,
    pub unread: i64,
    pub notifications: Vec<NotificationModel>,
}
