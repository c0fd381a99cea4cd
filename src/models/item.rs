use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// Lifecycle of a lost-and-found listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Active,
    Claimed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Claimed => "claimed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ItemStatus::Active),
            "claimed" => Ok(ItemStatus::Claimed),
            other => Err(AppError::InvalidState(format!(
                "unknown item status '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ItemStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ItemModel {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ItemStatus,
    pub finder_id: uuid::Uuid,
    pub claimant_id: Option<uuid::Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields supplied when a finder posts a new item.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

/// Filters accepted by the item listing.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub category: Option<String>,
    pub query: Option<String>,
    pub limit: i64,
    pub offset: i64,
}
