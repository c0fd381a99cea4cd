use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// An event row as seen by one viewer: `is_rsvped` is relative to that viewer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventModel {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub organizer_id: Option<Uuid>,
    pub organizer_name: Option<String>,
    pub tags: Vec<String>,
    pub max_attendees: Option<i32>,
    pub attendee_count: i64,
    pub is_rsvped: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventModel {
    pub fn is_full(&self) -> bool {
        self.max_attendees
            .is_some_and(|max| self.attendee_count >= i64::from(max))
    }
}

/// The writable columns of an event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub tags: Vec<String>,
    pub max_attendees: Option<i32>,
}

impl EventDraft {
    /// Trims text, drops blank and repeated tags, then checks the row constraints.
    pub fn normalized(mut self) -> AppResult<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(AppError::InvalidArgument("title is required".to_string()));
        }
        self.description = blank_to_none(self.description);
        self.venue = blank_to_none(self.venue);

        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        self.tags = tags;

        if let Some(end) = self.end_time {
            if end <= self.start_time {
                return Err(AppError::InvalidArgument(
                    "end_time must be after start_time".to_string(),
                ));
            }
        }
        match self.max_attendees {
            Some(max) if max < 0 => Err(AppError::InvalidArgument(
                "max_attendees cannot be negative".to_string(),
            )),
            Some(0) => Ok(Self {
                max_attendees: None,
                ..self
            }),
            _ => Ok(self),
        }
    }

    /// Overlays `changes` on this draft. Empty strings and zero clear optional fields.
    pub fn apply(self, changes: EventChanges) -> Self {
        Self {
            title: changes.title.unwrap_or(self.title),
            description: changes.description.map_or(self.description, Some),
            start_time: changes.start_time.unwrap_or(self.start_time),
            end_time: changes.end_time.unwrap_or(self.end_time),
            venue: changes.venue.map_or(self.venue, Some),
            tags: changes.tags.unwrap_or(self.tags),
            max_attendees: changes.max_attendees.map_or(self.max_attendees, Some),
        }
    }
}

impl From<&EventModel> for EventDraft {
    fn from(event: &EventModel) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            venue: event.venue.clone(),
            tags: event.tags.clone(),
            max_attendees: event.max_attendees,
        }
    }
}

/// Partial update; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct EventChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    /// `Some(None)` removes the end time.
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub venue: Option<String>,
    pub tags: Option<Vec<String>>,
    pub max_attendees: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub upcoming: bool,
    pub query: Option<String>,
    pub tag: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> EventDraft {
        EventDraft {
            title: "  Robotics club demo ".to_string(),
            description: Some("   ".to_string()),
            start_time: Utc::now(),
            end_time: None,
            venue: Some("Main hall".to_string()),
            tags: vec!["Tech".to_string(), " tech ".to_string(), "".to_string(), "club".to_string()],
            max_attendees: Some(0),
        }
    }

    #[test]
    fn test_normalized_cleans_fields() {
        let d = draft().normalized().unwrap();
        assert_eq!(d.title, "Robotics club demo");
        assert_eq!(d.description, None);
        assert_eq!(d.tags, vec!["tech".to_string(), "club".to_string()]);
        assert_eq!(d.max_attendees, None);
    }

    #[test]
    fn test_normalized_rejects_bad_rows() {
        let mut d = draft();
        d.end_time = Some(d.start_time - Duration::hours(1));
        assert!(matches!(d.normalized(), Err(AppError::InvalidArgument(_))));

        let mut d = draft();
        d.title = " ".to_string();
        assert!(matches!(d.normalized(), Err(AppError::InvalidArgument(_))));

        let mut d = draft();
        d.max_attendees = Some(-3);
        assert!(matches!(d.normalized(), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_apply_changes() {
        let base = draft().normalized().unwrap();
        let later = base.start_time + Duration::hours(2);
        let updated = base
            .clone()
            .apply(EventChanges {
                venue: Some(String::new()),
                end_time: Some(Some(later)),
                max_attendees: Some(40),
                ..Default::default()
            })
            .normalized()
            .unwrap();
        assert_eq!(updated.title, base.title);
        assert_eq!(updated.venue, None);
        assert_eq!(updated.end_time, Some(later));
        assert_eq!(updated.max_attendees, Some(40));

        let cleared = updated
            .apply(EventChanges {
                end_time: Some(None),
                max_attendees: Some(0),
                ..Default::default()
            })
            .normalized()
            .unwrap();
        assert_eq!(cleared.end_time, None);
        assert_eq!(cleared.max_attendees, None);
    }

    #[test]
    fn test_is_full() {
        let now = Utc::now();
        let mut event = EventModel {
            id: 1,
            title: "Talk".to_string(),
            description: None,
            start_time: now,
            end_time: None,
            venue: None,
            organizer_id: None,
            organizer_name: None,
            tags: vec![],
            max_attendees: Some(2),
            attendee_count: 1,
            is_rsvped: false,
            created_at: now,
            updated_at: now,
        };
        assert!(!event.is_full());
        event.attendee_count = 2;
        assert!(event.is_full());
        event.max_attendees = None;
        assert!(!event.is_full());
    }
}
