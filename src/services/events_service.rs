use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tonic::{Request, Response, Status};

use super::{non_empty, page_limit, page_offset};
use crate::authz;
use crate::db::{events, with_transaction, RetryConfig, TxMode};
use crate::error::{AppError, AppResult};
use crate::ics;
use crate::middleware::{authenticated_user, optional_user};
use crate::models::{EventChanges, EventDraft, EventFilter, EventModel};
use crate::proto::common::Empty;
use crate::proto::events::events_service_server::EventsService;
use crate::proto::events::{
    CreateEventReq, DeleteEventReq, Event, EventIcsRes, EventRes, GetEventReq, ListEventsReq,
    ListEventsRes, RsvpReq, UpdateEventReq,
};

pub struct EventsServiceImpl {
    pool: PgPool,
    retry: RetryConfig,
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, Status> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Status::invalid_argument(format!("{} must be RFC 3339: {}", field, e)))
}

/// An empty string means "no value".
fn optional_time(field: &str, value: &str) -> Result<Option<DateTime<Utc>>, Status> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_time(field, value).map(Some)
    }
}

fn create_draft(req: CreateEventReq) -> Result<EventDraft, Status> {
    let draft = EventDraft {
        start_time: parse_time("start_time", &req.start_time)?,
        end_time: optional_time("end_time", &req.end_time)?,
        title: req.title,
        description: Some(req.description),
        venue: Some(req.venue),
        tags: req.tags,
        max_attendees: Some(req.max_attendees),
    };
    Ok(draft.normalized()?)
}

fn event_changes(req: UpdateEventReq) -> Result<EventChanges, Status> {
    Ok(EventChanges {
        start_time: req
            .start_time
            .as_deref()
            .map(|s| parse_time("start_time", s))
            .transpose()?,
        end_time: req
            .end_time
            .as_deref()
            .map(|s| optional_time("end_time", s))
            .transpose()?,
        title: req.title,
        description: req.description,
        venue: req.venue,
        tags: req.tags.map(|list| list.tags),
        max_attendees: req.max_attendees,
    })
}

/// A caller may RSVP once, and only while seats remain.
fn ensure_can_rsvp(event: &EventModel) -> AppResult<()> {
    if event.is_rsvped {
        return Err(AppError::AlreadyExists(
            "Already RSVPed to this event".to_string(),
        ));
    }
    if event.is_full() {
        return Err(AppError::InvalidState("Event is full".to_string()));
    }
    Ok(())
}

impl EventsServiceImpl {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    fn model_to_proto(model: &EventModel) -> Event {
        Event {
            id: model.id,
            title: model.title.clone(),
            description: model.description.clone().unwrap_or_default(),
            start_time: model.start_time.to_rfc3339(),
            end_time: model.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            venue: model.venue.clone().unwrap_or_default(),
            organizer_id: model
                .organizer_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            organizer_name: model.organizer_name.clone().unwrap_or_default(),
            tags: model.tags.clone(),
            max_attendees: model.max_attendees.unwrap_or(0),
            attendee_count: model.attendee_count,
            is_rsvped: model.is_rsvped,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }

    fn event_res(model: &EventModel) -> Response<EventRes> {
        Response::new(EventRes {
            event: Some(Self::model_to_proto(model)),
        })
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, Status> {
        self.pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))
    }
}

#[tonic::async_trait]
impl EventsService for EventsServiceImpl {
    async fn list_events(
        &self,
        request: Request<ListEventsReq>,
    ) -> Result<Response<ListEventsRes>, Status> {
        let viewer = optional_user(&request).map(|u| u.user_id);
        let req = request.into_inner();

        let filter = EventFilter {
            upcoming: req.upcoming,
            query: non_empty(&req.q),
            tag: non_empty(&req.tag).map(|t| t.to_lowercase()),
            limit: page_limit(req.limit),
            offset: page_offset(req.offset),
        };

        let mut conn = self.acquire().await?;
        let models = events::list_events(&mut conn, &filter, viewer).await?;

        let events = models.iter().map(Self::model_to_proto).collect();
        Ok(Response::new(ListEventsRes { events }))
    }

    async fn get_event(&self, request: Request<GetEventReq>) -> Result<Response<EventRes>, Status> {
        let viewer = optional_user(&request).map(|u| u.user_id);
        let id = request.into_inner().id;

        let mut conn = self.acquire().await?;
        let model = events::get_event(&mut conn, id, viewer).await?;

        Ok(Self::event_res(&model))
    }

    async fn create_event(
        &self,
        request: Request<CreateEventReq>,
    ) -> Result<Response<EventRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        authz::ensure_can_organize_events(&auth_user)?;
        let draft = create_draft(request.into_inner())?;

        let mut conn = self.acquire().await?;
        let model = events::insert_event(&mut conn, auth_user.user_id, &draft).await?;

        tracing::info!("Event {} created by {}", model.id, auth_user.user_id);
        Ok(Self::event_res(&model))
    }

    async fn update_event(
        &self,
        request: Request<UpdateEventReq>,
    ) -> Result<Response<EventRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();
        let event_id = req.id;
        let changes = event_changes(req)?;

        let model = with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            let auth_user = auth_user.clone();
            let changes = changes.clone();
            Box::pin(async move {
                events::lock_event(conn, event_id).await?;
                let current = events::get_event(conn, event_id, Some(auth_user.user_id)).await?;
                authz::ensure_event_organizer(&current, &auth_user)?;
                let draft = EventDraft::from(&current).apply(changes).normalized()?;
                events::update_event(conn, event_id, &draft, auth_user.user_id).await
            })
        })
        .await?;

        Ok(Self::event_res(&model))
    }

    async fn delete_event(
        &self,
        request: Request<DeleteEventReq>,
    ) -> Result<Response<Empty>, Status> {
        let auth_user = authenticated_user(&request)?;
        let event_id = request.into_inner().id;

        with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            let auth_user = auth_user.clone();
            Box::pin(async move {
                events::lock_event(conn, event_id).await?;
                let current = events::get_event(conn, event_id, None).await?;
                authz::ensure_event_organizer(&current, &auth_user)?;
                events::delete_event(conn, event_id).await
            })
        })
        .await?;

        tracing::info!("Event {} deleted by {}", event_id, auth_user.user_id);
        Ok(Response::new(Empty {}))
    }

    async fn rsvp(&self, request: Request<RsvpReq>) -> Result<Response<EventRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let event_id = request.into_inner().event_id;
        let user_id = auth_user.user_id;

        // The event row lock serializes RSVPs, so the capacity check cannot be raced.
        let model = with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            Box::pin(async move {
                events::lock_event(conn, event_id).await?;
                let current = events::get_event(conn, event_id, Some(user_id)).await?;
                ensure_can_rsvp(&current)?;
                events::insert_rsvp(conn, event_id, user_id).await?;
                events::get_event(conn, event_id, Some(user_id)).await
            })
        })
        .await?;

        tracing::info!(
            "User {} RSVPed to event {} ({} attending)",
            user_id,
            event_id,
            model.attendee_count
        );
        Ok(Self::event_res(&model))
    }

    async fn cancel_rsvp(&self, request: Request<RsvpReq>) -> Result<Response<EventRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let event_id = request.into_inner().event_id;
        let user_id = auth_user.user_id;

        let model = with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            Box::pin(async move {
                events::lock_event(conn, event_id).await?;
                events::delete_rsvp(conn, event_id, user_id).await?;
                events::get_event(conn, event_id, Some(user_id)).await
            })
        })
        .await?;

        Ok(Self::event_res(&model))
    }

    async fn export_event_ics(
        &self,
        request: Request<GetEventReq>,
    ) -> Result<Response<EventIcsRes>, Status> {
        let id = request.into_inner().id;

        let mut conn = self.acquire().await?;
        let model = events::get_event(&mut conn, id, None).await?;

        Ok(Response::new(EventIcsRes {
            filename: ics::filename(model.id),
            content_type: ics::CONTENT_TYPE.to_string(),
            ics: ics::render_event(&model, Utc::now()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::events::TagList;

    fn create_req() -> CreateEventReq {
        CreateEventReq {
            title: " Career fair ".to_string(),
            description: String::new(),
            start_time: "2024-11-05T10:00:00+05:30".to_string(),
            end_time: String::new(),
            venue: "Auditorium".to_string(),
            tags: vec!["Careers".to_string()],
            max_attendees: 0,
        }
    }

    fn event(max_attendees: Option<i32>, attendee_count: i64, is_rsvped: bool) -> EventModel {
        let now = Utc::now();
        EventModel {
            id: 1,
            title: "Career fair".to_string(),
            description: None,
            start_time: now,
            end_time: None,
            venue: None,
            organizer_id: None,
            organizer_name: None,
            tags: vec![],
            max_attendees,
            attendee_count,
            is_rsvped,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_create_draft_normalizes_to_utc() {
        let draft = create_draft(create_req()).unwrap();
        assert_eq!(draft.title, "Career fair");
        assert_eq!(draft.description, None);
        assert_eq!(draft.venue.as_deref(), Some("Auditorium"));
        assert_eq!(draft.start_time.to_rfc3339(), "2024-11-05T04:30:00+00:00");
        assert_eq!(draft.end_time, None);
        assert_eq!(draft.tags, vec!["careers".to_string()]);
        assert_eq!(draft.max_attendees, None);
    }

    #[test]
    fn test_create_draft_rejects_bad_times() {
        let mut req = create_req();
        req.start_time = "next tuesday".to_string();
        let err = create_draft(req).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let mut req = create_req();
        req.end_time = "2024-11-05T09:00:00+05:30".to_string();
        let err = create_draft(req).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_event_changes_distinguish_unset_and_clear() {
        let changes = event_changes(UpdateEventReq {
            id: 1,
            title: None,
            description: Some(String::new()),
            start_time: None,
            end_time: Some(String::new()),
            venue: None,
            tags: Some(TagList {
                tags: vec!["talks".to_string()],
            }),
            max_attendees: Some(0),
        })
        .unwrap();

        assert_eq!(changes.title, None);
        assert_eq!(changes.description.as_deref(), Some(""));
        assert_eq!(changes.start_time, None);
        assert_eq!(changes.end_time, Some(None));
        assert_eq!(changes.tags, Some(vec!["talks".to_string()]));
        assert_eq!(changes.max_attendees, Some(0));
    }

    #[test]
    fn test_rsvp_rules() {
        assert!(ensure_can_rsvp(&event(None, 500, false)).is_ok());
        assert!(ensure_can_rsvp(&event(Some(3), 2, false)).is_ok());
        assert!(matches!(
            ensure_can_rsvp(&event(Some(3), 3, false)),
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            ensure_can_rsvp(&event(Some(3), 1, true)),
            Err(AppError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_model_to_proto_fills_defaults() {
        let proto = EventsServiceImpl::model_to_proto(&event(None, 4, true));
        assert_eq!(proto.end_time, "");
        assert_eq!(proto.organizer_id, "");
        assert_eq!(proto.max_attendees, 0);
        assert_eq!(proto.attendee_count, 4);
        assert!(proto.is_rsvped);
    }
}
