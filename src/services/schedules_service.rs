use sqlx::PgPool;
use tonic::{Request, Response, Status};

use crate::authz;
use crate::db::{schedules, with_transaction, RetryConfig, TxMode};
use crate::error::{AppError, AppResult};
use crate::free_slots::{self, parse_clock, FreeSlot};
use crate::middleware::authenticated_user;
use crate::models::{ScheduleEntry, ScheduleModel};
use crate::proto::common::Empty;
use crate::proto::schedules::schedules_service_server::SchedulesService;
use crate::proto::schedules::{
    CreateScheduleReq, DeleteScheduleReq, FindFreeSlotsReq, FindFreeSlotsRes, ListSchedulesRes,
    Schedule, ScheduleRes, UpdateScheduleReq,
};

pub struct SchedulesServiceImpl {
    pool: PgPool,
    retry: RetryConfig,
}

/// Validates a timetable entry as sent by the client.
fn schedule_entry(
    day_of_week: i32,
    start_time: &str,
    end_time: &str,
    title: &str,
    venue: &str,
) -> AppResult<ScheduleEntry> {
    if !(0..=6).contains(&day_of_week) {
        return Err(AppError::InvalidArgument(format!(
            "day_of_week must be between 0 and 6 (got {})",
            day_of_week
        )));
    }
    let start_time = parse_clock(start_time)?;
    let end_time = parse_clock(end_time)?;
    if start_time >= end_time {
        return Err(AppError::InvalidArgument(
            "start_time must be before end_time".to_string(),
        ));
    }
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidArgument("title is required".to_string()));
    }
    let venue = venue.trim();

    Ok(ScheduleEntry {
        day_of_week: day_of_week as i16,
        start_time,
        end_time,
        title: title.to_string(),
        venue: (!venue.is_empty()).then(|| venue.to_string()),
    })
}

impl SchedulesServiceImpl {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    fn model_to_proto(model: &ScheduleModel) -> Schedule {
        Schedule {
            id: model.id,
            user_id: model.user_id.to_string(),
            day_of_week: i32::from(model.day_of_week),
            start_time: model.start_time.format("%H:%M").to_string(),
            end_time: model.end_time.format("%H:%M").to_string(),
            title: model.title.clone(),
            venue: model.venue.clone().unwrap_or_default(),
        }
    }

    fn slot_to_proto(slot: &FreeSlot) -> crate::proto::schedules::FreeSlot {
        crate::proto::schedules::FreeSlot {
            day_of_week: i32::from(slot.day),
            start_time: slot.start_time(),
            end_time: slot.end_time(),
        }
    }
}

#[tonic::async_trait]
impl SchedulesService for SchedulesServiceImpl {
    async fn list_my_schedules(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<ListSchedulesRes>, Status> {
        let auth_user = authenticated_user(&request)?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))?;
        let models = schedules::list_for_user(&mut conn, auth_user.user_id).await?;

        let schedules = models.iter().map(Self::model_to_proto).collect();
        Ok(Response::new(ListSchedulesRes { schedules }))
    }

    async fn create_schedule(
        &self,
        request: Request<CreateScheduleReq>,
    ) -> Result<Response<ScheduleRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();
        let entry = schedule_entry(
            req.day_of_week,
            &req.start_time,
            &req.end_time,
            &req.title,
            &req.venue,
        )?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))?;
        let model = schedules::insert_schedule(&mut conn, auth_user.user_id, &entry).await?;

        Ok(Response::new(ScheduleRes {
            schedule: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn update_schedule(
        &self,
        request: Request<UpdateScheduleReq>,
    ) -> Result<Response<ScheduleRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();
        let schedule_id = req.id;
        let entry = schedule_entry(
            req.day_of_week,
            &req.start_time,
            &req.end_time,
            &req.title,
            &req.venue,
        )?;

        let model = with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            let auth_user = auth_user.clone();
            let entry = entry.clone();
            Box::pin(async move {
                let existing = schedules::get_schedule(conn, schedule_id).await?;
                authz::ensure_schedule_owner(&existing, &auth_user)?;
                schedules::update_schedule(conn, schedule_id, &entry).await
            })
        })
        .await?;

        Ok(Response::new(ScheduleRes {
            schedule: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn delete_schedule(
        &self,
        request: Request<DeleteScheduleReq>,
    ) -> Result<Response<Empty>, Status> {
        let auth_user = authenticated_user(&request)?;
        let schedule_id = request.into_inner().id;

        with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            let auth_user = auth_user.clone();
            Box::pin(async move {
                let existing = schedules::get_schedule(conn, schedule_id).await?;
                authz::ensure_schedule_owner(&existing, &auth_user)?;
                schedules::delete_schedule(conn, schedule_id).await
            })
        })
        .await?;

        Ok(Response::new(Empty {}))
    }

    async fn find_free_slots(
        &self,
        request: Request<FindFreeSlotsReq>,
    ) -> Result<Response<FindFreeSlotsRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();

        let slots = free_slots::compute_free_slots(
            &self.pool,
            &self.retry,
            auth_user.user_id,
            &req.user_ids,
            req.day_of_week,
        )
        .await?;

        Ok(Response::new(FindFreeSlotsRes {
            slots: slots.iter().map(Self::slot_to_proto).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_entry_valid() {
        let entry = schedule_entry(1, "09:00", "10:30:00", " Algorithms ", "").unwrap();
        assert_eq!(entry.day_of_week, 1);
        assert_eq!(entry.start_time.format("%H:%M").to_string(), "09:00");
        assert_eq!(entry.end_time.format("%H:%M").to_string(), "10:30");
        assert_eq!(entry.title, "Algorithms");
        assert_eq!(entry.venue, None);
    }

    #[test]
    fn test_schedule_entry_rejects_bad_day() {
        assert!(matches!(
            schedule_entry(7, "09:00", "10:00", "Lab", "B12"),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            schedule_entry(-1, "09:00", "10:00", "Lab", "B12"),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_schedule_entry_rejects_inverted_range() {
        assert!(matches!(
            schedule_entry(2, "11:00", "10:00", "Lab", ""),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            schedule_entry(2, "10:00", "10:00", "Lab", ""),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_schedule_entry_requires_title_and_clock() {
        assert!(schedule_entry(2, "10:00", "11:00", "   ", "").is_err());
        assert!(schedule_entry(2, "10am", "11:00", "Lab", "").is_err());
    }

    #[test]
    fn test_slot_to_proto() {
        let slot = FreeSlot {
            day: 3,
            range: free_slots::Interval::new(13 * 60, 22 * 60),
        };
        let proto = SchedulesServiceImpl::slot_to_proto(&slot);
        assert_eq!(proto.day_of_week, 3);
        assert_eq!(proto.start_time, "13:00");
        assert_eq!(proto.end_time, "22:00");
    }
}
