//! Ownership and role guards, evaluated before any state change runs.

use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::models::{EventModel, ItemModel, ScheduleModel};

/// The finder of an item, or an admin, may edit it and arbitrate its claims.
pub fn ensure_item_manager(item: &ItemModel, caller: &AuthenticatedUser) -> AppResult<()> {
    if item.finder_id == caller.user_id || caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized".to_string()))
    }
}

/// Finders cannot claim their own listing.
pub fn ensure_not_finder(item: &ItemModel, caller: &AuthenticatedUser) -> AppResult<()> {
    if item.finder_id == caller.user_id {
        Err(AppError::Forbidden(
            "You cannot claim an item you posted".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Schedules are private to their owner; admins get no override here.
pub fn ensure_schedule_owner(schedule: &ScheduleModel, caller: &AuthenticatedUser) -> AppResult<()> {
    if schedule.user_id == caller.user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not your schedule".to_string()))
    }
}

pub fn ensure_admin(caller: &AuthenticatedUser) -> AppResult<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin access required".to_string()))
    }
}

/// Faculty and admins may publish events.
pub fn ensure_can_organize_events(caller: &AuthenticatedUser) -> AppResult<()> {
    if caller.role.can_organize_events() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only faculty or admins can create events".to_string(),
        ))
    }
}

/// The organizer of an event, or an admin, may edit or delete it.
pub fn ensure_event_organizer(event: &EventModel, caller: &AuthenticatedUser) -> AppResult<()> {
    if event.organizer_id == Some(caller.user_id) || caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized".to_string()))
    }
}
