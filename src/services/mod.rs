pub mod auth_service;
pub mod events_service;
pub mod health_service;
pub mod items_service;
pub mod notifications_service;
pub mod schedules_service;
pub mod users_service;

pub use auth_service::AuthServiceImpl;
pub use events_service::EventsServiceImpl;
pub use health_service::HealthServiceImpl;
pub use items_service::ItemsServiceImpl;
pub use notifications_service::NotificationsServiceImpl;
pub use schedules_service::SchedulesServiceImpl;
pub use users_service::UsersServiceImpl;

pub(crate) const DEFAULT_PAGE_LIMIT: i64 = 50;
pub(crate) const MAX_PAGE_LIMIT: i64 = 100;

/// Trimmed value, or `None` for an empty proto string.
pub(crate) fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Zero or negative means "default"; anything above the cap is clamped.
pub(crate) fn page_limit(requested: i32) -> i64 {
    match i64::from(requested) {
        l if l <= 0 => DEFAULT_PAGE_LIMIT,
        l => l.min(MAX_PAGE_LIMIT),
    }
}

pub(crate) fn page_offset(requested: i32) -> i64 {
    i64::from(requested.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("   "), None);
        assert_eq!(non_empty(" a "), Some("a".to_string()));
    }

    #[test]
    fn test_paging() {
        assert_eq!(page_limit(0), DEFAULT_PAGE_LIMIT);
        assert_eq!(page_limit(-1), DEFAULT_PAGE_LIMIT);
        assert_eq!(page_limit(20), 20);
        assert_eq!(page_limit(1000), MAX_PAGE_LIMIT);
        assert_eq!(page_offset(-4), 0);
        assert_eq!(page_offset(30), 30);
    }
}
