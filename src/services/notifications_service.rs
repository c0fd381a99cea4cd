use sqlx::PgPool;
use tonic::{Request, Response, Status};

use super::{page_limit, page_offset};
use crate::db::notifications;
use crate::middleware::authenticated_user;
use crate::models::NotificationModel;
use crate::proto::common::Empty;
use crate::proto::notifications::notifications_service_server::NotificationsService;
use crate::proto::notifications::{
    ListNotificationsReq, ListNotificationsRes, MarkAllReadRes, Notification, NotificationIdReq,
    NotificationRes,
};

/// A user's in-app inbox. Every call is scoped to the caller's own rows.
pub struct NotificationsServiceImpl {
    pool: PgPool,
}

impl NotificationsServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn model_to_proto(model: &NotificationModel) -> Notification {
        Notification {
            id: model.id,
            kind: model.kind.clone(),
            title: model.title.clone(),
            message: model.message.clone(),
            link: model.link.clone().unwrap_or_default(),
            read: model.read,
            created_at: model.created_at.to_rfc3339(),
        }
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, Status> {
        self.pool
            .acquire()
            .await
            .map_err(|e| Status::internal(format!("Database connection error: {}", e)))
    }
}

#[tonic::async_trait]
impl NotificationsService for NotificationsServiceImpl {
    async fn list_notifications(
        &self,
        request: Request<ListNotificationsReq>,
    ) -> Result<Response<ListNotificationsRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();

        let mut conn = self.acquire().await?;
        let page = notifications::list_for_user(
            &mut conn,
            auth_user.user_id,
            req.unread_only,
            page_limit(req.limit),
            page_offset(req.offset),
        )
        .await?;

        Ok(Response::new(ListNotificationsRes {
            total: page.total,
            unread: page.unread,
            notifications: page.notifications.iter().map(Self::model_to_proto).collect(),
        }))
    }

    async fn mark_read(
        &self,
        request: Request<NotificationIdReq>,
    ) -> Result<Response<NotificationRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let id = request.into_inner().id;

        let mut conn = self.acquire().await?;
        let model = notifications::mark_read(&mut conn, id, auth_user.user_id).await?;

        Ok(Response::new(NotificationRes {
            notification: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn mark_all_read(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<MarkAllReadRes>, Status> {
        let auth_user = authenticated_user(&request)?;

        let mut conn = self.acquire().await?;
        let updated = notifications::mark_all_read(&mut conn, auth_user.user_id).await?;

        tracing::debug!("Marked {} notifications read for {}", updated, auth_user.user_id);
        Ok(Response::new(MarkAllReadRes {
            updated: i64::try_from(updated).unwrap_or(i64::MAX),
        }))
    }

    async fn delete_notification(
        &self,
        request: Request<NotificationIdReq>,
    ) -> Result<Response<Empty>, Status> {
        let auth_user = authenticated_user(&request)?;
        let id = request.into_inner().id;

        let mut conn = self.acquire().await?;
        notifications::delete_notification(&mut conn, id, auth_user.user_id).await?;

        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_model_to_proto() {
        let model = NotificationModel {
            id: 9,
            user_id: Uuid::new_v4(),
            kind: "claim_approved".to_string(),
            title: "Claim approved".to_string(),
            message: "Your claim on \"Umbrella\" was approved.".to_string(),
            link: None,
            read: false,
            created_at: chrono::Utc::now(),
        };

        let proto = NotificationsServiceImpl::model_to_proto(&model);

        assert_eq!(proto.id, 9);
        assert_eq!(proto.kind, "claim_approved");
        assert_eq!(proto.link, "");
        assert!(!proto.read);
    }

    #[tokio::test]
    async fn test_requires_authenticated_user() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/campus_unused")
            .unwrap();
        let service = NotificationsServiceImpl::new(pool);

        let err = service
            .mark_all_read(Request::new(Empty {}))
            .await
            .unwrap_err();

        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }
}
