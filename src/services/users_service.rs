use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use super::{non_empty, page_limit, page_offset};
use crate::authz;
use crate::db::users;
use crate::error::{AppError, AppResult};
use crate::middleware::{authenticated_user, AuthenticatedUser};
use crate::models::{ProfileChanges, Role, UserFilter, UserProfile};
use crate::proto::common::Empty;
use crate::proto::users::users_service_server::UsersService;
use crate::proto::users::{
    ListUsersReq, ListUsersRes, Profile, ProfileRes, UpdateProfileReq, UpdateUserRoleReq,
};

pub struct UsersServiceImpl {
    pool: PgPool,
}

fn profile_changes(req: &UpdateProfileReq) -> ProfileChanges {
    ProfileChanges {
        name: non_empty(&req.name),
        roll_no: non_empty(&req.roll_no),
        department: non_empty(&req.department),
        section: non_empty(&req.section),
        hostel: non_empty(&req.hostel),
        phone: non_empty(&req.phone),
        avatar_url: non_empty(&req.avatar_url),
    }
}

fn user_filter(req: &ListUsersReq) -> AppResult<UserFilter> {
    let role = match non_empty(&req.role) {
        Some(r) => Some(r.parse::<Role>()?),
        None => None,
    };
    Ok(UserFilter {
        role,
        search: non_empty(&req.q),
        limit: page_limit(req.limit),
        offset: page_offset(req.offset),
    })
}

/// Validates a role change requested by `caller`. Only admins may change roles,
/// and an admin cannot drop their own admin role.
fn role_change(caller: &AuthenticatedUser, req: &UpdateUserRoleReq) -> AppResult<(Uuid, Role)> {
    authz::ensure_admin(caller)?;
    let target = Uuid::parse_str(req.user_id.trim())
        .map_err(|_| AppError::InvalidArgument("user_id must be a UUID".to_string()))?;
    let role: Role = req.role.trim().parse()?;
    if target == caller.user_id && role != Role::Admin {
        return Err(AppError::InvalidState(
            "Admins cannot remove their own admin role".to_string(),
        ));
    }
    Ok((target, role))
}

impl UsersServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn profile_to_proto(model: &UserProfile) -> Profile {
        Profile {
            id: model.id.to_string(),
            email: model.email.clone(),
            name: model.name.clone(),
            role: model.role.to_string(),
            roll_no: model.roll_no.clone().unwrap_or_default(),
            department: model.department.clone().unwrap_or_default(),
            section: model.section.clone().unwrap_or_default(),
            hostel: model.hostel.clone().unwrap_or_default(),
            phone: model.phone.clone().unwrap_or_default(),
            avatar_url: model.avatar_url.clone().unwrap_or_default(),
            created_at: model.created_at.to_rfc3339(),
        }
    }

    fn profile_res(model: &UserProfile) -> Response<ProfileRes> {
        Response::new(ProfileRes {
            profile: Some(Self::profile_to_proto(model)),
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
impl UsersService for UsersServiceImpl {
    async fn get_profile(&self, request: Request<Empty>) -> Result<Response<ProfileRes>, Status> {
        let auth_user = authenticated_user(&request)?;

        let mut conn = self.acquire().await?;
        let profile = users::get_profile(&mut conn, auth_user.user_id).await?;

        Ok(Self::profile_res(&profile))
    }

    async fn update_profile(
        &self,
        request: Request<UpdateProfileReq>,
    ) -> Result<Response<ProfileRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let changes = profile_changes(request.get_ref());

        let mut conn = self.acquire().await?;
        let profile = users::update_profile(&mut conn, auth_user.user_id, &changes).await?;

        Ok(Self::profile_res(&profile))
    }

    async fn list_users(
        &self,
        request: Request<ListUsersReq>,
    ) -> Result<Response<ListUsersRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        authz::ensure_admin(&auth_user)?;
        let filter = user_filter(request.get_ref())?;

        let mut conn = self.acquire().await?;
        let (models, total) = users::list_users(&mut conn, &filter).await?;

        Ok(Response::new(ListUsersRes {
            total,
            users: models.iter().map(Self::profile_to_proto).collect(),
        }))
    }

    async fn update_user_role(
        &self,
        request: Request<UpdateUserRoleReq>,
    ) -> Result<Response<ProfileRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let (target, role) = role_change(&auth_user, request.get_ref())?;

        let mut conn = self.acquire().await?;
        let profile = users::set_role(&mut conn, target, role).await?;

        tracing::info!(
            "User {} set role of {} to {}",
            auth_user.user_id,
            target,
            role
        );
        Ok(Self::profile_res(&profile))
    }
}
