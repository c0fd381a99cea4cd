use sqlx::PgPool;
use tonic::{Request, Response, Status};

use super::{non_empty, page_limit, page_offset};
use crate::arbitration;
use crate::authz;
use crate::db::{claims, items, with_transaction, RetryConfig, TxMode};
use crate::middleware::authenticated_user;
use crate::models::{ItemChanges, ItemClaimModel, ItemFilter, ItemModel, NewItem};
use crate::proto::common::Empty;
use crate::proto::items::items_service_server::ItemsService;
use crate::proto::items::{
    ClaimRes, CreateItemReq, DeleteItemReq, GetItemReq, Item, ItemClaim, ItemRes, ListClaimsReq,
    ListClaimsRes, ListItemsReq, ListItemsRes, SubmitClaimReq, UpdateClaimStatusReq,
    UpdateClaimStatusRes, UpdateItemReq,
};

pub struct ItemsServiceImpl {
    pool: PgPool,
    retry: RetryConfig,
}

fn list_filter(req: &ListItemsReq) -> Result<ItemFilter, Status> {
    let status = match non_empty(&req.status) {
        Some(s) => Some(s.parse().map_err(Status::from)?),
        None => None,
    };
    Ok(ItemFilter {
        status,
        category: non_empty(&req.category),
        query: non_empty(&req.q),
        limit: page_limit(req.limit),
        offset: page_offset(req.offset),
    })
}

impl ItemsServiceImpl {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    fn model_to_proto(model: &ItemModel) -> Item {
        Item {
            id: model.id,
            title: model.title.clone(),
            description: model.description.clone().unwrap_or_default(),
            image_url: model.image_url.clone().unwrap_or_default(),
            category: model.category.clone().unwrap_or_default(),
            location: model.location.clone().unwrap_or_default(),
            status: model.status.to_string(),
            finder_id: model.finder_id.to_string(),
            claimant_id: model
                .claimant_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }

    fn claim_to_proto(model: &ItemClaimModel) -> ItemClaim {
        ItemClaim {
            id: model.id,
            item_id: model.item_id,
            claimant_id: model.claimant_id.to_string(),
            message: model.message.clone().unwrap_or_default(),
            status: model.status.to_string(),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
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
impl ItemsService for ItemsServiceImpl {
    async fn create_item(
        &self,
        request: Request<CreateItemReq>,
    ) -> Result<Response<ItemRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();

        let title = non_empty(&req.title)
            .ok_or_else(|| Status::invalid_argument("title is required"))?;
        let new_item = NewItem {
            title,
            description: non_empty(&req.description),
            image_url: non_empty(&req.image_url),
            category: non_empty(&req.category),
            location: non_empty(&req.location),
        };

        let mut conn = self.acquire().await?;
        let model = items::insert_item(&mut conn, auth_user.user_id, &new_item).await?;

        tracing::info!("Item {} posted by {}", model.id, auth_user.user_id);
        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn get_item(&self, request: Request<GetItemReq>) -> Result<Response<ItemRes>, Status> {
        let req = request.into_inner();

        let mut conn = self.acquire().await?;
        let model = items::get_item(&mut conn, req.id).await?;

        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn list_items(
        &self,
        request: Request<ListItemsReq>,
    ) -> Result<Response<ListItemsRes>, Status> {
        let filter = list_filter(request.get_ref())?;

        let mut conn = self.acquire().await?;
        let models = items::list_items(&mut conn, &filter).await?;

        let items: Vec<Item> = models.iter().map(Self::model_to_proto).collect();
        Ok(Response::new(ListItemsRes { items }))
    }

    async fn update_item(
        &self,
        request: Request<UpdateItemReq>,
    ) -> Result<Response<ItemRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();

        let item_id = req.id;
        let changes = ItemChanges {
            title: non_empty(&req.title),
            description: non_empty(&req.description),
            image_url: non_empty(&req.image_url),
            category: non_empty(&req.category),
            location: non_empty(&req.location),
        };

        let model = with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            let auth_user = auth_user.clone();
            let changes = changes.clone();
            Box::pin(async move {
                let item = items::lock_item(conn, item_id).await?;
                authz::ensure_item_manager(&item, &auth_user)?;
                items::update_item_details(conn, item_id, &changes).await
            })
        })
        .await?;

        Ok(Response::new(ItemRes {
            item: Some(Self::model_to_proto(&model)),
        }))
    }

    async fn delete_item(&self, request: Request<DeleteItemReq>) -> Result<Response<Empty>, Status> {
        let auth_user = authenticated_user(&request)?;
        let item_id = request.into_inner().id;

        with_transaction(&self.pool, TxMode::ReadWrite, &self.retry, |conn| {
            let auth_user = auth_user.clone();
            Box::pin(async move {
                let item = items::lock_item(conn, item_id).await?;
                authz::ensure_item_manager(&item, &auth_user)?;
                items::delete_item(conn, item_id).await
            })
        })
        .await?;

        tracing::info!("Item {} deleted by {}", item_id, auth_user.user_id);
        Ok(Response::new(Empty {}))
    }

    async fn submit_claim(
        &self,
        request: Request<SubmitClaimReq>,
    ) -> Result<Response<ClaimRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();

        let claim = arbitration::submit_claim(
            &self.pool,
            &self.retry,
            req.item_id,
            non_empty(&req.message),
            &auth_user,
        )
        .await?;

        Ok(Response::new(ClaimRes {
            claim: Some(Self::claim_to_proto(&claim)),
        }))
    }

    async fn list_claims(
        &self,
        request: Request<ListClaimsReq>,
    ) -> Result<Response<ListClaimsRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let item_id = request.into_inner().item_id;

        let mut conn = self.acquire().await?;
        let item = items::get_item(&mut conn, item_id).await?;
        authz::ensure_item_manager(&item, &auth_user)?;
        let models = claims::list_claims_for_item(&mut conn, item_id).await?;

        let claims = models.iter().map(Self::claim_to_proto).collect();
        Ok(Response::new(ListClaimsRes { claims }))
    }

    async fn update_claim_status(
        &self,
        request: Request<UpdateClaimStatusReq>,
    ) -> Result<Response<UpdateClaimStatusRes>, Status> {
        let auth_user = authenticated_user(&request)?;
        let req = request.into_inner();

        let (item, claim) = arbitration::arbitrate_claim(
            &self.pool,
            &self.retry,
            req.item_id,
            req.claim_id,
            req.status.trim(),
            &auth_user,
        )
        .await?;

        Ok(Response::new(UpdateClaimStatusRes {
            item: Some(Self::model_to_proto(&item)),
            claim: Some(Self::claim_to_proto(&claim)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;
    use crate::services::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

    fn list_req(status: &str, limit: i32, offset: i32) -> ListItemsReq {
        ListItemsReq {
            status: status.to_string(),
            category: String::new(),
            q: "  umbrella ".to_string(),
            limit,
            offset,
        }
    }

    #[test]
    fn test_list_filter_defaults() {
        let filter = list_filter(&list_req("", 0, -5)).unwrap();
        assert_eq!(filter.status, None);
        assert_eq!(filter.category, None);
        assert_eq!(filter.query.as_deref(), Some("umbrella"));
        assert_eq!(filter.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(filter.offset, 0);
    }

    #[test]
    fn test_list_filter_caps_limit_and_parses_status() {
        let filter = list_filter(&list_req("claimed", 500, 20)).unwrap();
        assert_eq!(filter.status, Some(ItemStatus::Claimed));
        assert_eq!(filter.limit, MAX_PAGE_LIMIT);
        assert_eq!(filter.offset, 20);
    }

    #[test]
    fn test_list_filter_rejects_unknown_status() {
        let err = list_filter(&list_req("lost", 10, 0)).unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }
}
