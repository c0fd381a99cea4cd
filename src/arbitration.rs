//! Lost-and-found claim arbitration.
//!
//! An item and its claims form one unit of state:
//!
//! * `item.status == Claimed` exactly when one claim is `Approved`, and
//!   `item.claimant_id` is that claim's claimant;
//! * at most one claim per item is ever `Approved`.
//!
//! [`apply_transition`] is the pure state machine over an in-memory item and
//! claim set, and [`plan_writes`] lists the rows it changed. [`arbitrate_claim`]
//! and [`submit_claim`] run both inside a single locked transaction.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::authz;
use crate::db::{claims, items, notifications, with_transaction, RetryConfig, TxMode};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::models::{
    ClaimStatus, ItemClaimModel, ItemModel, ItemStatus, NewNotification, NotificationKind,
};

/// What a transition touched, so only changed rows are written back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub item_changed: bool,
    /// Claims whose status changed, the target claim first.
    pub changed_claims: Vec<i64>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        !self.item_changed && self.changed_claims.is_empty()
    }
}

/// Moves claim `claim_id` to `target`, cascading onto the item and its other claims.
///
/// `claims` must be the complete claim set of `item`. On error nothing is modified.
pub fn apply_transition(
    item: &mut ItemModel,
    claims: &mut [ItemClaimModel],
    claim_id: i64,
    target: ClaimStatus,
) -> AppResult<Transition> {
    let idx = claims
        .iter()
        .position(|c| c.id == claim_id && c.item_id == item.id)
        .ok_or_else(|| AppError::NotFound("Claim not found".to_string()))?;

    let previous = claims[idx].status;
    let claimant_id = claims[idx].claimant_id;
    let mut transition = Transition::default();

    match target {
        ClaimStatus::Approved => {
            if let Some(other) = claims
                .iter()
                .find(|c| c.id != claim_id && c.status == ClaimStatus::Approved)
            {
                return Err(AppError::InvalidState(format!(
                    "claim {} is already approved for this item; reject or revert it first",
                    other.id
                )));
            }

            set_claim(&mut claims[idx], ClaimStatus::Approved, &mut transition);
            set_item(item, ItemStatus::Claimed, Some(claimant_id), &mut transition);

            for other in claims.iter_mut() {
                if other.id != claim_id && other.status == ClaimStatus::Pending {
                    set_claim(other, ClaimStatus::Rejected, &mut transition);
                }
            }
        }
        ClaimStatus::Rejected => {
            set_claim(&mut claims[idx], ClaimStatus::Rejected, &mut transition);
            if previous == ClaimStatus::Approved {
                release_item(item, claims, claim_id, claimant_id, &mut transition);
            }
        }
        ClaimStatus::Pending => {
            // Undo only applies to a decided claim.
            if previous == ClaimStatus::Pending {
                return Ok(transition);
            }
            set_claim(&mut claims[idx], ClaimStatus::Pending, &mut transition);
            if previous == ClaimStatus::Approved {
                release_item(item, claims, claim_id, claimant_id, &mut transition);
            }
        }
    }

    Ok(transition)
}

/// Reopens the item when the claim leaving `Approved` was the one it points at
/// and no other claim is still approved.
fn release_item(
    item: &mut ItemModel,
    claims: &[ItemClaimModel],
    claim_id: i64,
    claimant_id: Uuid,
    transition: &mut Transition,
) {
    if item.claimant_id != Some(claimant_id) {
        return;
    }
    let other_approved = claims
        .iter()
        .any(|c| c.id != claim_id && c.status == ClaimStatus::Approved);
    if !other_approved {
        set_item(item, ItemStatus::Active, None, transition);
    }
}

fn set_claim(claim: &mut ItemClaimModel, status: ClaimStatus, transition: &mut Transition) {
    if claim.status != status {
        claim.status = status;
        transition.changed_claims.push(claim.id);
    }
}

fn set_item(
    item: &mut ItemModel,
    status: ItemStatus,
    claimant_id: Option<Uuid>,
    transition: &mut Transition,
) {
    if item.status != status || item.claimant_id != claimant_id {
        item.status = status;
        item.claimant_id = claimant_id;
        transition.item_changed = true;
    }
}

/// Rules for opening a new claim on `item`.
///
/// `existing` is any earlier claim by the same user, whatever its status: a
/// rejected claimant cannot try again.
pub fn check_claim_submission(
    item: &ItemModel,
    caller: &AuthenticatedUser,
    existing: Option<&ItemClaimModel>,
) -> AppResult<()> {
    if item.status != ItemStatus::Active {
        return Err(AppError::InvalidState(
            "Item is not available for claims".to_string(),
        ));
    }
    authz::ensure_not_finder(item, caller)?;
    if existing.is_some() {
        return Err(AppError::AlreadyExists(
            "You already claimed this item".to_string(),
        ));
    }
    Ok(())
}

/// Changes one claim's status and applies the cascade in a single transaction.
///
/// The item row and its claim set stay locked until commit, so two concurrent
/// approvals on one item serialize and the second sees the first's result.
pub async fn arbitrate_claim(
    pool: &PgPool,
    retry: &RetryConfig,
    item_id: i64,
    claim_id: i64,
    target_status: &str,
    caller: &AuthenticatedUser,
) -> AppResult<(ItemModel, ItemClaimModel)> {
    let target: ClaimStatus = target_status.parse()?;

    let (item, claim) = with_transaction(pool, TxMode::ReadWrite, retry, |conn| {
        let caller = caller.clone();
        Box::pin(async move { arbitrate_locked(conn, item_id, claim_id, target, &caller).await })
    })
    .await?;

    tracing::info!(
        "Claim {} on item {} set to {} by {} (item now {})",
        claim.id,
        item.id,
        claim.status,
        caller.user_id,
        item.status
    );
    Ok((item, claim))
}

/// Rows to write back after a transition, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePlan {
    /// Claim status updates, the target claim first.
    pub claims: Vec<(i64, ClaimStatus)>,
    /// New `(status, claimant_id)` for the item, if it changed.
    pub item: Option<(ItemStatus, Option<Uuid>)>,
    /// One notice per claimant whose claim changed.
    pub notifications: Vec<NewNotification>,
}

/// Turns a transition over `item` and `claims` (already applied) into the writes
/// that persist it.
pub fn plan_writes(
    item: &ItemModel,
    claims: &[ItemClaimModel],
    transition: &Transition,
) -> AppResult<WritePlan> {
    let mut plan = WritePlan::default();

    for id in &transition.changed_claims {
        let claim = claims
            .iter()
            .find(|c| c.id == *id)
            .ok_or_else(|| AppError::Internal(format!("claim {} vanished mid-transition", id)))?;
        plan.claims.push((claim.id, claim.status));
        plan.notifications.push(decision_notice(item, claim));
    }

    if transition.item_changed {
        plan.item = Some((item.status, item.claimant_id));
    }
    Ok(plan)
}

/// The claim handed back to the caller: the freshly written row when the target
/// changed, otherwise its current state from the locked set.
pub fn returned_claim(
    written: Option<ItemClaimModel>,
    claims: Vec<ItemClaimModel>,
    claim_id: i64,
) -> AppResult<ItemClaimModel> {
    match written {
        Some(claim) => Ok(claim),
        None => claims
            .into_iter()
            .find(|c| c.id == claim_id)
            .ok_or_else(|| AppError::NotFound("Claim not found".to_string())),
    }
}

fn decision_notice(item: &ItemModel, claim: &ItemClaimModel) -> NewNotification {
    let (kind, verb) = match claim.status {
        ClaimStatus::Approved => (NotificationKind::ClaimApproved, "approved"),
        ClaimStatus::Rejected => (NotificationKind::ClaimRejected, "rejected"),
        ClaimStatus::Pending => (NotificationKind::ClaimReopened, "reopened"),
    };
    NewNotification {
        user_id: claim.claimant_id,
        kind,
        title: format!("Claim {}", verb),
        message: format!("Your claim on \"{}\" was {}.", item.title, verb),
        link: Some(item_link(item.id)),
    }
}

/// Tells the finder that someone claimed their item.
pub fn submission_notice(item: &ItemModel, claim: &ItemClaimModel) -> NewNotification {
    NewNotification {
        user_id: item.finder_id,
        kind: NotificationKind::ClaimSubmitted,
        title: "New claim".to_string(),
        message: format!("Someone claimed \"{}\".", item.title),
        link: Some(format!("{}#claim-{}", item_link(item.id), claim.id)),
    }
}

fn item_link(item_id: i64) -> String {
    format!("/lost-found/{}", item_id)
}

async fn arbitrate_locked(
    conn: &mut PgConnection,
    item_id: i64,
    claim_id: i64,
    target: ClaimStatus,
    caller: &AuthenticatedUser,
) -> AppResult<(ItemModel, ItemClaimModel)> {
    let mut item = items::lock_item(conn, item_id).await?;
    authz::ensure_item_manager(&item, caller)?;

    let mut claim_set = claims::lock_claims_for_item(conn, item_id).await?;
    let transition = apply_transition(&mut item, &mut claim_set, claim_id, target)?;
    let plan = plan_writes(&item, &claim_set, &transition)?;

    let mut written_target = None;
    for (id, status) in &plan.claims {
        let written = claims::set_claim_status(conn, *id, *status).await?;
        if written.id == claim_id {
            written_target = Some(written);
        } else {
            tracing::debug!("Claim {} cascaded to {}", written.id, written.status);
        }
    }

    if let Some((status, claimant_id)) = plan.item {
        item = items::set_claim_state(conn, item_id, status, claimant_id).await?;
    }

    for notice in &plan.notifications {
        notifications::insert_notification(conn, notice).await?;
    }

    let claim = returned_claim(written_target, claim_set, claim_id)?;
    Ok((item, claim))
}

/// Opens a pending claim by `caller` on an active item and notifies the finder.
pub async fn submit_claim(
    pool: &PgPool,
    retry: &RetryConfig,
    item_id: i64,
    message: Option<String>,
    caller: &AuthenticatedUser,
) -> AppResult<ItemClaimModel> {
    let claim = with_transaction(pool, TxMode::ReadWrite, retry, |conn| {
        let caller = caller.clone();
        let message = message.clone();
        Box::pin(async move {
            let item = items::lock_item(conn, item_id).await?;
            let existing = claims::find_claim_by_claimant(conn, item_id, caller.user_id).await?;
            check_claim_submission(&item, &caller, existing.as_ref())?;
            let claim =
                claims::insert_claim(conn, item_id, caller.user_id, message.as_deref()).await?;
            notifications::insert_notification(conn, &submission_notice(&item, &claim)).await?;
            Ok(claim)
        })
    })
    .await?;

    tracing::info!(
        "Claim {} submitted on item {} by {}",
        claim.id,
        item_id,
        caller.user_id
    );
    Ok(claim)
}
