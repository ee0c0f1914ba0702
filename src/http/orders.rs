use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::error::ApiError;
use super::extract::{IdempotencyKey, JsonBody, Owner, PathParam, QueryParams};
use super::AppState;
use crate::domain::{Order, OrderId, OrderPatch, OwnerId};
use crate::services::{CheckoutOutcome, CheckoutRequest};
use crate::Error;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub user_id: Option<String>,
}

pub(crate) async fn create_order(
    State(s): State<AppState>,
    Owner(owner): Owner,
    IdempotencyKey(key): IdempotencyKey,
    JsonBody(mut r): JsonBody<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ApiError> {
    r.idempotency_key = key;
    let outcome = s.orders.create_order(&owner, r).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub(crate) async fn list_orders(
    State(s): State<AppState>,
    QueryParams(p): QueryParams<ListParams>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let owner = match p.user_id.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(id) => Some(OwnerId::new(id).map_err(|e| Error::Validation(format!("userId: {e}")))?),
        None => None,
    };
    Ok(Json(s.orders.list_orders(owner.as_ref()).await?))
}

pub(crate) async fn get_order(State(s): State<AppState>, PathParam(id): PathParam<OrderId>) -> Result<Json<Order>, ApiError> {
    Ok(Json(s.orders.get_order(id).await?))
}

pub(crate) async fn update_order(
    State(s): State<AppState>,
    PathParam(id): PathParam<OrderId>,
    JsonBody(patch): JsonBody<OrderPatch>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(s.orders.update_order(id, patch).await?))
}

pub(crate) async fn delete_order(State(s): State<AppState>, PathParam(id): PathParam<OrderId>) -> Result<StatusCode, ApiError> {
    s.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
