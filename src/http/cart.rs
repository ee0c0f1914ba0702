use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::error::ApiError;
use super::extract::{JsonBody, Owner, PathParam};
use super::AppState;
use crate::domain::{CartItemId, CartLine, ProductId};
use crate::services::CartView;
use crate::Error;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 { 1 }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustItemRequest {
    pub product_id: ProductId,
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct EditCartRequest {
    pub items: Vec<CartLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveProductRequest {
    pub product_id: ProductId,
}

pub(crate) async fn get_cart(State(s): State<AppState>, Owner(owner): Owner) -> Result<Json<CartView>, ApiError> {
    let view = s.carts.get_cart(&owner).await?;
    view.map(Json).ok_or_else(|| Error::CartNotFound(format!("no cart for {owner}")).into())
}

pub(crate) async fn add_item(
    State(s): State<AppState>,
    Owner(owner): Owner,
    JsonBody(r): JsonBody<AddItemRequest>,
) -> Result<(StatusCode, Json<CartView>), ApiError> {
    let view = s.carts.add_or_increment(&owner, r.product_id, r.quantity).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub(crate) async fn adjust_item(
    State(s): State<AppState>,
    Owner(owner): Owner,
    JsonBody(r): JsonBody<AdjustItemRequest>,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(s.carts.set_quantity(&owner, r.product_id, r.delta).await?))
}

pub(crate) async fn edit_cart(
    State(s): State<AppState>,
    Owner(owner): Owner,
    JsonBody(r): JsonBody<EditCartRequest>,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(s.carts.replace_items(&owner, &r.items).await?))
}

pub(crate) async fn remove_product(
    State(s): State<AppState>,
    Owner(owner): Owner,
    JsonBody(r): JsonBody<RemoveProductRequest>,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(s.carts.remove_product(&owner, r.product_id).await?))
}

pub(crate) async fn remove_item(
    State(s): State<AppState>,
    Owner(owner): Owner,
    PathParam(item_id): PathParam<CartItemId>,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(s.carts.remove_item(&owner, item_id).await?))
}

pub(crate) async fn clear_cart(State(s): State<AppState>, Owner(owner): Owner) -> Result<Json<CartView>, ApiError> {
    Ok(Json(s.carts.clear(&owner).await?))
}
