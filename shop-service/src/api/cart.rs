//! Session cart endpoints. The cart lives in the [`CartStore`](crate::cart_store::CartStore)
//! under the `X-Cart-Session` id and only touches the database at checkout.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use shared::cart::CartDetails;
use shared::order::CheckoutRequest;
use shared::{Cart, ProductSnapshot};
use tracing::info;
use uuid::Uuid;

use super::{AppState, CartSession, CurrentUser};
use crate::error::AppResult;
use crate::models::OrderWithItems;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CartItemRequest {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub shipping_address: String,
}

async fn snapshot(state: &AppState, product_id: i32) -> AppResult<Option<ProductSnapshot>> {
    Ok(state
        .store
        .get_product(product_id)
        .await?
        .map(|product| product.snapshot()))
}

async fn render(state: &AppState, cart: &Cart) -> AppResult<CartDetails> {
    let catalog: HashMap<i32, ProductSnapshot> = state
        .store
        .get_products(&cart.product_ids())
        .await?
        .iter()
        .map(|product| (product.id, product.snapshot()))
        .collect();
    Ok(cart.details(&catalog))
}

pub async fn new_session() -> (StatusCode, Json<SessionResponse>) {
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: Uuid::new_v4(),
        }),
    )
}

pub async fn view_cart(
    State(state): State<AppState>,
    CartSession(session): CartSession,
) -> AppResult<Json<CartDetails>> {
    let cart = state.carts.get(session).await?;
    Ok(Json(render(&state, &cart).await?))
}

pub async fn add_item(
    State(state): State<AppState>,
    CartSession(session): CartSession,
    Json(request): Json<CartItemRequest>,
) -> AppResult<Json<CartDetails>> {
    let product = snapshot(&state, request.product_id).await?;
    let mut cart = state.carts.get(session).await?;
    cart.add(request.product_id, product.as_ref(), request.quantity)?;
    state.carts.put(session, cart.clone()).await?;
    Ok(Json(render(&state, &cart).await?))
}

pub async fn update_item(
    State(state): State<AppState>,
    CartSession(session): CartSession,
    Json(request): Json<CartItemRequest>,
) -> AppResult<Json<CartDetails>> {
    let product = snapshot(&state, request.product_id).await?;
    let mut cart = state.carts.get(session).await?;
    cart.update(request.product_id, product.as_ref(), request.quantity)?;
    state.carts.put(session, cart.clone()).await?;
    Ok(Json(render(&state, &cart).await?))
}

pub async fn remove_item(
    State(state): State<AppState>,
    CartSession(session): CartSession,
    Path(product_id): Path<i32>,
) -> AppResult<Json<CartDetails>> {
    let mut cart = state.carts.get(session).await?;
    cart.remove(product_id)?;
    state.carts.put(session, cart.clone()).await?;
    Ok(Json(render(&state, &cart).await?))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    CartSession(session): CartSession,
) -> AppResult<StatusCode> {
    state.carts.delete(session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Turn the session cart into an order. The cart is only emptied once the
/// order has been committed.
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    CartSession(session): CartSession,
    Json(body): Json<CheckoutBody>,
) -> AppResult<(StatusCode, Json<OrderWithItems>)> {
    let cart = state.carts.get(session).await?;
    let request = CheckoutRequest {
        user_id: user.id,
        shipping_address: body.shipping_address,
        lines: cart.checkout_lines(),
    };
    let order = state.store.checkout(request).await?;
    state.carts.delete(session).await?;
    info!(order_id = order.order.id, user_id = user.id, %session, "cart checked out");
    Ok((StatusCode::CREATED, Json(order)))
}
