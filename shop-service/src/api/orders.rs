use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use shared::auth::ensure_owner_or_admin;
use shared::order::{validate_shipping_address, CheckoutLine, CheckoutRequest};
use shared::{OrderStatus, Page, ShopError};
use tracing::info;

use super::{AdminUser, AppState, CurrentUser, PageQuery};
use crate::error::AppResult;
use crate::models::{Order, OrderItem, OrderWithItems, User};

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub shipping_address: String,
    pub items: Vec<OrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub new_status: String,
}

#[derive(Debug, Deserialize)]
pub struct ShippingAddressRequest {
    pub shipping_address: String,
}

#[derive(Debug, Serialize)]
pub struct OrderTotal {
    pub order_id: i32,
    pub total_price: BigDecimal,
    pub items_total: BigDecimal,
}

/// Load an order the caller may see. A missing order is reported before
/// the ownership check.
async fn load_visible_order(state: &AppState, user: &User, id: i32) -> AppResult<Order> {
    let order = state
        .store
        .get_order(id)
        .await?
        .ok_or_else(|| ShopError::not_found("order", id))?;
    ensure_owner_or_admin(&user.principal(), order.user_id, "order")?;
    Ok(order)
}

fn parse_status(value: Option<&str>) -> AppResult<Option<OrderStatus>> {
    Ok(value.map(str::parse::<OrderStatus>).transpose()?)
}

pub async fn my_orders(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let page = Page::new(query.offset, query.limit)?;
    let status = parse_status(query.status.as_deref())?;
    Ok(Json(state.store.list_user_orders(user.id, status, page).await?))
}

pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<OrderWithItems>)> {
    let checkout = CheckoutRequest {
        user_id: user.id,
        shipping_address: request.shipping_address,
        lines: request
            .items
            .into_iter()
            .map(|line| CheckoutLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: None,
            })
            .collect(),
    };
    let order = state.store.checkout(checkout).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn user_orders(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(user_id): Path<i32>,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    ensure_owner_or_admin(&current.principal(), user_id, "orders")?;
    let page = Page::new(query.offset, query.limit)?;
    let status = parse_status(query.status.as_deref())?;
    state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ShopError::not_found("user", user_id))?;
    Ok(Json(state.store.list_user_orders(user_id, status, page).await?))
}

pub async fn orders_by_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(status): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let status: OrderStatus = status.parse()?;
    Ok(Json(state.store.list_orders_by_status(status, query.page()?).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
) -> AppResult<Json<OrderWithItems>> {
    let order = load_visible_order(&state, &user, id).await?;
    let items = state.store.get_order_items(id).await?;
    Ok(Json(OrderWithItems { order, items }))
}

pub async fn order_items(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<OrderItem>>> {
    load_visible_order(&state, &user, id).await?;
    Ok(Json(state.store.get_order_items(id).await?))
}

pub async fn order_total(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
) -> AppResult<Json<OrderTotal>> {
    let order = load_visible_order(&state, &user, id).await?;
    let items = state.store.get_order_items(id).await?;
    let items_total = shared::order::order_total(items.iter().map(|item| (&item.price, item.quantity)));
    Ok(Json(OrderTotal {
        order_id: order.id,
        total_price: order.total_price,
        items_total,
    }))
}

pub async fn change_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<Order>> {
    let to: OrderStatus = query.new_status.parse()?;
    let order = state.store.transition_order(&user.principal(), id, to).await?;
    Ok(Json(order))
}

pub async fn update_shipping_address(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
    Json(request): Json<ShippingAddressRequest>,
) -> AppResult<Json<Order>> {
    validate_shipping_address(&request.shipping_address)?;
    let order = state
        .store
        .update_shipping_address(&user.principal(), id, request.shipping_address)
        .await?;
    Ok(Json(order))
}

pub async fn delete_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    if !state.store.delete_order(id).await? {
        return Err(ShopError::not_found("order", id).into());
    }
    info!(order_id = id, deleted_by = admin.id, "order deleted");
    Ok(StatusCode::NO_CONTENT)
}
