use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::order::{Order, OrderFilter, OrderItemRequest, OrderStatus};
use crate::errors::AppError;
use crate::AppState;

use super::parse_id;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderItemRequest {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub items: Vec<CreateOrderItemRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// One of pending, processing, shipped, delivered, cancelled.
    pub status: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersParams {
    pub user_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Decimal price as a string, frozen when the order was placed
    pub price_at_purchase: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: i64,
    pub status: String,
    pub total: String,
    pub items: Vec<OrderItemResponse>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status.to_string(),
            total: order.total.to_string(),
            items: order
                .items
                .into_iter()
                .map(|i| OrderItemResponse {
                    product_id: i.product_id,
                    quantity: i.quantity,
                    price_at_purchase: i.price_at_purchase.to_string(),
                })
                .collect(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders
///
/// Reserves stock for every item and inserts the order in one atomic unit.
/// Either all stock decrements and the order are committed, or nothing is.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Invalid user, items or quantities"),
        (status = 404, description = "A referenced product does not exist"),
        (status = 409, description = "Not enough stock for an item"),
        (status = 503, description = "Transient storage conflict, safe to retry"),
    ),
    tag = "orders"
)]
pub async fn create_order(
    state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let items = body
        .items
        .into_iter()
        .map(|i| OrderItemRequest {
            product_id: i.product_id,
            quantity: i.quantity,
        })
        .collect();

    let order = web::block(move || state.orders.create_order(body.user_id, items))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(OrderResponse::from(order)))
}

/// GET /orders
///
/// Lists orders, newest first, optionally filtered by user and status.
#[utoipa::path(
    get,
    path = "/orders",
    params(ListOrdersParams),
    responses(
        (status = 200, description = "Matching orders", body = [OrderResponse]),
        (status = 400, description = "Malformed filter"),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    state: web::Data<AppState>,
    query: web::Query<ListOrdersParams>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let status = params
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let filter = OrderFilter {
        user_id: params.user_id,
        status,
    };

    let orders = web::block(move || state.orders.list_orders(&filter))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// GET /orders/{id}
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order UUID")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 400, description = "Malformed order id"),
        (status = 404, description = "Order not found"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let order_id = parse_id(&path, "order")?;

    let order = web::block(move || state.orders.get_order(order_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// PATCH /orders/{id}
///
/// Sets the order status. Moving an order into `cancelled` releases its
/// stock in the same atomic unit as the status write.
#[utoipa::path(
    patch,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order UUID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order after the update", body = OrderResponse),
        (status = 400, description = "Malformed order id"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Unknown status value"),
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateOrderStatusRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = parse_id(&path, "order")?;
    let status = body.into_inner().status;

    let order = web::block(move || state.orders.update_order_status(order_id, &status))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}
