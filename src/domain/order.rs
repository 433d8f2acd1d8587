use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use super::errors::DomainError;

/// Monetary amounts are kept at two decimal places.
pub fn money(value: BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Current time at the precision the stores persist (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::InvalidStatus(s.to_string()))
    }
}

/// A line as submitted by the caller, before product resolution.
#[derive(Debug, Clone)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: i32,
}

/// An order line with its price frozen at purchase time.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price_at_purchase: BigDecimal,
}

impl OrderItem {
    pub fn line_total(&self) -> BigDecimal {
        &self.price_at_purchase * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: i64,
    pub status: OrderStatus,
    pub total: BigDecimal,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order. The total is computed here once and never
    /// recomputed afterwards.
    pub fn place(user_id: i64, items: Vec<OrderItem>, at: DateTime<Utc>) -> Self {
        let total = money(
            items
                .iter()
                .fold(BigDecimal::from(0), |acc, item| acc + item.line_total()),
        );
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: OrderStatus::Pending,
            total,
            items,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Optional filters for listing orders; results are newest first.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<i64>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.map_or(true, |id| order.user_id == id)
            && self.status.map_or(true, |status| order.status == status)
    }
}
