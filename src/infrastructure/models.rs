use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{Order, OrderItem};
use crate::domain::product::{Category, Product};
use crate::schema::{categories, order_items, orders, products};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: i64,
    pub status: String,
    pub total: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations, Insertable)]
#[diesel(table_name = order_items)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price_at_purchase: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: BigDecimal,
    pub stock_level: i32,
    pub category_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = products)]
pub struct ProductChangeset {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    pub stock_level: Option<i32>,
    pub category_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CategoryRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

impl OrderRow {
    pub fn from_order(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status.as_str().to_string(),
            total: order.total.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }

    /// `items` must already be sorted by position.
    pub fn into_order(self, items: Vec<OrderItemRow>) -> Result<Order, DomainError> {
        let status = self.status.parse().map_err(|_| {
            DomainError::Internal(format!(
                "order {} has unknown stored status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            status,
            total: self.total,
            items: items
                .into_iter()
                .map(|i| OrderItem {
                    product_id: i.product_id,
                    quantity: i.quantity,
                    price_at_purchase: i.price_at_purchase,
                })
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl OrderItemRow {
    pub fn rows_for(order: &Order) -> Vec<Self> {
        order
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| Self {
                id: Uuid::new_v4(),
                order_id: order.id,
                position: position as i32,
                product_id: item.product_id,
                quantity: item.quantity,
                price_at_purchase: item.price_at_purchase.clone(),
            })
            .collect()
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            stock_level: row.stock_level,
            category_id: row.category_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Product> for ProductRow {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            description: p.description.clone(),
            price: p.price.clone(),
            stock_level: p.stock_level,
            category_id: p.category_id,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
        }
    }
}

impl From<&Category> for CategoryRow {
    fn from(c: &Category) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            description: c.description.clone(),
        }
    }
}
