use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: BigDecimal,
    pub stock_level: i32,
    pub category_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// Fields accepted by a partial product update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    pub stock_level: Option<i32>,
    pub category_id: Option<Uuid>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.stock_level.is_none()
            && self.category_id.is_none()
    }

    pub fn apply_to(&self, product: &mut Product, at: DateTime<Utc>) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(price) = &self.price {
            product.price = price.clone();
        }
        if let Some(stock_level) = self.stock_level {
            product.stock_level = stock_level;
        }
        if let Some(category_id) = self.category_id {
            product.category_id = category_id;
        }
        product.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    /// Case-insensitive substring of a category name.
    pub category: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            category: None,
            limit: 10,
            offset: 0,
        }
    }
}
