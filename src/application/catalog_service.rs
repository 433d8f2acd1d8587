use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::{BigDecimal, Zero};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{money, now};
use crate::domain::ports::{CatalogRepository, ProductRemoval};
use crate::domain::product::{Category, Product, ProductChanges, ProductQuery};

#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: String,
    pub stock_level: i32,
    pub category_id: String,
}

/// Partial update as received. Out-of-range values are dropped rather than
/// rejected; an unknown category is an error.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub stock_level: Option<i32>,
    pub category_id: Option<String>,
}

/// Product and category management around the order core.
pub struct CatalogService<R: ?Sized> {
    repo: Arc<R>,
}

impl<R: CatalogRepository + ?Sized> CatalogService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn list_products(
        &self,
        category: Option<String>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Product>, DomainError> {
        let mut query = ProductQuery {
            category: category.filter(|c| !c.trim().is_empty()),
            ..ProductQuery::default()
        };
        if let Some(limit) = limit.filter(|l| *l > 0) {
            query.limit = limit;
        }
        if let Some(offset) = offset.filter(|o| *o >= 0) {
            query.offset = offset;
        }
        self.repo.list_products(&query)
    }

    pub fn get_product(&self, id: Uuid) -> Result<Product, DomainError> {
        self.repo
            .find_product(id)?
            .ok_or(DomainError::ProductNotFound(id))
    }

    pub fn create_product(&self, draft: ProductDraft) -> Result<Product, DomainError> {
        if draft.name.trim().is_empty() {
            return Err(DomainError::Validation("Product name is required".into()));
        }
        let price = parse_price(&draft.price)?
            .ok_or_else(|| DomainError::Validation("Price must be greater than zero".into()))?;
        if draft.stock_level < 0 {
            return Err(DomainError::Validation(
                "Stock level cannot be negative".into(),
            ));
        }
        let category_id = self.existing_category(&draft.category_id)?;

        let at = now();
        let product = Product {
            id: Uuid::new_v4(),
            name: draft.name,
            description: draft.description,
            price,
            stock_level: draft.stock_level,
            category_id,
            created_at: at,
            updated_at: at,
        };
        self.repo.insert_product(&product)?;
        log::info!("Created product {} ({})", product.id, product.name);
        Ok(product)
    }

    pub fn update_product(&self, id: Uuid, patch: ProductPatch) -> Result<Product, DomainError> {
        self.get_product(id)?;

        let mut changes = ProductChanges {
            name: patch.name.filter(|n| !n.trim().is_empty()),
            description: patch.description,
            stock_level: patch.stock_level.filter(|s| *s >= 0),
            ..ProductChanges::default()
        };
        if let Some(price) = patch.price {
            changes.price = parse_price(&price)?;
        }
        if let Some(category_id) = patch.category_id {
            changes.category_id = Some(self.existing_category(&category_id)?);
        }
        if changes.is_empty() {
            return Err(DomainError::Validation("No valid fields to update".into()));
        }

        self.repo
            .update_product(id, &changes, now())?
            .ok_or(DomainError::ProductNotFound(id))
    }

    pub fn delete_product(&self, id: Uuid) -> Result<(), DomainError> {
        match self.repo.delete_product(id)? {
            ProductRemoval::Deleted => {
                log::info!("Deleted product {}", id);
                Ok(())
            }
            ProductRemoval::NotFound => Err(DomainError::ProductNotFound(id)),
            ProductRemoval::InUse => Err(DomainError::ProductInUse(id)),
        }
    }

    pub fn list_categories(&self) -> Result<Vec<Category>, DomainError> {
        self.repo.list_categories()
    }

    pub fn create_category(&self, name: String, description: String) -> Result<Category, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation("Category name is required".into()));
        }
        if self.repo.category_name_exists(&name)? {
            return Err(DomainError::DuplicateCategory(name));
        }
        let category = Category {
            id: Uuid::new_v4(),
            name,
            description,
        };
        self.repo.insert_category(&category)?;
        Ok(category)
    }

    /// Inserts a small starter catalog when no categories exist yet.
    pub fn seed_sample_data(&self) -> Result<bool, DomainError> {
        if !self.repo.list_categories()?.is_empty() {
            return Ok(false);
        }
        let electronics =
            self.create_category("Electronics".into(), "Electronic devices and accessories".into())?;
        let clothing = self.create_category("Clothing".into(), "Apparel and fashion items".into())?;

        for (name, description, price, stock_level, category) in [
            ("Laptop", "High-performance laptop", "999.99", 50, &electronics),
            ("T-shirt", "Cotton t-shirt", "19.99", 100, &clothing),
        ] {
            self.create_product(ProductDraft {
                name: name.into(),
                description: description.into(),
                price: price.into(),
                stock_level,
                category_id: category.id.to_string(),
            })?;
        }
        log::info!("Seeded sample catalog data");
        Ok(true)
    }

    fn existing_category(&self, raw: &str) -> Result<Uuid, DomainError> {
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| DomainError::Validation("Invalid category ID".into()))?;
        self.repo
            .find_category(id)?
            .map(|c| c.id)
            .ok_or(DomainError::CategoryNotFound(id))
    }
}

/// Parses a decimal price. Returns `None` for non-positive values.
fn parse_price(raw: &str) -> Result<Option<BigDecimal>, DomainError> {
    let price = BigDecimal::from_str(raw.trim())
        .map_err(|e| DomainError::Validation(format!("Invalid price '{}': {}", raw, e)))?;
    if price <= BigDecimal::zero() {
        return Ok(None);
    }
    Ok(Some(money(price)))
}
