use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DomainError;
use super::order::{Order, OrderFilter, OrderStatus};
use super::product::{Category, Product, ProductChanges, ProductQuery};

/// Operations available inside an open atomic unit. Nothing written through
/// a `UnitOfWork` is visible to other units until the unit commits.
pub trait UnitOfWork {
    fn find_product(&mut self, id: Uuid) -> Result<Option<Product>, DomainError>;

    /// Single conditional write: decrements `stock_level` by `quantity` only
    /// if at least `quantity` is available. Returns the product price as seen
    /// by that write, or `None` when no row changed.
    fn decrement_stock_if_available(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, DomainError>;

    /// Returns `false` when the product no longer exists.
    fn increment_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;

    fn insert_order(&mut self, order: &Order) -> Result<(), DomainError>;

    /// Writes `status` only if the order is still in `expected`. Returns
    /// whether a row changed.
    fn set_order_status_if(
        &mut self,
        order_id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;
}

pub type UnitWork<'a> = dyn FnMut(&mut dyn UnitOfWork) -> Result<(), DomainError> + 'a;

pub trait OrderStore: Send + Sync + 'static {
    /// Runs `work` inside one atomic unit. Commits only when `work` returns
    /// `Ok`; any error or panic rolls every write back.
    fn run_atomic(&self, work: &mut UnitWork<'_>) -> Result<(), DomainError>;

    fn find_order(&self, id: Uuid) -> Result<Option<Order>, DomainError>;

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, DomainError>;

    /// Plain single-record status write. Returns `false` if the order is gone.
    fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError>;
}

/// Runs `f` as one atomic unit on `store` and hands back its value.
pub fn atomically<S, T, F>(store: &S, mut f: F) -> Result<T, DomainError>
where
    S: OrderStore + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T, DomainError>,
{
    let mut output = None;
    store.run_atomic(&mut |unit| {
        output = Some(f(unit)?);
        Ok(())
    })?;
    output.ok_or_else(|| DomainError::Internal("atomic unit committed without a result".into()))
}

/// Result of a guarded product delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductRemoval {
    Deleted,
    NotFound,
    /// At least one order line refers to the product; nothing was deleted.
    InUse,
}

pub trait CatalogRepository: Send + Sync + 'static {
    fn find_product(&self, id: Uuid) -> Result<Option<Product>, DomainError>;
    fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, DomainError>;
    fn insert_product(&self, product: &Product) -> Result<(), DomainError>;
    fn update_product(
        &self,
        id: Uuid,
        changes: &ProductChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Product>, DomainError>;
    /// Deletes the product only if no order line refers to it, checked and
    /// applied as one write.
    fn delete_product(&self, id: Uuid) -> Result<ProductRemoval, DomainError>;

    fn find_category(&self, id: Uuid) -> Result<Option<Category>, DomainError>;
    fn category_name_exists(&self, name: &str) -> Result<bool, DomainError>;
    fn list_categories(&self) -> Result<Vec<Category>, DomainError>;
    fn insert_category(&self, category: &Category) -> Result<(), DomainError>;
}
