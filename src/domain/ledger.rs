//! Stock ledger: the only code that changes `stock_level` on behalf of orders.
//!
//! Both operations run through the caller's [`UnitOfWork`], so a failure
//! later in the same unit undoes every reservation already made.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DomainError;
use super::ports::UnitOfWork;

/// Reserves `quantity` units and returns the product price read by the same
/// write that took them.
pub fn reserve(
    unit: &mut dyn UnitOfWork,
    product_id: Uuid,
    quantity: i32,
    at: DateTime<Utc>,
) -> Result<BigDecimal, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::Validation(
            "Item quantity must be greater than zero".into(),
        ));
    }
    if let Some(price) = unit.decrement_stock_if_available(product_id, quantity, at)? {
        return Ok(price);
    }
    match unit.find_product(product_id)? {
        Some(_) => Err(DomainError::InsufficientStock {
            product_id,
            requested: quantity,
        }),
        None => Err(DomainError::ProductNotFound(product_id)),
    }
}

/// Compensating action. A product that has disappeared is skipped: release
/// never fails on business grounds.
pub fn release(
    unit: &mut dyn UnitOfWork,
    product_id: Uuid,
    quantity: i32,
    at: DateTime<Utc>,
) -> Result<(), DomainError> {
    if !unit.increment_stock(product_id, quantity, at)? {
        log::warn!(
            "Cannot release {} unit(s) of product {}: product no longer exists",
            quantity,
            product_id
        );
    }
    Ok(())
}
