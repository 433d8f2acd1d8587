use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::ledger;
use crate::domain::order::{now, Order, OrderFilter, OrderItem, OrderItemRequest};
use crate::domain::ports::{atomically, OrderStore};
use crate::domain::status::{self, Transition};

use super::retry::RetryPolicy;

/// Order transaction coordinator.
///
/// Every write touching more than one record (stock reservation plus order
/// insert, stock release plus status write) goes through a single atomic
/// unit of the underlying store.
pub struct OrderService<S: ?Sized> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: OrderStore + ?Sized> OrderService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn create_order(
        &self,
        user_id: i64,
        items: Vec<OrderItemRequest>,
    ) -> Result<Order, DomainError> {
        let lines = validate_order(user_id, &items)?;
        let order = self
            .retry
            .run("create order", || self.try_create_order(user_id, &lines))?;
        log::info!(
            "Created order {} for user {} with {} item(s), total {}",
            order.id,
            order.user_id,
            order.items.len(),
            order.total
        );
        Ok(order)
    }

    fn try_create_order(&self, user_id: i64, lines: &[(Uuid, i32)]) -> Result<Order, DomainError> {
        let at = now();
        atomically(&*self.store, |unit| {
            let mut items = Vec::with_capacity(lines.len());
            for &(product_id, quantity) in lines {
                let price_at_purchase = ledger::reserve(unit, product_id, quantity, at)?;
                items.push(OrderItem {
                    product_id,
                    quantity,
                    price_at_purchase,
                });
            }
            let order = Order::place(user_id, items, at);
            unit.insert_order(&order)?;
            Ok(order)
        })
    }

    pub fn get_order(&self, id: Uuid) -> Result<Order, DomainError> {
        self.store
            .find_order(id)?
            .ok_or(DomainError::OrderNotFound(id))
    }

    pub fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, DomainError> {
        self.store.list_orders(filter)
    }

    pub fn update_order_status(&self, id: Uuid, requested: &str) -> Result<Order, DomainError> {
        self.retry
            .run("update order status", || self.try_update_status(id, requested))
    }

    fn try_update_status(&self, id: Uuid, requested: &str) -> Result<Order, DomainError> {
        let order = self.get_order(id)?;
        let (target, transition) = status::evaluate(order.status, requested)?;
        let at = now();

        if transition.requires_compensation() {
            atomically(&*self.store, |unit| {
                // Guarding on the status we read keeps two concurrent
                // cancellations from both releasing stock.
                if !unit.set_order_status_if(order.id, order.status, target, at)? {
                    return Err(DomainError::TransactionConflict(format!(
                        "order {} changed status concurrently",
                        order.id
                    )));
                }
                for item in &order.items {
                    ledger::release(unit, item.product_id, item.quantity, at)?;
                }
                Ok(())
            })?;
            log::info!(
                "Cancelled order {} ({} -> {}); released stock for {} item(s)",
                order.id,
                order.status,
                target,
                order.items.len()
            );
        } else {
            if transition == Transition::Reopen {
                log::warn!(
                    "Order {} leaves cancelled for {} without re-reserving stock",
                    order.id,
                    target
                );
            }
            if !self.store.update_order_status(order.id, target, at)? {
                return Err(DomainError::OrderNotFound(order.id));
            }
        }

        self.get_order(id)
    }
}

/// Input checks that run before any atomic unit opens.
fn validate_order(user_id: i64, items: &[OrderItemRequest]) -> Result<Vec<(Uuid, i32)>, DomainError> {
    if user_id <= 0 {
        return Err(DomainError::Validation("Invalid user ID".into()));
    }
    if items.is_empty() {
        return Err(DomainError::Validation(
            "Order must contain at least one item".into(),
        ));
    }
    items
        .iter()
        .map(|item| {
            if item.quantity <= 0 {
                return Err(DomainError::Validation(
                    "Item quantity must be greater than zero".into(),
                ));
            }
            let product_id = Uuid::parse_str(item.product_id.trim()).map_err(|_| {
                DomainError::Validation(format!("Invalid product ID: {}", item.product_id))
            })?;
            Ok((product_id, item.quantity))
        })
        .collect()
}
