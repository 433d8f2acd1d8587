//! In-process store with the same atomic-unit contract as [`DieselStore`].
//!
//! Units are serialized by the store lock and write in place. Each unit keeps
//! a journal holding the prior version of every record it touched; a unit that
//! fails, times out or panics replays that journal before the lock is released.
//!
//! [`DieselStore`]: super::diesel_store::DieselStore

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{Order, OrderFilter, OrderStatus};
use crate::domain::ports::{CatalogRepository, OrderStore, ProductRemoval, UnitOfWork, UnitWork};
use crate::domain::product::{Category, Product, ProductChanges, ProductQuery};

#[derive(Debug, Default)]
struct State {
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
}

impl State {
    fn product_is_referenced(&self, id: Uuid) -> bool {
        self.orders
            .values()
            .any(|o| o.items.iter().any(|i| i.product_id == id))
    }
}

/// Prior version of a record, `None` if the unit created it.
enum Undo {
    Product(Uuid, Option<Product>),
    Order(Uuid, Option<Order>),
}

/// One open atomic unit. Dropped without [`MemoryUnit::commit`], it restores
/// every touched record.
struct MemoryUnit<'a> {
    state: &'a mut State,
    journal: Vec<Undo>,
    committed: bool,
}

impl<'a> MemoryUnit<'a> {
    fn new(state: &'a mut State) -> Self {
        Self {
            state,
            journal: Vec::new(),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }

    fn product_mut(&mut self, id: Uuid) -> Option<&mut Product> {
        let previous = self.state.products.get(&id)?.clone();
        self.journal.push(Undo::Product(id, Some(previous)));
        self.state.products.get_mut(&id)
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Product(id, Some(product)) => {
                    self.state.products.insert(id, product);
                }
                Undo::Product(id, None) => {
                    self.state.products.remove(&id);
                }
                Undo::Order(id, Some(order)) => {
                    self.state.orders.insert(id, order);
                }
                Undo::Order(id, None) => {
                    self.state.orders.remove(&id);
                }
            }
        }
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    unit_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryStore {
    pub fn new(unit_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            unit_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking unit rolls back while unwinding, before the guard drops.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn find_product(&mut self, id: Uuid) -> Result<Option<Product>, DomainError> {
        Ok(self.state.products.get(&id).cloned())
    }

    fn decrement_stock_if_available(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, DomainError> {
        let available = self
            .state
            .products
            .get(&product_id)
            .is_some_and(|p| p.stock_level >= quantity);
        if !available {
            return Ok(None);
        }
        Ok(self.product_mut(product_id).map(|product| {
            product.stock_level -= quantity;
            product.updated_at = at;
            product.price.clone()
        }))
    }

    fn increment_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let Some(product) = self.product_mut(product_id) else {
            return Ok(false);
        };
        product.stock_level = product.stock_level.checked_add(quantity).ok_or_else(|| {
            DomainError::Internal(format!("stock level overflow for product {}", product_id))
        })?;
        product.updated_at = at;
        Ok(true)
    }

    fn insert_order(&mut self, order: &Order) -> Result<(), DomainError> {
        if self.state.orders.contains_key(&order.id) {
            return Err(DomainError::Internal(format!("duplicate order id {}", order.id)));
        }
        self.journal.push(Undo::Order(order.id, None));
        self.state.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn set_order_status_if(
        &mut self,
        order_id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let previous = match self.state.orders.get(&order_id) {
            Some(order) if order.status == expected => order.clone(),
            _ => return Ok(false),
        };
        self.journal.push(Undo::Order(order_id, Some(previous)));
        if let Some(order) = self.state.orders.get_mut(&order_id) {
            order.status = status;
            order.updated_at = at;
        }
        Ok(true)
    }
}

impl OrderStore for MemoryStore {
    fn run_atomic(&self, work: &mut UnitWork<'_>) -> Result<(), DomainError> {
        let mut shared = self.lock();
        let started = Instant::now();
        let mut unit = MemoryUnit::new(&mut shared);

        work(&mut unit)?;

        if started.elapsed() > self.unit_timeout {
            return Err(DomainError::Timeout(format!(
                "atomic unit exceeded {} ms before commit",
                self.unit_timeout.as_millis()
            )));
        }
        unit.commit();
        Ok(())
    }

    fn find_order(&self, id: Uuid) -> Result<Option<Order>, DomainError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, DomainError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut state = self.lock();
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        order.status = status;
        order.updated_at = at;
        Ok(true)
    }
}

impl CatalogRepository for MemoryStore {
    fn find_product(&self, id: Uuid) -> Result<Option<Product>, DomainError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, DomainError> {
        let state = self.lock();
        let category_ids: Option<Vec<Uuid>> = query.category.as_ref().map(|needle| {
            let needle = needle.to_lowercase();
            state
                .categories
                .values()
                .filter(|c| c.name.to_lowercase().contains(&needle))
                .map(|c| c.id)
                .collect()
        });

        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| {
                category_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&p.category_id))
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(products
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    fn insert_product(&self, product: &Product) -> Result<(), DomainError> {
        self.lock().products.insert(product.id, product.clone());
        Ok(())
    }

    fn update_product(
        &self,
        id: Uuid,
        changes: &ProductChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Product>, DomainError> {
        let mut state = self.lock();
        Ok(state.products.get_mut(&id).map(|product| {
            changes.apply_to(product, at);
            product.clone()
        }))
    }

    fn delete_product(&self, id: Uuid) -> Result<ProductRemoval, DomainError> {
        let mut state = self.lock();
        if !state.products.contains_key(&id) {
            return Ok(ProductRemoval::NotFound);
        }
        if state.product_is_referenced(id) {
            return Ok(ProductRemoval::InUse);
        }
        state.products.remove(&id);
        Ok(ProductRemoval::Deleted)
    }

    fn find_category(&self, id: Uuid) -> Result<Option<Category>, DomainError> {
        Ok(self.lock().categories.get(&id).cloned())
    }

    fn category_name_exists(&self, name: &str) -> Result<bool, DomainError> {
        Ok(self.lock().categories.values().any(|c| c.name == name))
    }

    fn list_categories(&self) -> Result<Vec<Category>, DomainError> {
        let mut categories: Vec<Category> = self.lock().categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    fn insert_category(&self, category: &Category) -> Result<(), DomainError> {
        let mut state = self.lock();
        if state.categories.values().any(|c| c.name == category.name) {
            return Err(DomainError::DuplicateCategory(category.name.clone()));
        }
        state.categories.insert(category.id, category.clone());
        Ok(())
    }
}
