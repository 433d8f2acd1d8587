use std::time::{Duration, Instant};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::order::{Order, OrderFilter, OrderStatus};
use crate::domain::ports::{CatalogRepository, OrderStore, ProductRemoval, UnitOfWork, UnitWork};
use crate::domain::product::{Category, Product, ProductChanges, ProductQuery};
use crate::schema::{categories, order_items, orders, products};

use super::models::{CategoryRow, OrderItemRow, OrderRow, ProductChangeset, ProductRow};

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<DieselError> for DomainError {
    fn from(e: DieselError) -> Self {
        match &e {
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                DomainError::TransactionConflict(e.to_string())
            }
            DieselError::DatabaseError(_, info) if info.message().contains("deadlock detected") => {
                DomainError::TransactionConflict(e.to_string())
            }
            // lock_timeout / statement_timeout cancellations
            DieselError::DatabaseError(_, info) if info.message().contains("timeout") => {
                DomainError::Timeout(e.to_string())
            }
            _ => DomainError::Internal(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Internal(e.to_string())
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

pub struct DieselStore {
    pool: DbPool,
    unit_timeout: Duration,
}

impl DieselStore {
    pub fn new(pool: DbPool, unit_timeout: Duration) -> Self {
        Self { pool, unit_timeout }
    }
}

struct PgUnit<'a> {
    conn: &'a mut PgConnection,
}

impl UnitOfWork for PgUnit<'_> {
    fn find_product(&mut self, id: Uuid) -> Result<Option<Product>, DomainError> {
        let row = products::table
            .find(id)
            .select(ProductRow::as_select())
            .first(self.conn)
            .optional()?;
        Ok(row.map(Product::from))
    }

    fn decrement_stock_if_available(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> Result<Option<BigDecimal>, DomainError> {
        let price = diesel::update(
            products::table
                .filter(products::id.eq(product_id))
                .filter(products::stock_level.ge(quantity)),
        )
        .set((
            products::stock_level.eq(products::stock_level - quantity),
            products::updated_at.eq(at),
        ))
        .returning(products::price)
        .get_result(self.conn)
        .optional()?;
        Ok(price)
    }

    fn increment_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let updated = diesel::update(products::table.filter(products::id.eq(product_id)))
            .set((
                products::stock_level.eq(products::stock_level + quantity),
                products::updated_at.eq(at),
            ))
            .execute(self.conn)?;
        Ok(updated == 1)
    }

    fn insert_order(&mut self, order: &Order) -> Result<(), DomainError> {
        diesel::insert_into(orders::table)
            .values(&OrderRow::from_order(order))
            .execute(self.conn)?;
        diesel::insert_into(order_items::table)
            .values(&OrderItemRow::rows_for(order))
            .execute(self.conn)?;
        Ok(())
    }

    fn set_order_status_if(
        &mut self,
        order_id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::status.eq(expected.as_str())),
        )
        .set((orders::status.eq(status.as_str()), orders::updated_at.eq(at)))
        .execute(self.conn)?;
        Ok(updated == 1)
    }
}

impl OrderStore for DieselStore {
    fn run_atomic(&self, work: &mut UnitWork<'_>) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        let started = Instant::now();
        let timeout_ms = self.unit_timeout.as_millis();

        conn.build_transaction()
            .read_committed()
            .run::<_, DomainError, _>(|conn| {
                diesel::sql_query(format!("SET LOCAL lock_timeout = {timeout_ms}")).execute(conn)?;
                diesel::sql_query(format!("SET LOCAL statement_timeout = {timeout_ms}"))
                    .execute(conn)?;

                work(&mut PgUnit { conn })?;

                if started.elapsed() > self.unit_timeout {
                    return Err(DomainError::Timeout(format!(
                        "atomic unit exceeded {} ms before commit",
                        timeout_ms
                    )));
                }
                Ok(())
            })
    }

    fn find_order(&self, id: Uuid) -> Result<Option<Order>, DomainError> {
        let mut conn = self.pool.get()?;

        let order = orders::table
            .find(id)
            .select(OrderRow::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(order) = order else {
            return Ok(None);
        };

        let items = OrderItemRow::belonging_to(&order)
            .select(OrderItemRow::as_select())
            .order(order_items::position.asc())
            .load(&mut conn)?;

        order.into_order(items).map(Some)
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, DomainError> {
        let mut conn = self.pool.get()?;

        let mut query = orders::table
            .select(OrderRow::as_select())
            .order(orders::created_at.desc())
            .into_boxed();
        if let Some(user_id) = filter.user_id {
            query = query.filter(orders::user_id.eq(user_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(orders::status.eq(status.as_str()));
        }
        let rows = query.load(&mut conn)?;

        let items = OrderItemRow::belonging_to(&rows)
            .select(OrderItemRow::as_select())
            .order(order_items::position.asc())
            .load(&mut conn)?;
        let grouped = items.grouped_by(&rows);

        rows.into_iter()
            .zip(grouped)
            .map(|(row, items)| row.into_order(items))
            .collect()
    }

    fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let updated = diesel::update(orders::table.find(id))
            .set((orders::status.eq(status.as_str()), orders::updated_at.eq(at)))
            .execute(&mut conn)?;
        Ok(updated == 1)
    }
}

impl CatalogRepository for DieselStore {
    fn find_product(&self, id: Uuid) -> Result<Option<Product>, DomainError> {
        let mut conn = self.pool.get()?;
        PgUnit { conn: &mut conn }.find_product(id)
    }

    fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, DomainError> {
        let mut conn = self.pool.get()?;

        let mut select = products::table
            .select(ProductRow::as_select())
            .order(products::created_at.desc())
            .limit(query.limit)
            .offset(query.offset)
            .into_boxed();
        if let Some(category) = &query.category {
            let matching = categories::table
                .filter(categories::name.ilike(format!("%{}%", escape_like(category))))
                .select(categories::id);
            select = select.filter(products::category_id.eq_any(matching));
        }

        let rows = select.load(&mut conn)?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    fn insert_product(&self, product: &Product) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::insert_into(products::table)
            .values(&ProductRow::from(product))
            .execute(&mut conn)?;
        Ok(())
    }

    fn update_product(
        &self,
        id: Uuid,
        changes: &ProductChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Product>, DomainError> {
        let mut conn = self.pool.get()?;
        let changeset = ProductChangeset {
            name: changes.name.clone(),
            description: changes.description.clone(),
            price: changes.price.clone(),
            stock_level: changes.stock_level,
            category_id: changes.category_id,
            updated_at: at,
        };
        let row = diesel::update(products::table.find(id))
            .set(&changeset)
            .returning(ProductRow::as_returning())
            .get_result(&mut conn)
            .optional()?;
        Ok(row.map(Product::from))
    }

    fn delete_product(&self, id: Uuid) -> Result<ProductRemoval, DomainError> {
        let mut conn = self.pool.get()?;
        let referenced = diesel::dsl::exists(order_items::table.filter(order_items::product_id.eq(id)));
        let deleted = match diesel::delete(products::table.find(id).filter(diesel::dsl::not(referenced)))
            .execute(&mut conn)
        {
            Ok(n) => n,
            // A line committed after our snapshot still holds the FK.
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                return Ok(ProductRemoval::InUse)
            }
            Err(e) => return Err(e.into()),
        };
        if deleted == 1 {
            return Ok(ProductRemoval::Deleted);
        }

        let exists = diesel::select(diesel::dsl::exists(products::table.find(id))).get_result(&mut conn)?;
        Ok(if exists {
            ProductRemoval::InUse
        } else {
            ProductRemoval::NotFound
        })
    }

    fn find_category(&self, id: Uuid) -> Result<Option<Category>, DomainError> {
        let mut conn = self.pool.get()?;
        let row = categories::table
            .find(id)
            .select(CategoryRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Category::from))
    }

    fn category_name_exists(&self, name: &str) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let exists = diesel::select(diesel::dsl::exists(
            categories::table.filter(categories::name.eq(name)),
        ))
        .get_result(&mut conn)?;
        Ok(exists)
    }

    fn list_categories(&self) -> Result<Vec<Category>, DomainError> {
        let mut conn = self.pool.get()?;
        let rows = categories::table
            .select(CategoryRow::as_select())
            .order(categories::name.asc())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    fn insert_category(&self, category: &Category) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        match diesel::insert_into(categories::table)
            .values(&CategoryRow::from(category))
            .execute(&mut conn)
        {
            Ok(_) => Ok(()),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(DomainError::DuplicateCategory(category.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
