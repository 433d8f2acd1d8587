//! Order workflow against the in-memory store: stock reservation, atomicity,
//! price freezing, cancellation compensation and concurrent writers.

use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bigdecimal::BigDecimal;
use catalog_orders::application::catalog_service::{CatalogService, ProductDraft, ProductPatch};
use catalog_orders::application::order_service::OrderService;
use catalog_orders::application::retry::RetryPolicy;
use catalog_orders::domain::errors::DomainError;
use catalog_orders::domain::order::{OrderFilter, OrderItemRequest, OrderStatus};
use catalog_orders::infrastructure::memory::MemoryStore;
use uuid::Uuid;

struct Fixture {
    orders: Arc<OrderService<MemoryStore>>,
    catalog: CatalogService<MemoryStore>,
    category_id: Uuid,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let catalog = CatalogService::new(store.clone());
        let category = catalog
            .create_category("Hardware".into(), "Tools".into())
            .expect("category");
        Self {
            orders: Arc::new(OrderService::new(store, RetryPolicy::default())),
            catalog,
            category_id: category.id,
        }
    }

    fn add_product(&self, price: &str, stock_level: i32) -> Uuid {
        self.catalog
            .create_product(ProductDraft {
                name: format!("product-{}", Uuid::new_v4()),
                description: String::new(),
                price: price.into(),
                stock_level,
                category_id: self.category_id.to_string(),
            })
            .expect("product")
            .id
    }

    fn stock(&self, id: Uuid) -> i32 {
        self.catalog.get_product(id).expect("product exists").stock_level
    }
}

fn line(product_id: Uuid, quantity: i32) -> OrderItemRequest {
    OrderItemRequest {
        product_id: product_id.to_string(),
        quantity,
    }
}

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

#[test]
fn second_order_for_the_same_stock_fails_and_leaves_stock_untouched() {
    let fx = Fixture::new();
    let a = fx.add_product("4.25", 5);

    let order = fx.orders.create_order(1, vec![line(a, 3)]).expect("first order");
    assert_eq!(order.total, dec("12.75"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items[0].price_at_purchase, dec("4.25"));
    assert_eq!(fx.stock(a), 2);

    let err = fx.orders.create_order(2, vec![line(a, 3)]).unwrap_err();
    assert!(matches!(
        err,
        DomainError::InsufficientStock { product_id, requested: 3 } if product_id == a
    ));
    assert_eq!(fx.stock(a), 2);
    assert_eq!(fx.orders.list_orders(&OrderFilter::default()).unwrap().len(), 1);
}

#[test]
fn failure_on_a_later_item_undoes_earlier_reservations() {
    let fx = Fixture::new();
    let first = fx.add_product("1.00", 10);
    let second = fx.add_product("2.00", 10);
    let third = fx.add_product("3.00", 1);
    let fourth = fx.add_product("4.00", 10);

    let err = fx
        .orders
        .create_order(
            9,
            vec![line(first, 2), line(second, 3), line(third, 2), line(fourth, 1)],
        )
        .unwrap_err();

    assert!(matches!(err, DomainError::InsufficientStock { product_id, .. } if product_id == third));
    assert_eq!(fx.stock(first), 10);
    assert_eq!(fx.stock(second), 10);
    assert_eq!(fx.stock(third), 1);
    assert_eq!(fx.stock(fourth), 10);
    assert!(fx.orders.list_orders(&OrderFilter::default()).unwrap().is_empty());
}

#[test]
fn unknown_product_aborts_without_side_effects() {
    let fx = Fixture::new();
    let known = fx.add_product("1.00", 4);
    let missing = Uuid::new_v4();

    let err = fx
        .orders
        .create_order(1, vec![line(known, 1), line(missing, 1)])
        .unwrap_err();

    assert!(matches!(err, DomainError::ProductNotFound(id) if id == missing));
    assert_eq!(fx.stock(known), 4);
}

#[test]
fn validation_failures_happen_before_any_reservation() {
    let fx = Fixture::new();
    let a = fx.add_product("1.00", 4);

    for (user_id, items) in [
        (0, vec![line(a, 1)]),
        (1, vec![]),
        (1, vec![line(a, 1), line(a, -1)]),
        (
            1,
            vec![
                line(a, 1),
                OrderItemRequest {
                    product_id: "xyz".into(),
                    quantity: 1,
                },
            ],
        ),
    ] {
        let err = fx.orders.create_order(user_id, items).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)), "got {err:?}");
    }
    assert_eq!(fx.stock(a), 4);
}

#[test]
fn repeated_product_lines_reserve_cumulatively() {
    let fx = Fixture::new();
    let a = fx.add_product("10.00", 5);

    let order = fx
        .orders
        .create_order(1, vec![line(a, 2), line(a, 3)])
        .expect("order");
    assert_eq!(order.total, dec("50.00"));
    assert_eq!(fx.stock(a), 0);

    let err = fx.orders.create_order(1, vec![line(a, 1)]).unwrap_err();
    assert!(matches!(err, DomainError::InsufficientStock { .. }));
}

#[test]
fn later_price_changes_do_not_touch_existing_orders() {
    let fx = Fixture::new();
    let a = fx.add_product("19.99", 10);
    let order = fx.orders.create_order(1, vec![line(a, 2)]).expect("order");

    fx.catalog
        .update_product(
            a,
            ProductPatch {
                price: Some("99.00".into()),
                ..ProductPatch::default()
            },
        )
        .expect("price update");

    let stored = fx.orders.get_order(order.id).expect("order");
    assert_eq!(stored.total, dec("39.98"));
    assert_eq!(stored.items[0].price_at_purchase, dec("19.99"));
    assert_eq!(fx.catalog.get_product(a).unwrap().price, dec("99.00"));
}

#[test]
fn cancelling_restores_each_line_exactly_once() {
    let fx = Fixture::new();
    let a = fx.add_product("1.00", 5);
    let b = fx.add_product("2.00", 5);
    let order = fx
        .orders
        .create_order(1, vec![line(a, 2), line(b, 1)])
        .expect("order");
    assert_eq!((fx.stock(a), fx.stock(b)), (3, 4));

    let cancelled = fx.orders.update_order_status(order.id, "cancelled").expect("cancel");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!((fx.stock(a), fx.stock(b)), (5, 5));

    let again = fx.orders.update_order_status(order.id, "cancelled").expect("cancel again");
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!((fx.stock(a), fx.stock(b)), (5, 5));
    assert_eq!(again.total, order.total);
    assert_eq!(again.items, order.items);
}

#[test]
fn rewriting_the_same_status_only_moves_updated_at() {
    let fx = Fixture::new();
    let a = fx.add_product("3.00", 5);
    let order = fx.orders.create_order(1, vec![line(a, 1)]).expect("order");
    let delivered = fx.orders.update_order_status(order.id, "delivered").expect("deliver");

    thread::sleep(Duration::from_millis(2));
    let again = fx.orders.update_order_status(order.id, "delivered").expect("deliver again");

    assert_eq!(again.status, OrderStatus::Delivered);
    assert!(again.updated_at > delivered.updated_at);
    assert_eq!(again.created_at, order.created_at);
    assert_eq!(again.total, order.total);
    assert_eq!(again.items, order.items);
    assert_eq!(fx.stock(a), 4);
}

#[test]
fn leaving_cancelled_is_accepted_without_re_reserving_stock() {
    let fx = Fixture::new();
    let a = fx.add_product("3.00", 5);
    let order = fx.orders.create_order(1, vec![line(a, 2)]).expect("order");
    fx.orders.update_order_status(order.id, "cancelled").expect("cancel");
    assert_eq!(fx.stock(a), 5);

    let reopened = fx.orders.update_order_status(order.id, "processing").expect("reopen");

    assert_eq!(reopened.status, OrderStatus::Processing);
    assert_eq!(fx.stock(a), 5);

    // A second cancellation releases again, since the order left `cancelled`.
    fx.orders.update_order_status(order.id, "cancelled").expect("cancel again");
    assert_eq!(fx.stock(a), 7);
}

#[test]
fn any_status_can_be_set_directly() {
    let fx = Fixture::new();
    let a = fx.add_product("3.00", 5);
    let order = fx.orders.create_order(1, vec![line(a, 1)]).expect("order");

    for status in ["delivered", "pending", "shipped", "processing"] {
        let updated = fx.orders.update_order_status(order.id, status).expect(status);
        assert_eq!(updated.status.as_str(), status);
    }
    assert_eq!(fx.stock(a), 4);
}

#[test]
fn status_update_errors() {
    let fx = Fixture::new();
    let a = fx.add_product("3.00", 5);
    let order = fx.orders.create_order(1, vec![line(a, 1)]).expect("order");

    let missing = Uuid::new_v4();
    assert!(matches!(
        fx.orders.update_order_status(missing, "shipped"),
        Err(DomainError::OrderNotFound(id)) if id == missing
    ));
    assert!(matches!(
        fx.orders.update_order_status(order.id, "lost"),
        Err(DomainError::InvalidStatus(_))
    ));
    assert_eq!(fx.orders.get_order(order.id).unwrap().status, OrderStatus::Pending);
}

#[test]
fn list_orders_filters_and_sorts_newest_first() {
    let fx = Fixture::new();
    let a = fx.add_product("1.00", 100);
    let mut ids = Vec::new();
    for user_id in [1, 2, 1] {
        ids.push(fx.orders.create_order(user_id, vec![line(a, 1)]).unwrap().id);
        thread::sleep(Duration::from_millis(2));
    }
    fx.orders.update_order_status(ids[2], "shipped").unwrap();

    let all = fx.orders.list_orders(&OrderFilter::default()).unwrap();
    assert_eq!(all.iter().map(|o| o.id).collect::<Vec<_>>(), vec![ids[2], ids[1], ids[0]]);

    let user_one = fx
        .orders
        .list_orders(&OrderFilter {
            user_id: Some(1),
            status: None,
        })
        .unwrap();
    assert_eq!(user_one.iter().map(|o| o.id).collect::<Vec<_>>(), vec![ids[2], ids[0]]);

    let pending_for_one = fx
        .orders
        .list_orders(&OrderFilter {
            user_id: Some(1),
            status: Some(OrderStatus::Pending),
        })
        .unwrap();
    assert_eq!(pending_for_one.len(), 1);
    assert_eq!(pending_for_one[0].id, ids[0]);
}

#[test]
fn concurrent_orders_never_oversell() {
    let fx = Fixture::new();
    let a = fx.add_product("5.00", 25);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let orders = Arc::clone(&fx.orders);
            thread::spawn(move || {
                let quantity = (i % 3) + 1;
                orders
                    .create_order(i as i64 + 1, vec![line(a, quantity)])
                    .map(|o| o.items[0].quantity)
            })
        })
        .collect();

    let mut reserved = 0;
    for handle in handles {
        match handle.join().expect("thread") {
            Ok(quantity) => reserved += quantity,
            Err(DomainError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(reserved <= 25);
    assert_eq!(fx.stock(a), 25 - reserved);
    let persisted: i32 = fx
        .orders
        .list_orders(&OrderFilter::default())
        .unwrap()
        .iter()
        .map(|o| o.items[0].quantity)
        .sum();
    assert_eq!(persisted, reserved);
}

#[test]
fn concurrent_cancellations_release_stock_once() {
    let fx = Fixture::new();
    let a = fx.add_product("5.00", 10);
    let order = fx.orders.create_order(1, vec![line(a, 4)]).expect("order");
    assert_eq!(fx.stock(a), 6);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orders = Arc::clone(&fx.orders);
            thread::spawn(move || orders.update_order_status(order.id, "cancelled"))
        })
        .collect();
    for handle in handles {
        let result = handle.join().expect("thread").expect("cancel succeeds");
        assert_eq!(result.status, OrderStatus::Cancelled);
    }

    assert_eq!(fx.stock(a), 10);
}

#[test]
fn products_referenced_by_orders_cannot_be_deleted() {
    let fx = Fixture::new();
    let a = fx.add_product("5.00", 10);
    let unused = fx.add_product("5.00", 10);
    fx.orders.create_order(1, vec![line(a, 1)]).expect("order");

    assert!(matches!(
        fx.catalog.delete_product(a),
        Err(DomainError::ProductInUse(id)) if id == a
    ));
    fx.catalog.delete_product(unused).expect("delete unused");
    assert!(matches!(
        fx.catalog.get_product(unused),
        Err(DomainError::ProductNotFound(_))
    ));
}
