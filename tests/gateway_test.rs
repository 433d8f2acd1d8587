//! Gateway forwarding against a live order service on a local port.

use std::net::TcpListener;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::middleware::from_fn;
use actix_web::{test, web, App};
use catalog_orders::application::retry::RetryPolicy;
use catalog_orders::config::GatewaySettings;
use catalog_orders::gateway::telemetry::{self, GatewayMetrics};
use catalog_orders::gateway::{self, Gateway};
use catalog_orders::infrastructure::memory::MemoryStore;
use catalog_orders::{build_server, AppState};
use serde_json::{json, Value};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Starts the REST service in the background and returns its base URL.
fn spawn_service() -> String {
    let port = free_port();
    let state = AppState::new(Arc::new(MemoryStore::default()), RetryPolicy::no_retry());
    let server = build_server(state, "127.0.0.1", port).expect("bind service");
    actix_web::rt::spawn(server);
    format!("http://127.0.0.1:{port}")
}

fn settings(inventory: &str, orders: &str) -> GatewaySettings {
    GatewaySettings {
        host: "127.0.0.1".into(),
        port: 0,
        inventory_service_url: inventory.into(),
        order_service_url: orders.into(),
    }
}

#[actix_web::test]
async fn forwards_requests_and_relays_responses() {
    let upstream = spawn_service();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Gateway::new(&settings(&upstream, &upstream))))
            .configure(gateway::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/categories")
        .set_json(json!({ "name": "Toys", "description": "Fun" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let category: Value = test::read_body_json(resp).await;
    assert_eq!(category["name"], "Toys");

    let req = test::TestRequest::post()
        .uri("/products")
        .set_json(json!({
            "name": "Kite",
            "price": "12.00",
            "stock_level": 2,
            "category_id": category["id"],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let product: Value = test::read_body_json(resp).await;

    let req = test::TestRequest::post()
        .uri("/orders")
        .set_json(json!({
            "user_id": 3,
            "items": [{ "product_id": product["id"], "quantity": 5 }],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::get().uri("/orders?user_id=3").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let orders: Value = test::read_body_json(resp).await;
    assert_eq!(orders, json!([]));
}

#[actix_web::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    let upstream = spawn_service();
    let dead = format!("http://127.0.0.1:{}", free_port());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Gateway::new(&settings(&upstream, &dead))))
            .configure(gateway::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/orders").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Error while proxying to Order Service");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/categories").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn unknown_paths_are_not_proxied() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Gateway::new(&settings(
                "http://127.0.0.1:1",
                "http://127.0.0.1:1",
            ))))
            .configure(gateway::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/users").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn proxied_requests_are_counted_and_exported() {
    let upstream = spawn_service();
    let metrics = web::Data::new(GatewayMetrics::new().unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Gateway::new(&settings(&upstream, &upstream))))
            .app_data(metrics.clone())
            .wrap(from_fn(telemetry::track_requests))
            .configure(gateway::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/categories").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let missing = format!("/orders/{}", uuid::Uuid::new_v4());
    let resp = test::call_service(&app, test::TestRequest::get().uri(&missing).to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    assert_eq!(metrics.requests("inventory", "/categories", "GET", 200), 1);
    assert_eq!(metrics.requests("orders", "/orders/{id}", "GET", 404), 1);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains(
        r#"api_gateway_requests_total{endpoint="/categories",method="GET",service="inventory",status="200"} 1"#
    ));
}
