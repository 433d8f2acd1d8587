pub mod categories;
pub mod orders;
pub mod products;

use actix_web::{error, web, HttpRequest};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(OpenApi)]
#[openapi(
    paths(
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        categories::list_categories,
        categories::create_category,
    ),
    tags(
        (name = "orders", description = "Order placement and status workflow"),
        (name = "products", description = "Product catalog"),
        (name = "categories", description = "Product categories"),
    )
)]
pub struct ApiDoc;

/// Registers every REST route plus JSON error bodies for malformed input.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .service(
            web::scope("/orders")
                .route("", web::post().to(orders::create_order))
                .route("", web::get().to(orders::list_orders))
                .route("/{id}", web::get().to(orders::get_order))
                .route("/{id}", web::patch().to(orders::update_order_status)),
        )
        .service(
            web::scope("/products")
                .route("", web::get().to(products::list_products))
                .route("", web::post().to(products::create_product))
                .route("/{id}", web::get().to(products::get_product))
                .route("/{id}", web::patch().to(products::update_product))
                .route("/{id}", web::delete().to(products::delete_product)),
        )
        .service(
            web::scope("/categories")
                .route("", web::get().to(categories::list_categories))
                .route("", web::post().to(categories::create_category)),
        );
}

fn json_error(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(err.to_string()).into()
}

fn query_error(err: error::QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(err.to_string()).into()
}

pub(crate) fn parse_id(raw: &str, entity: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::BadRequest(format!("Invalid {} ID", entity)))
}
