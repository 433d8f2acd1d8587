use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::application::catalog_service::{ProductDraft, ProductPatch};
use crate::domain::product::Product;
use crate::errors::AppError;
use crate::AppState;

use super::parse_id;

/// Accepts a decimal either as a JSON string ("19.99") or a JSON number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DecimalInput {
    Text(String),
    Number(serde_json::Number),
}

impl From<DecimalInput> for String {
    fn from(input: DecimalInput) -> Self {
        match input {
            DecimalInput::Text(s) => s,
            DecimalInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[schema(value_type = String, example = "19.99")]
    pub price: DecimalInput,
    pub stock_level: i32,
    pub category_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub price: Option<DecimalInput>,
    pub stock_level: Option<i32>,
    pub category_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListProductsParams {
    /// Case-insensitive part of a category name
    pub category: Option<String>,
    /// Defaults to 10
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: String,
    pub stock_level: i32,
    pub category_id: Uuid,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            name: p.name,
            description: p.description,
            price: p.price.to_string(),
            stock_level: p.stock_level,
            category_id: p.category_id,
            created_at: p.created_at.to_rfc3339(),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/products",
    params(ListProductsParams),
    responses((status = 200, description = "Products, newest first", body = [ProductResponse])),
    tag = "products"
)]
pub async fn list_products(
    state: web::Data<AppState>,
    query: web::Query<ListProductsParams>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();

    let products = web::block(move || {
        state
            .catalog
            .list_products(params.category, params.limit, params.offset)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    let body: Vec<ProductResponse> = products.into_iter().map(ProductResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    get,
    path = "/products/{id}",
    params(("id" = Uuid, Path, description = "Product UUID")),
    responses(
        (status = 200, description = "Product found", body = ProductResponse),
        (status = 400, description = "Malformed product id"),
        (status = 404, description = "Product not found"),
    ),
    tag = "products"
)]
pub async fn get_product(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let product_id = parse_id(&path, "product")?;

    let product = web::block(move || state.catalog.get_product(product_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(ProductResponse::from(product)))
}

#[utoipa::path(
    post,
    path = "/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 400, description = "Missing name, non-positive price or negative stock"),
        (status = 404, description = "Category not found"),
    ),
    tag = "products"
)]
pub async fn create_product(
    state: web::Data<AppState>,
    body: web::Json<CreateProductRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let draft = ProductDraft {
        name: body.name,
        description: body.description,
        price: body.price.into(),
        stock_level: body.stock_level,
        category_id: body.category_id,
    };

    let product = web::block(move || state.catalog.create_product(draft))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(ProductResponse::from(product)))
}

/// PATCH /products/{id}
///
/// Partial update. Empty names, non-positive prices and negative stock
/// levels are ignored; a request with nothing usable is rejected.
#[utoipa::path(
    patch,
    path = "/products/{id}",
    params(("id" = Uuid, Path, description = "Product UUID")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Updated product", body = ProductResponse),
        (status = 400, description = "No valid fields to update"),
        (status = 404, description = "Product or category not found"),
    ),
    tag = "products"
)]
pub async fn update_product(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateProductRequest>,
) -> Result<HttpResponse, AppError> {
    let product_id = parse_id(&path, "product")?;
    let body = body.into_inner();
    let patch = ProductPatch {
        name: body.name,
        description: body.description,
        price: body.price.map(String::from),
        stock_level: body.stock_level,
        category_id: body.category_id,
    };

    let product = web::block(move || state.catalog.update_product(product_id, patch))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(ProductResponse::from(product)))
}

#[utoipa::path(
    delete,
    path = "/products/{id}",
    params(("id" = Uuid, Path, description = "Product UUID")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Product is referenced by orders"),
    ),
    tag = "products"
)]
pub async fn delete_product(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let product_id = parse_id(&path, "product")?;

    web::block(move || state.catalog.delete_product(product_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}
