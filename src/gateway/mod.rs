//! Reverse-proxying API gateway in front of the inventory and order services.

pub mod telemetry;

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};

use crate::config::GatewaySettings;

use telemetry::GatewayMetrics;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Inventory,
    Orders,
}

impl Upstream {
    pub fn label(&self) -> &'static str {
        match self {
            Upstream::Inventory => "Inventory Service",
            Upstream::Orders => "Order Service",
        }
    }
}

/// Picks the upstream owning `path` by its first segment.
pub fn route(path: &str) -> Option<Upstream> {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or_default();
    match first {
        "products" | "categories" => Some(Upstream::Inventory),
        "orders" => Some(Upstream::Orders),
        _ => None,
    }
}

pub struct Gateway {
    client: reqwest::Client,
    inventory_url: String,
    order_url: String,
}

impl Gateway {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            inventory_url: settings.inventory_service_url.trim_end_matches('/').to_string(),
            order_url: settings.order_service_url.trim_end_matches('/').to_string(),
        }
    }

    fn base_url(&self, upstream: Upstream) -> &str {
        match upstream {
            Upstream::Inventory => &self.inventory_url,
            Upstream::Orders => &self.order_url,
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn error_body(status: StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

/// Forwards the request unchanged (minus hop-by-hop headers) and relays the
/// upstream response.
pub async fn proxy(
    gateway: web::Data<Gateway>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let Some(upstream) = route(req.path()) else {
        return error_body(
            StatusCode::NOT_FOUND,
            format!("No service handles {}", req.path()),
        );
    };

    let target = format!(
        "{}{}",
        gateway.base_url(upstream),
        req.uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.path())
    );

    let method = match reqwest::Method::from_bytes(req.method().as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "Unsupported method".into()),
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in req.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(n, v);
        }
    }
    if let Some(peer) = req.connection_info().realip_remote_addr() {
        if let Ok(v) = reqwest::header::HeaderValue::from_str(peer) {
            headers.append("x-forwarded-for", v);
        }
    }

    let upstream_resp = match gateway
        .client
        .request(method, &target)
        .headers(headers)
        .body(body.to_vec())
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            log::error!("Error while proxying to {} ({}): {}", upstream.label(), target, e);
            return error_body(
                StatusCode::BAD_GATEWAY,
                format!("Error while proxying to {}", upstream.label()),
            );
        }
    };

    let status =
        StatusCode::from_u16(upstream_resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for (name, value) in upstream_resp.headers() {
        if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.append_header((n, v));
        }
    }

    match upstream_resp.bytes().await {
        Ok(bytes) => builder.body(bytes.to_vec()),
        Err(e) => {
            log::error!("Error reading response from {}: {}", upstream.label(), e);
            error_body(
                StatusCode::BAD_GATEWAY,
                format!("Error while proxying to {}", upstream.label()),
            )
        }
    }
}

/// `/metrics` plus the catch-all proxy. Expects `Gateway` and
/// `GatewayMetrics` in app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(telemetry::metrics_endpoint))
        .default_service(web::to(proxy));
}

/// Build the gateway server bound to the configured address.
pub fn build_gateway(settings: &GatewaySettings) -> std::io::Result<actix_web::dev::Server> {
    let gateway = web::Data::new(Gateway::new(settings));
    let metrics = web::Data::new(GatewayMetrics::new().map_err(std::io::Error::other)?);
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(gateway.clone())
            .app_data(metrics.clone())
            .wrap(from_fn(telemetry::track_requests))
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind((settings.host.clone(), settings.port))?
    .run())
}
