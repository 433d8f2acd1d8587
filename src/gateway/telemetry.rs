//! Per-request telemetry for the gateway: a request counter and a latency
//! histogram, exposed in the Prometheus text format on `/metrics`.

use std::time::{Duration, Instant};

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use actix_web::{web, HttpResponse};
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};
use uuid::Uuid;

use super::{error_body, route};

pub struct GatewayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let requests_total = IntCounterVec::new(
            opts!("api_gateway_requests_total", "Requests handled by the gateway"),
            &["service", "endpoint", "method", "status"],
        )?;
        let request_duration = HistogramVec::new(
            histogram_opts!(
                "api_gateway_request_duration_seconds",
                "Time spent handling a gateway request"
            ),
            &["service", "endpoint", "method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        Ok(Self {
            registry,
            requests_total,
            request_duration,
        })
    }

    pub fn observe(&self, path: &str, method: &str, status: StatusCode, elapsed: Duration) {
        let service = service_label(path);
        let endpoint = endpoint_label(path);
        self.requests_total
            .with_label_values(&[service, endpoint.as_str(), method, status.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[service, endpoint.as_str(), method])
            .observe(elapsed.as_secs_f64());
    }

    pub fn requests(&self, service: &str, endpoint: &str, method: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.requests_total
            .get_metric_with_label_values(&[service, endpoint, method, status.as_str()])
            .map(|counter| counter.get())
            .unwrap_or(0)
    }

    /// Every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn service_label(path: &str) -> &'static str {
    match route(path) {
        Some(super::Upstream::Inventory) => "inventory",
        Some(super::Upstream::Orders) => "orders",
        None => "unknown",
    }
}

/// Path with id segments collapsed, so label cardinality stays bounded.
fn endpoint_label(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware recording every request on the `GatewayMetrics` in app data.
pub async fn track_requests(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.path().to_string();
    let metrics = req.app_data::<web::Data<GatewayMetrics>>().cloned();

    let res = next.call(req).await?;

    let elapsed = started.elapsed();
    let status = res.status();
    if let Some(metrics) = metrics {
        metrics.observe(&path, &method, status, elapsed);
    }
    log::debug!(
        "{} {} -> {} in {:.3} ms",
        method,
        path,
        status.as_u16(),
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(res)
}

pub async fn metrics_endpoint(metrics: web::Data<GatewayMetrics>) -> HttpResponse {
    match metrics.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type(TextEncoder::new().format_type())
            .body(body),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".into(),
            )
        }
    }
}
