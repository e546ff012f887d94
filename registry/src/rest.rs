use crate::errors::{Error, Result};
use crate::metrics;
use crate::model::{CapacityInfo, Gateway, GatewayWithDevices, PeripheralDevice, RemovalSummary};
use crate::service::GatewayService;
use crate::validate::{
    validate_gateway_changes, validate_new_device, validate_new_gateway, AttachDevicePayload,
    CreateGatewayPayload, UpdateGatewayPayload,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    service: GatewayService,
}

pub fn create_router(service: GatewayService, cors_origin: Option<&str>) -> Router {
    let state = AppState { service };

    let router = Router::new()
        .route("/api/gateways", get(list_gateways).post(create_gateway))
        .route(
            "/api/gateways/:id",
            get(get_gateway).patch(update_gateway).delete(remove_gateway),
        )
        .route("/api/gateways/:id/devices", post(attach_device))
        .route("/api/gateways/:id/devices/:device_id", delete(detach_device))
        .route("/api/gateways/:id/device-count", get(device_count))
        .route("/api/gateways/:id/can-accept-device", get(can_accept_device))
        .route("/api/gateways/:id/capacity-info", get(capacity_info))
        .route("/api/devices/:device_id", get(get_device))
        .route("/metrics", get(metrics_handler))
        .method_not_allowed_fallback(route_not_found)
        .fallback(route_not_found)
        .layer(middleware::from_fn(error_envelope))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    match cors_origin.map(|origin| (origin, origin.parse::<HeaderValue>())) {
        Some((_, Ok(origin))) => router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE]),
        ),
        Some((origin, Err(_))) => {
            warn!("Ignoring invalid CORS origin '{}'", origin);
            router
        }
        None => router,
    }
}

/// Body of every error response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub message: ErrorMessage,
    pub error: &'static str,
    pub status_code: u16,
    pub timestamp: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let label = self.label();

        let message = match self {
            Error::Validation(messages) => {
                debug!(?messages, "Validation failed");
                ErrorMessage::Many(messages)
            }
            err if status.is_server_error() => {
                error!("API error: {}", err);
                ErrorMessage::One("Internal server error".to_string())
            }
            err => {
                debug!(error = label, %err, "API client error");
                ErrorMessage::One(err.to_string())
            }
        };

        let envelope = ErrorEnvelope {
            message,
            error: label,
            status_code: status.as_u16(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            path: String::new(),
        };

        let mut response = (status, Json(envelope.clone())).into_response();
        response.extensions_mut().insert(envelope);
        response
    }
}

/// Fills in the request path of error envelopes produced further down.
async fn error_envelope(request: Request, next: Next) -> Response {
    let path = request_target(request.uri());
    let mut response = next.run(request).await;

    match response.extensions_mut().remove::<ErrorEnvelope>() {
        Some(mut envelope) => {
            envelope.path = path;
            (response.status(), Json(envelope)).into_response()
        }
        None => response,
    }
}

/// Path plus query string, as the client sent it.
fn request_target(uri: &Uri) -> String {
    uri.path_and_query()
        .map_or_else(|| uri.path().to_string(), |target| target.to_string())
}

// Also answers known paths hit with an unrouted method.
async fn route_not_found(method: Method, uri: Uri) -> Error {
    Error::NotFound(format!("Cannot {} {}", method, request_target(&uri)))
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::Validation(vec![rejection.body_text()]))
}

// Malformed ids cannot match any row.
fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

async fn list_gateways(State(state): State<AppState>) -> Result<Json<Vec<GatewayWithDevices>>> {
    Ok(Json(state.service.find_all().await?))
}

async fn create_gateway(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateGatewayPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Gateway>)> {
    let input = validate_new_gateway(body(payload)?)?;
    let gateway = state.service.create_gateway(input).await?;
    Ok((StatusCode::CREATED, Json(gateway)))
}

async fn get_gateway(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GatewayWithDevices>> {
    let id = parse_id(&id).ok_or_else(Error::gateway_not_found)?;
    Ok(Json(state.service.find_one(id).await?))
}

async fn update_gateway(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UpdateGatewayPayload>, JsonRejection>,
) -> Result<Json<GatewayWithDevices>> {
    let changes = validate_gateway_changes(body(payload)?)?;
    let id = parse_id(&id).ok_or_else(Error::gateway_not_found)?;
    Ok(Json(state.service.update(id, changes).await?))
}

async fn remove_gateway(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemovalSummary>> {
    let id = parse_id(&id).ok_or_else(Error::gateway_not_found)?;
    Ok(Json(state.service.remove(id).await?))
}

async fn attach_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<AttachDevicePayload>, JsonRejection>,
) -> Result<(StatusCode, Json<PeripheralDevice>)> {
    let input = validate_new_device(body(payload)?)?;
    let id = parse_id(&id).ok_or_else(Error::gateway_not_found)?;
    let device = state.service.attach_device(id, input).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn detach_device(
    State(state): State<AppState>,
    Path((id, device_id)): Path<(String, String)>,
) -> Result<Json<PeripheralDevice>> {
    let device_id = parse_id(&device_id).ok_or_else(Error::device_not_found)?;
    match parse_id(&id) {
        Some(id) => Ok(Json(state.service.detach_device(id, device_id).await?)),
        None => {
            state.service.find_device(device_id).await?;
            Err(Error::device_not_on_gateway())
        }
    }
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<PeripheralDevice>> {
    let device_id = parse_id(&device_id).ok_or_else(Error::device_not_found)?;
    Ok(Json(state.service.find_device(device_id).await?))
}

async fn device_count(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<u64>> {
    let count = match parse_id(&id) {
        Some(id) => state.service.device_count(id).await?,
        None => 0,
    };
    Ok(Json(count))
}

async fn can_accept_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<bool>> {
    let accepts = match parse_id(&id) {
        Some(id) => state.service.can_accept_device(id).await?,
        None => state.service.max_devices_per_gateway() > 0,
    };
    Ok(Json(accepts))
}

async fn capacity_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CapacityInfo>> {
    let info = match parse_id(&id) {
        Some(gateway_id) => state.service.capacity_info(gateway_id).await?,
        None => state.service.capacity_for(id, 0),
    };
    Ok(Json(info))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
