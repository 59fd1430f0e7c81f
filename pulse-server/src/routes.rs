//! HTTP routes of the metrics server.

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use pulse_core::ingest::{self, BodyHeaders};
use pulse_core::transport::encrypt::Decryptor;
use pulse_core::transport::signing::{sign, HEADER_SIGNATURE};
use pulse_core::transport::subnet::{TrustedSubnet, HEADER_REAL_IP};
use pulse_core::{Metrics, PulseError, Repository};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    repo: Arc<dyn Repository>,
    secret: Option<Arc<str>>,
    decryptor: Option<Arc<Decryptor>>,
    trusted_subnet: Option<Arc<TrustedSubnet>>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repository>,
        secret: Option<String>,
        decryptor: Option<Decryptor>,
    ) -> Self {
        Self {
            repo,
            secret: secret.map(Arc::from),
            decryptor: decryptor.map(Arc::new),
            trusted_subnet: None,
        }
    }

    /// Only accept requests whose `X-Real-IP` lies in `subnet`.
    pub fn with_trusted_subnet(mut self, subnet: Option<TrustedSubnet>) -> Self {
        self.trusted_subnet = subnet.map(Arc::new);
        self
    }

    /// Body decoding for JSON requests. `signed` routes check the signature when a
    /// secret is configured; `encrypted` routes decrypt when a key is configured.
    fn decode(
        &self,
        headers: &HeaderMap,
        raw: &[u8],
        signed: bool,
        encrypted: bool,
    ) -> Result<Vec<u8>, ApiError> {
        require_json(headers)?;
        let headers = BodyHeaders {
            content_encoding: header_str(headers, CONTENT_ENCODING.as_str()),
            signature: header_str(headers, HEADER_SIGNATURE),
        };
        let secret = if signed { self.secret.as_deref() } else { None };
        let decryptor = if encrypted { self.decryptor.as_deref() } else { None };
        Ok(ingest::decode_body(headers, raw, secret, decryptor)?)
    }

    /// JSON response, signed when a secret is configured.
    fn json(&self, body: Vec<u8>) -> Result<Response, ApiError> {
        let signature = match &self.secret {
            Some(secret) => Some(
                HeaderValue::from_str(&sign(&body, secret)?)
                    .map_err(|e| PulseError::Other(e.into()))?,
            ),
            None => None,
        };
        let mut response = ([(CONTENT_TYPE, "application/json")], body).into_response();
        if let Some(signature) = signature {
            response.headers_mut().insert(HeaderName::from_static("hashsha256"), signature);
        }
        Ok(response)
    }
}

/// Maps library errors onto status codes.
pub enum ApiError {
    UnsupportedMediaType,
    Forbidden,
    Pulse(PulseError),
}

impl From<PulseError> for ApiError {
    fn from(err: PulseError) -> Self {
        Self::Pulse(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Pulse(PulseError::MetricNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Pulse(
                PulseError::InvalidMetric { .. }
                | PulseError::KindMismatch { .. }
                | PulseError::CounterOverflow { .. }
                | PulseError::Serialization(_)
                | PulseError::CompressionFailed { .. }
                | PulseError::SignatureInvalid { .. }
                | PulseError::EncryptionFailed { .. },
            ) => StatusCode::BAD_REQUEST,
            Self::Pulse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Pulse(e) if status.is_server_error() => error!(error = %e, "Request failed"),
            Self::Pulse(e) => warn!(status = status.as_u16(), error = %e, "Request rejected"),
            Self::UnsupportedMediaType => warn!("Request without JSON content type"),
            Self::Forbidden => {}
        }
        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    match header_str(headers, CONTENT_TYPE.as_str()) {
        Some(value) if value.starts_with("application/json") => Ok(()),
        _ => Err(ApiError::UnsupportedMediaType),
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    Ok(serde_json::from_slice(body).map_err(PulseError::from)?)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/update/:type/:name/:value", post(update_path))
        .route("/updates/", post(updates))
        .route("/value/", post(value_json))
        .route("/value/:type/:name", get(value_path))
        .layer(middleware::from_fn_with_state(state.clone(), require_trusted_ip))
        .with_state(state)
}

/// Refuse clients outside the trusted subnet, when one is configured.
async fn require_trusted_ip(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(subnet) = &state.trusted_subnet {
        let real_ip = header_str(request.headers(), HEADER_REAL_IP);
        if !subnet.allows(real_ip) {
            warn!(
                real_ip = real_ip.unwrap_or("-"),
                subnet = %subnet,
                path = %request.uri().path(),
                "Request from outside the trusted subnet"
            );
            return ApiError::Forbidden.into_response();
        }
    }
    next.run(request).await
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    Ok(Html(ingest::render_index(state.repo.as_ref()).await?))
}

async fn ping(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.repo.ping().await?;
    Ok(StatusCode::OK)
}

async fn update_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = state.decode(&headers, &body, true, true)?;
    let metric: Metrics = parse(&body)?;
    let stored = ingest::apply_metric(state.repo.as_ref(), &metric).await?;
    state.json(serde_json::to_vec(&stored).map_err(PulseError::from)?)
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    ingest::apply_path_update(state.repo.as_ref(), &kind, &name, &value).await?;
    Ok(StatusCode::OK)
}

async fn updates(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = state.decode(&headers, &body, true, false)?;
    let metrics: Vec<Metrics> = parse(&body)?;
    ingest::apply_batch(state.repo.as_ref(), &metrics).await?;
    state.json(Vec::new())
}

async fn value_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = state.decode(&headers, &body, false, false)?;
    let query: Metrics = parse(&body)?;
    let found = ingest::lookup(state.repo.as_ref(), &query).await?;
    state.json(serde_json::to_vec(&found).map_err(PulseError::from)?)
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    Ok(ingest::lookup_text(state.repo.as_ref(), &kind, &name).await?)
}
