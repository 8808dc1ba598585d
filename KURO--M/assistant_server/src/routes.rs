use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use indexmap::IndexMap;
use kuro_actions::{
    arguments::ParamKind,
    capabilities::{CapabilityRegistry, RiskClass},
    pipeline::{AssistantReply, Pipeline, PipelineError},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::tts::{SpeechSynthesizer, TtsError};

/// Service name reported by `GET /`.
pub const SERVICE_NAME: &str = "Kuro AI Assistant";

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    tts: Arc<dyn SpeechSynthesizer>,
}

impl AppState {
    /// Bundles the pipeline and speech backend.
    #[must_use]
    pub fn new(pipeline: Pipeline, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { pipeline, tts }
    }

    /// Request pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn registry(&self) -> &CapabilityRegistry {
        self.pipeline.dispatcher().registry()
    }
}

/// Error body returned for rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}

/// Request-level failures of the HTTP surface.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or empty input.
    BadRequest(String),
    /// A backing service is not configured.
    ServiceUnavailable(String),
    /// A backing service failed.
    BadGateway(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (Self::BadRequest(error) | Self::ServiceUnavailable(error) | Self::BadGateway(error)) =
            self;
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Body of `POST /assistant`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantRequest {
    /// The user's utterance.
    #[serde(default)]
    pub message: String,
}

/// Body of `POST /speak`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakRequest {
    /// Text to synthesize.
    #[serde(default)]
    pub text: String,
}

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthBody {
    /// Always `online`.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Crate version.
    pub version: String,
}

/// One parameter as listed by `GET /tools`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolParameter {
    /// Accepted value shape.
    #[serde(rename = "type")]
    pub kind: ParamKind,
    /// Whether the argument is mandatory.
    pub required: bool,
    /// Parameter description.
    pub description: String,
}

/// One capability as listed by `GET /tools`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolEntry {
    /// Capability description.
    pub description: String,
    /// Risk classification.
    pub risk_class: RiskClass,
    /// Parameters by name, in declaration order.
    pub parameters: IndexMap<String, ToolParameter>,
}

/// Body of `GET /tools`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsBody {
    /// Capabilities by name, in registration order.
    pub available_tools: IndexMap<String, ToolEntry>,
}

impl From<&CapabilityRegistry> for ToolsBody {
    fn from(registry: &CapabilityRegistry) -> Self {
        let available_tools = registry
            .descriptors()
            .map(|descriptor| {
                let parameters = descriptor
                    .argument_schema
                    .params()
                    .iter()
                    .map(|param| {
                        (
                            param.name.clone(),
                            ToolParameter {
                                kind: param.kind,
                                required: param.required,
                                description: param.description.clone(),
                            },
                        )
                    })
                    .collect();
                (
                    descriptor.name.clone(),
                    ToolEntry {
                        description: descriptor.description.clone(),
                        risk_class: descriptor.risk_class,
                        parameters,
                    },
                )
            })
            .collect();
        Self { available_tools }
    }
}

/// Builds the HTTP router with CORS for `cors_origins`.
///
/// `*` allows any origin; entries that are not valid header values are
/// skipped with a warning.
#[must_use]
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/assistant", post(assistant))
        .route("/kuro", post(assistant))
        .route("/tools", get(tools))
        .route("/speak", post(speak))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(origin = %origin, error = %err, "skipping invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "online".into(),
        service: SERVICE_NAME.into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn assistant(
    State(state): State<AppState>,
    payload: Result<Json<AssistantRequest>, JsonRejection>,
) -> Result<Json<AssistantReply>, ApiError> {
    let Json(request) = payload?;
    match state.pipeline.handle(&request.message).await {
        Ok(reply) => {
            tracing::info!(
                request_id = %reply.request_id,
                function = %reply.function_called,
                success = reply.success,
                "assistant request served"
            );
            Ok(Json(reply))
        }
        Err(PipelineError::EmptyUtterance) => {
            Err(ApiError::BadRequest("Message cannot be empty".into()))
        }
        Err(err) => Err(ApiError::BadGateway(err.user_message().into())),
    }
}

async fn tools(State(state): State<AppState>) -> Json<ToolsBody> {
    Json(ToolsBody::from(state.registry()))
}

async fn speak(
    State(state): State<AppState>,
    payload: Result<Json<SpeakRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Text cannot be empty".into()));
    }
    match state.tts.synthesize(text).await {
        Ok(audio) => Ok(([(header::CONTENT_TYPE, state.tts.content_type())], audio).into_response()),
        Err(TtsError::NotConfigured) => Err(ApiError::ServiceUnavailable(
            "Text-to-speech is not configured".into(),
        )),
        Err(err) => {
            tracing::warn!(error = %err, "speech synthesis failed");
            Err(ApiError::BadGateway("Speech synthesis failed".into()))
        }
    }
}
