use serde::{Deserialize, Serialize};
use serde_json::Value;
use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::analyze::corpus::CorpusSource;
use crate::assessment::{AssessmentError, RiskAssessment};
use crate::engine::AssessOptions;
use crate::handle::EngineHandle;
use crate::message::{text_or_empty, Message};

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze_email))
        .route("/analyze/sms", post(analyze_sms))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Fields are loosely typed on purpose: non-string values are normalized to empty text and
/// reported in `notes` instead of rejecting the request.
#[derive(Debug, Deserialize)]
struct AnalyzeReq {
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    sender: Option<Value>,
    #[serde(default)]
    subject: Option<Value>,
    #[serde(default)]
    include_examples: bool,
}

#[derive(Debug, Deserialize)]
struct SmsReq {
    text: String,
    #[serde(default)]
    include_examples: bool,
}

#[derive(Serialize)]
struct AnalyzeResp {
    #[serde(flatten)]
    assessment: RiskAssessment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: Vec<String>,
}

#[derive(Serialize)]
struct HealthResp {
    status: &'static str,
    corpus: CorpusSource,
    corpus_entries: usize,
    embedding_model: String,
    classifier: &'static str,
    reasoning: &'static str,
    two_signal_policy: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResp> {
    let ctx = state.engine.snapshot();
    Json(HealthResp {
        status: "ok",
        corpus: ctx.corpus_source.clone(),
        corpus_entries: ctx.index.len(),
        embedding_model: ctx.index.model_id().to_string(),
        classifier: ctx.classifier.name(),
        reasoning: ctx.reasoner.provider_name(),
        two_signal_policy: ctx.policy().as_str(),
    })
}

async fn analyze_email(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeReq>,
) -> Result<Json<AnalyzeResp>, ApiError> {
    let mut notes = Vec::new();
    let body = text_or_empty("body", req.body.as_ref(), &mut notes);
    let sender = text_or_empty("sender", req.sender.as_ref(), &mut notes);
    let subject = match req.subject.as_ref() {
        None | Some(Value::Null) => None,
        v => Some(text_or_empty("subject", v, &mut notes)),
    };
    let mut msg = Message::email(body, sender, subject);
    for n in notes {
        msg = msg.with_note(n);
    }
    run(&state, msg, req.include_examples).await
}

async fn analyze_sms(
    State(state): State<AppState>,
    Json(req): Json<SmsReq>,
) -> Result<Json<AnalyzeResp>, ApiError> {
    run(&state, Message::sms(req.text), req.include_examples).await
}

async fn run(
    state: &AppState,
    msg: Message,
    include_examples: bool,
) -> Result<Json<AnalyzeResp>, ApiError> {
    let opts = AssessOptions { include_examples };
    let assessment = state.engine.assess(&msg, opts).await?;
    Ok(Json(AnalyzeResp {
        assessment,
        notes: msg.notes.iter().map(ToString::to_string).collect(),
    }))
}

pub struct ApiError(AssessmentError);

impl From<AssessmentError> for ApiError {
    fn from(e: AssessmentError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
