//! HTTP API
//!
//! Routes:
//!   POST /donate                  submit a donation
//!   GET  /participants/:address   participant snapshot
//!   GET  /health                  liveness
//!
//! Status mapping: 400 for malformed bodies, addresses and amounts; 429 for
//! rate limiting and duplicates; 500 when retries are exhausted; 504 when
//! the request deadline ran out; 503 when the lock or a backing service is
//! unavailable.
//!
//! Created: 2026-10-19

use crate::error::DonationError;
use crate::ledger::ProgressionRules;
use crate::processor::DonationProcessor;
use crate::types::{AmountInput, DonationReceipt, DonationRequest, LegReceipt, Participant};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub type SharedProcessor = Arc<DonationProcessor>;

pub fn create_router(processor: SharedProcessor) -> Router {
    Router::new()
        .route("/donate", post(donate))
        .route("/participants/:address", get(participant))
        .route("/health", get(health))
        .with_state(processor)
}

impl DonationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DonationError::InvalidAddress { .. } | DonationError::InvalidAmount(_) => {
                StatusCode::BAD_REQUEST
            }
            DonationError::RateLimitExceeded | DonationError::DuplicateSubmission(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            DonationError::Transfer { .. } | DonationError::ProcessingFailed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DonationError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            DonationError::LockTimeout(_) | DonationError::ExternalServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

impl IntoResponse for DonationError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), self.to_string())
    }
}

/// POST /donate body
#[derive(Debug, Deserialize)]
pub struct DonateBody {
    pub sender: String,
    pub amount: AmountInput,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub sponsor: String,
}

#[derive(Debug, Serialize)]
pub struct LegView {
    pub role: String,
    pub recipient: String,
    pub percent: u64,
    pub amount: String,
    pub tx_hash: Option<String>,
    pub skipped: Option<String>,
}

impl From<&LegReceipt> for LegView {
    fn from(leg: &LegReceipt) -> Self {
        Self {
            role: leg.role.to_string(),
            recipient: leg.recipient.clone(),
            percent: leg.percent,
            amount: leg.amount.to_string(),
            tx_hash: leg.tx_hash.map(|h| h.to_string()),
            skipped: leg.skipped.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParticipantView {
    pub address: String,
    pub level: usize,
    pub phase_target: Option<u64>,
    pub donation_count: u32,
    pub last_donation: DateTime<Utc>,
    pub sponsor: Option<String>,
}

impl ParticipantView {
    fn new(p: &Participant, rules: &ProgressionRules) -> Self {
        Self {
            address: p.address.clone(),
            level: p.level,
            phase_target: rules.phase_target(p.level),
            donation_count: p.donation_count,
            last_donation: p.last_donation,
            sponsor: p.sponsor.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DonateResponse {
    pub status: &'static str,
    pub sender: String,
    pub requested: String,
    pub transferred: String,
    pub shortfall: String,
    pub attempts: u32,
    pub leveled_up: bool,
    pub legs: Vec<LegView>,
    pub participant: ParticipantView,
}

impl DonateResponse {
    fn new(receipt: &DonationReceipt, rules: &ProgressionRules) -> Self {
        Self {
            status: "success",
            sender: receipt.sender.clone(),
            requested: receipt.requested.to_string(),
            transferred: receipt.transferred.to_string(),
            shortfall: receipt.shortfall.to_string(),
            attempts: receipt.attempts,
            leveled_up: receipt.leveled_up,
            legs: receipt.legs.iter().map(LegView::from).collect(),
            participant: ParticipantView::new(&receipt.participant, rules),
        }
    }
}

/// POST /donate
pub async fn donate(
    State(processor): State<SharedProcessor>,
    body: Result<Json<DonateBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!("Rejected donation body: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, "malformed JSON body");
        }
    };

    let Some(amount) = body.amount.to_u256() else {
        return DonationError::InvalidAmount(format!("not an integer: {:?}", body.amount))
            .into_response();
    };

    // Addresses are checked verbatim; padding is rejected, not stripped
    let request = DonationRequest::new(body.sender.clone(), amount, body.sponsor)
        .with_signature(body.signature);

    match processor.submit(request).await {
        Ok(receipt) => Json(DonateResponse::new(&receipt, processor.rules())).into_response(),
        Err(e) => {
            if e.status_code().is_server_error() {
                warn!("Donation from {} failed: {}", body.sender, e);
            }
            e.into_response()
        }
    }
}

/// GET /participants/:address
pub async fn participant(
    State(processor): State<SharedProcessor>,
    Path(address): Path<String>,
) -> Response {
    match processor.participant(&address).await {
        Ok(Some(p)) => Json(ParticipantView::new(&p, processor.rules())).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("unknown participant {}", address)),
        Err(e) => e.into_response(),
    }
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    "OK"
}
