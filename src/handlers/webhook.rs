//! Webhook ingestion: providers push status notifications here, possibly
//! duplicated and out of order. Signature verification happens over the raw
//! body before anything else; all state changes are delegated to the
//! gateway's `update_status`, whose terminal no-op makes redelivery safe.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::{Actor, ProviderType, TransactionStatus};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Deserialize, Serialize)]
pub struct WebhookPayload {
    pub external_reference: String,
    pub result_code: String,
    #[serde(default)]
    pub raw_payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub applied: bool,
}

/// Maps a provider result code onto the internal status vocabulary. One
/// exhaustive table; an unknown code is a diagnostic error, never a default.
pub fn map_result_code(code: &str) -> Result<TransactionStatus, AppError> {
    match code {
        "ACSC" | "COMPLETED" => Ok(TransactionStatus::Completed),
        "RJCT" | "FAILED" => Ok(TransactionStatus::Failed),
        "PDNG" | "PENDING" => Ok(TransactionStatus::Pending),
        "ACCP" | "PROCESSING" => Ok(TransactionStatus::Processing),
        "CANC" | "CANCELLED" => Ok(TransactionStatus::Cancelled),
        other => Err(AppError::UnmappedStatusCode(other.to_string())),
    }
}

pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let provider = ProviderType::parse(&provider)
        .ok_or_else(|| AppError::Validation(format!("unknown provider '{provider}'")))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;

    if !verify_signature(&state.webhook_secret, &body, signature) {
        return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed webhook payload: {e}")))?;

    let mapped = map_result_code(&payload.result_code)?;

    let tx = state
        .gateway
        .store()
        .get_by_external_reference(provider, &payload.external_reference)
        .await
        .map_err(|_| {
            AppError::NotFound(format!(
                "transaction {provider}/{}",
                payload.external_reference
            ))
        })?;

    // Audit-trail heuristic: an identical notification already recorded by a
    // webhook produces zero further work.
    let duplicate = state
        .gateway
        .store()
        .has_transition(tx.id, Actor::Webhook, mapped)
        .await
        .unwrap_or(false);
    if duplicate {
        tracing::debug!(
            transaction_id = %tx.id,
            result_code = %payload.result_code,
            "duplicate webhook delivery ignored"
        );
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                received: true,
                applied: false,
            }),
        ));
    }

    let reason = format!("webhook result code {}", payload.result_code);
    let applied = match state
        .gateway
        .update_status(tx.id, mapped, Some(reason), Actor::Webhook)
        .await
    {
        Ok(applied) => applied,
        // Stale or out-of-order notification: ack without effect. The
        // transition graph already rejected the regression.
        Err(AppError::IllegalTransition(detail)) => {
            tracing::warn!(
                transaction_id = %tx.id,
                result_code = %payload.result_code,
                "out-of-order webhook ignored: {detail}"
            );
            false
        }
        // Another actor keeps winning the version race; whatever they are
        // writing supersedes this notification. The provider redelivers if
        // it still matters.
        Err(AppError::ConcurrencyConflict(detail)) => {
            tracing::warn!(
                transaction_id = %tx.id,
                result_code = %payload.result_code,
                "webhook lost a version race, acked without effect: {detail}"
            );
            false
        }
        Err(other) => return Err(other),
    };

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            applied,
        }),
    ))
}
