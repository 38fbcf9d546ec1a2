use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Actor, ProviderType, TransactionStatus};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct InitiateRequest {
    pub client_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderType,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitiateResponse {
    pub transaction_id: Uuid,
    pub reference: String,
    pub status: TransactionStatus,
    pub expires_at: DateTime<Utc>,
}

pub async fn initiate(
    State(state): State<AppState>,
    Json(payload): Json<InitiateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .gateway
        .initiate(
            payload.client_id,
            payload.amount,
            payload.currency,
            payload.provider,
            payload.metadata,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateResponse {
            transaction_id: tx.id,
            reference: tx.reference,
            status: tx.status,
            expires_at: tx.expires_at,
        }),
    ))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .gateway
        .store()
        .get(id)
        .await
        .map_err(|_| AppError::NotFound(format!("transaction {id}")))?;

    Ok(Json(tx))
}

pub async fn process_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.gateway.process(id).await?;
    Ok(Json(tx))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
}

pub async fn check_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.gateway.check_status(id, Actor::User).await?;
    Ok(Json(StatusResponse {
        transaction_id: id,
        status,
    }))
}
