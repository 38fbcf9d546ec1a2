//! Adapter for the generic card gateway: plain dispatch plus a status fetch,
//! no interactive push confirmation. Webhooks drive most of its lifecycle,
//! so the reconciler routes status refreshes through the gateway service
//! rather than polling this adapter directly.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{PaymentTransaction, ProviderType};
use crate::providers::{DispatchOutcome, ProviderAdapter, ProviderError, ProviderStatus};

#[derive(Debug, Serialize)]
struct ChargeRequest {
    merchant_reference: String,
    amount: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    charge_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ChargeStatusResponse {
    state: String,
}

#[derive(Clone)]
pub struct CardGatewayAdapter {
    client: Client,
    base_url: String,
}

impl CardGatewayAdapter {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn normalize_charge_state(raw: &str) -> Result<ProviderStatus, ProviderError> {
    match raw {
        "created" | "pending" => Ok(ProviderStatus::Pending),
        "authorized" => Ok(ProviderStatus::Processing),
        "captured" => Ok(ProviderStatus::Completed),
        "declined" => Ok(ProviderStatus::Failed),
        "voided" => Ok(ProviderStatus::Cancelled),
        other => Err(ProviderError::Protocol(format!(
            "unknown charge state '{other}'"
        ))),
    }
}

fn classify_reqwest(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::Unreachable(err.to_string())
    } else {
        ProviderError::Protocol(err.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for CardGatewayAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::CardGateway
    }

    fn supports_polling(&self) -> bool {
        false
    }

    async fn dispatch(&self, tx: &PaymentTransaction) -> Result<DispatchOutcome, ProviderError> {
        let response = self
            .client
            .post(self.url("charges"))
            .json(&ChargeRequest {
                merchant_reference: tx.reference.clone(),
                amount: tx.amount.to_string(),
                currency: tx.currency.clone(),
            })
            .send()
            .await
            .map_err(classify_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::Protocol(format!(
                "charge creation returned {}",
                response.status()
            )));
        }

        let parsed: ChargeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;

        Ok(DispatchOutcome {
            external_reference: parsed.charge_id,
            status: normalize_charge_state(&parsed.state)?,
        })
    }

    async fn check_status(
        &self,
        external_reference: &str,
    ) -> Result<ProviderStatus, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("charges/{external_reference}")))
            .send()
            .await
            .map_err(classify_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::Protocol(format!(
                "charge status returned {}",
                response.status()
            )));
        }

        let parsed: ChargeStatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;

        normalize_charge_state(&parsed.state)
    }
}
