//! Adapter for the interactive mobile-wallet rails (MTN MoMo, Airtel Money).
//! Both speak the same dispatch/poll shape, differing only in base URL.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{PaymentTransaction, ProviderType};
use crate::providers::{DispatchOutcome, ProviderAdapter, ProviderError, ProviderStatus};

#[derive(Debug, Serialize)]
struct WalletPushRequest {
    reference: String,
    amount: String,
    currency: String,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct WalletPushResponse {
    transaction_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct WalletStatusResponse {
    status: String,
}

/// HTTP client for a mobile-wallet rail, guarded by a circuit breaker.
#[derive(Clone)]
pub struct WalletRailAdapter {
    provider: ProviderType,
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl WalletRailAdapter {
    pub fn new(provider: ProviderType, base_url: String, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            provider,
            client,
            base_url,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn normalize_wallet_status(raw: &str) -> Result<ProviderStatus, ProviderError> {
    match raw {
        "PENDING" => Ok(ProviderStatus::Pending),
        "ACCEPTED" | "PROCESSING" => Ok(ProviderStatus::Processing),
        "SUCCESSFUL" | "COMPLETED" => Ok(ProviderStatus::Completed),
        "FAILED" | "REJECTED" => Ok(ProviderStatus::Failed),
        "CANCELLED" => Ok(ProviderStatus::Cancelled),
        other => Err(ProviderError::Protocol(format!(
            "unknown wallet status '{other}'"
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
impl ProviderAdapter for WalletRailAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn supports_polling(&self) -> bool {
        true
    }

    async fn dispatch(&self, tx: &PaymentTransaction) -> Result<DispatchOutcome, ProviderError> {
        let url = self.url("payments");
        let client = self.client.clone();
        let body = WalletPushRequest {
            reference: tx.reference.clone(),
            amount: tx.amount.to_string(),
            currency: tx.currency.clone(),
            client_id: tx.client_id.to_string(),
        };

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(classify_reqwest)?;

                if !response.status().is_success() {
                    return Err(ProviderError::Protocol(format!(
                        "wallet push returned {}",
                        response.status()
                    )));
                }

                let parsed: WalletPushResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Protocol(e.to_string()))?;
                Ok(parsed)
            })
            .await;

        match result {
            Ok(parsed) => Ok(DispatchOutcome {
                external_reference: parsed.transaction_id,
                status: normalize_wallet_status(&parsed.status)?,
            }),
            Err(FailsafeError::Rejected) => Err(ProviderError::Unreachable(
                "wallet circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn check_status(
        &self,
        external_reference: &str,
    ) -> Result<ProviderStatus, ProviderError> {
        let url = self.url(&format!("payments/{external_reference}/status"));
        let client = self.client.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.get(&url).send().await.map_err(classify_reqwest)?;

                if !response.status().is_success() {
                    return Err(ProviderError::Protocol(format!(
                        "wallet status returned {}",
                        response.status()
                    )));
                }

                let parsed: WalletStatusResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Protocol(e.to_string()))?;
                Ok(parsed)
            })
            .await;

        match result {
            Ok(parsed) => normalize_wallet_status(&parsed.status),
            Err(FailsafeError::Rejected) => Err(ProviderError::Unreachable(
                "wallet circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn sample_tx() -> PaymentTransaction {
        PaymentTransaction::new(
            Uuid::new_v4(),
            BigDecimal::from(100),
            "KES".to_string(),
            ProviderType::MtnMomo,
            ChronoDuration::minutes(10),
            None,
        )
    }

    #[test]
    fn normalizes_known_wallet_statuses() {
        assert_eq!(
            normalize_wallet_status("SUCCESSFUL").unwrap(),
            ProviderStatus::Completed
        );
        assert_eq!(
            normalize_wallet_status("REJECTED").unwrap(),
            ProviderStatus::Failed
        );
        assert_eq!(
            normalize_wallet_status("PENDING").unwrap(),
            ProviderStatus::Pending
        );
    }

    #[test]
    fn unknown_wallet_status_is_a_protocol_error() {
        assert!(matches!(
            normalize_wallet_status("LOST"),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_returns_external_reference() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payments")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"transaction_id": "MOMO-9001", "status": "ACCEPTED"}"#)
            .create_async()
            .await;

        let adapter = WalletRailAdapter::new(
            ProviderType::MtnMomo,
            server.url(),
            Duration::from_secs(5),
        );
        let outcome = adapter.dispatch(&sample_tx()).await.unwrap();

        assert_eq!(outcome.external_reference, "MOMO-9001");
        assert_eq!(outcome.status, ProviderStatus::Processing);
    }

    #[tokio::test]
    async fn check_status_normalizes_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payments/MOMO-9001/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "SUCCESSFUL"}"#)
            .create_async()
            .await;

        let adapter = WalletRailAdapter::new(
            ProviderType::MtnMomo,
            server.url(),
            Duration::from_secs(5),
        );
        let status = adapter.check_status("MOMO-9001").await.unwrap();

        assert_eq!(status, ProviderStatus::Completed);
    }

    #[tokio::test]
    async fn unreachable_rail_is_not_a_failure() {
        // Port 9 is discard; connection refused maps to Unreachable.
        let adapter = WalletRailAdapter::new(
            ProviderType::AirtelMoney,
            "http://127.0.0.1:9".to_string(),
            Duration::from_millis(200),
        );
        let result = adapter.check_status("MOMO-9001").await;

        assert!(matches!(result, Err(ProviderError::Unreachable(_))));
    }
}
