use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub mtn_momo_base_url: String,
    pub airtel_money_base_url: String,
    pub card_gateway_base_url: String,
    pub webhook_secret: String,
    /// Ceiling on a single transaction amount, in minor units.
    pub amount_ceiling: u64,
    pub session_window_secs: u64,
    pub dispatch_grace_secs: u64,
    pub pending_timeout_secs: u64,
    pub processing_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: i64,
    pub provider_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            mtn_momo_base_url: env::var("MTN_MOMO_BASE_URL")?,
            airtel_money_base_url: env::var("AIRTEL_MONEY_BASE_URL")?,
            card_gateway_base_url: env::var("CARD_GATEWAY_BASE_URL")?,
            webhook_secret: env::var("WEBHOOK_SECRET")?,
            amount_ceiling: parse_or("AMOUNT_CEILING", 1_000_000_000)?,
            session_window_secs: parse_or("SESSION_WINDOW_SECS", 600)?,
            dispatch_grace_secs: parse_or("DISPATCH_GRACE_SECS", 60)?,
            pending_timeout_secs: parse_or("PENDING_TIMEOUT_SECS", 600)?,
            processing_timeout_secs: parse_or("PROCESSING_TIMEOUT_SECS", 300)?,
            reconcile_interval_secs: parse_or("RECONCILE_INTERVAL_SECS", 30)?,
            reconcile_batch_size: parse_or("RECONCILE_BATCH_SIZE", 50)?,
            provider_timeout_secs: parse_or("PROVIDER_TIMEOUT_SECS", 10)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.webhook_secret.is_empty() {
            anyhow::bail!("WEBHOOK_SECRET must not be empty");
        }
        if self.amount_ceiling == 0 {
            anyhow::bail!("AMOUNT_CEILING must be greater than 0");
        }
        if self.reconcile_batch_size <= 0 {
            anyhow::bail!("RECONCILE_BATCH_SIZE must be greater than 0");
        }
        for (key, value) in [
            ("MTN_MOMO_BASE_URL", &self.mtn_momo_base_url),
            ("AIRTEL_MONEY_BASE_URL", &self.airtel_money_base_url),
            ("CARD_GATEWAY_BASE_URL", &self.card_gateway_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", key, e))?;
        }
        Ok(())
    }

    pub fn session_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_window_secs as i64)
    }

    pub fn dispatch_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_grace_secs as i64)
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_timeout_secs as i64)
    }

    pub fn processing_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.processing_timeout_secs as i64)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}
