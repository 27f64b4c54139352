//! Process configuration. Every flag can also be set through the environment.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::rates::StaticRates;
use crate::service::ServiceSettings;

#[derive(Clone, Debug, Parser)]
#[command(name = "travelsplit", about = "Shared group expense ledger service")]
pub struct Config {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Without a URI the ledger lives in memory and is lost on restart.
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    #[arg(long, env = "MONGODB_DATABASE", default_value = "TravelSplit")]
    pub mongodb_database: String,

    /// Shared secret for verifying bearer tokens.
    #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: String,

    #[arg(long, env = "REFERENCE_CURRENCY", default_value = "USD")]
    pub reference_currency: String,

    /// Conversion factors into the reference currency, e.g. `EUR=1.08,GBP=1.27`.
    #[arg(long, env = "RATES", default_value = "")]
    pub rates: String,

    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2000)]
    pub store_timeout_ms: u64,

    #[arg(long, env = "OUTBOX_CAPACITY", default_value_t = 64)]
    pub outbox_capacity: usize,

    /// CORS origin allowed to call the API; any origin when unset.
    #[arg(long, env = "ALLOWED_ORIGIN")]
    pub allowed_origin: Option<String>,

    /// OCR endpoint accepting an image body and answering `{"text": ...}`.
    #[arg(long, env = "OCR_URL")]
    pub ocr_url: Option<String>,

    /// Print a signed token for this user id and exit.
    #[arg(long)]
    pub issue_token: Option<String>,
}

impl Config {
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            reference_currency: self.reference_currency.trim().to_uppercase(),
            ..ServiceSettings::default()
        }
    }

    pub fn static_rates(&self) -> Result<StaticRates, String> {
        StaticRates::parse(&self.rates)
    }
}
