use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use tracing::{info, warn};

use travelsplit::auth::{Authenticator, HmacAuthenticator};
use travelsplit::config::Config;
use travelsplit::gateway::{self, AppState};
use travelsplit::hub::RealtimeHub;
use travelsplit::receipt::{HttpTextExtractor, NoExtractor, TextExtractor};
use travelsplit::service::GroupService;
use travelsplit::store::{LedgerStore, MemoryLedger, MongoLedger};
use travelsplit::telemetry;

const OCR_TIMEOUT: Duration = Duration::from_secs(20);

fn invalid_config(message: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = Config::parse();
    telemetry::init();

    let authenticator = HmacAuthenticator::new(&config.auth_secret).map_err(invalid_config)?;
    if let Some(user) = &config.issue_token {
        let token = authenticator.issue(user).map_err(invalid_config)?;
        println!("{token}");
        return Ok(());
    }

    let store: Arc<dyn LedgerStore> = match &config.mongodb_uri {
        Some(uri) => Arc::new(
            MongoLedger::connect(uri, &config.mongodb_database)
                .await
                .map_err(|err| io::Error::other(err.to_string()))?,
        ),
        None => {
            warn!("MONGODB_URI not set; the ledger is kept in memory");
            Arc::new(MemoryLedger::new())
        }
    };
    let rates = config.static_rates().map_err(invalid_config)?;
    let extractor: Arc<dyn TextExtractor> = match &config.ocr_url {
        Some(url) => Arc::new(HttpTextExtractor::new(url, OCR_TIMEOUT).map_err(invalid_config)?),
        None => Arc::new(NoExtractor),
    };

    let hub = Arc::new(RealtimeHub::new(config.outbox_capacity));
    let service = Arc::new(GroupService::new(
        store,
        hub.clone(),
        Arc::new(rates),
        config.service_settings(),
    ));
    let authenticator: Arc<dyn Authenticator> = Arc::new(authenticator);
    let state = web::Data::new(AppState {
        service,
        hub,
        authenticator,
        extractor,
    });

    info!(addr = %config.bind_addr, "starting server");
    let allowed_origin = config.allowed_origin.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(gateway::cors(allowed_origin.as_deref()))
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(gateway::configure)
    })
    .bind(config.bind_addr)?
    .run()
    .await
}
