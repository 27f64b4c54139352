//! HTTP and WebSocket boundary. Authenticates every request and routes it to
//! the group service or the realtime hub.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::web;

use crate::auth::Authenticator;
use crate::hub::RealtimeHub;
use crate::receipt::TextExtractor;
use crate::service::GroupService;

mod dto;
mod error;
mod http;
mod ws;

pub use dto::{ExpenseView, GroupView};

/// Largest receipt image accepted by `/receipts/scan`.
const MAX_RECEIPT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GroupService>,
    pub hub: Arc<RealtimeHub>,
    pub authenticator: Arc<dyn Authenticator>,
    pub extractor: Arc<dyn TextExtractor>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(error::json_config())
        .app_data(web::PayloadConfig::new(MAX_RECEIPT_BYTES))
        .service(http::health)
        .service(http::join_group)
        .service(http::create_group)
        .service(http::get_group)
        .service(http::add_expense)
        .service(http::list_expenses)
        .service(http::get_expense)
        .service(http::reverse_expense)
        .service(http::get_insights)
        .service(http::scan_receipt)
        .service(ws::ws_entry);
}

pub fn cors(allowed_origin: Option<&str>) -> Cors {
    match allowed_origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allow_any_method()
            .allow_any_header()
            .max_age(3600),
        None => Cors::permissive(),
    }
}
