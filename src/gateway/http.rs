use actix_web::http::header::CONTENT_TYPE;
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use tracing::warn;

use super::dto::{
    ExpenseJson, ExpenseView, GroupNameJson, GroupView, InsightsView, JoinCodeJson,
    ReceiptScanView,
};
use super::error::json_error;
use super::AppState;
use crate::auth::check_authorization;
use crate::error::ServiceError;
use crate::receipt::{suggest_draft, ExtractError};

type HandlerResult = Result<HttpResponse, ServiceError>;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

#[post("/groups")]
pub async fn create_group(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<GroupNameJson>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let group = state.service.create_group(&body.name, &user).await?;
    Ok(HttpResponse::Created().json(GroupView::from(&group)))
}

#[post("/groups/join")]
pub async fn join_group(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<JoinCodeJson>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let group = state.service.join_group(&body.code, &user).await?;
    Ok(HttpResponse::Ok().json(GroupView::from(&group)))
}

#[get("/groups/{group_id}")]
pub async fn get_group(
    state: web::Data<AppState>,
    req: HttpRequest,
    group_id: web::Path<String>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let group = state.service.get_group(&group_id, &user).await?;
    Ok(HttpResponse::Ok().json(GroupView::from(&group)))
}

#[post("/expenses")]
pub async fn add_expense(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ExpenseJson>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let (group_id, draft) = body
        .into_inner()
        .into_draft(state.service.reference_currency())?;
    let expense = state.service.add_expense(&group_id, &user, draft).await?;
    Ok(HttpResponse::Created().json(ExpenseView::from(&expense)))
}

#[get("/expenses/{group_id}")]
pub async fn list_expenses(
    state: web::Data<AppState>,
    req: HttpRequest,
    group_id: web::Path<String>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let expenses = state.service.list_expenses(&group_id, &user).await?;
    let views: Vec<ExpenseView> = expenses.iter().map(ExpenseView::from).collect();
    Ok(HttpResponse::Ok().json(views))
}

#[get("/expenses/{group_id}/{expense_id}")]
pub async fn get_expense(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let (group_id, expense_id) = path.into_inner();
    let expense = state
        .service
        .get_expense(&group_id, &user, &expense_id)
        .await?;
    Ok(HttpResponse::Ok().json(ExpenseView::from(&expense)))
}

#[post("/expenses/{group_id}/{expense_id}/reverse")]
pub async fn reverse_expense(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let (group_id, expense_id) = path.into_inner();
    let reversal = state
        .service
        .reverse_expense(&group_id, &user, &expense_id)
        .await?;
    Ok(HttpResponse::Created().json(ExpenseView::from(&reversal)))
}

#[get("/insights/{group_id}")]
pub async fn get_insights(
    state: web::Data<AppState>,
    req: HttpRequest,
    group_id: web::Path<String>,
) -> HandlerResult {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let insights = state.service.get_insights(&group_id, &user).await?;
    Ok(HttpResponse::Ok().json(InsightsView::from(insights)))
}

/// Recognises receipt text and suggests draft values. Nothing is recorded.
#[post("/receipts/scan")]
pub async fn scan_receipt(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HandlerResult {
    check_authorization(&req, state.authenticator.as_ref())?;
    if body.is_empty() {
        return Err(ServiceError::invalid("receipt image is empty"));
    }
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");

    match state.extractor.extract(body.to_vec(), content_type).await {
        Ok(text) => {
            let hint = suggest_draft(&text);
            Ok(HttpResponse::Ok().json(ReceiptScanView::new(text, hint)))
        }
        Err(ExtractError::NotConfigured) => Ok(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ocr_unavailable",
            "receipt scanning is not configured",
        )),
        Err(ExtractError::Upstream(detail)) => {
            warn!(error = %detail, "receipt scan failed");
            Ok(json_error(
                StatusCode::BAD_GATEWAY,
                "ocr_failed",
                "receipt scanning failed",
            ))
        }
    }
}
