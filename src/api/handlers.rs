use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::ErrorResponse;
use crate::logic::PortfolioService;
use crate::media::MediaIngestor;
use crate::model::{
    Item, NewItem, NewPortfolio, NewSection, Portfolio, PortfolioSummary, Section,
};
use crate::store::PortfolioStore;

/// Everything a request handler needs, shared behind one `Arc`.
pub struct AppContext<S: PortfolioStore> {
    pub service: PortfolioService<S>,
    pub ingestor: MediaIngestor,
}

pub type AppState<S> = Arc<AppContext<S>>;

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn root() -> Json<Value> {
    Json(json!({"message": "Portfolio API is running"}))
}

// Portfolios

pub async fn create_portfolio<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    RequestJson(input): RequestJson<NewPortfolio>,
) -> ApiResult<Portfolio> {
    Ok(Json(state.service.create_portfolio(input).await?))
}

pub async fn list_portfolios<S: PortfolioStore>(
    State(state): State<AppState<S>>,
) -> ApiResult<Vec<PortfolioSummary>> {
    Ok(Json(state.service.list_portfolios().await?))
}

pub async fn get_portfolio<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path(portfolio_id): Path<String>,
) -> ApiResult<Portfolio> {
    Ok(Json(state.service.get_portfolio(&portfolio_id).await?))
}

pub async fn update_portfolio<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path(portfolio_id): Path<String>,
    RequestJson(input): RequestJson<NewPortfolio>,
) -> ApiResult<Portfolio> {
    Ok(Json(
        state.service.update_portfolio(&portfolio_id, input).await?,
    ))
}

pub async fn delete_portfolio<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path(portfolio_id): Path<String>,
) -> ApiResult<Value> {
    state.service.delete_portfolio(&portfolio_id).await?;
    Ok(Json(json!({"message": "Portfolio deleted successfully"})))
}

// Items

pub async fn create_item<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path(portfolio_id): Path<String>,
    RequestJson(input): RequestJson<NewItem>,
) -> ApiResult<Item> {
    Ok(Json(state.service.add_item(&portfolio_id, input).await?))
}

pub async fn update_item<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path((portfolio_id, item_id)): Path<(String, String)>,
    RequestJson(fields): RequestJson<Map<String, Value>>,
) -> ApiResult<Item> {
    Ok(Json(
        state
            .service
            .patch_item(&portfolio_id, &item_id, fields)
            .await?,
    ))
}

pub async fn delete_item<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path((portfolio_id, item_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let removed = state.service.delete_item(&portfolio_id, &item_id).await?;
    Ok(Json(json!({
        "message": "Item deleted successfully",
        "items_removed": removed,
    })))
}

// Sections

pub async fn create_section<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path(portfolio_id): Path<String>,
    RequestJson(input): RequestJson<NewSection>,
) -> ApiResult<Section> {
    Ok(Json(
        state.service.create_section(&portfolio_id, input).await?,
    ))
}

pub async fn list_sections<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path(portfolio_id): Path<String>,
) -> ApiResult<Vec<Section>> {
    Ok(Json(state.service.list_sections(&portfolio_id).await?))
}

pub async fn update_section<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path((portfolio_id, section_id)): Path<(String, String)>,
    RequestJson(input): RequestJson<NewSection>,
) -> ApiResult<Section> {
    Ok(Json(
        state
            .service
            .update_section(&portfolio_id, &section_id, input)
            .await?,
    ))
}

pub async fn delete_section<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    Path((portfolio_id, section_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    state
        .service
        .delete_section(&portfolio_id, &section_id)
        .await?;
    Ok(Json(json!({"message": "Section deleted successfully"})))
}
