//! HTTP query API over the entity store.
//!
//! Routes:
//! - `GET /tokens`
//! - `GET /tokens/:address`
//! - `GET /tokens/:address/negative-balances`
//! - `GET /accounts/:address/balances`
//! - `GET /balances/:account/:token/snapshots`
//! - `GET /balances/:account/:token/at/:block` (latest snapshot at or before `block`)
//! - `GET /stats`

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use primitive_types::H160;
use serde_json::json;
use std::sync::Arc;
use tally_common::parse_address;

use crate::error::LedgerError;
use crate::model::{AccountBalance, AccountBalanceSnapshot, Token};
use crate::store::{EntityStore, StoreStats};

type ApiState = Arc<dyn EntityStore>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        tracing::error!(target: "tally_erc20::api", error = %err, "Store query failed");
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn address_param(raw: &str) -> Result<H160, ApiError> {
    parse_address(raw).map_err(|e| ApiError::BadRequest(format!("{e:#}")))
}

async fn list_tokens(State(store): State<ApiState>) -> ApiResult<Vec<Token>> {
    Ok(Json(store.tokens()?))
}

async fn get_token(
    State(store): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Token> {
    let address = address_param(&address)?;
    store
        .load_token(address)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("token {address:#x} not found")))
}

async fn negative_balances(
    State(store): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Vec<AccountBalance>> {
    let address = address_param(&address)?;
    Ok(Json(store.negative_balances(address)?))
}

async fn account_balances(
    State(store): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Vec<AccountBalance>> {
    let address = address_param(&address)?;
    Ok(Json(store.balances_of(address)?))
}

async fn balance_snapshots(
    State(store): State<ApiState>,
    Path((account, token)): Path<(String, String)>,
) -> ApiResult<Vec<AccountBalanceSnapshot>> {
    let account = address_param(&account)?;
    let token = address_param(&token)?;
    Ok(Json(store.snapshots(account, token)?))
}

async fn balance_at(
    State(store): State<ApiState>,
    Path((account, token, block)): Path<(String, String, u64)>,
) -> ApiResult<AccountBalanceSnapshot> {
    let account = address_param(&account)?;
    let token = address_param(&token)?;
    store
        .balance_at(account, token, block)?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "no balance for {account:#x} in {token:#x} at block {block}"
            ))
        })
}

async fn stats(State(store): State<ApiState>) -> ApiResult<StoreStats> {
    Ok(Json(store.stats()?))
}

pub fn router(store: Arc<dyn EntityStore>) -> Router {
    Router::new()
        .route("/tokens", get(list_tokens))
        .route("/tokens/:address", get(get_token))
        .route("/tokens/:address/negative-balances", get(negative_balances))
        .route("/accounts/:address/balances", get(account_balances))
        .route("/balances/:account/:token/snapshots", get(balance_snapshots))
        .route("/balances/:account/:token/at/:block", get(balance_at))
        .route("/stats", get(stats))
        .with_state(store)
}
