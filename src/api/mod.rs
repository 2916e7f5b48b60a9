//! Control API - JSON-RPC 2.0 over HTTP
//!
//! Read-only price queries plus symbol registration. Handlers only touch the
//! shared price feed and symbol registry, so they answer regardless of the
//! reporter's chain connectivity.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::oracle::sources::ProcessAdapter;
use crate::oracle::{PriceFeed, SymbolRegistry};
use crate::types::Symbol;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    fn new(id: Value, outcome: Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            result,
            error,
            id,
        }
    }
}

pub struct ApiState {
    feed: Arc<PriceFeed>,
    symbols: Arc<SymbolRegistry>,
    adapters: Vec<Arc<ProcessAdapter>>,
}

impl ApiState {
    pub fn new(
        feed: Arc<PriceFeed>,
        symbols: Arc<SymbolRegistry>,
        adapters: Vec<Arc<ProcessAdapter>>,
    ) -> Self {
        Self {
            feed,
            symbols,
            adapters,
        }
    }

    pub fn dispatch(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        debug!(method = %request.method, "control API request");
        match request.method.as_str() {
            "get_prices" => {
                let mut symbols = symbols_param(&request.params)?;
                if symbols.is_empty() {
                    symbols = self.symbols.snapshot();
                }
                let prices = self.feed.prices_for(&symbols, Utc::now().timestamp());
                serde_json::to_value(prices).map_err(|e| RpcError {
                    code: INTERNAL_ERROR,
                    message: e.to_string(),
                })
            }
            "get_version" => {
                let adapters: serde_json::Map<String, Value> = self
                    .adapters
                    .iter()
                    .map(|adapter| (adapter.name().to_string(), json!(adapter.version())))
                    .collect();
                Ok(json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "adapters": adapters,
                }))
            }
            "update_symbols" => {
                let symbols = symbols_param(&request.params)?;
                self.symbols.add_symbols(&symbols);
                info!(added = ?symbols, "symbols registered through control API");
                Ok(json!(self.symbols.snapshot()))
            }
            other => Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: format!("unknown method {other}"),
            }),
        }
    }
}

/// Accepts `["A", "B"]`, `[["A", "B"]]` or `{"symbols": ["A", "B"]}`
fn symbols_param(params: &Value) -> Result<Vec<Symbol>, RpcError> {
    let list = match params {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map.get("symbols").cloned().unwrap_or(Value::Null),
        Value::Array(items) if matches!(items.first(), Some(Value::Array(_))) => items[0].clone(),
        other => other.clone(),
    };
    if list.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(list).map_err(|e| RpcError {
        code: INVALID_PARAMS,
        message: format!("invalid symbols: {e}"),
    })
}

async fn handle_rpc(
    State(state): State<Arc<ApiState>>,
    request: Result<Json<RpcRequest>, JsonRejection>,
) -> Json<RpcResponse> {
    match request {
        Ok(Json(request)) => {
            let outcome = state.dispatch(&request);
            Json(RpcResponse::new(request.id, outcome))
        }
        Err(rejection) => Json(RpcResponse::new(
            Value::Null,
            Err(RpcError {
                code: PARSE_ERROR,
                message: rejection.body_text(),
            }),
        )),
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control API on {addr}"))?;
    info!(%addr, "control API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("Control API server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{AggregationConfig, SampleCache};
    use crate::types::PriceSample;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    fn state() -> Arc<ApiState> {
        let cache = Arc::new(SampleCache::new("test"));
        let now = Utc::now().timestamp();
        cache.add_samples(&[PriceSample::new("ETH-USD", dec!(3000.5), now)], now);

        let symbols = Arc::new(SymbolRegistry::default());
        symbols.set_chain_symbols(vec!["ETH-USD".into(), "BTC-USD".into()]);

        Arc::new(ApiState::new(
            Arc::new(PriceFeed::new(AggregationConfig::default(), vec![cache])),
            symbols,
            vec![Arc::new(ProcessAdapter::new(
                "test",
                "/nonexistent/adapter",
                Vec::new(),
                std::time::Duration::from_secs(1),
            ))],
        ))
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            method: method.to_string(),
            params,
            id: json!(1),
        }
    }

    #[test]
    fn test_get_prices_for_registry() {
        let result = state().dispatch(&request("get_prices", Value::Null)).unwrap();
        assert_eq!(result["ETH-USD"]["price"], json!("3000.5"));
        assert!(result.get("BTC-USD").is_none());
    }

    #[test]
    fn test_update_symbols() {
        let state = state();
        let result = state
            .dispatch(&request("update_symbols", json!({"symbols": ["ATN-USD"]})))
            .unwrap();
        assert_eq!(result, json!(["ETH-USD", "BTC-USD", "ATN-USD"]));

        let result = state.dispatch(&request("update_symbols", json!([["NTN-USD"]]))).unwrap();
        assert_eq!(result, json!(["ETH-USD", "BTC-USD", "ATN-USD", "NTN-USD"]));
    }

    #[test]
    fn test_unknown_method_and_bad_params() {
        let state = state();
        let err = state.dispatch(&request("nope", Value::Null)).unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);

        let err = state.dispatch(&request("get_prices", json!({"symbols": 5}))).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    async fn post(body: String) -> RpcResponse {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_http_round_trip() {
        let reply = post(json!({"jsonrpc": "2.0", "method": "get_version", "id": 7}).to_string()).await;
        assert_eq!(reply.id, json!(7));
        let result = reply.result.unwrap();
        assert_eq!(result["version"], json!(env!("CARGO_PKG_VERSION")));
        assert_eq!(result["adapters"], json!({"test": null}));
    }

    #[tokio::test]
    async fn test_malformed_body_gets_parse_error() {
        let reply = post("{\"method\": ".to_string()).await;
        assert_eq!(reply.id, Value::Null);
        assert!(reply.result.is_none());
        assert_eq!(reply.error.unwrap().code, PARSE_ERROR);
    }
}
