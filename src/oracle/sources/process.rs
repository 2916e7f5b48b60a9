//! Subprocess adapter
//!
//! Spawns the configured adapter binary and exchanges newline-delimited JSON
//! over its stdin/stdout:
//! - request: `{"id": 7, "method": "fetch_prices", "symbols": ["ETH-USD"]}`
//! - reply:   `{"id": 7, "result": {...}}` or `{"id": 7, "error": "..."}`
//!
//! A `state` handshake runs right after spawning. Any transport failure
//! (I/O, timeout, malformed reply) kills the child; the next request
//! respawns it.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AdapterError, AdapterState, FetchedPrices, PriceAdapter};
use crate::types::Symbol;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AdapterRequest {
    State,
    FetchPrices { symbols: Vec<Symbol> },
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a AdapterRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterReply {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AdapterReply {
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, AdapterError> {
        if let Some(error) = self.error {
            return Err(AdapterError::Remote(error));
        }
        let value = self
            .result
            .ok_or_else(|| AdapterError::Protocol(format!("reply {} has no result", self.id)))?;
        serde_json::from_value(value).map_err(|e| AdapterError::Protocol(e.to_string()))
    }
}

pub(crate) fn encode_request(id: u64, request: &AdapterRequest) -> Result<String, AdapterError> {
    serde_json::to_string(&RequestEnvelope { id, request })
        .map_err(|e| AdapterError::Protocol(e.to_string()))
}

pub(crate) fn decode_reply(line: &str) -> Result<AdapterReply, AdapterError> {
    serde_json::from_str(line).map_err(|e| AdapterError::Protocol(format!("{e}: {line}")))
}

struct Link {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl Link {
    async fn exchange(&mut self, request: &AdapterRequest) -> Result<AdapterReply, AdapterError> {
        self.next_id += 1;
        let id = self.next_id;

        let mut line = encode_request(id, request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let Some(raw) = self.stdout.next_line().await? else {
                return Err(AdapterError::Disconnected);
            };
            if raw.trim().is_empty() {
                continue;
            }
            let reply = decode_reply(&raw)?;
            if reply.id == id {
                return Ok(reply);
            }
            debug!(expected = id, got = reply.id, "discarding stale adapter reply");
        }
    }
}

pub struct ProcessAdapter {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
    link: Mutex<Option<Link>>,
    /// Version reported by the last successful handshake
    version: std::sync::RwLock<Option<String>>,
}

impl ProcessAdapter {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            timeout,
            link: Mutex::new(None),
            version: std::sync::RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<String> {
        self.version.read().ok().and_then(|v| v.clone())
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    async fn spawn(&self) -> Result<Link, AdapterError> {
        info!(adapter = %self.name, command = %self.command, "starting adapter process");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(AdapterError::Spawn)?;

        let stdin = child.stdin.take().ok_or(AdapterError::Disconnected)?;
        let stdout = child.stdout.take().ok_or(AdapterError::Disconnected)?;

        let mut link = Link {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
        };

        let state: AdapterState = tokio::time::timeout(self.timeout, link.exchange(&AdapterRequest::State))
            .await
            .map_err(|_| AdapterError::Timeout(self.timeout))??
            .into_result()?;

        info!(
            adapter = %self.name,
            version = %state.version,
            symbols = state.symbols.len(),
            "adapter handshake complete"
        );
        if let Ok(mut version) = self.version.write() {
            *version = Some(state.version);
        }

        Ok(link)
    }

    async fn call(&self, request: AdapterRequest) -> Result<AdapterReply, AdapterError> {
        let mut guard = self.link.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }
        let Some(link) = guard.as_mut() else {
            return Err(AdapterError::Disconnected);
        };

        let outcome = match tokio::time::timeout(self.timeout, link.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(self.timeout)),
        };

        if let Err(e) = &outcome {
            warn!(adapter = %self.name, error = %e, "adapter link failed, restarting on next request");
            if let Some(mut link) = guard.take() {
                let _ = link.child.start_kill();
            }
        }

        outcome
    }

    /// Stop the adapter process, if running
    pub async fn shutdown(&self) {
        if let Some(mut link) = self.link.lock().await.take() {
            if let Err(e) = link.child.kill().await {
                debug!(adapter = %self.name, error = %e, "adapter already exited");
            }
        }
    }
}

#[async_trait]
impl PriceAdapter for ProcessAdapter {
    async fn fetch_prices(&self, symbols: &[Symbol]) -> Result<FetchedPrices, AdapterError> {
        self.call(AdapterRequest::FetchPrices {
            symbols: symbols.to_vec(),
        })
        .await?
        .into_result()
    }

    async fn state(&self) -> Result<AdapterState, AdapterError> {
        self.call(AdapterRequest::State).await?.into_result()
    }
}
