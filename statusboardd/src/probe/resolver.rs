//! Endpoint resolution.
//!
//! A service is reachable if any of its addresses answers through any path
//! its strategy permits. Paths are tried per address in a fixed order
//! (direct first, then each intermediary) and the first success wins.

use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use thiserror::Error;
use shared::types::{CheckStrategy, ServiceDefinition};
use crate::config::{IntermediaryConfig, IntermediaryStyle};
use super::transport::Transport;

/// Why a single address/path attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("{0}")]
    Transport(String),
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub address: String,
    /// `direct`, or the intermediary URL
    pub path: String,
    pub error: AttemptError,
}

/// Every permitted address/path was tried and none answered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    #[error("all direct connections failed; last error: {last}")]
    DirectExhausted {
        attempts: Vec<AttemptFailure>,
        last: AttemptError,
    },
    #[error("all connection methods failed for all addresses ({} attempts)", .attempts.len())]
    Exhausted { attempts: Vec<AttemptFailure> },
}

impl ResolveFailure {
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            ResolveFailure::DirectExhausted { attempts, .. } => attempts,
            ResolveFailure::Exhausted { attempts } => attempts,
        }
    }
}

/// The address that answered and the intermediary it answered through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub address: String,
    pub intermediary: Option<String>,
}

/// One way of reaching an address.
#[derive(Debug, Clone, Copy)]
enum Path<'a> {
    Direct,
    Relay(&'a IntermediaryConfig),
}

impl Path<'_> {
    fn request_url(&self, address: &str) -> String {
        match self {
            Path::Direct => address.to_string(),
            Path::Relay(relay) => match relay.style {
                IntermediaryStyle::Prefix => format!("{}{}", relay.url, address),
                IntermediaryStyle::Wrapped => {
                    format!("{}{}", relay.url, urlencoding::encode(address))
                }
            },
        }
    }

    fn label(&self) -> &str {
        match self {
            Path::Direct => "direct",
            Path::Relay(relay) => &relay.url,
        }
    }
}

pub struct Resolver {
    transport: Arc<dyn Transport>,
    intermediaries: Vec<IntermediaryConfig>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        intermediaries: Vec<IntermediaryConfig>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            intermediaries,
            timeout,
        }
    }

    fn paths(&self, strategy: CheckStrategy) -> Vec<Path<'_>> {
        let mut paths = Vec::with_capacity(self.intermediaries.len() + 1);
        if strategy.allows_direct() {
            paths.push(Path::Direct);
        }
        if strategy.allows_intermediaries() {
            paths.extend(self.intermediaries.iter().map(Path::Relay));
        }
        paths
    }

    /// Try every address through every permitted path, stopping at the first success.
    pub async fn resolve(&self, service: &ServiceDefinition) -> Result<Resolution, ResolveFailure> {
        let paths = self.paths(service.check_strategy);
        let mut attempts = Vec::new();

        for (index, address) in service.addresses.iter().enumerate() {
            tracing::debug!(
                "Trying {} address {}/{}: {}",
                service.name,
                index + 1,
                service.addresses.len(),
                address
            );

            for path in &paths {
                match self.attempt(*path, address).await {
                    Ok(()) => {
                        return Ok(Resolution {
                            address: address.clone(),
                            intermediary: match path {
                                Path::Direct => None,
                                Path::Relay(relay) => Some(relay.url.clone()),
                            },
                        });
                    }
                    Err(error) => {
                        tracing::debug!(
                            "{} via {} failed for {}: {}",
                            service.name,
                            path.label(),
                            address,
                            error
                        );
                        attempts.push(AttemptFailure {
                            address: address.clone(),
                            path: path.label().to_string(),
                            error,
                        });
                    }
                }
            }
        }

        if service.check_strategy == CheckStrategy::Direct {
            if let Some(last) = attempts.last().map(|a| a.error.clone()) {
                return Err(ResolveFailure::DirectExhausted { attempts, last });
            }
        }
        Err(ResolveFailure::Exhausted { attempts })
    }

    async fn attempt(&self, path: Path<'_>, address: &str) -> Result<(), AttemptError> {
        let url = path.request_url(address);
        let wrapped = match path {
            Path::Relay(relay) if relay.style == IntermediaryStyle::Wrapped => Some(relay),
            _ => None,
        };

        let response = tokio::time::timeout(self.timeout, self.transport.get(&url, wrapped.is_some()))
            .await
            .map_err(|_| AttemptError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        if !is_success(u64::from(response.status)) {
            return Err(AttemptError::Status(response.status));
        }

        if let (Some(relay), Some(body)) = (wrapped, response.body.as_deref()) {
            if let Some(code) = upstream_status(body, &relay.status_pointer) {
                if !is_success(code) {
                    return Err(AttemptError::UpstreamStatus(code));
                }
            }
        }

        Ok(())
    }
}

/// Success range for both direct and upstream status codes.
fn is_success(code: u64) -> bool {
    (200..400).contains(&code)
}

/// Upstream status embedded in a wrapping relay's body. Anything unparseable
/// carries no verdict, and the relay's own success stands.
fn upstream_status(body: &str, pointer: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.pointer(pointer).and_then(Value::as_u64)
}
