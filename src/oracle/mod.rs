//! Oracle client: serialises a query bundle to the remote solving service
//! and parses the verdict plus optional valuation out of the reply.
//!
//! Transport-level failures (connect, timeout, read) surface as errors so
//! the hybrid context can substitute the base-solver verdict; protocol-level
//! junk (non-2xx, empty or garbled bodies) degrades to DONT_KNOW.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use crate::collect::{HeapState, SourceContext};
use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::expr::Expr;
use crate::solver::SolverVerdict;

/// Opaque tag identifying this engine to the service.
pub const REQUEST_HINT: &str = "lucid-high-level-constraints";

#[derive(Debug, Serialize)]
pub struct SolveRequest {
    pub constraints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_state: Option<HeapState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_type_constraints: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,
    pub hint: &'static str,
}

impl SolveRequest {
    pub fn new(constraints: &[Expr]) -> Self {
        Self {
            constraints: constraints.iter().map(|e| e.to_string()).collect(),
            heap_state: None,
            parameter_type_constraints: None,
            source_context: None,
            hint: REQUEST_HINT,
        }
    }

    pub fn with_heap_state(mut self, heap_state: Option<HeapState>) -> Self {
        self.heap_state = heap_state.filter(|h| !h.is_empty());
        self
    }

    pub fn with_parameter_types(mut self, types: BTreeMap<String, String>) -> Self {
        if !types.is_empty() {
            self.parameter_type_constraints = Some(types);
        }
        self
    }

    pub fn with_source_context(mut self, ctx: Option<SourceContext>) -> Self {
        self.source_context = ctx;
        self
    }
}

/// A parsed oracle reply. The valuation is an array of objects, each
/// typically carrying one variable assignment.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub verdict: SolverVerdict,
    pub valuation: Option<Vec<JsonMap<String, JsonValue>>>,
}

impl OracleReply {
    pub fn dont_know() -> Self {
        Self { verdict: SolverVerdict::DontKnow, valuation: None }
    }
}

/// Parses a reply body. Anything malformed maps to DONT_KNOW.
pub fn parse_reply(body: &str) -> OracleReply {
    let parsed: JsonValue = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "failed to parse oracle reply body");
            return OracleReply::dont_know();
        }
    };
    let Some(obj) = parsed.as_object() else {
        warn!("oracle reply is not a JSON object");
        return OracleReply::dont_know();
    };
    let Some(result) = obj.get("result").and_then(JsonValue::as_str) else {
        warn!("oracle reply missing 'result' field");
        return OracleReply::dont_know();
    };

    let verdict = match result.to_ascii_uppercase().as_str() {
        "SAT" => SolverVerdict::Sat,
        "UNSAT" => SolverVerdict::Unsat,
        "UNKNOWN" | "DONT_KNOW" => SolverVerdict::DontKnow,
        other => {
            warn!(result = other, "oracle returned unknown result value");
            SolverVerdict::DontKnow
        }
    };

    let valuation = if verdict == SolverVerdict::Sat {
        match obj.get("valuation") {
            Some(JsonValue::Array(entries)) => {
                let mut objects = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry.as_object() {
                        Some(map) => objects.push(map.clone()),
                        None => {
                            warn!("oracle valuation entry is not an object");
                            return OracleReply::dont_know();
                        }
                    }
                }
                Some(objects)
            }
            Some(JsonValue::Null) | None => None,
            Some(_) => {
                warn!("oracle valuation is not an array");
                return OracleReply::dont_know();
            }
        }
    } else {
        None
    };

    OracleReply { verdict, valuation }
}

/// The oracle endpoint contract.
pub trait Oracle {
    fn solve(&self, request: &SolveRequest) -> Result<OracleReply, OracleError>;
}

/// HTTP POST oracle, synchronous, bounded by the configured timeout.
#[derive(Debug)]
pub struct HttpOracle {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpOracle {
    pub fn new(cfg: OracleConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(cfg.timeout)
            .connect_timeout(cfg.timeout.min(Duration::from_secs(10)))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { url: cfg.service_url, client }
    }

    pub fn from_env() -> Self {
        Self::new(OracleConfig::from_env())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Oracle for HttpOracle {
    fn solve(&self, request: &SolveRequest) -> Result<OracleReply, OracleError> {
        debug!(constraints = request.constraints.len(), url = %self.url, "querying oracle");
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "oracle returned non-2xx status");
            return Ok(OracleReply::dont_know());
        }

        let body = response
            .text()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        if body.trim().is_empty() {
            warn!("oracle returned empty body");
            return Ok(OracleReply::dont_know());
        }

        Ok(parse_reply(&body))
    }
}
