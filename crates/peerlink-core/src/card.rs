use crate::{PeerlinkError, PeerlinkResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Stable identifier for a registered agent, derived from its endpoint URL.
///
/// Registering the same endpoint (modulo trailing slash) always yields the
/// same id, which is what makes duplicate detection possible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Derive the id for an endpoint URL: first 16 hex chars of the
    /// SHA-256 of the normalized URL.
    pub fn from_endpoint(url: &str) -> Self {
        let normalized = normalize_endpoint(url);
        let digest = Sha256::digest(normalized.as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strip trailing slashes so `http://a/` and `http://a` map to one agent.
pub fn normalize_endpoint(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Liveness classification of a registered agent.
///
/// Only the health monitor and dispatch-failure observations may move an
/// agent between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Registered but not yet probed.
    Unknown,
    /// Last probe succeeded.
    Healthy,
    /// A recent dispatch to this agent failed; probes have not yet confirmed.
    Degraded,
    /// Consecutive probe failures crossed the configured threshold.
    Unreachable,
}

impl HealthStatus {
    /// Routing rank: lower is preferred. Healthy agents sort first,
    /// unreachable agents last.
    pub fn rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unknown => 2,
            HealthStatus::Unreachable => 3,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// A capability tag an agent advertises in its card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name; matching is case-insensitive.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// MIME types accepted as input.
    #[serde(default)]
    pub input_types: Vec<String>,
    /// MIME types produced as output.
    #[serde(default)]
    pub output_types: Vec<String>,
}

impl Capability {
    /// Create a capability with just a name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_types: vec!["text/plain".to_string()],
            output_types: vec!["text/plain".to_string()],
        }
    }
}

/// Operator information embedded in an agent card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Provider name.
    pub name: String,
    /// Provider homepage.
    #[serde(default)]
    pub url: Option<String>,
    /// Contact address.
    #[serde(default)]
    pub contact: Option<String>,
}

/// The discovery document an agent serves at `/.well-known/agent.json`.
///
/// This is the digital business card of an agent: who it is, where it
/// lives, and which capabilities it declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    /// Display name of the agent.
    pub name: String,
    /// What the agent does.
    #[serde(default)]
    pub description: Option<String>,
    /// Base URL of the agent's execution endpoint.
    pub url: String,
    /// Advertised protocol/implementation version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Operator information.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Declared capability set. Order is irrelevant.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Accepted input modes when a task does not specify one.
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,
    /// Produced output modes when a task does not specify one.
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,
    /// Arbitrary key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_modes() -> Vec<String> {
    vec!["text/plain".to_string()]
}

impl AgentCard {
    /// Create a minimal card for the given endpoint.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            url: url.into(),
            version: default_version(),
            provider: None,
            capabilities: Vec::new(),
            default_input_modes: default_modes(),
            default_output_modes: default_modes(),
            metadata: HashMap::new(),
        }
    }

    /// Add a capability tag, builder-style.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Whether this card declares every capability in `required`
    /// (case-insensitive name match).
    pub fn declares_all(&self, required: &[String]) -> bool {
        required.iter().all(|tag| {
            self.capabilities
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(tag))
        })
    }

    /// Validate the card before registration.
    ///
    /// A card must carry a non-empty name and an `http(s)://` URL.
    pub fn validate(&self) -> PeerlinkResult<()> {
        if self.name.trim().is_empty() {
            return Err(PeerlinkError::InvalidDescriptor(
                "agent card has no name".to_string(),
            ));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(PeerlinkError::InvalidDescriptor(format!(
                "agent url must be http(s): {}",
                self.url
            )));
        }
        Ok(())
    }
}
