use async_trait::async_trait;
use chrono::Utc;
use peerlink_core::{
    card::normalize_endpoint, AgentCard, AgentTransport, CoreConfig, PeerlinkError, PeerlinkResult,
    Task,
};
use tracing::debug;
use uuid::Uuid;

/// A2A request envelope version this client speaks.
const PROTOCOL_VERSION: &str = "1.0";

/// Reqwest-backed [`AgentTransport`].
///
/// One shared connection pool serves all agents. Per-call deadlines come
/// from [`CoreConfig`]: `dispatch_timeout` bounds task delivery,
/// `probe_timeout` bounds probes and discovery fetches.
pub struct HttpTransport {
    http: reqwest::Client,
    config: CoreConfig,
}

impl HttpTransport {
    /// Build a transport with deadlines taken from `config`.
    pub fn new(config: CoreConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Classify a reqwest failure: deadline overruns are timeouts,
    /// everything else means the endpoint could not be reached.
    fn classify(endpoint: &str, err: &reqwest::Error) -> PeerlinkError {
        if err.is_timeout() {
            PeerlinkError::Timeout(endpoint.to_string())
        } else {
            PeerlinkError::Unreachable(endpoint.to_string())
        }
    }

    /// Wrap a task in the A2A request envelope agents accept at
    /// `POST {endpoint}/api/tasks`.
    fn envelope(task: &Task) -> serde_json::Value {
        serde_json::json!({
            "a2a_protocol": {
                "version": PROTOCOL_VERSION,
                "message_type": "task_request",
                "source_agent": "peerlink",
                "correlation_id": task.id,
                "timestamp": Utc::now().to_rfc3339(),
            },
            "payload": {
                "task_id": task.id,
                "message": task.message,
                "required_capabilities": task.required_capabilities,
                "context_id": task.context_id,
                "metadata": task.metadata,
            },
        })
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn fetch_card(&self, endpoint: &str) -> PeerlinkResult<AgentCard> {
        let base = normalize_endpoint(endpoint);
        let url = format!("{base}/.well-known/agent.json");

        let resp = self
            .http
            .get(&url)
            .timeout(self.config.probe_timeout())
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PeerlinkError::InvalidDescriptor(format!(
                "discovery document at {url} returned {status}"
            )));
        }

        let mut card: AgentCard = resp.json().await.map_err(|e| {
            PeerlinkError::InvalidDescriptor(format!("malformed agent card at {url}: {e}"))
        })?;
        // The reachable endpoint is authoritative over whatever URL the
        // card claims; ids derive from where we actually talked to.
        card.url = base;
        card.validate()?;
        Ok(card)
    }

    async fn dispatch(&self, endpoint: &str, task: &Task) -> PeerlinkResult<serde_json::Value> {
        let base = normalize_endpoint(endpoint);
        let url = format!("{base}/api/tasks");
        let body = Self::envelope(task);

        let resp = self
            .http
            .post(&url)
            .timeout(self.config.dispatch_timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, &e))?;

        let status = resp.status();
        let payload: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            return Err(PeerlinkError::Rejected(format!(
                "agent returned {status}: {payload}"
            )));
        }
        Ok(payload)
    }

    async fn probe(&self, endpoint: &str) -> PeerlinkResult<()> {
        let base = normalize_endpoint(endpoint);
        let url = format!("{base}/health");

        let resp = self
            .http
            .get(&url)
            .timeout(self.config.probe_timeout())
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, &e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(PeerlinkError::Unreachable(endpoint.to_string()))
        }
    }

    async fn cancel(&self, endpoint: &str, task_id: Uuid) {
        let base = normalize_endpoint(endpoint);
        let url = format!("{base}/api/tasks/{task_id}/cancel");

        // Best effort: local cancellation already committed.
        match self
            .http
            .post(&url)
            .timeout(self.config.probe_timeout())
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(%task_id, endpoint, "Remote cancel acknowledged");
            }
            Ok(resp) => {
                debug!(%task_id, endpoint, status = %resp.status(), "Remote cancel not acknowledged");
            }
            Err(err) => {
                debug!(%task_id, endpoint, error = %err, "Remote cancel failed");
            }
        }
    }
}
