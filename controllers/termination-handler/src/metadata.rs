//! Azure Instance Metadata Service scheduled events
//!
//! <https://learn.microsoft.com/azure/virtual-machines/linux/scheduled-events>

use crate::error::HandlerError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Scheduled-events endpoint of the instance metadata service
pub const SCHEDULED_EVENTS_URL: &str = "http://169.254.169.254/metadata/scheduledevents?api-version=2020-07-01";

/// Event types that end the VM
const TERMINATION_EVENT_TYPES: &[&str] = &["Preempt", "Terminate"];

/// Document returned by the scheduled-events endpoint
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledEvents {
    /// Changes whenever the event list changes
    #[serde(default)]
    pub document_incarnation: i64,
    /// Pending events
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
}

/// One pending maintenance event
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledEvent {
    /// Event ID
    #[serde(default)]
    pub event_id: String,
    /// `Freeze`, `Reboot`, `Redeploy`, `Preempt` or `Terminate`
    #[serde(default)]
    pub event_type: String,
    /// Affected VM names
    #[serde(default)]
    pub resources: Vec<String>,
    /// `Scheduled` or `Started`
    #[serde(default)]
    pub event_status: String,
    /// Earliest start, RFC 1123
    #[serde(default)]
    pub not_before: String,
}

impl ScheduledEvent {
    /// Whether the event ends the VM
    pub fn is_termination(&self) -> bool {
        TERMINATION_EVENT_TYPES.contains(&self.event_type.as_str())
    }

    /// Whether the event names `node`
    pub fn targets(&self, node: &str) -> bool {
        self.resources.iter().any(|r| r.eq_ignore_ascii_case(node))
    }
}

impl ScheduledEvents {
    /// First termination event for `node`
    pub fn termination_for(&self, node: &str) -> Option<&ScheduledEvent> {
        self.events.iter().find(|e| e.is_termination() && e.targets(node))
    }
}

/// Source of scheduled events
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the current scheduled events
    async fn scheduled_events(&self) -> Result<ScheduledEvents, HandlerError>;
}

/// Instance metadata service client
#[derive(Debug, Clone)]
pub struct ImdsClient {
    http: reqwest::Client,
    url: String,
}

impl ImdsClient {
    /// Client for the well-known link-local endpoint
    pub fn new() -> Result<Self, HandlerError> {
        Self::with_url(SCHEDULED_EVENTS_URL)
    }

    /// Client for a specific URL
    pub fn with_url(url: &str) -> Result<Self, HandlerError> {
        // IMDS must never be reached through a proxy
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for ImdsClient {
    async fn scheduled_events(&self) -> Result<ScheduledEvents, HandlerError> {
        let response = self.http.get(&self.url).header("Metadata", "true").send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::Metadata {
                status: status.as_u16(),
                body,
            });
        }
        let events: ScheduledEvents = response.json().await?;
        debug!(
            incarnation = events.document_incarnation,
            events = events.events.len(),
            "Fetched scheduled events"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "DocumentIncarnation": 3,
        "Events": [
            {
                "EventId": "A123",
                "EventType": "Freeze",
                "ResourceType": "VirtualMachine",
                "Resources": ["worker-0"],
                "EventStatus": "Scheduled",
                "NotBefore": "Mon, 19 Sep 2016 18:29:47 GMT"
            },
            {
                "EventId": "B456",
                "EventType": "Preempt",
                "ResourceType": "VirtualMachine",
                "Resources": ["Worker-1", "worker-2"],
                "EventStatus": "Scheduled",
                "NotBefore": "Mon, 19 Sep 2016 18:29:47 GMT"
            }
        ]
    }"#;

    #[test]
    fn test_decodes_imds_document() {
        let events: ScheduledEvents = serde_json::from_str(DOCUMENT).unwrap();
        assert_eq!(events.document_incarnation, 3);
        assert_eq!(events.events.len(), 2);
        assert_eq!(events.events[1].event_id, "B456");
        assert_eq!(events.events[1].resources, vec!["Worker-1", "worker-2"]);
    }

    #[test]
    fn test_termination_matches_node_case_insensitively() {
        let events: ScheduledEvents = serde_json::from_str(DOCUMENT).unwrap();
        assert_eq!(events.termination_for("worker-1").unwrap().event_id, "B456");
        assert_eq!(events.termination_for("worker-2").unwrap().event_id, "B456");
        // Freeze does not end the VM
        assert!(events.termination_for("worker-0").is_none());
        assert!(events.termination_for("worker-3").is_none());
    }

    #[test]
    fn test_empty_document() {
        let events: ScheduledEvents = serde_json::from_str(r#"{"DocumentIncarnation": 0, "Events": []}"#).unwrap();
        assert!(events.termination_for("worker-0").is_none());
    }
}
