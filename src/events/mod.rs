//! Event subscriber (§4.G): consumes resource lifecycle events over NATS
//! JetStream and synthesizes or tears down REL relationships in response.
//! One `tokio::task` per subscribed topic; within a topic, messages are
//! processed serially to preserve intra-resource ordering.

use crate::engine::{Engine, RelationshipSpec, Resource};
use async_nats::jetstream::{self, consumer::AckPolicy};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_NAK_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub subject_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub additional_subject_ids: Vec<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub trace_context: Option<String>,
}

/// Derives the subscribed topic list: the configured list if non-empty,
/// otherwise `*.<type>` for every resource type the active policy declares.
pub fn topics_for(engine: &Engine, configured: &[String]) -> Vec<String> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    engine
        .policy()
        .resource_types()
        .map(|rt| format!("*.{}", rt.name))
        .collect()
}

/// Connects to NATS, resolves the durable JetStream stream/consumer per
/// topic, and spawns one worker task per topic. Returns once every worker
/// task has been spawned; workers run until `cancel` fires.
pub async fn run(
    engine: Engine,
    nats_url: &str,
    stream_name: &str,
    topics: Vec<String>,
    nak_delay: Option<Duration>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let client = async_nats::connect(nats_url).await?;
    let js = jetstream::new(client);
    let delay = nak_delay.unwrap_or(DEFAULT_NAK_DELAY);

    let mut handles = Vec::new();
    for topic in topics {
        let js = js.clone();
        let engine = engine.clone();
        let cancel = cancel.clone();
        let stream_name = stream_name.to_string();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_topic(js, &stream_name, &topic, engine, delay, cancel).await {
                warn!(topic = %topic, error = %e, "event worker exited");
            }
        }));
    }

    for handle in handles {
        handle.await.ok();
    }
    Ok(())
}

async fn run_topic(
    js: jetstream::Context,
    stream_name: &str,
    topic: &str,
    engine: Engine,
    nak_delay: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let stream = js.get_or_create_stream(jetstream::stream::Config {
        name: stream_name.to_string(),
        subjects: vec![topic.to_string()],
        ..Default::default()
    }).await?;

    let consumer = stream
        .get_or_create_consumer(
            &format!("authzd-{}", sanitize(topic)),
            jetstream::consumer::pull::Config {
                durable_name: Some(format!("authzd-{}", sanitize(topic))),
                ack_policy: AckPolicy::Explicit,
                ..Default::default()
            },
        )
        .await?;

    info!(topic = %topic, "event worker subscribed");

    let mut messages = consumer.messages().await?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = messages.next() => {
                let Some(message) = next else { return Ok(()) };
                let message = message?;
                handle_message(&engine, &message, nak_delay).await;
            }
        }
    }
}

async fn handle_message(engine: &Engine, message: &jetstream::Message, nak_delay: Duration) {
    let event: EventMessage = match serde_json::from_slice(&message.payload) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "unparseable event message, acking without processing");
            message.ack().await.ok();
            return;
        }
    };

    match process(engine, &event).await {
        Ok(()) => {
            message.ack().await.ok();
        }
        Err(EventError::UnknownType) => {
            warn!(subject_id = %event.subject_id, "event references unknown resource type, acking");
            message.ack().await.ok();
        }
        Err(EventError::Rel(e)) => {
            warn!(subject_id = %event.subject_id, error = %e, "REL error processing event, nak with delay");
            message.ack_with(jetstream::AckKind::Nak(Some(nak_delay))).await.ok();
        }
    }
}

#[derive(Debug)]
enum EventError {
    UnknownType,
    Rel(crate::engine::EngineError),
}

impl From<crate::engine::EngineError> for EventError {
    fn from(e: crate::engine::EngineError) -> Self {
        EventError::Rel(e)
    }
}

async fn process(engine: &Engine, event: &EventMessage) -> Result<(), EventError> {
    let subject = engine
        .new_resource_from_id_string(&event.subject_id)
        .map_err(|_| EventError::UnknownType)?;

    match event.event_type {
        EventType::Create => synthesize(engine, &subject, &event.additional_subject_ids).await,
        EventType::Update => {
            engine.delete_resource_relationships(&subject).await?;
            engine.delete_outgoing_relationships(&subject).await?;
            synthesize(engine, &subject, &event.additional_subject_ids).await
        }
        EventType::Delete => {
            engine.delete_resource_relationships(&subject).await?;
            engine.delete_outgoing_relationships(&subject).await?;
            Ok(())
        }
    }
}

/// For each additional subject, touch a relationship if the policy declares
/// one on `subject`'s type whose target matches the additional subject's
/// type.
async fn synthesize(engine: &Engine, subject: &Resource, additional_subject_ids: &[String]) -> Result<(), EventError> {
    let rt = match engine.policy().type_by_name(&subject.type_name) {
        Some(rt) => rt,
        None => return Err(EventError::UnknownType),
    };

    let mut specs = Vec::new();
    for additional_id in additional_subject_ids {
        let additional = match engine.new_resource_from_id_string(additional_id) {
            Ok(r) => r,
            Err(_) => {
                warn!(id = %additional_id, "unparseable additional subject id, skipping");
                continue;
            }
        };
        if let Some(relation) = rt
            .relationships
            .iter()
            .find(|r| r.target_types.iter().any(|t| t.type_name == additional.type_name))
        {
            specs.push(RelationshipSpec {
                resource: subject.clone(),
                relation: relation.relation.clone(),
                subject: additional,
                subject_relation: None,
            });
        }
    }

    if !specs.is_empty() {
        engine.create_relationships(&specs).await?;
    }
    Ok(())
}

fn sanitize(topic: &str) -> String {
    topic.replace(['.', '*'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_engine;
    use crate::policy::Policy;

    fn engine() -> Engine {
        test_engine(Policy::default_policy().unwrap())
    }

    #[test]
    fn topics_for_uses_configured_list_when_non_empty() {
        let e = engine();
        let configured = vec!["custom.topic".to_string()];
        assert_eq!(topics_for(&e, &configured), configured);
    }

    #[test]
    fn topics_for_derives_wildcard_per_type_when_unconfigured() {
        let e = engine();
        let topics = topics_for(&e, &[]);
        assert!(topics.contains(&"*.tenant".to_string()));
        assert!(topics.contains(&"*.loadbalancer".to_string()));
        assert_eq!(topics.len(), e.policy().resource_types().count());
    }

    #[test]
    fn sanitize_strips_dots_and_wildcards() {
        assert_eq!(sanitize("*.tenant"), "__tenant");
        assert_eq!(sanitize("acme.events.tenant"), "acme_events_tenant");
    }

    #[test]
    fn event_message_defaults_additional_subjects_to_empty() {
        let json = r#"{"subject_id":"tnntten-root","event_type":"create"}"#;
        let event: EventMessage = serde_json::from_str(json).unwrap();
        assert!(event.additional_subject_ids.is_empty());
        assert_eq!(event.event_type, EventType::Create);
    }
}
