use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{ChatEnvelope, EventContext, EventDispatcher, HandlerResult, OutgoingMessage};
use crate::lanes::{LaneWorker, UserLanes};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 8, base_delay_ms: 250, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Source of inbound chat updates and sink for replies. `next_envelope`
/// returns `None` once the stream has ended.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _update_id: i64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _message: &OutgoingMessage) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneSettings {
    pub lanes: usize,
    pub capacity: usize,
    pub drain_grace: Duration,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self { lanes: 8, capacity: 64, drain_grace: Duration::from_secs(10) }
    }
}

enum PumpExit {
    Closed,
    Shutdown,
}

pub struct PollingRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
    lane_settings: LaneSettings,
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
        lane_settings: LaneSettings,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), reconnect_policy, lane_settings }
    }

    /// Pumps updates until the transport closes, retries are exhausted or
    /// `shutdown` flips to `true`, then drains the lanes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let worker = Arc::new(DispatchWorker {
            dispatcher: self.dispatcher.clone(),
            transport: self.transport.clone(),
        });
        let lanes =
            UserLanes::spawn(self.lane_settings.lanes, self.lane_settings.capacity, worker);
        let mut attempt = 0_u32;

        loop {
            match self.connect_and_pump(&lanes, &mut shutdown, &mut attempt).await {
                Ok(PumpExit::Closed) | Ok(PumpExit::Shutdown) => break,
                Err(transport_error) => {
                    warn!(
                        event_name = "chat.transport.failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            event_name = "chat.transport.retries_exhausted",
                            max_retries = self.reconnect_policy.max_retries,
                            "chat transport retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
        }

        let drained = lanes.shutdown(self.lane_settings.drain_grace).await;
        info!(event_name = "chat.runner.stopped", drained, "chat runner stopped");
        Ok(())
    }

    async fn connect_and_pump(
        &self,
        lanes: &UserLanes,
        shutdown: &mut watch::Receiver<bool>,
        attempt: &mut u32,
    ) -> Result<PumpExit, TransportError> {
        info!(event_name = "chat.transport.connecting", attempt = *attempt, "opening chat transport");
        self.transport.connect().await?;
        info!(event_name = "chat.transport.connected", attempt = *attempt, "chat transport connected");

        loop {
            if *shutdown.borrow() {
                self.transport.disconnect().await?;
                return Ok(PumpExit::Shutdown);
            }

            let next = tokio::select! {
                next = self.transport.next_envelope() => next?,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        self.transport.disconnect().await?;
                        return Ok(PumpExit::Shutdown);
                    }
                    continue;
                }
            };
            *attempt = 0;

            let Some(envelope) = next else {
                info!(event_name = "chat.transport.closed", "chat transport stream closed");
                self.transport.disconnect().await?;
                return Ok(PumpExit::Closed);
            };

            info!(
                event_name = "ingress.chat.envelope_received",
                update_id = envelope.update_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.correlation_id(),
                user_id = envelope.event.user_id().unwrap_or_default(),
                "received chat envelope"
            );

            self.forward(lanes, envelope).await;
        }
    }

    /// Queues `envelope` on its lane and acknowledges it. An envelope that
    /// could not be queued stays unacknowledged so the transport redelivers
    /// it. Returns whether the envelope was queued.
    async fn forward(&self, lanes: &UserLanes, envelope: ChatEnvelope) -> bool {
        let update_id = envelope.update_id;
        if let Err(error) = lanes.enqueue(envelope).await {
            warn!(
                event_name = "chat.lane.enqueue_failed",
                update_id,
                error = %error,
                "failed to enqueue chat envelope; leaving it unacknowledged"
            );
            return false;
        }

        if let Err(error) = self.transport.acknowledge(update_id).await {
            warn!(
                event_name = "ingress.chat.ack_sent",
                update_id,
                error = %error,
                "failed to acknowledge chat envelope"
            );
        } else {
            debug!(event_name = "ingress.chat.ack_sent", update_id, "acknowledged chat envelope");
        }
        true
    }
}

struct DispatchWorker {
    dispatcher: Arc<EventDispatcher>,
    transport: Arc<dyn ChatTransport>,
}

#[async_trait]
impl LaneWorker for DispatchWorker {
    async fn process(&self, envelope: ChatEnvelope) {
        let context = EventContext { correlation_id: envelope.correlation_id() };
        let HandlerResult::Responded(message) = self.dispatcher.dispatch(&envelope, &context).await
        else {
            return;
        };

        if let Err(error) = self.transport.send(&message).await {
            warn!(
                event_name = "chat.reply.delivery_failed",
                correlation_id = %context.correlation_id,
                chat_id = message.chat_id,
                error = %error,
                "failed to deliver reply"
            );
        }
    }
}
