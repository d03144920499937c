//! Message pump.
//!
//! A single-threaded consume loop over one channel: receive, decode,
//! dispatch, acknowledge. Handler deferrals requeue the message with a
//! bounded budget tracked in the `x-handled-count` header; undecodable or
//! failing messages are rejected; an `MT_QUIT` envelope or the shutdown
//! broadcast stops the loop. Parallelism comes from running several pumps
//! over distinct channels, never from concurrency inside one pump.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::mapper::{MessageMapper, TransformPipeline};
use crate::message::MessageType;
use crate::port::channel::{Channel, ChannelError};
use crate::port::processor::{CommandProcessor, DispatchError, Request};

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Bound on a single channel receive.
    pub timeout: Duration,
    /// Deferral budget: deliveries of one message before it is rejected.
    pub requeue_count: u32,
    /// Delay applied when a deferred message is requeued.
    pub requeue_delay: Duration,
    /// Optional pause after a receive timeout, to avoid spinning on an empty
    /// channel with a short receive bound.
    pub empty_channel_delay: Option<Duration>,
    /// Stop the pump after this many consecutive unacceptable messages.
    pub unacceptable_message_limit: Option<usize>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(300),
            requeue_count: 3,
            requeue_delay: Duration::ZERO,
            empty_channel_delay: None,
            unacceptable_message_limit: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unacceptable message limit of {0} reached")]
    UnacceptableMessageLimit(usize),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Consume loop for one request type over one channel.
pub struct MessagePump<R: Request> {
    channel: Arc<dyn Channel>,
    mapper: Arc<dyn MessageMapper<R>>,
    pipeline: TransformPipeline,
    processor: Arc<dyn CommandProcessor<R>>,
    config: PumpConfig,
}

impl<R: Request> MessagePump<R> {
    pub fn new(
        channel: Arc<dyn Channel>,
        mapper: Arc<dyn MessageMapper<R>>,
        processor: Arc<dyn CommandProcessor<R>>,
        config: PumpConfig,
    ) -> Self {
        Self {
            channel,
            mapper,
            pipeline: TransformPipeline::new(),
            processor,
            config,
        }
    }

    /// Unwrap incoming messages through `pipeline` before decoding.
    pub fn with_pipeline(mut self, pipeline: TransformPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    fn limit_reached(&self, streak: usize) -> bool {
        self.config
            .unacceptable_message_limit
            .is_some_and(|limit| streak >= limit)
    }

    /// Run until an `MT_QUIT` envelope, the shutdown broadcast, a fatal
    /// configuration error, or the unacceptable-message limit.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), PumpError> {
        info!("message pump started");
        let mut unacceptable_streak = 0usize;

        loop {
            let message = tokio::select! {
                _ = shutdown.recv() => {
                    info!("message pump cancelled");
                    return Ok(());
                }
                received = self.channel.receive(self.config.timeout) => received?,
            };

            match message.header.message_type {
                MessageType::None => {
                    if let Some(delay) = self.config.empty_channel_delay {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
                MessageType::Quit => {
                    info!("stop signal received, message pump stopping");
                    return Ok(());
                }
                MessageType::Unacceptable => {
                    warn!(message_id = %message.id(), "rejecting unacceptable message");
                    self.channel.reject(&message).await?;
                    unacceptable_streak += 1;
                    if self.limit_reached(unacceptable_streak) {
                        error!(streak = unacceptable_streak, "unacceptable message limit reached");
                        return Err(PumpError::UnacceptableMessageLimit(unacceptable_streak));
                    }
                    continue;
                }
                _ => {}
            }

            let unwrapped = match self.pipeline.unwrap(message.clone()).await {
                Ok(unwrapped) => unwrapped,
                Err(e) => {
                    warn!(message_id = %message.id(), error = %e, "transform unwrap failed, rejecting");
                    self.channel.reject(&message).await?;
                    unacceptable_streak += 1;
                    if self.limit_reached(unacceptable_streak) {
                        return Err(PumpError::UnacceptableMessageLimit(unacceptable_streak));
                    }
                    continue;
                }
            };

            let request = match self.mapper.map_to_request(&unwrapped).await {
                Ok(request) => request,
                Err(e) => {
                    warn!(message_id = %message.id(), error = %e, "could not decode message, rejecting");
                    self.channel.reject(&message).await?;
                    unacceptable_streak += 1;
                    if self.limit_reached(unacceptable_streak) {
                        return Err(PumpError::UnacceptableMessageLimit(unacceptable_streak));
                    }
                    continue;
                }
            };
            unacceptable_streak = 0;

            // Crash-recovery guard: a message can re-enter with an already
            // exhausted deferral budget.
            if message.handled_count() >= self.config.requeue_count {
                warn!(
                    message_id = %message.id(),
                    handled_count = message.handled_count(),
                    "deferral budget exhausted, rejecting"
                );
                self.channel.reject(&message).await?;
                continue;
            }

            let outcome = match message.header.message_type {
                MessageType::Command => self.processor.send(request).await,
                _ => self.processor.publish(request).await,
            };

            match outcome {
                Ok(()) => {
                    self.channel.acknowledge(&message).await?;
                }
                Err(DispatchError::Defer) => {
                    let mut message = message;
                    let count = message.increment_handled_count();
                    if count >= self.config.requeue_count {
                        warn!(
                            message_id = %message.id(),
                            handled_count = count,
                            "deferral budget exhausted, rejecting"
                        );
                        self.channel.reject(&message).await?;
                    } else {
                        debug!(message_id = %message.id(), handled_count = count, "requeueing deferred message");
                        self.channel
                            .requeue(message, self.config.requeue_delay)
                            .await?;
                    }
                }
                Err(DispatchError::Configuration(reason)) => {
                    error!(message_id = %message.id(), reason = %reason, "fatal configuration error, stopping pump");
                    self.channel.reject(&message).await?;
                    return Err(PumpError::Configuration(reason));
                }
                Err(DispatchError::Handler(reason)) => {
                    warn!(message_id = %message.id(), reason = %reason, "handler failed, rejecting message");
                    self.channel.reject(&message).await?;
                }
            }
        }
    }
}
