use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::aggregate::Aggregator;
use crate::config::RelayConfig;
use crate::downstream::render;
use crate::errors::{RelayError, StoreError, UpstreamError};
use crate::event::RelayEvent;
use crate::model::{ChatCompletion, ChatRequest, Message};
use crate::provider::ChatUpstream;
use crate::scope::RequestScope;
use crate::stage::{Stage, StageEncoder};
use crate::store::{ExchangeId, ExchangeStore, SessionId, history};
use crate::upstream::{ChunkReceiver, UpstreamItem};

/// User input for one relayed exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayInput {
    pub content: String,
    pub model: String,
}

impl RelayInput {
    /// Creates an input for `model`. Blank values are rejected by [`Relay::start`].
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
        }
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.content.trim().is_empty() {
            return Err(RelayError::Validation("content must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(RelayError::Validation("model must not be empty".into()));
        }
        Ok(())
    }
}

/// Entry point wiring the store and the upstream together.
///
/// Cheap to clone; every call to [`Relay::start`] gets its own controller
/// task with its own aggregate.
#[derive(Clone)]
pub struct Relay {
    store: Arc<dyn ExchangeStore>,
    upstream: Arc<dyn ChatUpstream>,
    config: RelayConfig,
}

impl Relay {
    /// Creates a relay over `store` and `upstream`. Fails if `config` is invalid.
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        upstream: Arc<dyn ChatUpstream>,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            store,
            upstream,
            config,
        })
    }

    /// Records a placeholder exchange, opens the upstream stream and spawns
    /// the controller task.
    ///
    /// Errors returned here happen before any event is produced. The
    /// upstream call runs under a scope detached from `scope`'s departure
    /// signal, so the answer is still aggregated and persisted if the
    /// consumer leaves.
    pub async fn start(
        &self,
        session_id: SessionId,
        input: RelayInput,
        scope: RequestScope,
    ) -> Result<RelayStream, RelayError> {
        input.validate()?;
        let exchanges = self.store.find_exchanges(session_id).await?;
        let mut messages = history(&exchanges);
        messages.push(Message::user(input.content.clone()));

        let exchange_id = self
            .store
            .create_placeholder(session_id, &input.content)
            .await?;
        let upstream_scope = scope.detach().tighten(self.config.upstream_timeout);
        info!(%session_id, %exchange_id, model = %input.model, history = messages.len() - 1, "starting relay");

        let request = ChatRequest::streaming(input.model, messages);
        let chunks = self
            .upstream
            .open_stream(request, upstream_scope, self.config.upstream_capacity)
            .await
            .inspect_err(|err| warn!(%exchange_id, error = %err, "upstream call failed"))?;

        let (tx, rx) = mpsc::channel(self.config.downstream_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let controller = RelayController {
            session_id,
            exchange_id,
            store: self.store.clone(),
            scope,
            deadline: upstream_scope.deadline(),
            sink: Some(tx),
            departed: false,
        };
        let span = info_span!("relay", %session_id, %exchange_id);
        tokio::spawn(
            async move {
                let summary = controller.run(chunks).await;
                let _ = final_tx.send(summary);
            }
            .instrument(span),
        );

        Ok(RelayStream {
            exchange_id,
            rx,
            final_rx,
        })
    }
}

/// Result of one relayed exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct RelaySummary {
    pub exchange_id: ExchangeId,
    /// Aggregate as folded so far, valid or not.
    pub completion: ChatCompletion,
    /// A role was observed, so the aggregate was handed to the store.
    pub valid: bool,
    /// The stream reached the terminal chunk.
    pub complete: bool,
    pub persisted: bool,
    pub consumer_departed: bool,
    /// In-band errors forwarded as `error` events.
    pub upstream_errors: Vec<UpstreamError>,
    /// Fatal error that ended the stream early.
    pub failure: Option<RelayError>,
    pub persistence_error: Option<StoreError>,
}

/// Downstream handle returned by [`Relay::start`].
///
/// Dropping it counts as the consumer departing: the relay keeps draining
/// the upstream and still persists the result.
pub struct RelayStream {
    exchange_id: ExchangeId,
    rx: mpsc::Receiver<RelayEvent>,
    final_rx: oneshot::Receiver<RelaySummary>,
}

impl RelayStream {
    /// Id of the placeholder exchange recorded for this stream.
    pub fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }

    /// Next event, `None` once the downstream sink is closed.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        self.rx.recv().await
    }

    /// Next event already rendered in the downstream wire format.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.next_event().await.map(|event| render(&event))
    }

    /// Drains remaining events and waits for the controller to finish.
    pub async fn finish(mut self) -> Result<RelaySummary, RelayError> {
        while self.rx.recv().await.is_some() {}
        self.final_rx.await.map_err(|_| {
            RelayError::protocol_msg(format!(
                "relay task ended without summary (exchange={})",
                self.exchange_id
            ))
        })
    }
}

enum Step {
    Item(Option<Result<UpstreamItem, RelayError>>),
    Departed,
    DeadlineExpired,
}

/// Per-request controller. Sole owner of the aggregate and the stage machine.
struct RelayController {
    session_id: SessionId,
    exchange_id: ExchangeId,
    store: Arc<dyn ExchangeStore>,
    scope: RequestScope,
    deadline: Option<Instant>,
    sink: Option<mpsc::Sender<RelayEvent>>,
    departed: bool,
}

impl RelayController {
    async fn run(mut self, mut chunks: ChunkReceiver) -> RelaySummary {
        let exchange_id = self.exchange_id;
        let mut aggregator = Aggregator::new();
        let mut encoder = StageEncoder::new();
        let mut upstream_errors = Vec::new();
        let mut failure = None;

        loop {
            let step = tokio::select! {
                _ = consumer_gone(&mut self.scope, self.sink.as_ref()), if self.sink.is_some() => Step::Departed,
                next = chunks.recv() => Step::Item(next),
                _ = sleep_until(self.deadline) => Step::DeadlineExpired,
            };

            let item = match step {
                Step::Departed => {
                    info!(%exchange_id, stage = %encoder.stage(), "consumer departed, draining upstream without forwarding");
                    self.sink = None;
                    self.departed = true;
                    continue;
                }
                Step::DeadlineExpired => {
                    failure = Some(RelayError::DeadlineExceeded);
                    break;
                }
                Step::Item(None) => break,
                Step::Item(Some(Err(err))) => {
                    failure = Some(err);
                    break;
                }
                Step::Item(Some(Ok(item))) => item,
            };

            let chunk = match item {
                UpstreamItem::Error(err) => {
                    self.forward(RelayEvent::Error(err.to_string())).await;
                    upstream_errors.push(err);
                    continue;
                }
                UpstreamItem::Chunk(chunk) => chunk,
            };
            debug!(%exchange_id, stage = %encoder.stage(), "relaying chunk");

            let events = aggregator.fold(&chunk).and_then(|()| encoder.encode(&chunk));
            match events {
                Ok(events) => {
                    for event in events {
                        self.forward(event).await;
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        // Releases the upstream reader.
        drop(chunks);

        if let Some(err) = &failure {
            warn!(%exchange_id, error = %err, "relay stream failed");
            self.forward(RelayEvent::Error(err.to_string())).await;
        }
        // A trailing error after the terminal chunk leaves the answer whole.
        let complete = encoder.is_done() && aggregator.is_final();
        if !encoder.is_done() {
            warn!(%exchange_id, stage = %encoder.stage(), "upstream stream ended before {}", Stage::Done);
        }

        let valid = aggregator.valid();
        let completion = aggregator.into_completion();
        let mut persisted = false;
        let mut persistence_error = None;
        if valid {
            match self
                .store
                .finalize(exchange_id, completion.clone(), complete)
                .await
            {
                Ok(()) => persisted = true,
                Err(err) => {
                    error!(%exchange_id, session_id = %self.session_id, error = %err, "can not save exchange result");
                    self.forward(RelayEvent::Error(err.to_string())).await;
                    persistence_error = Some(err);
                }
            }
        }
        let consumer_departed = self.departed;
        info!(%exchange_id, valid, complete, persisted, consumer_departed, "relay finished");

        // Closes the downstream sink.
        self.sink = None;
        RelaySummary {
            exchange_id,
            completion,
            valid,
            complete,
            persisted,
            consumer_departed,
            upstream_errors,
            failure,
            persistence_error,
        }
    }

    /// Sends one event downstream while the consumer is live. A failed
    /// delivery closes the sink for good.
    async fn forward(&mut self, event: RelayEvent) {
        let Some(tx) = self.sink.as_ref() else {
            return;
        };
        let delivered = tokio::select! {
            sent = tx.send(event) => sent.is_ok(),
            _ = self.scope.departed() => false,
        };
        if !delivered {
            debug!(exchange_id = %self.exchange_id, "downstream closed while forwarding");
            self.sink = None;
            self.departed = true;
        }
    }
}

async fn consumer_gone(scope: &mut RequestScope, sink: Option<&mpsc::Sender<RelayEvent>>) {
    match sink {
        Some(sink) => {
            tokio::select! {
                _ = scope.departed() => {}
                _ = sink.closed() => {}
            }
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
