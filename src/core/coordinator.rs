//! Dual agent coordination.
//!
//! The test-and-refine step runs two sessions side by side: the generated
//! agent under test and an improvement agent the user talks to about what
//! should change. When a real improvement conversation ends, the coordinator
//! locks the generated agent's controls, runs the injected
//! [`FeedbackProcessor`] and then asks the user whether to keep iterating.
//!
//! "Real conversation" means the improvement session went from an active
//! state to `Disconnected` and had been active no more than
//! [`CoordinatorOptions::recency_window`] before the disconnection.
//!
//! Feedback processing is not cancellable once started. [`shutdown`] only stops
//! new rounds from starting. Conversations that ended before a [`restart`]
//! never start a round for the next agent.
//!
//! [`restart`]: DualAgentCoordinator::restart
//!
//! [`shutdown`]: DualAgentCoordinator::shutdown

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::agent_state::AgentLifecycleState;
use crate::core::iteration::{FeedbackIterationFlow, IterationRecord};
use crate::core::session::{SessionError, SessionEvent, SingleAgentSession};

/// Default gap allowed between the last active state and the disconnection.
pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(5);

/// Default duration of the simulated feedback round.
pub const DEFAULT_FEEDBACK_DELAY: Duration = Duration::from_secs(5);

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedbackProcessingError {
    #[error("Feedback processing failed: {0}")]
    Failed(String),
}

/// Input handed to the feedback processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRequest {
    /// Display name of the agent being refined
    pub generated_assistant: String,
    /// Display name of the agent that collected the feedback
    pub improvement_assistant: String,
    /// 1-based number of the round being processed
    pub iteration: u32,
}

/// Applies an improvement conversation to the generated agent's configuration.
#[async_trait]
pub trait FeedbackProcessor: Send + Sync {
    async fn process(&self, request: FeedbackRequest) -> Result<(), FeedbackProcessingError>;
}

/// Waits a fixed delay and reports success.
#[derive(Debug, Clone)]
pub struct DelayFeedbackProcessor {
    delay: Duration,
}

impl DelayFeedbackProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayFeedbackProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_FEEDBACK_DELAY)
    }
}

#[async_trait]
impl FeedbackProcessor for DelayFeedbackProcessor {
    async fn process(&self, request: FeedbackRequest) -> Result<(), FeedbackProcessingError> {
        debug!(iteration = request.iteration, delay_ms = self.delay.as_millis() as u64, "processing feedback");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub recency_window: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            recency_window: DEFAULT_RECENCY_WINDOW,
        }
    }
}

/// Notifications published by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    FeedbackProcessingStarted { iteration: u32 },
    /// The iteration prompt is now showing
    IterationComplete { count: u32 },
    FeedbackProcessingFailed(FeedbackProcessingError),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Feedback is still being processed")]
    ProcessingFeedback,

    #[error("Waiting for a continue or finish decision")]
    PromptPending,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Decides whether a finished improvement conversation may start a round.
#[derive(Debug, Default)]
struct FeedbackGate {
    processing: bool,
    restarting: bool,
    /// Improvement events at or before this instant belong to the previous agent
    reset_at: Option<Instant>,
}

struct CoordinatorShared {
    generated: SingleAgentSession,
    improvement: SingleAgentSession,
    processor: Arc<dyn FeedbackProcessor>,
    options: CoordinatorOptions,
    gate: Mutex<FeedbackGate>,
    flow: Mutex<FeedbackIterationFlow>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorShared {
    fn publish(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    fn on_improvement_event(self: &Arc<Self>, event: SessionEvent) {
        let SessionEvent::StateChanged {
            from,
            to: AgentLifecycleState::Disconnected,
            at,
            last_active_at,
        } = event
        else {
            return;
        };

        if !from.is_active() {
            debug!(%from, "improvement session ended without a conversation");
            return;
        }

        let recent = last_active_at
            .map(|last| at.saturating_duration_since(last) <= self.options.recency_window)
            .unwrap_or(false);
        if !recent {
            debug!("improvement session idle too long before disconnecting, no feedback round");
            return;
        }

        self.begin_feedback_processing(at);
    }

    fn begin_feedback_processing(self: &Arc<Self>, ended_at: Instant) {
        let iteration = {
            let mut gate = self.gate.lock();
            if gate.restarting || gate.reset_at.is_some_and(|reset_at| ended_at <= reset_at) {
                debug!("conversation ended before restart, no feedback round");
                return;
            }
            if gate.processing {
                debug!("feedback round already in flight");
                return;
            }
            gate.processing = true;
            self.flow.lock().count() + 1
        };

        info!(iteration, "processing improvement feedback");
        self.publish(CoordinatorEvent::FeedbackProcessingStarted { iteration });

        let request = FeedbackRequest {
            generated_assistant: self.generated.options().display_name.clone(),
            improvement_assistant: self.improvement.options().display_name.clone(),
            iteration,
        };

        let shared = Arc::clone(self);
        tokio::spawn(
            async move {
                let result = shared.processor.process(request).await;
                shared.gate.lock().processing = false;

                match result {
                    Ok(()) => {
                        let count = shared.flow.lock().on_iteration_complete();
                        info!(count, "iteration complete");
                        shared.publish(CoordinatorEvent::IterationComplete { count });
                    }
                    Err(err) => {
                        warn!("feedback processing failed: {err}");
                        shared.publish(CoordinatorEvent::FeedbackProcessingFailed(err));
                    }
                }
            }
            .instrument(info_span!("feedback_round", iteration)),
        );
    }
}

/// Runs the generated and the improvement session side by side.
pub struct DualAgentCoordinator {
    shared: Arc<CoordinatorShared>,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

impl DualAgentCoordinator {
    /// Must be called inside a tokio runtime; starts the improvement monitor.
    pub fn new(
        generated: SingleAgentSession,
        improvement: SingleAgentSession,
        processor: Arc<dyn FeedbackProcessor>,
        options: CoordinatorOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut improvement_events = improvement.subscribe();

        let shared = Arc::new(CoordinatorShared {
            generated,
            improvement,
            processor,
            options,
            gate: Mutex::new(FeedbackGate::default()),
            flow: Mutex::new(FeedbackIterationFlow::new()),
            events,
        });

        let cancel = CancellationToken::new();
        let monitor = tokio::spawn({
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            async move {
                loop {
                    let received = tokio::select! {
                        () = cancel.cancelled() => break,
                        received = improvement_events.recv() => received,
                    };
                    match received {
                        Ok(event) => shared.on_improvement_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "improvement monitor lagged behind session events");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                debug!("improvement monitor stopped");
            }
            .instrument(info_span!("improvement_monitor"))
        });

        Self {
            shared,
            cancel,
            monitor: Some(monitor),
        }
    }

    pub fn generated(&self) -> &SingleAgentSession {
        &self.shared.generated
    }

    pub fn improvement(&self) -> &SingleAgentSession {
        &self.shared.improvement
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the generated agent's controls are locked by a feedback round.
    pub fn is_processing_feedback(&self) -> bool {
        self.shared.gate.lock().processing
    }

    pub fn iteration_record(&self) -> IterationRecord {
        self.shared.flow.lock().record()
    }

    pub fn is_prompt_visible(&self) -> bool {
        self.shared.flow.lock().is_prompt_visible()
    }

    pub async fn connect_generated(&self) -> Result<(), CoordinatorError> {
        if self.is_processing_feedback() {
            return Err(CoordinatorError::ProcessingFeedback);
        }
        self.shared.generated.connect().await?;
        Ok(())
    }

    pub async fn disconnect_generated(&self) -> Result<(), CoordinatorError> {
        if self.is_processing_feedback() {
            return Err(CoordinatorError::ProcessingFeedback);
        }
        self.shared.generated.disconnect().await;
        Ok(())
    }

    pub async fn connect_improvement(&self) -> Result<(), CoordinatorError> {
        if self.is_processing_feedback() {
            return Err(CoordinatorError::ProcessingFeedback);
        }
        if self.is_prompt_visible() {
            return Err(CoordinatorError::PromptPending);
        }
        self.shared.improvement.connect().await?;
        Ok(())
    }

    pub async fn disconnect_improvement(&self) {
        self.shared.improvement.disconnect().await;
    }

    /// Dismiss the prompt and allow another round. `false` if no prompt showed.
    pub fn continue_iterating(&self) -> bool {
        self.shared.flow.lock().continue_iterating()
    }

    /// Dismiss the prompt without touching either session. `false` if no
    /// prompt showed.
    pub fn finish(&self) -> bool {
        self.shared.flow.lock().finish()
    }

    /// Start over for a new agent: both sessions disconnected, count zeroed.
    pub async fn restart(&self) -> Result<(), CoordinatorError> {
        {
            let mut gate = self.shared.gate.lock();
            if gate.processing {
                return Err(CoordinatorError::ProcessingFeedback);
            }
            gate.restarting = true;
        }

        self.shared.improvement.disconnect().await;
        self.shared.generated.disconnect().await;
        self.shared.flow.lock().reset();

        {
            let mut gate = self.shared.gate.lock();
            gate.restarting = false;
            gate.reset_at = Some(Instant::now());
        }
        info!("coordinator restarted for a new agent");
        Ok(())
    }

    /// Stop watching the improvement session and disconnect both sessions.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        self.shared.improvement.disconnect().await;
        self.shared.generated.disconnect().await;
    }
}

impl Drop for DualAgentCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
