use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    checkpoint::CheckpointStore,
    classify::ClassifierPort,
    domain::{InboundMessage, Infraction, PipelineOutcome, SenderId},
    formatting::{short_identity, warning_text},
    ledger::LedgerPort,
    messaging::{MessageStream, ReplySink},
    Result,
};

/// Bounded waits for the three suspension points. An unbounded hang on one
/// sink must not stall the other sink or the next message's classification.
#[derive(Clone, Copy, Debug)]
pub struct PipelineTimeouts {
    pub classify: Duration,
    pub reply: Duration,
    pub ledger: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            classify: Duration::from_secs(8),
            reply: Duration::from_secs(10),
            ledger: Duration::from_secs(90),
        }
    }
}

/// Per-run outcome counters, surfaced in the shutdown summary.
///
/// `unchecked` counts messages that passed only because moderation was
/// unavailable; they are a subset of `clean`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub processed: u64,
    pub clean: u64,
    pub unchecked: u64,
    pub flagged: u64,
    pub handled: u64,
    pub reply_failures: u64,
    pub ledger_failures: u64,
    pub classification_failures: u64,
}

enum Evaluated {
    Done {
        outcome: PipelineOutcome,
        unchecked: bool,
    },
    Flagged(Infraction),
}

/// The moderation pipeline: filter → classify → dual-sink dispatch.
///
/// All collaborators are injected as ports so tests can substitute doubles
/// per test without process-wide reinitialization. Messages start
/// classification in arrival order; flagged dispatch runs concurrently
/// across messages since each infraction is independent.
pub struct Pipeline {
    classifier: Arc<dyn ClassifierPort>,
    ledger: Arc<dyn LedgerPort>,
    replies: Arc<dyn ReplySink>,
    own_identity: SenderId,
    timeouts: PipelineTimeouts,
    checkpoint: Option<CheckpointStore>,
    stats: Mutex<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn ClassifierPort>,
        ledger: Arc<dyn LedgerPort>,
        replies: Arc<dyn ReplySink>,
        own_identity: SenderId,
    ) -> Self {
        Self {
            classifier,
            ledger,
            replies,
            own_identity,
            timeouts: PipelineTimeouts::default(),
            checkpoint: None,
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: PipelineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub async fn stats(&self) -> PipelineStats {
        *self.stats.lock().await
    }

    /// Run one message through the full fixed sequence and return its
    /// outcome. Exactly one outcome is produced per message.
    pub async fn process(&self, msg: InboundMessage) -> PipelineOutcome {
        match self.evaluate(&msg).await {
            Evaluated::Done { outcome, unchecked } => {
                self.record(outcome, unchecked).await;
                outcome
            }
            Evaluated::Flagged(infraction) => self.dispatch(&msg, &infraction).await,
        }
    }

    /// Consume the stream until end-of-stream, a fatal transport error, or
    /// cancellation. In-flight dispatch is always drained before returning:
    /// a ledger submission abandoned mid-flight could already be confirmed,
    /// which would turn into a silent duplicate on restart.
    pub async fn run(
        self: Arc<Self>,
        stream: &mut dyn MessageStream,
        shutdown: CancellationToken,
    ) -> Result<PipelineStats> {
        let mut inflight: JoinSet<()> = JoinSet::new();
        let mut last_started: Option<u64> = None;

        let fatal = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, draining in-flight dispatch");
                    break None;
                }
                next = stream.next_message() => next,
            };

            let msg = match next {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("message stream ended");
                    break None;
                }
                Err(e) => break Some(e),
            };

            // At-least-once delivery can hand the same seq back after a
            // reconnect; each seq is consumed once.
            if last_started.is_some_and(|last| msg.seq <= last) {
                debug!(seq = msg.seq, "dropping already-processed message");
                continue;
            }
            last_started = Some(msg.seq);
            let seq = msg.seq;

            match self.evaluate(&msg).await {
                Evaluated::Done { outcome, unchecked } => {
                    self.record(outcome, unchecked).await;
                }
                Evaluated::Flagged(infraction) => {
                    let pipeline = Arc::clone(&self);
                    inflight.spawn(async move {
                        pipeline.dispatch(&msg, &infraction).await;
                    });
                }
            }

            if let Some(cp) = &self.checkpoint {
                if let Err(e) = cp.save(seq) {
                    warn!(seq, error = %e, "failed to persist stream checkpoint");
                }
            }

            // Reap finished dispatch tasks so the set does not grow unbounded.
            while let Some(res) = inflight.try_join_next() {
                if let Err(e) = res {
                    error!(error = %e, "dispatch task panicked");
                }
            }
        };

        while let Some(res) = inflight.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "dispatch task panicked");
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let stats = self.stats().await;
        info!(
            processed = stats.processed,
            clean = stats.clean,
            unchecked = stats.unchecked,
            flagged = stats.flagged,
            handled = stats.handled,
            reply_failures = stats.reply_failures,
            ledger_failures = stats.ledger_failures,
            classification_failures = stats.classification_failures,
            "pipeline stopped"
        );
        Ok(stats)
    }

    async fn evaluate(&self, msg: &InboundMessage) -> Evaluated {
        // The agent's own warning replies come back on the stream;
        // classifying them again would loop.
        if msg.sender == self.own_identity {
            debug!(seq = msg.seq, "skipping own message");
            return Evaluated::Done {
                outcome: PipelineOutcome::Clean,
                unchecked: false,
            };
        }
        if msg.content.trim().is_empty() {
            debug!(
                seq = msg.seq,
                sender = %short_identity(&msg.sender.0),
                "skipping empty message"
            );
            return Evaluated::Done {
                outcome: PipelineOutcome::Clean,
                unchecked: false,
            };
        }

        debug!(
            seq = msg.seq,
            sender = %short_identity(&msg.sender.0),
            content = %msg.content,
            "classifying message"
        );

        if self.classifier.is_degraded() {
            warn!(
                seq = msg.seq,
                sender = %short_identity(&msg.sender.0),
                "moderation unavailable, message passed unchecked"
            );
            return Evaluated::Done {
                outcome: PipelineOutcome::Clean,
                unchecked: true,
            };
        }

        let verdict = match timeout(
            self.timeouts.classify,
            self.classifier.classify(&msg.content),
        )
        .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                error!(
                    seq = msg.seq,
                    sender = %short_identity(&msg.sender.0),
                    error = %e,
                    "classification failed, passing message through"
                );
                return Evaluated::Done {
                    outcome: PipelineOutcome::ClassificationFailed,
                    unchecked: false,
                };
            }
            Err(_) => {
                error!(
                    seq = msg.seq,
                    sender = %short_identity(&msg.sender.0),
                    "classification timed out, passing message through"
                );
                return Evaluated::Done {
                    outcome: PipelineOutcome::ClassificationFailed,
                    unchecked: false,
                };
            }
        };

        if !verdict.flagged {
            return Evaluated::Done {
                outcome: PipelineOutcome::Clean,
                unchecked: false,
            };
        }

        info!(
            seq = msg.seq,
            sender = %short_identity(&msg.sender.0),
            content = %msg.content,
            reason = %verdict.reason,
            "message flagged"
        );

        Evaluated::Flagged(Infraction {
            subject: msg.sender.clone(),
            reason: verdict.reason,
            detected_at: Utc::now(),
        })
    }

    /// Attempt both side effects for one infraction. The reply and the
    /// ledger append are independent: both are always attempted, neither
    /// waits on the other's success, and a failure of one is reported
    /// without retrying the other.
    async fn dispatch(&self, msg: &InboundMessage, infraction: &Infraction) -> PipelineOutcome {
        let warning = warning_text(&infraction.reason);

        let reply_fut = async {
            match timeout(
                self.timeouts.reply,
                self.replies.reply(&msg.conversation, &warning),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!(seq = msg.seq, "warning reply delivered");
                    true
                }
                Ok(Err(e)) => {
                    error!(
                        seq = msg.seq,
                        sender = %short_identity(&msg.sender.0),
                        error = %e,
                        "failed to deliver warning reply"
                    );
                    false
                }
                Err(_) => {
                    error!(seq = msg.seq, "warning reply timed out");
                    false
                }
            }
        };

        let ledger_fut = async {
            match timeout(self.timeouts.ledger, self.ledger.append_infraction(infraction)).await {
                Ok(Ok(receipt)) => {
                    info!(
                        seq = msg.seq,
                        subject = %short_identity(&infraction.subject.0),
                        tx = %receipt.transaction_ref,
                        "infraction recorded on ledger"
                    );
                    true
                }
                Ok(Err(e)) => {
                    error!(
                        seq = msg.seq,
                        subject = %short_identity(&infraction.subject.0),
                        error = %e,
                        "failed to record infraction on ledger"
                    );
                    false
                }
                Err(_) => {
                    error!(seq = msg.seq, "ledger submission timed out");
                    false
                }
            }
        };

        let (replied, recorded) = tokio::join!(reply_fut, ledger_fut);

        // When both sinks fail the ledger failure wins the tag: losing the
        // audit record is the failure operators page on.
        let outcome = match (replied, recorded) {
            (true, true) => PipelineOutcome::FlaggedAndHandled,
            (_, false) => PipelineOutcome::FlaggedLedgerFailed,
            (false, true) => PipelineOutcome::FlaggedReplyFailed,
        };
        self.record(outcome, false).await;
        outcome
    }

    async fn record(&self, outcome: PipelineOutcome, unchecked: bool) {
        debug!(outcome = outcome.as_str(), unchecked, "message outcome");
        let mut stats = self.stats.lock().await;
        stats.processed += 1;
        match outcome {
            PipelineOutcome::Clean => {
                stats.clean += 1;
                if unchecked {
                    stats.unchecked += 1;
                }
            }
            PipelineOutcome::FlaggedAndHandled => {
                stats.flagged += 1;
                stats.handled += 1;
            }
            PipelineOutcome::FlaggedReplyFailed => {
                stats.flagged += 1;
                stats.reply_failures += 1;
            }
            PipelineOutcome::FlaggedLedgerFailed => {
                stats.flagged += 1;
                stats.ledger_failures += 1;
            }
            PipelineOutcome::ClassificationFailed => {
                stats.classification_failures += 1;
            }
        }
    }
}
