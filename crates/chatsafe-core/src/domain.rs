use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Sender identity on the messaging network (an address string).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SenderId(pub String);

/// Opaque handle to the conversation a message arrived in, usable by the
/// reply sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

/// One message received from the stream.
///
/// Immutable once received; the pipeline consumes each `seq` exactly once.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub seq: u64,
    pub sender: SenderId,
    pub content: String,
    pub conversation: ConversationId,
}

/// Classification result for one message's content. Ephemeral, one per
/// evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub flagged: bool,
    /// Empty when not flagged; comma-joined category names when flagged.
    pub reason: String,
    /// Category names the service marked true. Advisory only.
    pub categories: BTreeSet<String>,
}

impl Verdict {
    pub fn clean(reason: impl Into<String>) -> Self {
        Self {
            flagged: false,
            reason: reason.into(),
            categories: BTreeSet::new(),
        }
    }
}

/// One policy-violation event headed for the ledger.
///
/// Constructed only from a flagged verdict; its lifecycle ends once a
/// [`RecordReceipt`] is obtained or submission is abandoned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Infraction {
    pub subject: SenderId,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

/// Proof that the ledger durably accepted one append.
#[derive(Clone, Debug)]
pub struct RecordReceipt {
    pub transaction_ref: String,
    pub confirmed: bool,
}

/// An infraction as read back from the ledger (dashboard view, insertion
/// order, newest last).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerRecord {
    pub subject: String,
    pub reason: String,
    /// Chain-side timestamp, seconds since the epoch.
    pub recorded_at: u64,
}

/// Per-message result of the pipeline. Exactly one is produced per message;
/// used for logs and counters, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Clean,
    FlaggedAndHandled,
    FlaggedReplyFailed,
    FlaggedLedgerFailed,
    ClassificationFailed,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::FlaggedAndHandled => "flagged_and_handled",
            Self::FlaggedReplyFailed => "flagged_reply_failed",
            Self::FlaggedLedgerFailed => "flagged_ledger_failed",
            Self::ClassificationFailed => "classification_failed",
        }
    }
}
