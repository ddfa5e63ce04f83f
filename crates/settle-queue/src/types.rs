use serde::{Deserialize, Serialize};

/// The stored record for one debounced job id.
///
/// `payload` is kept as the JSON text the enqueuer wrote; decoding happens on
/// the worker side so a corrupt record only affects the claim that reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    /// JSON-encoded payload from the most recent enqueue.
    pub payload: String,
    /// Epoch ms of the most recent `now + delay`.
    pub due: i64,
    /// Number of failed sink invocations so far.
    pub retries: u32,
    /// Epoch ms after which the record is gone. `None` while the job is live.
    pub expires_at: Option<i64>,
}

/// One id handed out by [`claim_due_batch`](crate::JobStore::claim_due_batch).
///
/// `token` is stamped on the processing entry. `ack`, `reschedule` and
/// `retry` only act while the entry still carries it; once the claim has been
/// reaped and claimed again, the old holder's calls are no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub token: String,
    /// Visibility deadline, epoch ms.
    pub deadline: i64,
}

/// What the sink receives for a due job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub id: String,
    pub payload: serde_json::Value,
    pub retries: u32,
}

/// Where a job id currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// In the due index, waiting for its score to pass.
    Pending,
    /// In the processing index, held by a worker until its visibility deadline.
    Claimed,
    /// Acknowledged; record kept only until its retention deadline.
    Done,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Claimed => "claimed",
            JobState::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "claimed" => Ok(JobState::Claimed),
            "done" => Ok(JobState::Done),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Point-in-time counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Entries in the due index.
    pub pending: usize,
    /// Subset of `pending` whose score is already <= now.
    pub ready: usize,
    /// Entries in the processing index.
    pub processing: usize,
    /// Completed records still inside their retention window.
    pub retained: usize,
}

/// Tally of a single claim-and-dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub claimed: usize,
    /// Sink succeeded and the claim was acknowledged.
    pub dispatched: usize,
    /// Re-enqueued after the claim; put back at its new due time.
    pub stale: usize,
    /// Sink failed; rescheduled with backoff.
    pub failed: usize,
    /// Payload could not be decoded, or the record vanished; claim released.
    pub dropped: usize,
    /// The claim was taken over before the worker resolved it; the new
    /// holder owns the job now.
    pub lost: usize,
}

impl BatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}
