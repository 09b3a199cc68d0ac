//! Types stored in the manifest database.

/// Job identifier.
pub type JobId = i64;

/// Lifecycle state of a job, stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Planning,
    Resuming,
    Downloading,
    Assembling,
    Tiering,
    Completed,
    Cancelling,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Planning => "planning",
            JobState::Resuming => "resuming",
            JobState::Downloading => "downloading",
            JobState::Assembling => "assembling",
            JobState::Tiering => "tiering",
            JobState::Completed => "completed",
            JobState::Cancelling => "cancelling",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => JobState::Queued,
            "planning" => JobState::Planning,
            "resuming" => JobState::Resuming,
            "downloading" => JobState::Downloading,
            "assembling" => JobState::Assembling,
            "tiering" => JobState::Tiering,
            "completed" => JobState::Completed,
            "cancelling" => JobState::Cancelling,
            "cancelled" => JobState::Cancelled,
            _ => JobState::Failed,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// State of one part, stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl PartState {
    pub fn as_str(self) -> &'static str {
        match self {
            PartState::Pending => "pending",
            PartState::InFlight => "in_flight",
            PartState::Done => "done",
            PartState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => PartState::Pending,
            "in_flight" => PartState::InFlight,
            "done" => PartState::Done,
            _ => PartState::Failed,
        }
    }
}

/// Full job record used by the controller and the status surface.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    /// Opaque source locator, interpreted only by the fetch client.
    pub locator: String,
    /// Filename of the finished artifact on the archive volume.
    pub target_name: String,
    /// Total byte size; NULL until planning has probed the source.
    pub total_size: Option<i64>,
    pub part_size: i64,
    pub state: JobState,
    pub error: Option<String>,
    /// Optional per-job override of the worker concurrency limit.
    pub worker_limit: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Durable projection of one part used for resume.
#[derive(Debug, Clone)]
pub struct PartRecord {
    pub job_id: JobId,
    pub index: i64,
    pub offset: i64,
    pub length: i64,
    pub state: PartState,
    pub retry_count: i64,
    /// Bytes recorded at the last Done transition; cross-checked against the
    /// physical part file during resume.
    pub bytes_on_disk: i64,
}
