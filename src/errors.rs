//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Requested snapshot, blob, or remote target does not exist.
    NotFound(String),
    /// Snapshot is malformed, belongs to another target, or input is invalid.
    Validation(String),
    /// Concurrency token was stale, or a snapshot id already exists.
    Conflict(String),
    /// Transport or storage failure, including timeouts.
    Io(String),
    /// A restore step failed; carries enough context to tell whether the
    /// remote configuration was mutated.
    Restore(Box<RestoreFailure>),
}

/// The ordered steps of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    /// Loading and validating the target snapshot.
    LoadSnapshot,
    /// Reading the live configuration and its concurrency token.
    FetchLive,
    /// Computing the summary diff for review.
    Preview,
    /// Capturing the pre-restore safety snapshot.
    SafetyBackup,
    /// Submitting the snapshot payload to the remote service.
    Apply,
    /// Re-reading the live configuration after the apply.
    Validate,
    /// Appending the outcome to the restore history.
    RecordHistory,
}

impl Display for RestoreStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LoadSnapshot => "load_snapshot",
            Self::FetchLive => "fetch_live",
            Self::Preview => "preview",
            Self::SafetyBackup => "safety_backup",
            Self::Apply => "apply",
            Self::Validate => "validate",
            Self::RecordHistory => "record_history",
        };
        f.write_str(name)
    }
}

/// Whether a failed restore left the remote configuration changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// The remote configuration was not touched.
    NotApplied,
    /// The apply call succeeded before the failure.
    Applied,
    /// The apply call failed in transit; the remote may or may not have
    /// accepted it.
    Unknown,
}

impl Display for MutationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotApplied => "not applied",
            Self::Applied => "applied",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Structured context for a failed restore.
#[derive(Debug)]
pub struct RestoreFailure {
    /// Step that failed.
    pub step: RestoreStep,
    /// Target whose configuration was being restored.
    pub target_id: String,
    /// Snapshot that was being restored.
    pub snapshot_id: String,
    /// Whether the remote configuration was changed before the failure.
    pub mutation: MutationState,
    /// Underlying error.
    pub source: AppError,
    /// Set when the failed attempt could not be written to the history.
    pub history_error: Option<String>,
}

impl AppError {
    /// Wrap `self` as a failure of the given restore step.
    #[must_use]
    pub fn at_step(
        self,
        step: RestoreStep,
        target_id: &str,
        snapshot_id: &str,
        mutation: MutationState,
    ) -> Self {
        Self::Restore(Box::new(RestoreFailure {
            step,
            target_id: target_id.to_owned(),
            snapshot_id: snapshot_id.to_owned(),
            mutation,
            source: self,
            history_error: None,
        }))
    }

    /// Note that recording this failed restore in the history also failed.
    /// Has no effect on errors without restore context.
    #[must_use]
    pub fn with_history_error(mut self, history_err: &AppError) -> Self {
        if let Self::Restore(failure) = &mut self {
            failure.history_error = Some(history_err.to_string());
        }
        self
    }

    /// The innermost error, looking through restore context.
    #[must_use]
    pub fn root_cause(&self) -> &AppError {
        match self {
            Self::Restore(failure) => failure.source.root_cause(),
            other => other,
        }
    }

    /// Restore context, if this error came out of a restore run.
    #[must_use]
    pub fn restore_failure(&self) -> Option<&RestoreFailure> {
        match self {
            Self::Restore(failure) => Some(failure),
            _ => None,
        }
    }

    /// True when the root cause is a stale concurrency token or id collision.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self.root_cause(), Self::Conflict(_))
    }

    /// True when the root cause is a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::NotFound(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Restore(failure) => {
                write!(
                    f,
                    "restore of {}/{} failed at {} (mutation {}): {}",
                    failure.target_id,
                    failure.snapshot_id,
                    failure.step,
                    failure.mutation,
                    failure.source
                )?;
                if let Some(history_err) = &failure.history_error {
                    write!(f, "; attempt not recorded in history: {history_err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("malformed document: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
