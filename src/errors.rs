use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Failure taxonomy of a graph build.
///
/// Per-record failures are recorded as [`Issue`]s and the run continues; only
/// whole-run failures are returned as errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphBuildError {
    #[error("geometry error on {subject}: {reason}")]
    Geometry { subject: String, reason: String },
    #[error("{count} split points on trail {trail_id} cluster within {tolerance_m} m")]
    ToleranceAmbiguity {
        trail_id: String,
        count: usize,
        tolerance_m: f64,
    },
    #[error("cannot merge edges {edge_a} and {edge_b} through node {node}: {reason}")]
    ChainMergeConflict {
        node: u64,
        edge_a: u64,
        edge_b: u64,
        reason: String,
    },
    #[error("graph is fragmented: largest component covers {largest_share:.1}% of {node_count} nodes")]
    ConnectivityFragmentation {
        largest_share: f64,
        node_count: usize,
    },
    #[error("batch {batch} failed: {reason}")]
    BatchProcessingFailure { batch: usize, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("workspace '{namespace}': {reason}")]
    Workspace { namespace: String, reason: String },
}

impl GraphBuildError {
    pub fn geometry(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Geometry {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> IssueKind {
        match self {
            Self::Geometry { .. } => IssueKind::Geometry,
            Self::ToleranceAmbiguity { .. } => IssueKind::ToleranceAmbiguity,
            Self::ChainMergeConflict { .. } => IssueKind::ChainMergeConflict,
            Self::ConnectivityFragmentation { .. } => IssueKind::ConnectivityFragmentation,
            Self::BatchProcessingFailure { .. } => IssueKind::BatchProcessingFailure,
            Self::Config(_) | Self::Workspace { .. } => IssueKind::Run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssueKind {
    Geometry,
    ToleranceAmbiguity,
    ChainMergeConflict,
    ConnectivityFragmentation,
    BatchProcessingFailure,
    /// Record dropped for being below a minimum length.
    BelowMinimumLength,
    /// Duplicate (overlapping) edge folded into another one.
    DuplicateEdge,
    /// Input repaired in place (e.g. non-finite elevation).
    Repaired,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Preprocess,
    Detect,
    Split,
    Bridge,
    Topology,
    Consolidate,
    Validate,
}

/// One auditable entry in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub phase: Phase,
    pub kind: IssueKind,
    /// Identifier of the affected record (trail id, segment id, node/edge id).
    pub subject: String,
    pub message: String,
    /// Whether the subject was excluded from the output.
    pub excluded: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IssueLog {
    issues: Vec<Issue>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an excluded record, logging it with its context.
    pub fn exclude(&mut self, phase: Phase, kind: IssueKind, subject: impl Into<String>, message: impl Into<String>) {
        self.push(phase, kind, subject.into(), message.into(), true);
    }

    /// Record something flagged for audit that did not remove the subject.
    pub fn flag(&mut self, phase: Phase, kind: IssueKind, subject: impl Into<String>, message: impl Into<String>) {
        self.push(phase, kind, subject.into(), message.into(), false);
    }

    pub fn record_error(&mut self, phase: Phase, subject: impl Into<String>, err: &GraphBuildError, excluded: bool) {
        self.push(phase, err.kind(), subject.into(), err.to_string(), excluded);
    }

    fn push(&mut self, phase: Phase, kind: IssueKind, subject: String, message: String, excluded: bool) {
        warn!(?phase, ?kind, %subject, excluded, "{}", message);
        self.issues.push(Issue {
            phase,
            kind,
            subject,
            message,
            excluded,
        });
    }

    pub fn extend(&mut self, other: IssueLog) {
        self.issues.extend(other.issues);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn excluded_subjects(&self, phase: Phase) -> Vec<&str> {
        self.issues
            .iter()
            .filter(|i| i.excluded && i.phase == phase)
            .map(|i| i.subject.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn into_vec(self) -> Vec<Issue> {
        self.issues
    }
}
