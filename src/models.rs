use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Step of the generation state machine.
///
/// `Pending → Designing → Scaffolding → Coding → Database → Finalizing → Complete`,
/// with `Failed` reachable from any stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Designing,
    Scaffolding,
    Coding,
    Database,
    Finalizing,
    Complete,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Pending,
        Stage::Designing,
        Stage::Scaffolding,
        Stage::Coding,
        Stage::Database,
        Stage::Finalizing,
        Stage::Complete,
        Stage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Designing => "designing",
            Self::Scaffolding => "scaffolding",
            Self::Coding => "coding",
            Self::Database => "database",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "designing" => Ok(Self::Designing),
            "scaffolding" => Ok(Self::Scaffolding),
            "coding" => Ok(Self::Coding),
            "database" => Ok(Self::Database),
            "finalizing" => Ok(Self::Finalizing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Generating,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Error recorded when the generator itself reports failure via a marker.
pub const MARKER_FAILURE: &str = "Generator reported failure";

/// Partial update of a job record. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
}

impl JobUpdate {
    pub fn stage(stage: Stage) -> Self {
        Self {
            current_stage: Some(stage),
            ..Default::default()
        }
    }

    /// Write for a stage marker seen in generator output. `complete` and
    /// `failed` markers also carry the matching status.
    pub fn marker(stage: Stage) -> Self {
        match stage {
            Stage::Complete => Self {
                status: Some(JobStatus::Complete),
                current_stage: Some(stage),
                ..Default::default()
            },
            Stage::Failed => Self {
                status: Some(JobStatus::Failed),
                current_stage: Some(stage),
                error: Some(MARKER_FAILURE.to_string()),
                ..Default::default()
            },
            _ => Self::stage(stage),
        }
    }

    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            current_detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// The first write of a job: mark it generating and record its workspace.
    pub fn generating(workspace_path: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Generating),
            workspace_path: Some(workspace_path.into()),
            ..Default::default()
        }
    }

    pub fn complete(metadata: &AppMetadata) -> Self {
        Self {
            status: Some(JobStatus::Complete),
            current_stage: Some(Stage::Complete),
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            ..Default::default()
        }
    }

    /// Terminal failure. The stage is left at its last persisted value.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub prompt: String,
    pub status: JobStatus,
    pub current_stage: Stage,
    pub current_detail: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub error: Option<String>,
    pub workspace_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Lightweight metadata describing a generated app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
