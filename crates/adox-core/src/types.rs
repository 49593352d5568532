//! Record types returned by the remote build service
//!
//! Field names follow the Azure DevOps REST payloads (camelCase on the wire).
//! Unknown enum values deserialize to `Unknown` so new upstream states never
//! break a listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a sub-resource under a parent scope (a pool, or a queue bound to a pool)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedResourceRef {
    /// Parent scope (organization or project name)
    pub scope_id: String,
    pub resource_id: i64,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<Box<ScopedResourceRef>>,
}

impl ScopedResourceRef {
    pub fn new(scope_id: impl Into<String>, resource_id: i64, resource_name: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            resource_id,
            resource_name: resource_name.into(),
            parent_ref: None,
        }
    }

    pub fn with_parent(mut self, parent: ScopedResourceRef) -> Self {
        self.parent_ref = Some(Box::new(parent));
        self
    }
}

impl fmt::Display for ScopedResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.resource_name, self.resource_id)
    }
}

/// Reference to another resource embedded in a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLink {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

// ===== Agent pools, agents, queues =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPool {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_hosted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Invalid agent status: {}. Use online or offline.", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub status: AgentStatus,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_description: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQueue {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Pool backing this queue; several queues may share one pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<ResourceLink>,
}

// ===== Builds =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    None,
    NotStarted,
    InProgress,
    Cancelling,
    Postponed,
    Completed,
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    /// Wire name used in query strings
    pub fn api_name(&self) -> &'static str {
        match self {
            BuildStatus::None => "none",
            BuildStatus::NotStarted => "notStarted",
            BuildStatus::InProgress => "inProgress",
            BuildStatus::Cancelling => "cancelling",
            BuildStatus::Postponed => "postponed",
            BuildStatus::Completed => "completed",
            BuildStatus::Unknown => "all",
        }
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(BuildStatus::None),
            "notstarted" => Ok(BuildStatus::NotStarted),
            "inprogress" => Ok(BuildStatus::InProgress),
            "cancelling" => Ok(BuildStatus::Cancelling),
            "postponed" => Ok(BuildStatus::Postponed),
            "completed" => Ok(BuildStatus::Completed),
            _ => Err(format!("Invalid build status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildResult {
    None,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl BuildResult {
    pub fn api_name(&self) -> &'static str {
        match self {
            BuildResult::None => "none",
            BuildResult::Succeeded => "succeeded",
            BuildResult::PartiallySucceeded => "partiallySucceeded",
            BuildResult::Failed => "failed",
            BuildResult::Canceled => "canceled",
            BuildResult::Unknown => "none",
        }
    }
}

impl FromStr for BuildResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(BuildResult::None),
            "succeeded" => Ok(BuildResult::Succeeded),
            "partiallysucceeded" => Ok(BuildResult::PartiallySucceeded),
            "failed" => Ok(BuildResult::Failed),
            "canceled" | "cancelled" => Ok(BuildResult::Canceled),
            _ => Err(format!("Invalid build result: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: i64,
    #[serde(default)]
    pub build_number: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<ResourceLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
}

/// Server-side filters accepted by the build listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildQuery {
    pub definition_id: Option<i64>,
    pub status: Option<BuildStatus>,
    pub result: Option<BuildResult>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimelineRecordState {
    Pending,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TimelineRecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineRecordState::Pending => write!(f, "pending"),
            TimelineRecordState::InProgress => write!(f, "inProgress"),
            TimelineRecordState::Completed => write!(f, "completed"),
            TimelineRecordState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogReference {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One entry of a build timeline (stage, phase, job or task)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub state: TimelineRecordState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

impl TimelineRecord {
    pub fn is_job(&self) -> bool {
        self.record_type.eq_ignore_ascii_case("job")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResource {
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    pub id: i64,
    pub name: String,
    pub resource: ArtifactResource,
}

// ===== Pipelines =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedContent {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineArtifact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_content: Option<SignedContent>,
}

// ===== Downloads =====

/// A completed download on the local filesystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDescriptor {
    pub saved_path: String,
    pub byte_size: u64,
    /// Identity of the remote payload, e.g. `build 42 / job Build`
    pub source_identity: String,
    /// Final file name written (derived or caller-supplied)
    pub derived_name: String,
    /// Elapsed seconds of the originating job, from its own timestamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_parsing() {
        assert_eq!("Online".parse::<AgentStatus>().unwrap(), AgentStatus::Online);
        assert_eq!("offline".parse::<AgentStatus>().unwrap(), AgentStatus::Offline);
        assert!("busy".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_unknown_enum_values_deserialize() {
        let agent: Agent =
            serde_json::from_str(r#"{"id":1,"name":"a","status":"draining"}"#).unwrap();
        assert_eq!(agent.status, AgentStatus::Unknown);
        assert!(agent.enabled);
    }

    #[test]
    fn test_build_status_parse_and_wire_name() {
        let status: BuildStatus = "in_progress".parse().unwrap();
        assert_eq!(status, BuildStatus::InProgress);
        assert_eq!(status.api_name(), "inProgress");
        assert_eq!("cancelled".parse::<BuildResult>().unwrap(), BuildResult::Canceled);
    }

    #[test]
    fn test_timeline_record_deserialize() {
        let json = r#"{
            "id": "7f1c",
            "type": "Job",
            "name": "Build",
            "state": "completed",
            "result": "succeeded",
            "startTime": "2024-05-01T10:00:00Z",
            "finishTime": "2024-05-01T10:02:30Z",
            "log": {"id": 12, "url": "https://example/logs/12"}
        }"#;
        let record: TimelineRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_job());
        assert_eq!(record.state, TimelineRecordState::Completed);
        assert_eq!(record.log.unwrap().id, 12);
    }

    #[test]
    fn test_scoped_ref_display() {
        let pool = ScopedResourceRef::new("org", 3, "Linux");
        let queue = ScopedResourceRef::new("proj", 9, "Linux queue").with_parent(pool);
        assert_eq!(queue.to_string(), "Linux queue (9)");
        assert_eq!(queue.parent_ref.unwrap().resource_id, 3);
    }
}
