//! Streaming downloads of logs and artifacts
//!
//! Order of work for every download:
//! 1. resolve the output path (stat only, nothing created)
//! 2. check payload readiness and open the remote stream
//! 3. create the directory, then pipe the stream to disk chunk by chunk
//! 4. stat the written file and describe it
//!
//! A precondition failure in step 2 leaves the filesystem untouched. A failure
//! while streaming in step 3 leaves the partial file in place and reports its
//! path; a file that could not be created is reported as such.

use adox_client::{ByteStream, Connection};
use adox_core::{AdoxError, DownloadDescriptor, Result, TimelineRecord, TimelineRecordState};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Where a download should land
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Write a derived file name inside this directory
    Directory(PathBuf),
    /// Write exactly this file
    File(PathBuf),
}

/// Classify an output path as a directory or a file target
///
/// A trailing separator or an existing directory means directory.
pub async fn resolve_target(output_path: &str) -> OutputTarget {
    let path = PathBuf::from(output_path);
    let trailing_separator =
        output_path.ends_with('/') || output_path.ends_with(std::path::MAIN_SEPARATOR);

    if trailing_separator {
        return OutputTarget::Directory(path);
    }

    match fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => OutputTarget::Directory(path),
        _ => OutputTarget::File(path),
    }
}

/// Replace every character that is not ASCII alphanumeric with `-`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// `{sanitized-name}-{identity}-{YYYYMMDD-HHMMSS}.{ext}`
pub fn derive_file_name(
    resource_name: &str,
    identity: &str,
    at: DateTime<Utc>,
    extension: &str,
) -> String {
    format!(
        "{}-{}-{}.{}",
        sanitize_name(resource_name),
        sanitize_name(identity),
        at.format("%Y%m%d-%H%M%S"),
        extension
    )
}

/// Append `.{extension}` unless the path already ends with it (case-insensitive)
pub fn ensure_extension(path: PathBuf, extension: &str) -> PathBuf {
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(extension));

    if has_extension {
        return path;
    }

    let mut raw = path.into_os_string();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

/// What is being downloaded, for naming and reporting
#[derive(Debug, Clone)]
pub struct PayloadSpec {
    /// Human name used in derived file names (job or artifact name)
    pub resource_name: String,
    /// Stable identity used in derived file names (build or run id)
    pub identity: String,
    /// Full description reported back to the caller
    pub source_identity: String,
    pub extension: &'static str,
    /// Enforce `extension` on caller-supplied file paths too
    pub force_extension: bool,
    pub duration_secs: Option<i64>,
}

impl PayloadSpec {
    /// Final path for this payload under `target`
    pub fn final_path(&self, target: &OutputTarget, at: DateTime<Utc>) -> PathBuf {
        match target {
            OutputTarget::Directory(dir) => dir.join(derive_file_name(
                &self.resource_name,
                &self.identity,
                at,
                self.extension,
            )),
            OutputTarget::File(file) if self.force_extension => {
                ensure_extension(file.clone(), self.extension)
            }
            OutputTarget::File(file) => file.clone(),
        }
    }
}

/// Pipe an opened remote stream to disk and describe the result
pub async fn save_stream(
    stream: ByteStream,
    target: &OutputTarget,
    spec: &PayloadSpec,
    at: DateTime<Utc>,
) -> Result<DownloadDescriptor> {
    let path = spec.final_path(target, at);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| {
            AdoxError::Other(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    debug!("Streaming {} to {}", spec.source_identity, path.display());

    let file = fs::File::create(&path).await.map_err(|e| {
        AdoxError::Other(format!("Failed to create {}: {}", path.display(), e))
    })?;

    let written = match pipe(stream, file).await {
        Ok(written) => written,
        Err(e) => {
            warn!(
                "Download of {} interrupted, partial file left at {}: {}",
                spec.source_identity,
                path.display(),
                e
            );
            return Err(AdoxError::Other(format!(
                "Download of {} interrupted; partial file left at {}: {}",
                spec.source_identity,
                path.display(),
                e.raw_message()
            )));
        }
    };

    let byte_size = fs::metadata(&path).await?.len();
    if byte_size != written {
        debug!(
            "Size on disk ({}) differs from bytes streamed ({}) for {}",
            byte_size,
            written,
            path.display()
        );
    }

    info!(
        "Saved {} ({} bytes) to {}",
        spec.source_identity,
        byte_size,
        path.display()
    );

    Ok(DownloadDescriptor {
        saved_path: path.display().to_string(),
        byte_size,
        source_identity: spec.source_identity.clone(),
        derived_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        duration_secs: spec.duration_secs,
    })
}

async fn pipe(mut stream: ByteStream, mut file: fs::File) -> Result<u64> {
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// Which job's log to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    /// Timeline record id
    Id(String),
    /// Job display name, case-insensitive
    Name(String),
}

impl std::fmt::Display for JobSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSelector::Id(id) => write!(f, "job {}", id),
            JobSelector::Name(name) => write!(f, "job '{}'", name),
        }
    }
}

/// Pick the job from a timeline and check its log is ready
///
/// Returns the job and its log id.
pub fn ready_job<'a>(
    records: &'a [TimelineRecord],
    selector: &JobSelector,
    build_id: i64,
) -> Result<(&'a TimelineRecord, i64)> {
    let jobs: Vec<&TimelineRecord> = records.iter().filter(|r| r.is_job()).collect();

    let job = jobs
        .iter()
        .copied()
        .find(|job| match selector {
            JobSelector::Id(id) => job.id.eq_ignore_ascii_case(id),
            JobSelector::Name(name) => job.name.eq_ignore_ascii_case(name),
        })
        .ok_or_else(|| {
            let available: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
            AdoxError::NotFound(format!(
                "No {} in build {}. Available jobs: {}",
                selector,
                build_id,
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ))
        })?;

    if job.state != TimelineRecordState::Completed {
        return Err(AdoxError::NotReady(format!(
            "Job '{}' in build {} has not completed (state: {}); its log is not final yet",
            job.name, build_id, job.state
        )));
    }

    let log = job.log.as_ref().ok_or_else(|| {
        AdoxError::NotFound(format!(
            "Job '{}' in build {} has no log",
            job.name, build_id
        ))
    })?;

    Ok((job, log.id))
}

/// Elapsed seconds between a record's start and finish
pub fn job_duration_secs(job: &TimelineRecord) -> Option<i64> {
    match (job.start_time, job.finish_time) {
        (Some(start), Some(finish)) if finish >= start => Some((finish - start).num_seconds()),
        _ => None,
    }
}

/// Downloads payloads through the connection's sub-clients
pub struct StreamingDownloader<'a> {
    connection: &'a Connection,
}

impl<'a> StreamingDownloader<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Download the log of one completed job
    pub async fn job_log(
        &self,
        project: &str,
        build_id: i64,
        selector: &JobSelector,
        output_path: &str,
    ) -> Result<DownloadDescriptor> {
        let target = resolve_target(output_path).await;

        let builds = self.connection.builds();
        let build = builds.get_build(project, build_id).await?;
        let records = builds.get_timeline(project, build_id).await?;
        let (job, log_id) = ready_job(&records, selector, build_id)?;

        let spec = PayloadSpec {
            resource_name: job.name.clone(),
            identity: build_id.to_string(),
            source_identity: if build.build_number.is_empty() {
                format!("build {} / job {}", build_id, job.name)
            } else {
                format!(
                    "build {} ({}) / job {}",
                    build_id, build.build_number, job.name
                )
            },
            extension: "log",
            force_extension: false,
            duration_secs: job_duration_secs(job),
        };

        let stream = builds.open_log(project, build_id, log_id).await?;

        save_stream(stream, &target, &spec, Utc::now()).await
    }

    /// Download a build artifact as a zip archive
    pub async fn build_artifact(
        &self,
        project: &str,
        build_id: i64,
        artifact_name: &str,
        output_path: &str,
    ) -> Result<DownloadDescriptor> {
        let target = resolve_target(output_path).await;

        let artifacts = self
            .connection
            .builds()
            .list_artifacts(project, build_id)
            .await?;

        let artifact = artifacts
            .iter()
            .find(|a| a.name == artifact_name)
            .ok_or_else(|| {
                let available: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
                AdoxError::NotFound(format!(
                    "Artifact '{}' not found in build {}. Available artifacts: {}",
                    artifact_name,
                    build_id,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ))
            })?;

        let url = artifact.resource.download_url.as_deref().ok_or_else(|| {
            AdoxError::NotFound(format!(
                "Artifact '{}' in build {} has no download URL",
                artifact_name, build_id
            ))
        })?;

        let spec = PayloadSpec {
            resource_name: artifact.name.clone(),
            identity: build_id.to_string(),
            source_identity: format!("build {} / artifact {}", build_id, artifact.name),
            extension: "zip",
            force_extension: true,
            duration_secs: None,
        };

        let stream = self.connection.builds().open_url(url).await?;
        save_stream(stream, &target, &spec, Utc::now()).await
    }

    /// Download a pipeline run artifact through its signed URL
    pub async fn pipeline_artifact(
        &self,
        project: &str,
        pipeline_id: i64,
        run_id: i64,
        artifact_name: &str,
        output_path: &str,
    ) -> Result<DownloadDescriptor> {
        let target = resolve_target(output_path).await;

        let artifact = self
            .connection
            .pipelines()
            .get_run_artifact(project, pipeline_id, run_id, artifact_name)
            .await?;

        let signed = artifact.signed_content.as_ref().ok_or_else(|| {
            AdoxError::NotReady(format!(
                "No signed download URL was issued for artifact '{}' of run {}",
                artifact_name, run_id
            ))
        })?;

        if let Some(expires) = signed.signature_expires {
            if expires <= Utc::now() {
                return Err(AdoxError::NotReady(format!(
                    "Signed URL for artifact '{}' of run {} expired at {}",
                    artifact_name, run_id, expires
                )));
            }
        }

        let spec = PayloadSpec {
            resource_name: artifact.name.clone(),
            identity: run_id.to_string(),
            source_identity: format!(
                "pipeline {} / run {} / artifact {}",
                pipeline_id, run_id, artifact.name
            ),
            extension: "zip",
            force_extension: true,
            duration_secs: None,
        };

        let stream = self
            .connection
            .pipelines()
            .open_signed_url(&signed.url)
            .await?;
        save_stream(stream, &target, &spec, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adox_client::MockDevOpsApi;
    use chrono::TimeZone;
    use futures::stream;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job(name: &str, state: TimelineRecordState, log: Option<i64>) -> TimelineRecord {
        TimelineRecord {
            id: format!("id-{}", name),
            parent_id: None,
            record_type: "Job".to_string(),
            name: name.to_string(),
            state,
            result: None,
            start_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
            finish_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 2, 30).unwrap()),
            log: log.map(|id| adox_core::LogReference { id, url: None }),
            worker_name: None,
        }
    }

    fn build(id: i64) -> adox_core::Build {
        adox_core::Build {
            id,
            build_number: format!("20240501.{}", id),
            status: adox_core::BuildStatus::InProgress,
            result: None,
            definition: None,
            source_branch: None,
            queue_time: None,
            start_time: None,
            finish_time: None,
        }
    }

    fn spec() -> PayloadSpec {
        PayloadSpec {
            resource_name: "Build & Test".to_string(),
            identity: "42".to_string(),
            source_identity: "build 42 / job Build & Test".to_string(),
            extension: "log",
            force_extension: false,
            duration_secs: Some(150),
        }
    }

    fn bytes_stream(parts: Vec<&'static [u8]>) -> ByteStream {
        stream::iter(parts.into_iter().map(|p| Ok(bytes::Bytes::from_static(p)))).boxed()
    }

    #[test]
    fn test_sanitize_and_derive_name() {
        assert_eq!(sanitize_name("Build & Test/linux"), "Build---Test-linux");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();
        assert_eq!(
            derive_file_name("drop", "42", at, "zip"),
            "drop-42-20240501-090807.zip"
        );
    }

    #[test]
    fn test_ensure_extension() {
        assert_eq!(
            ensure_extension(PathBuf::from("out/drop"), "zip"),
            PathBuf::from("out/drop.zip")
        );
        assert_eq!(
            ensure_extension(PathBuf::from("out/drop.ZIP"), "zip"),
            PathBuf::from("out/drop.ZIP")
        );
        assert_eq!(
            ensure_extension(PathBuf::from("out/drop.tar"), "zip"),
            PathBuf::from("out/drop.tar.zip")
        );
    }

    #[tokio::test]
    async fn test_resolve_target_variants() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().display().to_string();

        let trailing = format!("{}/out/", base);
        assert!(matches!(
            resolve_target(&trailing).await,
            OutputTarget::Directory(_)
        ));

        let file = format!("{}/out/report.log", base);
        assert_eq!(
            resolve_target(&file).await,
            OutputTarget::File(PathBuf::from(&file))
        );

        // Existing directory without a trailing separator
        assert_eq!(
            resolve_target(&base).await,
            OutputTarget::Directory(PathBuf::from(&base))
        );
    }

    #[tokio::test]
    async fn test_save_stream_into_directory() {
        let temp = TempDir::new().unwrap();
        let target = OutputTarget::Directory(temp.path().join("nested/logs"));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();

        let descriptor = save_stream(bytes_stream(vec![b"line 1\n", b"line 2\n"]), &target, &spec(), at)
            .await
            .unwrap();

        assert_eq!(descriptor.derived_name, "Build---Test-42-20240501-090807.log");
        assert_eq!(descriptor.byte_size, 14);
        assert_eq!(descriptor.duration_secs, Some(150));
        let content = std::fs::read(&descriptor.saved_path).unwrap();
        assert_eq!(content, b"line 1\nline 2\n");
    }

    #[tokio::test]
    async fn test_save_stream_to_exact_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out/report.log");
        let target = OutputTarget::File(path.clone());

        let descriptor = save_stream(bytes_stream(vec![b"abc"]), &target, &spec(), Utc::now())
            .await
            .unwrap();
        assert_eq!(PathBuf::from(&descriptor.saved_path), path);
        assert_eq!(descriptor.derived_name, "report.log");
        assert_eq!(descriptor.byte_size, 3);
    }

    #[tokio::test]
    async fn test_interrupted_stream_leaves_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial.log");
        let target = OutputTarget::File(path.clone());

        let broken: ByteStream = stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"first")),
            Err(AdoxError::Http("connection reset".to_string())),
        ])
        .boxed();

        let err = save_stream(broken, &target, &spec(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("partial file left at"));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_uncreatable_file_is_not_reported_partial() {
        let temp = TempDir::new().unwrap();
        // A directory already sits where the file should go
        let path = temp.path().join("taken.log");
        std::fs::create_dir(&path).unwrap();
        let target = OutputTarget::File(path.clone());

        let err = save_stream(bytes_stream(vec![b"abc"]), &target, &spec(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create"));
        assert!(!err.to_string().contains("partial file left at"));
        assert!(path.is_dir());
    }

    #[test]
    fn test_ready_job_checks() {
        let records = vec![
            job("Build", TimelineRecordState::Completed, Some(7)),
            job("Deploy", TimelineRecordState::InProgress, Some(8)),
            job("Lint", TimelineRecordState::Completed, None),
        ];

        let (found, log_id) =
            ready_job(&records, &JobSelector::Name("build".to_string()), 42).unwrap();
        assert_eq!(found.name, "Build");
        assert_eq!(log_id, 7);
        assert_eq!(job_duration_secs(found), Some(150));

        let by_id = ready_job(&records, &JobSelector::Id("id-Build".to_string()), 42).unwrap();
        assert_eq!(by_id.1, 7);

        let err = ready_job(&records, &JobSelector::Name("Deploy".to_string()), 42).unwrap_err();
        assert!(matches!(err, AdoxError::NotReady(_)));

        let err = ready_job(&records, &JobSelector::Name("Lint".to_string()), 42).unwrap_err();
        assert!(matches!(err, AdoxError::NotFound(_)));

        let err = ready_job(&records, &JobSelector::Name("Nope".to_string()), 42).unwrap_err();
        assert!(err.to_string().contains("Build, Deploy, Lint"));
    }

    #[tokio::test]
    async fn test_pending_job_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        let mock = Arc::new(
            MockDevOpsApi::new()
                .with_builds("proj", vec![build(42)])
                .with_timeline(42, vec![job("Build", TimelineRecordState::InProgress, Some(7))])
                .with_log(42, 7, "partial"),
        );
        let connection = Connection::from_backend(mock.clone());

        let result = StreamingDownloader::new(&connection)
            .job_log(
                "proj",
                42,
                &JobSelector::Name("Build".to_string()),
                &format!("{}/", out_dir.display()),
            )
            .await;

        assert!(matches!(result, Err(AdoxError::NotReady(_))));
        assert!(!out_dir.exists());
        assert_eq!(mock.call_count("log:"), 0);
    }

    #[tokio::test]
    async fn test_unknown_build_skips_timeline() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        let mock = Arc::new(
            MockDevOpsApi::new()
                .with_builds("proj", vec![build(41)])
                .with_timeline(42, vec![job("Build", TimelineRecordState::Completed, Some(7))])
                .with_log(42, 7, "done"),
        );
        let connection = Connection::from_backend(mock.clone());

        let result = StreamingDownloader::new(&connection)
            .job_log(
                "proj",
                42,
                &JobSelector::Name("Build".to_string()),
                &format!("{}/", out_dir.display()),
            )
            .await;

        assert!(matches!(result, Err(AdoxError::NotFound(_))));
        assert_eq!(mock.call_count("build:"), 1);
        assert_eq!(mock.call_count("timeline:"), 0);
        assert!(!out_dir.exists());
    }

    #[tokio::test]
    async fn test_expired_signed_url_is_not_ready() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("drop.zip");
        let mock = Arc::new(MockDevOpsApi::new().with_run_artifact(
            3,
            40,
            adox_core::PipelineArtifact {
                name: "drop".to_string(),
                signed_content: Some(adox_core::SignedContent {
                    url: "https://signed/drop".to_string(),
                    signature_expires: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
                }),
            },
        ));
        let connection = Connection::from_backend(mock);

        let result = StreamingDownloader::new(&connection)
            .pipeline_artifact("proj", 3, 40, "drop", &file.display().to_string())
            .await;
        assert!(matches!(result, Err(AdoxError::NotReady(_))));
        assert!(!file.exists());
    }
}
