// dbbackup/src/backup/logic.rs
use chrono::{DateTime, Datelike, TimeZone};
use humansize::{DECIMAL, format_size};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::artifact::TempArtifact;
use super::db_dump::DatabaseDumper;
use super::s3_upload::ObjectUploader;
use crate::config::BackupTarget;
use crate::errors::JobError;

/// Root prefix of every object written by this tool.
pub const REMOTE_PREFIX: &str = "database-backups";

/// Metadata key holding the run timestamp on every stored object.
pub const BACKUP_TIMESTAMP_KEY: &str = "backup_timestamp";

/// Start time of a run, shared by all of its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTimestamp {
    pub year: i32,
    pub month: u32,
    /// `YYYYMMDD_HHMMSS`
    pub stamp: String,
}

impl RunTimestamp {
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        RunTimestamp {
            year: at.year(),
            month: at.month(),
            stamp: at.format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(&chrono::Local::now())
    }
}

/// `database-backups/{host}/{year}/{month}/{database}_{timestamp}.sql`.
/// The month is not zero padded.
pub fn remote_object_key(host: &str, database: &str, run: &RunTimestamp) -> String {
    format!(
        "{}/{}/{}/{}/{}_{}.sql",
        REMOTE_PREFIX, host, run.year, run.month, database, run.stamp
    )
}

/// Progress of a single job. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Staged,
    Dumped,
    Uploaded,
    Done,
    Failed,
}

/// Backs up one database at a time: stage, dump, upload, clean up.
pub struct BackupOrchestrator {
    target: BackupTarget,
    bucket: String,
    temp_dir: Option<PathBuf>,
    run: RunTimestamp,
    dumper: Box<dyn DatabaseDumper>,
    uploader: Box<dyn ObjectUploader>,
}

impl BackupOrchestrator {
    pub fn new(
        target: BackupTarget,
        bucket: String,
        temp_dir: Option<PathBuf>,
        run: RunTimestamp,
        dumper: Box<dyn DatabaseDumper>,
        uploader: Box<dyn ObjectUploader>,
    ) -> Self {
        BackupOrchestrator {
            target,
            bucket,
            temp_dir,
            run,
            dumper,
            uploader,
        }
    }

    pub fn run_timestamp(&self) -> &RunTimestamp {
        &self.run
    }

    /// Runs one job to a terminal state. Every failure is logged here; the
    /// return value is `true` only when the job reached `Done`.
    pub async fn run_job(&self, database: &str) -> bool {
        info!(
            "Starting backup for {} database: {}",
            self.target.engine, database
        );

        let mut state = JobState::Staged;
        match self.execute(database, &mut state).await {
            Ok(()) => state == JobState::Done,
            Err(e) => {
                error!(
                    database,
                    last_state = ?state,
                    error = %e,
                    "Backup failed for {}",
                    database
                );
                false
            }
        }
    }

    async fn execute(&self, database: &str, state: &mut JobState) -> Result<(), JobError> {
        let mut artifact =
            TempArtifact::stage(self.temp_dir.as_deref(), database, &self.run.stamp)?;

        let outcome = self.advance(database, &artifact, state).await;
        if outcome.is_err() {
            *state = JobState::Failed;
        }

        // The guard would also clean up on drop; releasing here lets us log it.
        if let Err(e) = artifact.release() {
            warn!(
                path = %artifact.path().display(),
                error = %e,
                "Failed to remove temporary dump file"
            );
        }
        outcome
    }

    async fn advance(
        &self,
        database: &str,
        artifact: &TempArtifact,
        state: &mut JobState,
    ) -> Result<(), JobError> {
        self.dumper
            .dump(&self.target, database, artifact.path())
            .await?;
        *state = JobState::Dumped;

        let key = remote_object_key(&self.target.host, database, &self.run);
        let metadata = HashMap::from([(BACKUP_TIMESTAMP_KEY.to_string(), self.run.stamp.clone())]);
        self.uploader
            .upload(artifact.path(), &self.bucket, &key, &metadata)
            .await?;
        *state = JobState::Uploaded;

        let size = artifact.size().await?;
        *state = JobState::Done;
        info!(
            "Backup completed for {}. File size: {} bytes ({})",
            database,
            size,
            format_size(size, DECIMAL)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::{FakeDumper, FakeUploader, fixed_run, orchestrator, target};
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_remote_object_key_layout() {
        let run = RunTimestamp {
            year: 2024,
            month: 1,
            stamp: "20240115_093000".into(),
        };
        assert_eq!(
            remote_object_key("db1.example.com", "orders", &run),
            "database-backups/db1.example.com/2024/1/orders_20240115_093000.sql"
        );
    }

    #[test]
    fn test_run_timestamp_from_datetime() {
        let at = NaiveDate::from_ymd_opt(2024, 11, 5)
            .unwrap()
            .and_hms_opt(7, 3, 9)
            .unwrap()
            .and_local_timezone(Utc)
            .unwrap();
        let run = RunTimestamp::from_datetime(&at);

        assert_eq!(run.year, 2024);
        assert_eq!(run.month, 11);
        assert_eq!(run.stamp, "20241105_070309");
    }

    #[tokio::test]
    async fn test_successful_job_uploads_with_metadata_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dumper = FakeDumper::succeeding();
        let uploader = FakeUploader::succeeding();
        let orch = orchestrator(dir.path(), dumper.clone(), uploader.clone());

        assert!(orch.run_job("orders").await);

        let uploads = uploader.calls();
        assert_eq!(uploads.len(), 1);
        let call = &uploads[0];
        assert_eq!(call.bucket, "my-backups");
        assert_eq!(
            call.key,
            "database-backups/db1.example.com/2024/1/orders_20240115_093000.sql"
        );
        assert_eq!(
            call.metadata.get(BACKUP_TIMESTAMP_KEY).map(String::as_str),
            Some("20240115_093000")
        );
        assert!(call.file_existed);
        assert_eq!(call.contents, b"dump of orders".to_vec());

        for path in dumper.paths() {
            assert!(!path.exists());
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dump_failure_skips_upload_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dumper = FakeDumper::failing_for(&["orders"]);
        let uploader = FakeUploader::succeeding();
        let orch = orchestrator(dir.path(), dumper.clone(), uploader.clone());

        assert!(!orch.run_job("orders").await);

        assert!(uploader.calls().is_empty());
        assert_eq!(dumper.paths().len(), 1);
        assert!(!dumper.paths()[0].exists());
    }

    #[tokio::test]
    async fn test_upload_failure_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dumper = FakeDumper::succeeding();
        let uploader = FakeUploader::failing_transfer();
        let orch = orchestrator(dir.path(), dumper.clone(), uploader.clone());

        assert!(!orch.run_job("orders").await);

        assert_eq!(uploader.calls().len(), 1);
        assert!(!dumper.paths()[0].exists());
    }

    #[tokio::test]
    async fn test_metadata_failure_fails_job() {
        let dir = TempDir::new().unwrap();
        let dumper = FakeDumper::succeeding();
        let uploader = FakeUploader::failing_metadata();
        let orch = orchestrator(dir.path(), dumper.clone(), uploader.clone());

        assert!(!orch.run_job("orders").await);
        assert!(!dumper.paths()[0].exists());
    }

    #[tokio::test]
    async fn test_missing_temp_dir_fails_without_dumping() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let dumper = FakeDumper::succeeding();
        let uploader = FakeUploader::succeeding();
        let orch = BackupOrchestrator::new(
            target(),
            "my-backups".into(),
            Some(missing),
            fixed_run(),
            Box::new(dumper.clone()),
            Box::new(uploader.clone()),
        );

        assert!(!orch.run_job("orders").await);
        assert!(dumper.paths().is_empty());
        assert!(uploader.calls().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_in_same_run_use_distinct_artifacts() {
        let dir = TempDir::new().unwrap();
        let dumper = FakeDumper::succeeding();
        let uploader = FakeUploader::succeeding();
        let orch = orchestrator(dir.path(), dumper.clone(), uploader.clone());

        assert!(orch.run_job("orders").await);
        assert!(orch.run_job("orders").await);

        let paths = dumper.paths();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
    }
}
