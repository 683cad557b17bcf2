pub(crate) mod artifact; // Scoped temporary dump files
pub(crate) mod db_dump; // pg_dump / mysqldump invocation
pub(crate) mod logic; // Per-database job state machine
pub(crate) mod s3_upload; // Object storage upload

use tracing::info;

pub use logic::BackupOrchestrator;

/// Outcome of a whole run, in input order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl RunSummary {
    pub fn record(&mut self, database: &str, success: bool) {
        if success {
            self.succeeded.push(database.to_string());
        } else {
            self.failed.push(database.to_string());
        }
    }

    /// Process exit status: 0 when nothing failed, 1 otherwise.
    pub fn exit_status(&self) -> u8 {
        if self.failed.is_empty() { 0 } else { 1 }
    }

    pub fn log(&self) {
        info!("Backup Summary:");
        info!(
            "  Successful: {} - {:?}",
            self.succeeded.len(),
            self.succeeded
        );
        info!("  Failed: {} - {:?}", self.failed.len(), self.failed);
    }
}

/// Backs up `databases` one after another and returns the aggregated outcome.
/// A failing database never stops the remaining ones.
pub async fn run_backup_flow(
    orchestrator: &BackupOrchestrator,
    databases: &[String],
) -> RunSummary {
    info!("Databases to backup: {:?}", databases);

    let mut summary = RunSummary::default();
    for database in databases {
        let success = orchestrator.run_job(database).await;
        summary.record(database, success);
    }

    summary.log();
    summary
}
