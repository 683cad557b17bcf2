use thiserror::Error;

/// Failures of a single dump tool invocation.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to launch {tool}: {reason}")]
    LaunchFailed { tool: String, reason: String },

    #[error("{tool} exited with {}: {diagnostic}", exit_label(.exit_code))]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("{tool} started but could not be awaited: {reason}")]
    WaitFailed { tool: String, reason: String },

    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(String),

    #[error("Failed to open dump output file: {0}")]
    Output(#[source] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Failures while storing a dump in object storage.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Transfer to {bucket}/{key} failed: {reason}")]
    TransferFailed {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Metadata update on {bucket}/{key} failed: {reason}")]
    MetadataUpdateFailed {
        bucket: String,
        key: String,
        reason: String,
    },
}

/// Anything that ends a backup job in the failed state.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Dump failed: {0}")]
    Dump(#[from] DumpError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Unexpected(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failed_message() {
        let err = DumpError::ToolFailed {
            tool: "pg_dump".into(),
            exit_code: Some(1),
            diagnostic: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "pg_dump exited with code 1: connection refused");

        let killed = DumpError::ToolFailed {
            tool: "mysqldump".into(),
            exit_code: None,
            diagnostic: String::new(),
        };
        assert!(killed.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_unexpected_keeps_context_chain() {
        let err: JobError = anyhow::anyhow!("disk full")
            .context("Failed to create temporary file")
            .into();
        assert_eq!(
            err.to_string(),
            "Unexpected error: Failed to create temporary file: disk full"
        );
    }
}
