// dbbackup/src/backup/db_dump.rs
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};
use which::which;

use crate::config::{BackupTarget, DbEngine, DumpTools};
use crate::errors::DumpError;

/// Produces a logical dump of one database into a local file.
#[async_trait]
pub trait DatabaseDumper: Send + Sync {
    async fn dump(
        &self,
        target: &BackupTarget,
        database: &str,
        output_path: &Path,
    ) -> Result<(), DumpError>;
}

/// A fully resolved invocation of a dump tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

/// Runs `pg_dump` / `mysqldump` as child processes.
pub struct CommandDumper {
    tools: DumpTools,
}

impl CommandDumper {
    pub fn new(tools: DumpTools) -> Self {
        CommandDumper { tools }
    }

    /// Builds the command line for `target.engine`.
    pub fn build_command(&self, target: &BackupTarget, database: &str) -> DumpCommand {
        match target.engine {
            DbEngine::PostgreSql => postgres_command(&self.tools.pg_dump, target, database),
            DbEngine::MySql => mysql_command(
                &self.tools.mysqldump,
                target,
                database,
                self.tools.mysql_password_via_env,
            ),
        }
    }
}

/// `pg_dump` in custom archive format at maximum compression.
/// The password travels in `PGPASSWORD`, never on the command line.
pub fn postgres_command(program: &str, target: &BackupTarget, database: &str) -> DumpCommand {
    DumpCommand {
        program: program.to_string(),
        args: vec![
            "-h".to_string(),
            target.host.clone(),
            "-p".to_string(),
            target.port.to_string(),
            "-U".to_string(),
            target.username.clone(),
            "-d".to_string(),
            database.to_string(),
            "--verbose".to_string(),
            "--no-password".to_string(),
            "--format=custom".to_string(),
            "--compress=9".to_string(),
        ],
        envs: vec![("PGPASSWORD".to_string(), target.password.clone())],
    }
}

/// `mysqldump` producing a consistent plain SQL snapshot including routines,
/// triggers and events. With `password_via_env` the password is handed over
/// in `MYSQL_PWD`; otherwise it is passed as `--password=`, which makes it
/// visible in the process list.
pub fn mysql_command(
    program: &str,
    target: &BackupTarget,
    database: &str,
    password_via_env: bool,
) -> DumpCommand {
    let mut args = vec![
        format!("--host={}", target.host),
        format!("--port={}", target.port),
        format!("--user={}", target.username),
    ];
    let mut envs = Vec::new();
    if password_via_env {
        envs.push(("MYSQL_PWD".to_string(), target.password.clone()));
    } else {
        args.push(format!("--password={}", target.password));
    }
    args.extend(
        [
            "--single-transaction",
            "--routines",
            "--triggers",
            "--events",
            "--hex-blob",
            "--opt",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(database.to_string());

    DumpCommand {
        program: program.to_string(),
        args,
        envs,
    }
}

fn find_executable(program: &str) -> Result<PathBuf, DumpError> {
    which(program).map_err(|e| DumpError::LaunchFailed {
        tool: program.to_string(),
        reason: format!(
            "executable not found in PATH ({}). Please ensure the database client tools are installed.",
            e
        ),
    })
}

/// Executes `command`, streaming stdout into `output_path` and collecting
/// stderr for the error report.
pub async fn run_dump_command(
    command: &DumpCommand,
    output_path: &Path,
) -> Result<(), DumpError> {
    let executable = find_executable(&command.program)?;

    let output_file = File::create(output_path).map_err(DumpError::Output)?;

    // spawn() rather than output(): output() would replace the file redirect with a pipe.
    let child = Command::new(&executable)
        .args(&command.args)
        .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(output_file))
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DumpError::LaunchFailed {
            tool: command.program.clone(),
            reason: e.to_string(),
        })?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| wait_failed(&command.program, e))?;

    if !output.status.success() {
        return Err(DumpError::ToolFailed {
            tool: command.program.clone(),
            exit_code: output.status.code(),
            diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

// The tool is already running at this point, so this is not a launch failure.
fn wait_failed(program: &str, err: std::io::Error) -> DumpError {
    DumpError::WaitFailed {
        tool: program.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl DatabaseDumper for CommandDumper {
    async fn dump(
        &self,
        target: &BackupTarget,
        database: &str,
        output_path: &Path,
    ) -> Result<(), DumpError> {
        let command = self.build_command(target, database);

        info!(
            engine = %target.engine,
            database,
            tool = %command.program,
            "Creating dump for database {}",
            database
        );

        match run_dump_command(&command, output_path).await {
            Ok(()) => {
                info!(
                    engine = %target.engine,
                    database,
                    path = %output_path.display(),
                    "Dump created successfully"
                );
                Ok(())
            }
            Err(e) => {
                error!(engine = %target.engine, database, error = %e, "Dump failed");
                Err(e)
            }
        }
    }
}
