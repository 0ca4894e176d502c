use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::NaiveDateTime;
use tokio::process::Command;
use tracing::{debug, info};

use crate::exec::{CommandExecutor, SystemCommandExecutor};
use crate::guide::format_stamp;
use crate::naming::sanitize_title;
use crate::roles::{RecorderKind, Role};

use super::{ScheduleError, ScheduleResult};

const SUBMIT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Fire-once deferred execution of a shell command line.
#[async_trait::async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule_at(&self, at: NaiveDateTime, command_line: &str) -> ScheduleResult<()>;
}

/// Submits jobs through `at -t YYYYMMDDhhmm -f <job file>`.
pub struct AtJobScheduler {
    at_binary: PathBuf,
    spool_dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    timeout: StdDuration,
    sequence: AtomicU64,
}

impl AtJobScheduler {
    pub fn new(
        at_binary: impl Into<PathBuf>,
        spool_dir: impl Into<PathBuf>,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        Self {
            at_binary: at_binary.into(),
            spool_dir: spool_dir.into(),
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
            timeout: SUBMIT_TIMEOUT,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    fn job_file(&self, at: NaiveDateTime) -> PathBuf {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.spool_dir
            .join(format!("job_{}_{}_{n}.sh", format_stamp(at), std::process::id()))
    }
}

#[async_trait::async_trait]
impl JobScheduler for AtJobScheduler {
    async fn schedule_at(&self, at: NaiveDateTime, command_line: &str) -> ScheduleResult<()> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let job_file = self.job_file(at);
        tokio::fs::write(&job_file, format!("{command_line}\n")).await?;

        let stamp = format_stamp(at);
        let mut command = Command::new(&self.at_binary);
        command
            .arg("-t")
            .arg(&stamp)
            .arg("-f")
            .arg(&job_file)
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, self.executor.run(&mut command)).await;
        if let Err(err) = tokio::fs::remove_file(&job_file).await {
            debug!(path = %job_file.display(), error = %err, "job file already gone");
        }

        let output = result.map_err(|_| ScheduleError::Timeout {
            seconds: self.timeout.as_secs(),
        })??;
        if !output.status.success() {
            return Err(ScheduleError::Submission {
                command: command_line.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(at = %stamp, command = %command_line, "job queued");
        Ok(())
    }
}

/// Logs what would be queued without submitting anything.
#[derive(Debug, Default)]
pub struct DryRunScheduler;

#[async_trait::async_trait]
impl JobScheduler for DryRunScheduler {
    async fn schedule_at(&self, at: NaiveDateTime, command_line: &str) -> ScheduleResult<()> {
        info!(at = %format_stamp(at), command = %command_line, "dry run, job not queued");
        Ok(())
    }
}

/// Quotes a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Builds the command lines the OS scheduler runs later.
#[derive(Debug, Clone)]
pub struct JobCommands {
    program: PathBuf,
    config: PathBuf,
    logs_dir: PathBuf,
}

impl JobCommands {
    pub fn new(program: impl Into<PathBuf>, config: impl Into<PathBuf>, logs_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            config: config.into(),
            logs_dir: logs_dir.as_ref().to_path_buf(),
        }
    }

    fn prefix(&self) -> String {
        format!(
            "{} --config {}",
            shell_quote(&self.program.to_string_lossy()),
            shell_quote(&self.config.to_string_lossy())
        )
    }

    fn redirect(&self, log_name: &str) -> String {
        let log = self.logs_dir.join(log_name);
        format!(">> {} 2>&1", shell_quote(&log.to_string_lossy()))
    }

    pub fn record(
        &self,
        title: &str,
        provider: &str,
        recorder: RecorderKind,
        url: &str,
        duration_seconds: i64,
        role: Role,
    ) -> String {
        format!(
            "{} record {} {} {} {} {} {} {}",
            self.prefix(),
            shell_quote(title),
            shell_quote(provider),
            recorder.as_str(),
            shell_quote(url),
            duration_seconds,
            role.tag(),
            self.redirect(&format!("record_{}_{}.log", sanitize_title(title), role.tag())),
        )
    }

    pub fn fuse(
        &self,
        title: &str,
        primary: Option<&str>,
        backup: Option<&str>,
        backup2: Option<&str>,
    ) -> String {
        let mut line = format!("{} fuse {}", self.prefix(), shell_quote(title));
        for (flag, provider) in [("--primary", primary), ("--backup", backup), ("--backup2", backup2)] {
            if let Some(provider) = provider {
                line.push_str(&format!(" {flag} {}", shell_quote(provider)));
            }
        }
        line.push(' ');
        line.push_str(&self.redirect("fusion.log"));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{ExitStatus, Output};
    use std::sync::Mutex;

    use std::os::unix::process::ExitStatusExt;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        job_bodies: Mutex<Vec<String>>,
        status: i32,
    }

    #[async_trait::async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
            let (program, args) = crate::exec::describe(command);
            if let Some(path) = args.last() {
                if let Ok(body) = std::fs::read_to_string(path) {
                    self.job_bodies.lock().unwrap().push(body);
                }
            }
            self.calls.lock().unwrap().push((program, args));
            Ok(Output {
                status: ExitStatus::from_raw(self.status << 8),
                stdout: Vec::new(),
                stderr: b"at: refusing".to_vec(),
            })
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn at_scheduler_passes_stamp_and_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = AtJobScheduler::new("at", dir.path().join("jobs"), Some(executor.clone() as Arc<dyn CommandExecutor>));
        scheduler
            .schedule_at(at(21, 1), "iptvctl record x")
            .await
            .unwrap();
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].0, "at");
        assert_eq!(&calls[0].1[..3], &["-t", "202403092101", "-f"]);
        assert_eq!(executor.job_bodies.lock().unwrap()[0], "iptvctl record x\n");
        assert_eq!(std::fs::read_dir(dir.path().join("jobs")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn at_scheduler_reports_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor {
            status: 1,
            ..Default::default()
        });
        let scheduler = AtJobScheduler::new("at", dir.path(), Some(executor as Arc<dyn CommandExecutor>));
        let err = scheduler.schedule_at(at(21, 0), "true").await.unwrap_err();
        assert!(matches!(err, ScheduleError::Submission { status: Some(1), .. }));
    }

    #[test]
    fn shell_quote_wraps_unsafe_words() {
        assert_eq!(shell_quote("alpha"), "alpha");
        assert_eq!(shell_quote("Le Journal"), "'Le Journal'");
        assert_eq!(shell_quote("l'info"), r"'l'\''info'");
        assert_eq!(shell_quote("http://a.example/x?y=1&z=2"), "'http://a.example/x?y=1&z=2'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn record_and_fuse_lines_carry_all_arguments() {
        let commands = JobCommands::new("/usr/bin/iptvctl", "/etc/iptv/iptv.toml", "/var/log/iptv");
        let record = commands.record(
            "Le Journal",
            "alpha",
            RecorderKind::Streamlink,
            "http://alpha.example/tf1.m3u8",
            3600,
            Role::Backup2,
        );
        assert_eq!(
            record,
            "/usr/bin/iptvctl --config /etc/iptv/iptv.toml record 'Le Journal' alpha streamlink \
             http://alpha.example/tf1.m3u8 3600 backup_2 >> '/var/log/iptv/record_Le Journal_backup_2.log' 2>&1"
        );
        let fuse = commands.fuse("Le Journal", Some("alpha"), None, Some("gamma"));
        assert_eq!(
            fuse,
            "/usr/bin/iptvctl --config /etc/iptv/iptv.toml fuse 'Le Journal' --primary alpha \
             --backup2 gamma >> /var/log/iptv/fusion.log 2>&1"
        );
    }
}
