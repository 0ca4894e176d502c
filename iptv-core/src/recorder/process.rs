use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::BinariesSection;
use crate::roles::RecorderKind;

use super::command::recorder_args;

/// Everything needed to start one recorder run for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub kind: RecorderKind,
    pub provider: String,
    pub url: String,
    pub remaining_seconds: u64,
    pub output: PathBuf,
    pub log_path: PathBuf,
}

/// A recorder child owned by the recording loop.
#[async_trait::async_trait]
pub trait RecorderProcess: Send {
    fn id(&self) -> Option<u32>;
    fn is_running(&mut self) -> bool;
    async fn terminate(&mut self);
}

#[async_trait::async_trait]
pub trait RecorderLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn RecorderProcess>>;
}

/// Spawns the real recorder binaries with output appended to a log file.
#[derive(Debug, Clone)]
pub struct ChildRecorderLauncher {
    binaries: BinariesSection,
}

impl ChildRecorderLauncher {
    pub fn new(binaries: BinariesSection) -> Self {
        Self { binaries }
    }

    pub fn command(&self, spec: &LaunchSpec) -> Command {
        let mut command = Command::new(self.binaries.recorder(spec.kind));
        command.args(recorder_args(
            spec.kind,
            &spec.provider,
            &spec.url,
            spec.remaining_seconds,
            &spec.output,
        ));
        command
    }
}

#[async_trait::async_trait]
impl RecorderLauncher for ChildRecorderLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn RecorderProcess>> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)?;
        let mut command = self.command(spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true);
        let child = command.spawn()?;
        info!(
            recorder = %spec.kind,
            pid = ?child.id(),
            output = %spec.output.display(),
            remaining = spec.remaining_seconds,
            "recorder started"
        );
        Ok(Box::new(ChildProcess { child }))
    }
}

#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

#[async_trait::async_trait]
impl RecorderProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(%status, "recorder exited");
                false
            }
            Err(err) => {
                warn!(error = %err, "failed to poll recorder");
                false
            }
        }
    }

    async fn terminate(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "recorder already gone");
            return;
        }
        match self.child.wait().await {
            Ok(status) => debug!(%status, "recorder terminated"),
            Err(err) => warn!(error = %err, "failed to reap recorder"),
        }
    }
}

/// Command lines of the processes running on this host.
pub trait ProcessTable: Send + Sync {
    fn command_lines(&self) -> Vec<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn command_lines(&self) -> Vec<Vec<String>> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        system
            .processes()
            .values()
            .map(|process| {
                process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect()
            })
            .collect()
    }
}

/// Recording jobs for `provider` among `lines`, the calling one included.
///
/// The provider is the second positional argument of the `record`
/// subcommand, right after the title.
pub fn count_provider_recordings(lines: &[Vec<String>], provider: &str) -> usize {
    lines
        .iter()
        .filter(|args| {
            args.iter()
                .position(|arg| arg == "record")
                .and_then(|index| args.get(index + 2))
                .is_some_and(|arg| arg == provider)
        })
        .count()
}
