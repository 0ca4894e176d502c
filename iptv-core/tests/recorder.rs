use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use iptv_core::config::RecorderSection;
use iptv_core::recorder::{read_start_ledger, LaunchSpec};
use iptv_core::{
    ProcessTable, RecordOutcome, RecordRequest, RecorderError, RecorderKind, RecorderLauncher,
    RecorderProcess, Role, SaveLayout, SegmentRecorder,
};
use tempfile::TempDir;

struct FakeProcess {
    alive: Arc<AtomicBool>,
    output: PathBuf,
    growing: bool,
    polls_left: Option<usize>,
}

#[async_trait::async_trait]
impl RecorderProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_running(&mut self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        if self.growing {
            let mut file = OpenOptions::new().append(true).open(&self.output).unwrap();
            file.write_all(&[0u8; 188]).unwrap();
        }
        match self.polls_left {
            Some(0) => {
                self.alive.store(false, Ordering::SeqCst);
                false
            }
            Some(left) => {
                self.polls_left = Some(left - 1);
                true
            }
            None => true,
        }
    }

    async fn terminate(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Writes a fixed-size segment on launch unless told not to.
#[derive(Default)]
struct FakeLauncher {
    silent: bool,
    growing: bool,
    polls_before_exit: Option<usize>,
    launched: Mutex<Vec<(LaunchSpec, Arc<AtomicBool>)>>,
}

impl FakeLauncher {
    fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Recorders whose file keeps growing until they exit on their own.
    fn exiting_after(polls: usize) -> Self {
        Self {
            growing: true,
            polls_before_exit: Some(polls),
            ..Self::default()
        }
    }

    fn specs(&self) -> Vec<LaunchSpec> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|(spec, _)| spec.clone())
            .collect()
    }

    fn all_stopped(&self) -> bool {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .all(|(_, alive)| !alive.load(Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl RecorderLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn RecorderProcess>> {
        if !self.silent {
            std::fs::write(&spec.output, vec![0u8; 188])?;
        }
        let alive = Arc::new(AtomicBool::new(true));
        self.launched
            .lock()
            .unwrap()
            .push((spec.clone(), alive.clone()));
        Ok(Box::new(FakeProcess {
            alive,
            output: spec.output.clone(),
            growing: self.growing,
            polls_left: self.polls_before_exit,
        }))
    }
}

struct FixedTable(Vec<Vec<String>>);

impl ProcessTable for FixedTable {
    fn command_lines(&self) -> Vec<Vec<String>> {
        self.0.clone()
    }
}

fn settings() -> RecorderSection {
    RecorderSection {
        settle_seconds: 30,
        poll_interval_seconds: 40,
    }
}

fn request(recorder: RecorderKind, duration_seconds: u64) -> RecordRequest {
    RecordRequest {
        title: "Le Film".to_string(),
        provider: "alpha".to_string(),
        recorder,
        url: "http://alpha/tf1".to_string(),
        duration_seconds,
        role: Role::Primary,
    }
}

fn recorder(
    root: &Path,
    launcher: Arc<FakeLauncher>,
    lines: Vec<Vec<String>>,
) -> SegmentRecorder {
    SegmentRecorder::new(
        root.join("videos"),
        root.join("logs"),
        settings(),
        2,
        launcher,
        Arc::new(FixedTable(lines)),
    )
}

#[tokio::test(start_paused = true)]
async fn stalled_ffmpeg_segments_are_rotated() {
    let temp = TempDir::new().unwrap();
    let launcher = Arc::new(FakeLauncher::default());

    let outcome = recorder(temp.path(), launcher.clone(), Vec::new())
        .record(&request(RecorderKind::Ffmpeg, 200))
        .await
        .unwrap();

    let RecordOutcome::Completed { segments, started } = outcome else {
        panic!("recording was rejected");
    };
    assert_eq!(segments, 3);
    assert_eq!(started.len(), 3);

    let specs = launcher.specs();
    let remaining: Vec<u64> = specs.iter().map(|spec| spec.remaining_seconds).collect();
    assert_eq!(remaining, vec![200, 130, 60]);
    assert!(specs[2]
        .output
        .ends_with("Le Film-save/Le Film_alpha_3_original.ts"));
    assert!(specs[0]
        .log_path
        .ends_with("logs/infos_Le Film_alpha_1_original.log"));
    assert!(launcher.all_stopped());

    let layout = SaveLayout::new(temp.path().join("videos"), "Le Film");
    let ledger = read_start_ledger(&layout.start_ledger_path("alpha", Role::Primary)).unwrap();
    assert_eq!(ledger, started);
    assert_eq!(layout.list_segments("alpha", Role::Primary).unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn live_streamlink_keeps_a_single_segment() {
    let temp = TempDir::new().unwrap();
    let launcher = Arc::new(FakeLauncher::default());

    let outcome = recorder(temp.path(), launcher.clone(), Vec::new())
        .record(&request(RecorderKind::Streamlink, 200))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        RecordOutcome::Completed { segments: 1, .. }
    ));
    assert_eq!(launcher.specs().len(), 1);
    assert!(launcher.all_stopped());
}

#[tokio::test(start_paused = true)]
async fn recorder_without_output_is_stopped_and_not_logged() {
    let temp = TempDir::new().unwrap();
    let launcher = Arc::new(FakeLauncher::silent());

    let outcome = recorder(temp.path(), launcher.clone(), Vec::new())
        .record(&request(RecorderKind::Ffmpeg, 200))
        .await
        .unwrap();

    let RecordOutcome::Completed { segments, started } = outcome else {
        panic!("recording was rejected");
    };
    assert_eq!(segments, 3);
    assert!(started.is_empty());
    assert!(launcher.all_stopped());
    let layout = SaveLayout::new(temp.path().join("videos"), "Le Film");
    assert!(!layout.start_ledger_path("alpha", Role::Primary).exists());
}

#[tokio::test(start_paused = true)]
async fn provider_over_its_stream_limit_is_rejected() {
    let temp = TempDir::new().unwrap();
    let launcher = Arc::new(FakeLauncher::default());
    let line = |role: &str| -> Vec<String> {
        format!("/usr/bin/iptvctl --config /etc/iptv.toml record show alpha ffmpeg http://a 60 {role}")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    };
    let lines = vec![line("original"), line("backup"), line("backup_2")];

    let outcome = recorder(temp.path(), launcher.clone(), lines)
        .record(&request(RecorderKind::Ffmpeg, 200))
        .await
        .unwrap();

    assert_eq!(outcome, RecordOutcome::Rejected { running: 3, max: 2 });
    assert!(launcher.specs().is_empty());
    assert!(!temp.path().join("videos").join("Le Film-save").exists());
}

#[tokio::test(start_paused = true)]
async fn recorder_exiting_while_growing_starts_a_new_segment() {
    let temp = TempDir::new().unwrap();
    let launcher = Arc::new(FakeLauncher::exiting_after(1));

    let outcome = recorder(temp.path(), launcher.clone(), Vec::new())
        .record(&request(RecorderKind::Ffmpeg, 200))
        .await
        .unwrap();

    let RecordOutcome::Completed { segments, started } = outcome else {
        panic!("recording was rejected");
    };
    assert_eq!(segments, 2);
    assert_eq!(started.len(), 2);
    // First exit seen on the poll at 110 s.
    let remaining: Vec<u64> = launcher
        .specs()
        .iter()
        .map(|spec| spec.remaining_seconds)
        .collect();
    assert_eq!(remaining, vec![200, 90]);
    assert!(launcher.all_stopped());
}

#[tokio::test]
async fn recording_length_past_the_clock_is_an_error() {
    let temp = TempDir::new().unwrap();
    let launcher = Arc::new(FakeLauncher::default());

    let err = recorder(temp.path(), launcher.clone(), Vec::new())
        .record(&request(RecorderKind::Ffmpeg, u64::MAX))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RecorderError::DurationOutOfRange { seconds: u64::MAX }
    ));
    assert!(launcher.specs().is_empty());
    assert!(!temp.path().join("videos").join("Le Film-save").exists());
}
