use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::stats::BuildStats;

/// Phases of the build state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPhase {
    Download,
    Verify,
    Extract,
    Configure,
    Compile,
    Package,
}

impl BuildPhase {
    pub const ORDER: [BuildPhase; 6] = [
        BuildPhase::Download,
        BuildPhase::Verify,
        BuildPhase::Extract,
        BuildPhase::Configure,
        BuildPhase::Compile,
        BuildPhase::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Download => "download",
            BuildPhase::Verify => "verify",
            BuildPhase::Extract => "extract",
            BuildPhase::Configure => "configure",
            BuildPhase::Compile => "compile",
            BuildPhase::Package => "package",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published by the engine to the UI consumer.
///
/// Within one build, `PhaseEntered(p)` strictly precedes any `Progress` or
/// `Output` attributable to `p`, `Progress` is monotonic within a phase, and
/// a terminal event arrives after every `Output` line.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    PhaseEntered(BuildPhase),
    /// Fraction in `[0, 1]`; meaning resets at each phase transition.
    Progress(f64),
    /// Line-delimited child output or engine-authored `[INFO]`-style lines.
    Output(String),
    Completed(BuildStats),
    Failed(String),
    Cancelled,
}

/// Sending half of the bounded event channel handed to the engine.
///
/// Sends never fail: a consumer that went away just drops the events. The
/// `*_blocking` variants are for progress callbacks running inside
/// `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<BuildEvent>,
}

impl EventSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BuildEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: BuildEvent) {
        let _ = self.tx.send(event).await;
    }

    pub fn emit_blocking(&self, event: BuildEvent) {
        let _ = self.tx.blocking_send(event);
    }

    /// Lossy non-blocking send for high-frequency progress published from
    /// async contexts; a full channel drops the update instead of stalling
    /// the producer.
    pub fn emit_now(&self, event: BuildEvent) {
        let _ = self.tx.try_send(event);
    }

    pub fn progress_now(&self, fraction: f64) {
        self.emit_now(BuildEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    pub async fn phase(&self, phase: BuildPhase) {
        self.emit(BuildEvent::PhaseEntered(phase)).await;
    }

    pub async fn progress(&self, fraction: f64) {
        self.emit(BuildEvent::Progress(fraction.clamp(0.0, 1.0))).await;
    }

    pub fn progress_blocking(&self, fraction: f64) {
        self.emit_blocking(BuildEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    pub async fn output(&self, line: impl Into<String>) {
        self.emit(BuildEvent::Output(line.into())).await;
    }

    pub async fn info(&self, msg: &str) {
        self.output(format!("[INFO] {msg}")).await;
    }

    pub async fn warn(&self, msg: &str) {
        self.output(format!("[WARN] {msg}")).await;
    }

    pub async fn error(&self, msg: &str) {
        self.output(format!("[ERROR] {msg}")).await;
    }

    pub async fn debug(&self, msg: &str) {
        self.output(format!("[DEBUG] {msg}")).await;
    }
}
