use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anvil_core::{
    BuildEvent, BuildPhase, BuildRequest, BuildStats, CancelToken, CoreContext, EventSender,
    kill_child_group, major,
};
use anvil_upstream::{Catalog, CatalogError, fetch, tarball_url};
use chrono::Utc;

use crate::child;
use crate::error::{BuildError, BuildResult};
use crate::pgp::Gpg;
use crate::verify;

/// Poll interval for the cancellation token while a child runs.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// The six-phase build state machine:
/// Download → Verify → Extract → Configure → Compile → Package.
///
/// One engine value runs one architecture at a time; `all` requests are
/// fanned out by the caller. Every phase may end in `Failed` or `Cancelled`;
/// there is no retry or skip within a run.
pub struct BuildEngine {
    ctx: CoreContext,
    events: EventSender,
    cancel: CancelToken,
    client: reqwest::Client,
    gpg: Gpg,
}

impl BuildEngine {
    pub fn new(ctx: CoreContext, events: EventSender, cancel: CancelToken) -> Self {
        Self {
            ctx,
            events,
            cancel,
            client: reqwest::Client::new(),
            gpg: Gpg::new(),
        }
    }

    /// Substitute the PGP verifier (tests point this at a stub binary).
    pub fn with_gpg(mut self, gpg: Gpg) -> Self {
        self.gpg = gpg;
        self
    }

    /// Run one build to completion, emitting events along the way.
    ///
    /// A final `[ERROR]` output line and a terminal `Failed`/`Cancelled`
    /// event precede every error return.
    pub async fn run(&self, request: &BuildRequest) -> BuildResult<BuildStats> {
        match self.run_inner(request).await {
            Ok(stats) => Ok(stats),
            Err(BuildError::Cancelled) => {
                self.events.error("build cancelled").await;
                self.events.emit(BuildEvent::Cancelled).await;
                Err(BuildError::Cancelled)
            }
            Err(e) => {
                self.events.error(&e.to_string()).await;
                self.events.emit(BuildEvent::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, request: &BuildRequest) -> BuildResult<BuildStats> {
        if !request.force_rebuild
            && let Some(stats) = self.cached_build(request).await
        {
            self.events
                .info(&format!(
                    "completed build of {} found; pass --force-rebuild to rebuild",
                    stats.kernel_version
                ))
                .await;
            self.events.emit(BuildEvent::Completed(stats.clone())).await;
            return Ok(stats);
        }

        self.checkpoint()?;
        let version = self.resolve_version(request).await?;
        let arch = request.arch;
        self.events
            .info(&format!("building linux {version} for {arch}"))
            .await;

        let started = Instant::now();
        let download_duration = self.phase_download(&version, request).await?;
        self.phase_verify(&version, request).await?;
        let extract_duration = self.phase_extract(&version).await?;
        let configure_duration = self.phase_configure(&version, request).await?;
        let compile_duration = self.phase_compile(&version, request).await?;
        let stats = self
            .phase_package(
                &version,
                request,
                started,
                download_duration,
                extract_duration,
                configure_duration,
                compile_duration,
            )
            .await?;

        self.events.emit(BuildEvent::Completed(stats.clone())).await;
        Ok(stats)
    }

    fn checkpoint(&self) -> BuildResult<()> {
        if self.cancel.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The cache key is the stats record: it must parse, reference artifacts
    /// that still exist, and (when the request pins a version) match it.
    async fn cached_build(&self, request: &BuildRequest) -> Option<BuildStats> {
        let stats = BuildStats::load(&self.ctx.build_stats_path()).await?;
        if stats.matches_version(request.version.as_deref()) && stats.artifacts_exist().await {
            Some(stats)
        } else {
            None
        }
    }

    async fn resolve_version(&self, request: &BuildRequest) -> BuildResult<String> {
        let catalog = Catalog::new()?;
        let version = match &request.version {
            Some(version) => {
                catalog.validate(version).await?;
                version.clone()
            }
            None => {
                let version = catalog.latest_stable().await?;
                self.events
                    .info(&format!("resolved latest stable: {version}"))
                    .await;
                version
            }
        };
        if major(&version).is_none() {
            return Err(CatalogError::VersionUnknown {
                requested: version,
                candidates: Vec::new(),
            }
            .into());
        }
        Ok(version)
    }

    async fn phase_download(
        &self,
        version: &str,
        request: &BuildRequest,
    ) -> BuildResult<Duration> {
        self.checkpoint()?;
        self.events.phase(BuildPhase::Download).await;
        let t0 = Instant::now();

        verify::scrub_cached_sources(&self.ctx, version, request.verification, &self.events)
            .await?;

        let tarball = self.ctx.tarball_path(version);
        if tokio::fs::try_exists(&tarball).await.unwrap_or(false) {
            self.events
                .info(&format!("using cached tarball {}", tarball.display()))
                .await;
            return Ok(t0.elapsed());
        }

        tokio::fs::create_dir_all(self.ctx.build_dir()).await?;
        // resolve_version guarantees a numeric leading component
        let major = major(version).unwrap_or_default();
        let url = tarball_url(major, version);
        self.events.info(&format!("downloading {url}")).await;

        let events = self.events.clone();
        fetch(&self.client, &url, &tarball, &[], move |f| {
            events.progress_now(f);
        })
        .await?;

        self.events
            .info(&format!("saved {}", tarball.display()))
            .await;
        Ok(t0.elapsed())
    }

    async fn phase_verify(&self, version: &str, request: &BuildRequest) -> BuildResult<()> {
        self.checkpoint()?;
        self.events.phase(BuildPhase::Verify).await;
        verify::verify_source(
            &self.ctx,
            &self.client,
            &self.gpg,
            request.verification,
            version,
            &self.events,
        )
        .await
    }

    async fn phase_extract(&self, version: &str) -> BuildResult<Duration> {
        self.checkpoint()?;
        self.events.phase(BuildPhase::Extract).await;
        let t0 = Instant::now();

        let source_dir = self.ctx.source_dir(version);
        if tokio::fs::try_exists(&source_dir).await.unwrap_or(false) {
            self.events
                .info(&format!(
                    "source tree {} already extracted",
                    source_dir.display()
                ))
                .await;
            return Ok(t0.elapsed());
        }

        let tarball = self.ctx.tarball_path(version);
        self.events
            .info(&format!("extracting {}", tarball.display()))
            .await;
        let events = self.events.clone();
        anvil_artifact::extract_tar_xz(&tarball, &self.ctx.build_dir(), move |f| {
            events.progress_blocking(f);
        })
        .await?;

        Ok(t0.elapsed())
    }

    async fn phase_configure(
        &self,
        version: &str,
        request: &BuildRequest,
    ) -> BuildResult<Duration> {
        self.checkpoint()?;
        self.events.phase(BuildPhase::Configure).await;
        let t0 = Instant::now();
        let arch = request.arch;

        let config = match &request.config_file {
            Some(path) => path.clone(),
            None => self
                .ctx
                .kernel_config(arch)
                .map(Path::to_path_buf)
                .ok_or(BuildError::ConfigMissing { arch })?,
        };
        if !tokio::fs::try_exists(&config).await.unwrap_or(false) {
            return Err(BuildError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("kernel config {} does not exist", config.display()),
            )));
        }

        let source_dir = self.ctx.source_dir(version);
        self.events
            .info(&format!("using kernel config {}", config.display()))
            .await;
        tokio::fs::copy(&config, source_dir.join(".config")).await?;

        child::require_tool("make")?;
        let mut args = vec!["olddefconfig".to_string()];
        args.extend(arch.make_arch_args().iter().map(|s| s.to_string()));
        self.run_streamed(BuildPhase::Configure, "make", &args, &source_dir)
            .await?;

        Ok(t0.elapsed())
    }

    async fn phase_compile(
        &self,
        version: &str,
        request: &BuildRequest,
    ) -> BuildResult<Duration> {
        self.checkpoint()?;
        self.events.phase(BuildPhase::Compile).await;
        let t0 = Instant::now();
        let arch = request.arch;
        let source_dir = self.ctx.source_dir(version);

        child::require_tool("make")?;
        child::require_tool(arch.required_compiler())?;

        let mut extra = arch
            .make_arch_args()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        if let Some(prefix) = arch.cross_compile_prefix() {
            extra.push(format!("CROSS_COMPILE={prefix}"));
        }

        // Recent kernels need an explicit prepare step before the arm64
        // Image target.
        if arch == anvil_core::Architecture::Aarch64 {
            let mut prepare = vec!["prepare".to_string()];
            prepare.extend(extra.iter().cloned());
            self.run_streamed(BuildPhase::Compile, "make", &prepare, &source_dir)
                .await?;
        }

        let mut args = vec![format!("-j{}", child::ncpus()), arch.make_target().to_string()];
        args.extend(extra);
        self.run_streamed(BuildPhase::Compile, "make", &args, &source_dir)
            .await?;

        Ok(t0.elapsed())
    }

    #[allow(clippy::too_many_arguments)]
    async fn phase_package(
        &self,
        version: &str,
        request: &BuildRequest,
        started: Instant,
        download_duration: Duration,
        extract_duration: Duration,
        configure_duration: Duration,
        compile_duration: Duration,
    ) -> BuildResult<BuildStats> {
        self.checkpoint()?;
        self.events.phase(BuildPhase::Package).await;
        let t0 = Instant::now();
        let arch = request.arch;
        let source_dir = self.ctx.source_dir(version);

        let artifacts = self.ctx.artifacts_dir();
        tokio::fs::create_dir_all(&artifacts).await?;

        let image_src = source_dir.join(arch.image_path_in_source());
        let output_path = artifacts.join(arch.kernel_filename(version));
        self.events
            .info(&format!("packaging {}", output_path.display()))
            .await;
        tokio::fs::copy(&image_src, &output_path).await?;
        let (_, uncompressed_hash) = anvil_artifact::write_sha256_sibling(&output_path).await?;

        let compressed_path = PathBuf::from(format!("{}.xz", output_path.display()));
        let events = self.events.clone();
        anvil_artifact::compress_xz(&output_path, &compressed_path, move |f| {
            events.progress_blocking(f);
        })
        .await?;
        let (_, compressed_hash) = anvil_artifact::write_sha256_sibling(&compressed_path).await?;

        tokio::fs::copy(
            source_dir.join(".config"),
            artifacts.join(arch.config_filename(version)),
        )
        .await?;

        let uncompressed_size = tokio::fs::metadata(&output_path).await?.len() as i64;
        let compressed_size = tokio::fs::metadata(&compressed_path).await?.len() as i64;
        let package_duration = t0.elapsed();

        let stats = BuildStats {
            kernel_version: version.to_string(),
            output_path,
            compressed_path,
            total_duration: duration_ns(started.elapsed()),
            download_duration: duration_ns(download_duration),
            extract_duration: duration_ns(extract_duration),
            configure_duration: duration_ns(configure_duration),
            compile_duration: duration_ns(compile_duration),
            package_duration: duration_ns(package_duration),
            uncompressed_size,
            compressed_size,
            uncompressed_hash,
            compressed_hash,
            build_timestamp: Utc::now(),
        };
        stats.save(&self.ctx.build_stats_path()).await?;

        self.events
            .info(&format!(
                "build complete: {} ({} bytes, {} compressed)",
                stats.output_path.display(),
                stats.uncompressed_size,
                stats.compressed_size
            ))
            .await;
        Ok(stats)
    }

    /// Spawn a child in its own process group, stream merged stdout/stderr
    /// lines into the event channel, and race completion against the
    /// cancellation token. On cancellation the whole group gets `SIGKILL`.
    async fn run_streamed(
        &self,
        phase: BuildPhase,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> BuildResult<()> {
        self.events
            .info(&format!("running: {program} {}", args.join(" ")))
            .await;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| BuildError::ChildProcessFailed {
                phase,
                detail: format!("spawn {program}: {e}"),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stdout.map(|pipe| {
            tokio::spawn(child::pump_lines(pipe, self.events.clone()))
        });
        let err_task = stderr.map(|pipe| {
            tokio::spawn(child::pump_lines(pipe, self.events.clone()))
        });

        let status = loop {
            if self.cancel.is_cancelled() {
                kill_child_group(&child);
                let _ = child.wait().await;
                join_pumps(out_task, err_task).await;
                return Err(BuildError::Cancelled);
            }
            match tokio::time::timeout(CANCEL_POLL, child.wait()).await {
                Ok(status) => break status?,
                Err(_) => continue,
            }
        };

        join_pumps(out_task, err_task).await;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::ChildProcessFailed {
                phase,
                detail: status.to_string(),
            })
        }
    }
}

fn duration_ns(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Wait for the output pumps so every child line precedes the next event.
async fn join_pumps(
    out_task: Option<tokio::task::JoinHandle<()>>,
    err_task: Option<tokio::task::JoinHandle<()>>,
) {
    if let Some(task) = out_task {
        let _ = task.await;
    }
    if let Some(task) = err_task {
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::{Architecture, VerificationLevel};
    use tokio::sync::mpsc;

    fn test_ctx(dir: &Path) -> CoreContext {
        CoreContext::new(dir.to_path_buf())
    }

    async fn seeded_stats(ctx: &CoreContext) -> BuildStats {
        let artifacts = ctx.artifacts_dir();
        tokio::fs::create_dir_all(&artifacts).await.unwrap();
        let output_path = artifacts.join("vmlinux-6.9.1-x86_64");
        let compressed_path = artifacts.join("vmlinux-6.9.1-x86_64.xz");
        tokio::fs::write(&output_path, b"elf").await.unwrap();
        tokio::fs::write(&compressed_path, b"xz").await.unwrap();

        let stats = BuildStats {
            kernel_version: "6.9.1".to_string(),
            output_path,
            compressed_path,
            total_duration: 1,
            download_duration: 1,
            extract_duration: 1,
            configure_duration: 1,
            compile_duration: 1,
            package_duration: 1,
            uncompressed_size: 3,
            compressed_size: 2,
            uncompressed_hash: "ab".repeat(32),
            compressed_hash: "cd".repeat(32),
            build_timestamp: Utc::now(),
        };
        stats.save(&ctx.build_stats_path()).await.unwrap();
        stats
    }

    async fn drain(rx: &mut mpsc::Receiver<BuildEvent>) -> Vec<BuildEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn request(version: &str) -> BuildRequest {
        BuildRequest {
            version: Some(version.to_string()),
            arch: Architecture::X86_64,
            verification: VerificationLevel::Disabled,
            config_file: None,
            force_rebuild: false,
            interactive: false,
        }
    }

    #[tokio::test]
    async fn cached_build_short_circuits_without_entering_phases() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let seeded = seeded_stats(&ctx).await;

        let (events, mut rx) = EventSender::channel(64);
        let engine = BuildEngine::new(ctx, events, CancelToken::new());

        let stats = engine.run(&request("6.9.1")).await.unwrap();
        assert_eq!(stats, seeded);

        let events = drain(&mut rx).await;
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, BuildEvent::PhaseEntered(_))),
            "cache hit must not enter any phase"
        );
        assert!(events.iter().any(|e| matches!(e, BuildEvent::Completed(_))));
    }

    #[tokio::test]
    async fn cache_hit_wins_even_when_already_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let seeded = seeded_stats(&ctx).await;

        let (events, _rx) = EventSender::channel(64);
        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = BuildEngine::new(ctx, events, cancel);

        // The short-circuit enters no phase, so no cancellation point fires.
        let stats = engine.run(&request("6.9.1")).await.unwrap();
        assert_eq!(stats, seeded);
    }

    #[tokio::test]
    async fn cache_is_rejected_when_artifacts_are_gone() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let seeded = seeded_stats(&ctx).await;
        tokio::fs::remove_file(&seeded.output_path).await.unwrap();

        let (events, _rx) = EventSender::channel(64);
        let engine = BuildEngine::new(ctx, events, CancelToken::new());
        // With a cancelled token the run can only succeed via the cache path;
        // a missing artifact must fall through to Cancelled instead.
        engine.cancel.cancel();
        let err = engine.run(&request("6.9.1")).await.unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }

    #[tokio::test]
    async fn cache_requires_matching_version() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        seeded_stats(&ctx).await;

        let (events, _rx) = EventSender::channel(64);
        let engine = BuildEngine::new(ctx, events, CancelToken::new());
        engine.cancel.cancel();
        let err = engine.run(&request("6.9.2")).await.unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }

    #[tokio::test]
    async fn force_rebuild_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        seeded_stats(&ctx).await;

        let (events, _rx) = EventSender::channel(64);
        let engine = BuildEngine::new(ctx, events, CancelToken::new());
        engine.cancel.cancel();

        let mut req = request("6.9.1");
        req.force_rebuild = true;
        let err = engine.run(&req).await.unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_emits_error_line_then_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());

        let (events, mut rx) = EventSender::channel(64);
        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = BuildEngine::new(ctx, events, cancel);

        let err = engine.run(&request("6.9.1")).await.unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));

        let events = drain(&mut rx).await;
        let error_line = events.iter().position(
            |e| matches!(e, BuildEvent::Output(line) if line.starts_with("[ERROR]")),
        );
        let terminal = events
            .iter()
            .position(|e| matches!(e, BuildEvent::Cancelled));
        assert!(error_line.is_some());
        assert!(terminal.is_some());
        assert!(error_line < terminal);
    }

    #[tokio::test]
    async fn streamed_child_failure_carries_phase_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let (events, _rx) = EventSender::channel(64);
        let engine = BuildEngine::new(ctx, events, CancelToken::new());

        let err = engine
            .run_streamed(
                BuildPhase::Compile,
                "sh",
                &["-c".to_string(), "echo building; exit 3".to_string()],
                dir.path(),
            )
            .await
            .unwrap_err();
        match err {
            BuildError::ChildProcessFailed { phase, detail } => {
                assert_eq!(phase, BuildPhase::Compile);
                assert!(detail.contains('3'), "status missing from {detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn streamed_output_precedes_return() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let (events, mut rx) = EventSender::channel(64);
        let engine = BuildEngine::new(ctx, events, CancelToken::new());

        engine
            .run_streamed(
                BuildPhase::Configure,
                "sh",
                &["-c".to_string(), "echo one; echo two >&2".to_string()],
                dir.path(),
            )
            .await
            .unwrap();

        let lines: Vec<String> = drain(&mut rx)
            .await
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::Output(line) => Some(line),
                _ => None,
            })
            .collect();
        assert!(lines.iter().any(|l| l == "one"));
        assert!(lines.iter().any(|l| l == "two"));
    }

    #[tokio::test]
    async fn cancellation_kills_a_running_child_group() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let (events, _rx) = EventSender::channel(64);
        let cancel = CancelToken::new();
        let engine = BuildEngine::new(ctx, events, cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = engine
            .run_streamed(
                BuildPhase::Compile,
                "sh",
                &["-c".to_string(), "sleep 30".to_string()],
                dir.path(),
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, BuildError::Cancelled));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancellation took {:?}",
            started.elapsed()
        );
    }
}
