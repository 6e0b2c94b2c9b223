//! Update Manager
//!
//! Owns the check -> download -> install state machine. At most one of
//! checking, downloading and installing runs at any time; a trigger that
//! arrives while one is running returns `UpdateOutcome::Busy` and changes
//! nothing.

use super::delta::{install_order, DeltaEngine};
use super::download::Transport;
use super::error::{Result, UpdateError};
use super::installer::Installer;
use super::integrity::IntegrityValidator;
use super::locale::LocaleSource;
use super::manifest::{FileEntry, TrustedManifest};
use super::notify::{Notifier, UpdateEvent};
use super::rollback::RollbackManager;
use super::state::{AppliedState, Snapshot, UpdatePhase, UpdateSession};
use super::store::{KeyValueStore, StagingCache};
use super::verify::{ManifestVerifier, PublicKey};
use super::version::Version;
use crate::engine::config::UpdaterConfig;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// External capabilities the engine is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn KeyValueStore>,
    pub staging: Arc<dyn StagingCache>,
    pub installer: Arc<dyn Installer>,
    pub notifier: Arc<dyn Notifier>,
    pub locale: Arc<dyn LocaleSource>,
}

/// Result of a trigger
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Another cycle is running; nothing happened
    Busy,
    UpToDate(Version),
    /// Update found, waiting for an explicit download trigger
    Available(Version),
    /// Update staged, waiting for an explicit install trigger
    Downloaded(Version),
    Installed(Version),
    /// Install failed and the snapshot (at this version) was restored
    RolledBack(Version),
    Failed(UpdateError),
}

/// Work waiting for an explicit trigger
enum Pending {
    Nothing,
    Available(TrustedManifest),
    Downloaded {
        manifest: TrustedManifest,
        delta: Vec<FileEntry>,
    },
}

struct Control {
    session: UpdateSession,
    pending: Pending,
}

struct Inner {
    config: UpdaterConfig,
    /// Version of the running build, used until an update is applied
    build_version: Version,
    verifier: ManifestVerifier,
    delta: DeltaEngine,
    integrity: IntegrityValidator,
    rollback: RollbackManager,
    collaborators: Collaborators,
    control: Mutex<Control>,
    consecutive_failures: AtomicU32,
    cancel_requested: AtomicBool,
    retry_task: Mutex<Option<TimerTask>>,
    reload_task: Mutex<Option<TimerTask>>,
}

/// Explicitly constructed orchestrator; clones share one instance
#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<Inner>,
}

/// Background timer that is told to stop instead of being aborted.
///
/// The stop signal is only observed while waiting, so a cycle the timer
/// has already started runs to completion.
struct TimerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TimerTask {
    fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(body(stopped));
        Self { stop, handle }
    }

    fn stop(&self) {
        self.stop.send_replace(true);
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn stop_requested(stopped: &watch::Receiver<bool>) -> bool {
    *stopped.borrow()
}

/// Sleep for `delay` unless a stop arrives first; true if the full delay passed
async fn sleep_unless_stopped(delay: Duration, stopped: &mut watch::Receiver<bool>) -> bool {
    if stop_requested(stopped) {
        return false;
    }
    tokio::select! {
        _ = time::sleep(delay) => !stop_requested(stopped),
        _ = stopped.changed() => false,
    }
}

/// Periodic check timer; stops when dropped.
///
/// Stopping never interrupts a check, download or install already started
/// by a tick.
pub struct PeriodicChecks {
    timer: TimerTask,
}

impl PeriodicChecks {
    pub fn stop(self) {
        self.timer.stop();
    }

    /// False once the timer loop has exited
    pub fn is_running(&self) -> bool {
        !self.timer.is_finished()
    }
}

impl Drop for PeriodicChecks {
    fn drop(&mut self) {
        self.timer.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl UpdateManager {
    pub fn new(
        config: UpdaterConfig,
        build_version: Version,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let public_key = config
            .public_key
            .as_deref()
            .map(|key| PublicKey::parse(config.key_type, key))
            .transpose()?;

        let verifier = ManifestVerifier::new(
            collaborators.transport.clone(),
            config.manifest_url.clone(),
            public_key,
            config.allow_unsigned,
        );
        let delta = DeltaEngine::new(collaborators.staging.clone());
        let rollback = RollbackManager::new(
            collaborators.store.clone(),
            collaborators.staging.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                build_version,
                verifier,
                delta,
                integrity: IntegrityValidator::new(),
                rollback,
                collaborators,
                control: Mutex::new(Control {
                    session: UpdateSession::default(),
                    pending: Pending::Nothing,
                }),
                consecutive_failures: AtomicU32::new(0),
                cancel_requested: AtomicBool::new(false),
                retry_task: Mutex::new(None),
                reload_task: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    /// Read-only copy of the current session
    pub fn session(&self) -> UpdateSession {
        lock(&self.inner.control).session.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    /// True while a retry chain is waiting or running
    pub fn retry_pending(&self) -> bool {
        lock(&self.inner.retry_task)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Whether the update waiting for a trigger is breaking
    pub fn pending_is_breaking(&self) -> Option<bool> {
        match &lock(&self.inner.control).pending {
            Pending::Available(manifest) | Pending::Downloaded { manifest, .. } => Some(manifest.breaking),
            Pending::Nothing => None,
        }
    }

    pub async fn applied_state(&self) -> Result<AppliedState> {
        AppliedState::load_or_initial(self.inner.collaborators.store.as_ref(), self.inner.build_version)
            .await
    }

    pub async fn snapshot(&self) -> Result<Option<Snapshot>> {
        self.inner.rollback.current().await
    }

    /// Explicit check. Cancels any pending retry chain and resets the
    /// failure count; network and trust failures start a new retry chain.
    pub async fn check_for_updates(&self, silent: bool) -> UpdateOutcome {
        if !self.begin_check() {
            debug!("Check requested while busy, ignoring");
            return UpdateOutcome::Busy;
        }

        self.cancel_retry();
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);

        let outcome = self.check_cycle(silent).await;
        if let UpdateOutcome::Failed(e) = &outcome {
            if e.is_retryable() && self.consecutive_failures() < self.inner.config.max_retries {
                self.schedule_retry(silent);
            }
        }
        outcome
    }

    /// Explicit download of a pending update (confirms breaking updates)
    pub async fn download_update(&self) -> UpdateOutcome {
        let manifest = {
            let mut control = lock(&self.inner.control);
            if control.session.phase.is_busy() {
                return UpdateOutcome::Busy;
            }
            match std::mem::replace(&mut control.pending, Pending::Nothing) {
                Pending::Available(manifest) => {
                    control.session.start_downloading(manifest.version);
                    manifest
                }
                other => {
                    control.pending = other;
                    return UpdateOutcome::Failed(UpdateError::NothingPending);
                }
            }
        };

        let current = match self.applied_state().await {
            Ok(state) => state.version,
            Err(e) => return self.fail_download(e, manifest.version).await,
        };

        if !manifest.can_upgrade_from(&current) {
            let err = UpdateError::Incompatible {
                current: current.to_string(),
                minimum: manifest.min_version.to_string(),
            };
            self.emit_error(&err, UpdatePhase::Downloading, Some(manifest.version));
            let mut control = lock(&self.inner.control);
            control.session.last_error = Some(err.to_string());
            control.session.reset();
            control.pending = Pending::Available(manifest);
            return UpdateOutcome::Failed(err);
        }

        self.download_cycle(manifest, current).await
    }

    /// Explicit install of a downloaded update
    pub async fn install_update(&self) -> UpdateOutcome {
        let (manifest, delta) = {
            let mut control = lock(&self.inner.control);
            if control.session.phase.is_busy() {
                return UpdateOutcome::Busy;
            }
            match std::mem::replace(&mut control.pending, Pending::Nothing) {
                Pending::Downloaded { manifest, delta } => {
                    control.session.start_installing();
                    (manifest, delta)
                }
                other => {
                    control.pending = other;
                    return UpdateOutcome::Failed(UpdateError::NothingPending);
                }
            }
        };

        self.install_cycle(manifest, delta).await
    }

    /// Ask a running download to stop before its next file.
    ///
    /// Returns false if nothing is downloading. Installs are never interrupted.
    pub fn cancel(&self) -> bool {
        let control = lock(&self.inner.control);
        if control.session.phase == UpdatePhase::Downloading {
            self.inner.cancel_requested.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Discard staged files and any downloaded-but-not-installed update
    pub async fn clear_cache(&self) -> Result<()> {
        {
            let mut control = lock(&self.inner.control);
            if control.session.phase.is_busy() {
                return Err(UpdateError::Busy);
            }
            if let Pending::Downloaded { .. } = control.pending {
                control.pending = Pending::Nothing;
            }
        }
        self.inner.delta.clear_cache().await
    }

    /// Restore the snapshot on demand
    pub async fn rollback(&self) -> Result<Snapshot> {
        {
            let mut control = lock(&self.inner.control);
            if control.session.phase.is_busy() {
                return Err(UpdateError::Busy);
            }
            control.pending = Pending::Nothing;
        }
        let snapshot = self.inner.rollback.restore().await?;
        self.emit(UpdateEvent::RolledBack {
            version: snapshot.version,
            reason: "manual rollback".to_string(),
        });
        Ok(snapshot)
    }

    /// Start the periodic check timer, if enabled.
    ///
    /// Ticks run silent checks; a tick while busy does nothing.
    pub fn start_periodic_checks(&self) -> Option<PeriodicChecks> {
        if !self.inner.config.auto_check {
            return None;
        }

        let manager = self.clone();
        let period = self.inner.config.check_interval().max(Duration::from_secs(1));
        let timer = TimerTask::spawn(move |mut stopped| async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                if stop_requested(&stopped) {
                    break;
                }
                manager.periodic_tick().await;
            }
            debug!("Periodic update checks stopped");
        });

        info!(interval_secs = period.as_secs(), "Periodic update checks started");
        Some(PeriodicChecks { timer })
    }

    /// Stop pending retry and reload timers.
    ///
    /// A cycle already running on a timer task is left to finish.
    pub fn shutdown(&self) {
        self.cancel_retry();
        if let Some(timer) = lock(&self.inner.reload_task).take() {
            timer.stop();
        }
    }

    async fn periodic_tick(&self) {
        if !self.begin_check() {
            debug!("Periodic check skipped, update cycle in progress");
            return;
        }
        let _ = self.check_cycle(true).await;
    }

    /// Atomically enter `checking` unless busy
    fn begin_check(&self) -> bool {
        let mut control = lock(&self.inner.control);
        if control.session.phase.is_busy() {
            return false;
        }
        control.session.start_checking();
        true
    }

    fn cancel_retry(&self) {
        if let Some(timer) = lock(&self.inner.retry_task).take() {
            timer.stop();
        }
    }

    fn schedule_retry(&self, silent: bool) {
        let manager = self.clone();
        let timer = TimerTask::spawn(move |stopped| manager.retry_loop(silent, stopped));
        if let Some(previous) = lock(&self.inner.retry_task).replace(timer) {
            previous.stop();
        }
    }

    async fn retry_loop(self, silent: bool, mut stopped: watch::Receiver<bool>) {
        loop {
            let attempt = self.consecutive_failures();
            if attempt == 0 || attempt >= self.inner.config.max_retries {
                break;
            }

            let delay = self.inner.config.retry_delay(attempt);
            info!(
                attempt,
                max_retries = self.inner.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Scheduling update check retry"
            );
            if !sleep_unless_stopped(delay, &mut stopped).await {
                debug!("Retry chain stopped");
                break;
            }

            if !self.begin_check() {
                debug!("Retry skipped, update cycle in progress");
                break;
            }
            let outcome = self.check_cycle(silent).await;
            if stop_requested(&stopped) {
                break;
            }
            match outcome {
                UpdateOutcome::Failed(e) if e.is_retryable() => continue,
                _ => break,
            }
        }
    }

    /// Body of a check; the caller has already entered `checking`
    async fn check_cycle(&self, silent: bool) -> UpdateOutcome {
        if !silent {
            self.emit(UpdateEvent::Checking);
        }

        let current = match self.applied_state().await {
            Ok(state) => state.version,
            Err(e) => return self.fail_check(e, silent),
        };

        let manifest = match self
            .inner
            .verifier
            .fetch_and_verify(self.inner.config.channel)
            .await
        {
            Ok(manifest) => manifest,
            Err(e) => return self.fail_check(e, silent),
        };
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);

        if !manifest.version.is_newer_than(&current) {
            info!(current = %current, offered = %manifest.version, "Already up to date");
            if !silent {
                self.emit(UpdateEvent::UpToDate { version: current });
            }
            let mut control = lock(&self.inner.control);
            control.pending = Pending::Nothing;
            control.session.reset();
            return UpdateOutcome::UpToDate(current);
        }

        info!(current = %current, available = %manifest.version, "Update available");
        let locale = self.inner.collaborators.locale.preferred_locale();
        self.emit(UpdateEvent::UpdateAvailable {
            version: manifest.version,
            changelog: manifest.changelog_for(&locale, &self.inner.config.fallback_locale),
            size: manifest.total_size(),
            breaking: manifest.breaking,
        });

        if !manifest.can_upgrade_from(&current) {
            let err = UpdateError::Incompatible {
                current: current.to_string(),
                minimum: manifest.min_version.to_string(),
            };
            self.emit_error(&err, UpdatePhase::Checking, Some(manifest.version));
            let mut control = lock(&self.inner.control);
            control.session.target_version = Some(manifest.version);
            control.session.last_error = Some(err.to_string());
            control.session.reset();
            control.pending = Pending::Available(manifest);
            return UpdateOutcome::Failed(err);
        }

        if self.inner.config.auto_download && !manifest.breaking {
            lock(&self.inner.control)
                .session
                .start_downloading(manifest.version);
            return self.download_cycle(manifest, current).await;
        }

        if manifest.breaking {
            info!(version = %manifest.version, "Breaking update requires confirmation");
        }
        let version = manifest.version;
        let mut control = lock(&self.inner.control);
        control.session.target_version = Some(version);
        control.session.reset();
        control.pending = Pending::Available(manifest);
        UpdateOutcome::Available(version)
    }

    fn fail_check(&self, err: UpdateError, silent: bool) -> UpdateOutcome {
        let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let exhausted = !err.is_retryable() || failures >= self.inner.config.max_retries;
        warn!(error = %err, failures, exhausted, "Update check failed");

        {
            let mut control = lock(&self.inner.control);
            control.session.last_error = Some(err.to_string());
            if exhausted {
                control.session.mark_failed(err.to_string());
            } else {
                control.session.reset();
            }
        }

        if !silent {
            self.emit_error(&err, UpdatePhase::Checking, None);
        }
        UpdateOutcome::Failed(err)
    }

    /// Snapshot, fetch every delta file in order, verify and stage it.
    /// The caller has already entered `downloading`.
    async fn download_cycle(&self, manifest: TrustedManifest, current: Version) -> UpdateOutcome {
        let target = manifest.version;
        self.inner.cancel_requested.store(false, Ordering::SeqCst);

        if let Err(e) = self.inner.rollback.snapshot(current).await {
            return self.fail_download(e, target).await;
        }

        let applied = match self.applied_state().await {
            Ok(state) => state,
            Err(e) => return self.fail_download(e, target).await,
        };
        let delta = self.inner.delta.compute_delta(&manifest, &applied);
        let total: u64 = delta.iter().map(|f| f.size).sum();
        info!(version = %target, files = delta.len(), bytes = total, "Downloading update");

        let mut received = 0u64;
        for file in &delta {
            if self.inner.cancel_requested.swap(false, Ordering::SeqCst) {
                info!("Download cancelled");
                return self.fail_download(UpdateError::Cancelled, target).await;
            }

            let bytes = {
                let mut on_chunk = |len: u64| {
                    received += len;
                    if total > 0 {
                        let percent = ((received as f64 / total as f64) * 100.0).round().min(100.0) as u8;
                        self.report_progress(percent);
                    }
                };
                match self.inner.collaborators.transport.get(&file.url, &mut on_chunk).await {
                    Ok(bytes) => bytes,
                    Err(e) => return self.fail_download(e, target).await,
                }
            };

            if !self.inner.integrity.verify(&bytes, &file.digest) {
                let err = UpdateError::Integrity {
                    path: file.path.clone(),
                    expected: file.digest.clone(),
                    actual: self.inner.integrity.actual_digest(&bytes, &file.digest),
                };
                return self.fail_download(err, target).await;
            }

            if let Err(e) = self.inner.collaborators.staging.put(&file.path, &bytes).await {
                return self.fail_download(e, target).await;
            }
            debug!(path = %file.path, bytes = bytes.len(), "Staged file");
        }

        self.report_progress(100);
        self.emit(UpdateEvent::Downloaded { version: target });

        if self.inner.config.auto_install && !manifest.breaking {
            if self.inner.cancel_requested.swap(false, Ordering::SeqCst) {
                return self.fail_download(UpdateError::Cancelled, target).await;
            }
            lock(&self.inner.control).session.start_installing();
            return self.install_cycle(manifest, delta).await;
        }

        let mut control = lock(&self.inner.control);
        control.session.reset();
        control.pending = Pending::Downloaded { manifest, delta };
        UpdateOutcome::Downloaded(target)
    }

    fn report_progress(&self, percent: u8) {
        let moved = lock(&self.inner.control).session.update_progress(percent);
        if moved {
            self.emit(UpdateEvent::DownloadProgress { percent });
        }
    }

    async fn fail_download(&self, err: UpdateError, target: Version) -> UpdateOutcome {
        warn!(error = %err, version = %target, "Download failed");

        if let Err(e) = self.inner.delta.clear_cache().await {
            warn!(error = %e, "Failed to clear staged files");
        }
        if let Err(e) = self.inner.rollback.discard().await {
            warn!(error = %e, "Failed to discard snapshot");
        }

        {
            let mut control = lock(&self.inner.control);
            if matches!(err, UpdateError::Cancelled) {
                control.session.last_error = Some(err.to_string());
                control.session.reset();
            } else {
                control.session.mark_failed(err.to_string());
            }
        }

        self.emit_error(&err, UpdatePhase::Downloading, Some(target));
        UpdateOutcome::Failed(err)
    }

    /// Install critical files first, then the rest; roll back on any failure.
    /// The caller has already entered `installing`.
    async fn install_cycle(&self, manifest: TrustedManifest, delta: Vec<FileEntry>) -> UpdateOutcome {
        let target = manifest.version;
        self.emit(UpdateEvent::Installing { version: target });
        info!(version = %target, files = delta.len(), "Installing update");

        for file in install_order(&delta) {
            let bytes = match self.inner.collaborators.staging.get(&file.path).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    let err = UpdateError::Install {
                        path: file.path.clone(),
                        reason: "staged file missing".to_string(),
                    };
                    return self.roll_back(err, target).await;
                }
                Err(e) => return self.roll_back(e, target).await,
            };

            if let Err(e) = self.inner.collaborators.installer.install(&file.path, &bytes).await {
                return self.roll_back(e, target).await;
            }
        }

        if let Err(e) = self.record_install(target, &delta).await {
            return self.roll_back(e, target).await;
        }

        if let Err(e) = self.inner.delta.clear_cache().await {
            warn!(error = %e, "Failed to clear staged files after install");
        }
        if let Err(e) = self.inner.rollback.discard().await {
            warn!(error = %e, "Failed to discard snapshot after install");
        }

        {
            let mut control = lock(&self.inner.control);
            control.session.mark_completed();
            control.pending = Pending::Nothing;
        }
        info!(version = %target, "Update installed");
        self.emit(UpdateEvent::Completed { version: target });

        if manifest.breaking {
            self.emit(UpdateEvent::RestartRequired { version: target });
        } else {
            self.schedule_reload();
        }

        lock(&self.inner.control).session.reset();
        UpdateOutcome::Installed(target)
    }

    async fn record_install(&self, target: Version, delta: &[FileEntry]) -> Result<()> {
        let mut applied = self.applied_state().await?;
        applied.record_install(target, delta);
        applied.save(self.inner.collaborators.store.as_ref()).await
    }

    async fn roll_back(&self, err: UpdateError, target: Version) -> UpdateOutcome {
        warn!(error = %err, version = %target, "Install failed, rolling back");

        match self.inner.rollback.restore().await {
            Ok(snapshot) => {
                {
                    let mut control = lock(&self.inner.control);
                    control.session.mark_rolled_back(err.to_string());
                    control.pending = Pending::Nothing;
                }
                self.emit(UpdateEvent::RolledBack {
                    version: snapshot.version,
                    reason: err.to_string(),
                });
                lock(&self.inner.control).session.reset();
                UpdateOutcome::RolledBack(snapshot.version)
            }
            Err(restore_err) => {
                let message = format!("{} (install error: {})", restore_err, err);
                {
                    let mut control = lock(&self.inner.control);
                    control.session.mark_failed(message.clone());
                    control.pending = Pending::Nothing;
                }
                self.emit(UpdateEvent::RollbackFailed {
                    message,
                    version: Some(target),
                });
                UpdateOutcome::Failed(restore_err)
            }
        }
    }

    fn schedule_reload(&self) {
        let delay = self.inner.config.reload_delay();
        let installer = self.inner.collaborators.installer.clone();
        self.emit(UpdateEvent::ReloadScheduled {
            delay_ms: delay.as_millis() as u64,
        });

        let timer = TimerTask::spawn(move |mut stopped| async move {
            if !sleep_unless_stopped(delay, &mut stopped).await {
                debug!("Scheduled reload cancelled");
                return;
            }
            if let Err(e) = installer.reload().await {
                warn!(error = %e, "Reload after update failed");
            }
        });
        if let Some(previous) = lock(&self.inner.reload_task).replace(timer) {
            previous.stop();
        }
    }

    fn emit(&self, event: UpdateEvent) {
        debug!(event = event.name(), "Notify");
        self.inner.collaborators.notifier.notify(event);
    }

    fn emit_error(&self, err: &UpdateError, phase: UpdatePhase, target: Option<Version>) {
        self.emit(UpdateEvent::Error {
            message: err.to_string(),
            phase,
            kind: err.kind().to_string(),
            target_version: target,
        });
    }
}
