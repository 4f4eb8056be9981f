use crate::config::RecordingConfig;
use crate::error::{DeviceError, EncodingError};
use crate::events::{EventBus, StoreEvent};
use crate::media::{CaptureEngine, RecordedArtifact, Recorder};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle states of one recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Idle,
    Preparing,
    Ready,
    Countdown,
    Recording,
    Recorded,
    Uploading,
    Error,
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingStatus::Idle => "idle",
            RecordingStatus::Preparing => "preparing",
            RecordingStatus::Ready => "ready",
            RecordingStatus::Countdown => "countdown",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Recorded => "recorded",
            RecordingStatus::Uploading => "uploading",
            RecordingStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Orchestrates the capture engine through one fixed-duration recording.
///
/// All timers are funnelled through `tick()`: a single monotonic counter
/// advanced once per scheduler second. Ticks carry the session generation
/// issued when their timer was started; a tick with a stale generation is a
/// no-op, so a dangling timer that fires after `release()` cannot corrupt a
/// newer attempt.
pub struct RecordingSession {
    engine: CaptureEngine,
    config: RecordingConfig,
    order_id: String,
    status: RecordingStatus,
    countdown_remaining: u64,
    elapsed_seconds: u64,
    recorder: Option<Recorder>,
    artifact: Option<RecordedArtifact>,
    error_message: Option<String>,
    timer_generation: u64,
    cancel: CancellationToken,
    event_bus: EventBus,
}

impl RecordingSession {
    pub fn new(
        engine: CaptureEngine,
        config: RecordingConfig,
        order_id: String,
        event_bus: EventBus,
    ) -> Self {
        Self {
            engine,
            config,
            order_id,
            status: RecordingStatus::Idle,
            countdown_remaining: 0,
            elapsed_seconds: 0,
            recorder: None,
            artifact: None,
            error_message: None,
            timer_generation: 0,
            cancel: CancellationToken::new(),
            event_bus,
        }
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn countdown_remaining(&self) -> u64 {
        self.countdown_remaining
    }

    /// Human-readable cause of the last failure, surfaced to the user
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// idle -> preparing -> ready | error. Acquisition failures are handled
    /// locally as an explicit error state, never as an exception.
    pub async fn start(&mut self) -> RecordingStatus {
        if self.status != RecordingStatus::Idle {
            warn!(
                "start ignored in status {} (re-entrancy guard)",
                self.status
            );
            return self.status;
        }

        self.status = RecordingStatus::Preparing;
        self.error_message = None;

        match self.engine.acquire().await {
            Ok(generation) => {
                debug!("Recording session ready (stream generation {})", generation);
                self.status = RecordingStatus::Ready;
            }
            Err(e) => {
                // The engine guarantees no partial stream survives a failed
                // acquisition; the session only records the cause.
                self.error_message = Some(Self::device_error_message(&e));
                self.status = RecordingStatus::Error;
            }
        }
        self.status
    }

    /// error -> idle, after the user has seen the message
    pub fn acknowledge_error(&mut self) {
        if self.status == RecordingStatus::Error {
            self.status = RecordingStatus::Idle;
            self.error_message = None;
        }
    }

    /// ready -> countdown. Returns the generation token the driving timer
    /// must present on every tick.
    pub fn begin_countdown(&mut self) -> Option<u64> {
        if self.status != RecordingStatus::Ready {
            warn!("begin_countdown ignored in status {}", self.status);
            return None;
        }
        self.status = RecordingStatus::Countdown;
        self.countdown_remaining = self.config.countdown_seconds;
        self.timer_generation += 1;
        Some(self.timer_generation)
    }

    /// countdown -> ready, when the user navigates away before it elapses.
    /// Invalidates the pending timer by bumping the generation.
    pub fn cancel_countdown(&mut self) {
        if self.status == RecordingStatus::Countdown {
            self.timer_generation += 1;
            self.countdown_remaining = 0;
            self.status = RecordingStatus::Ready;
            debug!("Countdown cancelled, back to ready");
        }
    }

    /// Advance the state machine by one scheduler second. No-op for stale
    /// generations and for states that own no timer.
    pub async fn tick(&mut self, generation: u64) -> RecordingStatus {
        if generation != self.timer_generation {
            debug!(
                "Stale tick ignored (generation {} != {})",
                generation, self.timer_generation
            );
            return self.status;
        }

        match self.status {
            RecordingStatus::Countdown => {
                self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
                self.event_bus.publish(StoreEvent::CountdownTick {
                    remaining_seconds: self.countdown_remaining,
                    timestamp: SystemTime::now(),
                });
                if self.countdown_remaining == 0 {
                    self.begin_recording();
                }
            }
            RecordingStatus::Recording => {
                self.record_second().await;
            }
            _ => {
                debug!("Tick ignored in status {}", self.status);
            }
        }
        self.status
    }

    /// countdown(0) -> recording, or back to ready on an encoding failure
    /// with the camera still granted.
    fn begin_recording(&mut self) {
        match self.engine.begin_encoding() {
            Ok(recorder) => {
                self.recorder = Some(recorder);
                self.elapsed_seconds = 0;
                self.status = RecordingStatus::Recording;
                info!("Recording started for order {}", self.order_id);
                self.event_bus.publish(StoreEvent::RecordingStarted {
                    order_id: self.order_id.clone(),
                    timestamp: SystemTime::now(),
                });
            }
            Err(e) => {
                self.fail_encoding(e);
            }
        }
    }

    async fn record_second(&mut self) {
        let mut recorder = match self.recorder.take() {
            Some(r) => r,
            None => {
                // Defensive: recording without a recorder is a programming
                // error, logged rather than panicked on.
                warn!("Recording tick with no recorder; returning to ready");
                self.status = RecordingStatus::Ready;
                return;
            }
        };

        if let Err(e) = recorder.capture_second().await {
            self.fail_encoding(e);
            return;
        }

        self.elapsed_seconds += 1;

        if self.elapsed_seconds >= self.config.duration_seconds {
            // Authoritative stop condition: the fixed duration elapsed.
            match recorder.finish(Duration::from_secs(self.config.duration_seconds)) {
                Ok(artifact) => {
                    self.timer_generation += 1;
                    self.engine.release();
                    info!(
                        "Auto-stop after {}s, artifact {} bytes",
                        self.elapsed_seconds,
                        artifact.size_bytes()
                    );
                    self.event_bus.publish(StoreEvent::RecordingCompleted {
                        order_id: self.order_id.clone(),
                        artifact_bytes: artifact.size_bytes(),
                        mime_type: artifact.mime_type.clone(),
                    });
                    self.artifact = Some(artifact);
                    self.status = RecordingStatus::Recorded;
                }
                Err(e) => self.fail_encoding(e),
            }
        } else {
            self.recorder = Some(recorder);
        }
    }

    /// Encoding failures return to ready (not idle) so the user can retry
    /// without re-granting camera permission.
    fn fail_encoding(&mut self, e: EncodingError) {
        warn!("Encoding failure: {}", e);
        self.timer_generation += 1;
        self.recorder = None;
        self.error_message = Some(format!("Recording failed: {}. Please try again.", e));
        self.status = RecordingStatus::Ready;
    }

    /// recorded -> preparing -> ready | error. Discards the artifact and
    /// releases the retained stream before re-acquiring: the two streams
    /// must never overlap.
    pub async fn retry(&mut self) -> RecordingStatus {
        if self.status != RecordingStatus::Recorded {
            warn!("retry ignored in status {}", self.status);
            return self.status;
        }

        self.artifact = None;
        self.elapsed_seconds = 0;
        self.timer_generation += 1;
        self.engine.release();

        self.status = RecordingStatus::Preparing;
        match self.engine.acquire().await {
            Ok(_) => self.status = RecordingStatus::Ready,
            Err(e) => {
                self.error_message = Some(Self::device_error_message(&e));
                self.status = RecordingStatus::Error;
            }
        }
        self.status
    }

    /// recorded -> uploading. One-way, non-cancelable handoff of the
    /// artifact to the verification flow.
    pub fn confirm(&mut self) -> Option<RecordedArtifact> {
        if self.status != RecordingStatus::Recorded {
            warn!("confirm ignored in status {}", self.status);
            return None;
        }
        let artifact = self.artifact.take();
        if artifact.is_some() {
            self.status = RecordingStatus::Uploading;
        }
        artifact
    }

    /// Release every held resource. Called on navigate-away and component
    /// teardown; guaranteed on every exit path.
    pub fn teardown(&mut self) {
        self.cancel.cancel();
        self.timer_generation += 1;
        self.recorder = None;
        self.artifact = None;
        self.engine.release();
        self.status = RecordingStatus::Idle;
        debug!("Recording session torn down");
    }

    /// Drive countdown and recording to completion on a 1 Hz interval.
    /// Returns the terminal status (recorded, ready after an encoding
    /// failure, or whatever state cancellation left behind).
    pub async fn run_to_recorded(&mut self) -> RecordingStatus {
        let generation = match self.begin_countdown() {
            Some(g) => g,
            None => return self.status,
        };

        let cancel = self.cancel.clone();
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick of a tokio interval fires immediately; skip it so
        // each subsequent tick marks one elapsed second.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let status = self.tick(generation).await;
                    match status {
                        RecordingStatus::Recorded | RecordingStatus::Ready | RecordingStatus::Error => {
                            return status;
                        }
                        _ => {}
                    }
                }
                _ = cancel.cancelled() => {
                    warn!("Recording driver cancelled");
                    self.cancel_countdown();
                    self.engine.release();
                    return self.status;
                }
            }
        }
    }

    fn device_error_message(e: &DeviceError) -> String {
        match e {
            DeviceError::NoCamera => {
                "No camera found. Make sure a camera is connected.".to_string()
            }
            DeviceError::PermissionDenied => {
                "Camera access denied. Allow access in your browser settings.".to_string()
            }
            DeviceError::Unavailable { details } => format!("Camera error: {}", details),
        }
    }

    #[cfg(test)]
    fn has_stream(&self) -> bool {
        self.engine.has_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::media::{MockFailure, MockMediaDevice};
    use std::sync::Arc;

    fn session_with(device: Arc<MockMediaDevice>) -> RecordingSession {
        let bus = EventBus::new(32);
        let engine = CaptureEngine::new(device, &MediaConfig::default(), bus.clone());
        RecordingSession::new(engine, RecordingConfig::default(), "ORD-123456".to_string(), bus)
    }

    async fn drive_to_recorded(session: &mut RecordingSession) {
        let generation = session.begin_countdown().unwrap();
        // 3 countdown ticks, then 8 recording ticks.
        for _ in 0..11 {
            session.tick(generation).await;
        }
    }

    #[tokio::test]
    async fn test_start_reaches_ready_or_error_never_preparing() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        let status = session.start().await;
        assert_eq!(status, RecordingStatus::Ready);

        let device = Arc::new(MockMediaDevice::new());
        device.set_failure(MockFailure::PermissionDenied);
        let mut session = session_with(device);
        let status = session.start().await;
        assert_eq!(status, RecordingStatus::Error);
        assert!(session.error_message().unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn test_error_acknowledge_returns_to_idle() {
        let device = Arc::new(MockMediaDevice::new());
        device.set_failure(MockFailure::NoCamera);
        let mut session = session_with(device);

        session.start().await;
        assert_eq!(session.status(), RecordingStatus::Error);
        session.acknowledge_error();
        assert_eq!(session.status(), RecordingStatus::Idle);
        assert!(session.error_message().is_none());
    }

    #[tokio::test]
    async fn test_countdown_reaches_recording() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;

        let generation = session.begin_countdown().unwrap();
        assert_eq!(session.countdown_remaining(), 3);

        session.tick(generation).await;
        session.tick(generation).await;
        assert_eq!(session.status(), RecordingStatus::Countdown);
        session.tick(generation).await;
        assert_eq!(session.status(), RecordingStatus::Recording);
    }

    #[tokio::test]
    async fn test_countdown_cancel_clears_timer() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;

        let generation = session.begin_countdown().unwrap();
        session.tick(generation).await;
        session.cancel_countdown();
        assert_eq!(session.status(), RecordingStatus::Ready);

        // The old timer firing after cancellation must be a no-op.
        let status = session.tick(generation).await;
        assert_eq!(status, RecordingStatus::Ready);
    }

    #[tokio::test]
    async fn test_auto_stop_at_fixed_duration() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;
        drive_to_recorded(&mut session).await;

        assert_eq!(session.status(), RecordingStatus::Recorded);
        assert_eq!(session.elapsed_seconds(), 8);
        // Stream is released on auto-stop.
        assert!(!session.has_stream());
    }

    #[tokio::test]
    async fn test_stale_tick_after_recorded_is_noop() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;
        let generation = session.begin_countdown().unwrap();
        for _ in 0..11 {
            session.tick(generation).await;
        }
        assert_eq!(session.status(), RecordingStatus::Recorded);

        // A dangling timer firing after release() must change nothing.
        let status = session.tick(generation).await;
        assert_eq!(status, RecordingStatus::Recorded);
        assert_eq!(session.elapsed_seconds(), 8);
    }

    #[tokio::test]
    async fn test_retry_releases_before_reacquire() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;
        drive_to_recorded(&mut session).await;
        assert_eq!(session.status(), RecordingStatus::Recorded);

        let status = session.retry().await;
        assert_eq!(status, RecordingStatus::Ready);
        // The artifact is gone and a fresh stream is live. Overlap is
        // impossible because the engine rejects acquire while a stream is
        // held, so reaching Ready proves release happened first.
        assert!(session.confirm().is_none());
        assert!(session.has_stream());
    }

    #[tokio::test]
    async fn test_confirm_hands_off_artifact_once() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;
        drive_to_recorded(&mut session).await;

        let artifact = session.confirm().unwrap();
        assert_eq!(artifact.duration, Duration::from_secs(8));
        assert_eq!(session.status(), RecordingStatus::Uploading);

        // Second confirm has nothing left to hand off.
        assert!(session.confirm().is_none());
    }

    #[tokio::test]
    async fn test_encoding_failure_returns_to_ready() {
        let device = Arc::new(MockMediaDevice::new());
        device.set_failure(MockFailure::RecorderFaultAtSlice(12));
        let mut session = session_with(device);
        session.start().await;

        let generation = session.begin_countdown().unwrap();
        for _ in 0..6 {
            session.tick(generation).await;
        }

        // Camera stays granted so the user can retry without re-permission.
        assert_eq!(session.status(), RecordingStatus::Ready);
        assert!(session.has_stream());
        assert!(session.error_message().unwrap().contains("try again"));
    }

    #[tokio::test]
    async fn test_unsupported_codec_returns_to_ready() {
        let device = Arc::new(MockMediaDevice::with_supported_mimes(vec![]));
        let mut session = session_with(device);
        session.start().await;

        let generation = session.begin_countdown().unwrap();
        for _ in 0..3 {
            session.tick(generation).await;
        }
        assert_eq!(session.status(), RecordingStatus::Ready);
        assert!(session.error_message().is_some());
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;
        session.begin_countdown().unwrap();

        session.teardown();
        assert_eq!(session.status(), RecordingStatus::Idle);
        assert!(!session.has_stream());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_to_recorded_with_virtual_time() {
        let mut session = session_with(Arc::new(MockMediaDevice::new()));
        session.start().await;

        let status = session.run_to_recorded().await;
        assert_eq!(status, RecordingStatus::Recorded);
        assert_eq!(session.elapsed_seconds(), 8);
    }
}
