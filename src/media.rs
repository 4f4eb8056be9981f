use crate::config::MediaConfig;
use crate::error::{DeviceError, EncodingError};
use crate::events::{EventBus, StoreEvent};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

/// Requested capture parameters for stream acquisition
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_user: bool,
    pub want_audio: bool,
}

impl From<&MediaConfig> for MediaConstraints {
    fn from(config: &MediaConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            facing_user: config.facing_user,
            want_audio: config.want_audio,
        }
    }
}

/// Available input devices reported by the platform
#[derive(Debug, Clone, Copy)]
pub struct DeviceInventory {
    pub has_camera: bool,
    pub has_microphone: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One device track of a live stream. Only the capture engine stops tracks;
/// preview consumers read.
#[derive(Debug)]
pub struct MediaTrack {
    pub kind: TrackKind,
    active: AtomicBool,
}

impl MediaTrack {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Live audio/video stream handle. The generation token identifies one
/// acquisition; timers carrying a stale generation must treat their firing
/// as a no-op.
#[derive(Debug)]
pub struct MediaStream {
    generation: u64,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(generation: u64, has_audio: bool) -> Self {
        let mut tracks = vec![MediaTrack::new(TrackKind::Video)];
        if has_audio {
            tracks.push(MediaTrack::new(TrackKind::Audio));
        }
        Self { generation, tracks }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Audio)
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_active())
    }

    /// Stop every track. Idempotent at the track level.
    fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Immutable recorded clip handed to the verification flow
#[derive(Debug, Clone)]
pub struct RecordedArtifact {
    pub data: Bytes,
    pub mime_type: String,
    pub duration: Duration,
}

impl RecordedArtifact {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Platform boundary for camera/microphone I/O
#[async_trait::async_trait]
pub trait MediaDevice: Send + Sync {
    /// List available input devices
    async fn enumerate(&self) -> Result<DeviceInventory, DeviceError>;

    /// Open a live stream under the given constraints. Opening a stream
    /// toggles the hardware camera indicator, so this must never be called
    /// speculatively.
    async fn open_stream(
        &self,
        constraints: &MediaConstraints,
        generation: u64,
    ) -> Result<MediaStream, DeviceError>;

    /// Whether the platform recorder supports the given container/codec
    fn supports_mime(&self, mime: &str) -> bool;

    /// Read one encoded time slice from the live stream
    async fn read_slice(&self, generation: u64, window: Duration) -> Result<Bytes, EncodingError>;
}

/// Media capture engine: the device I/O boundary for identity video capture.
/// Owns at most one live stream at a time.
pub struct CaptureEngine {
    device: Arc<dyn MediaDevice>,
    constraints: MediaConstraints,
    codec_preference: Vec<String>,
    slice_ms: u64,
    stream: Option<MediaStream>,
    acquiring: bool,
    generation: AtomicU64,
    event_bus: EventBus,
}

impl CaptureEngine {
    pub fn new(device: Arc<dyn MediaDevice>, config: &MediaConfig, event_bus: EventBus) -> Self {
        Self {
            device,
            constraints: MediaConstraints::from(config),
            codec_preference: config.codec_preference.clone(),
            slice_ms: config.slice_ms,
            stream: None,
            acquiring: false,
            generation: AtomicU64::new(0),
            event_bus,
        }
    }

    /// Request a combined audio+video stream, falling back to video-only
    /// when no microphone is present. Re-entrant calls while an acquisition
    /// is in flight or a stream is live are rejected.
    pub async fn acquire(&mut self) -> Result<u64, DeviceError> {
        if self.acquiring || self.stream.is_some() {
            warn!("Rejecting overlapping stream acquisition");
            return Err(DeviceError::Unavailable {
                details: "a stream acquisition is already active".to_string(),
            });
        }
        self.acquiring = true;

        let result = self.acquire_inner().await;
        self.acquiring = false;

        match result {
            Ok(generation) => Ok(generation),
            Err(e) => {
                // Acquisition errors must not leave a partial stream behind.
                self.release();
                Err(e)
            }
        }
    }

    async fn acquire_inner(&mut self) -> Result<u64, DeviceError> {
        let inventory = self.device.enumerate().await?;

        if !inventory.has_camera {
            return Err(DeviceError::NoCamera);
        }

        let mut constraints = self.constraints.clone();
        if constraints.want_audio && !inventory.has_microphone {
            debug!("No microphone present, falling back to video-only capture");
            constraints.want_audio = false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stream = self.device.open_stream(&constraints, generation).await?;

        info!(
            "Stream acquired (generation {}, audio: {})",
            generation,
            stream.has_audio()
        );
        self.event_bus.publish(StoreEvent::CameraAcquired {
            stream_generation: generation,
            has_audio: stream.has_audio(),
            timestamp: SystemTime::now(),
        });

        self.stream = Some(stream);
        Ok(generation)
    }

    /// Stop every track of the active stream and clear the handle.
    /// Idempotent; safe to call with no stream active.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            info!("Stream released (generation {})", stream.generation());
            self.event_bus.publish(StoreEvent::CameraReleased {
                timestamp: SystemTime::now(),
            });
        } else {
            debug!("Release called with no active stream");
        }
    }

    /// Read-only stream handle for the live preview
    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Select the first supported container/codec and start a recorder over
    /// the active stream.
    pub fn begin_encoding(&self) -> Result<Recorder, EncodingError> {
        let stream = self.stream.as_ref().ok_or(EncodingError::RecorderFailed {
            details: "no active stream".to_string(),
        })?;

        let mime_type = self
            .codec_preference
            .iter()
            .find(|mime| self.device.supports_mime(mime))
            .cloned()
            .ok_or_else(|| EncodingError::UnsupportedCodec {
                tried: self.codec_preference.clone(),
            })?;

        debug!("Selected recording mime type: {}", mime_type);

        Ok(Recorder {
            device: Arc::clone(&self.device),
            generation: stream.generation(),
            mime_type,
            slice: Duration::from_millis(self.slice_ms),
            chunks: Vec::new(),
        })
    }
}

/// Accumulates fixed-size encoded time slices and concatenates them into one
/// immutable artifact on finish.
pub struct Recorder {
    device: Arc<dyn MediaDevice>,
    generation: u64,
    mime_type: String,
    slice: Duration,
    chunks: Vec<Bytes>,
}

// Manual impl: the device handle is not Debug.
impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("generation", &self.generation)
            .field("mime_type", &self.mime_type)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl Recorder {
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Seconds of media accumulated so far
    pub fn recorded_duration(&self) -> Duration {
        self.slice * self.chunks.len() as u32
    }

    /// Capture one second of media as consecutive slices
    pub async fn capture_second(&mut self) -> Result<(), EncodingError> {
        let slices_per_second = (1000 / self.slice.as_millis().max(1)) as usize;
        for _ in 0..slices_per_second {
            let chunk = self.device.read_slice(self.generation, self.slice).await?;
            if !chunk.is_empty() {
                trace!("Appended {} byte slice", chunk.len());
                self.chunks.push(chunk);
            }
        }
        Ok(())
    }

    /// Concatenate slices into one immutable artifact. Clips shorter than
    /// the required duration are rejected so no alternate entry point can
    /// submit a clipped recording.
    pub fn finish(self, required: Duration) -> Result<RecordedArtifact, EncodingError> {
        let duration = self.slice * self.chunks.len() as u32;
        if duration < required {
            return Err(EncodingError::TooShort {
                actual_seconds: duration.as_secs(),
                required_seconds: required.as_secs(),
            });
        }

        let mut data = BytesMut::with_capacity(self.chunks.iter().map(|c| c.len()).sum());
        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }

        info!(
            "Recording finalized: {} bytes, {:?}, {}",
            data.len(),
            duration,
            self.mime_type
        );

        Ok(RecordedArtifact {
            data: data.freeze(),
            mime_type: self.mime_type,
            duration,
        })
    }
}

/// Scriptable failure modes for the mock device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    None,
    NoCamera,
    PermissionDenied,
    Unavailable,
    RecorderFaultAtSlice(usize),
}

/// In-process media device used by the demo binary and the tests. Produces
/// deterministic pseudo-encoded slices instead of touching real hardware.
pub struct MockMediaDevice {
    failure: parking_lot::Mutex<MockFailure>,
    has_microphone: AtomicBool,
    supported_mimes: Vec<String>,
    slice_counter: AtomicUsize,
}

impl MockMediaDevice {
    pub fn new() -> Self {
        Self {
            failure: parking_lot::Mutex::new(MockFailure::None),
            has_microphone: AtomicBool::new(true),
            supported_mimes: vec![
                "video/webm;codecs=vp9".to_string(),
                "video/webm;codecs=vp8".to_string(),
                "video/webm".to_string(),
            ],
            slice_counter: AtomicUsize::new(0),
        }
    }

    pub fn with_supported_mimes(mimes: Vec<String>) -> Self {
        let mut device = Self::new();
        device.supported_mimes = mimes;
        device
    }

    pub fn set_failure(&self, failure: MockFailure) {
        *self.failure.lock() = failure;
    }

    pub fn set_microphone(&self, present: bool) {
        self.has_microphone.store(present, Ordering::SeqCst);
    }
}

impl Default for MockMediaDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaDevice for MockMediaDevice {
    async fn enumerate(&self) -> Result<DeviceInventory, DeviceError> {
        if *self.failure.lock() == MockFailure::NoCamera {
            return Ok(DeviceInventory {
                has_camera: false,
                has_microphone: self.has_microphone.load(Ordering::SeqCst),
            });
        }
        Ok(DeviceInventory {
            has_camera: true,
            has_microphone: self.has_microphone.load(Ordering::SeqCst),
        })
    }

    async fn open_stream(
        &self,
        constraints: &MediaConstraints,
        generation: u64,
    ) -> Result<MediaStream, DeviceError> {
        match *self.failure.lock() {
            MockFailure::PermissionDenied => Err(DeviceError::PermissionDenied),
            MockFailure::Unavailable => Err(DeviceError::Unavailable {
                details: "device busy".to_string(),
            }),
            _ => {
                debug!(
                    "Mock stream opened at {}x{} (generation {})",
                    constraints.width, constraints.height, generation
                );
                Ok(MediaStream::new(generation, constraints.want_audio))
            }
        }
    }

    fn supports_mime(&self, mime: &str) -> bool {
        self.supported_mimes.iter().any(|m| m == mime)
    }

    async fn read_slice(&self, generation: u64, window: Duration) -> Result<Bytes, EncodingError> {
        let index = self.slice_counter.fetch_add(1, Ordering::SeqCst);

        if let MockFailure::RecorderFaultAtSlice(fault_at) = *self.failure.lock() {
            if index >= fault_at {
                return Err(EncodingError::RecorderFailed {
                    details: format!("mock recorder fault at slice {}", index),
                });
            }
        }

        // Deterministic pattern keyed on generation and slice index.
        let mut data = vec![0u8; 256];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = ((generation as usize + index + i) % 256) as u8;
        }
        trace!("Mock slice {} ({:?} window)", index, window);
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine(device: Arc<MockMediaDevice>) -> CaptureEngine {
        CaptureEngine::new(device, &MediaConfig::default(), EventBus::new(10))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let device = Arc::new(MockMediaDevice::new());
        let mut engine = test_engine(Arc::clone(&device));

        let generation = engine.acquire().await.unwrap();
        assert_eq!(generation, 1);
        assert!(engine.has_stream());
        assert!(engine.stream().unwrap().has_audio());

        engine.release();
        assert!(!engine.has_stream());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let device = Arc::new(MockMediaDevice::new());
        let mut engine = test_engine(device);

        engine.acquire().await.unwrap();
        engine.release();
        // Second release with no stream must be a no-op.
        engine.release();
        assert!(!engine.has_stream());
    }

    #[tokio::test]
    async fn test_no_camera_error() {
        let device = Arc::new(MockMediaDevice::new());
        device.set_failure(MockFailure::NoCamera);
        let mut engine = test_engine(device);

        let err = engine.acquire().await.unwrap_err();
        assert_eq!(err, DeviceError::NoCamera);
        assert!(!engine.has_stream());
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_no_stream() {
        let device = Arc::new(MockMediaDevice::new());
        device.set_failure(MockFailure::PermissionDenied);
        let mut engine = test_engine(device);

        let err = engine.acquire().await.unwrap_err();
        assert_eq!(err, DeviceError::PermissionDenied);
        assert!(!engine.has_stream());
    }

    #[tokio::test]
    async fn test_video_only_fallback_without_microphone() {
        let device = Arc::new(MockMediaDevice::new());
        device.set_microphone(false);
        let mut engine = test_engine(device);

        engine.acquire().await.unwrap();
        assert!(!engine.stream().unwrap().has_audio());
    }

    #[tokio::test]
    async fn test_overlapping_acquire_is_rejected() {
        let device = Arc::new(MockMediaDevice::new());
        let mut engine = test_engine(device);

        engine.acquire().await.unwrap();
        let err = engine.acquire().await.unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable { .. }));
        // The original stream must survive the rejected call.
        assert!(engine.has_stream());
    }

    #[tokio::test]
    async fn test_codec_preference_order() {
        let device = Arc::new(MockMediaDevice::with_supported_mimes(vec![
            "video/webm".to_string(),
            "video/mp4".to_string(),
        ]));
        let mut engine = test_engine(device);
        engine.acquire().await.unwrap();

        let recorder = engine.begin_encoding().unwrap();
        // vp9/vp8 unsupported, so the first supported entry wins.
        assert_eq!(recorder.mime_type(), "video/webm");
        // The recorder formats for diagnostics without exposing the device.
        let rendered = format!("{:?}", recorder);
        assert!(rendered.contains("video/webm"));
        assert!(!rendered.contains("device"));
    }

    #[tokio::test]
    async fn test_unsupported_codec() {
        let device = Arc::new(MockMediaDevice::with_supported_mimes(vec![]));
        let mut engine = test_engine(device);
        engine.acquire().await.unwrap();

        let err = engine.begin_encoding().unwrap_err();
        assert!(matches!(err, EncodingError::UnsupportedCodec { .. }));
    }

    #[tokio::test]
    async fn test_recorder_accumulates_full_clip() {
        let device = Arc::new(MockMediaDevice::new());
        let mut engine = test_engine(device);
        engine.acquire().await.unwrap();

        let mut recorder = engine.begin_encoding().unwrap();
        for _ in 0..8 {
            recorder.capture_second().await.unwrap();
        }
        assert_eq!(recorder.recorded_duration(), Duration::from_secs(8));

        let artifact = recorder.finish(Duration::from_secs(8)).unwrap();
        assert_eq!(artifact.duration, Duration::from_secs(8));
        assert_eq!(artifact.mime_type, "video/webm;codecs=vp9");
        assert!(artifact.size_bytes() > 0);
    }

    #[tokio::test]
    async fn test_short_clip_is_rejected() {
        let device = Arc::new(MockMediaDevice::new());
        let mut engine = test_engine(device);
        engine.acquire().await.unwrap();

        let mut recorder = engine.begin_encoding().unwrap();
        for _ in 0..3 {
            recorder.capture_second().await.unwrap();
        }

        let err = recorder.finish(Duration::from_secs(8)).unwrap_err();
        assert_eq!(
            err,
            EncodingError::TooShort {
                actual_seconds: 3,
                required_seconds: 8,
            }
        );
    }

    #[tokio::test]
    async fn test_recorder_fault_mid_stream() {
        let device = Arc::new(MockMediaDevice::new());
        device.set_failure(MockFailure::RecorderFaultAtSlice(5));
        let mut engine = test_engine(device);
        engine.acquire().await.unwrap();

        let mut recorder = engine.begin_encoding().unwrap();
        let err = recorder.capture_second().await.unwrap_err();
        assert!(matches!(err, EncodingError::RecorderFailed { .. }));
    }
}
