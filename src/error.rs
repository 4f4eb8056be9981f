use thiserror::Error;

/// Device acquisition failures. All recoverable: the user retries acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No camera device found")]
    NoCamera,

    #[error("Camera access denied by the user")]
    PermissionDenied,

    #[error("Camera unavailable: {details}")]
    Unavailable { details: String },
}

/// Encoding failures. Recoverable: the session returns to ready with the
/// camera still granted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("No supported container/codec in preference list: {tried:?}")]
    UnsupportedCodec { tried: Vec<String> },

    #[error("Recorder failed mid-stream: {details}")]
    RecorderFailed { details: String },

    #[error("Recorded clip is {actual_seconds}s, required {required_seconds}s")]
    TooShort {
        actual_seconds: u64,
        required_seconds: u64,
    },
}

/// User-input problems surfaced inline. No state is mutated on the way out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Consent is required before recording")]
    ConsentRequired,

    #[error("Invalid value for {field}: {details}")]
    InvalidField { field: String, details: String },
}

/// Defensive error for illegal status jumps. Should not be reachable through
/// the normal flow; logged, never panicked on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransitionError {
    pub from: String,
    pub to: String,
}

/// Artifact upload failures. The artifact is discarded and the user
/// re-records; a stale artifact is never re-submitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Unsupported artifact type: {mime_type}")]
    UnsupportedType { mime_type: String },

    #[error("Artifact too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Upload sink rejected the artifact: {details}")]
    Rejected { details: String },

    #[error("Upload transport failed: {details}")]
    Transport { details: String },
}

/// Gateway-reported payment failures. The order is never persisted on the
/// failure path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Payment failed ({code}): {reason}")]
pub struct PaymentError {
    pub code: String,
    pub reason: String,
}

/// Backend persistence failures that the caller may retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Backend unavailable: {details}")]
    Unavailable { details: String },
}

#[derive(Error, Debug)]
pub enum VeristoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transition error: {0}")]
    Transition(#[from] InvalidTransitionError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl VeristoreError {
    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VeristoreError>;
