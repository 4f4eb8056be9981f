pub mod cart;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod order;
pub mod recording;
pub mod services;
pub mod verification;

pub use cart::{CartItem, CartPersistence, CartStore, JsonCartPersistence};
pub use config::{
    CheckoutConfig, MediaConfig, RecordingConfig, SystemConfig, VerificationConfig,
    VeristoreConfig,
};
pub use error::{
    BackendError, DeviceError, EncodingError, InvalidTransitionError, PaymentError, Result,
    UploadError, ValidationError, VeristoreError,
};
pub use events::{spawn_notifier, EventBus, StoreEvent};
pub use media::{
    CaptureEngine, DeviceInventory, MediaConstraints, MediaDevice, MediaStream, MediaTrack, MockFailure,
    MockMediaDevice, RecordedArtifact, Recorder, TrackKind,
};
pub use order::{
    CheckoutOutcome, Customer, DeliveryDetails, DeliveryMethod, Order, OrderCoordinator,
    OrderItem, OrderStatus, PaymentMethod, PaymentSummary, Route, VerificationStatus,
};
pub use recording::{RecordingSession, RecordingStatus};
pub use services::{
    InMemoryCatalog, InMemoryOrderBackend, MemoryUploadSink, MockPaymentGateway, OrderBackend,
    PaymentDetails, PaymentGateway, PaymentReceipt, PaymentReceiptStatus, Product,
    ProductCatalog, StoredUpload, UploadSink,
};
pub use verification::{VerificationFlow, VerificationStep};
