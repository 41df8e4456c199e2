pub mod codec;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod ingest;
pub mod notices;
pub mod session;

pub use config::FitroomConfig;
pub use errors::{
    CompressionError, ConfigError, EncodingError, GatewayError, GenerateError, IngestError,
    ValidationError,
};
pub use gateway::{
    default_gateway_registry, CancelToken, GatewayRegistry, GenerationGateway, GenerationRequest,
};
pub use ingest::{IngestOutcome, IngestionController, SlotState, SourceFile};
pub use notices::{Notice, NoticeLevel};
pub use session::{new_session_id, SessionStatus, SlotStatus, Studio};
