pub mod backend;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod event;
pub mod markers;
pub mod session;
pub mod transcript;

// Re-export main types for convenience
pub use backend::{ByteStream, ChatBackend, HttpChatBackend};
pub use config::Config;
pub use controller::{ChatSessionController, ControllerState, Rejection, TurnOutcome};
pub use decoder::{decode_stream, LineDecoder};
pub use error::ChatError;
pub use event::{DonePayload, ErrorCode, ErrorPayload, StreamEvent};
pub use markers::{Marker, MarkerKind, MarkerRegistry, MarkerSink, SideEffectDispatcher};
pub use session::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, Navigator, SessionGuard,
};
pub use transcript::{reduce, Message, MessageId, Transcript};
