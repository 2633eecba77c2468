//! Domain logic of the shopping assistant: the session pipeline, the tool
//! registry and the seams to the outside world (live session, audio devices,
//! speech synthesis, grocery backend).
//!
//! Nothing in here opens a socket or a sound card directly. The service
//! binary supplies the adapters.

pub mod audio;
pub mod cart_matcher;
pub mod commerce;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod speech;
pub mod tools;

pub use audio::{
    AudioDevices, AudioFormat, AudioStream, CaptureStream, DeviceSlot, PlaybackQueue,
    PlaybackStream, StopSignal,
};
pub use cart_matcher::{CartMatcher, FuzzyCartMatcher, LlmCartMatcher, MatchedProduct};
pub use commerce::CommerceBackend;
pub use error::{Fault, OrchestratorError, ToolError};
pub use events::{InboundEvent, OutboundEvent, SessionMessage, ToolCall, ToolResult};
pub use orchestrator::{OrchestratorConfig, SessionOrchestrator};
pub use session::{
    LiveConnector, ResponseMode, SessionConfig, SessionReader, SessionState, SessionWriter,
};
pub use speech::SpeechSynthesizer;
pub use tools::{ToolHandler, ToolRegistry, picnic_registry, register_picnic_tools};
