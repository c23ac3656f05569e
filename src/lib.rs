//! Group-chat engagement engine for the Kokoro companion.
//!
//! Decides, per group and per event, whether the bot should speak: activity,
//! relevance, fatigue, a frequency governor, an engagement mode and flow
//! energy feed one willingness score; extension sessions (immersive follow-up,
//! proactive watch) keep the bot in a conversation once it has joined.

pub mod ai;
pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod llm;
pub mod logging;
pub mod service;

pub use ai::{
    Collaborators, DeclineReason, GroupEvent, InboundMessage, Outcome, SessionCoordinator,
    SkipReason, StateReport,
};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::EngineConfig;
pub use error::{DeliveryError, EngineError, EngineResult};
pub use host::{GroupFilter, GroupListConfig, ImpressionStore, InMemoryImpressionStore, ReplyDispatcher};
pub use service::GroupChatService;
