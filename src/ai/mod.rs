pub mod activity;
pub mod fatigue;
pub mod flow;
pub mod frequency;
pub mod heartbeat;
pub mod mode;
pub mod relevance;
pub mod session;
pub mod similarity;
pub mod state;
pub mod willingness;

#[cfg(test)]
pub(crate) mod tests;

pub use heartbeat::HeartbeatScheduler;
pub use mode::{Mode, ModeName};
pub use session::{
    Collaborators, DeclineReason, GroupEvent, InboundMessage, Outcome, SessionCoordinator,
    SkipReason, StateReport,
};
pub use state::{GroupConversationState, MessageRecord, SessionKind};
pub use willingness::{DecisionReason, TriggerKind, WillingnessEngine};
