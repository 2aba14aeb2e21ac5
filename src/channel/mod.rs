//! Transports between the interception engine and the agent

pub mod cache;
pub mod contract;
pub mod error;
pub mod mailbox;
pub mod mock;
pub mod recording;
pub mod replay;

pub use cache::CachingAgentChannel;
pub use contract::AgentChannel;
pub use error::ChannelError;
pub use mailbox::{mailbox, MailboxAgent, MailboxChannel, MailboxResponder};
pub use mock::{MockAgentChannel, MockConfig, MockDirectiveBuilder};
pub use recording::RecordingAgentChannel;
pub use replay::ReplayAgentChannel;
