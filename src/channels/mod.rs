//! Channel collaborator interface.
//!
//! A **channel** is any transport layer that delivers [`traits::ChannelMessage`]s
//! between the Agent Loop and an external peer (webhook, chat platform, etc.).
//! Concrete channel implementations are collaborators outside the core crate's
//! scope; this module carries only the trait contract.

pub mod traits;

pub use traits::{Channel, ChannelEvent, ChannelMessage};
