//! # Audio Module
//!
//! Playback side of the bot: the per-guild sessions and everything they need
//! to talk to a voice channel.
//!
//! ## Architecture
//!
//! ### [`manager`] - Session registry
//! - One [`session::SessionHandle`] per guild, created on `/join` or the first `/play`
//! - Closed sessions (idle disconnect, `/leave`, kicked) are replaced on next use
//!
//! ### [`session`] - Playback session actor
//! - Strict FIFO queue with background prefetch of the next entry
//! - At most one download in flight per session
//! - Deferred deletion of played files and an idle disconnect timer
//!
//! ### [`queue`] - Ticketed FIFO queue
//!
//! ### [`voice`] / [`player`] - Voice seams
//! - [`voice`] defines the traits sessions are driven through
//! - [`player`] implements them on top of songbird

pub mod manager;
pub mod player;
pub mod queue;
pub mod session;
pub mod voice;

pub use manager::MusicManager;
