//! Thread-safety marker traits shared by every bridge contract.
//!
//! The playback engine drives its timers and signal loop on Tokio, so every
//! host object it holds must be shareable across tasks. Bridges bound on these
//! markers instead of spelling out `Send + Sync` so the requirement can be
//! relaxed in one place for single-threaded hosts.

/// Marker trait applying `Send + Sync` to bridge implementations.
pub trait PlatformSendSync: Send + Sync {}

impl<T> PlatformSendSync for T where T: Send + Sync + ?Sized {}

/// Marker trait applying `Send` to bridge implementations.
pub trait PlatformSend: Send {}

impl<T> PlatformSend for T where T: Send + ?Sized {}
