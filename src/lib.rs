//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates (`core-playback`, `core-runtime`, `bridge-desktop`). Host shells can
//! depend on `audiobook-workspace` and enable the documented features instead
//! of wiring each crate individually.

#[cfg(feature = "engine")]
pub use core_playback as playback;

#[cfg(feature = "engine")]
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;
