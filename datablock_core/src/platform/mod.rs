//! Host platform primitives: named shared memory, monotonic time, and
//! process identity/liveness.
//!
//! The rest of the crate talks to this module only through the functions
//! re-exported here, never to `libc`/`nix` directly, so a second backend
//! (e.g. a BSD or illumos port) can be added by adding a sibling module
//! and switching the `cfg`-gated re-export below. Today only Linux is
//! implemented, matching the single-host assumption of the engine.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;
