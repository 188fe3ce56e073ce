//! Holder identity: the `(pid, tid, token)` triple every lock owner and
//! every slot writer is tagged with (§3 "Identity").
//!
//! A process/thread owner is `(pid, tid, 0)`; an in-process token-mode
//! owner — used for a handoff between two async tasks on the same
//! thread that must not be confused with a plain OS-thread owner — is
//! `(0, 0, token)`. Tokens are allocated from a per-process monotonic
//! counter starting at 1, so `token == 0` unambiguously means "not a
//! token-mode identity" and the all-zero identity unambiguously means
//! "unowned": no real pid is 0 and no real token is 0.

use crate::platform;
use std::sync::atomic::{AtomicU64, Ordering};

/// The identity of a lock holder or slot writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnerIdentity {
    pub pid: u32,
    pub tid: u32,
    pub token: u64,
}

impl OwnerIdentity {
    /// The sentinel identity meaning "no owner".
    pub const NONE: OwnerIdentity = OwnerIdentity {
        pid: 0,
        tid: 0,
        token: 0,
    };

    /// The identity of the calling OS thread.
    pub fn current_thread() -> OwnerIdentity {
        OwnerIdentity {
            pid: platform::current_pid(),
            tid: platform::current_tid() as u32,
            token: 0,
        }
    }

    /// An in-process token-mode identity.
    pub fn from_token(token: u64) -> OwnerIdentity {
        debug_assert_ne!(token, 0, "token 0 is reserved for the unowned sentinel");
        OwnerIdentity {
            pid: 0,
            tid: 0,
            token,
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Pack into the single nonzero `u64` used for the CAS word. Zero is
    /// reserved for [`OwnerIdentity::NONE`]; every other identity packs to
    /// a nonzero value because real pids and tokens both start at 1.
    fn pack(self) -> u64 {
        if self.token != 0 {
            self.token
        } else {
            (self.pid as u64) << 32 | self.tid as u64
        }
    }

    fn unpack_process(word: u64) -> OwnerIdentity {
        OwnerIdentity {
            pid: (word >> 32) as u32,
            tid: word as u32,
            token: 0,
        }
    }

    /// Whether this identity is still alive, per §4.A's liveness contract.
    /// Token-mode identities are only meaningful within the process that
    /// minted them, so they are always considered alive from the outside
    /// (reclaiming them is the minting process's own responsibility).
    pub fn is_alive(self) -> bool {
        if self.token != 0 {
            true
        } else if self.pid == 0 {
            true
        } else {
            platform::is_process_alive(self.pid)
        }
    }
}

/// Allocates process-local monotonic tokens for in-process holders.
///
/// Grounded on the same "CAS-skip-zero" counter used for cross-process
/// ownership; kept separate so the first token handed out is always 1,
/// never colliding with the unowned sentinel.
pub struct TokenAllocator {
    next: AtomicU64,
}

impl TokenAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_token(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The in-shared-memory representation of an [`OwnerIdentity`] slot: one
/// packed `AtomicU64` CAS word plus a generation counter that is bumped
/// on every release, so a `(pid, tid)` pair reused after a crash and
/// restart is distinguishable from the identity that held the lock
/// before the crash.
#[repr(C)]
pub struct AtomicIdentitySlot {
    word: AtomicU64,
    generation: AtomicU64,
}

impl AtomicIdentitySlot {
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Attempt to claim the slot for `owner`. Succeeds only if currently
    /// unowned.
    pub fn try_claim(&self, owner: OwnerIdentity) -> bool {
        self.word
            .compare_exchange(0, owner.pack(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the slot, bumping the generation counter.
    pub fn release(&self, owner: OwnerIdentity) {
        self.word.store(0, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        let _ = owner;
    }

    /// Force-clear the slot (zombie reclamation). Returns the identity
    /// that was reclaimed, for diagnostics.
    pub fn force_clear(&self) -> OwnerIdentity {
        let word = self.word.swap(0, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Self::decode(word)
    }

    pub fn current(&self) -> OwnerIdentity {
        Self::decode(self.word.load(Ordering::Acquire))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn decode(word: u64) -> OwnerIdentity {
        if word == 0 {
            OwnerIdentity::NONE
        } else if word <= u32::MAX as u64 {
            // A bare token never collides with a packed (pid,tid) word
            // whose top 32 bits (the pid) are guaranteed nonzero for any
            // real process owner, so small words are unambiguously tokens.
            OwnerIdentity::from_token(word)
        } else {
            OwnerIdentity::unpack_process(word)
        }
    }
}

impl Default for AtomicIdentitySlot {
    fn default() -> Self {
        Self::new()
    }
}
