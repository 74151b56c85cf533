use std::fmt;

use parking_lot::Mutex;

/// Number of low bits holding the minor part of an identity
pub const MINOR_BITS: u32 = 20;
const MINOR_MASK: u32 = (1 << MINOR_BITS) - 1;

/// Numeric identity of an attached device, routed by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    id: u32,
}

impl Identity {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn from_parts(major: u32, minor: u32) -> Self {
        Self {
            id: (major << MINOR_BITS) | (minor & MINOR_MASK),
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn major(&self) -> u32 {
        self.id >> MINOR_BITS
    }

    #[must_use]
    pub fn minor(&self) -> u32 {
        self.id & MINOR_MASK
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Contiguous block of identities granted by the registrar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    base: Identity,
    count: u32,
}

impl IdRange {
    #[must_use]
    pub fn new(base: Identity, count: u32) -> Self {
        Self { base, count }
    }

    #[must_use]
    pub fn base(&self) -> Identity {
        self.base
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Identity at position `index`, if inside the range
    #[must_use]
    pub fn nth(&self, index: u32) -> Option<Identity> {
        if index < self.count {
            Some(Identity::new(self.base.id() + index))
        } else {
            None
        }
    }

    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        identity.id() >= self.base.id() && identity.id() - self.base.id() < self.count
    }
}

struct IdGenState {
    /// Position where the next search starts
    cursor: u32,
    taken: Vec<bool>,
}

/// Thread-safe identity allocator over one [`IdRange`]
///
/// Hands identities out round-robin, so a released identity is only reused
/// after the rest of the range has been cycled through.
pub struct IdGen {
    range: IdRange,
    state: Mutex<IdGenState>,
}

impl IdGen {
    #[must_use]
    pub fn new(range: IdRange) -> Self {
        Self {
            range,
            state: Mutex::new(IdGenState {
                cursor: 0,
                taken: vec![false; range.count() as usize],
            }),
        }
    }

    #[must_use]
    pub fn range(&self) -> IdRange {
        self.range
    }

    /// Get the next free identity, `None` when the range is exhausted
    pub fn get_next(&self) -> Option<Identity> {
        let mut state = self.state.lock();
        let count = self.range.count();
        for step in 0..count {
            let index = (state.cursor + step) % count;
            if !state.taken[index as usize] {
                state.taken[index as usize] = true;
                state.cursor = (index + 1) % count;
                return self.range.nth(index);
            }
        }
        None
    }

    /// Return an identity to the pool
    ///
    /// Returns `false` if the identity was not handed out by this generator
    /// or was already released.
    pub fn release(&self, identity: Identity) -> bool {
        if !self.range.contains(identity) {
            return false;
        }
        let index = (identity.id() - self.range.base().id()) as usize;
        let mut state = self.state.lock();
        std::mem::replace(&mut state.taken[index], false)
    }

    /// Number of identities currently handed out
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.state.lock().taken.iter().filter(|t| **t).count()
    }
}

impl fmt::Debug for IdGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGen")
            .field("range", &self.range)
            .field("in_use", &self.in_use())
            .finish()
    }
}
