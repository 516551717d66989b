//! Handle signal bitsets.

bitflags::bitflags! {
    /// Signals a handle can be waited on for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        const READABLE    = 1 << 0;
        const WRITABLE    = 1 << 1;
        const PEER_CLOSED = 1 << 2;
    }
}

impl Signals {
    /// Returns `true` iff [`Signals::READABLE`] is set.
    #[inline]
    pub const fn is_readable(&self) -> bool {
        self.contains(Signals::READABLE)
    }

    /// Returns `true` iff [`Signals::WRITABLE`] is set.
    #[inline]
    pub const fn is_writable(&self) -> bool {
        self.contains(Signals::WRITABLE)
    }

    /// Returns `true` iff [`Signals::PEER_CLOSED`] is set.
    #[inline]
    pub const fn is_peer_closed(&self) -> bool {
        self.contains(Signals::PEER_CLOSED)
    }
}

/// A pair of signal sets returned by every wait: the signals observed
/// satisfied, and the signals it is still possible to satisfy in the
/// future. Once a bit drops out of `satisfiable` it can never come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalState {
    pub satisfied: Signals,
    pub satisfiable: Signals,
}

impl Default for Signals {
    fn default() -> Self {
        Signals::empty()
    }
}
