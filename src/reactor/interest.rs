//! Interest flags for channel readiness.

use std::fmt;

/// One of the four interest kinds an [`Operation`](super::Operation) can
/// register for.
///
/// Accept and read both map to OS-level readable readiness; connect and
/// write both map to writable readiness. The distinction is preserved in
/// the registration table so a channel can carry, say, a read operation
/// and a write operation at the same time without either clobbering the
/// other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterestKind {
    /// A listening channel has a connection to accept.
    Accept,
    /// An outbound connect has completed (or failed).
    Connect,
    /// The channel has bytes to read (or end-of-stream).
    Read,
    /// The channel can accept bytes.
    Write,
}

impl InterestKind {
    /// All four kinds, in table-slot order.
    pub const ALL: [InterestKind; 4] = [Self::Accept, Self::Connect, Self::Read, Self::Write];

    /// Slot index in a per-channel registration table.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Accept => 0,
            Self::Connect => 1,
            Self::Read => 2,
            Self::Write => 3,
        }
    }

    /// The single-kind interest mask.
    #[must_use]
    pub const fn interest(self) -> Interest {
        match self {
            Self::Accept => Interest::ACCEPT,
            Self::Connect => Interest::CONNECT,
            Self::Read => Interest::READ,
            Self::Write => Interest::WRITE,
        }
    }

    /// True when this kind is satisfied by readable readiness.
    #[must_use]
    pub const fn is_input(self) -> bool {
        matches!(self, Self::Accept | Self::Read)
    }
}

impl fmt::Display for InterestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Write => "write",
        };
        write!(f, "{name}")
    }
}

/// Interest flags indicating which readiness kinds to monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// No interest.
    pub const NONE: Interest = Interest(0);
    /// Interest in accepting inbound connections.
    pub const ACCEPT: Interest = Interest(0b0001);
    /// Interest in outbound connect completion.
    pub const CONNECT: Interest = Interest(0b0010);
    /// Interest in readable bytes.
    pub const READ: Interest = Interest(0b0100);
    /// Interest in writable space.
    pub const WRITE: Interest = Interest(0b1000);

    /// Returns true if no kind is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every kind in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Combines interests.
    #[must_use]
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Removes interest.
    #[must_use]
    pub const fn remove(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }

    /// True if any input kind (accept/read) is set.
    #[must_use]
    pub const fn wants_input(self) -> bool {
        self.contains(Self::ACCEPT) || self.contains(Self::READ)
    }

    /// True if any output kind (connect/write) is set.
    #[must_use]
    pub const fn wants_output(self) -> bool {
        self.contains(Self::CONNECT) || self.contains(Self::WRITE)
    }

    /// Iterates over the kinds set in this mask, in slot order.
    pub fn kinds(self) -> impl Iterator<Item = InterestKind> {
        InterestKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.interest()))
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        for kind in self.kinds() {
            write!(f, "{}", &kind.to_string()[..1])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_projection() {
        assert!(InterestKind::Accept.is_input());
        assert!(InterestKind::Read.is_input());
        assert!(!InterestKind::Connect.is_input());
        assert!(!InterestKind::Write.is_input());
    }

    #[test]
    fn mask_contains_and_add() {
        let mask = Interest::READ.add(Interest::WRITE);
        assert!(mask.contains(Interest::READ));
        assert!(mask.contains(Interest::WRITE));
        assert!(!mask.contains(Interest::ACCEPT));
        assert!(mask.wants_input());
        assert!(mask.wants_output());
    }

    #[test]
    fn mask_remove() {
        let mask = Interest::READ.add(Interest::WRITE).remove(Interest::WRITE);
        assert!(mask.contains(Interest::READ));
        assert!(!mask.contains(Interest::WRITE));
        assert!(!mask.wants_output());
    }

    #[test]
    fn kinds_iterate_in_slot_order() {
        let mask = Interest::WRITE.add(Interest::ACCEPT);
        let kinds: Vec<_> = mask.kinds().collect();
        assert_eq!(kinds, vec![InterestKind::Accept, InterestKind::Write]);
    }

    #[test]
    fn empty_mask_has_no_kinds() {
        assert_eq!(Interest::NONE.kinds().count(), 0);
        assert!(Interest::NONE.is_empty());
    }
}
