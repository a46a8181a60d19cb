//! This module defines the typed header fields of a bus message:
//! node addresses, header flags and the length section.

use core::ops::Deref;

/// Command byte telling every node to forget its address.
pub const CMD_RESET: u8 = 0xFA;
/// Command byte starting an addressing round.
pub const CMD_ADDRESS: u8 = 0xFB;
/// Command byte of the empty message sent after addressing.
pub const CMD_NULL: u8 = 0xFF;

/// Start-of-message byte, sent twice.
pub const SOM: u8 = 0xFF;

/// Node address on the bus. Zero is the broadcast address, which is also
/// what an unaddressed node reports as its own address.
///
/// ## Example
/// ```
/// use discobus_proto::Address;
/// let addr = Address::new(10);
/// assert_eq!(addr.next(), Some(Address::new(11)));
/// assert!(Address::BROADCAST.is_broadcast());
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash, Default)]
#[repr(transparent)]
pub struct Address(u8);

impl Address {
    pub const BROADCAST: Self = Self(0);
    /// Highest address a node can claim.
    pub const MAX: Self = Self(0xFF);

    pub const fn new(address: u8) -> Self {
        Self(address)
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }

    /// Returns the next higher address, or None at the ceiling.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl Deref for Address {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u8> for Address {
    fn from(address: u8) -> Self {
        Self(address)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl PartialEq<u8> for Address {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

/// Header flag byte.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
#[repr(transparent)]
pub struct Flags(u8);

impl Flags {
    /// The payload is split into one slice per node.
    pub const BATCH: u8 = 0b0000_0001;
    /// Every addressed node writes a reply in its turn.
    pub const RESPONSE: u8 = 0b0000_0010;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn new(batch: bool, response: bool) -> Self {
        let mut bits = 0;
        if batch {
            bits |= Self::BATCH;
        }
        if response {
            bits |= Self::RESPONSE;
        }
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_batch(self) -> bool {
        self.0 & Self::BATCH != 0
    }

    pub const fn is_response(self) -> bool {
        self.0 & Self::RESPONSE != 0
    }
}

/// The length section of the header.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Length {
    /// One length byte covering the whole payload.
    Single(u8),
    /// Node count followed by the length of each node's slice.
    Batch { nodes: u8, per_node: u8 },
}

impl Length {
    /// Total number of bytes in the data section.
    pub fn data_len(self) -> usize {
        match self {
            Self::Single(len) => len.into(),
            Self::Batch { nodes, per_node } => usize::from(nodes) * usize::from(per_node),
        }
    }
}

/// Everything between the start marker and the data section.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Header {
    pub flags: Flags,
    pub destination: Address,
    pub command: u8,
    pub length: Length,
}

impl Header {
    /// Build a header, deriving the batch flag from `length`.
    pub fn new(command: u8, destination: Address, length: Length, response: bool) -> Self {
        let batch = matches!(length, Length::Batch { .. });
        Self {
            flags: Flags::new(batch, response),
            destination,
            command,
            length,
        }
    }
}

#[cfg(test)]
mod address_tests {
    use super::Address;

    #[test]
    fn test_address_next() {
        assert_eq!(Address::new(0).next(), Some(Address::new(1)));
        assert_eq!(Address::new(254).next(), Some(Address::MAX));
        assert_eq!(Address::MAX.next(), None);
    }

    #[test]
    fn test_address() {
        let a5 = Address::from(5);
        assert_eq!(*a5, 5);
        assert_eq!(a5, 5u8);
        assert!(!a5.is_broadcast());
        assert!(Address::default().is_broadcast());
    }
}
