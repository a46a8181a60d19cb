//! Tunables for the master and slave state machines.

/// Bus speed used by the reference hardware.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default capacity of a slave's message data buffer.
pub const DEFAULT_MAX_DATA_LEN: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    /// Wrong addresses accepted from a node before addressing fails.
    pub addr_max_tries: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self { addr_max_tries: 4 }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SlaveConfig {
    /// Consecutive unconfirmed address claims before a node gives up.
    pub max_addr_errors: u8,
    /// Wait before writing a response, in microseconds.
    pub response_settle_us: u32,
    /// Wait before writing an address claim, in microseconds.
    pub address_settle_us: u32,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            max_addr_errors: 5,
            response_settle_us: 150,
            address_settle_us: 200,
        }
    }
}
