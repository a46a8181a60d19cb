//! Discobus: a master/slave protocol for half-duplex multi-drop serial buses,
//! typically RS-485.
//!
//! All traffic is framed as
//!
//! ```text
//! FF FF | flags | destination | command | length (1 or 2 bytes) | data | CRC hi | CRC lo
//! ```
//!
//! Nodes are addressed without configuration: a pair of daisy chain lines
//! running from node to node passes a token down the chain, and each node
//! claims the next free address when the token reaches it.
//!
//! The protocol is sans-io. [`Master`] and [`Slave`] talk to the hardware
//! through the [`DataStream`], [`DaisyGpio`] and [`DelayUs`] traits and are
//! driven by polling with a caller-supplied time value.

#![cfg_attr(not(feature = "std"), no_std)]

mod config;
mod crc;
mod daisy;
mod error;
pub mod frame;
mod hal;
pub mod master;
pub mod slave;
pub mod transport;
mod types;

pub use config::{MasterConfig, SlaveConfig, DEFAULT_BAUD, DEFAULT_MAX_DATA_LEN};
pub use crc::{crc16, Crc16};
pub use daisy::DaisyChain;
pub use error::Error;
pub use frame::{Frame, FrameToken};
#[cfg(feature = "std")]
pub use hal::SpinDelay;
pub use hal::{DaisyGpio, DataStream, DelayUs, Line, NoDelay};
pub use master::{AddressingStatus, Master, ResponseCollector};
pub use slave::{AddressingState, Slave};
pub use types::{Address, Flags, Header, Length, CMD_ADDRESS, CMD_NULL, CMD_RESET, SOM};
