//! The bus master: sends messages, runs addressing rounds and collects
//! responses.
//!
//! Every operation writes to the stream right away. Waiting for the nodes is
//! done by polling with the current time, see
//! [`check_for_addresses()`](Master::check_for_addresses) and
//! [`ResponseCollector::poll()`].

use log::{debug, trace, warn};
use snafu::ensure;

use crate::config::MasterConfig;
use crate::crc::Crc16;
use crate::daisy::DaisyChain;
use crate::error::{
    DefaultsLengthMismatchSnafu, Error, NoMessageInProgressSnafu, NotAResponseMessageSnafu,
    ResponseBufferTooSmallSnafu, ZeroResponseLengthSnafu,
};
use crate::hal::{DaisyGpio, DataStream};
use crate::types::{Address, Flags, CMD_ADDRESS, CMD_NULL, CMD_RESET, SOM};

/// Result of polling an addressing round.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressingStatus {
    /// Still going, poll again.
    Waiting,
    /// Finished with at least one node addressed, or the chain closed.
    Done,
    /// No node answered, or a node kept sending wrong addresses.
    Error,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MessageState {
    Idle,
    HeaderSent,
    Addressing,
    DataSending,
}

pub struct Master<S, G> {
    stream: S,
    daisy: DaisyChain<G>,
    config: MasterConfig,

    state: MessageState,
    crc: Crc16,
    node_count: u8,
    destination: Address,
    data_length: u8,
    response: bool,

    last_address: u8,
    address_tries: u8,
    timeout: u32,
    deadline: u32,
    refresh_deadline: bool,
    addressing_result: AddressingStatus,
}

impl<S: DataStream, G: DaisyGpio> Master<S, G> {
    pub fn new(stream: S, daisy: DaisyChain<G>) -> Self {
        Self::with_config(stream, daisy, MasterConfig::default())
    }

    pub fn with_config(stream: S, daisy: DaisyChain<G>, config: MasterConfig) -> Self {
        Self {
            stream,
            daisy,
            config,
            state: MessageState::Idle,
            crc: Crc16::new(),
            node_count: 0,
            destination: Address::BROADCAST,
            data_length: 0,
            response: false,
            last_address: 0,
            address_tries: 0,
            timeout: 0,
            deadline: 0,
            refresh_deadline: false,
            addressing_result: AddressingStatus::Done,
        }
    }

    /// Open the stream.
    pub fn begin(&mut self, baud: u32) {
        self.stream.begin(baud);
    }

    /// Number of nodes, as found by the last addressing round.
    pub fn node_count(&self) -> u8 {
        self.node_count
    }

    /// Set the number of nodes, for buses with statically addressed nodes.
    pub fn set_node_count(&mut self, count: u8) {
        self.node_count = count;
    }

    /// Write a message header. Any message still in progress is abandoned.
    ///
    /// `data_len` is the whole payload length, or in batch mode the length
    /// of each node's slice. Batch messages carry the current node count.
    pub fn start_message(
        &mut self,
        command: u8,
        destination: Address,
        data_len: u8,
        batch: bool,
        response: bool,
    ) {
        if self.state == MessageState::Addressing {
            self.addressing_result = AddressingStatus::Error;
        }
        if self.state != MessageState::Idle {
            warn!("Abandoning unfinished message");
        }
        self.crc.reset();
        self.destination = destination;
        self.data_length = data_len;
        self.response = response;
        if response {
            self.refresh_deadline = true;
        }

        self.stream.enable_write();
        self.stream.write(SOM);
        self.stream.write(SOM);
        self.send_byte(Flags::new(batch, response).bits(), false);
        self.send_byte(*destination, false);
        self.send_byte(command, false);
        if batch {
            self.send_byte(self.node_count, false);
        }
        self.send_byte(data_len, false);
        self.stream.enable_read();

        trace!("Started message {:#04x} to {}", command, *destination);
        self.state = MessageState::HeaderSent;
    }

    /// Send one payload byte.
    /// # Errors
    /// Returns [`Error::NoMessageInProgress`] if no message was started.
    pub fn send_data(&mut self, byte: u8) -> Result<(), Error> {
        ensure!(self.state != MessageState::Idle, NoMessageInProgressSnafu);
        self.send_byte(byte, true);
        self.state = MessageState::DataSending;
        Ok(())
    }

    /// Send payload bytes in one write window.
    /// # Errors
    /// Returns [`Error::NoMessageInProgress`] if no message was started.
    pub fn send_data_slice(&mut self, bytes: &[u8]) -> Result<(), Error> {
        ensure!(self.state != MessageState::Idle, NoMessageInProgressSnafu);
        self.stream.enable_write();
        for b in bytes {
            self.send_byte(*b, false);
        }
        self.stream.enable_read();
        self.state = MessageState::DataSending;
        Ok(())
    }

    /// Write the trailing CRC.
    /// # Errors
    /// Returns [`Error::NoMessageInProgress`] if no message was started.
    pub fn finish_message(&mut self) -> Result<(), Error> {
        ensure!(self.state != MessageState::Idle, NoMessageInProgressSnafu);
        self.end_message();
        Ok(())
    }

    fn end_message(&mut self) {
        self.stream.enable_write();
        if self.state == MessageState::Addressing {
            if self.last_address < SOM {
                self.stream.write(SOM);
                self.stream.write(SOM);
            }
            // The 0xFF pair starts an empty message so that every node ends
            // up in sync.
            self.crc.reset();
            for b in [0, *Address::BROADCAST, CMD_NULL, 0] {
                self.send_byte(b, false);
            }
        }
        for b in self.crc.to_be_bytes() {
            self.stream.write(b);
        }
        self.stream.enable_read();
        self.state = MessageState::Idle;
    }

    fn send_byte(&mut self, byte: u8, switch_direction: bool) {
        if switch_direction {
            self.stream.enable_write();
        }
        self.stream.write(byte);
        if switch_direction {
            self.stream.enable_read();
        }
        self.crc.update(byte);
    }

    /// Tell every node to forget its address.
    pub fn reset_all_nodes(&mut self) {
        debug!("Resetting all nodes");
        self.start_message(CMD_RESET, Address::BROADCAST, 0, false, false);
        self.end_message();
        self.daisy.set_next_active(false);
    }

    /// Start assigning addresses down the daisy chain. Nodes should be reset
    /// first. Poll [`check_for_addresses()`](Self::check_for_addresses) until
    /// it returns something other than `Waiting`.
    ///
    /// `timeout` is how long, in the caller's time units, to wait for the
    /// next node before giving up.
    pub fn start_addressing(&mut self, time: u32, timeout: u32) {
        self.node_count = 0;
        self.last_address = 0;
        self.address_tries = 0;
        self.timeout = timeout;
        self.deadline = time.wrapping_add(timeout);

        self.start_message(CMD_ADDRESS, Address::BROADCAST, 2, true, true);
        self.state = MessageState::Addressing;
        self.addressing_result = AddressingStatus::Waiting;

        self.daisy.set_next_active(true);
        self.send_byte(0x00, true);
        self.refresh_deadline = true;
        debug!("Addressing started");
    }

    pub fn check_for_addresses(&mut self, time: u32) -> AddressingStatus {
        if self.refresh_deadline {
            self.deadline = time.wrapping_add(self.timeout);
            self.refresh_deadline = false;
        }
        if self.state != MessageState::Addressing {
            return self.addressing_result;
        }

        if self.daisy.is_prev_active() {
            debug!("Daisy chain closed, {} nodes", self.node_count);
            return self.end_addressing(AddressingStatus::Done);
        }

        if self.stream.available() > 0 {
            self.refresh_deadline = true;
            let mut latest = 0;
            while let Some(b) = self.stream.read() {
                latest = b;
            }

            if u16::from(latest) == u16::from(self.last_address) + 1 {
                self.node_count += 1;
                self.last_address = latest;
                self.address_tries = 0;
                self.send_byte(latest, true);
                debug!("Node {} addressed", latest);
            } else {
                self.address_tries += 1;
                if self.address_tries > self.config.addr_max_tries {
                    warn!(
                        "Addressing failed, expected {} got {}",
                        u16::from(self.last_address) + 1,
                        latest
                    );
                    return self.end_addressing(AddressingStatus::Error);
                }
                trace!("Unexpected address {}, retrying", latest);
                self.stream.enable_write();
                self.send_byte(0x00, false);
                self.send_byte(self.last_address, false);
                self.stream.enable_read();
            }
            return AddressingStatus::Waiting;
        }

        if time > self.deadline {
            let result = if self.node_count > 0 {
                AddressingStatus::Done
            } else {
                warn!("Addressing timed out without any nodes");
                AddressingStatus::Error
            };
            return self.end_addressing(result);
        }
        if self.last_address == SOM {
            return self.end_addressing(AddressingStatus::Done);
        }
        AddressingStatus::Waiting
    }

    fn end_addressing(&mut self, result: AddressingStatus) -> AddressingStatus {
        self.end_message();
        self.addressing_result = result;
        debug!("Addressing ended: {:?}, {} nodes", result, self.node_count);
        result
    }

    /// Collect the nodes' replies to the response message just started.
    ///
    /// Each node gets `defaults.len()` bytes, which must match the length
    /// the message was started with. A node that stays quiet for `timeout`
    /// gets `defaults` written in its place, on the bus as well as in `buf`.
    /// # Errors
    /// Returns an error if no message is in progress, the message doesn't ask
    /// for responses, the response length is zero or doesn't fit `defaults`,
    /// or `buf` is too small.
    pub fn collect_responses<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        defaults: &'a [u8],
        time: u32,
        timeout: u32,
    ) -> Result<ResponseCollector<'a, S, G>, Error> {
        ensure!(self.state != MessageState::Idle, NoMessageInProgressSnafu);
        ensure!(self.response, NotAResponseMessageSnafu);
        let len = usize::from(self.data_length);
        ensure!(len > 0, ZeroResponseLengthSnafu);
        ensure!(
            defaults.len() == len,
            DefaultsLengthMismatchSnafu {
                expected: len,
                found: defaults.len(),
            }
        );
        let waiting = if self.destination.is_broadcast() {
            usize::from(self.node_count)
        } else {
            1
        };
        ensure!(
            buf.len() >= waiting * len,
            ResponseBufferTooSmallSnafu {
                needed: waiting * len,
                found: buf.len(),
            }
        );
        Ok(ResponseCollector {
            master: self,
            buf,
            defaults,
            waiting,
            index: 0,
            timeout,
            deadline: time.wrapping_add(timeout),
            refresh_deadline: true,
            finished: false,
        })
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn daisy(&self) -> &DaisyChain<G> {
        &self.daisy
    }

    pub fn daisy_mut(&mut self) -> &mut DaisyChain<G> {
        &mut self.daisy
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

/// Gathers the replies to a response message, see
/// [`Master::collect_responses()`].
pub struct ResponseCollector<'a, S, G> {
    master: &'a mut Master<S, G>,
    buf: &'a mut [u8],
    defaults: &'a [u8],
    waiting: usize,
    index: usize,
    timeout: u32,
    deadline: u32,
    refresh_deadline: bool,
    finished: bool,
}

impl<S: DataStream, G: DaisyGpio> ResponseCollector<'_, S, G> {
    /// Take in whatever arrived. Returns true once every node has had its
    /// turn and the message is finished.
    pub fn poll(&mut self, time: u32) -> bool {
        if self.refresh_deadline {
            self.deadline = time.wrapping_add(self.timeout);
            self.refresh_deadline = false;
        }
        let len = self.defaults.len();

        while self.waiting > 0 {
            let byte = match self.master.stream.read() {
                Some(b) => b,
                None => break,
            };
            self.store(byte);
            self.refresh_deadline = true;
        }

        if self.waiting > 0 && !self.refresh_deadline && time > self.deadline {
            let start = self.index % len;
            warn!(
                "No response from node {}, using defaults",
                self.index / len + 1
            );
            self.master.stream.enable_write();
            for i in start..len {
                let byte = self.defaults[i];
                self.master.stream.write(byte);
                self.store(byte);
            }
            self.master.stream.enable_read();
            self.refresh_deadline = true;
        }

        if self.waiting == 0 && !self.finished {
            self.master.end_message();
            self.finished = true;
            debug!("Responses complete, {} bytes", self.index);
        }
        self.finished
    }

    fn store(&mut self, byte: u8) {
        self.buf[self.index] = byte;
        self.master.crc.update(byte);
        self.index += 1;
        if self.index % self.defaults.len() == 0 {
            self.waiting -= 1;
        }
    }

    /// Nodes still to respond.
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Bytes collected so far, defaults included.
    pub fn received(&self) -> &[u8] {
        &self.buf[..self.index]
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
