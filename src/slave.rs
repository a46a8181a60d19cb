//! Bus node: byte-at-a-time frame parser, address claiming and in-place
//! responses.

use arrayvec::ArrayVec;
use log::{debug, trace, warn};

use crate::config::{SlaveConfig, DEFAULT_MAX_DATA_LEN};
use crate::crc::Crc16;
use crate::daisy::DaisyChain;
use crate::hal::{DaisyGpio, DataStream, DelayUs};
use crate::types::{Address, Flags, CMD_ADDRESS, CMD_RESET, SOM};

type Responder<'r> = Option<&'r mut dyn FnMut(u8, &mut [u8])>;

/// Where the parser is in the current frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameState {
    /// Waiting for the first start byte.
    NoMessage,
    /// Got one start byte.
    Start,
    Header(HeaderField),
    Data,
    /// Checking the CRC, high byte first.
    End(CrcByte),
    /// A complete, valid message is available.
    MessageReady,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeaderField {
    Flags,
    Destination,
    Command,
    /// Payload length, or node count in batch mode.
    Length1,
    /// Per-node length in batch mode.
    Length2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrcByte {
    High,
    Low,
}

/// Progress of this node through an addressing round.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressingState {
    /// Addressing header parsed, no address seen yet.
    Waiting,
    /// Following along, not claimed anything yet.
    Unset,
    /// Claimed an address, waiting for the master's echo.
    Sent,
    Confirmed,
    /// Gave up; the daisy line was passed on without an address.
    Error,
}

/// A node on the bus.
///
/// Feed it by calling [`read()`](Self::read) or [`read_with()`](Self::read_with)
/// from the main loop. Both parse whatever the stream has buffered and return
/// true once a complete message with a valid CRC is available. The message
/// then stays available until the next byte arrives.
///
/// `N` is the capacity of the data buffer. Longer payloads are still checked
/// against their CRC but only the first `N` bytes of this node's slice are
/// kept.
///
/// ```
/// use discobus_proto::frame::Frame;
/// use discobus_proto::{
///     Address, DaisyChain, DaisyGpio, DataStream, Header, Length, Line, NoDelay, Slave,
/// };
///
/// #[derive(Default)]
/// struct Bus(Vec<u8>);
/// impl DataStream for Bus {
///     fn begin(&mut self, _baud: u32) {}
///     fn available(&self) -> usize { self.0.len() }
///     fn read(&mut self) -> Option<u8> {
///         if self.0.is_empty() { None } else { Some(self.0.remove(0)) }
///     }
///     fn write(&mut self, _byte: u8) {}
///     fn flush(&mut self) {}
///     fn clear(&mut self) { self.0.clear() }
///     fn enable_write(&mut self) {}
///     fn enable_read(&mut self) {}
/// }
///
/// struct Pins;
/// impl DaisyGpio for Pins {
///     fn configure_input_pullup(&mut self, _line: Line) {}
///     fn configure_output(&mut self, _line: Line) {}
///     fn set_output(&mut self, _line: Line, _active: bool) {}
///     fn read_input(&self, _line: Line) -> bool { false }
/// }
///
/// let mut node: Slave<_, _, _> = Slave::new(Bus::default(), DaisyChain::new(Pins), NoDelay);
/// node.set_address(3.into());
/// let header = Header::new(0x10, Address::new(3), Length::Single(1), false);
/// Frame::new(header, &[0x2A]).encode(&mut node.stream_mut().0);
/// if node.read() && node.is_addressed_to_me() {
///     assert_eq!(node.command(), 0x10);
///     assert_eq!(node.data(), &[0x2A]);
/// }
/// ```
pub struct Slave<S, G, D, const N: usize = DEFAULT_MAX_DATA_LEN> {
    stream: S,
    daisy: DaisyChain<G>,
    delay: D,
    config: SlaveConfig,
    my_address: Address,

    state: FrameState,
    addressing: AddressingState,
    flags: Flags,
    destination: Address,
    command: u8,
    /// Length of this node's slice. Zero when it can't be located.
    length: u8,
    node_count: u8,
    crc: Crc16,
    data: ArrayVec<u8, N>,

    full_length: usize,
    full_index: usize,
    data_start: usize,

    /// Last address seen on the bus, or this node's pending claim.
    last_address: u8,
    last_byte: u8,
    error_count: u8,
}

impl<S: DataStream, G: DaisyGpio, D: DelayUs> Slave<S, G, D> {
    pub fn new(stream: S, daisy: DaisyChain<G>, delay: D) -> Self {
        Self::with_config(stream, daisy, delay, SlaveConfig::default())
    }
}

impl<S: DataStream, G: DaisyGpio, D: DelayUs, const N: usize> Slave<S, G, D, N> {
    pub fn with_config(stream: S, daisy: DaisyChain<G>, delay: D, config: SlaveConfig) -> Self {
        Self {
            stream,
            daisy,
            delay,
            config,
            my_address: Address::BROADCAST,
            state: FrameState::NoMessage,
            addressing: AddressingState::Waiting,
            flags: Flags::default(),
            destination: Address::BROADCAST,
            command: 0,
            length: 0,
            node_count: 0,
            crc: Crc16::new(),
            data: ArrayVec::new(),
            full_length: 0,
            full_index: 0,
            data_start: 0,
            last_address: SOM,
            last_byte: 0,
            error_count: 0,
        }
    }

    /// Open the stream.
    pub fn begin(&mut self, baud: u32) {
        self.stream.begin(baud);
    }

    /// Parse buffered bytes without answering response messages.
    pub fn read(&mut self) -> bool {
        self.poll(None)
    }

    /// Parse buffered bytes. When this node's turn in a response message
    /// comes up, `responder` is called with the command and a zeroed buffer
    /// of the response length, and whatever it leaves there is sent.
    pub fn read_with<F>(&mut self, mut responder: F) -> bool
    where
        F: FnMut(u8, &mut [u8]),
    {
        self.poll(Some(&mut responder))
    }

    fn poll(&mut self, mut responder: Responder<'_>) -> bool {
        self.daisy.check_polarity();

        if self.state == FrameState::MessageReady {
            if self.stream.available() == 0 {
                return false;
            }
            self.state = FrameState::NoMessage;
        }

        // The previous node may have passed on the daisy line without
        // putting a new byte on the bus.
        if self.addressing_turn_signalled() {
            let last = self.last_address;
            self.process_addressing(last);
            return self.state == FrameState::MessageReady;
        }

        while let Some(byte) = self.stream.read() {
            if self.parse(byte, &mut responder) {
                if self.command == CMD_RESET {
                    self.reset_node();
                }
                return true;
            }
        }
        false
    }

    fn addressing_turn_signalled(&self) -> bool {
        self.state == FrameState::Data
            && self.command == CMD_ADDRESS
            && self.addressing == AddressingState::Unset
            && self.stream.available() == 0
            && self.daisy.is_prev_active()
    }

    fn parse(&mut self, byte: u8, responder: &mut Responder<'_>) -> bool {
        match self.state {
            FrameState::NoMessage => {
                if byte == SOM {
                    self.state = FrameState::Start;
                }
            }
            FrameState::Start => {
                if byte == SOM {
                    self.start_message();
                    self.state = FrameState::Header(HeaderField::Flags);
                } else {
                    trace!("Lone start byte followed by {:#04x}", byte);
                    self.state = FrameState::NoMessage;
                }
            }
            FrameState::Header(field) => self.parse_header(field, byte, responder),
            FrameState::Data => {
                if self.command == CMD_ADDRESS {
                    self.process_addressing(byte);
                } else {
                    self.process_data(byte, responder);
                }
            }
            FrameState::End(CrcByte::High) => {
                if byte == self.crc.high() {
                    self.state = FrameState::End(CrcByte::Low);
                } else {
                    self.crc_mismatch();
                }
            }
            FrameState::End(CrcByte::Low) => {
                if byte == self.crc.low() {
                    debug!(
                        "Message {:#04x} to {} ready, {} bytes",
                        self.command,
                        *self.destination,
                        self.data.len()
                    );
                    self.state = FrameState::MessageReady;
                } else {
                    self.crc_mismatch();
                }
            }
            FrameState::MessageReady => {}
        }
        self.state == FrameState::MessageReady
    }

    fn crc_mismatch(&mut self) {
        warn!(
            "Dropping message {:#04x}: CRC mismatch, expected {:#06x}",
            self.command,
            self.crc.value()
        );
        self.state = FrameState::NoMessage;
    }

    fn start_message(&mut self) {
        self.flags = Flags::default();
        self.destination = Address::BROADCAST;
        self.length = 0;
        self.node_count = 0;
        self.last_address = SOM;
        self.last_byte = 0;
        self.error_count = 0;
        self.data.clear();
        self.full_length = 0;
        self.full_index = 0;
        self.data_start = 0;
        self.crc.reset();
    }

    fn parse_header(&mut self, field: HeaderField, byte: u8, responder: &mut Responder<'_>) {
        self.crc.update(byte);
        match field {
            HeaderField::Flags => {
                self.flags = Flags::from_bits(byte);
                self.state = FrameState::Header(HeaderField::Destination);
            }
            HeaderField::Destination => {
                self.destination = byte.into();
                self.state = FrameState::Header(HeaderField::Command);
            }
            HeaderField::Command => {
                self.command = byte;
                self.state = FrameState::Header(HeaderField::Length1);
            }
            HeaderField::Length1 if self.flags.is_batch() => {
                self.node_count = byte;
                self.state = FrameState::Header(HeaderField::Length2);
            }
            HeaderField::Length1 => {
                self.length = byte;
                self.full_length = byte.into();
                self.data_start = 0;
                self.begin_data(responder);
            }
            HeaderField::Length2 => {
                if self.my_address.is_broadcast() {
                    // Without an address there is no slice to locate.
                    self.length = 0;
                } else {
                    self.length = byte;
                    self.full_length = usize::from(self.node_count) * usize::from(byte);
                    self.data_start = usize::from(*self.my_address - 1) * usize::from(byte);
                }
                self.begin_data(responder);
            }
        }
    }

    fn begin_data(&mut self, responder: &mut Responder<'_>) {
        if self.command == CMD_ADDRESS {
            self.addressing = AddressingState::Waiting;
            self.state = FrameState::Data;
        } else if self.length == 0 || self.full_length == 0 {
            self.state = FrameState::End(CrcByte::High);
        } else {
            if usize::from(self.length) > N {
                warn!(
                    "Message {:#04x}: {} data bytes, keeping {}",
                    self.command, self.length, N
                );
            }
            self.state = FrameState::Data;
            if self.flags.is_response() && self.responds_first() {
                self.send_response(responder);
                self.check_data_end();
            }
        }
    }

    /// Whether this node's response goes right after the header: the first
    /// slice of a batch, or the addressee of a single message.
    fn responds_first(&self) -> bool {
        if self.flags.is_batch() || self.destination.is_broadcast() {
            self.my_address == 1
        } else {
            self.destination == self.my_address
        }
    }

    fn in_my_slice(&self) -> bool {
        self.full_index >= self.data_start
            && self.full_index < self.data_start + usize::from(self.length)
    }

    fn process_data(&mut self, byte: u8, responder: &mut Responder<'_>) {
        self.crc.update(byte);
        if self.in_my_slice() && !self.data.is_full() {
            self.data.push(byte);
        }
        self.full_index += 1;

        if self.flags.is_response() && self.full_index == self.data_start {
            self.send_response(responder);
        }
        self.check_data_end();
    }

    fn check_data_end(&mut self) {
        if self.full_index >= self.full_length {
            self.state = FrameState::End(CrcByte::High);
        }
    }

    /// Write this node's slice of a response message. Every byte written also
    /// goes into the running CRC, since the other nodes see it on the bus.
    fn send_response(&mut self, responder: &mut Responder<'_>) {
        let respond = match responder {
            Some(respond) => respond,
            None => return,
        };
        let len = usize::from(self.length);
        self.data.clear();
        self.data.extend(core::iter::repeat(0).take(len.min(N)));
        respond(self.command, self.data.as_mut_slice());

        self.delay.delay_us(self.config.response_settle_us);
        self.stream.enable_write();
        for i in 0..len {
            let byte = self.data.get(i).copied().unwrap_or(0);
            self.stream.write(byte);
            self.crc.update(byte);
            self.full_index += 1;
        }
        self.stream.enable_read();
        trace!("Sent {} response bytes", len);
    }

    fn process_addressing(&mut self, byte: u8) {
        // Two 0xFF in a row end the address section.
        let terminator = self.last_byte == SOM && byte == SOM;
        self.last_byte = byte;

        let my_turn = self.my_address.is_broadcast()
            && self.daisy.is_prev_active()
            && self.stream.available() == 0;

        match self.addressing {
            AddressingState::Sent if my_turn => self.check_claim(byte),
            // The claim stays the reference until the echo is checked.
            AddressingState::Sent => {}
            AddressingState::Unset if my_turn && byte >= self.last_address && byte < SOM => {
                self.claim(byte + 1);
            }
            AddressingState::Waiting => {
                self.last_address = byte;
                self.addressing = AddressingState::Unset;
            }
            _ => self.last_address = byte,
        }

        if terminator && self.state != FrameState::MessageReady {
            if self.addressing == AddressingState::Sent {
                warn!("Addressing ended before claim {} was confirmed", self.last_address);
                self.addressing = AddressingState::Error;
                self.daisy.set_next_active(true);
            }
            self.done_addressing();
        }
    }

    fn claim(&mut self, address: u8) {
        self.addressing = AddressingState::Sent;
        self.delay.delay_us(self.config.address_settle_us);
        self.stream.enable_write();
        self.stream.write(address);
        self.stream.enable_read();
        self.last_address = address;
        debug!("Claiming address {}", address);
    }

    fn check_claim(&mut self, byte: u8) {
        if byte == self.last_address {
            self.addressing = AddressingState::Confirmed;
            self.my_address = byte.into();
            self.daisy.set_next_active(true);
            debug!("Got address {}", byte);
            if byte == SOM {
                self.done_addressing();
            }
            return;
        }

        self.error_count += 1;
        if self.error_count >= self.config.max_addr_errors || byte == SOM {
            warn!("Giving up on addressing after {} errors", self.error_count);
            self.last_address = byte;
            self.addressing = AddressingState::Error;
            self.daisy.set_next_active(true);
        } else {
            // The echo may have been the garbled one. Claim the same address
            // again; the master answers with its last confirmed address.
            trace!("Echo {} doesn't match claim {}", byte, self.last_address);
            self.last_address -= 1;
            self.addressing = AddressingState::Unset;
        }
    }

    fn done_addressing(&mut self) {
        self.data.clear();
        if self.data.try_push(*self.my_address).is_err() {
            warn!("No room to report address {}", *self.my_address);
        }
        self.state = FrameState::MessageReady;
    }

    /// Forget the address and release the daisy line.
    pub fn reset_node(&mut self) {
        debug!("Resetting node {}", *self.my_address);
        self.last_address = SOM;
        self.my_address = Address::BROADCAST;
        self.destination = Address::BROADCAST;
        self.addressing = AddressingState::Waiting;
        self.daisy.set_next_active(false);
    }

    pub fn has_new_message(&self) -> bool {
        self.state == FrameState::MessageReady
    }

    /// A message is ready and sent either to this node or to everyone.
    pub fn is_addressed_to_me(&self) -> bool {
        self.has_new_message()
            && (self.destination == self.my_address || self.destination.is_broadcast())
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn destination(&self) -> Address {
        self.destination
    }

    /// This node's part of the last message. After addressing it holds the
    /// assigned address.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_response_message(&self) -> bool {
        self.flags.is_response()
    }

    pub fn in_batch_mode(&self) -> bool {
        self.flags.is_batch()
    }

    pub fn address(&self) -> Address {
        self.my_address
    }

    pub fn set_address(&mut self, address: Address) {
        self.my_address = address;
    }

    pub fn addressing_state(&self) -> AddressingState {
        self.addressing
    }

    pub fn frame_state(&self) -> FrameState {
        self.state
    }

    pub fn config(&self) -> &SlaveConfig {
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
