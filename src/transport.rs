//! Buffered [`DataStream`] implementations.
//!
//! Received bytes are pushed into a [`heapless::spsc::Queue`] from the UART
//! receive interrupt (or a driver callback) through its [`Producer`] half. The
//! transport owns the [`Consumer`] half and is polled by the protocol.
//!
//! ```
//! use heapless::spsc::Queue;
//! use discobus_proto::transport::{TxLine, Uart};
//! use discobus_proto::DataStream;
//!
//! struct Sink;
//! impl TxLine for Sink {
//!     fn configure(&mut self, _baud: u32) {}
//!     fn write_byte(&mut self, _byte: u8) {}
//!     fn flush(&mut self) {}
//! }
//!
//! let mut queue: Queue<u8, 150> = Queue::new();
//! let (mut rx_isr, rx) = queue.split();
//! let mut uart = Uart::new(rx, Sink);
//! uart.begin(discobus_proto::DEFAULT_BAUD);
//!
//! rx_isr.enqueue(0xFF).unwrap(); // normally done in the interrupt handler
//! assert_eq!(uart.available(), 1);
//! assert_eq!(uart.read(), Some(0xFF));
//! ```
//!
//! [`Producer`]: heapless::spsc::Producer

use embedded_hal::digital::OutputPin;
use heapless::spsc::Consumer;
use log::warn;

use crate::hal::DataStream;

/// The transmit side of a UART.
pub trait TxLine {
    /// Set up the peripheral for `baud` bits per second.
    fn configure(&mut self, baud: u32);

    /// Queue one byte for transmission.
    fn write_byte(&mut self, byte: u8);

    /// Block until the last byte has been shifted out.
    fn flush(&mut self);
}

/// Plain UART, for transceivers that switch direction on their own.
pub struct Uart<'q, T, const N: usize> {
    rx: Consumer<'q, u8, N>,
    tx: T,
}

impl<'q, T: TxLine, const N: usize> Uart<'q, T, N> {
    pub fn new(rx: Consumer<'q, u8, N>, tx: T) -> Self {
        Self { rx, tx }
    }

    pub fn tx(&self) -> &T {
        &self.tx
    }
}

impl<T: TxLine, const N: usize> DataStream for Uart<'_, T, N> {
    fn begin(&mut self, baud: u32) {
        self.tx.configure(baud);
    }

    fn available(&self) -> usize {
        self.rx.len()
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.dequeue()
    }

    fn write(&mut self, byte: u8) {
        self.tx.write_byte(byte);
    }

    fn flush(&mut self) {
        self.tx.flush();
    }

    fn clear(&mut self) {
        while self.rx.dequeue().is_some() {}
    }

    fn enable_write(&mut self) {}

    fn enable_read(&mut self) {}
}

/// UART attached to an RS-485 transceiver whose driver-enable pin is
/// controlled by `de`. High means transmit.
pub struct Rs485<'q, T, DE, const N: usize> {
    uart: Uart<'q, T, N>,
    de: DE,
}

impl<'q, T: TxLine, DE: OutputPin, const N: usize> Rs485<'q, T, DE, N> {
    /// The transceiver starts out in receive mode.
    pub fn new(rx: Consumer<'q, u8, N>, tx: T, de: DE) -> Self {
        let mut bus = Self {
            uart: Uart::new(rx, tx),
            de,
        };
        bus.set_direction(false);
        bus
    }

    fn set_direction(&mut self, transmit: bool) {
        let result = if transmit {
            self.de.set_high()
        } else {
            self.de.set_low()
        };
        if let Err(e) = result {
            warn!("Failed to switch RS-485 direction: {:?}", e);
        }
    }

    pub fn tx(&self) -> &T {
        self.uart.tx()
    }

    pub fn de(&self) -> &DE {
        &self.de
    }
}

impl<T: TxLine, DE: OutputPin, const N: usize> DataStream for Rs485<'_, T, DE, N> {
    fn begin(&mut self, baud: u32) {
        self.uart.begin(baud);
    }

    fn available(&self) -> usize {
        self.uart.available()
    }

    fn read(&mut self) -> Option<u8> {
        self.uart.read()
    }

    fn write(&mut self, byte: u8) {
        self.uart.write(byte);
    }

    fn flush(&mut self) {
        self.uart.flush();
    }

    fn clear(&mut self) {
        self.uart.clear();
    }

    fn enable_write(&mut self) {
        self.set_direction(true);
    }

    /// Waits for the transmit buffer to drain before releasing the bus.
    fn enable_read(&mut self) {
        self.uart.flush();
        self.set_direction(false);
    }
}
