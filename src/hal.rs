//! Capabilities the protocol needs from the surrounding hardware.
//!
//! The protocol engine never touches registers. It talks to a buffered,
//! half-duplex byte stream through [`DataStream`], to the two daisy chain
//! signal lines through [`DaisyGpio`], and waits for the transceiver to turn
//! around through [`DelayUs`].

/// One of the two physical daisy chain lines of a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Line {
    D1,
    D2,
}

impl Line {
    /// The line that isn't `self`.
    pub const fn other(self) -> Self {
        match self {
            Self::D1 => Self::D2,
            Self::D2 => Self::D1,
        }
    }
}

/// Buffered byte stream attached to the bus transceiver.
///
/// Reads come from a receive buffer filled in the background (usually from
/// the UART interrupt). `enable_write()`/`enable_read()` switch the bus
/// direction and are no-ops for transceivers without direction control.
pub trait DataStream {
    /// Hook up to the data line.
    fn begin(&mut self, baud: u32);

    /// Number of bytes waiting in the receive buffer.
    fn available(&self) -> usize;

    /// Take the oldest byte from the receive buffer.
    fn read(&mut self) -> Option<u8>;

    fn write(&mut self, byte: u8);

    /// Block until everything written has left the wire.
    fn flush(&mut self);

    /// Drop everything in the receive buffer.
    fn clear(&mut self);

    fn enable_write(&mut self);

    fn enable_read(&mut self);
}

/// Pin access for the two daisy chain lines.
///
/// Lines are active low: a line reads active when something pulls it to
/// ground.
pub trait DaisyGpio {
    /// Make `line` an input with its pull-up enabled.
    fn configure_input_pullup(&mut self, line: Line);

    /// Make `line` an output, driven inactive.
    fn configure_output(&mut self, line: Line);

    /// Drive an output line active (low) or inactive (high).
    fn set_output(&mut self, line: Line, active: bool);

    /// Returns true if the line is pulled active.
    fn read_input(&self, line: Line) -> bool;
}

/// Blocking microsecond delay, used only for the transceiver turnaround
/// before a node starts writing (150 µs for responses, 200 µs for address
/// claims).
pub trait DelayUs {
    fn delay_us(&mut self, micros: u32);
}

/// A delay that returns immediately, for simulations and tests.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoDelay;

impl DelayUs for NoDelay {
    fn delay_us(&mut self, _micros: u32) {}
}

/// Busy-waits on the system clock.
#[cfg(feature = "std")]
#[derive(Debug, Default, Copy, Clone)]
pub struct SpinDelay;

#[cfg(feature = "std")]
impl DelayUs for SpinDelay {
    fn delay_us(&mut self, micros: u32) {
        let start = std::time::Instant::now();
        let wait = std::time::Duration::from_micros(micros.into());
        while start.elapsed() < wait {
            core::hint::spin_loop();
        }
    }
}

impl<T: DataStream + ?Sized> DataStream for &mut T {
    fn begin(&mut self, baud: u32) {
        (**self).begin(baud)
    }
    fn available(&self) -> usize {
        (**self).available()
    }
    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }
    fn write(&mut self, byte: u8) {
        (**self).write(byte)
    }
    fn flush(&mut self) {
        (**self).flush()
    }
    fn clear(&mut self) {
        (**self).clear()
    }
    fn enable_write(&mut self) {
        (**self).enable_write()
    }
    fn enable_read(&mut self) {
        (**self).enable_read()
    }
}
