//! Daisy chain signal lines and polarity detection.
//!
//! Every node has two signal lines, wired to the previous and the next node in
//! the chain. Which physical line is which doesn't have to be known up front:
//! the first time exactly one line is pulled active by a neighbour, that line
//! becomes "prev" and the other one "next".

use log::debug;
use snafu::ensure;

use crate::error::{Error, InvalidPolaritySnafu};
use crate::hal::{DaisyGpio, Line};

#[derive(Debug)]
pub struct DaisyChain<G> {
    gpio: G,
    prev: Option<Line>,
    next: Option<Line>,
}

impl<G: DaisyGpio> DaisyChain<G> {
    /// Both lines become pulled-up inputs and polarity is left for
    /// [`check_polarity()`](Self::check_polarity) to detect.
    pub fn new(mut gpio: G) -> Self {
        gpio.configure_input_pullup(Line::D1);
        gpio.configure_input_pullup(Line::D2);
        Self {
            gpio,
            prev: None,
            next: None,
        }
    }

    /// Both lines with a fixed polarity.
    pub fn with_polarity(gpio: G, prev: Line) -> Self {
        let mut chain = Self::new(gpio);
        chain.assign(prev, prev.other());
        chain
    }

    /// A chain end with only an outgoing line, for a master whose chain
    /// doesn't loop back. Its prev line never reads active.
    pub fn next_only(mut gpio: G, next: Line) -> Self {
        gpio.configure_output(next);
        Self {
            gpio,
            prev: None,
            next: Some(next),
        }
    }

    /// Set the polarity explicitly.
    /// # Errors
    /// Returns [`Error::InvalidPolarity`] if `prev` and `next` are the same line.
    pub fn set_polarity(&mut self, prev: Line, next: Line) -> Result<(), Error> {
        ensure!(prev != next, InvalidPolaritySnafu);
        self.assign(prev, next);
        Ok(())
    }

    fn assign(&mut self, prev: Line, next: Line) {
        self.prev = Some(prev);
        self.next = Some(next);
        self.gpio.configure_output(next);
    }

    /// Try to detect the polarity from the current line levels.
    ///
    /// Does nothing once polarity is known. Both or neither line active is
    /// ambiguous, and is left for a later call.
    pub fn check_polarity(&mut self) {
        if self.is_resolved() {
            return;
        }
        let d1 = self.gpio.read_input(Line::D1);
        let d2 = self.gpio.read_input(Line::D2);
        let prev = match (d1, d2) {
            (true, false) => Line::D1,
            (false, true) => Line::D2,
            _ => return,
        };
        debug!("Daisy chain polarity detected, prev = {:?}", prev);
        self.assign(prev, prev.other());
    }

    pub fn is_resolved(&self) -> bool {
        self.next.is_some()
    }

    pub fn prev(&self) -> Option<Line> {
        self.prev
    }

    pub fn next(&self) -> Option<Line> {
        self.next
    }

    /// Drive the next line. Returns false if there is no next line yet.
    pub fn set_next_active(&mut self, active: bool) -> bool {
        match self.next {
            Some(line) => {
                self.gpio.set_output(line, active);
                true
            }
            None => false,
        }
    }

    /// Returns true if the previous node is driving our prev line.
    pub fn is_prev_active(&self) -> bool {
        self.prev.map_or(false, |line| self.gpio.read_input(line))
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug)]
    struct Pins {
        external: [bool; 2],
        output: [bool; 2],
        driven: [bool; 2],
    }

    fn idx(line: Line) -> usize {
        match line {
            Line::D1 => 0,
            Line::D2 => 1,
        }
    }

    impl DaisyGpio for Pins {
        fn configure_input_pullup(&mut self, line: Line) {
            self.output[idx(line)] = false;
        }
        fn configure_output(&mut self, line: Line) {
            self.output[idx(line)] = true;
            self.driven[idx(line)] = false;
        }
        fn set_output(&mut self, line: Line, active: bool) {
            self.driven[idx(line)] = active;
        }
        fn read_input(&self, line: Line) -> bool {
            self.external[idx(line)] || self.driven[idx(line)]
        }
    }

    #[test]
    fn test_ambiguous_readings_stay_unresolved() {
        let mut chain = DaisyChain::new(Pins::default());
        chain.check_polarity();
        assert!(!chain.is_resolved());

        chain.gpio_mut().external = [true, true];
        chain.check_polarity();
        assert!(!chain.is_resolved());
        assert!(!chain.is_prev_active());
        assert!(!chain.set_next_active(true));
    }

    #[test]
    fn test_detects_prev_from_single_active_line() {
        let mut chain = DaisyChain::new(Pins::default());
        chain.gpio_mut().external = [false, true];
        chain.check_polarity();
        assert_eq!(chain.prev(), Some(Line::D2));
        assert_eq!(chain.next(), Some(Line::D1));
        assert!(chain.gpio().output[0]);
        assert!(!chain.gpio().output[1]);
        assert!(chain.is_prev_active());

        // resolution never reverts
        chain.gpio_mut().external = [true, false];
        chain.check_polarity();
        assert_eq!(chain.prev(), Some(Line::D2));
        assert!(!chain.is_prev_active());
    }

    #[test]
    fn test_static_polarity() {
        let mut chain = DaisyChain::new(Pins::default());
        assert_eq!(
            chain.set_polarity(Line::D1, Line::D1),
            Err(Error::InvalidPolarity)
        );
        chain.set_polarity(Line::D1, Line::D2).unwrap();
        assert!(chain.set_next_active(true));
        assert!(chain.gpio().driven[1]);

        let chain = DaisyChain::with_polarity(Pins::default(), Line::D2);
        assert_eq!(chain.next(), Some(Line::D1));
    }

    #[test]
    fn test_next_only() {
        let mut chain = DaisyChain::next_only(Pins::default(), Line::D1);
        assert!(chain.is_resolved());
        assert_eq!(chain.prev(), None);
        chain.gpio_mut().external = [false, true];
        assert!(!chain.is_prev_active());
        chain.set_next_active(true);
        assert!(chain.gpio().driven[0]);
    }
}
