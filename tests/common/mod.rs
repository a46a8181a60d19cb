#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use discobus_proto::{
    AddressingStatus, DaisyChain, DaisyGpio, DataStream, Line, Master, NoDelay, Slave, CMD_ADDRESS,
};

pub type SimMaster = Master<BusPort, BusPins>;
pub type SimSlave = Slave<BusPort, BusPins, NoDelay>;

#[derive(Default, Copy, Clone)]
struct Pin {
    wire: Option<usize>,
    output: bool,
    driven: bool,
}

/// A simulated half-duplex bus. Every byte written by one participant is
/// delivered to all the others, never back to the writer. Daisy chain wires
/// are open drain: a wire is active if either end drives it.
#[derive(Default)]
pub struct RS485Bus {
    rx: Vec<VecDeque<u8>>,
    pins: Vec<[Pin; 2]>,
    wires: usize,
    /// Every byte put on the bus, with the writer's id.
    pub traffic: Vec<(usize, u8)>,
    /// Number of upcoming writes to garble, per participant.
    pub corrupt: Vec<usize>,
}

fn pin_index(line: Line) -> usize {
    match line {
        Line::D1 => 0,
        Line::D2 => 1,
    }
}

impl RS485Bus {
    pub fn new() -> Rc<RefCell<RS485Bus>> {
        Default::default()
    }

    fn wire_active(&self, wire: usize) -> bool {
        self.pins
            .iter()
            .flat_map(|p| p.iter())
            .any(|p| p.wire == Some(wire) && p.output && p.driven)
    }

    pub fn written_by(&self, id: usize) -> Vec<u8> {
        self.traffic
            .iter()
            .filter(|(from, _)| *from == id)
            .map(|(_, b)| *b)
            .collect()
    }
}

pub trait BusExt {
    fn attach(&self) -> usize;
    fn port(&self, id: usize) -> BusPort;
    fn pins(&self, id: usize) -> BusPins;
    fn connect(&self, a: (usize, Line), b: (usize, Line));
}

impl BusExt for Rc<RefCell<RS485Bus>> {
    fn attach(&self) -> usize {
        let mut bus = self.borrow_mut();
        bus.rx.push(VecDeque::new());
        bus.pins.push(Default::default());
        bus.corrupt.push(0);
        bus.rx.len() - 1
    }

    fn port(&self, id: usize) -> BusPort {
        BusPort {
            bus: Rc::clone(self),
            id,
            writing: false,
        }
    }

    fn pins(&self, id: usize) -> BusPins {
        BusPins {
            bus: Rc::clone(self),
            id,
        }
    }

    fn connect(&self, a: (usize, Line), b: (usize, Line)) {
        let mut bus = self.borrow_mut();
        let wire = bus.wires;
        bus.wires += 1;
        bus.pins[a.0][pin_index(a.1)].wire = Some(wire);
        bus.pins[b.0][pin_index(b.1)].wire = Some(wire);
    }
}

pub struct BusPort {
    bus: Rc<RefCell<RS485Bus>>,
    id: usize,
    writing: bool,
}

impl BusPort {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl DataStream for BusPort {
    fn begin(&mut self, _baud: u32) {}

    fn available(&self) -> usize {
        self.bus.borrow().rx[self.id].len()
    }

    fn read(&mut self) -> Option<u8> {
        self.bus.borrow_mut().rx[self.id].pop_front()
    }

    fn write(&mut self, byte: u8) {
        assert!(self.writing, "node {} wrote without enabling write", self.id);
        let mut bus = self.bus.borrow_mut();
        let byte = if bus.corrupt[self.id] > 0 {
            bus.corrupt[self.id] -= 1;
            byte ^ 0x80
        } else {
            byte
        };
        bus.traffic.push((self.id, byte));
        for (id, rx) in bus.rx.iter_mut().enumerate() {
            if id != self.id {
                rx.push_back(byte);
            }
        }
    }

    fn flush(&mut self) {}

    fn clear(&mut self) {
        self.bus.borrow_mut().rx[self.id].clear();
    }

    fn enable_write(&mut self) {
        self.writing = true;
    }

    fn enable_read(&mut self) {
        self.writing = false;
    }
}

pub struct BusPins {
    bus: Rc<RefCell<RS485Bus>>,
    id: usize,
}

impl DaisyGpio for BusPins {
    fn configure_input_pullup(&mut self, line: Line) {
        let mut bus = self.bus.borrow_mut();
        let pin = &mut bus.pins[self.id][pin_index(line)];
        pin.output = false;
        pin.driven = false;
    }

    fn configure_output(&mut self, line: Line) {
        let mut bus = self.bus.borrow_mut();
        let pin = &mut bus.pins[self.id][pin_index(line)];
        pin.output = true;
        pin.driven = false;
    }

    fn set_output(&mut self, line: Line, active: bool) {
        self.bus.borrow_mut().pins[self.id][pin_index(line)].driven = active;
    }

    fn read_input(&self, line: Line) -> bool {
        let bus = self.bus.borrow();
        match bus.pins[self.id][pin_index(line)].wire {
            Some(wire) => bus.wire_active(wire),
            None => false,
        }
    }
}

pub struct Chain {
    pub bus: Rc<RefCell<RS485Bus>>,
    pub master: SimMaster,
    pub slaves: Vec<SimSlave>,
}

/// A master followed by `nodes` slaves with unknown daisy polarity.
///
/// Slaves listed in `swapped` have their lines wired the other way round.
/// With `closed` the last node's outgoing line loops back to the master.
pub fn chain(nodes: usize, closed: bool, swapped: &[usize]) -> Chain {
    let _ = env_logger::builder().is_test(true).try_init();

    let bus = RS485Bus::new();
    let master_id = bus.attach();
    let slave_ids: Vec<usize> = (0..nodes).map(|_| bus.attach()).collect();

    let in_line = |slave: usize| {
        if swapped.contains(&slave) {
            Line::D2
        } else {
            Line::D1
        }
    };

    let mut upstream = (master_id, Line::D2);
    for (n, id) in slave_ids.iter().enumerate() {
        bus.connect(upstream, (*id, in_line(n)));
        upstream = (*id, in_line(n).other());
    }

    let master_daisy = if closed {
        bus.connect(upstream, (master_id, Line::D1));
        DaisyChain::with_polarity(bus.pins(master_id), Line::D1)
    } else {
        DaisyChain::next_only(bus.pins(master_id), Line::D2)
    };
    let master = Master::new(bus.port(master_id), master_daisy);

    let slaves = slave_ids
        .iter()
        .map(|id| Slave::new(bus.port(*id), DaisyChain::new(bus.pins(*id)), NoDelay))
        .collect();

    Chain {
        bus,
        master,
        slaves,
    }
}

impl Chain {
    /// Run an addressing round to the end, one master and slave poll per
    /// tick. Returns the result and the address each slave reported in its
    /// addressing message.
    pub fn run_addressing(&mut self, timeout: u32) -> (AddressingStatus, Vec<Option<u8>>) {
        self.master.start_addressing(0, timeout);
        self.finish_addressing()
    }

    /// Poll a round started with `start_addressing(0, _)` to its end.
    pub fn finish_addressing(&mut self) -> (AddressingStatus, Vec<Option<u8>>) {
        let mut reported = vec![None; self.slaves.len()];
        for time in 1..100_000 {
            let status = self.master.check_for_addresses(time);
            self.poll_slaves(&mut reported);
            if status != AddressingStatus::Waiting {
                for _ in 0..3 {
                    self.poll_slaves(&mut reported);
                }
                return (status, reported);
            }
        }
        panic!("addressing never finished");
    }

    fn poll_slaves(&mut self, reported: &mut [Option<u8>]) {
        for (slave, seen) in self.slaves.iter_mut().zip(reported.iter_mut()) {
            if slave.read() && slave.command() == CMD_ADDRESS {
                *seen = slave.data().first().copied();
            }
        }
    }

    /// Let every slave take in what's on the bus.
    pub fn settle(&mut self) {
        for _ in 0..3 {
            for slave in self.slaves.iter_mut() {
                slave.read();
            }
        }
    }
}
