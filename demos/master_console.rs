//! Interactive bus master on a USB serial adapter with an RS-485 transceiver.
//!
//! RTS drives the transceiver's driver-enable pin. DTR is the outgoing daisy
//! line and CTS the returning one, for chains that loop back.
//!
//! ```text
//! cargo run --example master_console -- /dev/ttyUSB0
//! >> reset
//! >> address
//! >> send 16 2 1 2 3
//! >> batch 32 2 1 2 3 4
//! >> ask 48 2
//! ```

use anyhow::{ensure, Context, Result};
use log::warn;
use serialport::SerialPort;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};
use std::time::{Duration, Instant};

use discobus_proto::{
    Address, AddressingStatus, DaisyChain, DaisyGpio, DataStream, Line, Master, DEFAULT_BAUD,
};

struct Port(Box<dyn SerialPort>);

impl DataStream for Port {
    fn begin(&mut self, baud: u32) {
        if let Err(e) = self.0.set_baud_rate(baud) {
            warn!("Failed to set baud rate: {}", e);
        }
    }

    fn available(&self) -> usize {
        self.0.bytes_to_read().map_or(0, |n| n as usize)
    }

    fn read(&mut self) -> Option<u8> {
        let mut buf = [0];
        match self.0.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }

    fn write(&mut self, byte: u8) {
        if let Err(e) = self.0.write_all(&[byte]) {
            warn!("Write failed: {}", e);
        }
    }

    fn flush(&mut self) {
        let _ = self.0.flush();
    }

    fn clear(&mut self) {
        let _ = self.0.clear(serialport::ClearBuffer::Input);
    }

    fn enable_write(&mut self) {
        let _ = self.0.write_request_to_send(true);
    }

    fn enable_read(&mut self) {
        self.flush();
        let _ = self.0.write_request_to_send(false);
    }
}

/// D1 is CTS (input only), D2 is DTR (output only). Modem status reads
/// need `&mut`, hence the RefCell.
struct ModemLines(RefCell<Box<dyn SerialPort>>);

impl DaisyGpio for ModemLines {
    fn configure_input_pullup(&mut self, _line: Line) {}

    fn configure_output(&mut self, line: Line) {
        self.set_output(line, false);
    }

    fn set_output(&mut self, line: Line, active: bool) {
        if line == Line::D2 {
            let _ = self.0.get_mut().write_data_terminal_ready(active);
        }
    }

    fn read_input(&self, line: Line) -> bool {
        line == Line::D1 && self.0.borrow_mut().read_clear_to_send().unwrap_or(false)
    }
}

type Bus = Master<Port, ModemLines>;

fn now(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

fn cmd_address(bus: &mut Bus, start: Instant) -> Result<()> {
    bus.start_addressing(now(start), 500);
    loop {
        match bus.check_for_addresses(now(start)) {
            AddressingStatus::Waiting => std::thread::sleep(Duration::from_millis(1)),
            AddressingStatus::Done => break,
            AddressingStatus::Error => anyhow::bail!("Addressing failed"),
        }
    }
    println!("{} nodes", bus.node_count());
    Ok(())
}

fn cmd_send(args: &mut CmdScanner, bus: &mut Bus) -> Result<()> {
    let command: u8 = args.parse_next()?;
    let destination: u8 = args.parse_next()?;
    let data = args.parse_rest::<u8>()?;
    bus.start_message(command, Address::new(destination), data.len().try_into()?, false, false);
    bus.send_data_slice(&data)?;
    bus.finish_message()?;
    Ok(())
}

fn cmd_batch(args: &mut CmdScanner, bus: &mut Bus) -> Result<()> {
    let command: u8 = args.parse_next()?;
    let per_node: u8 = args.parse_next()?;
    let data = args.parse_rest::<u8>()?;
    ensure!(
        data.len() == usize::from(per_node) * usize::from(bus.node_count()),
        "Need {} bytes for each of {} nodes",
        per_node,
        bus.node_count()
    );
    bus.start_message(command, Address::BROADCAST, per_node, true, false);
    bus.send_data_slice(&data)?;
    bus.finish_message()?;
    Ok(())
}

fn cmd_ask(args: &mut CmdScanner, bus: &mut Bus, start: Instant) -> Result<()> {
    let command: u8 = args.parse_next()?;
    let per_node: u8 = args.parse_next()?;
    let defaults = vec![0; per_node.into()];
    let mut buf = vec![0; usize::from(per_node) * usize::from(bus.node_count())];

    bus.start_message(command, Address::BROADCAST, per_node, true, true);
    let mut collector = bus.collect_responses(&mut buf, &defaults, now(start), 50)?;
    while !collector.poll(now(start)) {
        std::thread::sleep(Duration::from_millis(1));
    }
    drop(collector);
    for (n, response) in buf.chunks(per_node.into()).enumerate() {
        println!("{:3}: {:02x?}", n + 1, response);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let serial = serialport::new(&port, DEFAULT_BAUD)
        .timeout(Duration::from_millis(10))
        .open()
        .with_context(|| format!("Failed to open {}", port))?;
    let lines = serial.try_clone().context("Failed to clone serial port")?;

    let daisy = DaisyChain::with_polarity(ModemLines(RefCell::new(lines)), Line::D1);
    let mut bus = Master::new(Port(serial), daisy);
    bus.begin(DEFAULT_BAUD);
    let start = Instant::now();

    let mut stdout = std::io::stdout();
    loop {
        print!(">> ");
        stdout.flush()?;
        let mut cmd = String::new();
        let mut scan = CmdScanner::read_stdin(&mut cmd)?;
        if let Err(err) = match scan.next() {
            Err(_) => continue,
            Ok("reset") => {
                bus.reset_all_nodes();
                Ok(())
            }
            Ok("address") => cmd_address(&mut bus, start),
            Ok("send") => cmd_send(&mut scan, &mut bus),
            Ok("batch") => cmd_batch(&mut scan, &mut bus),
            Ok("ask") => cmd_ask(&mut scan, &mut bus, start),
            Ok("quit") | Ok("q") => break,
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        } {
            println!("{:?}", err)
        }
    }
    Ok(())
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn read_stdin(buf: &'a mut String) -> Result<Self> {
        buf.clear();
        std::io::stdin().read_line(buf)?;
        let splt = buf.split_whitespace().peekable();
        Ok(Self { splt })
    }

    fn next(&mut self) -> Result<&str> {
        self.splt.next().context("End of stream")
    }

    fn parse_next<T: FromStr>(&mut self) -> Result<T> {
        self.next()?.parse::<T>().ok().context("Parse error")
    }

    fn parse_rest<T: FromStr>(&mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while self.splt.peek().is_some() {
            out.push(self.parse_next()?);
        }
        Ok(out)
    }
}
