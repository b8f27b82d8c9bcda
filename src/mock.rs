//! Register-level simulation of the radio for host-side testing.
//!
//! [`MockBus`] stands in for the SPI device and simulates the handful of
//! silicon behaviors the driver observes: the register file with its
//! write-1-to-clear IRQ flags, the FIFO with its auto-incrementing address
//! pointer, Tx-done timing, scripted packet arrival and channel activity.
//! [`MockClock`] and [`MockDelay`] share one millisecond counter, so the
//! driver's poll loops advance simulated time by sleeping.
//!
//! Handles are cheap clones over shared state: hand one `MockBus` to the
//! driver and keep another to script and inspect the "hardware".

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

use crate::time::MonotonicClock;

const OP_MODE: usize = 0x01;
const FIFO_ADDR_PTR: usize = 0x0d;
const FIFO_RX_BASE: usize = 0x0f;
const FIFO_RX_CURRENT: usize = 0x10;
const IRQ_FLAGS: usize = 0x12;
const RX_NB_BYTES: usize = 0x13;
const MODEM_STAT: usize = 0x18;

const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;
const MODE_CAD: u8 = 0x07;

/// How long a simulated channel-activity scan takes.
const CAD_CYCLE_MS: u64 = 2;

/// Settable monotonic clock shared by every mock handle.
#[derive(Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl MonotonicClock for MockClock {
    fn millis(&mut self) -> u64 {
        self.0.get()
    }
}

/// Sleep capability that advances the shared clock instead of blocking.
pub struct MockDelay {
    clock: MockClock,
}

impl MockDelay {
    pub fn new(clock: &MockClock) -> Self {
        MockDelay {
            clock: clock.clone(),
        }
    }
}

impl DelayMs<u8> for MockDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.clock.advance(ms as u64);
    }
}

/// Chip-select or reset stand-in; the mock keeps no pin state.
pub struct MockPin;

impl OutputPin for MockPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct RadioState {
    regs: [u8; 0x80],
    fifo: [u8; 256],
    writes: Vec<(u8, u8)>,
    tx_time_ms: u32,
    tx_done_at: Option<u64>,
    rx_packet: Option<(u64, Vec<u8>)>,
    signal_window: Option<(u64, u64)>,
    cad_detect_at: Option<u64>,
    cad_done_at: Option<u64>,
}

impl RadioState {
    fn new() -> Self {
        let mut regs = [0u8; 0x80];
        // power-on defaults the driver relies on
        regs[OP_MODE] = 0x09; // LF mode, Standby
        regs[0x06] = 0x6c; // 434 MHz
        regs[0x07] = 0x80;
        regs[0x08] = 0x00;
        regs[0x09] = 0x4f; // PaConfig
        regs[0x0a] = 0x09;
        regs[0x0b] = 0x2b;
        regs[0x0c] = 0x20;
        regs[0x0e] = 0x80; // FifoTxBaseAddr
        regs[0x1d] = 0x72; // 125 kHz, CR 4/5, explicit header
        regs[0x1e] = 0x70; // SF7
        regs[0x1f] = 0x64;
        regs[0x21] = 0x08;
        regs[0x23] = 0xff;
        regs[0x26] = 0x04;
        regs[0x31] = 0xc3;
        regs[0x37] = 0x0a;
        regs[0x39] = 0x12;
        regs[0x42] = 0x12; // chip version
        regs[0x4d] = 0x84;
        RadioState {
            regs,
            fifo: [0; 256],
            writes: Vec::new(),
            tx_time_ms: 30,
            tx_done_at: None,
            rx_packet: None,
            signal_window: None,
            cad_detect_at: None,
            cad_done_at: None,
        }
    }

    fn mode(&self) -> u8 {
        self.regs[OP_MODE] & 0x07
    }

    fn set_mode_bits(&mut self, mode: u8) {
        self.regs[OP_MODE] = (self.regs[OP_MODE] & !0x07) | mode;
    }

    /// Advance the simulated silicon to `now`.
    fn tick(&mut self, now: u64) {
        if self.mode() == MODE_TX {
            if let Some(done) = self.tx_done_at {
                if now >= done {
                    self.regs[IRQ_FLAGS] |= 0x08; // TxDone
                    self.set_mode_bits(MODE_STDBY);
                    self.tx_done_at = None;
                }
            }
        }
        if self.mode() == MODE_RX_CONTINUOUS {
            if let Some((at, _)) = &self.rx_packet {
                if now >= *at {
                    let (_, data) = self.rx_packet.take().unwrap();
                    let base = self.regs[FIFO_RX_BASE];
                    for (offset, &byte) in data.iter().enumerate() {
                        self.fifo[(base as usize + offset) % 256] = byte;
                    }
                    self.regs[FIFO_RX_CURRENT] = base;
                    self.regs[RX_NB_BYTES] = data.len() as u8;
                    self.regs[IRQ_FLAGS] |= 0x40; // RxDone
                    self.signal_window = None; // reception over
                }
            }
        }
        if self.mode() == MODE_CAD {
            if let Some(at) = self.cad_detect_at {
                if now >= at {
                    self.regs[IRQ_FLAGS] |= 0x01; // CadDetected
                    self.cad_detect_at = None;
                }
            }
            if let Some(at) = self.cad_done_at {
                if now >= at {
                    self.regs[IRQ_FLAGS] |= 0x04; // CadDone
                    self.set_mode_bits(MODE_STDBY);
                    self.cad_done_at = None;
                }
            }
        }
        let detected = matches!(self.signal_window, Some((from, until)) if now >= from && now < until);
        if detected {
            self.regs[MODEM_STAT] |= 0x01;
        } else {
            self.regs[MODEM_STAT] &= !0x01;
        }
    }

    fn peek(&self, addr: u8) -> u8 {
        if addr as usize == 0x00 {
            self.fifo[self.regs[FIFO_ADDR_PTR] as usize]
        } else {
            self.regs[addr as usize]
        }
    }

    fn read(&mut self, addr: u8) -> u8 {
        if addr as usize == 0x00 {
            let ptr = self.regs[FIFO_ADDR_PTR];
            let byte = self.fifo[ptr as usize];
            self.regs[FIFO_ADDR_PTR] = ptr.wrapping_add(1);
            byte
        } else {
            self.regs[addr as usize]
        }
    }

    fn write(&mut self, addr: u8, value: u8, now: u64) {
        self.writes.push((addr, value));
        match addr as usize {
            0x00 => {
                let ptr = self.regs[FIFO_ADDR_PTR];
                self.fifo[ptr as usize] = value;
                self.regs[FIFO_ADDR_PTR] = ptr.wrapping_add(1);
            }
            OP_MODE => {
                self.regs[OP_MODE] = value;
                self.tx_done_at = None;
                self.cad_done_at = None;
                match value & 0x07 {
                    MODE_TX => self.tx_done_at = Some(now + self.tx_time_ms as u64),
                    MODE_CAD => self.cad_done_at = Some(now + CAD_CYCLE_MS),
                    _ => {}
                }
            }
            IRQ_FLAGS => self.regs[IRQ_FLAGS] &= !value,
            _ => self.regs[addr as usize] = value,
        }
    }
}

/// SPI stand-in simulating the SX1276 register file.
#[derive(Clone)]
pub struct MockBus {
    state: Rc<RefCell<RadioState>>,
    clock: MockClock,
}

impl MockBus {
    pub fn new(clock: &MockClock) -> Self {
        MockBus {
            state: Rc::new(RefCell::new(RadioState::new())),
            clock: clock.clone(),
        }
    }

    /// Poke a register directly, without the bus or the write log.
    pub fn set_reg(&self, addr: u8, value: u8) {
        self.state.borrow_mut().regs[addr as usize] = value;
    }

    pub fn reg(&self, addr: u8) -> u8 {
        self.state.borrow().regs[addr as usize]
    }

    pub fn fifo(&self, start: usize, len: usize) -> Vec<u8> {
        self.state.borrow().fifo[start..start + len].to_vec()
    }

    /// Every `(address, value)` pair written over the bus, oldest first.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.state.borrow().writes.clone()
    }

    /// How long a simulated transmission stays on the air.
    pub fn set_tx_time(&self, ms: u32) {
        self.state.borrow_mut().tx_time_ms = ms;
    }

    /// Script a packet to arrive `in_ms` from now, once the modem is in
    /// continuous receive.
    pub fn set_rx_packet(&self, in_ms: u64, data: &[u8]) {
        let at = self.clock.now() + in_ms;
        self.state.borrow_mut().rx_packet = Some((at, data.to_vec()));
    }

    /// Raise the signal-detected modem status between `from_ms` and
    /// `until_ms` from now (or until a scripted packet lands).
    pub fn set_signal_window(&self, from_ms: u64, until_ms: u64) {
        let now = self.clock.now();
        self.state.borrow_mut().signal_window = Some((now + from_ms, now + until_ms));
    }

    /// Script channel activity to be detected `in_ms` from now, once the
    /// modem is scanning.
    pub fn set_cad_detect(&self, in_ms: u64) {
        let at = self.clock.now() + in_ms;
        self.state.borrow_mut().cad_detect_at = Some(at);
    }
}

impl Transfer<u8> for MockBus {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
        let now = self.clock.now();
        let mut state = self.state.borrow_mut();
        state.tick(now);
        let addr = words[0];
        if addr & 0x80 != 0 {
            // the device shifts its previous value back during the data phase
            let addr = addr & 0x7f;
            let previous = state.peek(addr);
            state.write(addr, words[1], now);
            words[1] = previous;
        } else {
            words[1] = state.read(addr);
        }
        Ok(words)
    }
}
