//! Intel 8155/8156 RAM-I/O-Timer emulation.
//!
//! The 8155 pairs 256 bytes of static RAM with two 8-bit I/O ports, a 6-bit
//! port C, and a 14-bit programmable down-counter, all behind a multiplexed
//! address/data bus: the host latches an address (plus a RAM-vs-register
//! select) and then transfers data against it. The timer primarily works as
//! a square-wave generator, but can also be programmed for a single-cycle
//! low pulse on terminal count.
//!
//! The counter runs in two halves per period (it effectively counts down by
//! twos), which this model reproduces with two deadline slots: one for the
//! half-period boundary and one for the terminal-count pulse. Deadlines are
//! absolute TIMER IN clock ticks; [`I8155::poll`] converts the current
//! virtual time to ticks and replays every elapsed transition in order, so a
//! host that advances time in large steps still observes each intermediate
//! output edge.
//!
//! ALT 3 / ALT 4 strobed port modes and the interrupt-enable command bits
//! are recognized but not implemented, matching common usage where port C is
//! plain input or output.

use crate::clock::Clock;

/// Register indices within the I/O address space. Only the low three bits of
/// the latched address participate in decode.
pub const REG_COMMAND: u8 = 0;
pub const REG_STATUS: u8 = 0;
pub const REG_PORT_A: u8 = 1;
pub const REG_PORT_B: u8 = 2;
pub const REG_PORT_C: u8 = 3;
pub const REG_TIMER_LOW: u8 = 4;
pub const REG_TIMER_HIGH: u8 = 5;

pub const COMMAND_PA: u8 = 0x01;
pub const COMMAND_PB: u8 = 0x02;
pub const COMMAND_PC_MASK: u8 = 0x0c;
pub const COMMAND_PC_ALT_1: u8 = 0x00;
pub const COMMAND_PC_ALT_2: u8 = 0x0c;
pub const COMMAND_PC_ALT_3: u8 = 0x04; // strobed, not supported
pub const COMMAND_PC_ALT_4: u8 = 0x08; // strobed, not supported
pub const COMMAND_IEA: u8 = 0x10; // recognized, not implemented
pub const COMMAND_IEB: u8 = 0x20; // recognized, not implemented
pub const COMMAND_TM_MASK: u8 = 0xc0;
pub const COMMAND_TM_NOP: u8 = 0x00;
pub const COMMAND_TM_STOP: u8 = 0x40;
pub const COMMAND_TM_STOP_AFTER_TC: u8 = 0x80;
pub const COMMAND_TM_START: u8 = 0xc0;

/// Terminal-count flag in the status register; the remaining status bits
/// belong to the unimplemented strobed handshake modes and read as 0.
pub const STATUS_TIMER: u8 = 0x40;

/// Timer mode bits, as they appear in the high byte of the count registers.
pub const TIMER_MODE_MASK: u8 = 0xc0;
pub const TIMER_MODE_AUTO_RELOAD: u8 = 0x40;
pub const TIMER_MODE_TC_PULSE: u8 = 0x80;

/// TIMER IN frequency of a typical 8085 system (6.144 MHz crystal, CLK out
/// divided by two).
pub const DEFAULT_CLOCK_HZ: u64 = 3_072_000;

const RAM_SIZE: usize = 256;
const PORT_COUNT: usize = 3;

/// Address space selected by the address-latch phase of a bus transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Space {
    #[default]
    Memory,
    Io,
}

/// The 8155 and 8156 are functionally identical; they differ only in the
/// polarity of the chip-enable pin, which is a board decode concern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    I8155,
    I8156,
}

impl Variant {
    /// Pin 8 (CE) is active low on the 8155 and active high on the 8156.
    pub fn ce_active_high(self) -> bool {
        matches!(self, Variant::I8156)
    }
}

#[derive(Clone, Debug)]
pub struct I8155Config {
    pub variant: Variant,
    /// TIMER IN frequency in Hz.
    pub clock_hz: u64,
}

impl Default for I8155Config {
    fn default() -> Self {
        Self {
            variant: Variant::I8155,
            clock_hz: DEFAULT_CLOCK_HZ,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Port {
    A = 0,
    B = 1,
    C = 2,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PortMode {
    Input,
    Output,
    StrobedPortA, // not supported
    Strobed,      // not supported
}

type InputLine = Box<dyn FnMut() -> u8>;
type OutputLine = Box<dyn FnMut(u8)>;

pub struct I8155<C: Clock> {
    clock: C,
    config: I8155Config,

    ram: [u8; RAM_SIZE],
    space: Space,
    address: u8,

    command: u8,
    status: u8,
    output: [u8; PORT_COUNT],

    count_length: u16,
    count_loaded: u16,
    count_even_phase: bool,
    to_level: bool,

    // Absolute deadlines in TIMER IN clocks; `None` while the event is
    // disabled. A slot is consumed before its handler runs so the handler
    // can reschedule either event.
    half_deadline: Option<u64>,
    tc_deadline: Option<u64>,

    in_pa: Option<InputLine>,
    in_pb: Option<InputLine>,
    in_pc: Option<InputLine>,
    out_pa: Option<OutputLine>,
    out_pb: Option<OutputLine>,
    out_pc: Option<OutputLine>,
    out_to: Option<Box<dyn FnMut(bool)>>,
}

impl<C: Clock> I8155<C> {
    pub fn new(clock: C, config: I8155Config) -> Self {
        Self {
            clock,
            config,
            ram: [0; RAM_SIZE],
            space: Space::Memory,
            address: 0,
            command: 0,
            status: 0,
            output: [0; PORT_COUNT],
            count_length: 0,
            count_loaded: 0,
            count_even_phase: false,
            to_level: false,
            half_deadline: None,
            tc_deadline: None,
            in_pa: None,
            in_pb: None,
            in_pc: None,
            out_pa: None,
            out_pb: None,
            out_pc: None,
            out_to: None,
        }
    }

    pub fn new_default(clock: C) -> Self {
        Self::new(clock, I8155Config::default())
    }

    pub fn variant(&self) -> Variant {
        self.config.variant
    }

    // Unbound input lines read as 0; unbound output lines are dropped.

    pub fn connect_port_a_input(&mut self, f: impl FnMut() -> u8 + 'static) {
        self.in_pa = Some(Box::new(f));
    }

    pub fn connect_port_b_input(&mut self, f: impl FnMut() -> u8 + 'static) {
        self.in_pb = Some(Box::new(f));
    }

    pub fn connect_port_c_input(&mut self, f: impl FnMut() -> u8 + 'static) {
        self.in_pc = Some(Box::new(f));
    }

    pub fn connect_port_a_output(&mut self, f: impl FnMut(u8) + 'static) {
        self.out_pa = Some(Box::new(f));
    }

    pub fn connect_port_b_output(&mut self, f: impl FnMut(u8) + 'static) {
        self.out_pb = Some(Box::new(f));
    }

    pub fn connect_port_c_output(&mut self, f: impl FnMut(u8) + 'static) {
        self.out_pc = Some(Box::new(f));
    }

    /// Connects the TO pin. Invoked only when the driven level changes.
    pub fn connect_timer_output(&mut self, f: impl FnMut(bool) + 'static) {
        self.out_to = Some(Box::new(f));
    }

    fn tick_from_ns(&self, guest_ns: u64) -> u64 {
        ((guest_ns as u128) * (self.config.clock_hz as u128) / 1_000_000_000u128) as u64
    }

    /// Earliest guest time at which `tick` TIMER IN clocks have elapsed.
    /// Useful for hosts that schedule their own wakeups around the timer.
    pub fn ns_from_tick_ceil(&self, tick: u64) -> u64 {
        let numer = (tick as u128) * 1_000_000_000u128;
        let denom = self.config.clock_hz as u128;
        ((numer + denom - 1) / denom) as u64
    }

    fn now_ticks(&self) -> u64 {
        self.tick_from_ns(self.clock.now_ns())
    }

    /// Services every timer deadline the clock has passed, replaying the
    /// intermediate output transitions in deadline order. Register accesses
    /// that touch timer state call this themselves.
    pub fn poll(&mut self) {
        let now = self.now_ticks();
        loop {
            let due_half = self.half_deadline.filter(|&at| at <= now);
            let due_tc = self.tc_deadline.filter(|&at| at <= now);
            match (due_half, due_tc) {
                (None, None) => break,
                (Some(at), None) => {
                    self.half_deadline = None;
                    self.timer_half_counted(at);
                }
                (None, Some(_)) => {
                    self.tc_deadline = None;
                    self.timer_tc();
                }
                (Some(half_at), Some(tc_at)) => {
                    if tc_at <= half_at {
                        self.tc_deadline = None;
                        self.timer_tc();
                    } else {
                        self.half_deadline = None;
                        self.timer_half_counted(half_at);
                    }
                }
            }
        }
    }

    pub fn timer_running(&self) -> bool {
        self.half_deadline.is_some()
    }

    /// Last driven level of the TO pin.
    pub fn timer_output_level(&self) -> bool {
        self.to_level
    }

    fn timer_mode(&self) -> u8 {
        ((self.count_loaded >> 8) as u8) & TIMER_MODE_MASK
    }

    fn timer_count(&self) -> u16 {
        match self.half_deadline {
            Some(deadline) => {
                // the counter counts down by twos
                let remaining = deadline.saturating_sub(self.now_ticks());
                let counted = ((remaining + 1) << 1).min(u64::from(self.count_loaded & 0x3ffe));
                counted as u16 | u16::from(!self.count_even_phase)
            }
            None => self.count_length,
        }
    }

    fn timer_output(&mut self, level: bool) {
        if level == self.to_level {
            return;
        }

        self.to_level = level;
        if let Some(f) = self.out_to.as_mut() {
            f(level);
        }

        log::trace!("timer output: {}", u8::from(level));
    }

    fn timer_stop_count(&mut self) {
        // stop counting
        if self.half_deadline.is_some() {
            self.count_loaded =
                (self.count_loaded & (u16::from(TIMER_MODE_MASK) << 8)) | self.timer_count();
            self.half_deadline = None;
        }
        self.tc_deadline = None;

        // clear timer output
        self.timer_output(true);
    }

    fn timer_reload_count(&mut self, base: u64) {
        self.count_loaded = self.count_length;

        // valid counts range from 2 to 3FFF
        if self.count_length & 0x3fff < 2 {
            self.timer_stop_count();
            return;
        }

        // begin the odd half of the count, with one extra clock if the count
        // is odd
        self.count_even_phase = false;
        let length = u64::from(self.count_length & 0x3ffe);
        self.half_deadline = Some(base + (length >> 1) + u64::from(self.count_length & 1));
        self.timer_output(true);

        match self.timer_mode() {
            0 => {
                // puts out LOW during the second half of the count
                log::trace!("timer loaded with {} (mode: low)", self.count_loaded & 0x3fff);
            }
            TIMER_MODE_AUTO_RELOAD => {
                log::trace!(
                    "timer loaded with {} (mode: square wave)",
                    self.count_loaded & 0x3fff
                );
            }
            TIMER_MODE_TC_PULSE => {
                log::trace!(
                    "timer loaded with {} (mode: single pulse)",
                    self.count_loaded & 0x3fff
                );
            }
            _ => {
                // single pulse every time TC is reached
                log::trace!(
                    "timer loaded with {} (mode: automatic reload)",
                    self.count_loaded & 0x3fff
                );
            }
        }
    }

    fn timer_half_counted(&mut self, at: u64) {
        if self.count_even_phase {
            self.timer_output(true);
            self.count_even_phase = false;

            if self.timer_mode() & TIMER_MODE_AUTO_RELOAD == 0
                || self.command & COMMAND_TM_MASK == COMMAND_TM_STOP_AFTER_TC
            {
                self.timer_stop_count();
                log::trace!("timer stopped");
            } else {
                // automatically reload the counter
                self.timer_reload_count(at);
            }
        } else {
            // reload the even half of the count
            let length = u64::from(self.count_loaded & 0x3ffe);
            self.half_deadline = Some(at + (length >> 1));
            self.count_even_phase = true;

            // square wave modes produce a low output in the second half of
            // the counting period; pulse modes hold the output high until
            // the terminal-count event
            if self.timer_mode() & TIMER_MODE_TC_PULSE == 0 {
                self.timer_output(false);
            } else {
                self.tc_deadline = Some(at + ((length.max(2) - 2) >> 1));
            }
        }
    }

    fn timer_tc(&mut self) {
        if self.timer_mode() & TIMER_MODE_TC_PULSE != 0 {
            // pulse low on TC being reached
            self.timer_output(false);
        }

        // set timer flag
        self.status |= STATUS_TIMER;
    }

    fn port_mode(&self, port: Port) -> PortMode {
        match port {
            Port::A => {
                if self.command & COMMAND_PA != 0 {
                    PortMode::Output
                } else {
                    PortMode::Input
                }
            }
            Port::B => {
                if self.command & COMMAND_PB != 0 {
                    PortMode::Output
                } else {
                    PortMode::Input
                }
            }
            Port::C => match self.command & COMMAND_PC_MASK {
                COMMAND_PC_ALT_1 => PortMode::Input,
                COMMAND_PC_ALT_2 => PortMode::Output,
                COMMAND_PC_ALT_3 => PortMode::StrobedPortA,
                _ => PortMode::Strobed,
            },
        }
    }

    fn read_port(&mut self, port: Port) -> u8 {
        match self.port_mode(port) {
            PortMode::Input => {
                let line = match port {
                    Port::A => &mut self.in_pa,
                    Port::B => &mut self.in_pb,
                    Port::C => &mut self.in_pc,
                };
                line.as_mut().map_or(0, |f| f())
            }
            PortMode::Output => self.output[port as usize],
            PortMode::StrobedPortA | PortMode::Strobed => {
                log::warn!("unsupported strobed port C mode");
                0
            }
        }
    }

    fn drive_output(&mut self, port: Port) {
        let value = self.output[port as usize];
        let line = match port {
            Port::A => &mut self.out_pa,
            Port::B => &mut self.out_pb,
            Port::C => &mut self.out_pc,
        };
        if let Some(f) = line.as_mut() {
            f(value);
        }
    }

    fn write_port(&mut self, port: Port, data: u8) {
        self.output[port as usize] = data;
        if self.port_mode(port) == PortMode::Output {
            self.drive_output(port);
        }
    }

    /// Sets port modes and starts/stops the timer.
    fn write_command(&mut self, data: u8) {
        let old_command = std::mem::replace(&mut self.command, data);

        log::trace!(
            "port A mode: {}",
            if data & COMMAND_PA != 0 { "output" } else { "input" }
        );
        log::trace!(
            "port B mode: {}",
            if data & COMMAND_PB != 0 { "output" } else { "input" }
        );
        log::trace!(
            "port A interrupt: {}",
            if data & COMMAND_IEA != 0 { "enabled" } else { "disabled" }
        );
        log::trace!(
            "port B interrupt: {}",
            if data & COMMAND_IEB != 0 { "enabled" } else { "disabled" }
        );

        // enabling an output port drives its last latched value
        if data & COMMAND_PA != 0 && old_command & COMMAND_PA == 0 {
            self.drive_output(Port::A);
        }
        if data & COMMAND_PB != 0 && old_command & COMMAND_PB == 0 {
            self.drive_output(Port::B);
        }

        match data & COMMAND_PC_MASK {
            COMMAND_PC_ALT_1 => log::trace!("port C mode: alt 1 (PC0-PC5 input)"),
            COMMAND_PC_ALT_2 => {
                log::trace!("port C mode: alt 2 (PC0-PC5 output)");
                if old_command & COMMAND_PC_MASK != COMMAND_PC_ALT_2 {
                    self.drive_output(Port::C);
                }
            }
            COMMAND_PC_ALT_3 => {
                log::trace!("port C mode: alt 3 (PC0-PC2 A handshake, PC3-PC5 output)");
            }
            _ => {
                log::trace!("port C mode: alt 4 (PC0-PC2 A handshake, PC3-PC5 B handshake)");
            }
        }

        match data & COMMAND_TM_MASK {
            COMMAND_TM_NOP => {
                // do not affect counter operation
            }
            COMMAND_TM_STOP => {
                // NOP if the timer has not started, stop counting otherwise
                log::trace!("timer command: stop");
                self.timer_stop_count();
            }
            COMMAND_TM_STOP_AFTER_TC => {
                // stop immediately after the present TC is reached (NOP if
                // the timer has not started)
                log::trace!("timer command: stop after TC");
            }
            _ => {
                log::trace!("timer command: start");

                if !self.timer_running() {
                    // load mode and count length and start immediately; a
                    // running timer picks the new values up at the next TC
                    // instead
                    let base = self.now_ticks();
                    self.timer_reload_count(base);
                }
            }
        }
    }

    fn read_io(&mut self, offset: u8, side_effects: bool) -> u8 {
        match offset & 0x07 {
            REG_STATUS => {
                let data = self.status;

                // clear timer flag
                if side_effects {
                    self.status &= !STATUS_TIMER;
                }
                data
            }
            REG_PORT_A => self.read_port(Port::A),
            REG_PORT_B => self.read_port(Port::B),
            REG_PORT_C => self.read_port(Port::C) | 0xc0,
            REG_TIMER_LOW => (self.timer_count() & 0xff) as u8,
            REG_TIMER_HIGH => (((self.timer_count() >> 8) as u8) & 0x3f) | self.timer_mode(),
            _ => 0,
        }
    }

    /// Register read in the I/O address space.
    pub fn io_read(&mut self, offset: u8) -> u8 {
        self.poll();
        self.read_io(offset, true)
    }

    /// Register write in the I/O address space.
    pub fn io_write(&mut self, offset: u8, data: u8) {
        self.poll();
        match offset & 0x07 {
            REG_COMMAND => self.write_command(data),
            REG_PORT_A => self.write_port(Port::A, data),
            REG_PORT_B => self.write_port(Port::B, data),
            REG_PORT_C => self.write_port(Port::C, data & 0x3f),
            REG_TIMER_LOW => {
                self.count_length = (self.count_length & 0xff00) | u16::from(data);
            }
            REG_TIMER_HIGH => {
                self.count_length = (u16::from(data) << 8) | (self.count_length & 0x00ff);
            }
            _ => {}
        }
    }

    /// Internal RAM read.
    pub fn memory_read(&self, offset: u8) -> u8 {
        self.ram[usize::from(offset)]
    }

    /// Internal RAM write.
    pub fn memory_write(&mut self, offset: u8, data: u8) {
        self.ram[usize::from(offset)] = data;
    }

    /// Address-latch phase of a bus transfer: selects RAM or the I/O
    /// register space and stores the address for the data phase.
    pub fn ale_write(&mut self, space: Space, address: u8) {
        self.space = space;
        self.address = address;
    }

    /// Data phase of a bus transfer against the latched space and address.
    pub fn data_read(&mut self) -> u8 {
        match self.space {
            Space::Memory => self.memory_read(self.address),
            Space::Io => self.io_read(self.address),
        }
    }

    /// Debugger view of [`Self::data_read`]: status reads do not clear the
    /// terminal-count flag, and no timer deadlines are serviced.
    pub fn data_peek(&mut self) -> u8 {
        match self.space {
            Space::Memory => self.memory_read(self.address),
            Space::Io => self.read_io(self.address, false),
        }
    }

    pub fn data_write(&mut self, data: u8) {
        match self.space {
            Space::Memory => self.memory_write(self.address, data),
            Space::Io => self.io_write(self.address, data),
        }
    }

    /// RESET pin: ports revert to input mode, the timer flag clears, and the
    /// timer stops with TO forced high. RAM and the count registers are not
    /// affected.
    pub fn reset(&mut self) {
        // clear output registers
        self.output = [0; PORT_COUNT];

        // set ports to input mode
        self.write_command(self.command & !(COMMAND_PA | COMMAND_PB | COMMAND_PC_MASK));

        // clear timer flag
        self.status &= !STATUS_TIMER;

        // stop timer
        self.timer_stop_count();
    }
}
