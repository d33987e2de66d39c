//! Command/data read and write procedures built on [`crate::chip::ChipDescriptor`].

use std::time::Duration;

use crate::chip::{ChipDescriptor, Protocol, TransferMode};
use crate::error::{Error, Result};
use crate::pin::{self, Level, Mode};

impl ChipDescriptor {
    /// Block until `delay` has elapsed since the previous edge, then commit
    /// the new scheduling baseline. See [`crate::timing::TimingState`].
    fn step(&mut self, delay: Duration) {
        self.state.set_pending(delay);
        self.state.wait();
        self.state.advance();
    }

    fn select(&mut self, mode: TransferMode) {
        let high = mode.rscd_high(self.protocol);
        pin::write(&*self.gpio, self.pins.rscd, Level::from(high));
    }

    /// The strobe pin pulsed for this direction. 6800 shares one enable for
    /// both directions (the separate `rwrd` pin only sets the static
    /// direction level); 8080 pulses `enwr` for writes and `rwrd` for reads.
    fn strobe_pin(&self, write: bool) -> u8 {
        match (self.protocol, write) {
            (Protocol::Motorola6800, _) | (Protocol::Intel8080, true) => self.pins.enwr,
            (Protocol::Intel8080, false) => self
                .pins
                .rwrd
                .expect("begin_read already validated rwrd is present"),
        }
    }

    fn assert_strobe(&mut self, write: bool) {
        let level = match self.protocol {
            Protocol::Motorola6800 => Level::High,
            Protocol::Intel8080 => Level::Low,
        };
        pin::write(&*self.gpio, self.strobe_pin(write), level);
    }

    fn deassert_strobe(&mut self, write: bool) {
        let level = match self.protocol {
            Protocol::Motorola6800 => Level::Low,
            Protocol::Intel8080 => Level::High,
        };
        pin::write(&*self.gpio, self.strobe_pin(write), level);
    }

    /// One-time staging for a multi-byte write: register select, direction
    /// level, and data-pin direction switch, each committed once rather than
    /// once per phase. Only 6800 has a direction level to set here — 8080's
    /// `rwrd` is a dedicated read strobe that stays idle-high through a
    /// write and is never touched by this path.
    fn begin_write(&mut self, mode: TransferMode) {
        self.select(mode);
        if self.protocol == Protocol::Motorola6800 {
            if let Some(rwrd) = self.pins.rwrd {
                pin::write(&*self.gpio, rwrd, Level::Low);
            }
        }
        let pins = self.pins.active_data_pins();
        pin::set_modes(&*self.gpio, &pins, Mode::Output);
        self.step(self.timing.tsetup);
    }

    fn end_write(&mut self) {
        let pins = self.pins.active_data_pins();
        pin::set_modes(&*self.gpio, &pins, Mode::Input);
    }

    /// One-time staging for a multi-byte read: rejects write-only
    /// descriptors up front, then commits register select and direction
    /// once for the whole operation.
    fn begin_read(&mut self, mode: TransferMode) -> Result<()> {
        let rwrd = self.pins.rwrd.ok_or(Error::WriteOnly)?;
        self.select(mode);
        if self.protocol == Protocol::Motorola6800 {
            pin::write(&*self.gpio, rwrd, Level::High);
        }
        self.step(self.timing.tsetup);
        Ok(())
    }

    /// Per spec: after the final byte, immediately (no WAIT) return `rwrd`
    /// to write mode on 6800. 8080's read strobe already idles high once the
    /// last phase deasserts it, so there is nothing further to restore.
    fn end_read(&mut self) {
        if self.protocol == Protocol::Motorola6800 {
            if let Some(rwrd) = self.pins.rwrd {
                pin::write(&*self.gpio, rwrd, Level::Low);
            }
        }
    }

    /// Drive `value`'s low `pins.len()` bits onto `pins`, MSB first.
    fn drive_phase(&mut self, pins: &[u8], value: u8) {
        let width = pins.len() as u8;
        for (i, &p) in pins.iter().enumerate() {
            let shift = width - 1 - i as u8;
            pin::write(&*self.gpio, p, Level::from((value >> shift) & 1 != 0));
        }
    }

    /// Sample `pins` MSB first into a single value.
    fn sample_phase(&self, pins: &[u8]) -> u8 {
        let mut value = 0u8;
        for &p in pins {
            value = (value << 1) | (pin::read(&*self.gpio, p).is_high() as u8);
        }
        value
    }

    /// One write phase: a full byte in 8-bit mode, one nibble in 4-bit mode.
    /// Direction, register select, data-pin mode, and the initial `tsetup`
    /// delay are all staged once by the caller's `begin_write`; this only
    /// drives the edge. `last` selects the gap that follows the strobe:
    /// `tclock` between nibbles of the same byte, `tproc` after the last
    /// nibble (which also serves as the inter-byte gap, so callers must not
    /// add `tproc` again).
    fn write_phase(&mut self, value: u8, last: bool) {
        let pins = self.pins.active_data_pins();
        self.drive_phase(&pins, value);
        self.assert_strobe(true);

        self.step(self.timing.tclock);
        self.deassert_strobe(true);

        let gap = if last {
            self.timing.tproc
        } else {
            self.timing.tclock
        };
        self.step(gap);
    }

    /// One read phase: asserts the strobe, samples after `tread`, then rides
    /// out the rest of the clock half-period before releasing. `last`
    /// selects the gap that follows: `max(tclock, thold)` between nibbles of
    /// the same byte, `max(tproc, thold)` after the last nibble (which also
    /// serves as the inter-byte gap, so callers must not add `tproc` again).
    fn read_phase(&mut self, last: bool) -> u8 {
        self.assert_strobe(false);

        self.step(self.timing.tread);
        let pins = self.pins.active_data_pins();
        let value = self.sample_phase(&pins);

        self.step(self.timing.tclock.saturating_sub(self.timing.tread));
        self.deassert_strobe(false);

        let gap = if last {
            self.timing.tproc.max(self.timing.thold)
        } else {
            self.timing.tclock.max(self.timing.thold)
        };
        self.step(gap);

        value
    }

    fn write_byte(&mut self, byte: u8) {
        if self.pins.is_4bit() {
            self.write_phase((byte >> 4) & 0xF, false);
            self.write_phase(byte & 0xF, true);
        } else {
            self.write_phase(byte, true);
        }
    }

    fn read_byte(&mut self) -> u8 {
        let bpc = self.pins.bits_per_phase();
        let phases = if self.pins.is_4bit() { 2 } else { 1 };
        let mut acc = 0u8;
        for i in 0..phases {
            let last = i + 1 == phases;
            let nibble = self.read_phase(last);
            acc = (acc << bpc) | nibble;
        }
        acc
    }

    /// Write a single byte to the command/status register.
    pub fn write_command(&mut self, byte: u8) -> Result<()> {
        self.begin_write(TransferMode::Command);
        self.write_byte(byte);
        self.end_write();
        Ok(())
    }

    /// Write a run of bytes to the data register, in order. A zero-length
    /// slice is a no-op: no pins change, no time elapses.
    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.begin_write(TransferMode::Data);
        for &byte in bytes {
            self.write_byte(byte);
        }
        self.end_write();
        Ok(())
    }

    /// Read a single byte from the command/status register.
    ///
    /// Returns [`Error::WriteOnly`] without touching any pin if the
    /// descriptor has no `rwrd` pin.
    pub fn read_register(&mut self) -> Result<u8> {
        self.begin_read(TransferMode::Command)?;
        let value = self.read_byte();
        self.end_read();
        Ok(value)
    }

    /// Read a run of bytes from the data register, filling `buf` in order.
    /// A zero-length `buf` is a no-op.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.begin_read(TransferMode::Data)?;
        for slot in buf.iter_mut() {
            *slot = self.read_byte();
        }
        self.end_read();
        Ok(())
    }
}
