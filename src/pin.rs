//! Direction, level, and pull configuration for a single GPIO pin.

use std::thread::sleep;
use std::time::Duration;

use crate::mem::{offsets, GpioRegisters, GPIO_REG_WORDS};

/// Pull-up/pull-down wait time mandated by the peripheral datasheet.
const PUD_SETTLE: Duration = Duration::from_micros(20);

/// Function-select value for a pin. `Input`/`Output` are used by the
/// transfer engine; the `Alt*` values are exposed for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    Input = 0,
    Output = 1,
    Alt0 = 4,
    Alt1 = 5,
    Alt2 = 6,
    Alt3 = 7,
    Alt4 = 3,
    Alt5 = 2,
}

impl Mode {
    fn from_bits(bits: u32) -> Mode {
        match bits & 0b111 {
            0 => Mode::Input,
            1 => Mode::Output,
            4 => Mode::Alt0,
            5 => Mode::Alt1,
            6 => Mode::Alt2,
            7 => Mode::Alt3,
            3 => Mode::Alt4,
            2 => Mode::Alt5,
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Level {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

/// Pull resistor configuration, as the raw 2-bit peripheral value (the
/// meaning of 1 vs 2 is SoC-defined; this crate passes it through
/// unchanged, as the distilled spec requires).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Pull {
    Off = 0,
    A = 1,
    B = 2,
}

fn fsel_word(pin: u8) -> usize {
    offsets::FSEL_BASE + (pin / 10) as usize
}

fn fsel_shift(pin: u8) -> u32 {
    (pin % 10) as u32 * 3
}

/// Read the function-select mode of a single pin.
pub fn mode(gpio: &dyn GpioRegisters, pin: u8) -> Mode {
    let word = gpio.read(fsel_word(pin));
    Mode::from_bits(word >> fsel_shift(pin))
}

/// Set the function-select mode of a single pin via read-modify-write.
pub fn set_mode(gpio: &dyn GpioRegisters, pin: u8, mode: Mode) {
    let offset = fsel_word(pin);
    let shift = fsel_shift(pin);
    let mask = 0b111u32 << shift;
    let word = gpio.read(offset);
    gpio.write(offset, (word & !mask) | ((mode as u32) << shift));
}

/// Set the function-select mode of several pins at once, committing each
/// affected FSEL word exactly once. Pins sharing a word have their fields
/// folded into a single read-modify-write, rather than one write per pin,
/// so a multi-pin direction switch never leaves the word in a
/// partially-switched state that a concurrent reader (or the bus itself)
/// could observe.
pub fn set_modes(gpio: &dyn GpioRegisters, pins: &[u8], mode: Mode) {
    let mut words: [Option<(u32, u32)>; GPIO_REG_WORDS] = [None; GPIO_REG_WORDS];
    for &pin in pins {
        let offset = fsel_word(pin);
        let shift = fsel_shift(pin);
        let (mask, bits) = words[offset].get_or_insert((0, 0));
        *mask |= 0b111u32 << shift;
        *bits |= (mode as u32) << shift;
    }
    for (offset, entry) in words.into_iter().enumerate() {
        if let Some((mask, bits)) = entry {
            let word = gpio.read(offset);
            gpio.write(offset, (word & !mask) | bits);
        }
    }
}

/// Drive a single pin high or low.
pub fn write(gpio: &dyn GpioRegisters, pin: u8, level: Level) {
    let bit = 1u32 << (pin & 31);
    match level {
        Level::Low => gpio.write(offsets::CLR_BASE + (pin / 32) as usize, bit),
        Level::High => gpio.write(offsets::SET_BASE + (pin / 32) as usize, bit),
    }
}

/// Read the current level of a single pin.
pub fn read(gpio: &dyn GpioRegisters, pin: u8) -> Level {
    let word = gpio.read(offsets::LEV_BASE + (pin / 32) as usize);
    Level::from((word >> (pin & 31)) & 1 != 0)
}

/// Configure the built-in pull resistor for a pin. This sequence is
/// prescribed by the peripheral datasheet and must not be shortened.
pub fn set_pull(gpio: &dyn GpioRegisters, pin: u8, pull: Pull) {
    gpio.write(offsets::PUD, pull as u32);
    sleep(PUD_SETTLE);
    let clk_offset = offsets::PUDCLK_BASE + (pin / 32) as usize;
    gpio.write(clk_offset, 1u32 << (pin & 31));
    sleep(PUD_SETTLE);
    gpio.write(offsets::PUD, 0);
    gpio.write(clk_offset, 0);
}
