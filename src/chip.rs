//! The immutable per-controller descriptor.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mem::GpioRegisters;
use crate::pin::{self, Level, Mode};
use crate::timing::{Clock, TimingState};

#[cfg(target_os = "linux")]
use crate::mem;
#[cfg(target_os = "linux")]
use crate::timing::SystemClock;

/// Which classical parallel protocol the attached controller speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Motorola-style: a single latching enable pulse, direction selected
    /// by a separate read/write pin.
    Motorola6800,
    /// Intel-style: separate active-low read and write strobes.
    Intel8080,
}

/// The five timing parameters of §4.5, as durations.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Delay after mode/direction is asserted, before the first edge.
    pub tsetup: Duration,
    /// Half-period of the data strobe (and between nibbles in 4-bit mode).
    pub tclock: Duration,
    /// Delay between asserting a read strobe and sampling the data lines.
    pub tread: Duration,
    /// Delay between full bytes (controller processing time).
    pub tproc: Duration,
    /// Minimum hold time for output enable after a read strobe.
    pub thold: Duration,
}

/// The eleven GPIO pins wired to one attached controller.
///
/// `d3..d0` are `None` together to select 4-bit mode (only the upper
/// nibble, `d7..d4`, is wired); `rwrd` is `None` to select a write-only
/// descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Pins {
    pub d7: Option<u8>,
    pub d6: Option<u8>,
    pub d5: Option<u8>,
    pub d4: Option<u8>,
    pub d3: Option<u8>,
    pub d2: Option<u8>,
    pub d1: Option<u8>,
    pub d0: Option<u8>,
    pub rscd: u8,
    pub enwr: u8,
    pub rwrd: Option<u8>,
}

impl Pins {
    /// Build a descriptor from raw wire-convention values: any value
    /// outside `0..=27` denotes UNUSED, matching the library surface's C
    /// heritage (distilled spec §6). Prefer the struct literal with
    /// `Option<u8>` fields directly from idiomatic Rust callers.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        d7: u16,
        d6: u16,
        d5: u16,
        d4: u16,
        d3: u16,
        d2: u16,
        d1: u16,
        d0: u16,
        rscd: u16,
        enwr: u16,
        rwrd: u16,
    ) -> Pins {
        Pins {
            d7: normalize(d7),
            d6: normalize(d6),
            d5: normalize(d5),
            d4: normalize(d4),
            d3: normalize(d3),
            d2: normalize(d2),
            d1: normalize(d1),
            d0: normalize(d0),
            rscd: rscd as u8,
            enwr: enwr as u8,
            rwrd: normalize(rwrd),
        }
    }

    /// Data pins, MSB (`d7`) first. In 4-bit mode only the first four
    /// entries are `Some`.
    pub fn data(&self) -> [Option<u8>; 8] {
        [
            self.d7, self.d6, self.d5, self.d4, self.d3, self.d2, self.d1, self.d0,
        ]
    }

    /// Control pins: `rscd`, `enwr`, `rwrd`.
    pub fn control(&self) -> [Option<u8>; 3] {
        [Some(self.rscd), Some(self.enwr), self.rwrd]
    }

    pub fn is_4bit(&self) -> bool {
        self.d3.is_none()
    }

    /// Bits transferred per nibble/byte phase: 4 in 4-bit mode, 8 in
    /// 8-bit mode.
    pub(crate) fn bits_per_phase(&self) -> u8 {
        if self.is_4bit() {
            4
        } else {
            8
        }
    }

    /// The data pins actually driven this phase, MSB first (always the
    /// first `bits_per_phase()` entries of [`Pins::data`]).
    pub(crate) fn active_data_pins(&self) -> Vec<u8> {
        self.data()
            .into_iter()
            .take(self.bits_per_phase() as usize)
            .map(|p| p.expect("bus-width pins must be defined"))
            .collect()
    }
}

fn normalize(v: u16) -> Option<u8> {
    if v <= 27 {
        Some(v as u8)
    } else {
        None
    }
}

/// Command or data register select, for `write_command`/`write_data` and
/// their read counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferMode {
    Command,
    Data,
}

impl TransferMode {
    /// Whether `rscd` should be driven high for this (protocol, mode)
    /// combination. The two protocols invert the convention (§4.5).
    pub(crate) fn rscd_high(self, protocol: Protocol) -> bool {
        match (protocol, self) {
            (Protocol::Motorola6800, TransferMode::Data) => true,
            (Protocol::Motorola6800, TransferMode::Command) => false,
            (Protocol::Intel8080, TransferMode::Data) => false,
            (Protocol::Intel8080, TransferMode::Command) => true,
        }
    }
}

/// One attached parallel-bus controller.
pub struct ChipDescriptor {
    pub(crate) gpio: Arc<dyn GpioRegisters>,
    pub(crate) pins: Pins,
    pub(crate) protocol: Protocol,
    pub(crate) timing: Timing,
    pub(crate) state: TimingState,
}

impl ChipDescriptor {
    /// Construct a descriptor against the process-wide real GPIO register
    /// window and the system clock. Only available on Linux, where
    /// [`crate::mem::shared`] can map `/dev/gpiomem`; other targets must
    /// use [`ChipDescriptor::with_backend`] with their own
    /// [`GpioRegisters`] implementation.
    #[cfg(target_os = "linux")]
    pub fn new(pins: Pins, protocol: Protocol, timing: Timing) -> Result<ChipDescriptor> {
        let gpio = mem::shared()?;
        Self::with_backend(pins, protocol, timing, gpio, Arc::new(SystemClock))
    }

    /// Construct a descriptor against an injected register window and
    /// clock. Used by the real constructor and by tests / alternate-board
    /// callers that supply their own [`GpioRegisters`] implementation.
    pub fn with_backend(
        pins: Pins,
        protocol: Protocol,
        timing: Timing,
        gpio: Arc<dyn GpioRegisters>,
        clock: Arc<dyn Clock>,
    ) -> Result<ChipDescriptor> {
        for pin in [pins.rscd, pins.enwr] {
            if pin > 27 {
                return Err(Error::InvalidPin(pin));
            }
        }
        debug_assert!(
            pins.d7.is_some() && pins.d6.is_some() && pins.d5.is_some() && pins.d4.is_some(),
            "d7..d4 must be fully defined in any valid descriptor"
        );
        debug_assert!(
            pins.d3.is_some() == pins.d2.is_some()
                && pins.d2.is_some() == pins.d1.is_some()
                && pins.d1.is_some() == pins.d0.is_some(),
            "d3..d0 must be either all defined (8-bit mode) or all UNUSED (4-bit mode)"
        );

        // Step 3: program control-line idle states before switching
        // direction, so the output latch already holds the right level
        // when the pin becomes an output.
        match protocol {
            Protocol::Motorola6800 => {
                if let Some(rwrd) = pins.rwrd {
                    pin::write(&*gpio, rwrd, Level::Low);
                }
                pin::write(&*gpio, pins.enwr, Level::Low);
            }
            Protocol::Intel8080 => {
                if let Some(rwrd) = pins.rwrd {
                    pin::write(&*gpio, rwrd, Level::High);
                }
                pin::write(&*gpio, pins.enwr, Level::High);
            }
        }

        // Step 4: data lines input (high-impedance), control lines output.
        // Each group is committed as a single staged set of FSEL writes, so
        // no intermediate state with some data pins already switched is
        // ever observable on the bus.
        let data_pins: Vec<u8> = pins.data().into_iter().flatten().collect();
        pin::set_modes(&*gpio, &data_pins, Mode::Input);
        let control_pins: Vec<u8> = pins.control().into_iter().flatten().collect();
        pin::set_modes(&*gpio, &control_pins, Mode::Output);

        let state = TimingState::new(clock);
        Ok(ChipDescriptor {
            gpio,
            pins,
            protocol,
            timing,
            state,
        })
    }
}

// Dropping a ChipDescriptor leaves data pins in their safe input state and
// does not restore control pins; no explicit Drop impl is needed for that.
