use std::sync::Arc;
use std::time::Duration;

use parallel_bus::chip::{Pins, Protocol, Timing};
use parallel_bus::error::Error;
use parallel_bus::mem::testing::FakeGpio;
use parallel_bus::mem::{offsets, GpioRegisters};
use parallel_bus::pin::{self, Mode};
use parallel_bus::timing::SystemClock;
use parallel_bus::ChipDescriptor;

// Tiny timing budget: these tests run against FakeGpio and the real
// SystemClock, so keep every delay well under a millisecond.
fn fast_timing() -> Timing {
    Timing {
        tsetup: Duration::from_micros(2),
        tclock: Duration::from_micros(4),
        tread: Duration::from_micros(2),
        tproc: Duration::from_micros(2),
        thold: Duration::from_micros(2),
    }
}

// d7..d0 assigned to GPIO pins 7..0, so a data byte's bit position always
// equals the driven pin number; this makes FakeGpio's LEV word double
// directly as the byte value in both directions.
fn pins_8bit(rwrd: Option<u8>) -> Pins {
    Pins {
        d7: Some(7),
        d6: Some(6),
        d5: Some(5),
        d4: Some(4),
        d3: Some(3),
        d2: Some(2),
        d1: Some(1),
        d0: Some(0),
        rscd: 8,
        enwr: 9,
        rwrd,
    }
}

fn pins_4bit(rwrd: Option<u8>) -> Pins {
    Pins {
        d7: Some(7),
        d6: Some(6),
        d5: Some(5),
        d4: Some(4),
        d3: None,
        d2: None,
        d1: None,
        d0: None,
        rscd: 8,
        enwr: 9,
        rwrd,
    }
}

fn descriptor(pins: Pins, protocol: Protocol) -> (Arc<FakeGpio>, ChipDescriptor) {
    let gpio = Arc::new(FakeGpio::new());
    let backend: Arc<dyn GpioRegisters> = gpio.clone();
    let descriptor =
        ChipDescriptor::with_backend(pins, protocol, fast_timing(), backend, Arc::new(SystemClock))
            .expect("construction should succeed for valid pins");
    (gpio, descriptor)
}

#[test]
fn construction_leaves_data_pins_input_and_control_pins_output() {
    let (gpio, _descriptor) = descriptor(pins_8bit(Some(10)), Protocol::Intel8080);
    for data_pin in 0..=7 {
        assert_eq!(pin::mode(&*gpio, data_pin), Mode::Input);
    }
    assert_eq!(pin::mode(&*gpio, 8), Mode::Output);
    assert_eq!(pin::mode(&*gpio, 9), Mode::Output);
    assert_eq!(pin::mode(&*gpio, 10), Mode::Output);
}

#[test]
fn invalid_rscd_pin_is_rejected_before_any_gpio_access() {
    let gpio = Arc::new(FakeGpio::new());
    let backend: Arc<dyn GpioRegisters> = gpio.clone();
    let mut pins = pins_8bit(Some(10));
    pins.rscd = 28;
    let result = ChipDescriptor::with_backend(
        pins,
        Protocol::Intel8080,
        fast_timing(),
        backend,
        Arc::new(SystemClock),
    );
    assert!(matches!(result, Err(Error::InvalidPin(28))));
    assert!(gpio.log().is_empty());
}

#[test]
fn write_then_read_round_trips_an_8bit_value() {
    let (gpio, mut descriptor) = descriptor(pins_8bit(Some(10)), Protocol::Intel8080);
    descriptor.write_data(&[0x5A]).unwrap();

    // Simulate the attached controller driving the bus back for a read:
    // pin N carries bit N of the value, by construction of pins_8bit. The
    // preceding write left stale bits in the level register, so clear the
    // whole byte before setting the new one.
    gpio.clear_level_bits(0xFF);
    gpio.set_level_bits(0xA5);
    let mut buf = [0u8; 1];
    descriptor.read_data(&mut buf).unwrap();
    assert_eq!(buf[0], 0xA5);
}

#[test]
fn write_only_descriptor_rejects_read_without_touching_any_pin() {
    let (gpio, mut descriptor) = descriptor(pins_8bit(None), Protocol::Intel8080);
    let before = gpio.log().len();
    let result = descriptor.read_register();
    assert!(matches!(result, Err(Error::WriteOnly)));
    assert_eq!(gpio.log().len(), before);
}

#[test]
fn zero_length_transfers_are_no_ops() {
    let (gpio, mut descriptor) = descriptor(pins_8bit(Some(10)), Protocol::Intel8080);
    let before = gpio.log().len();
    descriptor.write_data(&[]).unwrap();
    let mut buf: [u8; 0] = [];
    descriptor.read_data(&mut buf).unwrap();
    assert_eq!(gpio.log().len(), before);
}

#[test]
fn four_bit_write_sends_high_nibble_before_low_nibble() {
    let (gpio, mut descriptor) = descriptor(pins_4bit(Some(10)), Protocol::Intel8080);
    descriptor.write_command(0xAB).unwrap();

    let log = gpio.log();
    let strobe_edges: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, &(o, v))| o == offsets::CLR_BASE && v == 1 << 9)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(strobe_edges.len(), 2, "expected one strobe edge per nibble");

    let nibble_at = |idx: usize| -> u8 {
        let mut lev = 0u32;
        for &(o, v) in &log[..idx] {
            if o == offsets::SET_BASE {
                lev |= v;
            } else if o == offsets::CLR_BASE {
                lev &= !v;
            }
        }
        ((lev >> 4) & 0xF) as u8
    };

    assert_eq!(nibble_at(strobe_edges[0]), 0xA);
    assert_eq!(nibble_at(strobe_edges[1]), 0xB);
}

#[test]
fn intel8080_read_pulses_rwrd_not_enwr() {
    let (gpio, mut descriptor) = descriptor(pins_8bit(Some(10)), Protocol::Intel8080);
    gpio.set_level_bits(0xA5);
    let _ = descriptor.read_register().unwrap();

    let enwr_touched = gpio
        .log()
        .iter()
        .any(|&(o, v)| (o == offsets::SET_BASE || o == offsets::CLR_BASE) && v & (1 << 9) != 0);
    assert!(!enwr_touched, "8080 read must never pulse the write strobe enwr");

    let rwrd_pulsed = gpio
        .log()
        .iter()
        .any(|&(o, v)| o == offsets::CLR_BASE && v & (1 << 10) != 0);
    assert!(rwrd_pulsed, "8080 read should assert rwrd low as its read strobe");
}

#[test]
fn motorola_read_restores_rwrd_to_write_mode_when_done() {
    let (gpio, mut descriptor) = descriptor(pins_8bit(Some(10)), Protocol::Motorola6800);
    gpio.set_level_bits(0xA5);
    let _ = descriptor.read_register().unwrap();
    assert_eq!(
        pin::read(&*gpio, 10),
        pin::Level::Low,
        "rwrd must return to write mode immediately after the last byte"
    );
}

#[test]
fn four_bit_read_reassembles_high_nibble_first() {
    let (gpio, mut descriptor) = descriptor(pins_4bit(Some(10)), Protocol::Intel8080);
    gpio.set_level_bits(0xA0); // only d7..d4 (pins 7..4) are wired/sampled
    let mut buf = [0u8; 1];
    descriptor.read_data(&mut buf).unwrap();
    assert_eq!(buf[0], 0xAA, "both nibble phases sample the same wired upper nibble");

    let rwrd_edges = gpio
        .log()
        .iter()
        .filter(|&&(o, v)| o == offsets::CLR_BASE && v & (1 << 10) != 0)
        .count();
    assert_eq!(rwrd_edges, 2, "expected one read-strobe assert per nibble phase");
}

#[test]
fn motorola_and_intel_protocols_select_command_register_oppositely() {
    let (gpio_m, mut motorola) = descriptor(pins_8bit(Some(10)), Protocol::Motorola6800);
    motorola.write_command(0x00).unwrap();
    let rscd_low_seen = gpio_m
        .log()
        .iter()
        .any(|&(o, v)| o == offsets::CLR_BASE && v & (1 << 8) != 0);
    assert!(rscd_low_seen, "6800 command select should drive rscd low");

    let (gpio_i, mut intel) = descriptor(pins_8bit(Some(10)), Protocol::Intel8080);
    intel.write_command(0x00).unwrap();
    let rscd_high_seen = gpio_i
        .log()
        .iter()
        .any(|&(o, v)| o == offsets::SET_BASE && v & (1 << 8) != 0);
    assert!(rscd_high_seen, "8080 command select should drive rscd high");
}
