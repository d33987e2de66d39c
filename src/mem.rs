//! Process-private mapping of the GPIO peripheral's register block.

/// The peripheral exposes at least this many 32-bit words (0xB4 bytes).
pub const GPIO_REG_WORDS: usize = 0xB4 / std::mem::size_of::<u32>();

/// Well-known word offsets into the register window. Only pins 0..27 are
/// used by the transfer engine, so only the first word of each group
/// (FSEL0..FSEL2, SET0, CLR0, LEV0) is ever touched.
pub mod offsets {
    pub const FSEL_BASE: usize = 0;
    pub const SET_BASE: usize = 7;
    pub const CLR_BASE: usize = 10;
    pub const LEV_BASE: usize = 13;
    pub const PUD: usize = 37;
    pub const PUDCLK_BASE: usize = 38;
}

/// A volatile word-addressed register window. Implemented by the real
/// mmap-backed [`GpioMem`] (Linux only) and, behind the `fake-gpio`
/// feature, by [`testing::FakeGpio`].
pub trait GpioRegisters: Send + Sync {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

#[cfg(target_os = "linux")]
mod linux_backend {
    use std::fs::OpenOptions;
    use std::io;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::ptr;
    use std::sync::{Arc, Mutex};

    use super::{GpioRegisters, GPIO_REG_WORDS};
    use crate::error::{Error, Result};

    const GPIO_REG_BYTES: usize = GPIO_REG_WORDS * std::mem::size_of::<u32>();

    /// Fallback base used when `/dev/gpiomem` is unavailable and we map
    /// `/dev/mem` directly instead. This matches the BCM283x family's
    /// default peripheral base; boards with a different SoC would need a
    /// different offset, which is out of scope for this crate (see
    /// DESIGN.md).
    const DEVMEM_PERIPHERAL_BASE: libc::off_t = 0x3F00_0000;
    const DEVMEM_GPIO_OFFSET: libc::off_t = 0x20_0000;

    /// The real, memory-mapped GPIO register block.
    pub struct GpioMem {
        base: *mut u32,
    }

    impl GpioMem {
        fn map_gpiomem() -> io::Result<*mut u32> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC)
                .open("/dev/gpiomem")?;

            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    GPIO_REG_BYTES,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                Err(io::Error::last_os_error())
            } else {
                Ok(ptr as *mut u32)
            }
        }

        fn map_devmem() -> io::Result<*mut u32> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC)
                .open("/dev/mem")?;

            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    GPIO_REG_BYTES,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    DEVMEM_PERIPHERAL_BASE + DEVMEM_GPIO_OFFSET,
                )
            };

            if ptr == libc::MAP_FAILED {
                Err(io::Error::last_os_error())
            } else {
                Ok(ptr as *mut u32)
            }
        }

        /// Map the GPIO register block, trying `/dev/gpiomem` before
        /// falling back to `/dev/mem`.
        fn map() -> Result<GpioMem> {
            let base = match Self::map_gpiomem() {
                Ok(ptr) => ptr,
                Err(gpiomem_err) => Self::map_devmem().map_err(|_| Error::Init(gpiomem_err))?,
            };
            log::debug!("mapped {} GPIO registers at {:p}", GPIO_REG_WORDS, base);
            Ok(GpioMem { base })
        }
    }

    impl GpioRegisters for GpioMem {
        #[inline]
        fn read(&self, offset: usize) -> u32 {
            debug_assert!(offset < GPIO_REG_WORDS);
            unsafe { ptr::read_volatile(self.base.add(offset)) }
        }

        #[inline]
        fn write(&self, offset: usize, value: u32) {
            debug_assert!(offset < GPIO_REG_WORDS);
            unsafe { ptr::write_volatile(self.base.add(offset), value) }
        }
    }

    impl Drop for GpioMem {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, GPIO_REG_BYTES);
            }
        }
    }

    // Required because of the raw pointer into the mapped register block.
    unsafe impl Send for GpioMem {}
    unsafe impl Sync for GpioMem {}

    static SHARED: Mutex<Option<Arc<GpioMem>>> = Mutex::new(None);

    /// Return the process-wide GPIO register window, mapping it on first
    /// call.
    ///
    /// Idempotent: concurrent callers converge on the same mapping, which
    /// then persists for the life of the process.
    pub fn shared() -> Result<Arc<GpioMem>> {
        let mut guard = SHARED.lock().unwrap();
        if let Some(mem) = guard.as_ref() {
            return Ok(Arc::clone(mem));
        }
        let mem = Arc::new(GpioMem::map()?);
        *guard = Some(Arc::clone(&mem));
        Ok(mem)
    }
}

#[cfg(target_os = "linux")]
pub use linux_backend::{shared, GpioMem};

/// An in-memory [`GpioRegisters`] harness, for driving the engine against a
/// loopback or stub-controller model without real hardware. Built for unit
/// and integration tests; also available outside tests under the
/// `fake-gpio` feature, for callers who want to exercise the engine without
/// a `/dev/gpiomem`-capable target.
#[cfg(any(test, feature = "fake-gpio"))]
pub mod testing {
    use super::{offsets, GpioRegisters, GPIO_REG_WORDS};
    use std::sync::Mutex;

    /// Records every register write and reflects SET/CLR writes into the
    /// pin-level (LEV) word, the way the real peripheral's output latch
    /// does, so a test can both assert on the write sequence and read back
    /// pin state through [`GpioRegisters::read`].
    pub struct FakeGpio {
        inner: Mutex<Inner>,
    }

    struct Inner {
        words: [u32; GPIO_REG_WORDS],
        log: Vec<(usize, u32)>,
    }

    impl FakeGpio {
        pub fn new() -> Self {
            FakeGpio {
                inner: Mutex::new(Inner {
                    words: [0u32; GPIO_REG_WORDS],
                    log: Vec::new(),
                }),
            }
        }

        /// All (offset, value) pairs written so far, in order.
        pub fn log(&self) -> Vec<(usize, u32)> {
            self.inner.lock().unwrap().log.clone()
        }

        /// Directly set bits in the pin-level register, simulating a
        /// controller driving the data bus during a read transfer.
        pub fn set_level_bits(&self, mask: u32) {
            let mut inner = self.inner.lock().unwrap();
            inner.words[offsets::LEV_BASE] |= mask;
        }

        /// Directly clear bits in the pin-level register.
        pub fn clear_level_bits(&self, mask: u32) {
            let mut inner = self.inner.lock().unwrap();
            inner.words[offsets::LEV_BASE] &= !mask;
        }
    }

    impl Default for FakeGpio {
        fn default() -> Self {
            Self::new()
        }
    }

    impl GpioRegisters for FakeGpio {
        fn read(&self, offset: usize) -> u32 {
            self.inner.lock().unwrap().words[offset]
        }

        fn write(&self, offset: usize, value: u32) {
            let mut inner = self.inner.lock().unwrap();
            inner.log.push((offset, value));
            match offset {
                o if o == offsets::SET_BASE => inner.words[offsets::LEV_BASE] |= value,
                o if o == offsets::CLR_BASE => inner.words[offsets::LEV_BASE] &= !value,
                _ => inner.words[offset] = value,
            }
        }
    }
}
