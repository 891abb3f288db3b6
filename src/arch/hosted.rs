//! Emulated interrupt-mask register for hosted builds
//!
//! Outside a bare-metal target there is no privileged mask register to
//! read, so the bridges keep their native word here instead. With the
//! `std` feature each thread gets its own register, which lets tests
//! model independent CPUs on independent threads.

use core::sync::atomic::{compiler_fence, Ordering};

#[cfg(any(test, feature = "std"))]
mod register {
    use std::cell::Cell;

    std::thread_local! {
        static MASK: Cell<u64> = const { Cell::new(0) };
    }

    pub fn read() -> u64 {
        MASK.with(|m| m.get())
    }

    pub fn write(value: u64) {
        MASK.with(|m| m.set(value));
    }
}

#[cfg(not(any(test, feature = "std")))]
mod register {
    use core::sync::atomic::{AtomicU64, Ordering};

    static MASK: AtomicU64 = AtomicU64::new(0);

    pub fn read() -> u64 {
        MASK.load(Ordering::Relaxed)
    }

    pub fn write(value: u64) {
        MASK.store(value, Ordering::Relaxed);
    }
}

/// Read the emulated register
#[inline]
pub fn read() -> u64 {
    register::read()
}

/// Replace the bits selected by `mask` with those of `bits`
///
/// A compiler barrier, like the real mask instructions.
#[inline]
pub fn update(bits: u64, mask: u64) {
    compiler_fence(Ordering::SeqCst);
    let current = register::read();
    register::write((current & !mask) | (bits & mask));
    compiler_fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_touches_only_mask() {
        update(0xff00, 0xffff);
        assert_eq!(read() & 0xffff, 0xff00);
        update(0x0001, 0x0001);
        assert_eq!(read() & 0xffff, 0xff01);
        update(0x0000, 0x0100);
        assert_eq!(read() & 0xffff, 0xfe01);
    }

    #[test]
    fn test_threads_are_independent() {
        update(0x200, 0x200);
        let other = std::thread::spawn(|| read()).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(read() & 0x200, 0x200);
    }
}
