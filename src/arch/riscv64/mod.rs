//! RISC-V 64 flag bridge
//!
//! The kernel runs in S-mode; the hardware mask is sstatus.SIE (bit 1).
//! Trap numbers are `scause` exception codes.

use bitflags::bitflags;

use crate::arch::{ArchFlagBridge, Architecture, TrapKind};
use crate::types::{IrqNumber, TrapNumber};

bitflags! {
    /// sstatus bits relevant to interrupt state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Sstatus: u64 {
        /// Supervisor interrupt enable
        const SIE = 1 << 1;
        /// Previous SIE
        const SPIE = 1 << 5;
        /// Previous privilege
        const SPP = 1 << 8;
    }
}

/// scause exception codes
pub mod scause {
    use crate::types::TrapNumber;

    pub const INST_MISALIGNED: TrapNumber = TrapNumber(0);
    pub const INST_ACCESS_FAULT: TrapNumber = TrapNumber(1);
    pub const ILLEGAL_INST: TrapNumber = TrapNumber(2);
    pub const BREAKPOINT: TrapNumber = TrapNumber(3);
    pub const LOAD_MISALIGNED: TrapNumber = TrapNumber(4);
    pub const LOAD_ACCESS_FAULT: TrapNumber = TrapNumber(5);
    pub const STORE_MISALIGNED: TrapNumber = TrapNumber(6);
    pub const STORE_ACCESS_FAULT: TrapNumber = TrapNumber(7);
    pub const ECALL_U: TrapNumber = TrapNumber(8);
    pub const ECALL_S: TrapNumber = TrapNumber(9);
    pub const INST_PAGE_FAULT: TrapNumber = TrapNumber(12);
    pub const LOAD_PAGE_FAULT: TrapNumber = TrapNumber(13);
    pub const STORE_PAGE_FAULT: TrapNumber = TrapNumber(15);
}

/// RISC-V 64 implementation of the flag bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct Riscv64;

impl ArchFlagBridge for Riscv64 {
    type Native = Sstatus;

    #[inline]
    fn native_to_virtual(native: Sstatus) -> bool {
        !native.contains(Sstatus::SIE)
    }

    #[inline]
    fn virtual_to_native(stalled: bool) -> Sstatus {
        if stalled {
            Sstatus::empty()
        } else {
            Sstatus::SIE
        }
    }

    #[inline]
    fn read_native() -> Sstatus {
        Sstatus::from_bits_retain(regs::read())
    }

    #[inline]
    fn write_native(native: Sstatus) {
        regs::write(native.bits())
    }
}

impl Architecture for Riscv64 {
    const NAME: &'static str = "riscv64";

    // Software IPIs are multiplexed; these are virtual lines past the
    // platform interrupt controller's range
    const OOB_IPI_BASE: IrqNumber = IrqNumber(0x3f0);

    fn trap_kind(trap: TrapNumber) -> TrapKind {
        use scause::*;
        match trap {
            INST_PAGE_FAULT | LOAD_PAGE_FAULT | STORE_PAGE_FAULT => TrapKind::PageFault,
            INST_ACCESS_FAULT | LOAD_ACCESS_FAULT | STORE_ACCESS_FAULT => {
                TrapKind::ProtectionFault
            }
            BREAKPOINT => TrapKind::Breakpoint,
            ILLEGAL_INST => TrapKind::IllegalInstruction,
            INST_MISALIGNED | LOAD_MISALIGNED | STORE_MISALIGNED => TrapKind::Alignment,
            ECALL_U | ECALL_S => TrapKind::Syscall,
            _ => TrapKind::Other,
        }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod regs {
    use super::Sstatus;
    use core::arch::asm;

    #[inline(always)]
    pub fn read() -> u64 {
        let status: u64;
        unsafe {
            asm!("csrr {}, sstatus", out(reg) status, options(nomem, nostack, preserves_flags));
        }
        status
    }

    #[inline(always)]
    pub fn write(bits: u64) {
        unsafe {
            if bits & Sstatus::SIE.bits() != 0 {
                asm!("csrsi sstatus, 2", options(nostack, preserves_flags));
            } else {
                asm!("csrci sstatus, 2", options(nostack, preserves_flags));
            }
        }
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
mod regs {
    use super::Sstatus;
    use crate::arch::hosted;

    pub fn read() -> u64 {
        hosted::read()
    }

    pub fn write(bits: u64) {
        hosted::update(bits, Sstatus::SIE.bits());
    }
}
