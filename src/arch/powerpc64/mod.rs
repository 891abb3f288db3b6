//! PowerPC64 (Book3S) flag bridge
//!
//! The hardware mask is MSR[EE] (bit 15, counting from the LSB). Writes use
//! `mtmsrd rS, 1`, which only updates EE and RI. Trap numbers are the
//! interrupt vector offsets.

use bitflags::bitflags;

use crate::arch::{ArchFlagBridge, Architecture, TrapKind};
use crate::types::{IrqNumber, TrapNumber};

bitflags! {
    /// MSR bits relevant to interrupt state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Msr: u64 {
        /// Recoverable interrupt
        const RI = 1 << 1;
        /// Floating point available
        const FP = 1 << 13;
        /// Problem state (user mode)
        const PR = 1 << 14;
        /// External interrupt enable
        const EE = 1 << 15;
    }
}

/// Interrupt vector offsets
pub mod vectors {
    use crate::types::TrapNumber;

    pub const MACHINE_CHECK: TrapNumber = TrapNumber(0x200);
    pub const DATA_STORAGE: TrapNumber = TrapNumber(0x300);
    pub const DATA_SEGMENT: TrapNumber = TrapNumber(0x380);
    pub const INST_STORAGE: TrapNumber = TrapNumber(0x400);
    pub const INST_SEGMENT: TrapNumber = TrapNumber(0x480);
    pub const ALIGNMENT: TrapNumber = TrapNumber(0x600);
    pub const PROGRAM: TrapNumber = TrapNumber(0x700);
    pub const FP_UNAVAILABLE: TrapNumber = TrapNumber(0x800);
    pub const SYSCALL: TrapNumber = TrapNumber(0xc00);
    pub const TRACE: TrapNumber = TrapNumber(0xd00);
    pub const ALTIVEC_UNAVAILABLE: TrapNumber = TrapNumber(0xf20);
    pub const VSX_UNAVAILABLE: TrapNumber = TrapNumber(0xf40);
    pub const INST_BREAKPOINT: TrapNumber = TrapNumber(0x1300);
}

/// PowerPC64 implementation of the flag bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerPc64;

impl ArchFlagBridge for PowerPc64 {
    type Native = Msr;

    #[inline]
    fn native_to_virtual(native: Msr) -> bool {
        !native.contains(Msr::EE)
    }

    #[inline]
    fn virtual_to_native(stalled: bool) -> Msr {
        if stalled {
            Msr::empty()
        } else {
            Msr::EE
        }
    }

    #[inline]
    fn read_native() -> Msr {
        Msr::from_bits_retain(regs::read())
    }

    #[inline]
    fn write_native(native: Msr) {
        regs::write(native.bits())
    }
}

impl Architecture for PowerPc64 {
    const NAME: &'static str = "powerpc64";

    const OOB_IPI_BASE: IrqNumber = IrqNumber(0x3f0);

    fn trap_kind(trap: TrapNumber) -> TrapKind {
        use vectors::*;
        match trap {
            DATA_STORAGE | DATA_SEGMENT | INST_STORAGE | INST_SEGMENT => TrapKind::PageFault,
            ALIGNMENT => TrapKind::Alignment,
            // Program checks cover illegal instructions and trap instructions;
            // the handler refines this from SRR1
            PROGRAM => TrapKind::IllegalInstruction,
            FP_UNAVAILABLE | ALTIVEC_UNAVAILABLE | VSX_UNAVAILABLE => TrapKind::FpuAccess,
            SYSCALL => TrapKind::Syscall,
            TRACE => TrapKind::SingleStep,
            INST_BREAKPOINT => TrapKind::Breakpoint,
            MACHINE_CHECK => TrapKind::MachineCheck,
            _ => TrapKind::Other,
        }
    }
}

#[cfg(all(target_arch = "powerpc64", target_os = "none"))]
mod regs {
    use super::Msr;
    use core::arch::asm;

    #[inline(always)]
    pub fn read() -> u64 {
        let msr: u64;
        unsafe {
            asm!("mfmsr {}", out(reg) msr, options(nomem, nostack, preserves_flags));
        }
        msr
    }

    #[inline(always)]
    pub fn write(bits: u64) {
        let value = (bits & Msr::EE.bits()) | Msr::RI.bits();
        unsafe {
            asm!("mtmsrd {}, 1", in(reg) value, options(nostack, preserves_flags));
        }
    }
}

#[cfg(not(all(target_arch = "powerpc64", target_os = "none")))]
mod regs {
    use super::Msr;
    use crate::arch::hosted;

    pub fn read() -> u64 {
        hosted::read()
    }

    pub fn write(bits: u64) {
        hosted::update(bits, Msr::EE.bits());
    }
}
