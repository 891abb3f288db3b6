//! x86_64 flag bridge
//!
//! The hardware mask is RFLAGS.IF (bit 9): set means interrupts are
//! accepted, so a stalled stage maps to IF clear.

use bitflags::bitflags;

use crate::arch::{ArchFlagBridge, Architecture, TrapKind};
use crate::types::{IrqNumber, TrapNumber};

bitflags! {
    /// RFLAGS bits relevant to interrupt state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RFlags: u64 {
        /// Trap flag (single step)
        const TF = 1 << 8;
        /// Interrupt enable
        const IF = 1 << 9;
        /// Direction flag
        const DF = 1 << 10;
        /// Alignment check
        const AC = 1 << 18;
    }
}

/// Exception vectors (Intel SDM Vol. 3A, 6.3.1)
pub mod vectors {
    use crate::types::TrapNumber;

    pub const DIVIDE_ERROR: TrapNumber = TrapNumber(0);
    pub const DEBUG: TrapNumber = TrapNumber(1);
    pub const NMI: TrapNumber = TrapNumber(2);
    pub const BREAKPOINT: TrapNumber = TrapNumber(3);
    pub const OVERFLOW: TrapNumber = TrapNumber(4);
    pub const BOUND_RANGE: TrapNumber = TrapNumber(5);
    pub const INVALID_OPCODE: TrapNumber = TrapNumber(6);
    pub const DEVICE_NOT_AVAILABLE: TrapNumber = TrapNumber(7);
    pub const DOUBLE_FAULT: TrapNumber = TrapNumber(8);
    pub const INVALID_TSS: TrapNumber = TrapNumber(10);
    pub const SEGMENT_NOT_PRESENT: TrapNumber = TrapNumber(11);
    pub const STACK_SEGMENT: TrapNumber = TrapNumber(12);
    pub const GENERAL_PROTECTION: TrapNumber = TrapNumber(13);
    pub const PAGE_FAULT: TrapNumber = TrapNumber(14);
    pub const X87_FPU: TrapNumber = TrapNumber(16);
    pub const ALIGNMENT_CHECK: TrapNumber = TrapNumber(17);
    pub const MACHINE_CHECK: TrapNumber = TrapNumber(18);
    pub const SIMD_FPU: TrapNumber = TrapNumber(19);
    /// Legacy `int 0x80` syscall gate
    pub const SYSCALL: TrapNumber = TrapNumber(0x80);
}

/// x86_64 implementation of the flag bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64;

impl ArchFlagBridge for X86_64 {
    type Native = RFlags;

    #[inline]
    fn native_to_virtual(native: RFlags) -> bool {
        !native.contains(RFlags::IF)
    }

    #[inline]
    fn virtual_to_native(stalled: bool) -> RFlags {
        if stalled {
            RFlags::empty()
        } else {
            RFlags::IF
        }
    }

    #[inline]
    fn read_native() -> RFlags {
        RFlags::from_bits_retain(regs::read())
    }

    #[inline]
    fn write_native(native: RFlags) {
        regs::write(native.bits())
    }
}

impl Architecture for X86_64 {
    const NAME: &'static str = "x86_64";

    // Below the in-band kernel's system vectors (0xec and up)
    const OOB_IPI_BASE: IrqNumber = IrqNumber(0xe9);

    fn trap_kind(trap: TrapNumber) -> TrapKind {
        use vectors::*;
        match trap {
            PAGE_FAULT => TrapKind::PageFault,
            BREAKPOINT => TrapKind::Breakpoint,
            DEBUG => TrapKind::SingleStep,
            INVALID_OPCODE => TrapKind::IllegalInstruction,
            DEVICE_NOT_AVAILABLE => TrapKind::FpuAccess,
            X87_FPU | SIMD_FPU => TrapKind::FpuError,
            ALIGNMENT_CHECK => TrapKind::Alignment,
            DIVIDE_ERROR | OVERFLOW | BOUND_RANGE => TrapKind::ArithmeticError,
            GENERAL_PROTECTION | SEGMENT_NOT_PRESENT | STACK_SEGMENT | INVALID_TSS => {
                TrapKind::ProtectionFault
            }
            SYSCALL => TrapKind::Syscall,
            MACHINE_CHECK => TrapKind::MachineCheck,
            _ => TrapKind::Other,
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod regs {
    use super::RFlags;
    use core::arch::asm;

    #[inline(always)]
    pub fn read() -> u64 {
        let flags: u64;
        unsafe {
            asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags
    }

    #[inline(always)]
    pub fn write(bits: u64) {
        unsafe {
            if bits & RFlags::IF.bits() != 0 {
                asm!("sti", options(nostack));
            } else {
                asm!("cli", options(nostack));
            }
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod regs {
    use super::RFlags;
    use crate::arch::hosted;

    pub fn read() -> u64 {
        hosted::read()
    }

    pub fn write(bits: u64) {
        hosted::update(bits, RFlags::IF.bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_bit_encoding() {
        assert_eq!(X86_64::virtual_to_native(false), RFlags::IF);
        assert_eq!(X86_64::virtual_to_native(true), RFlags::empty());
        assert!(X86_64::native_to_virtual(RFlags::from_bits_retain(0x2)));
        assert!(!X86_64::native_to_virtual(RFlags::from_bits_retain(0x246)));
    }

    #[test]
    fn test_write_preserves_other_bits() {
        crate::arch::hosted::update(RFlags::DF.bits(), RFlags::DF.bits());
        X86_64::write_native(X86_64::virtual_to_native(true));
        let flags = X86_64::read_native();
        assert!(flags.contains(RFlags::DF));
        assert!(X86_64::native_to_virtual(flags));
    }

    #[test]
    fn test_trap_kinds() {
        assert_eq!(X86_64::trap_kind(vectors::PAGE_FAULT), TrapKind::PageFault);
        assert_eq!(X86_64::trap_kind(vectors::BREAKPOINT), TrapKind::Breakpoint);
        assert_eq!(X86_64::trap_kind(vectors::SIMD_FPU), TrapKind::FpuError);
        assert_eq!(X86_64::trap_kind(TrapNumber(0x31)), TrapKind::Other);
    }
}
