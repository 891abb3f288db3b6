//! In-band interrupt control
//!
//! The classic irqflags API the general-purpose kernel uses everywhere.
//! Once the pipeline is active these calls only stall or unstall the
//! in-band stage, so the hardware keeps taking IRQs for the out-of-band
//! stage. Before activation they drive the hardware mask directly.
//!
//! Saved states use the architecture's native flags word, built by the
//! flag bridge, so existing code that stores and tests flags keeps working.

use crate::arch::{hard_local_irq_disable, hard_local_irq_enable, hard_local_irq_restore};
use crate::arch::{hard_local_irq_save, ArchFlagBridge, Architecture};
use crate::pipeline::Cpu;
use crate::types::Stage;

impl<'p, A: Architecture> Cpu<'p, A> {
    /// Disable in-band interrupts, returning the previous state
    #[inline]
    pub fn local_irq_save(&self) -> A::Native {
        if self.pipeline.is_active() {
            A::virtual_to_native(self.save_and_stall(Stage::InBand))
        } else {
            hard_local_irq_save::<A>()
        }
    }

    /// Restore a state returned by [`Cpu::local_irq_save`]
    #[inline]
    pub fn local_irq_restore(&self, flags: A::Native) {
        if self.pipeline.is_active() {
            self.restore(Stage::InBand, A::native_to_virtual(flags));
        } else {
            hard_local_irq_restore::<A>(flags);
        }
    }

    /// Enable in-band interrupts, replaying any that were logged
    #[inline]
    pub fn local_irq_enable(&self) {
        if self.pipeline.is_active() {
            self.unstall(Stage::InBand);
        } else {
            hard_local_irq_enable::<A>();
        }
    }

    /// Disable in-band interrupts
    #[inline]
    pub fn local_irq_disable(&self) {
        if self.pipeline.is_active() {
            self.state.stall.stall(Stage::InBand);
        } else {
            hard_local_irq_disable::<A>();
        }
    }

    /// Current in-band interrupt state
    #[inline]
    pub fn local_save_flags(&self) -> A::Native {
        if self.pipeline.is_active() {
            A::virtual_to_native(self.is_stalled(Stage::InBand))
        } else {
            A::read_native()
        }
    }

    /// Whether in-band interrupts are disabled
    #[inline]
    pub fn irqs_disabled(&self) -> bool {
        A::native_to_virtual(self.local_save_flags())
    }

    /// Disable in-band interrupts until the guard drops
    pub fn irq_guard(&self) -> InbandIrqGuard<'p, A> {
        InbandIrqGuard {
            cpu: *self,
            flags: self.local_irq_save(),
        }
    }
}

/// Whether a saved flags word has interrupts disabled
#[inline]
pub fn irqs_disabled_flags<A: ArchFlagBridge>(flags: A::Native) -> bool {
    A::native_to_virtual(flags)
}

/// RAII in-band interrupt disable
#[must_use = "interrupts are re-enabled as soon as the guard drops"]
pub struct InbandIrqGuard<'p, A: Architecture> {
    cpu: Cpu<'p, A>,
    flags: A::Native,
}

impl<'p, A: Architecture> InbandIrqGuard<'p, A> {
    /// State saved when the guard was taken
    pub fn saved_flags(&self) -> A::Native {
        self.flags
    }
}

impl<'p, A: Architecture> Drop for InbandIrqGuard<'p, A> {
    fn drop(&mut self) {
        self.cpu.local_irq_restore(self.flags);
    }
}
