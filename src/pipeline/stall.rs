//! Virtual interrupt mask
//!
//! Each stage of a CPU has a stall bit standing in for the hardware
//! interrupt mask. Stalling never touches the hardware; IRQs arriving for a
//! stalled stage are logged and replayed when the stage is unstalled.

use crate::arch::{hard_local_irq_disable, hard_local_irq_enable, hard_local_irq_restore};
use crate::arch::{hard_local_irq_save, Architecture};
use crate::pipeline::Cpu;
use crate::types::Stage;

impl<'p, A: Architecture> Cpu<'p, A> {
    /// Stall `stage`, returning whether it was stalled before
    #[inline]
    pub fn save_and_stall(&self, stage: Stage) -> bool {
        self.state.stall.test_and_stall(stage)
    }

    /// Unstall `stage`, replaying anything logged for it first
    ///
    /// Pending out-of-band IRQs are always handled before this returns.
    /// Pending in-band IRQs are replayed only when running in-band.
    pub fn unstall(&self, stage: Stage) {
        let flags = hard_local_irq_save::<A>();
        self.state.stall.clear(stage);
        if stage == Stage::OutOfBand && !self.state.oob_pending.is_empty() {
            self.sync_stage(Stage::OutOfBand);
        }
        self.sync_inband_if_due();
        hard_local_irq_restore::<A>(flags);
    }

    /// Return `stage` to a state saved by [`Cpu::save_and_stall`]
    #[inline]
    pub fn restore(&self, stage: Stage, stalled: bool) {
        if stalled {
            self.state.stall.stall(stage);
        } else {
            self.unstall(stage);
        }
    }

    /// Whether `stage` is stalled
    #[inline]
    pub fn is_stalled(&self, stage: Stage) -> bool {
        self.state.stall.is_stalled(stage)
    }

    /// Replay the in-band log if the CPU is in-band and unstalled
    pub(crate) fn sync_inband_if_due(&self) {
        if self.running_inband()
            && !self.state.stall.is_stalled(Stage::InBand)
            && !self.state.inband_pending.is_empty()
        {
            self.sync_stage(Stage::InBand);
        }
    }

    /// Drain the log of `stage`. Hard interrupts must be masked.
    pub(crate) fn sync_stage(&self, stage: Stage) {
        match stage {
            Stage::OutOfBand => {
                let entered = self.enter_oob();
                self.replay_oob();
                if entered && self.running_oob() {
                    self.leave_oob();
                }
            }
            Stage::InBand => self.replay_inband(),
        }
    }

    /// Replay deferred out-of-band IRQs; must run on the out-of-band stage
    pub(crate) fn replay_oob(&self) {
        while !self.state.stall.is_stalled(Stage::OutOfBand) {
            let Some(irq) = self.state.oob_pending.pull() else {
                break;
            };
            self.state.counters.oob_replayed.inc();
            self.dispatch_oob(irq);
        }
    }

    fn replay_inband(&self) {
        let inband = self.pipeline.platform.inband;
        while self.running_inband() && !self.state.stall.is_stalled(Stage::InBand) {
            let Some(irq) = self.state.inband_pending.pull() else {
                break;
            };
            self.state.counters.inband_replayed.inc();
            self.state.stall.stall(Stage::InBand);
            // Out-of-band IRQs may preempt the in-band handler
            hard_local_irq_enable::<A>();
            inband.handle_inband_irq(*self, irq);
            hard_local_irq_disable::<A>();
            self.state.stall.clear(Stage::InBand);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::arch::{hard_irqs_disabled, NativeArch};
    use crate::config::PipelineConfig;
    use crate::pipeline::testing::{pipeline, Event};
    use crate::types::{CpuId, IrqNumber, Stage};

    #[test]
    fn test_save_and_restore() {
        let (pipeline, _) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();

        for stage in Stage::ALL {
            assert!(!cpu.save_and_stall(stage));
            assert!(cpu.is_stalled(stage));
            assert!(cpu.save_and_stall(stage));
            cpu.restore(stage, true);
            assert!(cpu.is_stalled(stage));
            cpu.restore(stage, false);
            assert!(!cpu.is_stalled(stage));
        }
    }

    #[test]
    fn test_stall_leaves_hardware_alone() {
        let (pipeline, _) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        crate::arch::hard_local_irq_enable::<NativeArch>();

        cpu.save_and_stall(Stage::InBand);
        cpu.save_and_stall(Stage::OutOfBand);
        assert!(!hard_irqs_disabled::<NativeArch>());
        cpu.unstall(Stage::OutOfBand);
        cpu.unstall(Stage::InBand);
        assert!(!hard_irqs_disabled::<NativeArch>());
    }

    #[test]
    fn test_unstall_oob_replays_before_return() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        pipeline.set_oob_irq(IrqNumber(20)).unwrap();

        cpu.save_and_stall(Stage::OutOfBand);
        cpu.handle_irq(IrqNumber(20), &Default::default());
        assert!(rec.take().is_empty());
        assert!(cpu.has_pending(Stage::OutOfBand));

        cpu.unstall(Stage::OutOfBand);
        assert_eq!(
            rec.take(),
            [Event::Oob(IrqNumber(20), Stage::OutOfBand, true)]
        );
        assert!(!cpu.has_pending(Stage::OutOfBand));
        assert!(cpu.running_inband());
    }

    #[test]
    fn test_unstall_inband_replays_in_order() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();

        let prior = cpu.save_and_stall(Stage::InBand);
        cpu.handle_irq(IrqNumber(33), &Default::default());
        cpu.handle_irq(IrqNumber(32), &Default::default());
        assert!(rec.take().is_empty());

        cpu.restore(Stage::InBand, prior);
        assert_eq!(
            rec.take(),
            [
                Event::Inband(IrqNumber(32), true),
                Event::Inband(IrqNumber(33), true)
            ]
        );
        assert!(!cpu.is_stalled(Stage::InBand));
        assert_eq!(cpu.counters().inband_replayed.get(), 2);
    }

    #[test]
    fn test_no_inband_replay_while_oob() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();

        cpu.save_and_stall(Stage::InBand);
        cpu.handle_irq(IrqNumber(40), &Default::default());
        cpu.switch_oob();
        cpu.unstall(Stage::InBand);
        assert!(rec.take().is_empty());

        cpu.switch_inband();
        assert_eq!(rec.take(), [Event::Inband(IrqNumber(40), true)]);
    }
}
