//! Stage control
//!
//! Tracks which stage is current on a CPU and moves between them. IRQs
//! enter here: events owned by the out-of-band stage run immediately
//! unless that stage is stalled, everything else is logged for the
//! in-band kernel. Every in-band to out-of-band switch is matched by
//! exactly one switch back.

use log::{error, trace, warn};

use crate::arch::{hard_local_irq_restore, hard_local_irq_save, Architecture};
use crate::config::InvariantPolicy;
use crate::error::{InvariantViolation, PipelineError, Result};
use crate::pipeline::Cpu;
use crate::types::{IrqNumber, SavedContext, Stage};

impl<'p, A: Architecture> Cpu<'p, A> {
    // ========================================================================
    // Stage Queries
    // ========================================================================

    /// Stage currently running on this CPU
    #[inline]
    pub fn current_stage(&self) -> Stage {
        self.state.stage()
    }

    /// Whether the in-band stage is current
    #[inline]
    pub fn running_inband(&self) -> bool {
        self.current_stage() == Stage::InBand
    }

    /// Whether the out-of-band stage is current
    #[inline]
    pub fn running_oob(&self) -> bool {
        self.current_stage() == Stage::OutOfBand
    }

    // ========================================================================
    // IRQ Entry
    // ========================================================================

    /// Entry point for a hardware IRQ taken on this CPU
    pub fn handle_irq(&self, irq: IrqNumber, context: &SavedContext) {
        if !irq.in_range() {
            warn!("{}: spurious {}", self.id(), irq);
            self.state.counters.spurious.inc();
            return;
        }

        let flags = hard_local_irq_save::<A>();
        self.state.counters.irqs.inc();

        if !self.pipeline.is_active() {
            self.pipeline.platform.inband.handle_inband_irq(*self, irq);
            hard_local_irq_restore::<A>(flags);
            return;
        }

        if self.is_oob_event(irq, context) {
            self.state.counters.oob_irqs.inc();
            if self.state.stall.is_stalled(Stage::OutOfBand) {
                self.state.oob_pending.post(irq);
                self.state.counters.oob_deferred.inc();
            } else {
                self.run_oob_irq(irq);
            }
        } else {
            self.state.inband_pending.post(irq);
            self.state.counters.inband_logged.inc();
        }

        self.sync_inband_if_due();
        hard_local_irq_restore::<A>(flags);
    }

    fn is_oob_event(&self, irq: IrqNumber, context: &SavedContext) -> bool {
        let Some(companion) = self.pipeline.companion() else {
            return false;
        };
        self.pipeline.is_oob_irq(irq)
            || self.pipeline.vectors.contains(irq)
            || (self.pipeline.config.tick_irq == Some(irq) && companion.steal_tick(*self, context))
    }

    /// Run one out-of-band IRQ now, then anything deferred behind it
    fn run_oob_irq(&self, irq: IrqNumber) {
        let entered = self.enter_oob();
        self.dispatch_oob(irq);
        self.replay_oob();
        if entered && self.running_oob() {
            self.leave_oob();
        }
    }

    /// Hand `irq` to the companion with the out-of-band stage stalled
    pub(crate) fn dispatch_oob(&self, irq: IrqNumber) {
        let stalled = self.state.stall.test_and_stall(Stage::OutOfBand);
        let handled = match self.pipeline.vectors.kind_of(irq) {
            Some(kind) => self.dispatch_oob_ipi(kind),
            None => match self.pipeline.companion() {
                Some(companion) => {
                    companion.handle_oob_irq(*self, irq);
                    true
                }
                None => false,
            },
        };
        if !stalled {
            self.state.stall.clear(Stage::OutOfBand);
        }
        if !handled {
            warn!("{}: no companion for {}", self.id(), irq);
            self.state.counters.spurious.inc();
        }
    }

    // ========================================================================
    // Posting Work
    // ========================================================================

    /// Log `irq` for the in-band stage
    ///
    /// Replayed at once if the CPU is in-band and unstalled, otherwise on
    /// the next return to an unstalled in-band stage.
    pub fn post_inband(&self, irq: IrqNumber) -> Result<()> {
        if !irq.in_range() {
            return Err(PipelineError::IrqOutOfRange(irq));
        }
        let flags = hard_local_irq_save::<A>();
        self.state.inband_pending.post(irq);
        self.state.counters.inband_logged.inc();
        self.sync_inband_if_due();
        hard_local_irq_restore::<A>(flags);
        Ok(())
    }

    /// Log `irq` for the out-of-band stage
    ///
    /// Runs at once unless the out-of-band stage is stalled.
    pub fn post_oob(&self, irq: IrqNumber) -> Result<()> {
        if !irq.in_range() {
            return Err(PipelineError::IrqOutOfRange(irq));
        }
        if self.pipeline.companion().is_none() {
            return Err(PipelineError::NoCompanion);
        }
        let flags = hard_local_irq_save::<A>();
        self.state.oob_pending.post(irq);
        self.state.counters.oob_deferred.inc();
        if !self.state.stall.is_stalled(Stage::OutOfBand) {
            self.sync_stage(Stage::OutOfBand);
        }
        self.sync_inband_if_due();
        hard_local_irq_restore::<A>(flags);
        Ok(())
    }

    // ========================================================================
    // Stage Switching
    // ========================================================================

    /// Make the out-of-band stage current; `false` if it already was
    pub(crate) fn enter_oob(&self) -> bool {
        if self.running_oob() {
            return false;
        }
        let hooks = self.pipeline.platform.hooks;
        hooks.switch_prepare(self.id(), true);
        self.state.set_stage(Stage::OutOfBand);
        hooks.switch_finish(self.id(), false);
        self.state.counters.to_oob.inc();
        trace!("{}: in-band -> out-of-band", self.id());
        true
    }

    /// Make the in-band stage current again
    pub(crate) fn leave_oob(&self) {
        let hooks = self.pipeline.platform.hooks;
        hooks.switch_prepare(self.id(), false);
        self.state.set_stage(Stage::InBand);
        hooks.switch_finish(self.id(), true);
        self.state.counters.to_inband.inc();
        trace!("{}: out-of-band -> in-band", self.id());
    }

    /// Promote the current context to the out-of-band stage
    ///
    /// Must be called in-band; calling it again before switching back is
    /// an invariant violation.
    pub fn switch_oob(&self) {
        let flags = hard_local_irq_save::<A>();
        if self.running_oob() {
            self.invariant_violation(InvariantViolation::DoubleOobEntry);
        }
        self.enter_oob();
        hard_local_irq_restore::<A>(flags);
    }

    /// Demote the current context to the in-band stage
    ///
    /// Logged in-band IRQs are replayed if the in-band stage is unstalled.
    /// Does nothing when already in-band.
    pub fn switch_inband(&self) {
        let flags = hard_local_irq_save::<A>();
        if self.running_oob() {
            self.leave_oob();
            self.sync_inband_if_due();
        }
        hard_local_irq_restore::<A>(flags);
    }

    /// Run `f` on the out-of-band stage with that stage stalled
    ///
    /// Returns to the caller's stage afterwards; out-of-band IRQs deferred
    /// while `f` ran are handled before that.
    pub fn run_oob_call<R>(&self, f: impl FnOnce() -> R) -> R {
        let flags = hard_local_irq_save::<A>();
        let entered = self.enter_oob();
        let stalled = self.save_and_stall(Stage::OutOfBand);
        let ret = f();
        if !stalled {
            self.state.stall.clear(Stage::OutOfBand);
            self.replay_oob();
        }
        if entered && self.running_oob() {
            self.leave_oob();
        }
        self.sync_inband_if_due();
        hard_local_irq_restore::<A>(flags);
        ret
    }

    /// The in-band task is about to exec a new image
    pub fn exec_prepare(&self) {
        self.pipeline.platform.hooks.exec_prepare(self.id());
    }

    // ========================================================================
    // Invariant Violations
    // ========================================================================

    /// Report a broken invariant
    ///
    /// Panics under [`InvariantPolicy::Panic`]. Under
    /// [`InvariantPolicy::Recover`] the violation is logged and the CPU is
    /// forced back to the in-band stage, replaying anything logged for it.
    pub(crate) fn invariant_violation(&self, violation: InvariantViolation) {
        self.state.counters.violations.inc();
        match self.pipeline.config.invariant_policy {
            InvariantPolicy::Panic => panic!("{}: {}", self.id(), violation),
            InvariantPolicy::Recover => {
                error!("{}: {}; forcing in-band", self.id(), violation);
                let flags = hard_local_irq_save::<A>();
                if self.running_oob() {
                    self.leave_oob();
                    self.sync_inband_if_due();
                }
                hard_local_irq_restore::<A>(flags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::Ordering;

    use crate::config::{InvariantPolicy, PipelineConfig};
    use crate::error::PipelineError;
    use crate::pipeline::ipi::OobIpiKind;
    use crate::pipeline::testing::{pipeline, Event};
    use crate::types::{CpuId, IrqNumber, SavedContext, Stage, IRQ_SPACE};

    #[test]
    fn test_oob_irq_runs_immediately() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        pipeline.set_oob_irq(IrqNumber(12)).unwrap();

        cpu.save_and_stall(Stage::InBand);
        cpu.handle_irq(IrqNumber(12), &SavedContext::kernel(0x1000));
        assert_eq!(
            rec.take(),
            [Event::Oob(IrqNumber(12), Stage::OutOfBand, true)]
        );
        assert!(cpu.running_inband());
        assert!(cpu.is_stalled(Stage::InBand));
        assert!(!cpu.is_stalled(Stage::OutOfBand));

        let snap = cpu.counters().snapshot();
        assert_eq!(snap.to_oob, 1);
        assert_eq!(snap.to_inband, 1);
    }

    #[test]
    fn test_inband_irq_delivered_when_unstalled() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.handle_irq(IrqNumber(30), &SavedContext::default());
        assert_eq!(rec.take(), [Event::Inband(IrqNumber(30), true)]);
        assert_eq!(cpu.counters().to_oob.get(), 0);
    }

    #[test]
    fn test_inactive_pipeline_bypasses() {
        let rec = crate::pipeline::testing::recorder();
        let pipeline = crate::pipeline::Pipeline::<crate::arch::NativeArch>::new(
            PipelineConfig::new(1),
            crate::pipeline::Platform::new(rec, rec),
        )
        .unwrap();
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.save_and_stall(Stage::InBand);
        cpu.handle_irq(IrqNumber(30), &SavedContext::default());
        assert_eq!(rec.take(), [Event::Inband(IrqNumber(30), true)]);
    }

    #[test]
    fn test_tick_stolen_only_when_asked() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1).with_tick_irq(IrqNumber(0)));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();

        cpu.handle_irq(IrqNumber(0), &SavedContext::default());
        assert_eq!(rec.take(), [Event::Inband(IrqNumber(0), true)]);

        rec.steal_tick.store(true, Ordering::Relaxed);
        cpu.handle_irq(IrqNumber(0), &SavedContext::default());
        assert_eq!(
            rec.take(),
            [Event::Oob(IrqNumber(0), Stage::OutOfBand, true)]
        );
    }

    #[test]
    fn test_spurious_irq_dropped() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.handle_irq(IrqNumber(IRQ_SPACE as u32), &SavedContext::default());
        assert!(rec.take().is_empty());
        assert_eq!(cpu.counters().spurious.get(), 1);
        assert_eq!(cpu.counters().irqs.get(), 0);
    }

    #[test]
    fn test_ipi_vector_dispatch() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(2));
        let cpu = pipeline.cpu(CpuId(1)).unwrap();
        let vector = pipeline.ipi_vectors().vector(OobIpiKind::Reschedule);

        cpu.save_and_stall(Stage::InBand);
        cpu.handle_irq(vector, &SavedContext::default());
        assert_eq!(rec.take(), [Event::Ipi(OobIpiKind::Reschedule)]);
        assert_eq!(cpu.counters().ipis_received.get(), 1);
    }

    #[test]
    fn test_send_oob_ipi() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(2));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.send_oob_ipi(CpuId(1), OobIpiKind::Timer).unwrap();
        assert_eq!(
            rec.take(),
            [Event::Raise(
                CpuId(1),
                pipeline.ipi_vectors().vector(OobIpiKind::Timer)
            )]
        );
        assert_eq!(
            cpu.send_oob_ipi(CpuId(2), OobIpiKind::Timer),
            Err(PipelineError::NoSuchCpu(CpuId(2)))
        );
    }

    #[test]
    fn test_post_inband_from_oob_waits_for_return() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();

        cpu.run_oob_call(|| {
            cpu.post_inband(IrqNumber(50)).unwrap();
            assert!(cpu.has_pending(Stage::InBand));
        });
        assert_eq!(rec.take(), [Event::Inband(IrqNumber(50), true)]);
    }

    #[test]
    fn test_post_oob_deferred_inside_oob_call() {
        let (pipeline, rec) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();

        let value = cpu.run_oob_call(|| {
            assert!(cpu.running_oob());
            assert!(cpu.is_stalled(Stage::OutOfBand));
            cpu.post_oob(IrqNumber(7)).unwrap();
            assert!(rec.take().is_empty());
            42
        });
        assert_eq!(value, 42);
        assert_eq!(rec.take(), [Event::Oob(IrqNumber(7), Stage::OutOfBand, true)]);
        assert!(cpu.running_inband());
        assert!(!cpu.is_stalled(Stage::OutOfBand));
    }

    #[test]
    fn test_switch_balance() {
        let (pipeline, _) = pipeline(PipelineConfig::new(1));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.switch_oob();
        assert!(cpu.running_oob());
        cpu.switch_inband();
        cpu.switch_inband();
        assert!(cpu.running_inband());

        let snap = cpu.counters().snapshot();
        assert_eq!((snap.to_oob, snap.to_inband), (1, 1));
    }

    #[test]
    fn test_double_oob_entry_recovers() {
        let (pipeline, _) =
            pipeline(PipelineConfig::new(1).with_policy(InvariantPolicy::Recover));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.switch_oob();
        cpu.switch_oob();
        assert!(cpu.running_oob());
        cpu.switch_inband();

        let snap = cpu.counters().snapshot();
        assert_eq!(snap.violations, 1);
        assert_eq!(snap.to_oob, snap.to_inband);
    }

    #[test]
    #[should_panic(expected = "out-of-band stage entered twice")]
    fn test_double_oob_entry_panics() {
        let (pipeline, _) = pipeline(PipelineConfig::new(1).with_policy(InvariantPolicy::Panic));
        let cpu = pipeline.cpu(CpuId(0)).unwrap();
        cpu.switch_oob();
        cpu.switch_oob();
    }
}
