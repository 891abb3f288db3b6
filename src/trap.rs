//! Synchronous trap routing
//!
//! Every fault, breakpoint and system call passes through here on its way
//! into the kernel. The companion core gets to see each trap first and may
//! handle it outright or move the interrupted task back to the in-band
//! stage. Entry and exit are tracked on a small per-CPU frame stack so an
//! exit that does not match the innermost entry is caught.

use crate::arch::{Architecture, TrapKind};
use crate::error::InvariantViolation;
use crate::pipeline::percpu::{TrapFrame, TrapPop, MAX_TRAP_NESTING};
use crate::pipeline::Cpu;
use crate::types::{SavedContext, TrapNumber};

/// A trap in flight, as seen by the companion core
#[derive(Debug)]
pub struct TrapEvent<'a> {
    /// Architecture trap number
    pub number: TrapNumber,
    /// Architecture-neutral classification
    pub kind: TrapKind,
    /// Register frame at the time of the trap
    pub context: &'a mut SavedContext,
    /// Set by the companion when it fully handled the trap
    pub handled: bool,
}

/// Where a system call continues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallRoute {
    /// The companion core handled it
    OutOfBand,
    /// The in-band kernel must handle it
    InBand,
}

impl<'p, A: Architecture> Cpu<'p, A> {
    /// Announce a synchronous trap
    ///
    /// Must be called before any in-band specific handling. Returns whether
    /// the CPU is on the in-band stage once the companion core has seen the
    /// trap.
    pub fn on_trap_entry(&self, number: TrapNumber, context: &mut SavedContext) -> bool {
        self.enter_trap(number, context).0
    }

    /// Returns `(in_band, handled)`
    fn enter_trap(&self, number: TrapNumber, context: &mut SavedContext) -> (bool, bool) {
        self.state.counters.traps.inc();
        let frame = TrapFrame {
            number,
            entry_stage: self.current_stage(),
        };
        if !self.state.push_trap::<A>(frame) {
            self.invariant_violation(InvariantViolation::TrapNestingOverflow(MAX_TRAP_NESTING));
        }

        let mut handled = false;
        if let Some(companion) = self.active_companion() {
            let mut event = TrapEvent {
                number,
                kind: A::trap_kind(number),
                context,
                handled: false,
            };
            companion.trap_notify(*self, &mut event);
            handled = event.handled;
        }
        (self.running_inband(), handled)
    }

    /// Announce that the trap has fully unwound
    pub fn on_trap_exit(&self, number: TrapNumber, context: &mut SavedContext) {
        match self.state.pop_trap::<A>(number) {
            TrapPop::Matched(_) | TrapPop::Untracked => {}
            TrapPop::Mismatched(frame) => {
                self.invariant_violation(InvariantViolation::UnbalancedTrapExit {
                    expected: frame.number,
                    found: number,
                });
            }
            TrapPop::Empty => {
                self.invariant_violation(InvariantViolation::UnmatchedTrapExit(number));
            }
        }

        if let Some(companion) = self.active_companion() {
            let mut event = TrapEvent {
                number,
                kind: A::trap_kind(number),
                context,
                handled: false,
            };
            companion.trap_unwind(*self, &mut event);
        }
    }

    /// Announce a trap whose handler needs the in-band stage
    ///
    /// Finding the CPU still out-of-band after the companion has seen the
    /// trap is an invariant violation.
    pub fn require_in_band(&self, number: TrapNumber, context: &mut SavedContext) {
        if !self.on_trap_entry(number, context) {
            self.invariant_violation(InvariantViolation::NotInband {
                trap: number,
                stage: self.current_stage(),
            });
        }
    }

    /// Run `handler` for a trap, bracketed by entry and exit
    ///
    /// The handler is skipped, and `None` returned, when the companion
    /// handled the trap itself or kept the CPU out-of-band.
    pub fn route_trap<R>(
        &self,
        number: TrapNumber,
        context: &mut SavedContext,
        handler: impl FnOnce(TrapKind, &mut SavedContext) -> R,
    ) -> Option<R> {
        let (in_band, handled) = self.enter_trap(number, context);
        let ret = if in_band && !handled {
            Some(handler(A::trap_kind(number), context))
        } else {
            None
        };
        self.on_trap_exit(number, context);
        ret
    }

    /// Offer system call `nr` to the companion core
    ///
    /// A call the companion declines continues in-band; being left on the
    /// out-of-band stage at that point is an invariant violation.
    pub fn route_syscall(&self, nr: usize, context: &mut SavedContext) -> SyscallRoute {
        if let Some(companion) = self.active_companion() {
            if companion.handle_syscall(*self, nr, context) {
                self.state.counters.syscalls_oob.inc();
                return SyscallRoute::OutOfBand;
            }
            if !self.running_inband() {
                self.invariant_violation(InvariantViolation::SyscallNotInband { nr });
            }
        }
        SyscallRoute::InBand
    }

    fn active_companion(&self) -> Option<&'static dyn crate::pipeline::CompanionCore<A>> {
        if self.pipeline.is_active() {
            self.pipeline.companion()
        } else {
            None
        }
    }
}
