//! ACU supervisory state machine.
//!
//! Gates the hardware watchdog and fault-latch outputs. Side effects go
//! through the injected [`AcuOutputs`] capability so the supervisor never
//! reaches into other modules, and every side effect is idempotent.

use embassy_time::{Duration, Instant};

/// Hold-down after entering Faulted before the watchdog may be re-armed.
const FAULT_RECOVERY_HOLDOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcuState {
    Startup,
    Active,
    Charging,
    Faulted,
}

/// Signals sampled by the supervisor each tick.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcuInputs {
    /// Vehicle safety loop closed.
    pub shdn_valid: bool,
    pub charge_requested: bool,
    pub bms_fault: bool,
    pub imd_fault: bool,
}

/// Hardware-facing side effects, injected at construction time.
pub trait AcuOutputs {
    fn set_watchdog(&mut self, armed: bool);
    fn set_fault_latch(&mut self, asserted: bool);
    fn set_balancing(&mut self, enabled: bool);
}

pub struct AcuStateMachine {
    state: AcuState,
    faulted_at: Instant,
    started: bool,
}

impl AcuStateMachine {
    pub fn new() -> Self {
        Self {
            state: AcuState::Startup,
            faulted_at: Instant::from_ticks(0),
            started: false,
        }
    }

    pub fn state(&self) -> AcuState {
        self.state
    }

    /// One supervisor tick. Transition conditions are checked in priority
    /// order within the current state; at most one transition fires per tick.
    pub fn advance(
        &mut self,
        inputs: &AcuInputs,
        now: Instant,
        outputs: &mut impl AcuOutputs,
    ) -> AcuState {
        if !self.started {
            self.started = true;
            self.enter(AcuState::Startup, now, outputs);
        }

        let any_fault = inputs.bms_fault || inputs.imd_fault;
        let next = match self.state {
            AcuState::Startup => inputs.shdn_valid.then_some(AcuState::Active),
            AcuState::Active => {
                if inputs.charge_requested {
                    Some(AcuState::Charging)
                } else if any_fault {
                    Some(AcuState::Faulted)
                } else {
                    None
                }
            }
            AcuState::Charging => {
                if any_fault {
                    Some(AcuState::Faulted)
                } else if !inputs.charge_requested {
                    Some(AcuState::Active)
                } else if !inputs.shdn_valid {
                    Some(AcuState::Startup)
                } else {
                    None
                }
            }
            AcuState::Faulted => {
                if inputs.shdn_valid && !any_fault {
                    Some(AcuState::Startup)
                } else {
                    // level drive, not a one-shot: the watchdog is up only
                    // while the BMS side is clear and the hold-down has
                    // passed, and comes back down if the fault re-asserts
                    // while the IMD (or open safety loop) keeps us latched
                    outputs.set_watchdog(
                        now - self.faulted_at > FAULT_RECOVERY_HOLDOFF && !inputs.bms_fault,
                    );
                    None
                }
            }
        };

        if let Some(next) = next {
            self.exit(self.state, outputs);
            self.enter(next, now, outputs);
            self.state = next;
        }
        self.state
    }

    fn enter(&mut self, state: AcuState, now: Instant, outputs: &mut impl AcuOutputs) {
        match state {
            AcuState::Startup => outputs.set_watchdog(true),
            AcuState::Active => {}
            AcuState::Charging => outputs.set_balancing(true),
            AcuState::Faulted => {
                outputs.set_watchdog(false);
                outputs.set_fault_latch(true);
                self.faulted_at = now;
            }
        }
    }

    fn exit(&mut self, state: AcuState, outputs: &mut impl AcuOutputs) {
        match state {
            AcuState::Charging => outputs.set_balancing(false),
            AcuState::Faulted => {
                outputs.set_fault_latch(false);
                outputs.set_watchdog(true);
            }
            _ => {}
        }
    }
}

impl Default for AcuStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
