//! Sticky latching of the safety signals.
//!
//! "Currently faulted" and "has faulted since acknowledgement" are separate
//! facts: a latch sets on any observed-false signal and survives the signal
//! recovering, until an explicit clear while nothing is currently faulted.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultLatches {
    bms_latched: bool,
    imd_latched: bool,
    shdn_latched: bool,

    bms_ok: bool,
    imd_ok: bool,
    shdn_valid: bool,
}

impl FaultLatches {
    pub const fn new() -> Self {
        Self {
            bms_latched: false,
            imd_latched: false,
            shdn_latched: false,
            bms_ok: true,
            imd_ok: true,
            shdn_valid: true,
        }
    }

    /// Samples the live signals; any false signal sets its latch.
    pub fn observe(&mut self, bms_ok: bool, imd_ok: bool, shdn_valid: bool) {
        self.bms_ok = bms_ok;
        self.imd_ok = imd_ok;
        self.shdn_valid = shdn_valid;
        self.bms_latched |= !bms_ok;
        self.imd_latched |= !imd_ok;
        self.shdn_latched |= !shdn_valid;
    }

    /// True while any live signal is currently bad.
    pub fn is_faulted(&self) -> bool {
        !self.bms_ok || !self.imd_ok || !self.shdn_valid
    }

    /// Releases the latches; refused (returns false) while currently faulted.
    pub fn clear(&mut self) -> bool {
        if self.is_faulted() {
            return false;
        }
        self.bms_latched = false;
        self.imd_latched = false;
        self.shdn_latched = false;
        true
    }

    pub fn bms_latched(&self) -> bool {
        self.bms_latched
    }

    pub fn imd_latched(&self) -> bool {
        self.imd_latched
    }

    pub fn shdn_latched(&self) -> bool {
        self.shdn_latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_survives_signal_recovery() {
        let mut latches = FaultLatches::new();
        latches.observe(true, false, true);
        assert!(latches.imd_latched());
        assert!(latches.is_faulted());

        latches.observe(true, true, true);
        assert!(latches.imd_latched());
        assert!(!latches.is_faulted());
    }

    #[test]
    fn clear_refused_while_faulted() {
        let mut latches = FaultLatches::new();
        latches.observe(false, true, false);
        assert!(!latches.clear());
        assert!(latches.bms_latched());
        assert!(latches.shdn_latched());

        latches.observe(true, true, true);
        assert!(latches.clear());
        assert!(!latches.bms_latched());
        assert!(!latches.shdn_latched());
    }
}
