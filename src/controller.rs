//! Accumulator controller: debounced fault evaluation, IR-compensated
//! thresholds, the balancing decision and coulomb-counted state of charge.
//!
//! Every fault class is persistence-based: the class must be continuously
//! violated for its configured window before it trips, so a single noisy
//! sample or corrupted packet can never shut the car down.

use embassy_time::{Duration, Instant};

use crate::config::{ControllerConfig, NUM_SEGMENTS};
use crate::telemetry::TelemetrySnapshot;

/// Safety-relevant fault classes evaluated each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultClass {
    OverVoltage,
    UnderVoltage,
    PackUnderVoltage,
    CellOverTemp,
    BoardOverTemp,
    InvalidPacket,
}

impl FaultClass {
    pub const COUNT: usize = 6;
    pub const ALL: [FaultClass; Self::COUNT] = [
        FaultClass::OverVoltage,
        FaultClass::UnderVoltage,
        FaultClass::PackUnderVoltage,
        FaultClass::CellOverTemp,
        FaultClass::BoardOverTemp,
        FaultClass::InvalidPacket,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Per-class "last instant the class was not violated". The class is faulted
/// iff `now - last_ok(class) > duration(class)`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultTimers {
    last_ok: [Instant; FaultClass::COUNT],
}

impl FaultTimers {
    fn new(now: Instant) -> Self {
        Self {
            last_ok: [now; FaultClass::COUNT],
        }
    }

    pub fn last_ok(&self, class: FaultClass) -> Instant {
        self.last_ok[class.index()]
    }

    fn refresh(&mut self, class: FaultClass, now: Instant) {
        self.last_ok[class.index()] = now;
    }

    fn is_faulted(&self, class: FaultClass, now: Instant, duration: Duration) -> bool {
        now - self.last_ok[class.index()] > duration
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultFlags {
    pub overvoltage: bool,
    pub undervoltage: bool,
    pub pack_undervoltage: bool,
    pub cell_overtemp: bool,
    pub board_overtemp: bool,
    pub invalid_packet: bool,
    /// Standing fault raised by a rejected configuration.
    pub bad_config: bool,
}

impl FaultFlags {
    pub fn any(&self) -> bool {
        self.overvoltage
            || self.undervoltage
            || self.pack_undervoltage
            || self.cell_overtemp
            || self.board_overtemp
            || self.invalid_packet
            || self.bad_config
    }
}

/// Produced once per controller tick; fully replaces the previous status.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerStatus {
    pub has_fault: bool,
    pub bms_ok: bool,
    pub faults: FaultFlags,
    pub timers: FaultTimers,
    pub soc: f32,
    /// Discharge bitmap per segment, cell 1 = bit 0.
    pub balance: [u16; NUM_SEGMENTS],
}

pub struct AccumulatorController {
    config: ControllerConfig,
    config_ok: bool,
    timers: Option<FaultTimers>,
    charging_enabled: bool,
    /// Thermal gate for balancing; hysteretic between the enable and limit
    /// bounds.
    balance_thermal_ok: bool,
    last_not_ok: Option<Instant>,
    soc: f32,
    last_soc_update: Option<Instant>,
}

impl AccumulatorController {
    pub fn new(config: ControllerConfig) -> Self {
        let config_ok = config.is_valid();
        #[cfg(feature = "defmt")]
        if !config_ok {
            defmt::warn!("controller config rejected, standing fault raised");
        }
        Self {
            config,
            config_ok,
            timers: None,
            charging_enabled: false,
            balance_thermal_ok: false,
            last_not_ok: None,
            soc: 0.0,
            last_soc_update: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Charging mode selects the tighter overtemperature thresholds and is
    /// the global gate for balancing.
    pub fn set_charging_enabled(&mut self, enabled: bool) {
        self.charging_enabled = enabled;
    }

    pub fn charging_enabled(&self) -> bool {
        self.charging_enabled
    }

    /// Seeds the state-of-charge estimate from an external source (e.g. a
    /// rest-voltage lookup at boot).
    pub fn set_soc(&mut self, soc: f32) {
        self.soc = soc.clamp(0.0, 1.0);
    }

    /// One controller tick. `pack_current` is positive while charging.
    pub fn evaluate(
        &mut self,
        snapshot: &TelemetrySnapshot,
        now: Instant,
        pack_current: f32,
    ) -> ControllerStatus {
        let mut timers = match self.timers {
            Some(t) => t,
            None => FaultTimers::new(now),
        };

        let discharge_current = -pack_current;
        let per_cell_resistance =
            self.config.pack_internal_resistance / self.config.cell_count.max(1) as f32;

        let invalid_violated =
            snapshot.max_invalid_count > self.config.invalid_packet_limit;

        // IR compensation only ever pulls an already-violating reading back
        // toward its threshold; a reading on the good side is left alone
        let ov_violated = {
            let raw = snapshot.max_cell_voltage.value;
            raw >= self.config.ov_threshold && {
                let effective = raw + per_cell_resistance * discharge_current;
                effective >= self.config.ov_threshold
            }
        };
        let uv_violated = {
            let raw = snapshot.min_cell_voltage.value;
            raw <= self.config.uv_threshold && {
                let effective = raw + per_cell_resistance * discharge_current;
                effective <= self.config.uv_threshold
            }
        };
        let pack_uv_violated = snapshot.total_voltage < self.config.min_pack_voltage;

        let cell_ot_limit = if self.charging_enabled {
            self.config.cell_overtemp_charging
        } else {
            self.config.cell_overtemp_running
        };
        let board_ot_limit = if self.charging_enabled {
            self.config.board_overtemp_charging
        } else {
            self.config.board_overtemp_running
        };
        let cell_ot_violated = snapshot.max_cell_temp.value > cell_ot_limit;
        let board_ot_violated = snapshot.max_board_temp.value > board_ot_limit;

        // corrupted packets mean stale readings: they feed the invalid-packet
        // class and nothing else
        let measurement_classes = [
            (FaultClass::OverVoltage, ov_violated),
            (FaultClass::UnderVoltage, uv_violated),
            (FaultClass::PackUnderVoltage, pack_uv_violated),
            (FaultClass::CellOverTemp, cell_ot_violated),
            (FaultClass::BoardOverTemp, board_ot_violated),
        ];
        for (class, violated) in measurement_classes {
            if invalid_violated || !violated {
                timers.refresh(class, now);
            }
        }
        if !invalid_violated {
            timers.refresh(FaultClass::InvalidPacket, now);
        }

        let faults = FaultFlags {
            overvoltage: timers.is_faulted(FaultClass::OverVoltage, now, self.config.ov_duration),
            undervoltage: timers.is_faulted(FaultClass::UnderVoltage, now, self.config.uv_duration),
            pack_undervoltage: timers.is_faulted(
                FaultClass::PackUnderVoltage,
                now,
                self.config.pack_uv_duration,
            ),
            cell_overtemp: timers.is_faulted(
                FaultClass::CellOverTemp,
                now,
                self.config.cell_ot_duration,
            ),
            board_overtemp: timers.is_faulted(
                FaultClass::BoardOverTemp,
                now,
                self.config.board_ot_duration,
            ),
            invalid_packet: timers.is_faulted(
                FaultClass::InvalidPacket,
                now,
                self.config.invalid_packet_duration,
            ),
            bad_config: !self.config_ok,
        };
        let has_fault = faults.any();

        // second debounce layer: bms_ok recovers only after the hold-off has
        // elapsed since the last not-ok evaluation
        if has_fault {
            self.last_not_ok = Some(now);
        }
        let bms_ok = !has_fault
            && match self.last_not_ok {
                Some(t) => now - t >= self.config.bms_ok_holdoff,
                None => true,
            };

        let balance = self.decide_balance(snapshot);
        self.integrate_soc(now, pack_current);

        self.timers = Some(timers);

        ControllerStatus {
            has_fault,
            bms_ok,
            faults,
            timers,
            soc: self.soc,
            balance,
        }
    }

    fn decide_balance(&mut self, snapshot: &TelemetrySnapshot) -> [u16; NUM_SEGMENTS] {
        // hysteretic thermal gate: enable below the enable bound, stay
        // enabled until the limit bound is exceeded
        let board_temp = snapshot.max_board_temp.value;
        if board_temp > self.config.balance_temp_limit {
            self.balance_thermal_ok = false;
        } else if board_temp < self.config.balance_temp_enable {
            self.balance_thermal_ok = true;
        }

        let mut balance = [0u16; NUM_SEGMENTS];
        if !self.charging_enabled || !self.balance_thermal_ok {
            return balance;
        }

        let min_voltage = snapshot.min_cell_voltage.value;
        for (seg_idx, seg) in snapshot.segments.iter().enumerate() {
            for (cell_idx, &v) in seg.cell_voltages.iter().enumerate() {
                if v - min_voltage > self.config.balance_diff_threshold
                    && v > self.config.balance_min_voltage
                {
                    balance[seg_idx] |= 1 << cell_idx;
                }
            }
        }
        balance
    }

    fn integrate_soc(&mut self, now: Instant, pack_current: f32) {
        if let Some(last) = self.last_soc_update {
            let elapsed_s = (now - last).as_micros() as f32 / 1_000_000.0;
            let delta_ah = pack_current * elapsed_s / 3600.0;
            self.soc = (self.soc + delta_ah / self.config.pack_capacity_ah).clamp(0.0, 1.0);
        }
        self.last_soc_update = Some(now);
    }
}
