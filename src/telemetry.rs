//! Rolls raw per-segment samples into the pack-wide snapshot consumed by the
//! controller and the telemetry publishers.
//!
//! The monitor is the only producer; consumers read between scheduler ticks,
//! so the snapshot is a plain value overwritten wholesale (non-preemptive
//! model, no locking).

use heapless::Vec;

use crate::config::{
    Gpio5Kind, MAX_CELLS_PER_SEGMENT, NUM_SEGMENTS, SEGMENTS, THERMISTORS_PER_SEGMENT,
};

/// Where an extreme value lives in the pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Location {
    pub segment: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Extreme {
    pub value: f32,
    pub location: Location,
}

/// Latest decoded values for one segment.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SegmentTelemetry {
    /// One entry per populated cell (9 or 12).
    pub cell_voltages: Vec<f32, MAX_CELLS_PER_SEGMENT>,
    pub cell_temps: [f32; THERMISTORS_PER_SEGMENT],
    pub board_temp: Option<f32>,
    pub humidity: Option<f32>,
}

/// Pack-wide aggregate produced once per scheduler tick.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySnapshot {
    pub segments: [SegmentTelemetry; NUM_SEGMENTS],

    pub min_cell_voltage: Extreme,
    pub max_cell_voltage: Extreme,
    pub avg_cell_voltage: f32,
    pub total_voltage: f32,

    pub min_cell_temp: Extreme,
    pub max_cell_temp: Extreme,
    pub avg_cell_temp: f32,

    pub max_board_temp: Extreme,
    pub humidity: f32,

    /// Maximum consecutive-invalid packet count across all segments.
    pub max_invalid_count: u16,
    /// Echo of the discharge bitmap last written to the monitors.
    pub balancing: [u16; NUM_SEGMENTS],
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            segments: core::array::from_fn(|_| SegmentTelemetry::default()),
            min_cell_voltage: Extreme::default(),
            max_cell_voltage: Extreme::default(),
            avg_cell_voltage: 0.0,
            total_voltage: 0.0,
            min_cell_temp: Extreme::default(),
            max_cell_temp: Extreme::default(),
            avg_cell_temp: 0.0,
            max_board_temp: Extreme::default(),
            humidity: 0.0,
            max_invalid_count: 0,
            balancing: [0; NUM_SEGMENTS],
        }
    }
}

/// Accumulates decoded samples as register groups come in, then folds them
/// into a [`TelemetrySnapshot`].
pub struct PackTelemetry {
    segments: [SegmentTelemetry; NUM_SEGMENTS],
}

impl PackTelemetry {
    pub fn new() -> Self {
        let segments = core::array::from_fn(|i| {
            let mut seg = SegmentTelemetry::default();
            for _ in 0..SEGMENTS[i].cell_count {
                // length fixed by topology from here on
                let _ = seg.cell_voltages.push(0.0);
            }
            seg
        });
        Self { segments }
    }

    pub fn set_cell_voltage(&mut self, segment: usize, cell: usize, volts: f32) {
        if let Some(slot) = self.segments[segment].cell_voltages.get_mut(cell) {
            *slot = volts;
        }
    }

    pub fn set_cell_temp(&mut self, segment: usize, thermistor: usize, celsius: f32) {
        if thermistor < THERMISTORS_PER_SEGMENT {
            self.segments[segment].cell_temps[thermistor] = celsius;
        }
    }

    pub fn set_gpio5(&mut self, segment: usize, value: f32) {
        match SEGMENTS[segment].gpio5_kind {
            Gpio5Kind::BoardTemp => self.segments[segment].board_temp = Some(value),
            Gpio5Kind::Humidity => self.segments[segment].humidity = Some(value),
        }
    }

    pub fn segment(&self, segment: usize) -> &SegmentTelemetry {
        &self.segments[segment]
    }

    pub fn snapshot(
        &self,
        balancing: [u16; NUM_SEGMENTS],
        max_invalid_count: u16,
    ) -> TelemetrySnapshot {
        let mut snap = TelemetrySnapshot {
            segments: self.segments.clone(),
            max_invalid_count,
            balancing,
            ..TelemetrySnapshot::default()
        };

        let mut volt_count = 0u32;
        let mut volt_sum = 0.0f32;
        let mut temp_count = 0u32;
        let mut temp_sum = 0.0f32;
        let mut first_cell = true;
        let mut first_temp = true;
        let mut first_board = true;

        for (seg_idx, seg) in self.segments.iter().enumerate() {
            for (cell_idx, &v) in seg.cell_voltages.iter().enumerate() {
                let loc = Location {
                    segment: seg_idx as u8,
                    channel: cell_idx as u8,
                };
                if first_cell || v < snap.min_cell_voltage.value {
                    snap.min_cell_voltage = Extreme { value: v, location: loc };
                }
                if first_cell || v > snap.max_cell_voltage.value {
                    snap.max_cell_voltage = Extreme { value: v, location: loc };
                }
                first_cell = false;
                volt_sum += v;
                volt_count += 1;
            }

            for (t_idx, &t) in seg.cell_temps.iter().enumerate() {
                let loc = Location {
                    segment: seg_idx as u8,
                    channel: t_idx as u8,
                };
                if first_temp || t < snap.min_cell_temp.value {
                    snap.min_cell_temp = Extreme { value: t, location: loc };
                }
                if first_temp || t > snap.max_cell_temp.value {
                    snap.max_cell_temp = Extreme { value: t, location: loc };
                }
                first_temp = false;
                temp_sum += t;
                temp_count += 1;
            }

            if let Some(bt) = seg.board_temp {
                if first_board || bt > snap.max_board_temp.value {
                    snap.max_board_temp = Extreme {
                        value: bt,
                        location: Location {
                            segment: seg_idx as u8,
                            channel: 0,
                        },
                    };
                }
                first_board = false;
            }

            if let Some(h) = seg.humidity {
                if h > snap.humidity {
                    snap.humidity = h;
                }
            }
        }

        snap.total_voltage = volt_sum;
        if volt_count > 0 {
            snap.avg_cell_voltage = volt_sum / volt_count as f32;
        }
        if temp_count > 0 {
            snap.avg_cell_temp = temp_sum / temp_count as f32;
        }
        snap
    }
}

impl Default for PackTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
