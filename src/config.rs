// Pack topology and protection limits for the accumulator.
//
// Fault-class durations are persistence windows: a limit must be continuously
// violated for the whole window before the class trips. Balancing bounds gate
// the discharge decision, they are not protection limits.

use embassy_time::Duration;

/// Cell monitor segments daisy-addressed on the isoSPI bus.
pub const NUM_SEGMENTS: usize = 12;
/// Total series cells across the pack (alternating 12- and 9-cell segments).
pub const NUM_CELLS: usize = 126;
/// Widest segment; 9-cell boards leave group D unpopulated.
pub const MAX_CELLS_PER_SEGMENT: usize = 12;
/// Thermistors wired to GPIO1-4 on every segment.
pub const THERMISTORS_PER_SEGMENT: usize = 4;

/// What the fifth GPIO input of a segment samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gpio5Kind {
    BoardTemp,
    Humidity,
}

/// Static per-segment wiring, immutable after boot.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SegmentConfig {
    pub address: u8,
    pub cell_count: u8,
    pub gpio5_kind: Gpio5Kind,
}

const fn segment(index: u8) -> SegmentConfig {
    if index % 2 == 0 {
        SegmentConfig {
            address: index,
            cell_count: 12,
            gpio5_kind: Gpio5Kind::BoardTemp,
        }
    } else {
        SegmentConfig {
            address: index,
            cell_count: 9,
            gpio5_kind: Gpio5Kind::Humidity,
        }
    }
}

pub const SEGMENTS: [SegmentConfig; NUM_SEGMENTS] = [
    segment(0),
    segment(1),
    segment(2),
    segment(3),
    segment(4),
    segment(5),
    segment(6),
    segment(7),
    segment(8),
    segment(9),
    segment(10),
    segment(11),
];

// cell voltage limits
pub const CELL_TOO_HIGH: f32 = 4.20;
pub const CELL_TOO_LOW: f32 = 3.05;
// pack floor sits above cell UV * count so a sagging pack trips before
// any single cell bottoms out
pub const PACK_TOO_LOW: f32 = 405.0;

// temperature limits, balancing current heats the cells so the charging
// bound is the tighter one
pub const CELL_OVERTEMP_CHARGING: f32 = 45.0;
pub const CELL_OVERTEMP_RUNNING: f32 = 60.0;
pub const BOARD_OVERTEMP_CHARGING: f32 = 50.0;
pub const BOARD_OVERTEMP_RUNNING: f32 = 60.0;

// consecutive CRC-invalid packets on any one segment before the comms
// class starts its persistence window
pub const INVALID_PACKET_LIMIT: u16 = 12;

// balancing
pub const BALANCE_DIFF_THRESHOLD: f32 = 0.020;
pub const BALANCE_MIN_VOLTAGE: f32 = 3.60;
pub const BALANCE_TEMP_ENABLE: f32 = 50.0;
pub const BALANCE_TEMP_LIMIT: f32 = 60.0;

// electrical model
pub const PACK_INTERNAL_RESISTANCE: f32 = 0.015;
pub const PACK_CAPACITY_AH: f32 = 13.5;

/// Thresholds and persistence windows consumed by the accumulator controller.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerConfig {
    pub cell_count: u32,
    pub ov_threshold: f32,
    pub uv_threshold: f32,
    pub min_pack_voltage: f32,
    pub cell_overtemp_charging: f32,
    pub cell_overtemp_running: f32,
    pub board_overtemp_charging: f32,
    pub board_overtemp_running: f32,
    pub invalid_packet_limit: u16,

    pub ov_duration: Duration,
    pub uv_duration: Duration,
    pub pack_uv_duration: Duration,
    pub cell_ot_duration: Duration,
    pub board_ot_duration: Duration,
    pub invalid_packet_duration: Duration,
    pub bms_ok_holdoff: Duration,

    pub balance_diff_threshold: f32,
    pub balance_min_voltage: f32,
    pub balance_temp_enable: f32,
    pub balance_temp_limit: f32,

    pub pack_internal_resistance: f32,
    pub pack_capacity_ah: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cell_count: NUM_CELLS as u32,
            ov_threshold: CELL_TOO_HIGH,
            uv_threshold: CELL_TOO_LOW,
            min_pack_voltage: PACK_TOO_LOW,
            cell_overtemp_charging: CELL_OVERTEMP_CHARGING,
            cell_overtemp_running: CELL_OVERTEMP_RUNNING,
            board_overtemp_charging: BOARD_OVERTEMP_CHARGING,
            board_overtemp_running: BOARD_OVERTEMP_RUNNING,
            invalid_packet_limit: INVALID_PACKET_LIMIT,
            ov_duration: Duration::from_millis(1000),
            uv_duration: Duration::from_millis(1000),
            pack_uv_duration: Duration::from_millis(1000),
            cell_ot_duration: Duration::from_millis(2000),
            board_ot_duration: Duration::from_millis(2000),
            invalid_packet_duration: Duration::from_millis(1500),
            bms_ok_holdoff: Duration::from_millis(5000),
            balance_diff_threshold: BALANCE_DIFF_THRESHOLD,
            balance_min_voltage: BALANCE_MIN_VOLTAGE,
            balance_temp_enable: BALANCE_TEMP_ENABLE,
            balance_temp_limit: BALANCE_TEMP_LIMIT,
            pack_internal_resistance: PACK_INTERNAL_RESISTANCE,
            pack_capacity_ah: PACK_CAPACITY_AH,
        }
    }
}

impl ControllerConfig {
    /// A rejected config never aborts execution; the controller turns it into
    /// a standing fault instead.
    pub fn is_valid(&self) -> bool {
        self.cell_count > 0
            && self.uv_threshold < self.ov_threshold
            && self.balance_min_voltage < self.ov_threshold
            && self.balance_diff_threshold > 0.0
            && self.balance_temp_enable <= self.balance_temp_limit
            && self.pack_capacity_ah > 0.0
            && self.pack_internal_resistance >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_table_covers_the_pack() {
        let total: u32 = SEGMENTS.iter().map(|s| s.cell_count as u32).sum();
        assert_eq!(total, NUM_CELLS as u32);
        for (i, seg) in SEGMENTS.iter().enumerate() {
            assert_eq!(seg.address as usize, i);
            if i % 2 == 0 {
                assert_eq!(seg.cell_count, 12);
                assert_eq!(seg.gpio5_kind, Gpio5Kind::BoardTemp);
            } else {
                assert_eq!(seg.cell_count, 9);
                assert_eq!(seg.gpio5_kind, Gpio5Kind::Humidity);
            }
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ControllerConfig::default().is_valid());
    }

    #[test]
    fn inverted_balance_floor_is_rejected() {
        let cfg = ControllerConfig {
            balance_min_voltage: 4.5,
            ..Default::default()
        };
        assert!(!cfg.is_valid());
    }
}
