use embassy_time::{Duration, Instant};

use acu_bms::config::{ControllerConfig, NUM_SEGMENTS};
use acu_bms::controller::AccumulatorController;
use acu_bms::telemetry::{Extreme, Location, TelemetrySnapshot};

fn ms(t: u64) -> Instant {
    Instant::from_millis(t)
}

/// Snapshot with everything comfortably inside the limits.
fn nominal_snapshot() -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    snap.min_cell_voltage = Extreme {
        value: 3.70,
        location: Location::default(),
    };
    snap.max_cell_voltage = Extreme {
        value: 3.72,
        location: Location::default(),
    };
    snap.avg_cell_voltage = 3.71;
    snap.total_voltage = 467.0;
    snap.max_cell_temp.value = 25.0;
    snap.max_board_temp.value = 25.0;
    snap
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        ov_threshold: 4.2,
        ov_duration: Duration::from_millis(500),
        uv_threshold: 3.05,
        uv_duration: Duration::from_millis(500),
        bms_ok_holdoff: Duration::from_millis(1000),
        ..Default::default()
    }
}

#[test]
fn overvoltage_debounce_window() {
    let mut controller = AccumulatorController::new(test_config());
    let mut snap = nominal_snapshot();
    snap.max_cell_voltage.value = 4.21;

    let status = controller.evaluate(&snap, ms(1000), 0.0);
    assert!(!status.has_fault, "first violating tick must not trip");

    let status = controller.evaluate(&snap, ms(1500), 0.0);
    assert!(!status.has_fault, "500 ms is not over the 500 ms window");

    let status = controller.evaluate(&snap, ms(2100), 0.0);
    assert!(status.has_fault);
    assert!(status.faults.overvoltage);
    assert!(!status.bms_ok);
}

#[test]
fn violation_recovery_resets_the_window() {
    let mut controller = AccumulatorController::new(test_config());
    let mut snap = nominal_snapshot();

    snap.max_cell_voltage.value = 4.21;
    controller.evaluate(&snap, ms(0), 0.0);
    controller.evaluate(&snap, ms(400), 0.0);

    // one clean tick re-seeds the timer
    snap.max_cell_voltage.value = 3.72;
    controller.evaluate(&snap, ms(450), 0.0);

    snap.max_cell_voltage.value = 4.21;
    let status = controller.evaluate(&snap, ms(900), 0.0);
    assert!(!status.has_fault);
}

#[test]
fn ir_compensation_masks_sag_under_load() {
    // R = 0.012 ohm over 12 cells at 100 A discharge lifts the effective
    // reading by 0.1 V
    let config = ControllerConfig {
        cell_count: 12,
        pack_internal_resistance: 0.012,
        min_pack_voltage: 30.0,
        ..test_config()
    };
    let mut snap = nominal_snapshot();
    snap.min_cell_voltage.value = 3.05;
    snap.total_voltage = 44.0;

    // discharging: pack current is negative (positive while charging)
    let mut controller = AccumulatorController::new(config.clone());
    controller.evaluate(&snap, ms(0), -100.0);
    let status = controller.evaluate(&snap, ms(2000), -100.0);
    assert!(!status.has_fault, "compensated reading sits above threshold");

    // identical readings with no load must fault once the window elapses
    let mut controller = AccumulatorController::new(config);
    controller.evaluate(&snap, ms(0), 0.0);
    let status = controller.evaluate(&snap, ms(2000), 0.0);
    assert!(status.has_fault);
    assert!(status.faults.undervoltage);
}

#[test]
fn balance_selects_cells_above_min_plus_threshold() {
    let config = ControllerConfig {
        balance_diff_threshold: 0.02,
        balance_min_voltage: 3.60,
        ..test_config()
    };
    let mut controller = AccumulatorController::new(config);
    controller.set_charging_enabled(true);

    let mut snap = nominal_snapshot();
    let voltages = [
        3.70, 3.72, 3.721, 3.75, 3.70, 3.90, 3.71, 3.70, 3.701, 3.73, 3.70, 3.70,
    ];
    for v in voltages {
        snap.segments[0].cell_voltages.push(v).unwrap();
    }
    snap.min_cell_voltage.value = 3.70;
    snap.max_board_temp.value = 30.0;

    let status = controller.evaluate(&snap, ms(0), 0.0);
    // exactly the cells with (v - 3.70) > 0.02: indices 2, 3, 5, 9
    let expected = (1 << 2) | (1 << 3) | (1 << 5) | (1 << 9);
    assert_eq!(status.balance[0], expected);
    for seg in 1..NUM_SEGMENTS {
        assert_eq!(status.balance[seg], 0);
    }
}

#[test]
fn balance_respects_discharge_floor_and_charging_gate() {
    let config = ControllerConfig {
        balance_diff_threshold: 0.02,
        balance_min_voltage: 3.60,
        ..test_config()
    };
    let mut controller = AccumulatorController::new(config);

    let mut snap = nominal_snapshot();
    for v in [3.50, 3.59, 3.65] {
        snap.segments[0].cell_voltages.push(v).unwrap();
    }
    snap.min_cell_voltage.value = 3.50;
    snap.max_board_temp.value = 30.0;

    // not charging: nothing balances
    let status = controller.evaluate(&snap, ms(0), 0.0);
    assert_eq!(status.balance[0], 0);

    // charging: 3.59 is over the diff threshold but under the floor
    controller.set_charging_enabled(true);
    let status = controller.evaluate(&snap, ms(10), 0.0);
    assert_eq!(status.balance[0], 1 << 2);
}

#[test]
fn balance_thermal_gate_is_hysteretic() {
    let config = ControllerConfig {
        balance_temp_enable: 50.0,
        balance_temp_limit: 60.0,
        board_overtemp_charging: 70.0,
        board_overtemp_running: 70.0,
        ..test_config()
    };
    let mut controller = AccumulatorController::new(config);
    controller.set_charging_enabled(true);

    let mut snap = nominal_snapshot();
    for v in [3.70, 3.80] {
        snap.segments[0].cell_voltages.push(v).unwrap();
    }
    snap.min_cell_voltage.value = 3.70;

    snap.max_board_temp.value = 45.0;
    assert_ne!(controller.evaluate(&snap, ms(0), 0.0).balance[0], 0);

    // inside the band: stays enabled
    snap.max_board_temp.value = 55.0;
    assert_ne!(controller.evaluate(&snap, ms(10), 0.0).balance[0], 0);

    // over the limit: disabled, and 55 C is not low enough to re-enable
    snap.max_board_temp.value = 61.0;
    assert_eq!(controller.evaluate(&snap, ms(20), 0.0).balance[0], 0);
    snap.max_board_temp.value = 55.0;
    assert_eq!(controller.evaluate(&snap, ms(30), 0.0).balance[0], 0);

    snap.max_board_temp.value = 45.0;
    assert_ne!(controller.evaluate(&snap, ms(40), 0.0).balance[0], 0);
}

#[test]
fn bms_ok_holds_off_after_fault_clears() {
    let mut controller = AccumulatorController::new(test_config());
    let mut snap = nominal_snapshot();

    snap.max_cell_voltage.value = 4.21;
    controller.evaluate(&snap, ms(1000), 0.0);
    let status = controller.evaluate(&snap, ms(2100), 0.0);
    assert!(status.has_fault);
    assert!(!status.bms_ok);

    snap.max_cell_voltage.value = 3.72;
    let status = controller.evaluate(&snap, ms(2200), 0.0);
    assert!(!status.has_fault);
    assert!(!status.bms_ok, "hold-off has not elapsed");

    let status = controller.evaluate(&snap, ms(3100), 0.0);
    assert!(status.bms_ok);
}

#[test]
fn invalid_packets_never_trip_measurement_classes() {
    let config = ControllerConfig {
        invalid_packet_limit: 12,
        invalid_packet_duration: Duration::from_millis(1500),
        ..test_config()
    };
    let mut controller = AccumulatorController::new(config);

    // wildly violating voltage reading, but the packets are stale
    let mut snap = nominal_snapshot();
    snap.max_cell_voltage.value = 4.50;
    snap.max_invalid_count = 13;

    controller.evaluate(&snap, ms(0), 0.0);
    let status = controller.evaluate(&snap, ms(5000), 0.0);
    assert!(!status.faults.overvoltage);
    assert!(status.faults.invalid_packet);
    assert!(status.has_fault);
}

#[test]
fn charging_selects_tighter_overtemp_threshold() {
    let config = ControllerConfig {
        cell_overtemp_charging: 45.0,
        cell_overtemp_running: 60.0,
        cell_ot_duration: Duration::from_millis(500),
        ..test_config()
    };
    let mut snap = nominal_snapshot();
    snap.max_cell_temp.value = 50.0;

    let mut controller = AccumulatorController::new(config.clone());
    controller.evaluate(&snap, ms(0), 0.0);
    let status = controller.evaluate(&snap, ms(1000), 0.0);
    assert!(!status.faults.cell_overtemp, "50 C is fine while running");

    let mut controller = AccumulatorController::new(config);
    controller.set_charging_enabled(true);
    controller.evaluate(&snap, ms(0), 0.0);
    let status = controller.evaluate(&snap, ms(1000), 0.0);
    assert!(status.faults.cell_overtemp, "50 C trips the charging limit");
}

#[test]
fn soc_integrates_and_clamps() {
    let config = ControllerConfig {
        pack_capacity_ah: 10.0,
        ..test_config()
    };
    let mut controller = AccumulatorController::new(config);
    let snap = nominal_snapshot();

    controller.set_soc(0.5);
    controller.evaluate(&snap, ms(0), 10.0);
    // 10 A for 360 s = 1 Ah = 10% of capacity
    let status = controller.evaluate(&snap, ms(360_000), 10.0);
    assert!((status.soc - 0.6).abs() < 1e-3, "got {}", status.soc);

    // heavy discharge clamps at empty
    let status = controller.evaluate(&snap, ms(100_000_000), -100.0);
    assert_eq!(status.soc, 0.0);
}

#[test]
fn rejected_config_is_a_standing_fault() {
    let config = ControllerConfig {
        balance_min_voltage: 9.0,
        ..test_config()
    };
    let mut controller = AccumulatorController::new(config);
    let status = controller.evaluate(&nominal_snapshot(), ms(0), 0.0);
    assert!(status.has_fault);
    assert!(status.faults.bad_config);
    assert!(!status.bms_ok);
}
