//! Cyclic register-group scheduler over all cell-monitor segments.
//!
//! Each call to [`PackMonitor::read_next_group`] performs exactly one
//! register-group operation across the whole bus, so a full refresh of every
//! cell voltage and GPIO takes exactly six calls. This bounds the worst-case
//! latency a single call adds to the shared cooperative scheduler.

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::{delay::DelayNs, spi::SpiBus};

use crate::config::{NUM_SEGMENTS, SEGMENTS};
use crate::ltc6811::{
    command::{self, AdcMode, Command},
    registers::{self, Config},
    Ltc6811Bus,
};
use crate::telemetry::{PackTelemetry, TelemetrySnapshot};

/// The six register groups visited per refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadGroup {
    CellA,
    CellB,
    CellC,
    CellD,
    AuxA,
    AuxB,
}

impl ReadGroup {
    /// Successor in the cycle; the bool marks the AuxB -> CellA wrap.
    pub fn next(self) -> (ReadGroup, bool) {
        match self {
            ReadGroup::CellA => (ReadGroup::CellB, false),
            ReadGroup::CellB => (ReadGroup::CellC, false),
            ReadGroup::CellC => (ReadGroup::CellD, false),
            ReadGroup::CellD => (ReadGroup::AuxA, false),
            ReadGroup::AuxA => (ReadGroup::AuxB, false),
            ReadGroup::AuxB => (ReadGroup::CellA, true),
        }
    }

    fn command(self) -> Command {
        match self {
            ReadGroup::CellA => Command::ReadCellGroupA,
            ReadGroup::CellB => Command::ReadCellGroupB,
            ReadGroup::CellC => Command::ReadCellGroupC,
            ReadGroup::CellD => Command::ReadCellGroupD,
            ReadGroup::AuxA => Command::ReadAuxGroupA,
            ReadGroup::AuxB => Command::ReadAuxGroupB,
        }
    }

    /// First cell index covered by a cell-voltage group.
    fn cell_offset(self) -> Option<usize> {
        match self {
            ReadGroup::CellA => Some(0),
            ReadGroup::CellB => Some(3),
            ReadGroup::CellC => Some(6),
            ReadGroup::CellD => Some(9),
            _ => None,
        }
    }
}

/// CRC outcome for one (chip, group) packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketValidity {
    Valid,
    Invalid,
    /// The chip has no data in this group (9-cell segment, group D); not an
    /// error and never counted as invalid.
    Skipped,
}

/// Result of one scheduler invocation.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupReadout {
    pub group: ReadGroup,
    pub codes: [[u16; registers::CODES_PER_GROUP]; NUM_SEGMENTS],
    pub validity: [PacketValidity; NUM_SEGMENTS],
}

/// Aggregated comms-fault counters for publication and the controller's
/// invalid-packet class.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PackFaultData {
    pub consecutive_invalid: [u16; NUM_SEGMENTS],
    pub max_consecutive_invalid: u16,
}

pub struct PackMonitor<SPI, CS, DELAY> {
    bus: Ltc6811Bus<SPI, CS, DELAY, NUM_SEGMENTS>,
    adc_mode: AdcMode,
    group: ReadGroup,
    cycle: u32,
    telemetry: PackTelemetry,
    consecutive_invalid: [u16; NUM_SEGMENTS],
    balance_command: [u16; NUM_SEGMENTS],
    conversion_ready_at: Instant,
    vuv: u16,
    vov: u16,
}

impl<SPI, CS, DELAY> PackMonitor<SPI, CS, DELAY>
where
    SPI: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(
        bus: Ltc6811Bus<SPI, CS, DELAY, NUM_SEGMENTS>,
        adc_mode: AdcMode,
        uv_threshold_volts: f32,
        ov_threshold_volts: f32,
    ) -> Self {
        Self {
            bus,
            adc_mode,
            group: ReadGroup::CellA,
            cycle: 0,
            telemetry: PackTelemetry::new(),
            consecutive_invalid: [0; NUM_SEGMENTS],
            balance_command: [0; NUM_SEGMENTS],
            conversion_ready_at: Instant::from_ticks(0),
            vuv: Config::vuv_from_volts(uv_threshold_volts),
            vov: Config::vov_from_volts(ov_threshold_volts),
        }
    }

    /// Discharge bitmaps to fold into the next config write.
    pub fn set_balance_command(&mut self, balance: [u16; NUM_SEGMENTS]) {
        self.balance_command = balance;
    }

    pub fn current_group(&self) -> ReadGroup {
        self.group
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Deadline after which in-flight conversions may be read. The outer
    /// scheduler's period must carry margin over the mode's conversion delay;
    /// nothing here blocks on it.
    pub fn conversion_ready_at(&self) -> Instant {
        self.conversion_ready_at
    }

    pub fn fault_data(&self) -> PackFaultData {
        PackFaultData {
            consecutive_invalid: self.consecutive_invalid,
            max_consecutive_invalid: self
                .consecutive_invalid
                .iter()
                .copied()
                .max()
                .unwrap_or(0),
        }
    }

    /// Folds the accumulated samples into a fresh snapshot.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry
            .snapshot(self.balance_command, self.fault_data().max_consecutive_invalid)
    }

    /// Performs the current group's operation across all chips, then advances
    /// the cycle. CRC or bus failures on one chip mark that packet invalid
    /// and move on; they never abort the sweep.
    pub async fn read_next_group(&mut self, now: Instant) -> GroupReadout {
        let group = self.group;

        if matches!(group, ReadGroup::CellA | ReadGroup::AuxA) {
            let _ = self.bus.wake_up_all().await;
            self.write_configs().await;
        }

        let mut readout = GroupReadout {
            group,
            codes: [[0; registers::CODES_PER_GROUP]; NUM_SEGMENTS],
            validity: [PacketValidity::Skipped; NUM_SEGMENTS],
        };

        for chip in 0..NUM_SEGMENTS {
            let seg = &SEGMENTS[chip];
            if group == ReadGroup::CellD && usize::from(seg.cell_count) <= 9 {
                continue;
            }

            match self.bus.read_register(chip, seg.address, group.command()).await {
                Ok(raw) => {
                    let codes = registers::decode_codes(&raw);
                    readout.codes[chip] = codes;
                    readout.validity[chip] = PacketValidity::Valid;
                    self.consecutive_invalid[chip] = 0;
                    self.apply(group, chip, &codes);
                }
                Err(_) => {
                    readout.validity[chip] = PacketValidity::Invalid;
                    self.consecutive_invalid[chip] =
                        self.consecutive_invalid[chip].saturating_add(1);
                }
            }
        }

        // conversions are started a full period ahead of the first read of
        // their results: aux after the last cell read, cells after the last
        // aux read
        match group {
            ReadGroup::CellD => {
                self.start_conversions(command::adax(self.adc_mode), now).await;
            }
            ReadGroup::AuxB => {
                self.start_conversions(command::adcv(self.adc_mode, true), now)
                    .await;
            }
            _ => {}
        }

        let (next, wrapped) = group.next();
        self.group = next;
        if wrapped {
            self.cycle = self.cycle.wrapping_add(1);
        }

        readout
    }

    async fn write_configs(&mut self) {
        for chip in 0..NUM_SEGMENTS {
            let seg = &SEGMENTS[chip];
            let cfg = Config {
                vuv: self.vuv,
                vov: self.vov,
                dcc: self.balance_command[chip] & 0x0FFF,
                ..Config::default()
            };
            if self
                .bus
                .write_register(chip, seg.address, Command::WriteConfigA, &cfg.pack())
                .await
                .is_err()
            {
                #[cfg(feature = "defmt")]
                defmt::warn!("config write failed on chip {}", chip);
            }
        }
    }

    async fn start_conversions(&mut self, code: u16, now: Instant) {
        for chip in 0..NUM_SEGMENTS {
            let _ = self
                .bus
                .start_conversion(chip, SEGMENTS[chip].address, code)
                .await;
        }
        self.conversion_ready_at = now + self.adc_mode.conversion_delay();
    }

    fn apply(&mut self, group: ReadGroup, chip: usize, codes: &[u16; 3]) {
        if let Some(offset) = group.cell_offset() {
            let cell_count = usize::from(SEGMENTS[chip].cell_count);
            for (k, &code) in codes.iter().enumerate() {
                let cell = offset + k;
                if cell < cell_count {
                    self.telemetry
                        .set_cell_voltage(chip, cell, registers::code_to_volts(code));
                }
            }
            return;
        }

        match group {
            ReadGroup::AuxA => {
                for (k, &code) in codes.iter().enumerate() {
                    self.telemetry
                        .set_cell_temp(chip, k, registers::thermistor_temp_from_code(code));
                }
            }
            ReadGroup::AuxB => {
                // GPIO4 is the fourth thermistor, GPIO5 the board sensor,
                // the third slot is VREF2 and is not telemetry
                self.telemetry
                    .set_cell_temp(chip, 3, registers::thermistor_temp_from_code(codes[0]));
                let gpio5 = match crate::config::SEGMENTS[chip].gpio5_kind {
                    crate::config::Gpio5Kind::BoardTemp => {
                        registers::board_temp_from_code(codes[1])
                    }
                    crate::config::Gpio5Kind::Humidity => {
                        registers::humidity_from_code(codes[1])
                    }
                };
                self.telemetry.set_gpio5(chip, gpio5);
            }
            _ => {}
        }
    }
}
