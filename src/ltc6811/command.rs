//! Command codes and addressed frame building for the LTC6811 cell monitor.

use embassy_time::Duration;

use crate::pec15::pec15;

/// 11-bit register access command codes.
#[repr(u16)]
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    WriteConfigA = 0x0001,
    ReadConfigA = 0x0002,
    ReadCellGroupA = 0x0004,
    ReadCellGroupB = 0x0006,
    ReadCellGroupC = 0x0008,
    ReadCellGroupD = 0x000A,
    ReadAuxGroupA = 0x000C,
    ReadAuxGroupB = 0x000E,
}

/// ADC conversion rate selection (MD bits). The variant order matches the
/// MD field encoding.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcMode {
    /// 422 Hz / 1 kHz with ADCOPT
    Slow422Hz = 0,
    /// 27 kHz / 14 kHz with ADCOPT
    Fast27kHz = 1,
    Normal7kHz = 2,
    Filtered26Hz = 3,
}

impl AdcMode {
    /// Worst-case time from conversion start until results may be read.
    /// Enforced by the caller's schedule, never by a blocking wait.
    pub fn conversion_delay(self) -> Duration {
        match self {
            AdcMode::Slow422Hz => Duration::from_millis(13),
            AdcMode::Fast27kHz => Duration::from_micros(1300),
            AdcMode::Normal7kHz => Duration::from_micros(3100),
            AdcMode::Filtered26Hz => Duration::from_millis(203),
        }
    }
}

const ADCV_BASE: u16 = 0x0260;
const ADAX_BASE: u16 = 0x0460;

/// Start-cell-conversion code for all cells.
pub fn adcv(mode: AdcMode, discharge_permitted: bool) -> u16 {
    ADCV_BASE | ((mode as u16) << 7) | ((discharge_permitted as u16) << 4)
}

/// Start-GPIO-conversion code for all aux channels.
pub fn adax(mode: AdcMode) -> u16 {
    ADAX_BASE | ((mode as u16) << 7)
}

/// Two-byte addressed command: `0x80 | addr[3:0]<<3 | cmd[10:8]`, then
/// `cmd[7:0]`.
pub fn addressed(code: u16, address: u8) -> [u8; 2] {
    [
        0x80 | ((address & 0x0F) << 3) | ((code >> 8) as u8 & 0x07),
        code as u8,
    ]
}

/// Addressed command with its PEC appended, ready for the wire.
pub fn addressed_frame(code: u16, address: u8) -> [u8; 4] {
    let cmd = addressed(code, address);
    let pec = pec15(&cmd);
    [cmd[0], cmd[1], pec[0], pec[1]]
}
