//! Register-group packing/unpacking and raw-code unit conversions.
//!
//! Every register group is 6 bytes on the wire. Cell-voltage and aux groups
//! carry three little-endian 16-bit codes in 100 uV units.

use libm::logf;

/// Bytes per register group, excluding the PEC.
pub const GROUP_LEN: usize = 6;
/// Codes per cell-voltage / aux group.
pub const CODES_PER_GROUP: usize = 3;

/// Volts represented by one raw ADC code.
pub const VOLTS_PER_CODE: f32 = 100e-6;

/// Configuration register group (CFGR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// GPIO1-5 pull-down disable bits.
    pub gpio_pulldown_off: u8,
    /// Keep the voltage reference powered between conversions.
    pub refon: bool,
    pub adcopt: bool,
    /// 12-bit undervoltage comparison code; threshold = (VUV+1)*16*100 uV.
    pub vuv: u16,
    /// 12-bit overvoltage comparison code; threshold = VOV*16*100 uV.
    pub vov: u16,
    /// Discharge-switch bitmap, cell 1 = bit 0.
    pub dcc: u16,
    /// 4-bit discharge timeout code.
    pub dcto: u8,
}

impl Config {
    pub fn pack(&self) -> [u8; GROUP_LEN] {
        [
            (self.gpio_pulldown_off & 0x1F) << 3
                | (self.refon as u8) << 2
                | self.adcopt as u8,
            (self.vuv & 0xFF) as u8,
            ((self.vov & 0x0F) << 4) as u8 | (self.vuv >> 8) as u8,
            (self.vov >> 4) as u8,
            (self.dcc & 0xFF) as u8,
            (self.dcto & 0x0F) << 4 | ((self.dcc >> 8) & 0x0F) as u8,
        ]
    }

    /// Comparison code for an undervoltage threshold in volts.
    pub fn vuv_from_volts(volts: f32) -> u16 {
        let code = volts / (16.0 * VOLTS_PER_CODE) - 1.0;
        ((code + 0.5) as u16).min(0x0FFF)
    }

    /// Comparison code for an overvoltage threshold in volts.
    pub fn vov_from_volts(volts: f32) -> u16 {
        let code = volts / (16.0 * VOLTS_PER_CODE);
        ((code + 0.5) as u16).min(0x0FFF)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gpio_pulldown_off: 0x1F,
            refon: true,
            adcopt: false,
            vuv: 0,
            vov: 0,
            dcc: 0,
            dcto: 0,
        }
    }
}

/// Splits a raw group into its three little-endian codes.
pub fn decode_codes(raw: &[u8; GROUP_LEN]) -> [u16; CODES_PER_GROUP] {
    [
        u16::from_le_bytes([raw[0], raw[1]]),
        u16::from_le_bytes([raw[2], raw[3]]),
        u16::from_le_bytes([raw[4], raw[5]]),
    ]
}

pub fn code_to_volts(code: u16) -> f32 {
    code as f32 * VOLTS_PER_CODE
}

/// Board temperature sensor on GPIO5 of even segments, degrees C.
pub fn board_temp_from_code(code: u16) -> f32 {
    -66.875 + 218.75 * (code as f32 / 50_000.0)
}

/// Humidity sensor on GPIO5 of odd segments, %RH.
pub fn humidity_from_code(code: u16) -> f32 {
    -12.5 + 125.0 * (code as f32 / 50_000.0)
}

const THERM_DIVIDER_OHMS: f32 = 2_740.0;
const THERM_NOMINAL_OHMS: f32 = 10_000.0;
const THERM_BETA: f32 = 3_984.0;
const KELVIN_AT_25C: f32 = 298.15;
const KELVIN_OFFSET: f32 = 273.15;

/// Cell thermistor on GPIO1-4, resistor divider into a beta model, degrees C.
pub fn thermistor_temp_from_code(code: u16) -> f32 {
    // out-of-range codes would divide by zero or take ln of a negative;
    // clamp instead, the controller debounce decides what is a fault
    let ratio = (code.max(1) as f32 / 50_000.0).min(0.999);
    let resistance = (THERM_DIVIDER_OHMS / ratio - THERM_DIVIDER_OHMS).max(1.0);
    let inv_kelvin =
        1.0 / KELVIN_AT_25C + logf(resistance / THERM_NOMINAL_OHMS) / THERM_BETA;
    1.0 / inv_kelvin - KELVIN_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_packs_datasheet_layout() {
        let cfg = Config {
            gpio_pulldown_off: 0x1F,
            refon: true,
            adcopt: false,
            vuv: Config::vuv_from_volts(3.0),
            vov: Config::vov_from_volts(4.2),
            dcc: 0x0A05,
            dcto: 0x6,
        };
        // VUV = 3.0/0.0016 - 1 = 1874 = 0x752, VOV = 4.2/0.0016 = 2625 = 0xA41
        assert_eq!(cfg.vuv, 0x752);
        assert_eq!(cfg.vov, 0xA41);
        let raw = cfg.pack();
        assert_eq!(raw[0], 0b1111_1100);
        assert_eq!(raw[1], 0x52);
        assert_eq!(raw[2], 0x17);
        assert_eq!(raw[3], 0xA4);
        assert_eq!(raw[4], 0x05);
        assert_eq!(raw[5], 0x6A);
    }

    #[test]
    fn threshold_codes_round_trip() {
        // decoded threshold must land within one LSB (1.6 mV) of the request
        let vuv = Config::vuv_from_volts(3.05);
        let back = (vuv + 1) as f32 * 16.0 * VOLTS_PER_CODE;
        assert!((back - 3.05).abs() < 0.0017, "got {back}");

        let vov = Config::vov_from_volts(4.2);
        let back = vov as f32 * 16.0 * VOLTS_PER_CODE;
        assert!((back - 4.2).abs() < 0.0017, "got {back}");
    }

    #[test]
    fn cell_codes_decode_little_endian() {
        // 10000 -> 1.0000 V, 36500 -> 3.65 V
        let raw = [0x10, 0x27, 0x94, 0x8E, 0xFF, 0xFF];
        let codes = decode_codes(&raw);
        assert_eq!(codes, [10_000, 36_500, 0xFFFF]);
        assert!((code_to_volts(codes[0]) - 1.0).abs() < 1e-6);
        assert!((code_to_volts(codes[1]) - 3.65).abs() < 1e-6);
    }

    #[test]
    fn board_sensor_conversions() {
        // midpoint code: -66.875 + 218.75/2 = 42.5 C, -12.5 + 125/2 = 50 %RH
        assert!((board_temp_from_code(25_000) - 42.5).abs() < 1e-3);
        assert!((humidity_from_code(25_000) - 50.0).abs() < 1e-3);
    }

    #[test]
    fn thermistor_nominal_point() {
        // at 10 kOhm the beta model sits at 25 C; divider ratio
        // 2740/12740 = 0.21507 of full scale
        let code = (0.215_07 * 50_000.0) as u16;
        let temp = thermistor_temp_from_code(code);
        assert!((temp - 25.0).abs() < 0.5, "got {temp}");
    }

    #[test]
    fn thermistor_tolerates_out_of_range_codes() {
        assert!(thermistor_temp_from_code(0).is_finite());
        assert!(thermistor_temp_from_code(u16::MAX).is_finite());
    }
}
