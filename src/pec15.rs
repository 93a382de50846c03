//! 15-bit packet error code used on every frame of the cell-monitor SPI link.
//!
//! Polynomial x^15 + x^14 + x^10 + x^8 + x^7 + x^4 + x^3 + 1, seed 16,
//! transmitted as a 16-bit word with a zero LSB appended. Must stay bit-exact
//! with the LTC6811 datasheet algorithm.

const CRC15_POLY: u16 = 0x4599;

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut remainder = (i as u16) << 7;
        let mut bit = 0;
        while bit < 8 {
            if remainder & 0x4000 != 0 {
                remainder = (remainder << 1) ^ CRC15_POLY;
            } else {
                remainder <<= 1;
            }
            bit += 1;
        }
        table[i as usize] = remainder;
        i += 1;
    }
    table
}

static PEC15_TABLE: [u16; 256] = build_table();

/// Computes the PEC over `data`, big-endian.
pub fn pec15(data: &[u8]) -> [u8; 2] {
    let mut remainder: u16 = 16;
    for &byte in data {
        let addr = (((remainder >> 7) ^ byte as u16) & 0xFF) as usize;
        remainder = (remainder << 8) ^ PEC15_TABLE[addr];
    }
    // the device pads a zero LSB onto the 15-bit remainder
    remainder.wrapping_mul(2).to_be_bytes()
}

/// True iff both PEC bytes match the recomputed value.
pub fn pec15_check(data: &[u8], pec: &[u8; 2]) -> bool {
    let computed = pec15(data);
    computed[0] == pec[0] && computed[1] == pec[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    // Bit-serial CRC15 straight from the datasheet shift-register diagram,
    // used as an independent reference for the table-driven version.
    fn pec15_serial(data: &[u8]) -> [u8; 2] {
        let mut rem: u16 = 16;
        for &byte in data {
            for bit in (0..8).rev() {
                let din = (byte >> bit) & 1;
                let in0 = din ^ ((rem >> 14) & 1) as u8;
                rem = (rem << 1) & 0x7FFF;
                if in0 != 0 {
                    rem ^= CRC15_POLY;
                }
            }
        }
        (rem << 1).to_be_bytes()
    }

    #[test]
    fn datasheet_reference_vector() {
        // WRCFGA command code 0x0001 -> PEC 0x3D6E
        assert_eq!(pec15(&[0x00, 0x01]), [0x3D, 0x6E]);
    }

    #[test]
    fn matches_serial_reference_for_command_codes() {
        for cmd in [
            0x0001u16, 0x0002, 0x0004, 0x0006, 0x0008, 0x000A, 0x000C, 0x000E, 0x0260,
            0x0460, 0x07FF,
        ] {
            let bytes = cmd.to_be_bytes();
            assert_eq!(pec15(&bytes), pec15_serial(&bytes), "cmd {cmd:#06x}");
        }
    }

    #[test]
    fn matches_serial_reference_for_payloads() {
        let payloads: [&[u8]; 4] = [
            &[0x00; 6],
            &[0xFF; 6],
            &[0xF8, 0x64, 0xE1, 0x3A, 0x00, 0x50],
            &[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x23],
        ];
        for payload in payloads {
            assert_eq!(pec15(payload), pec15_serial(payload));
        }
    }

    #[test]
    fn check_requires_both_bytes() {
        let data = [0x00, 0x01];
        let good = pec15(&data);
        assert!(pec15_check(&data, &good));
        assert!(!pec15_check(&data, &[good[0], good[1] ^ 0x01]));
        assert!(!pec15_check(&data, &[good[0] ^ 0x80, good[1]]));
        assert!(!pec15_check(&data, &[good[0] ^ 0x80, good[1] ^ 0x01]));
    }
}
