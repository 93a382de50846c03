//! Driver for the LTC6811 multicell battery monitor on a shared isoSPI bus.
//!
//! One chip-select line per segment; frames are addressed so every transaction
//! targets a single chip. All timing-sensitive waits live here: chip-select
//! settle, the post-wakeup ready time, nothing else. ADC conversion completion
//! is the caller's scheduling problem (see [`command::AdcMode::conversion_delay`]).

pub mod command;
pub mod registers;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::{delay::DelayNs, spi::SpiBus};

use crate::pec15::{pec15, pec15_check};
use command::{addressed_frame, Command};
use registers::GROUP_LEN;

/// Chip-select settle time before clocking the wakeup dummy byte.
const CS_SETTLE_US: u32 = 1;
/// Time from the last wakeup edge until the core is guaranteed ready.
const WAKE_READY_US: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<SpiE> {
    Spi(SpiE),
    /// Response PEC did not match; the packet is discarded, never retried
    /// inside the tick.
    Pec,
    Pin,
}

/// Transport over `N` daisy-addressed monitors sharing one SPI bus.
pub struct Ltc6811Bus<SPI, CS, DELAY, const N: usize> {
    spi: SPI,
    cs: [CS; N],
    delay: DELAY,
}

impl<SPI, CS, DELAY, const N: usize> Ltc6811Bus<SPI, CS, DELAY, N>
where
    SPI: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, cs: [CS; N], delay: DELAY) -> Self {
        Self { spi, cs, delay }
    }

    /// Wakes every chip from the idle/sleep state. A chip-select pulse with a
    /// dummy transfer wakes one core; the 400 us ready wait is taken once
    /// after the last pulse rather than per chip.
    pub async fn wake_up_all(&mut self) -> Result<(), Error<SPI::Error>> {
        for chip in 0..N {
            self.cs[chip].set_low().map_err(|_| Error::Pin)?;
            self.delay.delay_us(CS_SETTLE_US).await;
            self.spi.write(&[0xFF]).await.map_err(Error::Spi)?;
            self.spi.flush().await.map_err(Error::Spi)?;
            self.cs[chip].set_high().map_err(|_| Error::Pin)?;
        }
        self.delay.delay_us(WAKE_READY_US).await;
        Ok(())
    }

    /// Writes one 6-byte register group to the chip behind `cs[chip]` using
    /// device address `address`.
    pub async fn write_register(
        &mut self,
        chip: usize,
        address: u8,
        cmd: Command,
        data: &[u8; GROUP_LEN],
    ) -> Result<(), Error<SPI::Error>> {
        let cmd_frame = addressed_frame(cmd as u16, address);
        let data_pec = pec15(data);

        self.cs[chip].set_low().map_err(|_| Error::Pin)?;
        let result = async {
            self.spi.write(&cmd_frame).await.map_err(Error::Spi)?;
            self.spi.write(data).await.map_err(Error::Spi)?;
            self.spi.write(&data_pec).await.map_err(Error::Spi)?;
            self.spi.flush().await.map_err(Error::Spi)
        }
        .await;
        self.cs[chip].set_high().map_err(|_| Error::Pin)?;
        result
    }

    /// Reads one 6-byte register group. The chip's PEC is validated here;
    /// a mismatch yields `Error::Pec` and the payload is dropped.
    pub async fn read_register(
        &mut self,
        chip: usize,
        address: u8,
        cmd: Command,
    ) -> Result<[u8; GROUP_LEN], Error<SPI::Error>> {
        let cmd_frame = addressed_frame(cmd as u16, address);
        let mut response = [0u8; GROUP_LEN + 2];

        self.cs[chip].set_low().map_err(|_| Error::Pin)?;
        let result = async {
            self.spi.write(&cmd_frame).await.map_err(Error::Spi)?;
            self.spi.read(&mut response).await.map_err(Error::Spi)?;
            self.spi.flush().await.map_err(Error::Spi)
        }
        .await;
        self.cs[chip].set_high().map_err(|_| Error::Pin)?;
        result?;

        let (data, pec) = response.split_at(GROUP_LEN);
        if !pec15_check(data, &[pec[0], pec[1]]) {
            #[cfg(feature = "defmt")]
            defmt::warn!("pec mismatch on chip {}", chip);
            return Err(Error::Pec);
        }

        let mut group = [0u8; GROUP_LEN];
        group.copy_from_slice(data);
        Ok(group)
    }

    /// Issues a non-register command (conversion start). Results must not be
    /// read until the mode's conversion delay has elapsed.
    pub async fn start_conversion(
        &mut self,
        chip: usize,
        address: u8,
        code: u16,
    ) -> Result<(), Error<SPI::Error>> {
        let cmd_frame = addressed_frame(code, address);

        self.cs[chip].set_low().map_err(|_| Error::Pin)?;
        let result = async {
            self.spi.write(&cmd_frame).await.map_err(Error::Spi)?;
            self.spi.flush().await.map_err(Error::Spi)
        }
        .await;
        self.cs[chip].set_high().map_err(|_| Error::Pin)?;
        result
    }
}
