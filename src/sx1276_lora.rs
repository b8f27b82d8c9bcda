use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::Mode;
use log::{debug, trace, warn};

pub mod register;
use register::{irq, modem_status, Field, Register};

use crate::bandplan::BandPlan;
use crate::bandplan::TxCaps;
use crate::duty::DutyWindow;
use crate::time::MonotonicClock;

/// Provides the necessary SPI mode configuration for the radio.
pub const MODE: Mode = embedded_hal::spi::MODE_0;

/// Longest time any poll loop waits before giving up, in milliseconds.
pub const TIMEOUT_DEFAULT: u64 = 5000;

const FREQ_MIN_HZ: u32 = 137_000_000;
const FREQ_MAX_HZ: u32 = 1_020_000_000;

// Frequency synthesizer step: 32 MHz reference / 2^19 = 61.035 Hz per LSB.
const FSTEP_MILLIHZ: u64 = 61_035;

const BANDWIDTHS_HZ: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Provides high-level access to a Semtech SX1276 board in LoRa mode.
///
/// The driver owns the SPI bus, the chip-select and reset pins and a
/// monotonic clock; the millisecond sleeps of the blocking operations are
/// passed in per call. It is not reentrant and must not be shared between
/// threads without external serialization.
pub struct LoRa<SPI, CS, RESET, CLK> {
    spi: SPI,
    cs: CS,
    reset: RESET,
    clock: CLK,
    plan: BandPlan,
    caps: TxCaps,
    tx_holdoff: u16,
    duty: DutyWindow,
    hold_until: u64,
}

#[derive(Debug)]
pub enum Error<SPI, CS, RESET> {
    /// The SPI bus returned an error.
    Spi(SPI),
    /// The chip-select pin returned an error.
    Cs(CS),
    /// The reset pin returned an error.
    Reset(RESET),
    /// The modem did not read back Standby after a hardware reset.
    ResetFailure,
    /// Out-of-domain bandwidth or frequency; state unchanged.
    InvalidArgument,
    /// Transmit payload empty or longer than 255 bytes.
    InputTooLong,
    /// The current frequency has no permitted TX sub-band.
    OutOfBand,
    /// The current bandwidth exceeds the band-plan cap.
    BandwidthDisallowed,
    /// Transmit attempted before the post-transmit quiet period expired.
    HoldoffActive,
    /// Transmit would push the rolling-hour airtime over quota.
    QuotaExceeded,
    /// A received packet was longer than the caller's buffer, which holds
    /// the leading bytes.
    BufferOverflow,
    /// The silicon never signalled Tx-done.
    Timeout,
}

use Error::*;

/// Antenna output the power amplifier drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaOutput {
    /// RFO_LF/HF pin, -3..=14 dBm.
    Rfo = 0,
    /// PA_BOOST pin, 2..=17 dBm. Use this for RFM95 boards.
    PaBoost = 1,
}

/// Operating modes of the modem and their register values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioMode {
    Sleep = 0x00,
    Stdby = 0x01,
    FsTx = 0x02,
    Tx = 0x03,
    FsRx = 0x04,
    RxContinuous = 0x05,
    RxSingle = 0x06,
    Cad = 0x07,
}

impl RadioMode {
    fn from_bits(bits: u8) -> RadioMode {
        match bits & 0x07 {
            0x00 => RadioMode::Sleep,
            0x01 => RadioMode::Stdby,
            0x02 => RadioMode::FsTx,
            0x03 => RadioMode::Tx,
            0x04 => RadioMode::FsRx,
            0x05 => RadioMode::RxContinuous,
            0x06 => RadioMode::RxSingle,
            _ => RadioMode::Cad,
        }
    }
}

macro_rules! rw_fields {
    ($($get:ident, $set:ident => $field:expr;)*) => {
        $(
            pub fn $get(&mut self) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
                self.read_field($field)
            }

            pub fn $set(&mut self, value: u8) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
                self.write_field($field, value)
            }
        )*
    };
}

macro_rules! ro_fields {
    ($($get:ident => $field:expr;)*) => {
        $(
            pub fn $get(&mut self) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
                self.read_field($field)
            }
        )*
    };
}

impl<SPI, CS, RESET, CLK, E> LoRa<SPI, CS, RESET, CLK>
where
    SPI: Transfer<u8, Error = E>,
    CS: OutputPin,
    RESET: OutputPin,
    CLK: MonotonicClock,
{
    /// Builds and returns a new instance of the radio. Only one instance
    /// should exist at a time. This performs a hardware reset of the
    /// module; call [`init`](LoRa::init) before any other operation.
    pub fn new<DELAY: DelayMs<u8>>(
        spi: SPI,
        cs: CS,
        reset: RESET,
        clock: CLK,
        delay: &mut DELAY,
    ) -> Result<Self, Error<E, CS::Error, RESET::Error>> {
        let mut sx1276 = LoRa {
            spi,
            cs,
            reset,
            clock,
            plan: BandPlan::None,
            caps: crate::bandplan::UNRESTRICTED,
            tx_holdoff: 0,
            duty: DutyWindow::new(0),
            hold_until: 0,
        };
        sx1276.cs.set_high().map_err(Cs)?;
        sx1276.hardware_reset(delay)?;
        Ok(sx1276)
    }

    /// Return ownership of the driver's component elements.
    pub fn decompose(self) -> (SPI, CS, RESET, CLK) {
        (self.spi, self.cs, self.reset, self.clock)
    }

    /// Resets the modem: a 10 ms active-low pulse, release, 10 ms settle,
    /// then a probe that the modem came back in Standby.
    pub fn hardware_reset<DELAY: DelayMs<u8>>(
        &mut self,
        delay: &mut DELAY,
    ) -> Result<(), Error<E, CS::Error, RESET::Error>> {
        self.reset.set_low().map_err(Reset)?;
        delay.delay_ms(10);
        self.reset.set_high().map_err(Reset)?;
        delay.delay_ms(10);
        if self.mode()? != RadioMode::Stdby {
            debug!("modem reset failure");
            return Err(ResetFailure);
        }
        Ok(())
    }

    /// Sets up the modem for LoRa operation and installs the band plan.
    ///
    /// With [`BandPlan::Eu868`] the frequency is tuned to 869.5 MHz (the
    /// centre of sub-band 54) and transmissions are gated by the sub-band
    /// limits of whatever frequency is current. With [`BandPlan::None`]
    /// the frequency is left at its factory default and only the hardware
    /// limits apply.
    pub fn init<DELAY: DelayMs<u8>>(
        &mut self,
        delay: &mut DELAY,
        pa_output: PaOutput,
        plan: BandPlan,
    ) -> Result<(), Error<E, CS::Error, RESET::Error>> {
        let now = self.clock.millis();
        self.duty = DutyWindow::new(now);
        self.hold_until = now;

        self.hardware_reset(delay)?;
        self.set_mode(RadioMode::Sleep)?;
        delay.delay_ms(10);
        self.set_long_range_mode(1)?;
        // Errata 2.3 (spurious reception): manual IF, offset for 125 kHz.
        self.set_automatic_if_on(0)?;
        self.set_if_freq_2(0x40)?;
        self.set_if_freq_1(0x00)?;
        delay.delay_ms(10);
        self.set_mode(RadioMode::Stdby)?;
        self.set_pa_select(pa_output as u8)?;

        self.plan = plan;
        self.tx_holdoff = plan.tx_holdoff();
        match plan {
            BandPlan::None => self.caps = crate::bandplan::UNRESTRICTED,
            BandPlan::Eu868 => {
                self.set_frequency(869_500_000)?;
            }
        }
        Ok(())
    }

    // --- Bus port -------------------------------------------------------

    fn read_register(&mut self, addr: u8) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
        self.cs.set_low().map_err(Cs)?;
        let mut buffer = [addr & 0x7f, 0];
        let transfer = self.spi.transfer(&mut buffer).map_err(Spi);
        self.cs.set_high().map_err(Cs)?;
        Ok(transfer?[1])
    }

    /// Writes a register byte, returning the byte the device shifted back
    /// during the data phase: its previous value.
    fn write_register(
        &mut self,
        addr: u8,
        byte: u8,
    ) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
        self.cs.set_low().map_err(Cs)?;
        let mut buffer = [addr | 0x80, byte];
        let transfer = self.spi.transfer(&mut buffer).map_err(Spi);
        self.cs.set_high().map_err(Cs)?;
        Ok(transfer?[1])
    }

    // --- Field codec ----------------------------------------------------

    /// Reads one named field out of its register.
    pub fn read_field(&mut self, field: Field) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
        let byte = self.read_register(field.reg.addr())?;
        Ok(field.extract(byte))
    }

    /// Writes one named field, leaving every other bit of the register
    /// untouched, and returns the field's previous value. Out-of-range
    /// values are truncated to the field width.
    pub fn write_field(
        &mut self,
        field: Field,
        value: u8,
    ) -> Result<u8, Error<E, CS::Error, RESET::Error>> {
        if field.width == 8 {
            return self.write_register(field.reg.addr(), value);
        }
        let byte = self.read_register(field.reg.addr())?;
        self.write_register(field.reg.addr(), field.insert(byte, value))?;
        Ok(field.extract(byte))
    }

    // --- Multi-register parameters, most-significant byte first ---------

    /// 24-bit carrier frequency word.
    pub fn frf(&mut self) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        let msb = self.read_register(Register::FrfMsb.addr())? as u32;
        let mid = self.read_register(Register::FrfMid.addr())? as u32;
        let lsb = self.read_register(Register::FrfLsb.addr())? as u32;
        Ok(msb << 16 | mid << 8 | lsb)
    }

    /// Writes the 24-bit carrier frequency word, returning the previous one.
    pub fn set_frf(&mut self, value: u32) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        let msb = self.write_register(Register::FrfMsb.addr(), (value >> 16) as u8)? as u32;
        let mid = self.write_register(Register::FrfMid.addr(), (value >> 8) as u8)? as u32;
        let lsb = self.write_register(Register::FrfLsb.addr(), value as u8)? as u32;
        Ok(msb << 16 | mid << 8 | lsb)
    }

    pub fn preamble_length(&mut self) -> Result<u16, Error<E, CS::Error, RESET::Error>> {
        let msb = self.read_register(Register::PreambleMsb.addr())? as u16;
        let lsb = self.read_register(Register::PreambleLsb.addr())? as u16;
        Ok(msb << 8 | lsb)
    }

    pub fn set_preamble_length(
        &mut self,
        length: u16,
    ) -> Result<u16, Error<E, CS::Error, RESET::Error>> {
        let msb = self.write_register(Register::PreambleMsb.addr(), (length >> 8) as u8)? as u16;
        let lsb = self.write_register(Register::PreambleLsb.addr(), length as u8)? as u16;
        Ok(msb << 8 | lsb)
    }

    /// 10-bit RX single-mode symbol timeout, split between the low bits of
    /// RegModemConfig2 and RegSymbTimeoutLsb.
    pub fn symb_timeout(&mut self) -> Result<u16, Error<E, CS::Error, RESET::Error>> {
        let msb = self.read_field(register::SYMB_TIMEOUT_MSB)? as u16;
        let lsb = self.read_register(Register::SymbTimeoutLsb.addr())? as u16;
        Ok(msb << 8 | lsb)
    }

    /// Writes the 10-bit symbol timeout, returning the previous value.
    pub fn set_symb_timeout(
        &mut self,
        value: u16,
    ) -> Result<u16, Error<E, CS::Error, RESET::Error>> {
        let msb = self.write_field(register::SYMB_TIMEOUT_MSB, (value >> 8) as u8)? as u16;
        let lsb = self.write_register(Register::SymbTimeoutLsb.addr(), value as u8)? as u16;
        Ok(msb << 8 | lsb)
    }

    /// Raw 20-bit frequency-error word of the last received packet.
    pub fn freq_error(&mut self) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        let msb = self.read_field(register::FEI_MSB)? as u32;
        let mid = self.read_register(Register::FeiMid.addr())? as u32;
        let lsb = self.read_register(Register::FeiLsb.addr())? as u32;
        Ok(msb << 16 | mid << 8 | lsb)
    }

    pub fn valid_header_cnt(&mut self) -> Result<u16, Error<E, CS::Error, RESET::Error>> {
        let msb = self.read_register(Register::RxHeaderCntValueMsb.addr())? as u16;
        let lsb = self.read_register(Register::RxHeaderCntValueLsb.addr())? as u16;
        Ok(msb << 8 | lsb)
    }

    pub fn valid_packet_cnt(&mut self) -> Result<u16, Error<E, CS::Error, RESET::Error>> {
        let msb = self.read_register(Register::RxPacketCntValueMsb.addr())? as u16;
        let lsb = self.read_register(Register::RxPacketCntValueLsb.addr())? as u16;
        Ok(msb << 8 | lsb)
    }

    // --- Named field accessors ------------------------------------------
    //
    // One getter and one setter per documented LoRa-mode parameter; the
    // setters return the previous field value, which callers use for
    // save/restore around transient overrides.

    rw_fields! {
        fifo, set_fifo => register::FIFO;
        long_range_mode, set_long_range_mode => register::LONG_RANGE_MODE;
        access_shared_reg, set_access_shared_reg => register::ACCESS_SHARED_REG;
        low_frequency_mode_on, set_low_frequency_mode_on => register::LOW_FREQUENCY_MODE_ON;
        pa_select, set_pa_select => register::PA_SELECT;
        max_power, set_max_power => register::MAX_POWER;
        output_power, set_output_power => register::OUTPUT_POWER;
        pa_ramp, set_pa_ramp => register::PA_RAMP;
        ocp_on, set_ocp_on => register::OCP_ON;
        ocp_trim, set_ocp_trim => register::OCP_TRIM;
        lna_gain, set_lna_gain => register::LNA_GAIN;
        lna_boost_lf, set_lna_boost_lf => register::LNA_BOOST_LF;
        lna_boost_hf, set_lna_boost_hf => register::LNA_BOOST_HF;
        fifo_addr_ptr, set_fifo_addr_ptr => register::FIFO_ADDR_PTR;
        fifo_tx_base_addr, set_fifo_tx_base_addr => register::FIFO_TX_BASE_ADDR;
        fifo_rx_base_addr, set_fifo_rx_base_addr => register::FIFO_RX_BASE_ADDR;
        rx_timeout_mask, set_rx_timeout_mask => register::RX_TIMEOUT_MASK;
        rx_done_mask, set_rx_done_mask => register::RX_DONE_MASK;
        payload_crc_error_mask, set_payload_crc_error_mask => register::PAYLOAD_CRC_ERROR_MASK;
        valid_header_mask, set_valid_header_mask => register::VALID_HEADER_MASK;
        tx_done_mask, set_tx_done_mask => register::TX_DONE_MASK;
        cad_done_mask, set_cad_done_mask => register::CAD_DONE_MASK;
        fhss_change_channel_mask, set_fhss_change_channel_mask => register::FHSS_CHANGE_CHANNEL_MASK;
        cad_detected_mask, set_cad_detected_mask => register::CAD_DETECTED_MASK;
        rx_timeout, set_rx_timeout => register::RX_TIMEOUT;
        rx_done, set_rx_done => register::RX_DONE;
        payload_crc_error, set_payload_crc_error => register::PAYLOAD_CRC_ERROR;
        valid_header, set_valid_header => register::VALID_HEADER;
        tx_done, set_tx_done => register::TX_DONE;
        cad_done, set_cad_done => register::CAD_DONE;
        fhss_change_channel, set_fhss_change_channel => register::FHSS_CHANGE_CHANNEL;
        cad_detected, set_cad_detected => register::CAD_DETECTED;
        bw, set_bw => register::BW;
        coding_rate, set_coding_rate => register::CODING_RATE;
        implicit_header_mode_on, set_implicit_header_mode_on => register::IMPLICIT_HEADER_MODE_ON;
        spreading_factor, set_spreading_factor => register::SPREADING_FACTOR;
        tx_continuous_mode, set_tx_continuous_mode => register::TX_CONTINUOUS_MODE;
        rx_payload_crc_on, set_rx_payload_crc_on => register::RX_PAYLOAD_CRC_ON;
        payload_length, set_payload_length => register::PAYLOAD_LENGTH;
        payload_max_length, set_payload_max_length => register::MAX_PAYLOAD_LENGTH;
        freq_hopping_period, set_freq_hopping_period => register::HOP_PERIOD;
        low_data_rate_optimize, set_low_data_rate_optimize => register::LOW_DATA_RATE_OPTIMIZE;
        agc_auto_on, set_agc_auto_on => register::AGC_AUTO_ON;
        ppm_correction, set_ppm_correction => register::PPM_CORRECTION;
        if_freq_2, set_if_freq_2 => register::IF_FREQ_2;
        if_freq_1, set_if_freq_1 => register::IF_FREQ_1;
        automatic_if_on, set_automatic_if_on => register::AUTOMATIC_IF_ON;
        detection_optimize, set_detection_optimize => register::DETECTION_OPTIMIZE;
        invert_iq_rx, set_invert_iq_rx => register::INVERT_IQ_RX;
        invert_iq_tx, set_invert_iq_tx => register::INVERT_IQ_TX;
        high_bw_optimize_1, set_high_bw_optimize_1 => register::HIGH_BW_OPTIMIZE_1;
        detection_threshold, set_detection_threshold => register::DETECTION_THRESHOLD;
        sync_word, set_sync_word => register::SYNC_WORD;
        high_bw_optimize_2, set_high_bw_optimize_2 => register::HIGH_BW_OPTIMIZE_2;
        invert_iq2, set_invert_iq2 => register::INVERT_IQ2;
        dio0_mapping, set_dio0_mapping => register::DIO0_MAPPING;
        dio1_mapping, set_dio1_mapping => register::DIO1_MAPPING;
        dio2_mapping, set_dio2_mapping => register::DIO2_MAPPING;
        dio3_mapping, set_dio3_mapping => register::DIO3_MAPPING;
        dio4_mapping, set_dio4_mapping => register::DIO4_MAPPING;
        dio5_mapping, set_dio5_mapping => register::DIO5_MAPPING;
        pa_dac, set_pa_dac => register::PA_DAC;
        agc_reference_level, set_agc_reference_level => register::AGC_REFERENCE_LEVEL;
        agc_step1, set_agc_step1 => register::AGC_STEP1;
        agc_step2, set_agc_step2 => register::AGC_STEP2;
        agc_step3, set_agc_step3 => register::AGC_STEP3;
        agc_step4, set_agc_step4 => register::AGC_STEP4;
        agc_step5, set_agc_step5 => register::AGC_STEP5;
        pll_bandwidth, set_pll_bandwidth => register::PLL_BANDWIDTH;
    }

    ro_fields! {
        fifo_rx_current_addr => register::FIFO_RX_CURRENT_ADDR;
        fifo_rx_bytes_nb => register::RX_NB_BYTES;
        fifo_rx_byte_addr_ptr => register::FIFO_RX_BYTE_ADDR;
        pll_timeout => register::PLL_TIMEOUT;
        crc_on_payload => register::CRC_ON_PAYLOAD;
        fhss_present_channel => register::FHSS_PRESENT_CHANNEL;
        rx_coding_rate => register::RX_CODING_RATE;
        modem_status => register::MODEM_STATUS;
        packet_snr => register::PKT_SNR_VALUE;
        packet_rssi => register::PKT_RSSI_VALUE;
        rssi => register::RSSI_VALUE;
        rssi_wideband => register::RSSI_WIDEBAND;
        version => register::VERSION;
        former_temp => register::FORMER_TEMP;
    }

    // --- Mode machine ---------------------------------------------------

    /// Sets the operating mode of the modem. Enter Tx, RxContinuous or
    /// Cad only from Standby.
    pub fn set_mode(
        &mut self,
        mode: RadioMode,
    ) -> Result<(), Error<E, CS::Error, RESET::Error>> {
        trace!("mode -> {:?}", mode);
        self.write_field(register::MODE, mode as u8)?;
        Ok(())
    }

    /// Reads the operating mode back from the modem.
    pub fn mode(&mut self) -> Result<RadioMode, Error<E, CS::Error, RESET::Error>> {
        Ok(RadioMode::from_bits(self.read_field(register::MODE)?))
    }

    /// Clears all IRQ flags.
    pub fn clear_irq_flags(&mut self) -> Result<(), Error<E, CS::Error, RESET::Error>> {
        self.clear_irq(irq::ALL)
    }

    // A plain flag-byte write: the register clears on 1s, so going through
    // the read-modify-write path would also clear other pending flags.
    fn clear_irq(&mut self, bits: u8) -> Result<(), Error<E, CS::Error, RESET::Error>> {
        self.write_register(Register::IrqFlags.addr(), bits)?;
        Ok(())
    }

    // --- Frequency and band plan ----------------------------------------

    /// Returns the carrier frequency in Hz.
    pub fn frequency(&mut self) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        let frf = self.frf()? as u64;
        Ok((frf * FSTEP_MILLIHZ / 1000) as u32)
    }

    /// Tunes the carrier and returns the previous frequency in Hz.
    ///
    /// Valid range is 137 MHz to 1020 MHz (hardware limit); out-of-range
    /// values fail with [`Error::InvalidArgument`] and change nothing. If
    /// a band plan is enabled, the power ceiling, bandwidth ceiling and
    /// duty-cycle quota are re-derived from the sub-band containing the
    /// new frequency, and transmission is prohibited in the gaps between
    /// sub-bands. The low-frequency-mode flag follows the datasheet
    /// bands: set below 525 MHz, cleared above 779 MHz, held in between.
    pub fn set_frequency(
        &mut self,
        hz: u32,
    ) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        if !(FREQ_MIN_HZ..=FREQ_MAX_HZ).contains(&hz) {
            debug!("frequency {} Hz out of range", hz);
            return Err(InvalidArgument);
        }
        let previous = self.frequency()?;
        self.caps = self.plan.caps_for(hz);
        self.set_frf(((hz as u64 * 1000 + FSTEP_MILLIHZ / 2) / FSTEP_MILLIHZ) as u32)?;
        if hz < 525_000_000 {
            self.set_low_frequency_mode_on(1)?;
        } else if hz > 779_000_000 {
            self.set_low_frequency_mode_on(0)?;
        }
        Ok(previous)
    }

    // --- Power ----------------------------------------------------------

    /// Returns the output power setting in dBm.
    pub fn power_dbm(&mut self) -> Result<i8, Error<E, CS::Error, RESET::Error>> {
        let output_power = self.output_power()? as i32;
        let tenths = if self.pa_select()? == 1 {
            10 * (17 - (15 - output_power))
        } else {
            // Pmax = 10.8 + 0.6 * MaxPower dBm, in tenths to stay integral
            let max_power = self.max_power()? as i32;
            108 + 6 * max_power - 10 * (15 - output_power)
        };
        Ok(round_tenths(tenths))
    }

    /// Sets the output power in dBm and returns the previous setting.
    ///
    /// The accepted range depends on the PA selection: 2..=17 on PA_BOOST,
    /// -3..=14 on RFO. Values outside are clamped, not rejected.
    pub fn set_power_dbm(&mut self, dbm: i8) -> Result<i8, Error<E, CS::Error, RESET::Error>> {
        let previous = self.power_dbm()?;
        if self.pa_dac()? != 0x04 {
            // ensure the +20 dBm option stays disabled
            self.set_pa_dac(0x04)?;
        }
        if self.pa_select()? == 1 {
            let dbm = dbm.clamp(2, 17);
            self.set_output_power((dbm + 15 - 17) as u8)?;
        } else {
            let dbm = dbm.clamp(-3, 14);
            if dbm < 0 {
                self.set_max_power(2)?;
                self.set_output_power((dbm + 3) as u8)?;
            } else {
                self.set_max_power(7)?;
                self.set_output_power(dbm as u8)?;
            }
        }
        Ok(previous)
    }

    // --- Bandwidth ------------------------------------------------------

    /// Returns the signal bandwidth in Hz.
    pub fn bandwidth_hz(&mut self) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        let index = self.bw()? as usize;
        BANDWIDTHS_HZ.get(index).copied().ok_or(InvalidArgument)
    }

    /// Sets the signal bandwidth in Hz and returns the previous setting.
    ///
    /// Accepted values are exactly 7800, 10400, 15600, 20800, 31250,
    /// 41700, 62500, 125000, 250000 and 500000; anything else fails with
    /// [`Error::InvalidArgument`] and changes nothing.
    pub fn set_bandwidth_hz(
        &mut self,
        hz: u32,
    ) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        let index = match BANDWIDTHS_HZ.iter().position(|&b| b == hz) {
            Some(index) => index as u8,
            None => {
                debug!("invalid bandwidth {} Hz", hz);
                return Err(InvalidArgument);
            }
        };
        let previous = self.bandwidth_hz()?;
        self.set_bw(index)?;
        // Errata 2.3: IF offset per bandwidth, automatic IF only at 500 kHz.
        if index == 0 {
            self.set_automatic_if_on(0)?;
            self.set_if_freq_2(0x48)?;
            self.set_if_freq_1(0x00)?;
        } else if index < 6 {
            self.set_automatic_if_on(0)?;
            self.set_if_freq_2(0x44)?;
            self.set_if_freq_1(0x00)?;
        } else if index < 9 {
            self.set_automatic_if_on(0)?;
            self.set_if_freq_2(0x40)?;
            self.set_if_freq_1(0x00)?;
        } else {
            self.set_automatic_if_on(1)?;
        }
        Ok(previous)
    }

    // --- Header and CRC wrappers ----------------------------------------

    pub fn implicit_header_mode(&mut self) -> Result<bool, Error<E, CS::Error, RESET::Error>> {
        Ok(self.implicit_header_mode_on()? != 0)
    }

    pub fn set_implicit_header_mode(
        &mut self,
        on: bool,
    ) -> Result<bool, Error<E, CS::Error, RESET::Error>> {
        Ok(self.set_implicit_header_mode_on(on as u8)? != 0)
    }

    pub fn payload_crc_on(&mut self) -> Result<bool, Error<E, CS::Error, RESET::Error>> {
        Ok(self.rx_payload_crc_on()? != 0)
    }

    pub fn set_payload_crc_on(
        &mut self,
        on: bool,
    ) -> Result<bool, Error<E, CS::Error, RESET::Error>> {
        Ok(self.set_rx_payload_crc_on(on as u8)? != 0)
    }

    // --- Transmit -------------------------------------------------------

    /// Transmits up to 255 bytes and returns the observed airtime in ms.
    ///
    /// Pre-flight, in order: payload length, band-plan frequency
    /// permission, bandwidth ceiling, post-transmit holdoff, duty-cycle
    /// quota. A power setting above the band-plan ceiling is reduced for
    /// the duration of the transmission and restored afterwards (a
    /// warning, not an error). The airtime is charged against the
    /// duty-cycle window and arms the holdoff for the next transmission.
    pub fn transmit<DELAY: DelayMs<u8>>(
        &mut self,
        data: &[u8],
        delay: &mut DELAY,
    ) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        if data.is_empty() || data.len() > 255 {
            debug!("tx data empty or too long");
            return Err(InputTooLong);
        }
        if self.caps.prohibited() {
            debug!("tx frequency not in band");
            return Err(OutOfBand);
        }
        if self.bw()? > self.caps.bw_limit {
            debug!("bw limit exceeded");
            return Err(BandwidthDisallowed);
        }
        let now = self.clock.millis();
        if now < self.hold_until {
            debug!("tx holdoff for another {} ms", self.hold_until - now);
            return Err(HoldoffActive);
        }
        let quota = self.caps.duty_quota_ms;
        if self.duty.check(now, quota).is_err() {
            debug!("tx time quota exceeded");
            return Err(QuotaExceeded);
        }

        let saved_power = self.power_dbm()?;
        if saved_power > self.caps.tx_power_limit {
            warn!(
                "tx power {} dBm exceeds limit of {} dBm, power reduced",
                saved_power, self.caps.tx_power_limit
            );
            self.set_power_dbm(self.caps.tx_power_limit)?;
        }

        let result = self.transmit_inner(data, delay);
        let restore = self.set_power_dbm(saved_power).map(|_| ());
        let standby = self.set_mode(RadioMode::Stdby);
        match restore.and(standby) {
            Ok(()) => result,
            Err(e) => result.and(Err(e)),
        }
    }

    fn transmit_inner<DELAY: DelayMs<u8>>(
        &mut self,
        data: &[u8],
        delay: &mut DELAY,
    ) -> Result<u32, Error<E, CS::Error, RESET::Error>> {
        self.set_mode(RadioMode::Stdby)?;
        self.set_payload_length(data.len() as u8)?;
        let tx_base = self.fifo_tx_base_addr()?;
        self.set_fifo_addr_ptr(tx_base)?;
        for &byte in data {
            self.set_fifo(byte)?;
        }
        self.clear_irq_flags()?;
        let t0 = self.clock.millis();
        self.set_mode(RadioMode::Tx)?;
        debug!("txing {} bytes..", data.len());

        let mut done = false;
        while self.clock.millis() - t0 < TIMEOUT_DEFAULT {
            if self.tx_done()? != 0 {
                done = true;
                break;
            }
            delay.delay_ms(10);
        }

        let now = self.clock.millis();
        let airtime = (now - t0) as u32;
        self.duty.record(now, airtime);
        self.hold_until = now + airtime as u64 * self.tx_holdoff as u64;
        self.clear_irq(irq::TX_DONE)?;
        if !done {
            debug!("tx done never signalled");
            return Err(Timeout);
        }
        debug!("tx done in {} ms", airtime);
        Ok(airtime)
    }

    // --- Receive --------------------------------------------------------

    /// Receives into `buffer`, waiting up to `timeout_ms` (0 waits
    /// forever). Returns the packet length, or 0 on timeout. While the
    /// modem reports a signal being detected, the deadline is pushed out
    /// so a packet already in the air is not cut off. If the packet is
    /// longer than `buffer`, the leading bytes are written and the call
    /// fails with [`Error::BufferOverflow`]. The modem is returned to
    /// Standby on every exit.
    pub fn receive_continuous<DELAY: DelayMs<u8>>(
        &mut self,
        buffer: &mut [u8],
        timeout_ms: u32,
        delay: &mut DELAY,
    ) -> Result<usize, Error<E, CS::Error, RESET::Error>> {
        let result = self.receive_inner(buffer, timeout_ms, delay);
        match self.set_mode(RadioMode::Stdby) {
            Ok(()) => result,
            Err(e) => result.and(Err(e)),
        }
    }

    fn receive_inner<DELAY: DelayMs<u8>>(
        &mut self,
        buffer: &mut [u8],
        timeout_ms: u32,
        delay: &mut DELAY,
    ) -> Result<usize, Error<E, CS::Error, RESET::Error>> {
        self.set_mode(RadioMode::Stdby)?;
        let rx_base = self.fifo_rx_base_addr()?;
        self.set_fifo_addr_ptr(rx_base)?;
        self.clear_irq_flags()?;
        self.set_mode(RadioMode::RxContinuous)?;
        debug!("rxing..");

        let mut deadline = self.clock.millis() + timeout_ms as u64;
        loop {
            if self.rx_done()? != 0 {
                break;
            }
            if timeout_ms != 0 && self.clock.millis() >= deadline {
                debug!("normal rx timeout");
                if self.rx_timeout()? != 0 {
                    trace!("rx timeout flag");
                }
                return Ok(0);
            }
            let status = self.modem_status()?;
            if status & modem_status::SIGNAL_DETECTED != 0 {
                trace!("sig detected..");
                deadline += 4;
            }
            if status & modem_status::SIGNAL_SYNCED != 0 {
                trace!("sig synced..");
            }
            if status & modem_status::RX_ONGOING != 0 {
                trace!("rx ongoing..");
            }
            if status & modem_status::HEADER_INFO_VALID != 0 {
                trace!("header info valid..");
            }
            delay.delay_ms(3);
        }

        if self.payload_crc_error()? != 0 {
            trace!("payload crc error");
        }
        let rx_bytes = self.fifo_rx_bytes_nb()? as usize;
        let rx_address = self.fifo_rx_current_addr()?;
        self.set_fifo_addr_ptr(rx_address)?;
        let count = rx_bytes.min(buffer.len());
        for slot in buffer.iter_mut().take(count) {
            *slot = self.fifo()?;
        }
        if rx_bytes > buffer.len() {
            debug!("rx packet of {} bytes exceeds the {} byte buffer", rx_bytes, buffer.len());
            return Err(BufferOverflow);
        }
        debug!("rx success, {} bytes", rx_bytes);
        Ok(rx_bytes)
    }

    /// Arms continuous receive without blocking: the FIFO pointer is
    /// rewound, DIO0 is mapped to RxDone and the modem is left in
    /// ContinuousReceive. Poll with [`receive_read`](LoRa::receive_read)
    /// (or on the DIO0 edge); leave the mode with
    /// [`set_mode`](LoRa::set_mode).
    pub fn receive_start(&mut self) -> Result<(), Error<E, CS::Error, RESET::Error>> {
        self.set_mode(RadioMode::Stdby)?;
        let rx_base = self.fifo_rx_base_addr()?;
        self.set_fifo_addr_ptr(rx_base)?;
        self.set_dio0_mapping(0x00)?;
        self.clear_irq_flags()?;
        self.set_mode(RadioMode::RxContinuous)?;
        debug!("rxing continuously..");
        Ok(())
    }

    /// Pops a pending packet after [`receive_start`](LoRa::receive_start),
    /// or `None` if nothing has arrived yet. The modem stays in
    /// ContinuousReceive.
    pub fn receive_read(
        &mut self,
    ) -> Result<Option<heapless::Vec<u8, 255>>, Error<E, CS::Error, RESET::Error>> {
        if self.rx_done()? == 0 {
            return Ok(None);
        }
        self.clear_irq_flags()?;
        let rx_bytes = self.fifo_rx_bytes_nb()? as usize;
        let rx_address = self.fifo_rx_current_addr()?;
        self.set_fifo_addr_ptr(rx_address)?;
        let mut packet = heapless::Vec::new();
        for _ in 0..rx_bytes.min(255) {
            // cannot overflow, capacity matches the FIFO byte counter
            packet.push(self.fifo()?).ok();
        }
        Ok(Some(packet))
    }

    // --- Channel activity detection -------------------------------------

    /// Watches the channel for activity for up to `timeout_ms`. When
    /// activity is detected, one receive attempt decodes it into `buffer`
    /// and its result is returned; each completed detection cycle
    /// re-triggers another until the deadline. Returns 0 if the deadline
    /// passes quietly.
    pub fn cad<DELAY: DelayMs<u8>>(
        &mut self,
        buffer: &mut [u8],
        timeout_ms: u32,
        delay: &mut DELAY,
    ) -> Result<usize, Error<E, CS::Error, RESET::Error>> {
        let deadline = self.clock.millis() + timeout_ms as u64;
        let result = self.cad_inner(buffer, deadline, delay);
        let flags = self.clear_irq_flags();
        let standby = self.set_mode(RadioMode::Stdby);
        match flags.and(standby) {
            Ok(()) => result,
            Err(e) => result.and(Err(e)),
        }
    }

    fn cad_inner<DELAY: DelayMs<u8>>(
        &mut self,
        buffer: &mut [u8],
        deadline: u64,
        delay: &mut DELAY,
    ) -> Result<usize, Error<E, CS::Error, RESET::Error>> {
        self.set_mode(RadioMode::Stdby)?;
        self.clear_irq_flags()?;
        self.set_mode(RadioMode::Cad)?;
        debug!("cad..");
        let mut cycles = 0u32;
        while self.clock.millis() < deadline {
            if self.cad_detected()? != 0 {
                debug!("cad detected after {} cycles", cycles);
                self.clear_irq_flags()?;
                return self.receive_continuous(buffer, TIMEOUT_DEFAULT as u32, delay);
            } else if self.cad_done()? != 0 {
                cycles += 1;
                self.clear_irq(irq::CAD_DONE)?;
                self.set_mode(RadioMode::Cad)?;
            } else {
                delay.delay_ms(3);
            }
        }
        debug!("end cad, {} cycles", cycles);
        Ok(0)
    }
}

fn round_tenths(tenths: i32) -> i8 {
    if tenths >= 0 {
        ((tenths + 5) / 10) as i8
    } else {
        (-((-tenths + 5) / 10)) as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandplan::BandPlan;
    use crate::mock::{MockBus, MockClock, MockDelay, MockPin};
    use super::register::FIELDS;

    type TestRadio = LoRa<MockBus, MockPin, MockPin, MockClock>;

    fn radio() -> (TestRadio, MockBus, MockClock, MockDelay) {
        let clock = MockClock::new();
        let bus = MockBus::new(&clock);
        let mut delay = MockDelay::new(&clock);
        let radio = LoRa::new(bus.clone(), MockPin, MockPin, clock.clone(), &mut delay)
            .expect("reset probe");
        (radio, bus, clock, delay)
    }

    fn radio_with_plan(pa_output: PaOutput, plan: BandPlan) -> (TestRadio, MockBus, MockClock, MockDelay) {
        let (mut radio, bus, clock, mut delay) = radio();
        radio.init(&mut delay, pa_output, plan).unwrap();
        (radio, bus, clock, delay)
    }

    #[test]
    fn every_field_round_trips_and_preserves_neighbours() {
        let (mut radio, bus, _clock, _delay) = radio();
        for &(name, field) in FIELDS {
            let addr = field.reg.addr();
            bus.set_reg(addr, 0xa5);

            let previous = radio.write_field(field, 0x55).unwrap();
            assert_eq!(previous, field.extract(0xa5), "{} previous", name);
            assert_eq!(
                radio.read_field(field).unwrap(),
                0x55 & field.value_mask(),
                "{} value",
                name
            );
            assert_eq!(bus.reg(addr), field.insert(0xa5, 0x55), "{} neighbours", name);
        }
    }

    #[test]
    fn frequency_scaling_round_trips_within_one_step() {
        let (mut radio, bus, _clock, _delay) = radio();
        for hz in [137_000_000u32, 434_000_000, 868_000_000, 915_000_000, 1_020_000_000] {
            radio.set_frequency(hz).unwrap();
            let expected = ((hz as u64 * 1000 + 30_517) / 61_035) as u32;
            let stored = (bus.reg(0x06) as u32) << 16
                | (bus.reg(0x07) as u32) << 8
                | bus.reg(0x08) as u32;
            assert_eq!(stored, expected, "{} Hz", hz);

            let read_back = radio.frequency().unwrap();
            let diff = (read_back as i64 - hz as i64).abs();
            assert!(diff <= 61, "{} Hz read back as {} Hz", hz, read_back);
        }
    }

    #[test]
    fn set_frequency_rejects_out_of_range_without_touching_state() {
        let (mut radio, bus, _clock, _delay) = radio();
        let frf_before = [bus.reg(0x06), bus.reg(0x07), bus.reg(0x08)];
        assert!(matches!(radio.set_frequency(136_999_999), Err(Error::InvalidArgument)));
        assert!(matches!(radio.set_frequency(1_020_000_001), Err(Error::InvalidArgument)));
        assert_eq!([bus.reg(0x06), bus.reg(0x07), bus.reg(0x08)], frf_before);
    }

    #[test]
    fn low_frequency_mode_follows_the_band() {
        let (mut radio, _bus, _clock, _delay) = radio();
        radio.set_frequency(434_000_000).unwrap();
        assert_eq!(radio.low_frequency_mode_on().unwrap(), 1);
        radio.set_frequency(868_000_000).unwrap();
        assert_eq!(radio.low_frequency_mode_on().unwrap(), 0);
        // inside the 525..779 MHz gap the flag holds its value
        radio.set_frequency(600_000_000).unwrap();
        assert_eq!(radio.low_frequency_mode_on().unwrap(), 0);
    }

    #[test]
    fn reset_failure_when_the_probe_does_not_read_standby() {
        let clock = MockClock::new();
        let bus = MockBus::new(&clock);
        bus.set_reg(0x01, 0x00); // mode stuck in Sleep
        let mut delay = MockDelay::new(&clock);
        let result = LoRa::new(bus, MockPin, MockPin, clock, &mut delay);
        assert!(matches!(result, Err(Error::ResetFailure)));
    }

    #[test]
    fn symb_timeout_setter_returns_the_previous_ten_bit_value() {
        let (mut radio, _bus, _clock, _delay) = radio();
        assert_eq!(radio.symb_timeout().unwrap(), 0x64);
        assert_eq!(radio.set_symb_timeout(0x234).unwrap(), 0x64);
        assert_eq!(radio.symb_timeout().unwrap(), 0x234);
        // truncated to the 10-bit field, Standby bits of ModemConfig2 kept
        radio.set_symb_timeout(0x3ff).unwrap();
        assert_eq!(radio.symb_timeout().unwrap(), 0x3ff);
        assert_eq!(radio.spreading_factor().unwrap(), 0x07);
    }

    #[test]
    fn preamble_length_round_trips() {
        let (mut radio, _bus, _clock, _delay) = radio();
        assert_eq!(radio.preamble_length().unwrap(), 8);
        assert_eq!(radio.set_preamble_length(300).unwrap(), 8);
        assert_eq!(radio.preamble_length().unwrap(), 300);
    }

    #[test]
    fn bandwidth_accepts_only_the_documented_values() {
        let (mut radio, _bus, _clock, _delay) = radio();
        assert_eq!(radio.bandwidth_hz().unwrap(), 125_000);
        assert_eq!(radio.set_bandwidth_hz(20_800).unwrap(), 125_000);
        assert_eq!(radio.bandwidth_hz().unwrap(), 20_800);
        assert!(matches!(radio.set_bandwidth_hz(208_003), Err(Error::InvalidArgument)));
        assert!(matches!(radio.set_bandwidth_hz(100_000), Err(Error::InvalidArgument)));
        assert_eq!(radio.bandwidth_hz().unwrap(), 20_800);
    }

    #[test]
    fn power_clamps_to_the_pa_boost_range() {
        let (mut radio, _bus, _clock, _delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        radio.set_power_dbm(25).unwrap();
        assert_eq!(radio.power_dbm().unwrap(), 17);
        radio.set_power_dbm(-10).unwrap();
        assert_eq!(radio.power_dbm().unwrap(), 2);
    }

    #[test]
    fn power_clamps_to_the_rfo_range() {
        let (mut radio, _bus, _clock, _delay) = radio_with_plan(PaOutput::Rfo, BandPlan::None);
        radio.set_power_dbm(14).unwrap();
        assert_eq!(radio.power_dbm().unwrap(), 14);
        radio.set_power_dbm(-3).unwrap();
        assert_eq!(radio.power_dbm().unwrap(), -3);
        radio.set_power_dbm(20).unwrap();
        assert_eq!(radio.power_dbm().unwrap(), 14);
    }

    #[test]
    fn transmit_pushes_the_payload_through_the_fifo() {
        let (mut radio, bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        radio.set_frequency(868_000_000).unwrap();
        radio.set_spreading_factor(7).unwrap();

        let airtime = radio.transmit(b"hi", &mut delay).unwrap();
        assert!(airtime >= 3, "airtime {} ms", airtime);

        let tx_base = bus.reg(0x0e) as usize;
        assert_eq!(bus.fifo(tx_base, 2), &[0x68, 0x69]);
        assert_eq!(bus.reg(0x22), 2); // payload length
        assert_eq!(radio.mode().unwrap(), RadioMode::Stdby);
    }

    #[test]
    fn transmit_rejects_empty_and_oversized_payloads() {
        let (mut radio, _bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        assert!(matches!(radio.transmit(&[], &mut delay), Err(Error::InputTooLong)));
        let big = [0u8; 256];
        assert!(matches!(radio.transmit(&big, &mut delay), Err(Error::InputTooLong)));
    }

    #[test]
    fn transmit_out_of_band_in_a_guard_gap() {
        let (mut radio, _bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::Eu868);
        // 868.0 MHz falls between sub-bands 47 and 48
        radio.set_frequency(868_000_000).unwrap();
        assert!(matches!(radio.transmit(b"hi", &mut delay), Err(Error::OutOfBand)));
    }

    #[test]
    fn transmit_refuses_bandwidth_above_the_band_cap() {
        let (mut radio, _bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::Eu868);
        radio.set_frequency(869_500_000).unwrap();
        radio.set_bandwidth_hz(250_000).unwrap();
        assert!(matches!(radio.transmit(b"hi", &mut delay), Err(Error::BandwidthDisallowed)));
    }

    #[test]
    fn transmit_clamps_power_to_the_band_ceiling_and_restores_it() {
        let (mut radio, bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::Eu868);
        radio.set_frequency(866_000_000).unwrap(); // band 47, 14 dBm cap
        radio.set_power_dbm(17).unwrap();

        radio.transmit(b"hi", &mut delay).unwrap();
        assert_eq!(radio.power_dbm().unwrap(), 17);
        // the PaConfig writes during the transmission carried the clamped
        // level: 14 dBm on PA_BOOST is an OutputPower step of 12
        assert!(bus
            .writes()
            .iter()
            .any(|&(addr, value)| addr == 0x09 && value & 0x0f == 12));
    }

    #[test]
    fn post_hold_blocks_the_next_transmit_until_it_expires() {
        let (mut radio, bus, clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::Eu868);
        bus.set_tx_time(500);

        radio.transmit(b"hi", &mut delay).unwrap();
        let end = clock.now();

        clock.set(end + 499);
        assert!(matches!(radio.transmit(b"hi", &mut delay), Err(Error::HoldoffActive)));
        clock.set(end + 501);
        radio.transmit(b"hi", &mut delay).unwrap();
    }

    #[test]
    fn quota_runs_out_in_a_point_one_percent_band() {
        let (mut radio, bus, clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::Eu868);
        radio.set_frequency(869_000_000).unwrap(); // band 50, 3600 ms/hour
        bus.set_tx_time(500);

        let mut sent = 0;
        let refused = loop {
            match radio.transmit(b"hi", &mut delay) {
                Ok(_) => {
                    sent += 1;
                    clock.advance(600); // clear the holdoff
                }
                Err(e) => break e,
            }
            assert!(sent < 20, "quota never enforced");
        };
        assert!(matches!(refused, Error::QuotaExceeded));
        assert_eq!(sent, 8); // 7 x 500 ms stays under 3600, the 8th overshoots
    }

    #[test]
    fn transmit_times_out_when_tx_done_never_appears() {
        let (mut radio, bus, clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        bus.set_tx_time(10_000); // longer than TIMEOUT_DEFAULT
        let t0 = clock.now();
        assert!(matches!(radio.transmit(b"hi", &mut delay), Err(Error::Timeout)));
        assert!(clock.now() - t0 >= TIMEOUT_DEFAULT);
        assert_eq!(radio.mode().unwrap(), RadioMode::Stdby);
    }

    #[test]
    fn receive_copies_the_packet_out_of_the_fifo() {
        let (mut radio, bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        bus.set_rx_packet(20, b"hello!");

        let mut buffer = [0u8; 64];
        let len = radio.receive_continuous(&mut buffer, 100, &mut delay).unwrap();
        assert_eq!(len, 6);
        assert_eq!(&buffer[..6], b"hello!");
        assert_eq!(radio.mode().unwrap(), RadioMode::Stdby);
    }

    #[test]
    fn receive_overflow_fills_the_buffer_with_the_leading_bytes() {
        let (mut radio, bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        bus.set_rx_packet(20, b"hello!");

        let mut buffer = [0u8; 4];
        let result = radio.receive_continuous(&mut buffer, 100, &mut delay);
        assert!(matches!(result, Err(Error::BufferOverflow)));
        assert_eq!(&buffer, b"hell");
        assert_eq!(radio.mode().unwrap(), RadioMode::Stdby);
    }

    #[test]
    fn receive_timeout_returns_zero_and_parks_in_standby() {
        let (mut radio, bus, clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        let t0 = clock.now();

        let mut buffer = [0u8; 64];
        let len = radio.receive_continuous(&mut buffer, 50, &mut delay).unwrap();
        assert_eq!(len, 0);
        let elapsed = clock.now() - t0;
        assert!((50..65).contains(&elapsed), "elapsed {} ms", elapsed);

        // the final mode write parked the modem in Standby
        let (addr, value) = *bus
            .writes()
            .iter()
            .rev()
            .find(|&&(addr, _)| addr == 0x01)
            .unwrap();
        assert_eq!(addr, 0x01);
        assert_eq!(value & 0x07, RadioMode::Stdby as u8);
    }

    #[test]
    fn signal_detection_extends_the_receive_deadline() {
        let (mut radio, bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        // a packet lands well past the nominal 10 ms deadline, but the
        // signal-detected status keeps pushing the deadline out
        bus.set_signal_window(0, 200);
        bus.set_rx_packet(60, b"slow");

        let mut buffer = [0u8; 16];
        let len = radio.receive_continuous(&mut buffer, 10, &mut delay).unwrap();
        assert_eq!(len, 4);
        assert_eq!(&buffer[..4], b"slow");
    }

    #[test]
    fn non_blocking_receive_pops_a_packet_once_it_lands() {
        let (mut radio, bus, clock, _delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        bus.set_rx_packet(5, b"ding");

        radio.receive_start().unwrap();
        assert_eq!(radio.receive_read().unwrap(), None);
        assert_eq!(radio.mode().unwrap(), RadioMode::RxContinuous);

        clock.advance(10);
        let packet = radio.receive_read().unwrap().expect("packet pending");
        assert_eq!(&packet[..], b"ding");
    }

    #[test]
    fn cad_times_out_quietly() {
        let (mut radio, _bus, clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        let t0 = clock.now();
        let mut buffer = [0u8; 16];
        let len = radio.cad(&mut buffer, 30, &mut delay).unwrap();
        assert_eq!(len, 0);
        assert!(clock.now() - t0 >= 30);
        assert_eq!(radio.mode().unwrap(), RadioMode::Stdby);
    }

    #[test]
    fn cad_detection_hands_off_to_receive() {
        let (mut radio, bus, _clock, mut delay) = radio_with_plan(PaOutput::PaBoost, BandPlan::None);
        bus.set_cad_detect(10);
        bus.set_rx_packet(30, b"burst");

        let mut buffer = [0u8; 16];
        let len = radio.cad(&mut buffer, 1000, &mut delay).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&buffer[..5], b"burst");
        assert_eq!(radio.mode().unwrap(), RadioMode::Stdby);
    }

    #[test]
    fn round_tenths_rounds_half_away_from_zero() {
        assert_eq!(round_tenths(128), 13);
        assert_eq!(round_tenths(125), 13);
        assert_eq!(round_tenths(124), 12);
        assert_eq!(round_tenths(0), 0);
        assert_eq!(round_tenths(-25), -3);
        assert_eq!(round_tenths(-24), -2);
    }
}
