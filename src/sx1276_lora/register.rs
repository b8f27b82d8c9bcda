//! LoRa-mode register and bit-field layout of the SX1276.
//!
//! Every named parameter is a [`Field`]: the enclosing register address, a
//! bit width and a bit offset. The driver performs all access through this
//! one shape, so bit packing never leaks into calling code.

use bit_field::BitField;
use core::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    Fifo = 0x00,
    OpMode = 0x01,
    FrfMsb = 0x06,
    FrfMid = 0x07,
    FrfLsb = 0x08,
    PaConfig = 0x09,
    PaRamp = 0x0a,
    Ocp = 0x0b,
    Lna = 0x0c,
    FifoAddrPtr = 0x0d,
    FifoTxBaseAddr = 0x0e,
    FifoRxBaseAddr = 0x0f,
    FifoRxCurrentAddr = 0x10,
    IrqFlagsMask = 0x11,
    IrqFlags = 0x12,
    RxNbBytes = 0x13,
    RxHeaderCntValueMsb = 0x14,
    RxHeaderCntValueLsb = 0x15,
    RxPacketCntValueMsb = 0x16,
    RxPacketCntValueLsb = 0x17,
    ModemStat = 0x18,
    PktSnrValue = 0x19,
    PktRssiValue = 0x1a,
    RssiValue = 0x1b,
    HopChannel = 0x1c,
    ModemConfig1 = 0x1d,
    ModemConfig2 = 0x1e,
    SymbTimeoutLsb = 0x1f,
    PreambleMsb = 0x20,
    PreambleLsb = 0x21,
    PayloadLength = 0x22,
    MaxPayloadLength = 0x23,
    HopPeriod = 0x24,
    FifoRxByteAddr = 0x25,
    ModemConfig3 = 0x26,
    PpmCorrection = 0x27,
    FeiMsb = 0x28,
    FeiMid = 0x29,
    FeiLsb = 0x2a,
    RssiWideband = 0x2c,
    IfFreq2 = 0x2f,
    IfFreq1 = 0x30,
    DetectOptimize = 0x31,
    InvertIq = 0x33,
    HighBwOptimize1 = 0x36,
    DetectionThreshold = 0x37,
    SyncWord = 0x39,
    HighBwOptimize2 = 0x3a,
    InvertIq2 = 0x3b,
    DioMapping1 = 0x40,
    DioMapping2 = 0x41,
    Version = 0x42,
    PaDac = 0x4d,
    FormerTemp = 0x5b,
    AgcRef = 0x61,
    AgcThresh1 = 0x62,
    AgcThresh2 = 0x63,
    AgcThresh3 = 0x64,
    Pll = 0x70,
}

impl Register {
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// Location of one named parameter within the register file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub reg: Register,
    pub width: u8,
    pub shift: u8,
}

impl Field {
    pub const fn bits(reg: Register, width: u8, shift: u8) -> Self {
        Field { reg, width, shift }
    }

    pub const fn whole(reg: Register) -> Self {
        Field::bits(reg, 8, 0)
    }

    fn span(self) -> Range<usize> {
        self.shift as usize..(self.shift + self.width) as usize
    }

    pub fn value_mask(self) -> u8 {
        0xff >> (8 - self.width)
    }

    /// Pull this field out of its enclosing register byte.
    pub fn extract(self, byte: u8) -> u8 {
        byte.get_bits(self.span())
    }

    /// Place `value` into `byte`, leaving all other bits untouched.
    /// Out-of-range values are truncated to the field width.
    pub fn insert(self, byte: u8, value: u8) -> u8 {
        let mut byte = byte;
        byte.set_bits(self.span(), value & self.value_mask());
        byte
    }
}

// RegOpMode
pub const LONG_RANGE_MODE: Field = Field::bits(Register::OpMode, 1, 7);
pub const ACCESS_SHARED_REG: Field = Field::bits(Register::OpMode, 1, 6);
pub const LOW_FREQUENCY_MODE_ON: Field = Field::bits(Register::OpMode, 1, 3);
pub const MODE: Field = Field::bits(Register::OpMode, 3, 0);

// RegPaConfig / RegPaRamp / RegOcp
pub const PA_SELECT: Field = Field::bits(Register::PaConfig, 1, 7);
pub const MAX_POWER: Field = Field::bits(Register::PaConfig, 3, 4);
pub const OUTPUT_POWER: Field = Field::bits(Register::PaConfig, 4, 0);
pub const PA_RAMP: Field = Field::bits(Register::PaRamp, 4, 0);
pub const OCP_ON: Field = Field::bits(Register::Ocp, 1, 5);
pub const OCP_TRIM: Field = Field::bits(Register::Ocp, 5, 0);

// RegLna
pub const LNA_GAIN: Field = Field::bits(Register::Lna, 3, 5);
pub const LNA_BOOST_LF: Field = Field::bits(Register::Lna, 2, 3);
pub const LNA_BOOST_HF: Field = Field::bits(Register::Lna, 2, 0);

// FIFO pointers
pub const FIFO: Field = Field::whole(Register::Fifo);
pub const FIFO_ADDR_PTR: Field = Field::whole(Register::FifoAddrPtr);
pub const FIFO_TX_BASE_ADDR: Field = Field::whole(Register::FifoTxBaseAddr);
pub const FIFO_RX_BASE_ADDR: Field = Field::whole(Register::FifoRxBaseAddr);
pub const FIFO_RX_CURRENT_ADDR: Field = Field::whole(Register::FifoRxCurrentAddr);
pub const FIFO_RX_BYTE_ADDR: Field = Field::whole(Register::FifoRxByteAddr);
pub const RX_NB_BYTES: Field = Field::whole(Register::RxNbBytes);

// RegIrqFlagsMask
pub const RX_TIMEOUT_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 7);
pub const RX_DONE_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 6);
pub const PAYLOAD_CRC_ERROR_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 5);
pub const VALID_HEADER_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 4);
pub const TX_DONE_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 3);
pub const CAD_DONE_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 2);
pub const FHSS_CHANGE_CHANNEL_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 1);
pub const CAD_DETECTED_MASK: Field = Field::bits(Register::IrqFlagsMask, 1, 0);

// RegIrqFlags. The flags clear when written with a 1, so these fields do
// not round-trip like the configuration fields above.
pub const RX_TIMEOUT: Field = Field::bits(Register::IrqFlags, 1, 7);
pub const RX_DONE: Field = Field::bits(Register::IrqFlags, 1, 6);
pub const PAYLOAD_CRC_ERROR: Field = Field::bits(Register::IrqFlags, 1, 5);
pub const VALID_HEADER: Field = Field::bits(Register::IrqFlags, 1, 4);
pub const TX_DONE: Field = Field::bits(Register::IrqFlags, 1, 3);
pub const CAD_DONE: Field = Field::bits(Register::IrqFlags, 1, 2);
pub const FHSS_CHANGE_CHANNEL: Field = Field::bits(Register::IrqFlags, 1, 1);
pub const CAD_DETECTED: Field = Field::bits(Register::IrqFlags, 1, 0);

// RegHopChannel / RegModemStat (read-only status)
pub const PLL_TIMEOUT: Field = Field::bits(Register::HopChannel, 1, 7);
pub const CRC_ON_PAYLOAD: Field = Field::bits(Register::HopChannel, 1, 6);
pub const FHSS_PRESENT_CHANNEL: Field = Field::bits(Register::HopChannel, 6, 0);
pub const RX_CODING_RATE: Field = Field::bits(Register::ModemStat, 3, 5);
pub const MODEM_STATUS: Field = Field::bits(Register::ModemStat, 5, 0);
pub const PKT_SNR_VALUE: Field = Field::whole(Register::PktSnrValue);
pub const PKT_RSSI_VALUE: Field = Field::whole(Register::PktRssiValue);
pub const RSSI_VALUE: Field = Field::whole(Register::RssiValue);

// RegModemConfig1..3
pub const BW: Field = Field::bits(Register::ModemConfig1, 4, 4);
pub const CODING_RATE: Field = Field::bits(Register::ModemConfig1, 3, 1);
pub const IMPLICIT_HEADER_MODE_ON: Field = Field::bits(Register::ModemConfig1, 1, 0);
pub const SPREADING_FACTOR: Field = Field::bits(Register::ModemConfig2, 4, 4);
pub const TX_CONTINUOUS_MODE: Field = Field::bits(Register::ModemConfig2, 1, 3);
pub const RX_PAYLOAD_CRC_ON: Field = Field::bits(Register::ModemConfig2, 1, 2);
pub const SYMB_TIMEOUT_MSB: Field = Field::bits(Register::ModemConfig2, 2, 0);
pub const LOW_DATA_RATE_OPTIMIZE: Field = Field::bits(Register::ModemConfig3, 1, 3);
pub const AGC_AUTO_ON: Field = Field::bits(Register::ModemConfig3, 1, 2);

// Packet framing
pub const PAYLOAD_LENGTH: Field = Field::whole(Register::PayloadLength);
pub const MAX_PAYLOAD_LENGTH: Field = Field::whole(Register::MaxPayloadLength);
pub const HOP_PERIOD: Field = Field::whole(Register::HopPeriod);
pub const PPM_CORRECTION: Field = Field::whole(Register::PpmCorrection);

// Frequency-error high nibble; the mid and low bytes are whole registers.
pub const FEI_MSB: Field = Field::bits(Register::FeiMsb, 4, 0);
pub const RSSI_WIDEBAND: Field = Field::whole(Register::RssiWideband);

// Receiver fine-tuning
pub const IF_FREQ_2: Field = Field::whole(Register::IfFreq2);
pub const IF_FREQ_1: Field = Field::whole(Register::IfFreq1);
pub const AUTOMATIC_IF_ON: Field = Field::bits(Register::DetectOptimize, 1, 7);
pub const DETECTION_OPTIMIZE: Field = Field::bits(Register::DetectOptimize, 3, 0);
pub const INVERT_IQ_RX: Field = Field::bits(Register::InvertIq, 1, 6);
pub const INVERT_IQ_TX: Field = Field::bits(Register::InvertIq, 1, 0);
pub const HIGH_BW_OPTIMIZE_1: Field = Field::whole(Register::HighBwOptimize1);
pub const DETECTION_THRESHOLD: Field = Field::whole(Register::DetectionThreshold);
pub const SYNC_WORD: Field = Field::whole(Register::SyncWord);
pub const HIGH_BW_OPTIMIZE_2: Field = Field::whole(Register::HighBwOptimize2);
pub const INVERT_IQ2: Field = Field::whole(Register::InvertIq2);

// DIO routing
pub const DIO0_MAPPING: Field = Field::bits(Register::DioMapping1, 2, 6);
pub const DIO1_MAPPING: Field = Field::bits(Register::DioMapping1, 2, 4);
pub const DIO2_MAPPING: Field = Field::bits(Register::DioMapping1, 2, 2);
pub const DIO3_MAPPING: Field = Field::bits(Register::DioMapping1, 2, 0);
pub const DIO4_MAPPING: Field = Field::bits(Register::DioMapping2, 2, 6);
pub const DIO5_MAPPING: Field = Field::bits(Register::DioMapping2, 2, 4);

// Miscellaneous
pub const VERSION: Field = Field::whole(Register::Version);
pub const PA_DAC: Field = Field::bits(Register::PaDac, 3, 0);
pub const FORMER_TEMP: Field = Field::whole(Register::FormerTemp);
pub const AGC_REFERENCE_LEVEL: Field = Field::bits(Register::AgcRef, 6, 0);
pub const AGC_STEP1: Field = Field::bits(Register::AgcThresh1, 4, 0);
pub const AGC_STEP2: Field = Field::bits(Register::AgcThresh2, 4, 4);
pub const AGC_STEP3: Field = Field::bits(Register::AgcThresh2, 4, 0);
pub const AGC_STEP4: Field = Field::bits(Register::AgcThresh3, 4, 4);
pub const AGC_STEP5: Field = Field::bits(Register::AgcThresh3, 4, 0);
pub const PLL_BANDWIDTH: Field = Field::bits(Register::Pll, 4, 0);

/// IRQ flag bits of `RegIrqFlags`. Writing a 1 clears the flag.
pub mod irq {
    pub const RX_TIMEOUT: u8 = 0x80;
    pub const RX_DONE: u8 = 0x40;
    pub const PAYLOAD_CRC_ERROR: u8 = 0x20;
    pub const VALID_HEADER: u8 = 0x10;
    pub const TX_DONE: u8 = 0x08;
    pub const CAD_DONE: u8 = 0x04;
    pub const FHSS_CHANGE_CHANNEL: u8 = 0x02;
    pub const CAD_DETECTED: u8 = 0x01;
    pub const ALL: u8 = 0xff;
}

/// Live receiver state bits within the modem-status field.
pub mod modem_status {
    pub const SIGNAL_DETECTED: u8 = 0x01;
    pub const SIGNAL_SYNCED: u8 = 0x02;
    pub const RX_ONGOING: u8 = 0x04;
    pub const HEADER_INFO_VALID: u8 = 0x08;
    pub const MODEM_CLEAR: u8 = 0x10;
}

/// Every read-write field that lives in a single plainly-addressed
/// register. IRQ flags (write-1-to-clear) and the FIFO data port (pointer
/// side effects) are excluded; multi-register parameters have their own
/// composite accessors.
pub const FIELDS: &[(&str, Field)] = &[
    ("LongRangeMode", LONG_RANGE_MODE),
    ("AccessSharedReg", ACCESS_SHARED_REG),
    ("LowFrequencyModeOn", LOW_FREQUENCY_MODE_ON),
    ("Mode", MODE),
    ("PaSelect", PA_SELECT),
    ("MaxPower", MAX_POWER),
    ("OutputPower", OUTPUT_POWER),
    ("PaRamp", PA_RAMP),
    ("OcpOn", OCP_ON),
    ("OcpTrim", OCP_TRIM),
    ("LnaGain", LNA_GAIN),
    ("LnaBoostLf", LNA_BOOST_LF),
    ("LnaBoostHf", LNA_BOOST_HF),
    ("FifoAddrPtr", FIFO_ADDR_PTR),
    ("FifoTxBaseAddr", FIFO_TX_BASE_ADDR),
    ("FifoRxBaseAddr", FIFO_RX_BASE_ADDR),
    ("RxTimeoutMask", RX_TIMEOUT_MASK),
    ("RxDoneMask", RX_DONE_MASK),
    ("PayloadCrcErrorMask", PAYLOAD_CRC_ERROR_MASK),
    ("ValidHeaderMask", VALID_HEADER_MASK),
    ("TxDoneMask", TX_DONE_MASK),
    ("CadDoneMask", CAD_DONE_MASK),
    ("FhssChangeChannelMask", FHSS_CHANGE_CHANNEL_MASK),
    ("CadDetectedMask", CAD_DETECTED_MASK),
    ("Bw", BW),
    ("CodingRate", CODING_RATE),
    ("ImplicitHeaderModeOn", IMPLICIT_HEADER_MODE_ON),
    ("SpreadingFactor", SPREADING_FACTOR),
    ("TxContinuousMode", TX_CONTINUOUS_MODE),
    ("RxPayloadCrcOn", RX_PAYLOAD_CRC_ON),
    ("SymbTimeoutMsb", SYMB_TIMEOUT_MSB),
    ("PayloadLength", PAYLOAD_LENGTH),
    ("MaxPayloadLength", MAX_PAYLOAD_LENGTH),
    ("HopPeriod", HOP_PERIOD),
    ("LowDataRateOptimize", LOW_DATA_RATE_OPTIMIZE),
    ("AgcAutoOn", AGC_AUTO_ON),
    ("PpmCorrection", PPM_CORRECTION),
    ("IfFreq2", IF_FREQ_2),
    ("IfFreq1", IF_FREQ_1),
    ("AutomaticIfOn", AUTOMATIC_IF_ON),
    ("DetectionOptimize", DETECTION_OPTIMIZE),
    ("InvertIqRx", INVERT_IQ_RX),
    ("InvertIqTx", INVERT_IQ_TX),
    ("HighBwOptimize1", HIGH_BW_OPTIMIZE_1),
    ("DetectionThreshold", DETECTION_THRESHOLD),
    ("SyncWord", SYNC_WORD),
    ("HighBwOptimize2", HIGH_BW_OPTIMIZE_2),
    ("InvertIq2", INVERT_IQ2),
    ("Dio0Mapping", DIO0_MAPPING),
    ("Dio1Mapping", DIO1_MAPPING),
    ("Dio2Mapping", DIO2_MAPPING),
    ("Dio3Mapping", DIO3_MAPPING),
    ("Dio4Mapping", DIO4_MAPPING),
    ("Dio5Mapping", DIO5_MAPPING),
    ("PaDac", PA_DAC),
    ("AgcReferenceLevel", AGC_REFERENCE_LEVEL),
    ("AgcStep1", AGC_STEP1),
    ("AgcStep2", AGC_STEP2),
    ("AgcStep3", AGC_STEP3),
    ("AgcStep4", AGC_STEP4),
    ("AgcStep5", AGC_STEP5),
    ("PllBandwidth", PLL_BANDWIDTH),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_fit_their_registers() {
        for (name, field) in FIELDS {
            assert!(field.width >= 1 && field.width <= 8, "{}", name);
            assert!(field.shift + field.width <= 8, "{}", name);
        }
    }

    #[test]
    fn insert_preserves_neighbouring_bits() {
        let byte = MAX_POWER.insert(0xff, 0);
        assert_eq!(byte, 0x8f);
        let byte = MAX_POWER.insert(0x00, 0xff);
        assert_eq!(byte, 0x70);
        assert_eq!(MAX_POWER.extract(byte), 0x07);
    }

    #[test]
    fn whole_byte_field_spans_the_register() {
        assert_eq!(SYNC_WORD.value_mask(), 0xff);
        assert_eq!(SYNC_WORD.insert(0x00, 0xab), 0xab);
        assert_eq!(SYNC_WORD.extract(0xab), 0xab);
    }
}
