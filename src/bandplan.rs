//! Regulatory band plans and the transmit caps they derive.
//!
//! A plan is consulted whenever the carrier frequency changes: the
//! sub-band containing the new frequency yields a power ceiling, a
//! bandwidth ceiling and an hourly airtime quota, and the transmit path
//! gates on those until the next frequency change.

use log::debug;

/// Power ceiling marking a frequency with no permitted TX sub-band.
pub const PROHIBITED_DBM: i8 = -99;

/// Band plans the driver can enforce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandPlan {
    /// No restrictions beyond the silicon itself. The frequency is left at
    /// its factory default until the caller tunes.
    None,
    /// EU 863-870 MHz limits per EN 300 220-2 V3.2.1.
    Eu868,
}

/// Transmit limits derived from the current frequency's sub-band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxCaps {
    /// Highest permitted transmit power in dBm. At or below
    /// [`PROHIBITED_DBM`], transmission is refused outright.
    pub tx_power_limit: i8,
    /// Transmit airtime allowed per rolling hour, in milliseconds.
    pub duty_quota_ms: u32,
    /// Highest permitted bandwidth register index.
    pub bw_limit: u8,
}

impl TxCaps {
    /// Whether transmission is prohibited entirely at this frequency.
    pub fn prohibited(&self) -> bool {
        self.tx_power_limit <= PROHIBITED_DBM
    }
}

/// Caps applied when no band plan is active: hardware maximum power and a
/// 50% effective duty.
pub const UNRESTRICTED: TxCaps = TxCaps {
    tx_power_limit: 20,
    duty_quota_ms: 1_800_000,
    bw_limit: 9,
};

const PROHIBITED: TxCaps = TxCaps {
    tx_power_limit: PROHIBITED_DBM,
    duty_quota_ms: 0,
    bw_limit: 0,
};

struct SubBand {
    low_hz: u32,
    high_hz: u32,
    caps: TxCaps,
}

const fn sub_band(low_hz: u32, high_hz: u32, tx_power_limit: i8, duty_quota_ms: u32) -> SubBand {
    SubBand {
        low_hz,
        high_hz,
        // 125 kHz maximum bandwidth throughout the band
        caps: TxCaps {
            tx_power_limit,
            duty_quota_ms,
            bw_limit: 7,
        },
    }
}

// EN 300 220-2 sub-bands usable for LoRa between 863 and 870 MHz. The
// stored edges already include a 62.5 kHz guard inside each regulatory
// limit; anything falling between two entries is a prohibited gap.
const EU868: &[SubBand] = &[
    sub_band(863_062_500, 864_937_500, 14, 3_600),   // 46a, 0.1% duty
    sub_band(865_062_500, 867_937_500, 14, 36_000),  // 47, 1% duty
    sub_band(868_062_500, 868_537_500, 14, 36_000),  // 48, 1% duty
    sub_band(868_762_500, 869_137_500, 14, 3_600),   // 50, 0.1% duty
    sub_band(869_462_500, 869_587_500, 20, 360_000), // 54, 10% duty
    sub_band(869_762_500, 869_937_500, 20, 36_000),  // 56b, 1% duty
];

impl BandPlan {
    /// Transmit caps in force at `hz` under this plan.
    pub fn caps_for(self, hz: u32) -> TxCaps {
        match self {
            BandPlan::None => UNRESTRICTED,
            BandPlan::Eu868 => EU868
                .iter()
                .find(|band| hz >= band.low_hz && hz <= band.high_hz)
                .map(|band| band.caps)
                .unwrap_or_else(|| {
                    debug!("{} Hz is not in a permitted TX band", hz);
                    PROHIBITED
                }),
        }
    }

    /// Post-transmit holdoff, as a multiple of the last airtime.
    pub fn tx_holdoff(self) -> u16 {
        match self {
            BandPlan::None => 0,
            BandPlan::Eu868 => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_plan_is_unrestricted_everywhere() {
        for hz in [137_000_000, 868_000_000, 1_020_000_000] {
            assert_eq!(BandPlan::None.caps_for(hz), UNRESTRICTED);
        }
        assert_eq!(BandPlan::None.tx_holdoff(), 0);
    }

    #[test]
    fn eu868_sub_band_edges() {
        // (guarded lower edge, power cap, hourly quota)
        let expected = [
            (863_062_500, 14, 3_600),
            (865_062_500, 14, 36_000),
            (868_062_500, 14, 36_000),
            (868_762_500, 14, 3_600),
            (869_462_500, 20, 360_000),
            (869_762_500, 20, 36_000),
        ];
        for (low, power, quota) in expected {
            let caps = BandPlan::Eu868.caps_for(low);
            assert_eq!(caps.tx_power_limit, power, "{} Hz", low);
            assert_eq!(caps.duty_quota_ms, quota, "{} Hz", low);
            assert_eq!(caps.bw_limit, 7, "{} Hz", low);

            // One hertz below the guarded edge falls in a gap.
            let gap = BandPlan::Eu868.caps_for(low - 1);
            assert!(gap.prohibited(), "{} Hz", low - 1);
            assert_eq!(gap.duty_quota_ms, 0);
            assert_eq!(gap.bw_limit, 0);
        }
    }

    #[test]
    fn eu868_upper_edges_are_inclusive() {
        assert!(!BandPlan::Eu868.caps_for(869_587_500).prohibited());
        assert!(BandPlan::Eu868.caps_for(869_587_501).prohibited());
    }

    #[test]
    fn eu868_gap_between_bands_47_and_48() {
        assert!(BandPlan::Eu868.caps_for(868_000_000).prohibited());
    }
}
