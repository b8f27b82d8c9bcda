//! Driver for the Semtech SX1276 radio in LoRa mode.
//!
//! The driver talks to the chip over a blocking SPI bus plus chip-select
//! and reset GPIOs, all consumed as `embedded_hal` 0.2 capabilities. It
//! exposes typed transmit / continuous-receive / channel-activity-detection
//! operations together with low-level access to every LoRa-mode register
//! field, and can enforce the EU868 band plan (per-sub-band power and
//! bandwidth ceilings plus a rolling-hour duty-cycle quota) as a side
//! effect of frequency changes.
//!
//! Incorrect configuration is very likely to result in transmissions that
//! are not legal in your region. The band-plan feature reduces this risk
//! but does not eliminate it.
//!
//! ```ignore
//! let mut lora = sx1276_lora::LoRa::new(spi, cs, reset, clock, &mut delay)?;
//! lora.init(&mut delay, PaOutput::PaBoost, BandPlan::Eu868)?;
//! lora.set_spreading_factor(7)?;
//! let airtime_ms = lora.transmit(b"hello", &mut delay)?;
//! ```

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

pub mod bandplan;
pub mod duty;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod sx1276_lora;
mod time;

pub use bandplan::{BandPlan, TxCaps};
pub use sx1276_lora::{register, Error, LoRa, PaOutput, RadioMode, MODE, TIMEOUT_DEFAULT};
pub use time::MonotonicClock;
