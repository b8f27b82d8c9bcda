/// Monotonic millisecond clock consumed by the driver.
///
/// `embedded_hal` 0.2 provides delays but no way to read elapsed time, so
/// hosts supply this themselves, backed by whatever monotonic source the
/// platform has (SysTick, `CLOCK_MONOTONIC`, a timer peripheral). The
/// 64-bit value never wraps in any realistic uptime.
pub trait MonotonicClock {
    /// Milliseconds elapsed since an arbitrary fixed origin.
    fn millis(&mut self) -> u64;
}
