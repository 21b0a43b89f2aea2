use std::time::{Duration, SystemTime};

/// Ts is a 64-bit logical timestamp: the high bits are a physical wall-clock
/// in milliseconds, the low [`LOGICAL_BITS`] bits a logical counter. The
/// pipeline treats it as opaque and monotone; only logging and blob naming
/// peel the physical half out.
pub type Ts = u64;

const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Compose a Ts from a physical millisecond clock and a logical counter.
pub fn compose_ts(physical_ms: i64, logical: i64) -> Ts {
    ((physical_ms as u64) << LOGICAL_BITS) | (logical as u64 & LOGICAL_MASK)
}

/// The physical millisecond half of `ts`.
pub fn physical_ts(ts: Ts) -> i64 {
    (ts >> LOGICAL_BITS) as i64
}

/// The logical counter half of `ts`.
pub fn logical_ts(ts: Ts) -> i64 {
    (ts & LOGICAL_MASK) as i64
}

/// The physical half of `ts` as wall-clock time.
pub fn physical_time(ts: Ts) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(physical_ts(ts) as u64)
}
