//! 秒・ミリ秒・マイクロ秒と、トラックのタイムスケール単位との間の変換
//!
//! タイムスケール単位への変換は四捨五入、ミリ秒への変換は小数を含む値で行う
use std::num::NonZeroU32;

/// 1 秒あたりのミリ秒数
pub const MILLIS_PER_SEC: u64 = 1_000;

/// 1 秒あたりのマイクロ秒数
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// ムービーヘッダー (mvhd) で使うタイムスケール（ミリ秒単位）
pub const MOVIE_TIMESCALE: NonZeroU32 = match NonZeroU32::new(MILLIS_PER_SEC as u32) {
    Some(v) => v,
    None => unreachable!(),
};

/// 秒をミリ秒に変換する
pub fn secs_to_ms(secs: f64) -> f64 {
    secs * MILLIS_PER_SEC as f64
}

/// ミリ秒を秒に変換する
pub fn ms_to_secs(ms: f64) -> f64 {
    ms / MILLIS_PER_SEC as f64
}

/// マイクロ秒をミリ秒に変換する
pub fn us_to_ms(us: u64) -> f64 {
    us as f64 / MILLIS_PER_SEC as f64
}

/// ミリ秒をマイクロ秒に変換する（負値は 0 になる）
pub fn ms_to_us(ms: f64) -> u64 {
    (ms * MILLIS_PER_SEC as f64).round().max(0.0) as u64
}

fn rescale(value: u64, from: u64, to: u64) -> u64 {
    let scaled = (value as u128 * to as u128 + from as u128 / 2) / from as u128;
    scaled.min(u64::MAX as u128) as u64
}

/// マイクロ秒をタイムスケール単位に変換する
pub fn us_to_ticks(us: u64, timescale: NonZeroU32) -> u64 {
    rescale(us, MICROS_PER_SEC, timescale.get() as u64)
}

/// タイムスケール単位をマイクロ秒に変換する
pub fn ticks_to_us(ticks: u64, timescale: NonZeroU32) -> u64 {
    rescale(ticks, timescale.get() as u64, MICROS_PER_SEC)
}

/// タイムスケール単位をミリ秒に変換する
pub fn ticks_to_ms(ticks: u64, timescale: NonZeroU32) -> f64 {
    ticks as f64 * MILLIS_PER_SEC as f64 / timescale.get() as f64
}

/// タイムスケール単位を、別のタイムスケール単位に変換する
pub fn rescale_ticks(ticks: u64, from: NonZeroU32, to: NonZeroU32) -> u64 {
    rescale(ticks, from.get() as u64, to.get() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).expect("non zero")
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(secs_to_ms(1.5), 1500.0);
        assert_eq!(ms_to_secs(250.0), 0.25);
        assert_eq!(us_to_ms(33_333), 33.333);
        assert_eq!(ms_to_us(1032.999), 1_032_999);
        assert_eq!(ms_to_us(-1.0), 0);
    }

    #[test]
    fn tick_conversions_round_to_nearest() {
        assert_eq!(us_to_ticks(33_333, ts(90_000)), 3_000);
        assert_eq!(us_to_ticks(20_000, ts(48_000)), 960);
        assert_eq!(ticks_to_us(3_000, ts(90_000)), 33_333);
        assert_eq!(ticks_to_ms(450_000, ts(90_000)), 5_000.0);
        assert_eq!(rescale_ticks(240_000, ts(48_000), MOVIE_TIMESCALE), 5_000);
    }
}
