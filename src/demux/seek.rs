use std::ops::RangeInclusive;

use super::DemuxError;

/// 表示順の位置 `target` を含み、キーフレームから始まるサンプル範囲（表示順）を選ぶ
///
/// - `target` 自体がキーフレームなら、そこから `min_depth` 個
/// - そうでなければ、直前のキーフレームから `max(次のキーフレーム, target, 直前のキーフレーム + min_depth)` まで
///
/// どちらの場合も範囲の終端は最後のサンプルで打ち切られる
pub(super) fn window_range<F>(
    sample_count: usize,
    is_sync: F,
    target: usize,
    min_depth: usize,
) -> Result<RangeInclusive<usize>, DemuxError>
where
    F: Fn(usize) -> bool,
{
    let last = sample_count.saturating_sub(1);
    let min_depth = min_depth.max(1);

    if is_sync(target) {
        return Ok(target..=last.min(target.saturating_add(min_depth - 1)));
    }

    let keyframe = (0..target)
        .rev()
        .find(|&i| is_sync(i))
        .ok_or(DemuxError::NoPrecedingKeyframe(target))?;
    let next_keyframe = (target + 1..sample_count).find(|&i| is_sync(i)).unwrap_or(target);
    let end = next_keyframe.max(target).max(keyframe.saturating_add(min_depth));
    Ok(keyframe..=last.min(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 60 サンプルごとにキーフレーム
    fn gop60(i: usize) -> bool {
        i % 60 == 0
    }

    #[test]
    fn sync_target_starts_the_window() {
        assert_eq!(window_range(150, gop60, 60, 20).expect("window"), 60..=79);
        assert_eq!(window_range(150, gop60, 120, 40).expect("window"), 120..=149);
    }

    #[test]
    fn non_sync_target_reaches_the_next_keyframe() {
        assert_eq!(window_range(150, gop60, 30, 20).expect("window"), 0..=60);
        assert_eq!(window_range(150, gop60, 130, 20).expect("window"), 120..=140);
        assert_eq!(window_range(150, gop60, 145, 20).expect("window"), 120..=145);
    }

    #[test]
    fn short_gop_still_gets_minimum_depth() {
        let every_fifth = |i: usize| i % 5 == 0;
        assert_eq!(window_range(100, every_fifth, 12, 20).expect("window"), 10..=30);
    }

    #[test]
    fn target_without_preceding_keyframe() {
        let from_ten = |i: usize| i == 10;
        assert!(matches!(
            window_range(30, from_ten, 4, 20),
            Err(DemuxError::NoPrecedingKeyframe(4))
        ));
    }

    #[test]
    fn huge_min_depth_is_clamped_to_the_last_sample() {
        assert_eq!(window_range(150, gop60, 60, usize::MAX).expect("window"), 60..=149);
        assert_eq!(window_range(150, gop60, 30, usize::MAX).expect("window"), 0..=149);
    }
}
