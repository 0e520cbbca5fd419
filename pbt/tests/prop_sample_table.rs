//! 多重化から逆多重化までのサンプルテーブルの性質を確認する Property-Based Testing
//!
//! 任意の尺・サイズ・キーフレーム配置・表示時刻オフセットを持つ映像トラックを生成し、
//! 索引やシーク結果が常に満たすべき性質を検証する

use std::num::NonZeroU32;

use mp4_sample_table::{
    TrackKind,
    boxes::{CttsBox, CttsEntry},
    demux::{AcceptAllDecoders, DemuxError, DemuxOptions, Mp4SeekDemuxer},
    mux::{Mp4FileMuxerOptions, SampleAccumulator, assemble},
    time,
};
use proptest::prelude::*;

const AVCC_RECORD: [u8; 17] = [
    1, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0, 4, 0x67, 0x42, 0xc0, 0x1e, 1, 0, 2, 0x68, 0xce,
];

/// 生成する映像サンプル: (サイズ, 尺, キーフレームか, 表示時刻オフセット)
type VideoSample = (usize, u32, bool, i32);

fn video_samples() -> impl Strategy<Value = Vec<VideoSample>> {
    prop::collection::vec((1usize..64, 1u32..5000, any::<bool>(), 0i32..20_000), 1..80)
}

fn build_file(samples: &[VideoSample], with_ctts: bool, samples_per_chunk: u32) -> Vec<u8> {
    let mut options = Mp4FileMuxerOptions::default();
    options.video.width = Some(16);
    options.video.height = Some(16);
    options.samples_per_chunk = NonZeroU32::new(samples_per_chunk).unwrap();

    let mut acc = SampleAccumulator::with_options(&options);
    let mut dts = 0;
    for (i, &(size, duration, sync, _)) in samples.iter().enumerate() {
        // 先頭は必ずキーフレームにする
        acc.push(TrackKind::Video, vec![i as u8; size], sync || i == 0, dts, duration)
            .unwrap();
        dts += duration as u64;
    }
    let (mut video, audio) = acc.finish();
    video.codec_config = Some(AVCC_RECORD.to_vec());

    let mut document = assemble(video, audio, &options).unwrap();
    if with_ctts {
        let entries = samples
            .iter()
            .map(|&(_, _, _, offset)| CttsEntry {
                sample_count: 1,
                sample_offset: offset,
            })
            .collect();
        let stbl_box = &mut document.moov_box.trak_boxes[0].mdia_box.minf_box.stbl_box;
        stbl_box.ctts_box = Some(CttsBox { entries });
    }
    document.to_bytes().unwrap()
}

proptest! {
    #[test]
    fn accumulated_offsets_are_tight(
        pushes in prop::collection::vec((any::<bool>(), 0usize..100), 0..100)
    ) {
        let mut acc = SampleAccumulator::with_options(&Mp4FileMuxerOptions::default());
        for &(is_video, size) in &pushes {
            let track = if is_video { TrackKind::Video } else { TrackKind::Audio };
            acc.push(track, vec![0; size], true, 0, 1).unwrap();
        }

        for kind in [TrackKind::Video, TrackKind::Audio] {
            let track = acc.track(kind);
            let mut expected_offset = 0;
            for (i, s) in track.samples.iter().enumerate() {
                prop_assert_eq!(s.sequence_number as usize, i + 1);
                prop_assert_eq!(s.byte_offset, expected_offset);
                expected_offset += s.byte_size as u64;
            }
            prop_assert_eq!(track.region_size(), expected_offset);
        }
    }

    #[test]
    fn indices_are_bijective_and_presentation_ordered(
        samples in video_samples(),
        with_ctts in any::<bool>(),
    ) {
        let demuxer = Mp4SeekDemuxer::parse(build_file(&samples, with_ctts, 1)).unwrap();
        let count = samples.len();
        prop_assert_eq!(demuxer.samples().len(), count);

        let mut seen = vec![false; count];
        for dts_index in 0..count {
            let pts_index = demuxer.dts_index_to_pts_index(dts_index).unwrap();
            prop_assert!(!seen[pts_index]);
            seen[pts_index] = true;
            prop_assert_eq!(demuxer.pts_index_to_dts_index(pts_index), Some(dts_index));
        }

        for pts_index in 1..count {
            let prev = demuxer.sample_by_pts_index(pts_index - 1).unwrap();
            let cur = demuxer.sample_by_pts_index(pts_index).unwrap();
            prop_assert!(prev.sample.composition_timestamp <= cur.sample.composition_timestamp);
            if prev.sample.composition_timestamp == cur.sample.composition_timestamp {
                prop_assert!(prev.dts_index < cur.dts_index);
            }
        }
    }

    #[test]
    fn seek_window_starts_at_a_keyframe_and_is_deep_enough(
        samples in video_samples(),
        with_ctts in any::<bool>(),
        target in any::<prop::sample::Index>(),
        min_queue_depth in 1usize..40,
    ) {
        let options = DemuxOptions { min_queue_depth };
        let file = build_file(&samples, with_ctts, 1);
        let demuxer = Mp4SeekDemuxer::parse_with(file, options, &AcceptAllDecoders).unwrap();

        let count = samples.len();
        let target = demuxer.sample_by_pts_index(target.index(count)).unwrap();
        let cts = target.sample.composition_timestamp;
        let target_ms = time::ticks_to_ms(cts, demuxer.timescale()) - demuxer.time_offset_ms();
        let seek = match demuxer.seek(target_ms) {
            Ok(seek) => seek,
            Err(DemuxError::NoPrecedingKeyframe(pts_index)) => {
                // 表示順では先頭のキーフレームより前に来るサンプルがありうる
                for i in 0..=pts_index {
                    prop_assert!(!demuxer.sample_by_pts_index(i).unwrap().sample.is_sync_sample);
                }
                return Ok(());
            }
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        };

        let first = &seek.window[0];
        prop_assert!(first.sample.is_sync_sample);
        prop_assert!(first.pts_index <= seek.pts_index);
        let last = seek.window.last().unwrap();
        prop_assert!(seek.pts_index <= last.pts_index);
        prop_assert!(seek.window.len() >= min_queue_depth.min(count - first.pts_index));
        prop_assert_eq!(demuxer.pts_index_to_dts_index(seek.pts_index), Some(seek.dts_index));

        for pair in seek.window.windows(2) {
            prop_assert_eq!(pair[0].pts_index + 1, pair[1].pts_index);
        }
    }

    #[test]
    fn fetch_returns_the_muxed_payloads(
        samples in video_samples(),
        samples_per_chunk in 1u32..8,
    ) {
        let file = build_file(&samples, false, samples_per_chunk);
        let mut demuxer = Mp4SeekDemuxer::parse(file).unwrap();
        let all = demuxer.samples().to_vec();
        let fetched = demuxer.fetch(&all).unwrap();

        prop_assert_eq!(fetched.len(), samples.len());
        for (i, s) in fetched.iter().enumerate() {
            prop_assert_eq!(s.dts_index, i);
            let expected = vec![i as u8; samples[i].0];
            prop_assert_eq!(s.sample.payload.as_deref(), Some(&expected[..]));
        }
    }
}
