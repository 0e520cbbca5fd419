use std::num::NonZeroU32;

use mp4_sample_table::{
    TrackKind,
    aux::SampleTableAccessorError,
    boxes::{CttsBox, CttsEntry, SampleEntry, StszBox, SttsBox, SttsEntry},
    demux::{
        ByteSource, DecoderSupport, DemuxError, DemuxOptions, Mp4SeekDemuxer, VideoDecoderConfig,
    },
    mux::{
        Document, EncodedChunk, Mp4FileMuxerOptions, MuxError, SampleAccumulator, Track, assemble,
    },
};

const AVCC_RECORD: [u8; 17] = [
    1, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0, 4, 0x67, 0x42, 0xc0, 0x1e, 1, 0, 2, 0x68, 0xce,
];

fn options() -> Mp4FileMuxerOptions {
    let mut options = Mp4FileMuxerOptions::default();
    options.video.width = Some(320);
    options.video.height = Some(240);
    options
}

fn video_payload(i: usize) -> Vec<u8> {
    vec![(i % 251) as u8; 100 + i % 7]
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 30fps で 60 フレームごとにキーフレームを持つ映像 150 フレームと、20ms ごとの音声 250 フレーム
fn sample_file() -> Vec<u8> {
    init_tracing();
    let options = options();
    let mut acc = SampleAccumulator::with_options(&options);
    for i in 0..150u64 {
        let start = i * 1_000_000 / 30;
        let end = (i + 1) * 1_000_000 / 30;
        acc.push_chunk(
            TrackKind::Video,
            EncodedChunk {
                data: video_payload(i as usize),
                timestamp_us: start,
                duration_us: Some(end - start),
                keyframe: i % 60 == 0,
                decoder_config: (i == 0).then(|| AVCC_RECORD.to_vec()),
            },
        )
        .unwrap();
    }
    for i in 0..250u64 {
        acc.push_chunk(
            TrackKind::Audio,
            EncodedChunk {
                data: vec![0xa0; 40],
                timestamp_us: i * 20_000,
                duration_us: Some(20_000),
                keyframe: true,
                decoder_config: None,
            },
        )
        .unwrap();
    }
    let (video, audio) = acc.finish();
    assemble(video, audio, &options)
        .and_then(|d| d.to_bytes())
        .unwrap()
}

/// タイムスケール 1000 で、指定した (デコード時刻, 尺) の映像サンプルだけを持つファイル
fn timed_document(samples: &[(u64, u32)]) -> Document {
    let mut options = options();
    options.video.timescale = NonZeroU32::new(1000).unwrap();
    let mut acc = SampleAccumulator::with_options(&options);
    for (i, &(start, duration)) in samples.iter().enumerate() {
        acc.push(TrackKind::Video, vec![i as u8; 8], i == 0, start, duration)
            .unwrap();
    }
    let (mut video, audio) = acc.finish();
    video.codec_config = Some(AVCC_RECORD.to_vec());
    assemble(video, audio, &options).unwrap()
}

fn timed_file(samples: &[(u64, u32)]) -> Vec<u8> {
    timed_document(samples).to_bytes().unwrap()
}

#[test]
fn mux_then_demux_round_trip() {
    let demuxer = Mp4SeekDemuxer::parse(sample_file()).unwrap();

    let samples = demuxer.samples();
    assert_eq!(samples.len(), 150);
    assert!(samples[0].sample.is_sync_sample);
    assert!(samples[60].sample.is_sync_sample);
    assert!(!samples[59].sample.is_sync_sample);

    let total: u64 = samples.iter().map(|s| s.sample.duration as u64).sum();
    assert!(total.abs_diff(450_000) <= 1, "total = {total}");

    let tracks = demuxer.tracks();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].kind, TrackKind::Video);
    assert_eq!(tracks[1].kind, TrackKind::Audio);
    assert_eq!(tracks[1].timescale.get(), 48_000);
    assert_eq!(tracks[1].duration.as_millis(), 5000);
    assert_eq!(demuxer.duration_ms(), 5000.0);

    let config = demuxer.video_decoder_config();
    assert_eq!(config.codec, "avc1.42c01e");
    assert_eq!((config.coded_width, config.coded_height), (320, 240));
    assert_eq!(config.description, AVCC_RECORD);
}

#[test]
fn indices_are_bijective() {
    let demuxer = Mp4SeekDemuxer::parse(sample_file()).unwrap();
    for (dts_index, s) in demuxer.samples().iter().enumerate() {
        assert_eq!(s.dts_index, dts_index);
        let pts_index = demuxer.dts_index_to_pts_index(dts_index).unwrap();
        assert_eq!(demuxer.pts_index_to_dts_index(pts_index), Some(dts_index));
    }
    assert_eq!(demuxer.dts_index_to_pts_index(150), None);
    assert_eq!(demuxer.pts_index_to_dts_index(150), None);
}

#[test]
fn seek_then_fetch_returns_payloads_in_decode_order() {
    let mut demuxer = Mp4SeekDemuxer::parse(sample_file()).unwrap();

    let at_keyframe = demuxer.seek(2000.0).unwrap();
    assert_eq!(at_keyframe.pts_index, 60);
    assert_eq!(at_keyframe.window.len(), 20);
    assert_eq!(at_keyframe.window[0].pts_index, 60);

    let mid_gop = demuxer.seek(1000.0).unwrap();
    assert_eq!(mid_gop.pts_index, 30);
    assert_eq!(mid_gop.dts_index, 30);
    assert_eq!(mid_gop.window.first().map(|s| s.pts_index), Some(0));
    assert_eq!(mid_gop.window.last().map(|s| s.pts_index), Some(60));

    let fetched = demuxer.fetch(&mid_gop.window).unwrap();
    assert_eq!(fetched.len(), 61);
    for (i, s) in fetched.iter().enumerate() {
        assert_eq!(s.dts_index, i);
        assert_eq!(s.sample.payload.as_deref(), Some(&video_payload(i)[..]));
    }
}

#[test]
fn lookup_uses_half_open_intervals() {
    let file = timed_file(&[(0, 1000), (1000, 33), (1033, 33)]);
    let demuxer = Mp4SeekDemuxer::parse(file).unwrap();
    let number = |ms: f64| demuxer.sample_at_time(ms).map(|s| s.sample.sequence_number);

    assert_eq!(number(999.999), Some(1));
    assert_eq!(number(1000.0), Some(2));
    assert_eq!(number(1032.999), Some(2));
    assert_eq!(number(1033.0), Some(3));
    assert_eq!(number(1066.0), None);
    assert_eq!(number(-0.001), None);
}

#[test]
fn lookup_is_relative_to_the_first_presentation() {
    let mut document = timed_document(&[(0, 40), (40, 40)]);
    document.moov_box.trak_boxes[0]
        .mdia_box
        .minf_box
        .stbl_box
        .ctts_box = Some(CttsBox {
        entries: vec![CttsEntry {
            sample_count: 2,
            sample_offset: 500,
        }],
    });
    let demuxer = Mp4SeekDemuxer::parse(document.to_bytes().unwrap()).unwrap();
    assert_eq!(demuxer.time_offset_ms(), 500.0);
    let number = |ms: f64| demuxer.sample_at_time(ms).map(|s| s.sample.sequence_number);
    assert_eq!(number(0.0), Some(1));
    assert_eq!(number(40.0), Some(2));
}

#[test]
fn lookup_finds_an_earlier_sample_with_an_overlapping_interval() {
    // 表示区間は [200, 300) と [210, 220) で、後者が前者に含まれる
    let mut document = timed_document(&[(0, 100), (100, 10)]);
    document.moov_box.trak_boxes[0]
        .mdia_box
        .minf_box
        .stbl_box
        .ctts_box = Some(CttsBox {
        entries: vec![
            CttsEntry {
                sample_count: 1,
                sample_offset: 200,
            },
            CttsEntry {
                sample_count: 1,
                sample_offset: 110,
            },
        ],
    });
    let demuxer = Mp4SeekDemuxer::parse(document.to_bytes().unwrap()).unwrap();
    assert_eq!(demuxer.time_offset_ms(), 200.0);
    let number = |ms: f64| demuxer.sample_at_time(ms).map(|s| s.sample.sequence_number);

    assert_eq!(number(5.0), Some(1));
    assert_eq!(number(15.0), Some(2));
    assert_eq!(number(50.0), Some(1));
    assert_eq!(number(100.0), None);
}

#[test]
fn failed_seek_keeps_the_demuxer_usable() {
    let demuxer = Mp4SeekDemuxer::parse(timed_file(&[(0, 1000), (1000, 33)])).unwrap();
    assert!(matches!(
        demuxer.seek(5000.0),
        Err(DemuxError::NoMatchingSample(t)) if t == 5000.0
    ));
    let window = demuxer.seek(0.0).unwrap();
    assert_eq!(window.window.len(), 2);
}

#[test]
fn read_failure_terminates_the_demuxer() {
    let mut demuxer = Mp4SeekDemuxer::parse(sample_file()).unwrap();
    let mut broken = demuxer.samples()[0].clone();
    broken.sample.byte_offset = u32::MAX as u64;

    assert!(matches!(demuxer.fetch(&[broken]), Err(DemuxError::Io(_))));
    assert!(matches!(demuxer.seek(0.0), Err(DemuxError::Terminated)));
    let first = demuxer.samples()[0].clone();
    assert!(matches!(demuxer.fetch(&[first]), Err(DemuxError::Terminated)));
}

#[test]
fn empty_fetch_does_no_io() {
    struct CountingSource {
        bytes: Vec<u8>,
        reads: usize,
    }

    impl ByteSource for CountingSource {
        fn read_range(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
            self.reads += 1;
            self.bytes.read_range(start, end)
        }

        fn total_len(&self) -> std::io::Result<u64> {
            self.bytes.total_len()
        }
    }

    let source = CountingSource {
        bytes: sample_file(),
        reads: 0,
    };
    let mut demuxer = Mp4SeekDemuxer::parse(source).unwrap();
    let reads_after_parse = demuxer.source().reads;
    assert!(demuxer.fetch(&[]).unwrap().is_empty());
    assert_eq!(demuxer.source().reads, reads_after_parse);
}

#[test]
fn file_without_video_track() {
    let options = options();
    let mut acc = SampleAccumulator::with_options(&options);
    acc.push(TrackKind::Video, vec![0; 4], true, 0, 3000).unwrap();
    acc.push(TrackKind::Audio, vec![0; 4], true, 0, 960).unwrap();
    let (mut video, audio) = acc.finish();
    video.codec_config = Some(AVCC_RECORD.to_vec());

    let mut document = assemble(video, audio, &options).unwrap();
    document.moov_box.trak_boxes.remove(0);
    let bytes = document.to_bytes().unwrap();

    assert!(matches!(
        Mp4SeekDemuxer::parse(bytes),
        Err(DemuxError::NoVideoTrack)
    ));
}

#[test]
fn decoder_support_can_reject_the_config() {
    struct NoAvc;

    impl DecoderSupport for NoAvc {
        fn is_config_supported(&self, config: &VideoDecoderConfig) -> bool {
            !config.codec.starts_with("avc1")
        }
    }

    let result = Mp4SeekDemuxer::parse_with(sample_file(), DemuxOptions::default(), &NoAvc);
    assert!(matches!(
        result,
        Err(DemuxError::UnsupportedCodecConfig(codec)) if codec == "avc1.42c01e"
    ));
}

#[test]
fn empty_video_track_cannot_be_muxed() {
    let options = options();
    let video = Track::new(TrackKind::Video, options.video.timescale);
    let audio = Track::new(TrackKind::Audio, options.audio.timescale);
    assert!(matches!(
        assemble(video, audio, &options),
        Err(MuxError::NoVideoSamples)
    ));
}

#[test]
fn demux_from_file() {
    let path = std::env::temp_dir().join(format!(
        "mp4_sample_table_roundtrip_{}.mp4",
        std::process::id()
    ));
    std::fs::write(&path, sample_file()).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut demuxer = Mp4SeekDemuxer::parse(file).unwrap();
    let window = demuxer.seek(4900.0).unwrap();
    assert_eq!(window.pts_index, 147);
    let fetched = demuxer.fetch(&window.window).unwrap();
    assert_eq!(fetched.len(), 28);
    assert_eq!(
        fetched[0].sample.payload.as_deref(),
        Some(&video_payload(120)[..])
    );

    let _ = std::fs::remove_file(&path);
}

#[test]
fn overflowing_stts_is_a_parse_error() {
    let mut document = timed_document(&[(0, 40), (40, 40)]);
    let stbl_box = &mut document.moov_box.trak_boxes[0].mdia_box.minf_box.stbl_box;
    stbl_box.stts_box = SttsBox {
        entries: vec![
            SttsEntry {
                sample_count: u32::MAX,
                sample_delta: 1,
            },
            SttsEntry {
                sample_count: 3,
                sample_delta: 1,
            },
        ],
    };
    assert!(matches!(
        Mp4SeekDemuxer::parse(document.to_bytes().unwrap()),
        Err(DemuxError::Table(
            SampleTableAccessorError::SampleCountMismatch { .. }
        ))
    ));
}

#[test]
fn fixed_stsz_larger_than_the_file_is_rejected() {
    let mut document = timed_document(&[(0, 40), (40, 40)]);
    let stbl_box = &mut document.moov_box.trak_boxes[0].mdia_box.minf_box.stbl_box;
    stbl_box.stts_box = SttsBox {
        entries: vec![SttsEntry {
            sample_count: u32::MAX,
            sample_delta: 1,
        }],
    };
    stbl_box.stsz_box = StszBox::Fixed {
        sample_size: NonZeroU32::new(1024).unwrap(),
        sample_count: u32::MAX,
    };
    assert!(matches!(
        Mp4SeekDemuxer::parse(document.to_bytes().unwrap()),
        Err(DemuxError::Box(_))
    ));
}

#[test]
fn forged_box_size_fails_without_allocating() {
    let path = std::env::temp_dir().join(format!(
        "mp4_sample_table_forged_{}.mp4",
        std::process::id()
    ));
    let mut bytes = vec![0, 0, 0, 16, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm'];
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 1, b'm', b'o', b'o', b'v']);
    bytes.extend_from_slice(&(1u64 << 40).to_be_bytes());
    bytes.extend_from_slice(&[0; 8]);
    std::fs::write(&path, &bytes).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    assert!(matches!(
        Mp4SeekDemuxer::parse(file),
        Err(DemuxError::Box(_))
    ));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn avc1_without_avcc_is_missing_codec_config() {
    let mut document = timed_document(&[(0, 40), (40, 40)]);
    let stsd_box = &mut document.moov_box.trak_boxes[0]
        .mdia_box
        .minf_box
        .stbl_box
        .stsd_box;
    let Some(SampleEntry::Avc1(avc1_box)) = stsd_box.entries.first_mut() else {
        panic!("expected an avc1 entry");
    };
    avc1_box.avcc_box = None;

    assert!(matches!(
        Mp4SeekDemuxer::parse(document.to_bytes().unwrap()),
        Err(DemuxError::MissingCodecConfig)
    ));
}
