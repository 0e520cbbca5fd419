use std::num::NonZeroU32;

use crate::{Sample, TrackKind, time};

use super::{Mp4FileMuxerOptions, MuxError};

/// エンコーダーが出力した一つのチャンク
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// エンコード済みのデータ
    pub data: Vec<u8>,

    /// タイムスタンプ（マイクロ秒単位）
    pub timestamp_us: u64,

    /// 尺（マイクロ秒単位）
    ///
    /// None のチャンクは蓄積されずに破棄される
    pub duration_us: Option<u64>,

    /// キーフレームかどうか
    pub keyframe: bool,

    /// デコーダー設定（映像なら AVCDecoderConfigurationRecord、音声なら OpusHead）
    pub decoder_config: Option<Vec<u8>>,
}

/// 多重化対象の一つのトラック
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// トラック種別
    pub kind: TrackKind,

    /// タイムスケール
    pub timescale: NonZeroU32,

    /// エンコーダーから届いたデコーダー設定
    pub codec_config: Option<Vec<u8>>,

    /// デコード順に並んだサンプル群
    pub samples: Vec<Sample>,
}

impl Track {
    /// 空のトラックを作成する
    pub fn new(kind: TrackKind, timescale: NonZeroU32) -> Self {
        Self {
            kind,
            timescale,
            codec_config: None,
            samples: Vec::new(),
        }
    }

    /// 全サンプルの尺の合計（タイムスケール単位）
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// トラック領域全体のバイト数
    pub fn region_size(&self) -> u64 {
        self.samples.last().map_or(0, Sample::byte_end)
    }
}

/// 映像・音声のサンプルを受け取り、トラックごとの連続領域上の位置を割り当てながら蓄積する
///
/// [`SampleAccumulator::finish()`] で所有権ごとトラックを引き渡すので、それ以降に追加されることはない
#[derive(Debug, Clone)]
pub struct SampleAccumulator {
    video: Track,
    audio: Track,
}

impl SampleAccumulator {
    /// 各トラックのタイムスケールを指定してインスタンスを生成する
    pub fn new(video_timescale: NonZeroU32, audio_timescale: NonZeroU32) -> Self {
        Self {
            video: Track::new(TrackKind::Video, video_timescale),
            audio: Track::new(TrackKind::Audio, audio_timescale),
        }
    }

    /// オプションに指定されたタイムスケールでインスタンスを生成する
    pub fn with_options(options: &Mp4FileMuxerOptions) -> Self {
        Self::new(options.video.timescale, options.audio.timescale)
    }

    /// 指定トラックの参照を返す
    pub fn track(&self, kind: TrackKind) -> &Track {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    fn track_mut(&mut self, kind: TrackKind) -> &mut Track {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        }
    }

    /// サンプルを末尾に追加する
    ///
    /// タイムスタンプと尺はトラックのタイムスケール単位で、値の検証は行わない。
    /// サイズが 32 ビットに収まらないサンプルは追加せずにエラーを返す
    pub fn push(
        &mut self,
        track: TrackKind,
        payload: Vec<u8>,
        is_sync: bool,
        decode_timestamp: u64,
        duration: u32,
    ) -> Result<&Sample, MuxError> {
        let byte_size = sample_size(track, payload.len())?;
        let t = self.track_mut(track);
        let (sequence_number, byte_offset) = t
            .samples
            .last()
            .map_or((1, 0), |prev| (prev.sequence_number + 1, prev.byte_end()));
        t.samples.push(Sample {
            sequence_number,
            track,
            byte_offset,
            byte_size,
            decode_timestamp,
            composition_timestamp: decode_timestamp,
            duration,
            is_sync_sample: is_sync,
            payload: Some(payload),
        });
        Ok(&t.samples[t.samples.len() - 1])
    }

    /// エンコーダーの出力チャンクをトラックのタイムスケールに変換して追加する
    ///
    /// 尺を持たないチャンクは警告を出して破棄し、None を返す
    pub fn push_chunk(
        &mut self,
        track: TrackKind,
        chunk: EncodedChunk,
    ) -> Result<Option<&Sample>, MuxError> {
        let t = self.track_mut(track);
        if t.codec_config.is_none()
            && let Some(config) = chunk.decoder_config
        {
            tracing::debug!(%track, size = config.len(), "received decoder configuration");
            t.codec_config = Some(config);
        }

        let Some(duration_us) = chunk.duration_us else {
            tracing::warn!(
                %track,
                timestamp_us = chunk.timestamp_us,
                "dropping encoded chunk without duration"
            );
            return Ok(None);
        };

        // 終端時刻を丸めてから差を取ることで、尺の丸め誤差が累積しないようにする
        let start = time::us_to_ticks(chunk.timestamp_us, t.timescale);
        let end = time::us_to_ticks(chunk.timestamp_us.saturating_add(duration_us), t.timescale);
        let duration = u32::try_from(end.saturating_sub(start)).unwrap_or(u32::MAX);
        self.push(track, chunk.data, chunk.keyframe, start, duration)
            .map(Some)
    }

    /// 蓄積を終了して、(映像, 音声) のトラックを返す
    pub fn finish(self) -> (Track, Track) {
        (self.video, self.audio)
    }
}

fn sample_size(track: TrackKind, size: usize) -> Result<u32, MuxError> {
    u32::try_from(size).map_err(|_| MuxError::SampleTooLarge { track, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator() -> SampleAccumulator {
        SampleAccumulator::with_options(&Mp4FileMuxerOptions::default())
    }

    #[test]
    fn offsets_are_tightly_packed_per_track() {
        let mut acc = accumulator();
        acc.push(TrackKind::Video, vec![0; 100], true, 0, 3000).expect("push");
        acc.push(TrackKind::Audio, vec![0; 7], true, 0, 960).expect("push");
        acc.push(TrackKind::Video, vec![0; 40], false, 3000, 3000).expect("push");
        let third = acc
            .push(TrackKind::Video, vec![0; 1], false, 6000, 3000)
            .expect("push");
        assert_eq!((third.sequence_number, third.byte_offset), (3, 140));

        let audio = acc.track(TrackKind::Audio);
        assert_eq!(audio.samples[0].sequence_number, 1);
        assert_eq!(audio.samples[0].byte_offset, 0);
        assert_eq!(acc.track(TrackKind::Video).region_size(), 141);
    }

    #[test]
    fn chunk_without_duration_is_dropped() {
        let mut acc = accumulator();
        let chunk = EncodedChunk {
            data: vec![1, 2, 3],
            timestamp_us: 0,
            duration_us: None,
            keyframe: true,
            decoder_config: Some(vec![9]),
        };
        assert!(acc.push_chunk(TrackKind::Video, chunk).expect("push").is_none());
        let video = acc.track(TrackKind::Video);
        assert!(video.samples.is_empty());
        assert_eq!(video.codec_config.as_deref(), Some(&[9][..]));
    }

    #[test]
    fn chunk_durations_do_not_drift() {
        let mut acc = accumulator();
        for i in 0..150u64 {
            let chunk = EncodedChunk {
                data: vec![0; 10],
                timestamp_us: i * 1_000_000 / 30,
                duration_us: Some(1_000_000 / 30),
                keyframe: i % 60 == 0,
                decoder_config: None,
            };
            acc.push_chunk(TrackKind::Video, chunk).expect("push");
        }
        let (video, _) = acc.finish();
        let total = video.total_duration();
        assert!(total.abs_diff(450_000) <= 1, "total = {total}");
    }

    #[test]
    fn sizes_beyond_32_bits_are_rejected() {
        assert_eq!(sample_size(TrackKind::Audio, 1024).expect("size"), 1024);
        let size = u32::MAX as usize + 1;
        assert!(matches!(
            sample_size(TrackKind::Video, size),
            Err(MuxError::SampleTooLarge { track: TrackKind::Video, size: s }) if s == size
        ));
    }
}
