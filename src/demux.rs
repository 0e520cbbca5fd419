//! 既存の MP4 ファイルの映像トラックを索引化するシーク可能なデマルチプレックス機能
//!
//! [`Mp4SeekDemuxer::parse()`] は [`ByteSource`] から moov ボックスだけを読み込んで、
//! 最初の映像トラックのサンプルをデコード順と表示順の両方で索引化する。
//! 索引の構築後は [`Mp4SeekDemuxer::seek()`] でキーフレームから始まるサンプル群を選び、
//! [`Mp4SeekDemuxer::fetch()`] で一回の範囲読み込みによってそれらのデータを取得できる。
use std::{num::NonZeroU32, time::Duration};

use crate::{Error, Sample, TrackKind, aux::SampleTableAccessorError, time};

mod fetch;
mod indexer;
mod seek;
mod source;

pub use source::ByteSource;

/// 逆多重化処理中に発生するエラー
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    /// moov ボックスが見つからない
    #[error("moov box not found")]
    MissingMoovBox,

    /// 映像トラックが存在しない
    #[error("no video track found")]
    NoVideoTrack,

    /// 映像トラックにデコーダー設定がない
    #[error("video track has no decoder configuration")]
    MissingCodecConfig,

    /// デコーダー設定に対応していない
    #[error("unsupported decoder configuration: {0}")]
    UnsupportedCodecConfig(String),

    /// 指定時刻に表示されるサンプルがない
    #[error("no sample is presented at {0} ms")]
    NoMatchingSample(f64),

    /// 対象サンプルより前にキーフレームがない
    #[error("no keyframe precedes the sample at presentation index {0}")]
    NoPrecedingKeyframe(usize),

    /// 以前の読み込み失敗によって、インスタンスが使用不能になっている
    #[error("demuxer was terminated by an earlier read failure")]
    Terminated,

    /// 読み込みに失敗した
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// ボックスのデコードに失敗した
    #[error(transparent)]
    Box(#[from] Error),

    /// サンプルテーブルに不整合がある
    #[error(transparent)]
    Table(#[from] SampleTableAccessorError),
}

/// 逆多重化処理用のオプション
#[derive(Debug, Clone)]
pub struct DemuxOptions {
    /// [`Mp4SeekDemuxer::seek()`] が返すサンプル群の最小数
    ///
    /// ファイル末尾に近い場合はこれより少なくなる
    pub min_queue_depth: usize,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            min_queue_depth: 20,
        }
    }
}

/// ファイル内のトラックの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// トラック ID
    pub track_id: u32,

    /// トラック種別
    pub kind: TrackKind,

    /// タイムスケール
    pub timescale: NonZeroU32,

    /// トラックの尺
    pub duration: Duration,
}

/// 映像デコーダーの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    /// コーデック文字列（例: "avc1.42c01e"）
    pub codec: String,

    /// 符号化された映像の幅
    pub coded_width: u16,

    /// 符号化された映像の高さ
    pub coded_height: u16,

    /// コーデック設定ボックスのペイロード（ボックスヘッダーを除く）
    pub description: Vec<u8>,
}

/// デコーダーが設定に対応しているかどうかを判定する
pub trait DecoderSupport {
    /// 対応している場合は true を返す
    fn is_config_supported(&self, config: &VideoDecoderConfig) -> bool;
}

/// どの設定にも対応しているとみなす [`DecoderSupport`] の実装
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllDecoders;

impl DecoderSupport for AcceptAllDecoders {
    fn is_config_supported(&self, _config: &VideoDecoderConfig) -> bool {
        true
    }
}

/// 索引化された映像サンプル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSample {
    /// サンプル情報（`byte_offset` はファイル先頭からの位置）
    pub sample: Sample,

    /// 表示順での位置
    pub pts_index: usize,

    /// デコード順での位置
    pub dts_index: usize,
}

/// [`Mp4SeekDemuxer::seek()`] の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekWindow {
    /// 指定時刻に表示されるサンプルの表示順での位置
    pub pts_index: usize,

    /// 同じサンプルのデコード順での位置
    pub dts_index: usize,

    /// キーフレームから始まり、表示順に並んだサンプル群（データは未読み込み）
    pub window: Vec<IndexedSample>,
}

/// 映像トラックを索引化したシーク可能なデマルチプレクサー
#[derive(Debug)]
pub struct Mp4SeekDemuxer<S> {
    source: S,
    options: DemuxOptions,
    tracks: Vec<TrackInfo>,
    duration_ms: f64,
    decoder_config: VideoDecoderConfig,
    timescale: NonZeroU32,
    samples: Vec<IndexedSample>,
    pts_to_dts: Vec<usize>,
    time_offset_ms: f64,
    max_duration_ms: f64,
    terminated: bool,
}

impl<S: ByteSource> Mp4SeekDemuxer<S> {
    /// デフォルトのオプションで索引を構築する
    pub fn parse(source: S) -> Result<Self, DemuxError> {
        Self::parse_with(source, DemuxOptions::default(), &AcceptAllDecoders)
    }

    /// オプションとデコーダーの対応判定を指定して索引を構築する
    pub fn parse_with(
        mut source: S,
        options: DemuxOptions,
        support: &dyn DecoderSupport,
    ) -> Result<Self, DemuxError> {
        let moov_box = indexer::load_moov_box(&mut source)?;
        let tracks = indexer::track_infos(&moov_box);
        let mvhd_box = &moov_box.mvhd_box;
        let duration_ms = time::ticks_to_ms(mvhd_box.duration, mvhd_box.timescale);

        let trak_box = indexer::find_video_trak(&moov_box)?;
        let decoder_config = indexer::decoder_config(trak_box)?;
        if !support.is_config_supported(&decoder_config) {
            return Err(DemuxError::UnsupportedCodecConfig(decoder_config.codec));
        }
        let index = indexer::index_samples(trak_box, source.total_len()?)?;
        let max_duration_ms = index
            .samples
            .iter()
            .map(|s| time::ticks_to_ms(u64::from(s.sample.duration), index.timescale))
            .fold(0.0, f64::max);

        tracing::debug!(
            codec = %decoder_config.codec,
            samples = index.samples.len(),
            tracks = tracks.len(),
            time_offset_ms = index.time_offset_ms,
            "indexed video track"
        );

        Ok(Self {
            source,
            options,
            tracks,
            duration_ms,
            decoder_config,
            timescale: index.timescale,
            samples: index.samples,
            pts_to_dts: index.pts_to_dts,
            time_offset_ms: index.time_offset_ms,
            max_duration_ms,
            terminated: false,
        })
    }

    /// ファイル内の映像・音声トラックの一覧を返す
    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    /// ムービー全体の尺（ミリ秒単位）
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// 映像デコーダーの設定を返す
    pub fn video_decoder_config(&self) -> &VideoDecoderConfig {
        &self.decoder_config
    }

    /// 映像トラックのタイムスケール
    pub fn timescale(&self) -> NonZeroU32 {
        self.timescale
    }

    /// 時刻から差し引かれる、最初のサンプルの表示時刻（ミリ秒単位）
    pub fn time_offset_ms(&self) -> f64 {
        self.time_offset_ms
    }

    /// デコード順に並んだ全サンプル
    pub fn samples(&self) -> &[IndexedSample] {
        &self.samples
    }

    /// 表示順での位置を指定してサンプルを取得する
    pub fn sample_by_pts_index(&self, pts_index: usize) -> Option<&IndexedSample> {
        let dts_index = self.pts_index_to_dts_index(pts_index)?;
        self.samples.get(dts_index)
    }

    /// デコード順での位置を表示順での位置に変換する
    pub fn dts_index_to_pts_index(&self, dts_index: usize) -> Option<usize> {
        self.samples.get(dts_index).map(|s| s.pts_index)
    }

    /// 表示順での位置をデコード順での位置に変換する
    pub fn pts_index_to_dts_index(&self, pts_index: usize) -> Option<usize> {
        self.pts_to_dts.get(pts_index).copied()
    }

    /// 指定時刻（ミリ秒単位）に表示されるサンプルを返す
    ///
    /// 各サンプルは `[表示時刻, 表示時刻 + 尺)` の半開区間を受け持つ
    pub fn sample_at_time(&self, time_ms: f64) -> Option<&IndexedSample> {
        let pts_index = self.pts_index_at_time(time_ms)?;
        self.sample_by_pts_index(pts_index)
    }

    /// 指定時刻を含む、キーフレームから始まるサンプル群を選ぶ
    ///
    /// 失敗してもインスタンスは引き続き使用できる
    pub fn seek(&self, target_ms: f64) -> Result<SeekWindow, DemuxError> {
        if self.terminated {
            return Err(DemuxError::Terminated);
        }
        let pts_index = self
            .pts_index_at_time(target_ms)
            .ok_or(DemuxError::NoMatchingSample(target_ms))?;
        let range = seek::window_range(
            self.pts_to_dts.len(),
            |i| self.is_sync_at_pts(i),
            pts_index,
            self.options.min_queue_depth,
        )?;
        let window: Vec<_> = range
            .filter_map(|i| self.sample_by_pts_index(i))
            .cloned()
            .collect();
        tracing::trace!(
            target_ms,
            pts_index,
            window = window.len(),
            "selected seek window"
        );

        Ok(SeekWindow {
            pts_index,
            dts_index: self.pts_to_dts[pts_index],
            window,
        })
    }

    /// 指定されたサンプル群のデータを一回の範囲読み込みで取得して、デコード順に並べて返す
    ///
    /// 読み込みに失敗した場合はエラーを返し、以降の [`Self::seek()`] と [`Self::fetch()`] は
    /// すべて [`DemuxError::Terminated`] で失敗する
    pub fn fetch(&mut self, samples: &[IndexedSample]) -> Result<Vec<IndexedSample>, DemuxError> {
        if self.terminated {
            return Err(DemuxError::Terminated);
        }
        fetch::fetch_samples(&mut self.source, samples).map_err(|e| {
            tracing::warn!(error = %e, "sample read failed; demuxer terminated");
            self.terminated = true;
            DemuxError::Io(e)
        })
    }

    /// バイト列の供給元を返す
    pub fn source(&self) -> &S {
        &self.source
    }

    /// インスタンスを破棄して、バイト列の供給元を返す
    pub fn into_source(self) -> S {
        self.source
    }

    fn is_sync_at_pts(&self, pts_index: usize) -> bool {
        self.sample_by_pts_index(pts_index)
            .is_some_and(|s| s.sample.is_sync_sample)
    }

    fn presentation_interval_ms(&self, sample: &Sample) -> (f64, f64) {
        let start = time::ticks_to_ms(sample.composition_timestamp, self.timescale);
        let end = time::ticks_to_ms(
            sample
                .composition_timestamp
                .saturating_add(u64::from(sample.duration)),
            self.timescale,
        );
        (start - self.time_offset_ms, end - self.time_offset_ms)
    }

    fn pts_index_at_time(&self, time_ms: f64) -> Option<usize> {
        // 表示時刻は表示順に非減少なので、開始時刻が time_ms 以下のサンプルを後ろから調べる。
        // ctts で区間が重なりうるので、最長の尺の分だけ遡る
        let count = self.pts_to_dts.partition_point(|&dts_index| {
            let (start, _) = self.presentation_interval_ms(&self.samples[dts_index].sample);
            start <= time_ms
        });
        (0..count)
            .rev()
            .map(|pts_index| {
                let sample = &self.samples[self.pts_to_dts[pts_index]].sample;
                (pts_index, self.presentation_interval_ms(sample))
            })
            .take_while(|&(_, (start, _))| start + self.max_duration_ms >= time_ms)
            .find(|&(_, (_, end))| time_ms < end)
            .map(|(pts_index, _)| pts_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        assert_eq!(DemuxOptions::default().min_queue_depth, 20);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            DemuxError::NoMatchingSample(1500.0).to_string(),
            "no sample is presented at 1500 ms"
        );
        assert_eq!(
            DemuxError::Terminated.to_string(),
            "demuxer was terminated by an earlier read failure"
        );
    }
}
