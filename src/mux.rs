//! MP4 ファイルのマルチプレックス機能
//!
//! エンコーダーが出力したサンプルを [`SampleAccumulator`] に蓄積し、
//! 全サンプルが揃った時点で [`assemble()`] によって ftyp / mdat / moov からなる [`Document`] を生成する。
//! エンコーダーからのイベントをチャネル経由で受け取る場合は [`MuxSession`] を使う。
use std::{num::NonZeroU32, time::Duration};

use crate::{Error, TrackKind, boxes::Brand};

mod accumulator;
mod assembler;
mod session;

pub use accumulator::{EncodedChunk, SampleAccumulator, Track};
pub use assembler::{Document, assemble};
pub use session::{EncoderEvent, MuxSession};

/// 多重化処理中に発生するエラー
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// 映像サンプルが一つもない（音声のみのファイルは生成できない）
    #[error("no video samples to multiplex")]
    NoVideoSamples,

    /// 映像の解像度が設定されていない
    #[error("video resolution is not configured")]
    MissingVideoResolution,

    /// トラックのデコーダー設定がエンコーダーから届いていない
    #[error("missing decoder configuration for the {0} track")]
    MissingCodecConfig(TrackKind),

    /// エンコーダーの設定完了を待つ間にタイムアウトした
    #[error("timed out waiting for the {0} encoder to be configured")]
    ConfigurationTimeout(TrackKind),

    /// エンコーダーが設定完了前に閉じられた
    #[error("{0} encoder was closed before it was configured")]
    EncoderClosed(TrackKind),

    /// サンプルのサイズが 32 ビットに収まらない
    #[error("{track} sample of {size} bytes is too large")]
    SampleTooLarge {
        /// 追加先のトラック
        track: TrackKind,
        /// サンプルのバイト数
        size: usize,
    },

    /// エンコーダーがエラーを報告した
    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    /// ボックスの構築・エンコードに失敗した
    #[error(transparent)]
    Box(#[from] Error),
}

/// 映像トラック用のオプション
#[derive(Debug, Clone)]
pub struct VideoTrackOptions {
    /// トラックのタイムスケール
    pub timescale: NonZeroU32,

    /// 映像の幅（ピクセル単位）
    pub width: Option<u16>,

    /// 映像の高さ（ピクセル単位）
    pub height: Option<u16>,
}

impl Default for VideoTrackOptions {
    fn default() -> Self {
        Self {
            timescale: DEFAULT_VIDEO_TIMESCALE,
            width: None,
            height: None,
        }
    }
}

/// 音声 (Opus) トラック用のオプション
#[derive(Debug, Clone)]
pub struct AudioTrackOptions {
    /// トラックのタイムスケール
    pub timescale: NonZeroU32,

    /// チャンネル数
    pub channel_count: u8,

    /// エンコーダーから OpusHead が届かなかった場合に dOps に書き込むプリスキップ値
    pub pre_skip: u16,

    /// sgpd の roll グループに書き込むロール距離（サンプル数、負値は過去方向）
    pub roll_distance: i16,
}

impl Default for AudioTrackOptions {
    fn default() -> Self {
        Self {
            timescale: DEFAULT_AUDIO_TIMESCALE,
            channel_count: 2,
            pre_skip: 312,
            roll_distance: -4,
        }
    }
}

/// 多重化処理用のオプション
#[derive(Debug, Clone)]
pub struct Mp4FileMuxerOptions {
    /// ftyp ボックスのメジャーブランド
    pub major_brand: Brand,

    /// ftyp ボックスの互換ブランド
    pub compatible_brands: Vec<Brand>,

    /// ファイル作成時刻（UNIX エポックからの経過時間、生成される MP4 のメタデータとして使われる）
    pub creation_timestamp: Duration,

    /// 一つのチャンクにまとめるサンプル数
    pub samples_per_chunk: NonZeroU32,

    /// 映像トラックの設定
    pub video: VideoTrackOptions,

    /// 音声トラックの設定
    pub audio: AudioTrackOptions,

    /// [`MuxSession::wait_configured()`] でエンコーダーの設定完了を待つ最大時間
    pub config_timeout: Duration,
}

impl Default for Mp4FileMuxerOptions {
    fn default() -> Self {
        Self {
            major_brand: Brand::ISOM,
            compatible_brands: vec![Brand::ISOM, Brand::ISO2, Brand::AVC1, Brand::MP41],
            creation_timestamp: Duration::ZERO,
            samples_per_chunk: NonZeroU32::MIN,
            video: VideoTrackOptions::default(),
            audio: AudioTrackOptions::default(),
            config_timeout: DEFAULT_CONFIG_TIMEOUT,
        }
    }
}

const DEFAULT_VIDEO_TIMESCALE: NonZeroU32 = match NonZeroU32::new(90_000) {
    Some(v) => v,
    None => unreachable!(),
};

const DEFAULT_AUDIO_TIMESCALE: NonZeroU32 = match NonZeroU32::new(48_000) {
    Some(v) => v,
    None => unreachable!(),
};

const DEFAULT_CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_track() {
        assert_eq!(
            MuxError::ConfigurationTimeout(TrackKind::Audio).to_string(),
            "timed out waiting for the audio encoder to be configured"
        );
        assert_eq!(
            MuxError::NoVideoSamples.to_string(),
            "no video samples to multiplex"
        );
    }

    #[test]
    fn default_options() {
        let options = Mp4FileMuxerOptions::default();
        assert_eq!(options.samples_per_chunk.get(), 1);
        assert_eq!(options.config_timeout, Duration::from_secs(10));
        assert_eq!(options.audio.roll_distance, -4);
        assert!(options.video.width.is_none());
    }
}
