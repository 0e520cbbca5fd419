//! MP4 のサンプルテーブルを組み立てるマルチプレクサーと、シーク可能なデマルチプレクサーを提供するライブラリ
//!
//! - [`mux`]: エンコード済みのサンプル列から ftyp / mdat / moov で構成される MP4 ファイルを生成する
//! - [`demux`]: 既存の MP4 ファイルの映像トラックを索引化して、キーフレーム起点のシークや一括読み込みを行う
//! - [`boxes`]: 上記で使われる MP4 ボックス群のエンコードおよびデコード
#![warn(missing_docs)]

mod auxiliary;
mod basic_types;
pub mod boxes;
mod boxes_moov_tree;
mod boxes_sample_entry;
mod codec;
pub mod demux;
pub mod mux;
mod sample;
pub mod time;

pub use basic_types::{
    BaseBox, BoxHeader, BoxSize, BoxType, Either, FixedPointNumber, FullBox, FullBoxFlags,
    FullBoxHeader, Mp4FileTime, Uint, Utf8String,
};
pub use codec::{Decode, Encode, Error, ErrorKind, Result};
pub use sample::Sample;

/// トラックの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    /// 映像トラック
    Video,

    /// 音声トラック
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

// [NOTE]
// Windows 環境では aux.rs というファイル名が予約語で git clone に失敗するため、
// ファイル名は auxiliary.rs にして、ここで aux モジュールとして再エクスポートしている
pub mod aux {
    //! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

    pub use crate::auxiliary::{SampleTableAccessor, SampleTableAccessorError, TableSample};
}
