//! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール
use std::num::NonZeroU32;

use crate::{
    Either,
    boxes::{StblBox, StszBox},
};

/// [`SampleTableAccessor::new()`] で検出されるサンプルテーブルの不整合
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleTableAccessorError {
    /// stts と stsz のサンプル数が一致しない
    #[error("sample count mismatch: stts has {stts_sample_count} samples, stsz has {stsz_sample_count}")]
    SampleCountMismatch {
        /// stts に記録されたサンプル数
        stts_sample_count: u64,
        /// stsz に記録されたサンプル数
        stsz_sample_count: u32,
    },

    /// ctts のサンプル数が stsz と一致しない
    #[error("sample count mismatch: ctts has {ctts_sample_count} samples, stsz has {stsz_sample_count}")]
    CompositionOffsetCountMismatch {
        /// ctts に記録されたサンプル数
        ctts_sample_count: u64,
        /// stsz に記録されたサンプル数
        stsz_sample_count: u32,
    },

    /// stsc の最初のエントリーがチャンク 1 から始まっていない、または昇順になっていない
    #[error("invalid stsc entry at index {entry_index}")]
    InvalidChunkRun {
        /// 問題のあるエントリーの位置
        entry_index: usize,
    },

    /// 全チャンクを割り当てた後もサンプルが残っている
    #[error("{remaining_samples} samples are not covered by any chunk")]
    SamplesWithoutChunk {
        /// チャンクに属さないサンプル数
        remaining_samples: u32,
    },
}

/// [`SampleTableAccessor`] が展開した一つのサンプルの情報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableSample {
    /// サンプル番号（1 始まり、デコード順）
    pub sample_number: NonZeroU32,

    /// サンプルが属するチャンクの番号（1 始まり）
    pub chunk_number: NonZeroU32,

    /// ファイル先頭からのサンプルデータの位置
    pub data_offset: u64,

    /// サンプルデータのバイト数
    pub data_size: u32,

    /// デコードタイムスタンプ（タイムスケール単位）
    pub decode_time: u64,

    /// コンポジションタイムスタンプ（タイムスケール単位、負になる場合は 0 に丸める）
    pub composition_time: u64,

    /// サンプルの尺（タイムスケール単位）
    pub duration: u32,

    /// 同期サンプル（キーフレーム）かどうか
    pub is_sync_sample: bool,
}

/// [`StblBox`] をラップして、その中のサンプル情報をサンプル単位で取り出せるようにするための構造体
///
/// 生成時にテーブル間の整合性を検証して、全サンプルをデコード順に展開する
#[derive(Debug, Clone)]
pub struct SampleTableAccessor<'a> {
    stbl_box: &'a StblBox,
    samples: Vec<TableSample>,
}

impl<'a> SampleTableAccessor<'a> {
    /// 引数で渡された [`StblBox`] 用の [`SampleTableAccessor`] インスタンスを生成する
    pub fn new(stbl_box: &'a StblBox) -> Result<Self, SampleTableAccessorError> {
        let stsz_sample_count = stbl_box.stsz_box.sample_count();

        // エントリーごとのサンプル数は u32 に収まっても、合計は収まるとは限らない
        let stts_sample_count = stbl_box
            .stts_box
            .entries
            .iter()
            .map(|e| u64::from(e.sample_count))
            .sum::<u64>();
        if stts_sample_count != u64::from(stsz_sample_count) {
            return Err(SampleTableAccessorError::SampleCountMismatch {
                stts_sample_count,
                stsz_sample_count,
            });
        }

        if let Some(ctts_box) = &stbl_box.ctts_box {
            let ctts_sample_count = ctts_box
                .entries
                .iter()
                .map(|e| u64::from(e.sample_count))
                .sum::<u64>();
            if ctts_sample_count != u64::from(stsz_sample_count) {
                return Err(SampleTableAccessorError::CompositionOffsetCountMismatch {
                    ctts_sample_count,
                    stsz_sample_count,
                });
            }
        }

        let chunk_numbers = Self::expand_chunk_numbers(stbl_box, stsz_sample_count)?;

        let mut composition_offsets = stbl_box
            .ctts_box
            .iter()
            .flat_map(|b| b.sample_offsets());
        let mut samples = Vec::with_capacity(stsz_sample_count as usize);
        let mut decode_time = 0u64;
        let mut next_offset_in_chunk = None;
        let mut current_chunk = None;
        for (i, (duration, chunk_number)) in stbl_box
            .stts_box
            .sample_deltas()
            .zip(chunk_numbers)
            .enumerate()
        {
            let sample_number = NonZeroU32::MIN.saturating_add(i as u32);
            let data_size = Self::size_of(stbl_box, i);
            if current_chunk != Some(chunk_number) {
                current_chunk = Some(chunk_number);
                next_offset_in_chunk = Some(Self::chunk_offset_of(stbl_box, chunk_number));
            }
            let data_offset = next_offset_in_chunk.unwrap_or_default();
            next_offset_in_chunk = Some(data_offset.saturating_add(data_size as u64));

            let composition_offset = composition_offsets.next().unwrap_or(0) as i64;
            let composition_time = (decode_time as i64 + composition_offset).max(0) as u64;

            samples.push(TableSample {
                sample_number,
                chunk_number,
                data_offset,
                data_size,
                decode_time,
                composition_time,
                duration,
                is_sync_sample: Self::sync_of(stbl_box, sample_number),
            });
            decode_time += duration as u64;
        }

        tracing::trace!(
            samples = samples.len(),
            chunks = Self::chunk_count_of(stbl_box),
            "expanded sample table"
        );
        Ok(Self { stbl_box, samples })
    }

    /// ラップしている [`StblBox`] を返す
    pub fn stbl_box(&self) -> &'a StblBox {
        self.stbl_box
    }

    /// トラック内のサンプルの数を取得する
    pub fn sample_count(&self) -> u32 {
        self.samples.len() as u32
    }

    /// トラック内のチャンクの数を取得する
    pub fn chunk_count(&self) -> u32 {
        Self::chunk_count_of(self.stbl_box)
    }

    /// 全サンプルの尺の合計（タイムスケール単位）
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// デコード順に並んだ全サンプルを返す
    pub fn samples(&self) -> &[TableSample] {
        &self.samples
    }

    /// 指定された番号のサンプルを返す
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn get_sample(&self, sample_number: NonZeroU32) -> Option<&TableSample> {
        self.samples.get(sample_number.get() as usize - 1)
    }

    fn chunk_count_of(stbl_box: &StblBox) -> u32 {
        match &stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.len() as u32,
            Either::B(b) => b.chunk_offsets.len() as u32,
        }
    }

    fn chunk_offset_of(stbl_box: &StblBox, chunk_number: NonZeroU32) -> u64 {
        let i = chunk_number.get() as usize - 1;
        match &stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.get(i).map(|v| *v as u64),
            Either::B(b) => b.chunk_offsets.get(i).copied(),
        }
        .unwrap_or_default()
    }

    fn size_of(stbl_box: &StblBox, sample_index: usize) -> u32 {
        match &stbl_box.stsz_box {
            StszBox::Fixed { sample_size, .. } => sample_size.get(),
            StszBox::Variable { entry_sizes } => {
                entry_sizes.get(sample_index).copied().unwrap_or_default()
            }
        }
    }

    fn sync_of(stbl_box: &StblBox, sample_number: NonZeroU32) -> bool {
        // stss ボックスが存在しない場合は全てが同期サンプル扱い
        stbl_box
            .stss_box
            .as_ref()
            .is_none_or(|b| b.sample_numbers.binary_search(&sample_number).is_ok())
    }

    // 各サンプルが属するチャンク番号を、デコード順に並べて返す
    fn expand_chunk_numbers(
        stbl_box: &StblBox,
        sample_count: u32,
    ) -> Result<Vec<NonZeroU32>, SampleTableAccessorError> {
        let chunk_count = Self::chunk_count_of(stbl_box);
        let entries = &stbl_box.stsc_box.entries;
        let mut chunk_numbers = Vec::with_capacity(sample_count as usize);
        let mut remaining = sample_count;

        for (i, entry) in entries.iter().enumerate() {
            let next_first_chunk = match entries.get(i + 1) {
                Some(next) if next.first_chunk > entry.first_chunk => next.first_chunk.get(),
                Some(_) => {
                    return Err(SampleTableAccessorError::InvalidChunkRun { entry_index: i + 1 });
                }
                None => chunk_count.saturating_add(1),
            };
            if i == 0 && entry.first_chunk != NonZeroU32::MIN {
                return Err(SampleTableAccessorError::InvalidChunkRun { entry_index: 0 });
            }
            for chunk in entry.first_chunk.get()..next_first_chunk {
                if remaining == 0 {
                    break;
                }
                let n = entry.sample_per_chunk.min(remaining);
                let chunk_number = NonZeroU32::MIN.saturating_add(chunk - 1);
                chunk_numbers.extend(std::iter::repeat_n(chunk_number, n as usize));
                remaining -= n;
            }
        }

        if remaining > 0 {
            return Err(SampleTableAccessorError::SamplesWithoutChunk {
                remaining_samples: remaining,
            });
        }
        Ok(chunk_numbers)
    }
}
