use crate::TrackKind;

/// 多重化・逆多重化の両方で使われるサンプル情報
///
/// タイムスタンプと尺は、サンプルが属するトラックのタイムスケール単位で表現される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sample {
    /// トラック内でのサンプル番号（1 始まり、デコード順に単調増加）
    pub sequence_number: u32,

    /// サンプルが属するトラック
    pub track: TrackKind,

    /// サンプルデータの位置
    ///
    /// 多重化時は mdat 内のトラック領域の先頭からの相対位置、
    /// 逆多重化時はファイル先頭からの絶対位置となる
    pub byte_offset: u64,

    /// サンプルデータのバイト数
    pub byte_size: u32,

    /// デコードタイムスタンプ
    pub decode_timestamp: u64,

    /// コンポジション（表示）タイムスタンプ
    ///
    /// 音声の場合は常に [`Sample::decode_timestamp`] と等しい
    pub composition_timestamp: u64,

    /// サンプルの尺
    pub duration: u32,

    /// 同期サンプル（キーフレーム）かどうか
    pub is_sync_sample: bool,

    /// サンプルデータ（読み込み前や mdat に移動済みの場合は None）
    pub payload: Option<Vec<u8>>,
}

impl Sample {
    /// サンプルデータの終端位置（[`Sample::byte_offset`] と同じ基準）
    pub fn byte_end(&self) -> u64 {
        self.byte_offset.saturating_add(self.byte_size as u64)
    }
}
