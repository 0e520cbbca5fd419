use std::{
    ops::{BitAnd, Shl, Shr, Sub},
    time::Duration,
};

use crate::{Decode, Encode, Error, Result};

/// 全てのボックスが実装するトレイト
///
/// 標準ライブラリの [`std::boxed::Box`] との衝突を避けるために `BaseBox` という名前にしている
pub trait BaseBox {
    /// ボックスの種別
    fn box_type(&self) -> BoxType;

    /// 未知のボックスかどうか
    fn is_unknown_box(&self) -> bool {
        false
    }

    /// 子ボックスを走査するイテレーターを返す
    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>>;
}

pub(crate) fn as_box_object<T: BaseBox>(t: &T) -> &dyn BaseBox {
    t
}

/// フルボックスを表すトレイト
pub trait FullBox: BaseBox {
    /// フルボックスのバージョン
    fn full_box_version(&self) -> u8;

    /// フルボックスのフラグ
    fn full_box_flags(&self) -> FullBoxFlags;
}

/// [`BaseBox`] に共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHeader {
    /// ボックスの種別
    pub box_type: BoxType,

    /// ボックスのサイズ（ヘッダー部分を含む）
    pub box_size: BoxSize,
}

impl BoxHeader {
    /// 通常のボックスのヘッダーのサイズ
    pub const MIN_SIZE: usize = 8;

    /// 先頭の数バイトからヘッダーをデコードする際に読み込めば十分なバイト数
    pub const MAX_SIZE: usize = 4 + 8 + 4 + 16;

    /// 種別とサイズを指定してヘッダーを作成する
    pub const fn new(box_type: BoxType, box_size: BoxSize) -> Self {
        Self { box_type, box_size }
    }

    /// サイズ未確定のヘッダーを作成する
    ///
    /// ボックス全体のエンコード後に [`BoxHeader::finalize_box_size()`] でサイズを書き込むこと
    pub const fn new_variable_size(box_type: BoxType) -> Self {
        Self::new(box_type, BoxSize::VARIABLE_SIZE)
    }

    /// エンコード済みのボックス全体のバイト列を受け取って、先頭のサイズフィールドを確定させる
    pub fn finalize_box_size(self, box_bytes: &mut [u8]) -> Result<()> {
        if self.box_size != BoxSize::VARIABLE_SIZE {
            return Err(Error::invalid_input(
                "Only a variable size header can be finalized",
            ));
        }
        let size = u32::try_from(box_bytes.len()).map_err(|_| {
            Error::invalid_input(format!(
                "Box '{}' is too large for a 32-bit size field: {} bytes",
                self.box_type,
                box_bytes.len()
            ))
        })?;
        size.encode(box_bytes)?;
        Ok(())
    }

    /// ヘッダーをエンコードした際のバイト数を返す
    pub const fn external_size(self) -> usize {
        self.box_type.external_size() + self.box_size.external_size()
    }

    /// ヘッダーを宣言されたサイズのペイロードと一緒にデコードする
    ///
    /// サイズが 0 のボックスは `buf` の末尾までをペイロードとして扱う
    pub fn decode_header_and_payload(buf: &[u8]) -> Result<(Self, &[u8])> {
        let (header, header_size) = Self::decode(buf)?;
        let end = if header.box_size == BoxSize::VARIABLE_SIZE {
            buf.len()
        } else {
            usize::try_from(header.box_size.get())
                .ok()
                .filter(|&end| end <= buf.len())
                .ok_or_else(|| {
                    Error::invalid_data(format!(
                        "Box '{}' declares {} bytes but only {} are available",
                        header.box_type,
                        header.box_size.get(),
                        buf.len()
                    ))
                })?
        };
        Ok((header, &buf[header_size..end]))
    }
}

impl Encode for BoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = match self.box_size {
            BoxSize::U32(size) => size.encode(buf)?,
            BoxSize::U64(_) => 1u32.encode(buf)?,
        };
        match self.box_type {
            BoxType::Normal(ty) => offset += ty.encode(&mut buf[offset..])?,
            BoxType::Uuid(ty) => {
                offset += b"uuid".encode(&mut buf[offset..])?;
                offset += ty.encode(&mut buf[offset..])?;
            }
        }
        if let BoxSize::U64(size) = self.box_size {
            offset += size.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Decode for BoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let size = u32::decode_at(buf, &mut offset)?;
        let ty = <[u8; 4]>::decode_at(buf, &mut offset)?;
        let box_type = if ty == *b"uuid" {
            BoxType::Uuid(<[u8; 16]>::decode_at(buf, &mut offset)?)
        } else {
            BoxType::Normal(ty)
        };
        let box_size = if size == 1 {
            BoxSize::U64(u64::decode_at(buf, &mut offset)?)
        } else {
            BoxSize::U32(size)
        };

        let header = Self::new(box_type, box_size);
        if box_size != BoxSize::VARIABLE_SIZE && box_size.get() < header.external_size() as u64 {
            return Err(Error::invalid_data(format!(
                "Box '{box_type}' is smaller than its own header: {} bytes",
                box_size.get()
            )));
        }
        Ok((header, offset))
    }
}

/// [`FullBox`] に共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxHeader {
    /// バージョン
    pub version: u8,

    /// フラグ
    pub flags: FullBoxFlags,
}

impl FullBoxHeader {
    /// フルボックスへの参照を受け取って、対応するヘッダーを作成する
    pub fn from_box<B: FullBox>(b: &B) -> Self {
        Self {
            version: b.full_box_version(),
            flags: b.full_box_flags(),
        }
    }
}

impl Encode for FullBoxHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.version.encode(buf)?;
        Ok(offset + self.flags.encode(&mut buf[offset..])?)
    }
}

impl Decode for FullBoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let version = u8::decode_at(buf, &mut offset)?;
        let flags = FullBoxFlags::decode_at(buf, &mut offset)?;
        Ok((Self { version, flags }, offset))
    }
}

/// [`FullBox`] のヘッダーに含まれる 24 ビットのフラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxFlags(u32);

impl FullBoxFlags {
    /// [`u32`] を受け取って、対応するフラグを作成する
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// `(ビット位置、セットされているかどうか)` の列からフラグを作成する
    pub fn from_flags<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (usize, bool)>,
    {
        Self(
            iter.into_iter()
                .filter(|(_, set)| *set)
                .fold(0, |acc, (bit, _)| acc | (1 << bit)),
        )
    }

    /// 対応する [`u32`] 値を返す
    pub const fn get(self) -> u32 {
        self.0
    }

    /// 指定されたビット位置のフラグがセットされているかどうか
    pub const fn is_set(self, i: usize) -> bool {
        (self.0 & (1 << i)) != 0
    }
}

impl Encode for FullBoxFlags {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.to_be_bytes()[1..].encode(buf)
    }
}

impl Decode for FullBoxFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (bytes, size) = <[u8; 3]>::decode(buf)?;
        Ok((Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])), size))
    }
}

/// [`BaseBox`] のサイズ
///
/// ファイル末尾のボックスに限りサイズを 0 にして「ファイル終端まで」を表すことができる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum BoxSize {
    U32(u32),
    U64(u64),
}

impl BoxSize {
    /// ファイル終端までのサイズを表す値
    pub const VARIABLE_SIZE: Self = Self::U32(0);

    /// ボックス種別とペイロードサイズから、ヘッダー込みのサイズを計算する
    ///
    /// 32 ビットに収まらない場合は 64 ビット形式になる
    pub fn with_payload_size(box_type: BoxType, payload_size: u64) -> Self {
        let size = 4 + box_type.external_size() as u64 + payload_size;
        match u32::try_from(size) {
            Ok(size) => Self::U32(size),
            Err(_) => Self::U64(size + 8),
        }
    }

    /// サイズの値を返す
    pub const fn get(self) -> u64 {
        match self {
            BoxSize::U32(v) => v as u64,
            BoxSize::U64(v) => v,
        }
    }

    /// ヘッダー内のサイズフィールドのバイト数
    pub const fn external_size(self) -> usize {
        match self {
            BoxSize::U32(_) => 4,
            BoxSize::U64(_) => 4 + 8,
        }
    }
}

/// [`BaseBox`] の種別
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoxType {
    /// 四文字で表現される通常のボックス種別
    Normal([u8; 4]),

    /// UUID 形式のボックス種別
    Uuid([u8; 16]),
}

impl BoxType {
    /// 種別を表すバイト列を返す
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BoxType::Normal(ty) => &ty[..],
            BoxType::Uuid(ty) => &ty[..],
        }
    }

    /// ヘッダー内の種別フィールドのバイト数
    pub const fn external_size(self) -> usize {
        match self {
            Self::Normal(_) => 4,
            Self::Uuid(_) => 4 + 16,
        }
    }

    /// `expected` と同じ種別であるかをチェックする
    pub fn expect(self, expected: Self) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::invalid_data(format!(
                "Expected box type '{expected}', but got '{self}'"
            )))
        }
    }
}

impl std::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoxType::Normal(ty) => match std::str::from_utf8(ty) {
                Ok(ty) => f.debug_tuple("BoxType").field(&ty).finish(),
                Err(_) => f.debug_tuple("BoxType").field(ty).finish(),
            },
            BoxType::Uuid(ty) => f.debug_tuple("BoxType").field(ty).finish(),
        }
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let BoxType::Normal(ty) = self
            && let Ok(ty) = std::str::from_utf8(&ty[..])
        {
            return write!(f, "{ty}");
        }
        write!(f, "{:?}", self.as_bytes())
    }
}

/// MP4 ファイル内の時刻（1904/1/1 からの経過秒数）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mp4FileTime(u64);

impl Mp4FileTime {
    /// 1904/1/1 から 1970/1/1 までの秒数
    const UNIX_EPOCH_OFFSET_SECS: u64 = 2082844800;

    /// 1904/1/1 からの経過秒数を指定して作成する
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// 1904/1/1 からの経過秒数を返す
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// UNIX エポックからの経過時間を指定して作成する
    pub const fn from_unix_time(unix_time: Duration) -> Self {
        Self(unix_time.as_secs() + Self::UNIX_EPOCH_OFFSET_SECS)
    }

    /// 32 ビットに収まるかどうか（フルボックスのバージョン判定用）
    pub(crate) const fn fits_in_u32(self) -> bool {
        self.0 <= u32::MAX as u64
    }
}

/// 固定小数点数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedPointNumber<I, F = I> {
    /// 整数部
    pub integer: I,

    /// 小数部
    pub fraction: F,
}

impl<I, F> FixedPointNumber<I, F> {
    /// 整数部と小数部を指定して作成する
    pub const fn new(integer: I, fraction: F) -> Self {
        Self { integer, fraction }
    }
}

impl<I: Encode, F: Encode> Encode for FixedPointNumber<I, F> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.integer.encode(buf)?;
        Ok(offset + self.fraction.encode(&mut buf[offset..])?)
    }
}

impl<I: Decode, F: Decode> Decode for FixedPointNumber<I, F> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let integer = I::decode_at(buf, &mut offset)?;
        let fraction = F::decode_at(buf, &mut offset)?;
        Ok((Self { integer, fraction }, offset))
    }
}

/// null 終端の UTF-8 文字列
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Utf8String(String);

impl Utf8String {
    /// 空文字列
    pub const EMPTY: Self = Utf8String(String::new());

    /// 終端の null を含まない文字列から作成する
    ///
    /// 途中に null 文字が含まれている場合は [`None`] が返される
    pub fn new(s: &str) -> Option<Self> {
        (!s.as_bytes().contains(&0)).then(|| Self(s.to_owned()))
    }

    /// null 終端を含まない文字列を返す
    pub fn get(&self) -> &str {
        &self.0
    }

    /// null 終端を含むバイト列に変換する
    pub fn into_null_terminated_bytes(self) -> Vec<u8> {
        let mut v = self.0.into_bytes();
        v.push(0);
        v
    }
}

impl Encode for Utf8String {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.0.as_bytes().encode(buf)?;
        Ok(offset + 0u8.encode(&mut buf[offset..])?)
    }
}

impl Decode for Utf8String {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let end = buf
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::invalid_data("Missing null terminator"))?;
        let s = String::from_utf8(buf[..end].to_vec())
            .map_err(|e| Error::invalid_data(format!("Invalid UTF-8 string: {e}")))?;
        Ok((Self(s), end + 1))
    }
}

/// `A` か `B` のどちらかの値を保持する列挙型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Either<A, B> {
    A(A),
    B(B),
}

impl<A: BaseBox, B: BaseBox> Either<A, B> {
    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            Self::A(x) => x,
            Self::B(x) => x,
        }
    }
}

impl<A: Encode, B: Encode> Encode for Either<A, B> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::A(x) => x.encode(buf),
            Self::B(x) => x.encode(buf),
        }
    }
}

impl<A: BaseBox, B: BaseBox> BaseBox for Either<A, B> {
    fn box_type(&self) -> BoxType {
        self.inner_box().box_type()
    }

    fn is_unknown_box(&self) -> bool {
        self.inner_box().is_unknown_box()
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        self.inner_box().children()
    }
}

/// 任意のビット数の非負整数
///
/// - `T`: 内部的な型（`BITS` 分の値を表現できること）
/// - `BITS`: ビット数
/// - `OFFSET`: 一つの `T` に複数の値がパックされている場合の、この値のビット位置
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint<T, const BITS: u32, const OFFSET: u32 = 0>(T);

impl<T, const BITS: u32, const OFFSET: u32> Uint<T, BITS, OFFSET>
where
    T: Shr<u32, Output = T>
        + Shl<u32, Output = T>
        + BitAnd<Output = T>
        + Sub<Output = T>
        + From<u8>,
{
    /// 値を指定して作成する
    pub const fn new(v: T) -> Self {
        Self(v)
    }

    /// 値を返す
    pub fn get(self) -> T {
        self.0
    }

    /// `v` の `OFFSET` 位置から `BITS` 分を取り出す
    pub fn from_bits(v: T) -> Self {
        Self((v >> OFFSET) & ((T::from(1) << BITS) - T::from(1)))
    }

    /// `OFFSET` 位置に配置したビット列を返す
    pub fn to_bits(self) -> T {
        self.0 << OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_payload_switches_to_64bit_size() {
        let ty = BoxType::Normal(*b"mdat");
        assert_eq!(BoxSize::with_payload_size(ty, 10), BoxSize::U32(18));

        let size = BoxSize::with_payload_size(ty, u32::MAX as u64);
        assert_eq!(size, BoxSize::U64(u32::MAX as u64 + 16));

        let bytes = BoxHeader::new(ty, size).encode_to_vec().expect("encode");
        assert_eq!(bytes.len(), 16);
        let (header, n) = BoxHeader::decode(&bytes).expect("decode");
        assert_eq!(n, 16);
        assert_eq!(header.box_size, size);
    }

    #[test]
    fn truncated_box_is_rejected() {
        let bytes = [0, 0, 0, 32, b'f', b'r', b'e', b'e', 0, 0];
        assert!(BoxHeader::decode_header_and_payload(&bytes).is_err());
    }

    #[test]
    fn full_box_flags_are_24_bits() {
        let flags = FullBoxFlags::from_flags([(0, true), (1, false), (3, true)]);
        assert_eq!(flags.get(), 0b1001);
        let bytes = flags.encode_to_vec().expect("encode");
        assert_eq!(bytes, [0, 0, 0b1001]);
    }
}
