//! ボックス群
//!
//! moov 以下のボックスとサンプルエントリーはそれぞれ別ファイルで定義して、ここから再エクスポートしている
use crate::{
    BaseBox, BoxHeader, BoxSize, BoxType, Decode, Encode, Error, FullBox, FullBoxHeader, Result,
};

pub use crate::boxes_moov_tree::{
    Co64Box, CttsBox, CttsEntry, DinfBox, DrefBox, HdlrBox, MdhdBox, MdiaBox, MinfBox, MoovBox,
    MvhdBox, RollRecoveryEntry, SbgpBox, SbgpEntry, SgpdBox, SmhdBox, StblBox, StcoBox, StscBox,
    StscEntry, StsdBox, StssBox, StszBox, SttsBox, SttsEntry, TkhdBox, TrakBox, UrlBox, VmhdBox,
};
pub use crate::boxes_sample_entry::{
    AudioSampleEntryFields, Avc1Box, AvccBox, CodecConfigBox, DopsBox, OpusBox, OpusChannelMapping,
    OpusHead, SampleEntry, VisualCodecBox, VisualSampleEntryFields,
};

/// [`FtypBox`] で使われるブランド
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// [ISO/IEC 14496-12] isom ブランド
    pub const ISOM: Self = Self::new(*b"isom");

    /// [ISO/IEC 14496-12] iso2 ブランド
    pub const ISO2: Self = Self::new(*b"iso2");

    /// [ISO/IEC 14496-15] avc1 ブランド
    pub const AVC1: Self = Self::new(*b"avc1");

    /// [ISO/IEC 14496-14] mp41 ブランド
    pub const MP41: Self = Self::new(*b"mp41");

    /// 四文字のバイト列からブランドを作成する
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// ブランドを表すバイト列を返す
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl std::fmt::Debug for Brand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.debug_tuple("Brand").field(&s).finish(),
            Err(_) => f.debug_tuple("Brand").field(&self.0).finish(),
        }
    }
}

impl Encode for Brand {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        <[u8; 4]>::decode(buf).map(|(b, n)| (Self(b), n))
    }
}

/// [ISO/IEC 14496-12] FileTypeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");
}

impl Encode for FtypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&self.major_brand)?;
            w.put(&self.minor_version)?;
            w.put_all(&self.compatible_brands)
        })
    }
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let major_brand = r.get()?;
            let minor_version = r.get()?;
            let mut compatible_brands = Vec::new();
            while r.has_remaining() {
                compatible_brands.push(r.get()?);
            }
            Ok(Self {
                major_brand,
                minor_version,
                compatible_brands,
            })
        })
    }
}

impl BaseBox for FtypBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

/// [ISO/IEC 14496-12] MediaDataBox class
///
/// サンプルデータは呼び出し側が直接書き出すので、ここではヘッダーの生成だけを扱う。
/// ペイロードが 4 GiB を超える場合はヘッダーが 64 ビットサイズ形式になる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MdatBox;

impl MdatBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdat");

    /// ペイロードサイズに対応するヘッダーを返す
    pub fn header(payload_size: u64) -> BoxHeader {
        BoxHeader::new(
            Self::TYPE,
            BoxSize::with_payload_size(Self::TYPE, payload_size),
        )
    }
}

/// このライブラリが解釈しないボックス
///
/// ペイロードはそのまま保持され、エンコード時には元のバイト列が出力される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UnknownBox {
    pub box_type: BoxType,
    pub box_size: BoxSize,
    pub payload: Vec<u8>,
}

impl Encode for UnknownBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = BoxHeader::new(self.box_type, self.box_size).encode(buf)?;
        Ok(offset + self.payload.encode(&mut buf[offset..])?)
    }
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: header.box_size,
                payload: payload.to_vec(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

impl BaseBox for UnknownBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn is_unknown_box(&self) -> bool {
        true
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

/// `f` の中で発生したエラーに、まだボックス種別が設定されていなければ `box_type` を設定する
pub(crate) fn with_box_type<T, F>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|mut e| {
        e.box_type.get_or_insert(box_type);
        e
    })
}

#[track_caller]
pub(crate) fn check_mandatory_box<T>(
    maybe_box: Option<T>,
    expected: &str,
    parent: &str,
) -> Result<T> {
    maybe_box.ok_or_else(|| {
        Error::invalid_data(format!(
            "Missing mandatory '{expected}' box in '{parent}' box"
        ))
    })
}

/// ボックスのペイロードを先頭から順に書き込むためのカーソル
pub(crate) struct PayloadWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl PayloadWriter<'_> {
    pub(crate) fn put<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.offset += value.encode(&mut self.buf[self.offset..])?;
        Ok(())
    }

    pub(crate) fn put_all<'b, T, I>(&mut self, values: I) -> Result<()>
    where
        T: Encode + 'b,
        I: IntoIterator<Item = &'b T>,
    {
        values.into_iter().try_for_each(|v| self.put(v))
    }

    /// 予約領域として `n` バイトの 0 を書き込む
    pub(crate) fn put_zeros(&mut self, n: usize) -> Result<()> {
        let rest = &mut self.buf[self.offset..];
        Error::check_buffer_size(n, rest)?;
        rest[..n].fill(0);
        self.offset += n;
        Ok(())
    }
}

/// ボックスのペイロードを先頭から順に読み込むためのカーソル
pub(crate) struct PayloadReader<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    /// ボックスヘッダーを持たない生のバイト列を読み込む場合に使う
    pub(crate) fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }

    pub(crate) fn get<T: Decode>(&mut self) -> Result<T> {
        T::decode_at(self.payload, &mut self.offset)
    }

    pub(crate) fn has_remaining(&self) -> bool {
        self.offset < self.payload.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }

    /// 予約領域などの `n` バイトを読み飛ばす
    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self
            .payload
            .get(self.offset..)
            .and_then(|rest| rest.get(..n))
            .ok_or_else(|| {
                Error::invalid_data(format!(
                    "Need {n} bytes at offset {}, but the payload is {} bytes",
                    self.offset,
                    self.payload.len()
                ))
            })?;
        self.offset += n;
        Ok(bytes)
    }

    /// 残りのペイロードを全て返す
    pub(crate) fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.payload[self.offset..];
        self.offset = self.payload.len();
        rest
    }

    /// 次の子ボックスの種別を、読み込み位置を進めずに返す
    pub(crate) fn peek_box_type(&self) -> Result<BoxType> {
        let (header, _) = BoxHeader::decode(&self.payload[self.offset..])?;
        Ok(header.box_type)
    }
}

/// サイズ未確定のヘッダーを書き込み、`f` でペイロードを書いた後にサイズを確定させる
pub(crate) fn encode_box<F>(buf: &mut [u8], box_type: BoxType, f: F) -> Result<usize>
where
    F: FnOnce(&mut PayloadWriter<'_>) -> Result<()>,
{
    let header = BoxHeader::new_variable_size(box_type);
    let header_size = header.encode(buf)?;
    let mut writer = PayloadWriter {
        buf: &mut buf[header_size..],
        offset: 0,
    };
    f(&mut writer)?;
    let size = header_size + writer.offset;
    header.finalize_box_size(&mut buf[..size])?;
    Ok(size)
}

/// [`encode_box()`] のフルボックス版
pub(crate) fn encode_full_box<B, F>(buf: &mut [u8], b: &B, f: F) -> Result<usize>
where
    B: FullBox,
    F: FnOnce(&mut PayloadWriter<'_>) -> Result<()>,
{
    encode_box(buf, b.box_type(), |w| {
        w.put(&FullBoxHeader::from_box(b))?;
        f(w)
    })
}

/// `box_type` のボックスのヘッダーを検証して、ペイロード部分を `f` でデコードする
///
/// 返り値のサイズは宣言されたボックスサイズで、`f` が読み残した部分も含まれる
pub(crate) fn decode_box<T, F>(buf: &[u8], box_type: BoxType, f: F) -> Result<(T, usize)>
where
    F: FnOnce(&mut PayloadReader<'_>) -> Result<T>,
{
    with_box_type(box_type, || {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        header.box_type.expect(box_type)?;
        let mut reader = PayloadReader::new(payload);
        let value = f(&mut reader)?;
        Ok((value, header.external_size() + payload.len()))
    })
}
