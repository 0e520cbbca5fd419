//! moov とその下に配置されるボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU32;

use crate::{
    BaseBox, BoxType, Either, Error, FixedPointNumber, FullBox, FullBoxFlags, FullBoxHeader,
    Mp4FileTime, Result, Utf8String,
    basic_types::as_box_object,
    boxes::{
        PayloadReader, PayloadWriter, SampleEntry, UnknownBox, check_mandatory_box, decode_box,
        encode_box, encode_full_box,
    },
    codec::{Decode, Encode},
};

// mvhd / tkhd / mdhd の時刻と尺は、どれか一つでも 32 ビットに収まらなければバージョン 1 になる
fn time_fields_version(times: &[Mp4FileTime], duration: u64) -> u8 {
    if times.iter().all(|t| t.fits_in_u32()) && duration <= u32::MAX as u64 {
        0
    } else {
        1
    }
}

fn put_versioned(w: &mut PayloadWriter<'_>, version: u8, value: u64) -> Result<()> {
    if version == 1 {
        w.put(&value)
    } else {
        w.put(&(value as u32))
    }
}

fn get_versioned(r: &mut PayloadReader<'_>, version: u8) -> Result<u64> {
    if version == 1 {
        r.get()
    } else {
        r.get::<u32>().map(u64::from)
    }
}

/// [ISO/IEC 14496-12] MovieBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoovBox {
    pub mvhd_box: MvhdBox,
    pub trak_boxes: Vec<TrakBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoovBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moov");
}

impl Encode for MoovBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&self.mvhd_box)?;
            w.put_all(&self.trak_boxes)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for MoovBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let mut mvhd_box = None;
            let mut trak_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    MvhdBox::TYPE if mvhd_box.is_none() => mvhd_box = Some(r.get()?),
                    TrakBox::TYPE => trak_boxes.push(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                mvhd_box: check_mandatory_box(mvhd_box, "mvhd", "moov")?,
                trak_boxes,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MoovBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            std::iter::once(as_box_object(&self.mvhd_box))
                .chain(self.trak_boxes.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MovieHeaderBox class (親: [`MoovBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MvhdBox {
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub timescale: NonZeroU32,
    pub duration: u64,
    pub rate: FixedPointNumber<i16, u16>,
    pub volume: FixedPointNumber<i8, u8>,
    pub matrix: [i32; 9],
    pub next_track_id: u32,
}

impl MvhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mvhd");

    /// [`MvhdBox::rate`] のデフォルト値（等速）
    pub const DEFAULT_RATE: FixedPointNumber<i16, u16> = FixedPointNumber::new(1, 0);

    /// [`MvhdBox::volume`] のデフォルト値（最大音量）
    pub const DEFAULT_VOLUME: FixedPointNumber<i8, u8> = FixedPointNumber::new(1, 0);

    /// 変換なしを表す行列
    pub const DEFAULT_MATRIX: [i32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];
}

impl Encode for MvhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let version = self.full_box_version();
        encode_full_box(buf, self, |w| {
            put_versioned(w, version, self.creation_time.as_secs())?;
            put_versioned(w, version, self.modification_time.as_secs())?;
            w.put(&self.timescale)?;
            put_versioned(w, version, self.duration)?;
            w.put(&self.rate)?;
            w.put(&self.volume)?;
            w.put_zeros(2 + 4 * 2)?;
            w.put(&self.matrix)?;
            w.put_zeros(4 * 6)?;
            w.put(&self.next_track_id)
        })
    }
}

impl Decode for MvhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let FullBoxHeader { version, .. } = r.get()?;
            let creation_time = Mp4FileTime::from_secs(get_versioned(r, version)?);
            let modification_time = Mp4FileTime::from_secs(get_versioned(r, version)?);
            let timescale = r.get()?;
            let duration = get_versioned(r, version)?;
            let rate = r.get()?;
            let volume = r.get()?;
            r.skip(2 + 4 * 2)?;
            let matrix = r.get()?;
            r.skip(4 * 6)?;
            let next_track_id = r.get()?;
            Ok(Self {
                creation_time,
                modification_time,
                timescale,
                duration,
                rate,
                volume,
                matrix,
                next_track_id,
            })
        })
    }
}

impl BaseBox for MvhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for MvhdBox {
    fn full_box_version(&self) -> u8 {
        time_fields_version(&[self.creation_time, self.modification_time], self.duration)
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackBox class (親: [`MoovBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrakBox {
    pub tkhd_box: TkhdBox,
    pub mdia_box: MdiaBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrakBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trak");

    /// ハンドラー種別が映像のトラックかどうか
    pub fn is_video(&self) -> bool {
        self.mdia_box.hdlr_box.handler_type == HdlrBox::HANDLER_TYPE_VIDE
    }

    /// ハンドラー種別が音声のトラックかどうか
    pub fn is_audio(&self) -> bool {
        self.mdia_box.hdlr_box.handler_type == HdlrBox::HANDLER_TYPE_SOUN
    }

    /// このトラックのサンプルテーブル
    pub fn stbl_box(&self) -> &StblBox {
        &self.mdia_box.minf_box.stbl_box
    }
}

impl Encode for TrakBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&self.tkhd_box)?;
            w.put(&self.mdia_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for TrakBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let mut tkhd_box = None;
            let mut mdia_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    TkhdBox::TYPE if tkhd_box.is_none() => tkhd_box = Some(r.get()?),
                    MdiaBox::TYPE if mdia_box.is_none() => mdia_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                tkhd_box: check_mandatory_box(tkhd_box, "tkhd", "trak")?,
                mdia_box: check_mandatory_box(mdia_box, "mdia", "trak")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for TrakBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            [as_box_object(&self.tkhd_box), as_box_object(&self.mdia_box)]
                .into_iter()
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] TrackHeaderBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TkhdBox {
    pub flag_track_enabled: bool,
    pub flag_track_in_movie: bool,
    pub flag_track_in_preview: bool,

    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub track_id: u32,
    pub duration: u64,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: FixedPointNumber<i8, u8>,
    pub matrix: [i32; 9],
    pub width: FixedPointNumber<u16, u16>,
    pub height: FixedPointNumber<u16, u16>,
}

impl TkhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tkhd");

    /// [`TkhdBox::layer`] のデフォルト値
    pub const DEFAULT_LAYER: i16 = 0;

    /// [`TkhdBox::alternate_group`] のデフォルト値
    pub const DEFAULT_ALTERNATE_GROUP: i16 = 0;

    /// 音声トラックの [`TkhdBox::volume`] のデフォルト値
    pub const DEFAULT_AUDIO_VOLUME: FixedPointNumber<i8, u8> = FixedPointNumber::new(1, 0);

    /// 映像トラックの [`TkhdBox::volume`] のデフォルト値（無音）
    pub const DEFAULT_VIDEO_VOLUME: FixedPointNumber<i8, u8> = FixedPointNumber::new(0, 0);

    /// 変換なしを表す行列
    pub const DEFAULT_MATRIX: [i32; 9] = MvhdBox::DEFAULT_MATRIX;
}

impl Encode for TkhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let version = self.full_box_version();
        encode_full_box(buf, self, |w| {
            put_versioned(w, version, self.creation_time.as_secs())?;
            put_versioned(w, version, self.modification_time.as_secs())?;
            w.put(&self.track_id)?;
            w.put_zeros(4)?;
            put_versioned(w, version, self.duration)?;
            w.put_zeros(4 * 2)?;
            w.put(&self.layer)?;
            w.put(&self.alternate_group)?;
            w.put(&self.volume)?;
            w.put_zeros(2)?;
            w.put(&self.matrix)?;
            w.put(&self.width)?;
            w.put(&self.height)
        })
    }
}

impl Decode for TkhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let FullBoxHeader { version, flags } = r.get()?;
            let creation_time = Mp4FileTime::from_secs(get_versioned(r, version)?);
            let modification_time = Mp4FileTime::from_secs(get_versioned(r, version)?);
            let track_id = r.get()?;
            r.skip(4)?;
            let duration = get_versioned(r, version)?;
            r.skip(4 * 2)?;
            let layer = r.get()?;
            let alternate_group = r.get()?;
            let volume = r.get()?;
            r.skip(2)?;
            let matrix = r.get()?;
            let width = r.get()?;
            let height = r.get()?;
            Ok(Self {
                flag_track_enabled: flags.is_set(0),
                flag_track_in_movie: flags.is_set(1),
                flag_track_in_preview: flags.is_set(2),
                creation_time,
                modification_time,
                track_id,
                duration,
                layer,
                alternate_group,
                volume,
                matrix,
                width,
                height,
            })
        })
    }
}

impl BaseBox for TkhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for TkhdBox {
    fn full_box_version(&self) -> u8 {
        time_fields_version(&[self.creation_time, self.modification_time], self.duration)
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::from_flags([
            (0, self.flag_track_enabled),
            (1, self.flag_track_in_movie),
            (2, self.flag_track_in_preview),
        ])
    }
}

/// [ISO/IEC 14496-12] MediaBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdiaBox {
    pub mdhd_box: MdhdBox,
    pub hdlr_box: HdlrBox,
    pub minf_box: MinfBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MdiaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdia");
}

impl Encode for MdiaBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&self.mdhd_box)?;
            w.put(&self.hdlr_box)?;
            w.put(&self.minf_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for MdiaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let mut mdhd_box = None;
            let mut hdlr_box = None;
            let mut minf_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    MdhdBox::TYPE if mdhd_box.is_none() => mdhd_box = Some(r.get()?),
                    HdlrBox::TYPE if hdlr_box.is_none() => hdlr_box = Some(r.get()?),
                    MinfBox::TYPE if minf_box.is_none() => minf_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                mdhd_box: check_mandatory_box(mdhd_box, "mdhd", "mdia")?,
                hdlr_box: check_mandatory_box(hdlr_box, "hdlr", "mdia")?,
                minf_box: check_mandatory_box(minf_box, "minf", "mdia")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MdiaBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            [
                as_box_object(&self.mdhd_box),
                as_box_object(&self.hdlr_box),
                as_box_object(&self.minf_box),
            ]
            .into_iter()
            .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MediaHeaderBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdhdBox {
    pub creation_time: Mp4FileTime,
    pub modification_time: Mp4FileTime,
    pub timescale: NonZeroU32,
    pub duration: u64,

    /// ISO-639-2/T の言語コード
    pub language: [u8; 3],
}

impl MdhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdhd");

    /// 未定義を表す言語コード
    pub const LANGUAGE_UNDEFINED: [u8; 3] = *b"und";

    // 言語コードは 1 文字 5 ビットで、0x60 を引いた値が格納される
    fn pack_language(language: [u8; 3]) -> Result<u16> {
        language.iter().try_fold(0u16, |packed, c| match c.checked_sub(0x60) {
            Some(code) if code < 0x20 => Ok((packed << 5) | code as u16),
            _ => Err(Error::invalid_input(format!(
                "Invalid language code: {language:?}"
            ))),
        })
    }

    fn unpack_language(packed: u16) -> [u8; 3] {
        [10, 5, 0].map(|shift| ((packed >> shift) & 0b11111) as u8 + 0x60)
    }
}

impl Encode for MdhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let version = self.full_box_version();
        let language = Self::pack_language(self.language)?;
        encode_full_box(buf, self, |w| {
            put_versioned(w, version, self.creation_time.as_secs())?;
            put_versioned(w, version, self.modification_time.as_secs())?;
            w.put(&self.timescale)?;
            put_versioned(w, version, self.duration)?;
            w.put(&language)?;
            w.put_zeros(2)
        })
    }
}

impl Decode for MdhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let FullBoxHeader { version, .. } = r.get()?;
            let creation_time = Mp4FileTime::from_secs(get_versioned(r, version)?);
            let modification_time = Mp4FileTime::from_secs(get_versioned(r, version)?);
            let timescale = r.get()?;
            let duration = get_versioned(r, version)?;
            let language = Self::unpack_language(r.get()?);
            r.skip(2)?;
            Ok(Self {
                creation_time,
                modification_time,
                timescale,
                duration,
                language,
            })
        })
    }
}

impl BaseBox for MdhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for MdhdBox {
    fn full_box_version(&self) -> u8 {
        time_fields_version(&[self.creation_time, self.modification_time], self.duration)
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] HandlerBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct HdlrBox {
    pub handler_type: [u8; 4],

    /// ハンドラ名
    ///
    /// null 終端ではなく先頭に長さを置く実装や UTF-8 以外の名前も出回っているため、
    /// 単なるバイト列として保持している
    pub name: Vec<u8>,
}

impl HdlrBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"hdlr");

    /// 音声トラックのハンドラー種別
    pub const HANDLER_TYPE_SOUN: [u8; 4] = *b"soun";

    /// 映像トラックのハンドラー種別
    pub const HANDLER_TYPE_VIDE: [u8; 4] = *b"vide";

    /// 名前が空の [`HdlrBox`] を作成する
    pub fn unnamed(handler_type: [u8; 4]) -> Self {
        Self {
            handler_type,
            name: Utf8String::EMPTY.into_null_terminated_bytes(),
        }
    }
}

impl Encode for HdlrBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put_zeros(4)?;
            w.put(&self.handler_type)?;
            w.put_zeros(4 * 3)?;
            w.put(&self.name[..])
        })
    }
}

impl Decode for HdlrBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            r.skip(4)?;
            let handler_type = r.get()?;
            r.skip(4 * 3)?;
            let name = r.take_rest().to_vec();
            Ok(Self { handler_type, name })
        })
    }
}

impl BaseBox for HdlrBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for HdlrBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] MediaInformationBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MinfBox {
    // 音声・映像以外のトラックでは None
    pub smhd_or_vmhd_box: Option<Either<SmhdBox, VmhdBox>>,
    pub dinf_box: DinfBox,
    pub stbl_box: StblBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MinfBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"minf");
}

impl Encode for MinfBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put_all(&self.smhd_or_vmhd_box)?;
            w.put(&self.dinf_box)?;
            w.put(&self.stbl_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for MinfBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let mut smhd_or_vmhd_box = None;
            let mut dinf_box = None;
            let mut stbl_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    SmhdBox::TYPE if smhd_or_vmhd_box.is_none() => {
                        smhd_or_vmhd_box = Some(Either::A(r.get()?));
                    }
                    VmhdBox::TYPE if smhd_or_vmhd_box.is_none() => {
                        smhd_or_vmhd_box = Some(Either::B(r.get()?));
                    }
                    DinfBox::TYPE if dinf_box.is_none() => dinf_box = Some(r.get()?),
                    StblBox::TYPE if stbl_box.is_none() => stbl_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                smhd_or_vmhd_box,
                dinf_box: check_mandatory_box(dinf_box, "dinf", "minf")?,
                stbl_box: check_mandatory_box(stbl_box, "stbl", "minf")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for MinfBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.smhd_or_vmhd_box
                .iter()
                .map(as_box_object)
                .chain([as_box_object(&self.dinf_box), as_box_object(&self.stbl_box)])
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] SoundMediaHeaderBox class (親: [`MinfBox`])
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SmhdBox {
    pub balance: FixedPointNumber<u8, u8>,
}

impl SmhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"smhd");
}

impl Encode for SmhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&self.balance)?;
            w.put_zeros(2)
        })
    }
}

impl Decode for SmhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let balance = r.get()?;
            Ok(Self { balance })
        })
    }
}

impl BaseBox for SmhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for SmhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] VideoMediaHeaderBox class (親: [`MinfBox`])
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VmhdBox {
    pub graphicsmode: u16,
    pub opcolor: [u16; 3],
}

impl VmhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"vmhd");
}

impl Encode for VmhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&self.graphicsmode)?;
            w.put(&self.opcolor)
        })
    }
}

impl Decode for VmhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            // flags は 1 であるべきだが、0 のファイルも存在するので検証しない
            let _: FullBoxHeader = r.get()?;
            let graphicsmode = r.get()?;
            let opcolor = r.get()?;
            Ok(Self {
                graphicsmode,
                opcolor,
            })
        })
    }
}

impl BaseBox for VmhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for VmhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(1)
    }
}

/// [ISO/IEC 14496-12] DataInformationBox class (親: [`MinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DinfBox {
    pub dref_box: DrefBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl DinfBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dinf");

    /// メディアデータが同じファイル内にあることを示す値
    pub const LOCAL_FILE: Self = Self {
        dref_box: DrefBox::LOCAL_FILE,
        unknown_boxes: Vec::new(),
    };
}

impl Encode for DinfBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&self.dref_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for DinfBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let mut dref_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    DrefBox::TYPE if dref_box.is_none() => dref_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                dref_box: check_mandatory_box(dref_box, "dref", "dinf")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for DinfBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            std::iter::once(as_box_object(&self.dref_box))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] DataReferenceBox class (親: [`DinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DrefBox {
    pub url_box: Option<UrlBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl DrefBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dref");

    /// メディアデータが同じファイル内にあることを示す値
    pub const LOCAL_FILE: Self = Self {
        url_box: Some(UrlBox::LOCAL_FILE),
        unknown_boxes: Vec::new(),
    };
}

impl Encode for DrefBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let entry_count = self.url_box.iter().count() + self.unknown_boxes.len();
        encode_full_box(buf, self, |w| {
            w.put(&(entry_count as u32))?;
            w.put_all(&self.url_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for DrefBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let entry_count: u32 = r.get()?;
            let mut url_box = None;
            let mut unknown_boxes = Vec::new();
            for _ in 0..entry_count {
                match r.peek_box_type()? {
                    UrlBox::TYPE if url_box.is_none() => url_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                url_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for DrefBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.url_box
                .iter()
                .map(as_box_object)
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

impl FullBox for DrefBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] DataEntryUrlBox class (親: [`DrefBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UrlBox {
    pub location: Option<Utf8String>,
}

impl UrlBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"url ");

    /// メディアデータが同じファイル内にあることを示す値
    pub const LOCAL_FILE: Self = Self { location: None };
}

impl Encode for UrlBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| w.put_all(&self.location))
    }
}

impl Decode for UrlBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let FullBoxHeader { flags, .. } = r.get()?;
            let location = if flags.is_set(0) { None } else { Some(r.get()?) };
            Ok(Self { location })
        })
    }
}

impl BaseBox for UrlBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for UrlBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(self.location.is_none() as u32)
    }
}

/// [ISO/IEC 14496-12] SampleTableBox class (親: [`MinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StblBox {
    pub stsd_box: StsdBox,
    pub stts_box: SttsBox,
    pub ctts_box: Option<CttsBox>,
    pub stsc_box: StscBox,
    pub stsz_box: StszBox,
    pub stco_or_co64_box: Either<StcoBox, Co64Box>,
    pub stss_box: Option<StssBox>,
    pub sgpd_box: Option<SgpdBox>,
    pub sbgp_box: Option<SbgpBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl StblBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stbl");
}

impl Encode for StblBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&self.stsd_box)?;
            w.put(&self.stts_box)?;
            w.put_all(&self.ctts_box)?;
            w.put_all(&self.stss_box)?;
            w.put(&self.stsc_box)?;
            w.put(&self.stsz_box)?;
            w.put(&self.stco_or_co64_box)?;
            w.put_all(&self.sgpd_box)?;
            w.put_all(&self.sbgp_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for StblBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let mut stsd_box = None;
            let mut stts_box = None;
            let mut ctts_box = None;
            let mut stsc_box = None;
            let mut stsz_box = None;
            let mut stco_or_co64_box = None;
            let mut stss_box = None;
            let mut sgpd_box = None;
            let mut sbgp_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    StsdBox::TYPE if stsd_box.is_none() => stsd_box = Some(r.get()?),
                    SttsBox::TYPE if stts_box.is_none() => stts_box = Some(r.get()?),
                    CttsBox::TYPE if ctts_box.is_none() => ctts_box = Some(r.get()?),
                    StscBox::TYPE if stsc_box.is_none() => stsc_box = Some(r.get()?),
                    StszBox::TYPE if stsz_box.is_none() => stsz_box = Some(r.get()?),
                    StcoBox::TYPE if stco_or_co64_box.is_none() => {
                        stco_or_co64_box = Some(Either::A(r.get()?));
                    }
                    Co64Box::TYPE if stco_or_co64_box.is_none() => {
                        stco_or_co64_box = Some(Either::B(r.get()?));
                    }
                    StssBox::TYPE if stss_box.is_none() => stss_box = Some(r.get()?),
                    SgpdBox::TYPE if sgpd_box.is_none() => sgpd_box = Some(r.get()?),
                    SbgpBox::TYPE if sbgp_box.is_none() => sbgp_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                stsd_box: check_mandatory_box(stsd_box, "stsd", "stbl")?,
                stts_box: check_mandatory_box(stts_box, "stts", "stbl")?,
                ctts_box,
                stsc_box: check_mandatory_box(stsc_box, "stsc", "stbl")?,
                stsz_box: check_mandatory_box(stsz_box, "stsz", "stbl")?,
                stco_or_co64_box: check_mandatory_box(stco_or_co64_box, "stco' or 'co64", "stbl")?,
                stss_box,
                sgpd_box,
                sbgp_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for StblBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            [as_box_object(&self.stsd_box), as_box_object(&self.stts_box)]
                .into_iter()
                .chain(self.ctts_box.iter().map(as_box_object))
                .chain(self.stss_box.iter().map(as_box_object))
                .chain([
                    as_box_object(&self.stsc_box),
                    as_box_object(&self.stsz_box),
                    as_box_object(&self.stco_or_co64_box),
                ])
                .chain(self.sgpd_box.iter().map(as_box_object))
                .chain(self.sbgp_box.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] SampleDescriptionBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StsdBox {
    pub entries: Vec<SampleEntry>,
}

impl StsdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsd");
}

impl Encode for StsdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            w.put_all(&self.entries)
        })
    }
}

impl Decode for StsdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let entry_count: u32 = r.get()?;
            let entries = (0..entry_count)
                .map(|_| r.get())
                .collect::<Result<Vec<_>>>()?;
            Ok(Self { entries })
        })
    }
}

impl BaseBox for StsdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(self.entries.iter().map(as_box_object))
    }
}

impl FullBox for StsdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`SttsBox`] のエントリー（同じ尺のサンプルの連続）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// [ISO/IEC 14496-12] TimeToSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsBox {
    pub entries: Vec<SttsEntry>,
}

impl SttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stts");

    /// サンプルの尺の列を受け取り、連続する同じ尺をまとめた [`SttsBox`] を作成する
    pub fn from_sample_deltas<I>(sample_deltas: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut entries: Vec<SttsEntry> = Vec::new();
        for sample_delta in sample_deltas {
            match entries.last_mut() {
                Some(run) if run.sample_delta == sample_delta => run.sample_count += 1,
                _ => entries.push(SttsEntry {
                    sample_count: 1,
                    sample_delta,
                }),
            }
        }
        Self { entries }
    }

    /// 全エントリーを展開した、サンプルごとの尺を走査するイテレーターを返す
    pub fn sample_deltas(&self) -> impl '_ + Iterator<Item = u32> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::repeat_n(e.sample_delta, e.sample_count as usize))
    }
}

impl Encode for SttsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            self.entries.iter().try_for_each(|e| {
                w.put(&e.sample_count)?;
                w.put(&e.sample_delta)
            })
        })
    }
}

impl Decode for SttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let count: u32 = r.get()?;
            let entries = (0..count)
                .map(|_| {
                    Ok(SttsEntry {
                        sample_count: r.get()?,
                        sample_delta: r.get()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Self { entries })
        })
    }
}

impl BaseBox for SttsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for SttsBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`CttsBox`] のエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsEntry {
    pub sample_count: u32,

    /// DTS から CTS へのオフセット（バージョン 1 の場合のみ負値が許される）
    pub sample_offset: i32,
}

/// [ISO/IEC 14496-12] CompositionOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsBox {
    pub entries: Vec<CttsEntry>,
}

impl CttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ctts");

    /// 全エントリーを展開した、サンプルごとのオフセットを走査するイテレーターを返す
    pub fn sample_offsets(&self) -> impl '_ + Iterator<Item = i32> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::repeat_n(e.sample_offset, e.sample_count as usize))
    }
}

impl Encode for CttsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            self.entries.iter().try_for_each(|e| {
                w.put(&e.sample_count)?;
                w.put(&e.sample_offset)
            })
        })
    }
}

impl Decode for CttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            // バージョン 0 は符号なしだが、実際には i32 の範囲を超える値は使われない
            let _: FullBoxHeader = r.get()?;
            let count: u32 = r.get()?;
            let entries = (0..count)
                .map(|_| {
                    Ok(CttsEntry {
                        sample_count: r.get()?,
                        sample_offset: r.get()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Self { entries })
        })
    }
}

impl BaseBox for CttsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for CttsBox {
    fn full_box_version(&self) -> u8 {
        self.entries.iter().any(|e| e.sample_offset < 0) as u8
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`StscBox`] のエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscEntry {
    pub first_chunk: NonZeroU32,
    pub sample_per_chunk: u32,
    pub sample_description_index: NonZeroU32,
}

/// [ISO/IEC 14496-12] SampleToChunkBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsc");
}

impl Encode for StscBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.entries.len() as u32))?;
            self.entries.iter().try_for_each(|e| {
                w.put(&e.first_chunk)?;
                w.put(&e.sample_per_chunk)?;
                w.put(&e.sample_description_index)
            })
        })
    }
}

impl Decode for StscBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let count: u32 = r.get()?;
            let entries = (0..count)
                .map(|_| {
                    Ok(StscEntry {
                        first_chunk: r.get()?,
                        sample_per_chunk: r.get()?,
                        sample_description_index: r.get()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Self { entries })
        })
    }
}

impl BaseBox for StscBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for StscBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] SampleSizeBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StszBox {
    Fixed {
        sample_size: NonZeroU32,
        sample_count: u32,
    },
    Variable {
        entry_sizes: Vec<u32>,
    },
}

impl StszBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsz");

    /// サンプル数
    pub fn sample_count(&self) -> u32 {
        match self {
            Self::Fixed { sample_count, .. } => *sample_count,
            Self::Variable { entry_sizes } => entry_sizes.len() as u32,
        }
    }
}

impl Encode for StszBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| match self {
            Self::Fixed {
                sample_size,
                sample_count,
            } => {
                w.put(sample_size)?;
                w.put(sample_count)
            }
            Self::Variable { entry_sizes } => {
                w.put(&0u32)?;
                w.put(&(entry_sizes.len() as u32))?;
                w.put_all(entry_sizes)
            }
        })
    }
}

impl Decode for StszBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let sample_size: u32 = r.get()?;
            let sample_count: u32 = r.get()?;
            if let Some(sample_size) = NonZeroU32::new(sample_size) {
                return Ok(Self::Fixed {
                    sample_size,
                    sample_count,
                });
            }
            let entry_sizes = (0..sample_count)
                .map(|_| r.get())
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::Variable { entry_sizes })
        })
    }
}

impl BaseBox for StszBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for StszBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ChunkOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StcoBox {
    pub chunk_offsets: Vec<u32>,
}

impl StcoBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stco");
}

impl Encode for StcoBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.chunk_offsets.len() as u32))?;
            w.put_all(&self.chunk_offsets)
        })
    }
}

impl Decode for StcoBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let count: u32 = r.get()?;
            let chunk_offsets = (0..count).map(|_| r.get()).collect::<Result<Vec<_>>>()?;
            Ok(Self { chunk_offsets })
        })
    }
}

impl BaseBox for StcoBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for StcoBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] ChunkLargeOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Co64Box {
    pub chunk_offsets: Vec<u64>,
}

impl Co64Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"co64");
}

impl Encode for Co64Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.chunk_offsets.len() as u32))?;
            w.put_all(&self.chunk_offsets)
        })
    }
}

impl Decode for Co64Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let count: u32 = r.get()?;
            let chunk_offsets = (0..count).map(|_| r.get()).collect::<Result<Vec<_>>>()?;
            Ok(Self { chunk_offsets })
        })
    }
}

impl BaseBox for Co64Box {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for Co64Box {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] SyncSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StssBox {
    pub sample_numbers: Vec<NonZeroU32>,
}

impl StssBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stss");
}

impl Encode for StssBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&(self.sample_numbers.len() as u32))?;
            w.put_all(&self.sample_numbers)
        })
    }
}

impl Decode for StssBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let _: FullBoxHeader = r.get()?;
            let count: u32 = r.get()?;
            let sample_numbers = (0..count).map(|_| r.get()).collect::<Result<Vec<_>>>()?;
            Ok(Self { sample_numbers })
        })
    }
}

impl BaseBox for StssBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for StssBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// `roll` グループの [`SgpdBox`] エントリー（AudioRollRecoveryEntry）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct RollRecoveryEntry {
    pub roll_distance: i16,
}

/// [ISO/IEC 14496-12] SampleGroupDescriptionBox class (親: [`StblBox`])
///
/// 各エントリーの中身はグループ種別ごとに異なるので、バイト列のまま保持している。
/// `roll` グループについては [`SgpdBox::roll()`] と [`SgpdBox::roll_entries()`] で相互に変換できる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SgpdBox {
    pub grouping_type: [u8; 4],
    pub entries: Vec<Vec<u8>>,
}

impl SgpdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"sgpd");

    /// プリロール（音声のロールリカバリー）を表すグループ種別
    pub const GROUPING_TYPE_ROLL: [u8; 4] = *b"roll";

    /// `roll` グループの [`SgpdBox`] を作成する
    pub fn roll(entries: &[RollRecoveryEntry]) -> Self {
        Self {
            grouping_type: Self::GROUPING_TYPE_ROLL,
            entries: entries
                .iter()
                .map(|e| e.roll_distance.to_be_bytes().to_vec())
                .collect(),
        }
    }

    /// `roll` グループであれば、そのエントリー群を返す
    pub fn roll_entries(&self) -> Option<Vec<RollRecoveryEntry>> {
        if self.grouping_type != Self::GROUPING_TYPE_ROLL {
            return None;
        }
        self.entries
            .iter()
            .map(|e| {
                let bytes: [u8; 2] = e.as_slice().try_into().ok()?;
                Some(RollRecoveryEntry {
                    roll_distance: i16::from_be_bytes(bytes),
                })
            })
            .collect()
    }

    // 全エントリーが同じ長さならその値、そうでなければ 0（エントリーごとに長さを書く）
    fn default_length(&self) -> u32 {
        match self.entries.split_first() {
            Some((first, rest)) if rest.iter().all(|e| e.len() == first.len()) => {
                first.len() as u32
            }
            _ => 0,
        }
    }
}

impl Encode for SgpdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let default_length = self.default_length();
        encode_full_box(buf, self, |w| {
            w.put(&self.grouping_type)?;
            w.put(&default_length)?;
            w.put(&(self.entries.len() as u32))?;
            self.entries.iter().try_for_each(|e| {
                if default_length == 0 {
                    w.put(&(e.len() as u32))?;
                }
                w.put(&e[..])
            })
        })
    }
}

impl Decode for SgpdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let FullBoxHeader { version, .. } = r.get()?;
            let grouping_type: [u8; 4] = r.get()?;
            let default_length = if version == 1 { r.get()? } else { 0 };
            if version >= 2 {
                let _default_sample_description_index: u32 = r.get()?;
            }
            let entry_count: u32 = r.get()?;

            // バージョン 0 はエントリー長を持たないので、残りを均等に割って推定する
            let implicit_length = if version == 0 {
                if grouping_type == Self::GROUPING_TYPE_ROLL {
                    2
                } else {
                    let rest = r.take_rest();
                    return Self::split_evenly(grouping_type, rest, entry_count);
                }
            } else {
                default_length
            };

            let mut entries = Vec::new();
            for _ in 0..entry_count {
                let length = if implicit_length == 0 {
                    r.get::<u32>()?
                } else {
                    implicit_length
                };
                entries.push(r.take(length as usize)?.to_vec());
            }
            Ok(Self {
                grouping_type,
                entries,
            })
        })
    }
}

impl SgpdBox {
    fn split_evenly(grouping_type: [u8; 4], rest: &[u8], entry_count: u32) -> Result<Self> {
        if entry_count == 0 {
            return Ok(Self {
                grouping_type,
                entries: Vec::new(),
            });
        }
        if rest.len() % entry_count as usize != 0 {
            return Err(Error::unsupported(
                "Cannot determine entry length of a version 0 'sgpd' box",
            ));
        }
        let length = rest.len() / entry_count as usize;
        Ok(Self {
            grouping_type,
            entries: rest.chunks(length.max(1)).map(<[u8]>::to_vec).collect(),
        })
    }
}

impl BaseBox for SgpdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for SgpdBox {
    fn full_box_version(&self) -> u8 {
        1
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [`SbgpBox`] のエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SbgpEntry {
    pub sample_count: u32,

    /// [`SgpdBox`] のエントリー番号（1 始まり、0 はグループなし）
    pub group_description_index: u32,
}

/// [ISO/IEC 14496-12] SampleToGroupBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SbgpBox {
    pub grouping_type: [u8; 4],
    pub grouping_type_parameter: Option<u32>,
    pub entries: Vec<SbgpEntry>,
}

impl SbgpBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"sbgp");
}

impl Encode for SbgpBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_full_box(buf, self, |w| {
            w.put(&self.grouping_type)?;
            w.put_all(&self.grouping_type_parameter)?;
            w.put(&(self.entries.len() as u32))?;
            self.entries.iter().try_for_each(|e| {
                w.put(&e.sample_count)?;
                w.put(&e.group_description_index)
            })
        })
    }
}

impl Decode for SbgpBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let FullBoxHeader { version, .. } = r.get()?;
            let grouping_type = r.get()?;
            let grouping_type_parameter = if version == 1 { Some(r.get()?) } else { None };
            let count: u32 = r.get()?;
            let entries = (0..count)
                .map(|_| {
                    Ok(SbgpEntry {
                        sample_count: r.get()?,
                        group_description_index: r.get()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Self {
                grouping_type,
                grouping_type_parameter,
                entries,
            })
        })
    }
}

impl BaseBox for SbgpBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

impl FullBox for SbgpBox {
    fn full_box_version(&self) -> u8 {
        self.grouping_type_parameter.is_some() as u8
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}
