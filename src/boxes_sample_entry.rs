//! サンプルエントリー系のボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU16;

use crate::{
    BaseBox, BoxHeader, BoxType, Decode, Encode, Error, FixedPointNumber, Result, Uint,
    basic_types::as_box_object,
    boxes::{PayloadReader, PayloadWriter, UnknownBox, check_mandatory_box, decode_box, encode_box},
};

/// [`StsdBox`](crate::boxes::StsdBox) に含まれるエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SampleEntry {
    Avc1(Avc1Box),
    VisualCodec(VisualCodecBox),
    Opus(OpusBox),
    Unknown(UnknownBox),
}

impl SampleEntry {
    /// 解像度を取得する
    ///
    /// 映像の場合は (幅, 高さ)、それ以外の場合は None を返す
    pub fn video_resolution(&self) -> Option<(u16, u16)> {
        let visual = match self {
            Self::Avc1(b) => &b.visual,
            Self::VisualCodec(b) => &b.visual,
            _ => return None,
        };
        Some((visual.width, visual.height))
    }

    /// コーデック設定ボックス（avcC / hvcC / vpcC / av1C）をエンコードしたバイト列を返す
    ///
    /// 映像以外のエントリーや未知のエントリーの場合は None を、
    /// 映像のエントリーに設定ボックスがない場合は `Some(None)` を返す
    pub fn encode_codec_config_box(&self) -> Option<Option<Result<Vec<u8>>>> {
        match self {
            Self::Avc1(b) => Some(b.avcc_box.as_ref().map(Encode::encode_to_vec)),
            Self::VisualCodec(b) => Some(b.config_box.as_ref().map(Encode::encode_to_vec)),
            _ => None,
        }
    }

    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            Self::Avc1(b) => b,
            Self::VisualCodec(b) => b,
            Self::Opus(b) => b,
            Self::Unknown(b) => b,
        }
    }
}

impl Encode for SampleEntry {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Avc1(b) => b.encode(buf),
            Self::VisualCodec(b) => b.encode(buf),
            Self::Opus(b) => b.encode(buf),
            Self::Unknown(b) => b.encode(buf),
        }
    }
}

impl Decode for SampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        match header.box_type {
            Avc1Box::TYPE => Avc1Box::decode(buf).map(|(b, n)| (Self::Avc1(b), n)),
            OpusBox::TYPE => OpusBox::decode(buf).map(|(b, n)| (Self::Opus(b), n)),
            ty if VisualCodecBox::config_box_type_for(ty).is_some() => {
                VisualCodecBox::decode(buf).map(|(b, n)| (Self::VisualCodec(b), n))
            }
            _ => UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n)),
        }
    }
}

impl BaseBox for SampleEntry {
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

/// 映像系の [`SampleEntry`] に共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VisualSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub width: u16,
    pub height: u16,
    pub horizresolution: FixedPointNumber<u16, u16>,
    pub vertresolution: FixedPointNumber<u16, u16>,
    pub frame_count: u16,
    pub compressorname: [u8; 32],
    pub depth: u16,
}

impl VisualSampleEntryFields {
    /// [`VisualSampleEntryFields::data_reference_index`] のデフォルト値
    pub const DEFAULT_DATA_REFERENCE_INDEX: NonZeroU16 = NonZeroU16::MIN;

    /// 解像度 (72 dpi)
    pub const DEFAULT_RESOLUTION: FixedPointNumber<u16, u16> = FixedPointNumber::new(0x48, 0);

    /// [`VisualSampleEntryFields::frame_count`] のデフォルト値
    pub const DEFAULT_FRAME_COUNT: u16 = 1;

    /// [`VisualSampleEntryFields::depth`] のデフォルト値（アルファなしのカラー）
    pub const DEFAULT_DEPTH: u16 = 0x0018;

    /// 名前なしを表す [`VisualSampleEntryFields::compressorname`] の値
    pub const NULL_COMPRESSORNAME: [u8; 32] = [0; 32];

    /// 指定の解像度と、その他はデフォルト値を持つインスタンスを作成する
    pub const fn with_resolution(width: u16, height: u16) -> Self {
        Self {
            data_reference_index: Self::DEFAULT_DATA_REFERENCE_INDEX,
            width,
            height,
            horizresolution: Self::DEFAULT_RESOLUTION,
            vertresolution: Self::DEFAULT_RESOLUTION,
            frame_count: Self::DEFAULT_FRAME_COUNT,
            compressorname: Self::NULL_COMPRESSORNAME,
            depth: Self::DEFAULT_DEPTH,
        }
    }

    fn write(&self, w: &mut PayloadWriter<'_>) -> Result<()> {
        w.put_zeros(6)?;
        w.put(&self.data_reference_index)?;
        w.put_zeros(2 + 2 + 4 * 3)?;
        w.put(&self.width)?;
        w.put(&self.height)?;
        w.put(&self.horizresolution)?;
        w.put(&self.vertresolution)?;
        w.put_zeros(4)?;
        w.put(&self.frame_count)?;
        w.put(&self.compressorname)?;
        w.put(&self.depth)?;
        w.put(&-1i16)
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        r.skip(6)?;
        let data_reference_index = r.get()?;
        r.skip(2 + 2 + 4 * 3)?;
        let width = r.get()?;
        let height = r.get()?;
        let horizresolution = r.get()?;
        let vertresolution = r.get()?;
        r.skip(4)?;
        let frame_count = r.get()?;
        let compressorname = r.get()?;
        let depth = r.get()?;
        r.skip(2)?;
        Ok(Self {
            data_reference_index,
            width,
            height,
            horizresolution,
            vertresolution,
            frame_count,
            compressorname,
            depth,
        })
    }
}

/// 音声系の [`SampleEntry`] に共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub channelcount: u16,
    pub samplesize: u16,
    pub samplerate: FixedPointNumber<u16, u16>,
}

impl AudioSampleEntryFields {
    /// [`AudioSampleEntryFields::data_reference_index`] のデフォルト値
    pub const DEFAULT_DATA_REFERENCE_INDEX: NonZeroU16 = NonZeroU16::MIN;

    /// [`AudioSampleEntryFields::samplesize`] のデフォルト値
    pub const DEFAULT_SAMPLESIZE: u16 = 16;

    fn write(&self, w: &mut PayloadWriter<'_>) -> Result<()> {
        w.put_zeros(6)?;
        w.put(&self.data_reference_index)?;
        w.put_zeros(4 * 2)?;
        w.put(&self.channelcount)?;
        w.put(&self.samplesize)?;
        w.put_zeros(2 + 2)?;
        w.put(&self.samplerate)
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        r.skip(6)?;
        let data_reference_index = r.get()?;
        r.skip(4 * 2)?;
        let channelcount = r.get()?;
        let samplesize = r.get()?;
        r.skip(2 + 2)?;
        let samplerate = r.get()?;
        Ok(Self {
            data_reference_index,
            channelcount,
            samplesize,
            samplerate,
        })
    }
}

/// [ISO/IEC 14496-15] AVCSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Avc1Box {
    pub visual: VisualSampleEntryFields,

    /// 欠けている場合は None
    pub avcc_box: Option<AvccBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl Avc1Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avc1");
}

impl Encode for Avc1Box {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            self.visual.write(w)?;
            if let Some(b) = &self.avcc_box {
                w.put(b)?;
            }
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for Avc1Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let visual = VisualSampleEntryFields::read(r)?;
            let mut avcc_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    AvccBox::TYPE if avcc_box.is_none() => avcc_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                visual,
                avcc_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for Avc1Box {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.avcc_box
                .iter()
                .map(as_box_object)
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-15] AVCConfigurationBox class (親: [`Avc1Box`])
///
/// ペイロードは AVCDecoderConfigurationRecord そのもの
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AvccBox {
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    pub length_size_minus_one: Uint<u8, 2>,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
    pub chroma_format: Option<Uint<u8, 2>>,
    pub bit_depth_luma_minus8: Option<Uint<u8, 3>>,
    pub bit_depth_chroma_minus8: Option<Uint<u8, 3>>,
    pub sps_ext_list: Vec<Vec<u8>>,
}

impl AvccBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avcC");

    const CONFIGURATION_VERSION: u8 = 1;

    /// エンコーダーが出力した AVCDecoderConfigurationRecord のバイト列から [`AvccBox`] を作成する
    pub fn from_record_bytes(record: &[u8]) -> Result<Self> {
        crate::boxes::with_box_type(Self::TYPE, || {
            Self::read_record(&mut PayloadReader::new(record))
        })
    }

    // Baseline / Main / Extended 以外のプロファイルでは拡張フィールドが続く
    fn has_extension(profile: u8) -> bool {
        !matches!(profile, 66 | 77 | 88)
    }

    fn write_parameter_sets(
        w: &mut PayloadWriter<'_>,
        sets: &[Vec<u8>],
        count_prefix: u8,
        name: &str,
    ) -> Result<()> {
        let count = u8::try_from(sets.len())
            .ok()
            .filter(|n| *n & count_prefix == 0)
            .ok_or_else(|| Error::invalid_input(format!("Too many {name}s")))?;
        w.put(&(count_prefix | count))?;
        sets.iter().try_for_each(|set| {
            let size = u16::try_from(set.len())
                .map_err(|_| Error::invalid_input(format!("Too long {name}")))?;
            w.put(&size)?;
            w.put(&set[..])
        })
    }

    fn read_parameter_sets(r: &mut PayloadReader<'_>, count: usize) -> Result<Vec<Vec<u8>>> {
        (0..count)
            .map(|_| {
                let size: u16 = r.get()?;
                Ok(r.take(size as usize)?.to_vec())
            })
            .collect()
    }

    fn write_record(&self, w: &mut PayloadWriter<'_>) -> Result<()> {
        w.put(&Self::CONFIGURATION_VERSION)?;
        w.put(&self.avc_profile_indication)?;
        w.put(&self.profile_compatibility)?;
        w.put(&self.avc_level_indication)?;
        w.put(&(0b1111_1100 | self.length_size_minus_one.get()))?;
        Self::write_parameter_sets(w, &self.sps_list, 0b1110_0000, "SPS")?;
        Self::write_parameter_sets(w, &self.pps_list, 0, "PPS")?;

        if !Self::has_extension(self.avc_profile_indication) {
            return Ok(());
        }
        let missing = |field: &str| {
            Error::invalid_input(format!("Missing '{field}' field in 'avcC' box"))
        };
        let chroma_format = self.chroma_format.ok_or_else(|| missing("chroma_format"))?;
        let luma = self
            .bit_depth_luma_minus8
            .ok_or_else(|| missing("bit_depth_luma_minus8"))?;
        let chroma = self
            .bit_depth_chroma_minus8
            .ok_or_else(|| missing("bit_depth_chroma_minus8"))?;
        w.put(&(0b1111_1100 | chroma_format.get()))?;
        w.put(&(0b1111_1000 | luma.get()))?;
        w.put(&(0b1111_1000 | chroma.get()))?;
        Self::write_parameter_sets(w, &self.sps_ext_list, 0, "SPS EXT")
    }

    fn read_record(r: &mut PayloadReader<'_>) -> Result<Self> {
        let configuration_version: u8 = r.get()?;
        if configuration_version != Self::CONFIGURATION_VERSION {
            return Err(Error::invalid_data(format!(
                "Unsupported avcC configuration version: {configuration_version}"
            )));
        }
        let avc_profile_indication = r.get()?;
        let profile_compatibility = r.get()?;
        let avc_level_indication = r.get()?;
        let length_size_minus_one = Uint::from_bits(r.get()?);
        let sps_count = Uint::<u8, 5>::from_bits(r.get()?).get() as usize;
        let sps_list = Self::read_parameter_sets(r, sps_count)?;
        let pps_count: u8 = r.get()?;
        let pps_list = Self::read_parameter_sets(r, pps_count as usize)?;

        let mut avcc = Self {
            avc_profile_indication,
            profile_compatibility,
            avc_level_indication,
            length_size_minus_one,
            sps_list,
            pps_list,
            chroma_format: None,
            bit_depth_luma_minus8: None,
            bit_depth_chroma_minus8: None,
            sps_ext_list: Vec::new(),
        };

        // 拡張フィールドが必須のプロファイルでも、省略しているファイルが実在するので許容する
        if Self::has_extension(avc_profile_indication) && r.has_remaining() {
            avcc.chroma_format = Some(Uint::from_bits(r.get()?));
            avcc.bit_depth_luma_minus8 = Some(Uint::from_bits(r.get()?));
            avcc.bit_depth_chroma_minus8 = Some(Uint::from_bits(r.get()?));
            let sps_ext_count: u8 = r.get()?;
            avcc.sps_ext_list = Self::read_parameter_sets(r, sps_ext_count as usize)?;
        }
        Ok(avcc)
    }
}

impl Encode for AvccBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| self.write_record(w))
    }
}

impl Decode for AvccBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, Self::read_record)
    }
}

impl BaseBox for AvccBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

/// 中身を解釈せずにバイト列のまま保持するコーデック設定ボックス（hvcC / vpcC / av1C）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CodecConfigBox {
    pub box_type: BoxType,
    pub payload: Vec<u8>,
}

impl CodecConfigBox {
    /// [ISO/IEC 14496-15] HEVCConfigurationBox の種別
    pub const HVCC: BoxType = BoxType::Normal(*b"hvcC");

    /// [VP Codec ISO Media File Format Binding] VPCodecConfigurationBox の種別
    pub const VPCC: BoxType = BoxType::Normal(*b"vpcC");

    /// [AV1 Codec ISO Media File Format Binding] AV1CodecConfigurationBox の種別
    pub const AV1C: BoxType = BoxType::Normal(*b"av1C");
}

impl Encode for CodecConfigBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, self.box_type, |w| w.put(&self.payload[..]))
    }
}

impl Decode for CodecConfigBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        decode_box(buf, header.box_type, |r| {
            Ok(Self {
                box_type: header.box_type,
                payload: r.take_rest().to_vec(),
            })
        })
    }
}

impl BaseBox for CodecConfigBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

/// avc1 以外の映像サンプルエントリー（hvc1 / hev1 / vp08 / vp09 / av01）
///
/// 多重化はしないので、コーデック設定は [`CodecConfigBox`] として中身を解釈せずに保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VisualCodecBox {
    pub box_type: BoxType,
    pub visual: VisualSampleEntryFields,

    /// 欠けている場合は None
    pub config_box: Option<CodecConfigBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl VisualCodecBox {
    /// [ISO/IEC 14496-15] HEVCSampleEntry (パラメータセットがサンプルエントリーのみにある)
    pub const HVC1: BoxType = BoxType::Normal(*b"hvc1");

    /// [ISO/IEC 14496-15] HEVCSampleEntry (パラメータセットがサンプル中にもありうる)
    pub const HEV1: BoxType = BoxType::Normal(*b"hev1");

    /// VP8 のサンプルエントリー
    pub const VP08: BoxType = BoxType::Normal(*b"vp08");

    /// VP9 のサンプルエントリー
    pub const VP09: BoxType = BoxType::Normal(*b"vp09");

    /// AV1 のサンプルエントリー
    pub const AV01: BoxType = BoxType::Normal(*b"av01");

    /// サンプルエントリー種別に対応するコーデック設定ボックスの種別を返す
    pub fn config_box_type_for(entry_type: BoxType) -> Option<BoxType> {
        match entry_type {
            Self::HVC1 | Self::HEV1 => Some(CodecConfigBox::HVCC),
            Self::VP08 | Self::VP09 => Some(CodecConfigBox::VPCC),
            Self::AV01 => Some(CodecConfigBox::AV1C),
            _ => None,
        }
    }
}

impl Encode for VisualCodecBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, self.box_type, |w| {
            self.visual.write(w)?;
            if let Some(b) = &self.config_box {
                w.put(b)?;
            }
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for VisualCodecBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        let entry_type = header.box_type;
        let config_type = Self::config_box_type_for(entry_type).ok_or_else(|| {
            Error::unsupported(format!("Unsupported visual sample entry: {entry_type}"))
        })?;
        decode_box(buf, entry_type, |r| {
            let visual = VisualSampleEntryFields::read(r)?;
            let mut config_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    ty if ty == config_type && config_box.is_none() => {
                        config_box = Some(r.get()?)
                    }
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                box_type: entry_type,
                visual,
                config_box,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for VisualCodecBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            self.config_box
                .iter()
                .map(as_box_object)
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [<https://gitlab.xiph.org/xiph/opus/-/blob/main/doc/opus_in_isobmff.html>] OpusSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct OpusBox {
    pub audio: AudioSampleEntryFields,
    pub dops_box: DopsBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl OpusBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"Opus");

    /// Opus は常に 48 kHz で扱われる
    pub const SAMPLE_RATE: u16 = 48000;
}

impl Encode for OpusBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            self.audio.write(w)?;
            w.put(&self.dops_box)?;
            w.put_all(&self.unknown_boxes)
        })
    }
}

impl Decode for OpusBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let audio = AudioSampleEntryFields::read(r)?;
            let mut dops_box = None;
            let mut unknown_boxes = Vec::new();
            while r.has_remaining() {
                match r.peek_box_type()? {
                    DopsBox::TYPE if dops_box.is_none() => dops_box = Some(r.get()?),
                    _ => unknown_boxes.push(r.get()?),
                }
            }
            Ok(Self {
                audio,
                dops_box: check_mandatory_box(dops_box, "dOps", "Opus")?,
                unknown_boxes,
            })
        })
    }
}

impl BaseBox for OpusBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            std::iter::once(as_box_object(&self.dops_box))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// Opus のチャンネルマッピング（ChannelMappingFamily が 0 以外の場合のみ存在する）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct OpusChannelMapping {
    pub family: u8,
    pub stream_count: u8,
    pub coupled_count: u8,
    pub mapping: Vec<u8>,
}

/// [RFC 7845] Opus の識別ヘッダー（OpusHead）
///
/// エンコーダーがコーデック設定として出力するもので、値はリトルエンディアンで格納されている
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct OpusHead {
    pub version: u8,
    pub channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping: Option<OpusChannelMapping>,
}

impl OpusHead {
    /// 識別ヘッダーの先頭に置かれるマジックシグネチャ
    pub const MAGIC: [u8; 8] = *b"OpusHead";

    const FIXED_SIZE: usize = 19;

    /// OpusHead のバイト列をパースする
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::FIXED_SIZE || bytes[..8] != Self::MAGIC {
            return Err(Error::invalid_data("Not an OpusHead identification header"));
        }
        let u16_le = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let channel_count = bytes[9];
        let family = bytes[18];
        let channel_mapping = if family == 0 {
            None
        } else {
            let table = bytes
                .get(Self::FIXED_SIZE..Self::FIXED_SIZE + 2 + channel_count as usize)
                .ok_or_else(|| Error::invalid_data("Truncated OpusHead channel mapping table"))?;
            Some(OpusChannelMapping {
                family,
                stream_count: table[0],
                coupled_count: table[1],
                mapping: table[2..].to_vec(),
            })
        };
        Ok(Self {
            version: bytes[8],
            channel_count,
            pre_skip: u16_le(10),
            input_sample_rate: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            output_gain: u16_le(16) as i16,
            channel_mapping,
        })
    }
}

/// [<https://gitlab.xiph.org/xiph/opus/-/blob/main/doc/opus_in_isobmff.html>] OpusSpecificBox class (親: [`OpusBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DopsBox {
    pub output_channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping: Option<OpusChannelMapping>,
}

impl DopsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dOps");

    const VERSION: u8 = 0;

    /// OpusHead の内容から [`DopsBox`] を作成する
    pub fn from_opus_head(head: &OpusHead) -> Self {
        Self {
            output_channel_count: head.channel_count,
            pre_skip: head.pre_skip,
            input_sample_rate: head.input_sample_rate,
            output_gain: head.output_gain,
            channel_mapping: head.channel_mapping.clone(),
        }
    }
}

impl Encode for DopsBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        encode_box(buf, Self::TYPE, |w| {
            w.put(&Self::VERSION)?;
            w.put(&self.output_channel_count)?;
            w.put(&self.pre_skip)?;
            w.put(&self.input_sample_rate)?;
            w.put(&self.output_gain)?;
            let Some(m) = &self.channel_mapping else {
                return w.put(&0u8);
            };
            if m.mapping.len() != self.output_channel_count as usize {
                return Err(Error::invalid_input(
                    "Channel mapping length must match the output channel count",
                ));
            }
            w.put(&m.family)?;
            w.put(&m.stream_count)?;
            w.put(&m.coupled_count)?;
            w.put(&m.mapping[..])
        })
    }
}

impl Decode for DopsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        decode_box(buf, Self::TYPE, |r| {
            let version: u8 = r.get()?;
            if version != Self::VERSION {
                return Err(Error::invalid_data(format!(
                    "Unsupported dOps version: {version}"
                )));
            }
            let output_channel_count: u8 = r.get()?;
            let pre_skip = r.get()?;
            let input_sample_rate = r.get()?;
            let output_gain = r.get()?;
            let family: u8 = r.get()?;
            let channel_mapping = if family == 0 {
                None
            } else {
                Some(OpusChannelMapping {
                    family,
                    stream_count: r.get()?,
                    coupled_count: r.get()?,
                    mapping: r.take(output_channel_count as usize)?.to_vec(),
                })
            };
            Ok(Self {
                output_channel_count,
                pre_skip,
                input_sample_rate,
                output_gain,
                channel_mapping,
            })
        })
    }
}

impl BaseBox for DopsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPUS_HEAD_STEREO: [u8; 19] = [
        b'O', b'p', b'u', b's', b'H', b'e', b'a', b'd', 1, 2, 0x38, 0x01, 0x80, 0xbb, 0, 0, 0, 0,
        0,
    ];

    #[test]
    fn dops_from_opus_head() {
        let head = OpusHead::parse(&OPUS_HEAD_STEREO).expect("parse");
        assert_eq!(head.channel_count, 2);
        assert_eq!(head.pre_skip, 312);
        assert_eq!(head.input_sample_rate, 48000);
        assert_eq!(head.channel_mapping, None);

        let dops = DopsBox::from_opus_head(&head);
        let bytes = dops.encode_to_vec().expect("encode");
        assert_eq!(
            bytes,
            [
                0, 0, 0, 19, b'd', b'O', b'p', b's', 0, 2, 0x01, 0x38, 0, 0, 0xbb, 0x80, 0, 0, 0
            ]
        );
        let (decoded, _) = DopsBox::decode(&bytes).expect("decode");
        assert_eq!(decoded, dops);
    }

    #[test]
    fn opus_head_rejects_bad_magic() {
        let mut bytes = OPUS_HEAD_STEREO;
        bytes[0] = b'X';
        assert!(OpusHead::parse(&bytes).is_err());
        assert!(OpusHead::parse(&OPUS_HEAD_STEREO[..10]).is_err());
    }

    #[test]
    fn avcc_from_record_bytes() {
        let record = [
            1, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0, 4, 0x67, 0x42, 0xc0, 0x1e, 1, 0, 2, 0x68, 0xce,
        ];
        let avcc = AvccBox::from_record_bytes(&record).expect("parse");
        assert_eq!(avcc.avc_profile_indication, 0x42);
        assert_eq!(avcc.avc_level_indication, 0x1e);
        assert_eq!(avcc.length_size_minus_one.get(), 3);
        assert_eq!(avcc.sps_list, [vec![0x67, 0x42, 0xc0, 0x1e]]);
        assert_eq!(avcc.pps_list, [vec![0x68, 0xce]]);

        let encoded = avcc.encode_to_vec().expect("encode");
        assert_eq!(&encoded[8..], &record);
    }

    #[test]
    fn generic_visual_entry_keeps_config_payload() {
        let entry = SampleEntry::VisualCodec(VisualCodecBox {
            box_type: VisualCodecBox::VP09,
            visual: VisualSampleEntryFields::with_resolution(640, 360),
            config_box: Some(CodecConfigBox {
                box_type: CodecConfigBox::VPCC,
                payload: vec![1, 0, 0, 0, 0, 10, 0x80, 1, 1, 1, 0, 0],
            }),
            unknown_boxes: Vec::new(),
        });
        let bytes = entry.encode_to_vec().expect("encode");
        let (decoded, size) = SampleEntry::decode(&bytes).expect("decode");
        assert_eq!(size, bytes.len());
        assert_eq!(decoded, entry);
        assert_eq!(decoded.video_resolution(), Some((640, 360)));

        let config = decoded
            .encode_codec_config_box()
            .flatten()
            .expect("config box")
            .expect("encode");
        assert_eq!(&config[4..8], b"vpcC");
    }

    #[test]
    fn avc1_without_avcc_still_decodes() {
        let entry = SampleEntry::Avc1(Avc1Box {
            visual: VisualSampleEntryFields::with_resolution(320, 240),
            avcc_box: None,
            unknown_boxes: Vec::new(),
        });
        let bytes = entry.encode_to_vec().expect("encode");
        let (decoded, _) = SampleEntry::decode(&bytes).expect("decode");
        assert_eq!(decoded, entry);
        assert!(matches!(decoded.encode_codec_config_box(), Some(None)));
    }
}
