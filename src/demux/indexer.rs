use std::{num::NonZeroU32, time::Duration};

use crate::{
    BaseBox, BoxHeader, BoxSize, BoxType, Decode, Error, Sample, TrackKind,
    aux::SampleTableAccessor,
    boxes::{MoovBox, SampleEntry, StszBox, TrakBox, VisualCodecBox},
    time,
};

use super::{ByteSource, DemuxError, IndexedSample, TrackInfo, VideoDecoderConfig};

/// 映像トラックのサンプル索引
pub(super) struct VideoIndex {
    pub timescale: NonZeroU32,

    /// デコード順
    pub samples: Vec<IndexedSample>,

    /// 表示順の位置からデコード順の位置への対応
    pub pts_to_dts: Vec<usize>,

    pub time_offset_ms: f64,
}

/// トップレベルのボックスヘッダーを順に読み進めて、moov ボックスだけを読み込んでデコードする
pub(super) fn load_moov_box<S: ByteSource>(source: &mut S) -> Result<MoovBox, DemuxError> {
    let total_len = source.total_len()?;
    let mut offset = 0;
    while offset < total_len {
        let head_end = total_len.min(offset + BoxHeader::MAX_SIZE as u64);
        let head = source.read_range(offset, head_end)?;
        let (header, header_size) = BoxHeader::decode(&head)?;
        let box_size = match header.box_size {
            BoxSize::VARIABLE_SIZE => total_len - offset,
            size => size.get(),
        };
        let box_end = offset
            .checked_add(box_size)
            .filter(|&end| box_size >= header_size as u64 && end <= total_len)
            .ok_or_else(|| {
                Error::invalid_data(format!(
                    "{} box at offset {offset} declares {box_size} bytes, but the source has {total_len}",
                    header.box_type
                ))
            })?;
        tracing::trace!(
            box_type = %header.box_type,
            offset,
            box_size,
            "scanned top-level box"
        );

        if header.box_type == MoovBox::TYPE {
            let bytes = source.read_range(offset, box_end)?;
            let (moov_box, _) = MoovBox::decode(&bytes)?;
            return Ok(moov_box);
        }
        offset = box_end;
    }
    Err(DemuxError::MissingMoovBox)
}

/// 映像・音声トラックの情報を列挙する
pub(super) fn track_infos(moov_box: &MoovBox) -> Vec<TrackInfo> {
    moov_box
        .trak_boxes
        .iter()
        .filter_map(|trak_box| {
            let kind = if trak_box.is_video() {
                TrackKind::Video
            } else if trak_box.is_audio() {
                TrackKind::Audio
            } else {
                return None;
            };
            let mdhd_box = &trak_box.mdia_box.mdhd_box;
            Some(TrackInfo {
                track_id: trak_box.tkhd_box.track_id,
                kind,
                timescale: mdhd_box.timescale,
                duration: Duration::from_micros(time::ticks_to_us(
                    mdhd_box.duration,
                    mdhd_box.timescale,
                )),
            })
        })
        .collect()
}

pub(super) fn find_video_trak(moov_box: &MoovBox) -> Result<&TrakBox, DemuxError> {
    moov_box
        .trak_boxes
        .iter()
        .find(|t| t.is_video())
        .ok_or(DemuxError::NoVideoTrack)
}

/// サンプルエントリーからデコーダー設定を取り出す
pub(super) fn decoder_config(trak_box: &TrakBox) -> Result<VideoDecoderConfig, DemuxError> {
    let entry = trak_box
        .stbl_box()
        .stsd_box
        .entries
        .first()
        .ok_or(DemuxError::MissingCodecConfig)?;
    let unsupported = || DemuxError::UnsupportedCodecConfig(entry_type_name(entry));

    let config_box = entry
        .encode_codec_config_box()
        .ok_or_else(unsupported)?
        .ok_or(DemuxError::MissingCodecConfig)??;
    let (_, payload) = BoxHeader::decode_header_and_payload(&config_box)?;
    let description = payload.to_vec();
    let (coded_width, coded_height) = entry.video_resolution().ok_or_else(unsupported)?;

    Ok(VideoDecoderConfig {
        codec: codec_string(entry, &description)?,
        coded_width,
        coded_height,
        description,
    })
}

fn entry_type_name(entry: &SampleEntry) -> String {
    entry.box_type().to_string()
}

/// WebCodecs 形式のコーデック文字列を組み立てる
pub(super) fn codec_string(
    entry: &SampleEntry,
    description: &[u8],
) -> Result<String, DemuxError> {
    match entry {
        SampleEntry::Avc1(_) => {
            let [_, profile, compatibility, level, ..] = *description else {
                return Err(config_too_short("avcC", description.len()));
            };
            Ok(format!("avc1.{profile:02x}{compatibility:02x}{level:02x}"))
        }
        SampleEntry::VisualCodec(b) => match b.box_type {
            VisualCodecBox::VP08 => Ok("vp8".to_owned()),
            VisualCodecBox::VP09 => vp09_codec_string(description),
            VisualCodecBox::AV01 => av01_codec_string(description),
            ty => hevc_codec_string(&ty.to_string(), description),
        },
        _ => Err(DemuxError::UnsupportedCodecConfig(entry_type_name(entry))),
    }
}

fn config_too_short(name: &str, size: usize) -> DemuxError {
    Error::invalid_data(format!("{name} is too short: {size} bytes")).into()
}

// vpcC はフルボックスなので、先頭 4 バイトのバージョンとフラグを飛ばす
fn vp09_codec_string(vpcc: &[u8]) -> Result<String, DemuxError> {
    let [_, _, _, _, profile, level, bits, ..] = *vpcc else {
        return Err(config_too_short("vpcC", vpcc.len()));
    };
    Ok(format!("vp09.{profile:02}.{level:02}.{:02}", bits >> 4))
}

fn av01_codec_string(av1c: &[u8]) -> Result<String, DemuxError> {
    let [_, profile_and_level, flags, ..] = *av1c else {
        return Err(config_too_short("av1C", av1c.len()));
    };
    let profile = profile_and_level >> 5;
    let level = profile_and_level & 0x1f;
    let tier = if flags & 0x80 != 0 { 'H' } else { 'M' };
    let high_bitdepth = flags & 0x40 != 0;
    let twelve_bit = flags & 0x20 != 0;
    let bit_depth = match (high_bitdepth, twelve_bit) {
        (true, true) => 12,
        (true, false) => 10,
        _ => 8,
    };
    Ok(format!("av01.{profile}.{level:02}{tier}.{bit_depth:02}"))
}

fn hevc_codec_string(entry_type: &str, hvcc: &[u8]) -> Result<String, DemuxError> {
    if hvcc.len() < 13 {
        return Err(config_too_short("hvcC", hvcc.len()));
    }
    let profile_space = match hvcc[1] >> 6 {
        1 => "A",
        2 => "B",
        3 => "C",
        _ => "",
    };
    let tier = if hvcc[1] & 0x20 != 0 { 'H' } else { 'L' };
    let profile_idc = hvcc[1] & 0x1f;
    let compatibility = u32::from_be_bytes([hvcc[2], hvcc[3], hvcc[4], hvcc[5]]).reverse_bits();
    let level_idc = hvcc[12];

    let mut codec = format!(
        "{entry_type}.{profile_space}{profile_idc}.{compatibility:x}.{tier}{level_idc}"
    );
    let constraints = &hvcc[6..12];
    let used = constraints
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    for b in &constraints[..used] {
        codec.push_str(&format!(".{b:x}"));
    }
    Ok(codec)
}

/// サンプルテーブルを展開して、デコード順と表示順の両方で索引化する
///
/// 固定サイズの stsz はサンプル数がペイロードの大きさに裏付けられないので、
/// 全サンプルのデータがソースに収まるかを展開前に確認する
pub(super) fn index_samples(trak_box: &TrakBox, total_len: u64) -> Result<VideoIndex, DemuxError> {
    let timescale = trak_box.mdia_box.mdhd_box.timescale;
    if let StszBox::Fixed {
        sample_size,
        sample_count,
    } = &trak_box.stbl_box().stsz_box
        && u64::from(*sample_count) * u64::from(sample_size.get()) > total_len
    {
        return Err(Error::invalid_data(format!(
            "stsz declares {sample_count} samples of {sample_size} bytes, but the source has {total_len}"
        ))
        .into());
    }
    let accessor = SampleTableAccessor::new(trak_box.stbl_box())?;
    let table = accessor.samples();

    // 安定ソートなので、表示時刻が同じサンプル同士はデコード順を保つ
    let mut pts_to_dts: Vec<usize> = (0..table.len()).collect();
    pts_to_dts.sort_by_key(|&i| table[i].composition_time);

    let mut dts_to_pts = vec![0; table.len()];
    for (pts_index, &dts_index) in pts_to_dts.iter().enumerate() {
        dts_to_pts[dts_index] = pts_index;
    }

    let samples = table
        .iter()
        .zip(dts_to_pts)
        .enumerate()
        .map(|(dts_index, (s, pts_index))| IndexedSample {
            sample: Sample {
                sequence_number: s.sample_number.get(),
                track: TrackKind::Video,
                byte_offset: s.data_offset,
                byte_size: s.data_size,
                decode_timestamp: s.decode_time,
                composition_timestamp: s.composition_time,
                duration: s.duration,
                is_sync_sample: s.is_sync_sample,
                payload: None,
            },
            pts_index,
            dts_index,
        })
        .collect();

    let time_offset_ms = pts_to_dts
        .first()
        .map_or(0.0, |&i| time::ticks_to_ms(table[i].composition_time, timescale));

    Ok(VideoIndex {
        timescale,
        samples,
        pts_to_dts,
        time_offset_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{CodecConfigBox, VisualSampleEntryFields};

    fn visual_entry(box_type: BoxType, config_type: BoxType, payload: &[u8]) -> SampleEntry {
        SampleEntry::VisualCodec(VisualCodecBox {
            box_type,
            visual: VisualSampleEntryFields::with_resolution(640, 360),
            config_box: Some(CodecConfigBox {
                box_type: config_type,
                payload: payload.to_vec(),
            }),
            unknown_boxes: Vec::new(),
        })
    }

    #[test]
    fn vp09_and_av01_codec_strings() {
        let vpcc = [1, 0, 0, 0, 0, 31, 0x80, 2, 2, 2, 0, 0];
        let entry = visual_entry(VisualCodecBox::VP09, CodecConfigBox::VPCC, &vpcc);
        assert_eq!(codec_string(&entry, &vpcc).expect("codec"), "vp09.00.31.08");

        let av1c = [0x81, 0x08, 0x0c, 0x00];
        let entry = visual_entry(VisualCodecBox::AV01, CodecConfigBox::AV1C, &av1c);
        assert_eq!(codec_string(&entry, &av1c).expect("codec"), "av01.0.08M.08");

        assert!(matches!(
            codec_string(&entry, &[0x81]),
            Err(DemuxError::Box(_))
        ));
    }

    #[test]
    fn hevc_codec_string_drops_trailing_zero_constraints() {
        let mut hvcc = [0u8; 23];
        hvcc[0] = 1;
        hvcc[1] = 0x01;
        hvcc[2] = 0x60;
        hvcc[6] = 0x90;
        hvcc[12] = 93;
        let entry = visual_entry(VisualCodecBox::HVC1, CodecConfigBox::HVCC, &hvcc);
        assert_eq!(
            codec_string(&entry, &hvcc).expect("codec"),
            "hvc1.1.6.L93.90"
        );
    }

    #[test]
    fn missing_moov_box() {
        // free ボックスとサイズ 0 の mdat ボックスだけのファイル
        let mut bytes = vec![0, 0, 0, 8, b'f', b'r', b'e', b'e'];
        bytes.extend_from_slice(&[0, 0, 0, 0, b'm', b'd', b'a', b't', 1, 2, 3]);
        assert!(matches!(
            load_moov_box(&mut bytes),
            Err(DemuxError::MissingMoovBox)
        ));
    }

    #[test]
    fn box_larger_than_the_source_is_rejected() {
        let mut bytes = vec![0, 0, 0, 16, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm'];
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&[0, 0, 0, 1, b'm', b'o', b'o', b'v']);
        bytes.extend_from_slice(&(1u64 << 40).to_be_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(load_moov_box(&mut bytes), Err(DemuxError::Box(_))));

        // ヘッダーより小さいサイズも不正
        let mut bytes = vec![0, 0, 0, 4, b'f', b'r', b'e', b'e'];
        assert!(matches!(load_moov_box(&mut bytes), Err(DemuxError::Box(_))));
    }
}
