use std::num::NonZeroU32;

use crate::{
    Either, Encode, FixedPointNumber, Mp4FileTime, Sample, TrackKind,
    boxes::{
        AudioSampleEntryFields, Avc1Box, AvccBox, Co64Box, DinfBox, DopsBox, FtypBox, HdlrBox,
        MdatBox, MdhdBox, MdiaBox, MinfBox, MoovBox, MvhdBox, OpusBox, OpusHead,
        RollRecoveryEntry, SampleEntry, SbgpBox, SbgpEntry, SgpdBox, SmhdBox, StblBox, StcoBox,
        StscBox, StscEntry, StsdBox, StssBox, StszBox, SttsBox, TkhdBox, TrakBox,
        VisualSampleEntryFields, VmhdBox,
    },
    time,
};

use super::{MuxError, Mp4FileMuxerOptions, Track};

/// 多重化の結果
///
/// ファイルは ftyp → mdat（映像サンプル、音声サンプルの順）→ moov の順で構成される
#[derive(Debug, Clone)]
pub struct Document {
    /// ftyp ボックス
    pub ftyp_box: FtypBox,

    /// 映像トラック（サンプルの位置は mdat ペイロード先頭からの相対位置）
    pub video_track: Track,

    /// 音声トラック（サンプルがない場合は None）
    pub audio_track: Option<Track>,

    /// mdat のペイロード
    pub media_data: Vec<u8>,

    /// ファイル先頭から mdat ペイロード先頭までのバイト数
    pub media_data_start: u64,

    /// moov ボックス
    pub moov_box: MoovBox,
}

impl Document {
    /// ファイル全体のバイト列を生成する
    pub fn to_bytes(&self) -> Result<Vec<u8>, MuxError> {
        let ftyp = self.ftyp_box.encode_to_vec()?;
        let mdat_header = MdatBox::header(self.media_data.len() as u64).encode_to_vec()?;
        let moov = self.moov_box.encode_to_vec()?;

        let mut bytes =
            Vec::with_capacity(ftyp.len() + mdat_header.len() + self.media_data.len() + moov.len());
        bytes.extend_from_slice(&ftyp);
        bytes.extend_from_slice(&mdat_header);
        bytes.extend_from_slice(&self.media_data);
        bytes.extend_from_slice(&moov);
        Ok(bytes)
    }
}

/// 蓄積済みの映像・音声トラックから [`Document`] を組み立てる
///
/// 映像サンプルがない場合は、ボックスを一つも構築する前に [`MuxError::NoVideoSamples`] で失敗する
pub fn assemble(
    video_track: Track,
    audio_track: Track,
    options: &Mp4FileMuxerOptions,
) -> Result<Document, MuxError> {
    if video_track.samples.is_empty() {
        return Err(MuxError::NoVideoSamples);
    }
    let (Some(width), Some(height)) = (options.video.width, options.video.height) else {
        return Err(MuxError::MissingVideoResolution);
    };
    let audio_track = (!audio_track.samples.is_empty()).then_some(audio_track);

    let assembler = Assembler {
        options,
        creation_time: Mp4FileTime::from_unix_time(options.creation_timestamp),
    };

    let ftyp_box = FtypBox {
        major_brand: options.major_brand,
        minor_version: 0,
        compatible_brands: options.compatible_brands.clone(),
    };

    let (media_data, video_track, audio_track) = concat_media_data(video_track, audio_track);
    let mdat_header_size = MdatBox::header(media_data.len() as u64).external_size() as u64;
    let media_data_start = ftyp_box.encode_to_vec()?.len() as u64 + mdat_header_size;

    let mut trak_boxes = vec![assembler.build_video_trak_box(
        &video_track,
        width,
        height,
        media_data_start,
    )?];
    if let Some(audio_track) = &audio_track {
        trak_boxes.push(assembler.build_audio_trak_box(audio_track, media_data_start)?);
    }
    let moov_box = assembler.build_moov_box(trak_boxes);

    tracing::debug!(
        video_samples = video_track.samples.len(),
        audio_samples = audio_track.as_ref().map_or(0, |t| t.samples.len()),
        media_data_size = media_data.len(),
        media_data_start,
        "assembled mp4 document"
    );

    Ok(Document {
        ftyp_box,
        video_track,
        audio_track,
        media_data,
        media_data_start,
        moov_box,
    })
}

// 映像、音声の順にペイロードを連結して、音声サンプルの位置を映像領域の後ろにずらす
fn concat_media_data(
    mut video: Track,
    mut audio: Option<Track>,
) -> (Vec<u8>, Track, Option<Track>) {
    let video_region_end = video.region_size();
    let total = video_region_end + audio.as_ref().map_or(0, Track::region_size);
    let mut media_data = Vec::with_capacity(total as usize);

    for sample in &mut video.samples {
        media_data.extend(sample.payload.take().unwrap_or_default());
    }
    for sample in audio.iter_mut().flat_map(|t| t.samples.iter_mut()) {
        media_data.extend(sample.payload.take().unwrap_or_default());
        sample.byte_offset += video_region_end;
    }
    (media_data, video, audio)
}

struct Assembler<'a> {
    options: &'a Mp4FileMuxerOptions,
    creation_time: Mp4FileTime,
}

impl Assembler<'_> {
    fn build_moov_box(&self, trak_boxes: Vec<TrakBox>) -> MoovBox {
        let duration = trak_boxes
            .iter()
            .map(|t| t.tkhd_box.duration)
            .max()
            .unwrap_or_default();
        let mvhd_box = MvhdBox {
            creation_time: self.creation_time,
            modification_time: self.creation_time,
            timescale: time::MOVIE_TIMESCALE,
            duration,
            rate: MvhdBox::DEFAULT_RATE,
            volume: MvhdBox::DEFAULT_VOLUME,
            matrix: MvhdBox::DEFAULT_MATRIX,
            next_track_id: trak_boxes.len() as u32 + 1,
        };
        MoovBox {
            mvhd_box,
            trak_boxes,
            unknown_boxes: Vec::new(),
        }
    }

    fn build_tkhd_box(&self, track: &Track, track_id: u32) -> TkhdBox {
        let volume = match track.kind {
            TrackKind::Video => TkhdBox::DEFAULT_VIDEO_VOLUME,
            TrackKind::Audio => TkhdBox::DEFAULT_AUDIO_VOLUME,
        };
        TkhdBox {
            flag_track_enabled: true,
            flag_track_in_movie: true,
            flag_track_in_preview: false,
            creation_time: self.creation_time,
            modification_time: self.creation_time,
            track_id,
            duration: time::rescale_ticks(
                track.total_duration(),
                track.timescale,
                time::MOVIE_TIMESCALE,
            ),
            layer: TkhdBox::DEFAULT_LAYER,
            alternate_group: TkhdBox::DEFAULT_ALTERNATE_GROUP,
            volume,
            matrix: TkhdBox::DEFAULT_MATRIX,
            width: FixedPointNumber::default(),
            height: FixedPointNumber::default(),
        }
    }

    fn build_mdia_box(
        &self,
        track: &Track,
        smhd_or_vmhd_box: Either<SmhdBox, VmhdBox>,
        stbl_box: StblBox,
    ) -> MdiaBox {
        let handler_type = match track.kind {
            TrackKind::Video => HdlrBox::HANDLER_TYPE_VIDE,
            TrackKind::Audio => HdlrBox::HANDLER_TYPE_SOUN,
        };
        MdiaBox {
            mdhd_box: MdhdBox {
                creation_time: self.creation_time,
                modification_time: self.creation_time,
                timescale: track.timescale,
                duration: track.total_duration(),
                language: MdhdBox::LANGUAGE_UNDEFINED,
            },
            hdlr_box: HdlrBox::unnamed(handler_type),
            minf_box: MinfBox {
                smhd_or_vmhd_box: Some(smhd_or_vmhd_box),
                dinf_box: DinfBox::LOCAL_FILE,
                stbl_box,
                unknown_boxes: Vec::new(),
            },
            unknown_boxes: Vec::new(),
        }
    }

    fn build_video_trak_box(
        &self,
        track: &Track,
        width: u16,
        height: u16,
        media_data_start: u64,
    ) -> Result<TrakBox, MuxError> {
        let record = track
            .codec_config
            .as_deref()
            .ok_or(MuxError::MissingCodecConfig(TrackKind::Video))?;
        let sample_entry = SampleEntry::Avc1(Avc1Box {
            visual: VisualSampleEntryFields::with_resolution(width, height),
            avcc_box: Some(AvccBox::from_record_bytes(record)?),
            unknown_boxes: Vec::new(),
        });

        let mut stbl_box = self.build_stbl_box(track, sample_entry, media_data_start);
        stbl_box.stss_box = Some(StssBox {
            sample_numbers: track
                .samples
                .iter()
                .filter(|s| s.is_sync_sample)
                .filter_map(|s| NonZeroU32::new(s.sequence_number))
                .collect(),
        });

        let mut tkhd_box = self.build_tkhd_box(track, 1);
        tkhd_box.width = FixedPointNumber::new(width, 0);
        tkhd_box.height = FixedPointNumber::new(height, 0);

        Ok(TrakBox {
            tkhd_box,
            mdia_box: self.build_mdia_box(track, Either::B(VmhdBox::default()), stbl_box),
            unknown_boxes: Vec::new(),
        })
    }

    fn build_audio_trak_box(
        &self,
        track: &Track,
        media_data_start: u64,
    ) -> Result<TrakBox, MuxError> {
        let audio_options = &self.options.audio;
        let dops_box = match &track.codec_config {
            Some(head) => DopsBox::from_opus_head(&OpusHead::parse(head)?),
            None => {
                tracing::debug!("no OpusHead from the encoder; building dOps from options");
                DopsBox {
                    output_channel_count: audio_options.channel_count,
                    pre_skip: audio_options.pre_skip,
                    input_sample_rate: track.timescale.get(),
                    output_gain: 0,
                    channel_mapping: None,
                }
            }
        };
        let sample_entry = SampleEntry::Opus(OpusBox {
            audio: AudioSampleEntryFields {
                data_reference_index: AudioSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
                channelcount: dops_box.output_channel_count as u16,
                samplesize: AudioSampleEntryFields::DEFAULT_SAMPLESIZE,
                samplerate: FixedPointNumber::new(OpusBox::SAMPLE_RATE, 0),
            },
            dops_box,
            unknown_boxes: Vec::new(),
        });

        let mut stbl_box = self.build_stbl_box(track, sample_entry, media_data_start);
        stbl_box.sgpd_box = Some(SgpdBox::roll(&[RollRecoveryEntry {
            roll_distance: audio_options.roll_distance,
        }]));
        stbl_box.sbgp_box = Some(SbgpBox {
            grouping_type: SgpdBox::GROUPING_TYPE_ROLL,
            grouping_type_parameter: None,
            entries: vec![SbgpEntry {
                sample_count: track.samples.len() as u32,
                group_description_index: 1,
            }],
        });

        Ok(TrakBox {
            tkhd_box: self.build_tkhd_box(track, 2),
            mdia_box: self.build_mdia_box(track, Either::A(SmhdBox::default()), stbl_box),
            unknown_boxes: Vec::new(),
        })
    }

    fn build_stbl_box(
        &self,
        track: &Track,
        sample_entry: SampleEntry,
        media_data_start: u64,
    ) -> StblBox {
        let chunks: Vec<&[Sample]> = track
            .samples
            .chunks(self.options.samples_per_chunk.get() as usize)
            .collect();

        let mut stsc_entries: Vec<StscEntry> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let sample_per_chunk = chunk.len() as u32;
            if stsc_entries
                .last()
                .is_some_and(|e| e.sample_per_chunk == sample_per_chunk)
            {
                continue;
            }
            stsc_entries.push(StscEntry {
                first_chunk: NonZeroU32::MIN.saturating_add(i as u32),
                sample_per_chunk,
                sample_description_index: NonZeroU32::MIN,
            });
        }

        let chunk_offsets: Vec<u64> = chunks
            .iter()
            .map(|c| c[0].byte_offset + media_data_start)
            .collect();
        let stco_or_co64_box = if chunk_offsets.iter().any(|o| *o > u32::MAX as u64) {
            Either::B(Co64Box { chunk_offsets })
        } else {
            Either::A(StcoBox {
                chunk_offsets: chunk_offsets.into_iter().map(|o| o as u32).collect(),
            })
        };

        StblBox {
            stsd_box: StsdBox {
                entries: vec![sample_entry],
            },
            stts_box: SttsBox::from_sample_deltas(track.samples.iter().map(|s| s.duration)),
            ctts_box: None,
            stsc_box: StscBox {
                entries: stsc_entries,
            },
            stsz_box: StszBox::Variable {
                entry_sizes: track.samples.iter().map(|s| s.byte_size).collect(),
            },
            stco_or_co64_box,
            stss_box: None,
            sgpd_box: None,
            sbgp_box: None,
            unknown_boxes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decode, mux::SampleAccumulator};

    const AVCC_RECORD: [u8; 17] = [
        1, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0, 4, 0x67, 0x42, 0xc0, 0x1e, 1, 0, 2, 0x68, 0xce,
    ];

    fn options() -> Mp4FileMuxerOptions {
        let mut options = Mp4FileMuxerOptions::default();
        options.video.width = Some(320);
        options.video.height = Some(240);
        options
    }

    fn tracks(video_samples: usize, audio_samples: usize) -> (Track, Track) {
        let mut acc = SampleAccumulator::with_options(&options());
        for i in 0..video_samples {
            acc.push(TrackKind::Video, vec![i as u8; 10 + i], i == 0, i as u64 * 3000, 3000)
                .expect("push");
        }
        for i in 0..audio_samples {
            acc.push(TrackKind::Audio, vec![0xaa; 5], true, i as u64 * 960, 960)
                .expect("push");
        }
        let (mut video, audio) = acc.finish();
        video.codec_config = Some(AVCC_RECORD.to_vec());
        (video, audio)
    }

    fn stbl(document: &Document, index: usize) -> &StblBox {
        document.moov_box.trak_boxes[index].stbl_box()
    }

    #[test]
    fn empty_video_fails_before_resolution_check() {
        let (_, audio) = tracks(0, 3);
        let empty = Track::new(TrackKind::Video, NonZeroU32::MIN);
        let result = assemble(empty, audio, &Mp4FileMuxerOptions::default());
        assert!(matches!(result, Err(MuxError::NoVideoSamples)));
    }

    #[test]
    fn missing_resolution_is_rejected() {
        let (video, audio) = tracks(2, 0);
        let result = assemble(video, audio, &Mp4FileMuxerOptions::default());
        assert!(matches!(result, Err(MuxError::MissingVideoResolution)));
    }

    #[test]
    fn missing_avcc_is_rejected() {
        let (mut video, audio) = tracks(2, 0);
        video.codec_config = None;
        let result = assemble(video, audio, &options());
        assert!(matches!(
            result,
            Err(MuxError::MissingCodecConfig(TrackKind::Video))
        ));
    }

    #[test]
    fn chunk_offsets_point_into_mdat() {
        let (video, audio) = tracks(3, 2);
        let document = assemble(video, audio, &options()).expect("assemble");
        let bytes = document.to_bytes().expect("encode");

        let ftyp_size = document.ftyp_box.encode_to_vec().expect("encode").len();
        assert_eq!(document.media_data_start, ftyp_size as u64 + 8);
        assert_eq!(&bytes[ftyp_size + 4..ftyp_size + 8], b"mdat");

        // 映像は 10, 11, 12 バイトなので音声領域は 33 バイト目から始まる
        let Either::A(stco) = &stbl(&document, 1).stco_or_co64_box else {
            panic!("expected stco");
        };
        let start = document.media_data_start as u32;
        assert_eq!(stco.chunk_offsets, [start + 33, start + 38]);
        assert_eq!(
            document.audio_track.as_ref().map(|t| t.samples[0].byte_offset),
            Some(33)
        );
        let audio_start = stco.chunk_offsets[0] as usize;
        assert_eq!(&bytes[audio_start..audio_start + 5], &[0xaa; 5]);

        let video_stbl = stbl(&document, 0);
        let stss = video_stbl.stss_box.as_ref().expect("stss");
        assert_eq!(stss.sample_numbers, [NonZeroU32::MIN]);
        assert_eq!(video_stbl.stts_box.entries.len(), 1);
        assert_eq!(document.moov_box.mvhd_box.timescale, time::MOVIE_TIMESCALE);
        assert_eq!(document.moov_box.mvhd_box.duration, 100);
    }

    #[test]
    fn shorter_last_chunk_gets_its_own_stsc_entry() {
        let (video, audio) = tracks(10, 0);
        let mut options = options();
        options.samples_per_chunk = NonZeroU32::new(4).expect("non zero");
        let document = assemble(video, audio, &options).expect("assemble");
        assert!(document.audio_track.is_none());
        assert_eq!(document.moov_box.trak_boxes.len(), 1);

        let stsc: Vec<_> = stbl(&document, 0)
            .stsc_box
            .entries
            .iter()
            .map(|e| (e.first_chunk.get(), e.sample_per_chunk))
            .collect();
        assert_eq!(stsc, [(1, 4), (3, 2)]);
    }

    #[test]
    fn audio_track_carries_roll_group() {
        let (video, audio) = tracks(1, 4);
        let document = assemble(video, audio, &options()).expect("assemble");
        let audio_stbl = stbl(&document, 1);
        assert!(audio_stbl.stss_box.is_none());
        let sgpd = audio_stbl.sgpd_box.as_ref().expect("sgpd");
        assert_eq!(
            sgpd.roll_entries(),
            Some(vec![RollRecoveryEntry { roll_distance: -4 }])
        );
        let sbgp = audio_stbl.sbgp_box.as_ref().expect("sbgp");
        assert_eq!(sbgp.entries.len(), 1);
        assert_eq!(sbgp.entries[0].sample_count, 4);
        assert_eq!(sbgp.entries[0].group_description_index, 1);
    }

    #[test]
    fn wide_resolution_is_kept_in_tkhd() {
        let (video, audio) = tracks(1, 0);
        let mut options = options();
        options.video.width = Some(40_000);
        options.video.height = Some(u16::MAX);
        let document = assemble(video, audio, &options).expect("assemble");

        let bytes = document.moov_box.encode_to_vec().expect("encode");
        let (moov_box, _) = MoovBox::decode(&bytes).expect("decode");
        let tkhd_box = &moov_box.trak_boxes[0].tkhd_box;
        assert_eq!(tkhd_box.width, FixedPointNumber::new(40_000, 0));
        assert_eq!(tkhd_box.height, FixedPointNumber::new(u16::MAX, 0));
    }
}
