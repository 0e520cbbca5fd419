use super::{ByteSource, IndexedSample};

/// サンプル群のデータを、全体を覆う一回の範囲読み込みで取得する
///
/// 結果はデコード順に並ぶ。空の入力に対しては読み込みを行わない
pub(super) fn fetch_samples<S: ByteSource>(
    source: &mut S,
    samples: &[IndexedSample],
) -> std::io::Result<Vec<IndexedSample>> {
    let mut samples = samples.to_vec();
    samples.sort_by_key(|s| s.sample.byte_offset);
    let (Some(first), Some(end)) = (
        samples.first().map(|s| s.sample.byte_offset),
        samples.iter().map(|s| s.sample.byte_end()).max(),
    ) else {
        return Ok(samples);
    };

    let bytes = source.read_range(first, end)?;
    if bytes.len() as u64 != end - first {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "expected {} bytes from {first}..{end}, got {}",
                end - first,
                bytes.len()
            ),
        ));
    }
    tracing::trace!(
        start = first,
        end,
        samples = samples.len(),
        "fetched sample range"
    );

    for s in &mut samples {
        let start = (s.sample.byte_offset - first) as usize;
        let end = start + s.sample.byte_size as usize;
        s.sample.payload = Some(bytes[start..end].to_vec());
    }
    samples.sort_by_key(|s| s.dts_index);
    Ok(samples)
}
