use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
};

/// 任意の位置を読み出せるバイト列の供給元
///
/// デマルチプレクサーはこのトレイトを通してのみファイルの中身にアクセスする
pub trait ByteSource {
    /// `start` 以上 `end` 未満の範囲のバイト列を読み出す
    ///
    /// 範囲の一部でも全体の長さを超えている場合はエラーになる
    fn read_range(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>>;

    /// 全体のバイト数を返す
    fn total_len(&self) -> std::io::Result<u64>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_range(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        (**self).read_range(start, end)
    }

    fn total_len(&self) -> std::io::Result<u64> {
        (**self).total_len()
    }
}

fn slice_range(bytes: &[u8], start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    let range = usize::try_from(start).ok().zip(usize::try_from(end).ok());
    match range {
        Some((start, end)) if start <= end && end <= bytes.len() => Ok(bytes[start..end].to_vec()),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "range {start}..{end} is out of bounds for {} bytes",
                bytes.len()
            ),
        )),
    }
}

impl ByteSource for Vec<u8> {
    fn read_range(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        slice_range(self, start, end)
    }

    fn total_len(&self) -> std::io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ByteSource for &[u8] {
    fn read_range(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        slice_range(*self, start, end)
    }

    fn total_len(&self) -> std::io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ByteSource for File {
    fn read_range(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let size = end.checked_sub(start).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("range end {end} precedes start {start}"),
            )
        })?;
        let len = self.metadata()?.len();
        if end > len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} exceeds file length {len}"),
            ));
        }
        let mut buf = vec![0; size as usize];
        self.seek(SeekFrom::Start(start))?;
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn total_len(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}
