use std::{
    backtrace::{Backtrace, BacktraceStatus},
    num::{NonZeroU16, NonZeroU32},
    panic::Location,
};

use crate::BoxType;

/// ボックス単位のエンコード/デコード処理用の Result 型
pub type Result<T> = std::result::Result<T, Error>;

/// エンコード/デコード操作のエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 呼び出し元から渡された値が不正
    InvalidInput,

    /// 読み込んだバイト列の内容が壊れている
    InvalidData,

    /// 書き込み先のバッファが足りない
    InsufficientBuffer,

    /// 未対応の形式
    Unsupported,

    /// その他
    Other,
}

/// ボックスのエンコード/デコード時に発生するエラー
pub struct Error {
    /// エラーの種類
    pub kind: ErrorKind,

    /// エラーの理由
    pub reason: String,

    /// エラーが生成されたソースコード上の位置
    pub location: &'static Location<'static>,

    /// エラーが発生したボックスの種別（判明している場合のみ）
    pub box_type: Option<BoxType>,

    /// `RUST_BACKTRACE` が有効な場合にのみ取得されるバックトレース
    pub backtrace: Backtrace,
}

impl Error {
    /// [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_reason(kind, String::new())
    }

    /// 理由つきの [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn with_reason<T: Into<String>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: Location::caller(),
            box_type: None,
            backtrace: Backtrace::capture(),
        }
    }

    #[track_caller]
    pub(crate) fn unsupported<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Unsupported, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_input<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidInput, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_data<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidData, reason)
    }

    #[track_caller]
    pub(crate) fn check_buffer_size(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::new(ErrorKind::InsufficientBuffer))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ty) = self.box_type {
            write!(f, "[{ty}] ")?;
        }
        write!(f, "{:?}: {}", self.kind, self.reason)?;
        write!(f, " (at {}:{})", self.location.file(), self.location.line())?;
        if self.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// バイト列に変換可能な型を表現するためのトレイト
pub trait Encode {
    /// `self` をバイト列に変換して `buf` の先頭に書きこみ、書き込んだバイト数を返す
    ///
    /// `buf` が足りない場合は [`ErrorKind::InsufficientBuffer`] エラーになる
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;

    /// `self` をバイト列に変換して返す
    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0; 128];
        loop {
            match self.encode(&mut buf) {
                Ok(size) => {
                    buf.truncate(size);
                    return Ok(buf);
                }
                Err(e) if e.kind == ErrorKind::InsufficientBuffer => {
                    let grown = buf.len() * 2;
                    buf.resize(grown, 0);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// バイト列から `Self` に変換するためのトレイト
pub trait Decode: Sized {
    /// `buf` の先頭からこの型の値をデコードし、値と消費したバイト数を返す
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// `buf` の `offset` 位置からデコードして、消費した分だけ `offset` を進める
    fn decode_at(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let rest = buf
            .get(*offset..)
            .ok_or_else(|| Error::new(ErrorKind::InsufficientBuffer))?;
        let (decoded, size) = Self::decode(rest)?;
        *offset += size;
        Ok(decoded)
    }
}

macro_rules! impl_big_endian_codec {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                #[track_caller]
                fn encode(&self, buf: &mut [u8]) -> Result<usize> {
                    const N: usize = size_of::<$ty>();
                    Error::check_buffer_size(N, buf)?;
                    buf[..N].copy_from_slice(&self.to_be_bytes());
                    Ok(N)
                }
            }

            impl Decode for $ty {
                #[track_caller]
                fn decode(buf: &[u8]) -> Result<(Self, usize)> {
                    const N: usize = size_of::<$ty>();
                    Error::check_buffer_size(N, buf)?;
                    let mut bytes = [0; N];
                    bytes.copy_from_slice(&buf[..N]);
                    Ok((<$ty>::from_be_bytes(bytes), N))
                }
            }
        )*
    };
}

impl_big_endian_codec!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Encode for NonZeroU16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Decode for NonZeroU16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u16::decode(buf)?;
        let v = NonZeroU16::new(v).ok_or_else(|| Error::invalid_data("Unexpected zero value"))?;
        Ok((v, size))
    }
}

impl Encode for NonZeroU32 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.get().encode(buf)
    }
}

impl Decode for NonZeroU32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        let v = NonZeroU32::new(v).ok_or_else(|| Error::invalid_data("Unexpected zero value"))?;
        Ok((v, size))
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.iter().try_fold(0, |offset, item| -> Result<usize> {
            Ok(offset + item.encode(&mut buf[offset..])?)
        })
    }
}

impl<T: Decode + Default + Copy, const N: usize> Decode for [T; N] {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut items = [T::default(); N];
        let mut offset = 0;
        for item in &mut items {
            *item = T::decode_at(buf, &mut offset)?;
        }
        Ok((items, offset))
    }
}

impl Encode for [u8] {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(self.len(), buf)?;
        buf[..self.len()].copy_from_slice(self);
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = [0u8; 8];
        assert_eq!(0x0102_0304u32.encode(&mut buf).ok(), Some(4));
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);

        let (v, n) = i16::decode(&[0xff, 0xfe]).expect("decode");
        assert_eq!((v, n), (-2, 2));
    }

    #[test]
    fn encode_to_vec_grows_buffer() {
        let big = [7u8; 1000];
        let bytes = big[..].encode_to_vec().expect("encode");
        assert_eq!(bytes.len(), 1000);
    }

    #[test]
    fn zero_is_rejected_for_non_zero_types() {
        let err = NonZeroU32::decode(&[0, 0, 0, 0]).expect_err("must fail");
        assert_eq!(err.kind, ErrorKind::InvalidData);
    }

    #[test]
    fn short_buffer_reports_insufficient_buffer() {
        let err = u64::decode(&[0; 3]).expect_err("must fail");
        assert_eq!(err.kind, ErrorKind::InsufficientBuffer);
    }
}
