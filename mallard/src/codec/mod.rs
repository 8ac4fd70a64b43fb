//! # Binary Argument Codec
//!
//! Encoders and decoders for the argument bytes of binary records. A binary
//! payload is a `(type_code, payload)*` sequence: two little-endian bytes of
//! type code followed by the value bytes. Strings carry a 32-bit length
//! prefix; fixed-width primitives are stored little-endian.
//!
//! User-defined types register a decoder under a code reserved from
//! [`USER_CODE_BASE`]; their payloads are length-prefixed opaque bytes.

mod __test__;

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::RwLock;

pub const CODE_BOOL: u16 = 1;
pub const CODE_U8: u16 = 2;
pub const CODE_U16: u16 = 3;
pub const CODE_U32: u16 = 4;
pub const CODE_U64: u16 = 5;
pub const CODE_I8: u16 = 6;
pub const CODE_I16: u16 = 7;
pub const CODE_I32: u16 = 8;
pub const CODE_I64: u16 = 9;
pub const CODE_F32: u16 = 10;
pub const CODE_F64: u16 = 11;
pub const CODE_STR: u16 = 12;
pub const CODE_CHAR: u16 = 13;

/// First type code available to user-defined types.
pub const USER_CODE_BASE: u16 = 0x8000;

/// Values that can be encoded as binary record arguments.
pub trait Encodable {
  fn encode_arg(&self, buf: &mut Vec<u8>);
}

macro_rules! impl_encodable_num {
  ($($ty:ty => $code:expr),* $(,)?) => {
    $(impl Encodable for $ty {
      #[inline]
      fn encode_arg(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&$code.to_le_bytes());
        buf.extend_from_slice(&self.to_le_bytes());
      }
    })*
  };
}

impl_encodable_num!(
  u8 => CODE_U8, u16 => CODE_U16, u32 => CODE_U32, u64 => CODE_U64,
  i8 => CODE_I8, i16 => CODE_I16, i32 => CODE_I32, i64 => CODE_I64,
  f32 => CODE_F32, f64 => CODE_F64,
);

impl Encodable for bool {
  #[inline]
  fn encode_arg(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&CODE_BOOL.to_le_bytes());
    buf.push(*self as u8);
  }
}

impl Encodable for char {
  #[inline]
  fn encode_arg(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&CODE_CHAR.to_le_bytes());
    buf.extend_from_slice(&(*self as u32).to_le_bytes());
  }
}

impl Encodable for &str {
  #[inline]
  fn encode_arg(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&CODE_STR.to_le_bytes());
    buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
    buf.extend_from_slice(self.as_bytes());
  }
}

impl Encodable for String {
  #[inline]
  fn encode_arg(&self, buf: &mut Vec<u8>) {
    self.as_str().encode_arg(buf)
  }
}

/// Appends a user-defined argument under a reserved code.
pub fn encode_udt(buf: &mut Vec<u8>, code: u16, payload: &[u8]) {
  buf.extend_from_slice(&code.to_le_bytes());
  buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
  buf.extend_from_slice(payload);
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
  Bool(bool),
  U8(u8),
  U16(u16),
  U32(u32),
  U64(u64),
  I8(i8),
  I16(i16),
  I32(i32),
  I64(i64),
  F32(f32),
  F64(f64),
  Str(String),
  Char(char),
  /// User-defined type rendered through its registered decoder.
  Udt { code: u16, text: String },
}

impl fmt::Display for ArgValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ArgValue::Bool(v) => write!(f, "{}", v),
      ArgValue::U8(v) => write!(f, "{}", v),
      ArgValue::U16(v) => write!(f, "{}", v),
      ArgValue::U32(v) => write!(f, "{}", v),
      ArgValue::U64(v) => write!(f, "{}", v),
      ArgValue::I8(v) => write!(f, "{}", v),
      ArgValue::I16(v) => write!(f, "{}", v),
      ArgValue::I32(v) => write!(f, "{}", v),
      ArgValue::I64(v) => write!(f, "{}", v),
      ArgValue::F32(v) => write!(f, "{}", v),
      ArgValue::F64(v) => write!(f, "{}", v),
      ArgValue::Str(v) => f.write_str(v),
      ArgValue::Char(v) => write!(f, "{}", v),
      ArgValue::Udt { text, .. } => f.write_str(text),
    }
  }
}

/// Registry of user-defined type decoders.
pub struct UdtRegistry {
  codecs: RwLock<HashMap<u16, UdtCodec>>,
  next_code: AtomicU16,
}

pub struct UdtCodec {
  pub name: String,
  pub decode: Box<dyn Fn(&[u8]) -> Option<String> + Send + Sync>,
}

impl fmt::Debug for UdtRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UdtRegistry")
      .field("codecs", &self.codecs.read().unwrap().len())
      .finish()
  }
}

impl Default for UdtRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl UdtRegistry {
  pub fn new() -> Self {
    Self {
      codecs: RwLock::new(HashMap::new()),
      next_code: AtomicU16::new(USER_CODE_BASE),
    }
  }

  /// Reserves the next free user code.
  pub fn reserve_code(&self) -> u16 {
    self.next_code.fetch_add(1, Ordering::Relaxed)
  }

  pub fn register(&self, code: u16, codec: UdtCodec) -> EngineResult<()> {
    let mut codecs = self.codecs.write().unwrap();
    if codecs.contains_key(&code) {
      return Err(EngineError::DuplicateName(format!("udt code {}", code)));
    }
    codecs.insert(code, codec);
    Ok(())
  }

  pub fn decode(&self, code: u16, payload: &[u8]) -> Option<String> {
    let codecs = self.codecs.read().unwrap();
    let codec = codecs.get(&code)?;
    (codec.decode)(payload)
  }
}

struct Cursor<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Cursor<'a> {
  fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
    if self.pos + n > self.bytes.len() {
      return Err(EngineError::parse("truncated binary argument", self.pos));
    }
    let out = &self.bytes[self.pos..self.pos + n];
    self.pos += n;
    Ok(out)
  }

  fn take_array<const N: usize>(&mut self) -> EngineResult<[u8; N]> {
    let slice = self.take(N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
  }
}

/// Decodes `count` arguments out of a binary payload.
pub fn decode_args(bytes: &[u8], count: u16, udt: &UdtRegistry) -> EngineResult<Vec<ArgValue>> {
  let mut cursor = Cursor { bytes, pos: 0 };
  let mut args = Vec::with_capacity(count as usize);
  for _ in 0..count {
    let code = u16::from_le_bytes(cursor.take_array::<2>()?);
    let value = match code {
      CODE_BOOL => ArgValue::Bool(cursor.take(1)?[0] != 0),
      CODE_U8 => ArgValue::U8(cursor.take(1)?[0]),
      CODE_U16 => ArgValue::U16(u16::from_le_bytes(cursor.take_array::<2>()?)),
      CODE_U32 => ArgValue::U32(u32::from_le_bytes(cursor.take_array::<4>()?)),
      CODE_U64 => ArgValue::U64(u64::from_le_bytes(cursor.take_array::<8>()?)),
      CODE_I8 => ArgValue::I8(cursor.take(1)?[0] as i8),
      CODE_I16 => ArgValue::I16(i16::from_le_bytes(cursor.take_array::<2>()?)),
      CODE_I32 => ArgValue::I32(i32::from_le_bytes(cursor.take_array::<4>()?)),
      CODE_I64 => ArgValue::I64(i64::from_le_bytes(cursor.take_array::<8>()?)),
      CODE_F32 => ArgValue::F32(f32::from_le_bytes(cursor.take_array::<4>()?)),
      CODE_F64 => ArgValue::F64(f64::from_le_bytes(cursor.take_array::<8>()?)),
      CODE_STR => {
        let len = u32::from_le_bytes(cursor.take_array::<4>()?) as usize;
        let raw = cursor.take(len)?;
        let text = std::str::from_utf8(raw)
          .map_err(|_| EngineError::parse("binary argument is not utf-8", cursor.pos))?;
        ArgValue::Str(text.to_string())
      },
      CODE_CHAR => {
        let raw = u32::from_le_bytes(cursor.take_array::<4>()?);
        let ch = char::from_u32(raw)
          .ok_or_else(|| EngineError::parse("invalid char argument", cursor.pos))?;
        ArgValue::Char(ch)
      },
      code if code >= USER_CODE_BASE => {
        let len = u32::from_le_bytes(cursor.take_array::<4>()?) as usize;
        let raw = cursor.take(len)?;
        let text = udt
          .decode(code, raw)
          .unwrap_or_else(|| format!("<udt {}>", code));
        ArgValue::Udt { code, text }
      },
      _ => {
        return Err(EngineError::parse(
          format!("unknown argument type code {}", code),
          cursor.pos,
        ))
      },
    };
    args.push(value);
  }
  Ok(args)
}
