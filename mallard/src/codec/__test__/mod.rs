#[cfg(test)]
mod __test__ {

  use crate::codec::*;

  fn round_trip(encode: impl Fn(&mut Vec<u8>), count: u16) -> Vec<ArgValue> {
    let registry = UdtRegistry::new();
    let mut buf = Vec::new();
    encode(&mut buf);
    decode_args(&buf, count, &registry).unwrap()
  }

  #[test]
  fn test_primitive_round_trip() {
    let args = round_trip(
      |buf| {
        true.encode_arg(buf);
        42u8.encode_arg(buf);
        (-7i32).encode_arg(buf);
        123456789u64.encode_arg(buf);
        3.5f64.encode_arg(buf);
        'x'.encode_arg(buf);
      },
      6,
    );
    assert_eq!(
      args,
      vec![
        ArgValue::Bool(true),
        ArgValue::U8(42),
        ArgValue::I32(-7),
        ArgValue::U64(123456789),
        ArgValue::F64(3.5),
        ArgValue::Char('x'),
      ]
    );
  }

  #[test]
  fn test_string_round_trip() {
    let args = round_trip(
      |buf| {
        "hello world".encode_arg(buf);
        String::from("çedilla").encode_arg(buf);
      },
      2,
    );
    assert_eq!(args[0], ArgValue::Str("hello world".to_string()));
    assert_eq!(args[1], ArgValue::Str("çedilla".to_string()));
  }

  #[test]
  fn test_truncated_payload_is_error() {
    let registry = UdtRegistry::new();
    let mut buf = Vec::new();
    1234u32.encode_arg(&mut buf);
    buf.truncate(buf.len() - 2);
    assert!(decode_args(&buf, 1, &registry).is_err());
  }

  #[test]
  fn test_unknown_code_is_error() {
    let registry = UdtRegistry::new();
    let buf = 99u16.to_le_bytes().to_vec();
    assert!(decode_args(&buf, 1, &registry).is_err());
  }

  #[test]
  fn test_udt_round_trip() {
    let registry = UdtRegistry::new();
    let code = registry.reserve_code();
    registry
      .register(
        code,
        UdtCodec {
          name: "point".to_string(),
          decode: Box::new(|bytes| {
            if bytes.len() != 8 {
              return None;
            }
            let x = i32::from_le_bytes(bytes[0..4].try_into().ok()?);
            let y = i32::from_le_bytes(bytes[4..8].try_into().ok()?);
            Some(format!("({}, {})", x, y))
          }),
        },
      )
      .unwrap();

    let mut buf = Vec::new();
    let mut payload = Vec::new();
    payload.extend_from_slice(&3i32.to_le_bytes());
    payload.extend_from_slice(&(-4i32).to_le_bytes());
    encode_udt(&mut buf, code, &payload);

    let args = decode_args(&buf, 1, &registry).unwrap();
    assert_eq!(
      args[0],
      ArgValue::Udt {
        code,
        text: "(3, -4)".to_string()
      }
    );
    assert_eq!(args[0].to_string(), "(3, -4)");
  }

  #[test]
  fn test_unregistered_udt_renders_placeholder() {
    let registry = UdtRegistry::new();
    let mut buf = Vec::new();
    encode_udt(&mut buf, USER_CODE_BASE + 9, b"opaque");
    let args = decode_args(&buf, 1, &registry).unwrap();
    match &args[0] {
      ArgValue::Udt { text, .. } => assert!(text.contains("udt")),
      other => panic!("unexpected arg: {:?}", other),
    }
  }

  #[test]
  fn test_duplicate_udt_code_rejected() {
    let registry = UdtRegistry::new();
    let code = registry.reserve_code();
    let make = || UdtCodec {
      name: "dup".to_string(),
      decode: Box::new(|_| None),
    };
    registry.register(code, make()).unwrap();
    assert!(registry.register(code, make()).is_err());
  }
}
