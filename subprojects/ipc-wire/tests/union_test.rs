//! Contract scenarios for tagged unions (spec §8 scenarios 1-2).

use ipc_wire::{CodecError, Decoder, Encoder, ValidationError, ValidationErrorCode as Code};

const TAG_INT8: u32 = 1;

fn write_pod_union(encoder: &mut Encoder, tag: u32, value: u64) -> Result<(), CodecError> {
    encoder.write_union_header(tag)?;
    encoder.write_uint64(value)?;
    encoder.finish_writing_union_value();
    Ok(())
}

fn read_pod_union(decoder: &mut Decoder<'_>) -> Result<(u32, u64), CodecError> {
    let (size, tag) = decoder.read_union_header()?;
    assert_eq!(size, 16);
    let value = decoder.read_uint64()?;
    decoder.finish_reading_union_value();
    Ok((tag, value))
}

/// Scenario 1: a union with tag = Int8, value = 8, wrapped in a struct
/// field, round-trips to the identical tagged value.
#[test]
fn pod_union_roundtrip() {
    let mut encoder = Encoder::new();
    encoder.start_struct(16, 0);
    encoder.start_nested_union();
    write_pod_union(&mut encoder, TAG_INT8, 8).unwrap();
    encoder.finish().unwrap();
    encoder.finish().unwrap();
    let (bytes, handles) = encoder.data().unwrap();

    let mut decoder = Decoder::new(&bytes, handles);
    decoder.start_struct().unwrap();
    decoder.start_nested_union().unwrap();
    let (tag, value) = read_pod_union(&mut decoder).unwrap();
    decoder.finish().unwrap();
    decoder.finish().unwrap();

    assert_eq!(tag, TAG_INT8);
    assert_eq!(value, 8);
}

/// Scenario 2a: encoding a null union into a non-nullable field fails with
/// `UnexpectedNullUnion` before any bytes reach the wire.
#[test]
fn null_union_in_non_nullable_field_fails_to_encode() {
    let mut encoder = Encoder::new();
    let err = encoder.write_required_union_header(None).unwrap_err();
    assert!(matches!(err, CodecError::Validation(ValidationError { code: Code::UnexpectedNullUnion, .. })));
}

/// Scenario 2b: an array of ten non-nullable unions, tampered so the
/// eleventh 16-byte slot (at byte offset `8 * 10`, i.e. the second union in
/// the array once its own 8-byte header is skipped) has its size field
/// zeroed, fails to decode with `UnexpectedNullUnion`.
#[test]
fn tampered_null_union_in_array_fails_to_decode() {
    let mut encoder = Encoder::new();
    encoder.start_array(2, 128); // two inline 16-byte unions
    write_pod_union(&mut encoder, TAG_INT8, 1).unwrap();
    write_pod_union(&mut encoder, TAG_INT8, 2).unwrap();
    encoder.finish().unwrap();
    let (mut bytes, handles) = encoder.data().unwrap();

    // Zero the second union's size field in place, simulating a corrupted
    // peer: array header (8) + first union (16) = offset 24.
    let tamper_offset = 24;
    bytes[tamper_offset..tamper_offset + 4].copy_from_slice(&0u32.to_le_bytes());

    let mut decoder = Decoder::new(&bytes, handles);
    decoder.start_array(128).unwrap();
    let _first = read_pod_union(&mut decoder).unwrap();
    let err = decoder.read_non_null_union_header().unwrap_err();
    assert!(matches!(err, CodecError::Validation(ValidationError { code: Code::UnexpectedNullUnion, .. })));
}
