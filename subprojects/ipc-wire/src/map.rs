//! Generic map encode/decode.
//!
//! A map is two sibling arrays behind one 24-byte header (spec §3 "Map"):
//! a pointer to the key array followed by a pointer to the value array,
//! which must declare identical element counts. This core has no interface
//! definition compiler to generate a `Map<K, V>` field accessor per
//! instantiation, so callers supply per-element codecs instead; the
//! `DifferentSizedArraysInMap` check that a generated accessor would
//! otherwise perform lives here instead.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::validation::{CodecError, ValidationError, ValidationErrorCode as Code};

/// Encodes `keys` and `values` as a map. `keys.len()` must equal
/// `values.len()`; mismatched slices are a caller bug, not a wire-format
/// error, so this is a `debug_assert`, not a `Result` branch.
pub fn write_map<K, V>(
    encoder: &mut Encoder,
    keys: &[K],
    values: &[V],
    key_bits: u32,
    value_bits: u32,
    mut write_key: impl FnMut(&mut Encoder, &K) -> Result<(), CodecError>,
    mut write_value: impl FnMut(&mut Encoder, &V) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    debug_assert_eq!(keys.len(), values.len(), "map keys/values must have matching lengths");
    encoder.start_map();
    encoder.write_pointer()?;
    encoder.start_array(keys.len() as u32, key_bits);
    for key in keys {
        write_key(encoder, key)?;
    }
    encoder.finish()?;
    encoder.write_pointer()?;
    encoder.start_array(values.len() as u32, value_bits);
    for value in values {
        write_value(encoder, value)?;
    }
    encoder.finish()?;
    encoder.finish()
}

/// Decodes a map written by [`write_map`]. Fails with
/// [`Code::DifferentSizedArraysInMap`] if the key and value arrays declare
/// different element counts; duplicate keys are not an error here (key
/// semantics are left to the caller, per spec §8 boundary behaviors).
pub fn read_map<K, V>(
    decoder: &mut Decoder<'_>,
    key_bits: u32,
    value_bits: u32,
    mut read_key: impl FnMut(&mut Decoder<'_>) -> Result<K, CodecError>,
    mut read_value: impl FnMut(&mut Decoder<'_>) -> Result<V, CodecError>,
) -> Result<(Vec<K>, Vec<V>), CodecError> {
    decoder.start_map()?;
    decoder.read_non_null_pointer()?;
    let key_count = decoder.start_array(key_bits)?;
    let mut keys = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        keys.push(read_key(decoder)?);
    }
    decoder.finish()?;

    decoder.read_non_null_pointer()?;
    let value_count = decoder.start_array(value_bits)?;
    if value_count != key_count {
        return Err(ValidationError::new(
            Code::DifferentSizedArraysInMap,
            format!("keys array has {key_count} elements but values array has {value_count}"),
        )
        .into());
    }
    let mut values = Vec::with_capacity(value_count as usize);
    for _ in 0..value_count {
        values.push(read_value(decoder)?);
    }
    decoder.finish()?;
    decoder.finish()?;
    Ok((keys, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_u32(encoder: &mut Encoder, value: &u32) -> Result<(), CodecError> {
        encoder.write_uint32(*value)
    }

    fn read_u32(decoder: &mut Decoder<'_>) -> Result<u32, CodecError> {
        decoder.read_uint32()
    }

    #[test]
    fn map_round_trips() {
        let mut encoder = Encoder::new();
        write_map(&mut encoder, &[1u32, 2, 3], &[10u32, 20, 30], 32, 32, write_u32, write_u32).unwrap();
        let (bytes, handles) = encoder.data().unwrap();

        let mut decoder = Decoder::new(&bytes, handles);
        let (keys, values) = read_map(&mut decoder, 32, 32, read_u32, read_u32).unwrap();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn map_allows_duplicate_keys() {
        let mut encoder = Encoder::new();
        write_map(&mut encoder, &[7u32, 7], &[1u32, 2], 32, 32, write_u32, write_u32).unwrap();
        let (bytes, handles) = encoder.data().unwrap();

        let mut decoder = Decoder::new(&bytes, handles);
        let (keys, values) = read_map(&mut decoder, 32, 32, read_u32, read_u32).unwrap();
        assert_eq!(keys, vec![7, 7]);
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn mismatched_array_sizes_in_map_are_rejected() {
        // Hand-build a map with a 2-element key array and a 1-element value
        // array: write_map can't produce this shape, so tamper by hand.
        let mut encoder = Encoder::new();
        encoder.start_map();
        encoder.write_pointer().unwrap();
        encoder.start_array(2, 32);
        encoder.write_uint32(1).unwrap();
        encoder.write_uint32(2).unwrap();
        encoder.finish().unwrap();
        encoder.write_pointer().unwrap();
        encoder.start_array(1, 32);
        encoder.write_uint32(9).unwrap();
        encoder.finish().unwrap();
        encoder.finish().unwrap();
        let (bytes, handles) = encoder.data().unwrap();

        let mut decoder = Decoder::new(&bytes, handles);
        let err = read_map(&mut decoder, 32, 32, read_u32, read_u32).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Validation(ValidationError { code: Code::DifferentSizedArraysInMap, .. })
        ));
    }
}
