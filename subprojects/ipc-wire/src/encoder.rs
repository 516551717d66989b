//! Archive-format encoder.

use ipc_handle::UntypedHandle;

use crate::header::{align, bytes_for_bits, DataHeader, DEFAULT_ALIGNMENT, MAP_HEADER, POINTER_BIT_SIZE};
use crate::state::EncodingState;
use crate::validation::{CodecError, ValidationError, ValidationErrorCode as Code};

/// Encodes one message or value into archive format.
///
/// Values are written depth-first: `start_struct`/`start_array`/`start_map`
/// push a frame and reserve its byte range up front, field writers advance
/// the current frame's cursor, and `finish` pops the frame. Handles are
/// collected separately from the byte buffer, to be attached to the
/// outgoing kernel message alongside it.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
    end: usize,
    handles: Vec<UntypedHandle>,
    stack: Vec<EncodingState>,
}

fn ensure_capacity(state: Option<&EncodingState>, bit_size: u32) -> Result<(), CodecError> {
    let state = state.ok_or(CodecError::EmptyStateStack)?;
    if state.check_elements && state.elements_processed >= state.elements {
        return Err(CodecError::TooManyElements { declared: state.elements });
    }
    let byte_size = bytes_for_bits((state.bit_offset + bit_size) as u64);
    if align(state.offset + byte_size, byte_size.max(1)) > state.limit {
        return Err(CodecError::LimitExceeded);
    }
    Ok(())
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, size: usize) {
        self.end += size;
        if self.end > self.buf.len() {
            let new_len = self.end.max(2 * self.buf.len());
            self.buf.resize(new_len, 0);
        }
    }

    fn state(&self) -> Option<&EncodingState> {
        self.stack.last()
    }

    fn state_mut(&mut self) -> &mut EncodingState {
        self.stack.last_mut().expect("state stack checked by ensure_capacity before use")
    }

    fn push_state(&mut self, header: DataHeader, check_elements: bool) {
        let old_end = self.end;
        self.claim(align(header.size as usize, DEFAULT_ALIGNMENT));
        let elements = if check_elements { header.elements_or_version } else { 0 };
        self.stack.push(EncodingState {
            offset: old_end,
            limit: self.end,
            elements,
            check_elements,
            ..Default::default()
        });
    }

    fn write_data_header(&mut self, header: DataHeader) {
        let offset = self.state().expect("pushed just before this call").offset;
        self.buf[offset..offset + 4].copy_from_slice(&header.size.to_le_bytes());
        self.buf[offset + 4..offset + 8].copy_from_slice(&header.elements_or_version.to_le_bytes());
        self.state_mut().offset += 8;
    }

    /// Starts encoding an array of `length` elements of `element_bit_size`
    /// bits each. Does not write a pointer to the array; call [`Self::finish`]
    /// once every element has been written.
    pub fn start_array(&mut self, length: u32, element_bit_size: u32) {
        let data_size = 8 + bytes_for_bits(length as u64 * element_bit_size as u64);
        let header = DataHeader { size: data_size as u32, elements_or_version: length };
        self.push_state(header, true);
        self.write_data_header(header);
    }

    /// Starts encoding a map (a pair of sibling arrays). Does not write a
    /// pointer; call [`Self::finish`] after both arrays are written.
    pub fn start_map(&mut self) {
        self.push_state(MAP_HEADER, false);
        self.write_data_header(MAP_HEADER);
    }

    /// Starts encoding a struct of `size` bytes (including the 8-byte
    /// header) at the given wire `version`.
    pub fn start_struct(&mut self, size: u32, version: u32) {
        let header = DataHeader { size: 8 + size, elements_or_version: version };
        self.push_state(header, false);
        self.write_data_header(header);
    }

    /// Starts encoding a nested union inline (no pointer indirection).
    pub fn start_nested_union(&mut self) {
        self.push_state(DataHeader { size: 16, elements_or_version: 0 }, false);
    }

    /// Writes a union header (16 bytes: size, then tag) for a non-null
    /// union value.
    pub fn write_union_header(&mut self, tag: u32) -> Result<(), CodecError> {
        ensure_capacity(self.state(), POINTER_BIT_SIZE)?;
        self.state_mut().align_offset_to_bytes();
        let offset = align(self.state_mut().offset, 8);
        self.state_mut().offset = offset;
        self.buf[offset..offset + 4].copy_from_slice(&16u32.to_le_bytes());
        self.buf[offset + 4..offset + 8].copy_from_slice(&tag.to_le_bytes());
        self.state_mut().offset += 8;
        ensure_capacity(self.state(), POINTER_BIT_SIZE)?;
        Ok(())
    }

    /// Writes a union header for a field that must not be null, rejecting
    /// `None` with [`Code::UnexpectedNullUnion`] up front rather than
    /// writing a null value a decoder would later have to reject. This is
    /// the write-side counterpart of [`crate::Decoder::read_non_null_union_header`];
    /// with no interface definition compiler in this core, callers make
    /// this check explicitly rather than through generated field code.
    pub fn write_required_union_header(&mut self, tag: Option<u32>) -> Result<(), CodecError> {
        match tag {
            Some(tag) => self.write_union_header(tag),
            None => Err(ValidationError::new(Code::UnexpectedNullUnion, "union field is not nullable").into()),
        }
    }

    /// Moves the cursor past a union value field once it has been written.
    pub fn finish_writing_union_value(&mut self) {
        let state = self.state_mut();
        state.offset = align(state.offset, 8);
        state.align_offset_to_bytes();
    }

    /// Pops the current frame, checking declared element counts if this
    /// frame tracks them (arrays).
    pub fn finish(&mut self) -> Result<(), CodecError> {
        let state = *self.state().ok_or(CodecError::EmptyStateStack)?;
        if state.check_elements && state.elements_processed != state.elements {
            return Err(CodecError::ElementCountMismatch {
                declared: state.elements,
                processed: state.elements_processed,
            });
        }
        self.stack.pop();
        Ok(())
    }

    /// Returns the encoded bytes and collected handles. The frame stack must
    /// be empty (every `start_*` matched by a `finish`).
    pub fn data(mut self) -> Result<(Vec<u8>, Vec<UntypedHandle>), CodecError> {
        if !self.stack.is_empty() {
            return Err(CodecError::UnfinishedValue);
        }
        self.buf.truncate(self.end);
        Ok((self.buf, std::mem::take(&mut self.handles)))
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        ensure_capacity(self.state(), 1)?;
        let state = self.state_mut();
        let offset = state.offset;
        let bit_offset = state.bit_offset;
        if value {
            self.buf[offset] |= 1 << bit_offset;
        }
        let state = self.state_mut();
        state.skip_bits(1);
        state.elements_processed += 1;
        Ok(())
    }

    pub fn write_int8(&mut self, value: i8) -> Result<(), CodecError> {
        self.write_uint8(value as u8)
    }

    pub fn write_uint8(&mut self, value: u8) -> Result<(), CodecError> {
        ensure_capacity(self.state(), 8)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        let offset = state.offset;
        self.buf[offset] = value;
        let state = self.state_mut();
        state.skip_bytes(1);
        state.elements_processed += 1;
        Ok(())
    }

    pub fn write_int16(&mut self, value: i16) -> Result<(), CodecError> {
        self.write_uint16(value as u16)
    }

    pub fn write_uint16(&mut self, value: u16) -> Result<(), CodecError> {
        ensure_capacity(self.state(), 16)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 2);
        let offset = state.offset;
        self.buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        let state = self.state_mut();
        state.skip_bytes(2);
        state.elements_processed += 1;
        Ok(())
    }

    pub fn write_int32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_uint32(value as u32)
    }

    pub fn write_uint32(&mut self, value: u32) -> Result<(), CodecError> {
        ensure_capacity(self.state(), 32)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 4);
        let offset = state.offset;
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        let state = self.state_mut();
        state.skip_bytes(4);
        state.elements_processed += 1;
        Ok(())
    }

    pub fn write_int64(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_uint64(value as u64)
    }

    pub fn write_uint64(&mut self, value: u64) -> Result<(), CodecError> {
        ensure_capacity(self.state(), 64)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 8);
        let offset = state.offset;
        self.buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        let state = self.state_mut();
        state.skip_bytes(8);
        state.elements_processed += 1;
        Ok(())
    }

    pub fn write_float32(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_uint32(value.to_bits())
    }

    pub fn write_float64(&mut self, value: f64) -> Result<(), CodecError> {
        self.write_uint64(value.to_bits())
    }

    /// Writes a null union (16 zero bytes for size/tag and value).
    pub fn write_null_union(&mut self) -> Result<(), CodecError> {
        self.write_uint64(0)?;
        self.state_mut().elements_processed -= 1;
        self.write_uint64(0)
    }

    /// Writes a null pointer.
    pub fn write_null_pointer(&mut self) -> Result<(), CodecError> {
        self.write_uint64(0)
    }

    /// Writes a UTF-8 string's bytes as an array of u8. Does not write a
    /// pointer to the array.
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        self.start_array(bytes.len() as u32, 8);
        for &b in bytes {
            self.write_uint8(b)?;
        }
        self.finish()
    }

    /// Writes a relative pointer to the first byte not yet claimed.
    pub fn write_pointer(&mut self) -> Result<(), CodecError> {
        ensure_capacity(self.state(), POINTER_BIT_SIZE)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 8);
        let offset = state.offset;
        let target = (self.end - offset) as u64;
        self.write_uint64(target)
    }

    /// Writes the sentinel invalid-handle index (`u32::MAX`).
    pub fn write_invalid_handle(&mut self) -> Result<(), CodecError> {
        self.write_int32(-1)
    }

    /// Writes a handle, appending it to the outgoing handle list and taking
    /// ownership of it (the caller's wrapper is moved in, not cloned).
    pub fn write_handle(&mut self, handle: UntypedHandle) -> Result<(), CodecError> {
        self.handles.push(handle);
        self.write_uint32((self.handles.len() - 1) as u32)
    }

    /// Writes an invalid interface reference (invalid handle + version 0).
    pub fn write_invalid_interface(&mut self) -> Result<(), CodecError> {
        self.write_invalid_handle()?;
        self.state_mut().elements_processed -= 1;
        self.write_uint32(0)
    }

    /// Writes an interface reference: the handle followed by a version u32.
    pub fn write_interface(&mut self, handle: UntypedHandle) -> Result<(), CodecError> {
        self.write_handle(handle)?;
        self.state_mut().elements_processed -= 1;
        self.write_uint32(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_round_trips_through_buffer_bytes() {
        let mut enc = Encoder::new();
        enc.start_struct(8, 0);
        enc.write_uint32(7).unwrap();
        enc.write_uint32(9).unwrap();
        enc.finish().unwrap();
        let (bytes, handles) = enc.data().unwrap();
        assert!(handles.is_empty());
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &16u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &9u32.to_le_bytes());
    }

    #[test]
    fn array_with_wrong_element_count_fails_finish() {
        let mut enc = Encoder::new();
        enc.start_array(3, 8);
        enc.write_uint8(1).unwrap();
        assert!(matches!(enc.finish(), Err(CodecError::ElementCountMismatch { declared: 3, processed: 1 })));
    }

    #[test]
    fn data_rejects_unbalanced_stack() {
        let mut enc = Encoder::new();
        enc.start_struct(0, 0);
        assert!(matches!(enc.data(), Err(CodecError::UnfinishedValue)));
    }

    #[test]
    fn write_string_encodes_length_prefixed_bytes() {
        let mut enc = Encoder::new();
        enc.start_struct(8, 0);
        enc.write_pointer().unwrap();
        enc.write_string("hi").unwrap();
        enc.finish().unwrap();
        let (bytes, _) = enc.data().unwrap();
        assert_eq!(bytes.len(), 16 + 16);
    }
}
