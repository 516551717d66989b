//! Archive-format decoder.
//!
//! Every public method here is defensive: untrusted bytes off a message
//! pipe drive this code, so out-of-range offsets, misaligned pointers, and
//! handle indices used out of order all surface as a typed
//! [`ValidationError`] instead of a panic or silent corruption.

use ipc_handle::UntypedHandle;

use crate::header::{align, bytes_for_bits, DataHeader, DATA_HEADER_SIZE, DEFAULT_ALIGNMENT, MAP_HEADER, POINTER_BIT_SIZE};
use crate::state::EncodingState;
use crate::validation::{CodecError, ValidationError, ValidationErrorCode as Code};

/// Decodes one message or value out of archive-format bytes.
pub struct Decoder<'a> {
    buf: &'a [u8],
    end: usize,
    handles: Vec<UntypedHandle>,
    next_handle: usize,
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

impl<'a> Decoder<'a> {
    /// Builds a decoder over `buf` with the handles that arrived alongside
    /// it on the same kernel message.
    pub fn new(buf: &'a [u8], handles: Vec<UntypedHandle>) -> Self {
        Self { buf, end: 0, handles, next_handle: 0, stack: Vec::new() }
    }

    fn claim(&mut self, size: usize) -> Result<(), ValidationError> {
        if self.end + size > self.buf.len() {
            return Err(ValidationError::new(Code::IllegalMemoryRange, "data buffer is too small"));
        }
        self.end += size;
        Ok(())
    }

    fn claim_handle(&mut self, index: usize) -> Result<UntypedHandle, ValidationError> {
        if index >= self.handles.len() {
            return Err(ValidationError::new(Code::IllegalHandle, "trying to access non present handle"));
        }
        if index < self.next_handle {
            return Err(ValidationError::new(Code::IllegalHandle, "trying to access handle out of order"));
        }
        self.next_handle = index + 1;
        Ok(std::mem::replace(&mut self.handles[index], UntypedHandle::invalid()))
    }

    fn state(&self) -> Option<&EncodingState> {
        self.stack.last()
    }

    fn state_mut(&mut self) -> &mut EncodingState {
        self.stack.last_mut().expect("state stack checked by ensure_capacity before use")
    }

    fn push_state(&mut self, header: DataHeader, check_elements: bool) -> Result<(), CodecError> {
        let old_end = self.end;
        self.claim((header.size as usize).saturating_sub(DATA_HEADER_SIZE))?;
        let elements = if check_elements { header.elements_or_version } else { 0 };
        self.stack.push(EncodingState {
            offset: old_end,
            limit: self.end,
            elements,
            check_elements,
            ..Default::default()
        });
        Ok(())
    }

    fn read_data_header(&mut self) -> Result<DataHeader, CodecError> {
        self.claim(DATA_HEADER_SIZE)?;
        let old_end = self.end - DATA_HEADER_SIZE;
        Ok(DataHeader {
            size: u32::from_le_bytes(self.buf[old_end..old_end + 4].try_into().unwrap()),
            elements_or_version: u32::from_le_bytes(self.buf[old_end + 4..old_end + 8].try_into().unwrap()),
        })
    }

    /// Starts decoding an array of elements `element_bit_size` bits wide,
    /// returning the declared element count. Does not read a leading
    /// pointer; call [`Self::finish`] after reading every element.
    pub fn start_array(&mut self, element_bit_size: u32) -> Result<u32, CodecError> {
        let header = self.read_data_header()?;
        let min_size = DATA_HEADER_SIZE + bytes_for_bits(header.elements_or_version as u64 * element_bit_size as u64);
        if (header.size as usize) < min_size {
            return Err(ValidationError::new(
                Code::UnexpectedArrayHeader,
                format!("data header size({}) should be at least {}", header.size, min_size),
            )
            .into());
        }
        self.push_state(header, true)?;
        Ok(header.elements_or_version)
    }

    /// Starts decoding a map. Does not read a leading pointer; call
    /// [`Self::finish`] after reading the key and value arrays.
    pub fn start_map(&mut self) -> Result<(), CodecError> {
        let header = self.read_data_header()?;
        if header != MAP_HEADER {
            return Err(
                ValidationError::new(Code::UnexpectedStructHeader, format!("invalid map header: {header:?}")).into(),
            );
        }
        self.push_state(header, false)
    }

    /// Starts decoding a struct, returning its header so the caller can
    /// branch on its declared version. Does not read a leading pointer.
    pub fn start_struct(&mut self) -> Result<DataHeader, CodecError> {
        let header = self.read_data_header()?;
        if (header.size as usize) < DATA_HEADER_SIZE {
            return Err(ValidationError::new(
                Code::UnexpectedStructHeader,
                format!("data header size({}) should be at least {}", header.size, DATA_HEADER_SIZE),
            )
            .into());
        }
        self.push_state(header, false)?;
        Ok(header)
    }

    /// Starts decoding a nested union inline (no pointer, no union header —
    /// callers read those via [`Self::read_union_header`]).
    pub fn start_nested_union(&mut self) -> Result<(), CodecError> {
        self.push_state(DataHeader { size: 24, elements_or_version: 0 }, false)
    }

    /// Reads a union's 16-byte header, returning `(size, tag)`. `size == 0`
    /// denotes a null union value; any other size must be exactly 16.
    pub fn read_union_header(&mut self) -> Result<(u32, u32), CodecError> {
        ensure_capacity(self.state(), POINTER_BIT_SIZE)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 8);
        let offset = state.offset;
        let size = u32::from_le_bytes(self.buf[offset..offset + 4].try_into().unwrap());
        let tag = u32::from_le_bytes(self.buf[offset + 4..offset + 8].try_into().unwrap());
        self.state_mut().offset += 8;
        ensure_capacity(self.state(), POINTER_BIT_SIZE)?;
        if size != 0 && size != 16 {
            return Err(
                ValidationError::new(Code::UnexpectedStructHeader, format!("unexpected union size: {size}")).into(),
            );
        }
        Ok((size, tag))
    }

    /// Reads a union header that must not be null, failing with
    /// [`Code::UnexpectedNullUnion`] if `size == 0` (spec §3 "Union": a
    /// scalar `size=0` union inside a non-nullable field must be rejected).
    pub fn read_non_null_union_header(&mut self) -> Result<(u32, u32), CodecError> {
        let (size, tag) = self.read_union_header()?;
        if size == 0 {
            return Err(ValidationError::new(Code::UnexpectedNullUnion, "union field is not nullable").into());
        }
        Ok((size, tag))
    }

    /// Moves the cursor past a union value field once it has been read.
    pub fn finish_reading_union_value(&mut self) {
        let state = self.state_mut();
        state.offset = align(state.offset, 8);
        state.align_offset_to_bytes();
    }

    /// Skips a union's null value field.
    pub fn skip_null_union_value(&mut self) {
        let state = self.state_mut();
        state.offset += 8;
        state.elements_processed += 1;
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

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        ensure_capacity(self.state(), 1)?;
        let state = self.state_mut();
        let offset = state.offset;
        let bit_offset = state.bit_offset;
        let value = (self.buf[offset] >> bit_offset) & 1 == 1;
        let state = self.state_mut();
        state.skip_bits(1);
        state.elements_processed += 1;
        Ok(value)
    }

    pub fn read_int8(&mut self) -> Result<i8, CodecError> {
        self.read_uint8().map(|v| v as i8)
    }

    pub fn read_uint8(&mut self) -> Result<u8, CodecError> {
        ensure_capacity(self.state(), 8)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        let offset = state.offset;
        let value = self.buf[offset];
        let state = self.state_mut();
        state.skip_bytes(1);
        state.elements_processed += 1;
        Ok(value)
    }

    pub fn read_int16(&mut self) -> Result<i16, CodecError> {
        self.read_uint16().map(|v| v as i16)
    }

    pub fn read_uint16(&mut self) -> Result<u16, CodecError> {
        ensure_capacity(self.state(), 16)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 2);
        let offset = state.offset;
        let value = u16::from_le_bytes(self.buf[offset..offset + 2].try_into().unwrap());
        let state = self.state_mut();
        state.skip_bytes(2);
        state.elements_processed += 1;
        Ok(value)
    }

    pub fn read_int32(&mut self) -> Result<i32, CodecError> {
        self.read_uint32().map(|v| v as i32)
    }

    pub fn read_uint32(&mut self) -> Result<u32, CodecError> {
        ensure_capacity(self.state(), 32)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 4);
        let offset = state.offset;
        let value = u32::from_le_bytes(self.buf[offset..offset + 4].try_into().unwrap());
        let state = self.state_mut();
        state.skip_bytes(4);
        state.elements_processed += 1;
        Ok(value)
    }

    pub fn read_int64(&mut self) -> Result<i64, CodecError> {
        self.read_uint64().map(|v| v as i64)
    }

    pub fn read_uint64(&mut self) -> Result<u64, CodecError> {
        ensure_capacity(self.state(), 64)?;
        let state = self.state_mut();
        state.align_offset_to_bytes();
        state.offset = align(state.offset, 8);
        let offset = state.offset;
        let value = u64::from_le_bytes(self.buf[offset..offset + 8].try_into().unwrap());
        let state = self.state_mut();
        state.skip_bytes(8);
        state.elements_processed += 1;
        Ok(value)
    }

    pub fn read_float32(&mut self) -> Result<f32, CodecError> {
        self.read_uint32().map(f32::from_bits)
    }

    pub fn read_float64(&mut self) -> Result<f64, CodecError> {
        self.read_uint64().map(f64::from_bits)
    }

    /// Reads a UTF-8 string encoded as an array of u8. Does not read a
    /// leading pointer. Invalid UTF-8 is replaced lossily, matching how the
    /// rest of this codec never rejects a message for application-level
    /// content.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let length = self.start_array(8)?;
        let mut bytes = Vec::with_capacity(length as usize);
        for _ in 0..length {
            bytes.push(self.read_uint8()?);
        }
        self.finish()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads a relative pointer, advancing `end` to claim the pointee's
    /// memory if non-null. Returns the raw (possibly zero) pointer value.
    pub fn read_pointer(&mut self) -> Result<u64, CodecError> {
        let pointer = self.read_uint64()?;
        if pointer == 0 {
            return Ok(0);
        }
        let base = (self.state().ok_or(CodecError::EmptyStateStack)?.offset - 8) as u64;
        let new_end = base + pointer;
        if pointer >= self.buf.len() as u64 || new_end >= self.buf.len() as u64 {
            return Err(ValidationError::new(Code::IllegalPointer, "trying to access out of range memory").into());
        }
        if new_end < self.end as u64 {
            return Err(
                ValidationError::new(Code::IllegalMemoryRange, "trying to access memory out of order").into(),
            );
        }
        if new_end % DEFAULT_ALIGNMENT as u64 != 0 {
            return Err(
                ValidationError::new(Code::MisalignedObject, format!("incorrect pointer data alignment: {new_end}"))
                    .into(),
            );
        }
        self.claim((new_end - self.end as u64) as usize)?;
        Ok(pointer)
    }

    /// Reads a relative pointer that must not be null, failing with
    /// [`Code::UnexpectedNullPointer`] if the slot is `0`.
    pub fn read_non_null_pointer(&mut self) -> Result<u64, CodecError> {
        let pointer = self.read_pointer()?;
        if pointer == 0 {
            return Err(ValidationError::new(Code::UnexpectedNullPointer, "pointer field is not nullable").into());
        }
        Ok(pointer)
    }

    /// Reads a handle index and resolves it against the attached handle
    /// list, or the invalid-handle sentinel.
    pub fn read_untyped_handle(&mut self) -> Result<UntypedHandle, CodecError> {
        let index = self.read_uint32()?;
        if index == u32::MAX {
            return Ok(UntypedHandle::invalid());
        }
        Ok(self.claim_handle(index as usize)?)
    }

    /// Reads a handle that must not be invalid, failing with
    /// [`Code::UnexpectedInvalidHandle`] if the slot encodes the invalid
    /// sentinel.
    pub fn read_non_null_handle(&mut self) -> Result<UntypedHandle, CodecError> {
        let handle = self.read_untyped_handle()?;
        if !handle.is_valid() {
            return Err(ValidationError::new(Code::UnexpectedInvalidHandle, "handle field is not nullable").into());
        }
        Ok(handle)
    }
}
