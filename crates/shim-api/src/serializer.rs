//! Structured-clone wire format.
//!
//! Writes format version 13: a version header, then tagged values. Numbers
//! use the `U`/`I`/`N` tags, strings are one-byte or UTF-16LE, plain objects
//! are key/value runs closed by their property count, and repeated objects
//! become back references. Buffer growth goes through
//! [`SerializerDelegate::reallocate_buffer_memory`]; once that fails the
//! serializer is out of memory and ignores every later write.

use crate::backing_store::BackingStoreWrapHolder;
use crate::error::{Result, ShimError};
use crate::isolate::IsolateWrap;
use crate::local::Local;
use crate::types;
use rustc_hash::FxHashMap;
use shim_gc::GcRef;
use shim_vm::{ObjectKind, Value as JsValue};
use std::rc::Rc;

/// Version written by [`ValueSerializer::write_header`]
pub const LATEST_VERSION: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Version = 0xff,
    Padding = b'\0',
    Undefined = b'_',
    Null = b'0',
    True = b'T',
    False = b'F',
    Int32 = b'I',
    Uint32 = b'U',
    Double = b'N',
    OneByteString = b'"',
    TwoByteString = b'c',
    ObjectReference = b'^',
    BeginJsObject = b'o',
    EndJsObject = b'{',
    ArrayBuffer = b'B',
}

impl Tag {
    fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0xff => Tag::Version,
            b'\0' => Tag::Padding,
            b'_' => Tag::Undefined,
            b'0' => Tag::Null,
            b'T' => Tag::True,
            b'F' => Tag::False,
            b'I' => Tag::Int32,
            b'U' => Tag::Uint32,
            b'N' => Tag::Double,
            b'"' => Tag::OneByteString,
            b'c' => Tag::TwoByteString,
            b'^' => Tag::ObjectReference,
            b'o' => Tag::BeginJsObject,
            b'{' => Tag::EndJsObject,
            b'B' => Tag::ArrayBuffer,
            _ => return None,
        })
    }
}

/// Embedder hooks for [`ValueSerializer`]
pub trait SerializerDelegate {
    /// Grow `buffer` so it can hold at least `size` bytes, keeping its
    /// contents. `None` means out of memory.
    fn reallocate_buffer_memory(&self, buffer: Vec<u8>, size: usize) -> Option<Vec<u8>> {
        let mut buffer = buffer;
        buffer
            .try_reserve_exact(size.saturating_sub(buffer.len()))
            .ok()?;
        Some(buffer)
    }

    /// A value could not be cloned
    fn throw_data_clone_error(&self, message: &str) {
        tracing::debug!(target: "shim::serializer", message, "DataCloneError");
    }
}

/// Delegate that grows buffers on the heap
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSerializerDelegate;

impl SerializerDelegate for DefaultSerializerDelegate {}

/// Writes values into a byte buffer
pub struct ValueSerializer<'a> {
    isolate: &'a IsolateWrap,
    delegate: &'a dyn SerializerDelegate,
    buffer: Vec<u8>,
    out_of_memory: bool,
    object_ids: FxHashMap<GcRef, u32>,
}

impl<'a> ValueSerializer<'a> {
    /// Serializer whose buffer grows through `delegate`
    pub fn new(isolate: &'a IsolateWrap, delegate: &'a dyn SerializerDelegate) -> Self {
        Self {
            isolate,
            delegate,
            buffer: Vec::new(),
            out_of_memory: false,
            object_ids: FxHashMap::default(),
        }
    }

    /// Whether a buffer expansion failed
    pub fn is_out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    /// Bytes written so far
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn expand_buffer(&mut self, required: usize) -> bool {
        let requested = required.max(self.buffer.capacity() * 2) + 64;
        let buffer = std::mem::take(&mut self.buffer);
        match self.delegate.reallocate_buffer_memory(buffer, requested) {
            Some(buffer) => {
                shim_check!(
                    buffer.capacity() >= required,
                    "delegate returned {} bytes, {required} required",
                    buffer.capacity()
                );
                self.buffer = buffer;
                true
            }
            None => {
                trace_call!("SERIALIZER", requested, "out of memory");
                self.out_of_memory = true;
                false
            }
        }
    }

    /// Append `bytes`; skipped once out of memory
    pub fn write_raw_bytes(&mut self, bytes: &[u8]) {
        if self.out_of_memory {
            return;
        }
        let required = self.buffer.len() + bytes.len();
        if required > self.buffer.capacity() && !self.expand_buffer(required) {
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    fn write_tag(&mut self, tag: Tag) {
        self.write_raw_bytes(&[tag as u8]);
    }

    /// Base-128 varint, least significant group first
    pub fn write_uint64(&mut self, mut value: u64) {
        let mut bytes = [0u8; 10];
        let mut len = 0;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                bytes[len] = byte;
                len += 1;
                break;
            }
            bytes[len] = byte | 0x80;
            len += 1;
        }
        self.write_raw_bytes(&bytes[..len]);
    }

    /// Varint `u32`
    pub fn write_uint32(&mut self, value: u32) {
        self.write_uint64(u64::from(value));
    }

    fn write_zigzag(&mut self, value: i32) {
        self.write_uint32(((value << 1) ^ (value >> 31)) as u32);
    }

    /// Little-endian IEEE 754 double
    pub fn write_double(&mut self, value: f64) {
        self.write_raw_bytes(&value.to_le_bytes());
    }

    /// Version tag and [`LATEST_VERSION`]
    pub fn write_header(&mut self) {
        self.write_tag(Tag::Version);
        self.write_uint32(LATEST_VERSION);
    }

    fn write_length(&mut self, length: usize) -> Result<()> {
        let length = u32::try_from(length)
            .map_err(|_| ShimError::DataClone(format!("length {length} does not fit")))?;
        self.write_uint32(length);
        Ok(())
    }

    fn write_number(&mut self, n: f64) {
        let is_integral = n.fract() == 0.0 && !(n == 0.0 && n.is_sign_negative());
        if is_integral && n >= 0.0 && n <= f64::from(u32::MAX) {
            self.write_tag(Tag::Uint32);
            self.write_uint32(n as u32);
        } else if is_integral && n >= f64::from(i32::MIN) && n < 0.0 {
            self.write_tag(Tag::Int32);
            self.write_zigzag(n as i32);
        } else {
            self.write_tag(Tag::Double);
            self.write_double(n);
        }
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        if s.chars().all(|c| (c as u32) <= 0xff) {
            let bytes: Vec<u8> = s.chars().map(|c| c as u8).collect();
            self.write_tag(Tag::OneByteString);
            self.write_length(bytes.len())?;
            self.write_raw_bytes(&bytes);
        } else {
            let bytes: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
            self.write_tag(Tag::TwoByteString);
            self.write_length(bytes.len())?;
            self.write_raw_bytes(&bytes);
        }
        Ok(())
    }

    fn data_clone_error(&self, message: String) -> ShimError {
        self.delegate.throw_data_clone_error(&message);
        ShimError::DataClone(message)
    }

    fn write_object(&mut self, object: GcRef) -> Result<()> {
        if let Some(&id) = self.object_ids.get(&object) {
            self.write_tag(Tag::ObjectReference);
            self.write_uint32(id);
            return Ok(());
        }
        let id = self.object_ids.len() as u32;
        self.object_ids.insert(object, id);

        let isolate = self.isolate;
        let local: Local<types::Object> = isolate.new_value(JsValue::Object(object));
        let vm = isolate.vm();
        let js_object = vm.object(object);
        match js_object.kind() {
            ObjectKind::Function(_) => {
                return Err(self.data_clone_error("function could not be cloned".to_string()));
            }
            ObjectKind::ArrayBuffer(_) => {
                let bytes = local.cast::<types::ArrayBuffer>().to_vec();
                self.write_tag(Tag::ArrayBuffer);
                self.write_length(bytes.len())?;
                self.write_raw_bytes(&bytes);
                return Ok(());
            }
            ObjectKind::Ordinary | ObjectKind::Error(_) => {}
        }
        if local.internal_field_count() > 0 {
            return Err(self.data_clone_error("host object could not be cloned".to_string()));
        }

        self.write_tag(Tag::BeginJsObject);
        let mut written = 0u32;
        for key in js_object.keys() {
            let value = js_object.get_own(&key).unwrap_or_default();
            self.write_string(&key)?;
            self.write_js_value(&value)?;
            written += 1;
        }
        self.write_tag(Tag::EndJsObject);
        self.write_uint32(written);
        Ok(())
    }

    fn write_js_value(&mut self, value: &JsValue) -> Result<()> {
        match value {
            JsValue::Undefined => self.write_tag(Tag::Undefined),
            JsValue::Null => self.write_tag(Tag::Null),
            JsValue::Boolean(true) => self.write_tag(Tag::True),
            JsValue::Boolean(false) => self.write_tag(Tag::False),
            JsValue::Number(n) => self.write_number(*n),
            JsValue::String(s) => self.write_string(s)?,
            JsValue::Object(object) => self.write_object(*object)?,
        }
        Ok(())
    }

    /// Serialize `value`. Fails with [`ShimError::DataClone`] for values
    /// that cannot be cloned and [`ShimError::OutOfMemory`] once the
    /// buffer could not grow.
    pub fn write_value(&mut self, value: Local<types::Value>) -> Result<()> {
        let value = value.value_wrap().value();
        self.write_js_value(&value)?;
        if self.out_of_memory {
            return Err(ShimError::OutOfMemory);
        }
        Ok(())
    }

    /// Hand over the written bytes
    pub fn release(self) -> Result<Vec<u8>> {
        trace_call!("SERIALIZER", size = self.buffer.len(), "release");
        if self.out_of_memory {
            return Err(ShimError::OutOfMemory);
        }
        Ok(self.buffer)
    }
}

impl std::fmt::Debug for ValueSerializer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSerializer")
            .field("size", &self.buffer.len())
            .field("out_of_memory", &self.out_of_memory)
            .finish()
    }
}

/// Deepest object nesting the deserializer follows
pub const MAX_NESTING_DEPTH: usize = 256;

fn malformed(message: impl Into<String>) -> ShimError {
    ShimError::Deserialize(message.into())
}

/// Reads values written by [`ValueSerializer`]
pub struct ValueDeserializer<'a> {
    isolate: &'a IsolateWrap,
    data: &'a [u8],
    position: usize,
    version: u32,
    objects: Vec<GcRef>,
    depth: usize,
}

impl<'a> ValueDeserializer<'a> {
    /// Reader over `data`
    pub fn new(isolate: &'a IsolateWrap, data: &'a [u8]) -> Self {
        Self {
            isolate,
            data,
            position: 0,
            version: 0,
            objects: Vec::new(),
            depth: 0,
        }
    }

    /// Version from the header; 0 before [`ValueDeserializer::read_header`]
    pub fn wire_format_version(&self) -> u32 {
        self.version
    }

    fn peek_tag(&self) -> Option<u8> {
        self.data[self.position..]
            .iter()
            .copied()
            .find(|&b| b != Tag::Padding as u8)
    }

    fn read_tag(&mut self) -> Result<Tag> {
        loop {
            let byte = *self
                .data
                .get(self.position)
                .ok_or_else(|| malformed("unexpected end of data"))?;
            self.position += 1;
            if byte == Tag::Padding as u8 {
                continue;
            }
            return Tag::from_u8(byte).ok_or_else(|| malformed(format!("unknown tag {byte:#04x}")));
        }
    }

    /// Consume the version header. Data without one reads as version 0.
    pub fn read_header(&mut self) -> Result<u32> {
        if self.peek_tag() == Some(Tag::Version as u8) {
            self.read_tag()?;
            self.version = self.read_uint32()?;
            if self.version > LATEST_VERSION {
                return Err(malformed(format!("unsupported version {}", self.version)));
            }
        }
        Ok(self.version)
    }

    /// Next `length` bytes
    pub fn read_raw_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| malformed("raw bytes run past the end of data"))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Varint `u64`
    pub fn read_uint64(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .data
                .get(self.position)
                .ok_or_else(|| malformed("truncated varint"))?;
            self.position += 1;
            if shift >= 64 {
                return Err(malformed("varint overflow"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Varint `u32`
    pub fn read_uint32(&mut self) -> Result<u32> {
        u32::try_from(self.read_uint64()?).map_err(|_| malformed("varint out of u32 range"))
    }

    fn read_zigzag(&mut self) -> Result<i32> {
        let raw = self.read_uint32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// Little-endian double
    pub fn read_double(&mut self) -> Result<f64> {
        let bytes = self.read_raw_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_length(&mut self) -> Result<usize> {
        Ok(self.read_uint32()? as usize)
    }

    fn read_string_body(&mut self, tag: Tag) -> Result<String> {
        let length = self.read_length()?;
        let bytes = self.read_raw_bytes(length)?;
        match tag {
            Tag::OneByteString => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            _ => {
                if length % 2 != 0 {
                    return Err(malformed("odd two-byte string length"));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|e| malformed(e.to_string()))
            }
        }
    }

    fn read_object(&mut self) -> Result<JsValue> {
        let isolate = self.isolate;
        let vm = isolate.vm();
        let object = vm.new_object(isolate.engine_context_or_pure());
        self.objects.push(object);
        let js_object = vm.object(object);

        let mut read = 0u32;
        loop {
            if self.peek_tag() == Some(Tag::EndJsObject as u8) {
                self.read_tag()?;
                break;
            }
            let key = match self.read_js_value()? {
                JsValue::String(key) => key,
                JsValue::Number(n) => Rc::from(shim_vm::value::number_to_string(n)),
                other => return Err(malformed(format!("invalid property key {other:?}"))),
            };
            let value = self.read_js_value()?;
            js_object.set_own(key, value);
            read += 1;
        }
        let expected = self.read_uint32()?;
        if expected != read {
            return Err(malformed(format!(
                "object declared {expected} properties, found {read}"
            )));
        }
        Ok(JsValue::Object(object))
    }

    fn read_array_buffer(&mut self) -> Result<JsValue> {
        let length = self.read_length()?;
        let bytes = self.read_raw_bytes(length)?.to_vec();
        let store: BackingStoreWrapHolder = types::ArrayBuffer::new_backing_store_from_data(bytes, None);
        let buffer = types::ArrayBuffer::with_backing_store(self.isolate, &store);
        let value = buffer.value_wrap().value();
        if let Some(object) = value.as_object() {
            self.objects.push(object);
        }
        Ok(value)
    }

    fn read_js_value(&mut self) -> Result<JsValue> {
        let tag = self.read_tag()?;
        Ok(match tag {
            Tag::Undefined => JsValue::Undefined,
            Tag::Null => JsValue::Null,
            Tag::True => JsValue::Boolean(true),
            Tag::False => JsValue::Boolean(false),
            Tag::Int32 => JsValue::from(self.read_zigzag()?),
            Tag::Uint32 => JsValue::from(self.read_uint32()?),
            Tag::Double => JsValue::Number(self.read_double()?),
            Tag::OneByteString | Tag::TwoByteString => JsValue::from(self.read_string_body(tag)?),
            Tag::ObjectReference => {
                let id = self.read_length()?;
                let object = self
                    .objects
                    .get(id)
                    .copied()
                    .ok_or_else(|| malformed(format!("invalid object reference {id}")))?;
                JsValue::Object(object)
            }
            Tag::BeginJsObject => {
                if self.depth >= MAX_NESTING_DEPTH {
                    return Err(malformed("object nesting too deep"));
                }
                self.depth += 1;
                let object = self.read_object();
                self.depth -= 1;
                object?
            }
            Tag::ArrayBuffer => self.read_array_buffer()?,
            Tag::Version | Tag::Padding | Tag::EndJsObject => {
                return Err(malformed(format!("unexpected tag {tag:?}")));
            }
        })
    }

    /// Next value, as a handle in the current scope
    pub fn read_value(&mut self) -> Result<Local<types::Value>> {
        let value = self.read_js_value()?;
        Ok(self.isolate.new_value(value))
    }
}

impl std::fmt::Debug for ValueDeserializer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueDeserializer")
            .field("position", &self.position)
            .field("size", &self.data.len())
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_decode() {
        for byte in [b'_', b'0', b'T', b'F', b'I', b'U', b'N', b'"', b'c', b'^', b'o', b'{', b'B'] {
            let tag = Tag::from_u8(byte).unwrap();
            assert_eq!(tag as u8, byte);
        }
        assert_eq!(Tag::from_u8(b'?'), None);
    }
}
