//! Source loading and reloadable strings.
//!
//! Script sources are read into one-byte (ASCII or Latin-1) or UTF-16LE
//! buffers. A reloadable string keeps its buffer only while it is loaded:
//! [`unload`] hands the bytes to the unload callback and [`load`] asks the
//! load callback to produce them again, usually by rereading the file.

use crate::error::{Result, ShimError};
use crate::isolate::IsolateWrap;
use crate::local::{Local, MaybeLocal};
use crate::types;
use shim_gc::GcTraceable;
use shim_vm::{ExtraSlot, Value as JsValue};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Longest string the loader will materialize, in characters
pub const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

/// Encoding of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Not known yet; decided by content
    #[default]
    Unknown,
    /// Seven-bit, one byte per character
    Ascii,
    /// One byte per character
    Latin1,
    /// Two bytes per character, little endian
    Utf16,
}

impl Encoding {
    /// Whether each character takes one byte
    pub fn is_one_byte(self) -> bool {
        matches!(self, Encoding::Ascii | Encoding::Latin1)
    }
}

/// A source buffer and its encoding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileData {
    /// Encoded characters
    pub bytes: Vec<u8>,
    /// How `bytes` is encoded
    pub encoding: Encoding,
}

impl FileData {
    /// Number of characters in the buffer
    pub fn string_length(&self) -> usize {
        match self.encoding {
            Encoding::Utf16 => self.bytes.len() / 2,
            _ => self.bytes.len(),
        }
    }

    /// Decode into a Rust string
    pub fn decode(&self) -> Result<String> {
        decode(&self.bytes, self.encoding)
    }
}

fn invalid_data(message: impl Into<String>) -> ShimError {
    ShimError::Io(io::Error::new(io::ErrorKind::InvalidData, message.into()))
}

/// Re-encode UTF-8 `raw` as Latin-1 when every code point fits, otherwise
/// as UTF-16LE. Pure ASCII input is returned as is.
pub fn encode_utf8(raw: Vec<u8>, hint: Encoding) -> Result<FileData> {
    if hint != Encoding::Utf16 && raw.is_ascii() {
        return Ok(FileData {
            bytes: raw,
            encoding: Encoding::Ascii,
        });
    }
    let text = std::str::from_utf8(&raw).map_err(|e| invalid_data(format!("invalid UTF-8: {e}")))?;

    if hint != Encoding::Utf16 && text.chars().all(|c| (c as u32) <= 0xff) {
        return Ok(FileData {
            bytes: text.chars().map(|c| c as u8).collect(),
            encoding: Encoding::Latin1,
        });
    }

    let bytes = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    Ok(FileData {
        bytes,
        encoding: Encoding::Utf16,
    })
}

/// Decode a buffer produced by [`encode_utf8`]
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<String> {
    match encoding {
        Encoding::Utf16 => {
            if bytes.len() % 2 != 0 {
                return Err(invalid_data("odd UTF-16 buffer length"));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|e| invalid_data(e.to_string()))
        }
        Encoding::Unknown => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| invalid_data(format!("invalid UTF-8: {e}"))),
        Encoding::Ascii | Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

/// Read a UTF-8 file. `hint` of [`Encoding::Utf16`] forces a two-byte
/// buffer; anything else picks the narrowest encoding that fits.
pub fn read_file(path: impl AsRef<Path>, hint: Encoding) -> Result<FileData> {
    let path = path.as_ref();
    let raw = std::fs::read(path)?;
    let data = encode_utf8(raw, hint)?;
    tracing::debug!(
        target: "shim::loader",
        path = %path.display(),
        encoding = ?data.encoding,
        bytes = data.bytes.len(),
        "read"
    );
    Ok(data)
}

static LOADED: AtomicUsize = AtomicUsize::new(0);
static RELOADED: AtomicUsize = AtomicUsize::new(0);

/// Record behind a reloadable string
pub struct ReloadableSourceData {
    path: PathBuf,
    preloaded: RefCell<Option<Vec<u8>>>,
    encoding: Encoding,
    string_length: usize,
}

impl ReloadableSourceData {
    /// Record for `path` with its first load already in memory
    pub fn new(path: impl Into<PathBuf>, preloaded: FileData) -> Self {
        Self {
            path: path.into(),
            string_length: preloaded.string_length(),
            encoding: preloaded.encoding,
            preloaded: RefCell::new(Some(preloaded.bytes)),
        }
    }

    /// Source file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encoding of every load
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Length in characters
    pub fn string_length(&self) -> usize {
        self.string_length
    }

    /// Whether each character takes one byte
    pub fn is_one_byte(&self) -> bool {
        self.encoding.is_one_byte()
    }

    /// Size of one load in bytes
    pub fn byte_length(&self) -> usize {
        match self.encoding {
            Encoding::Utf16 => self.string_length * 2,
            _ => self.string_length,
        }
    }

    /// Take the preloaded buffer, if it has not been used yet
    pub fn take_preloaded(&self) -> Option<Vec<u8>> {
        self.preloaded.borrow_mut().take()
    }

    /// Whether the preloaded buffer is still unused
    pub fn has_preloaded(&self) -> bool {
        self.preloaded.borrow().is_some()
    }
}

impl fmt::Debug for ReloadableSourceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadableSourceData")
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .field("string_length", &self.string_length)
            .field("preloaded", &self.has_preloaded())
            .finish()
    }
}

/// Produces the buffer of a reloadable string
pub type LoadCallback = Box<dyn Fn(&ReloadableSourceData) -> Result<Vec<u8>>>;

/// Takes back the buffer of a reloadable string
pub type UnloadCallback = Box<dyn Fn(&ReloadableSourceData, Vec<u8>)>;

/// Extra data carried by the wrap of a reloadable string
pub struct ReloadableString {
    data: ReloadableSourceData,
    resident: RefCell<Option<Vec<u8>>>,
    loads: Cell<usize>,
    load: LoadCallback,
    unload: UnloadCallback,
}

impl GcTraceable for ReloadableString {}

impl ReloadableString {
    /// The source record
    pub fn data(&self) -> &ReloadableSourceData {
        &self.data
    }

    /// Whether the buffer is in memory
    pub fn is_loaded(&self) -> bool {
        self.resident.borrow().is_some()
    }

    /// How many times the load callback ran
    pub fn load_count(&self) -> usize {
        self.loads.get()
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let bytes = (self.load)(&self.data)?;
        if bytes.len() != self.data.byte_length() {
            return Err(invalid_data(format!(
                "{} changed size since it was first loaded",
                self.data.path.display()
            )));
        }
        self.loads.set(self.loads.get() + 1);
        tracing::info!(
            target: "shim::loader",
            loaded = LOADED.fetch_add(1, Ordering::Relaxed) + 1,
            reloaded = RELOADED.load(Ordering::Relaxed),
            path = %self.data.path.display(),
            kb = self.data.byte_length() as f64 / 1024.0,
            "load"
        );
        *self.resident.borrow_mut() = Some(bytes);
        Ok(())
    }

    fn evict(&self) -> bool {
        let Some(bytes) = self.resident.borrow_mut().take() else {
            return false;
        };
        let _ = LOADED.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        });
        tracing::info!(
            target: "shim::loader",
            loaded = LOADED.load(Ordering::Relaxed),
            path = %self.data.path.display(),
            kb = self.data.byte_length() as f64 / 1024.0,
            "unload"
        );
        (self.unload)(&self.data, bytes);
        true
    }

    /// Decoded text, loading the buffer first if needed
    pub fn text(&self) -> Result<String> {
        self.ensure_loaded()?;
        match &*self.resident.borrow() {
            Some(bytes) => decode(bytes, self.data.encoding),
            None => Err(invalid_data("reloadable string is not resident")),
        }
    }
}

impl fmt::Debug for ReloadableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadableString")
            .field("data", &self.data)
            .field("loaded", &self.is_loaded())
            .field("loads", &self.loads.get())
            .finish_non_exhaustive()
    }
}

/// String handle backed by `data`.
///
/// Empty sources give the empty string and carry no record; sources longer
/// than [`MAX_STRING_LENGTH`] give `None`.
pub fn new_reloadable_string(
    isolate: &IsolateWrap,
    data: ReloadableSourceData,
    load: LoadCallback,
    unload: UnloadCallback,
) -> Result<MaybeLocal<types::String>> {
    if data.string_length() == 0 {
        return Ok(Some(types::String::empty(isolate)));
    }
    if data.string_length() > MAX_STRING_LENGTH {
        tracing::warn!(
            target: "shim::loader",
            length = data.string_length(),
            "source exceeds the maximum string length"
        );
        return Ok(None);
    }

    let record = Rc::new(ReloadableString {
        data,
        resident: RefCell::new(None),
        loads: Cell::new(0),
        load,
        unload,
    });
    let text = record.text()?;
    let local: Local<types::String> = isolate.new_value(JsValue::string(text));
    isolate.value_wrap(local.wrap_ref()).set_extra(vec![record as Rc<dyn ExtraSlot>]);
    Ok(Some(local))
}

/// Read `path` and wrap it as a reloadable string. The first load uses
/// the buffer read here; later loads reread the file.
pub fn create_reloadable_source_from_file(
    isolate: &IsolateWrap,
    path: impl AsRef<Path>,
) -> Result<MaybeLocal<types::String>> {
    let path = path.as_ref();
    let file = read_file(path, Encoding::Unknown)?;
    let data = ReloadableSourceData::new(path, file);
    new_reloadable_string(
        isolate,
        data,
        Box::new(|data| {
            if let Some(bytes) = data.take_preloaded() {
                return Ok(bytes);
            }
            RELOADED.fetch_add(1, Ordering::Relaxed);
            let hint = if data.is_one_byte() {
                Encoding::Latin1
            } else {
                Encoding::Utf16
            };
            Ok(read_file(data.path(), hint)?.bytes)
        }),
        Box::new(|data, bytes| {
            data.take_preloaded();
            drop(bytes);
        }),
    )
}

/// Record attached to `string`, if it is reloadable
pub fn reloadable_source(string: Local<types::String>) -> Option<Rc<ReloadableString>> {
    string.value_wrap().get_extra::<ReloadableString>(0)
}

/// Evict the buffer of a reloadable string. Returns whether anything was
/// resident.
pub fn unload(string: Local<types::String>) -> bool {
    reloadable_source(string).is_some_and(|record| record.evict())
}

/// Bring the buffer of a reloadable string back into memory
pub fn load(string: Local<types::String>) -> Result<bool> {
    match reloadable_source(string) {
        Some(record) => record.ensure_loaded().map(|()| true),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_stays_one_byte() {
        let data = encode_utf8(b"let x = 1;".to_vec(), Encoding::Unknown).unwrap();
        assert_eq!(data.encoding, Encoding::Ascii);
        assert_eq!(data.string_length(), 10);
    }

    #[test]
    fn test_latin1_when_code_points_fit() {
        let data = encode_utf8("café".as_bytes().to_vec(), Encoding::Unknown).unwrap();
        assert_eq!(data.encoding, Encoding::Latin1);
        assert_eq!(data.bytes, vec![b'c', b'a', b'f', 0xe9]);
        assert_eq!(data.decode().unwrap(), "café");
    }

    #[test]
    fn test_utf16_for_wide_code_points() {
        let data = encode_utf8("한글".as_bytes().to_vec(), Encoding::Unknown).unwrap();
        assert_eq!(data.encoding, Encoding::Utf16);
        assert_eq!(data.string_length(), 2);
        assert_eq!(data.decode().unwrap(), "한글");
    }

    #[test]
    fn test_utf16_hint_forces_two_bytes() {
        let data = encode_utf8(b"ab".to_vec(), Encoding::Utf16).unwrap();
        assert_eq!(data.encoding, Encoding::Utf16);
        assert_eq!(data.bytes, vec![b'a', 0, b'b', 0]);
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        assert!(encode_utf8(vec![0xff, 0xfe], Encoding::Unknown).is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(dir.path().join("missing.js"), Encoding::Unknown).unwrap_err();
        assert!(matches!(err, ShimError::Io(_)));
    }
}
