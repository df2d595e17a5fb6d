//! ArrayBuffer payload.
//!
//! The VM never allocates buffer memory itself. The embedder attaches an
//! [`ArrayBufferContents`] implementation that owns the bytes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Memory behind an ArrayBuffer
pub trait ArrayBufferContents {
    /// Length in bytes
    fn byte_length(&self) -> usize;

    /// Copy `out.len()` bytes starting at `offset`. False if out of range.
    fn read(&self, offset: usize, out: &mut [u8]) -> bool;

    /// Overwrite bytes starting at `offset`. False if out of range.
    fn write(&self, offset: usize, data: &[u8]) -> bool;

    /// Whether the memory may be attached to several buffers at once
    fn is_shared(&self) -> bool {
        false
    }
}

/// ArrayBuffer state
#[derive(Default)]
pub struct ArrayBufferObject {
    contents: RefCell<Option<Rc<dyn ArrayBufferContents>>>,
}

impl ArrayBufferObject {
    /// Detached buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach memory, returning what was attached before
    pub fn attach(
        &self,
        contents: Rc<dyn ArrayBufferContents>,
    ) -> Option<Rc<dyn ArrayBufferContents>> {
        self.contents.borrow_mut().replace(contents)
    }

    /// Detach the memory
    pub fn detach(&self) -> Option<Rc<dyn ArrayBufferContents>> {
        self.contents.borrow_mut().take()
    }

    /// Attached memory
    pub fn contents(&self) -> Option<Rc<dyn ArrayBufferContents>> {
        self.contents.borrow().clone()
    }

    /// Whether nothing is attached
    pub fn is_detached(&self) -> bool {
        self.contents.borrow().is_none()
    }

    /// `byteLength`, 0 when detached
    pub fn byte_length(&self) -> usize {
        self.contents.borrow().as_ref().map_or(0, |c| c.byte_length())
    }
}

impl fmt::Debug for ArrayBufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayBufferObject")
            .field("byte_length", &self.byte_length())
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct VecContents(RefCell<Vec<u8>>);

    impl ArrayBufferContents for VecContents {
        fn byte_length(&self) -> usize {
            self.0.borrow().len()
        }
        fn read(&self, offset: usize, out: &mut [u8]) -> bool {
            let bytes = self.0.borrow();
            match bytes.get(offset..offset + out.len()) {
                Some(src) => {
                    out.copy_from_slice(src);
                    true
                }
                None => false,
            }
        }
        fn write(&self, offset: usize, data: &[u8]) -> bool {
            let mut bytes = self.0.borrow_mut();
            match bytes.get_mut(offset..offset + data.len()) {
                Some(dst) => {
                    dst.copy_from_slice(data);
                    true
                }
                None => false,
            }
        }
    }

    #[test]
    fn test_attach_detach() {
        let buffer = ArrayBufferObject::new();
        assert!(buffer.is_detached());
        buffer.attach(Rc::new(VecContents(RefCell::new(vec![0; 4]))));
        assert_eq!(buffer.byte_length(), 4);
        let contents = buffer.contents().unwrap();
        assert!(contents.write(1, &[9, 9]));
        let mut out = [0u8; 4];
        assert!(contents.read(0, &mut out));
        assert_eq!(out, [0, 9, 9, 0]);
        assert!(buffer.detach().is_some());
        assert_eq!(buffer.byte_length(), 0);
    }
}
