//! Messages describing thrown exceptions

use crate::local::Local;
use crate::types;
use shim_vm::StackTraceData;
use std::rc::Rc;

/// Listener invoked for every reported exception
pub type MessageCallback = Rc<dyn Fn(&Message, Local<types::Value>)>;

/// Text and location of a thrown exception.
///
/// The location is the innermost captured frame; a message created with no
/// frames has an empty resource name and line 0.
#[derive(Debug, Clone)]
pub struct Message {
    text: String,
    frames: Rc<[StackTraceData]>,
}

impl Message {
    /// Message for an exception whose `String()` is `display`
    pub fn new(display: &str, frames: Rc<[StackTraceData]>) -> Self {
        Self {
            text: format!("Uncaught {display}"),
            frames,
        }
    }

    /// `"Uncaught "` followed by the exception text
    pub fn get(&self) -> &str {
        &self.text
    }

    /// Resource name of the throwing script
    pub fn get_script_resource_name(&self) -> &str {
        self.frames.first().map_or("", |f| &f.src)
    }

    /// 1-based line
    pub fn get_line_number(&self) -> i32 {
        self.frames.first().map_or(0, |f| f.line)
    }

    /// 0-based column where the throw starts
    pub fn get_start_column(&self) -> i32 {
        self.frames.first().map_or(0, |f| f.column - 1)
    }

    /// 0-based column one past the throw position
    pub fn get_end_column(&self) -> i32 {
        self.frames.first().map_or(0, |f| f.column)
    }

    /// Text of the throwing line
    pub fn get_source_line(&self) -> Option<&str> {
        let frame = self.frames.first()?;
        let index = usize::try_from(frame.line - 1).ok()?;
        frame.source_code.lines().nth(index)
    }

    /// Captured frames, innermost first
    pub fn get_stack_trace(&self) -> &[StackTraceData] {
        &self.frames
    }

    pub(crate) fn shared_frames(&self) -> Rc<[StackTraceData]> {
        self.frames.clone()
    }
}
