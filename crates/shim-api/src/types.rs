//! Handle marker types.
//!
//! Each marker names what a [`crate::Local`] points at. Constructors that
//! the embedding API exposes as static methods (`String::new_from_utf8`,
//! `Object::new`, ...) live on the markers; instance methods live on
//! `Local<Marker>`.

/// Any engine value
#[derive(Debug)]
pub struct Value;

/// Primitive value
#[derive(Debug)]
pub struct Primitive;

/// Object value
#[derive(Debug)]
pub struct Object;

/// Callable object
#[derive(Debug)]
pub struct Function;

/// String value
#[derive(Debug)]
pub struct String;

/// Number value
#[derive(Debug)]
pub struct Number;

/// Boolean value
#[derive(Debug)]
pub struct Boolean;

/// ArrayBuffer object
#[derive(Debug)]
pub struct ArrayBuffer;

/// Realm
#[derive(Debug)]
pub struct Context;

/// Compiled script
#[derive(Debug)]
pub struct Script;

/// Function template
#[derive(Debug)]
pub struct FunctionTemplate;

/// Object template
#[derive(Debug)]
pub struct ObjectTemplate;

/// Receiver check for a function template
#[derive(Debug)]
pub struct Signature;

/// Error constructors
#[derive(Debug)]
pub struct Exception;
