pub mod client;
pub mod codec;
pub mod server;

use crate::{
    error::ErrorDescriptor,
    types::{Type, Value},
};

/// One call: the method selector, its parameter types (to pick an overload) and the arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub selector: String,
    pub param_types: Vec<Type>,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `Value::Unit` for methods without a result.
    Ok(Value),
    Err(ErrorDescriptor),
}
