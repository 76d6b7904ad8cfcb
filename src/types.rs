use crate::net::codec::{self, CodecError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{error::Error, fmt};

/// Type descriptor for a value that can cross the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Type {
    Unit,
    Bool,
    I32,
    I64,
    U64,
    String,
    /// A user type registered with [`transmittable!`](crate::transmittable).
    Custom { name: String, version: u32 },
}

impl Type {
    fn name(&self) -> &str {
        use Type::*;
        match self {
            Unit => "Unit",
            Bool => "Bool",
            I32 => "I32",
            I64 => "I64",
            U64 => "U64",
            String => "String",
            Custom { name, .. } => name,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())?;
        if let Type::Custom { version, .. } = self {
            write!(f, "@v{version}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Value {
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    String(String),
    Custom {
        name: String,
        version: u32,
        data: Vec<u8>,
    },
}

impl Value {
    pub fn rpc_type(&self) -> Type {
        match self {
            Value::Unit => Type::Unit,
            Value::Bool(_) => Type::Bool,
            Value::I32(_) => Type::I32,
            Value::I64(_) => Type::I64,
            Value::U64(_) => Type::U64,
            Value::String(_) => Type::String,
            Value::Custom { name, version, .. } => Type::Custom {
                name: name.clone(),
                version: *version,
            },
        }
    }
}

pub trait Typed {
    fn rpc_type() -> Type;
}

pub trait Encode {
    fn encode(self) -> Result<Value, CodecError>;
}

pub trait Decode: Sized {
    fn decode(val: Value) -> Result<Self, CodecError>;
}

macro_rules! impl_encode_decode {
    ($rust_type:ty, $rpc_type:expr, $encode_name:pat => $encode_expr:expr, $($from_rpc_arm:tt)*) => {
        impl Typed for $rust_type {
            fn rpc_type() -> Type {
                $rpc_type
            }
        }

        impl Encode for $rust_type {
            fn encode(self) -> Result<Value, CodecError> {
                let $encode_name = self;
                Ok($encode_expr)
            }
        }

        impl Decode for $rust_type {
            fn decode(val: Value) -> Result<Self, CodecError> {
                Ok(match val {
                    $($from_rpc_arm)*,
                    _ => return Err(TypeMismatch::new(&val, <Self as Typed>::rpc_type()).into())
                })
            }
        }
    };
}

impl_encode_decode!((), Type::Unit, () => Value::Unit, Value::Unit => ());
impl_encode_decode!(bool, Type::Bool, b => Value::Bool(b), Value::Bool(b) => b);
impl_encode_decode!(i32, Type::I32, n => Value::I32(n), Value::I32(n) => n);
impl_encode_decode!(i64, Type::I64, n => Value::I64(n), Value::I64(n) => n);
impl_encode_decode!(u64, Type::U64, n => Value::U64(n), Value::U64(n) => n);
impl_encode_decode!(String, Type::String, s => Value::String(s), Value::String(s) => s);

impl Encode for &str {
    fn encode(self) -> Result<Value, CodecError> {
        Ok(Value::String(self.to_owned()))
    }
}

/// A user-defined value type that may be passed to or returned from a remote method.
///
/// The `NAME`/`VERSION` pair is the registered descriptor of the encoding: both ends must
/// agree on it, otherwise decoding fails with a [`TypeMismatch`]. Implement this through
/// [`transmittable!`](crate::transmittable), which also provides [`Typed`], [`Encode`] and
/// [`Decode`].
pub trait Transmittable: Serialize + DeserializeOwned {
    const NAME: &'static str;
    const VERSION: u32;
}

pub fn custom_type<T: Transmittable>() -> Type {
    Type::Custom {
        name: T::NAME.to_owned(),
        version: T::VERSION,
    }
}

pub fn encode_custom<T: Transmittable>(val: &T) -> Result<Value, CodecError> {
    Ok(Value::Custom {
        name: T::NAME.to_owned(),
        version: T::VERSION,
        data: codec::encode_item(val)?,
    })
}

pub fn decode_custom<T: Transmittable>(val: Value) -> Result<T, CodecError> {
    match val {
        Value::Custom {
            ref name,
            version,
            ref data,
        } if name == T::NAME && version == T::VERSION => codec::decode_item(data),
        _ => Err(TypeMismatch::new(&val, custom_type::<T>()).into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    found: Type,
    expected: Type,
}

impl TypeMismatch {
    pub(crate) fn new(value: &Value, expected: Type) -> Self {
        Self {
            found: value.rpc_type(),
            expected,
        }
    }

    pub fn found(&self) -> &Type {
        &self.found
    }

    pub fn expected(&self) -> &Type {
        &self.expected
    }
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Type error: {} :/: {}", self.found, self.expected)
    }
}

impl Error for TypeMismatch {}
