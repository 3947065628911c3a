use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, error::Error, fmt, num::ParseIntError, sync::Arc};
use thiserror::Error;

/// The identity of a service type.
///
/// This is also the text form of a type-reference [`Value`], so a service can be told which
/// other service to address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// A declared parameter or return type.
///
/// Only `Void`, `String`, `Int` and `TypeRef` have a wire form. `Other` names a declared type
/// outside that set so that signatures can carry it and calls against it can be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    String,
    Int,
    TypeRef,
    Other(String),
}

impl Type {
    fn name(&self) -> &str {
        use Type::*;
        match self {
            Void => "Void",
            String => "String",
            Int => "Int",
            TypeRef => "TypeRef",
            Other(name) => name,
        }
    }

    /// Whether a parameter of this type can be carried by an argument line.
    pub fn is_argument(&self) -> bool {
        matches!(self, Type::String | Type::Int | Type::TypeRef)
    }

    /// Whether a response can be converted into this type.
    pub fn is_return(&self) -> bool {
        matches!(self, Type::Void | Type::String | Type::Int)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Void,
    String(String),
    Int(i32),
    TypeRef(ServiceName),
}

impl Value {
    pub fn rpc_type(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::String(_) => Type::String,
            Value::Int(_) => Type::Int,
            Value::TypeRef(_) => Type::TypeRef,
        }
    }

    /// The plain text form written to the wire. Void renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            Value::Void => String::new(),
            Value::String(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::TypeRef(name) => name.to_string(),
        }
    }

    /// Converts wire text into a value of type `typ`.
    ///
    /// Void discards the text. A type reference is only named here; whether it refers to a
    /// known service is for the caller to decide.
    pub fn parse(text: &str, typ: &Type) -> Result<Value, ConversionError> {
        Ok(match typ {
            Type::Void => Value::Void,
            Type::String => Value::String(text.to_owned()),
            Type::Int => Value::Int(text.parse().map_err(|source| ConversionError::NotAnInt {
                text: text.to_owned(),
                source,
            })?),
            Type::TypeRef => Value::TypeRef(ServiceName::new(text)),
            Type::Other(_) => return Err(ConversionError::Unsupported(typ.clone())),
        })
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<ServiceName> for Value {
    fn from(name: ServiceName) -> Self {
        Value::TypeRef(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("type {0} has no text form")]
    Unsupported(Type),

    #[error("{text:?} is not a 32-bit integer: {source}")]
    NotAnInt { text: String, source: ParseIntError },
}

pub trait Typed {
    fn rpc_type() -> Type;
}

pub trait Encode {
    fn encode(val: Self) -> Value;
}

pub trait Decode: Sized {
    fn decode(val: Value) -> Result<Self, TypeMismatch>;
}

/// Rust types a call can return.
pub trait Returnable: Typed + Decode {}

macro_rules! impl_encode_decode {
    ($rust_type:ty, $rpc_type:expr, $encode_name:pat => $encode_expr:expr, $($from_rpc_arm:tt)*) => {
        impl Typed for $rust_type {
            fn rpc_type() -> Type {
                $rpc_type
            }
        }

        impl Encode for $rust_type {
            fn encode($encode_name: $rust_type) -> Value {
                $encode_expr
            }
        }

        impl Decode for $rust_type {
            fn decode(val: Value) -> Result<Self, TypeMismatch> {
                Ok(match val {
                    $($from_rpc_arm)*,
                    _ => return Err(TypeMismatch::new(val, <Self as Typed>::rpc_type()))
                })
            }
        }
    };
}

impl_encode_decode!((), Type::Void, () => Value::Void, Value::Void => ());
impl_encode_decode!(String, Type::String, s => Value::String(s), Value::String(s) => s);
impl_encode_decode!(i32, Type::Int, n => Value::Int(n), Value::Int(n) => n);
impl_encode_decode!(ServiceName, Type::TypeRef, n => Value::TypeRef(n), Value::TypeRef(n) => n);

impl Returnable for () {}
impl Returnable for String {}
impl Returnable for i32 {}

/// A tuple of method parameters, decoded from positional [`Value`]s.
pub trait Params: Sized + Send + 'static {
    fn types() -> Vec<Type>;
    fn from_values(values: Vec<Value>) -> Result<Self, TypeMismatch>;
}

/// A tuple of call arguments, encoded into positional [`Value`]s.
pub trait IntoArgs: Send {
    fn into_values(self) -> Vec<Value>;
}

impl Params for () {
    fn types() -> Vec<Type> {
        Vec::new()
    }

    fn from_values(_values: Vec<Value>) -> Result<Self, TypeMismatch> {
        Ok(())
    }
}

impl IntoArgs for () {
    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Value> {
    fn into_values(self) -> Vec<Value> {
        self
    }
}

macro_rules! impl_tuple {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty),+> Params for ($($ty,)+)
        where
            $($ty: Typed + Decode + Send + 'static),+
        {
            fn types() -> Vec<Type> {
                vec![$(<$ty as Typed>::rpc_type()),+]
            }

            fn from_values(values: Vec<Value>) -> Result<Self, TypeMismatch> {
                let mut values = values.into_iter();
                $(
                    let $var = match values.next() {
                        Some(val) => <$ty as Decode>::decode(val)?,
                        None => return Err(TypeMismatch::new(Value::Void, <$ty as Typed>::rpc_type())),
                    };
                )+
                Ok(($($var,)+))
            }
        }

        impl<$($ty),+> IntoArgs for ($($ty,)+)
        where
            $($ty: Encode + Send),+
        {
            fn into_values(self) -> Vec<Value> {
                let ($($var,)+) = self;
                vec![$(<$ty as Encode>::encode($var)),+]
            }
        }
    };
}

impl_tuple!(A a);
impl_tuple!(A a, B b);
impl_tuple!(A a, B b, C c);
impl_tuple!(A a, B b, C c, D d);

#[derive(Debug, Clone)]
pub struct TypeMismatch {
    value: Value,
    expected_type: Type,
}

impl TypeMismatch {
    fn new(value: Value, expected_type: Type) -> Self {
        Self {
            value,
            expected_type,
        }
    }
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Type error: {:?} :/: {}", self.value, self.expected_type)
    }
}

impl Error for TypeMismatch {}
