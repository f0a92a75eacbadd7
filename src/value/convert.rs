//! Conversion between [`Value`] and ordinary Rust types.
//!
//! Three ways to hook a type into the conversion layer, mirroring how
//! the rest of this crate hand-writes `serde` impls rather than
//! deriving them:
//!
//! - **Intrusive**: implement [`ToValue`]/[`FromValue`] directly on the
//!   type.
//! - **Free-function / split form**: when a type can't carry the impl
//!   (it's foreign, or read and write are naturally asymmetric — e.g. a
//!   builder that only ever writes), wrap a pair of plain functions in
//!   a [`Converter`].
//! - **Visitor form**: [`ObjectVisitor`]/[`ArrayVisitor`] let a type
//!   describe itself as a named-field object or a positional tuple
//!   without writing the `Value` plumbing by hand.

use crate::error::{Error, MiscErrorKind};

use super::{Dict, List, Value};

pub trait ToValue {
    fn to_value(&self) -> Value;
}

pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

fn conversion_error() -> Error {
    Error::misc(MiscErrorKind::InvalidArgument)
}

macro_rules! primitive_conversion {
    ($ty:ty, $variant:ident) => {
        impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::$variant((*self).into())
            }
        }

        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, Error> {
                match value {
                    Value::$variant(v) => Ok((*v).into()),
                    _ => Err(conversion_error()),
                }
            }
        }
    };
}

primitive_conversion!(bool, Bool);
primitive_conversion!(i64, Int);
primitive_conversion!(u64, UInt);
primitive_conversion!(f64, Float);

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(conversion_error()),
        }
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            _ => Err(conversion_error()),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::List(l) => l.iter().map(T::from_value).collect(),
            _ => Err(conversion_error()),
        }
    }
}

/// An index-visitor: describes `Self` as a fixed-arity positional
/// sequence (like a tuple), for `Value::List` conversion.
pub trait ArrayVisitor: Sized {
    fn to_elements(&self) -> List;
    fn from_elements(elements: &[Value]) -> Result<Self, Error>;
}

/// A field-visitor: describes `Self` as a set of named fields, for
/// `Value::Dict` conversion. Decoding ignores unknown keys and fails
/// with a `conversion` error ([`MiscErrorKind::InvalidArgument`]) only
/// when a required field is missing.
pub trait ObjectVisitor: Sized {
    fn to_fields(&self) -> Dict;
    fn from_fields(fields: &Dict) -> Result<Self, Error>;
}

/// Looks up a required field in an [`ObjectVisitor::from_fields`]
/// implementation, converting it through [`FromValue`].
pub fn required_field<T: FromValue>(fields: &Dict, name: &str) -> Result<T, Error> {
    match fields.get(name) {
        Some(value) => T::from_value(value),
        None => Err(conversion_error()),
    }
}

/// Looks up an optional field, yielding `None` on a missing key rather
/// than a conversion error.
pub fn optional_field<T: FromValue>(fields: &Dict, name: &str) -> Result<Option<T>, Error> {
    match fields.get(name) {
        Some(value) => T::from_value(value).map(Some),
        None => Ok(None),
    }
}

/// The split/free-function conversion form: wraps a pair of plain
/// functions (rather than a trait impl) so a foreign type — or a type
/// whose read and write directions are naturally asymmetric — can still
/// participate in the conversion layer.
pub struct Converter<T> {
    to_value: fn(&T) -> Value,
    from_value: fn(&Value) -> Result<T, Error>,
}

impl<T> Converter<T> {
    pub fn new(to_value: fn(&T) -> Value, from_value: fn(&Value) -> Result<T, Error>) -> Self {
        Converter {
            to_value,
            from_value,
        }
    }

    pub fn to_value(&self, t: &T) -> Value {
        (self.to_value)(t)
    }

    pub fn from_value(&self, value: &Value) -> Result<T, Error> {
        (self.from_value)(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Point {
        x: i64,
        y: i64,
    }

    impl ArrayVisitor for Point {
        fn to_elements(&self) -> List {
            vec![Value::Int(self.x), Value::Int(self.y)]
        }

        fn from_elements(elements: &[Value]) -> Result<Point, Error> {
            if elements.len() != 2 {
                return Err(conversion_error());
            }
            Ok(Point {
                x: i64::from_value(&elements[0])?,
                y: i64::from_value(&elements[1])?,
            })
        }
    }

    struct Named {
        name: String,
        age: Option<i64>,
    }

    impl ObjectVisitor for Named {
        fn to_fields(&self) -> Dict {
            let mut fields = Dict::new();
            fields.insert("name".to_string(), self.name.to_value());
            if let Some(age) = self.age {
                fields.insert("age".to_string(), age.to_value());
            }
            fields
        }

        fn from_fields(fields: &Dict) -> Result<Named, Error> {
            Ok(Named {
                name: required_field(fields, "name")?,
                age: optional_field(fields, "age")?,
            })
        }
    }

    #[test]
    fn primitive_roundtrip() {
        assert_eq!(i64::from_value(&42i64.to_value()).unwrap(), 42);
        assert_eq!(bool::from_value(&true.to_value()).unwrap(), true);
    }

    #[test]
    fn array_visitor_roundtrip() {
        let point = Point { x: 3, y: -4 };
        let elements = point.to_elements();
        let back = Point::from_elements(&elements).unwrap();
        assert_eq!((back.x, back.y), (3, -4));
        assert!(Point::from_elements(&[Value::Int(1)]).is_err());
    }

    #[test]
    fn option_roundtrip_via_null() {
        let none: Option<i64> = None;
        assert_eq!(none.to_value(), Value::Null);
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
    }

    #[test]
    fn object_visitor_missing_required_field_errors() {
        let fields = Dict::new();
        assert!(Named::from_fields(&fields).is_err());
    }

    #[test]
    fn object_visitor_ignores_unknown_keys() {
        let mut fields = Dict::new();
        fields.insert("name".to_string(), Value::String("a".to_string()));
        fields.insert("extra".to_string(), Value::Bool(true));
        let named = Named::from_fields(&fields).unwrap();
        assert_eq!(named.name, "a");
        assert_eq!(named.age, None);
    }

    #[test]
    fn free_function_form() {
        let converter: Converter<Point> = Converter::new(
            |p| Value::List(vec![Value::Int(p.x), Value::Int(p.y)]),
            |v| match v {
                Value::List(l) if l.len() == 2 => Ok(Point {
                    x: i64::from_value(&l[0])?,
                    y: i64::from_value(&l[1])?,
                }),
                _ => Err(conversion_error()),
            },
        );
        let value = converter.to_value(&Point { x: 1, y: 2 });
        let back = converter.from_value(&value).unwrap();
        assert_eq!((back.x, back.y), (1, 2));
    }
}
