//! Validated string identifiers: document types, namespaces and data element identifiers.
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use ciborium::Value;
use serde::Serialize;

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self, Error> {
                if s.is_empty() {
                    return Err(Error::EmptyIdentifier { kind: $kind });
                }
                Ok(Self(s))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(s: &str) -> Result<Self, Error> {
                Self::try_from(s.to_string())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                Self::try_from(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl FromCbor for $name {
            fn from_cbor(value: &Value) -> Validated<Self> {
                Ok(Self::try_from(cbor::get_text(value)?)?)
            }
        }

        impl ToCbor for $name {
            fn to_cbor(&self) -> Value {
                Value::Text(self.0.clone())
            }
        }
    };
}

identifier!(
    /// Document type, e.g. `org.iso.18013.5.1.mDL`.
    DocType,
    "document type"
);

identifier!(
    /// Namespace grouping data elements, e.g. `org.iso.18013.5.1`.
    NameSpace,
    "namespace"
);

identifier!(
    /// Identifier of a single data element within a namespace.
    ElementIdentifier,
    "element identifier"
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert_eq!(
            DocType::try_from(""),
            Err(Error::EmptyIdentifier {
                kind: "document type"
            })
        );
        let errors = NameSpace::from_cbor(&Value::Text(String::new())).unwrap_err();
        assert_eq!(
            errors.first(),
            Some(&Error::EmptyIdentifier { kind: "namespace" })
        );
    }

    #[test]
    fn identifiers_must_be_text() {
        let errors = ElementIdentifier::from_cbor(&Value::Integer(1.into())).unwrap_err();
        assert!(matches!(errors.first(), Some(Error::CborWrongType { .. })));
    }
}
