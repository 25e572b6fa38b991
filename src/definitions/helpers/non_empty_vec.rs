use std::ops::Deref;

use ciborium::Value;

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::{collect_all, Validated};

/// A vector holding at least one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyVec<T>(Vec<T>);

impl<T> NonEmptyVec<T> {
    pub fn new(t: T) -> Self {
        Self(vec![t])
    }

    pub fn maybe_new(v: Vec<T>) -> Option<Self> {
        Self::try_from(v).ok()
    }

    pub fn push(&mut self, t: T) {
        self.0.push(t)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }

    pub fn first(&self) -> &T {
        &self.0[0]
    }

    pub fn last(&self) -> &T {
        &self.0[self.0.len() - 1]
    }

    /// Keep the elements matching `predicate`, or `None` when nothing is left.
    pub fn filtered(&self, predicate: impl FnMut(&&T) -> bool) -> Option<Self>
    where
        T: Clone,
    {
        Self::maybe_new(self.0.iter().filter(predicate).cloned().collect())
    }
}

impl<T> TryFrom<Vec<T>> for NonEmptyVec<T> {
    type Error = Error;

    fn try_from(v: Vec<T>) -> Result<NonEmptyVec<T>, Error> {
        if v.is_empty() {
            return Err(Error::EmptyCollection("array"));
        }
        Ok(NonEmptyVec(v))
    }
}

impl<T> From<NonEmptyVec<T>> for Vec<T> {
    fn from(NonEmptyVec(v): NonEmptyVec<T>) -> Vec<T> {
        v
    }
}

impl<T> AsRef<[T]> for NonEmptyVec<T> {
    fn as_ref(&self) -> &[T] {
        &self.0
    }
}

impl<T> Deref for NonEmptyVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> IntoIterator for NonEmptyVec<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: FromCbor> FromCbor for NonEmptyVec<T> {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let items = collect_all(cbor::as_array(value)?.iter().map(T::from_cbor))?;
        Ok(Self::try_from(items)?)
    }
}

impl<T: ToCbor> ToCbor for NonEmptyVec<T> {
    fn to_cbor(&self) -> Value {
        Value::Array(self.0.iter().map(ToCbor::to_cbor).collect())
    }
}
