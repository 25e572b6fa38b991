//! Composition of fallible validation steps.
//!
//! Two operators are used, chosen per call site:
//! - [zip], [collect_all] and the [accumulate!](crate::accumulate) macro combine independent
//!   results and keep every failure;
//! - the `?` operator (or [Result::and_then]) stops at the first failure of a step that later
//!   steps depend on.
use crate::error::Errors;

/// Result of a validation that may report several failures at once.
pub type Validated<T> = Result<T, Errors>;

/// Combine two independent results, collecting the failures of both.
pub fn zip<A, B, E1, E2>(a: Result<A, E1>, b: Result<B, E2>) -> Validated<(A, B)>
where
    E1: Into<Errors>,
    E2: Into<Errors>,
{
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(a), Err(b)) => {
            let mut errors: Errors = a.into();
            errors.extend(b.into());
            Err(errors)
        }
        (Err(e), Ok(_)) => Err(e.into()),
        (Ok(_), Err(e)) => Err(e.into()),
    }
}

/// Validate every item, returning all values or every failure.
pub fn collect_all<T, E, I>(results: I) -> Validated<Vec<T>>
where
    I: IntoIterator<Item = Result<T, E>>,
    E: Into<Errors>,
{
    let mut values = Vec::new();
    let mut errors: Option<Errors> = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => match errors.as_mut() {
                Some(errors) => errors.extend(e.into()),
                None => errors = Some(e.into()),
            },
        }
    }
    match errors {
        Some(errors) => Err(errors),
        None => Ok(values),
    }
}

/// Combine independent results into a tuple, collecting the failures of all of them.
///
/// ```
/// use mdoc_core::{accumulate, error::Error};
///
/// let a: Result<u8, Error> = Err(Error::UnsupportedKeyType(3));
/// let b: Result<u8, Error> = Ok(1);
/// let c: Result<u8, Error> = Err(Error::UnsupportedCurve(2));
/// let errors = accumulate!(a, b, c).unwrap_err();
/// assert_eq!(errors.len(), 2);
/// ```
#[macro_export]
macro_rules! accumulate {
    ($a:expr, $b:expr $(,)?) => {
        $crate::validated::zip($a, $b)
    };
    ($a:expr, $b:expr, $c:expr $(,)?) => {
        $crate::validated::zip($crate::validated::zip($a, $b), $c).map(|((a, b), c)| (a, b, c))
    };
    ($a:expr, $b:expr, $c:expr, $d:expr $(,)?) => {
        $crate::validated::zip($crate::accumulate!($a, $b, $c), $d)
            .map(|((a, b, c), d)| (a, b, c, d))
    };
    ($a:expr, $b:expr, $c:expr, $d:expr, $e:expr $(,)?) => {
        $crate::validated::zip($crate::accumulate!($a, $b, $c, $d), $e)
            .map(|((a, b, c, d), e)| (a, b, c, d, e))
    };
    ($a:expr, $b:expr, $c:expr, $d:expr, $e:expr, $f:expr $(,)?) => {
        $crate::validated::zip($crate::accumulate!($a, $b, $c, $d, $e), $f)
            .map(|((a, b, c, d, e), f)| (a, b, c, d, e, f))
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    #[test]
    fn collect_all_keeps_every_failure() {
        let results = vec![
            Ok(1),
            Err(Error::InvalidRandom(4)),
            Ok(2),
            Err(Error::InvalidRandom(8)),
        ];
        let errors = collect_all(results).unwrap_err();
        assert_eq!(
            errors.into_vec(),
            vec![Error::InvalidRandom(4), Error::InvalidRandom(8)]
        );
    }

    #[test]
    fn accumulate_succeeds_when_every_part_does() {
        let a: Result<u8, Error> = Ok(1);
        let b: Validated<&str> = Ok("b");
        let c: Result<bool, Error> = Ok(true);
        let d: Result<u64, Error> = Ok(4);
        assert_eq!(accumulate!(a, b, c, d).unwrap(), (1, "b", true, 4));
    }

    #[test]
    fn accumulate_mixes_single_and_collected_failures() {
        let a: Validated<u8> = Err(Errors::from(Error::UnsupportedCurve(2)));
        let b: Result<u8, Error> = Err(Error::UnsupportedKeyType(3));
        let errors = accumulate!(a, b).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(|e| matches!(e, Error::UnsupportedKeyType(3))));
    }
}
