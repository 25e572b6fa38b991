use ciborium::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

const SIGNED: &str = "signed";
const VALID_FROM: &str = "validFrom";
const VALID_UNTIL: &str = "validUntil";
const EXPECTED_UPDATE: &str = "expectedUpdate";

/// Validity window of a mobile security object. Every date is known to encode as a tdate.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidityInfo {
    signed: OffsetDateTime,
    valid_from: OffsetDateTime,
    valid_until: OffsetDateTime,
    expected_update: Option<OffsetDateTime>,
    cbor: Value,
}

impl ValidityInfo {
    pub fn new(
        signed: OffsetDateTime,
        valid_from: OffsetDateTime,
        valid_until: OffsetDateTime,
        expected_update: Option<OffsetDateTime>,
    ) -> Result<Self, Error> {
        if valid_from > valid_until {
            return Err(Error::InvalidValidityInfo(format!(
                "validFrom {valid_from} is after validUntil {valid_until}"
            )));
        }
        let mut map = vec![
            (Value::Text(SIGNED.into()), datetime_to_cbor(&signed)?),
            (Value::Text(VALID_FROM.into()), datetime_to_cbor(&valid_from)?),
            (Value::Text(VALID_UNTIL.into()), datetime_to_cbor(&valid_until)?),
        ];
        if let Some(expected_update) = &expected_update {
            map.push((
                Value::Text(EXPECTED_UPDATE.into()),
                datetime_to_cbor(expected_update)?,
            ));
        }
        Ok(Self {
            signed,
            valid_from,
            valid_until,
            expected_update,
            cbor: Value::Map(map),
        })
    }

    pub fn signed(&self) -> OffsetDateTime {
        self.signed
    }

    pub fn valid_from(&self) -> OffsetDateTime {
        self.valid_from
    }

    pub fn valid_until(&self) -> OffsetDateTime {
        self.valid_until
    }

    pub fn expected_update(&self) -> Option<OffsetDateTime> {
        self.expected_update
    }

    /// Check that `at` falls inside the validity window.
    pub fn check(&self, at: OffsetDateTime) -> Result<(), Error> {
        if at < self.valid_from {
            return Err(Error::DocumentNotYetValid(self.valid_from.to_string()));
        }
        if at > self.valid_until {
            return Err(Error::DocumentExpired(self.valid_until.to_string()));
        }
        Ok(())
    }
}

fn cbor_to_datetime(value: &Value) -> Result<OffsetDateTime, Error> {
    match value {
        Value::Tag(cbor::TAG_TDATE, inner) => {
            let date = cbor::get_text(inner)?;
            OffsetDateTime::parse(date, &Rfc3339).map_err(|e| {
                Error::InvalidValidityInfo(format!("unable to parse '{date}' as an RFC 3339 date: {e}"))
            })
        }
        _ => Err(Error::CborWrongType {
            expected: "tdate (tag 0)",
            cbor: cbor::diagnostic(value),
        }),
    }
}

/// A tdate is in UTC, without fractional seconds.
fn datetime_to_cbor(datetime: &OffsetDateTime) -> Result<Value, Error> {
    let text = OffsetDateTime::from_unix_timestamp(datetime.unix_timestamp())
        .map_err(|e| Error::InvalidValidityInfo(format!("{datetime} has no UTC equivalent: {e}")))?
        .format(&Rfc3339)
        .map_err(|e| Error::InvalidValidityInfo(format!("unable to format {datetime} as a tdate: {e}")))?;
    Ok(Value::Tag(cbor::TAG_TDATE, Box::new(Value::Text(text))))
}

impl FromCbor for ValidityInfo {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (signed, valid_from, valid_until, expected_update) = crate::accumulate!(
            cbor::field(map, &cbor::text(SIGNED), cbor_to_datetime),
            cbor::field(map, &cbor::text(VALID_FROM), cbor_to_datetime),
            cbor::field(map, &cbor::text(VALID_UNTIL), cbor_to_datetime),
            cbor::opt_field(map, &cbor::text(EXPECTED_UPDATE), cbor_to_datetime),
        )?;
        Ok(Self::new(signed, valid_from, valid_until, expected_update)?)
    }
}

impl ToCbor for ValidityInfo {
    fn to_cbor(&self) -> Value {
        self.cbor.clone()
    }
}
