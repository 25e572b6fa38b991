//! The holder's response: presented documents and per-element or per-document errors.
use ciborium::Value;

use crate::cbor;
use crate::definitions::device_signed::DeviceSigned;
use crate::definitions::helpers::NonEmptyVec;
use crate::definitions::identifiers::{DocType, ElementIdentifier, NameSpace};
use crate::definitions::issuer_signed::IssuerSigned;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::{collect_all, Validated};

pub type Documents = NonEmptyVec<Document>;
pub type DocumentErrors = Vec<(DocType, DocumentErrorCode)>;
/// Elements that were requested but not returned, per namespace.
pub type ElementErrors = Vec<(NameSpace, Vec<(ElementIdentifier, DocumentErrorCode)>)>;

/// Represents a device response.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceResponse {
    pub version: String,
    pub documents: Option<Documents>,
    pub document_errors: Option<DocumentErrors>,
    pub status: Status,
}

/// Represents a document.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub doc_type: DocType,
    pub issuer_signed: IssuerSigned,
    pub device_signed: DeviceSigned,
    pub errors: Option<ElementErrors>,
    key_order: cbor::KeyOrder,
}

impl Document {
    pub fn new(
        doc_type: DocType,
        issuer_signed: IssuerSigned,
        device_signed: DeviceSigned,
        errors: Option<ElementErrors>,
    ) -> Self {
        Self {
            doc_type,
            issuer_signed,
            device_signed,
            errors,
            key_order: cbor::KeyOrder::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentErrorCode {
    DataNotReturned,
    ApplicationSpecific(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    OK = 0,
    GeneralError = 10,
    CborDecodingError = 11,
    CborValidationError = 12,
}

impl DeviceResponse {
    pub const VERSION: &'static str = "1.0";

    /// A successful response holding exactly `document`.
    pub fn build_device_response(document: Document) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            documents: Some(NonEmptyVec::new(document)),
            document_errors: None,
            status: Status::OK,
        }
    }

    /// Base64url (unpadded) encoding of the CBOR response, as carried over web transports.
    pub fn encode_to_base64url(&self) -> Result<String, Error> {
        Ok(base64::encode_config(
            self.to_cbor_bytes()?,
            base64::URL_SAFE_NO_PAD,
        ))
    }

    pub fn decode_from_base64url(encoded: &str) -> Validated<Self> {
        let bytes = base64::decode_config(encoded, base64::URL_SAFE_NO_PAD)
            .map_err(|e| Error::Base64(e.to_string()))?;
        Self::from_cbor_bytes(&bytes)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().flat_map(|documents| documents.iter())
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(status: u64) -> Result<Self, Error> {
        match status {
            0 => Ok(Status::OK),
            10 => Ok(Status::GeneralError),
            11 => Ok(Status::CborDecodingError),
            12 => Ok(Status::CborValidationError),
            _ => Err(Error::CborWrongType {
                expected: "device response status 0, 10, 11 or 12",
                cbor: status.to_string(),
            }),
        }
    }
}

impl FromCbor for Status {
    fn from_cbor(value: &Value) -> Validated<Self> {
        Ok(Status::try_from(cbor::get_uint(value)?)?)
    }
}

impl ToCbor for Status {
    fn to_cbor(&self) -> Value {
        Value::Integer((*self as u64).into())
    }
}

impl FromCbor for DocumentErrorCode {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let code = cbor::get_int(value)?;
        match code {
            0 => Ok(DocumentErrorCode::DataNotReturned),
            _ => i64::try_from(code)
                .map(DocumentErrorCode::ApplicationSpecific)
                .map_err(|_| {
                    Error::CborNotANumber {
                        cbor: code.to_string(),
                    }
                    .into()
                }),
        }
    }
}

impl ToCbor for DocumentErrorCode {
    fn to_cbor(&self) -> Value {
        match self {
            DocumentErrorCode::DataNotReturned => Value::Integer(0.into()),
            DocumentErrorCode::ApplicationSpecific(code) => Value::Integer((*code).into()),
        }
    }
}

fn version(value: &Value) -> Result<String, Error> {
    let version = cbor::get_text(value)?;
    if version != DeviceResponse::VERSION {
        return Err(Error::UnsupportedVersion {
            structure: "device response",
            version: version.to_string(),
        });
    }
    Ok(version.to_string())
}

fn document_errors(value: &Value) -> Validated<DocumentErrors> {
    // documentErrors is an array of single-entry maps.
    let errors = collect_all(cbor::as_array(value)?.iter().map(|entry| {
        collect_all(cbor::as_map(entry)?.iter().map(|(doc_type, code)| {
            crate::accumulate!(DocType::from_cbor(doc_type), DocumentErrorCode::from_cbor(code))
        }))
    }))?;
    Ok(errors.into_iter().flatten().collect())
}

fn element_errors(value: &Value) -> Validated<ElementErrors> {
    collect_all(cbor::as_map(value)?.iter().map(|(namespace, elements)| {
        let elements = cbor::as_map(elements).map_err(Into::into).and_then(|map| {
            collect_all(map.iter().map(|(id, code)| {
                crate::accumulate!(
                    ElementIdentifier::from_cbor(id),
                    DocumentErrorCode::from_cbor(code)
                )
            }))
        });
        crate::accumulate!(NameSpace::from_cbor(namespace), elements)
    }))
}

impl FromCbor for DeviceResponse {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (version, documents, document_errors, status) = crate::accumulate!(
            cbor::field(map, &cbor::text("version"), version),
            cbor::decode_opt_field::<Documents>(map, "documents"),
            cbor::get_opt_by_label(map, &cbor::text("documentErrors"))
                .map(document_errors)
                .transpose(),
            cbor::decode_field::<Status>(map, "status"),
        )?;
        Ok(Self {
            version,
            documents,
            document_errors,
            status,
        })
    }
}

impl ToCbor for DeviceResponse {
    fn to_cbor(&self) -> Value {
        let mut map = vec![(Value::Text("version".into()), Value::Text(self.version.clone()))];
        if let Some(documents) = &self.documents {
            map.push((Value::Text("documents".into()), documents.to_cbor()));
        }
        if let Some(document_errors) = &self.document_errors {
            let errors = document_errors
                .iter()
                .map(|(doc_type, code)| Value::Map(vec![(doc_type.to_cbor(), code.to_cbor())]))
                .collect();
            map.push((Value::Text("documentErrors".into()), Value::Array(errors)));
        }
        map.push((Value::Text("status".into()), self.status.to_cbor()));
        Value::Map(map)
    }
}

impl FromCbor for Document {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (doc_type, issuer_signed, device_signed, errors) = crate::accumulate!(
            cbor::decode_field::<DocType>(map, "docType"),
            cbor::decode_field::<IssuerSigned>(map, "issuerSigned"),
            cbor::decode_field::<DeviceSigned>(map, "deviceSigned"),
            cbor::get_opt_by_label(map, &cbor::text("errors"))
                .map(element_errors)
                .transpose(),
        )?;
        Ok(Self {
            doc_type,
            issuer_signed,
            device_signed,
            errors,
            key_order: cbor::KeyOrder::of(map),
        })
    }
}

impl ToCbor for Document {
    fn to_cbor(&self) -> Value {
        let mut map = vec![
            ("docType", self.doc_type.to_cbor()),
            ("issuerSigned", self.issuer_signed.to_cbor()),
            ("deviceSigned", self.device_signed.to_cbor()),
        ];
        if let Some(errors) = &self.errors {
            let errors = errors
                .iter()
                .map(|(namespace, elements)| {
                    (
                        namespace.to_cbor(),
                        Value::Map(
                            elements
                                .iter()
                                .map(|(id, code)| (id.to_cbor(), code.to_cbor()))
                                .collect(),
                        ),
                    )
                })
                .collect();
            map.push(("errors", Value::Map(errors)));
        }
        self.key_order.map(map)
    }
}
