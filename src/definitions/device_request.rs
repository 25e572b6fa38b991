//! The reader's request for data elements.
use std::collections::BTreeMap;

use ciborium::Value;

use crate::cbor;
use crate::cose::CoseSign1;
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::identifiers::{DocType, ElementIdentifier, NameSpace};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::{collect_all, Validated};

pub type ItemsRequestBytes = Tag24<ItemsRequest>;
pub type IntentToRetain = bool;
pub type DataElements = Vec<(ElementIdentifier, IntentToRetain)>;
pub type ReaderAuth = CoseSign1;

/// Element identifiers requested per namespace.
pub type RequestedElements = BTreeMap<NameSpace, Vec<ElementIdentifier>>;

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceRequest {
    pub version: String,
    pub doc_requests: NonEmptyVec<DocRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DocRequest {
    pub items_request: ItemsRequestBytes,
    pub reader_auth: Option<ReaderAuth>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ItemsRequest {
    pub doc_type: DocType,
    pub namespaces: Vec<(NameSpace, DataElements)>,
    pub request_info: Option<Value>,
}

impl DeviceRequest {
    pub const VERSION: &'static str = "1.0";

    pub fn new(doc_requests: NonEmptyVec<DocRequest>) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            doc_requests,
        }
    }

    /// The items requested for `doc_type`, if any.
    pub fn items_request(&self, doc_type: &DocType) -> Option<&ItemsRequest> {
        self.doc_requests
            .iter()
            .map(|doc_request| doc_request.items_request.as_ref())
            .find(|items_request| &items_request.doc_type == doc_type)
    }
}

impl DocRequest {
    pub fn new(items_request: ItemsRequest) -> Result<Self, Error> {
        Ok(Self {
            items_request: Tag24::new(items_request)?,
            reader_auth: None,
        })
    }
}

impl ItemsRequest {
    /// Request `elements` without intent to retain.
    pub fn new(doc_type: DocType, elements: &RequestedElements) -> Self {
        let namespaces = elements
            .iter()
            .filter(|(_, identifiers)| !identifiers.is_empty())
            .map(|(namespace, identifiers)| {
                (
                    namespace.clone(),
                    identifiers.iter().map(|id| (id.clone(), false)).collect(),
                )
            })
            .collect();
        Self {
            doc_type,
            namespaces,
            request_info: None,
        }
    }

    pub fn requested_elements(&self) -> RequestedElements {
        self.namespaces
            .iter()
            .map(|(namespace, elements)| {
                (
                    namespace.clone(),
                    elements.iter().map(|(id, _)| id.clone()).collect(),
                )
            })
            .collect()
    }
}

fn version(value: &Value) -> Result<String, Error> {
    let version = cbor::get_text(value)?;
    if version != DeviceRequest::VERSION {
        return Err(Error::UnsupportedVersion {
            structure: "device request",
            version: version.to_string(),
        });
    }
    Ok(version.to_string())
}

impl FromCbor for DeviceRequest {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (version, doc_requests) = crate::accumulate!(
            cbor::field(map, &cbor::text("version"), version),
            cbor::decode_field::<NonEmptyVec<DocRequest>>(map, "docRequests"),
        )?;
        Ok(Self {
            version,
            doc_requests,
        })
    }
}

impl ToCbor for DeviceRequest {
    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::Text("version".into()), Value::Text(self.version.clone())),
            (Value::Text("docRequests".into()), self.doc_requests.to_cbor()),
        ])
    }
}

impl FromCbor for DocRequest {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (items_request, reader_auth) = crate::accumulate!(
            cbor::decode_field::<ItemsRequestBytes>(map, "itemsRequest"),
            cbor::decode_opt_field::<ReaderAuth>(map, "readerAuth"),
        )?;
        Ok(Self {
            items_request,
            reader_auth,
        })
    }
}

impl ToCbor for DocRequest {
    fn to_cbor(&self) -> Value {
        let mut map = vec![(
            Value::Text("itemsRequest".into()),
            self.items_request.to_cbor(),
        )];
        if let Some(reader_auth) = &self.reader_auth {
            map.push((Value::Text("readerAuth".into()), reader_auth.to_cbor()));
        }
        Value::Map(map)
    }
}

fn data_elements(value: &Value) -> Validated<DataElements> {
    let elements = collect_all(cbor::as_map(value)?.iter().map(|(id, intent)| {
        crate::accumulate!(ElementIdentifier::from_cbor(id), cbor::get_bool(intent))
    }))?;
    if elements.is_empty() {
        return Err(Error::EmptyCollection("requested data elements").into());
    }
    Ok(elements)
}

fn namespaces(value: &Value) -> Validated<Vec<(NameSpace, DataElements)>> {
    let namespaces = collect_all(cbor::as_map(value)?.iter().map(|(namespace, elements)| {
        crate::accumulate!(NameSpace::from_cbor(namespace), data_elements(elements))
    }))?;
    if namespaces.is_empty() {
        return Err(Error::EmptyCollection("requested namespaces").into());
    }
    Ok(namespaces)
}

impl FromCbor for ItemsRequest {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (doc_type, namespaces) = crate::accumulate!(
            cbor::decode_field::<DocType>(map, "docType"),
            cbor::get_by_label(map, &cbor::text("nameSpaces"))
                .map_err(Into::into)
                .and_then(namespaces),
        )?;
        Ok(Self {
            doc_type,
            namespaces,
            request_info: cbor::get_opt_by_label(map, &cbor::text("requestInfo")).cloned(),
        })
    }
}

impl ToCbor for ItemsRequest {
    fn to_cbor(&self) -> Value {
        let namespaces = self
            .namespaces
            .iter()
            .map(|(namespace, elements)| {
                (
                    namespace.to_cbor(),
                    Value::Map(
                        elements
                            .iter()
                            .map(|(id, intent)| (id.to_cbor(), Value::Bool(*intent)))
                            .collect(),
                    ),
                )
            })
            .collect();
        let mut map = vec![
            (Value::Text("docType".into()), self.doc_type.to_cbor()),
            (Value::Text("nameSpaces".into()), Value::Map(namespaces)),
        ];
        if let Some(request_info) = &self.request_info {
            map.push((Value::Text("requestInfo".into()), request_info.clone()));
        }
        Value::Map(map)
    }
}
