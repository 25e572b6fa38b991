//! This module contains the definitions related to device signing.
//!
//! The [DeviceSigned] struct holds the elements the device itself returns and the proof that
//! the holder controls the key bound into the mobile security object. The device signs the
//! [DeviceAuthentication] structure as a detached payload.
use ciborium::Value;

use crate::cbor;
use crate::cose::CoseSign1;
use crate::definitions::element::Element;
use crate::definitions::helpers::Tag24;
use crate::definitions::identifiers::{DocType, ElementIdentifier, NameSpace};
use crate::definitions::session::SessionTranscript;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::{collect_all, Validated};

pub type DeviceSignedItems = Vec<(ElementIdentifier, Element)>;
pub type DeviceNameSpacesBytes = Tag24<DeviceNameSpaces>;

/// Device-signed elements per namespace, in wire order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceNameSpaces(Vec<(NameSpace, DeviceSignedItems)>);

impl DeviceNameSpaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NameSpace, &DeviceSignedItems)> {
        self.0.iter().map(|(namespace, items)| (namespace, items))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn device_signed_items(value: &Value) -> Validated<DeviceSignedItems> {
    let items = collect_all(cbor::as_map(value)?.iter().map(|(id, element)| {
        crate::accumulate!(ElementIdentifier::from_cbor(id), Element::from_cbor(element))
    }))?;
    if items.is_empty() {
        return Err(Error::EmptyCollection("device signed items").into());
    }
    Ok(items)
}

impl FromCbor for DeviceNameSpaces {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let namespaces = collect_all(cbor::as_map(value)?.iter().map(|(namespace, items)| {
            crate::accumulate!(NameSpace::from_cbor(namespace), device_signed_items(items))
        }))?;
        Ok(Self(namespaces))
    }
}

impl ToCbor for DeviceNameSpaces {
    fn to_cbor(&self) -> Value {
        Value::Map(
            self.0
                .iter()
                .map(|(namespace, items)| {
                    (
                        namespace.to_cbor(),
                        Value::Map(
                            items
                                .iter()
                                .map(|(id, element)| (id.to_cbor(), element.to_cbor()))
                                .collect(),
                        ),
                    )
                })
                .collect(),
        )
    }
}

/// Device authentication; only the ECDSA variant is supported.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceAuth {
    DeviceSignature(CoseSign1),
}

impl DeviceAuth {
    pub fn device_signature(&self) -> &CoseSign1 {
        match self {
            DeviceAuth::DeviceSignature(cose_sign1) => cose_sign1,
        }
    }
}

impl FromCbor for DeviceAuth {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        if let Some(signature) = cbor::get_opt_by_label(map, &cbor::text("deviceSignature")) {
            return Ok(DeviceAuth::DeviceSignature(CoseSign1::from_cbor(signature)?));
        }
        if cbor::get_opt_by_label(map, &cbor::text("deviceMac")).is_some() {
            return Err(Error::UnsupportedDeviceAuth("deviceMac").into());
        }
        Err(Error::CborFieldNotFound {
            label: "deviceSignature".to_string(),
        }
        .into())
    }
}

impl ToCbor for DeviceAuth {
    fn to_cbor(&self) -> Value {
        match self {
            DeviceAuth::DeviceSignature(cose_sign1) => Value::Map(vec![(
                Value::Text("deviceSignature".into()),
                cose_sign1.to_cbor(),
            )]),
        }
    }
}

/// `["DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes]`
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceAuthentication {
    pub session_transcript: SessionTranscript,
    pub doc_type: DocType,
    pub namespaces_bytes: DeviceNameSpacesBytes,
}

impl DeviceAuthentication {
    const CONTEXT: &'static str = "DeviceAuthentication";

    pub fn new(
        session_transcript: SessionTranscript,
        doc_type: DocType,
        namespaces_bytes: DeviceNameSpacesBytes,
    ) -> Self {
        Self {
            session_transcript,
            doc_type,
            namespaces_bytes,
        }
    }

    /// The `DeviceAuthenticationBytes`, i.e. the detached payload of the device signature.
    pub fn bytes(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(&cbor::wrap_tag24(self.to_cbor_bytes()?))
    }
}

impl ToCbor for DeviceAuthentication {
    fn to_cbor(&self) -> Value {
        Value::Array(vec![
            Value::Text(Self::CONTEXT.to_string()),
            self.session_transcript.to_cbor(),
            self.doc_type.to_cbor(),
            self.namespaces_bytes.to_cbor(),
        ])
    }
}

/// Represents a device-signed structure.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSigned {
    pub namespaces: DeviceNameSpacesBytes,
    pub device_auth: DeviceAuth,
}

impl FromCbor for DeviceSigned {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (namespaces, device_auth) = crate::accumulate!(
            cbor::decode_field::<DeviceNameSpacesBytes>(map, "nameSpaces"),
            cbor::decode_field::<DeviceAuth>(map, "deviceAuth"),
        )?;
        Ok(Self {
            namespaces,
            device_auth,
        })
    }
}

impl ToCbor for DeviceSigned {
    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::Text("nameSpaces".into()), self.namespaces.to_cbor()),
            (Value::Text("deviceAuth".into()), self.device_auth.to_cbor()),
        ])
    }
}
