//! This module contains the definitions for the [DeviceEngagement] struct and related types.
//!
//! The [DeviceEngagement] is the out-of-band message (usually a QR code) a holder's device shows
//! to a reader. It carries the device's ephemeral key and the transports it can be reached on.
//! Only BLE retrieval is supported; any other retrieval method is rejected.
use ciborium::Value;
use coset::Label;
use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

use crate::cbor;
use crate::cose::EDeviceKey;
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::{collect_all, Validated};

pub type EDeviceKeyBytes = Tag24<EDeviceKey>;
pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;
pub type DeviceRetrievalMethods = NonEmptyVec<DeviceRetrievalMethod>;

pub const VERSION_1_0: &str = "1.0";
pub const VERSION_1_1: &str = "1.1";

/// The only cipher suite defined by ISO/IEC 18013-5.
pub const CIPHER_SUITE: u64 = 1;
/// Transport type of BLE retrieval.
pub const BLE_TRANSPORT_TYPE: i64 = 2;
/// Version of the device retrieval method structure.
pub const RETRIEVAL_METHOD_VERSION: i64 = 1;

const QR_CODE_URI_PREFIX: &str = "mdoc:";

/// Represents a device engagement.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceEngagement {
    /// The version of the device engagement.
    pub version: String,

    /// Cipher suite and ephemeral device key.
    pub security: Security,

    /// The transports the device can be reached on.
    pub device_retrieval_methods: Option<DeviceRetrievalMethods>,

    /// Origin information, kept as received.
    pub origin_infos: Option<Value>,

    /// Device capabilities, kept as received.
    pub capabilities: Option<Value>,
}

/// Cipher suite identifier and the `EDeviceKeyBytes`.
#[derive(Clone, Debug, PartialEq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceRetrievalMethod {
    /// Represents the BLE options for device engagement.
    BLE(BleOptions),
}

/// Represents the options for `Bluetooth Low Energy` (BLE) device engagement.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BleOptions {
    /// The peripheral server mode for `BLE` device engagement.
    pub peripheral_server_mode: Option<PeripheralServerMode>,

    /// The central client mode for `BLE` device engagement.
    pub central_client_mode: Option<CentralClientMode>,
}

/// Represents a peripheral server mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralServerMode {
    /// The 'UUID' of the peripheral server.
    pub uuid: Uuid,

    /// The 'BLE' device address of the peripheral server, if available.
    pub ble_device_address: Option<ByteStr>,
}

/// Represents the central client mode for device engagement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralClientMode {
    pub uuid: Uuid,
}

impl DeviceEngagement {
    /// A version 1.0 engagement offering the given retrieval methods.
    pub fn new(e_device_key: EDeviceKey, methods: DeviceRetrievalMethods) -> Result<Self, Error> {
        Ok(Self {
            version: VERSION_1_0.to_string(),
            security: Security(CIPHER_SUITE, Tag24::new(e_device_key)?),
            device_retrieval_methods: Some(methods),
            origin_infos: None,
            capabilities: None,
        })
    }

    /// Attach capabilities, which requires version 1.1.
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.version = VERSION_1_1.to_string();
        self.capabilities = Some(capabilities);
        self
    }

    pub fn e_device_key(&self) -> &EDeviceKey {
        self.security.1.as_ref()
    }

    pub fn e_device_key_bytes(&self) -> &EDeviceKeyBytes {
        &self.security.1
    }

    /// The BLE options of the first BLE retrieval method.
    pub fn ble_options(&self) -> Option<&BleOptions> {
        self.device_retrieval_methods
            .as_ref()
            .and_then(|methods| {
                methods.iter().find_map(|method| match method {
                    DeviceRetrievalMethod::BLE(options) => Some(options),
                })
            })
    }

    /// The BLE Ident characteristic value: `HKDF-SHA256(EDeviceKeyBytes, info = "BLEIdent")`.
    pub fn ble_ident(&self) -> Result<[u8; 16], Error> {
        let e_device_key_bytes = self.security.1.tagged_bytes()?;
        let mut ble_ident = [0u8; 16];
        Hkdf::<Sha256>::new(None, &e_device_key_bytes)
            .expand(b"BLEIdent", &mut ble_ident)
            .map_err(|e| Error::KeyAgreement(format!("unable to derive BLE ident: {e}")))?;
        Ok(ble_ident)
    }
}

impl Tag24<DeviceEngagement> {
    const BASE64_CONFIG: base64::Config = base64::URL_SAFE_NO_PAD;

    /// The `mdoc:` URI shown in a QR code.
    pub fn to_qr_code_uri(&self) -> String {
        let mut qr_code_uri = String::from(QR_CODE_URI_PREFIX);
        base64::encode_config_buf(self.inner_bytes(), Self::BASE64_CONFIG, &mut qr_code_uri);
        qr_code_uri
    }

    pub fn from_qr_code_uri(qr_code_uri: &str) -> Validated<Self> {
        let encoded = qr_code_uri
            .strip_prefix(QR_CODE_URI_PREFIX)
            .ok_or_else(|| Error::InvalidQrCode("missing 'mdoc:' prefix".to_string()))?;
        let decoded = base64::decode_config(encoded, Self::BASE64_CONFIG)
            .map_err(|e| Error::InvalidQrCode(e.to_string()))?;
        Tag24::from_bytes(decoded)
    }
}

/// Version 1.1 only announces that origin infos or capabilities may follow; none are required.
fn version(value: &Value) -> Result<String, Error> {
    match cbor::get_text(value)? {
        version @ (VERSION_1_0 | VERSION_1_1) => Ok(version.to_string()),
        version => Err(Error::UnsupportedVersion {
            structure: "device engagement",
            version: version.to_string(),
        }),
    }
}

impl FromCbor for Security {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let array = cbor::as_array(value)?;
        let cipher_suite = |value: &Value| -> Result<u64, Error> {
            let suite = cbor::get_int(value)?;
            if suite != i128::from(CIPHER_SUITE) {
                return Err(Error::UnsupportedCipherSuite(suite));
            }
            Ok(CIPHER_SUITE)
        };
        let (cipher_suite, e_device_key) = crate::accumulate!(
            cbor::get_by_index(array, 0).and_then(cipher_suite),
            cbor::get_by_index(array, 1)
                .map_err(Into::into)
                .and_then(EDeviceKeyBytes::from_cbor),
        )?;
        Ok(Self(cipher_suite, e_device_key))
    }
}

impl ToCbor for Security {
    fn to_cbor(&self) -> Value {
        Value::Array(vec![Value::Integer(self.0.into()), self.1.to_cbor()])
    }
}

impl FromCbor for DeviceEngagement {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let methods = |value: &Value| -> Validated<DeviceRetrievalMethods> {
            let methods = collect_all(
                cbor::as_array(value)?
                    .iter()
                    .map(DeviceRetrievalMethod::from_cbor),
            )?;
            Ok(NonEmptyVec::try_from(methods)?)
        };
        let (version, security, device_retrieval_methods) = crate::accumulate!(
            cbor::field(map, &Label::Int(0), version),
            cbor::get_by_label(map, &Label::Int(1))
                .map_err(Into::into)
                .and_then(Security::from_cbor),
            cbor::get_opt_by_label(map, &Label::Int(2))
                .map(methods)
                .transpose(),
        )?;
        Ok(Self {
            version,
            security,
            device_retrieval_methods,
            origin_infos: cbor::get_opt_by_label(map, &Label::Int(5)).cloned(),
            capabilities: cbor::get_opt_by_label(map, &Label::Int(6)).cloned(),
        })
    }
}

impl ToCbor for DeviceEngagement {
    fn to_cbor(&self) -> Value {
        let mut map = vec![
            (Value::Integer(0.into()), Value::Text(self.version.clone())),
            (Value::Integer(1.into()), self.security.to_cbor()),
        ];
        if let Some(methods) = &self.device_retrieval_methods {
            map.push((Value::Integer(2.into()), methods.to_cbor()));
        }
        if let Some(origin_infos) = &self.origin_infos {
            map.push((Value::Integer(5.into()), origin_infos.clone()));
        }
        if let Some(capabilities) = &self.capabilities {
            map.push((Value::Integer(6.into()), capabilities.clone()));
        }
        Value::Map(map)
    }
}

impl DeviceRetrievalMethod {
    pub fn version(&self) -> i64 {
        RETRIEVAL_METHOD_VERSION
    }

    pub fn transport_type(&self) -> i64 {
        match self {
            Self::BLE(_) => BLE_TRANSPORT_TYPE,
        }
    }
}

impl FromCbor for DeviceRetrievalMethod {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let array = cbor::as_array(value)?;
        let transport_type = |value: &Value| -> Result<(), Error> {
            let transport_type = cbor::get_int(value)?;
            if transport_type != i128::from(BLE_TRANSPORT_TYPE) {
                return Err(Error::InvalidTargetedConnection(transport_type));
            }
            Ok(())
        };
        let version = |value: &Value| -> Result<(), Error> {
            let version = cbor::get_int(value)?;
            if version != i128::from(RETRIEVAL_METHOD_VERSION) {
                return Err(Error::InvalidRetrievalVersion(version));
            }
            Ok(())
        };
        crate::accumulate!(
            cbor::get_by_index(array, 0).and_then(transport_type),
            cbor::get_by_index(array, 1).and_then(version),
        )?;
        let options = BleOptions::from_cbor(cbor::get_by_index(array, 2)?)?;
        Ok(Self::BLE(options))
    }
}

impl ToCbor for DeviceRetrievalMethod {
    fn to_cbor(&self) -> Value {
        let options = match self {
            Self::BLE(options) => options.to_cbor(),
        };
        Value::Array(vec![
            Value::Integer(self.transport_type().into()),
            Value::Integer(self.version().into()),
            options,
        ])
    }
}

fn uuid(value: &Value) -> Result<Uuid, Error> {
    let bytes = cbor::get_byte_string(value)?;
    Uuid::from_slice(bytes).map_err(|_| Error::CborWrongType {
        expected: "16 byte UUID",
        cbor: cbor::diagnostic(value),
    })
}

impl FromCbor for BleOptions {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let peripheral_server_mode = || -> Result<Option<PeripheralServerMode>, Error> {
            if !cbor::field(map, &Label::Int(0), cbor::get_bool)? {
                return Ok(None);
            }
            Ok(Some(PeripheralServerMode {
                uuid: cbor::field(map, &Label::Int(10), uuid)?,
                ble_device_address: cbor::opt_field(map, &Label::Int(20), |v| {
                    cbor::get_byte_string(v).map(|bytes| ByteStr::from(bytes.to_vec()))
                })?,
            }))
        };
        let central_client_mode = || -> Result<Option<CentralClientMode>, Error> {
            if !cbor::field(map, &Label::Int(1), cbor::get_bool)? {
                return Ok(None);
            }
            Ok(Some(CentralClientMode {
                uuid: cbor::field(map, &Label::Int(11), uuid)?,
            }))
        };
        let (peripheral_server_mode, central_client_mode) =
            crate::accumulate!(peripheral_server_mode(), central_client_mode())?;
        Ok(Self {
            peripheral_server_mode,
            central_client_mode,
        })
    }
}

impl ToCbor for BleOptions {
    fn to_cbor(&self) -> Value {
        let mut map = vec![
            (
                Value::Integer(0.into()),
                Value::Bool(self.peripheral_server_mode.is_some()),
            ),
            (
                Value::Integer(1.into()),
                Value::Bool(self.central_client_mode.is_some()),
            ),
        ];
        if let Some(mode) = &self.peripheral_server_mode {
            map.push((
                Value::Integer(10.into()),
                Value::Bytes(mode.uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(mode) = &self.central_client_mode {
            map.push((
                Value::Integer(11.into()),
                Value::Bytes(mode.uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(address) = self
            .peripheral_server_mode
            .as_ref()
            .and_then(|mode| mode.ble_device_address.as_ref())
        {
            map.push((Value::Integer(20.into()), address.to_cbor()));
        }
        Value::Map(map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{EphemeralKeyPair, KeyAgreement};

    const EXAMPLE_QR_CODE: &str = "mdoc:owBjMS4wAYIB2BhYS6QBAiABIVgglyWXuAyJ6iRNc8OlYXenvkJt23rJPdtIhlawXqr-yf0iWCC1GQSH8tIwTYVwha_ZoPL20_saYXrGIbrCm133H0ki-QKBgwIBowD1AfQKUH2RiuAEbUVzrsrOiUnSPDw";

    fn ble_method(transport_type: i64, version: i64) -> Value {
        Value::Array(vec![
            Value::Integer(transport_type.into()),
            Value::Integer(version.into()),
            Value::Map(vec![
                (Value::Integer(0.into()), Value::Bool(false)),
                (Value::Integer(1.into()), Value::Bool(false)),
            ]),
        ])
    }

    #[test]
    fn decodes_a_qr_code_engagement() {
        let engagement = DeviceEngagementBytes::from_qr_code_uri(EXAMPLE_QR_CODE).unwrap();
        let device_engagement = engagement.as_ref();
        assert_eq!(device_engagement.version, VERSION_1_0);
        assert_eq!(device_engagement.security.0, CIPHER_SUITE);
        let ble = device_engagement.ble_options().unwrap();
        assert!(ble.central_client_mode.is_none());
        assert!(ble.peripheral_server_mode.is_some());
        assert_eq!(
            device_engagement.to_cbor_bytes().unwrap(),
            engagement.inner_bytes()
        );
        assert_eq!(engagement.to_qr_code_uri(), EXAMPLE_QR_CODE);
    }

    #[test]
    fn qr_code_needs_the_mdoc_scheme() {
        let uri = EXAMPLE_QR_CODE.replace("mdoc:", "https:");
        let errors = DeviceEngagementBytes::from_qr_code_uri(&uri).unwrap_err();
        assert!(matches!(errors.first(), Some(Error::InvalidQrCode(_))));
    }

    #[test]
    fn only_ble_retrieval_is_accepted() {
        assert!(DeviceRetrievalMethod::from_cbor(&ble_method(2, 1)).is_ok());
        assert_eq!(
            DeviceRetrievalMethod::from_cbor(&ble_method(1, 1))
                .unwrap_err()
                .into_vec(),
            vec![Error::InvalidTargetedConnection(1)]
        );
        assert_eq!(
            DeviceRetrievalMethod::from_cbor(&ble_method(2, 2))
                .unwrap_err()
                .into_vec(),
            vec![Error::InvalidRetrievalVersion(2)]
        );
        assert_eq!(
            DeviceRetrievalMethod::from_cbor(&ble_method(3, 0))
                .unwrap_err()
                .len(),
            2
        );
    }

    #[test]
    fn version_follows_optional_fields() {
        let key = EphemeralKeyPair::generate().public_key().unwrap();
        let methods = NonEmptyVec::new(DeviceRetrievalMethod::BLE(BleOptions {
            peripheral_server_mode: None,
            central_client_mode: Some(CentralClientMode {
                uuid: Uuid::new_v4(),
            }),
        }));
        let engagement = DeviceEngagement::new(key, methods).unwrap();
        assert_eq!(engagement.version, VERSION_1_0);
        let decoded = DeviceEngagement::from_cbor(&engagement.to_cbor()).unwrap();
        assert_eq!(decoded, engagement);

        let engagement = engagement.with_capabilities(Value::Map(vec![]));
        assert_eq!(engagement.version, VERSION_1_1);
    }

    #[test]
    fn version_1_1_needs_no_optional_fields() {
        let key = EphemeralKeyPair::generate().public_key().unwrap();
        let Value::Map(mut map) = DeviceEngagement::new(
            key,
            NonEmptyVec::new(DeviceRetrievalMethod::from_cbor(&ble_method(2, 1)).unwrap()),
        )
        .unwrap()
        .to_cbor() else {
            panic!("device engagement is a map")
        };
        map[0].1 = Value::Text(VERSION_1_1.into());
        let decoded = DeviceEngagement::from_cbor(&Value::Map(map.clone())).unwrap();
        assert_eq!(decoded.version, VERSION_1_1);
        assert!(decoded.origin_infos.is_none());
        assert!(decoded.capabilities.is_none());
        assert_eq!(decoded.to_cbor(), Value::Map(map.clone()));

        map[0].1 = Value::Text("1.2".into());
        assert_eq!(
            DeviceEngagement::from_cbor(&Value::Map(map)).unwrap_err().into_vec(),
            vec![Error::UnsupportedVersion {
                structure: "device engagement",
                version: "1.2".to_string()
            }]
        );
    }

    #[test]
    fn ble_ident_is_derived_from_the_device_key() {
        let engagement = DeviceEngagementBytes::from_qr_code_uri(EXAMPLE_QR_CODE).unwrap();
        let ident = engagement.as_ref().ble_ident().unwrap();
        assert_eq!(ident, engagement.as_ref().ble_ident().unwrap());
        assert_ne!(ident, [0u8; 16]);
    }
}
