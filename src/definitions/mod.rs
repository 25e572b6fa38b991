pub mod device_engagement;
pub mod device_request;
pub mod device_response;
pub mod device_signed;
pub mod element;
pub mod helpers;
pub mod identifiers;
pub mod issuer_signed;
pub mod mso;
pub mod session;
pub mod traits;
pub mod validity_info;
pub mod x509;

pub use device_engagement::{
    BleOptions, DeviceEngagement, DeviceEngagementBytes, DeviceRetrievalMethod, Security,
};
pub use device_request::{DeviceRequest, DocRequest, ItemsRequest, RequestedElements};
pub use device_response::{DeviceResponse, Document, Status};
pub use device_signed::{DeviceAuth, DeviceAuthentication, DeviceNameSpaces, DeviceSigned};
pub use element::Element;
pub use identifiers::{DocType, ElementIdentifier, NameSpace};
pub use issuer_signed::{IssuerAuth, IssuerNameSpaces, IssuerSigned, IssuerSignedItem};
pub use mso::{DeviceKeyInfo, DigestAlgorithm, DigestId, DigestIds, MobileSecurityObject};
pub use session::{
    Handover, SessionData, SessionEncryption, SessionEstablishment, SessionKeys, SessionMessage,
    SessionTranscript,
};
pub use validity_info::ValidityInfo;
