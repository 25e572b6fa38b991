//! Presentation of mdocs: the holder's [device] side and the verifier's [reader] side.
pub mod device;
pub mod reader;

pub use device::{respond, AuthenticatedMdoc, PreparedAuthentication};
pub use reader::{
    device_authentication, validate_issuer_data_authentication, verify_response,
    DocumentVerification, VerifiedClaims,
};
