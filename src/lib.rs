//! ISO/IEC 18013-5 mobile document (mdoc) data structures, issuance, and presentation.
//!
//! The holder side builds selectively disclosed, device-signed responses from an [Mdoc]; the
//! verifier side checks the issuer certificate chain, issuer signature, digests, validity window,
//! and device signature of every returned document. Both sides can run the BLE session
//! establishment and AES-256-GCM session encryption of ISO/IEC 18013-5 §9.1.1.
pub mod cbor;
pub mod cose;
pub mod crypto;
pub mod definitions;
pub mod error;
pub mod issuance;
pub mod mdoc;
pub mod presentation;
pub mod validated;

pub use error::{Error, Errors};
pub use mdoc::{valid_mdoc, Mdoc};
pub use validated::Validated;
