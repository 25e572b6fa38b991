//! Issuance of mdocs: digesting element values, building the mobile security object and
//! signing it, either directly or through a remote signer.
pub mod mdoc;

pub use mdoc::{Builder, Namespaces, PreparedMdoc};
