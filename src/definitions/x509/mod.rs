mod util;
pub mod validation;
pub mod x5chain;

pub use validation::{TrustChainValidator, ValidationOptions, X5ChainValidator};
pub use x5chain::{Builder, CertificateWithDer, X5Chain};
