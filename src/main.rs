use std::collections::BTreeMap;
use std::{fs, path::PathBuf};

use anyhow::{Context, Error};
use clap::Parser;
use clap_stdin::MaybeStdin;
use mdoc_core::definitions::x509::{
    CertificateWithDer, TrustChainValidator, ValidationOptions, X5Chain, X5ChainValidator,
};
use mdoc_core::definitions::DeviceResponse;
use mdoc_core::valid_mdoc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Print the namespaces and element identifiers of an mdoc.
    GetNamespaces {
        /// Base64url encoded mdoc CBOR (`{docType, issuerSigned}`).
        mdoc: MaybeStdin<String>,
    },
    /// Print the documents and element values of a device response, without verifying it.
    InspectResponse {
        /// Base64url encoded DeviceResponse.
        response: MaybeStdin<String>,
    },
    /// Validate a document signer cert against a root certificate.
    ValidateCerts {
        /// Path to PEM-encoded document signer cert.
        ds: PathBuf,
        /// Path to PEM-encoded IACA root cert.
        root: PathBuf,
    },
}

fn main() -> Result<(), Error> {
    match Args::parse().action {
        Action::GetNamespaces { mdoc } => print_namespaces(&mdoc),
        Action::InspectResponse { response } => inspect_response(&response),
        Action::ValidateCerts { ds, root } => validate_certs(ds, root),
    }
}

fn print_namespaces(mdoc: &str) -> Result<(), Error> {
    let bytes = base64::decode_config(mdoc.trim(), base64::URL_SAFE_NO_PAD)
        .context("mdoc is not base64url")?;
    let mdoc = valid_mdoc(&bytes).context("could not parse mdoc")?;
    let namespaces = mdoc
        .claims()
        .into_iter()
        .map(|(namespace, elements)| {
            (
                namespace.to_string(),
                elements.into_keys().map(String::from).collect(),
            )
        })
        .collect::<BTreeMap<String, Vec<String>>>();
    println!("{}", serde_json::to_string_pretty(&namespaces)?);
    Ok(())
}

fn inspect_response(response: &str) -> Result<(), Error> {
    let response = DeviceResponse::decode_from_base64url(response.trim())
        .context("could not parse device response")?;
    let documents = response
        .documents()
        .map(|document| {
            let namespaces = document
                .issuer_signed
                .namespaces
                .iter()
                .flat_map(|namespaces| namespaces.iter())
                .map(|(namespace, items)| {
                    let elements = items
                        .iter()
                        .map(|item| {
                            let item = item.as_ref();
                            (
                                item.element_identifier.to_string(),
                                item.element_value.to_json(),
                            )
                        })
                        .collect::<serde_json::Map<_, _>>();
                    (namespace.to_string(), serde_json::Value::Object(elements))
                })
                .collect::<serde_json::Map<_, _>>();
            (document.doc_type.to_string(), serde_json::Value::Object(namespaces))
        })
        .collect::<serde_json::Map<_, _>>();
    println!("status: {:?}", response.status);
    println!("{}", serde_json::to_string_pretty(&documents)?);
    Ok(())
}

fn validate_certs(ds: PathBuf, root: PathBuf) -> Result<(), Error> {
    let ds_bytes = fs::read(&ds).with_context(|| format!("could not read {}", ds.display()))?;
    let root_bytes =
        fs::read(&root).with_context(|| format!("could not read {}", root.display()))?;
    let x5chain = X5Chain::builder().with_pem_certificate(&ds_bytes)?.build()?;
    let validator = X5ChainValidator::new(
        vec![CertificateWithDer::from_pem(&root_bytes)?],
        ValidationOptions::default(),
    );
    if validator.is_trust_chain_valid(&x5chain) {
        println!("valid: {} issued by {}", x5chain.end_entity_common_name(), root.display());
        Ok(())
    } else {
        anyhow::bail!("{} is not trusted by {}", ds.display(), root.display())
    }
}
