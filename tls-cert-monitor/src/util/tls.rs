// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Optional server-side TLS. Enabled only when both a certificate and a key
//! path are configured. TLS 1.2 is the floor; the ring provider negotiates
//! AEAD suites only, so no weak CBC suite can ever be offered.

use std::fs;
use std::path::Path;

use tokio_rustls::rustls::pki_types::{
	CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use tokio_rustls::rustls::{version, ServerConfig};

/// Loads the rustls server configuration from the configured PEM files.
pub(crate) fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, String> {
	let cert_pem = fs::read_to_string(cert_path).map_err(|e| {
		format!("Failed to read TLS certificate file '{}': {}", cert_path.display(), e)
	})?;
	let key_pem = fs::read_to_string(key_path)
		.map_err(|e| format!("Failed to read TLS key file '{}': {}", key_path.display(), e))?;

	let certs = parse_pem_certs(&cert_pem)?;
	if certs.is_empty() {
		return Err("No certificates found in certificate file".to_string());
	}
	let key = parse_pem_private_key(&key_pem)?;

	ServerConfig::builder_with_protocol_versions(&[&version::TLS13, &version::TLS12])
		.with_no_client_auth()
		.with_single_cert(certs, key)
		.map_err(|e| format!("Failed to build TLS server config: {}", e))
}

/// Parses a PEM-encoded certificate file and returns the DER-encoded
/// certificates.
fn parse_pem_certs(pem_data: &str) -> Result<Vec<CertificateDer<'static>>, String> {
	let blocks = pem::parse_many(pem_data.as_bytes())
		.map_err(|e| format!("Failed to parse certificate PEM: {}", e))?;
	Ok(blocks
		.into_iter()
		.filter(|block| block.tag() == "CERTIFICATE")
		.map(|block| CertificateDer::from(block.into_contents()))
		.collect())
}

/// Parses a PEM-encoded private key file; PKCS#8, PKCS#1 and SEC1 keys are
/// accepted.
fn parse_pem_private_key(pem_data: &str) -> Result<PrivateKeyDer<'static>, String> {
	let blocks = pem::parse_many(pem_data.as_bytes())
		.map_err(|e| format!("Failed to parse private key PEM: {}", e))?;
	for block in blocks {
		let key = match block.tag() {
			"PRIVATE KEY" => {
				PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents()))
			},
			"RSA PRIVATE KEY" => {
				PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(block.into_contents()))
			},
			"EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(block.into_contents())),
			_ => continue,
		};
		return Ok(key);
	}
	Err("No private key found in key file".to_string())
}
