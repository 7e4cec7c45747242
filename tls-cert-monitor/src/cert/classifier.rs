//! Pure classification rules applied to every parsed certificate.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Issuer taxonomy codes exposed through the `ssl_cert_issuer_code` metric.
pub(crate) const ISSUER_CODE_DIGICERT: u8 = 30;
pub(crate) const ISSUER_CODE_AMAZON: u8 = 31;
pub(crate) const ISSUER_CODE_OTHER: u8 = 32;
pub(crate) const ISSUER_CODE_SELF_SIGNED: u8 = 33;

const DIGICERT_FAMILY: &[&str] = &["digicert", "rapidssl", "geotrust", "thawte", "verisign", "symantec"];
const AMAZON_FAMILY: &[&str] = &["amazon", "aws", "acm"];
const INTERNAL_KEYWORDS: &[&str] =
	&["self-signed", "self signed", "localhost", "internal", "enterprise", "corporate", "private"];
const INTERNAL_COMMON_NAMES: &[&str] = &["localhost", "*.example.com", "test"];

/// SHA-256 over the exact DER encoding; the identity used for duplicate
/// detection.
pub(crate) fn fingerprint_sha256(der: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(der);
	hex::encode(hasher.finalize())
}

/// RSA/DSA below 2048 bits and EC below 256 bits are considered weak.
/// Unknown algorithms are never flagged.
pub(crate) fn is_weak_key(public_key_algorithm: &str, key_size_bits: u32) -> bool {
	match public_key_algorithm {
		"RSA" | "DSA" => key_size_bits < 2048,
		"EC" => key_size_bits < 256,
		_ => false,
	}
}

/// Signature algorithms from the MD2/MD4/MD5/SHA1 families, including the
/// DSA-SHA1 and ECDSA-SHA1 combinations.
pub(crate) fn is_deprecated_sig(sig_algorithm: &str) -> bool {
	let lower = sig_algorithm.to_ascii_lowercase();
	["md2", "md4", "md5", "sha1"].iter().any(|family| lower.contains(family))
}

pub(crate) fn is_expired(not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
	now > not_after
}

pub(crate) fn is_self_signed(subject: &str, issuer: &str) -> bool {
	subject == issuer
}

/// Maps a certificate onto the issuer taxonomy. Precedence when several
/// rules match: self-signed/internal (33), then DigiCert family (30), then
/// Amazon family (31), then other (32).
pub(crate) fn issuer_code(subject: &str, issuer: &str, issuer_common_name: &str) -> u8 {
	let issuer_lower = issuer.to_ascii_lowercase();

	if is_self_signed(subject, issuer)
		|| INTERNAL_KEYWORDS.iter().any(|kw| issuer_lower.contains(kw))
		|| INTERNAL_COMMON_NAMES.iter().any(|cn| issuer_common_name.eq_ignore_ascii_case(cn))
	{
		return ISSUER_CODE_SELF_SIGNED;
	}
	if DIGICERT_FAMILY.iter().any(|kw| issuer_lower.contains(kw)) {
		return ISSUER_CODE_DIGICERT;
	}
	if AMAZON_FAMILY.iter().any(|kw| issuer_lower.contains(kw)) {
		return ISSUER_CODE_AMAZON;
	}
	ISSUER_CODE_OTHER
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn weak_key_thresholds() {
		assert!(is_weak_key("RSA", 1024));
		assert!(is_weak_key("RSA", 2047));
		assert!(!is_weak_key("RSA", 2048));
		assert!(is_weak_key("DSA", 1024));
		assert!(is_weak_key("EC", 224));
		assert!(!is_weak_key("EC", 256));
		assert!(!is_weak_key("EC", 384));
		// Unknown algorithms are never weak, whatever the size says.
		assert!(!is_weak_key("Ed25519", 0));
		assert!(!is_weak_key("unknown", 0));
	}

	#[test]
	fn deprecated_signature_families() {
		assert!(is_deprecated_sig("md5WithRSAEncryption"));
		assert!(is_deprecated_sig("sha1WithRSAEncryption"));
		assert!(is_deprecated_sig("dsa-with-SHA1"));
		assert!(is_deprecated_sig("ecdsa-with-SHA1"));
		assert!(is_deprecated_sig("md2WithRSAEncryption"));
		assert!(!is_deprecated_sig("sha256WithRSAEncryption"));
		assert!(!is_deprecated_sig("ecdsa-with-SHA384"));
		assert!(!is_deprecated_sig("ed25519"));
	}

	#[test]
	fn issuer_taxonomy_families() {
		assert_eq!(issuer_code("CN=a", "CN=DigiCert Global Root CA", "DigiCert Global Root CA"), 30);
		assert_eq!(issuer_code("CN=a", "CN=RapidSSL TLS CA", "RapidSSL TLS CA"), 30);
		assert_eq!(issuer_code("CN=a", "CN=Amazon RSA 2048 M02", "Amazon RSA 2048 M02"), 31);
		assert_eq!(issuer_code("CN=a", "CN=AWS Certificate Manager", "AWS Certificate Manager"), 31);
		assert_eq!(issuer_code("CN=a", "CN=Let's Encrypt R11", "Let's Encrypt R11"), 32);
		assert_eq!(issuer_code("CN=a", "CN=GlobalSign RSA CA", "GlobalSign RSA CA"), 32);
		assert_eq!(issuer_code("CN=a", "CN=Sectigo Limited", "Sectigo Limited"), 32);
	}

	#[test]
	fn issuer_taxonomy_self_signed_and_internal() {
		// subject == issuer always wins.
		assert_eq!(issuer_code("CN=box", "CN=box", "box"), 33);
		assert_eq!(issuer_code("CN=a", "CN=Corporate Internal CA", "Corporate Internal CA"), 33);
		assert_eq!(issuer_code("CN=a", "CN=self-signed", "self-signed"), 33);
		assert_eq!(issuer_code("CN=a", "O=Acme, CN=localhost", "localhost"), 33);
		assert_eq!(issuer_code("CN=a", "O=Acme, CN=test", "test"), 33);
		assert_eq!(issuer_code("CN=a", "O=Acme, CN=*.example.com", "*.example.com"), 33);
	}

	#[test]
	fn issuer_taxonomy_precedence() {
		// Internal keyword beats a DigiCert-family match.
		assert_eq!(issuer_code("CN=a", "CN=Internal DigiCert CA", "Internal DigiCert CA"), 33);
		// DigiCert family beats Amazon family.
		assert_eq!(issuer_code("CN=a", "CN=Amazon DigiCert Joint CA", "x"), 30);
		// Substring matching is intentional, per the taxonomy rule.
		assert_eq!(issuer_code("CN=a", "CN=Pacman CA", "Pacman CA"), 31);
	}

	#[test]
	fn fingerprint_is_hex_sha256_of_der() {
		let fp = fingerprint_sha256(b"not really der");
		assert_eq!(fp.len(), 64);
		assert_eq!(fp, fingerprint_sha256(b"not really der"));
		assert_ne!(fp, fingerprint_sha256(b"other bytes"));
	}
}
