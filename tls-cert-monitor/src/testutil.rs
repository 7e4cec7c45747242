//! Certificate fixture generation for tests.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509, X509NameBuilder};

fn build_cert(
	key: &PKey<Private>, cn: &str, days: u32, digest: MessageDigest, sans: &[&str],
) -> X509 {
	let mut name = X509NameBuilder::new().unwrap();
	name.append_entry_by_text("CN", cn).unwrap();
	let name = name.build();

	let mut builder = X509::builder().unwrap();
	builder.set_version(2).unwrap();
	let serial = {
		let mut bn = BigNum::new().unwrap();
		bn.rand(63, MsbOption::MAYBE_ZERO, false).unwrap();
		bn.to_asn1_integer().unwrap()
	};
	builder.set_serial_number(&serial).unwrap();
	builder.set_subject_name(&name).unwrap();
	builder.set_issuer_name(&name).unwrap();
	builder.set_pubkey(key).unwrap();
	let not_before = Asn1Time::days_from_now(0).unwrap();
	builder.set_not_before(&not_before).unwrap();
	let not_after = Asn1Time::days_from_now(days).unwrap();
	builder.set_not_after(&not_after).unwrap();

	if !sans.is_empty() {
		let mut san = SubjectAlternativeName::new();
		for entry in sans {
			san.dns(entry);
		}
		let ext = san.build(&builder.x509v3_context(None, None)).unwrap();
		builder.append_extension(ext).unwrap();
	}

	builder.sign(key, digest).unwrap();
	builder.build()
}

pub(crate) fn make_rsa_cert(cn: &str, bits: u32, days: u32) -> (X509, PKey<Private>) {
	let key = PKey::from_rsa(Rsa::generate(bits).unwrap()).unwrap();
	let cert = build_cert(&key, cn, days, MessageDigest::sha256(), &[]);
	(cert, key)
}

/// RSA-1024 signed with MD5: weak key and deprecated signature in one cert.
pub(crate) fn make_weak_md5_cert_pem(cn: &str) -> String {
	let key = PKey::from_rsa(Rsa::generate(1024).unwrap()).unwrap();
	let cert = build_cert(&key, cn, 30, MessageDigest::md5(), &[]);
	cert_pem(&cert)
}

pub(crate) fn make_ec_cert_pem(cn: &str, sans: &[&str]) -> String {
	let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
	let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
	let cert = build_cert(&key, cn, 30, MessageDigest::sha256(), sans);
	cert_pem(&cert)
}

pub(crate) fn make_p12(
	cert: &X509, key: &PKey<Private>, chain: &[&X509], password: &str,
) -> Vec<u8> {
	let mut builder = openssl::pkcs12::Pkcs12::builder();
	builder.name("test");
	builder.pkey(key);
	builder.cert(cert);
	if !chain.is_empty() {
		let mut stack = Stack::new().unwrap();
		for entry in chain {
			stack.push((*entry).clone()).unwrap();
		}
		builder.ca(stack);
	}
	builder.build2(password).unwrap().to_der().unwrap()
}

pub(crate) fn cert_pem(cert: &X509) -> String {
	String::from_utf8(cert.to_pem().unwrap()).unwrap()
}

pub(crate) fn key_pem(key: &PKey<Private>) -> String {
	String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap()
}
