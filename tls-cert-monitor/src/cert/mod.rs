pub(crate) mod classifier;
pub(crate) mod parser;

use chrono::{DateTime, Utc};

/// A single parsed certificate, normalized across PEM/DER/PKCS#12 inputs.
///
/// `source_path` is the absolute path of the file the certificate came from;
/// certificates extracted from a multi-certificate bundle carry a `#<index>`
/// suffix so every record has a unique key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CertificateRecord {
	pub source_path: String,
	pub subject: String,
	pub issuer: String,
	pub common_name: String,
	pub serial: String,
	pub sig_algorithm: String,
	pub public_key_algorithm: String,
	pub key_size_bits: u32,
	pub not_before: DateTime<Utc>,
	pub not_after: DateTime<Utc>,
	pub san_count: u32,
	pub san_dns: Vec<String>,
	pub fingerprint_sha256: String,
	pub weak_key: bool,
	pub deprecated_sig: bool,
	pub expired: bool,
	pub self_signed: bool,
	pub issuer_code: u8,
}

impl CertificateRecord {
	/// The basename of the underlying file, without any `#<index>` suffix.
	pub fn file_name(&self) -> &str {
		let path = self.source_path.rsplit_once('#').map_or(self.source_path.as_str(), |(p, _)| p);
		path.rsplit('/').next().unwrap_or(path)
	}
}

/// How a file's bytes were recognized by the parser.
#[derive(Debug)]
pub(crate) enum ParsedFile {
	/// One record per `CERTIFICATE` block found in a PEM file.
	PemBatch(Vec<CertificateRecord>),
	/// A whole-file DER certificate.
	DerSingle(Box<CertificateRecord>),
	/// All certificates contained in a PKCS#12 bundle, leaf first.
	Pkcs12Batch(Vec<CertificateRecord>),
}

impl ParsedFile {
	pub fn into_records(self) -> Vec<CertificateRecord> {
		match self {
			ParsedFile::PemBatch(records) | ParsedFile::Pkcs12Batch(records) => records,
			ParsedFile::DerSingle(record) => vec![*record],
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ParseErrorKind {
	Empty,
	Pem,
	Der,
	Pkcs12,
	Unrecognized,
}

impl std::fmt::Display for ParseErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			ParseErrorKind::Empty => "empty",
			ParseErrorKind::Pem => "pem",
			ParseErrorKind::Der => "der",
			ParseErrorKind::Pkcs12 => "pkcs12",
			ParseErrorKind::Unrecognized => "unrecognized",
		};
		write!(f, "{}", name)
	}
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} parse failure: {detail}")]
pub(crate) struct ParseError {
	pub kind: ParseErrorKind,
	pub detail: String,
}

impl ParseError {
	pub fn new(kind: ParseErrorKind, detail: impl Into<String>) -> Self {
		Self { kind, detail: detail.into() }
	}
}
