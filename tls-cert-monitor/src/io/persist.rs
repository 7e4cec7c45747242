// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! On-disk cache format.
//!
//! Layout: magic `TLSCM\0`, a one-byte version, a big-endian entry count,
//! then per entry the path (u16 length prefix), the staleness keys, the
//! insertion time, and a length-prefixed record blob. Records are encoded as
//! tag-length-value fields so later versions can add fields without breaking
//! this reader; unknown tags are skipped.
//!
//! Writers always write `cache.tmp` and rename it over `cache.bin`.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::cert::CertificateRecord;
use crate::io::cache::CacheEntry;

const MAGIC: &[u8; 6] = b"TLSCM\0";
const VERSION: u8 = 1;

pub(crate) const CACHE_FILE: &str = "cache.bin";
const CACHE_TMP_FILE: &str = "cache.tmp";

const TAG_SOURCE_PATH: u8 = 1;
const TAG_SUBJECT: u8 = 2;
const TAG_ISSUER: u8 = 3;
const TAG_COMMON_NAME: u8 = 4;
const TAG_SERIAL: u8 = 5;
const TAG_SIG_ALGORITHM: u8 = 6;
const TAG_PUBLIC_KEY_ALGORITHM: u8 = 7;
const TAG_KEY_SIZE_BITS: u8 = 8;
const TAG_NOT_BEFORE: u8 = 9;
const TAG_NOT_AFTER: u8 = 10;
const TAG_SAN_COUNT: u8 = 11;
const TAG_SAN_DNS: u8 = 12;
const TAG_FINGERPRINT: u8 = 13;
const TAG_FLAGS: u8 = 14;
const TAG_ISSUER_CODE: u8 = 15;

const FLAG_WEAK_KEY: u8 = 1 << 0;
const FLAG_DEPRECATED_SIG: u8 = 1 << 1;
const FLAG_EXPIRED: u8 = 1 << 2;
const FLAG_SELF_SIGNED: u8 = 1 << 3;

#[derive(Debug, thiserror::Error)]
pub(crate) enum CacheFileError {
	#[error("cache file I/O: {0}")]
	Io(#[from] io::Error),
	#[error("cache file format: {0}")]
	Format(String),
}

/// Serializes the given entries to `<cache_dir>/cache.bin` via a temp file
/// and an atomic rename.
pub(crate) fn save(cache_dir: &Path, entries: &[(String, CacheEntry)]) -> Result<(), CacheFileError> {
	fs::create_dir_all(cache_dir)?;

	let mut buf = Vec::with_capacity(4096);
	buf.extend_from_slice(MAGIC);
	buf.push(VERSION);
	let count = u32::try_from(entries.len())
		.map_err(|_| CacheFileError::Format("too many cache entries".to_string()))?;
	buf.extend_from_slice(&count.to_be_bytes());

	for (path, entry) in entries {
		let path_len = u16::try_from(path.len())
			.map_err(|_| CacheFileError::Format(format!("path too long: {}", path)))?;
		buf.extend_from_slice(&path_len.to_be_bytes());
		buf.extend_from_slice(path.as_bytes());
		buf.extend_from_slice(&entry.mtime_ns.to_be_bytes());
		buf.extend_from_slice(&entry.size_bytes.to_be_bytes());
		buf.extend_from_slice(&entry.inserted_at_ns.to_be_bytes());

		let records = encode_records(&entry.records);
		let record_len = u32::try_from(records.len())
			.map_err(|_| CacheFileError::Format("record blob too large".to_string()))?;
		buf.extend_from_slice(&record_len.to_be_bytes());
		buf.extend_from_slice(&records);
	}

	let tmp_path = cache_dir.join(CACHE_TMP_FILE);
	fs::write(&tmp_path, &buf)?;
	fs::rename(&tmp_path, cache_dir.join(CACHE_FILE))?;
	Ok(())
}

/// Reads `<cache_dir>/cache.bin`. A missing file yields an empty set; a
/// corrupt or version-mismatched file is an error the caller downgrades to
/// a warning.
pub(crate) fn load(cache_dir: &Path) -> Result<Vec<(String, CacheEntry)>, CacheFileError> {
	let path = cache_dir.join(CACHE_FILE);
	let bytes = match fs::read(&path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(e) => return Err(e.into()),
	};

	let mut reader = Reader::new(&bytes);
	if reader.take(MAGIC.len())? != MAGIC.as_slice() {
		return Err(CacheFileError::Format("bad magic".to_string()));
	}
	let version = reader.take_u8()?;
	if version != VERSION {
		return Err(CacheFileError::Format(format!("unsupported version {}", version)));
	}
	let count = reader.take_u32()? as usize;

	let mut entries = Vec::with_capacity(count.min(4096));
	for _ in 0..count {
		let path_len = reader.take_u16()? as usize;
		let path = String::from_utf8(reader.take(path_len)?.to_vec())
			.map_err(|_| CacheFileError::Format("path is not UTF-8".to_string()))?;
		let mtime_ns = reader.take_u64()?;
		let size_bytes = reader.take_u64()?;
		let inserted_at_ns = reader.take_u64()?;
		let record_len = reader.take_u32()? as usize;
		let records = decode_records(reader.take(record_len)?)?;
		entries.push((path, CacheEntry { mtime_ns, size_bytes, inserted_at_ns, records }));
	}
	Ok(entries)
}

fn encode_records(records: &[CertificateRecord]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(256 * records.len() + 2);
	buf.extend_from_slice(&(records.len() as u16).to_be_bytes());
	for record in records {
		let encoded = encode_record(record);
		buf.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
		buf.extend_from_slice(&encoded);
	}
	buf
}

fn decode_records(bytes: &[u8]) -> Result<Vec<CertificateRecord>, CacheFileError> {
	let mut reader = Reader::new(bytes);
	let count = reader.take_u16()? as usize;
	let mut records = Vec::with_capacity(count.min(256));
	for _ in 0..count {
		let len = reader.take_u32()? as usize;
		records.push(decode_record(reader.take(len)?)?);
	}
	Ok(records)
}

fn push_tlv(buf: &mut Vec<u8>, tag: u8, value: &[u8]) {
	buf.push(tag);
	buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
	buf.extend_from_slice(value);
}

fn encode_record(record: &CertificateRecord) -> Vec<u8> {
	let mut buf = Vec::with_capacity(256);
	push_tlv(&mut buf, TAG_SOURCE_PATH, record.source_path.as_bytes());
	push_tlv(&mut buf, TAG_SUBJECT, record.subject.as_bytes());
	push_tlv(&mut buf, TAG_ISSUER, record.issuer.as_bytes());
	push_tlv(&mut buf, TAG_COMMON_NAME, record.common_name.as_bytes());
	push_tlv(&mut buf, TAG_SERIAL, record.serial.as_bytes());
	push_tlv(&mut buf, TAG_SIG_ALGORITHM, record.sig_algorithm.as_bytes());
	push_tlv(&mut buf, TAG_PUBLIC_KEY_ALGORITHM, record.public_key_algorithm.as_bytes());
	push_tlv(&mut buf, TAG_KEY_SIZE_BITS, &record.key_size_bits.to_be_bytes());
	push_tlv(&mut buf, TAG_NOT_BEFORE, &record.not_before.timestamp().to_be_bytes());
	push_tlv(&mut buf, TAG_NOT_AFTER, &record.not_after.timestamp().to_be_bytes());
	push_tlv(&mut buf, TAG_SAN_COUNT, &record.san_count.to_be_bytes());
	for name in &record.san_dns {
		push_tlv(&mut buf, TAG_SAN_DNS, name.as_bytes());
	}
	push_tlv(&mut buf, TAG_FINGERPRINT, record.fingerprint_sha256.as_bytes());
	let mut flags = 0u8;
	if record.weak_key {
		flags |= FLAG_WEAK_KEY;
	}
	if record.deprecated_sig {
		flags |= FLAG_DEPRECATED_SIG;
	}
	if record.expired {
		flags |= FLAG_EXPIRED;
	}
	if record.self_signed {
		flags |= FLAG_SELF_SIGNED;
	}
	push_tlv(&mut buf, TAG_FLAGS, &[flags]);
	push_tlv(&mut buf, TAG_ISSUER_CODE, &[record.issuer_code]);
	buf
}

fn decode_record(bytes: &[u8]) -> Result<CertificateRecord, CacheFileError> {
	let mut reader = Reader::new(bytes);
	let epoch = DateTime::<Utc>::UNIX_EPOCH;
	let mut record = CertificateRecord {
		source_path: String::new(),
		subject: String::new(),
		issuer: String::new(),
		common_name: String::new(),
		serial: String::new(),
		sig_algorithm: String::new(),
		public_key_algorithm: String::new(),
		key_size_bits: 0,
		not_before: epoch,
		not_after: epoch,
		san_count: 0,
		san_dns: Vec::new(),
		fingerprint_sha256: String::new(),
		weak_key: false,
		deprecated_sig: false,
		expired: false,
		self_signed: false,
		issuer_code: 0,
	};

	while !reader.is_empty() {
		let tag = reader.take_u8()?;
		let len = reader.take_u32()? as usize;
		let value = reader.take(len)?;
		match tag {
			TAG_SOURCE_PATH => record.source_path = take_string(value)?,
			TAG_SUBJECT => record.subject = take_string(value)?,
			TAG_ISSUER => record.issuer = take_string(value)?,
			TAG_COMMON_NAME => record.common_name = take_string(value)?,
			TAG_SERIAL => record.serial = take_string(value)?,
			TAG_SIG_ALGORITHM => record.sig_algorithm = take_string(value)?,
			TAG_PUBLIC_KEY_ALGORITHM => record.public_key_algorithm = take_string(value)?,
			TAG_KEY_SIZE_BITS => record.key_size_bits = take_u32(value)?,
			TAG_NOT_BEFORE => record.not_before = take_timestamp(value)?,
			TAG_NOT_AFTER => record.not_after = take_timestamp(value)?,
			TAG_SAN_COUNT => record.san_count = take_u32(value)?,
			TAG_SAN_DNS => record.san_dns.push(take_string(value)?),
			TAG_FINGERPRINT => record.fingerprint_sha256 = take_string(value)?,
			TAG_FLAGS => {
				let flags = *value.first().ok_or_else(|| {
					CacheFileError::Format("empty flags field".to_string())
				})?;
				record.weak_key = flags & FLAG_WEAK_KEY != 0;
				record.deprecated_sig = flags & FLAG_DEPRECATED_SIG != 0;
				record.expired = flags & FLAG_EXPIRED != 0;
				record.self_signed = flags & FLAG_SELF_SIGNED != 0;
			},
			TAG_ISSUER_CODE => {
				record.issuer_code = *value.first().ok_or_else(|| {
					CacheFileError::Format("empty issuer code field".to_string())
				})?;
			},
			// Unknown tags come from newer writers; skip them.
			_ => {},
		}
	}
	Ok(record)
}

fn take_string(value: &[u8]) -> Result<String, CacheFileError> {
	String::from_utf8(value.to_vec())
		.map_err(|_| CacheFileError::Format("field is not UTF-8".to_string()))
}

fn take_u32(value: &[u8]) -> Result<u32, CacheFileError> {
	let arr: [u8; 4] = value
		.try_into()
		.map_err(|_| CacheFileError::Format("bad u32 field length".to_string()))?;
	Ok(u32::from_be_bytes(arr))
}

fn take_timestamp(value: &[u8]) -> Result<DateTime<Utc>, CacheFileError> {
	let arr: [u8; 8] = value
		.try_into()
		.map_err(|_| CacheFileError::Format("bad timestamp field length".to_string()))?;
	let secs = i64::from_be_bytes(arr);
	Ok(DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
}

struct Reader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	fn is_empty(&self) -> bool {
		self.pos >= self.bytes.len()
	}

	fn take(&mut self, len: usize) -> Result<&'a [u8], CacheFileError> {
		let end = self
			.pos
			.checked_add(len)
			.filter(|end| *end <= self.bytes.len())
			.ok_or_else(|| CacheFileError::Format("truncated cache file".to_string()))?;
		let slice = &self.bytes[self.pos..end];
		self.pos = end;
		Ok(slice)
	}

	fn take_u8(&mut self) -> Result<u8, CacheFileError> {
		Ok(self.take(1)?[0])
	}

	fn take_u16(&mut self) -> Result<u16, CacheFileError> {
		Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("length checked")))
	}

	fn take_u32(&mut self) -> Result<u32, CacheFileError> {
		Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("length checked")))
	}

	fn take_u64(&mut self) -> Result<u64, CacheFileError> {
		Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("length checked")))
	}
}
