// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RFC 5389 BINDING messages.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::error::{Result, StunError};

pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;
pub const HEADER_LEN: usize = 20;

pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_SUCCESS: u16 = 0x0101;

pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
pub const ATTR_USERNAME: u16 = 0x0006;
pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
pub const ATTR_PRIORITY: u16 = 0x0024;
pub const ATTR_USE_CANDIDATE: u16 = 0x0025;
pub const ATTR_SOFTWARE: u16 = 0x8022;
pub const ATTR_FINGERPRINT: u16 = 0x8028;

const FINGERPRINT_XOR: u32 = 0x5354_554E;
const FINGERPRINT_ATTR_LEN: usize = 8;
const MAX_SOFTWARE_LEN: usize = 127;

const ADDR_FAMILY_IPV4: u8 = 0x01;
const ADDR_FAMILY_IPV6: u8 = 0x02;

pub type TransactionId = [u8; 12];

pub fn new_transaction_id() -> TransactionId {
	let mut id = [0u8; 12];
	fastrand::fill(&mut id);
	id
}

struct Attribute<'a> {
	kind: u16,
	value: &'a [u8],
	offset: usize,
}

struct Parsed<'a> {
	msg_type: u16,
	transaction_id: TransactionId,
	attributes: Vec<Attribute<'a>>,
}

fn header(msg_type: u16, body_len: usize, transaction_id: &TransactionId) -> Vec<u8> {
	let mut msg = Vec::with_capacity(HEADER_LEN + body_len);
	msg.extend_from_slice(&msg_type.to_be_bytes());
	msg.extend_from_slice(&(body_len as u16).to_be_bytes());
	msg.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
	msg.extend_from_slice(transaction_id);
	msg
}

fn push_attribute(buf: &mut Vec<u8>, kind: u16, value: &[u8]) {
	buf.extend_from_slice(&kind.to_be_bytes());
	buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
	buf.extend_from_slice(value);
	let padding = (4 - value.len() % 4) % 4;
	buf.extend(std::iter::repeat(0u8).take(padding));
}

fn parse(data: &[u8]) -> Result<Parsed<'_>> {
	if data.len() < HEADER_LEN {
		return Err(StunError::InvalidMessage("shorter than header"));
	}
	if data[0] & 0xC0 != 0 {
		return Err(StunError::InvalidMessage("not a STUN message"));
	}

	let msg_type = u16::from_be_bytes([data[0], data[1]]);
	let length = u16::from_be_bytes([data[2], data[3]]) as usize;
	let magic = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

	if magic != STUN_MAGIC_COOKIE {
		return Err(StunError::InvalidMessage("bad magic cookie"));
	}
	if length % 4 != 0 {
		return Err(StunError::InvalidMessage("length not a multiple of 4"));
	}
	if data.len() < HEADER_LEN + length {
		return Err(StunError::InvalidMessage("truncated"));
	}

	let mut transaction_id = [0u8; 12];
	transaction_id.copy_from_slice(&data[8..20]);

	let end = HEADER_LEN + length;
	let mut offset = HEADER_LEN;
	let mut attributes = Vec::new();

	while offset + 4 <= end {
		let kind = u16::from_be_bytes([data[offset], data[offset + 1]]);
		let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
		let value_start = offset + 4;

		if value_start + attr_len > end {
			return Err(StunError::InvalidMessage("attribute overruns message"));
		}

		attributes.push(Attribute {
			kind,
			value: &data[value_start..value_start + attr_len],
			offset,
		});

		offset = value_start + ((attr_len + 3) & !3);
	}

	let message = &data[..end];
	if let Some(pos) = attributes.iter().position(|a| a.kind == ATTR_FINGERPRINT) {
		if pos != attributes.len() - 1 {
			return Err(StunError::InvalidMessage("FINGERPRINT is not the last attribute"));
		}
		let fingerprint = &attributes[pos];
		let expected = self::fingerprint(&message[..fingerprint.offset]);
		if fingerprint.value != expected.to_be_bytes() {
			return Err(StunError::InvalidMessage("FINGERPRINT mismatch"));
		}
	}

	Ok(Parsed {
		msg_type,
		transaction_id,
		attributes,
	})
}

pub fn build_binding_request(transaction_id: &TransactionId) -> Vec<u8> {
	header(BINDING_REQUEST, 0, transaction_id)
}

/// Validates a BINDING request and returns its transaction id.
///
/// Requests carrying a comprehension-required attribute this server does not
/// know are rejected.
pub fn parse_binding_request(data: &[u8]) -> Result<TransactionId> {
	let parsed = parse(data)?;
	if parsed.msg_type != BINDING_REQUEST {
		return Err(StunError::InvalidMessage("not a BINDING request"));
	}

	let known = [
		ATTR_USERNAME,
		ATTR_MESSAGE_INTEGRITY,
		ATTR_PRIORITY,
		ATTR_USE_CANDIDATE,
	];
	let unknown_required = parsed
		.attributes
		.iter()
		.any(|a| a.kind < 0x8000 && !known.contains(&a.kind));
	if unknown_required {
		return Err(StunError::InvalidMessage("unknown comprehension-required attribute"));
	}

	Ok(parsed.transaction_id)
}

/// Success response carrying XOR-MAPPED-ADDRESS, SOFTWARE and FINGERPRINT.
pub fn build_binding_response(transaction_id: &TransactionId, mapped: SocketAddr, software: &str) -> Vec<u8> {
	let software = truncate_utf8(software, MAX_SOFTWARE_LEN);

	let mut attributes = Vec::new();
	push_attribute(
		&mut attributes,
		ATTR_XOR_MAPPED_ADDRESS,
		&encode_xor_address(mapped, transaction_id),
	);
	push_attribute(&mut attributes, ATTR_SOFTWARE, software.as_bytes());

	let mut msg = header(
		BINDING_SUCCESS,
		attributes.len() + FINGERPRINT_ATTR_LEN,
		transaction_id,
	);
	msg.extend_from_slice(&attributes);

	let value = fingerprint(&msg);
	push_attribute(&mut msg, ATTR_FINGERPRINT, &value.to_be_bytes());
	msg
}

/// Extracts the reflexive address, preferring XOR-MAPPED-ADDRESS.
pub fn parse_binding_response(data: &[u8], expected_transaction_id: &TransactionId) -> Result<SocketAddr> {
	let parsed = parse(data)?;
	if parsed.msg_type != BINDING_SUCCESS {
		return Err(StunError::InvalidMessage("not a BINDING success response"));
	}
	if &parsed.transaction_id != expected_transaction_id {
		return Err(StunError::InvalidMessage("transaction id mismatch"));
	}

	let xor = parsed
		.attributes
		.iter()
		.filter(|a| a.kind == ATTR_XOR_MAPPED_ADDRESS)
		.find_map(|a| parse_mapped_address(a.value, Some(&parsed.transaction_id)));
	let plain = || {
		parsed
			.attributes
			.iter()
			.filter(|a| a.kind == ATTR_MAPPED_ADDRESS)
			.find_map(|a| parse_mapped_address(a.value, None))
	};

	xor.or_else(plain)
		.ok_or(StunError::InvalidMessage("no mapped address"))
}

/// Software description from a response, if present.
pub fn software(data: &[u8]) -> Option<String> {
	let parsed = parse(data).ok()?;
	parsed
		.attributes
		.iter()
		.find(|a| a.kind == ATTR_SOFTWARE)
		.map(|a| String::from_utf8_lossy(a.value).into_owned())
}

fn xor_key(transaction_id: &TransactionId) -> [u8; 16] {
	let mut key = [0u8; 16];
	key[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
	key[4..].copy_from_slice(transaction_id);
	key
}

fn encode_xor_address(addr: SocketAddr, transaction_id: &TransactionId) -> Vec<u8> {
	let key = xor_key(transaction_id);
	let port = addr.port() ^ ((STUN_MAGIC_COOKIE >> 16) as u16);

	let mut value = vec![0u8];
	match addr.ip() {
		IpAddr::V4(ip) => {
			value.push(ADDR_FAMILY_IPV4);
			value.extend_from_slice(&port.to_be_bytes());
			value.extend(ip.octets().iter().zip(&key[..4]).map(|(b, k)| b ^ k));
		}
		IpAddr::V6(ip) => {
			value.push(ADDR_FAMILY_IPV6);
			value.extend_from_slice(&port.to_be_bytes());
			value.extend(ip.octets().iter().zip(&key).map(|(b, k)| b ^ k));
		}
	}
	value
}

/// `transaction_id` is `Some` for XOR-MAPPED-ADDRESS. IPv6 addresses are
/// XORed with the cookie followed by the transaction id.
fn parse_mapped_address(data: &[u8], transaction_id: Option<&TransactionId>) -> Option<SocketAddr> {
	if data.len() < 4 {
		return None;
	}

	let family = data[1];
	let mut port = u16::from_be_bytes([data[2], data[3]]);
	let key = transaction_id.map(xor_key);
	if key.is_some() {
		port ^= (STUN_MAGIC_COOKIE >> 16) as u16;
	}

	match family {
		ADDR_FAMILY_IPV4 if data.len() >= 8 => {
			let mut ip_bytes = [data[4], data[5], data[6], data[7]];
			if let Some(key) = key {
				for (b, k) in ip_bytes.iter_mut().zip(&key[..4]) {
					*b ^= k;
				}
			}
			Some(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip_bytes), port)))
		}
		ADDR_FAMILY_IPV6 if data.len() >= 20 => {
			let mut ip_bytes: [u8; 16] = data[4..20].try_into().ok()?;
			if let Some(key) = key {
				for (b, k) in ip_bytes.iter_mut().zip(&key) {
					*b ^= k;
				}
			}
			Some(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip_bytes), port, 0, 0)))
		}
		_ => None,
	}
}

fn truncate_utf8(s: &str, max_len: usize) -> &str {
	if s.len() <= max_len {
		return s;
	}
	let mut end = max_len;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}

/// FINGERPRINT value over everything that precedes the attribute.
fn fingerprint(data: &[u8]) -> u32 {
	crc32fast::hash(data) ^ FINGERPRINT_XOR
}
