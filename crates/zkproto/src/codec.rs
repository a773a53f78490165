// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ZKTeco packet codec: framing, checksum, payload builders, record decoders.
//!
//! Every multi-byte integer on the wire is little-endian. A packet body is an
//! 8-byte header `{command, checksum, session_id, reply_counter}` followed by
//! the payload. In TCP mode the body is prefixed with a 4-byte magic and a
//! 4-byte length; UDP datagrams carry the bare body.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Result, ZkError};

/// Command and status codes used by the core.
pub mod cmd {
    pub const CMD_CONNECT: u16 = 1000;
    pub const CMD_EXIT: u16 = 1001;
    pub const CMD_AUTH: u16 = 1102;

    pub const CMD_USER_WRQ: u16 = 8;
    pub const CMD_USERTEMP_RRQ: u16 = 9;
    pub const CMD_USERTEMP_WRQ: u16 = 10;
    pub const CMD_DELETE_USERTEMP: u16 = 134;

    pub const CMD_ATTLOG_RRQ: u16 = 13;

    pub const CMD_STARTENROLL: u16 = 61;
    pub const CMD_CANCELCAPTURE: u16 = 62;

    pub const CMD_GET_TIME: u16 = 201;
    pub const CMD_GET_FREE_SIZES: u16 = 50;
    /// Keyed option read (serial number, device name).
    pub const CMD_OPTIONS_RRQ: u16 = 11;
    /// Firmware version string.
    pub const CMD_GET_VERSION: u16 = 1100;

    pub const CMD_REG_EVENT: u16 = 500;

    // Bulk data transfer.
    pub const CMD_PREPARE_DATA: u16 = 1500;
    pub const CMD_DATA: u16 = 1501;
    pub const CMD_FREE_DATA: u16 = 1502;
    pub const CMD_DATA_WRRQ: u16 = 1503;
    /// Read one chunk of a prepared buffer at (offset, size).
    pub const CMD_DATA_RDY: u16 = 1504;

    // Status codes.
    pub const CMD_ACK_OK: u16 = 2000;
    pub const CMD_ACK_ERROR: u16 = 2001;
    pub const CMD_ACK_DATA: u16 = 2002;
    pub const CMD_ACK_UNAUTH: u16 = 2005;
}

/// Real-time event flags for `CMD_REG_EVENT`.
pub mod events {
    pub const EF_ATTLOG: u32 = 1;
    pub const EF_ENROLLFINGER: u32 = 1 << 3;
}

/// File codes for `CMD_DATA_WRRQ` bulk reads.
pub mod fct {
    pub const FCT_USER: u32 = 5;
    pub const FCT_ATTLOG: u32 = 0;
}

/// TCP frame magic, first four bytes of every framed packet.
pub const TCP_MAGIC: [u8; 4] = [0x50, 0x50, 0x82, 0x7d];

const USHRT_MAX: u32 = 65_535;

/// A decoded packet, transport framing already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u16,
    pub checksum: u16,
    pub session_id: u16,
    pub reply_counter: u16,
    pub payload: Vec<u8>,
}

// -- Integer helpers ----------------------------------------------------------

pub(crate) fn le_u16(buf: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*buf.get(off)?, *buf.get(off + 1)?]))
}

pub(crate) fn le_u32(buf: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *buf.get(off)?,
        *buf.get(off + 1)?,
        *buf.get(off + 2)?,
        *buf.get(off + 3)?,
    ]))
}

/// Extract a NUL-terminated string from a fixed-width field.
pub(crate) fn cstr(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

// -- Checksum -----------------------------------------------------------------

/// Ones'-complement 16-bit checksum over a packet body (checksum field zeroed).
///
/// Words are summed little-endian; an odd trailing byte is added raw.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i < buf.len() {
        if i == buf.len() - 1 {
            sum += u32::from(buf[i]);
        } else {
            sum += u32::from(u16::from_le_bytes([buf[i], buf[i + 1]]));
        }
        sum %= USHRT_MAX;
        i += 2;
    }
    (USHRT_MAX - sum - 1) as u16
}

// -- Encoding -----------------------------------------------------------------

/// Build an unframed packet body (UDP datagram layout).
pub fn encode_udp(command: u16, session_id: u16, reply_counter: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; 8 + payload.len()];
    body[0..2].copy_from_slice(&command.to_le_bytes());
    body[4..6].copy_from_slice(&session_id.to_le_bytes());
    body[6..8].copy_from_slice(&reply_counter.to_le_bytes());
    body[8..].copy_from_slice(payload);
    let sum = checksum(&body);
    body[2..4].copy_from_slice(&sum.to_le_bytes());
    body
}

/// Build a TCP-framed packet: magic, length, then the body.
pub fn encode_tcp(command: u16, session_id: u16, reply_counter: u16, payload: &[u8]) -> Vec<u8> {
    let body = encode_udp(command, session_id, reply_counter, payload);
    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&TCP_MAGIC);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

// -- Decoding -----------------------------------------------------------------

/// Decode an unframed packet body.
pub fn decode_udp(buf: &[u8]) -> Result<Packet> {
    if buf.len() < 8 {
        return Err(ZkError::ProtocolDecode(format!(
            "packet body too short ({} bytes)",
            buf.len()
        )));
    }
    Ok(Packet {
        command: u16::from_le_bytes([buf[0], buf[1]]),
        checksum: u16::from_le_bytes([buf[2], buf[3]]),
        session_id: u16::from_le_bytes([buf[4], buf[5]]),
        reply_counter: u16::from_le_bytes([buf[6], buf[7]]),
        payload: buf[8..].to_vec(),
    })
}

/// Decode a TCP frame: verify the magic, honor the length field.
pub fn decode_tcp(buf: &[u8]) -> Result<Packet> {
    if buf.len() < 8 {
        return Err(ZkError::ProtocolDecode(format!(
            "frame too short ({} bytes)",
            buf.len()
        )));
    }
    if buf[0..4] != TCP_MAGIC {
        return Err(ZkError::ProtocolDecode("bad TCP magic".to_string()));
    }
    let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let body = buf
        .get(8..8 + len)
        .ok_or_else(|| ZkError::ProtocolDecode("frame length exceeds buffer".to_string()))?;
    decode_udp(body)
}

// -- Payload builders ---------------------------------------------------------

/// `CMD_STARTENROLL` payload, TCP transport: `<24s, byte, byte>`.
///
/// The user id is a zero-padded 24-byte field; the trailing flag byte is
/// always 1 (overwrite an existing template).
pub fn start_enroll_payload_tcp(user_id: &str, finger_index: u8) -> Vec<u8> {
    let mut payload = vec![0u8; 26];
    let id = user_id.as_bytes();
    let n = id.len().min(24);
    payload[..n].copy_from_slice(&id[..n]);
    payload[24] = finger_index;
    payload[25] = 1;
    payload
}

/// `CMD_STARTENROLL` payload, UDP transport: `<u32, byte>`.
pub fn start_enroll_payload_udp(uid: u32, finger_index: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.extend_from_slice(&uid.to_le_bytes());
    payload.push(finger_index);
    payload
}

/// `CMD_USER_WRQ` payload: the 72-byte TCP user record.
///
/// Layout: uid u16, privilege u8, password 8s, name 24s, card u32,
/// group u8, timezone 8s, user_id 24s.
pub fn set_user_payload(
    uid: u16,
    privilege: u8,
    password: &str,
    name: &str,
    card: u32,
    group: u8,
    user_id: &str,
) -> Vec<u8> {
    fn put(field: &mut [u8], value: &str) {
        let bytes = value.as_bytes();
        let n = bytes.len().min(field.len());
        field[..n].copy_from_slice(&bytes[..n]);
    }
    let mut payload = vec![0u8; 72];
    payload[0..2].copy_from_slice(&uid.to_le_bytes());
    payload[2] = privilege;
    put(&mut payload[3..11], password);
    put(&mut payload[11..35], name);
    payload[35..39].copy_from_slice(&card.to_le_bytes());
    payload[39] = group;
    put(&mut payload[48..72], user_id);
    payload
}

/// `CMD_DATA_WRRQ` preamble for a whole-table read: `<b, u16, u32, u32>`.
pub fn read_buffer_request(command: u16, fct: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(11);
    payload.push(1);
    payload.extend_from_slice(&command.to_le_bytes());
    payload.extend_from_slice(&fct.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload
}

/// `CMD_DATA_RDY` chunk request: `<u32 offset, u32 size>`.
pub fn read_chunk_request(offset: u32, size: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.extend_from_slice(&size.to_le_bytes());
    payload
}

// -- Comm key -----------------------------------------------------------------

/// Derive the `CMD_AUTH` comm key from the device password and session id.
///
/// Bit-reverses the password, adds the session id, XORs with the 'ZKSO'
/// mask, swaps the 16-bit halves, then folds in the ticks byte. Bit-exact
/// with shipping firmware.
pub fn make_commkey(password: u32, session_id: u16, ticks: u8) -> [u8; 4] {
    let mut k: u32 = 0;
    for i in 0..32 {
        k <<= 1;
        if password & (1 << i) != 0 {
            k |= 1;
        }
    }
    k = k.wrapping_add(u32::from(session_id));
    let b = k.to_le_bytes();
    let x = [b[0] ^ b'Z', b[1] ^ b'K', b[2] ^ b'S', b[3] ^ b'O'];
    let swapped = [x[2], x[3], x[0], x[1]];
    [
        swapped[0] ^ ticks,
        swapped[1] ^ ticks,
        ticks,
        swapped[3] ^ ticks,
    ]
}

// -- Device time --------------------------------------------------------------

/// Decode the device's packed timestamp (seconds since 2000-01-01 in a
/// 31-day-month calendar). Returns `None` for impossible dates.
pub fn decode_zk_time(mut t: u32) -> Option<NaiveDateTime> {
    let second = t % 60;
    t /= 60;
    let minute = t % 60;
    t /= 60;
    let hour = t % 24;
    t /= 24;
    let day = t % 31 + 1;
    t /= 31;
    let month = t % 12 + 1;
    t /= 12;
    let year = t + 2000;
    NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_opt(hour, minute, second)
}

/// Encode a timestamp in the device's packed format.
pub fn encode_zk_time(dt: &NaiveDateTime) -> u32 {
    let date = (dt.year() as u32 % 100) * 12 * 31 + (dt.month() - 1) * 31 + dt.day() - 1;
    date * 86_400 + (dt.hour() * 60 + dt.minute()) * 60 + dt.second()
}

// -- Record decoders ----------------------------------------------------------

/// Capacity counters from `CMD_GET_FREE_SIZES`. Fields the firmware does not
/// report decode as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeSizes {
    pub users: u32,
    pub fingers: u32,
    pub records: u32,
    pub cards: u32,
    pub faces: u32,
    pub users_cap: u32,
    pub fingers_cap: u32,
    pub rec_cap: u32,
    pub faces_cap: u32,
    pub users_av: u32,
    pub fingers_av: u32,
    pub rec_av: u32,
}

/// Decode the free-sizes payload. The field table is fixed by firmware:
/// word 4 users, 6 fingers, 8 records, 12 cards, 14 fingers_cap,
/// 15 users_cap, 16 rec_cap, 17 fingers_av, 18 users_av, 19 rec_av,
/// 20 faces, 22 faces_cap.
pub fn decode_free_sizes(data: &[u8]) -> FreeSizes {
    let word = |i: usize| le_u32(data, i * 4).unwrap_or(0);
    FreeSizes {
        users: word(4),
        fingers: word(6),
        records: word(8),
        cards: word(12),
        fingers_cap: word(14),
        users_cap: word(15),
        rec_cap: word(16),
        fingers_av: word(17),
        users_av: word(18),
        rec_av: word(19),
        faces: word(20),
        faces_cap: word(22),
    }
}

/// A user record as stored on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub uid: u16,
    pub user_id: String,
    pub name: String,
    pub privilege: u8,
}

/// Decode a 72-byte user row (TCP firmware).
pub fn decode_user_72(data: &[u8]) -> Option<UserRecord> {
    if data.len() < 72 {
        return None;
    }
    Some(UserRecord {
        uid: le_u16(data, 0)?,
        privilege: data[2],
        name: cstr(&data[11..35]),
        user_id: cstr(&data[48..72]),
    })
}

/// Decode a 28-byte user row (UDP firmware). The user id is numeric.
pub fn decode_user_28(data: &[u8]) -> Option<UserRecord> {
    if data.len() < 28 {
        return None;
    }
    Some(UserRecord {
        uid: le_u16(data, 0)?,
        privilege: data[2],
        name: cstr(&data[8..16]),
        user_id: le_u32(data, 24)?.to_string(),
    })
}

/// A raw attendance row: device-local naive timestamp, untranslated punch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub punch: u8,
}

/// Decode a 40-byte attendance row (TCP firmware): user id at 2..26,
/// packed time at 27..31, punch code at 31.
pub fn decode_attendance_40(data: &[u8]) -> Option<AttendanceRow> {
    if data.len() < 40 {
        return None;
    }
    let timestamp = decode_zk_time(le_u32(data, 27)?)?;
    Some(AttendanceRow {
        user_id: cstr(&data[2..26]),
        timestamp,
        punch: data[31],
    })
}

/// Decode a 16-byte attendance row (UDP firmware): numeric user id,
/// packed time at 4..8.
pub fn decode_attendance_16(data: &[u8]) -> Option<AttendanceRow> {
    if data.len() < 16 {
        return None;
    }
    let timestamp = decode_zk_time(le_u32(data, 4)?)?;
    Some(AttendanceRow {
        user_id: le_u16(data, 0)?.to_string(),
        timestamp,
        punch: 0,
    })
}
