// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Blocking single-socket session against one terminal.
//!
//! One session owns one TCP connection, the device-assigned session id and a
//! monotonically increasing reply counter. A session is NOT concurrency-safe;
//! the pool above guarantees single-writer access per device.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::codec::{
    self, cmd, decode_attendance_16, decode_attendance_40, decode_free_sizes, decode_user_28,
    decode_user_72, fct, le_u16, le_u32, FreeSizes, Packet,
};
use crate::error::{Result, ZkError};

/// Event-ack frames reuse the terminal reply counter slot.
const EVENT_ACK_REPLY: u16 = u16::MAX;

/// Largest frame the device will send in one piece.
const MAX_CHUNK: u32 = 0xFFc0;

/// A user record as reported by `get_users`.
pub type DeviceUser = codec::UserRecord;

/// One raw attendance row: naive device-local timestamp, raw punch code.
pub type AttendanceLog = codec::AttendanceRow;

/// A real-time event frame received while event registration is active.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event flag from the frame header (EF_ATTLOG, EF_ENROLLFINGER, ...).
    pub flag: u16,
    /// First payload word; for enrollment frames this is the result code.
    pub code: Option<u16>,
    pub payload: Vec<u8>,
}

pub struct DeviceSession {
    stream: TcpStream,
    session_id: u16,
    reply_counter: u16,
    /// Baseline read timeout restored after every event poll.
    read_timeout: Duration,
    endpoint: String,
}

impl DeviceSession {
    /// Connect and authenticate.
    ///
    /// Sends `CMD_CONNECT`, adopts the device-assigned session id, and runs
    /// the comm-key handshake if the device answers `CMD_ACK_UNAUTH`.
    pub fn connect(
        host: &str,
        port: u16,
        comm_password: Option<u32>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = format!("{host}:{port}");
        let addr = resolve(&endpoint)?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|_| {
            ZkError::ConnectTimeout {
                endpoint: endpoint.clone(),
            }
        })?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| ZkError::ConnLost(e.to_string()))?;

        let mut session = Self {
            stream,
            session_id: 0,
            reply_counter: 0,
            read_timeout: timeout,
            endpoint,
        };

        let reply = session.exchange(cmd::CMD_CONNECT, &[])?;
        session.session_id = reply.session_id;

        match reply.command {
            cmd::CMD_ACK_OK => {}
            cmd::CMD_ACK_UNAUTH => {
                let key = codec::make_commkey(comm_password.unwrap_or(0), session.session_id, 50);
                let auth = session.exchange(cmd::CMD_AUTH, &key)?;
                if auth.command != cmd::CMD_ACK_OK {
                    return Err(ZkError::AuthRejected);
                }
            }
            code => return Err(ZkError::DeviceRejected { code }),
        }

        debug!(endpoint = %session.endpoint, session_id = session.session_id, "device session established");
        Ok(session)
    }

    /// Close the session. Never fails; the device not acking EXIT is moot.
    pub fn disconnect(&mut self) {
        if let Err(e) = self.exchange(cmd::CMD_EXIT, &[]) {
            debug!(endpoint = %self.endpoint, err = %e, "EXIT not acknowledged");
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    // -- Device metadata ------------------------------------------------------

    /// Serial number, or `None` when the firmware does not expose it.
    pub fn get_serial(&mut self) -> Result<Option<String>> {
        self.read_option("~SerialNumber")
    }

    /// Device model name, or `None` when the firmware does not expose it.
    pub fn get_device_name(&mut self) -> Result<Option<String>> {
        self.read_option("~DeviceName")
    }

    /// Firmware version string.
    pub fn get_firmware(&mut self) -> Result<Option<String>> {
        match self.exchange_ack(cmd::CMD_GET_VERSION, &[]) {
            Ok(reply) => Ok(non_empty(codec::cstr(&reply.payload))),
            Err(ZkError::DeviceRejected { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current device clock as a naive device-local timestamp.
    pub fn get_time(&mut self) -> Result<NaiveDateTime> {
        let reply = self.exchange_ack(cmd::CMD_GET_TIME, &[])?;
        let packed = le_u32(&reply.payload, 0)
            .ok_or_else(|| ZkError::ProtocolDecode("GET_TIME payload too short".to_string()))?;
        codec::decode_zk_time(packed)
            .ok_or_else(|| ZkError::ProtocolDecode(format!("unrepresentable device time {packed}")))
    }

    /// Storage counters. Fields missing from the reply decode as zero.
    pub fn get_free_sizes(&mut self) -> Result<FreeSizes> {
        let reply = self.exchange_ack(cmd::CMD_GET_FREE_SIZES, &[])?;
        Ok(decode_free_sizes(&reply.payload))
    }

    /// Liveness probe via `get_time`. Never raises.
    pub fn test_liveness(&mut self) -> bool {
        match self.get_time() {
            Ok(_) => true,
            Err(e) => {
                debug!(endpoint = %self.endpoint, err = %e, "liveness probe failed");
                false
            }
        }
    }

    // -- User management ------------------------------------------------------

    /// Create or update a user record on the device.
    pub fn set_user(
        &mut self,
        uid: u16,
        user_id: &str,
        display_name: &str,
        privilege: u8,
    ) -> Result<()> {
        let payload = codec::set_user_payload(uid, privilege, "", display_name, 0, 0, user_id);
        self.exchange_ack(cmd::CMD_USER_WRQ, &payload)?;
        Ok(())
    }

    /// Read the whole user table.
    pub fn get_users(&mut self) -> Result<Vec<DeviceUser>> {
        let data = self.read_with_buffer(cmd::CMD_USERTEMP_RRQ, fct::FCT_USER)?;
        if data.len() <= 4 {
            return Ok(Vec::new());
        }
        // The buffer opens with a 4-byte total size.
        let rows = &data[4..];
        let mut users = Vec::new();
        if rows.len() % 72 == 0 {
            for chunk in rows.chunks_exact(72) {
                users.extend(decode_user_72(chunk));
            }
        } else if rows.len() % 28 == 0 {
            for chunk in rows.chunks_exact(28) {
                users.extend(decode_user_28(chunk));
            }
        } else {
            return Err(ZkError::ProtocolDecode(format!(
                "user table size {} is not a known record multiple",
                rows.len()
            )));
        }
        Ok(users)
    }

    // -- Templates ------------------------------------------------------------

    /// Fetch the raw template for one finger, or `None` when absent.
    pub fn get_template_bytes(&mut self, user_id: &str, finger_index: u8) -> Result<Option<Vec<u8>>> {
        let Some(uid) = self.resolve_uid(user_id)? else {
            return Ok(None);
        };
        self.template_by_uid(uid, finger_index)
    }

    /// Finger indices (0..=9) with a template present for this user.
    pub fn enrolled_finger_indices(&mut self, user_id: &str) -> Result<Vec<u8>> {
        let Some(uid) = self.resolve_uid(user_id)? else {
            return Ok(Vec::new());
        };
        let mut enrolled = Vec::new();
        for finger in 0..10u8 {
            match self.template_by_uid(uid, finger) {
                Ok(Some(bytes)) if !bytes.is_empty() => enrolled.push(finger),
                Ok(_) => {}
                Err(e) => debug!(user_id, finger, err = %e, "template probe failed"),
            }
        }
        Ok(enrolled)
    }

    /// Delete the template for one finger on the device.
    pub fn delete_user_template(&mut self, user_id: &str, finger_index: u8) -> Result<()> {
        let Some(uid) = self.resolve_uid(user_id)? else {
            return Err(ZkError::DeviceRejected {
                code: cmd::CMD_ACK_ERROR,
            });
        };
        let mut payload = Vec::with_capacity(3);
        payload.extend_from_slice(&uid.to_le_bytes());
        payload.push(finger_index);
        self.exchange_ack(cmd::CMD_DELETE_USERTEMP, &payload)?;
        Ok(())
    }

    // -- Attendance -----------------------------------------------------------

    /// Read the whole attendance log table. Rows with unrepresentable
    /// timestamps are dropped.
    pub fn fetch_attendance_logs(&mut self) -> Result<Vec<AttendanceLog>> {
        let data = self.read_with_buffer(cmd::CMD_ATTLOG_RRQ, fct::FCT_ATTLOG)?;
        if data.len() <= 4 {
            return Ok(Vec::new());
        }
        let rows = &data[4..];
        let mut logs = Vec::new();
        if rows.len() % 40 == 0 {
            for chunk in rows.chunks_exact(40) {
                match decode_attendance_40(chunk) {
                    Some(row) => logs.push(row),
                    None => debug!(endpoint = %self.endpoint, "dropping undecodable attendance row"),
                }
            }
        } else if rows.len() % 16 == 0 {
            for chunk in rows.chunks_exact(16) {
                logs.extend(decode_attendance_16(chunk));
            }
        } else {
            return Err(ZkError::ProtocolDecode(format!(
                "attendance table size {} is not a known record multiple",
                rows.len()
            )));
        }
        debug!(endpoint = %self.endpoint, count = logs.len(), "fetched attendance logs");
        Ok(logs)
    }

    // -- Enrollment surface ---------------------------------------------------

    /// Put the device into enrollment mode for one finger. Acknowledged only;
    /// capture progress arrives as events.
    pub fn start_enrollment(&mut self, user_id: &str, finger_index: u8) -> Result<()> {
        self.cancel_capture();
        let payload = codec::start_enroll_payload_tcp(user_id, finger_index);
        self.exchange_ack(cmd::CMD_STARTENROLL, &payload)?;
        Ok(())
    }

    /// Abort any in-flight capture. Never raises; failures are logged.
    pub fn cancel_capture(&mut self) {
        if let Err(e) = self.exchange_ack(cmd::CMD_CANCELCAPTURE, &[]) {
            warn!(endpoint = %self.endpoint, err = %e, "cancel capture failed");
        }
    }

    /// Register for real-time events; a zero mask deregisters.
    pub fn register_events(&mut self, mask: u32) -> Result<()> {
        self.exchange_ack(cmd::CMD_REG_EVENT, &mask.to_le_bytes())?;
        Ok(())
    }

    /// Wait for one event frame, acking it to the device.
    ///
    /// The socket read timeout is retuned to `timeout` for the wait and
    /// restored on every path, including errors.
    pub fn recv_event(&mut self, timeout: Duration) -> Result<Event> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| ZkError::ConnLost(e.to_string()))?;
        let outcome = self.read_event_packet();
        if let Err(e) = self.stream.set_read_timeout(Some(self.read_timeout)) {
            warn!(endpoint = %self.endpoint, err = %e, "failed to restore socket read timeout");
        }
        let packet = outcome?;

        // The device expects an ack before it sends the next event.
        let ack = codec::encode_tcp(cmd::CMD_ACK_OK, self.session_id, EVENT_ACK_REPLY, &[]);
        if let Err(e) = self.stream.write_all(&ack) {
            warn!(endpoint = %self.endpoint, err = %e, "event ack failed");
        }

        Ok(Event {
            flag: packet.session_id,
            code: le_u16(&packet.payload, 0),
            payload: packet.payload,
        })
    }

    // -- Wire plumbing --------------------------------------------------------

    fn exchange(&mut self, command: u16, payload: &[u8]) -> Result<Packet> {
        let frame = codec::encode_tcp(command, self.session_id, self.reply_counter, payload);
        self.stream
            .write_all(&frame)
            .map_err(|e| ZkError::ConnLost(e.to_string()))?;
        self.reply_counter = self.reply_counter.wrapping_add(1);
        self.read_packet()
    }

    fn exchange_ack(&mut self, command: u16, payload: &[u8]) -> Result<Packet> {
        let reply = self.exchange(command, payload)?;
        match reply.command {
            cmd::CMD_ACK_OK | cmd::CMD_ACK_DATA | cmd::CMD_DATA => Ok(reply),
            code => Err(ZkError::DeviceRejected { code }),
        }
    }

    /// A read timeout on a command reply means the connection is unusable.
    fn read_packet(&mut self) -> Result<Packet> {
        match self.read_frame_body() {
            Ok(body) => codec::decode_udp(&body),
            Err(FrameError::Malformed(msg)) => Err(ZkError::ProtocolDecode(msg)),
            Err(FrameError::Io(e)) => Err(ZkError::ConnLost(e.to_string())),
        }
    }

    /// A read timeout on an event wait is an expected outcome.
    fn read_event_packet(&mut self) -> Result<Packet> {
        match self.read_frame_body() {
            Ok(body) => codec::decode_udp(&body),
            Err(FrameError::Malformed(msg)) => Err(ZkError::ProtocolDecode(msg)),
            Err(FrameError::Io(e)) => match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                    Err(ZkError::EventTimeout)
                }
                _ => Err(ZkError::ConnLost(e.to_string())),
            },
        }
    }

    fn read_frame_body(&mut self) -> std::result::Result<Vec<u8>, FrameError> {
        let mut prefix = [0u8; 8];
        self.stream.read_exact(&mut prefix)?;
        if prefix[0..4] != codec::TCP_MAGIC {
            return Err(FrameError::Malformed("bad TCP magic".to_string()));
        }
        let len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        if len < 8 || len > 1 << 20 {
            return Err(FrameError::Malformed(format!("implausible frame length {len}")));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// Whole-table read over the prepared-buffer flow: DATA_WRRQ, then either
    /// an inline DATA reply, a PREPARE_DATA burst, or an ACK_OK carrying the
    /// total size followed by DATA_RDY chunk reads and a FREE_DATA release.
    fn read_with_buffer(&mut self, table: u16, fct_code: u32) -> Result<Vec<u8>> {
        let request = codec::read_buffer_request(table, fct_code);
        let reply = self.exchange(cmd::CMD_DATA_WRRQ, &request)?;
        match reply.command {
            cmd::CMD_DATA => Ok(reply.payload),
            cmd::CMD_PREPARE_DATA => self.receive_prepared(&reply),
            cmd::CMD_ACK_OK => {
                let total = le_u32(&reply.payload, 1).ok_or_else(|| {
                    ZkError::ProtocolDecode("buffer read ack missing total size".to_string())
                })?;
                let mut data = Vec::with_capacity(total as usize);
                let mut offset = 0u32;
                while offset < total {
                    let size = (total - offset).min(MAX_CHUNK);
                    let chunk = self.read_chunk(offset, size)?;
                    if chunk.is_empty() {
                        return Err(ZkError::ProtocolDecode("empty buffer chunk".to_string()));
                    }
                    offset += chunk.len() as u32;
                    data.extend_from_slice(&chunk);
                }
                if let Err(e) = self.exchange(cmd::CMD_FREE_DATA, &[]) {
                    debug!(endpoint = %self.endpoint, err = %e, "FREE_DATA not acknowledged");
                }
                Ok(data)
            }
            code => Err(ZkError::DeviceRejected { code }),
        }
    }

    fn read_chunk(&mut self, offset: u32, size: u32) -> Result<Vec<u8>> {
        let request = codec::read_chunk_request(offset, size);
        let mut reply = self.exchange(cmd::CMD_DATA_RDY, &request)?;
        // Devices occasionally flush a delayed ACK_OK from the previous
        // command before the chunk itself.
        while reply.command == cmd::CMD_ACK_OK {
            reply = self.read_packet()?;
        }
        match reply.command {
            cmd::CMD_DATA => Ok(reply.payload),
            cmd::CMD_PREPARE_DATA => self.receive_prepared(&reply),
            code => Err(ZkError::DeviceRejected { code }),
        }
    }

    /// Drain a PREPARE_DATA burst: the announced size arrives as one or more
    /// DATA frames, usually followed by a trailing ACK_OK.
    fn receive_prepared(&mut self, prepare: &Packet) -> Result<Vec<u8>> {
        let expected = le_u32(&prepare.payload, 0).ok_or_else(|| {
            ZkError::ProtocolDecode("PREPARE_DATA missing size".to_string())
        })? as usize;
        let mut data = Vec::with_capacity(expected);
        while data.len() < expected {
            let frame = self.read_packet()?;
            match frame.command {
                cmd::CMD_DATA => data.extend_from_slice(&frame.payload),
                cmd::CMD_ACK_OK => break,
                code => return Err(ZkError::DeviceRejected { code }),
            }
        }
        Ok(data)
    }

    fn read_option(&mut self, key: &str) -> Result<Option<String>> {
        let mut payload = key.as_bytes().to_vec();
        payload.push(0);
        let reply = match self.exchange_ack(cmd::CMD_OPTIONS_RRQ, &payload) {
            Ok(reply) => reply,
            Err(ZkError::DeviceRejected { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        // Reply payload is "<key>=<value>\0".
        let text = codec::cstr(&reply.payload);
        Ok(text
            .split_once('=')
            .map(|(_, value)| value.trim().to_string())
            .and_then(non_empty))
    }

    fn resolve_uid(&mut self, user_id: &str) -> Result<Option<u16>> {
        Ok(self
            .get_users()?
            .into_iter()
            .find(|u| u.user_id == user_id)
            .map(|u| u.uid))
    }

    fn template_by_uid(&mut self, uid: u16, finger_index: u8) -> Result<Option<Vec<u8>>> {
        let mut payload = Vec::with_capacity(3);
        payload.extend_from_slice(&uid.to_le_bytes());
        payload.push(finger_index);
        let reply = self.exchange(cmd::CMD_USERTEMP_RRQ, &payload)?;
        let data = match reply.command {
            cmd::CMD_DATA => reply.payload,
            cmd::CMD_PREPARE_DATA => self.receive_prepared(&reply)?,
            cmd::CMD_ACK_ERROR => return Ok(None),
            cmd::CMD_ACK_OK if reply.payload.is_empty() => return Ok(None),
            cmd::CMD_ACK_OK => reply.payload,
            code => return Err(ZkError::DeviceRejected { code }),
        };
        Ok(non_empty_bytes(data))
    }
}

enum FrameError {
    Io(std::io::Error),
    Malformed(String),
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

fn resolve(endpoint: &str) -> Result<SocketAddr> {
    endpoint
        .to_socket_addrs()
        .map_err(|e| ZkError::ConnLost(e.to_string()))?
        .next()
        .ok_or_else(|| ZkError::ConnectTimeout {
            endpoint: endpoint.to_string(),
        })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn non_empty_bytes(b: Vec<u8>) -> Option<Vec<u8>> {
    if b.is_empty() {
        None
    } else {
        Some(b)
    }
}
