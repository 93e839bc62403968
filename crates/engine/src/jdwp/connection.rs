// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! A JDWP connection over TCP.
//!
//! Commands are synchronous: [`Connection::request`] writes a command and reads until
//! the matching reply arrives. Event packets that show up in the meantime are queued
//! and handed out by [`Connection::next_event`] before the socket is read again.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::TcpStream,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::codec::{IdSizes, Packet, PacketReader, PacketWriter, HANDSHAKE, HEADER_LEN};
use crate::TargetError;

/// `Event.Composite`, the only command the VM sends
const EVENT_COMMAND_SET: u8 = 64;
const COMPOSITE_COMMAND: u8 = 100;

const ABSENT_INFORMATION: u16 = 101;
const VM_DEAD: u16 = 112;

/// Longest wait for the reply to a command
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK_SIZE: usize = 4096;

/// Synchronous JDWP connection
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    next_id: u32,
    sizes: IdSizes,
    reply_timeout: Duration,
    /// Bytes of a packet that has not fully arrived yet
    inbound: BytesMut,
    events: VecDeque<Bytes>,
}

impl Connection {
    /// Perform the handshake on a freshly accepted stream
    pub fn handshake(mut stream: TcpStream, timeout: Duration) -> Result<Self, TargetError> {
        stream.set_read_timeout(Some(timeout))?;
        stream.write_all(HANDSHAKE)?;
        let mut reply = [0u8; HANDSHAKE.len()];
        stream.read_exact(&mut reply).map_err(map_read_error)?;
        if reply != HANDSHAKE {
            return Err(TargetError::Protocol("unexpected handshake reply".into()));
        }
        stream.set_read_timeout(None)?;
        debug!(peer = ?stream.peer_addr().ok(), "JDWP handshake completed");

        Ok(Self {
            stream,
            next_id: 1,
            sizes: IdSizes::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            inbound: BytesMut::new(),
            events: VecDeque::new(),
        })
    }

    /// Id widths negotiated with the VM
    pub fn sizes(&self) -> IdSizes {
        self.sizes
    }

    /// Use the id widths reported by the VM
    pub fn set_sizes(&mut self, sizes: IdSizes) {
        self.sizes = sizes;
    }

    /// Bound the wait for each command reply
    pub fn set_reply_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = timeout;
    }

    /// Start a command payload using the negotiated id widths
    pub fn writer(&self) -> PacketWriter {
        PacketWriter::new(self.sizes)
    }

    /// Send a command and wait for its reply.
    ///
    /// A reply that does not arrive within the reply timeout is a
    /// [`TargetError::Timeout`]; a late reply is dropped when it shows up.
    pub fn request(
        &mut self,
        command_set: u8,
        command: u8,
        data: Bytes,
    ) -> Result<PacketReader, TargetError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        trace!(id, command_set, command, "Sending JDWP command");
        self.stream.write_all(&Packet::command(id, command_set, command, &data))?;

        let deadline = Instant::now().checked_add(self.reply_timeout);
        loop {
            let Some(packet) = self.read_packet(deadline)? else {
                warn!(
                    id,
                    command_set,
                    command,
                    timeout = ?self.reply_timeout,
                    "No reply from the VM"
                );
                return Err(TargetError::Timeout(format!(
                    "reply to command {command_set}/{command}"
                )));
            };
            match packet {
                Packet::Reply { id: reply_id, error_code, data } if reply_id == id => {
                    return match error_code {
                        0 => Ok(PacketReader::new(data, self.sizes)),
                        ABSENT_INFORMATION => Err(TargetError::AbsentInformation),
                        VM_DEAD => Err(TargetError::Disconnected),
                        code => Err(TargetError::Rejected(code)),
                    };
                }
                Packet::Reply { id: stale, .. } => debug!(id = stale, "Dropping unexpected reply"),
                Packet::Command { command_set, command, data, .. } => {
                    self.enqueue(command_set, command, data)
                }
            }
        }
    }

    /// Next composite event payload, waiting at most `timeout`; `None` on timeout.
    ///
    /// A packet that is still arriving when the wait ends is kept and completed by
    /// the next read.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<PacketReader>, TargetError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(data) = self.events.pop_front() {
                return Ok(Some(PacketReader::new(data, self.sizes)));
            }

            match self.read_packet(deadline)? {
                Some(Packet::Command { command_set, command, data, .. }) => {
                    self.enqueue(command_set, command, data)
                }
                Some(Packet::Reply { id, .. }) => debug!(id, "Dropping unexpected reply"),
                None => return Ok(None),
            }
        }
    }

    fn enqueue(&mut self, command_set: u8, command: u8, data: Bytes) {
        if command_set == EVENT_COMMAND_SET && command == COMPOSITE_COMMAND {
            self.events.push_back(data);
        } else {
            debug!(command_set, command, "Ignoring command sent by the VM");
        }
    }

    /// Read until one whole packet is buffered; `None` once `deadline` passes.
    ///
    /// No deadline means waiting indefinitely.
    fn read_packet(&mut self, deadline: Option<Instant>) -> Result<Option<Packet>, TargetError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = self.take_frame()? {
                return Packet::decode(frame).map(Some);
            }

            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    Some(remaining)
                }
                None => None,
            };
            self.stream.set_read_timeout(timeout)?;

            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TargetError::Disconnected),
                Ok(read) => self.inbound.extend_from_slice(&chunk[..read]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(map_read_error(e)),
            }
        }
    }

    /// Split the first packet off the inbound buffer if it is complete
    fn take_frame(&mut self) -> Result<Option<Bytes>, TargetError> {
        let Some(prefix) = self.inbound.get(..4) else { return Ok(None) };
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if length < HEADER_LEN {
            return Err(TargetError::Protocol(format!("packet length {length} below header size")));
        }
        if self.inbound.len() < length {
            return Ok(None);
        }
        Ok(Some(self.inbound.split_to(length).freeze()))
    }

    /// Close both directions of the socket
    pub fn close(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn map_read_error(e: io::Error) -> TargetError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TargetError::Disconnected,
        _ => TargetError::Io(e),
    }
}
