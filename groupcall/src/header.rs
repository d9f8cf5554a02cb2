// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Fixed binary preamble for RPC messages.
//!
//! Every message starts with three fields at fixed offsets
//!
//! ```text
//! [payload_size : usize][opcode : Opcode][sender : NodeId][payload ...]
//! ```
//!
//! Fields are written in native byte order. The header only ever travels between
//! nodes of the same cluster, which are assumed to share endianness and word size.

use bytes::{Bytes, BytesMut};

use crate::{NodeId, Opcode};


const SIZE_WIDTH: usize = std::mem::size_of::<usize>();
const OPCODE_WIDTH: usize = std::mem::size_of::<Opcode>();
const SENDER_WIDTH: usize = std::mem::size_of::<NodeId>();

const OPCODE_OFFSET: usize = SIZE_WIDTH;
const SENDER_OFFSET: usize = SIZE_WIDTH + OPCODE_WIDTH;

/// The decoded preamble of an RPC message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Number of payload bytes following the header
    pub payload_size: usize,
    /// The function being invoked (or replied to)
    pub opcode: Opcode,
    /// The node which sent the message
    pub sender: NodeId,
}

impl Header {
    /// Write this header into the first [header_space()] bytes of `buf`
    pub fn encode_into(&self, buf: &mut [u8]) {
        populate_header(buf, self.payload_size, self.opcode, self.sender);
    }

    /// Read a header from the first [header_space()] bytes of `buf`. Returns [None]
    /// if the buffer is too short to hold one.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        retrieve_header(buf)
    }
}

/// The number of bytes reserved in front of every payload for the [Header]
pub const fn header_space() -> usize {
    SIZE_WIDTH + OPCODE_WIDTH + SENDER_WIDTH
}

/// Write the three header fields at their fixed offsets into `buf`.
///
/// Panics if `buf` has less than [header_space()] bytes, the caller is expected to
/// have reserved room in front of the payload.
pub fn populate_header(buf: &mut [u8], payload_size: usize, opcode: Opcode, from: NodeId) {
    assert!(
        buf.len() >= header_space(),
        "header needs {} bytes but the buffer only has {}",
        header_space(),
        buf.len()
    );
    buf[..OPCODE_OFFSET].copy_from_slice(&payload_size.to_ne_bytes());
    buf[OPCODE_OFFSET..SENDER_OFFSET].copy_from_slice(&opcode.0.to_ne_bytes());
    buf[SENDER_OFFSET..header_space()].copy_from_slice(&from.to_ne_bytes());
}

/// Extract the header fields from the front of `buf`, the exact inverse of
/// [populate_header]
pub fn retrieve_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < header_space() {
        return None;
    }
    let mut size = [0u8; SIZE_WIDTH];
    size.copy_from_slice(&buf[..OPCODE_OFFSET]);
    let mut opcode = [0u8; OPCODE_WIDTH];
    opcode.copy_from_slice(&buf[OPCODE_OFFSET..SENDER_OFFSET]);
    let mut sender = [0u8; SENDER_WIDTH];
    sender.copy_from_slice(&buf[SENDER_OFFSET..header_space()]);

    Some(Header {
        payload_size: usize::from_ne_bytes(size),
        opcode: Opcode(u64::from_ne_bytes(opcode)),
        sender: NodeId::from_ne_bytes(sender),
    })
}

/// Allocate a zeroed message buffer with room for `payload_len` bytes of payload
/// behind the header, so payload-writing code never deals with the header
pub fn extra_alloc(payload_len: usize) -> MessageBuf {
    MessageBuf {
        inner: BytesMut::zeroed(payload_len + header_space()),
    }
}

/// A message buffer whose first [header_space()] bytes are reserved for a [Header]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageBuf {
    inner: BytesMut,
}

impl MessageBuf {
    /// The payload region, everything behind the header
    pub fn payload(&self) -> &[u8] {
        &self.inner[header_space()..]
    }

    /// Mutable access to the payload region
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.inner[header_space()..]
    }

    /// Length of the payload region
    pub fn payload_len(&self) -> usize {
        self.inner.len() - header_space()
    }

    /// Stamp the header, using the payload region's length as the payload size
    pub fn populate_header(&mut self, opcode: Opcode, from: NodeId) {
        let payload_size = self.payload_len();
        populate_header(&mut self.inner, payload_size, opcode, from);
    }

    /// Read back the header currently in the buffer
    pub fn header(&self) -> Header {
        match retrieve_header(&self.inner) {
            Some(header) => header,
            None => unreachable!("a MessageBuf always reserves the header space"),
        }
    }

    /// The whole message, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Freeze into an immutable, cheaply cloneable message
    pub fn freeze(self) -> Bytes {
        self.inner.freeze()
    }
}
