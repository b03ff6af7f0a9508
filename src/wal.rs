//! Write-ahead log of durable intent.
//!
//! Each write transaction accumulates operation records in a private
//! [`WalBuffer`]; at commit the buffer is appended to the log as one frame,
//! in epoch order, under the commit manager's lock. The file is an
//! append-only sequence `file header, frame*` where a frame is
//! `epoch | num_ops | payload_len | payload_crc32 | payload`.
//!
//! Recovery replay is out of scope; [`WalReader`] decodes the log for
//! offline tooling and tests.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::config::SyncMode;
use crate::error::{GraphError, Result};
use crate::types::{Label, Timestamp, VertexId};

const WAL_MAGIC: [u8; 4] = *b"TGWL";
const WAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 16;
const FRAME_HEADER_LEN: usize = 20;

const OP_NEW_VERTEX: u8 = 1;
const OP_PUT_VERTEX: u8 = 2;
const OP_DEL_VERTEX: u8 = 3;
const OP_PUT_EDGE: u8 = 4;
const OP_DEL_EDGE: u8 = 5;

/// Version value recorded for a default (non-versioned) edge put; replay
/// stamps it with the frame's commit epoch.
pub const VERSION_AT_COMMIT: Timestamp = i64::MIN;

/// Decoded operation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    NewVertex {
        vertex: VertexId,
    },
    PutVertex {
        vertex: VertexId,
        data: Vec<u8>,
    },
    DelVertex {
        vertex: VertexId,
        recycle: bool,
    },
    PutEdge {
        src: VertexId,
        label: Label,
        dst: VertexId,
        force_insert: bool,
        version: Timestamp,
        data: Vec<u8>,
    },
    DelEdge {
        src: VertexId,
        label: Label,
        dst: VertexId,
    },
}

/// Per-transaction operation buffer.
#[derive(Debug, Default)]
pub struct WalBuffer {
    num_ops: u32,
    buf: Vec<u8>,
}

impl WalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_ops(&self) -> u32 {
        self.num_ops
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.num_ops = 0;
        self.buf.clear();
    }

    pub fn push_new_vertex(&mut self, vertex: VertexId) {
        self.num_ops += 1;
        self.buf.push(OP_NEW_VERTEX);
        self.buf.extend_from_slice(&vertex.to_be_bytes());
    }

    pub fn push_put_vertex(&mut self, vertex: VertexId, data: &[u8]) {
        self.num_ops += 1;
        self.buf.push(OP_PUT_VERTEX);
        self.buf.extend_from_slice(&vertex.to_be_bytes());
        self.buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    pub fn push_del_vertex(&mut self, vertex: VertexId, recycle: bool) {
        self.num_ops += 1;
        self.buf.push(OP_DEL_VERTEX);
        self.buf.extend_from_slice(&vertex.to_be_bytes());
        self.buf.push(recycle as u8);
    }

    pub fn push_put_edge(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        force_insert: bool,
        version: Timestamp,
        data: &[u8],
    ) {
        self.num_ops += 1;
        self.buf.push(OP_PUT_EDGE);
        self.buf.extend_from_slice(&src.to_be_bytes());
        self.buf.extend_from_slice(&label.to_be_bytes());
        self.buf.extend_from_slice(&dst.to_be_bytes());
        self.buf.push(force_insert as u8);
        self.buf.extend_from_slice(&version.to_be_bytes());
        self.buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    pub fn push_del_edge(&mut self, src: VertexId, label: Label, dst: VertexId) {
        self.num_ops += 1;
        self.buf.push(OP_DEL_EDGE);
        self.buf.extend_from_slice(&src.to_be_bytes());
        self.buf.extend_from_slice(&label.to_be_bytes());
        self.buf.extend_from_slice(&dst.to_be_bytes());
    }
}

fn file_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&WAL_MAGIC);
    buf[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
    buf[6..8].fill(0);
    let crc = crc32fast::hash(&buf[0..8]);
    buf[8..12].copy_from_slice(&crc.to_be_bytes());
    buf
}

/// Append-only frame writer; owned by the commit manager so frames land in
/// epoch order.
pub struct WalWriter {
    file: File,
    sync_mode: SyncMode,
}

impl WalWriter {
    pub fn create(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&file_header())?;
        debug!(path = %path.display(), "write-ahead log created");
        Ok(Self { file, sync_mode })
    }

    /// Appends one commit frame.
    pub fn append_commit(&mut self, epoch: Timestamp, buffer: &WalBuffer) -> Result<()> {
        let payload = buffer.bytes();
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&epoch.to_be_bytes());
        frame.extend_from_slice(&buffer.num_ops().to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        frame.extend_from_slice(payload);
        self.file.write_all(&frame)?;
        if self.sync_mode == SyncMode::Full {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// One decoded commit frame.
#[derive(Debug, Clone)]
pub struct WalCommit {
    pub epoch: Timestamp,
    pub records: Vec<WalRecord>,
}

/// Offline decoder for a WAL file.
pub struct WalReader;

impl WalReader {
    pub fn read_file(path: &Path) -> Result<Vec<WalCommit>> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Vec<WalCommit>> {
        if bytes.len() < FILE_HEADER_LEN {
            return Err(GraphError::Corruption("wal header truncated"));
        }
        if bytes[0..4] != WAL_MAGIC {
            return Err(GraphError::Corruption("wal magic mismatch"));
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != WAL_FORMAT_VERSION {
            return Err(GraphError::Corruption("wal format version mismatch"));
        }
        let stored_crc = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        if stored_crc != crc32fast::hash(&bytes[0..8]) {
            return Err(GraphError::Corruption("wal header crc mismatch"));
        }
        let mut commits = Vec::new();
        let mut cursor = FILE_HEADER_LEN;
        while cursor < bytes.len() {
            if bytes.len() - cursor < FRAME_HEADER_LEN {
                return Err(GraphError::Corruption("wal frame header truncated"));
            }
            let epoch = i64::from_be_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
            let num_ops =
                u32::from_be_bytes(bytes[cursor + 8..cursor + 12].try_into().unwrap());
            let payload_len =
                u32::from_be_bytes(bytes[cursor + 12..cursor + 16].try_into().unwrap())
                    as usize;
            let payload_crc =
                u32::from_be_bytes(bytes[cursor + 16..cursor + 20].try_into().unwrap());
            cursor += FRAME_HEADER_LEN;
            if bytes.len() - cursor < payload_len {
                return Err(GraphError::Corruption("wal frame payload truncated"));
            }
            let payload = &bytes[cursor..cursor + payload_len];
            cursor += payload_len;
            if crc32fast::hash(payload) != payload_crc {
                return Err(GraphError::Corruption("wal frame crc mismatch"));
            }
            let records = Self::decode_records(payload, num_ops)?;
            commits.push(WalCommit { epoch, records });
        }
        Ok(commits)
    }

    fn decode_records(payload: &[u8], num_ops: u32) -> Result<Vec<WalRecord>> {
        let mut records = Vec::with_capacity(num_ops as usize);
        let mut r = Cursor { buf: payload, pos: 0 };
        for _ in 0..num_ops {
            let record = match r.u8()? {
                OP_NEW_VERTEX => WalRecord::NewVertex { vertex: r.u64()? },
                OP_PUT_VERTEX => {
                    let vertex = r.u64()?;
                    let len = r.u32()? as usize;
                    WalRecord::PutVertex {
                        vertex,
                        data: r.bytes(len)?.to_vec(),
                    }
                }
                OP_DEL_VERTEX => WalRecord::DelVertex {
                    vertex: r.u64()?,
                    recycle: r.u8()? != 0,
                },
                OP_PUT_EDGE => {
                    let src = r.u64()?;
                    let label = r.u16()?;
                    let dst = r.u64()?;
                    let force_insert = r.u8()? != 0;
                    let version = r.i64()?;
                    let len = r.u32()? as usize;
                    WalRecord::PutEdge {
                        src,
                        label,
                        dst,
                        force_insert,
                        version,
                        data: r.bytes(len)?.to_vec(),
                    }
                }
                OP_DEL_EDGE => WalRecord::DelEdge {
                    src: r.u64()?,
                    label: r.u16()?,
                    dst: r.u64()?,
                },
                _ => return Err(GraphError::Corruption("unknown wal record kind")),
            };
            records.push(record);
        }
        if r.pos != payload.len() {
            return Err(GraphError::Corruption("wal frame trailing bytes"));
        }
        Ok(records)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return Err(GraphError::Corruption("wal record truncated"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}
