// ByteCodec (spec.md §4.3): length-prefixed framing, fixed-width integer I/O, byte counters. All
// integers on the wire are unsigned big-endian. A UUID travels as an exact 36-byte ASCII field
// with no length prefix. Reads block until the full count is obtained; writers flush after every
// logical message so the duplex handshake in sync::mod can't deadlock on a full write buffer.

use anyhow::Context as _;
use std::io::{Read, Write};

use crate::error::SyncError;

pub struct Duplex<RW> {
  rw: RW,
  read: u64,
  written: u64,
}

impl<RW> Duplex<RW> {
  pub fn new(rw: RW) -> Self {
    Self {
      rw,
      read: 0,
      written: 0,
    }
  }

  /// Bytes read and written over the lifetime of this handle, for the §6.5 summary line.
  pub fn counters(&self) -> (u64, u64) {
    (self.read, self.written)
  }

  /// Recovers the wrapped stream, e.g. to drop a cloned socket half once a sync run is done.
  pub fn into_inner(self) -> RW {
    self.rw
  }
}

// Split into a read-side and a write-side impl block, each with its own bound, so a single
// direction of a full-duplex stream (just a `Read` half or just a `Write` half) can be driven
// without needing to fake the other half: the concurrent send/receive sub-tasks required at every
// handshake in spec.md §5 each only need one direction.
impl<R> Duplex<R>
where
  R: Read,
{
  fn read_exact(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
    self.rw.read_exact(buf).map_err(|error| {
      SyncError::PeerStreamFailure(format!("short read, wanted {} byte(s): {error}", buf.len()))
    })?;
    self.read += buf.len() as u64;
    Ok(())
  }

  pub fn read_u32(&mut self) -> anyhow::Result<u32> {
    let mut buf = [0; 4];
    self.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
  }

  pub fn read_uuid(&mut self) -> anyhow::Result<String> {
    let mut buf = [0; 36];
    self.read_exact(&mut buf)?;
    String::from_utf8(buf.to_vec()).context("uuid is not valid ASCII")
  }

  pub fn read_blob(&mut self) -> anyhow::Result<Vec<u8>> {
    let length = self.read_u32()? as usize;
    let mut buf = vec![0; length];
    self.read_exact(&mut buf)?;
    Ok(buf)
  }

  pub fn read_blob_list(&mut self) -> anyhow::Result<Vec<Vec<u8>>> {
    let count = self.read_u32()?;
    (0..count).map(|_| self.read_blob()).collect()
  }
}

impl<W> Duplex<W>
where
  W: Write,
{
  fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()> {
    self
      .rw
      .write_all(buf)
      .map_err(|error| SyncError::PeerStreamFailure(error.to_string()))?;
    self.written += buf.len() as u64;
    Ok(())
  }

  pub fn write_u32(&mut self, value: u32) -> anyhow::Result<()> {
    self.write_all(&value.to_be_bytes())
  }

  pub fn write_uuid(&mut self, uuid: &str) -> anyhow::Result<()> {
    anyhow::ensure!(uuid.len() == 36, "uuid {uuid:?} is not 36 bytes");
    self.write_all(uuid.as_bytes())?;
    self.flush()
  }

  /// A 32-bit length followed by that many bytes.
  pub fn write_blob(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
    self.write_u32(
      bytes
        .len()
        .try_into()
        .with_context(|| format!("blob of {} byte(s) is too large to frame", bytes.len()))?,
    )?;
    self.write_all(bytes)?;
    self.flush()
  }

  /// `{ u32 N ; N x framed_blob }`.
  pub fn write_blob_list<I, B>(&mut self, items: I) -> anyhow::Result<()>
  where
    I: ExactSizeIterator<Item = B>,
    B: AsRef<[u8]>,
  {
    self.write_u32(
      items
        .len()
        .try_into()
        .with_context(|| format!("list of {} item(s) is too large to frame", items.len()))?,
    )?;
    for item in items {
      self.write_blob(item.as_ref())?;
    }
    self.flush()
  }

  fn flush(&mut self) -> anyhow::Result<()> {
    self
      .rw
      .flush()
      .map_err(|error| SyncError::PeerStreamFailure(error.to_string()).into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn u32_roundtrip() {
    let mut buf = Vec::new();
    Duplex::new(&mut buf).write_u32(0x01020304).unwrap();
    assert_eq!(vec![0x01, 0x02, 0x03, 0x04], buf);
    assert_eq!(
      0x01020304,
      Duplex::new(Cursor::new(buf)).read_u32().unwrap()
    );
  }

  #[test]
  fn blob_roundtrip() {
    let mut buf = Vec::new();
    Duplex::new(&mut buf).write_blob(b"hello").unwrap();
    assert_eq!(9, buf.len());
    assert_eq!(
      b"hello".to_vec(),
      Duplex::new(Cursor::new(buf)).read_blob().unwrap()
    );
  }

  #[test]
  fn uuid_roundtrip() {
    let uuid = "0123456789abcdef0123456789abcdef0123";
    let mut buf = Vec::new();
    Duplex::new(&mut buf).write_uuid(uuid).unwrap();
    assert_eq!(36, buf.len());
    assert_eq!(uuid, Duplex::new(Cursor::new(buf)).read_uuid().unwrap());
  }

  #[test]
  fn short_uuid_rejected() {
    assert!(Duplex::new(Vec::new()).write_uuid("short").is_err());
  }

  #[test]
  fn blob_list_roundtrip() {
    let mut buf = Vec::new();
    Duplex::new(&mut buf)
      .write_blob_list(vec![b"a".to_vec(), b"bb".to_vec()].into_iter())
      .unwrap();
    assert_eq!(
      vec![b"a".to_vec(), b"bb".to_vec()],
      Duplex::new(Cursor::new(buf)).read_blob_list().unwrap()
    );
  }

  #[test]
  fn short_read_is_an_error() {
    let buf = vec![0, 0, 0, 5, b'h', b'i']; // Claims 5 bytes, only 2 follow.
    assert!(Duplex::new(Cursor::new(buf)).read_blob().is_err());
  }

  #[test]
  fn short_read_is_a_peer_stream_failure() {
    let buf = vec![0, 0, 0, 5, b'h', b'i'];
    let error = Duplex::new(Cursor::new(buf)).read_blob().unwrap_err();
    assert!(error.downcast_ref::<crate::error::SyncError>().is_some());
  }

  #[test]
  fn counters_track_bytes() {
    let mut duplex = Duplex::new(Vec::new());
    duplex.write_blob(b"hello").unwrap();
    assert_eq!((0, 9), duplex.counters());
  }
}
