// ContentHasher (spec.md §4.2): a canonicalizing SHA-256 of a mail file, so that two copies of
// the same logical message on two hosts hash identically even after a MUA has stamped one of them
// with an `X-TUID:` header.

use crate::store::Hex32;
use sha2::{Digest as _, Sha256};

const MARKER: &[u8] = b"X-TUID: ";

/// Strips the first line beginning with `X-TUID: ` (up to and including its trailing newline),
/// then hashes the rest. Only the first occurrence is stripped.
pub fn fingerprint(bytes: &[u8]) -> Hex32 {
  let mut hasher = Sha256::new();
  match find_marker_line(bytes) {
    Some((start, end)) => {
      hasher.update(&bytes[..start]);
      hasher.update(&bytes[end..]);
    }
    None => hasher.update(bytes),
  }
  Hex32::new(hasher.finalize().into())
}

/// Returns the byte range `[start, end)` of the first line starting with `X-TUID: `, `end`
/// including the line's trailing `\n` if present.
fn find_marker_line(bytes: &[u8]) -> Option<(usize, usize)> {
  let mut line_start = 0;
  loop {
    if line_start >= bytes.len() {
      return None;
    }
    let line_end = bytes[line_start..]
      .iter()
      .position(|&byte| byte == b'\n')
      .map(|offset| line_start + offset + 1)
      .unwrap_or(bytes.len());
    if bytes[line_start..].starts_with(MARKER) {
      return Some((line_start, line_end));
    }
    line_start = line_end;
  }
}
