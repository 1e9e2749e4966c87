// The error taxonomy of spec.md §7. Each variant is fatal unless its doc comment says otherwise;
// recoverable cases (LookupMiss, DuplicateAdd) aren't modeled as errors at all, see sync::tagmerge
// and sync::deletion, which just match on Option/bool and log.

use std::fmt;

#[derive(Debug)]
pub enum SyncError {
  /// Sync-state file's uuid doesn't match the Store's, its rev is from the future, or it doesn't
  /// parse as `"<rev> <uuid>"`. Fatal, abort before any mutation.
  BookmarkIncompatible(String),
  /// A received file's content hash didn't match what the sender claimed. Fatal; the file is not
  /// written and the bookmark is not advanced.
  HashMismatch { name: String },
  /// The reconciler's safety assertion in spec.md §4.6 step 6 tripped: local and remote file sets
  /// for a message share no common member after reconciliation.
  DivergentFileSet { message_id: String },
  /// The stream to the peer failed. If this happens after Checkpoint, the bookmark written so far
  /// is retained.
  PeerStreamFailure(String),
  /// The peer asked for a file that doesn't exist locally.
  LocalFileNotFound { name: String },
  /// A destination file already exists locally with content differing from what was received.
  OverwriteConflict { name: String },
}

impl fmt::Display for SyncError {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncError::BookmarkIncompatible(reason) => {
        write!(
          formatter,
          "sync-state file is incompatible ({reason}), delete it and resync from scratch"
        )
      }
      SyncError::HashMismatch { name } => {
        write!(formatter, "content hash mismatch receiving {name}")
      }
      SyncError::DivergentFileSet { message_id } => write!(
        formatter,
        "local/remote file set disjoint for message {message_id}"
      ),
      SyncError::PeerStreamFailure(reason) => write!(formatter, "peer stream failure: {reason}"),
      SyncError::LocalFileNotFound { name } => {
        write!(formatter, "local file {name} requested by peer is missing")
      }
      SyncError::OverwriteConflict { name } => write!(
        formatter,
        "{name} already exists locally with different content"
      ),
    }
  }
}

impl std::error::Error for SyncError {}
