// SyncStateFile (spec.md §4.3/§6.3): the durable bookmark recording the local rev and the peer's
// uuid from the most recent successful sync. Located at
// <store_root>/.notmuch/notmuch-sync-<peer_uuid>. Written with a rename-into-place discipline so a
// crash never leaves a partially written bookmark on disk.

use anyhow::Context as _;
use std::{fs, io::Write as _, path};

use crate::{error::SyncError, Interruption};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncState {
  pub rev: u64,
  pub uuid: String,
}

fn path_for(store_root: &path::Path, peer_uuid: &str) -> path::PathBuf {
  store_root
    .join(".notmuch")
    .join(format!("notmuch-sync-{peer_uuid}"))
}

impl SyncState {
  /// Reads the bookmark for `peer_uuid`, if any. Returns `Ok(None)` when the file doesn't exist
  /// (a first sync with this peer); any other read/parse problem is a `SyncError::BookmarkIncompatible`.
  pub fn read(store_root: &path::Path, peer_uuid: &str) -> anyhow::Result<Option<Self>> {
    let path = path_for(store_root, peer_uuid);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(error) => Err(error).with_context(|| format!("couldn't read {path:?}"))?,
    };
    let content = content.trim_end_matches(['\r', '\n']);
    let (rev, uuid) = content
      .split_once(' ')
      .ok_or_else(|| SyncError::BookmarkIncompatible(format!("{path:?} doesn't parse")))?;
    let rev: u64 = rev
      .parse()
      .map_err(|_| SyncError::BookmarkIncompatible(format!("{path:?} has a non-numeric rev")))?;
    Ok(Some(Self {
      rev,
      uuid: uuid.to_string(),
    }))
  }

  /// Overwrites the bookmark for `peer_uuid`, via write-to-temp-then-rename in the same directory.
  pub fn write(&self, store_root: &path::Path, peer_uuid: &str) -> anyhow::Result<()> {
    let path = path_for(store_root, peer_uuid);
    let directory = path
      .parent()
      .with_context(|| format!("{path:?} has no parent directory"))?;
    fs::create_dir_all(directory)?;
    let temp = directory.join(format!(".notmuch-sync-{peer_uuid}.tmp"));
    let mut file = fs::File::create(&temp)?;
    write!(file, "{} {}", self.rev, self.uuid)?;
    file.sync_all()?;
    crate::interrupt(Interruption::CheckpointPreRename)?;
    fs::rename(&temp, &path)
      .with_context(|| format!("couldn't rename {temp:?} into place at {path:?}"))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip() {
    let directory = tempfile::tempdir().unwrap();
    let state = SyncState {
      rev: 42,
      uuid: "11111111-1111-1111-1111-111111111111".to_string(),
    };
    state.write(directory.path(), "peer-uuid").unwrap();
    assert_eq!(
      Some(state),
      SyncState::read(directory.path(), "peer-uuid").unwrap()
    );
  }

  #[test]
  fn missing_file_is_none() {
    let directory = tempfile::tempdir().unwrap();
    assert_eq!(None, SyncState::read(directory.path(), "peer-uuid").unwrap());
  }

  #[test]
  fn trailing_newline_is_trimmed() {
    let directory = tempfile::tempdir().unwrap();
    let path = path_for(directory.path(), "peer-uuid");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "7 some-uuid\n").unwrap();
    assert_eq!(
      Some(SyncState {
        rev: 7,
        uuid: "some-uuid".to_string()
      }),
      SyncState::read(directory.path(), "peer-uuid").unwrap()
    );
  }

  #[test]
  fn unparseable_is_bookmark_incompatible() {
    let directory = tempfile::tempdir().unwrap();
    let path = path_for(directory.path(), "peer-uuid");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "garbage").unwrap();
    let error = SyncState::read(directory.path(), "peer-uuid").unwrap_err();
    assert!(error.downcast_ref::<SyncError>().is_some());
  }
}
