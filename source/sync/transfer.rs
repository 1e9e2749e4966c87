// FileTransfer (spec.md §4.7) and Checkpoint (§4.8): the two-phase body exchange that actually
// moves bytes, followed by the bookmark rewrite that makes the sync durable.

use std::{fs, io, path, thread};

use crate::{
  codec::Duplex,
  error::SyncError,
  hash,
  store::{MessageId, Store},
  sync::TransferCounters,
};

use super::{changeset::ChangeSet, reconcile::FetchEntry};

pub fn exchange<S, R, W>(
  store: &mut S,
  reader: &mut Duplex<R>,
  writer: &mut Duplex<W>,
  fetch_list: &[FetchEntry],
  remote_changeset: &ChangeSet,
  counters: &mut TransferCounters,
) -> anyhow::Result<()>
where
  S: Store,
  R: io::Read + Send,
  W: io::Write + Send,
{
  // Phase A: exchange the lists of filenames each side wants.
  let peer_wants: Vec<String> = thread::scope(|scope| -> anyhow::Result<Vec<String>> {
    let names: Vec<&[u8]> = fetch_list.iter().map(|entry| entry.name.as_str().as_bytes()).collect();
    let sender = scope.spawn(|| writer.write_blob_list(names.into_iter()));
    let received = reader.read_blob_list();
    sender.join().map_err(|_| anyhow::anyhow!("filename-send thread panicked"))??;
    received?
      .into_iter()
      .map(|bytes| String::from_utf8(bytes).map_err(|_| anyhow::anyhow!("peer requested a non-UTF8 filename")))
      .collect()
  })?;

  // Phase B: exchange the file bodies, in the orders established in Phase A.
  thread::scope(|scope| -> anyhow::Result<()> {
    let root = store.root().to_path_buf();
    let sender = scope.spawn(move || -> anyhow::Result<()> {
      for name in &peer_wants {
        let abs = root.join(name);
        let bytes = fs::read(&abs).map_err(|_| SyncError::LocalFileNotFound { name: name.clone() })?;
        writer.write_blob(&bytes)?;
      }
      Ok(())
    });

    for entry in fetch_list {
      let bytes = reader.read_blob()?;
      let sha = hash::fingerprint(&bytes);
      if sha != entry.sha {
        return Err(SyncError::HashMismatch { name: entry.name.to_string() }.into());
      }
      let abs = entry.name.to_abs(store.root());
      if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)?;
      }
      match fs::read(&abs) {
        Ok(existing) if hash::fingerprint(&existing) != sha => {
          return Err(SyncError::OverwriteConflict { name: entry.name.to_string() }.into());
        }
        Ok(_) => (), // Already present with matching content, nothing to write.
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
          let parent = abs.parent().unwrap_or_else(|| path::Path::new("."));
          let temp = parent.join(format!(".notmuch-sync-tmp-{}", uuid::Uuid::new_v4()));
          fs::write(&temp, &bytes)?;
          fs::rename(&temp, &abs)?;
        }
        Err(error) => return Err(error.into()),
      }

      let (id, is_duplicate) = store.transaction(|store| store.add_file(&abs))?;
      counters.new_files += 1;
      if !is_duplicate {
        counters.new_messages += 1;
        adopt_tags(store, &id, remote_changeset)?;
      }
    }

    sender.join().map_err(|_| anyhow::anyhow!("body-send thread panicked"))??;
    crate::interrupt(crate::Interruption::FileTransferPostBody)?;
    Ok(())
  })
}

/// This branch cannot race TagMerger: TagMerger skips an id that isn't found locally yet, which
/// is exactly the id being adopted here for the first time.
fn adopt_tags<S: Store>(store: &mut S, id: &MessageId, remote_changeset: &ChangeSet) -> anyhow::Result<()> {
  if let Some(record) = remote_changeset.get(id) {
    store.transaction(|store| store.set_tags(id, &record.tags))?;
  }
  Ok(())
}
