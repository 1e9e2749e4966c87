// DeletionSync (spec.md §4.9, optional): only the initiator computes the diff, halving bandwidth.
// In require-deleted-tag mode a message slated for deletion that lacks the sentinel tag locally
// survives; instead its revision is bumped with a no-op tag write so it re-enters the next sync's
// change-set.

use std::{collections, fs, io, thread};

use crate::{
  codec::Duplex,
  store::{MessageId, Store, Tag},
  sync::{Role, TransferCounters},
};

pub fn sync<S, R, W>(
  store: &mut S,
  role: Role,
  reader: &mut Duplex<R>,
  writer: &mut Duplex<W>,
  require_deleted_tag: bool,
  counters: &mut TransferCounters,
) -> anyhow::Result<()>
where
  S: Store,
  R: io::Read + Send,
  W: io::Write + Send,
{
  let local_ids: Vec<MessageId> = store.all_ids()?;

  match role {
    Role::Responder => {
      let to_delete: Vec<String> = thread::scope(|scope| -> anyhow::Result<Vec<String>> {
        let ids: Vec<&[u8]> = local_ids.iter().map(|id| id.as_str().as_bytes()).collect();
        let sender = scope.spawn(|| writer.write_blob_list(ids.into_iter()));
        let received = reader.read_blob_list();
        sender.join().map_err(|_| anyhow::anyhow!("id-send thread panicked"))??;
        decode_ids(received?)
      })?;
      for id in to_delete {
        apply_local_deletion(store, &MessageId::new(id)?, require_deleted_tag, counters)?;
      }
      crate::interrupt(crate::Interruption::DeletionPostRemoteApply)?;
    }
    Role::Initiator => {
      let remote_ids: Vec<String> = decode_ids(reader.read_blob_list()?)?;
      let remote_ids: collections::BTreeSet<MessageId> =
        remote_ids.into_iter().map(MessageId::new).collect::<anyhow::Result<_>>()?;
      let local_ids: collections::BTreeSet<MessageId> = local_ids.into_iter().collect();

      let delete_remote: Vec<&MessageId> = remote_ids.difference(&local_ids).collect();
      let delete_local: Vec<&MessageId> = local_ids.difference(&remote_ids).collect();

      let names: Vec<&[u8]> = delete_remote.iter().map(|id| id.as_str().as_bytes()).collect();
      writer.write_blob_list(names.into_iter())?;

      for id in delete_local {
        apply_local_deletion(store, id, require_deleted_tag, counters)?;
      }
    }
  }
  Ok(())
}

fn decode_ids(blobs: Vec<Vec<u8>>) -> anyhow::Result<Vec<String>> {
  blobs
    .into_iter()
    .map(|bytes| String::from_utf8(bytes).map_err(|_| anyhow::anyhow!("peer sent a non-UTF8 message id")))
    .collect()
}

fn apply_local_deletion<S: Store>(
  store: &mut S,
  id: &MessageId,
  require_deleted_tag: bool,
  counters: &mut TransferCounters,
) -> anyhow::Result<()> {
  let record = match store.find(id)? {
    None => {
      log::debug!("skipping deletion of {id}, not locally present");
      return Ok(());
    }
    Some(record) => record,
  };

  if require_deleted_tag && !record.tags.contains(&Tag::deleted()) {
    // Bump the revision with a no-op tag write so this id re-enters the next sync's change set
    // and is retained rather than silently dropped.
    let sentinel = Tag::new("notmuch-sync-revive")?;
    store.transaction(|store| {
      let mut tags = record.tags.clone();
      tags.insert(sentinel.clone());
      store.set_tags(id, &tags)?;
      tags.remove(&sentinel);
      store.set_tags(id, &tags)
    })?;
    return Ok(());
  }

  store.transaction(|store| {
    for file in &record.files {
      let abs = file.name.to_abs(store.root());
      store.remove_file(&abs)?;
      if let Err(error) = fs::remove_file(&abs) {
        if error.kind() != io::ErrorKind::NotFound {
          return Err(error.into());
        }
      }
    }
    Ok(())
  })?;
  counters.message_deletions += 1;
  Ok(())
}
