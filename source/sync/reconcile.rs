// FileReconciler (spec.md §4.6): before anything is fetched over the wire, try to satisfy a
// missing file from content already present locally under a different name (a rename or a copy).

use std::collections;

use crate::{
  error::SyncError,
  store::{Hex32, MessageId, RelPath, Store},
  sync::TransferCounters,
};

use super::changeset::ChangeSet;

/// One entry the caller still needs to fetch from the peer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchEntry {
  pub message: MessageId,
  pub name: RelPath,
  pub sha: Hex32,
}

/// `aggressive_move` is true on the initiator, false on the responder (spec.md §5): the more
/// conservative side refuses to unlink a source it isn't sure the peer has already duplicated.
pub fn reconcile(
  store: &mut impl Store,
  local: &ChangeSet,
  remote: &ChangeSet,
  aggressive_move: bool,
  counters: &mut TransferCounters,
) -> anyhow::Result<Vec<FetchEntry>> {
  let mut fetch = Vec::new();
  for (id, remote_record) in remote {
    let local_record = match store.find(id)? {
      None => {
        for file in &remote_record.files {
          fetch.push(FetchEntry { message: id.clone(), name: file.name.clone(), sha: file.sha });
        }
        continue;
      }
      Some(record) => record,
    };

    let remote_names: collections::BTreeSet<&RelPath> =
      remote_record.files.iter().map(|file| &file.name).collect();
    let mut local_names: collections::BTreeSet<RelPath> =
      local_record.files.iter().map(|file| file.name.clone()).collect();
    let mut missing_locally: Vec<_> = remote_record
      .files
      .iter()
      .filter(|file| !local_names.contains(&file.name))
      .cloned()
      .collect();

    if !missing_locally.is_empty() {
      let mut local_shas = collections::HashMap::new();
      for name in &local_names {
        let abs = name.to_abs(store.root());
        local_shas.insert(name.clone(), store.fingerprint(&abs)?);
      }

      let mut still_missing = Vec::new();
      for missing in missing_locally {
        let source = local_shas.iter().find_map(|(name, sha)| (*sha == missing.sha).then(|| name.clone()));
        let Some(source) = source else {
          still_missing.push(missing);
          continue;
        };

        let is_copy = remote_names.contains(&source) || (local.contains_key(id) && !aggressive_move);
        let source_abs = source.to_abs(store.root());
        let dest_abs = missing.name.to_abs(store.root());

        // The destination is always copied into place, never renamed: a rename would leave a
        // window where the index references neither the old nor the new path if the process dies
        // right after it. Copying first means a crash before the source is unlinked below leaves
        // at worst a harmless, unindexed duplicate on disk, never a dangling index entry.
        let reconciled: anyhow::Result<bool> = (|| {
          if let Some(parent) = dest_abs.parent() {
            std::fs::create_dir_all(parent)?;
          }
          std::fs::copy(&source_abs, &dest_abs)?;
          if is_copy {
            store.transaction(|store| store.add_file(&dest_abs).map(|_| ()))?;
            Ok(false)
          } else {
            store.transaction(|store| {
              store.add_file(&dest_abs)?;
              store.remove_file(&source_abs)
            })?;
            Ok(true)
          }
        })();

        let is_move = match reconciled {
          Ok(is_move) => is_move,
          Err(error) => {
            log::warn!("couldn't reconcile {} from {source}: {error:#}", missing.name);
            still_missing.push(missing);
            continue;
          }
        };

        if is_move {
          crate::interrupt(crate::Interruption::ReconcilePostMove)?;
          std::fs::remove_file(&source_abs)?;
        }

        local_names.remove(&source);
        local_names.insert(missing.name.clone());
        counters.move_copy += 1;
      }
      missing_locally = still_missing;
    }

    for file in missing_locally {
      fetch.push(FetchEntry { message: id.clone(), name: file.name, sha: file.sha });
    }

    if !local.contains_key(id) {
      let remote_names_owned: collections::BTreeSet<RelPath> = remote_names.iter().map(|name| (*name).clone()).collect();
      let to_delete: Vec<RelPath> = local_names.difference(&remote_names_owned).cloned().collect();
      let disjoint = local_names.intersection(&remote_names_owned).next().is_none();
      if disjoint && !to_delete.is_empty() {
        return Err(SyncError::DivergentFileSet { message_id: id.to_string() }.into());
      }
      store.transaction(|store| {
        for name in &to_delete {
          let abs = name.to_abs(store.root());
          store.remove_file(&abs)?;
        }
        Ok(())
      })?;
      for name in &to_delete {
        let abs = name.to_abs(store.root());
        if let Err(error) = std::fs::remove_file(&abs) {
          if error.kind() != std::io::ErrorKind::NotFound {
            return Err(error.into());
          }
        }
        counters.dup_deletions += 1;
      }
    }
  }
  Ok(fetch)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{FileRecord, MessageRecord, Tag};
  use std::{fs, io::Write as _, path};

  fn email(root: &path::Path, dir: &str, name: &str, id: &str) -> anyhow::Result<path::PathBuf> {
    let directory = root.join(dir);
    fs::create_dir_all(&directory)?;
    let path = directory.join(name);
    let mut file = fs::File::create(&path)?;
    write!(file, "From: test\r\nSubject: test\r\nMessage-ID: {id}\r\n\r\nbody\r\n")?;
    file.sync_all()?;
    Ok(path)
  }

  #[test]
  fn rename_is_treated_as_move_when_not_duplicated_remotely() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let root = directory.path();
    let mut database = crate::notmuch::Database::create(root, root)?;
    let old_path = email(root, "new", "r.mail", "r@x")?;
    let id = database.transaction(|database| database.add_file(&old_path).map(|(id, _)| id))?;
    let sha = database.fingerprint(&old_path)?;

    let local = ChangeSet::new();
    let mut remote = ChangeSet::new();
    remote.insert(
      id.clone(),
      MessageRecord {
        tags: collections::BTreeSet::from([Tag::new("inbox")?]),
        files: vec![FileRecord { name: RelPath::new("cur/r.mail")?, sha }],
      },
    );

    let mut counters = TransferCounters::default();
    let fetch = reconcile(&mut database, &local, &remote, true, &mut counters)?;
    assert!(fetch.is_empty());
    assert_eq!(1, counters.move_copy);
    assert!(!old_path.exists());
    assert!(root.join("cur/r.mail").exists());
    Ok(())
  }

  #[test]
  fn missing_file_with_no_local_match_is_fetched() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let root = directory.path();
    let mut database = crate::notmuch::Database::create(root, root)?;

    let local = ChangeSet::new();
    let mut remote = ChangeSet::new();
    let id = MessageId::new("new@x")?;
    remote.insert(
      id.clone(),
      MessageRecord {
        tags: collections::BTreeSet::new(),
        files: vec![FileRecord { name: RelPath::new("cur/new.mail")?, sha: "11".repeat(32).parse()? }],
      },
    );

    let mut counters = TransferCounters::default();
    let fetch = reconcile(&mut database, &local, &remote, true, &mut counters)?;
    assert_eq!(1, fetch.len());
    assert_eq!(id, fetch[0].message);
    Ok(())
  }
}
