// ChangeSetBuilder (spec.md §4.4): the set of messages whose tags or files changed since a
// bookmark, plus its wire encoding (§6.2: a JSON object keyed by stringified MessageId).

use std::{collections, str};

use anyhow::Context as _;

use crate::{
  error::SyncError,
  store::{FileRecord, Hex32, MessageId, MessageRecord, RelPath, Store, Tag},
  syncstate::SyncState,
};

pub type ChangeSet = collections::BTreeMap<MessageId, MessageRecord>;

/// Computes the local change set against `previous` (the bookmark left by the last successful
/// sync with this peer, or `None` on a first sync).
pub fn build(store: &impl Store, previous: Option<&SyncState>) -> anyhow::Result<ChangeSet> {
  let revision = store.revision()?;
  let rev = match previous {
    None => 0,
    Some(state) => {
      if state.uuid != revision.uuid {
        return Err(
          SyncError::BookmarkIncompatible(format!(
            "bookmark uuid {} doesn't match store uuid {}",
            state.uuid, revision.uuid
          ))
          .into(),
        );
      }
      if state.rev > revision.rev {
        return Err(
          SyncError::BookmarkIncompatible(format!(
            "bookmark rev {} is ahead of store rev {}",
            state.rev, revision.rev
          ))
          .into(),
        );
      }
      state.rev
    }
  };
  Ok(store.messages_since(rev)?.into_iter().collect())
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireFile {
  name: String,
  sha: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireRecord {
  tags: Vec<String>,
  files: Vec<WireFile>,
}

pub fn encode(changeset: &ChangeSet) -> anyhow::Result<Vec<u8>> {
  let wire: collections::BTreeMap<&str, WireRecord> = changeset
    .iter()
    .map(|(id, record)| {
      (
        id.as_str(),
        WireRecord {
          tags: record.tags.iter().map(|tag| tag.as_str().to_string()).collect(),
          files: record
            .files
            .iter()
            .map(|file| WireFile {
              name: file.name.as_str().to_string(),
              sha: file.sha.to_string(),
            })
            .collect(),
        },
      )
    })
    .collect();
  serde_json::to_vec(&wire).context("couldn't encode changeset")
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<ChangeSet> {
  let wire: collections::BTreeMap<String, WireRecord> =
    serde_json::from_slice(bytes).context("couldn't decode changeset")?;
  wire
    .into_iter()
    .map(|(id, record)| -> anyhow::Result<(MessageId, MessageRecord)> {
      let tags = record
        .tags
        .into_iter()
        .map(Tag::new)
        .collect::<anyhow::Result<_>>()?;
      let files = record
        .files
        .into_iter()
        .map(|file| -> anyhow::Result<FileRecord> {
          Ok(FileRecord {
            name: RelPath::new(file.name)?,
            sha: file.sha.parse::<Hex32>()?,
          })
        })
        .collect::<anyhow::Result<_>>()?;
      Ok((MessageId::new(id)?, MessageRecord { tags, files }))
    })
    .collect()
}
