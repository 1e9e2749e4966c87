// TagMerger (spec.md §4.5): tag-set union is the only merge rule, deliberately symmetric so both
// peers reach the same result independently, no per-tag timestamp required.

use std::collections;

use crate::{
  store::{MessageId, Store, Tag},
  sync::TransferCounters,
};

use super::changeset::ChangeSet;

pub fn merge(
  store: &mut impl Store,
  local: &ChangeSet,
  remote: &ChangeSet,
  counters: &mut TransferCounters,
) -> anyhow::Result<()> {
  for (id, remote_record) in remote {
    let union: collections::BTreeSet<Tag> = match local.get(id) {
      Some(local_record) => local_record
        .tags
        .union(&remote_record.tags)
        .cloned()
        .collect(),
      None => remote_record.tags.clone(),
    };
    apply(store, id, &union, counters)?;
  }
  Ok(())
}

fn apply(
  store: &mut impl Store,
  id: &MessageId,
  union: &collections::BTreeSet<Tag>,
  counters: &mut TransferCounters,
) -> anyhow::Result<()> {
  let current = match store.find(id)? {
    // Absent or a ghost: will be adopted later during file transfer, or simply gone. Recoverable
    // (spec.md §7's LookupMiss), log and move on.
    None => {
      log::debug!("skipping tag merge for {id}, not locally present yet");
      return Ok(());
    }
    Some(record) => record,
  };
  if &current.tags == union {
    return Ok(());
  }
  store.transaction(|store| store.set_tags(id, union))?;
  counters.tag_changes += 1;
  Ok(())
}
