use std::{cell, collections, fs, os::unix::fs::MetadataExt as _, path};

mod bindings;
pub use bindings::Error;

use crate::{
  hash,
  store::{self, Hex32, MessageId, MessageRecord, RelPath, Revision, Store, Tag},
};

/// `(dev, inode, mtime, size)`, cheap to obtain from `fs::metadata` and stable as long as the file
/// isn't rewritten in place (maildir files never are, but a cache is only a speedup, never load
/// bearing, so a false miss after an edit is harmless).
type CacheKey = (u64, u64, i64, u64);

pub struct Database {
  inner: bindings::Database,
  root: path::PathBuf,
  notmuch_dir: path::PathBuf,
  transaction: bool,
  // RefCell: shared between the trait's `&mut self` fingerprint() and the `&self` query helpers
  // below, which also want the cache while only holding a shared borrow of the database.
  fingerprints: cell::RefCell<collections::HashMap<CacheKey, Hex32>>,
}

impl Database {
  pub fn open(notmuch_dir: &path::Path, maildir_root: &path::Path) -> anyhow::Result<Self> {
    Ok(Self {
      inner: bindings::Database::open(Some(notmuch_dir))?,
      root: maildir_root.to_path_buf(),
      notmuch_dir: notmuch_dir.to_path_buf(),
      transaction: false,
      fingerprints: cell::RefCell::new(collections::HashMap::new()),
    })
  }

  pub fn create(notmuch_dir: &path::Path, maildir_root: &path::Path) -> anyhow::Result<Self> {
    fs::create_dir_all(notmuch_dir)?;
    Ok(Self {
      inner: bindings::Database::create(notmuch_dir)?,
      root: maildir_root.to_path_buf(),
      notmuch_dir: notmuch_dir.to_path_buf(),
      transaction: false,
      fingerprints: cell::RefCell::new(collections::HashMap::new()),
    })
  }

  fn cached_fingerprint(&self, abs_path: &path::Path) -> anyhow::Result<Hex32> {
    let metadata = fs::metadata(abs_path)?;
    let key = (
      metadata.dev(),
      metadata.ino(),
      metadata.mtime(),
      metadata.size(),
    );
    if let Some(sha) = self.fingerprints.borrow().get(&key) {
      return Ok(*sha);
    }
    let sha = hash::fingerprint(&fs::read(abs_path)?);
    self.fingerprints.borrow_mut().insert(key, sha);
    Ok(sha)
  }

  fn record_for(&self, message: &bindings::Message<'_>) -> anyhow::Result<(MessageId, MessageRecord)> {
    let id = MessageId::new(message.id()?)?;
    let tags = message
      .tags()?
      .into_iter()
      .map(Tag::new)
      .collect::<anyhow::Result<_>>()?;
    let mut files = Vec::new();
    for path in message.paths()? {
      let name = RelPath::from_abs(&self.root, &path)?;
      let sha = self.cached_fingerprint(&path)?;
      files.push(store::FileRecord { name, sha });
    }
    Ok((id, MessageRecord { tags, files }))
  }
}

impl Store for Database {
  fn revision(&self) -> anyhow::Result<Revision> {
    let (rev, uuid) = self.inner.revision()?;
    Ok(Revision { rev, uuid })
  }

  fn root(&self) -> &path::Path {
    &self.root
  }

  fn state_root(&self) -> &path::Path {
    &self.notmuch_dir
  }

  fn messages_since(&self, rev: u64) -> anyhow::Result<Vec<(MessageId, MessageRecord)>> {
    let mut messages = self.inner.query(&format!("lastmod:{}..", rev + 1))?;
    let mut out = Vec::new();
    while let Some(message) = messages.next() {
      // A message with no remaining files is a ghost (§9): skip it, same as `find`.
      if !message.paths()?.is_empty() {
        out.push(self.record_for(&message)?);
      }
    }
    Ok(out)
  }

  fn all_ids(&self) -> anyhow::Result<Vec<MessageId>> {
    let mut messages = self.inner.query("*")?;
    let mut out = Vec::new();
    while let Some(message) = messages.next() {
      if !message.paths()?.is_empty() {
        out.push(MessageId::new(message.id()?)?);
      }
    }
    Ok(out)
  }

  fn find(&self, id: &MessageId) -> anyhow::Result<Option<MessageRecord>> {
    let message = match self.inner.find_message(id.as_str())? {
      Some(message) => message,
      None => return Ok(None),
    };
    if message.paths()?.is_empty() {
      return Ok(None); // Ghost.
    }
    let (_, record) = self.record_for(&message)?;
    Ok(Some(record))
  }

  fn set_tags(&mut self, id: &MessageId, new_tags: &collections::BTreeSet<Tag>) -> anyhow::Result<()> {
    let mut message = self
      .inner
      .find_message(id.as_str())?
      .ok_or_else(|| anyhow::anyhow!("message {id} vanished before its tags could be set"))?;
    let current: collections::BTreeSet<Tag> = message
      .tags()?
      .into_iter()
      .map(Tag::new)
      .collect::<anyhow::Result<_>>()?;
    for tag in current.difference(new_tags) {
      message.remove_tag(tag.as_str())?;
    }
    for tag in new_tags.difference(&current) {
      message.add_tag(tag.as_str())?;
    }
    message.tags_to_maildir_flags()?;
    Ok(())
  }

  fn add_file(&mut self, abs_path: &path::Path) -> anyhow::Result<(MessageId, bool)> {
    let (message, is_duplicate) = self.inner.index_message(abs_path)?;
    Ok((MessageId::new(message.id()?)?, is_duplicate))
  }

  fn remove_file(&mut self, abs_path: &path::Path) -> anyhow::Result<()> {
    self.inner.remove_message(abs_path)?;
    Ok(())
  }

  fn fingerprint(&mut self, abs_path: &path::Path) -> anyhow::Result<Hex32> {
    self.cached_fingerprint(abs_path)
  }

  /// Atomic sections don't nest in notmuch; the orchestrator never tries to.
  fn transaction<R>(&mut self, mut body: impl FnMut(&mut Self) -> anyhow::Result<R>) -> anyhow::Result<R> {
    assert!(!self.transaction, "nested transactions aren't supported");
    self.inner.begin_atomic()?;
    self.transaction = true;
    match body(self) {
      Ok(result) => {
        self.transaction = false;
        self.inner.end_atomic()?;
        Ok(result)
      }
      Err(error) => {
        self.transaction = false;
        Err(error)
      }
    }
  }
}
