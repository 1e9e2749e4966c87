// The abstract contract a search-database backend must satisfy. The core never talks to a
// concrete index engine directly; everything in `sync` goes through this trait so that a second
// backend (a different index engine) could be added without touching the protocol code.

use anyhow::Context as _;
use std::{collections, fmt, path};

/// An RFC-822 Message-ID. Opaque, non-empty, compared byte-exact.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MessageId(String);

impl MessageId {
  pub fn new(id: impl Into<String>) -> anyhow::Result<Self> {
    let id = id.into();
    anyhow::ensure!(!id.is_empty(), "message id must not be empty");
    Ok(Self(id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for MessageId {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(formatter, "{}", self.0)
  }
}

/// A non-empty string tag, never containing a NUL byte.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag(String);

impl Tag {
  pub fn new(tag: impl Into<String>) -> anyhow::Result<Self> {
    let tag = tag.into();
    anyhow::ensure!(!tag.is_empty(), "tag must not be empty");
    anyhow::ensure!(!tag.contains('\0'), "tag {tag:?} must not contain a NUL");
    Ok(Self(tag))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The sentinel tag consumed by DeletionSync (spec.md §4.5, §4.9).
  pub fn deleted() -> Self {
    Self("deleted".to_string())
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(formatter, "{}", self.0)
  }
}

/// A forward-slash-separated path relative to the store's maildir root. Never absolute, never
/// containing "..".
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RelPath(String);

impl RelPath {
  pub fn new(path: impl Into<String>) -> anyhow::Result<Self> {
    let path = path.into();
    anyhow::ensure!(!path.starts_with('/'), "{path:?} must be relative");
    anyhow::ensure!(
      !path.split('/').any(|component| component == ".."),
      "{path:?} must not contain '..'"
    );
    Ok(Self(path))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn to_abs(&self, root: &path::Path) -> path::PathBuf {
    root.join(&self.0)
  }

  pub fn from_abs(root: &path::Path, abs: &path::Path) -> anyhow::Result<Self> {
    let relative = abs
      .strip_prefix(root)
      .with_context(|| format!("{abs:?} is not under {root:?}"))?;
    let mut components = Vec::new();
    for component in relative.components() {
      match component {
        path::Component::Normal(part) => components.push(
          part
            .to_str()
            .with_context(|| format!("{part:?} is not valid UTF-8"))?
            .to_string(),
        ),
        other => anyhow::bail!("unexpected path component {other:?} in {abs:?}"),
      }
    }
    Self::new(components.join("/"))
  }
}

impl fmt::Display for RelPath {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(formatter, "{}", self.0)
  }
}

/// A lower-case hex-encoded SHA-256 digest.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Hex32([u8; 32]);

impl Hex32 {
  pub fn new(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }
}

impl fmt::Display for Hex32 {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in &self.0 {
      write!(formatter, "{byte:02x}")?;
    }
    Ok(())
  }
}

impl fmt::Debug for Hex32 {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(formatter, "Hex32({self})")
  }
}

impl std::str::FromStr for Hex32 {
  type Err = anyhow::Error;

  fn from_str(str: &str) -> anyhow::Result<Self> {
    anyhow::ensure!(str.len() == 64, "{str:?} is not 64 hex characters");
    let mut bytes = [0; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
      *byte = u8::from_str_radix(&str[i * 2..i * 2 + 2], 16)
        .with_context(|| format!("{str:?} is not valid hex"))?;
    }
    Ok(Self(bytes))
  }
}

/// `{ name: RelPath, sha: Hex32 }`. File order within a `MessageRecord` is not significant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileRecord {
  pub name: RelPath,
  pub sha: Hex32,
}

/// `{ tags: Set<Tag>, files: Sequence<FileRecord> }`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MessageRecord {
  pub tags: collections::BTreeSet<Tag>,
  pub files: Vec<FileRecord>,
}

/// `{ rev: u64, uuid: Ascii36 }`. `rev` is monotonically non-decreasing for the lifetime of one
/// Store instance; `uuid` identifies that instance (a freshly recreated Store has a new uuid).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Revision {
  pub rev: u64,
  pub uuid: String,
}

/// The operations the synchronization core requires from a search-database backend (spec.md
/// §4.1). The Store owns all on-disk state; it serializes its own writers, but readers may
/// proceed concurrently with a writer.
pub trait Store {
  /// The Store's current revision and instance uuid.
  fn revision(&self) -> anyhow::Result<Revision>;

  /// The maildir root this Store's RelPaths are relative to.
  fn root(&self) -> &path::Path;

  /// Where this Store keeps its own durable state (the directory a per-peer sync bookmark is
  /// written under). Distinct from `root()`: a backend's database directory doesn't have to be,
  /// and for notmuch usually isn't, the maildir root itself.
  fn state_root(&self) -> &path::Path;

  /// Every message whose last-modified revision is strictly greater than `rev`. A starting `rev`
  /// of zero yields every message.
  fn messages_since(
    &self,
    rev: u64,
  ) -> anyhow::Result<Vec<(MessageId, MessageRecord)>>;

  /// Every MessageId currently known to the Store (ghosts excluded, see `find`).
  fn all_ids(&self) -> anyhow::Result<Vec<MessageId>>;

  /// `None` both when the id is genuinely absent and when it is a ghost (an index entry with no
  /// associated files) — this core treats the two identically.
  fn find(&self, id: &MessageId) -> anyhow::Result<Option<MessageRecord>>;

  /// Atomic replacement of a message's tag set, also rewriting maildir flag letters in affected
  /// file names (flag synchronization).
  fn set_tags(&mut self, id: &MessageId, new_tags: &collections::BTreeSet<Tag>) -> anyhow::Result<()>;

  /// Ingests a maildir file at `abs_path`, linking it to the message with the matching
  /// Message-ID. `is_duplicate` is true if that Message-ID was already present.
  fn add_file(&mut self, abs_path: &path::Path) -> anyhow::Result<(MessageId, bool)>;

  /// Detaches a file from its message, destroying the message if it was the last file.
  fn remove_file(&mut self, abs_path: &path::Path) -> anyhow::Result<()>;

  /// The ContentHasher digest of the file at `abs_path`. Backends may cache this.
  fn fingerprint(&mut self, abs_path: &path::Path) -> anyhow::Result<Hex32>;

  /// Runs `body` inside a single atomic section: the backend's sole writer-serialization
  /// mechanism. Every mutating phase of the orchestrator wraps itself in one of these and never
  /// holds one open across a network read (spec.md §4.1, §5).
  fn transaction<R>(&mut self, body: impl FnMut(&mut Self) -> anyhow::Result<R>) -> anyhow::Result<R>
  where
    Self: Sized;
}
