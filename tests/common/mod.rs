use std::{fs, io::Write as _, path};

mod notmuch;

pub fn email(id: &str) -> String {
  format!("From: {id}\r\nTo: {id}\r\nSubject: {id}\r\nMessage-ID: {id}\r\n\r\n{id}\r\n")
}

/// One side of a synchronized pair: a notmuch database plus the flat maildir it indexes.
pub struct Node {
  directory: tempfile::TempDir,
}

impl Node {
  pub fn new() -> anyhow::Result<Self> {
    let directory = tempfile::tempdir()?;
    for subdirectory in ["cur", "new", "tmp"] {
      fs::create_dir_all(directory.path().join("mail").join(subdirectory))?;
    }
    notmuch::run(directory.path(), &["new", "--no-hooks"])?;
    Ok(Self { directory })
  }

  pub fn notmuch_dir(&self) -> path::PathBuf {
    self.directory.path().to_path_buf()
  }

  pub fn maildir_root(&self) -> path::PathBuf {
    path::PathBuf::from("mail")
  }

  pub fn maildir_abs(&self) -> path::PathBuf {
    self.directory.path().join("mail")
  }

  /// Drops a message at `relative` (e.g. `"cur/a.mail"`) under the maildir root and indexes it
  /// with the real `notmuch` binary, matching what a fresh `notmuch new` would produce.
  pub fn deliver(&self, relative: &str, id: &str) -> anyhow::Result<path::PathBuf> {
    let path = self.maildir_abs().join(relative);
    fs::create_dir_all(path.parent().unwrap())?;
    let mut file = fs::File::create(&path)?;
    file.write_all(email(id).as_bytes())?;
    file.sync_all()?;
    notmuch::run(&self.notmuch_dir(), &["new", "--no-hooks"])?;
    Ok(path)
  }

  pub fn tag(&self, query: &str, tag_expr: &str) -> anyhow::Result<()> {
    notmuch::run(&self.notmuch_dir(), &["tag", tag_expr, "--", query])
  }

  pub fn tags_of(&self, id: &str) -> anyhow::Result<Vec<String>> {
    notmuch::search_tags(&self.notmuch_dir(), id)
  }

  pub fn exists(&self, relative: &str) -> bool {
    self.maildir_abs().join(relative).exists()
  }

  /// Renames an already-indexed message's file on disk, then re-indexes it, the way a MUA's
  /// `new/` to `cur/` transition (or any other local filename change) would.
  pub fn rename(&self, from: &str, to: &str) -> anyhow::Result<()> {
    let to_abs = self.maildir_abs().join(to);
    fs::create_dir_all(to_abs.parent().unwrap())?;
    fs::rename(self.maildir_abs().join(from), to_abs)?;
    notmuch::run(&self.notmuch_dir(), &["new", "--no-hooks"])
  }

  fn arguments(&self, role: notmuch_sync::sync::Role) -> notmuch_sync::config::Arguments {
    notmuch_sync::config::Arguments {
      role,
      transport_cmd: None,
      notmuch_dir: self.notmuch_dir(),
      maildir_root: self.maildir_root(),
      namespace: None,
      enable_deletion: false,
      unsafe_deletion: false,
      enable_sidecar: false,
      interruption: None,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct Options {
  pub namespace: Option<String>,
  pub enable_deletion: bool,
  pub unsafe_deletion: bool,
  /// Interrupts the initiator's own run, which is driven in-process so the error can be
  /// downcast and checked directly.
  pub interruption: Option<notmuch_sync::Interruption>,
  /// Interrupts the responder's run instead, which is only observable from the initiator's side
  /// as some protocol failure, since the responder's result lives in a child process.
  pub responder_interruption: Option<notmuch_sync::Interruption>,
}

fn interruption_arg(interruption: notmuch_sync::Interruption) -> &'static str {
  match interruption {
    notmuch_sync::Interruption::FileTransferPostBody => "file-transfer-post-body",
    notmuch_sync::Interruption::CheckpointPreRename => "checkpoint-pre-rename",
    notmuch_sync::Interruption::DeletionPostRemoteApply => "deletion-post-remote-apply",
    notmuch_sync::Interruption::ReconcilePostMove => "reconcile-post-move",
  }
}

/// The shell command that re-invokes this very test binary's sibling `notmuch-sync` binary as the
/// responder, reading/writing its own inherited stdio — exactly the shape a real `ssh peer-host
/// notmuch-sync responder ...` transport takes, just addressed to a local second process instead
/// of a remote host.
fn responder_transport(b: &Node, options: &Options) -> String {
  let mut command = format!(
    "{} responder --notmuch {:?} --maildir {:?}",
    env!("CARGO_BIN_EXE_notmuch-sync"),
    b.notmuch_dir(),
    b.maildir_root(),
  );
  if let Some(namespace) = &options.namespace {
    command.push_str(&format!(" --namespace {namespace:?}"));
  }
  if options.enable_deletion {
    command.push_str(" --enable-deletion");
  }
  if options.unsafe_deletion {
    command.push_str(" --unsafe-deletion");
  }
  if let Some(interruption) = options.responder_interruption {
    command.push_str(&format!(" --interruption {}", interruption_arg(interruption)));
  }
  command
}

/// Runs one sync session with `a` as initiator and `b` as responder. `b`'s side runs as a child
/// process of this test binary (spawned by `a`'s `ShellTunnel`); `a`'s side runs in this process
/// via the same public entry point the `notmuch-sync` binary itself calls.
pub fn sync(a: &Node, b: &Node, options: &Options) -> anyhow::Result<()> {
  let mut arguments = a.arguments(notmuch_sync::sync::Role::Initiator);
  arguments.transport_cmd = Some(responder_transport(b, options));
  arguments.namespace = options.namespace.clone();
  arguments.enable_deletion = options.enable_deletion;
  arguments.unsafe_deletion = options.unsafe_deletion;
  arguments.interruption = options.interruption;
  notmuch_sync::run(&arguments)
}

/// Asserts that `sync` fails with exactly the given interruption on the initiator's own side, the
/// way a crash-recovery test wants to induce a partial run before re-syncing cleanly.
pub fn sync_interrupted(a: &Node, b: &Node, options: &Options, interruption: notmuch_sync::Interruption) -> anyhow::Result<()> {
  let error = sync(a, b, options).unwrap_err();
  match error.downcast_ref::<notmuch_sync::Interruption>() {
    Some(found) => {
      assert_eq!(&interruption, found);
      Ok(())
    }
    None => Err(error),
  }
}

/// Asserts that `sync` fails when the responder side is interrupted. The responder's own typed
/// `Interruption` error lives in a child process and isn't observable here; the initiator just
/// sees its peer disappear mid-protocol.
pub fn sync_fails(a: &Node, b: &Node, options: &Options) {
  sync(a, b, options).unwrap_err();
}
