// https://notmuchmail.org/ - the search database this tool synchronizes
// A two-node notmuch/maildir synchronizer: dials or accepts a shell transport, exchanges
// changesets since the last sync with that peer, merges tags, reconciles renamed/copied files,
// fetches what's still missing, and checkpoints a durable bookmark.

use std::{collections, error, fmt, io, result, thread};

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
mod notmuch;
pub mod store;
pub mod sync;
pub mod syncstate;

/// A named point in the protocol where a run can be made to fail on purpose, exercised by the
/// interruption-recovery tests in `tests/`. Never read outside of test builds' own invocations.
#[derive(Copy, Clone, Debug, PartialEq, clap::ValueEnum)]
pub enum Interruption {
  /// Abort after writing received file bodies but before the bookmark is rewritten.
  FileTransferPostBody,
  /// Abort after the bookmark's temp file is written but before it's renamed into place.
  CheckpointPreRename,
  /// Abort after the responder has applied the deletions the initiator requested.
  DeletionPostRemoteApply,
  /// Abort after a reconciled file's destination has been copied and indexed, but before its
  /// stale source is unlinked.
  ReconcilePostMove,
}

impl fmt::Display for Interruption {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    write!(formatter, "{self:?}")
  }
}

impl error::Error for Interruption {}

static INTERRUPTIONS: once_cell::sync::Lazy<std::sync::Mutex<collections::HashMap<thread::ThreadId, Interruption>>> =
  once_cell::sync::Lazy::new(|| std::sync::Mutex::new(collections::HashMap::new()));

pub fn interruption(name: &Option<Interruption>) {
  match (name, INTERRUPTIONS.lock().unwrap().entry(thread::current().id())) {
    (Some(interruption), collections::hash_map::Entry::Occupied(mut occupied)) => {
      occupied.insert(*interruption);
    }
    (Some(interruption), collections::hash_map::Entry::Vacant(vacant)) => {
      vacant.insert(*interruption);
    }
    (None, collections::hash_map::Entry::Occupied(occupied)) => {
      occupied.remove();
    }
    (None, collections::hash_map::Entry::Vacant(_)) => (),
  }
}

pub(crate) fn interrupt(interruption: Interruption) -> result::Result<(), Interruption> {
  match INTERRUPTIONS.lock().unwrap().get(&thread::current().id()) {
    Some(interruption_) if *interruption_ == interruption => Err(interruption),
    _ => Ok(()),
  }
}

pub fn run(arguments: &config::Arguments) -> anyhow::Result<()> {
  interruption(&arguments.interruption);

  let relative_maildir = &arguments.maildir_root;
  anyhow::ensure!(relative_maildir.is_relative(), "{relative_maildir:?} must be relative to the notmuch directory");
  let maildir_root = arguments.notmuch_dir.join(relative_maildir);

  let mut database = match notmuch::Database::open(&arguments.notmuch_dir, &maildir_root) {
    Ok(database) => database,
    Err(error) => match error.downcast_ref::<notmuch::Error>() {
      Some(inner) if inner.no_database() => notmuch::Database::create(&arguments.notmuch_dir, &maildir_root)?,
      _ => return Err(error),
    },
  };

  let options = sync::Options {
    namespace: arguments.namespace.clone(),
    enable_deletion: arguments.enable_deletion,
    unsafe_deletion: arguments.unsafe_deletion,
    enable_sidecar: arguments.enable_sidecar,
  };

  let (reader, writer): (Box<dyn io::Read + Send>, Box<dyn io::Write + Send>) = match arguments.role {
    sync::Role::Initiator => {
      let command = arguments.transport_cmd.clone().expect("clap enforces --transport for the initiator");
      let tunnel = sync::ShellTunnel { command };
      let (reader, writer) = sync::Transport::connect(&tunnel)?;
      (Box::new(reader), Box::new(writer))
    }
    sync::Role::Responder => (Box::new(io::stdin()), Box::new(io::stdout())),
  };

  let (local, remote, bytes) = sync::run(arguments.role, &mut database, reader, writer, &options)?;

  match remote {
    Some(remote) => {
      log::info!(
        "sync done: {} tag change(s), {} move/copy, {} duplicate deletion(s), {} new message(s), \
         {} deletion(s), {} new file(s) locally; peer applied {} tag change(s), {} move/copy, \
         {} duplicate deletion(s), {} new message(s), {} deletion(s), {} new file(s)",
        local.tag_changes,
        local.move_copy,
        local.dup_deletions,
        local.new_messages,
        local.message_deletions,
        local.new_files,
        remote.tag_changes,
        remote.move_copy,
        remote.dup_deletions,
        remote.new_messages,
        remote.message_deletions,
        remote.new_files,
      );
      eprintln!(
        "sync done: local {} tag change(s), {} move/copy, {} duplicate deletion(s), {} new message(s), \
         {} deletion(s), {} new file(s); peer {} tag change(s), {} move/copy, {} duplicate deletion(s), \
         {} new message(s), {} deletion(s), {} new file(s); {} byte(s) read, {} byte(s) written",
        local.tag_changes,
        local.move_copy,
        local.dup_deletions,
        local.new_messages,
        local.message_deletions,
        local.new_files,
        remote.tag_changes,
        remote.move_copy,
        remote.dup_deletions,
        remote.new_messages,
        remote.message_deletions,
        remote.new_files,
        bytes.read,
        bytes.written,
      );
    }
    None => {
      log::info!(
        "sync done: {} tag change(s), {} move/copy, {} duplicate deletion(s), {} new message(s), \
         {} deletion(s), {} new file(s)",
        local.tag_changes,
        local.move_copy,
        local.dup_deletions,
        local.new_messages,
        local.message_deletions,
        local.new_files,
      );
      eprintln!(
        "sync done: {} tag change(s), {} move/copy, {} duplicate deletion(s), {} new message(s), \
         {} deletion(s), {} new file(s); {} byte(s) read, {} byte(s) written",
        local.tag_changes,
        local.move_copy,
        local.dup_deletions,
        local.new_messages,
        local.message_deletions,
        local.new_files,
        bytes.read,
        bytes.written,
      );
    }
  }

  Ok(())
}

