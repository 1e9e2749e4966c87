// The Orchestrator (spec.md §4.11): sequences UuidExchange, ChangeSetExchange, TagMerge,
// Reconcile, FileTransfer, Checkpoint, and the two optional phases as a state machine, joining a
// concurrent send/receive sub-task at every handshake so neither side deadlocks waiting on a full
// write buffer (spec.md §5).

pub mod changeset;
pub mod deletion;
pub mod reconcile;
pub mod sidecar;
pub mod tagmerge;
pub mod transfer;

use std::{io, process, thread};

use anyhow::Context as _;

use crate::{codec::Duplex, store::Store, syncstate::SyncState};

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Role {
  /// Dials the transport command and speaks first.
  Initiator,
  /// Accepts the transport command's connection and speaks second.
  Responder,
}

/// The options that shape a sync run beyond the wire protocol itself (spec.md §6.4).
#[derive(Clone, Debug, Default)]
pub struct Options {
  pub namespace: Option<String>,
  pub enable_deletion: bool,
  pub unsafe_deletion: bool,
  pub enable_sidecar: bool,
}

/// Counters accumulated during one sync run (spec.md §4.11, §6.5). Scoped to a single run, never
/// global.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransferCounters {
  pub tag_changes: u32,
  pub move_copy: u32,
  pub dup_deletions: u32,
  pub new_messages: u32,
  pub message_deletions: u32,
  pub new_files: u32,
}

/// Bytes read and written over the wire this side of one sync session (spec.md §6.5). The peer's
/// own byte counts never cross the wire, only its `TransferCounters` do (CountersExchange), so
/// this reports local traffic only.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ByteCounters {
  pub read: u64,
  pub written: u64,
}

impl TransferCounters {
  const WIRE_LEN: usize = 6;

  fn to_wire(self) -> [u32; Self::WIRE_LEN] {
    [
      self.tag_changes,
      self.move_copy,
      self.dup_deletions,
      self.new_messages,
      self.message_deletions,
      self.new_files,
    ]
  }

  fn from_wire(wire: [u32; Self::WIRE_LEN]) -> Self {
    Self {
      tag_changes: wire[0],
      move_copy: wire[1],
      dup_deletions: wire[2],
      new_messages: wire[3],
      message_deletions: wire[4],
      new_files: wire[5],
    }
  }
}

/// A full-duplex byte stream to the peer (spec.md §6.1): something that can be split into an
/// independently readable half and an independently writable half, so the concurrent send/receive
/// sub-tasks each own their direction outright.
pub trait Transport {
  type Read: io::Read + Send;
  type Write: io::Write + Send;

  fn connect(&self) -> anyhow::Result<(Self::Read, Self::Write)>;
}

/// Spawns `command` through a shell and speaks the protocol over its standard-input/output
/// (spec.md §6.1). Standard-error is drained on a best-effort background thread and surfaced as a
/// warning at teardown.
pub struct ShellTunnel {
  pub command: String,
}

impl Transport for ShellTunnel {
  type Read = process::ChildStdout;
  type Write = process::ChildStdin;

  fn connect(&self) -> anyhow::Result<(Self::Read, Self::Write)> {
    let mut child = process::Command::new("sh")
      .arg("-c")
      .arg(&self.command)
      .stdin(process::Stdio::piped())
      .stdout(process::Stdio::piped())
      .stderr(process::Stdio::piped())
      .spawn()
      .with_context(|| format!("couldn't spawn {:?}", self.command))?;
    let stdout = child.stdout.take().expect("stdout is piped");
    let stdin = child.stdin.take().expect("stdin is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");
    let command = self.command.clone();
    thread::spawn(move || {
      use io::Read as _;
      let mut text = String::new();
      if stderr.read_to_string(&mut text).is_ok() && !text.trim().is_empty() {
        log::warn!("{command}: {}", text.trim());
      }
      match child.wait() {
        Ok(status) if !status.success() => log::warn!("{command} exited with {status}"),
        Err(error) => log::warn!("{command}: couldn't wait on child: {error}"),
        Ok(_) => (),
      }
    });
    Ok((stdout, stdin))
  }
}

/// Runs one synchronization session against `store` over `reader`/`writer`, returning this side's
/// counters and, for the initiator only, the peer's counters (spec.md §4.11's CountersExchange
/// lets only the initiator print a combined summary).
pub fn run<S, R, W>(
  role: Role,
  store: &mut S,
  reader: R,
  writer: W,
  options: &Options,
) -> anyhow::Result<(TransferCounters, Option<TransferCounters>, ByteCounters)>
where
  S: Store,
  R: io::Read + Send,
  W: io::Write + Send,
{
  let mut reader = Duplex::new(reader);
  let mut writer = Duplex::new(writer);

  // Init / UuidExchange.
  let local_revision = store.revision()?;
  let peer_uuid = exchange(
    &mut reader,
    &mut writer,
    |writer| writer.write_uuid(&local_revision.uuid),
    |reader| reader.read_uuid(),
  )?;
  let peer_key = match &options.namespace {
    Some(namespace) => format!("{peer_uuid}-{namespace}"),
    None => peer_uuid.clone(),
  };
  let previous = SyncState::read(store.state_root(), &peer_key)?;

  // ChangeSetExchange.
  let local_changeset = changeset::build(store, previous.as_ref())?;
  let local_bytes = changeset::encode(&local_changeset)?;
  let remote_bytes = exchange(
    &mut reader,
    &mut writer,
    |writer| writer.write_blob(&local_bytes),
    |reader| reader.read_blob(),
  )?;
  let remote_changeset = changeset::decode(&remote_bytes)?;

  let mut counters = TransferCounters::default();

  // TagMerge.
  tagmerge::merge(store, &local_changeset, &remote_changeset, &mut counters)?;

  // Reconcile. The initiator is the side allowed to unlink a rename's source outright; the
  // responder stays conservative (spec.md §5).
  let aggressive_move = role == Role::Initiator;
  let fetch_list = reconcile::reconcile(store, &local_changeset, &remote_changeset, aggressive_move, &mut counters)?;

  // FileTransfer.
  transfer::exchange(store, &mut reader, &mut writer, &fetch_list, &remote_changeset, &mut counters)?;

  // Checkpoint: re-read the revision, since tag application and file adoption just advanced it.
  let revision = store.revision()?;
  SyncState { rev: revision.rev, uuid: peer_uuid.clone() }.write(store.state_root(), &peer_key)?;

  // Deletion (optional).
  if options.enable_deletion {
    deletion::sync(store, role, &mut reader, &mut writer, !options.unsafe_deletion, &mut counters)?;
  }

  // Sidecar (optional).
  if options.enable_sidecar {
    sidecar::sync(store.root(), role, &mut reader, &mut writer)?;
  }

  // CountersExchange.
  let result = match role {
    Role::Responder => {
      for value in counters.to_wire() {
        writer.write_u32(value)?;
      }
      (counters, None)
    }
    Role::Initiator => {
      let mut wire = [0u32; TransferCounters::WIRE_LEN];
      for slot in &mut wire {
        *slot = reader.read_u32()?;
      }
      (counters, Some(TransferCounters::from_wire(wire)))
    }
  };

  let (reader_read, reader_written) = reader.counters();
  let (writer_read, writer_written) = writer.counters();
  let bytes = ByteCounters { read: reader_read + writer_read, written: reader_written + writer_written };

  Ok((result.0, result.1, bytes))
}

/// Runs `send` and `recv` as two concurrent sub-tasks, joined before returning, so a blocking
/// write on one side can never stall a blocking read on the other (spec.md §5).
fn exchange<R, W, T>(
  reader: &mut Duplex<R>,
  writer: &mut Duplex<W>,
  send: impl FnOnce(&mut Duplex<W>) -> anyhow::Result<()> + Send,
  recv: impl FnOnce(&mut Duplex<R>) -> anyhow::Result<T> + Send,
) -> anyhow::Result<T>
where
  R: io::Read + Send,
  W: io::Write + Send,
  T: Send,
{
  thread::scope(|scope| {
    let sender = scope.spawn(move || send(writer));
    let received = recv(reader);
    sender.join().map_err(|_| anyhow::anyhow!("peer-write thread panicked"))??;
    received
  })
}
