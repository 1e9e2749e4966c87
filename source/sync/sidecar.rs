// SidecarSync (spec.md §4.10, optional): exchanges the opaque `.uidvalidity` / `.mbsyncstate`
// files an IMAP-syncing tool leaves alongside a maildir. These are resolved by mtime, not content
// hash, since notmuch has no notion of them.

use std::{collections, fs, io, path, thread, time};

use crate::{codec::Duplex, sync::Role};

const PATTERNS: [&str; 2] = [".uidvalidity", ".mbsyncstate"];

fn scan(root: &path::Path) -> anyhow::Result<collections::BTreeMap<String, u64>> {
  let mut map = collections::BTreeMap::new();
  walk(root, root, &mut map)?;
  Ok(map)
}

fn walk(root: &path::Path, directory: &path::Path, map: &mut collections::BTreeMap<String, u64>) -> anyhow::Result<()> {
  for entry in fs::read_dir(directory)? {
    let entry = entry?;
    let path = entry.path();
    let file_type = entry.file_type()?;
    if file_type.is_dir() {
      walk(root, &path, map)?;
      continue;
    }
    let name = entry.file_name();
    let name = name.to_str().unwrap_or("");
    if !PATTERNS.contains(&name) {
      continue;
    }
    let relative = path
      .strip_prefix(root)?
      .to_str()
      .ok_or_else(|| anyhow::anyhow!("{path:?} is not valid UTF-8"))?
      .to_string();
    let mtime = entry.metadata()?.modified()?.duration_since(time::UNIX_EPOCH)?.as_secs();
    map.insert(relative, mtime);
  }
  Ok(())
}

pub fn sync<R, W>(root: &path::Path, role: Role, reader: &mut Duplex<R>, writer: &mut Duplex<W>) -> anyhow::Result<()>
where
  R: io::Read + Send,
  W: io::Write + Send,
{
  let local = scan(root)?;

  match role {
    Role::Responder => {
      let local_json = serde_json::to_vec(&local)?;
      writer.write_blob(&local_json)?;
      let pull: Vec<String> = serde_json::from_slice(&reader.read_blob()?)?;
      let push: Vec<String> = serde_json::from_slice(&reader.read_blob()?)?;
      exchange_bodies(root, reader, writer, &pull, &push)
    }
    Role::Initiator => {
      let remote: collections::BTreeMap<String, u64> = serde_json::from_slice(&reader.read_blob()?)?;
      let pull = wanted(&remote, &local);
      let push = wanted(&local, &remote);
      writer.write_blob(&serde_json::to_vec(&pull)?)?;
      writer.write_blob(&serde_json::to_vec(&push)?)?;
      exchange_bodies(root, reader, writer, &push, &pull)
    }
  }
}

/// Names present in `source` but absent from `target`, or present in both but newer in `source`.
fn wanted(source: &collections::BTreeMap<String, u64>, target: &collections::BTreeMap<String, u64>) -> Vec<String> {
  source
    .iter()
    .filter(|(name, mtime)| match target.get(*name) {
      None => true,
      Some(other) => *mtime > other,
    })
    .map(|(name, _)| name.clone())
    .collect()
}

/// Sends `send_names` in order while concurrently receiving `recv_names` in order. Received files
/// overwrite unconditionally.
fn exchange_bodies<R, W>(
  root: &path::Path,
  reader: &mut Duplex<R>,
  writer: &mut Duplex<W>,
  send_names: &[String],
  recv_names: &[String],
) -> anyhow::Result<()>
where
  R: io::Read + Send,
  W: io::Write + Send,
{
  thread::scope(|scope| -> anyhow::Result<()> {
    let root_for_sender = root.to_path_buf();
    let send_names = send_names.to_vec();
    let sender = scope.spawn(move || -> anyhow::Result<()> {
      for name in &send_names {
        let bytes = fs::read(root_for_sender.join(name))?;
        writer.write_blob(&bytes)?;
      }
      Ok(())
    });

    for name in recv_names {
      let bytes = reader.read_blob()?;
      let destination = root.join(name);
      let parent = destination.parent().unwrap_or_else(|| path::Path::new("."));
      fs::create_dir_all(parent)?;
      let temp = parent.join(format!(".notmuch-sync-tmp-{}", uuid::Uuid::new_v4()));
      fs::write(&temp, &bytes)?;
      fs::rename(&temp, &destination)?;
    }

    sender.join().map_err(|_| anyhow::anyhow!("sidecar-send thread panicked"))??;
    Ok(())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{io::Write as _, os::unix::net};

  #[test]
  fn wanted_picks_missing_and_newer() {
    let mut a = collections::BTreeMap::new();
    a.insert("x".to_string(), 1000);
    let mut b = collections::BTreeMap::new();
    b.insert("x".to_string(), 500);
    b.insert("y".to_string(), 1);
    assert_eq!(vec!["x".to_string()], wanted(&a, &b));
    assert_eq!(vec!["y".to_string()], wanted(&b, &a));
  }

  #[test]
  fn local_newer_file_is_pushed_unchanged() -> anyhow::Result<()> {
    let a_dir = tempfile::tempdir()?;
    let b_dir = tempfile::tempdir()?;
    fs::create_dir_all(a_dir.path().join("INBOX"))?;
    fs::create_dir_all(b_dir.path().join("INBOX"))?;
    fs::write(b_dir.path().join("INBOX/.mbsyncstate"), b"state-b")?;
    let b_file = fs::File::open(b_dir.path().join("INBOX/.mbsyncstate"))?;
    let older = b_file.metadata()?.modified()?;
    drop(b_file);

    let a_path = a_dir.path().join("INBOX/.mbsyncstate");
    let mut file = fs::File::create(&a_path)?;
    write!(file, "state-a")?;
    file.set_modified(older + time::Duration::from_secs(60))?;
    drop(file);

    let (sock_a, sock_b) = net::UnixStream::pair()?;
    thread::scope(|scope| -> anyhow::Result<()> {
      let root_b = b_dir.path().to_path_buf();
      let b_thread = scope.spawn(move || -> anyhow::Result<()> {
        let mut reader = Duplex::new(sock_b.try_clone()?);
        let mut writer = Duplex::new(sock_b);
        sync(&root_b, Role::Responder, &mut reader, &mut writer)
      });
      let mut reader = Duplex::new(sock_a.try_clone()?);
      let mut writer = Duplex::new(sock_a);
      sync(a_dir.path(), Role::Initiator, &mut reader, &mut writer)?;
      b_thread.join().map_err(|_| anyhow::anyhow!("b panicked"))??;
      Ok(())
    })?;

    assert_eq!(b"state-a".to_vec(), fs::read(b_dir.path().join("INBOX/.mbsyncstate"))?);
    Ok(())
  }
}
