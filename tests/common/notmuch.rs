// --config '' means the default configuration option will still be loaded (e.g.: new.tags =
// unread;inbox).

use std::{path, process, str};

pub fn run(database: &path::Path, arguments: &[&str]) -> anyhow::Result<()> {
  let mut arguments_ = vec!["--config", ""];
  arguments_.extend(arguments);
  let status = process::Command::new("notmuch")
    .env("NOTMUCH_DATABASE", database.as_os_str())
    .args(&arguments_[..])
    .status()?;
  assert_eq!(Some(0), status.code());
  Ok(())
}

pub fn search_tags(database: &path::Path, message_id: &str) -> anyhow::Result<Vec<String>> {
  let output = process::Command::new("notmuch")
    .env("NOTMUCH_DATABASE", database.as_os_str())
    .args(["--config", "", "search", "--output=tags", "--format=text"])
    .arg(format!("id:{message_id}"))
    .output()?;
  assert_eq!(Some(0), output.status.code());
  Ok(
    str::from_utf8(&output.stdout)
      .unwrap()
      .lines()
      .map(str::to_string)
      .collect(),
  )
}
