// The CLI surface (spec.md §6.4), shaped like the teacher's own `sin::Arguments`: a plain
// `clap::Args` struct flattened into a top-level parser in main.rs, which adds the log directory
// and verbosity flags the way the teacher's binary does.

use std::path;

use crate::sync::Role;

#[derive(clap::Args)]
#[group(skip)]
pub struct Arguments {
  #[arg(help = "Role in the duplex handshake: initiator | responder", hide_possible_values(true))]
  pub role: Role,

  #[arg(
    long = "transport",
    help = "Shell command dialing the peer, e.g. `ssh peer-host notmuch-sync responder ...`. \
            Required for the initiator; unused by the responder, which speaks over its own \
            inherited standard input/output.",
    required_if_eq("role", "initiator")
  )]
  pub transport_cmd: Option<String>,

  #[arg(long = "notmuch", help = "Notmuch database directory")]
  pub notmuch_dir: path::PathBuf,

  #[arg(long = "maildir", help = "Maildir root, relative to the notmuch directory")]
  pub maildir_root: path::PathBuf,

  #[arg(
    long = "namespace",
    help = "Disambiguates the sync-state bookmark when syncing with several peers"
  )]
  pub namespace: Option<String>,

  #[arg(
    long = "enable-deletion",
    help = "Propagate the deleted tag as file removal",
    default_value_t = false
  )]
  pub enable_deletion: bool,

  #[arg(
    long = "unsafe-deletion",
    help = "Also remove a message's last copy when it only exists on one side",
    default_value_t = false,
    requires = "enable_deletion"
  )]
  pub unsafe_deletion: bool,

  #[arg(
    long = "enable-sidecar",
    help = "Exchange the sidecar maildir-state map alongside the notmuch changeset",
    default_value_t = false
  )]
  pub enable_sidecar: bool,

  #[arg(long = "interruption", help = "Internal testing facility", hide = true)]
  pub interruption: Option<crate::Interruption>,
}
