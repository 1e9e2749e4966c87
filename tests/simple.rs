use test_log::test;

mod common;

use common::{Node, Options};

// S1 (one-sided add): store A has a tagged message, B is empty. After sync both hold it, with the
// file content preserved.
#[test]
fn one_sided_add() -> anyhow::Result<()> {
  let a = Node::new()?;
  let b = Node::new()?;

  a.deliver("cur/a.mail", "a@x")?;
  a.tag("id:a@x", "+inbox +unread")?;

  common::sync(&a, &b, &Options::default())?;

  assert!(b.exists("cur/a.mail"));
  let mut tags = b.tags_of("a@x")?;
  tags.sort();
  assert_eq!(vec!["inbox", "unread"], tags);
  Ok(())
}

// S2 (tag union): both stores hold the same message with disjoint tags. After sync both hold the
// union.
#[test]
fn tag_union() -> anyhow::Result<()> {
  let a = Node::new()?;
  let b = Node::new()?;

  a.deliver("cur/m.mail", "m@x")?;
  b.deliver("cur/m.mail", "m@x")?;
  a.tag("id:m@x", "+a +b")?;
  b.tag("id:m@x", "+b +c")?;

  common::sync(&a, &b, &Options::default())?;

  let mut a_tags = a.tags_of("m@x")?;
  let mut b_tags = b.tags_of("m@x")?;
  a_tags.sort();
  b_tags.sort();
  assert_eq!(vec!["a", "b", "c"], a_tags);
  assert_eq!(a_tags, b_tags);
  Ok(())
}

// S3 (rename): both stores hold identical content under different maildir names. The initiator
// moves its own copy to match what the responder already has rather than duplicating it.
#[test]
fn rename_is_a_move_not_a_copy() -> anyhow::Result<()> {
  let a = Node::new()?;
  let b = Node::new()?;

  a.deliver("new/r.mail", "r@x")?;
  b.deliver("cur/r.mail", "r@x")?;

  common::sync(&a, &b, &Options::default())?;

  assert!(a.exists("cur/r.mail"));
  assert!(!a.exists("new/r.mail"));
  Ok(())
}

// S4 (delete with tag): both stores hold the message, A tags it deleted and syncs with deletion
// enabled; it disappears from both sides.
#[test]
fn delete_with_tag() -> anyhow::Result<()> {
  let a = Node::new()?;
  let b = Node::new()?;

  a.deliver("cur/d.mail", "d@x")?;
  b.deliver("cur/d.mail", "d@x")?;
  a.tag("id:d@x", "+deleted")?;

  let options = Options {
    enable_deletion: true,
    ..Options::default()
  };
  common::sync(&a, &b, &options)?;

  assert!(!a.exists("cur/d.mail"));
  assert!(!b.exists("cur/d.mail"));
  Ok(())
}

// Syncing a second time with nothing new between the two nodes touches neither maildir.
#[test]
fn rerun_with_nothing_new_is_a_no_op() -> anyhow::Result<()> {
  let a = Node::new()?;
  let b = Node::new()?;

  a.deliver("cur/once.mail", "once@x")?;
  a.tag("id:once@x", "+inbox")?;

  common::sync(&a, &b, &Options::default())?;
  common::sync(&a, &b, &Options::default())?;

  assert!(b.exists("cur/once.mail"));
  assert_eq!(vec!["inbox".to_string()], b.tags_of("once@x")?);
  Ok(())
}
