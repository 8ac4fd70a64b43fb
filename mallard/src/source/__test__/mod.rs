#[cfg(test)]
mod __test__ {

  use crate::record::LogLevel;
  use crate::source::{PropagateMode, SourceTree};
  use regex::Regex;

  #[test]
  fn test_root_source() {
    let tree = SourceTree::new(LogLevel::INFO);
    let root = tree.root();
    assert_eq!(root.id(), 0);
    assert_eq!(root.qualified_name().as_ref(), "");
    assert_eq!(root.level(), LogLevel::INFO);
  }

  #[test]
  fn test_define_creates_path() {
    let tree = SourceTree::new(LogLevel::INFO);
    let source = tree.define("db.pool.writer", true).unwrap();
    assert_eq!(source.qualified_name().as_ref(), "db.pool.writer");
    assert_eq!(source.name(), "writer");
    assert_eq!(source.parent().unwrap().qualified_name().as_ref(), "db.pool");
    assert_eq!(tree.source_count(), 4);

    // Re-defining returns the same node
    let again = tree.define("db.pool.writer", true).unwrap();
    assert_eq!(again.id(), source.id());
    assert_eq!(tree.source_count(), 4);
  }

  #[test]
  fn test_define_missing_intermediate_fails() {
    let tree = SourceTree::new(LogLevel::INFO);
    assert!(tree.define("a.b.c", false).is_err());
    tree.define("a.b", true).unwrap();
    // Only the final segment is missing now
    assert!(tree.define("a.b.c", false).is_ok());
  }

  #[test]
  fn test_level_inheritance() {
    let tree = SourceTree::new(LogLevel::INFO);
    let parent = tree.define("net", true).unwrap();
    tree.set_level(&parent, LogLevel::DEBUG, PropagateMode::None);
    let child = tree.define("net.http", true).unwrap();
    assert_eq!(child.level(), LogLevel::DEBUG);
  }

  #[test]
  fn test_env_override_on_creation() {
    std::env::set_var("envtest_sub_log_level", "trace");
    let tree = SourceTree::new(LogLevel::INFO);
    let source = tree.define("envtest.sub", true).unwrap();
    assert_eq!(source.level(), LogLevel::TRACE);
    std::env::remove_var("envtest_sub_log_level");
  }

  #[test]
  fn test_set_level_modes() {
    let tree = SourceTree::new(LogLevel::INFO);
    let top = tree.define("app", true).unwrap();
    let child_a = tree.define("app.a", true).unwrap();
    let child_b = tree.define("app.b", true).unwrap();

    tree.set_level(&child_a, LogLevel::ERROR, PropagateMode::None);
    tree.set_level(&child_b, LogLevel::DIAG, PropagateMode::None);

    // SET overwrites everything
    tree.set_level(&top, LogLevel::WARN, PropagateMode::Set);
    assert_eq!(top.level(), LogLevel::WARN);
    assert_eq!(child_a.level(), LogLevel::WARN);
    assert_eq!(child_b.level(), LogLevel::WARN);

    // RESTRICT pulls down only the noisier descendants
    tree.set_level(&child_b, LogLevel::DIAG, PropagateMode::None);
    tree.set_level(&child_a, LogLevel::ERROR, PropagateMode::None);
    tree.set_level(&top, LogLevel::NOTICE, PropagateMode::Restrict);
    assert_eq!(child_a.level(), LogLevel::ERROR); // already stricter
    assert_eq!(child_b.level(), LogLevel::NOTICE); // was DIAG, pulled down

    // LOOSE raises only the stricter descendants
    tree.set_level(&top, LogLevel::TRACE, PropagateMode::Loose);
    assert_eq!(child_a.level(), LogLevel::TRACE); // was ERROR, raised
    assert_eq!(child_b.level(), LogLevel::TRACE); // was NOTICE, raised
    tree.set_level(&child_a, LogLevel::DIAG, PropagateMode::None);
    tree.set_level(&top, LogLevel::TRACE, PropagateMode::Loose);
    assert_eq!(child_a.level(), LogLevel::DIAG); // already looser
  }

  #[test]
  fn test_can_log_threshold() {
    let tree = SourceTree::new(LogLevel::INFO);
    let source = tree.define("svc", true).unwrap();
    assert!(source.can_log(LogLevel::FATAL));
    assert!(source.can_log(LogLevel::INFO));
    assert!(!source.can_log(LogLevel::DEBUG));
  }

  #[test]
  fn test_affinity_mask_bits() {
    let tree = SourceTree::new(LogLevel::INFO);
    let source = tree.define("routed", true).unwrap();
    assert_eq!(source.affinity_mask(), u64::MAX);

    source.set_affinity_mask(0);
    source.bind_target_slot(3);
    assert_eq!(source.affinity_mask(), 1 << 3);
    source.bind_target_slot(70); // beyond mask width, no effect
    assert_eq!(source.affinity_mask(), 1 << 3);
    source.unbind_target_slot(3);
    assert_eq!(source.affinity_mask(), 0);
  }

  #[test]
  fn test_passkeys() {
    let tree = SourceTree::new(LogLevel::INFO);
    let source = tree.define("private", true).unwrap();
    assert!(!source.has_passkey(0xBEEF));
    source.add_passkey(0xBEEF);
    source.add_passkey(0xBEEF);
    assert!(source.has_passkey(0xBEEF));
    source.remove_passkey(0xBEEF);
    assert!(!source.has_passkey(0xBEEF));
  }

  #[test]
  fn test_for_each_filters() {
    let tree = SourceTree::new(LogLevel::INFO);
    tree.define("db.pool", true).unwrap();
    tree.define("db.tx", true).unwrap();
    tree.define("net.http", true).unwrap();

    let mut names = Vec::new();
    let include = Regex::new("^db").unwrap();
    let exclude = Regex::new("tx$").unwrap();
    tree.for_each(Some(&include), Some(&exclude), &mut |source| {
      names.push(source.qualified_name().to_string());
    });
    assert_eq!(names, vec!["db".to_string(), "db.pool".to_string()]);
  }

  #[test]
  fn test_get_does_not_create() {
    let tree = SourceTree::new(LogLevel::INFO);
    assert!(tree.get("ghost").is_none());
    tree.define("ghost", true).unwrap();
    assert!(tree.get("ghost").is_some());
    assert_eq!(tree.get("").unwrap().id(), 0);
  }
}
