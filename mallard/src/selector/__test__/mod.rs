#[cfg(test)]
mod __test__ {

  use crate::error::EngineError;
  use crate::filter::FilterRegistry;
  use crate::record::RecordView;
  use crate::selector::*;
  use std::sync::Arc;

  fn compile(input: &str) -> Result<Vec<SelectorNode>, EngineError> {
    let selectors = SelectorRegistry::new();
    let filters = FilterRegistry::new();
    compile_format(input, &selectors, &filters)
  }

  #[test]
  fn test_literal_only() {
    let nodes = compile("plain text").unwrap();
    assert_eq!(nodes.len(), 1);
    match &nodes[0] {
      SelectorNode::Static(text) => assert_eq!(text, "plain text"),
      other => panic!("unexpected node: {:?}", other),
    }
  }

  #[test]
  fn test_default_format_shape() {
    let nodes = compile("${time} ${level} [${tid}] ${src} ${msg}").unwrap();
    // time, " ", level, " [", tid, "] ", src, " ", msg
    assert_eq!(nodes.len(), 9);
    assert!(matches!(nodes[0], SelectorNode::Time { .. }));
    assert!(matches!(
      nodes[2],
      SelectorNode::Field {
        kind: FieldKind::Level,
        ..
      }
    ));
    assert!(matches!(
      nodes[8],
      SelectorNode::Field {
        kind: FieldKind::Msg,
        ..
      }
    ));
  }

  #[test]
  fn test_justification_arg() {
    let nodes = compile("${level:6}").unwrap();
    match &nodes[0] {
      SelectorNode::Field { kind, just } => {
        assert_eq!(*kind, FieldKind::Level);
        assert_eq!(*just, Some(6));
      },
      other => panic!("unexpected node: {:?}", other),
    }

    let nodes = compile("${level:-6}").unwrap();
    match &nodes[0] {
      SelectorNode::Field { just, .. } => assert_eq!(*just, Some(-6)),
      other => panic!("unexpected node: {:?}", other),
    }
  }

  #[test]
  fn test_time_args() {
    let nodes = compile("${time:utc:micros}").unwrap();
    match &nodes[0] {
      SelectorNode::Time {
        zone, precision, ..
      } => {
        assert_eq!(*zone, TimeZoneStyle::Utc);
        assert_eq!(*precision, TimePrecision::Micros);
      },
      other => panic!("unexpected node: {:?}", other),
    }
  }

  #[test]
  fn test_env_selector() {
    let nodes = compile("${env:name=HOME}").unwrap();
    match &nodes[0] {
      SelectorNode::Env { var, .. } => assert_eq!(var, "HOME"),
      other => panic!("unexpected node: {:?}", other),
    }
    assert!(compile("${env}").is_err());
  }

  #[test]
  fn test_const_selectors() {
    let nodes = compile("${const-str:a:b}${const-int: 42 }${const-level:warn}").unwrap();
    assert!(matches!(&nodes[0], SelectorNode::ConstStr(s) if s == "a:b"));
    assert!(matches!(nodes[1], SelectorNode::ConstInt(42)));
    assert!(matches!(
      nodes[2],
      SelectorNode::ConstLevel(crate::record::LogLevel::WARN)
    ));
    assert!(compile("${const-int:abc}").is_err());
    assert!(compile("${const-level:nope}").is_err());
  }

  #[test]
  fn test_if_selector() {
    let nodes = compile("${if: level <= WARN : !${msg} : ${msg}}").unwrap();
    match &nodes[0] {
      SelectorNode::If {
        then_nodes,
        else_nodes,
        ..
      } => {
        // " !${msg} " compiles to static, field, static
        assert_eq!(then_nodes.len(), 3);
        assert_eq!(else_nodes.len(), 2);
      },
      other => panic!("unexpected node: {:?}", other),
    }
    assert!(compile("${if: level <= WARN}").is_err());
  }

  #[test]
  fn test_switch_selector() {
    let input = "${switch: ${level} : ${case: ERROR : boom} : ${default: calm}}";
    let nodes = compile(input).unwrap();
    match &nodes[0] {
      SelectorNode::Switch {
        value,
        cases,
        default,
      } => {
        assert_eq!(value.len(), 1);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].0, "ERROR");
        assert!(!default.is_empty());
      },
      other => panic!("unexpected node: {:?}", other),
    }
  }

  #[test]
  fn test_expr_switch_selector() {
    let input = "${expr-switch: ${case: level == ERROR : red alert} : ${default: ok}}";
    let nodes = compile(input).unwrap();
    match &nodes[0] {
      SelectorNode::ExprSwitch { cases, default } => {
        assert_eq!(cases.len(), 1);
        assert!(!default.is_empty());
      },
      other => panic!("unexpected node: {:?}", other),
    }
  }

  #[test]
  fn test_fmt_directives() {
    let nodes = compile("${fmt:begin-fg-color=red:font=bold}x${fmt:default}").unwrap();
    match &nodes[0] {
      SelectorNode::Fmt(esc) => {
        assert!(esc.contains("\x1b[31m"));
        assert!(esc.contains("\x1b[1m"));
      },
      other => panic!("unexpected node: {:?}", other),
    }
    assert!(matches!(&nodes[2], SelectorNode::Fmt(esc) if esc == "\x1b[0m"));
    assert!(compile("${fmt:begin-fg-color=mauve}").is_err());
  }

  #[test]
  fn test_errors() {
    assert!(matches!(
      compile("${nosuch}"),
      Err(EngineError::UnknownSelector(_))
    ));
    assert!(matches!(
      compile("before ${msg"),
      Err(EngineError::ParseError { .. })
    ));
    assert!(matches!(
      compile("${case: X : y}"),
      Err(EngineError::ParseError { .. })
    ));
  }

  #[test]
  fn test_custom_selector_registration() {
    struct Marker;
    impl CustomSelector for Marker {
      fn emit(&self, _view: &RecordView<'_>, out: &mut String) {
        out.push_str("<mark>");
      }
    }

    let selectors = SelectorRegistry::new();
    let filters = FilterRegistry::new();
    let id1 = selectors.register_custom("marker", Arc::new(Marker)).unwrap();
    let id2 = selectors
      .register_custom("marker2", Arc::new(Marker))
      .unwrap();
    assert_ne!(id1, id2);
    assert!(selectors.register_custom("marker", Arc::new(Marker)).is_err());

    let nodes = compile_format("${marker}", &selectors, &filters).unwrap();
    match &nodes[0] {
      SelectorNode::Custom { type_id, .. } => assert_eq!(*type_id, id1),
      other => panic!("unexpected node: {:?}", other),
    }
  }
}
