#[test]
fn test_show_policy_statement() {
    let mut engine = engine();
    med_policy(&mut engine);
    insta::assert_snapshot!(engine.show(ShowKind::PolicyStatement, "med").unwrap(), @r"
    policy-statement med {
        term low {
            source {
                metric < 10;
            }
            action {
                metric += 1;
                accept;
            }
        }
        term high {
            source {
                metric >= 100;
            }
            action {
                reject;
            }
        }
    }
    ");
}

#[test]
fn test_show_all_policies() {
    let mut engine = engine();
    med_policy(&mut engine);
    add_policy(&mut engine, "empty", &[]);
    let shown = engine.show(ShowKind::PolicyStatement, "").unwrap();
    assert!(shown.contains("policy-statement med {"), "{shown}");
    assert!(shown.contains("policy-statement empty {"), "{shown}");
    assert!(matches!(
        engine.show(ShowKind::PolicyStatement, "nope"),
        Err(PolicyError::NotFound(_))
    ));
}

#[test]
fn test_show_sets() {
    let mut engine = engine();
    engine.create_set("nets").unwrap();
    engine.create_set("unused").unwrap();
    engine.update_set(ValueType::SetIpv4Net, "nets", "10.0.0.0/8").unwrap();
    add_policy(&mut engine, "p", &[("t1", "network4 <= SET nets", "", "accept")]);

    assert_eq!(
        engine.show(ShowKind::Set, "nets").unwrap(),
        "nets: set_ipv4net \"10.0.0.0/8\"\nused by: p\n"
    );
    assert_eq!(
        engine.show(ShowKind::Set, "").unwrap(),
        "nets: set_ipv4net \"10.0.0.0/8\"\nunused: (empty)\n"
    );
}

#[test]
fn test_show_varmap() {
    let engine = engine();
    insta::assert_snapshot!(engine.show(ShowKind::Varmap, "rip").unwrap(), @r"
    rip:
      0 trace u32 rw
      1 policytags set_u32 rw
      5 tag u32 rw
      20 metric u32 rw
      22 network4 ipv4net r
    ");
    assert!(engine.show(ShowKind::Varmap, "ospf").is_err());
    let all = engine.show(ShowKind::Varmap, "").unwrap();
    assert!(all.contains("bgp:\n"), "{all}");
    assert!(all.contains("  21 as-path txt rw\n"), "{all}");
}

#[test]
fn test_show_code() {
    let mut engine = engine();
    med_policy(&mut engine);
    engine.update_import("bgp", &["med"]).unwrap();
    assert_eq!(engine.show(ShowKind::Code, "").unwrap(), "");
    compile(&mut engine);

    insta::assert_snapshot!(engine.compiled_program("bgp", Direction::Import).unwrap(), @r"
    POLICY_START med
    TERM_START low
    PUSH u32 10
    LOAD 20
    LT
    ONFALSE_EXIT
    PUSH u32 1
    LOAD 20
    ADD
    STORE 20
    ACCEPT
    TERM_END
    TERM_START high
    PUSH u32 100
    LOAD 20
    GE
    ONFALSE_EXIT
    REJECT
    TERM_END
    POLICY_END
    ");
    let shown = engine.show(ShowKind::Code, "bgp").unwrap();
    assert!(shown.starts_with("TARGET bgp/import\nPOLICY_START med\n"), "{shown}");
    assert_eq!(engine.show(ShowKind::Code, "rip").unwrap(), "");
}

#[parameterized(
    policy = { "policy-statement", ShowKind::PolicyStatement },
    set = { "set", ShowKind::Set },
    varmap = { "varmap", ShowKind::Varmap },
    code = { "code", ShowKind::Code },
)]
fn test_show_kind_names(text: &str, kind: ShowKind) {
    assert_eq!(text.parse::<ShowKind>().unwrap(), kind);
    assert_eq!(kind.to_string(), text);
}
