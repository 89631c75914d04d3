use crate::test::run_xml;

run_xml!(
    print_writes_a_line,
    "<Print>plain text</Print>",
    "plain text\n"
);

run_xml!(
    countdown_with_nested_short_terms,
    "<Repeat>3<Print>{'countdown'.space(iter)}<Repeat>{iter}<Print>{'  inner'.space(iter)}</Print></Repeat></Print></Repeat>",
    "countdown 2\n  inner 1\n  inner 0\ncountdown 1\n  inner 0\ncountdown 0\n"
);

#[test]
fn iter_is_unresolved_after_the_outer_scope_exits() -> anyhow::Result<()> {
    let (mut brain, _) = crate::test::brain();
    brain.execute_xml("<Repeat>2<Run>{;seen=iter}</Run></Repeat>")?;
    assert!(brain.scope().term_get("iter").is_none());
    Ok(())
}

run_xml!(
    for_each_presses_the_for_term,
    "<ForEach>a:b:c<Print>{for}</Print></ForEach>",
    "a\nb\nc\n"
);

run_xml!(
    yes_runs_on_truth,
    "<Properties><flag>'on'</flag></Properties><Yes>flag.is('on')<Print>lit</Print></Yes>",
    "lit\n"
);

run_xml!(
    yes_skips_on_false,
    "<Properties><flag>'off'</flag></Properties><Yes>flag.is('on')<Print>unseen</Print></Yes>",
    ""
);

run_xml!(
    no_runs_on_false,
    "<Properties><flag>'off'</flag></Properties><No>flag.is('on')<Print>dark</Print></No>",
    "dark\n"
);

run_xml!(
    when_selects_the_matching_child,
    "<When>{'two'}<one><Print>1</Print></one><two><Print>2</Print></two><NotFound><Print>?</Print></NotFound></When>",
    "2\n"
);

run_xml!(
    when_falls_back_to_not_found,
    "<When>{'zero'}<one><Print>1</Print></one><NotFound><Print>?</Print></NotFound></When>",
    "?\n"
);

run_xml!(
    run_evaluates_content_then_children,
    "<Run>;note='ready'<Print>{;note}</Print></Run>",
    "ready\n"
);

run_xml!(
    macros_expand_as_operators,
    "<Macros><excite>;_.append('!')</excite></Macros><Print>{'wow'.excite}</Print>",
    "wow!\n"
);
