use crate::test::run_xml;

run_xml!(
    new_builds_under_the_index_and_sets_outdex,
    "<New>box<Mod>{$'kind'='gift'}</Mod></New><Print>{$$'kind'}</Print>",
    "gift\n"
);

run_xml!(
    splicers_bind_ephemerals_and_using_iterates,
    "<New>fruits<New>apple</New><New>banana</New><Mod>{.Set('basket')}</Mod></New>\
     <Using>basket<Print>{$''}</Print></Using>",
    "apple\nbanana\n"
);

run_xml!(
    genes_keyword_publishes_vitals,
    "<Genes><settings theme='dark'/></Genes><Print>{$settings'theme'}</Print>",
    "dark\n"
);

run_xml!(
    index_keyword_swaps_the_current_gene,
    "<Genes><config mode='fast'/></Genes>\
     <Index>config<Print>{$'mode'}</Print></Index>",
    "fast\n"
);

run_xml!(
    new_with_template_absorbs_it,
    "<Genes><proto color='red'/></Genes>\
     <New template='proto'>copy</New><Print>{$$'color'}</Print>",
    "red\n"
);

run_xml!(
    mod_rewrites_the_index_gene,
    "<Mod>{$'step'='one'}</Mod><Print>{$'step'}</Print>",
    "one\n"
);

#[test]
fn close_dispatch_deflates_the_index() -> anyhow::Result<()> {
    let (mut brain, _) = crate::test::brain();
    brain.execute_xml("<Mod>{$'left'='over'}</Mod>")?;
    let index = brain.scope().index_link().unwrap();
    assert_eq!(index.trait_get("left").unwrap(), "over");
    brain.close_dispatch();
    assert!(index.trait_get("left").is_none());
    Ok(())
}
