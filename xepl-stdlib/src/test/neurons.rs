use crate::test::run_xml;
use xepl_rt::Gene;

run_xml!(
    neurons_carry_properties,
    "<Neuron name='worker'><Properties><job>'cleaner'</job></Properties></Neuron>\
     <Print>{@worker\"job\"}</Print>",
    "cleaner\n"
);

run_xml!(
    methods_dispatch_by_dotted_name,
    "<Method name='Speak'><Print>{'Speak'.space(to)}</Print></Method>\
     <brain.Speak to='method param'/>",
    "Speak method param\n"
);

run_xml!(
    methods_keyword_registers_many,
    "<Neuron name='n'><Methods><Hello><Print>hello from n</Print></Hello></Methods></Neuron>\
     <n.Hello/>",
    "hello from n\n"
);

run_xml!(
    same_lobe_synapse_queues_until_the_line_ends,
    "<Axons><tick/></Axons>\
     <Synapses><tick><Print>tick!</Print></tick></Synapses>\
     <Trigger>tick</Trigger>",
    "tick!\n"
);

run_xml!(
    axons_with_bodies_subscribe_the_definer,
    "<Axons><pulse><Print>pulsed</Print></pulse></Axons>\
     <Trigger>pulse</Trigger>",
    "pulsed\n"
);

#[test]
fn cross_lobe_trigger_runs_the_method_over_there() -> anyhow::Result<()> {
    let (mut brain, sink) = crate::test::brain();
    brain.execute_xml(
        "<Lobe name='L'>\
           <Methods><Note><Print>note heard</Print></Note></Methods>\
           <Axons><a/></Axons>\
           <Synapses><a><L.Note/></a></Synapses>\
         </Lobe>",
    )?;
    let host = brain.host_neuron();
    let lobe_neuron = host.get_neuron("L").expect("lobe registered");
    let axon = lobe_neuron.get_axon("a").expect("axon registered");

    // synchronous trigger: we resume only after L ran the method
    axon.trigger_wait(&Gene::new("ping"));
    assert_eq!(sink.lock().as_str(), "note heard\n");

    assert!(brain.drop_neuron("L"));
    assert!(host.get_neuron("L").is_none());
    Ok(())
}

#[test]
fn neuron_features_expose_the_tree() -> anyhow::Result<()> {
    let (mut brain, _) = crate::test::brain();
    brain.execute_xml("<Neuron name='a'><Neuron name='b'/></Neuron>")?;
    let host = brain.host_neuron();
    let mut listing = String::new();
    assert!(host.feature_get("neurons", &mut listing));
    assert_eq!(listing, "<neurons><a><b></b></a></neurons>");
    let mut path = String::new();
    let inner = host.get_neuron("a").unwrap().get_neuron("b").unwrap();
    assert!(inner.feature_get("path", &mut path));
    assert_eq!(path, "/brain/a/b");
    Ok(())
}
