use xepl_rt::{Gene, Rendon};

#[test]
fn text_marks_up_unclaimed_tags_as_xml() -> anyhow::Result<()> {
    let (mut brain, sink) = crate::test::brain();
    brain.execute_xml(
        "<Properties><name>'xepl'</name></Properties>\
         <Text><para>line {{name}}</para></Text>",
    )?;
    assert_eq!(sink.lock().as_str(), "<para>line xepl</para>");
    Ok(())
}

#[test]
fn registered_renders_take_their_tags() -> anyhow::Result<()> {
    let (mut brain, sink) = crate::test::brain();
    brain.register_render("bold", |scope, _neuron, gene| {
        let text = gene.content_string().unwrap_or_default();
        scope.rendition_append(&format!("*{text}*"));
        Ok(())
    });
    brain.execute_xml("<Text><bold>hi</bold> </Text>")?;
    assert_eq!(sink.lock().as_str(), "*hi*");
    Ok(())
}

#[test]
fn keywords_still_fire_inside_a_rendered_region() -> anyhow::Result<()> {
    let (mut brain, sink) = crate::test::brain();
    brain.execute_xml("<Text><Print>aside</Print></Text>")?;
    // Print claims its tag through the markup fallback, nothing is emitted
    // for it as markup
    assert_eq!(sink.lock().as_str(), "aside\n");
    Ok(())
}

#[test]
fn forms_render_payloads() -> anyhow::Result<()> {
    let (mut brain, _) = crate::test::brain();
    brain.execute_xml(
        "<Properties><name>'xepl'</name></Properties>\
         <Forms><greeting>Hello {{name}}</greeting></Forms>",
    )?;
    let host = brain.host_neuron();
    let scope = brain.scope();
    scope.push_rendon(Rendon::new("test"));
    assert!(host.rendered(scope, "greeting"));
    assert!(!host.rendered(scope, "missing"));
    let rendon = scope.pop_rendon().unwrap();
    assert_eq!(rendon.rendition, "Hello xepl");
    Ok(())
}

#[test]
fn form_replacement_deflates_the_old_body() -> anyhow::Result<()> {
    let (mut brain, _) = crate::test::brain();
    let host = brain.host_neuron();
    host.register_form(&Gene::parse("<g>first</g>")?);
    host.register_form(&Gene::parse("<g>second</g>")?);
    let form = host.form_get("g").unwrap();
    assert_eq!(form.content_string().unwrap(), "second");
    Ok(())
}
