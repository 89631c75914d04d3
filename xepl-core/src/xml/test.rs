use crate::gene::Gene;
use crate::Cord;
use proptest::prelude::*;

#[test]
fn parses_a_simple_element() {
    let gene = Gene::parse("<Hi>, World!</Hi>").unwrap();
    assert_eq!(gene.name().as_str(), "Hi");
    assert_eq!(gene.content_string().unwrap(), ", World!");
}

#[test]
fn parses_attributes_in_either_quote() {
    let gene = Gene::parse(r#"<tag one="1" two='t"o' three='3'/>"#).unwrap();
    let traits = gene.traits_snapshot();
    assert_eq!(traits.len(), 3);
    assert_eq!(traits[0].0.as_str(), "one");
    assert_eq!(traits[1].1, "t\"o");
    assert_eq!(traits[2].0.as_str(), "three");
}

#[test]
fn attribute_entities_are_decoded() {
    let gene = Gene::parse(r#"<t v="a&lt;b&amp;c&quot;d"/>"#).unwrap();
    assert_eq!(gene.trait_get("v").unwrap(), "a<b&c\"d");
}

#[test]
fn keeps_sibling_order_for_shared_names() {
    let gene = Gene::parse("<r><a n='1'/><b/><a n='2'/></r>").unwrap();
    let eldest = gene.get_first("a").unwrap();
    assert_eq!(eldest.trait_get("n").unwrap(), "1");
    let kids = gene.stable_genes();
    assert_eq!(kids.len(), 3);
    assert_eq!(kids[2].trait_get("n").unwrap(), "2");
}

#[test]
fn shell_line_comments_pi_and_doctype_are_skipped() {
    let text = "#!/usr/bin/env xepl\n\
                <?xml version='1.0'?>\n\
                <!DOCTYPE r <!ELEMENT r ANY>>\n\
                <!-- hello -->\n\
                <r a='1'><!-- inner --><c/></r>";
    let gene = Gene::parse(text).unwrap();
    assert_eq!(gene.name().as_str(), "r");
    assert_eq!(gene.children_count(), 1);
}

#[test]
fn cdata_appends_verbatim() {
    let gene = Gene::parse("<r>lead<![CDATA[ <raw> & ]]></r>").unwrap();
    assert_eq!(gene.content_string().unwrap(), "lead <raw> & ");
}

#[test]
fn underscore_elements_parse_but_vanish() {
    let gene = Gene::parse("<r><_note>draft<x/></_note><real/></r>").unwrap();
    assert_eq!(gene.children_count(), 1);
    assert_eq!(gene.first().unwrap().name().as_str(), "real");
}

#[test]
fn dotted_and_dashed_tags_are_legal() {
    let gene = Gene::parse("<brain.Speak to='x'/>").unwrap();
    assert_eq!(gene.name().as_str(), "brain.Speak");
    let gene = Gene::parse("<a-b+c.d/>").unwrap();
    assert_eq!(gene.name().as_str(), "a-b+c.d");
}

#[test]
fn namespace_prefix_lands_in_space() {
    let gene = Gene::parse("<ns:tag/>").unwrap();
    assert_eq!(gene.name().as_str(), "tag");
    assert_eq!(gene.space().unwrap().as_str(), "ns");
}

#[test]
fn bad_closing_tag_is_an_error_with_position() {
    let err = Gene::parse("<a><b>text</c></a>").unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("bad closing tag"), "{message}");
    assert!(message.contains("line: 1"), "{message}");
}

#[test]
fn unterminated_string_is_an_error() {
    let err = Gene::parse("<a v='oops></a>").unwrap_err();
    assert!(format!("{err}").contains("missing closing quote"));
}

#[test]
fn multiple_roots_build_into_the_holder() {
    let holder = Gene::new("text");
    super::parse_into(&holder, "<one/>\n<two/>").unwrap();
    let kids = holder.stable_genes();
    assert_eq!(kids.len(), 2);
    assert_eq!(kids[0].name().as_str(), "one");
    assert_eq!(kids[1].name().as_str(), "two");
}

#[test]
fn round_trip_fixed_tree() {
    let root = Gene::new("root");
    root.trait_set("k", "v");
    let child = Gene::new_in(&root, "c", None);
    child.assign_content("x");
    let text = root.xml_string();
    let back = Gene::parse(&text).unwrap();
    assert!(root.deep_eq(&back), "{text}");
}

proptest! {
    #[test]
    fn round_trip_arbitrary_trees(
        traits in prop::collection::vec(("[a-z][a-z0-9]{0,6}", "[ -~]{0,12}"), 0..5),
        kids in prop::collection::vec(
            ("[a-z][a-z0-9]{0,6}", prop::option::of("[a-zA-Z0-9,.! ]{1,16}")),
            0..5,
        ),
    ) {
        let root = Gene::new("root");
        for (name, value) in &traits {
            root.trait_set(name, value);
        }
        for (name, content) in &kids {
            let child = Gene::new_in(&root, Cord::from(name.as_str()), None);
            if let Some(content) = content {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    child.assign_content(trimmed);
                }
            }
        }
        let text = root.xml_string();
        let back = Gene::parse(&text).unwrap();
        prop_assert!(root.deep_eq(&back), "{}", text);
    }
}
