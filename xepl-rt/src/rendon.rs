//! Rendons: scoped rendering contexts. When keyword dispatch falls through
//! with a rendon active, the gene is marked up instead: a registered render
//! takes it, or it is emitted as XML with `{{ … }}` payloads evaluated and
//! children rendered recursively.
use crate::neuron::Neuron;
use crate::scope::Scope;
use crate::script::evaluate_inner_scripts;
use crate::trace::error_report;
use xepl_core::xml::print::XmlBuilder;
use xepl_core::{Cord, Gene};

/// A rendering frame owning its output. Pushed onto the scope for the
/// duration of a rendered region.
pub struct Rendon {
    pub name: Cord,
    pub rendition: String,
}

impl Rendon {
    pub fn new(name: impl Into<Cord>) -> Rendon {
        Rendon { name: name.into(), rendition: String::new() }
    }
}

/// The fall-through from keyword dispatch: mark the gene up into the active
/// rendon. Always claims the gene.
pub(crate) fn processed(scope: &mut Scope, neuron: &Neuron, gene: &Gene) -> bool {
    markup(scope, neuron, gene);
    true
}

/// Resolve a registered render for the gene's name; otherwise emit the gene
/// as XML, evaluating embedded scripts in traits and content and recursing
/// into children.
pub fn markup(scope: &mut Scope, neuron: &Neuron, gene: &Gene) {
    let cortex = scope.cortex_handle();
    if cortex.did_render(scope, neuron, gene) {
        return;
    }
    if cortex.show_trace() {
        error_report!("renderer missed tag: {}", gene.name());
    }
    let mut head = String::new();
    let mut builder = XmlBuilder::open(gene.name(), gene.space().map(|s| s.as_str()), &mut head);
    for (name, value) in gene.traits_snapshot() {
        let mut evaluated = String::new();
        evaluate_inner_scripts(scope, neuron, Some(gene), &value, &mut evaluated);
        builder.attribute(&mut head, &name, &evaluated);
    }
    builder.close_attributes(&mut head);
    if let Some(content) = gene.content_string() {
        evaluate_inner_scripts(scope, neuron, Some(gene), &content, &mut head);
    }
    scope.rendition_append(&head);
    for child in gene.stable_genes() {
        markup(scope, neuron, &child);
    }
    let mut tail = String::new();
    builder.close(&mut tail);
    scope.rendition_append(&tail);
}

/// Render a form body: content payload first, then each child marked up.
pub fn generate_payload(scope: &mut Scope, neuron: &Neuron, form: &Gene) {
    if let Some(content) = form.content_string() {
        let mut payload = String::new();
        evaluate_inner_scripts(scope, neuron, Some(form), &content, &mut payload);
        scope.rendition_append(&payload);
    }
    for child in form.stable_genes() {
        markup(scope, neuron, &child);
    }
}
