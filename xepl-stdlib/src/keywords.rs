//! The keyword kit. Keywords receive the host neuron, the call gene and the
//! evaluated parameter string; structure keywords build neurons, axons and
//! methods, flow keywords gate and repeat their inner genes.
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use xepl_rt::script;
use xepl_rt::{
    cant_find, method_execute, receive_axon, Axon, Cortex, Flag, Gene, Lobe, Neuron, Rendon,
};

static AUTO_NEURON: AtomicU64 = AtomicU64::new(0);
static AUTO_LOBE: AtomicU64 = AtomicU64::new(0);

/// `name="auto"` asks for a fresh numbered name.
fn auto_name(call: &Gene, prefix: &str, counter: &AtomicU64) {
    if call.trait_get("name").as_deref() == Some("auto") {
        let number = counter.fetch_add(1, Ordering::Relaxed) + 1;
        call.trait_set("name", &format!("{prefix}{number}"));
    }
}

pub fn register(cortex: &Cortex) {
    // ---- structure ---------------------------------------------------

    cortex.register_keyword("Neuron", |scope, neuron, call, _param| {
        auto_name(call, "Neuron", &AUTO_NEURON);
        let fresh = Neuron::with_config(scope, neuron, call);
        fresh.shadows().add_gene(call);
        fresh.process_inner_genes(scope, call);
        Ok(())
    });

    cortex.register_keyword("Lobe", |scope, neuron, call, _param| {
        auto_name(call, "Lobe", &AUTO_LOBE);
        let lobe = Lobe::spawn(scope, neuron, call);
        lobe.start()?;
        Ok(())
    });

    cortex.register_keyword("Axons", |_scope, neuron, call, _param| {
        if !call.has_children() {
            return Ok(());
        }
        neuron.shadows().make_one("Axons").absorb(call);
        for child in call.stable_genes() {
            let axon = match neuron.hunt_axon(child.name()) {
                Some(axon) => axon,
                None => Axon::new(neuron, child.name().clone()),
            };
            if child.has_children() {
                axon.synapse(neuron, &child);
            }
        }
        Ok(())
    });

    cortex.register_keyword("Synapses", |scope, neuron, call, _param| {
        if !call.has_children() {
            return Ok(());
        }
        neuron.shadows().make_one("Synapses").absorb(call);
        let cortex = scope.cortex_handle();
        for child in call.stable_genes() {
            match cortex.locate_axon(neuron, child.name(), '.') {
                Some(axon) => {
                    neuron.synapse_axon(&axon, receive_axon, Some(child.clone()))
                }
                None => cant_find("Axon", Some(neuron), child.name()),
            }
        }
        Ok(())
    });

    cortex.register_keyword("Methods", |_scope, neuron, call, _param| {
        for child in call.stable_genes() {
            neuron.register_method(child.name(), method_execute, Some(&child));
        }
        Ok(())
    });

    cortex.register_keyword("Method", |_scope, neuron, call, _param| {
        if let Some(name) = call.trait_get("name") {
            neuron.register_method(&name, method_execute, Some(call));
        }
        Ok(())
    });

    cortex.register_keyword("Macros", |_scope, neuron, call, _param| {
        for child in call.stable_genes() {
            if let Some(expansion) = child.content_string() {
                neuron.register_macro(child.name(), &expansion);
            }
        }
        Ok(())
    });

    cortex.register_keyword("Forms", |_scope, neuron, call, _param| {
        for child in call.stable_genes() {
            neuron.register_form(&child);
        }
        Ok(())
    });

    cortex.register_keyword("Genes", |_scope, neuron, call, _param| {
        for child in call.stable_genes() {
            child.absorb_traits(call);
            neuron.register_gene(child.name(), &child);
        }
        Ok(())
    });

    cortex.register_keyword("Properties", |scope, neuron, call, _param| {
        for child in call.stable_genes() {
            let value = match child.content_string() {
                Some(content) => script::eval(scope, neuron, Some(&child), &content).0,
                None => String::new(),
            };
            neuron.property_set(child.name(), &value);
        }
        Ok(())
    });

    // ---- output and signals ------------------------------------------

    cortex.register_keyword("Print", |scope, neuron, call, param| {
        let cortex = scope.cortex_handle();
        if cortex.show_trace() {
            let line = format!("{}: {}", scope.lobe().neuron().name(), param);
            cortex.output().line(&line);
        } else {
            cortex.output().line(param);
        }
        neuron.process_inner_genes(scope, call);
        Ok(())
    });

    cortex.register_keyword("Trigger", |scope, neuron, call, param| {
        let cortex = scope.cortex_handle();
        let Some(axon) = cortex.locate_axon(neuron, param, '.') else {
            cant_find("Axon", Some(neuron), param);
            return Ok(());
        };
        let payload = match call.trait_get("gene") {
            Some(name) => match cortex.locate_gene(scope, neuron, &name) {
                Some(found) => found,
                None => {
                    cant_find("Gene", Some(neuron), &name);
                    return Ok(());
                }
            },
            None => match scope.index_link() {
                Some(index) => index,
                None => return Ok(()),
            },
        };
        axon.trigger_gene(&payload);
        Ok(())
    });

    cortex.register_keyword("Text", |scope, neuron, call, _param| {
        scope.push_rendon(Rendon::new(call.name().clone()));
        if let Some(content) = call.content_string() {
            let (payload, _) = script::eval(scope, neuron, Some(call), &content);
            scope.rendition_append(&payload);
        }
        neuron.process_inner_genes(scope, call);
        if let Some(rendon) = scope.pop_rendon() {
            scope.cortex_handle().output().write(&rendon.rendition);
        }
        Ok(())
    });

    // ---- gene manipulation -------------------------------------------

    cortex.register_keyword("Index", |scope, neuron, call, param| {
        let cortex = scope.cortex_handle();
        match cortex.locate_gene(scope, neuron, param) {
            Some(found) => {
                scope.with_index(found, |scope| neuron.process_inner_genes(scope, call));
                Ok(())
            }
            None => bail!("can't replace index with: {param}"),
        }
    });

    cortex.register_keyword("New", |scope, neuron, call, param| {
        let Some(index) = scope.index_link() else {
            return Ok(());
        };
        let located = index.make_one(param);
        if let Some(template_name) = call.trait_get("template") {
            let cortex = scope.cortex_handle();
            match cortex.locate_gene(scope, neuron, &template_name) {
                Some(template) => located.absorb(&template),
                None => cant_find("Gene", Some(neuron), &template_name),
            }
        }
        scope.with_index(located.clone(), |scope| {
            neuron.process_inner_genes(scope, call)
        });
        scope.set_outdex(Some(located));
        Ok(())
    });

    cortex.register_keyword("Using", |scope, neuron, call, param| {
        if !call.has_children() {
            return Ok(());
        }
        let cortex = scope.cortex_handle();
        let Some(using) = cortex.locate_gene(scope, neuron, param) else {
            return Ok(());
        };
        for worker in using.stable_genes() {
            scope.with_index(worker, |scope| neuron.process_inner_genes(scope, call));
        }
        Ok(())
    });

    cortex.register_keyword("Mod", |scope, neuron, call, _param| {
        if let Some(content) = call.content_string() {
            if let Some(index) = scope.index_link() {
                script::eval(scope, neuron, Some(&index), &content);
            }
        }
        if call.has_children() {
            neuron.process_inner_genes(scope, call);
        }
        Ok(())
    });

    // ---- flow control -------------------------------------------------

    cortex.register_keyword("ForEach", |scope, neuron, call, param| {
        if !call.has_children() {
            return Ok(());
        }
        for piece in param.split(':') {
            scope.with_frame(|scope| {
                scope.term_set("for", piece);
                neuron.process_inner_genes(scope, call);
            });
        }
        Ok(())
    });

    cortex.register_keyword("Yes", |scope, neuron, call, param| {
        let index = scope.index_link();
        let (_, truth) = script::eval_seeded(scope, neuron, index.as_ref(), param, "", true);
        if truth {
            neuron.process_inner_genes(scope, call);
        }
        Ok(())
    });

    cortex.register_keyword("No", |scope, neuron, call, param| {
        let index = scope.index_link();
        let (_, truth) = script::eval_seeded(scope, neuron, index.as_ref(), param, "", true);
        if !truth {
            neuron.process_inner_genes(scope, call);
        }
        Ok(())
    });

    cortex.register_keyword("When", |scope, neuron, call, _param| {
        let Some(content) = call.content_string() else {
            return Ok(());
        };
        let (chosen, _) = script::eval(scope, neuron, Some(call), &content);
        if neuron.process_exact_gene(scope, &chosen, call) {
            return Ok(());
        }
        neuron.process_exact_gene(scope, "NotFound", call);
        Ok(())
    });

    cortex.register_keyword("Repeat", |scope, neuron, call, param| {
        let mut remaining: i64 = param.trim().parse().unwrap_or(0);
        if remaining < 1 || !call.has_children() {
            return Ok(());
        }
        let lobe_neuron = scope.lobe().neuron().clone();
        while remaining > 0
            && !lobe_neuron.flags().test(Flag::Lysing)
            && !lobe_neuron.flags().test(Flag::Closed)
        {
            remaining -= 1;
            let iter = remaining.to_string();
            scope.with_frame(|scope| {
                scope.term_set("iter", &iter);
                neuron.process_inner_genes(scope, call);
            });
        }
        Ok(())
    });

    cortex.register_keyword("Run", |scope, neuron, call, _param| {
        if let Some(content) = call.content_string() {
            if !content.is_empty() && !content.starts_with('{') {
                script::eval(scope, neuron, Some(call), &content);
            }
        }
        if call.has_children() {
            neuron.process_inner_genes(scope, call);
        }
        Ok(())
    });

    cortex.register_keyword("Command", |scope, _neuron, _call, param| {
        let cortex = scope.cortex_handle();
        cortex.did_command(scope, param);
        Ok(())
    });
}
