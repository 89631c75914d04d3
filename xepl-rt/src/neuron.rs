//! Neurons: named, refcounted behavior hosts. A neuron owns methods,
//! properties, forms and macros (through its observer and shadow genes),
//! child neurons, axons and subscriptions.
use crate::cortex::Cortex;
use crate::lobe::{Lobe, LobeState};
use crate::scope::Scope;
use crate::script;
use crate::signal::{Axon, Receiver, Receptor, Signal};
use crate::trace::{cant_find, error_report, trace};
use anyhow::Result;
use arcstr::literal;
use fxhash::FxHashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::{Arc, OnceLock, Weak};
use xepl_core::flags::AtomFlags;
use xepl_core::xml::print::XmlBuilder;
use xepl_core::{Cord, Flag, Gene};

/// A method body: host-registered logic plus the code gene captured at
/// registration.
pub type MethodFn =
    Arc<dyn Fn(&mut Scope, &Neuron, Option<&Gene>, &Gene) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Method {
    fun: MethodFn,
    code: Gene,
}

impl Method {
    fn perform(&self, scope: &mut Scope, neuron: &Neuron, call: Option<&Gene>) {
        if self.code.has_traits() {
            scope.nest_traits(&self.code);
        }
        if let Some(call) = call {
            if call.has_traits() {
                scope.nest_traits(call);
            }
        }
        if let Err(error) = (self.fun)(scope, neuron, call, &self.code) {
            error_report!("{}: {:#}", self.code.name(), error);
        }
    }
}

pub(crate) struct NeuronInner {
    name: Cord,
    alias: Mutex<Option<Cord>>,
    flags: AtomFlags,
    cortex: Cortex,
    parent: Mutex<Option<Neuron>>,
    observer: Gene,
    shadows: Gene,
    methods: Mutex<FxHashMap<Cord, Method>>,
    children: Mutex<IndexMap<Cord, Neuron>>,
    axons: Mutex<IndexMap<Cord, Axon>>,
    receptors: Mutex<Vec<Receptor>>,
    relays: Mutex<FxHashMap<u64, Receptor>>,
    lobe: OnceLock<Arc<LobeState>>,
}

/// Shared handle to a neuron. Parent and children hold each other strongly;
/// the idempotent drop path unlinks both sides.
#[derive(Clone)]
pub struct Neuron(Arc<NeuronInner>);

#[derive(Clone)]
pub struct WeakNeuron(Weak<NeuronInner>);

impl WeakNeuron {
    pub fn upgrade(&self) -> Option<Neuron> {
        self.0.upgrade().map(Neuron)
    }
}

impl fmt::Debug for Neuron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Neuron({})", self.0.name)
    }
}

impl Neuron {
    fn build(cortex: Cortex, parent: Option<&Neuron>, name: Cord) -> Neuron {
        let observer = match parent {
            Some(parent) => Gene::new_in(parent.observer(), literal!("Observer"), Some(name.clone())),
            None => Gene::with_space(literal!("Observer"), Some(name.clone())),
        };
        let shadows = match parent {
            Some(parent) => Gene::new_in(parent.shadows(), literal!("Shadows"), Some(name.clone())),
            None => Gene::with_space(literal!("Shadows"), Some(name.clone())),
        };
        Neuron(Arc::new(NeuronInner {
            name,
            alias: Mutex::new(None),
            flags: AtomFlags::new(),
            cortex,
            parent: Mutex::new(parent.cloned()),
            observer,
            shadows,
            methods: Mutex::new(FxHashMap::default()),
            children: Mutex::new(IndexMap::new()),
            axons: Mutex::new(IndexMap::new()),
            receptors: Mutex::new(Vec::new()),
            relays: Mutex::new(FxHashMap::default()),
            lobe: OnceLock::new(),
        }))
    }

    /// The root neuron of a cortex; everything else nests below it.
    pub(crate) fn root(cortex: Cortex, name: Cord) -> Neuron {
        Neuron::build(cortex, None, name)
    }

    /// A named child registered on `parent`, replacing any child of the
    /// same name.
    pub fn with_name(scope: &mut Scope, parent: &Neuron, name: impl Into<Cord>) -> Neuron {
        let name = name.into();
        let neuron = Neuron::build(parent.cortex(), Some(parent), name);
        scope.counters.neurons += 1;
        if parent.get_neuron(neuron.name()).is_some() {
            parent.drop_neuron(scope, neuron.name());
        }
        parent.register_neuron(&neuron);
        neuron
    }

    /// Build from a config gene: name from the `name` trait (defaulting to
    /// the element tag), content evaluated as RNA against the new neuron.
    pub fn with_config(scope: &mut Scope, parent: &Neuron, config: &Gene) -> Neuron {
        let name = Cord::from(config.trait_default("name", config.name()));
        let neuron = Neuron::build(parent.cortex(), Some(parent), name);
        scope.counters.neurons += 1;
        if let Some(content) = config.content_string() {
            script::eval(scope, &neuron, Some(config), &content);
        }
        if parent.get_neuron(neuron.name()).is_some() {
            parent.drop_neuron(scope, neuron.name());
        }
        parent.register_neuron(&neuron);
        neuron
    }

    pub fn name(&self) -> &Cord {
        &self.0.name
    }

    pub fn cortex(&self) -> Cortex {
        self.0.cortex.clone()
    }

    pub fn flags(&self) -> &AtomFlags {
        &self.0.flags
    }

    pub fn observer(&self) -> &Gene {
        &self.0.observer
    }

    pub fn shadows(&self) -> &Gene {
        &self.0.shadows
    }

    pub fn parent(&self) -> Option<Neuron> {
        self.0.parent.lock().clone()
    }

    pub fn alias(&self) -> Option<Cord> {
        self.0.alias.lock().clone()
    }

    pub fn set_alias(&self, alias: impl Into<Cord>) {
        *self.0.alias.lock() = Some(alias.into());
    }

    pub fn same(&self, other: &Neuron) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakNeuron {
        WeakNeuron(Arc::downgrade(&self.0))
    }

    pub(crate) fn set_lobe_state(&self, state: &Arc<LobeState>) {
        let _ = self.0.lobe.set(state.clone());
    }

    /// The lobe this neuron *is*, if it is one.
    pub fn as_lobe(&self) -> Option<Lobe> {
        self.0
            .lobe
            .get()
            .map(|state| Lobe::from_parts(self.clone(), state.clone()))
    }

    /// `/`-joined path from the root.
    pub fn path(&self, separator: char) -> String {
        let mut path = match self.parent() {
            Some(parent) => {
                let mut path = parent.path(separator);
                if !path.is_empty() {
                    path.push(separator);
                }
                path
            }
            None => String::new(),
        };
        path.push_str(&self.0.name);
        path
    }

    // ---- child registry ----------------------------------------------

    pub(crate) fn register_neuron(&self, child: &Neuron) {
        trace(&self.0.cortex, "New_Neuron", Some(self), child.name(), "");
        self.0
            .children
            .lock()
            .insert(child.name().clone(), child.clone());
    }

    pub(crate) fn unregister_neuron(&self, child: &Neuron) {
        let mut children = self.0.children.lock();
        if children
            .get(child.name())
            .map(|held| held.same(child))
            .unwrap_or(false)
        {
            children.shift_remove(child.name().as_str());
        }
    }

    pub fn get_neuron(&self, name: &str) -> Option<Neuron> {
        self.0.children.lock().get(name).cloned()
    }

    pub fn children_snapshot(&self) -> Vec<Neuron> {
        self.0.children.lock().values().cloned().collect()
    }

    /// Upward search: own name, children, alias, then the parent chain.
    pub fn hunt_neuron(&self, name: &str) -> Option<Neuron> {
        if self.0.name.as_str() == name {
            return Some(self.clone());
        }
        if let Some(found) = self.get_neuron(name) {
            return Some(found);
        }
        if self.alias().map(|alias| alias.as_str() == name).unwrap_or(false) {
            return Some(self.clone());
        }
        self.parent().and_then(|parent| parent.hunt_neuron(name))
    }

    /// Hunt plus the `this`/`parent` pseudo-names.
    pub fn find_neuron(&self, name: &str) -> Option<Neuron> {
        if name.is_empty() {
            return None;
        }
        if let Some(found) = self.hunt_neuron(name) {
            return Some(found);
        }
        match name {
            "this" => Some(self.clone()),
            "parent" => self.parent(),
            _ => None,
        }
    }

    /// Drop the named child. True when it existed.
    pub fn drop_neuron(&self, scope: &mut Scope, name: &str) -> bool {
        match self.get_neuron(name) {
            Some(child) => {
                child.dropped(scope);
                self.unregister_neuron(&child);
                true
            }
            None => false,
        }
    }

    /// XML listing of the child neuron tree.
    pub fn show_neurons(&self, out: &mut String) {
        for child in self.children_snapshot() {
            let mut builder = XmlBuilder::open(child.name(), None, out);
            builder.close_attributes(out);
            child.show_neurons(out);
            builder.close(out);
        }
    }

    // ---- properties, features, gene registry -------------------------

    pub fn property_set(&self, name: &str, value: &str) {
        self.0
            .observer
            .make_one("Vitals")
            .trait_set(name, value);
    }

    pub fn property_get(&self, name: &str, into: &mut String) -> bool {
        match self
            .0
            .observer
            .get_first("Vitals")
            .and_then(|vitals| vitals.trait_get(name))
        {
            Some(value) => {
                into.clear();
                into.push_str(&value);
                true
            }
            None => false,
        }
    }

    /// Own property, then up the parent chain.
    pub fn property_hunt(&self, name: &str, into: &mut String) -> bool {
        if self.property_get(name, into) {
            return true;
        }
        match self.parent() {
            Some(parent) => parent.property_hunt(name, into),
            None => false,
        }
    }

    /// Publish a gene under the observer's `Vitals`, replacing any previous
    /// gene of the same name.
    pub fn register_gene(&self, name: &str, gene: &Gene) {
        trace(&self.0.cortex, "Name_Gene", Some(self), name, "");
        let (vitals, _) = self.0.observer.make_one_gene("Vitals");
        vitals.replace_gene(name, gene);
    }

    pub fn feature_get(&self, feature: &str, into: &mut String) -> bool {
        if feature.is_empty() {
            into.push_str(self.name());
            return true;
        }
        match feature {
            "path" => {
                into.push('/');
                let path = self.path('/');
                into.push_str(&path);
                true
            }
            "neurons" => {
                let mut builder = XmlBuilder::open("neurons", None, into);
                builder.close_attributes(into);
                self.show_neurons(into);
                builder.close(into);
                true
            }
            _ => false,
        }
    }

    // ---- forms and macros --------------------------------------------

    /// Store a form under the shadows, replacing a previous form of the
    /// same name in place.
    pub fn register_form(&self, form: &Gene) {
        let (slot, created) = self
            .0
            .shadows
            .make_one("Forms")
            .make_one_gene(form.name());
        if !created {
            slot.deflate();
        }
        slot.absorb(form);
    }

    pub fn form_get(&self, name: &str) -> Option<Gene> {
        self.0
            .shadows
            .get_first("Forms")
            .and_then(|forms| forms.get_first(name))
    }

    /// Render a named form into the active rendon. True when the form
    /// exists.
    pub fn rendered(&self, scope: &mut Scope, form_name: &str) -> bool {
        match self.form_get(form_name) {
            Some(form) => {
                crate::rendon::generate_payload(scope, self, &form);
                true
            }
            None => false,
        }
    }

    pub fn register_macro(&self, name: &str, expansion: &str) {
        let (slot, created) = self
            .0
            .shadows
            .make_one("Macros")
            .make_one_gene(name);
        if !created {
            slot.deflate();
        }
        slot.assign_content(expansion);
    }

    /// Own macros, then up the parent chain.
    pub fn macro_hunt(&self, name: &str) -> Option<String> {
        let own = self
            .0
            .shadows
            .get_first("Macros")
            .and_then(|macros| macros.get_first(name))
            .and_then(|found| found.content_string());
        match own {
            Some(expansion) => Some(expansion),
            None => self.parent().and_then(|parent| parent.macro_hunt(name)),
        }
    }

    // ---- methods ------------------------------------------------------

    pub fn register_method<F>(&self, name: &str, fun: F, code: Option<&Gene>)
    where
        F: Fn(&mut Scope, &Neuron, Option<&Gene>, &Gene) -> Result<()> + Send + Sync + 'static,
    {
        trace(
            &self.0.cortex,
            if code.is_some() { "Xml_Method" } else { "Host_Method" },
            Some(self),
            name,
            "",
        );
        if let Some(code) = code {
            self.0.shadows.make_one("Methods").add_gene(code);
        }
        let method_gene = Gene::with_space(
            Cord::from(name),
            code.and_then(|gene| gene.space().cloned()),
        );
        if let Some(code) = code {
            method_gene.absorb(code);
        }
        self.0.methods.lock().insert(
            Cord::from(name),
            Method { fun: Arc::new(fun), code: method_gene },
        );
    }

    /// Invoke a registered method; the method gene's and the call gene's
    /// traits nest into the current short-term frame first.
    pub fn performed_method(&self, scope: &mut Scope, name: &str, call: Option<&Gene>) -> bool {
        let method = { self.0.methods.lock().get(name).cloned() };
        let Some(method) = method else {
            return false;
        };
        if self.0.cortex.show_trace() {
            let detail = call.map(|gene| {
                let mut text = String::new();
                gene.print_into(&mut text, 1);
                text
            });
            trace(
                &self.0.cortex,
                "ENTR_Method",
                Some(self),
                name,
                detail.as_deref().unwrap_or(""),
            );
        }
        method.perform(scope, self, call);
        true
    }

    // ---- gene processing ----------------------------------------------

    /// The dispatch chain for one gene: registered keyword, own method,
    /// dotted neuron.method.
    pub fn took_action(&self, scope: &mut Scope, gene: &Gene) -> bool {
        let cortex = self.cortex();
        if cortex.did_keyword(scope, self, gene) {
            return true;
        }
        if self.performed_method(scope, gene.name(), Some(gene)) {
            return true;
        }
        cortex.did_dot_tag(scope, self, gene)
    }

    /// Evaluate the gene's traits, open a short-term frame and run the
    /// dispatch chain; fall through to the active rendon.
    pub fn process_gene(&self, scope: &mut Scope, gene: &Gene) -> bool {
        if gene.has_traits() {
            script::evaluate_traits(scope, self, gene);
        }
        let acted = scope.with_frame(|scope| self.took_action(scope, gene));
        if acted {
            return true;
        }
        if scope.rendon_active() {
            return crate::rendon::processed(scope, self, gene);
        }
        false
    }

    /// Process each child gene in order. Children carrying traits are
    /// processed through a duplicate so trait evaluation cannot scar the
    /// original program.
    pub fn process_inner_genes(&self, scope: &mut Scope, gene: &Gene) {
        for child in gene.stable_genes() {
            let processed = if child.has_traits() {
                let duplicate = child.duplicate();
                self.process_gene(scope, &duplicate)
            } else {
                self.process_gene(scope, &child)
            };
            if !processed {
                cant_find("Statement", Some(self), child.name());
            }
        }
    }

    /// Run the child of `host` named `name` as code. True when it exists.
    pub fn process_exact_gene(&self, scope: &mut Scope, name: &str, host: &Gene) -> bool {
        let Some(matching) = host.get_first(name) else {
            return false;
        };
        script::run_gene(scope, self, &matching);
        if matching.has_children() {
            self.process_inner_genes(scope, &matching);
        }
        true
    }

    // ---- axons ---------------------------------------------------------

    pub(crate) fn register_axon(&self, axon: &Axon) {
        let replaced = self
            .0
            .axons
            .lock()
            .insert(axon.name().clone(), axon.clone());
        if replaced.is_some() {
            error_report!("Replaced axon: {}", axon.name());
        }
        trace(&self.0.cortex, "New_Axon", Some(self), axon.name(), "");
    }

    pub(crate) fn unregister_axon(&self, axon: &Axon) {
        let mut axons = self.0.axons.lock();
        if axons
            .get(axon.name())
            .map(|held| held.same(axon))
            .unwrap_or(false)
        {
            axons.shift_remove(axon.name().as_str());
        }
    }

    pub fn get_axon(&self, name: &str) -> Option<Axon> {
        self.0.axons.lock().get(name).cloned()
    }

    /// Own axons, then up the parent chain.
    pub fn hunt_axon(&self, name: &str) -> Option<Axon> {
        self.get_axon(name)
            .or_else(|| self.parent().and_then(|parent| parent.hunt_axon(name)))
    }

    // ---- subscriptions -------------------------------------------------

    /// Subscribe this neuron to `axon`. The receiver runs on this neuron's
    /// lobe with the memento; delivery crosses lobe boundaries through a
    /// synapse on the axon's chain.
    pub fn synapse_axon<F>(&self, axon: &Axon, receiver: F, memento: Option<Gene>)
    where
        F: Fn(&mut Scope, &Neuron, &Signal, Option<&Gene>) -> Result<()> + Send + Sync + 'static,
    {
        trace(&self.0.cortex, "Synapse", Some(self), axon.name(), "");
        let receiver: Receiver = Arc::new(receiver);
        let receptor = Receptor::leaf(self.clone(), axon.clone(), receiver, memento);
        self.0.receptors.lock().push(receptor.clone());
        self.connect_receptor(axon, receptor);
    }

    /// Hook `receptor` into this neuron's relay for `axon`, creating the
    /// relay (and its upstream hookup) on first use. A lobe's relay is a
    /// synapse attached directly to the axon.
    pub(crate) fn connect_receptor(&self, axon: &Axon, receptor: Receptor) {
        let (relay, created) = {
            let mut relays = self.0.relays.lock();
            match relays.get(&axon.id()) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let relay = if let Some(lobe) = self.as_lobe() {
                        Receptor::synapse(self.clone(), axon.clone(), lobe.mailbox())
                    } else {
                        Receptor::relay(self.clone(), axon.clone())
                    };
                    relays.insert(axon.id(), relay.clone());
                    (relay, true)
                }
            }
        };
        if created {
            match (self.as_lobe(), self.parent()) {
                (Some(_), _) => axon.attach(relay.clone()),
                (None, Some(parent)) => parent.connect_receptor(axon, relay.clone()),
                (None, None) => {
                    // detached neuron: nothing queues, hook straight in
                    axon.attach(relay.clone());
                }
            }
        }
        relay.push_inner(receptor);
    }

    /// Remove a cancelled leaf receptor from the bookkeeping.
    pub(crate) fn disconnect_receptor(&self, receptor: &Receptor) {
        self.0
            .receptors
            .lock()
            .retain(|held| !held.same(receptor));
        self.prune_relay(receptor.axon(), receptor);
    }

    /// Remove `entry` from this neuron's relay for `axon`; an emptied relay
    /// cancels itself, unhooking up the chain.
    pub(crate) fn prune_relay(&self, axon: &Axon, entry: &Receptor) {
        let relay = { self.0.relays.lock().get(&axon.id()).cloned() };
        let Some(relay) = relay else {
            return;
        };
        if relay.same(entry) {
            self.0.relays.lock().remove(&axon.id());
            if self.as_lobe().is_some() {
                axon.detach(&relay);
            } else {
                match self.parent() {
                    Some(parent) => parent.prune_relay(axon, &relay),
                    None => axon.detach(&relay),
                }
            }
            return;
        }
        if relay.remove_inner(entry) {
            relay.cancel();
        }
    }

    // ---- drop discipline ------------------------------------------------

    /// Drop this neuron. Dropping a foreign lobe stops its thread and lets
    /// that thread unwind its own subtree.
    pub fn dropped(&self, scope: &mut Scope) {
        if let Some(lobe) = self.as_lobe() {
            if !lobe.is_current() {
                if self.0.flags.test(Flag::Dropped) {
                    return;
                }
                lobe.stop();
                return;
            }
        }
        self.neuron_dropped(scope);
    }

    /// The idempotent drop path: cancel receptors, drop children youngest
    /// first, cancel axons and leftover relays, unlink from the parent.
    pub(crate) fn neuron_dropped(&self, scope: &mut Scope) {
        if !self.0.flags.set_once(Flag::Dropped) {
            return;
        }
        trace(&self.0.cortex, "Delete", Some(self), "", "");
        self.performed_method(scope, "Finished", None);

        let receptors: Vec<Receptor> = mem::take(&mut *self.0.receptors.lock());
        for receptor in receptors {
            receptor.cancel();
        }

        loop {
            let child = { self.0.children.lock().values().last().cloned() };
            match child {
                Some(child) => {
                    child.dropped(scope);
                    self.unregister_neuron(&child);
                }
                None => break,
            }
        }

        let axons: Vec<Axon> = self.0.axons.lock().values().cloned().collect();
        for axon in axons {
            axon.cancel_receptors();
        }
        self.0.axons.lock().clear();

        let relays: Vec<Receptor> = self.0.relays.lock().values().cloned().collect();
        for relay in relays {
            relay.cancel();
        }
        self.0.relays.lock().clear();

        self.0.methods.lock().clear();

        if let Some(parent) = self.0.parent.lock().take() {
            parent.observer().remove_gene(&self.0.observer);
            parent.shadows().remove_gene(&self.0.shadows);
            parent.unregister_neuron(self);
        }
    }
}

/// The standard method body: evaluate the call gene's content, then the
/// code gene's content, then process the code gene's children.
pub fn method_execute(
    scope: &mut Scope,
    neuron: &Neuron,
    call: Option<&Gene>,
    code: &Gene,
) -> Result<()> {
    if let Some(call) = call {
        if call.has_content() {
            script::run_gene(scope, neuron, call);
        }
    }
    if code.has_content() {
        script::run_gene(scope, neuron, code);
    }
    if code.has_children() {
        neuron.process_inner_genes(scope, code);
    }
    Ok(())
}

/// The default axon receiver: with the trigger gene as index, evaluate the
/// memento's content and process its children as code.
pub fn receive_axon(
    scope: &mut Scope,
    neuron: &Neuron,
    signal: &Signal,
    memento: Option<&Gene>,
) -> Result<()> {
    let Some(memento) = memento else {
        return Ok(());
    };
    let run = |scope: &mut Scope| {
        if memento.has_content() {
            script::run_gene(scope, neuron, memento);
        }
        neuron.process_inner_genes(scope, memento);
    };
    match signal.gene().cloned() {
        Some(trigger) => scope.with_index(trigger, run),
        None => run(scope),
    }
    Ok(())
}
