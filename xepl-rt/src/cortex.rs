//! The cortex: five name-keyed dispatch tables, the observability toggles,
//! the output sink and the host lobe. `Brain` is the embedding driver that
//! owns the host lobe's scope on the caller's thread.
use crate::lobe::Lobe;
use crate::neuron::Neuron;
use crate::scope::{Counters, Scope};
use crate::script::{self, Script};
use crate::signal::Axon;
use crate::trace::{cant_find, error_report, trace};
use anyhow::{Context, Result};
use arcstr::literal;
use derive_builder::Builder;
use enumflags2::{bitflags, BitFlags};
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use xepl_core::xml;
use xepl_core::{Cord, Flag, Gene};

/// Keyword body: `(scope, host neuron, call gene, param string)`.
pub type Keyword = Arc<dyn Fn(&mut Scope, &Neuron, &Gene, &str) -> Result<()> + Send + Sync>;
/// Operator body: mutates the running script's value and truth.
pub type Operator = Arc<dyn Fn(&mut Script, Option<&str>) -> Result<()> + Send + Sync>;
/// Command body: `(scope, parameter string)`.
pub type Command = Arc<dyn Fn(&mut Scope, &str) -> Result<()> + Send + Sync>;
/// Mutual: resolves a pseudo-variable gene during RNA lookup.
pub type Mutual = Arc<dyn Fn(&mut Scope, &Neuron) -> Option<Gene> + Send + Sync>;
/// Render body: emits markup for one gene into the active rendon.
pub type Render = Arc<dyn Fn(&mut Scope, &Neuron, &Gene) -> Result<()> + Send + Sync>;

/// Process-wide observability toggles.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Trace,
    Counters,
    Memory,
}

/// Where program output (`Print`, rendered text, RNA results) goes.
#[derive(Clone)]
pub enum Output {
    Stdout,
    Sink(Arc<Mutex<String>>),
}

impl Default for Output {
    fn default() -> Self {
        Output::Stdout
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Stdout => write!(f, "Output::Stdout"),
            Output::Sink(_) => write!(f, "Output::Sink"),
        }
    }
}

impl Output {
    /// A buffered sink and its read handle, for tests and embedding.
    pub fn sink() -> (Output, Arc<Mutex<String>>) {
        let buffer = Arc::new(Mutex::new(String::new()));
        (Output::Sink(buffer.clone()), buffer)
    }

    pub fn line(&self, text: &str) {
        match self {
            Output::Stdout => println!("{text}"),
            Output::Sink(buffer) => {
                let mut buffer = buffer.lock();
                buffer.push_str(text);
                buffer.push('\n');
            }
        }
    }

    pub fn write(&self, text: &str) {
        match self {
            Output::Stdout => print!("{text}"),
            Output::Sink(buffer) => buffer.lock().push_str(text),
        }
    }
}

/// Cortex construction options.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct CortexConfig {
    pub name: Cord,
    #[builder(default)]
    pub output: Output,
    #[builder(default)]
    pub show_trace: bool,
    #[builder(default)]
    pub show_counters: bool,
    #[builder(default)]
    pub show_memory_counts: bool,
}

impl CortexConfig {
    pub fn builder() -> CortexConfigBuilder {
        CortexConfigBuilder::default()
    }
}

struct CortexInner {
    name: Cord,
    keywords: RwLock<FxHashMap<Cord, Keyword>>,
    operators: RwLock<FxHashMap<Cord, Operator>>,
    commands: RwLock<FxHashMap<Cord, Command>>,
    mutuals: RwLock<FxHashMap<Cord, Mutual>>,
    renders: RwLock<FxHashMap<Cord, Render>>,
    toggles: AtomicU8,
    output: Output,
    host: OnceLock<Lobe>,
    final_counters: Mutex<Counters>,
}

/// Shared registry handle; clones are cheap and thread-safe.
#[derive(Clone)]
pub struct Cortex(Arc<CortexInner>);

impl fmt::Debug for Cortex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cortex({})", self.0.name)
    }
}

impl Cortex {
    fn create(config: &CortexConfig) -> Cortex {
        let mut toggles = BitFlags::<Toggle>::empty();
        if config.show_trace {
            toggles |= Toggle::Trace;
        }
        if config.show_counters {
            toggles |= Toggle::Counters;
        }
        if config.show_memory_counts {
            toggles |= Toggle::Memory;
        }
        Cortex(Arc::new(CortexInner {
            name: config.name.clone(),
            keywords: RwLock::new(FxHashMap::default()),
            operators: RwLock::new(FxHashMap::default()),
            commands: RwLock::new(FxHashMap::default()),
            mutuals: RwLock::new(FxHashMap::default()),
            renders: RwLock::new(FxHashMap::default()),
            toggles: AtomicU8::new(toggles.bits()),
            output: config.output.clone(),
            host: OnceLock::new(),
            final_counters: Mutex::new(Counters::default()),
        }))
    }

    pub fn name(&self) -> &Cord {
        &self.0.name
    }

    pub fn output(&self) -> &Output {
        &self.0.output
    }

    /// The root lobe. Set once at brain construction.
    pub fn host(&self) -> Lobe {
        self.0.host.get().expect("cortex host lobe installed").clone()
    }

    pub fn host_neuron(&self) -> Neuron {
        self.host().neuron().clone()
    }

    // ---- toggles ------------------------------------------------------

    fn toggled(&self, toggle: Toggle) -> bool {
        BitFlags::<Toggle>::from_bits_truncate(self.0.toggles.load(Ordering::Relaxed))
            .contains(toggle)
    }

    pub fn set_toggle(&self, toggle: Toggle, on: bool) {
        let bits = BitFlags::from_flag(toggle).bits();
        if on {
            self.0.toggles.fetch_or(bits, Ordering::Relaxed);
        } else {
            self.0.toggles.fetch_and(!bits, Ordering::Relaxed);
        }
    }

    pub fn show_trace(&self) -> bool {
        self.toggled(Toggle::Trace)
    }

    pub fn show_counters(&self) -> bool {
        self.toggled(Toggle::Counters)
    }

    pub fn show_memory_counts(&self) -> bool {
        self.toggled(Toggle::Memory)
    }

    // ---- registration (upsert, replacement warns) ----------------------

    pub fn register_keyword<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &Neuron, &Gene, &str) -> Result<()> + Send + Sync + 'static,
    {
        let replaced = self
            .0
            .keywords
            .write()
            .insert(Cord::from(name), Arc::new(body));
        if replaced.is_some() {
            error_report!("Replaced keyword: {name}");
        }
        trace(self, "New_Keyword", None, name, "");
    }

    pub fn register_operator<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Script, Option<&str>) -> Result<()> + Send + Sync + 'static,
    {
        let replaced = self
            .0
            .operators
            .write()
            .insert(Cord::from(name), Arc::new(body));
        if replaced.is_some() {
            error_report!("Replaced operator: {name}");
        }
        trace(self, "New_Operator", None, name, "");
    }

    pub fn register_command<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &str) -> Result<()> + Send + Sync + 'static,
    {
        let replaced = self
            .0
            .commands
            .write()
            .insert(Cord::from(name), Arc::new(body));
        if replaced.is_some() {
            error_report!("Replaced command: {name}");
        }
        trace(self, "New_Command", None, name, "");
    }

    pub fn register_mutual<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &Neuron) -> Option<Gene> + Send + Sync + 'static,
    {
        let replaced = self
            .0
            .mutuals
            .write()
            .insert(Cord::from(name), Arc::new(body));
        if replaced.is_some() {
            error_report!("Replaced mutual: {name}");
        }
    }

    pub fn register_render<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &Neuron, &Gene) -> Result<()> + Send + Sync + 'static,
    {
        let replaced = self
            .0
            .renders
            .write()
            .insert(Cord::from(name), Arc::new(body));
        if replaced.is_some() {
            error_report!("Replaced render: {name}");
        }
        trace(self, "New_Render", None, name, "");
    }

    // ---- dispatch -------------------------------------------------------

    /// Run a registered keyword for the gene, if one exists. `{`-prefixed
    /// content is evaluated into the parameter string; anything else passes
    /// through verbatim.
    pub fn did_keyword(&self, scope: &mut Scope, neuron: &Neuron, call: &Gene) -> bool {
        let keyword = { self.0.keywords.read().get(call.name().as_str()).cloned() };
        let Some(keyword) = keyword else {
            return false;
        };
        let mut content = String::new();
        let param = if call.copy_content(&mut content) {
            if content.starts_with('{') {
                script::eval(scope, neuron, Some(call), &content).0
            } else {
                content
            }
        } else {
            String::new()
        };
        trace(self, "DO_Keyword", Some(neuron), call.name(), &param);
        if let Err(error) = keyword(scope, neuron, call, &param) {
            error_report!("{}: {:#}", call.name(), error);
        }
        true
    }

    /// `target.method`: locate the neuron by the left part, invoke the
    /// method by the right.
    pub fn did_dot_tag(&self, scope: &mut Scope, neuron: &Neuron, call: &Gene) -> bool {
        let Some((left, right)) = call.name().split_once('.') else {
            return false;
        };
        match neuron.find_neuron(left) {
            Some(target) => target.performed_method(scope, right, Some(call)),
            None => false,
        }
    }

    pub fn did_operator(&self, name: &str, script: &mut Script, param: Option<&str>) -> bool {
        let operator = { self.0.operators.read().get(name).cloned() };
        let Some(operator) = operator else {
            return false;
        };
        if let Err(error) = operator(script, param) {
            script.fail("operator failed", &format!("{name}: {error:#}"));
        }
        true
    }

    /// Command lookup: the table first, then methods on the current lobe.
    pub fn did_command(&self, scope: &mut Scope, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        let (name, param) = match line.split_once(' ') {
            Some((name, param)) => (name, param),
            None => (line, ""),
        };
        let command = { self.0.commands.read().get(name).cloned() };
        if let Some(command) = command {
            if let Err(error) = command(scope, param) {
                error_report!("{name}: {error:#}");
            }
            return true;
        }
        let host = scope.lobe().neuron().clone();
        if host.performed_method(scope, line, None) {
            return true;
        }
        error_report!("Command not understood: {line}");
        false
    }

    /// Markup dispatch: evaluate a trait-duplicate of the gene, run a
    /// registered render, or fall back to the keyword/method chain.
    pub fn did_render(&self, scope: &mut Scope, neuron: &Neuron, gene: &Gene) -> bool {
        let duplicate = gene.duplicate();
        script::evaluate_traits(scope, neuron, &duplicate);
        let render = { self.0.renders.read().get(duplicate.name().as_str()).cloned() };
        match render {
            Some(render) => {
                if let Err(error) = render(scope, neuron, &duplicate) {
                    error_report!("{}: {:#}", duplicate.name(), error);
                }
                true
            }
            None => neuron.took_action(scope, &duplicate),
        }
    }

    // ---- locators -------------------------------------------------------

    /// Ephemerals, then `Vitals` genes up the neuron chain, then mutuals.
    pub fn locate_gene(&self, scope: &mut Scope, neuron: &Neuron, name: &str) -> Option<Gene> {
        if name.is_empty() {
            return None;
        }
        if let Some(found) = scope.ephemeral_get(name) {
            return Some(found);
        }
        let mut current = Some(neuron.clone());
        while let Some(at) = current {
            if let Some(vitals) = at.observer().get_first("Vitals") {
                if let Some(found) = vitals.get_first(name) {
                    return Some(found);
                }
            }
            current = at.parent();
        }
        let mutual = { self.0.mutuals.read().get(name).cloned() };
        mutual.and_then(|mutual| mutual(scope, neuron))
    }

    /// Resolve a neuron by bare name (upward hunt from `start`) or by a
    /// separated path walked from the host lobe.
    pub fn locate_neuron(&self, start: &Neuron, path: &str, separator: char) -> Option<Neuron> {
        match path.split_once(separator) {
            None => start.find_neuron(path),
            Some(_) => {
                let mut neuron = self.host_neuron();
                let mut rest = path;
                while let Some((head, tail)) = rest.split_once(separator) {
                    match neuron.find_neuron(head) {
                        Some(found) => neuron = found,
                        None => break,
                    }
                    rest = tail;
                }
                neuron.find_neuron(rest)
            }
        }
    }

    /// Resolve `path.axon` (neuron lookup then its axon), or hunt the bare
    /// name up from `start`.
    pub fn locate_axon(&self, start: &Neuron, address: &str, separator: char) -> Option<Axon> {
        match address.split_once(separator) {
            Some((path, axon_name)) => start
                .find_neuron(path)
                .and_then(|neuron| neuron.get_axon(axon_name)),
            None => start.hunt_axon(address),
        }
    }

    pub(crate) fn merge_counters(&self, counters: &Counters) {
        self.0.final_counters.lock().merge(counters);
    }

    pub fn final_counters(&self) -> Counters {
        self.0.final_counters.lock().clone()
    }
}

/// The embedding driver: owns the host lobe and its scope on the calling
/// thread. Everything the CLI or an embedding application does goes
/// through here.
pub struct Brain {
    cortex: Cortex,
    scope: Scope,
}

impl Brain {
    pub fn new(config: CortexConfig) -> Result<Brain> {
        let cortex = Cortex::create(&config);
        let host_neuron = Neuron::root(cortex.clone(), config.name.clone());
        let host = Lobe::host(host_neuron);
        cortex
            .0
            .host
            .set(host.clone())
            .ok()
            .context("installing the host lobe")?;
        let mut scope = Scope::new(cortex.clone(), host);
        scope.push_index(Gene::with_space(literal!("Index"), Some(config.name.clone())));
        scope.counters.lobes += 1;
        log::info!("cortex {} awake", config.name);
        Ok(Brain { cortex, scope })
    }

    pub fn cortex(&self) -> &Cortex {
        &self.cortex
    }

    pub fn scope(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn host_neuron(&self) -> Neuron {
        self.cortex.host_neuron()
    }

    // Registration pass-throughs.
    pub fn register_keyword<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &Neuron, &Gene, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.cortex.register_keyword(name, body);
    }

    pub fn register_operator<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Script, Option<&str>) -> Result<()> + Send + Sync + 'static,
    {
        self.cortex.register_operator(name, body);
    }

    pub fn register_command<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.cortex.register_command(name, body);
    }

    pub fn register_mutual<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &Neuron) -> Option<Gene> + Send + Sync + 'static,
    {
        self.cortex.register_mutual(name, body);
    }

    pub fn register_render<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut Scope, &Neuron, &Gene) -> Result<()> + Send + Sync + 'static,
    {
        self.cortex.register_render(name, body);
    }

    /// Parse and process an XML program on the host lobe. Each top-level
    /// element is dispatched under a short-term frame seeded with its
    /// traits; parse errors abort before anything runs.
    pub fn execute_xml(&mut self, text: &str) -> Result<()> {
        let holder = Gene::new(literal!("text"));
        xml::parse_into(&holder, text)?;
        let host = self.cortex.host_neuron();
        for gene in holder.stable_genes() {
            self.scope.with_frame_from(&gene, |scope| {
                if !host.process_gene(scope, &gene) {
                    cant_find("Cmd", Some(&host), gene.name());
                }
            });
        }
        Ok(())
    }

    /// Evaluate an RNA expression against the host neuron and the current
    /// index gene; returns the value string.
    pub fn execute_rna(&mut self, expr: &str) -> String {
        let host = self.cortex.host_neuron();
        let index = self.scope.index_link();
        self.scope
            .with_frame(|scope| script::eval(scope, &host, index.as_ref(), expr).0)
    }

    /// Run a line through the command table (and host lobe methods).
    pub fn do_command(&mut self, line: &str) -> bool {
        let cortex = self.cortex.clone();
        cortex.did_command(&mut self.scope, line)
    }

    /// Drain queued actions on the host lobe (the CLI does this between
    /// lines).
    pub fn dispatch_pending(&mut self) {
        let lobe = self.scope.lobe().clone();
        while lobe.dispatch_one(&mut self.scope) {
            self.scope.close_dispatch();
        }
    }

    /// End the current dispatch explicitly (the CLI `;` line).
    pub fn close_dispatch(&mut self) {
        self.scope.close_dispatch();
    }

    pub fn drop_neuron(&mut self, name: &str) -> bool {
        let host = self.cortex.host_neuron();
        host.drop_neuron(&mut self.scope, name)
    }

    /// Orderly teardown: stop accepting actions, flush the backlog, drop
    /// the neuron subtree depth-first, release the index stack.
    pub fn close(&mut self) {
        let host = self.cortex.host_neuron();
        if host.flags().test(Flag::Dropped) {
            return;
        }
        let lobe = self.scope.lobe().clone();
        lobe.mailbox().close();
        host.neuron_dropped(&mut self.scope);
        self.scope.pop_index();
        self.cortex.merge_counters(&self.scope.counters);
        if self.cortex.show_counters() {
            log::info!("final counters: {}", self.cortex.final_counters().report());
        }
        log::info!("cortex {} closed", self.cortex.name());
    }
}

impl Drop for Brain {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn brain() -> (Brain, Arc<Mutex<String>>) {
        let _ = env_logger::try_init();
        let (output, sink) = Output::sink();
        let brain = Brain::new(
            CortexConfig::builder()
                .name("brain")
                .output(output)
                .build()
                .unwrap(),
        )
        .unwrap();
        (brain, sink)
    }

    #[test]
    fn hello_keyword() {
        let (mut brain, sink) = brain();
        brain.register_keyword("Hi", |scope, _neuron, call, _param| {
            let mut text = String::from("Hello");
            call.copy_content(&mut text);
            scope.cortex_handle().output().line(&text);
            Ok(())
        });
        brain.execute_xml("<Hi>, World!</Hi>").unwrap();
        assert_eq!(sink.lock().as_str(), "Hello, World!\n");
    }

    #[test]
    fn method_registration_and_dotted_dispatch() {
        let (mut brain, sink) = brain();
        brain.register_keyword("Print", |scope, neuron, call, param| {
            scope.cortex_handle().output().line(param);
            neuron.process_inner_genes(scope, call);
            Ok(())
        });
        brain.register_keyword("Method", |_scope, neuron, call, _param| {
            if let Some(name) = call.trait_get("name") {
                neuron.register_method(&name, crate::neuron::method_execute, Some(call));
            }
            Ok(())
        });
        brain.register_operator("space", |script, rhs| {
            script.value.push(' ');
            if let Some(rhs) = rhs {
                script.value.push_str(rhs);
            }
            Ok(())
        });
        brain
            .execute_xml(
                "<Method name='Speak'><Print>{'Speak'.space(to)}</Print></Method>\n\
                 <brain.Speak to='method param'/>",
            )
            .unwrap();
        assert_eq!(sink.lock().as_str(), "Speak method param\n");
    }

    #[test]
    fn unknown_statements_are_reported_not_fatal() {
        let (mut brain, sink) = brain();
        brain.execute_xml("<NoSuchThing/>").unwrap();
        assert_eq!(sink.lock().as_str(), "");
        // the brain still works afterwards
        brain.register_keyword("Ok", |scope, _n, _c, _p| {
            scope.cortex_handle().output().line("ok");
            Ok(())
        });
        brain.execute_xml("<Ok/>").unwrap();
        assert_eq!(sink.lock().as_str(), "ok\n");
    }

    #[test]
    fn replacement_is_an_upsert() {
        let (mut brain, sink) = brain();
        brain.register_keyword("Say", |scope, _n, _c, _p| {
            scope.cortex_handle().output().line("first");
            Ok(())
        });
        brain.register_keyword("Say", |scope, _n, _c, _p| {
            scope.cortex_handle().output().line("second");
            Ok(())
        });
        brain.execute_xml("<Say/>").unwrap();
        assert_eq!(sink.lock().as_str(), "second\n");
    }

    #[test]
    fn mutuals_resolve_in_gene_lookup() {
        let (mut brain, _) = brain();
        let shared = Gene::new("Shared");
        shared.trait_set("k", "mutual value");
        let slot = Arc::new(StdMutex::new(shared));
        let held = slot.clone();
        brain.register_mutual("Shared", move |_scope, _neuron| {
            Some(held.lock().unwrap().clone())
        });
        assert_eq!(brain.execute_rna("$Shared'k'"), "mutual value");
    }

    #[test]
    fn registered_genes_shadow_mutuals() {
        let (mut brain, _) = brain();
        let host = brain.host_neuron();
        let published = Gene::new("Box");
        published.trait_set("k", "vital");
        host.register_gene("Box", &published);
        assert_eq!(brain.execute_rna("$Box'k'"), "vital");
    }
}
