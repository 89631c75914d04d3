//! Per-lobe-thread evaluation context.
//!
//! Everything the original keeps in thread-local cells lives here and is
//! threaded as `&mut Scope` through dispatch: the index stack, the locals
//! gene, the ephemeral bindings, the short-term frames, the rendon stack and
//! the current trigger.
use crate::cortex::Cortex;
use crate::lobe::Lobe;
use crate::rendon::Rendon;
use crate::signal::Signal;
use arcstr::literal;
use compact_str::format_compact;
use fxhash::FxHashMap;
use xepl_core::{Cord, Gene};

/// Per-lobe activity counters, merged into the cortex totals at teardown.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub dispatched: u64,
    pub rests: u64,
    pub actions: u64,
    pub wakes: u64,
    pub neurons: u64,
    pub lobes: u64,
}

impl Counters {
    pub fn merge(&mut self, other: &Counters) {
        self.dispatched += other.dispatched;
        self.rests += other.rests;
        self.actions += other.actions;
        self.wakes += other.wakes;
        self.neurons += other.neurons;
        self.lobes += other.lobes;
    }

    pub fn report(&self) -> String {
        format_compact!(
            "Dispatched: {} Rests: {} Actions: {} Wakes: {} Neurons: {} Lobes: {}",
            self.dispatched,
            self.rests,
            self.actions,
            self.wakes,
            self.neurons,
            self.lobes
        )
        .into()
    }
}

/// One short-term frame. `hot` indexes the nearest frame at or below this
/// one that actually holds terms, so lookups skip empty frames.
struct TermFrame {
    map: Option<FxHashMap<Cord, String>>,
    hot: Option<usize>,
}

pub struct Scope {
    cortex: Cortex,
    lobe: Lobe,
    indices: Vec<Gene>,
    outdex: Option<Gene>,
    pub locals: Option<Gene>,
    ephemerals: Option<FxHashMap<Cord, Gene>>,
    terms: Vec<TermFrame>,
    rendons: Vec<Rendon>,
    /// the lobe's output buffer, written by rendons with no enclosing frame
    pub output: String,
    /// the signal being delivered by the current dispatch
    pub trigger: Option<Signal>,
    pub counters: Counters,
}

impl Scope {
    pub fn new(cortex: Cortex, lobe: Lobe) -> Scope {
        let mut scope = Scope {
            cortex,
            lobe,
            indices: Vec::new(),
            outdex: None,
            locals: None,
            ephemerals: None,
            terms: Vec::new(),
            rendons: Vec::new(),
            output: String::new(),
            trigger: None,
            counters: Counters::default(),
        };
        scope.push_frame();
        scope
    }

    pub fn cortex_handle(&self) -> Cortex {
        self.cortex.clone()
    }

    pub fn lobe(&self) -> &Lobe {
        &self.lobe
    }

    // ---- index stack -------------------------------------------------

    pub fn push_index(&mut self, gene: Gene) {
        self.indices.push(gene);
    }

    pub fn pop_index(&mut self) -> Option<Gene> {
        self.indices.pop()
    }

    /// The current index gene.
    pub fn index_link(&self) -> Option<Gene> {
        self.indices.last().cloned()
    }

    /// Reach `up` frames back into the index stack; 0 is the current index.
    pub fn index(&self, up: usize) -> Option<Gene> {
        let len = self.indices.len();
        if up < len {
            self.indices.get(len - 1 - up).cloned()
        } else {
            None
        }
    }

    pub fn with_index<R>(&mut self, gene: Gene, body: impl FnOnce(&mut Scope) -> R) -> R {
        self.push_index(gene);
        let result = body(self);
        self.pop_index();
        result
    }

    pub fn set_outdex(&mut self, gene: Option<Gene>) {
        self.outdex = gene;
    }

    pub fn outdex_link(&self) -> Option<Gene> {
        self.outdex.clone()
    }

    // ---- short-term frames -------------------------------------------

    pub fn push_frame(&mut self) {
        let hot = self.terms.last().and_then(|frame| frame.hot);
        self.terms.push(TermFrame { map: None, hot });
    }

    pub fn pop_frame(&mut self) {
        self.terms.pop();
    }

    pub fn with_frame<R>(&mut self, body: impl FnOnce(&mut Scope) -> R) -> R {
        self.push_frame();
        let result = body(self);
        self.pop_frame();
        result
    }

    /// Push a frame seeded with `gene`'s traits.
    pub fn with_frame_from<R>(&mut self, gene: &Gene, body: impl FnOnce(&mut Scope) -> R) -> R {
        self.push_frame();
        self.nest_traits(gene);
        let result = body(self);
        self.pop_frame();
        result
    }

    /// Bind a term in the innermost frame.
    pub fn term_set(&mut self, name: &str, value: &str) {
        if self.terms.is_empty() {
            self.push_frame();
        }
        let top = self.terms.len() - 1;
        let frame = &mut self.terms[top];
        frame
            .map
            .get_or_insert_with(FxHashMap::default)
            .insert(Cord::from(name), value.to_string());
        frame.hot = Some(top);
    }

    /// Copy `gene`'s traits into the innermost frame.
    pub fn nest_traits(&mut self, gene: &Gene) {
        if !gene.has_traits() {
            return;
        }
        for (name, value) in gene.traits_snapshot() {
            self.term_set(&name, &value);
        }
    }

    /// Resolve a term by walking the hot chain outward.
    pub fn term_get(&self, name: &str) -> Option<String> {
        let top = self.terms.last()?;
        let mut at = if top.map.is_some() {
            Some(self.terms.len() - 1)
        } else {
            top.hot
        };
        while let Some(i) = at {
            if let Some(map) = &self.terms[i].map {
                if let Some(value) = map.get(name) {
                    return Some(value.clone());
                }
            }
            at = if i == 0 { None } else { self.terms[i - 1].hot };
        }
        None
    }

    // ---- locals and ephemerals ---------------------------------------

    /// The per-dispatch locals gene, lazily created.
    pub fn make_locals(&mut self) -> Gene {
        self.locals
            .get_or_insert_with(|| Gene::new(literal!("Locals")))
            .clone()
    }

    pub fn local_get(&self, name: &str) -> Option<String> {
        self.locals.as_ref().and_then(|locals| locals.trait_get(name))
    }

    /// Bind a named gene for the duration of the current dispatch.
    pub fn ephemeral_set(&mut self, name: &str, gene: Gene) {
        self.ephemerals
            .get_or_insert_with(FxHashMap::default)
            .insert(Cord::from(name), gene);
    }

    pub fn ephemeral_get(&self, name: &str) -> Option<Gene> {
        self.ephemerals
            .as_ref()
            .and_then(|map| map.get(name))
            .cloned()
    }

    /// End-of-dispatch cleanup: locals and ephemerals are released and the
    /// current index gene is deflated.
    pub fn close_dispatch(&mut self) {
        self.locals = None;
        self.ephemerals = None;
        self.trigger = None;
        if let Some(index) = self.index_link() {
            index.deflate();
        }
    }

    // ---- rendons -----------------------------------------------------

    pub fn push_rendon(&mut self, rendon: Rendon) {
        self.rendons.push(rendon);
    }

    pub fn pop_rendon(&mut self) -> Option<Rendon> {
        self.rendons.pop()
    }

    pub fn rendon_active(&self) -> bool {
        !self.rendons.is_empty()
    }

    /// Append markup to the active rendon, or to the lobe output when no
    /// rendon is in scope.
    pub fn rendition_append(&mut self, text: &str) {
        match self.rendons.last_mut() {
            Some(rendon) => rendon.rendition.push_str(text),
            None => self.output.push_str(text),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cortex::{Brain, CortexConfig, Output};

    fn brain() -> Brain {
        let (output, _) = Output::sink();
        Brain::new(
            CortexConfig::builder()
                .name("test")
                .output(output)
                .build()
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn inner_frames_shadow_and_unwind() {
        let mut brain = brain();
        let scope = brain.scope();
        scope.term_set("iter", "outer");
        scope.with_frame(|scope| {
            assert_eq!(scope.term_get("iter").unwrap(), "outer");
            scope.term_set("iter", "inner");
            assert_eq!(scope.term_get("iter").unwrap(), "inner");
        });
        assert_eq!(scope.term_get("iter").unwrap(), "outer");
    }

    #[test]
    fn empty_frames_are_skipped() {
        let mut brain = brain();
        let scope = brain.scope();
        scope.term_set("deep", "value");
        scope.with_frame(|scope| {
            scope.with_frame(|scope| {
                assert_eq!(scope.term_get("deep").unwrap(), "value");
            });
        });
    }

    #[test]
    fn terms_vanish_after_scope_exit() {
        let mut brain = brain();
        let scope = brain.scope();
        scope.with_frame(|scope| {
            scope.term_set("gone", "soon");
            assert!(scope.term_get("gone").is_some());
        });
        assert!(scope.term_get("gone").is_none());
    }

    #[test]
    fn close_dispatch_releases_locals_and_ephemerals() {
        let mut brain = brain();
        let scope = brain.scope();
        scope.make_locals().trait_set("x", "1");
        scope.ephemeral_set("bound", Gene::new("g"));
        let index = scope.index_link().unwrap();
        index.trait_set("left", "over");
        scope.close_dispatch();
        assert!(scope.locals.is_none());
        assert!(scope.ephemeral_get("bound").is_none());
        assert!(!index.has_traits());
    }

    #[test]
    fn index_stack_reaches_back() {
        let mut brain = brain();
        let scope = brain.scope();
        let bottom = scope.index_link().unwrap();
        let top = Gene::new("top");
        scope.with_index(top.clone(), |scope| {
            assert!(scope.index(0).unwrap().same(&top));
            assert!(scope.index(1).unwrap().same(&bottom));
            assert!(scope.index(9).is_none());
        });
        assert!(scope.index_link().unwrap().same(&bottom));
    }
}
