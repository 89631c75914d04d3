//! Lobes: thread-owning neurons running a serial dispatch loop over a
//! mailbox of actions.
use crate::neuron::{Neuron, WeakNeuron};
use crate::scope::Scope;
use crate::signal::{Receptor, Signal};
use crate::trace::trace;
use anyhow::{Context, Result};
use arcstr::literal;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use xepl_core::{live_genes, Flag, Gene};

/// A mailbox entry. Executes on the owning lobe's thread.
pub enum Action {
    /// deliver a signal to one receptor
    Signal { receptor: Receptor, signal: Signal },
    /// drop a neuron (posted by a parent to stop a child lobe gracefully)
    Drop { neuron: Neuron },
}

impl Action {
    pub(crate) fn execute(self, scope: &mut Scope) {
        match self {
            Action::Signal { receptor, signal } => receptor.activate(scope, &signal),
            Action::Drop { neuron } => neuron.dropped(scope),
        }
    }
}

pub(crate) enum Pull {
    Action(Action),
    Empty,
    Closed,
}

#[derive(Default)]
struct ListState {
    queue: VecDeque<Action>,
    closed: bool,
}

struct ActionListInner {
    state: Mutex<ListState>,
    rest: Condvar,
    posted: AtomicU64,
    wakes: AtomicU64,
}

/// FIFO mailbox with a close-flush discipline: a closed list accepts
/// nothing and discards its backlog on the next pull.
#[derive(Clone)]
pub struct ActionList(Arc<ActionListInner>);

impl ActionList {
    pub fn new() -> ActionList {
        ActionList(Arc::new(ActionListInner {
            state: Mutex::new(ListState::default()),
            rest: Condvar::new(),
            posted: AtomicU64::new(0),
            wakes: AtomicU64::new(0),
        }))
    }

    /// Append; a post onto an empty open list wakes the resting lobe.
    /// Posting to a closed list drops the action (releasing what it holds).
    pub fn post(&self, action: Action) {
        let wake = {
            let mut state = self.0.state.lock();
            if state.closed {
                return;
            }
            let was_empty = state.queue.is_empty();
            state.queue.push_back(action);
            was_empty
        };
        self.0.posted.fetch_add(1, Ordering::Relaxed);
        if wake {
            self.0.wakes.fetch_add(1, Ordering::Relaxed);
            self.0.rest.notify_one();
        }
    }

    pub(crate) fn pull(&self) -> Pull {
        let mut state = self.0.state.lock();
        if state.closed {
            state.queue.clear();
            return Pull::Closed;
        }
        match state.queue.pop_front() {
            Some(action) => Pull::Action(action),
            None => Pull::Empty,
        }
    }

    pub fn close(&self) {
        self.0.state.lock().closed = true;
        self.0.rest.notify_all();
    }

    /// Block until the list has work or closes. Rechecks under the lock, so
    /// a wake between the dispatch loop's last pull and this call is never
    /// lost. Returns true when the lobe actually rested.
    pub(crate) fn rest(&self) -> bool {
        let mut state = self.0.state.lock();
        if state.queue.is_empty() && !state.closed {
            self.0.rest.wait(&mut state);
            return true;
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.0.state.lock().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.state.lock().queue.len()
    }

    pub(crate) fn posted(&self) -> u64 {
        self.0.posted.load(Ordering::Relaxed)
    }

    pub(crate) fn wakes(&self) -> u64 {
        self.0.wakes.load(Ordering::Relaxed)
    }
}

impl Default for ActionList {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot start gate between a parent and the thread it conceived.
pub(crate) struct Semaphore {
    given: Mutex<bool>,
    signal: Condvar,
}

impl Semaphore {
    fn new() -> Semaphore {
        Semaphore { given: Mutex::new(false), signal: Condvar::new() }
    }

    pub(crate) fn give(&self) {
        let mut given = self.given.lock();
        *given = true;
        self.signal.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut given = self.given.lock();
        while !*given {
            self.signal.wait(&mut given);
        }
    }
}

pub(crate) struct LobeState {
    actions: ActionList,
    started: Semaphore,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
    parent: Mutex<Option<(WeakNeuron, Weak<LobeState>)>>,
}

/// A neuron owning an OS thread, a mailbox and the scope stacks. Cloning
/// the handle shares the lobe.
#[derive(Clone)]
pub struct Lobe {
    neuron: Neuron,
    state: Arc<LobeState>,
}

impl Lobe {
    fn state_for(mailbox: ActionList) -> Arc<LobeState> {
        Arc::new(LobeState {
            actions: mailbox,
            started: Semaphore::new(),
            thread: Mutex::new(None),
            thread_id: Mutex::new(None),
            parent: Mutex::new(None),
        })
    }

    /// The host lobe: owned by the embedding thread, never spawned.
    pub(crate) fn host(neuron: Neuron) -> Lobe {
        let state = Lobe::state_for(ActionList::new());
        *state.thread_id.lock() = Some(thread::current().id());
        neuron.set_lobe_state(&state);
        let lobe = Lobe { neuron, state };
        lobe.register_terminate();
        lobe
    }

    /// Build a child lobe from a config gene. The thread starts on
    /// [`start`](Lobe::start); config children are processed by the new
    /// thread in `lobe_born`.
    pub fn spawn(scope: &mut Scope, parent: &Neuron, config: &Gene) -> Lobe {
        let neuron = Neuron::with_config(scope, parent, config);
        neuron.shadows().make_one("config").absorb(config);
        let state = Lobe::state_for(ActionList::new());
        let parent_lobe = scope.lobe().clone();
        *state.parent.lock() =
            Some((parent_lobe.neuron.downgrade(), Arc::downgrade(&parent_lobe.state)));
        neuron.set_lobe_state(&state);
        scope.counters.lobes += 1;
        let lobe = Lobe { neuron, state };
        lobe.register_terminate();
        lobe
    }

    fn register_terminate(&self) {
        self.neuron.register_method(
            "Terminate",
            |scope: &mut Scope, neuron: &Neuron, _call: Option<&Gene>, _code: &Gene| {
                if let Some(lobe) = neuron.as_lobe() {
                    lobe.terminate(scope);
                }
                Ok(())
            },
            None,
        );
    }

    pub fn neuron(&self) -> &Neuron {
        &self.neuron
    }

    pub fn mailbox(&self) -> ActionList {
        self.state.actions.clone()
    }

    pub fn post(&self, action: Action) {
        self.state.actions.post(action);
    }

    pub fn is_current(&self) -> bool {
        *self.state.thread_id.lock() == Some(thread::current().id())
    }

    pub(crate) fn from_parts(neuron: Neuron, state: Arc<LobeState>) -> Lobe {
        Lobe { neuron, state }
    }

    /// Spawn the thread and block until it has run `lobe_born`.
    pub fn start(&self) -> Result<()> {
        let path = self.neuron.path('/');
        let lobe = self.clone();
        let handle = thread::Builder::new()
            .name(path)
            .spawn(move || lobe.run())
            .context("spawning lobe thread")?;
        *self.state.thread.lock() = Some(handle);
        self.state.started.wait();
        Ok(())
    }

    /// Close the mailbox, wake the thread and join it. Safe to call twice.
    pub fn stop(&self) {
        self.neuron.flags().set(Flag::Closed);
        self.state.actions.close();
        let handle = self.state.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Graceful self-termination: ask the parent lobe to drop us, or lyse
    /// in place at the root.
    pub(crate) fn terminate(&self, _scope: &mut Scope) {
        if self.neuron.flags().test(Flag::Dropped) {
            return;
        }
        let parent = self.state.parent.lock().clone();
        match parent {
            Some((parent_neuron, parent_state)) => {
                if let (Some(_), Some(state)) = (parent_neuron.upgrade(), parent_state.upgrade()) {
                    state.actions.post(Action::Drop { neuron: self.neuron.clone() });
                    return;
                }
                self.neuron.flags().set(Flag::Lysing);
            }
            None => self.neuron.flags().set(Flag::Lysing),
        }
    }

    /// Thread body: install identity, build the scope, come alive, loop,
    /// die, hand the counters back.
    fn run(self) {
        *self.state.thread_id.lock() = Some(thread::current().id());
        let cortex = self.neuron.cortex();
        let mut scope = Scope::new(cortex.clone(), self.clone());
        let index = Gene::with_space(literal!("Index"), Some(self.neuron.name().clone()));
        scope.push_index(index);
        self.lobe_born(&mut scope);
        self.state.started.give();
        self.main_loop(&mut scope);
        self.neuron.neuron_dropped(&mut scope);
        scope.pop_index();
        cortex.merge_counters(&scope.counters);
    }

    /// Process the config children captured at spawn time.
    fn lobe_born(&self, scope: &mut Scope) {
        trace(&self.neuron.cortex(), "Lobe_Born", Some(&self.neuron), "", "");
        let Some(config) = self.neuron.shadows().get_first("config") else {
            return;
        };
        if config.has_children() {
            self.neuron.process_inner_genes(scope, &config);
        }
    }

    fn main_loop(&self, scope: &mut Scope) {
        let flags = self.neuron.flags();
        let cortex = self.neuron.cortex();
        while !flags.test(Flag::Lysing) {
            while !flags.test(Flag::Lysing) && self.dispatch_one(scope) {
                scope.close_dispatch();
            }
            if cortex.show_counters() {
                scope.counters.actions = self.state.actions.posted();
                scope.counters.wakes = self.state.actions.wakes();
                let report = scope.counters.report();
                self.neuron
                    .observer()
                    .make_one("Counters")
                    .assign_content(&report);
            }
            if cortex.show_memory_counts() {
                let report = format!("Genes: {}", live_genes());
                self.neuron.observer().make_one("Heap").assign_content(&report);
            }
            if !flags.test(Flag::Lysing) && self.state.actions.rest() {
                scope.counters.rests += 1;
            }
        }
    }

    /// Run one queued action. False when the mailbox is empty or closed;
    /// a closed mailbox flushes its backlog and the lobe starts lysing.
    pub fn dispatch_one(&self, scope: &mut Scope) -> bool {
        let flags = self.neuron.flags();
        if flags.test(Flag::Lysing) {
            return false;
        }
        match self.state.actions.pull() {
            Pull::Closed => {
                flags.set(Flag::Lysing);
                false
            }
            Pull::Empty => false,
            Pull::Action(action) => {
                scope.counters.dispatched += 1;
                action.execute(scope);
                true
            }
        }
    }
}

impl std::fmt::Debug for Lobe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lobe({})", self.neuron.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cortex::{Brain, CortexConfig, Output};
    use crate::neuron::Neuron;
    use crate::scope::Scope;
    use crate::signal::{Axon, Signal};
    use parking_lot::Mutex;
    use std::sync::Arc;

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
    fn cross_lobe_signal_runs_on_the_subscribing_lobe() {
        let (mut brain, _) = brain();
        let host = brain.host_neuron();
        let config = Gene::new("L");
        let lobe = Lobe::spawn(brain.scope(), &host, &config);
        lobe.start().unwrap();

        let axon = Axon::new(lobe.neuron(), "a");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        lobe.neuron().synapse_axon(
            &axon,
            move |_scope: &mut Scope, _neuron: &Neuron, _signal: &Signal, _memento: Option<&Gene>| {
                let thread = std::thread::current();
                record
                    .lock()
                    .push(thread.name().unwrap_or_default().to_string());
                Ok(())
            },
            None,
        );
        // the whole subscription collapses into one synapse on the axon
        assert_eq!(axon.receptor_count(), 1);

        let payload = Gene::new("payload");
        axon.trigger_wait(&payload);
        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0], "brain/L");
        }

        assert!(host.drop_neuron(brain.scope(), "L"));
        assert!(lobe.neuron().flags().test(Flag::Dropped));
        assert!(lobe.mailbox().is_empty());
        assert!(host.get_neuron("L").is_none());
    }

    #[test]
    fn same_lobe_delivery_queues_until_dispatched() {
        let (mut brain, sink) = brain();
        let host = brain.host_neuron();
        let axon = Axon::new(&host, "tick");
        host.synapse_axon(
            &axon,
            |scope: &mut Scope, _n: &Neuron, _s: &Signal, _m: Option<&Gene>| {
                scope.cortex_handle().output().line("ticked");
                Ok(())
            },
            None,
        );
        axon.trigger_gene(&Gene::new("t"));
        // queued on the host mailbox, nothing ran yet
        assert_eq!(sink.lock().as_str(), "");
        assert_eq!(brain.host_neuron().as_lobe().unwrap().mailbox().len(), 1);
        brain.dispatch_pending();
        assert_eq!(sink.lock().as_str(), "ticked\n");
    }

    #[test]
    fn fifo_order_is_preserved_per_lobe() {
        let (mut brain, sink) = brain();
        let host = brain.host_neuron();
        let axon = Axon::new(&host, "n");
        host.synapse_axon(
            &axon,
            |scope: &mut Scope, _n: &Neuron, signal: &Signal, _m: Option<&Gene>| {
                let text = signal
                    .gene()
                    .and_then(|gene| gene.trait_get("i"))
                    .unwrap_or_default();
                scope.cortex_handle().output().write(&text);
                Ok(())
            },
            None,
        );
        for i in 0..5 {
            let gene = Gene::new("t");
            gene.trait_set("i", &i.to_string());
            axon.trigger_gene(&gene);
        }
        brain.dispatch_pending();
        assert_eq!(sink.lock().as_str(), "01234");
    }

    #[test]
    fn dropping_a_subscriber_detaches_its_receptors() {
        let (mut brain, _) = brain();
        let host = brain.host_neuron();
        let source = crate::neuron::Neuron::with_name(brain.scope(), &host, "source");
        let listener = crate::neuron::Neuron::with_name(brain.scope(), &host, "listener");
        let axon = Axon::new(&source, "beat");
        listener.synapse_axon(
            &axon,
            |_s: &mut Scope, _n: &Neuron, _sig: &Signal, _m: Option<&Gene>| Ok(()),
            None,
        );
        assert_eq!(axon.receptor_count(), 1);
        listener.dropped(brain.scope());
        assert_eq!(axon.receptor_count(), 0);
        assert!(host.get_neuron("listener").is_none());
    }

    #[test]
    fn terminate_posts_a_drop_to_the_parent_lobe() {
        let (mut brain, _) = brain();
        let host = brain.host_neuron();
        let config = Gene::new("child");
        let lobe = Lobe::spawn(brain.scope(), &host, &config);
        lobe.start().unwrap();
        // ask the child to terminate itself: it posts a DropAction here
        let axon = Axon::new(lobe.neuron(), "quit");
        let target = lobe.neuron().clone();
        lobe.neuron().synapse_axon(
            &axon,
            move |scope: &mut Scope, _n: &Neuron, _s: &Signal, _m: Option<&Gene>| {
                target.performed_method(scope, "Terminate", None);
                Ok(())
            },
            None,
        );
        axon.trigger_wait(&Gene::new("go"));
        // the drop arrives in our mailbox; executing it joins the child
        brain.dispatch_pending();
        assert!(lobe.neuron().flags().test(Flag::Dropped));
        assert!(host.get_neuron("child").is_none());
    }

    #[test]
    fn closed_mailboxes_flush_and_refuse() {
        let (brain, _) = brain();
        let neuron = brain.host_neuron();
        let list = ActionList::new();
        list.close();
        list.post(Action::Drop { neuron });
        assert!(list.is_empty());
        assert!(matches!(list.pull(), Pull::Closed));
    }
}
