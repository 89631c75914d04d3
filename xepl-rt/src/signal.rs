//! The signal graph: axons broadcast to receptors; relays coalesce a
//! subtree's subscriptions; synapses queue delivery onto the subscribing
//! lobe's mailbox.
use crate::lobe::{Action, ActionList};
use crate::neuron::{Neuron, WeakNeuron};
use crate::scope::Scope;
use crate::trace::{error_report, trace};
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use xepl_core::{Cord, Gene};

/// Receiver functions run on the subscribing lobe's thread with the trigger
/// signal and the memento captured at subscription time.
pub type Receiver =
    Arc<dyn Fn(&mut Scope, &Neuron, &Signal, Option<&Gene>) -> Result<()> + Send + Sync>;

/// What travels down an axon.
#[derive(Clone)]
pub enum Signal {
    Gene(Gene),
    Rendezvous(Rendezvous),
}

impl Signal {
    pub fn gene(&self) -> Option<&Gene> {
        match self {
            Signal::Gene(gene) => Some(gene),
            Signal::Rendezvous(rendezvous) => rendezvous.stimulus(),
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Gene(gene) => write!(f, "Signal({:?})", gene),
            Signal::Rendezvous(_) => write!(f, "Signal(rendezvous)"),
        }
    }
}

#[derive(Default)]
pub(crate) struct Gate {
    done: Mutex<bool>,
    arrived: Condvar,
}

impl Gate {
    fn open(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.arrived.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.arrived.wait(&mut done);
        }
    }
}

struct RendezvousInner {
    stimulus: Option<Gene>,
    gate: Arc<Gate>,
}

impl Drop for RendezvousInner {
    fn drop(&mut self) {
        // the last clone died: every delivery has run (or been flushed)
        self.gate.open();
    }
}

/// A stimulus whose death releases the origin of a `trigger_wait`.
#[derive(Clone)]
pub struct Rendezvous(Arc<RendezvousInner>);

impl Rendezvous {
    fn new(stimulus: Gene, gate: Arc<Gate>) -> Rendezvous {
        Rendezvous(Arc::new(RendezvousInner { stimulus: Some(stimulus), gate }))
    }

    pub fn stimulus(&self) -> Option<&Gene> {
        self.0.stimulus.as_ref()
    }
}

static NEXT_AXON_ID: AtomicU64 = AtomicU64::new(1);

struct AxonInner {
    id: u64,
    name: Cord,
    host: WeakNeuron,
    chain: Mutex<Vec<Receptor>>,
}

/// A named signal endpoint on a neuron.
#[derive(Clone)]
pub struct Axon(Arc<AxonInner>);

impl fmt::Debug for Axon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Axon({})", self.0.name)
    }
}

impl Axon {
    /// Create and register an axon on `host`.
    pub fn new(host: &Neuron, name: impl Into<Cord>) -> Axon {
        let axon = Axon(Arc::new(AxonInner {
            id: NEXT_AXON_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            host: host.downgrade(),
            chain: Mutex::new(Vec::new()),
        }));
        host.register_axon(&axon);
        axon
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &Cord {
        &self.0.name
    }

    pub fn host(&self) -> Option<Neuron> {
        self.0.host.upgrade()
    }

    pub fn same(&self, other: &Axon) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Subscribe `neuron` with the default receiver: the memento gene is
    /// processed as code when the axon fires.
    pub fn synapse(&self, neuron: &Neuron, memento: &Gene) {
        neuron.synapse_axon(self, crate::neuron::receive_axon, Some(memento.clone()));
    }

    /// Fan the signal out. The chain holds one synapse per subscribing
    /// lobe; each snapshot-copies its receptors and queues a SignalAction
    /// for every one.
    pub fn trigger(&self, signal: &Signal) {
        if let Some(host) = self.host() {
            trace(&host.cortex(), "Trigger", Some(&host), &self.0.name, "");
        }
        let snapshot: SmallVec<[Receptor; 4]> = self.0.chain.lock().iter().cloned().collect();
        for receptor in snapshot {
            receptor.fan_out(signal);
        }
    }

    pub fn trigger_gene(&self, gene: &Gene) {
        self.trigger(&Signal::Gene(gene.clone()));
    }

    /// Synchronous trigger: blocks until every queued delivery has executed
    /// (or been flushed by a closing mailbox).
    pub fn trigger_wait(&self, gene: &Gene) {
        let gate = Arc::new(Gate::default());
        {
            let signal = Signal::Rendezvous(Rendezvous::new(gene.clone(), gate.clone()));
            self.trigger(&signal);
        }
        gate.wait();
    }

    /// Cancel every subscription and unregister from the host.
    pub fn cancel_receptors(&self) {
        let chain: Vec<Receptor> = mem::take(&mut *self.0.chain.lock());
        for receptor in chain {
            receptor.cancel();
        }
        if let Some(host) = self.host() {
            host.unregister_axon(self);
        }
    }

    pub(crate) fn attach(&self, receptor: Receptor) {
        self.0.chain.lock().push(receptor);
    }

    pub(crate) fn detach(&self, receptor: &Receptor) {
        self.0.chain.lock().retain(|held| !held.same(receptor));
    }

    pub fn receptor_count(&self) -> usize {
        self.0.chain.lock().len()
    }
}

enum ReceptorKind {
    Leaf {
        receiver: Receiver,
        memento: Option<Gene>,
    },
    Relay {
        chain: Mutex<Vec<Receptor>>,
    },
    Synapse {
        chain: Mutex<Vec<Receptor>>,
        mailbox: ActionList,
    },
}

struct ReceptorInner {
    target: Neuron,
    axon: Axon,
    kind: ReceptorKind,
    cancelled: AtomicBool,
}

/// A subscription. Relays and synapses are receptors whose delivery target
/// is a chain of further receptors.
#[derive(Clone)]
pub struct Receptor(Arc<ReceptorInner>);

impl fmt::Debug for Receptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0.kind {
            ReceptorKind::Leaf { .. } => "leaf",
            ReceptorKind::Relay { .. } => "relay",
            ReceptorKind::Synapse { .. } => "synapse",
        };
        write!(f, "Receptor({} on {})", kind, self.0.axon.name())
    }
}

impl Receptor {
    pub(crate) fn leaf(
        target: Neuron,
        axon: Axon,
        receiver: Receiver,
        memento: Option<Gene>,
    ) -> Receptor {
        Receptor(Arc::new(ReceptorInner {
            target,
            axon,
            kind: ReceptorKind::Leaf { receiver, memento },
            cancelled: AtomicBool::new(false),
        }))
    }

    pub(crate) fn relay(target: Neuron, axon: Axon) -> Receptor {
        Receptor(Arc::new(ReceptorInner {
            target,
            axon,
            kind: ReceptorKind::Relay { chain: Mutex::new(Vec::new()) },
            cancelled: AtomicBool::new(false),
        }))
    }

    pub(crate) fn synapse(target: Neuron, axon: Axon, mailbox: ActionList) -> Receptor {
        Receptor(Arc::new(ReceptorInner {
            target,
            axon,
            kind: ReceptorKind::Synapse { chain: Mutex::new(Vec::new()), mailbox },
            cancelled: AtomicBool::new(false),
        }))
    }

    pub fn axon(&self) -> &Axon {
        &self.0.axon
    }

    pub fn target(&self) -> &Neuron {
        &self.0.target
    }

    pub fn same(&self, other: &Receptor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn push_inner(&self, receptor: Receptor) {
        match &self.0.kind {
            ReceptorKind::Relay { chain } | ReceptorKind::Synapse { chain, .. } => {
                chain.lock().push(receptor);
            }
            ReceptorKind::Leaf { .. } => error_report!("receptor cannot hold subscriptions"),
        }
    }

    /// Remove `receptor` from the inner chain; true when the chain emptied.
    pub(crate) fn remove_inner(&self, receptor: &Receptor) -> bool {
        match &self.0.kind {
            ReceptorKind::Relay { chain } | ReceptorKind::Synapse { chain, .. } => {
                let mut chain = chain.lock();
                chain.retain(|held| !held.same(receptor));
                chain.is_empty()
            }
            ReceptorKind::Leaf { .. } => false,
        }
    }

    fn inner_snapshot(&self) -> SmallVec<[Receptor; 4]> {
        match &self.0.kind {
            ReceptorKind::Relay { chain } | ReceptorKind::Synapse { chain, .. } => {
                chain.lock().iter().cloned().collect()
            }
            ReceptorKind::Leaf { .. } => SmallVec::new(),
        }
    }

    /// Deliver on the subscribing lobe's thread. Relays fan out inline in
    /// chain order; leaves invoke their receiver with the memento.
    pub(crate) fn activate(&self, scope: &mut Scope, signal: &Signal) {
        if self.cancelled() {
            return;
        }
        match &self.0.kind {
            ReceptorKind::Leaf { receiver, memento } => {
                let target = self.0.target.clone();
                trace(
                    &target.cortex(),
                    "ENTR_Axon",
                    Some(&target),
                    self.0.axon.name(),
                    "",
                );
                scope.trigger = Some(signal.clone());
                if let Err(error) = receiver(scope, &target, signal, memento.as_ref()) {
                    error_report!("{}: {:#}", self.0.axon.name(), error);
                }
            }
            ReceptorKind::Relay { .. } => {
                for receptor in self.inner_snapshot() {
                    receptor.activate(scope, signal);
                }
            }
            ReceptorKind::Synapse { .. } => self.fan_out(signal),
        }
    }

    /// Queue one SignalAction per inner receptor on the subscribing lobe's
    /// mailbox. Called at trigger time, possibly from a foreign thread.
    pub(crate) fn fan_out(&self, signal: &Signal) {
        if self.cancelled() {
            return;
        }
        match &self.0.kind {
            ReceptorKind::Synapse { mailbox, .. } => {
                for receptor in self.inner_snapshot() {
                    mailbox.post(Action::Signal {
                        receptor,
                        signal: signal.clone(),
                    });
                }
            }
            _ => error_report!(
                "receptor on {} reached an axon chain without a lobe",
                self.0.axon.name()
            ),
        }
    }

    /// Idempotent teardown: leaves unhook from their neuron's bookkeeping,
    /// compounds cancel their inner chain first.
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.0.kind {
            ReceptorKind::Leaf { .. } => self.0.target.disconnect_receptor(self),
            ReceptorKind::Relay { chain } | ReceptorKind::Synapse { chain, .. } => {
                let inner: Vec<Receptor> = mem::take(&mut *chain.lock());
                for receptor in inner {
                    receptor.cancel();
                }
                self.0.target.prune_relay(&self.0.axon, self);
            }
        }
    }
}
