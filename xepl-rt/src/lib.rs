//! The XEPL actor runtime.
//!
//! Neurons are named, refcounted entities arranged in a hierarchy; lobes are
//! neurons that own an OS thread and a mailbox; axons broadcast signals to
//! receptors, crossing lobe boundaries through queued actions. The cortex
//! holds the five user-extensible dispatch tables and the root lobe; the RNA
//! script evaluator reads and writes genes in the context of an active
//! neuron.
pub mod cortex;
pub mod lobe;
pub mod neuron;
pub mod rendon;
pub mod scope;
pub mod script;
pub mod signal;
pub mod trace;

pub use cortex::{Brain, Cortex, CortexConfig, CortexConfigBuilder, Output, Toggle};
pub use lobe::{Action, ActionList, Lobe};
pub use neuron::{method_execute, receive_axon, Method, MethodFn, Neuron, WeakNeuron};
pub use rendon::Rendon;
pub use scope::{Counters, Scope};
pub use script::Script;
pub use signal::{Axon, Receptor, Receiver, Rendezvous, Signal};
pub use trace::cant_find;

pub use xepl_core::{Cord, Flag, Gene, Wire};
