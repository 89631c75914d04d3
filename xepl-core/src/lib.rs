//! The XEPL core data model: cords, wires, genes and the XML dialect.
//!
//! A gene is simultaneously an AST node, a runtime value, a little database
//! and a message payload. Everything here is shared-ownership with interior
//! mutability so genes can move freely between lobe threads; the runtime
//! crates build the actor machinery on top.
pub mod flags;
pub mod gene;
pub mod parse;
pub mod wire;
pub mod xml;

/// Immutable shared text. Names, namespaces and trait keys are all cords.
pub type Cord = arcstr::ArcStr;

pub use flags::Flag;
pub use gene::{live_genes, Gene, WeakGene};
pub use wire::Wire;
