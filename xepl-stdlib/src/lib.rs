//! The standard XEPL vocabulary: the keyword kit (structure, flow control,
//! signals) and the operator kit (string splits, pads, comparisons, decimal
//! arithmetic on text values).
use xepl_rt::Cortex;

pub mod keywords;
pub mod ops;

#[cfg(test)]
mod test;

/// Install the whole kit into a cortex.
pub fn register(cortex: &Cortex) {
    keywords::register(cortex);
    ops::register(cortex);
}
