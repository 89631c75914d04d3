//! The uniform error and trace surface: every user-visible failure is a
//! single `ErrorReport: ` line on the error stream, every traced dispatch a
//! single info line.
use crate::cortex::Cortex;
use crate::neuron::Neuron;

macro_rules! error_report {
    ($($arg:tt)*) => {
        log::error!("ErrorReport: {}", format_args!($($arg)*))
    };
}
pub(crate) use error_report;

/// Report a failed lookup with the neuron path for context.
pub fn cant_find(kind: &str, neuron: Option<&Neuron>, name: &str) {
    match neuron {
        Some(neuron) => error_report!("Can't find {}: {} {}", kind, neuron.path('/'), name),
        None => error_report!("Can't find {}: {}", kind, name),
    }
}

/// One dispatch trace line: `{lobe}: {action}: {neuron-path}.{name} {detail}`.
/// Gated on the cortex trace toggle; lobe threads carry their neuron path as
/// the thread name.
pub(crate) fn trace(cortex: &Cortex, action: &str, neuron: Option<&Neuron>, name: &str, detail: &str) {
    if !cortex.show_trace() {
        return;
    }
    let thread = std::thread::current();
    let lobe = thread.name().unwrap_or("");
    let path = neuron.map(|n| n.path('/')).unwrap_or_default();
    log::info!("{}: {}: {}.{} {}", lobe, action, path, name, detail);
}
