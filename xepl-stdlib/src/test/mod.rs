use parking_lot::Mutex;
use std::sync::Arc;
use xepl_rt::{Brain, CortexConfig, Output};

mod flow;
mod genes;
mod neurons;
mod render;
mod strings;

/// A brain with the full kit installed and output captured.
pub(crate) fn brain() -> (Brain, Arc<Mutex<String>>) {
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
    crate::register(brain.cortex());
    (brain, sink)
}

/// Run one XML program and compare the captured output.
macro_rules! run_xml {
    ($name:ident, $program:expr, $expected:expr) => {
        #[test]
        fn $name() -> anyhow::Result<()> {
            let (mut brain, sink) = crate::test::brain();
            brain.execute_xml($program)?;
            brain.dispatch_pending();
            assert_eq!(sink.lock().as_str(), $expected);
            Ok(())
        }
    };
}
pub(crate) use run_xml;
