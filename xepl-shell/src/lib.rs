//! The host shell: a line loop against the root lobe. Line prefixes select
//! the machinery: `<` XML programs, `{`/`!`/`%` RNA, `}file` program
//! loading, `~name` neuron drops, `|cmd` the system shell, everything else
//! the command table.
use anyhow::{Context, Result};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use xepl_rt::{Brain, Cortex, CortexConfig, Toggle};

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Quit,
    /// `;;`: the caller should tear everything down and start fresh
    Reboot,
}

enum LineAction {
    Continue,
    Quit,
    Reboot,
}

pub struct Shell {
    brain: Brain,
}

impl Shell {
    /// A brain with the standard kit and the shell commands installed.
    pub fn new(name: &str) -> Result<Shell> {
        let brain = Brain::new(CortexConfig::builder().name(name).build()?)?;
        xepl_stdlib::register(brain.cortex());
        register_commands(brain.cortex());
        Ok(Shell { brain })
    }

    pub fn brain(&mut self) -> &mut Brain {
        &mut self.brain
    }

    /// Read lines until EOF, `quit` or `;;`, draining queued actions
    /// between lines.
    pub fn run(&mut self) -> Result<Outcome> {
        if std::io::stdin().is_terminal() {
            self.run_editor()
        } else {
            self.run_piped()
        }
    }

    fn run_editor(&mut self) -> Result<Outcome> {
        use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
        let mut editor = Reedline::create();
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(self.brain.cortex().name().to_string()),
            DefaultPromptSegment::Empty,
        );
        loop {
            self.brain.dispatch_pending();
            match editor.read_line(&prompt).context("reading input")? {
                Signal::Success(line) => match self.execute_line(&line) {
                    LineAction::Continue => {}
                    LineAction::Quit => return Ok(Outcome::Quit),
                    LineAction::Reboot => return Ok(Outcome::Reboot),
                },
                Signal::CtrlC => {}
                Signal::CtrlD => return Ok(Outcome::Quit),
            }
        }
    }

    fn run_piped(&mut self) -> Result<Outcome> {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line.context("reading input")?;
            self.brain.dispatch_pending();
            match self.execute_line(&line) {
                LineAction::Continue => {}
                LineAction::Quit => return Ok(Outcome::Quit),
                LineAction::Reboot => return Ok(Outcome::Reboot),
            }
        }
        self.brain.dispatch_pending();
        Ok(Outcome::Quit)
    }

    fn execute_line(&mut self, line: &str) -> LineAction {
        let line = line.trim_end();
        match line {
            "" => return LineAction::Continue,
            ";" => {
                self.brain.close_dispatch();
                return LineAction::Continue;
            }
            ";;" => return LineAction::Reboot,
            "quit" => return LineAction::Quit,
            _ => {}
        }
        let handled = match line.as_bytes()[0] {
            b'<' => match self.brain.execute_xml(line) {
                Ok(()) => true,
                Err(error) => {
                    log::error!("ErrorReport: {error:#}");
                    false
                }
            },
            b'{' | b'!' | b'%' => {
                let value = self.brain.execute_rna(line);
                self.brain.cortex().output().line(&value);
                true
            }
            b'}' => match self.load_program(&line[1..]) {
                Ok(()) => true,
                Err(error) => {
                    log::error!("ErrorReport: {error:#}");
                    false
                }
            },
            b'~' => self.brain.drop_neuron(line[1..].trim()),
            b'|' => system(&line[1..]),
            _ => self.brain.do_command(line),
        };
        if !handled {
            log::error!("Command Failed: {line}");
        }
        LineAction::Continue
    }

    /// `}name` loads `name.xml` from here or from a `resources/` directory
    /// found walking up from the working directory.
    fn load_program(&mut self, name: &str) -> Result<()> {
        let mut file = String::from(name.trim());
        file.push_str(".xml");
        let path =
            find_resource(&file).with_context(|| format!("no program named {file}"))?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        self.brain.execute_xml(&text)
    }
}

fn find_resource(file: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(file);
    if direct.exists() {
        return Some(direct);
    }
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join("resources").join(file);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// The `|…` escape hatch.
fn system(command: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// The observability commands: `Trace on|off`, `Counters …`, `Memory …`.
fn register_commands(cortex: &Cortex) {
    cortex.register_command("Trace", |scope, opt| {
        scope
            .cortex_handle()
            .set_toggle(Toggle::Trace, opt != "off");
        Ok(())
    });
    cortex.register_command("Counters", |scope, opt| {
        scope
            .cortex_handle()
            .set_toggle(Toggle::Counters, opt != "off");
        Ok(())
    });
    cortex.register_command("Memory", |scope, opt| {
        scope
            .cortex_handle()
            .set_toggle(Toggle::Memory, opt != "off");
        Ok(())
    });
}
