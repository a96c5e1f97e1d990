//! User-facing progress output (spec.md §6). Separate from the
//! `tracing` diagnostic channel: these lines are the build's primary
//! UI and are always on, colored the way cargo colors its own status
//! lines via `anstream`/`anstyle`.

use std::io::Write;

use anstream::{eprintln, println};
use anstyle::{AnsiColor, Style};

const GREEN_BOLD: Style = AnsiColor::Green.on_default().bold();
const YELLOW_BOLD: Style = AnsiColor::Yellow.on_default().bold();

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DispatchMode {
    Background,
    Foreground,
}

impl DispatchMode {
    fn label(self) -> &'static str {
        match self {
            DispatchMode::Background => "background",
            DispatchMode::Foreground => "foreground",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Intent {
    Try,
    Skip,
}

impl Intent {
    fn label(self) -> &'static str {
        match self {
            Intent::Try => "try",
            Intent::Skip => "skip",
        }
    }
}

#[derive(Default)]
pub struct Shell {
    quiet: bool,
}

impl Shell {
    pub fn new(quiet: bool) -> Self {
        Shell { quiet }
    }

    pub fn will(&self, description: &str, intent: Intent, mode: DispatchMode) {
        if self.quiet {
            return;
        }
        println!(
            "{GREEN_BOLD}Will{GREEN_BOLD:#} {} {description} in {}",
            intent.label(),
            mode.label(),
        );
        let _ = std::io::stdout().flush();
    }

    pub fn done(&self, outstanding: usize, description: &str) {
        if self.quiet {
            return;
        }
        println!("[{outstanding} to go] {GREEN_BOLD}Done{GREEN_BOLD:#} {description}");
        let _ = std::io::stdout().flush();
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{YELLOW_BOLD}warning{YELLOW_BOLD:#}: {message}");
        let _ = std::io::stderr().flush();
    }
}
