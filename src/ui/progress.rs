use crate::ui::icons::{CHECK, CROSS, GEAR, SKIP};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Width of the `#` rule framing stage banners.
const BANNER_WIDTH: usize = 80;

/// Terminal presentation of a procedure: stage banners and a spinner per step.
///
/// In interactive mode the child process owns the terminal, so no spinner is
/// drawn; banners and outcome lines are still printed.
pub struct BuildUI {
    multi: MultiProgress,
    spinner: ProgressBar,
    show_spinner: bool,
    quiet: bool,
}

impl BuildUI {
    pub fn new(show_spinner: bool) -> Self {
        let multi = MultiProgress::new();
        let spinner = multi.add(ProgressBar::new_spinner());
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{prefix:.bold.dim} {spinner} {msg}") {
            spinner.set_style(spinner_style);
        }
        spinner.set_prefix("  Step");

        Self {
            multi,
            spinner,
            show_spinner,
            quiet: false,
        }
    }

    /// A UI that prints nothing, for library use and tests.
    pub fn hidden() -> Self {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let spinner = multi.add(ProgressBar::hidden());
        Self {
            multi,
            spinner,
            show_spinner: false,
            quiet: true,
        }
    }

    /// Print a line above the spinner. Without a terminal the line goes to stdout.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        if self.multi.is_hidden() {
            println!("{}", msg.as_ref());
            return;
        }
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Print the `#` framed stage banner shown before every step.
    pub fn banner(&self, title: &str) {
        let rule = "#".repeat(BANNER_WIDTH);
        self.print_line("");
        self.print_line(format!("{}", style(&rule).cyan()));
        self.print_line(format!("{} {}", GEAR, style(title).bold()));
        self.print_line(format!("{}", style(&rule).cyan()));
    }

    /// Start the spinner for a running step.
    pub fn start_step(&self, label: &str, command_line: &str) {
        if !self.show_spinner {
            return;
        }
        self.spinner.set_message(format!(
            "{} {}",
            style(label).yellow(),
            style(command_line).dim()
        ));
        self.spinner.enable_steady_tick(Duration::from_millis(100));
    }

    /// Stop the spinner and print the step outcome.
    pub fn finish_step(&self, label: &str, success: bool, elapsed: f64) {
        self.spinner.disable_steady_tick();
        self.spinner.set_message("");
        let (icon, name) = if success {
            (CHECK, style(label).green().bold())
        } else {
            (CROSS, style(label).red().bold())
        };
        self.print_line(format!(
            "{} {} {}",
            icon,
            name,
            style(format!("({:.3}s)", elapsed)).dim()
        ));
    }

    /// Report a module whose steps are skipped because it has no origin.
    pub fn module_skipped(&self, module: &str) {
        self.print_line(format!(
            "{} {}",
            SKIP,
            style(format!("{} not requested, skipping its steps", module)).dim()
        ));
    }

    pub fn warn(&self, msg: &str) {
        self.print_line(format!("{}", style(msg).yellow()));
    }
}

impl Default for BuildUI {
    fn default() -> Self {
        Self::new(true)
    }
}
