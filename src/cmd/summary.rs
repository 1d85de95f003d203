//! Re-render a stored report: `buildmachine summary`.

use anyhow::Result;
use std::path::Path;

pub fn cmd_summary(report: &Path) -> Result<()> {
    use buildmachine::report::{ProcedureReport, render_shell_summary};

    let report = ProcedureReport::load(report)?;
    println!("{}", render_shell_summary(&report));
    Ok(())
}
