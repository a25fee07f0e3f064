//! Rendering of hub replies as human-readable report lines.

use std::io::Write;

use anyhow::{Context, Result};

use gpupgrade_core::grpc::cli;

/// A writer of report lines.
pub struct Reporter<W> {
    out: W,
}

impl<W: Write> Reporter<W> {
    /// Create a new instance writing to the given output.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write one `<STATUS> <step description>` line per step, in the order given.
    pub fn upgrade_status(&mut self, statuses: &[cli::UpgradeStepStatus]) -> Result<()> {
        for status in statuses {
            self.line(&status.report_line())?;
        }
        Ok(())
    }

    /// Write one line per database with its table counts.
    pub fn object_counts(&mut self, counts: &[cli::CountPerDb]) -> Result<()> {
        self.line("Number of AO objects - ")?;
        for count in counts {
            self.line(&format!("\t{}: {}", count.db_name, count.ao_count))?;
        }
        self.line("Number of heap objects - ")?;
        for count in counts {
            self.line(&format!("\t{}: {}", count.db_name, count.heap_count))?;
        }
        Ok(())
    }

    /// Write the given lines verbatim.
    pub fn lines(&mut self, lines: &[String]) -> Result<()> {
        for line in lines {
            self.line(line)?;
        }
        Ok(())
    }

    /// Write a single line.
    pub fn line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line).context("error writing report output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpupgrade_core::{StepStatus, UpgradeStep};

    #[test]
    fn upgrade_status_renders_one_line_per_step() -> Result<()> {
        let statuses = vec![
            cli::UpgradeStepStatus::from_domain(UpgradeStep::CheckConfig, StepStatus::Complete),
            cli::UpgradeStepStatus::from_domain(UpgradeStep::SegInstall, StepStatus::Pending),
            cli::UpgradeStepStatus::from_domain(UpgradeStep::StoppedCluster, StepStatus::Failed),
        ];
        let mut out = vec![];
        Reporter::new(&mut out).upgrade_status(&statuses)?;

        let text = String::from_utf8(out)?;
        assert_eq!(
            text,
            "COMPLETE - Configuration Check\nPENDING - Install binaries on segments\nFAILED - Shutdown clusters\n",
            "unexpected report {}",
            text
        );
        Ok(())
    }

    #[test]
    fn object_counts_group_ao_then_heap() -> Result<()> {
        let counts = vec![
            cli::CountPerDb { db_name: "postgres".into(), ao_count: 0, heap_count: 1 },
            cli::CountPerDb { db_name: "template1".into(), ao_count: 2, heap_count: 3 },
        ];
        let mut out = vec![];
        Reporter::new(&mut out).object_counts(&counts)?;

        let text = String::from_utf8(out)?;
        assert_eq!(
            text,
            "Number of AO objects - \n\tpostgres: 0\n\ttemplate1: 2\nNumber of heap objects - \n\tpostgres: 1\n\ttemplate1: 3\n"
        );
        Ok(())
    }
}
