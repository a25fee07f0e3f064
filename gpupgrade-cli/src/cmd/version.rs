use anyhow::Result;
use structopt::StructOpt;

use crate::reporter::Reporter;
use crate::Gpupgrade;

/// Print the version of this CLI.
#[derive(StructOpt)]
#[structopt(name = "version")]
pub struct Version {}

impl Version {
    pub async fn run(&self, _base: &Gpupgrade) -> Result<()> {
        Reporter::new(std::io::stdout()).line(&format!("gpupgrade version {}", env!("CARGO_PKG_VERSION")))
    }
}
