use std::io::Write;

use structopt::StructOpt;

use gpupgrade_cli::Gpupgrade;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = match Gpupgrade::from_args().run().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::exit(code);
}
