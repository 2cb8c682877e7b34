use acme_lego::cli::{Cli, execute};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    // Codes above 255 are truncated by the platform, as with any exit status.
    std::process::exit(execute(cli));
}
