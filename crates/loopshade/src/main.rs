use anyhow::Result;
use loopshade::{cli, run};

fn main() -> Result<()> {
    let args = cli::parse();
    run::run(args)
}
