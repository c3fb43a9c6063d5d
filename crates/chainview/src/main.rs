mod bindings;
mod cli;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Plan(args) => run::run_plan(args),
        Command::Render(args) => run::run_render(args),
    }
}
