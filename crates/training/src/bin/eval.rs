use clap::Parser;
use training::config::EvalArgs;
use training::util::{init_tracing, run_eval};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = EvalArgs::parse();
    run_eval(args)
}
