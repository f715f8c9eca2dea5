use clap::Parser;
use training::config::TrainArgs;
use training::util::{init_tracing, run_train};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    run_train(args)
}
