use clap::Parser;
use cmds::Cmd;

mod agent;
mod cmds;
mod config;
mod env;
mod replay;

#[derive(Debug, Parser)]
#[command(name = "qdqn", about = "DQN example on top of the qtape autodiff")]
struct Cli {
    /// Increase log verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: cmds::Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::builder().filter_level(level).init();

    log::info!("{:?}", cli);
    cli.command.run()
}
