mod bench;
mod script;
mod session;
mod stats;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use edu_core::DriverConfig;
use edu_hw::SimConfig;
use session::Session;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(about = "Drive a simulated EDU accelerator through its driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct CardOpts {
    /// Time the card takes per factorial, in microseconds.
    #[arg(long, default_value_t = 100)]
    latency_us: u64,
    /// Interrupt line the card is wired to.
    #[arg(long, default_value_t = 11)]
    irq_line: u32,
    /// Leave the card disarmed at attach; the first ENABLE_IRQ arms it.
    #[arg(long)]
    no_arm: bool,
}

impl CardOpts {
    fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us)
    }

    fn open(&self) -> Result<Session> {
        Session::open(
            SimConfig {
                latency: self.latency(),
                irq_line: self.irq_line,
                ..SimConfig::default()
            },
            DriverConfig {
                enable_irq_on_attach: !self.no_arm,
                ..DriverConfig::default()
            },
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute factorials, one submit/wait/enable cycle per value.
    Factorial {
        #[arg(required = true)]
        values: Vec<u32>,
        #[command(flatten)]
        card: CardOpts,
    },
    /// Replay a session script.
    Run {
        #[arg(short, long)]
        script: PathBuf,
        #[command(flatten)]
        card: CardOpts,
    },
    /// Dump the registers, probe liveness with 0x2, dump again.
    Regs {
        #[command(flatten)]
        card: CardOpts,
    },
    /// Drive several cards in parallel and report cycle latency.
    Bench {
        #[arg(short, long, default_value_t = 4)]
        devices: usize,
        #[arg(short, long, default_value_t = 1_000)]
        cycles: u64,
        #[command(flatten)]
        card: CardOpts,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Factorial { values, card } => {
            let session = card.open()?;
            if card.no_arm {
                session.enable()?;
            }
            for n in values {
                let value = session.factorial(n)?;
                println!("{n}! = {value} ({value:#x})");
            }
            let irq = session.device().irq_stats();
            println!(
                "Interrupts: {} handled, {} spurious, {} faults",
                irq.handled, irq.spurious, irq.faults
            );
        }
        Commands::Run { script, card } => {
            let steps = edu_io::load_script_file(&script)?;
            let session = card.open()?;
            let executed = script::run_script(&session, &steps)?;
            println!("{executed} steps ok");
        }
        Commands::Regs { card } => {
            let session = card.open()?;
            session.print_region()?;
            session.print_registers()?;
            if !session.probe_liveness(0x2)? {
                bail!("card failed the liveness probe");
            }
            session.print_registers()?;
            let intc = session.sim().interrupts().stats();
            println!(
                "Interrupt controller: {} delivered, {} unhandled",
                intc.delivered, intc.unhandled
            );
        }
        Commands::Bench {
            devices,
            cycles,
            card,
        } => {
            bench::run_benchmark(devices, cycles, card.latency())?;
        }
    }
    Ok(())
}
