/**
 * @file main.rs
 * @date 18/10/2026
 * @brief Console driver: loads programs, ticks the machine, relays
 * interrupt messages and user input.
 */
use clap::Parser;
use ossim::{InterruptMessage, InterruptQueue, Machine};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod config;
mod program;

use program::Program;

const CONFIG_PATH: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(version, about = "Multi-core teaching computer simulator")]
struct Cli {
    /// Configuration file (toml, json or yaml)
    #[arg(short, long, default_value = CONFIG_PATH)]
    config: String,

    /// Program files, one process each
    #[arg(required = true)]
    programs: Vec<PathBuf>,

    #[arg(short, long, default_value_t = 1)]
    priority: u8,

    /// Step the cores on separate threads
    #[arg(long)]
    parallel: bool,

    /// Give up after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Print the memory map as JSON when the run ends
    #[arg(long)]
    dump_map: bool,
}

/// Forward interrupt messages to the async side until `stop` is set.
fn spawn_consumer(
    queue: Arc<InterruptQueue>,
    sender: mpsc::UnboundedSender<InterruptMessage>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !stop.load(Ordering::Relaxed) {
            let Some(message) = queue.take_message_timeout(Duration::from_millis(50)) else {
                continue;
            };

            if sender.send(message).is_err() {
                break;
            }
        }
    })
}

fn spawn_stdin_reader(sender: mpsc::UnboundedSender<String>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if sender.send(line).is_err() {
                break;
            }
        }
    });
}

fn show(message: &InterruptMessage, prompts: &mut VecDeque<ossim::ProcessId>) {
    if message.code.is_input() {
        prompts.push_back(message.process_id);
        println!("[process {}] {}: ", message.process_id, message.message);
    } else {
        println!("{message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    let config = config::ConsoleConfig::parse(&cli.config)?;
    log::info!("Config: {config:?}");

    let mut machine = Machine::new(&config.memory, config.cores)?;
    machine.set_parallel(cli.parallel);

    for path in &cli.programs {
        let program = Program::load(path).await?;
        let pid = machine.load_process(&program.instructions(), cli.priority)?;
        log::info!("Loaded {} as process {pid}", program.path.display());
    }

    let (message_tx, mut messages) = mpsc::unbounded_channel();
    let (line_tx, mut lines) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let consumer = spawn_consumer(
        Arc::clone(machine.interrupt_queue()),
        message_tx,
        Arc::clone(&stop),
    );
    spawn_stdin_reader(line_tx);

    let mut prompts = VecDeque::new();
    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_ms.max(1)));
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            Some(message) = messages.recv() => show(&message, &mut prompts),

            Some(line) = lines.recv(), if !prompts.is_empty() => {
                if let Some(pid) = prompts.pop_front() {
                    if let Err(why) = machine.provide_input(pid, &line) {
                        log::warn!("{why}");
                    }
                }
            }

            _ = interval.tick() => {
                if machine.is_idle() {
                    break;
                }

                if cli.max_ticks.is_some_and(|max| ticks >= max) {
                    log::warn!("Stopped after {ticks} ticks");
                    break;
                }

                machine.tick();
                ticks += 1;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    consumer.await?;

    while let Ok(message) = messages.try_recv() {
        show(&message, &mut prompts);
    }
    for message in machine.interrupt_queue().drain() {
        show(&message, &mut prompts);
    }

    log::info!("Finished after {ticks} ticks");

    if cli.dump_map {
        let map = machine.memory().get_main_memory_map();
        println!("{}", serde_json::to_string_pretty(&map)?);
    }

    Ok(())
}
