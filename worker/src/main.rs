use std::{
    process::exit,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread::JoinHandle,
};

use clap::Parser;
use core_affinity::CoreId;
use shared::{
    log::init_log,
    partition, pow,
    types::WorkerId,
};
use tracing::{error, info, warn};
use worker::search::{SearchOutcome, SearchTask};

/// Single-machine search tool: sweeps the whole nonce space on the local
/// cores, racing one pinned thread per core.
#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[arg(long, default_value = "blockdata", help = "Block payload the nonce is appended to")]
    payload: String,

    #[arg(
        long,
        default_value_t = 10,
        help = "The difficulty of nonce discovery. This corresponds to the number of leading zero bits required in the digest"
    )]
    difficulty: u32,

    #[arg(long, help = "The number of CPU cores to allocate to the search")]
    cores: Option<usize>,

    #[arg(long, default_value_t = 1u64 << 32, help = "Size of the nonce space to sweep")]
    space: u64,
}

fn main() {
    init_log();

    let args = Args::parse();

    if let Err(err) = pow::check_difficulty(args.difficulty) {
        error!("{err}");
        exit(2);
    }

    let cores = args.cores.unwrap_or_else(num_cpus::get).max(1);
    let ranges = match partition::partition(args.space, cores as u32) {
        Ok(ranges) => ranges,
        Err(err) => {
            error!("{err}");
            exit(2);
        }
    };

    info!("searching [0, {}) across {cores} cores, difficulty {}", args.space, args.difficulty);

    let halt = Arc::new(AtomicBool::new(false));
    let (result_tx, result_rx) = mpsc::channel();

    let mut handlers: Vec<JoinHandle<()>> = vec![];
    for (id, range) in ranges.into_iter().enumerate() {
        let task = SearchTask {
            worker: WorkerId(id as u32),
            payload: args.payload.clone(),
            range,
            difficulty: args.difficulty,
            halt: halt.clone(),
            cursor: Arc::new(AtomicU64::new(range.start)),
        };
        let sender = result_tx.clone();
        handlers.push(std::thread::spawn(move || {
            // bound thread to core
            let _ = core_affinity::set_for_current(CoreId { id });
            let worker = task.worker;
            let outcome = task.run();
            sender.send((worker, outcome)).ok();
        }));
    }
    drop(result_tx);

    // first hit wins; the halt flag stops every other sweep
    let mut winner = None;
    while let Ok((worker, outcome)) = result_rx.recv() {
        match outcome {
            SearchOutcome::Found { nonce, digest, leading_zeros, elapsed } => {
                if winner.is_none() {
                    info!(
                        "{worker}: golden nonce {nonce} ({leading_zeros} zero bits) after {:.3}s",
                        elapsed.as_secs_f64()
                    );
                    winner = Some((nonce, digest));
                    halt.store(true, Ordering::Relaxed);
                }
            }
            SearchOutcome::Exhausted { .. } => warn!("{worker}: range exhausted with no hit"),
            SearchOutcome::Cancelled { .. } => {}
        }
    }

    for handler in handlers {
        if let Err(err) = handler.join() {
            error!("{err:?}");
        }
    }

    match winner {
        Some((nonce, digest)) => {
            println!("golden nonce: {nonce}");
            println!("digest:       {}", hex::encode(digest));
        }
        None => {
            warn!("no qualifying nonce in [0, {})", args.space);
            exit(1);
        }
    }
}
