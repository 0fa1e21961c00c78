//! Rollcall simulator
//!
//! Drive a group of peers through a seeded random workload and report
//! whether they converged.
//!
//! ```text
//! rollcall-sim [mesh|live] [--peers N] [--capacity N] [--seed N] [--steps N] [--in-order]
//! ```
//!
//! Defaults come from `ROLLCALL_*` environment variables.

use std::env;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_sim::{Cluster, Mesh, SimConfig, Workload};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcall=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = SimConfig::from_env()?;
    let mut live = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "mesh" => live = false,
            "live" => live = true,
            "--peers" => config.peers = parse(args.next(), "--peers")?,
            "--capacity" => config.capacity = parse(args.next(), "--capacity")?,
            "--seed" => config.seed = parse(args.next(), "--seed")?,
            "--steps" => config.steps = parse(args.next(), "--steps")?,
            "--in-order" => config.reorder = false,
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }
    config.roster().validate()?;

    println!("Rollcall simulator");
    println!("==================");
    println!(
        "peers: {}  capacity: {}  seed: {}  steps: {}  reorder: {}",
        config.peers, config.capacity, config.seed, config.steps, config.reorder
    );
    println!();

    if live {
        run_live(&config).await
    } else {
        run_mesh(&config)
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>, flag: &str) -> Result<T, String> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| format!("{flag} needs a number"))
}

fn run_mesh(config: &SimConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut mesh = Mesh::from_config(config)?;
    let mut workload = Workload::new(config.seed, config.peers);

    for _ in 0..config.steps {
        let action = workload.next_action(&mesh);
        mesh.apply(action)?;
    }
    let deliveries = mesh.settle()?;

    println!("Settled after {} trailing deliveries ({} total)", deliveries, mesh.delivered());
    if let Some(coordinator) = mesh.coordinator() {
        if let Some(peer) = mesh.peer(coordinator) {
            println!();
            print!("{}", peer.view());
        }
    }
    println!();
    match mesh.check_invariants() {
        Ok(()) => println!("All {} peers converged", mesh.len()),
        Err(violation) => {
            println!("Invariant violated: {violation}");
            return Err(violation.into());
        }
    }
    Ok(())
}

async fn run_live(config: &SimConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut cluster = Cluster::start(config.roster())?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    for _ in 0..config.steps {
        let ids = cluster.ids();
        let roll: u32 = rng.gen_range(0..100);
        if ids.is_empty() || (roll < 25 && ids.len() < config.peers) {
            cluster.join()?;
            continue;
        }
        let pick = ids[rng.gen_range(0..ids.len())];
        if roll < 35 {
            cluster.leave(pick).await?;
        } else {
            cluster.toggle(pick)?;
        }
    }
    cluster.settle(Duration::from_secs(10)).await?;

    let views = cluster.views().await;
    if let Some(view) = cluster.coordinator().and_then(|id| views.get(&id)) {
        print!("{view}");
    }
    println!();
    let outcome = cluster.check_invariants().await;
    let peers = cluster.shutdown().await?;
    match outcome {
        Ok(()) => println!("All {} peer tasks converged", peers.len()),
        Err(violation) => {
            println!("Invariant violated: {violation}");
            return Err(violation.into());
        }
    }
    Ok(())
}
