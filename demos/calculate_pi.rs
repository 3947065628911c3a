//! Monte Carlo estimate of pi split across two services.
//!
//! `PiService` throws darts at the unit square and reports every one to
//! `CollectorService`, which keeps the running estimate.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example calculate_pi -- local --darts 20000
//!
//! cargo run --example calculate_pi -- --config demos/calculate_pi.toml serve CollectorService
//! cargo run --example calculate_pi -- --config demos/calculate_pi.toml serve PiService
//! cargo run --example calculate_pi -- --config demos/calculate_pi.toml call --darts 2000
//! ```

mod dry_run;

use clap::{Parser, Subcommand};
use dry_run::DryRun;
use microrpc::{
    config::{DeployConfig, RegistryConfig},
    deploy::ServiceDeployer,
    DispatchTable, LocalService, Locator, Registry, Result, Service, ServiceHandle,
    ServiceRunner,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const REPORT_EVERY: i32 = 1000;

pub struct CollectorService {
    locator: Locator,
    hits: i32,
    total: i32,
}

impl CollectorService {
    fn new(locator: Locator) -> Self {
        Self {
            locator,
            hits: 0,
            total: 0,
        }
    }

    async fn start(&mut self, darts: i32) -> anyhow::Result<()> {
        self.hits = 0;
        self.total = 0;
        self.locator.get::<PiService>()?.start(darts).await?;
        Ok(())
    }

    fn record(&mut self, hit: bool) {
        self.hits += hit as i32;
        self.total += 1;
        debug!(hits = self.hits, total = self.total, "dart");
        if self.total % REPORT_EVERY == 0 {
            info!(total = self.total, pi = %self.estimate(), "estimate");
        }
    }

    fn estimate(&self) -> String {
        if self.total == 0 {
            return "unknown".into();
        }
        format!("{:.6}", f64::from(self.hits) * 4.0 / f64::from(self.total))
    }
}

impl Service for CollectorService {
    const NAME: &'static str = "CollectorService";

    fn dispatch_table() -> Result<DispatchTable<Self>> {
        let mut table = DispatchTable::<Self>::new();
        table
            .async_method("start", |collector, (darts,): (i32,)| {
                Box::pin(collector.start(darts))
            })?
            .method("hit", |collector: &mut CollectorService, (): ()| {
                collector.record(true);
                Ok(())
            })?
            .method("miss", |collector: &mut CollectorService, (): ()| {
                collector.record(false);
                Ok(())
            })?
            .method("total", |collector: &mut CollectorService, (): ()| {
                Ok(collector.total)
            })?
            .method("estimate", |collector: &mut CollectorService, (): ()| {
                Ok(collector.estimate())
            })?
            .private("record")?;
        Ok(table)
    }
}

microrpc::interface! {
    pub trait CollectorApi for CollectorService {
        fn start(darts: i32) -> ();
        fn hit() -> ();
        fn miss() -> ();
        fn total() -> i32;
        fn estimate() -> String;
    }
}

pub struct PiService {
    locator: Locator,
}

impl PiService {
    /// Returns at once; the darts are thrown in the background.
    fn start(&mut self, darts: i32) -> anyhow::Result<()> {
        anyhow::ensure!(darts > 0, "need a positive number of darts, got {darts}");
        let collector = self.locator.get::<CollectorService>()?;
        tokio::spawn(async move {
            if let Err(e) = throw_darts(&collector, darts).await {
                warn!(error = %e, "stopped throwing darts");
            }
        });
        Ok(())
    }
}

async fn throw_darts(collector: &ServiceHandle<CollectorService>, darts: i32) -> Result<()> {
    for _ in 0..darts {
        let (x, y): (f64, f64) = rand::random();
        if (x * x + y * y).sqrt() < 1.0 {
            collector.hit().await?;
        } else {
            collector.miss().await?;
        }
    }
    info!(darts, "done throwing");
    Ok(())
}

impl Service for PiService {
    const NAME: &'static str = "PiService";

    fn dispatch_table() -> Result<DispatchTable<Self>> {
        let mut table = DispatchTable::new();
        table.method("start", |pi: &mut PiService, (darts,): (i32,)| pi.start(darts))?;
        Ok(table)
    }
}

microrpc::interface! {
    pub trait PiApi for PiService {
        fn start(darts: i32) -> ();
    }
}

/// Distributed pi estimation demo
#[derive(Parser, Debug)]
#[command(name = "calculate_pi")]
#[command(about = "Estimate pi with one service throwing darts and another counting them")]
struct Args {
    /// Service table (TOML); defaults to each service on its own host, port 80
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Host one service until killed
    Serve {
        /// CollectorService or PiService
        service: String,
    },

    /// Start a run on the running services and wait for it to finish
    Call {
        #[arg(long, default_value = "2000")]
        darts: i32,
    },

    /// Host both services in this process
    Local {
        #[arg(long, default_value = "20000")]
        darts: i32,
    },

    /// Deploy every service, logging instead of touching a cluster
    Deploy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut runner = ServiceRunner::new(Registry::new());
    runner
        .register(CollectorService::new)
        .register(|locator| PiService { locator });
    if let Some(path) = &args.config {
        RegistryConfig::from_file(path)?.apply(runner.registry());
    }

    match args.command {
        Commands::Serve { service } => match runner.serve(&service).await? {},
        Commands::Call { darts } => run(runner.locator(), darts).await?,
        Commands::Local { darts } => {
            let locator = Locator::new(Arc::new(Registry::new()));
            locator.host(LocalService::new(CollectorService::new(locator.clone()))?);
            locator.host(LocalService::new(PiService {
                locator: locator.clone(),
            })?);
            run(&locator, darts).await?;
        }
        Commands::Deploy => {
            let deployer = ServiceDeployer::new(
                DeployConfig::from_env()?,
                "calculate_pi serve",
                vec![std::env::current_exe()?],
                DryRun,
                DryRun,
                DryRun,
            );
            for deployment in runner.deploy(&deployer).await? {
                println!("{} -> {}", deployment.service, deployment.image);
            }
        }
    }
    Ok(())
}

async fn run(locator: &Locator, darts: i32) -> anyhow::Result<()> {
    let collector = locator.get::<CollectorService>()?;
    collector.start(darts).await?;
    while collector.total().await? < darts {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("pi ~ {}", collector.estimate().await?);
    Ok(())
}
