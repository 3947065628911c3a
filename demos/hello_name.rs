//! Two services: `HelloService` greets whoever `NameService` currently names.
//!
//! # Usage
//!
//! ```bash
//! # Both services in one process
//! cargo run --example hello_name -- local
//!
//! # One process per service, then a caller
//! cargo run --example hello_name -- --config demos/hello_name.toml serve NameService
//! cargo run --example hello_name -- --config demos/hello_name.toml serve HelloService
//! cargo run --example hello_name -- --config demos/hello_name.toml call --name Ferris
//!
//! # Show what deploying both services would do
//! IMAGE_PREFIX=registry.local/demo/ cargo run --example hello_name -- deploy
//! ```

mod dry_run;

use clap::{Parser, Subcommand};
use dry_run::DryRun;
use microrpc::{
    config::{DeployConfig, RegistryConfig},
    deploy::ServiceDeployer,
    DispatchTable, LocalService, Locator, Registry, Result, Service, ServiceRunner,
};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

pub struct NameService {
    name: String,
}

impl Service for NameService {
    const NAME: &'static str = "NameService";

    fn dispatch_table() -> Result<DispatchTable<Self>> {
        let mut table = DispatchTable::new();
        table
            .method("get_name", |names: &mut NameService, (): ()| {
                Ok(names.name.clone())
            })?
            .method("set_name", |names: &mut NameService, (name,): (String,)| {
                anyhow::ensure!(!name.contains('\n'), "names are a single line");
                names.name = name;
                Ok(())
            })?;
        Ok(table)
    }
}

microrpc::interface! {
    pub trait NameApi for NameService {
        fn get_name() -> String;
        fn set_name(name: String) -> ();
    }
}

pub struct HelloService {
    locator: Locator,
}

impl HelloService {
    async fn say_hello(&mut self) -> anyhow::Result<String> {
        let name = self.locator.get::<NameService>()?.get_name().await?;
        Ok(format!("Hello, {name}!"))
    }
}

impl Service for HelloService {
    const NAME: &'static str = "HelloService";

    fn dispatch_table() -> Result<DispatchTable<Self>> {
        let mut table = DispatchTable::<Self>::new();
        table.async_method("say_hello", |hello, (): ()| Box::pin(hello.say_hello()))?;
        Ok(table)
    }
}

microrpc::interface! {
    pub trait HelloApi for HelloService {
        fn say_hello() -> String;
    }
}

/// Hello/Name microservice demo
#[derive(Parser, Debug)]
#[command(name = "hello_name")]
#[command(about = "HelloService greets the name held by NameService")]
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
        /// NameService or HelloService
        service: String,
    },

    /// Ask the running services for a greeting
    Call {
        /// Rename first
        #[arg(long)]
        name: Option<String>,
    },

    /// Host both services in this process and greet once
    Local,

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
        .register(|_| NameService {
            name: "world".into(),
        })
        .register(|locator| HelloService { locator });
    if let Some(path) = &args.config {
        RegistryConfig::from_file(path)?.apply(runner.registry());
    }

    match args.command {
        Commands::Serve { service } => match runner.serve(&service).await? {},
        Commands::Call { name } => {
            let locator = runner.locator();
            if let Some(name) = name {
                locator.get::<NameService>()?.set_name(name).await?;
            }
            println!("{}", locator.get::<HelloService>()?.say_hello().await?);
        }
        Commands::Local => {
            let locator = Locator::new(Arc::new(Registry::new()));
            locator.host(LocalService::new(NameService {
                name: "world".into(),
            })?);
            locator.host(LocalService::new(HelloService {
                locator: locator.clone(),
            })?);
            println!("{}", locator.get::<HelloService>()?.say_hello().await?);
        }
        Commands::Deploy => {
            let entry_point = std::env::current_exe()?;
            let deployer = ServiceDeployer::new(
                DeployConfig::from_env()?,
                "hello_name serve",
                vec![entry_point],
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
