use certsync::acme::InstantAcmeClient;
use certsync::cli::{Cli, Commands};
use certsync::config::Config;
use certsync::slb::AliyunConnector;
use certsync::store::Store;
use certsync::task::TaskRunner;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    certsync::install_rustls_crypto_provider();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }

    let store = Arc::new(Store::open(&config.database)?);

    let Some((kind, params)) = cli.command.task() else {
        // init-db: opening the store already created or migrated the schema
        tracing::info!(
            database = %config.database.display(),
            version = store.schema_version()?,
            "Database ready"
        );
        return Ok(());
    };

    let runner = TaskRunner::new(
        store,
        Arc::new(InstantAcmeClient::new(config.acme.clone())),
        Arc::new(config.dns.registry()),
        Arc::new(AliyunConnector::new(config.slb.clone())),
        config.acme.key_type,
        config.listener.clone(),
    );

    match runner.run_command(kind, params).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(task = %kind, error = %e, "Task failed");
            Err(e.into())
        }
    }
}
