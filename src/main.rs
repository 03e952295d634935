//! Event Reconciler - find analytics events that never reached their stores

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_reconciler::{
    config::Args,
    db::{MongoClient, MongoProbe, TrackingStore},
    mapping::Lookups,
    models::CombinedOutcome,
    report::{publish, Aggregator, JsonFileSink},
    validator::{CrossStoreEscalator, Dispatcher, PrimaryProbe, RetryingValidator, SecondaryProbe},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("event_reconciler={},info", args.log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Event Reconciler");
    info!("======================================");
    info!("MongoDB: {} / {}", args.mongodb_uri, args.mongodb_db);
    info!("Source collection: {}", args.collection);
    info!(
        "Documents: {}",
        if args.limit > 0 { args.limit.to_string() } else { "all".to_string() }
    );
    info!("Query timeout: {}s", args.query_timeout_secs);
    info!("Max concurrent: {}", args.max_concurrent);
    info!("Attempt limit: {}", args.attempt_limit);
    info!(
        "Secondary validation: {}",
        if args.enable_secondary { "enabled" } else { "disabled" }
    );
    info!("Output: {}", args.output_dir.display());
    info!("======================================");

    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db, args.conn_timeout()).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let recoveries = mongo
        .fetch_recoveries(&args.collection, args.limit, args.recovery_read_timeout())
        .await?;

    let policy = args.retry_policy();
    let primary_probe: Arc<PrimaryProbe> = Arc::new(MongoProbe::new(mongo.clone()));
    let mut dispatcher = Dispatcher::new(
        RetryingValidator::new(primary_probe, policy),
        args.dispatch_config(),
    );

    if args.enable_secondary {
        let lookups = Arc::new(Lookups::load_or_default(
            args.requirements_csv.as_deref(),
            args.collection_ids_csv.as_deref(),
        ));
        // validate() guarantees the path is present when secondary is enabled
        let Some(path) = args.tracking_db.as_deref() else {
            anyhow::bail!("--tracking-db is required when secondary validation is enabled");
        };
        let tracking: Arc<SecondaryProbe> = Arc::new(TrackingStore::open(path)?);
        dispatcher = dispatcher.with_escalator(Arc::new(CrossStoreEscalator::new(
            tracking, policy, lookups,
        )));
    }

    let mut outcomes: Vec<CombinedOutcome> = Vec::new();
    for (index, recovery) in recoveries.into_iter().enumerate() {
        let batch_tag = index + 1;
        info!(
            batch_tag,
            document_id = ?recovery.id,
            events = recovery.events.len(),
            "Processing recovery document"
        );
        outcomes.extend(dispatcher.run(recovery.events, batch_tag).await);
    }

    let aggregation = Aggregator::now().summarize(&outcomes);
    let sink = JsonFileSink::new(args.output_dir.clone());
    let written = publish(&aggregation, &sink, args.publish_mode())?;

    info!(
        events_checked = outcomes.len(),
        reports = written.len(),
        "Reconciliation complete"
    );
    Ok(())
}
