//! Reclaim Worker - analysis request consumer
//!
//! Run any number of these against the same stream; they share one durable
//! consumer.
//!
//! Usage:
//!   reclaim-worker --nats-url nats://localhost:4222 --mongodb-uri mongodb://localhost:27017
//!
//! Environment variables:
//!   NATS_URL - NATS server URL (default: nats://127.0.0.1:4222)
//!   MONGODB_URI - MongoDB connection URI (default: mongodb://localhost:27017)
//!   GROQ_API_KEY - Classification service key (required to make progress)
//!   WORKER_ID - Unique worker identifier (default: auto-generated UUID)
//!   ACK_WAIT_SECS - Redelivery timeout for unacked messages (default: 60)

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use reclaim::classifier::ChatCompletionClassifier;
use reclaim::config::WorkerArgs;
use reclaim::db::MongoClient;
use reclaim::logging;
use reclaim::nats::NatsClient;
use reclaim::store::MongoStore;
use reclaim::worker::{SubmissionHandler, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = WorkerArgs::parse();
    logging::init(&args.log.log_level, args.log.log_format);

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    let config = args.worker_config();
    let classifier_config = args.classifier.to_config();

    info!(
        "Starting Reclaim worker {} (NATS: {}, stream: {}, model: {})",
        config.worker_id, args.nats.nats_url, config.stream, classifier_config.model
    );
    if classifier_config.api_key.is_none() {
        error!("GROQ_API_KEY is not set; the worker will halt on the first request");
    }

    let mongo = MongoClient::new(
        &args.mongo.mongodb_uri,
        &args.mongo.mongodb_db,
        args.mongo.storage_timeout(),
    )
    .await?;
    let store = Arc::new(MongoStore::new(mongo).await?);
    let classifier = Arc::new(ChatCompletionClassifier::new(classifier_config)?);
    let nats = NatsClient::new(&args.nats, &format!("reclaim-worker-{}", config.worker_id)).await?;

    let handler = SubmissionHandler::new(classifier, store, args.handler_config());
    let worker = Arc::new(Worker::new(config, nats, handler));

    let mut worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, finishing in-flight request");
            worker.stop().await;
            (&mut worker_handle).await
        }
        result = &mut worker_handle => result,
    };

    match result {
        Ok(Ok(())) => {
            info!("Worker shut down");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error_kind = e.kind(), "Worker halted: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Worker task error: {}", e);
            std::process::exit(1);
        }
    }
}
