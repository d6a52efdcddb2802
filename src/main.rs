//! Reclaim - operator CLI
//!
//! Submits comments for analysis, votes on analysis records and reads the
//! log, going through the same library paths a web front end would use.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, warn};

use reclaim::cache::AggregateCache;
use reclaim::config::{CliArgs, Command};
use reclaim::db::MongoClient;
use reclaim::kv::{KvStore, MemoryKv, RedisKv};
use reclaim::limiter::RateLimiter;
use reclaim::logging;
use reclaim::models::Submission;
use reclaim::nats::{NatsClient, SubmissionPublisher};
use reclaim::queries::LogQueryService;
use reclaim::store::MongoStore;
use reclaim::{ReclaimError, VoteLedger, VoteReceipt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    logging::init(&args.log.log_level, args.log.log_format);

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(args).await {
        match &e {
            ReclaimError::RateLimitExceeded {
                retry_after_secs, ..
            } => eprintln!("{} (retry in {}s)", e, retry_after_secs),
            _ => eprintln!("{}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: CliArgs) -> reclaim::Result<()> {
    match &args.command {
        Command::Submit { text, submitter } => {
            let nats = NatsClient::new(&args.nats, "reclaim-cli").await?;
            nats.ensure_stream(&args.nats.nats_stream, &args.nats.nats_subject)
                .await?;

            let publisher = SubmissionPublisher::new(
                nats.jetstream().clone(),
                args.nats.nats_subject.clone(),
                args.idempotency_bucket_secs,
            );
            let receipt = publisher
                .publish(Submission::new(text.clone(), submitter.clone()))
                .await?;

            if receipt.duplicate {
                println!("Already queued as {}#{}", receipt.stream, receipt.sequence);
            } else {
                println!("Queued as {}#{}", receipt.stream, receipt.sequence);
            }
        }

        Command::Vote {
            record_id,
            voter,
            vote,
        } => {
            let ledger = open_ledger(&args).await?;
            let receipt = ledger.cast(record_id, voter, *vote).await?;
            print_receipt(&receipt);
        }

        Command::Retract { record_id, voter } => {
            let ledger = open_ledger(&args).await?;
            let receipt = ledger.retract(record_id, voter).await?;
            print_receipt(&receipt);
        }

        Command::Logs { client, .. } => {
            let filter = args.command.record_filter().unwrap_or_default();
            let queries = open_queries(&args).await?;
            let records = queries.list(client, filter).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Command::Show { id, client } => {
            let queries = open_queries(&args).await?;
            let record = queries.get(client, id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}

async fn open_store(args: &CliArgs) -> reclaim::Result<Arc<MongoStore>> {
    let mongo = MongoClient::new(
        &args.mongo.mongodb_uri,
        &args.mongo.mongodb_db,
        args.mongo.storage_timeout(),
    )
    .await?;
    Ok(Arc::new(MongoStore::new(mongo).await?))
}

async fn open_ledger(args: &CliArgs) -> reclaim::Result<VoteLedger> {
    let store = open_store(args).await?;
    Ok(VoteLedger::new(
        store,
        args.ledger.ledger_config(args.mongo.storage_timeout()),
    ))
}

async fn open_queries(args: &CliArgs) -> reclaim::Result<LogQueryService> {
    let store = open_store(args).await?;

    let kv: Arc<dyn KvStore> = match &args.redis.redis_url {
        Some(url) => Arc::new(RedisKv::connect(url, args.mongo.storage_timeout()).await?),
        None => {
            warn!("REDIS_URL not set, rate limits and cache are local to this process");
            Arc::new(MemoryKv::new())
        }
    };

    let limiter = Arc::new(RateLimiter::new(kv.clone(), args.limits.rate_limit_config()));
    let cache = AggregateCache::new(kv, args.limits.cache_ttl());

    Ok(LogQueryService::new(store, limiter, cache).with_max_limit(args.limits.query_limit))
}

fn print_receipt(receipt: &VoteReceipt) {
    println!(
        "{} {} on {}: affirmative={} negative={}",
        receipt.voter_id,
        receipt.plan.label(),
        receipt.record_id,
        receipt.tally.affirmative,
        receipt.tally.negative
    );
}
