use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use topic_producer::kafka::StringSerializer;
use topic_producer::{EnqueueResult, ProducerRegistry, TopicDescriptor};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "topic-producer")]
#[command(about = "Publish stdin lines to a Kafka topic", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Topic identifier to publish to")]
    topic: String,

    #[arg(short, long, help = "Send each line directly and print its acknowledgment")]
    direct: bool,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Loading configuration from {:?}", args.config);
    let config = topic_producer::config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let registry = ProducerRegistry::from_config(config)?;
    let descriptor = TopicDescriptor::<String>::of(args.topic.as_str());
    let producer = registry
        .register(&descriptor, StringSerializer)
        .await
        .with_context(|| format!("failed to register topic {}", args.topic))?;

    info!(
        topic = %producer.producer().config().topic_name,
        bootstrap_servers = %producer.producer().config().bootstrap_servers,
        direct = args.direct,
        "Publishing lines from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                None
            }
        };
        let Some(line) = line else { break };

        if args.direct {
            match producer.send(&line).await {
                Ok(ack) => println!("{}", serde_json::to_string(&ack)?),
                Err(e) => error!("Send failed: {}", e),
            }
            continue;
        }

        match producer.enqueue(&line).await? {
            EnqueueResult::Enqueued => {}
            EnqueueResult::Dropped => warn!("Line dropped by overflow strategy"),
            EnqueueResult::QueueClosed => break,
            EnqueueResult::Failed => {
                error!("Queue overflowed and failed");
                break;
            }
        }
    }

    registry.shutdown().await;
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("topic_producer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("topic_producer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
