use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gallery_core::{GalleryConfig, UserId};
use gallery_processing::VariantPipeline;
use gallery_services::UploadGrantIssuer;
use gallery_storage::create_storage;
use gallery_worker::{init_tracing, EventIngestWorker, LogFormat, QueueBatch};
use std::io::Read;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gallery-worker")]
#[command(about = "Publish responsive variants of listing images and issue upload grants")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one queue batch; exits non-zero when the batch must be redelivered
    Process {
        /// Path to the batch JSON, or `-` for stdin
        #[arg(long, value_name = "FILE")]
        batch: String,
    },
    /// Issue a direct-upload grant and print it as JSON
    Grant {
        #[arg(long, value_name = "USER_ID")]
        user: String,

        #[arg(long, value_name = "MIME")]
        content_type: String,
    },
}

fn read_batch(source: &str) -> Result<String> {
    if source == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read batch from stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read batch file {}", source))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::from_env());

    let args = Args::parse();
    let config = GalleryConfig::from_env().context("Invalid configuration")?;
    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialise storage")?;

    tracing::info!(
        backend = %storage.backend_type(),
        draft_bucket = %config.upload.draft_bucket,
        persistent_bucket = %config.upload.persistent_bucket,
        "Gallery worker started"
    );

    match args.command {
        Command::Process { batch } => {
            let input = read_batch(&batch)?;
            let batch = QueueBatch::from_json(&input)?;

            let pipeline = Arc::new(VariantPipeline::new(storage, config.optimization.clone()));
            let worker = EventIngestWorker::new(pipeline, config.optimization);

            let report = match tokio::time::timeout(
                config.worker.batch_timeout,
                worker.handle_batch(&batch),
            )
            .await
            {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    tracing::error!(
                        error = %e,
                        error_code = e.error_code(),
                        recoverable = e.is_recoverable(),
                        "Batch failed; it will be redelivered"
                    );
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::error!(
                        timeout_secs = config.worker.batch_timeout.as_secs(),
                        "Batch timed out; it will be redelivered"
                    );
                    bail!(
                        "batch did not finish within {}s",
                        config.worker.batch_timeout.as_secs()
                    );
                }
            };

            println!(
                "{}",
                serde_json::json!({
                    "processed": report.processed,
                    "skipped": report.skipped,
                    "failed": report.failed,
                })
            );
        }
        Command::Grant { user, content_type } => {
            let user_id = UserId::new(user)?;
            let issuer = UploadGrantIssuer::new(storage, config.upload);
            let grant = issuer.issue_grant(&user_id, &content_type).await?;
            println!("{}", serde_json::to_string_pretty(&grant)?);
        }
    }

    Ok(())
}
