//! averion-screening - command-line client for the Averion Labs screening service
//!
//! Submits chest X-ray and skin-lesion images for analysis, follows the job
//! until it finishes and prints the result. Batch submissions go through the
//! tier/credit admission check before anything is uploaded.

use anyhow::{anyhow, bail, Result};
use averion_common::config::{resolve_api_url, TomlConfig, TOKEN_ENV};
use averion_common::{ModelType, PricingTable, SessionContext};
use averion_screening::{
    AffordabilityPolicy, BatchAdmission, ClientTimeouts, ImageUpload, JobPoller, JobResult,
    PollerConfig, PollerHandle, PollerPhase, PollerSnapshot, ScreeningClient,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "averion-screening")]
#[command(about = "Medical image screening client for Averion Labs")]
#[command(version)]
struct Args {
    /// Backend base URL (overrides AVERION_API_URL and the config file)
    #[arg(long)]
    api_url: Option<String>,

    /// Config file (default: <config dir>/averion/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Access token from a previous login
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and print the access token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "AVERION_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show batch tier limits and per-model cost for a credit balance
    Tiers {
        #[arg(long)]
        credits: u64,
    },

    /// Analyze one image
    Predict {
        #[arg(short, long)]
        model: ModelType,
        file: PathBuf,
    },

    /// Analyze several images as one batch
    Batch {
        #[arg(short, long)]
        model: ModelType,
        /// Keep the affordable files instead of rejecting the whole selection
        #[arg(long)]
        clamp: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download batch results as CSV
    Export {
        #[arg(long)]
        batch_id: String,
        /// Output file (default: batch_<id>.csv)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&toml_config.logging.level)),
        )
        .init();

    info!(
        "Starting Averion screening client v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let api_url = resolve_api_url(args.api_url.as_deref(), &toml_config);
    let pricing = Arc::new(toml_config.pricing_table()?);
    let session = match args.token {
        Some(token) => SessionContext::with_token(token),
        None => SessionContext::new(),
    };
    let client = Arc::new(ScreeningClient::with_timeouts(
        api_url,
        session,
        ClientTimeouts::from(&toml_config.http),
    )?);
    let poller = JobPoller::new(client.clone(), PollerConfig::from(&toml_config.polling));

    match args.command {
        Command::Login { username, password } => {
            let user = client.login(&username, &password).await?;
            println!("Signed in as {} ({} credits, {})", user.username, user.credits, user.plan);
            if let Some(token) = client.session().bearer_token().await {
                println!("{}={}", TOKEN_ENV, token);
            }
        }

        Command::Tiers { credits } => print_tiers(&pricing, credits),

        Command::Predict { model, file } => {
            let upload = ImageUpload::from_path(&file).await?;
            upload.validate(model)?;

            let submit_client = client.clone();
            let handle = poller.submit_and_watch(async move {
                submit_client
                    .submit_prediction(&upload, model)
                    .await
                    .map(|submission| submission.handle)
            });

            let snapshot = follow(handle).await?;
            report(&snapshot)?;
        }

        Command::Batch {
            model,
            clamp,
            files,
        } => {
            let user = client.current_user().await?;
            let policy = if clamp {
                AffordabilityPolicy::ClampToAffordable
            } else {
                AffordabilityPolicy::RejectAll
            };
            let mut admission =
                BatchAdmission::new(user.credits, model, pricing.clone()).with_policy(policy);

            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                let upload = ImageUpload::from_path(path).await?;
                upload.validate(model)?;
                uploads.push(upload);
            }

            let outcome = admission.add_files(uploads)?;
            if outcome.is_partial() {
                warn!(
                    added = outcome.added,
                    dropped_for_capacity = outcome.dropped_for_capacity,
                    dropped_for_affordability = outcome.dropped_for_affordability,
                    "Only part of the selection was admitted"
                );
            }
            println!(
                "{} tier: {} of {} files selected, cost {} credits ({} remaining)",
                admission.tier_info().name,
                admission.len(),
                admission.max_files(),
                admission.cost(),
                admission.remaining_credits()
            );

            let (uploads, model) = admission.prepare_submission()?;
            let submission = client.submit_batch(&uploads, model).await?;
            let batch_id = submission.handle.job_id().to_string();
            let followed = follow(poller.watch(submission.handle)).await;
            client.forget_upload_results(&batch_id).await;
            let outcome = report(&followed?);

            // Server owns the balance; always re-read it after a job
            match client.current_user().await {
                Ok(user) => {
                    admission.set_credit_balance(user.credits);
                    println!("Credits remaining: {}", user.credits);
                }
                Err(e) => warn!(error = %e, "Could not refresh credit balance"),
            }
            outcome?;
        }

        Command::Export { batch_id, out } => {
            let csv = client.export_batch_csv(&batch_id).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("batch_{}.csv", batch_id)));
            tokio::fs::write(&out, &csv).await?;
            info!(path = %out.display(), size = csv.len(), "Wrote batch CSV");
            println!("Saved {}", out.display());
        }
    }

    Ok(())
}

/// Follow a polling session until it ends; Ctrl-C cancels it
async fn follow(mut handle: PollerHandle) -> Result<PollerSnapshot> {
    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(snapshot) if snapshot.is_terminal() => return Ok(snapshot),
                Some(snapshot) => {
                    if snapshot.phase == PollerPhase::Polling && snapshot.rounds > 0 {
                        info!(
                            attempt = snapshot.attempt_count,
                            max_attempts = snapshot.max_attempts,
                            "Analysis in progress"
                        );
                    }
                }
                None => return Ok(handle.snapshot()),
            },
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                bail!("Cancelled");
            }
        }
    }
}

fn report(snapshot: &PollerSnapshot) -> Result<()> {
    if let Some(failure) = &snapshot.failure {
        bail!("{} ({:?})", failure.message(), failure.remediation());
    }

    match &snapshot.result {
        Some(JobResult::Single(result)) => {
            println!("File:           {}", result.filename);
            println!("Model:          {}", result.model_type.display_name());
            println!("Prediction:     {}", result.prediction);
            println!(
                "Confidence:     {:.1}% ({:?})",
                result.confidence,
                result.confidence_band()
            );
            if let Some(recommendation) = &result.recommendation {
                println!("Recommendation: {}", recommendation);
            }
            println!("Credits used:   {}", result.credits_used);
        }
        Some(JobResult::Batch(batch)) => {
            let summary = &batch.summary;
            println!("Batch {}", batch.batch_id);
            println!(
                "  {} files, {} succeeded, {} failed",
                summary.total_files, summary.successful_predictions, summary.failed_predictions
            );
            println!("  Average confidence: {:.1}%", summary.average_confidence);
            println!("  Credits consumed:   {}", summary.credits_consumed);
            for file in &batch.results {
                match (&file.prediction, file.success) {
                    (Some(prediction), true) => println!(
                        "  [{}] {}: {} ({:.1}%)",
                        file.file_index,
                        file.filename,
                        prediction,
                        file.confidence.unwrap_or(0.0)
                    ),
                    _ => println!(
                        "  [{}] {}: failed: {}",
                        file.file_index,
                        file.filename,
                        file.error_message.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
        }
        None => return Err(anyhow!("Job ended without a result")),
    }

    Ok(())
}

fn print_tiers(pricing: &PricingTable, credits: u64) {
    let current = pricing.tier_for(credits);
    for tier in pricing.tiers() {
        let marker = if tier.name == current.name { "*" } else { " " };
        println!(
            "{} {:<14} from {:>5} credits: up to {:>2} files, {:>2} batches/day",
            marker, tier.name, tier.min_credits, tier.max_files, tier.max_batches_per_day
        );
    }
    for model in ModelType::ALL {
        println!(
            "{}: {} credits per file, {} files affordable with {} credits",
            model.display_name(),
            pricing.cost_per_file(model),
            pricing.max_affordable(model, credits),
            credits
        );
    }
}
