//! ResponseForge: campaign response prediction with a cross-validated K-NN model
//!
//! This is the main entrypoint that orchestrates data loading, neighbor-count
//! search, model fitting, validation metrics and prediction.

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use responseforge::report::{breakdown_table, grid_score_table, response_breakdown, search_summary};
use responseforge::{read_csv, write_csv, Args, CampaignSession, SessionConfig};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.session_config()?;

    if args.verbose {
        println!("ResponseForge - Campaign Response Prediction using K-NN");
        println!("=======================================================\n");
    }

    run_pipeline(&args, config)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}

/// Run feed, search (unless k is fixed), fit, metrics and optional prediction
fn run_pipeline(args: &Args, config: SessionConfig) -> Result<()> {
    let start_time = Instant::now();
    let manual_k = config.neighbors;
    let metric = config.search.metric;
    let mut session = CampaignSession::new(config)?;

    // Step 1: Load and feed training data
    let train_df = read_csv(&args.train).with_context(|| format!("Failed to read {}", args.train))?;
    session.feed_data(&train_df)?;
    println!("✓ Training data loaded: {} rows", train_df.height());

    // Step 2: Search for k unless it was supplied
    match manual_k {
        Some(k) => println!("Using manually supplied k = {}", k),
        None => {
            println!("\nSearching for the best number of neighbors (this may take a while)...");
            let search_start = Instant::now();
            let best_k = session.search_configured()?;
            println!("✓ Search complete in {:.2}s", search_start.elapsed().as_secs_f64());

            if let Some(outcome) = session.search_outcome() {
                println!("\n=== Search Results (cv {}) ===", metric);
                print!("{}", search_summary(outcome));
                if args.verbose {
                    println!();
                    print!("{}", grid_score_table(&outcome.grid));
                }
            }
            println!("\nUsing k = {} as it is the most common among the different folds", best_k);
        }
    }

    // Step 3: Train final model on all fed data
    let k = session.fit(None)?;
    println!("✓ Final model trained with k = {}", k);

    // Step 4: Validation metrics
    let metrics = session.generate_metrics()?;
    println!("\n=== Validation ===");
    println!("• Test set size: {}%", session.config().test_size * 100.0);
    println!("• Random state: {}", session.config().seed);
    print!("{}", metrics);

    if let Some(path) = &args.metrics_json {
        let json = serde_json::to_string_pretty(&metrics)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
        println!("Metrics saved to: {}", path);
    }

    // Step 5: Predict new campaign data
    if let Some(predict_path) = &args.predict {
        let new_df = read_csv(predict_path).with_context(|| format!("Failed to read {}", predict_path))?;
        let mut predictions = session.predict(&new_df)?;
        write_csv(&mut predictions, &args.output)
            .with_context(|| format!("Failed to write {}", args.output))?;

        println!("\n✓ Predicted responses for {} customers", predictions.height());
        println!("Predictions saved to: {}", args.output);

        match response_breakdown(&predictions, &args.breakdown) {
            Ok(counts) => print!("{}", breakdown_table(&args.breakdown, &counts)),
            Err(err) => log::warn!("No breakdown by {}: {}", args.breakdown, err),
        }
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}
