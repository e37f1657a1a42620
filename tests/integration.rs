//! Integration tests for ResponseForge

use std::io::Write;

use responseforge::{
    read_csv, write_csv, CampaignSession, ForgeError, OptimizeMetric, Response, SessionConfig, Stage,
    RESPONSE_COLUMN,
};
use tempfile::NamedTempFile;

const HEADER: &str =
    "Customer,Age,Gender,Region,Email,Mobile-Usage,Logins-4wk,Logins-6mo,Purchases-4wk,Purchases-6mo,Total-Purchases";

/// One customer row; responders log in and buy more often
fn customer_row(i: usize, region: &str) -> String {
    let yes = i % 2 == 0;
    let jitter = i % 5;
    let gender = if (i / 2) % 2 == 0 { "Male" } else { "Female" };
    let email = if yes || i % 7 == 0 { "Yes" } else { "No" };
    let usage = ["Low", "Medium", "High"][(i + usize::from(yes)) % 3];
    let (l4, l6, p4, p6, total) = if yes {
        (8 + jitter, 40 + 2 * jitter, 4 + jitter % 3, 15 + jitter, 120.0 + 10.0 * jitter as f64)
    } else {
        (1 + jitter % 3, 6 + jitter, jitter % 2, 2 + jitter % 3, 20.0 + 3.0 * jitter as f64)
    };
    format!(
        "C{:04},{},{},{},{},{},{},{},{},{},{:.1}",
        i,
        22 + (i * 7) % 45,
        gender,
        region,
        email,
        usage,
        l4,
        l6,
        p4,
        p6,
        total
    )
}

/// Create a past-campaign CSV with `n` balanced rows
fn create_training_csv(n: usize) -> NamedTempFile {
    let regions = ["North", "South", "East", "West"];
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{},Response", HEADER).unwrap();
    for i in 0..n {
        let response = if i % 2 == 0 { "Yes" } else { "No" };
        writeln!(file, "{},{}", customer_row(i, regions[(i / 3) % 4]), response).unwrap();
    }
    file.flush().unwrap();
    file
}

/// Create a new-campaign CSV without a Response column
fn create_new_campaign_csv(n: usize, region: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();
    for i in 0..n {
        writeln!(file, "{}", customer_row(i + 1000, region)).unwrap();
    }
    file.flush().unwrap();
    file
}

fn fed_session(n: usize) -> CampaignSession {
    let train = read_csv(create_training_csv(n).path()).unwrap();
    let mut session = CampaignSession::new(SessionConfig::default()).unwrap();
    session.feed_data(&train).unwrap();
    session
}

fn predicted_labels(df: &polars::prelude::DataFrame) -> Vec<String> {
    df.column(RESPONSE_COLUMN)
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap().to_string())
        .collect()
}

#[test]
fn test_full_pipeline() {
    let mut session = fed_session(100);

    let best_k = session
        .search_best_k(2..6, 2..4, OptimizeMetric::Precision)
        .unwrap();
    assert!((2..6).contains(&best_k));

    let outcome = session.search_outcome().unwrap();
    assert_eq!(outcome.trials.len(), 2);
    assert_eq!(outcome.grid.len(), 2 * 4);

    assert_eq!(session.fit(None).unwrap(), best_k);
    assert_eq!(session.stage(), Stage::Fitted);

    let new = read_csv(create_new_campaign_csv(12, "East").path()).unwrap();
    let predictions = session.predict(&new).unwrap();
    assert_eq!(predictions.height(), 12);
    assert!(predictions.column("Customer").is_ok());

    let labels = predicted_labels(&predictions);
    assert!(labels.iter().all(|l| l == "yes" || l == "no"));
    // Well separated classes: every even row is a responder
    assert_eq!(labels[0], "yes");
    assert_eq!(labels[1], "no");
}

#[test]
fn test_metrics_on_holdout() {
    let mut session = fed_session(100);
    session.fit(Some(3)).unwrap();

    let metrics = session.generate_metrics().unwrap();
    assert_eq!(metrics.confusion_matrix.total(), 20);
    assert!((0.0..=1.0).contains(&metrics.accuracy));
    assert!((0.0..=1.0).contains(&metrics.macro_precision));
    assert!(metrics.accuracy > 0.8);

    let map = metrics.to_map();
    assert_eq!(map.len(), 6);
    assert_eq!(map["yes_accuracy"], metrics.class(Response::Yes).accuracy);

    let json = serde_json::to_string(&metrics).unwrap();
    assert!(json.contains("macro_precision"));
}

#[test]
fn test_unseen_category_at_predict() {
    let mut session = fed_session(60);
    session.fit(Some(3)).unwrap();

    let new = read_csv(create_new_campaign_csv(4, "Central").path()).unwrap();
    let predictions = session.predict(&new).unwrap();
    assert_eq!(predictions.height(), 4);
}

#[test]
fn test_predict_before_fit() {
    let session = fed_session(40);
    let new = read_csv(create_new_campaign_csv(3, "North").path()).unwrap();
    assert!(matches!(session.predict(&new), Err(ForgeError::NotFitted)));
}

#[test]
fn test_refeed_discards_model() {
    let mut session = fed_session(40);
    session.fit(Some(3)).unwrap();

    let train = read_csv(create_training_csv(30).path()).unwrap();
    session.feed_data(&train).unwrap();
    assert_eq!(session.stage(), Stage::Fed);

    let new = read_csv(create_new_campaign_csv(3, "North").path()).unwrap();
    assert!(matches!(session.predict(&new), Err(ForgeError::NotFitted)));
}

#[test]
fn test_infeasible_search_is_insufficient_data() {
    let mut session = fed_session(10);
    let err = session
        .search_best_k(1..3, 9..11, OptimizeMetric::Accuracy)
        .unwrap_err();
    assert!(matches!(err, ForgeError::InsufficientData { .. }));
}

#[test]
fn test_predictions_round_trip_through_csv() {
    let mut session = fed_session(60);
    session.fit(Some(5)).unwrap();

    let new = read_csv(create_new_campaign_csv(8, "West").path()).unwrap();
    let mut predictions = session.predict(&new).unwrap();

    let out = NamedTempFile::new().unwrap();
    write_csv(&mut predictions, out.path()).unwrap();

    let reloaded = read_csv(out.path()).unwrap();
    assert_eq!(reloaded.height(), 8);
    assert_eq!(predicted_labels(&reloaded), predicted_labels(&predictions));
}

#[test]
fn test_manual_k_skips_search() {
    let config = SessionConfig {
        neighbors: Some(4),
        ..SessionConfig::default()
    };
    let train = read_csv(create_training_csv(50).path()).unwrap();
    let mut session = CampaignSession::new(config).unwrap();
    session.feed_data(&train).unwrap();

    assert_eq!(session.fit(None).unwrap(), 4);
    assert!(session.search_outcome().is_none());
}
