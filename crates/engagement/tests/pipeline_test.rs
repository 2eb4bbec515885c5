//! End-to-end tests: train from a CSV export, then score pending batches

use std::fs;
use std::path::Path;

use anyhow::Result;
use outreach_engagement::{
    train_ensemble_from_csv, PipelineConfig, PipelineError, ScoringConfig, TrainedPipeline,
};
use tempfile::TempDir;

const ACTIONS: [&str; 3] = ["follow", "like", "comment"];
const SOURCES: [&str; 5] = ["tag", "user", "location", "explore", "liker"];

/// 100 rows, 40% engaged, engaged accounts have more followers
fn write_training_csv(path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["id", "insert_date", "liked", "engaged", "action_type", "source", "json"])?;

    for i in 0..100usize {
        let engaged = (i * 7) % 10 < 4;
        let followers = if engaged { 500 + i } else { 100 + i };
        let zip = if i % 4 == 0 { "10001" } else { "" };
        let json = format!(
            r#"{{"pk": {}, "follower_count": {}, "is_private": {}, "zip": "{}"}}"#,
            1000 + i,
            followers,
            i % 2 == 0,
            zip
        );
        writer.write_record([
            i.to_string(),
            format!("2019-11-0{} 10:{:02}:00", 1 + i % 3, i % 60),
            (i % 2 == 0).to_string(),
            engaged.to_string(),
            ACTIONS[i % 3].to_string(),
            SOURCES[i % 5].to_string(),
            json,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Pending batch: no label, no zip, no action_type
fn write_batch(path: &Path, first_pk: usize, rows: usize, with_followers: bool) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["our_pk", "source", "json"])?;
    for i in 0..rows {
        let json = if with_followers {
            format!(
                r#"{{"pk": {}, "follower_count": {}, "is_private": false}}"#,
                first_pk + i,
                100 + 200 * i
            )
        } else {
            format!(r#"{{"pk": {}, "is_private": false}}"#, first_pk + i)
        };
        writer.write_record([(i + 1).to_string(), SOURCES[i % 5].to_string(), json])?;
    }
    writer.flush()?;
    Ok(())
}

fn config(watch_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.booster.max_rounds = 60;
    config.booster.early_stopping_rounds = 5;
    config.booster.max_depth = 3;
    config.booster.min_samples_leaf = 5;
    config.scoring.watch_dir = watch_dir.to_path_buf();
    config
}

fn train(dir: &TempDir) -> Result<(PipelineConfig, TrainedPipeline)> {
    let input = dir.path().join("instagram4k.csv");
    write_training_csv(&input)?;

    let watch_dir = dir.path().join("resources");
    fs::create_dir_all(&watch_dir)?;
    let config = config(&watch_dir);
    let pipeline = train_ensemble_from_csv(&config, &input)?;
    Ok((config, pipeline))
}

fn scoring(config: &PipelineConfig) -> ScoringConfig {
    config.scoring.clone()
}

#[test]
fn test_trains_five_fold_ensemble() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, pipeline) = train(&dir)?;
    let report = &pipeline.report;

    assert_eq!(report.ensemble.len(), 5);
    assert_eq!(report.oof_predictions.len(), 100);
    assert!(report.oof_predictions.iter().all(|p| !p.is_nan()));

    let auc = report.overall_auc.expect("both classes present");
    assert!((0.0..=1.0).contains(&auc));
    assert!(auc > 0.9, "follower count separates classes, got {}", auc);

    assert_eq!(report.class_balance.positives, 40);
    assert_eq!(report.class_balance.scale_pos_weight, Some(1.5));

    assert_eq!(pipeline.encoders.get("action_type").map(|e| e.len()), Some(3));
    assert_eq!(pipeline.encoders.get("source").map(|e| e.len()), Some(5));
    assert_eq!(
        pipeline.training.valid_features,
        vec!["action_type", "source", "follower_count", "is_private", "has_zip"]
    );
    Ok(())
}

#[test]
fn test_scores_pending_batches_once() -> Result<()> {
    let dir = TempDir::new()?;
    let (config, pipeline) = train(&dir)?;
    let watch = config.scoring.watch_dir.clone();

    write_batch(&watch.join("users_to_score_a.csv"), 5000, 3, true)?;
    write_batch(&watch.join("users_to_score_b.csv"), 6000, 4, true)?;
    fs::write(watch.join("notes.txt"), "not a batch")?;

    let scorer = pipeline.scorer(scoring(&config));
    let summary = scorer.score_pending()?;
    assert_eq!(summary.scored.len(), 2);
    assert!(summary.failed.is_empty());

    let result = fs::read_to_string(watch.join("user_scores_a.csv"))?;
    let lines: Vec<&str> = result.lines().collect();
    assert_eq!(lines[0], "our_pk,user_pk,score");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("1,5000,"));
    for line in &lines[1..] {
        let score: f64 = line.rsplit(',').next().unwrap_or("").parse()?;
        assert!((0.0..=1.0).contains(&score));
    }

    assert!(!watch.join("users_to_score_a.csv").exists());
    assert!(watch.join("processed").join("users_to_score_a.csv").exists());
    assert!(watch.join("processed").join("users_to_score_b.csv").exists());
    assert!(watch.join("notes.txt").exists());

    // a second run finds nothing and leaves results untouched
    let again = scorer.score_pending()?;
    assert!(again.scored.is_empty());
    assert!(again.failed.is_empty());
    assert_eq!(fs::read_to_string(watch.join("user_scores_a.csv"))?, result);
    // the lock is released but its file is kept for the next scorer
    assert!(watch.join(".outreach.lock").exists());
    assert!(outreach_engagement::DirLock::acquire(&watch).is_ok());
    Ok(())
}

#[test]
fn test_failed_batch_stays_pending() -> Result<()> {
    let dir = TempDir::new()?;
    let (config, pipeline) = train(&dir)?;
    let watch = config.scoring.watch_dir.clone();

    write_batch(&watch.join("users_to_score_good.csv"), 7000, 2, true)?;
    write_batch(&watch.join("users_to_score_narrow.csv"), 8000, 2, false)?;

    let scorer = pipeline.scorer(scoring(&config));
    let summary = scorer.score_pending()?;
    assert_eq!(summary.scored, vec![watch.join("users_to_score_good.csv")]);
    assert_eq!(summary.failed, vec![watch.join("users_to_score_narrow.csv")]);

    assert!(watch.join("users_to_score_narrow.csv").exists());
    assert!(!watch.join("user_scores_narrow.csv").exists());
    assert!(!watch.join("processed").join("users_to_score_narrow.csv").exists());
    assert!(watch.join("user_scores_good.csv").exists());

    let mut job = scorer
        .discover()?
        .into_iter()
        .next()
        .expect("narrow batch still pending");
    let err = scorer.score_batch(&mut job).unwrap_err();
    assert!(matches!(err, PipelineError::FeatureMismatch { ref missing } if missing == &["follower_count"]));
    Ok(())
}

#[test]
fn test_busy_directory_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let (config, pipeline) = train(&dir)?;

    let _held = outreach_engagement::DirLock::acquire(&config.scoring.watch_dir)?;
    let err = pipeline
        .scorer(scoring(&config))
        .score_pending()
        .unwrap_err();
    assert!(matches!(err, PipelineError::ScorerBusy { .. }));
    Ok(())
}

#[test]
fn test_missing_training_file_is_load_error() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let err = train_ensemble_from_csv(&config, &dir.path().join("absent.csv")).unwrap_err();
    assert!(matches!(err, PipelineError::Load { .. }));
}
