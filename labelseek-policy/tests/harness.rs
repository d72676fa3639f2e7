//! End-to-end runs of the episode harness with the no-backend network.
use anyhow::Result;
use labelseek_core::{
    checkpoint::{Checkpoint, TrainingSession},
    record::BufferedRecorder,
    ClassMarginSampler, ClassPool, EpisodeSource, EpisodeTrainer, KShotStats, MarginEpisodes,
    QAgent, RandomEpisodes, RewardModel, TrainMode, TrainerConfig, Validator,
};
use labelseek_policy::{RnnQNet, RnnQNetConfig, RnnQNetParams};
use ndarray::Array1;
use rand::{rngs::SmallRng, SeedableRng};
use tempdir::TempDir;

const CLASSES: usize = 3;
const SAMPLE_DIM: usize = 8;
const EPISODE_SIZE: usize = 9;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Ten synthetic classes with a distinctive bit pattern each.
fn pool() -> ClassPool {
    let mut pool = ClassPool::new(CLASSES, EPISODE_SIZE, SAMPLE_DIM);
    for c in 0..10 {
        let samples: Vec<Array1<f32>> = (0..EPISODE_SIZE)
            .map(|s| {
                Array1::from_shape_fn(SAMPLE_DIM, |i| {
                    if (c + s * i) % 3 == 0 {
                        1.0
                    } else {
                        0.0
                    }
                })
            })
            .collect();
        pool.push_class(samples).unwrap();
    }
    pool
}

fn agent(rng: &mut SmallRng) -> RnnQNet {
    RnnQNetConfig::new(CLASSES + SAMPLE_DIM, 24, CLASSES).build(rng)
}

#[test]
fn online_td_fit_trains_evaluates_and_checkpoints() -> Result<()> {
    init();
    let dir = TempDir::new("harness")?;
    let model_dir = dir.path().join("model");

    let config = TrainerConfig::default()
        .epochs(6)
        .batch_size(4)
        .eval_interval(3)
        .save_interval(3)
        .backup_interval(6)
        .model_dir(model_dir.to_str().unwrap());
    let trainer = EpisodeTrainer::build(config, RewardModel::new(CLASSES));

    let mut rng = SmallRng::seed_from_u64(41);
    let mut net = agent(&mut rng);
    let mut provider = RandomEpisodes(pool());
    let mut eval_source = pool();
    let mut session = TrainingSession::default();
    let mut recorder = BufferedRecorder::new();

    trainer.fit(
        &mut net,
        &mut provider,
        &mut eval_source,
        &mut session,
        &mut recorder,
        &mut rng,
    )?;

    assert_eq!(session.epoch, 6);
    assert_eq!(session.episode, 24);
    assert_eq!(session.history.loss.len(), 6);
    assert_eq!(session.history.test_reward.len(), 2);
    assert_eq!(recorder.len(), 6);
    for record in recorder.iter() {
        assert!(record.get_scalar("training_total_loss").is_ok());
        assert!(record.get_scalar("training_average_reward").is_ok());
    }
    assert!(model_dir.join("checkpoint").exists());
    assert!(model_dir.join("backup_6").exists());
    assert!(model_dir.join("best").exists());

    // Resume: the restored session continues where the run stopped.
    let restored: Checkpoint<RnnQNetParams> = Checkpoint::load(model_dir.join("checkpoint"))?;
    assert_eq!(restored.session.epoch, 6);
    let mut resumed = agent(&mut rng);
    resumed.set_params(restored.params)?;
    let mut session = restored.session;

    let config = TrainerConfig::default()
        .epochs(8)
        .batch_size(4)
        .eval_interval(4)
        .save_interval(8)
        .model_dir(model_dir.to_str().unwrap());
    let trainer = EpisodeTrainer::build(config, RewardModel::new(CLASSES));
    trainer.fit(
        &mut resumed,
        &mut provider,
        &mut eval_source,
        &mut session,
        &mut recorder,
        &mut rng,
    )?;
    assert_eq!(session.epoch, 8);
    assert_eq!(session.history.loss.len(), 8);
    Ok(())
}

#[test]
fn sequence_fit_runs_without_requests() -> Result<()> {
    init();
    let config = TrainerConfig::default()
        .mode(TrainMode::Sequence)
        .epochs(4)
        .batch_size(3)
        .eval_interval(2);
    let trainer = EpisodeTrainer::build(config, RewardModel::new(CLASSES));

    let mut rng = SmallRng::seed_from_u64(42);
    let mut net = agent(&mut rng);
    let mut provider = RandomEpisodes(pool());
    let mut eval_source = pool();
    let mut session = TrainingSession::default();
    let mut recorder = BufferedRecorder::new();

    trainer.fit(
        &mut net,
        &mut provider,
        &mut eval_source,
        &mut session,
        &mut recorder,
        &mut rng,
    )?;

    assert_eq!(session.epoch, 4);
    // Teacher-forced decisions are class argmax only.
    assert!(session.history.requests.iter().all(|r| *r == 0.0));
    Ok(())
}

#[test]
fn margin_provider_feeds_the_fit_loop_and_its_log() -> Result<()> {
    init();
    let config = TrainerConfig::default()
        .epochs(2)
        .batch_size(2)
        .eval_interval(2);
    let trainer = EpisodeTrainer::build(config, RewardModel::new(CLASSES));

    let mut rng = SmallRng::seed_from_u64(43);
    let mut net = agent(&mut rng);
    let sampler = ClassMarginSampler::new(CLASSES, 4).samples_per_class(3);
    let mut provider = MarginEpisodes::new(pool(), sampler, 6);
    let mut eval_source = pool();
    let mut session = TrainingSession::default();
    let mut recorder = BufferedRecorder::new();

    trainer.fit(
        &mut net,
        &mut provider,
        &mut eval_source,
        &mut session,
        &mut recorder,
        &mut rng,
    )?;

    assert_eq!(session.epoch, 2);
    // One margin pass per epoch, mirrored into the session for checkpoints.
    assert_eq!(session.margin_log.all_margins.len(), 2);
    assert_eq!(session.margin_log.low_margins.len(), 2);
    assert_eq!(session.margin_log.all_choices.len(), 2);
    assert!(session
        .margin_log
        .all_margins
        .iter()
        .zip(session.margin_log.low_margins.iter())
        .all(|(hi, lo)| hi >= lo));
    Ok(())
}

#[test]
fn validation_counts_every_decision_and_stays_deterministic() -> Result<()> {
    init();
    let mut rng = SmallRng::seed_from_u64(44);
    let net = agent(&mut rng);
    let validator = Validator::new(CLASSES);
    let batch = pool().next_batch(5, &mut rng)?;

    let mut stats = KShotStats::default();
    let first = validator.validate(&net, &batch, &mut stats)?;
    assert_eq!(first.predict, (EPISODE_SIZE * 5) as f32);
    assert!(first.correct + first.requests <= first.predict);

    let mut stats_again = KShotStats::default();
    let second = validator.validate(&net, &batch, &mut stats_again)?;
    assert_eq!(first, second);
    assert_eq!(stats, stats_again);
    Ok(())
}
