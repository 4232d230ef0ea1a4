use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use airl_route::eval::{Evaluator, EvaluatorConfig, evaluate_log_prob};
use airl_route::infra::Transition;
use airl_route::model::{
    AirlConfig, CnnConfig, DiscriminatorAirlCnn, DiscriminatorCnn, FeatureStore, PolicyCnn, TransitionBatch, to_host,
};
use airl_route::synthetic::SyntheticNetwork;
use burn::prelude::*;
use dotenv::dotenv;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[cfg(feature = "metal")]
type AppBackend = burn::backend::Metal;
#[cfg(not(feature = "metal"))]
type AppBackend = burn::backend::NdArray;

fn get_env_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.parse::<T>().ok())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("airl_route=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let grid_size = get_env_var::<usize>("AIRL_GRID_SIZE").unwrap_or(6);
    let seed = get_env_var::<u64>("AIRL_SEED").unwrap_or(42);
    let time_steps = get_env_var::<u32>("AIRL_TIME_STEPS").unwrap_or(4);
    let n_queries = get_env_var::<usize>("AIRL_QUERIES").unwrap_or(20);
    let output_dir = env::var("AIRL_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));

    tracing::info!(
        "Grid {}x{}, {} time steps, {} queries, seed {}",
        grid_size,
        grid_size,
        time_steps,
        n_queries,
        seed
    );

    let device = Default::default();
    AppBackend::seed(seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let network = SyntheticNetwork::generate(grid_size, time_steps, &mut rng)?;
    let store = FeatureStore::<AppBackend>::new(network.tables().clone(), network.speed().clone(), &device)?;
    let dims = store.dims();

    let policy = PolicyCnn::<AppBackend>::new(&device, &dims, &CnnConfig::default());
    let gan = DiscriminatorCnn::<AppBackend>::new(&device, &dims, &CnnConfig::default());
    let airl = DiscriminatorAirlCnn::<AppBackend>::new(&device, &dims, &AirlConfig::default());

    let experts = network.sample_experts(n_queries, &mut rng);
    let evaluator = Evaluator::new(EvaluatorConfig {
        output_dir,
        ..EvaluatorConfig::default()
    });
    let report = evaluator.evaluate_expert(&policy.bind(&store), network.graph(), &experts)?;
    tracing::info!(
        "Untrained policy: edit={:.4}, bleu={:.4}, js={:.4}",
        report.edit_distance,
        report.bleu,
        report.js_distance
    );

    let episodes: Vec<Vec<Transition>> = experts.iter().map(|expert| network.transitions(expert)).collect();
    evaluate_log_prob(&policy.bind(&store), &episodes)?;

    let Some(episode) = episodes.iter().find(|episode| !episode.is_empty()) else {
        tracing::warn!("No expert transitions to score");
        return Ok(());
    };
    let destination = episode[episode.len() - 1].next_state;
    let batch = TransitionBatch::from_transitions(episode, destination)?;

    let gan_reward = gan.calculate_reward(&store, batch.states(), batch.actions())?;
    let log_pis = policy.log_prob(&store, batch.states(), batch.actions())?;
    let airl_reward = airl.calculate_reward(&store, &batch, log_pis)?;

    tracing::info!(
        "Expert episode of {} steps: mean GAN reward {:.4}, mean AIRL reward {:.4}",
        batch.len(),
        mean(&to_host(gan_reward)?),
        mean(&to_host(airl_reward)?)
    );

    Ok(())
}
