use std::path::PathBuf;

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    agent::Dqn,
    config::DqnConfig,
    env::{CartPole, Environment},
    replay::{ReplayBuffer, Transition},
};

use super::Cmd;

// -----------------------------------------------------------------------------
// Args
// -----------------------------------------------------------------------------
#[derive(Debug, clap::Args)]
pub struct Args {
    /// YAML or JSON file of hyperparameters
    #[clap(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Number of episodes, overriding the config file
    #[clap(short = 'e', long = "episodes")]
    pub episodes: Option<usize>,

    /// Random seed, overriding the config file
    #[clap(short = 's', long = "seed")]
    pub seed: Option<u64>,
}

impl Args {
    fn config(&self) -> anyhow::Result<DqnConfig> {
        let mut config = match &self.config {
            Some(path) => DqnConfig::load(path)?,
            None => DqnConfig::default(),
        };
        if let Some(episodes) = self.episodes {
            config.episodes = episodes;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

impl Cmd for Args {
    fn run(&self) -> anyhow::Result<()> {
        let config = self.config()?;
        log::info!("{:?}", config);

        let mut env = CartPole::new(config.seed);
        let rewards = train(&config, &mut env)?;
        for (e, reward) in rewards.iter().enumerate() {
            println!("episode {}: reward {:.2}", e, reward);
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// train
// -----------------------------------------------------------------------------
/// Run `config.episodes` episodes on `env` and return the total reward of each.
///
/// The agent is trained once per step as soon as the replay buffer holds a full batch.
pub fn train<E: Environment>(config: &DqnConfig, env: &mut E) -> anyhow::Result<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut agent = Dqn::new(env.observation_size(), env.action_count(), config);
    let mut buffer = ReplayBuffer::new(config.buffer_size);

    let mut rewards = Vec::with_capacity(config.episodes);
    for e in 0..config.episodes {
        let mut state = env.reset();
        let mut total_reward = 0.0;
        let mut steps = 0;
        loop {
            let action = agent.act(&state, config.epsilon, &mut rng)?;
            let step = env.step(action)?;
            total_reward += step.reward;
            steps += 1;

            buffer.add(Transition {
                state,
                action,
                reward: step.reward,
                next_state: step.observation.clone(),
                done: step.done,
            });
            if config.batch_size <= buffer.len() {
                let batch = buffer.sample(&mut rng, config.batch_size);
                let loss = agent.train_step(&batch)?;
                log::debug!("episode {} step {}: loss {:.6}", e, steps, loss);
            }

            state = step.observation;
            if step.done || config.max_steps <= steps {
                break;
            }
        }
        log::info!(
            "episode {} finished in {} steps with reward {:.2}",
            e,
            steps,
            total_reward
        );
        rewards.push(total_reward);
    }
    Ok(rewards)
}

#[cfg(test)]
mod tests {
    use crate::env::Step;

    use super::*;

    /// One-dimensional walk which ends after `len` steps.
    struct Corridor {
        len: usize,
        pos: usize,
    }

    impl Environment for Corridor {
        fn observation_size(&self) -> usize {
            1
        }

        fn action_count(&self) -> usize {
            2
        }

        fn reset(&mut self) -> Vec<f64> {
            self.pos = 0;
            vec![0.0]
        }

        fn step(&mut self, action: usize) -> anyhow::Result<Step> {
            anyhow::ensure!(action < 2, "Invalid action: {}", action);
            self.pos += 1;
            Ok(Step {
                observation: vec![self.pos as f64 / self.len as f64],
                reward: action as f64,
                done: self.len <= self.pos,
            })
        }
    }

    #[test]
    fn test_train_episodes() {
        let config = DqnConfig {
            episodes: 4,
            batch_size: 4,
            buffer_size: 8,
            ..Default::default()
        };
        let mut env = Corridor { len: 5, pos: 0 };

        let rewards = train(&config, &mut env).unwrap();

        assert_eq!(rewards.len(), 4);
        assert!(rewards.iter().all(|r| (0.0..=5.0).contains(r)));
    }

    #[test]
    fn test_train_max_steps() {
        let config = DqnConfig {
            episodes: 1,
            max_steps: 3,
            epsilon: 1.0,
            ..Default::default()
        };
        let mut env = CartPole::new(0);

        let rewards = train(&config, &mut env).unwrap();

        assert!(rewards[0] <= 3.0);
    }

    #[test]
    fn test_args_override() {
        let args = Args {
            config: None,
            episodes: Some(7),
            seed: Some(11),
        };

        let config = args.config().unwrap();

        assert_eq!(config.episodes, 7);
        assert_eq!(config.seed, 11);
        assert_eq!(config.hidden_size, DqnConfig::default().hidden_size);
    }
}
