use anyhow::ensure;
use rand::{rngs::StdRng, Rng, SeedableRng};

// -----------------------------------------------------------------------------
// Step
// -----------------------------------------------------------------------------
/// Outcome of one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
}

// -----------------------------------------------------------------------------
// Environment
// -----------------------------------------------------------------------------
/// Episodic environment with a discrete action space.
pub trait Environment {
    fn observation_size(&self) -> usize;

    fn action_count(&self) -> usize;

    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Vec<f64>;

    fn step(&mut self, action: usize) -> anyhow::Result<Step>;
}

// -----------------------------------------------------------------------------
// CartPole
// -----------------------------------------------------------------------------
const GRAVITY: f64 = 9.8;
const CART_MASS: f64 = 1.0;
const POLE_MASS: f64 = 0.1;
const POLE_HALF_LENGTH: f64 = 0.5;
const FORCE: f64 = 10.0;
const TAU: f64 = 0.02;
const X_THRESHOLD: f64 = 2.4;
const THETA_THRESHOLD: f64 = 12.0 * 2.0 * std::f64::consts::PI / 360.0;

/// Pole balanced on a cart which is pushed left (`0`) or right (`1`).
///
/// The observation is `[x, x_dot, theta, theta_dot]` and every step earns a reward of 1.
/// An episode ends when the pole tilts over 12 degrees or the cart leaves the track.
#[derive(Debug, Clone)]
pub struct CartPole {
    state: [f64; 4],
    done: bool,
    rng: StdRng,
}

impl CartPole {
    pub fn new(seed: u64) -> Self {
        let mut env = Self {
            state: [0.0; 4],
            done: false,
            rng: StdRng::seed_from_u64(seed),
        };
        env.reset();
        env
    }
}

impl Environment for CartPole {
    #[inline]
    fn observation_size(&self) -> usize {
        4
    }

    #[inline]
    fn action_count(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Vec<f64> {
        for s in self.state.iter_mut() {
            *s = self.rng.random_range(-0.05..0.05);
        }
        self.done = false;
        self.state.to_vec()
    }

    fn step(&mut self, action: usize) -> anyhow::Result<Step> {
        ensure!(action < self.action_count(), "Invalid action: {}", action);
        ensure!(!self.done, "Episode is already done. Call reset first");

        let [x, x_dot, theta, theta_dot] = self.state;
        let force = if action == 1 { FORCE } else { -FORCE };
        let (sin, cos) = theta.sin_cos();
        let total_mass = CART_MASS + POLE_MASS;
        let pole_moment = POLE_MASS * POLE_HALF_LENGTH;

        let temp = (force + pole_moment * theta_dot * theta_dot * sin) / total_mass;
        let theta_acc = (GRAVITY * sin - cos * temp)
            / (POLE_HALF_LENGTH * (4.0 / 3.0 - POLE_MASS * cos * cos / total_mass));
        let x_acc = temp - pole_moment * theta_acc * cos / total_mass;

        self.state = [
            x + TAU * x_dot,
            x_dot + TAU * x_acc,
            theta + TAU * theta_dot,
            theta_dot + TAU * theta_acc,
        ];
        self.done = self.state[0].abs() > X_THRESHOLD || self.state[2].abs() > THETA_THRESHOLD;

        Ok(Step {
            observation: self.state.to_vec(),
            reward: 1.0,
            done: self.done,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_reset_seeded() {
        let mut e1 = CartPole::new(3);
        let mut e2 = CartPole::new(3);

        let o1 = e1.reset();
        let o2 = e2.reset();

        assert_eq!(o1, o2);
        assert_eq!(o1.len(), e1.observation_size());
        assert!(o1.iter().all(|v| v.abs() <= 0.05));
    }

    #[test]
    fn test_push_right() {
        let mut env = CartPole::new(0);
        let before = env.reset();

        let step = env.step(1).unwrap();

        assert_abs_diff_eq!(step.observation[0], before[0] + TAU * before[1], epsilon = 1e-12);
        assert!(step.observation[1] > before[1]);
        assert_eq!(step.reward, 1.0);
    }

    #[test]
    fn test_episode_ends() {
        let mut env = CartPole::new(0);
        env.reset();

        let mut steps = 0;
        while !env.step(1).unwrap().done {
            steps += 1;
            assert!(steps < 500);
        }

        assert!(env.step(0).is_err());
        env.reset();
        assert!(env.step(0).is_ok());
    }

    #[test]
    fn test_invalid_action() {
        let mut env = CartPole::new(0);

        assert!(env.step(2).is_err());
    }
}
