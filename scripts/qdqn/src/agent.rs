use std::{cell::RefCell, rc::Rc};

use anyhow::ensure;
use qtape::{
    function::{mse_loss, Activation, Linear},
    optim::{backward_and_update, Adam},
    reset_global_tape, with_tape, Place, Tape, Tensor, Variable, VariableHandle,
};
use rand::Rng;

use crate::{config::DqnConfig, replay::Transition};

// -----------------------------------------------------------------------------
// Dqn
// -----------------------------------------------------------------------------
/// Q-network `linear(tanh(linear(state)))` trained on Bellman targets.
#[derive(Debug)]
pub struct Dqn {
    hidden: Linear,
    output: Linear,
    adam: Adam,
    observation_size: usize,
    action_count: usize,
    gamma: f64,
}

//
// ctor
//
impl Dqn {
    pub fn new(observation_size: usize, action_count: usize, config: &DqnConfig) -> Self {
        Self {
            hidden: Linear::new(
                observation_size,
                config.hidden_size,
                Some(Activation::Tanh),
                config.seed,
            ),
            output: Linear::new(
                config.hidden_size,
                action_count,
                None,
                config.seed.wrapping_add(1),
            ),
            adam: Adam::new(config.learning_rate),
            observation_size,
            action_count,
            gamma: config.gamma,
        }
    }
}

//
// methods
//
impl Dqn {
    #[inline]
    pub fn params(&self) -> Vec<VariableHandle> {
        let mut params = self.hidden.params();
        params.extend(self.output.params());
        params
    }

    /// Action values of each state, `[states.len(), action_count]` flattened row-major.
    ///
    /// Evaluated on a scratch tape so that the current tape is left untouched.
    pub fn q_values<'a>(
        &self,
        states: impl ExactSizeIterator<Item = &'a [f64]>,
    ) -> anyhow::Result<Vec<f64>> {
        let input = self._input("infer_state", states)?;
        let scratch = Rc::new(RefCell::new(Tape::new(Place::Cpu)));
        with_tape(scratch, || -> anyhow::Result<Vec<f64>> {
            let q = self._forward(&input)?;
            let values = q.value()?.data().to_vec();
            Ok(values)
        })
    }

    /// Epsilon-greedy action for `state`.
    pub fn act<R: Rng>(&self, state: &[f64], epsilon: f64, rng: &mut R) -> anyhow::Result<usize> {
        if rng.random::<f64>() < epsilon {
            return Ok(rng.random_range(0..self.action_count));
        }
        let q = self.q_values(std::iter::once(state))?;
        Ok(_argmax(&q))
    }

    /// One Adam step towards the Bellman targets of `batch`, returning the loss before the step.
    ///
    /// Each call records on a fresh global tape.
    pub fn train_step(&mut self, batch: &[&Transition]) -> anyhow::Result<f64> {
        ensure!(!batch.is_empty(), "Empty batch");
        reset_global_tape(Place::Cpu);

        let input = self._input("state", batch.iter().map(|t| t.state.as_slice()))?;
        let q = self._forward(&input)?;
        let next_q = self.q_values(batch.iter().map(|t| t.next_state.as_slice()))?;

        let target = self._bellman_targets(q.value()?.clone(), &next_q, batch)?;
        let target = Variable::from_tensor("target", target);

        let loss = mse_loss(&q, &target)?;
        let loss_value = loss.value()?.data()[0];
        let params = self.params();
        backward_and_update(&loss, &mut self.adam, &params)?;
        log::trace!("Train step loss {}", loss_value);
        Ok(loss_value)
    }
}

// impls
impl Dqn {
    /// Replace the values of the taken actions in `q` by their Bellman targets.
    fn _bellman_targets(
        &self,
        mut q: Tensor,
        next_q: &[f64],
        batch: &[&Transition],
    ) -> anyhow::Result<Tensor> {
        for (i, item) in batch.iter().enumerate() {
            ensure!(item.action < self.action_count, "Invalid action: {}", item.action);
            let row = i * self.action_count;
            let value = if item.done {
                item.reward
            } else {
                let row_q = &next_q[row..row + self.action_count];
                item.reward + self.gamma * row_q.iter().copied().fold(f64::MIN, f64::max)
            };
            q.data_mut()[row + item.action] = value;
        }
        Ok(q)
    }

    fn _forward(&self, input: &VariableHandle) -> qtape::Result<VariableHandle> {
        self.output.forward(&self.hidden.forward(input)?)
    }

    fn _input<'a>(
        &self,
        prefix: &str,
        states: impl ExactSizeIterator<Item = &'a [f64]>,
    ) -> anyhow::Result<VariableHandle> {
        let rows = states.len();
        let mut data = Vec::with_capacity(rows * self.observation_size);
        for state in states {
            ensure!(
                state.len() == self.observation_size,
                "Observation of size {} is expected but got {}",
                self.observation_size,
                state.len()
            );
            data.extend_from_slice(state);
        }
        let tensor = Tensor::new(vec![rows, self.observation_size], data)?;
        Ok(Variable::from_tensor(prefix, tensor))
    }
}

#[inline]
fn _argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |(i_max, v_max), (i, v)| {
            if v_max < *v {
                (i, *v)
            } else {
                (i_max, v_max)
            }
        })
        .0
}
