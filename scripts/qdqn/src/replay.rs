use rand::Rng;

// -----------------------------------------------------------------------------
// Transition
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub done: bool,
}

// -----------------------------------------------------------------------------
// ReplayBuffer
// -----------------------------------------------------------------------------
/// Fixed-capacity ring of the latest transitions.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    ring: Vec<Transition>,
    capacity: usize,
    start: usize,
}

impl ReplayBuffer {
    /// Buffer holding at most `capacity` transitions. A zero `capacity` is raised to one.
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Vec::with_capacity(capacity),
            capacity,
            start: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Add `item`, evicting the oldest one when full.
    pub fn add(&mut self, item: Transition) {
        if self.ring.len() < self.capacity {
            self.ring.push(item);
        } else {
            self.ring[self.start] = item;
        }
        self.start = (self.start + 1) % self.capacity;
    }

    /// Draw `n` transitions uniformly with replacement.
    pub fn sample<R: Rng>(&self, rng: &mut R, n: usize) -> Vec<&Transition> {
        if self.ring.is_empty() {
            return Vec::new();
        }
        (0..n)
            .map(|_| &self.ring[rng.random_range(0..self.ring.len())])
            .collect()
    }
}
