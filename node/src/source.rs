use parameter_server::GradientSource;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// A synthetic objective, `0.5 * |params - target|^2` plus gradient noise, standing in
/// for a model and its dataset.
pub struct Quadratic {
    target: Vec<f32>,
    noise: f32,
    rng: StdRng,
}

impl Quadratic {
    /// Creates a new `Quadratic` with a random target.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters.
    /// * `noise` - The amplitude of the uniform noise added to every gradient.
    /// * `seed` - Seeds the target and the noise, workers sharing it share the target.
    pub fn new(len: usize, noise: f32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let target = (0..len).map(|_| rng.random_range(-1.0..1.0)).collect();

        Self { target, noise, rng }
    }

    pub fn loss(&self, params: &[f32]) -> f32 {
        0.5 * params
            .iter()
            .zip(&self.target)
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f32>()
    }
}

impl GradientSource for Quadratic {
    fn produce_gradient(&mut self, params: &[f32]) -> Vec<f32> {
        let Self { target, noise, rng } = self;

        params
            .iter()
            .zip(target.iter())
            .map(|(p, t)| p - t + *noise * rng.random_range(-1.0..1.0))
            .collect()
    }
}
