// Minimal PRNG for initial parameter draws.
//
// This is NOT cryptographically secure. Each parameter set owns its own
// generator so that instances evaluated on different threads never share state.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform in [0,1) with 53 bits of precision.
    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    #[inline]
    pub fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64_01()
    }

    /// Normal sample (Box-Muller). `std` is a standard deviation, not a variance.
    pub fn gauss(&mut self, mean: f64, std: f64) -> f64 {
        // 1 - u keeps the log argument in (0,1].
        let u1 = 1.0 - self.next_f64_01();
        let u2 = self.next_f64_01();
        let z = (-2.0 * u1.ln()).sqrt() * (core::f64::consts::TAU * u2).cos();
        mean + std * z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_f64_01().to_bits(), b.next_f64_01().to_bits());
        }
    }

    #[test]
    fn uniform_stays_in_range() {
        let mut rng = Prng::new(0);
        for _ in 0..1000 {
            let v = rng.gen_range_f64(-2.0, 3.0);
            assert!((-2.0..3.0).contains(&v));
        }
    }

    #[test]
    fn gauss_mean_is_close() {
        let mut rng = Prng::new(42);
        let n = 20_000;
        let mean = (0..n).map(|_| rng.gauss(1.5, 0.2)).sum::<f64>() / n as f64;
        assert!((mean - 1.5).abs() < 0.01, "mean {mean}");
    }
}
