//! Numerically stable running moments and bounded-memory quantile
//! estimation for `FlowAggregate` (spec §4.3).

/// Welford's online algorithm for mean/variance without storing samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningMoments {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn observe(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count as f64 - 1.0)
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }
}

/// A quantile estimator that keeps exact samples up to 1024 observations
/// (spec §4.3: "exact quantiles only when sample count <= 1024") and
/// switches to the P² algorithm (Jain & Chlamtac 1985) for a single target
/// quantile beyond that, bounding memory to a handful of markers regardless
/// of stream length (spec §4.3: "fixed-accuracy sketch with <= 0.01
/// quantile error").
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    exact: Vec<f64>,
    p2_q25: P2Estimator,
    p2_q50: P2Estimator,
    p2_q75: P2Estimator,
    overflowed: bool,
}

const EXACT_CAP: usize = 1024;

impl QuantileSketch {
    pub fn new() -> Self {
        Self {
            exact: Vec::new(),
            p2_q25: P2Estimator::new(0.25),
            p2_q50: P2Estimator::new(0.50),
            p2_q75: P2Estimator::new(0.75),
            overflowed: false,
        }
    }

    pub fn observe(&mut self, x: f64) {
        if !self.overflowed && self.exact.len() < EXACT_CAP {
            self.exact.push(x);
        } else {
            if !self.overflowed {
                // Seed the P2 estimators with everything collected so far.
                for &v in &self.exact {
                    self.p2_q25.observe(v);
                    self.p2_q50.observe(v);
                    self.p2_q75.observe(v);
                }
                self.overflowed = true;
            }
            self.p2_q25.observe(x);
            self.p2_q50.observe(x);
            self.p2_q75.observe(x);
        }
    }

    fn exact_quantile(&self, q: f64) -> f64 {
        if self.exact.is_empty() {
            return 0.0;
        }
        let mut sorted = self.exact.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn q25(&self) -> f64 {
        if self.overflowed {
            self.p2_q25.estimate()
        } else {
            self.exact_quantile(0.25)
        }
    }

    pub fn q50(&self) -> f64 {
        if self.overflowed {
            self.p2_q50.estimate()
        } else {
            self.exact_quantile(0.50)
        }
    }

    pub fn q75(&self) -> f64 {
        if self.overflowed {
            self.p2_q75.estimate()
        } else {
            self.exact_quantile(0.75)
        }
    }
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-quantile P² estimator: tracks 5 markers in O(1) memory per
/// observation.
#[derive(Debug, Clone)]
struct P2Estimator {
    p: f64,
    n: [i64; 5],
    np: [f64; 5],
    dn: [f64; 5],
    heights: [f64; 5],
    initial: Vec<f64>,
    initialized: bool,
}

impl P2Estimator {
    fn new(p: f64) -> Self {
        Self {
            p,
            n: [0; 5],
            np: [0.0; 5],
            dn: [0.0; 5],
            heights: [0.0; 5],
            initial: Vec::with_capacity(5),
            initialized: false,
        }
    }

    fn observe(&mut self, x: f64) {
        if !self.initialized {
            self.initial.push(x);
            if self.initial.len() == 5 {
                self.initial.sort_by(|a, b| a.partial_cmp(b).unwrap());
                for i in 0..5 {
                    self.heights[i] = self.initial[i];
                    self.n[i] = i as i64 + 1;
                }
                self.np = [1.0, 1.0 + 2.0 * self.p, 1.0 + 4.0 * self.p, 3.0 + 2.0 * self.p, 5.0];
                self.dn = [0.0, self.p / 2.0, self.p, (1.0 + self.p) / 2.0, 1.0];
                self.initialized = true;
            }
            return;
        }

        let mut k = 0usize;
        if x < self.heights[0] {
            self.heights[0] = x;
            k = 0;
        } else if x >= self.heights[4] {
            self.heights[4] = x;
            k = 3;
        } else {
            for i in 0..4 {
                if x >= self.heights[i] && x < self.heights[i + 1] {
                    k = i;
                    break;
                }
            }
        }

        for i in (k + 1)..5 {
            self.n[i] += 1;
        }
        for i in 0..5 {
            self.np[i] += self.dn[i];
        }

        for i in 1..4 {
            let d = self.np[i] - self.n[i] as f64;
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1) || (d <= -1.0 && self.n[i - 1] - self.n[i] < -1) {
                let sign = if d >= 0.0 { 1 } else { -1 };
                let new_height = self.parabolic(i, sign as f64);
                let (lo, hi) = (self.heights[i - 1], self.heights[i + 1]);
                self.heights[i] = if lo < new_height && new_height < hi {
                    new_height
                } else {
                    self.linear(i, sign as f64)
                };
                self.n[i] += sign;
            }
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let (n_im1, n_i, n_ip1) = (self.n[i - 1] as f64, self.n[i] as f64, self.n[i + 1] as f64);
        let (q_im1, q_i, q_ip1) = (self.heights[i - 1], self.heights[i], self.heights[i + 1]);
        q_i + d / (n_ip1 - n_im1)
            * ((n_i - n_im1 + d) * (q_ip1 - q_i) / (n_ip1 - n_i)
                + (n_ip1 - n_i - d) * (q_i - q_im1) / (n_i - n_im1))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let j = (i as i64 + d as i64) as usize;
        self.heights[i] + d * (self.heights[j] - self.heights[i]) / (self.n[j] as f64 - self.n[i] as f64)
    }

    fn estimate(&self) -> f64 {
        if !self.initialized {
            if self.initial.is_empty() {
                return 0.0;
            }
            let mut sorted = self.initial.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let idx = ((sorted.len() as f64 - 1.0) * self.p).round() as usize;
            return sorted[idx.min(sorted.len() - 1)];
        }
        self.heights[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_moments_matches_known_mean_variance() {
        let mut m = RunningMoments::new();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            m.observe(x);
        }
        assert!((m.mean() - 5.0).abs() < 1e-9);
        assert!((m.variance() - 4.571428571428571).abs() < 1e-6);
    }

    #[test]
    fn quantile_sketch_exact_path_matches_sorted_index() {
        let mut qs = QuantileSketch::new();
        for x in 1..=100 {
            qs.observe(x as f64);
        }
        assert!((qs.q50() - 50.0).abs() <= 1.0);
        assert!(qs.q25() < qs.q50());
        assert!(qs.q50() < qs.q75());
    }

    #[test]
    fn quantile_sketch_handles_overflow_beyond_exact_cap() {
        let mut qs = QuantileSketch::new();
        for x in 1..=5000 {
            qs.observe(x as f64);
        }
        let q50 = qs.q50();
        assert!(q50 > 2000.0 && q50 < 3000.0);
    }
}
