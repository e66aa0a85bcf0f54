//! One-cycle learning rate schedule, advanced once per optimizer step.
//!
//! The rate starts at `max_lr / div_factor`, rises to `max_lr` over the first
//! `pct_start` of the steps, then anneals to
//! `max_lr / (div_factor * final_div_factor)`. Both phases follow a cosine curve.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneCycleLr {
    max_lr: f64,
    total_steps: usize,
    pct_start: f64,
    div_factor: f64,
    final_div_factor: f64,
    step: usize,
}

impl OneCycleLr {
    /// Schedule over `total_steps` with the usual defaults
    /// (30% warmup, div 25, final div 1e4)
    pub fn new(max_lr: f64, total_steps: usize) -> Self {
        Self {
            max_lr,
            total_steps: total_steps.max(1),
            pct_start: 0.3,
            div_factor: 25.0,
            final_div_factor: 1e4,
            step: 0,
        }
    }

    pub fn initial_lr(&self) -> f64 {
        self.max_lr / self.div_factor
    }

    pub fn min_lr(&self) -> f64 {
        self.initial_lr() / self.final_div_factor
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Steps taken so far
    pub fn current_step(&self) -> usize {
        self.step
    }

    /// Rate for the upcoming optimizer step
    pub fn lr(&self) -> f64 {
        self.lr_at(self.step)
    }

    /// Move to the next step; stays on the final rate past the end
    pub fn step(&mut self) {
        self.step = (self.step + 1).min(self.total_steps - 1);
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        let step = step.min(self.total_steps - 1) as f64;
        let warmup_end = self.pct_start * self.total_steps as f64 - 1.0;
        let last = self.total_steps as f64 - 1.0;

        if step <= warmup_end {
            let pct = fraction(step, 0.0, warmup_end);
            cosine(self.initial_lr(), self.max_lr, pct)
        } else {
            let pct = fraction(step, warmup_end, last);
            cosine(self.max_lr, self.min_lr(), pct)
        }
    }
}

fn fraction(step: f64, start: f64, end: f64) -> f64 {
    let span = end - start;
    if span <= 0.0 {
        1.0
    } else {
        ((step - start) / span).clamp(0.0, 1.0)
    }
}

fn cosine(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((std::f64::consts::PI * pct).cos() + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 + 1e-9 * b.abs()
    }

    #[test]
    fn test_endpoints() {
        let schedule = OneCycleLr::new(3e-4, 100);
        assert!(close(schedule.lr_at(0), 3e-4 / 25.0));
        assert!(close(schedule.lr_at(99), 3e-4 / 25.0 / 1e4));
        assert!(close(schedule.lr_at(500), schedule.lr_at(99)));
    }

    #[test]
    fn test_peak_at_end_of_warmup() {
        let schedule = OneCycleLr::new(1e-3, 100);
        // warmup ends at step 0.3 * 100 - 1 = 29
        assert!(close(schedule.lr_at(29), 1e-3));

        let peak = (0..100).map(|s| schedule.lr_at(s)).fold(f64::MIN, f64::max);
        assert!(close(peak, 1e-3));
    }

    #[test]
    fn test_monotone_phases() {
        let schedule = OneCycleLr::new(1e-2, 50);
        let lrs: Vec<f64> = (0..50).map(|s| schedule.lr_at(s)).collect();
        let peak = lrs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        assert!(lrs[..=peak].windows(2).all(|w| w[0] <= w[1]));
        assert!(lrs[peak..].windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_step_advances() {
        let mut schedule = OneCycleLr::new(1e-3, 10);
        let first = schedule.lr();
        schedule.step();
        assert_eq!(schedule.current_step(), 1);
        assert!(schedule.lr() > first);

        for _ in 0..50 {
            schedule.step();
        }
        assert_eq!(schedule.current_step(), 9);
        assert!(close(schedule.lr(), schedule.min_lr()));
    }

    #[test]
    fn test_tiny_runs_stay_finite() {
        for total in [0, 1, 2, 3] {
            let schedule = OneCycleLr::new(1e-3, total);
            for step in 0..4 {
                let lr = schedule.lr_at(step);
                assert!(lr.is_finite() && lr > 0.0 && lr <= 1e-3, "total {} step {}", total, step);
            }
        }
    }
}
