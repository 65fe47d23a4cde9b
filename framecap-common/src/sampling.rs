//! Which frames of a video to sample.
//!
//! Everything here works on frame indices and metadata only, the decoding is someone
//! else's problem.

use std::num::NonZeroUsize;

/// How the frames are stepped through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// The video has a usable frame rate, step to hit the target rate
    Rate { step: usize },
    /// No usable frame rate, spread `max_frames` over the whole video
    Uniform { step: usize },
}

impl Policy {
    pub fn new(
        total_frames: usize,
        native_rate: Option<f64>,
        target_rate: f64,
        max_frames: NonZeroUsize,
    ) -> Self {
        match usable_rate(native_rate) {
            Some(native_rate) => Policy::Rate {
                step: rate_step(native_rate, target_rate),
            },
            None => Policy::Uniform {
                step: uniform_step(total_frames, max_frames),
            },
        }
    }

    pub fn step(&self) -> usize {
        match *self {
            Policy::Rate { step } | Policy::Uniform { step } => step,
        }
    }
}

/// A frame rate is only usable if it is a positive number
pub fn usable_rate(rate: Option<f64>) -> Option<f64> {
    rate.filter(|r| r.is_finite() && *r > 0.0)
}

/// A non-positive target rate means one frame per second
pub fn effective_target_rate(target_rate: f64) -> f64 {
    if target_rate > 0.0 {
        target_rate
    } else {
        1.0
    }
}

/// round(native / target), ties to even, but never less than one
pub fn rate_step(native_rate: f64, target_rate: f64) -> usize {
    let target_rate = effective_target_rate(target_rate);
    // NOTE: `as` saturates, so absurdly small target rates just give a huge step
    let step = (native_rate / target_rate).round_ties_even() as usize;
    step.max(1)
}

pub fn uniform_step(total_frames: usize, max_frames: NonZeroUsize) -> usize {
    std::cmp::max(1, total_frames / max_frames.get())
}

/// The indices to sample, strictly increasing and at most `max_frames` of them.
pub fn frame_indices(
    total_frames: usize,
    native_rate: Option<f64>,
    target_rate: f64,
    max_frames: NonZeroUsize,
) -> Vec<usize> {
    let policy = Policy::new(total_frames, native_rate, target_rate, max_frames);
    (0..total_frames)
        .step_by(policy.step())
        .take(max_frames.get())
        .collect()
}

/// Length of the video in seconds, zero if it can't be known
pub fn estimated_duration(total_frames: usize, native_rate: Option<f64>) -> f64 {
    match usable_rate(native_rate) {
        Some(rate) => total_frames as f64 / rate,
        None => 0.0,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn one_per_second_at_25fps() {
        assert_eq!(
            vec![0, 25, 50, 75],
            frame_indices(100, Some(25.0), 1.0, nz(12))
        );
    }

    #[test]
    fn capped_by_max_frames() {
        let idx = frame_indices(10_000, Some(30.0), 1.0, nz(12));
        assert_eq!(12, idx.len());
        assert_eq!(Some(&330), idx.last());
    }

    #[test]
    fn step_rounds_half_to_even() {
        assert_eq!(12, rate_step(25.0, 2.0));
        assert_eq!(14, rate_step(27.0, 2.0));
        assert_eq!(10, rate_step(29.97, 3.0));
    }

    #[test]
    fn step_is_at_least_one() {
        assert_eq!(1, rate_step(25.0, 100.0));
        assert_eq!(vec![0, 1, 2], frame_indices(3, Some(25.0), 1000.0, nz(12)));
    }

    #[test]
    fn non_positive_target_rate_is_one() {
        assert_eq!(
            frame_indices(300, Some(30.0), 1.0, nz(20)),
            frame_indices(300, Some(30.0), 0.0, nz(20))
        );
        assert_eq!(
            frame_indices(300, Some(30.0), 1.0, nz(20)),
            frame_indices(300, Some(30.0), -4.0, nz(20))
        );
        assert_eq!(30, rate_step(30.0, f64::NAN));
    }

    #[test]
    fn uniform_without_frame_rate() {
        assert_eq!(
            Policy::Uniform { step: 8 },
            Policy::new(100, None, 1.0, nz(12))
        );
        let idx = frame_indices(100, None, 1.0, nz(12));
        assert_eq!(vec![0, 8, 16, 24, 32, 40, 48, 56, 64, 72, 80, 88], idx);

        assert_eq!(frame_indices(100, Some(0.0), 1.0, nz(12)), idx);
        assert_eq!(frame_indices(100, Some(-1.0), 1.0, nz(12)), idx);
        assert_eq!(frame_indices(100, Some(f64::NAN), 1.0, nz(12)), idx);
    }

    #[test]
    fn uniform_with_few_frames() {
        assert_eq!(vec![0, 1, 2, 3, 4], frame_indices(5, None, 1.0, nz(12)));
    }

    #[test]
    fn no_frames_no_indices() {
        assert!(frame_indices(0, Some(25.0), 1.0, nz(12)).is_empty());
        assert!(frame_indices(0, None, 1.0, nz(12)).is_empty());
    }

    #[test]
    fn duration() {
        assert_eq!(4.0, estimated_duration(100, Some(25.0)));
        assert_eq!(0.0, estimated_duration(100, None));
        assert_eq!(0.0, estimated_duration(100, Some(0.0)));
    }

    #[test]
    fn random_index_invariants() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..2000 {
            let total: usize = rng.gen_range(0..5000);
            let max_frames = nz(rng.gen_range(1..50));
            let target: f64 = rng.gen_range(0.01..60.0);
            let native = if rng.gen_bool(0.2) {
                None
            } else {
                Some(rng.gen_range(1.0..120.0))
            };

            let idx = frame_indices(total, native, target, max_frames);
            assert!(idx.len() <= max_frames.get());
            assert!(idx.windows(2).all(|w| w[0] < w[1]));
            assert!(idx.iter().all(|&i| i < total));
            if total > 0 {
                assert_eq!(Some(&0), idx.first());
            }

            let step = match native {
                Some(r) => ((r / target).round_ties_even() as usize).max(1),
                None => std::cmp::max(1, total / max_frames.get()),
            };
            assert!(idx.windows(2).all(|w| w[1] - w[0] == step));
        }
    }
}
