// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Deterministic packet loss for the in-memory network
//!
//! Every model decides per message and recipient whether it is delivered.
//! Randomness is always seeded, so a failing run can be replayed.

use std::{fmt::Debug, hash::Hash, time::Duration};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::{
    distributions::{Bernoulli, BernoulliError, Distribution, Uniform},
    rngs::SmallRng,
    SeedableRng,
};

/// interface describing how reliable the network is
pub trait NetworkReliability<N>: Debug + Send + Sync + 'static {
    /// decide whether the message from `from` to `to` is kept
    fn sample_keep(&self, _from: &N, _to: &N) -> bool {
        true
    }

    /// how long delivery of a kept message is delayed
    fn sample_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// ideal network
#[derive(Clone, Copy, Debug, Default)]
pub struct PerfectNetwork {}

impl<N> NetworkReliability<N> for PerfectNetwork {}

/// Drops every message with a fixed probability, from a seeded generator.
///
/// probability that a packet is kept = `keep_numerator` / `keep_denominator`;
/// kept packets are delayed by a uniform sample from `delay_low_ms..=delay_high_ms`.
#[derive(Debug)]
pub struct SeededLossyNetwork {
    /// keep distribution
    keep: Bernoulli,
    /// delay distribution, milliseconds
    delay_ms: Uniform<u64>,
    /// seeded source
    rng: Mutex<SmallRng>,
}

impl SeededLossyNetwork {
    /// create a lossy network without delay
    ///
    /// # Errors
    /// If `keep_numerator > keep_denominator` or the denominator is zero.
    pub fn new(keep_numerator: u32, keep_denominator: u32, seed: u64) -> Result<Self, BernoulliError> {
        Ok(Self {
            keep: Bernoulli::from_ratio(keep_numerator, keep_denominator)?,
            delay_ms: Uniform::new_inclusive(0, 0),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    /// delay kept packets by `delay_low_ms..=delay_high_ms`
    #[must_use]
    pub fn with_delay(mut self, delay_low_ms: u64, delay_high_ms: u64) -> Self {
        self.delay_ms = Uniform::new_inclusive(delay_low_ms, delay_high_ms.max(delay_low_ms));
        self
    }
}

impl<N> NetworkReliability<N> for SeededLossyNetwork {
    fn sample_keep(&self, _from: &N, _to: &N) -> bool {
        let mut rng = self.rng.lock();
        self.keep.sample(&mut *rng)
    }

    fn sample_delay(&self) -> Duration {
        let mut rng = self.rng.lock();
        Duration::from_millis(self.delay_ms.sample(&mut *rng))
    }
}

/// Drops the first `count` messages addressed to each listed recipient,
/// then delivers everything.
#[derive(Debug)]
pub struct DropFirst<N: Eq + Hash> {
    /// drops left per recipient
    remaining: DashMap<N, usize>,
}

impl<N: Eq + Hash> DropFirst<N> {
    /// drop the first `count` messages to each of `targets`
    pub fn new(targets: impl IntoIterator<Item = N>, count: usize) -> Self {
        Self {
            remaining: targets.into_iter().map(|node| (node, count)).collect(),
        }
    }

    /// drops still to come for `node`
    #[must_use]
    pub fn remaining(&self, node: &N) -> usize {
        self.remaining.get(node).map_or(0, |left| *left)
    }
}

impl<N: Debug + Eq + Hash + Send + Sync + 'static> NetworkReliability<N> for DropFirst<N> {
    fn sample_keep(&self, _from: &N, to: &N) -> bool {
        let Some(mut left) = self.remaining.get_mut(to) else {
            return true;
        };
        if *left == 0 {
            return true;
        }
        *left -= 1;
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drop_first_only_hits_targets() {
        let model = DropFirst::new([2_u64, 3], 2);
        assert!(model.sample_keep(&1, &1));
        assert!(!model.sample_keep(&1, &2));
        assert!(!model.sample_keep(&1, &2));
        assert!(model.sample_keep(&1, &2));
        assert_eq!(model.remaining(&2), 0);
        assert_eq!(model.remaining(&3), 2);
    }

    #[test]
    fn same_seed_same_losses() {
        let sample = |seed| {
            let model = SeededLossyNetwork::new(1, 2, seed).unwrap();
            (0..64)
                .map(|_| NetworkReliability::<u64>::sample_keep(&model, &0, &1))
                .collect::<Vec<_>>()
        };
        assert_eq!(sample(7), sample(7));
        assert!(sample(7).contains(&false));
    }

    #[test]
    fn rejects_impossible_ratio() {
        assert!(SeededLossyNetwork::new(3, 2, 0).is_err());
    }
}
