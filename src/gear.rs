//! Gear ratio learning and gear classification
//!
//! The bike has no gear position sensor. While riding through the gears in
//! order, the learner collects engine-RPM / speed ratios, takes the most
//! common value of each window as a candidate and appends it to the ratio
//! table when it is clearly a new, taller gear. Once the table is full it is
//! sealed and the classifier maps live speed/RPM back to a gear number.

use crate::config::GearConfig;
use std::collections::HashMap;
use tracing::{debug, info};

// ============================================================================
// RATIO MATH
// ============================================================================

/// Rounded RPM per speed unit; `None` when stationary
pub fn ratio(speed: u16, rpm: u16) -> Option<u16> {
    if speed == 0 {
        return None;
    }
    let speed = speed as u32;
    let value = (rpm as u32 + speed / 2) / speed;
    Some(value.min(u16::MAX as u32) as u16)
}

/// Most frequent value; on ties the value that reached the top count first wins
pub fn mode(samples: &[u16]) -> Option<u16> {
    let mut counts: HashMap<u16, usize> = HashMap::new();
    let mut best = None;
    let mut best_count = 0;

    for &sample in samples {
        let count = counts.entry(sample).or_insert(0);
        *count += 1;
        if *count > best_count {
            best_count = *count;
            best = Some(sample);
        }
    }

    best
}

// ============================================================================
// RATIO TABLE
// ============================================================================

/// Learned ratios, index 0 is first gear
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatioTable {
    ratios: Vec<u16>,
    sealed: bool,
}

impl RatioTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A complete table restored from storage
    pub fn sealed(ratios: Vec<u16>) -> Self {
        Self {
            ratios,
            sealed: true,
        }
    }

    pub fn ratios(&self) -> &[u16] {
        &self.ratios
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn last(&self) -> Option<u16> {
        self.ratios.last().copied()
    }

    pub fn clear(&mut self) {
        self.ratios.clear();
        self.sealed = false;
    }

    fn push(&mut self, ratio: u16) {
        self.ratios.push(ratio);
    }

    fn seal(&mut self) {
        self.sealed = true;
    }
}

// ============================================================================
// LEARNER
// ============================================================================

/// Outcome of a training sample worth telling the rider about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnEvent {
    /// Entered neutral, training restarts from first gear
    ShiftIntoFirst,
    /// Candidate matches the last learned gear
    Repeat { candidate: u16, gear: usize },
    /// Candidate is shorter than the last learned gear
    Regression { candidate: u16, gear: usize },
    /// New gear appended
    GearSet { gear: usize, ratio: u16 },
    /// Last gear appended, table complete
    Sealed { ratios: Vec<u16> },
}

pub struct GearLearner {
    params: GearConfig,
    window: Vec<u16>,
    table: RatioTable,
    training: bool,
    in_neutral: bool,
}

impl GearLearner {
    pub fn new(params: GearConfig) -> Self {
        Self {
            params,
            window: Vec::with_capacity(params.window_size),
            table: RatioTable::new(),
            training: false,
            in_neutral: false,
        }
    }

    /// Install a table loaded from storage
    pub fn restore(&mut self, ratios: Vec<u16>) {
        self.table = RatioTable::sealed(ratios);
        self.training = false;
        self.window.clear();
    }

    pub fn table(&self) -> &RatioTable {
        &self.table
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Samples collected towards the next candidate
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Begin training; refused while a sealed table exists
    pub fn start(&mut self) -> bool {
        if self.table.is_sealed() {
            return false;
        }
        info!("Gear training started");
        self.training = true;
        self.in_neutral = false;
        self.window.clear();
        true
    }

    /// Stop training and drop any partial table
    pub fn stop(&mut self) {
        if self.training {
            info!("Gear training stopped");
        }
        self.training = false;
        self.in_neutral = false;
        self.window.clear();
        if !self.table.is_sealed() {
            self.table.clear();
        }
    }

    /// Stop training because the session ended
    pub fn cancel(&mut self) -> bool {
        let was_training = self.training;
        self.stop();
        was_training
    }

    /// Forget all ratios, sealed or not
    pub fn reset_table(&mut self) {
        self.training = false;
        self.in_neutral = false;
        self.window.clear();
        self.table.clear();
    }

    /// Feed a fresh (speed, rpm) pair
    pub fn offer(&mut self, speed: u16, rpm: u16) -> Option<LearnEvent> {
        if !self.training || self.table.is_sealed() {
            return None;
        }

        if speed < self.params.learn_min_speed || rpm == 0 {
            self.window.clear();
            self.table.clear();
            if self.in_neutral {
                return None;
            }
            self.in_neutral = true;
            return Some(LearnEvent::ShiftIntoFirst);
        }
        self.in_neutral = false;

        self.window.push(ratio(speed, rpm)?);
        if self.window.len() < self.params.window_size {
            return None;
        }

        let candidate = mode(&self.window)?;
        self.window.clear();
        Some(self.consider(candidate))
    }

    fn consider(&mut self, candidate: u16) -> LearnEvent {
        let gear = self.table.len();

        match self.table.last() {
            Some(last) if last.abs_diff(candidate) <= self.params.deviation => {
                debug!("Ratio {} repeats gear {}", candidate, gear);
                LearnEvent::Repeat { candidate, gear }
            }
            Some(last) if candidate > last => {
                debug!("Ratio {} is shorter than gear {} ({})", candidate, gear, last);
                LearnEvent::Regression { candidate, gear }
            }
            _ => {
                self.table.push(candidate);
                let gear = self.table.len();
                info!("Gear {} learned: ratio {}", gear, candidate);

                if gear >= self.params.max_gears {
                    self.table.seal();
                    self.training = false;
                    info!("Gear table complete: {:?}", self.table.ratios());
                    LearnEvent::Sealed {
                        ratios: self.table.ratios().to_vec(),
                    }
                } else {
                    LearnEvent::GearSet {
                        gear,
                        ratio: candidate,
                    }
                }
            }
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Gear number for the current speed/RPM, 0 for neutral or no match
pub fn classify(table: &[u16], speed: u16, rpm: u16, params: &GearConfig) -> u8 {
    if speed < params.neutral_speed || rpm == 0 {
        return 0;
    }

    let Some(current) = ratio(speed, rpm) else {
        return 0;
    };

    table
        .iter()
        .position(|&r| r.abs_diff(current) <= params.lookup_tolerance)
        .map(|index| (index + 1) as u8)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(window_size: usize) -> GearConfig {
        GearConfig {
            window_size,
            ..GearConfig::default()
        }
    }

    /// Feed `count` samples with the given speed/rpm, returning the last event
    fn feed(learner: &mut GearLearner, count: usize, speed: u16, rpm: u16) -> Option<LearnEvent> {
        let mut last = None;
        for _ in 0..count {
            if let Some(event) = learner.offer(speed, rpm) {
                last = Some(event);
            }
        }
        last
    }

    #[test]
    fn test_ratio_rounds() {
        assert_eq!(ratio(50, 3000), Some(60));
        assert_eq!(ratio(40, 3010), Some(75));
        assert_eq!(ratio(40, 3020), Some(76));
        assert_eq!(ratio(0, 3000), None);
        assert_eq!(ratio(1, u16::MAX), Some(u16::MAX));
    }

    #[test]
    fn test_mode_most_frequent() {
        assert_eq!(mode(&[3, 1, 3, 2, 3, 1]), Some(3));
        assert_eq!(mode(&[]), None);
    }

    #[test]
    fn test_mode_tie_goes_to_first_to_reach_count() {
        // 7 reaches two first
        assert_eq!(mode(&[5, 7, 7, 5]), Some(7));
        assert_eq!(mode(&[5, 7, 5, 7]), Some(5));
    }

    #[test]
    fn test_not_training_ignores_samples() {
        let mut learner = GearLearner::new(params(3));
        assert_eq!(feed(&mut learner, 10, 50, 3000), None);
        assert!(learner.table().is_empty());
    }

    #[test]
    fn test_neutral_prompts_once() {
        let mut learner = GearLearner::new(params(3));
        learner.start();

        assert_eq!(learner.offer(5, 1200), Some(LearnEvent::ShiftIntoFirst));
        assert_eq!(learner.offer(0, 1200), None);
        assert_eq!(learner.offer(20, 0), None);

        // Leaving and re-entering neutral prompts again
        learner.offer(50, 3000);
        assert_eq!(learner.offer(3, 1000), Some(LearnEvent::ShiftIntoFirst));
    }

    #[test]
    fn test_window_proposes_ratio() {
        let mut learner = GearLearner::new(params(4));
        learner.start();

        assert_eq!(feed(&mut learner, 3, 50, 3000), None);
        assert_eq!(learner.window_len(), 3);
        assert_eq!(
            learner.offer(50, 3000),
            Some(LearnEvent::GearSet { gear: 1, ratio: 60 })
        );
        assert_eq!(learner.window_len(), 0);
    }

    #[test]
    fn test_repeat_and_regression_ignored() {
        let mut learner = GearLearner::new(params(2));
        learner.start();
        feed(&mut learner, 2, 50, 3000); // gear 1 = 60

        assert_eq!(
            feed(&mut learner, 2, 50, 3250),
            Some(LearnEvent::Repeat { candidate: 65, gear: 1 })
        );
        assert_eq!(
            feed(&mut learner, 2, 50, 3600),
            Some(LearnEvent::Regression { candidate: 72, gear: 1 })
        );
        assert_eq!(learner.table().ratios(), &[60]);

        // Exactly `deviation` below is still a repeat
        assert_eq!(
            feed(&mut learner, 2, 50, 2700),
            Some(LearnEvent::Repeat { candidate: 54, gear: 1 })
        );
        // One more is a new gear
        assert_eq!(
            feed(&mut learner, 2, 50, 2650),
            Some(LearnEvent::GearSet { gear: 2, ratio: 53 })
        );
    }

    #[test]
    fn test_neutral_clears_partial_table() {
        let mut learner = GearLearner::new(params(2));
        learner.start();
        feed(&mut learner, 2, 20, 2400); // 120
        feed(&mut learner, 2, 40, 3200); // 80
        assert_eq!(learner.table().len(), 2);

        learner.offer(0, 1100);
        assert!(learner.table().is_empty());
        assert!(learner.is_training());
    }

    #[test]
    fn test_full_training_seals_table() {
        let mut learner = GearLearner::new(params(2));
        learner.start();

        let gears = [(20, 2400), (30, 2400), (40, 2400), (50, 2400)];
        for (speed, rpm) in gears {
            assert!(matches!(
                feed(&mut learner, 2, speed, rpm),
                Some(LearnEvent::GearSet { .. })
            ));
        }
        assert_eq!(
            feed(&mut learner, 2, 60, 2400),
            Some(LearnEvent::Sealed {
                ratios: vec![120, 80, 60, 48, 40]
            })
        );
        assert!(learner.table().is_sealed());
        assert!(!learner.is_training());

        // Sealed tables take no more samples and refuse a restart
        assert_eq!(feed(&mut learner, 4, 70, 2400), None);
        assert!(!learner.start());
    }

    #[test]
    fn test_stop_and_cancel() {
        let mut learner = GearLearner::new(params(2));
        learner.start();
        feed(&mut learner, 2, 20, 2400);
        feed(&mut learner, 1, 30, 2400);

        assert!(learner.cancel());
        assert!(!learner.is_training());
        assert!(learner.table().is_empty());
        assert_eq!(learner.window_len(), 0);
        assert!(!learner.cancel());
    }

    #[test]
    fn test_stop_keeps_sealed_table() {
        let mut learner = GearLearner::new(params(2));
        learner.restore(vec![120, 80, 60, 48, 40]);
        learner.stop();
        assert!(learner.table().is_sealed());

        learner.reset_table();
        assert!(learner.table().is_empty());
        assert!(!learner.table().is_sealed());
        assert!(learner.start());
    }

    #[test]
    fn test_classify_first_match_wins() {
        let params = GearConfig::default();
        // Two entries within tolerance of 62: first wins
        let table = [120, 80, 66, 60, 40];
        assert_eq!(classify(&table, 50, 3100, &params), 3);
        assert_eq!(classify(&table, 50, 6000, &params), 1);
        assert_eq!(classify(&table, 50, 2000, &params), 5);
    }

    #[test]
    fn test_classify_neutral_and_no_match() {
        let params = GearConfig::default();
        let table = [120, 80, 60, 48, 40];
        assert_eq!(classify(&table, 6, 3000, &params), 0);
        assert_eq!(classify(&table, 50, 0, &params), 0);
        // Ratio 100 is more than 6 from every entry
        assert_eq!(classify(&table, 30, 3000, &params), 0);
        assert_eq!(classify(&[], 50, 3000, &params), 0);
    }
}
