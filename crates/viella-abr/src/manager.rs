use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    bandwidth::BandwidthEstimator,
    error::AbrResult,
    estimator::{FilterSources, RepresentationEstimator, RepresentationEstimatorOptions},
    reference::SharedRef,
    types::{Representation, TrackType},
};

/// Throttling signal cells, per track type.
///
/// Producers (display-size tracking, visibility management) keep writing to
/// the cells they registered here; pipelines read them on every decision.
/// Missing entries never restrict anything.
#[derive(Clone, Debug, Default)]
pub struct AbrThrottlers {
    /// Maximum useful display width, in pixels.
    pub limit_width: HashMap<TrackType, SharedRef<Option<u32>>>,
    /// Maximum bitrate to consider, in bits per second.
    pub throttle_bitrate: HashMap<TrackType, SharedRef<f64>>,
    /// Deprecated synonym of `throttle_bitrate`, consulted when the former
    /// is absent for a type.
    pub throttle: HashMap<TrackType, SharedRef<f64>>,
}

/// Initial configuration of the `AbrManager`.
#[derive(Clone, Debug, Default)]
pub struct AbrOptions {
    /// Whether contents play in low-latency mode, close to the live edge.
    pub low_latency_mode: bool,
    /// Bitrate assumed per type before any bandwidth information exists, in
    /// bits per second. Missing types assume 0.
    pub initial_bitrates: HashMap<TrackType, f64>,
    /// Initial manual bitrate locks. Negative values (the default) mean
    /// automatic mode.
    pub manual_bitrates: HashMap<TrackType, f64>,
    /// Initial floors for automatically-chosen bitrates.
    pub min_auto_bitrates: HashMap<TrackType, f64>,
    /// Initial caps for automatically-chosen bitrates.
    pub max_auto_bitrates: HashMap<TrackType, f64>,
    /// Throttling signals restricting the selectable pools.
    pub throttlers: AbrThrottlers,
}

impl AbrOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable low-latency mode.
    #[must_use]
    pub fn with_low_latency_mode(mut self, low_latency_mode: bool) -> Self {
        self.low_latency_mode = low_latency_mode;
        self
    }

    /// Set the initial bitrate assumption for a track type.
    #[must_use]
    pub fn with_initial_bitrate(mut self, track_type: TrackType, bitrate: f64) -> Self {
        self.initial_bitrates.insert(track_type, bitrate);
        self
    }

    /// Set the throttling signals.
    #[must_use]
    pub fn with_throttlers(mut self, throttlers: AbrThrottlers) -> Self {
        self.throttlers = throttlers;
        self
    }
}

/// Facade owning one estimate pipeline context per track type.
///
/// Bandwidth estimators are created lazily and survive the pipelines using
/// them: a new pipeline for a type (e.g. after a track switch) keeps
/// benefiting from everything already sampled for that type. Manual and
/// min/max bitrate cells are resolved here and shared with the pipelines,
/// so updating them through the manager is immediately visible to every
/// running pipeline.
pub struct AbrManager {
    low_latency_mode: bool,
    initial_bitrates: HashMap<TrackType, f64>,
    bandwidth_estimators: HashMap<TrackType, Arc<Mutex<BandwidthEstimator>>>,
    manual_bitrates: HashMap<TrackType, SharedRef<f64>>,
    min_auto_bitrates: HashMap<TrackType, SharedRef<f64>>,
    max_auto_bitrates: HashMap<TrackType, SharedRef<f64>>,
    throttlers: AbrThrottlers,
}

impl AbrManager {
    pub fn new(options: AbrOptions) -> Self {
        let AbrOptions {
            low_latency_mode,
            initial_bitrates,
            manual_bitrates,
            min_auto_bitrates,
            max_auto_bitrates,
            throttlers,
        } = options;
        let to_cells = |values: HashMap<TrackType, f64>| {
            values
                .into_iter()
                .map(|(track_type, value)| (track_type, SharedRef::new(value)))
                .collect()
        };
        Self {
            low_latency_mode,
            initial_bitrates,
            bandwidth_estimators: HashMap::new(),
            manual_bitrates: to_cells(manual_bitrates),
            min_auto_bitrates: to_cells(min_auto_bitrates),
            max_auto_bitrates: to_cells(max_auto_bitrates),
            throttlers,
        }
    }

    /// Build the estimate pipeline for one track type and candidate pool.
    ///
    /// Fails when `representations` is empty.
    pub fn representation_estimator(
        &mut self,
        track_type: TrackType,
        representations: Vec<Representation>,
    ) -> AbrResult<RepresentationEstimator> {
        let bandwidth = self.bandwidth_estimator(track_type);
        let initial_bitrate = self
            .initial_bitrates
            .get(&track_type)
            .copied()
            .unwrap_or(0.0);
        let filters = FilterSources {
            limit_width: self.throttlers.limit_width.get(&track_type).cloned(),
            throttle_bitrate: self.throttlers.throttle_bitrate.get(&track_type).cloned(),
            throttle: self.throttlers.throttle.get(&track_type).cloned(),
        };
        RepresentationEstimator::new(RepresentationEstimatorOptions {
            representations,
            initial_bitrate,
            low_latency_mode: self.low_latency_mode,
            bandwidth,
            manual_bitrate: self.manual_cell(track_type),
            min_auto_bitrate: self.min_cell(track_type),
            max_auto_bitrate: self.max_cell(track_type),
            filters,
        })
    }

    /// Lock a type to the highest Representation at or under `bitrate`.
    /// Any negative value goes back to automatic mode.
    pub fn set_manual_bitrate(&mut self, track_type: TrackType, bitrate: f64) {
        self.manual_cell(track_type).set(bitrate);
    }

    pub fn manual_bitrate(&self, track_type: TrackType) -> f64 {
        self.manual_bitrates
            .get(&track_type)
            .map_or(-1.0, SharedRef::get)
    }

    /// Set the floor for automatically-chosen bitrates of a type.
    pub fn set_min_auto_bitrate(&mut self, track_type: TrackType, bitrate: f64) {
        self.min_cell(track_type).set(bitrate);
    }

    pub fn min_auto_bitrate(&self, track_type: TrackType) -> f64 {
        self.min_auto_bitrates
            .get(&track_type)
            .map_or(0.0, SharedRef::get)
    }

    /// Set the cap for automatically-chosen bitrates of a type.
    pub fn set_max_auto_bitrate(&mut self, track_type: TrackType, bitrate: f64) {
        self.max_cell(track_type).set(bitrate);
    }

    pub fn max_auto_bitrate(&self, track_type: TrackType) -> f64 {
        self.max_auto_bitrates
            .get(&track_type)
            .map_or(f64::INFINITY, SharedRef::get)
    }

    fn bandwidth_estimator(&mut self, track_type: TrackType) -> Arc<Mutex<BandwidthEstimator>> {
        Arc::clone(
            self.bandwidth_estimators
                .entry(track_type)
                .or_insert_with(|| {
                    tracing::debug!(?track_type, "creating new bandwidth estimator");
                    Arc::new(Mutex::new(BandwidthEstimator::new()))
                }),
        )
    }

    fn manual_cell(&mut self, track_type: TrackType) -> SharedRef<f64> {
        self.manual_bitrates
            .entry(track_type)
            .or_insert_with(|| SharedRef::new(-1.0))
            .clone()
    }

    fn min_cell(&mut self, track_type: TrackType) -> SharedRef<f64> {
        self.min_auto_bitrates
            .entry(track_type)
            .or_insert_with(|| SharedRef::new(0.0))
            .clone()
    }

    fn max_cell(&mut self, track_type: TrackType) -> SharedRef<f64> {
        self.max_auto_bitrates
            .entry(track_type)
            .or_insert_with(|| SharedRef::new(f64::INFINITY))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_default_to_manual_off_and_unbounded_auto() {
        let manager = AbrManager::new(AbrOptions::default());
        assert_eq!(manager.manual_bitrate(TrackType::Video), -1.0);
        assert_eq!(manager.min_auto_bitrate(TrackType::Video), 0.0);
        assert_eq!(manager.max_auto_bitrate(TrackType::Video), f64::INFINITY);
    }

    #[test]
    fn cells_are_independent_per_track_type() {
        let mut manager = AbrManager::new(AbrOptions::default());
        manager.set_max_auto_bitrate(TrackType::Video, 2_000_000.0);
        assert_eq!(manager.max_auto_bitrate(TrackType::Video), 2_000_000.0);
        assert_eq!(manager.max_auto_bitrate(TrackType::Audio), f64::INFINITY);
    }

    #[test]
    fn options_seed_the_cells() {
        let options = AbrOptions::new()
            .with_initial_bitrate(TrackType::Audio, 128_000.0)
            .with_low_latency_mode(true);
        let mut manager = AbrManager::new(options);
        let pipeline = manager.representation_estimator(
            TrackType::Audio,
            vec![Representation::new("a", 128_000)],
        );
        assert!(pipeline.is_ok());
    }
}
