use std::sync::{Arc, Mutex};

use web_time::Instant;

use crate::{
    bandwidth::{BandwidthEstimator, BandwidthSource},
    buffer_based::{BufferBasedChooser, BufferObservation},
    error::{AbrError, AbrResult},
    guess_based::GuessBasedChooser,
    last_estimate::LastEstimate,
    network_analyzer::NetworkAnalyzer,
    pending_requests::{PendingRequestsStore, RequestProgress},
    reference::SharedRef,
    score::MaintainabilityScoreTracker,
    selection::{filtered_representations, select_optimal_representation},
    types::{AbrAlgorithm, AbrEstimate, AbrFilters, PlaybackObservation, StreamEvent},
    Representation,
};

/// Live throttling inputs restricting the selectable pool.
///
/// Each present source is a latest-value cell written by its producer
/// (display-size tracking, visibility management); absent sources never
/// restrict anything. `throttle_bitrate` takes precedence over the legacy
/// `throttle` signal.
#[derive(Clone, Debug, Default)]
pub struct FilterSources {
    /// Maximum useful display width, in pixels.
    pub limit_width: Option<SharedRef<Option<u32>>>,
    /// Maximum bitrate to consider, in bits per second.
    pub throttle_bitrate: Option<SharedRef<f64>>,
    /// Deprecated synonym of `throttle_bitrate`, consulted when the former
    /// is absent.
    pub throttle: Option<SharedRef<f64>>,
}

impl FilterSources {
    /// Merge the sources into the filters currently in effect.
    pub fn current(&self) -> AbrFilters {
        let width = self.limit_width.as_ref().and_then(SharedRef::get);
        let bitrate = self
            .throttle_bitrate
            .as_ref()
            .or(self.throttle.as_ref())
            .map(SharedRef::get)
            .filter(|b| b.is_finite());
        AbrFilters { bitrate, width }
    }
}

/// Everything a `RepresentationEstimator` needs at construction.
pub struct RepresentationEstimatorOptions<B: BandwidthSource = BandwidthEstimator> {
    /// Candidate pool, already codec-filtered by the caller. Must not be
    /// empty; order does not matter.
    pub representations: Vec<Representation>,
    /// Bitrate assumed before any bandwidth information exists, in bits per
    /// second.
    pub initial_bitrate: f64,
    /// Whether the content plays in low-latency mode, close to the live
    /// edge.
    pub low_latency_mode: bool,
    /// Network throughput estimator, shared with other pipelines of the
    /// same track type.
    pub bandwidth: Arc<Mutex<B>>,
    /// Manual bitrate lock; any negative value means automatic mode.
    pub manual_bitrate: SharedRef<f64>,
    /// Floor for automatically-chosen bitrates.
    pub min_auto_bitrate: SharedRef<f64>,
    /// Cap for automatically-chosen bitrates.
    pub max_auto_bitrate: SharedRef<f64>,
    /// Throttling inputs.
    pub filters: FilterSources,
}

/// Per-track-type orchestrator arbitrating between the bandwidth-based,
/// buffer-based and guess-based algorithms on every decision tick.
///
/// All inputs are independently-updatable: events mutate internal state,
/// reference cells are read at recomputation time, and every recomputation
/// combines the latest value of each. Decisions are recomputed on playback
/// observations and on added-segment events; other events only feed state
/// consumed by the next decision.
pub struct RepresentationEstimator<B: BandwidthSource = BandwidthEstimator> {
    representations: Vec<Representation>,
    low_latency_mode: bool,
    bandwidth: Arc<Mutex<B>>,
    manual_bitrate: SharedRef<f64>,
    min_auto_bitrate: SharedRef<f64>,
    max_auto_bitrate: SharedRef<f64>,
    filters: FilterSources,

    score_tracker: MaintainabilityScoreTracker,
    network_analyzer: NetworkAnalyzer,
    requests: PendingRequestsStore,
    buffer_based_chooser: BufferBasedChooser,
    guess_based_chooser: GuessBasedChooser,
    prev_estimate: LastEstimate,

    /// Whether buffer-based estimates may currently be used. Starts `false`
    /// and follows the buffer gap with hysteresis, so crossing a single
    /// threshold back and forth cannot flap the decision mode.
    allow_buffer_based: bool,
    /// Latest suggestion of the buffer-based chooser, in bits per second.
    buffer_based_bitrate: Option<u64>,
    /// The Representation the scheduler is actually loading, updated
    /// through `RepresentationChange` events only.
    current_representation: Option<Representation>,
    last_observation: Option<PlaybackObservation>,
}

impl<B: BandwidthSource> RepresentationEstimator<B> {
    /// Buffer gap over which buffer-based estimates become usable.
    const BUFFER_BASED_ENABLE_GAP: f64 = 10.0;
    /// Buffer gap under which they are disabled again.
    const BUFFER_BASED_DISABLE_GAP: f64 = 5.0;
    /// Guesses are only consulted this close to the live edge, in seconds.
    const GUESS_MAX_LIVE_GAP: f64 = 40.0;

    pub fn new(options: RepresentationEstimatorOptions<B>) -> AbrResult<Self> {
        let RepresentationEstimatorOptions {
            mut representations,
            initial_bitrate,
            low_latency_mode,
            bandwidth,
            manual_bitrate,
            min_auto_bitrate,
            max_auto_bitrate,
            filters,
        } = options;
        if representations.is_empty() {
            return Err(AbrError::EmptyRepresentations);
        }
        representations.sort_by_key(|r| r.bitrate);
        let bitrates: Vec<u64> = representations.iter().map(|r| r.bitrate).collect();

        Ok(Self {
            representations,
            low_latency_mode,
            bandwidth,
            manual_bitrate,
            min_auto_bitrate,
            max_auto_bitrate,
            filters,
            score_tracker: MaintainabilityScoreTracker::new(),
            network_analyzer: NetworkAnalyzer::new(initial_bitrate, low_latency_mode),
            requests: PendingRequestsStore::new(),
            buffer_based_chooser: BufferBasedChooser::new(bitrates),
            guess_based_chooser: GuessBasedChooser::new(),
            prev_estimate: LastEstimate::new(),
            allow_buffer_based: false,
            buffer_based_bitrate: None,
            current_representation: None,
            last_observation: None,
        })
    }

    /// Feed a playback observation tick and get the decision for it.
    pub fn on_observation(
        &mut self,
        observation: PlaybackObservation,
        now: Instant,
    ) -> AbrEstimate {
        self.last_observation = Some(observation);
        self.current_estimate(&observation, now)
    }

    /// Feed an external event.
    ///
    /// Returns a fresh decision when the event warrants recomputing one
    /// (currently: a segment pushed to the media buffer), `None` otherwise.
    pub fn on_event(&mut self, event: StreamEvent, now: Instant) -> Option<AbrEstimate> {
        match event {
            StreamEvent::Metrics {
                duration_ms,
                size_bytes,
                representation,
                segment,
            } => {
                self.lock_bandwidth().add_sample(duration_ms, size_bytes);
                // Init segments carry no media time; segments without a
                // known duration cannot be scored either.
                if !segment.is_init && segment.duration > 0.0 {
                    self.score_tracker.add_sample(
                        &representation,
                        duration_ms / 1000.0,
                        segment.duration,
                    );
                }
                None
            }
            StreamEvent::RequestBegin {
                id,
                request_timestamp,
                representation,
                segment,
            } => {
                self.requests
                    .add(id, request_timestamp, representation, segment);
                None
            }
            StreamEvent::RequestProgress {
                id,
                size_bytes,
                total_size_bytes,
                timestamp,
                duration_ms,
            } => {
                self.requests.add_progress(
                    id,
                    RequestProgress {
                        size_bytes,
                        total_size_bytes,
                        timestamp,
                        duration_ms,
                    },
                );
                None
            }
            StreamEvent::RequestEnd { id } => {
                self.requests.remove(id);
                None
            }
            StreamEvent::RepresentationChange { representation } => {
                self.current_representation = representation;
                None
            }
            StreamEvent::AddedSegment {
                buffered,
                representation,
            } => {
                let observation = self.last_observation?;
                let buffer_gap = left_range_size(&buffered, observation.current_time);
                let current_score = self
                    .score_tracker
                    .estimate(&representation)
                    .map(|(score, _)| score);
                self.buffer_based_bitrate =
                    Some(self.buffer_based_chooser.estimate(&BufferObservation {
                        buffer_gap,
                        current_bitrate: Some(representation.bitrate),
                        current_score,
                        speed: observation.speed,
                    }));
                Some(self.current_estimate(&observation, now))
            }
        }
    }

    /// Recompute a decision from the latest known inputs, e.g. after a
    /// reference cell changed. `None` before the first observation.
    pub fn refresh(&mut self, now: Instant) -> Option<AbrEstimate> {
        let observation = self.last_observation?;
        Some(self.current_estimate(&observation, now))
    }

    fn lock_bandwidth(&self) -> std::sync::MutexGuard<'_, B> {
        self.bandwidth
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The actual estimate, combining every available algorithm.
    fn current_estimate(
        &mut self,
        observation: &PlaybackObservation,
        now: Instant,
    ) -> AbrEstimate {
        if self.representations.len() == 1 {
            // A single Representation bypasses all reasoning.
            return AbrEstimate {
                bitrate: None,
                representation: self.representations[0].clone(),
                manual: false,
                urgent: true,
                known_stable_bitrate: None,
                algorithm: AbrAlgorithm::Single,
            };
        }

        let filters = self.filters.current();
        let filtered = filtered_representations(&self.representations, &filters);

        let manual_bitrate = self.manual_bitrate.get();
        if manual_bitrate >= 0.0 {
            let representation = select_optimal_representation(
                &filtered,
                manual_bitrate,
                0.0,
                f64::INFINITY,
            );
            // A manual switch should always happen immediately.
            return AbrEstimate {
                bitrate: None,
                representation,
                manual: true,
                urgent: true,
                known_stable_bitrate: None,
                algorithm: AbrAlgorithm::Manual,
            };
        }

        let min_auto_bitrate = self.min_auto_bitrate.get();
        let max_auto_bitrate = self.max_auto_bitrate.get();
        let requests = self.requests.requests();

        let analysis = {
            let mut bandwidth = self
                .bandwidth
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            self.network_analyzer.bandwidth_estimate(
                observation,
                &mut *bandwidth,
                self.current_representation.as_ref(),
                &requests,
                self.prev_estimate.bandwidth,
                now,
            )
        };

        #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
        let known_stable_bitrate = self
            .score_tracker
            .last_stable_representation()
            .map(|r| r.bitrate as f64 / observation.speed.max(1.0));

        if self.allow_buffer_based && observation.buffer_gap <= Self::BUFFER_BASED_DISABLE_GAP {
            self.allow_buffer_based = false;
        } else if !self.allow_buffer_based
            && observation.buffer_gap.is_finite()
            && observation.buffer_gap > Self::BUFFER_BASED_ENABLE_GAP
        {
            self.allow_buffer_based = true;
        }

        // The safe choice, considering only the pessimistic bandwidth
        // ceiling.
        let chosen_from_bandwidth = select_optimal_representation(
            &filtered,
            analysis.bitrate_ceiling,
            min_auto_bitrate,
            max_auto_bitrate,
        );
        let mut current_best_bitrate = chosen_from_bandwidth.bitrate;

        // The buffer-based choice is even safer but very slow to react; it
        // only ever raises the pick, and only when a comfortable buffer
        // exists.
        let mut chosen_from_buffer = None;
        if self.allow_buffer_based {
            if let Some(buffer_based_bitrate) = self.buffer_based_bitrate {
                if buffer_based_bitrate > current_best_bitrate {
                    #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
                    let representation = select_optimal_representation(
                        &filtered,
                        buffer_based_bitrate as f64,
                        min_auto_bitrate,
                        max_auto_bitrate,
                    );
                    current_best_bitrate = representation.bitrate;
                    chosen_from_buffer = Some(representation);
                }
            }
        }

        // The guess-based choice is the riskiest one, only consulted for
        // low-latency contents playing near the live edge.
        let mut chosen_from_guess = None;
        if self.low_latency_mode {
            if let Some(current) = &self.current_representation {
                let near_live_edge = observation
                    .live_gap
                    .is_none_or(|gap| gap < Self::GUESS_MAX_LIVE_GAP);
                if near_live_edge {
                    chosen_from_guess = self.guess_based_chooser.guess(
                        &self.representations,
                        observation,
                        current,
                        current_best_bitrate,
                        &requests,
                        &self.score_tracker,
                        &self.prev_estimate,
                        now,
                    );
                }
            }
        }

        if let Some(guess) = chosen_from_guess.filter(|g| g.bitrate > current_best_bitrate) {
            tracing::debug!(
                bitrate = guess.bitrate,
                id = %guess.id,
                "choosing guessed representation"
            );
            self.prev_estimate.update(
                guess.clone(),
                analysis.bandwidth_estimate,
                AbrAlgorithm::GuessBased,
            );
            let urgent = self
                .current_representation
                .as_ref()
                .is_none_or(|current| guess.bitrate < current.bitrate);
            AbrEstimate {
                bitrate: analysis.bandwidth_estimate,
                representation: guess,
                manual: false,
                urgent,
                known_stable_bitrate,
                algorithm: AbrAlgorithm::GuessBased,
            }
        } else if let Some(representation) = chosen_from_buffer {
            tracing::debug!(
                bitrate = representation.bitrate,
                id = %representation.id,
                "choosing representation from buffer occupancy"
            );
            self.prev_estimate.update(
                representation.clone(),
                analysis.bandwidth_estimate,
                AbrAlgorithm::BufferBased,
            );
            let urgent = self.network_analyzer.is_urgent(
                representation.bitrate,
                self.current_representation.as_ref(),
                &requests,
                observation,
                now,
            );
            AbrEstimate {
                bitrate: analysis.bandwidth_estimate,
                representation,
                manual: false,
                urgent,
                known_stable_bitrate,
                algorithm: AbrAlgorithm::BufferBased,
            }
        } else {
            tracing::debug!(
                bitrate = chosen_from_bandwidth.bitrate,
                id = %chosen_from_bandwidth.id,
                "choosing representation from bandwidth estimation"
            );
            self.prev_estimate.update(
                chosen_from_bandwidth.clone(),
                analysis.bandwidth_estimate,
                AbrAlgorithm::BandwidthBased,
            );
            let urgent = self.network_analyzer.is_urgent(
                chosen_from_bandwidth.bitrate,
                self.current_representation.as_ref(),
                &requests,
                observation,
                now,
            );
            AbrEstimate {
                bitrate: analysis.bandwidth_estimate,
                representation: chosen_from_bandwidth,
                manual: false,
                urgent,
                known_stable_bitrate,
                algorithm: AbrAlgorithm::BandwidthBased,
            }
        }
    }
}

/// Seconds of buffered media ahead of `position` in the given `(start, end)`
/// ranges, 0 when `position` falls in none of them.
fn left_range_size(buffered: &[(f64, f64)], position: f64) -> f64 {
    buffered
        .iter()
        .find(|(start, end)| position >= *start && position < *end)
        .map_or(0.0, |(_, end)| end - position)
}
