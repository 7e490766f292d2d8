use web_time::Instant;

use crate::{
    bandwidth::BandwidthSource,
    ewma::Ewma,
    pending_requests::{RequestInfo, RequestProgress},
    types::{PlaybackObservation, Representation},
};

/// Starvation thresholds and bitrate factors, fixed per content profile at
/// construction.
#[derive(Clone, Copy, Debug)]
struct Thresholds {
    /// Buffer gap at or under which starvation mode is entered, in seconds.
    starvation_gap: f64,
    /// Buffer gap at or above which starvation mode is left, in seconds.
    /// Strictly higher than `starvation_gap` to prevent oscillation.
    out_of_starvation_gap: f64,
    /// Bandwidth-to-bitrate ceiling factor while starving.
    starvation_factor: f64,
    /// Bandwidth-to-bitrate ceiling factor in normal operation.
    regular_factor: f64,
}

impl Thresholds {
    const REGULAR: Self = Self {
        starvation_gap: 5.0,
        out_of_starvation_gap: 7.0,
        starvation_factor: 0.72,
        regular_factor: 0.8,
    };

    // Low-latency contents play with much smaller buffers; the regular gaps
    // would keep them permanently starving.
    const LOW_LATENCY: Self = Self {
        starvation_gap: 2.5,
        out_of_starvation_gap: 4.0,
        starvation_factor: 0.72,
        regular_factor: 0.8,
    };
}

/// Result of a bandwidth analysis tick.
#[derive(Clone, Copy, Debug)]
pub struct BandwidthAnalysis {
    /// Raw bandwidth estimate in bits per second, when one exists.
    pub bandwidth_estimate: Option<f64>,
    /// Maximum bitrate a chosen Representation should have, in bits per
    /// second.
    pub bitrate_ceiling: f64,
}

/// Analyzes the current network conditions into a bitrate ceiling and
/// urgency verdicts.
///
/// Runs a two-state machine: NORMAL vs STARVATION. While starving (low
/// buffer lookahead far from the content end), the analyzer tries to derive
/// an emergency estimate from the single in-flight request blocking
/// playback, bypassing the long-term averages entirely.
#[derive(Debug)]
pub struct NetworkAnalyzer {
    initial_bitrate: f64,
    in_starvation_mode: bool,
    thresholds: Thresholds,
}

impl NetworkAnalyzer {
    /// Don't bother entering starvation mode when the content end is closer
    /// than this many seconds.
    const STARVATION_DURATION_DELTA: f64 = 10.0;
    /// Tolerance when matching a request to the next needed position, in
    /// seconds.
    const POSITION_TOLERANCE: f64 = 0.3;
    /// An emergency estimate is only worth acting on when the projected
    /// stall exceeds this many seconds.
    const MIN_PROJECTED_STALL: f64 = 2.0;

    pub fn new(initial_bitrate: f64, low_latency_mode: bool) -> Self {
        Self {
            initial_bitrate,
            in_starvation_mode: false,
            thresholds: if low_latency_mode {
                Thresholds::LOW_LATENCY
            } else {
                Thresholds::REGULAR
            },
        }
    }

    /// Produce the bandwidth estimate and bitrate ceiling for this tick,
    /// updating the starvation state machine on the way.
    pub fn bandwidth_estimate<B: BandwidthSource + ?Sized>(
        &mut self,
        observation: &PlaybackObservation,
        estimator: &mut B,
        current_representation: Option<&Representation>,
        requests: &[&RequestInfo],
        last_estimated_bitrate: Option<f64>,
        now: Instant,
    ) -> BandwidthAnalysis {
        let thresholds = self.thresholds;
        let PlaybackObservation {
            buffer_gap,
            current_time,
            duration,
            speed,
            ..
        } = *observation;

        // Starvation transitions are suppressed near the content end, where
        // a small lookahead is expected.
        if duration.is_nan()
            || buffer_gap + current_time < duration - Self::STARVATION_DURATION_DELTA
        {
            if !self.in_starvation_mode && buffer_gap <= thresholds.starvation_gap {
                tracing::info!(buffer_gap, "entering starvation mode");
                self.in_starvation_mode = true;
            } else if self.in_starvation_mode && buffer_gap >= thresholds.out_of_starvation_gap {
                tracing::info!(buffer_gap, "leaving starvation mode");
                self.in_starvation_mode = false;
            }
        } else if self.in_starvation_mode {
            tracing::info!("leaving starvation mode (content end is near)");
            self.in_starvation_mode = false;
        }

        let mut bandwidth_estimate = None;
        let mut bitrate_ceiling = None;

        // While starving, a quick estimate from the blocking request
        // supersedes all accumulated history.
        if self.in_starvation_mode {
            if let Some(emergency) = estimate_starvation_mode_bitrate(
                requests,
                observation,
                current_representation,
                last_estimated_bitrate,
                now,
            ) {
                tracing::info!(emergency, "starvation mode emergency estimate");
                estimator.reset();
                bandwidth_estimate = Some(emergency);
                bitrate_ceiling = Some(match current_representation {
                    #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
                    Some(representation) => emergency.min(representation.bitrate as f64),
                    None => emergency,
                });
            }
        }

        let bitrate_ceiling = bitrate_ceiling.unwrap_or_else(|| {
            let factor = if self.in_starvation_mode {
                thresholds.starvation_factor
            } else {
                thresholds.regular_factor
            };
            match estimator.estimate() {
                Some(estimate) => {
                    bandwidth_estimate = Some(estimate);
                    estimate * factor
                }
                None => last_estimated_bitrate.unwrap_or(self.initial_bitrate) * factor,
            }
        });

        let bitrate_ceiling = if speed > 1.0 {
            bitrate_ceiling / speed
        } else {
            bitrate_ceiling
        };

        BandwidthAnalysis {
            bandwidth_estimate,
            bitrate_ceiling,
        }
    }

    /// For a wanted bitrate, tells if the switch should happen immediately
    /// (aborting in-flight requests) instead of waiting for them to finish.
    pub fn is_urgent(
        &self,
        bitrate: u64,
        current_representation: Option<&Representation>,
        requests: &[&RequestInfo],
        observation: &PlaybackObservation,
        now: Instant,
    ) -> bool {
        let Some(current) = current_representation else {
            return true;
        };
        if bitrate == current.bitrate {
            return false;
        }
        if bitrate > current.bitrate {
            // Upgrades can wait; while starving they must.
            return !self.in_starvation_mode;
        }
        should_directly_switch_to_low_bitrate(
            observation,
            requests,
            self.thresholds.starvation_gap,
            now,
        )
    }
}

/// The pending request covering the position playback will reach next,
/// provided exactly one request covers it.
fn concerned_request<'a>(
    requests: &[&'a RequestInfo],
    needed_position: f64,
) -> Option<&'a RequestInfo> {
    let mut matching = requests.iter().filter(|request| {
        let segment = request.segment;
        segment.duration > 0.0
            && segment.time + segment.duration > needed_position
            && needed_position - segment.time > -NetworkAnalyzer::POSITION_TOLERANCE
    });
    let found = matching.next()?;
    if matching.next().is_some() {
        // Several overlapping candidates: no single request can be blamed.
        return None;
    }
    Some(found)
}

/// Estimate the very recent bandwidth from a single unfinished request's
/// progress events. Useful when throughput seems to have fallen quickly.
pub(crate) fn estimate_request_bandwidth(request: &RequestInfo) -> Option<f64> {
    if request.progress.len() < 2 {
        return None;
    }
    let mut ewma = Ewma::new(2.0);
    let mut sampled = false;
    for pair in request.progress.windows(2) {
        let bytes_downloaded = pair[1].size_bytes.saturating_sub(pair[0].size_bytes);
        let time_elapsed = pair[1]
            .timestamp
            .saturating_duration_since(pair[0].timestamp)
            .as_secs_f64();
        if time_elapsed <= 0.0 {
            continue;
        }
        #[expect(clippy::cast_precision_loss)] // sizes are far below 2^52
        let bitrate = bytes_downloaded as f64 * 8.0 / time_elapsed;
        ewma.add_sample(time_elapsed, bitrate);
        sampled = true;
    }
    sampled.then(|| ewma.estimate())
}

/// Remaining download time for a pending request, from its last progress
/// event and a bandwidth estimate, in seconds.
fn estimate_remaining_time(last_progress: &RequestProgress, bandwidth_estimate: f64) -> f64 {
    #[expect(clippy::cast_precision_loss)] // sizes are far below 2^52
    let remaining_bits =
        last_progress.total_size_bytes.saturating_sub(last_progress.size_bytes) as f64 * 8.0;
    (remaining_bits / bandwidth_estimate).max(0.0)
}

/// Check whether the request for the most needed segment is too slow and,
/// if so, derive an emergency bitrate from it.
fn estimate_starvation_mode_bitrate(
    requests: &[&RequestInfo],
    observation: &PlaybackObservation,
    current_representation: Option<&Representation>,
    last_estimated_bitrate: Option<f64>,
    now: Instant,
) -> Option<f64> {
    let next_needed_position = observation.current_time + observation.buffer_gap;
    let concerned = concerned_request(requests, next_needed_position)?;
    let segment_duration = concerned.segment.duration;

    // First try a quick estimate from the progress events.
    let quick_estimate = estimate_request_bandwidth(concerned);
    if let (Some(last_progress), Some(bandwidth)) = (concerned.progress.last(), quick_estimate) {
        let remaining_time = estimate_remaining_time(last_progress, bandwidth) * 1.2;
        let since_last_progress = now
            .saturating_duration_since(last_progress.timestamp)
            .as_secs_f64();
        // Only trust it when the prediction is still plausible and
        // finishing the request as-is would stall playback noticeably.
        if since_last_progress <= remaining_time
            && remaining_time
                > observation.buffer_gap / observation.speed + NetworkAnalyzer::MIN_PROJECTED_STALL
        {
            return Some(bandwidth);
        }
    }

    // Otherwise fall back to a time-overrun heuristic on the request as a
    // whole.
    let request_elapsed_time = now
        .saturating_duration_since(concerned.request_timestamp)
        .as_secs_f64();
    let reasonable_elapsed_time =
        request_elapsed_time <= (segment_duration * 1.5 + 1.0) / observation.speed;
    let current = current_representation?;
    if reasonable_elapsed_time {
        return None;
    }

    #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
    let reduced_bitrate =
        current.bitrate as f64 * (segment_duration / request_elapsed_time).min(0.7);
    // Only ever correct downwards: an overrun must not raise the estimate.
    last_estimated_bitrate
        .is_none_or(|last| reduced_bitrate < last)
        .then_some(reduced_bitrate)
}

/// Whether a downward switch should abort the in-flight request covering the
/// next needed position, based on how that request is progressing.
fn should_directly_switch_to_low_bitrate(
    observation: &PlaybackObservation,
    requests: &[&RequestInfo],
    starvation_gap: f64,
    now: Instant,
) -> bool {
    let next_needed_position = observation.current_time + observation.buffer_gap;
    let Some(next_needed_request) = requests
        .iter()
        .find(|r| r.segment.time + r.segment.duration > next_needed_position)
    else {
        return true;
    };

    let Some(last_progress) = next_needed_request.progress.last() else {
        return true;
    };
    let Some(bandwidth_estimate) = estimate_request_bandwidth(next_needed_request) else {
        return true;
    };

    let remaining_time = estimate_remaining_time(last_progress, bandwidth_estimate);
    let since_last_progress = now
        .saturating_duration_since(last_progress.timestamp)
        .as_secs_f64();
    let on_track = since_last_progress <= remaining_time * 1.2
        && remaining_time < observation.buffer_gap / observation.speed + starvation_gap;
    !on_track
}
