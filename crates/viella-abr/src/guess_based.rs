use std::time::Duration;

use web_time::Instant;

use crate::{
    last_estimate::LastEstimate,
    network_analyzer::estimate_request_bandwidth,
    pending_requests::RequestInfo,
    score::{MaintainabilityScoreTracker, ScoreConfidence},
    types::{AbrAlgorithm, PlaybackObservation, Representation},
};

/// Estimates which Representation should be played based on risky guesses.
///
/// The chooser attempts switching to the superior quality when conditions
/// allow it, then watches whether that quality can actually be maintained.
/// If it cannot, it rolls back to the previous maintainable one and blocks
/// further guesses for a while.
///
/// This is the riskiest strategy in terms of rebuffering chances. It is only
/// consulted where nothing else adapts fast enough, i.e. low-latency
/// contents played close to the live edge.
#[derive(Debug, Default)]
pub struct GuessBasedChooser {
    consecutive_wrong_guesses: u32,
    block_guesses_until: Option<Instant>,
    last_maintainable_bitrate: Option<u64>,
}

impl GuessBasedChooser {
    /// Seconds of buffer required before daring a guess.
    const MIN_BUFFER_GAP_FOR_GUESS: f64 = 2.5;
    /// Cooldown grows by this much per consecutive wrong guess.
    const BLOCK_STEP: Duration = Duration::from_secs(15);
    /// Cooldown cap.
    const MAX_BLOCK: Duration = Duration::from_secs(120);

    pub fn new() -> Self {
        Self::default()
    }

    /// Perform a guess: the Representation to load next according to this
    /// chooser, or `None` to fall back to the other algorithms.
    ///
    /// `representations` must be sorted by ascending bitrate.
    /// `incoming_best_bitrate` is the bitrate chosen by the most optimistic
    /// of the other algorithms for this tick.
    #[expect(clippy::too_many_arguments)] // mirrors the decision tick inputs
    pub fn guess(
        &mut self,
        representations: &[Representation],
        observation: &PlaybackObservation,
        current_representation: &Representation,
        incoming_best_bitrate: u64,
        requests: &[&RequestInfo],
        score_tracker: &MaintainabilityScoreTracker,
        prev_estimate: &LastEstimate,
        now: Instant,
    ) -> Option<Representation> {
        let buffer_gap = observation.buffer_gap;
        let speed = observation.speed;
        let last_chosen = prev_estimate.representation.as_ref()?;
        let was_guessing = prev_estimate.algorithm == Some(AbrAlgorithm::GuessBased);

        if incoming_best_bitrate > last_chosen.bitrate {
            // The other algorithms already went higher than any guess we
            // could make here.
            if was_guessing {
                self.last_maintainable_bitrate = Some(last_chosen.bitrate);
                self.consecutive_wrong_guesses = 0;
            }
            return None;
        }

        let score_data = score_tracker.estimate(current_representation);

        if !was_guessing {
            let score_data = score_data?;
            if self.can_guess_higher(buffer_gap, speed, score_data, now) {
                if let Some(next) = next_representation(representations, current_representation) {
                    return Some(next.clone());
                }
            }
            return None;
        }

        // Already in guessing mode from here on.
        if self.is_last_guess_validated(last_chosen, incoming_best_bitrate, score_data) {
            tracing::debug!(bitrate = last_chosen.bitrate, "guessed representation validated");
            self.last_maintainable_bitrate = Some(last_chosen.bitrate);
            self.consecutive_wrong_guesses = 0;
        }

        if current_representation.id != last_chosen.id {
            // Playback did not switch onto the guess yet; re-affirm it.
            return Some(last_chosen.clone());
        }

        if self.should_stop_guess(last_chosen, score_data, buffer_gap, requests, now) {
            self.consecutive_wrong_guesses += 1;
            let block = (Self::BLOCK_STEP * self.consecutive_wrong_guesses).min(Self::MAX_BLOCK);
            self.block_guesses_until = Some(now + block);
            return previous_representation(representations, current_representation);
        }

        let Some(score_data) = score_data else {
            return Some(current_representation.clone());
        };
        if self.can_guess_higher(buffer_gap, speed, score_data, now) {
            if let Some(next) = next_representation(representations, current_representation) {
                return Some(next.clone());
            }
        }
        Some(current_representation.clone())
    }

    /// Whether the situation gives enough confidence for a higher guess.
    fn can_guess_higher(
        &self,
        buffer_gap: f64,
        speed: f64,
        (score, confidence): (f64, ScoreConfidence),
        now: Instant,
    ) -> bool {
        buffer_gap.is_finite()
            && buffer_gap >= Self::MIN_BUFFER_GAP_FOR_GUESS
            && self.block_guesses_until.is_none_or(|until| now > until)
            && confidence == ScoreConfidence::High
            && score / speed > 1.01
    }

    /// Whether the pending guess seems unmaintainable and should be stopped.
    fn should_stop_guess(
        &self,
        last_guess: &Representation,
        score_data: Option<(f64, ScoreConfidence)>,
        buffer_gap: f64,
        requests: &[&RequestInfo],
        now: Instant,
    ) -> bool {
        if score_data.is_some_and(|(score, _)| score < 1.01) {
            return true;
        }
        if score_data.is_none_or(|(score, _)| score < 1.2) && buffer_gap < 0.6 {
            return true;
        }

        for request in requests
            .iter()
            .filter(|r| r.representation.id == last_guess.id)
        {
            let elapsed_ms = now
                .saturating_duration_since(request.request_timestamp)
                .as_secs_f64()
                * 1000.0;
            if request.segment.is_init {
                if elapsed_ms > 1000.0 {
                    return true;
                }
            } else if elapsed_ms > request.segment.duration * 1000.0 + 200.0 {
                return true;
            } else if let Some(fast_bandwidth) = estimate_request_bandwidth(request) {
                #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
                if fast_bandwidth < last_guess.bitrate as f64 * 0.8 {
                    return true;
                }
            }
        }
        false
    }

    /// Whether the last guess proved itself maintainable.
    fn is_last_guess_validated(
        &self,
        last_guess: &Representation,
        incoming_best_bitrate: u64,
        score_data: Option<(f64, ScoreConfidence)>,
    ) -> bool {
        if score_data.is_some_and(|(score, confidence)| {
            confidence == ScoreConfidence::High && score > 1.5
        }) {
            return true;
        }
        incoming_best_bitrate >= last_guess.bitrate
            && self
                .last_maintainable_bitrate
                .is_none_or(|bitrate| bitrate < last_guess.bitrate)
    }
}

/// The Representation with a bitrate immediately superior to the current
/// one, in a list sorted by ascending bitrate. `None` at the top of the
/// ladder or when the current id is absent.
fn next_representation<'a>(
    representations: &'a [Representation],
    current: &Representation,
) -> Option<&'a Representation> {
    let Some(index) = representations.iter().position(|r| r.id == current.id) else {
        tracing::error!(id = %current.id, "current representation not found");
        return None;
    };
    representations[index + 1..]
        .iter()
        .find(|r| r.bitrate > current.bitrate)
}

/// The Representation with a bitrate immediately inferior to the current
/// one. `None` at the bottom of the ladder or when the current id is absent.
fn previous_representation(
    representations: &[Representation],
    current: &Representation,
) -> Option<Representation> {
    let Some(index) = representations.iter().position(|r| r.id == current.id) else {
        tracing::error!(id = %current.id, "current representation not found");
        return None;
    };
    representations[..index]
        .iter()
        .rev()
        .find(|r| r.bitrate < current.bitrate)
        .cloned()
}
