/// Inputs of a buffer-occupancy-based estimation.
#[derive(Clone, Copy, Debug)]
pub struct BufferObservation {
    /// Seconds of buffered media ahead of the playback position.
    pub buffer_gap: f64,
    /// Bitrate of the Representation the last segment was pushed for.
    pub current_bitrate: Option<u64>,
    /// Maintainability score of that Representation, when known.
    pub current_score: Option<f64>,
    /// Playback rate.
    pub speed: f64,
}

/// Minimum buffer level, in seconds, required before each bitrate of an
/// ascending ladder may be picked.
///
/// Derived from the BOLA utility model: each bitrate gets a logarithmic
/// utility normalized so the lowest one is worth 1, and the closed-form
/// crossover point between adjacent bitrates plus a fixed safety offset
/// becomes that bitrate's minimum level. The lowest bitrate is always
/// allowed (`level[0] == 0`), and duplicated bitrates share their
/// predecessor's level.
fn buffer_levels(bitrates: &[u64]) -> Vec<f64> {
    /// Seconds added to every crossover point, so a freshly-reached level
    /// is not abandoned on the first hiccup.
    const LEVEL_SAFETY_OFFSET: f64 = 4.0;

    fn min_buffer_level(
        bitrates: &[u64],
        utilities: &[f64],
        gp: f64,
        vp: f64,
        index: usize,
    ) -> f64 {
        if index == 0 {
            return 0.0;
        }
        let i = index.clamp(1, bitrates.len() - 1);
        if bitrates[i] == bitrates[i - 1] {
            return min_buffer_level(bitrates, utilities, gp, vp, index - 1);
        }
        #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
        let (bitrate, prev_bitrate) = (bitrates[i] as f64, bitrates[i - 1] as f64);
        let (utility, prev_utility) = (utilities[i], utilities[i - 1]);
        vp * (gp + (bitrate * prev_utility - prev_bitrate * utility) / (bitrate - prev_bitrate))
            + LEVEL_SAFETY_OFFSET
    }

    if bitrates.is_empty() {
        return Vec::new();
    }
    #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
    let logs: Vec<f64> = bitrates
        .iter()
        .map(|b| (*b as f64 / bitrates[0] as f64).ln())
        .collect();
    let utilities: Vec<f64> = logs.iter().map(|l| l - logs[0] + 1.0).collect();
    #[expect(clippy::cast_precision_loss)] // ladder sizes are tiny
    let gp = (utilities[utilities.len() - 1] - 1.0) / (bitrates.len() as f64 * 2.0 + 10.0);
    let vp = 1.0 / gp;

    (0..bitrates.len())
        .map(|i| min_buffer_level(bitrates, &utilities, gp, vp, i))
        .collect()
}

/// Chooses a bitrate from the current buffer occupancy alone.
///
/// This is a deviation of the BOLA algorithm hybridized with the
/// maintainability score: a better quality is only considered once the
/// buffer has grown past that quality's level *and* the current one proved
/// sustainable, and a worse quality is only suggested when the score casts
/// doubt on the current one.
#[derive(Debug)]
pub struct BufferBasedChooser {
    bitrates: Vec<u64>,
    levels: Vec<f64>,
}

impl BufferBasedChooser {
    /// Scores above this mean the current quality downloads comfortably
    /// faster than it plays.
    const ESCALATION_SCORE: f64 = 1.0;
    /// Scores under this leave no margin; combined with a depleted level
    /// they trigger a downgrade suggestion.
    const HOLD_SCORE: f64 = 1.15;

    /// `bitrates` must be in ascending order.
    pub fn new(bitrates: Vec<u64>) -> Self {
        let levels = buffer_levels(&bitrates);
        tracing::debug!(?bitrates, ?levels, "buffer levels computed");
        Self { bitrates, levels }
    }

    /// The bitrate the buffer occupancy alone allows, in bits per second.
    pub fn estimate(&self, observation: &BufferObservation) -> u64 {
        let Some(current_bitrate) = observation.current_bitrate else {
            return self.bitrates[0];
        };
        let Some(current_index) = self.bitrates.iter().position(|b| *b == current_bitrate) else {
            tracing::error!(current_bitrate, "current bitrate not found in the ladder");
            return self.bitrates[0];
        };

        let scaled_score = observation.current_score.map(|score| {
            if observation.speed == 0.0 {
                score
            } else {
                score / observation.speed
            }
        });

        if scaled_score.is_some_and(|s| s > Self::ESCALATION_SCORE) {
            let current_level = self.levels[current_index];
            let next_index = (current_index + 1..self.levels.len())
                .find(|i| self.levels[*i] > current_level);
            if let Some(next_index) = next_index {
                if observation.buffer_gap >= self.levels[next_index] {
                    return self.bitrates[next_index];
                }
            }
        }

        if scaled_score.is_none_or(|s| s < Self::HOLD_SCORE)
            && observation.buffer_gap < self.levels[current_index]
        {
            // The buffer no longer sustains the current level: suggest the
            // closest strictly-lower bitrate.
            return (0..current_index)
                .rev()
                .find(|i| self.bitrates[*i] < current_bitrate)
                .map_or(current_bitrate, |i| self.bitrates[i]);
        }

        current_bitrate
    }
}
