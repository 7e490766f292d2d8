use crate::{ewma::Ewma, types::Representation};

/// How much evidence backs a maintainability score.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScoreConfidence {
    Low,
    High,
}

#[derive(Clone, Debug)]
struct CurrentRepresentationData {
    representation: Representation,
    ewma: Ewma,
    loaded_segments: u32,
    loaded_duration: f64,
}

/// Sustainability estimator for the Representation currently being loaded.
///
/// Each completed media-segment download contributes the ratio between the
/// segment's media duration and the time its download took: a ratio above 1
/// means the quality downloads faster than it plays, i.e. is maintainable.
/// Evidence is only kept for one Representation at a time; switching resets
/// the average.
#[derive(Debug, Default)]
pub struct MaintainabilityScoreTracker {
    current: Option<CurrentRepresentationData>,
    last_stable: Option<Representation>,
}

impl MaintainabilityScoreTracker {
    const SCORE_HALF_LIFE: f64 = 5.0;
    /// Samples needed before a score is trusted.
    const HIGH_CONFIDENCE_SEGMENTS: u32 = 5;
    /// Seconds of media needed before a score is trusted.
    const HIGH_CONFIDENCE_DURATION: f64 = 10.0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record the download metrics of one media segment.
    pub fn add_sample(
        &mut self,
        representation: &Representation,
        request_duration_secs: f64,
        segment_duration_secs: f64,
    ) {
        if request_duration_secs <= 0.0 {
            return;
        }
        let ratio = segment_duration_secs / request_duration_secs;

        match &mut self.current {
            Some(current) if current.representation.id == representation.id => {
                current.ewma.add_sample(request_duration_secs, ratio);
                current.loaded_segments += 1;
                current.loaded_duration += segment_duration_secs;
            }
            current_slot => {
                // Evidence never survives a representation switch.
                let mut ewma = Ewma::new(Self::SCORE_HALF_LIFE);
                ewma.add_sample(request_duration_secs, ratio);
                *current_slot = Some(CurrentRepresentationData {
                    representation: representation.clone(),
                    ewma,
                    loaded_segments: 1,
                    loaded_duration: segment_duration_secs,
                });
            }
        }

        let score = self.current.as_ref().map_or(0.0, |c| c.ewma.estimate());
        if score > 1.0
            && self
                .last_stable
                .as_ref()
                .is_none_or(|r| r.id != representation.id)
        {
            tracing::debug!(
                id = %representation.id,
                bitrate = representation.bitrate,
                "new last stable representation"
            );
            self.last_stable = Some(representation.clone());
        }
    }

    /// Maintainability score of the given Representation, when evidence for
    /// it exists.
    pub fn estimate(&self, representation: &Representation) -> Option<(f64, ScoreConfidence)> {
        let current = self.current.as_ref()?;
        if current.representation.id != representation.id {
            return None;
        }
        let confidence = if current.loaded_segments >= Self::HIGH_CONFIDENCE_SEGMENTS
            && current.loaded_duration >= Self::HIGH_CONFIDENCE_DURATION
        {
            ScoreConfidence::High
        } else {
            ScoreConfidence::Low
        };
        Some((current.ewma.estimate(), confidence))
    }

    /// The last Representation whose score rose above 1.
    pub fn last_stable_representation(&self) -> Option<&Representation> {
        self.last_stable.as_ref()
    }
}
