//! Adaptive Bitrate (ABR) decision engine for streaming clients.
//!
//! For each media track type, this crate continuously selects which encoded
//! quality ([`Representation`]) should be downloaded next, based on observed
//! network throughput, buffer occupancy and operator-imposed constraints
//! (manual bitrate, min/max auto bitrate, width/bitrate throttling).
//!
//! The engine is protocol-agnostic and performs no I/O: manifest parsing,
//! segment fetching and media-buffer management live elsewhere and feed it
//! through playback observations, request lifecycle events and reference
//! cells. It emits one [`AbrEstimate`] per decision tick, consumed by the
//! segment scheduler.
//!
//! ## Architecture
//!
//! - [`BandwidthEstimator`] — dual-EWMA throughput estimation from
//!   completed downloads
//! - [`NetworkAnalyzer`] — starvation detection and bandwidth-based bitrate
//!   ceiling (internal to the pipeline)
//! - [`BufferBasedChooser`] — BOLA-derived buffer-occupancy ceiling
//! - [`GuessBasedChooser`] — risky quality escalation for low-latency
//!   contents
//! - [`RepresentationEstimator`] — per-type orchestrator arbitrating
//!   between all of the above
//! - [`AbrManager`] — facade owning one pipeline context per track type
//!
//! ## Example
//!
//! ```rust
//! use viella_abr::{AbrManager, AbrOptions, PlaybackObservation, Representation, TrackType};
//! use web_time::Instant;
//!
//! let mut manager = AbrManager::new(AbrOptions::default());
//! let representations = vec![
//!     Representation::new("low", 500_000),
//!     Representation::new("mid", 1_500_000),
//!     Representation::new("high", 4_000_000),
//! ];
//! let mut pipeline = manager
//!     .representation_estimator(TrackType::Video, representations)
//!     .expect("non-empty representation list");
//!
//! // One decision per playback observation tick.
//! let estimate = pipeline.on_observation(
//!     PlaybackObservation {
//!         buffer_gap: 12.0,
//!         current_time: 0.0,
//!         speed: 1.0,
//!         duration: f64::NAN,
//!         live_gap: None,
//!     },
//!     Instant::now(),
//! );
//! assert!(!estimate.manual);
//! ```

#![forbid(unsafe_code)]

mod bandwidth;
mod buffer_based;
mod error;
mod estimator;
mod ewma;
mod guess_based;
mod last_estimate;
mod manager;
mod network_analyzer;
mod pending_requests;
mod reference;
mod score;
mod selection;
mod types;

pub use bandwidth::{BandwidthEstimator, BandwidthSource};
pub use buffer_based::{BufferBasedChooser, BufferObservation};
pub use error::{AbrError, AbrResult};
pub use estimator::{FilterSources, RepresentationEstimator, RepresentationEstimatorOptions};
pub use guess_based::GuessBasedChooser;
pub use last_estimate::LastEstimate;
pub use manager::{AbrManager, AbrOptions, AbrThrottlers};
pub use network_analyzer::{BandwidthAnalysis, NetworkAnalyzer};
pub use pending_requests::{PendingRequestsStore, RequestInfo, RequestProgress};
pub use reference::SharedRef;
pub use score::{MaintainabilityScoreTracker, ScoreConfidence};
pub use types::{
    AbrAlgorithm, AbrEstimate, AbrFilters, PlaybackObservation, Representation, RequestId,
    SegmentInfo, StreamEvent, TrackType,
};
