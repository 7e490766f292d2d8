use web_time::Instant;

/// Kind of media track an estimate pipeline works for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrackType {
    Audio,
    Video,
    Text,
    Image,
}

/// One encoded quality of a track.
///
/// Identity is carried by `id` and must stay stable for the lifetime of the
/// pipeline. Several algorithms rely on ascending-bitrate ordering; the
/// engine sorts defensively at construction, callers don't have to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Representation {
    /// Stable identifier of this quality.
    pub id: String,
    /// Advertised bitrate, in bits per second.
    pub bitrate: u64,
    /// Video width in pixels, when known.
    pub width: Option<u32>,
    /// Video height in pixels, when known.
    pub height: Option<u32>,
}

impl Representation {
    /// Create a Representation without resolution metadata.
    pub fn new(id: impl Into<String>, bitrate: u64) -> Self {
        Self {
            id: id.into(),
            bitrate,
            width: None,
            height: None,
        }
    }

    /// Set the video resolution.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// Snapshot of the playback conditions, produced by the playback observer
/// at a regular sampling interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackObservation {
    /// Seconds of already-buffered, unplayed media ahead of the playback
    /// position. May be `f64::INFINITY` when the whole content is buffered.
    pub buffer_gap: f64,
    /// Current playback position, in seconds.
    pub current_time: f64,
    /// Playback rate. Always strictly positive.
    pub speed: f64,
    /// Total content duration in seconds. `f64::NAN` when unknown
    /// (e.g. live contents).
    pub duration: f64,
    /// Distance to the live edge in seconds, when playing a live content.
    /// `None` for VOD or when the edge position is unknown.
    pub live_gap: Option<f64>,
}

/// Position and nature of a media segment, as known by the request layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentInfo {
    /// Start position of the segment, in seconds.
    pub time: f64,
    /// Duration of the segment, in seconds. `0.0` when unknown (e.g. for
    /// initialization segments).
    pub duration: f64,
    /// `true` for an initialization segment.
    pub is_init: bool,
}

/// Unique identifier attributed to a segment request by the request layer.
pub type RequestId = u64;

/// Events produced by external collaborators (request layer, media buffer,
/// stream orchestration) which the decision engine reacts to.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A segment download completed and its network metrics are known.
    Metrics {
        /// Time the request took, in milliseconds.
        duration_ms: f64,
        /// Downloaded payload size, in bytes.
        size_bytes: u64,
        /// Representation the segment belongs to.
        representation: Representation,
        /// The downloaded segment.
        segment: SegmentInfo,
    },
    /// A segment request was just sent.
    RequestBegin {
        id: RequestId,
        /// Monotonic timestamp at which the request was sent.
        request_timestamp: Instant,
        representation: Representation,
        segment: SegmentInfo,
    },
    /// Partial-download progress on a pending request.
    RequestProgress {
        id: RequestId,
        /// Bytes downloaded so far.
        size_bytes: u64,
        /// Expected total size of the segment, in bytes.
        total_size_bytes: u64,
        /// Monotonic timestamp at which this progress was observed.
        timestamp: Instant,
        /// Time elapsed since the request began, in milliseconds.
        duration_ms: f64,
    },
    /// A pending request finished, failed or was cancelled.
    RequestEnd { id: RequestId },
    /// The representation now being loaded by the scheduler changed.
    ///
    /// This feeds the "current representation" used on the next decision,
    /// decoupled from the engine's own output.
    RepresentationChange {
        representation: Option<Representation>,
    },
    /// A segment was pushed to the media buffer.
    AddedSegment {
        /// Buffered time ranges after the push, as `(start, end)` pairs in
        /// seconds.
        buffered: Vec<(f64, f64)>,
        /// Representation of the pushed segment.
        representation: Representation,
    },
}

/// Which algorithm produced an estimate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbrAlgorithm {
    /// Only one Representation was available, no choice to make.
    Single,
    /// A manual bitrate lock is in place.
    Manual,
    /// Chosen from the network bandwidth ceiling.
    BandwidthBased,
    /// Chosen from the buffer-occupancy level table.
    BufferBased,
    /// Chosen by the risky quality-escalation algorithm.
    GuessBased,
}

/// Output of the decision engine: which Representation should be loaded
/// next, and with which urgency.
#[derive(Clone, Debug, PartialEq)]
pub struct AbrEstimate {
    /// Last network bandwidth estimate, in bits per second. `None` when no
    /// bandwidth information is available yet.
    pub bitrate: Option<f64>,
    /// The chosen Representation.
    pub representation: Representation,
    /// `true` when the choice comes from a manual bitrate lock.
    pub manual: bool,
    /// `true` when an in-flight request of another quality should be
    /// aborted immediately rather than finished.
    pub urgent: bool,
    /// Bitrate of the last Representation known to be sustainable, scaled
    /// by the playback rate. Informational only.
    pub known_stable_bitrate: Option<f64>,
    /// Which algorithm made this choice.
    pub algorithm: AbrAlgorithm,
}

/// Pool restriction merged from the currently-active throttling sources.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AbrFilters {
    /// Keep only Representations at or under this bitrate, in bits per
    /// second (the lowest one always stays selectable).
    pub bitrate: Option<f64>,
    /// Restrict Representations to those fitting this display width.
    pub width: Option<u32>,
}
