use std::collections::HashMap;

use web_time::Instant;

use crate::types::{Representation, RequestId, SegmentInfo};

/// Progress notification attached to a pending request.
#[derive(Clone, Copy, Debug)]
pub struct RequestProgress {
    /// Bytes downloaded so far.
    pub size_bytes: u64,
    /// Expected total size of the segment, in bytes.
    pub total_size_bytes: u64,
    /// When this progress was observed.
    pub timestamp: Instant,
    /// Time elapsed since the request began, in milliseconds.
    pub duration_ms: f64,
}

/// Everything known about one in-flight segment request.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    /// Representation the requested segment belongs to.
    pub representation: Representation,
    /// The requested segment.
    pub segment: SegmentInfo,
    /// When the request was sent.
    pub request_timestamp: Instant,
    /// Progress notifications received so far, in arrival order.
    pub progress: Vec<RequestProgress>,
}

/// Registry of in-flight segment requests and their progress.
///
/// Events referencing unknown request ids are tolerated: they are logged and
/// ignored, never fatal. The request layer owns retries and cancellation;
/// this store only mirrors what it is told.
#[derive(Debug, Default)]
pub struct PendingRequestsStore {
    current_requests: HashMap<RequestId, RequestInfo>,
}

impl PendingRequestsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request.
    pub fn add(
        &mut self,
        id: RequestId,
        request_timestamp: Instant,
        representation: Representation,
        segment: SegmentInfo,
    ) {
        self.current_requests.insert(
            id,
            RequestInfo {
                representation,
                segment,
                request_timestamp,
                progress: Vec::new(),
            },
        );
    }

    /// Record the progress of a pending request.
    pub fn add_progress(&mut self, id: RequestId, progress: RequestProgress) {
        let Some(request) = self.current_requests.get_mut(&id) else {
            tracing::warn!(id, "progress for a request not added");
            return;
        };
        request.progress.push(progress);
    }

    /// Remove a request previously set as pending.
    pub fn remove(&mut self, id: RequestId) {
        if self.current_requests.remove(&id).is_none() {
            tracing::warn!(id, "can't remove unknown request");
        }
    }

    /// All pending requests, in the chronological order of their segments.
    pub fn requests(&self) -> Vec<&RequestInfo> {
        let mut requests: Vec<&RequestInfo> = self.current_requests.values().collect();
        requests.sort_by(|a, b| a.segment.time.total_cmp(&b.segment.time));
        requests
    }
}
