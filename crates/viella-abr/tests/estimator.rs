#![forbid(unsafe_code)]

//! End-to-end tests of the per-type decision pipeline: events in,
//! `AbrEstimate` out.

use std::sync::{Arc, Mutex};

use rstest::{fixture, rstest};
use viella_abr::{
    AbrAlgorithm, BandwidthEstimator, FilterSources, PlaybackObservation, Representation,
    RepresentationEstimator, RepresentationEstimatorOptions, SegmentInfo, SharedRef, StreamEvent,
};
use web_time::Instant;

// ==================== Fixtures ====================

#[fixture]
fn tracing_setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::default().add_directive("warn".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

fn ladder() -> Vec<Representation> {
    vec![
        Representation::new("low", 300_000),
        Representation::new("mid", 1_000_000),
        Representation::new("high", 2_000_000),
    ]
}

struct Harness {
    pipeline: RepresentationEstimator,
    manual_bitrate: SharedRef<f64>,
    min_auto_bitrate: SharedRef<f64>,
    max_auto_bitrate: SharedRef<f64>,
}

fn harness(representations: Vec<Representation>, low_latency_mode: bool) -> Harness {
    harness_with_filters(representations, low_latency_mode, FilterSources::default())
}

fn harness_with_filters(
    representations: Vec<Representation>,
    low_latency_mode: bool,
    filters: FilterSources,
) -> Harness {
    let manual_bitrate = SharedRef::new(-1.0);
    let min_auto_bitrate = SharedRef::new(0.0);
    let max_auto_bitrate = SharedRef::new(f64::INFINITY);
    let pipeline = RepresentationEstimator::new(RepresentationEstimatorOptions {
        representations,
        initial_bitrate: 0.0,
        low_latency_mode,
        bandwidth: Arc::new(Mutex::new(BandwidthEstimator::new())),
        manual_bitrate: manual_bitrate.clone(),
        min_auto_bitrate: min_auto_bitrate.clone(),
        max_auto_bitrate: max_auto_bitrate.clone(),
        filters,
    })
    .expect("non-empty representation list");
    Harness {
        pipeline,
        manual_bitrate,
        min_auto_bitrate,
        max_auto_bitrate,
    }
}

fn observation(buffer_gap: f64) -> PlaybackObservation {
    PlaybackObservation {
        buffer_gap,
        current_time: 0.0,
        speed: 1.0,
        duration: f64::NAN,
        live_gap: None,
    }
}

/// Metrics event for a completed 4s media segment.
fn metrics(representation: &Representation, duration_ms: f64, size_bytes: u64) -> StreamEvent {
    StreamEvent::Metrics {
        duration_ms,
        size_bytes,
        representation: representation.clone(),
        segment: SegmentInfo {
            time: 0.0,
            duration: 4.0,
            is_init: false,
        },
    }
}

/// Warm the bandwidth estimator up to a stable 1.6Mbps.
fn warm_bandwidth(pipeline: &mut RepresentationEstimator, representation: &Representation) {
    let now = Instant::now();
    for _ in 0..6 {
        // 400kB over 2s each: 1.6Mbps, and a 2.0 maintainability ratio.
        pipeline.on_event(metrics(representation, 2000.0, 400_000), now);
    }
}

// ==================== Single representation / manual ====================

#[rstest]
fn single_representation_bypasses_all_reasoning(#[from(tracing_setup)] _tracing: ()) {
    let mut harness = harness(vec![Representation::new("only", 800_000)], false);

    for gap in [0.5, 40.0, f64::INFINITY] {
        let estimate = harness
            .pipeline
            .on_observation(observation(gap), Instant::now());
        assert!(estimate.urgent);
        assert!(!estimate.manual);
        assert_eq!(estimate.algorithm, AbrAlgorithm::Single);
        assert_eq!(estimate.representation.id, "only");
    }
}

#[rstest]
#[case(500_000.0, "mid2")] // exact match
#[case(750_000.0, "mid2")] // highest at or under
#[case(50_000.0, "low2")] // fallback to lowest
fn manual_mode_picks_the_highest_at_or_under(
    #[from(tracing_setup)] _tracing: (),
    #[case] manual: f64,
    #[case] expected: &str,
) {
    let representations = vec![
        Representation::new("low2", 100_000),
        Representation::new("mid2", 500_000),
        Representation::new("high2", 1_000_000),
    ];
    let mut harness = harness(representations, false);
    harness.manual_bitrate.set(manual);

    let estimate = harness
        .pipeline
        .on_observation(observation(10.0), Instant::now());
    assert_eq!(estimate.representation.id, expected);
    assert!(estimate.manual);
    assert!(estimate.urgent, "manual switches always happen immediately");
    assert_eq!(estimate.algorithm, AbrAlgorithm::Manual);
}

// ==================== Bandwidth-driven auto mode ====================

#[rstest]
fn bandwidth_estimation_drives_the_auto_choice(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);

    // Before any metrics: no bandwidth figure, lowest quality.
    let estimate = harness
        .pipeline
        .on_observation(observation(15.0), Instant::now());
    assert_eq!(estimate.bitrate, None);
    assert_eq!(estimate.representation.id, "low");
    assert!(estimate.urgent, "no current representation yet");

    warm_bandwidth(&mut harness.pipeline, &representations[1]);

    // 1.6Mbps * 0.8 = 1.28Mbps ceiling: "mid" fits, "high" does not.
    let estimate = harness
        .pipeline
        .on_observation(observation(15.0), Instant::now());
    assert_eq!(estimate.representation.id, "mid");
    assert_eq!(estimate.algorithm, AbrAlgorithm::BandwidthBased);
    let bitrate = estimate.bitrate.expect("bandwidth is warmed up");
    assert!((bitrate - 1_600_000.0).abs() < 1.0);
}

#[rstest]
fn starvation_tightens_the_ceiling(#[from(tracing_setup)] _tracing: ()) {
    // A 1.2Mbps rung fits the regular ceiling (1.6M * 0.8 = 1.28M) but not
    // the starved one (1.6M * 0.72 = 1.152M).
    let representations = vec![
        Representation::new("low", 300_000),
        Representation::new("edge", 1_200_000),
    ];
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    let relaxed = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(relaxed.representation.id, "edge");

    let starved = harness.pipeline.on_observation(observation(3.0), now);
    assert_eq!(starved.representation.id, "low");

    // Gaps between the entry and exit thresholds keep the tight ceiling.
    let oscillating = harness.pipeline.on_observation(observation(6.5), now);
    assert_eq!(oscillating.representation.id, "low");

    let recovered = harness.pipeline.on_observation(observation(7.5), now);
    assert_eq!(recovered.representation.id, "edge");
}

#[rstest]
fn identical_ticks_produce_identical_estimates(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    let first = harness.pipeline.on_observation(observation(15.0), now);
    let second = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(first, second);
}

#[rstest]
fn current_representation_feeds_the_next_tick_urgency(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(estimate.representation.id, "mid");
    assert!(estimate.urgent, "nothing is loading yet");

    harness.pipeline.on_event(
        StreamEvent::RepresentationChange {
            representation: Some(representations[1].clone()),
        },
        now,
    );
    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(estimate.representation.id, "mid");
    assert!(
        !estimate.urgent,
        "already loading the chosen representation"
    );
}

#[rstest]
fn known_stable_bitrate_reports_the_sustained_quality(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);

    let estimate = harness
        .pipeline
        .on_observation(observation(15.0), Instant::now());
    assert_eq!(estimate.known_stable_bitrate, Some(1_000_000.0));

    // Playback rate above 1 scales it down; below 1 does not inflate it.
    let mut fast = observation(15.0);
    fast.speed = 2.0;
    let estimate = harness.pipeline.on_observation(fast, Instant::now());
    assert_eq!(estimate.known_stable_bitrate, Some(500_000.0));

    let mut slow = observation(15.0);
    slow.speed = 0.5;
    let estimate = harness.pipeline.on_observation(slow, Instant::now());
    assert_eq!(estimate.known_stable_bitrate, Some(1_000_000.0));
}

// ==================== Min/max/filters ====================

#[rstest]
fn max_auto_bitrate_caps_the_choice(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(estimate.representation.id, "mid");

    harness.max_auto_bitrate.set(800_000.0);
    let estimate = harness
        .pipeline
        .refresh(now)
        .expect("an observation was already made");
    assert_eq!(estimate.representation.id, "low");
}

#[rstest]
fn min_auto_bitrate_lifts_the_choice(#[from(tracing_setup)] _tracing: ()) {
    let mut harness = harness(ladder(), false);
    let now = Instant::now();

    // No bandwidth knowledge would pick "low"; the floor lifts it.
    harness.min_auto_bitrate.set(1_500_000.0);
    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(estimate.representation.id, "mid");
}

#[rstest]
fn width_limit_restricts_the_pool_until_lifted(#[from(tracing_setup)] _tracing: ()) {
    let representations = vec![
        Representation::new("sd", 300_000).with_resolution(640, 360),
        Representation::new("hd", 1_000_000).with_resolution(1280, 720),
        Representation::new("fhd", 2_000_000).with_resolution(1920, 1080),
    ];
    let limit_width = SharedRef::new(Some(640u32));
    let filters = FilterSources {
        limit_width: Some(limit_width.clone()),
        throttle_bitrate: None,
        throttle: None,
    };
    let mut harness = harness_with_filters(representations.clone(), false, filters);
    warm_bandwidth(&mut harness.pipeline, &representations[0]);
    let now = Instant::now();

    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(estimate.representation.id, "sd", "640px display fits sd only");

    // Lifting the limit is picked up on the next recomputation.
    limit_width.set(None);
    let estimate = harness.pipeline.refresh(now).unwrap();
    assert_eq!(estimate.representation.id, "hd");
}

// ==================== Buffer-based estimates ====================

#[rstest]
fn buffer_based_estimates_gate_on_the_buffer_gap(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    // Enable buffer-based estimates (gap > 10) and push a segment with a
    // comfortable buffer: the chooser may climb past the bandwidth pick.
    harness.pipeline.on_observation(observation(30.0), now);
    let estimate = harness
        .pipeline
        .on_event(
            StreamEvent::AddedSegment {
                buffered: vec![(0.0, 30.0)],
                representation: representations[1].clone(),
            },
            now,
        )
        .expect("added segments recompute the estimate");
    assert_eq!(estimate.representation.id, "high");
    assert_eq!(estimate.algorithm, AbrAlgorithm::BufferBased);

    // Under 5s of buffer the buffer-based mode shuts off again.
    let estimate = harness.pipeline.on_observation(observation(4.0), now);
    assert_eq!(estimate.algorithm, AbrAlgorithm::BandwidthBased);

    // Between the two thresholds it stays off (hysteresis).
    let estimate = harness.pipeline.on_observation(observation(8.0), now);
    assert_eq!(estimate.algorithm, AbrAlgorithm::BandwidthBased);

    // Only crossing the upper threshold re-enables it.
    let estimate = harness.pipeline.on_observation(observation(12.0), now);
    assert_eq!(estimate.algorithm, AbrAlgorithm::BufferBased);
    assert_eq!(estimate.representation.id, "high");
}

#[rstest]
fn buffer_based_suggestion_never_lowers_the_pick(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    harness.pipeline.on_observation(observation(30.0), now);
    // A thin buffered range suggests a low bitrate; the bandwidth-based
    // "mid" pick must win.
    let estimate = harness
        .pipeline
        .on_event(
            StreamEvent::AddedSegment {
                buffered: vec![(0.0, 2.0)],
                representation: representations[1].clone(),
            },
            now,
        )
        .unwrap();
    assert_eq!(estimate.representation.id, "mid");
    assert_eq!(estimate.algorithm, AbrAlgorithm::BandwidthBased);
}

// ==================== Guess-based escalation ====================

#[rstest]
fn low_latency_contents_may_escalate_past_the_ceiling(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), true);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    harness.pipeline.on_event(
        StreamEvent::RepresentationChange {
            representation: Some(representations[1].clone()),
        },
        now,
    );

    // First tick: bandwidth-based "mid" (this also seeds the previous
    // estimate the guesser builds upon).
    let mut obs = observation(3.0);
    obs.live_gap = Some(10.0);
    let first = harness.pipeline.on_observation(obs, now);
    assert_eq!(first.representation.id, "mid");
    assert_eq!(first.algorithm, AbrAlgorithm::BandwidthBased);

    // Second tick: the maintainability score of "mid" is high and the
    // buffer covers the guess margin, so the guesser dares "high".
    let second = harness.pipeline.on_observation(obs, now);
    assert_eq!(second.representation.id, "high");
    assert_eq!(second.algorithm, AbrAlgorithm::GuessBased);
    assert!(!second.urgent, "an escalation guess never aborts requests");
}

#[rstest]
fn guesses_are_never_made_for_regular_contents(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    harness.pipeline.on_event(
        StreamEvent::RepresentationChange {
            representation: Some(representations[1].clone()),
        },
        now,
    );
    harness.pipeline.on_observation(observation(3.0), now);
    let second = harness.pipeline.on_observation(observation(3.0), now);
    assert_eq!(second.representation.id, "mid");
    assert_eq!(second.algorithm, AbrAlgorithm::BandwidthBased);
}

#[rstest]
fn far_from_the_live_edge_no_guess_is_made(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), true);
    warm_bandwidth(&mut harness.pipeline, &representations[1]);
    let now = Instant::now();

    harness.pipeline.on_event(
        StreamEvent::RepresentationChange {
            representation: Some(representations[1].clone()),
        },
        now,
    );
    let mut obs = observation(3.0);
    obs.live_gap = Some(120.0);
    harness.pipeline.on_observation(obs, now);
    let second = harness.pipeline.on_observation(obs, now);
    assert_eq!(second.algorithm, AbrAlgorithm::BandwidthBased);
}

// ==================== Defensive event handling ====================

#[rstest]
fn stray_request_events_are_tolerated(#[from(tracing_setup)] _tracing: ()) {
    let mut harness = harness(ladder(), false);
    let now = Instant::now();

    harness
        .pipeline
        .on_event(StreamEvent::RequestEnd { id: 99 }, now);
    harness.pipeline.on_event(
        StreamEvent::RequestProgress {
            id: 99,
            size_bytes: 1000,
            total_size_bytes: 2000,
            timestamp: now,
            duration_ms: 50.0,
        },
        now,
    );

    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert_eq!(estimate.representation.id, "low");
}

#[rstest]
fn init_segments_do_not_feed_the_score(#[from(tracing_setup)] _tracing: ()) {
    let representations = ladder();
    let mut harness = harness(representations.clone(), false);
    let now = Instant::now();

    // Init segments feed bandwidth only: 6 inits at 1.6Mbps...
    for _ in 0..6 {
        harness.pipeline.on_event(
            StreamEvent::Metrics {
                duration_ms: 2000.0,
                size_bytes: 400_000,
                representation: representations[1].clone(),
                segment: SegmentInfo {
                    time: 0.0,
                    duration: 0.0,
                    is_init: true,
                },
            },
            now,
        );
    }
    let estimate = harness.pipeline.on_observation(observation(15.0), now);
    assert!(estimate.bitrate.is_some(), "bandwidth was fed");
    assert_eq!(
        estimate.known_stable_bitrate, None,
        "the score tracker was not"
    );
}
