use crate::types::{AbrFilters, Representation};

/// Restrict a pool to the Representations under a bitrate ceiling.
///
/// The lowest Representation always stays selectable, even above the
/// ceiling. `representations` must be sorted by ascending bitrate.
fn filter_by_bitrate(representations: &[Representation], bitrate: f64) -> Vec<Representation> {
    let Some(lowest) = representations.first() else {
        return Vec::new();
    };
    #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
    let bitrate_ceiling = bitrate.max(lowest.bitrate as f64);
    representations
        .iter()
        .filter(|r| {
            #[expect(clippy::cast_precision_loss)]
            let b = r.bitrate as f64;
            b <= bitrate_ceiling
        })
        .cloned()
        .collect()
}

/// Restrict a pool to the Representations fitting a display width.
///
/// The smallest width at or above the limit is kept (so upscaling never
/// happens), together with everything under it. Representations without
/// width information always pass.
fn filter_by_width(representations: &[Representation], width: u32) -> Vec<Representation> {
    let max_width = representations
        .iter()
        .filter_map(|r| r.width)
        .filter(|w| *w >= width)
        .min();
    let Some(max_width) = max_width else {
        return representations.to_vec();
    };
    representations
        .iter()
        .filter(|r| r.width.is_none_or(|w| w <= max_width))
        .cloned()
        .collect()
}

/// Apply the currently-active filters to the pool.
pub(crate) fn filtered_representations(
    representations: &[Representation],
    filters: &AbrFilters,
) -> Vec<Representation> {
    let mut filtered = match filters.bitrate {
        Some(bitrate) => filter_by_bitrate(representations, bitrate),
        None => representations.to_vec(),
    };
    if let Some(width) = filters.width {
        filtered = filter_by_width(&filtered, width);
    }
    filtered
}

/// The best Representation for a wanted bitrate: the highest one at or
/// under `optimal_bitrate` clamped into `[min_bitrate, max_bitrate]`, or the
/// lowest of the pool when none qualifies.
///
/// `representations` must be sorted by ascending bitrate and non-empty.
pub(crate) fn select_optimal_representation(
    representations: &[Representation],
    optimal_bitrate: f64,
    min_bitrate: f64,
    max_bitrate: f64,
) -> Representation {
    let wanted_bitrate = optimal_bitrate.clamp(min_bitrate, max_bitrate);
    let first_index_too_high = representations.iter().position(|r| {
        #[expect(clippy::cast_precision_loss)] // bitrates are far below 2^52
        let b = r.bitrate as f64;
        b > wanted_bitrate
    });
    match first_index_too_high {
        None => representations[representations.len() - 1].clone(),
        Some(0) => representations[0].clone(),
        Some(i) => representations[i - 1].clone(),
    }
}
