use chrono::{Datelike, Weekday};

use crate::model::*;

// ── Calendar ─────────────────────────────────────────────────────

/// Maximal runs of bookable nights inside `window`: no live booking, no
/// blocked date. Occupied stays are clamped to the window before subtraction.
pub fn open_ranges(rental: &RentalState, window: &Stay) -> Vec<Stay> {
    let mut taken: Vec<Stay> = rental
        .live_overlapping(window)
        .map(|b| clamp(&b.stay, window))
        .collect();
    taken.extend(
        rental
            .blocked_in(window)
            .filter_map(|d| d.succ_opt().map(|next| Stay::new(*d, next))),
    );
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_stays(&[*window], &taken)
}

fn clamp(stay: &Stay, window: &Stay) -> Stay {
    Stay::new(stay.start.max(window.start), stay.end.min(window.end))
}

/// Merge sorted overlapping/adjacent stays into disjoint stays.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.start <= last.end {
                last.end = last.end.max(stay.end);
                continue;
            }
        merged.push(stay);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Stay::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Stay::new(current_start, current_end));
        }
    }

    result
}

// ── Pricing ──────────────────────────────────────────────────────

/// Friday and Saturday nights are weekend nights.
pub fn is_weekend_night(date: chrono::NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Fri | Weekday::Sat)
}

pub fn price_nights(rental: &RentalState, stay: &Stay) -> Vec<NightlyRate> {
    stay.dates()
        .map(|date| {
            let weekend = is_weekend_night(date);
            let rate = match rental.weekend_rate {
                Some(w) if weekend => w,
                _ => rental.nightly_rate,
            };
            NightlyRate { date, rate, weekend }
        })
        .collect()
}

/// Sum of nightly rates. `None` on overflow.
pub fn sum_rates(nights: &[NightlyRate]) -> Option<Cents> {
    nights.iter().try_fold(0 as Cents, |acc, n| acc.checked_add(n.rate))
}

pub fn total_price(rental: &RentalState, stay: &Stay) -> Option<Cents> {
    sum_rates(&price_nights(rental, stay))
}
