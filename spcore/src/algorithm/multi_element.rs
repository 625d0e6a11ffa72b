use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::particle::Particle;

/// default fraction of either duration two events must share to be one particle
pub const MIN_OVERLAP_FRACTION: f64 = 0.5;

/// A detected event of one isotope, in time units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementEvent {
    pub label: String,
    pub start_time: f64,
    pub end_time: f64,
    pub counts: f64,
}

impl ElementEvent {
    pub fn from_particle(label: &str, particle: &Particle, time: &[f64]) -> Self {
        ElementEvent {
            label: label.to_string(),
            start_time: particle.start_time(time),
            end_time: particle.end_time(time),
            counts: particle.total_counts,
        }
    }
}

/// Events of several isotopes attributed to the same particle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiElementParticle {
    pub start_time: f64,
    pub end_time: f64,
    pub elements: BTreeMap<String, f64>,
}

impl MultiElementParticle {
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

/// true when the shared time span is at least `min_fraction` of either duration
pub fn is_overlapping(a: (f64, f64), b: (f64, f64), min_fraction: f64) -> bool {
    let overlap_start = a.0.max(b.0);
    let overlap_end = a.1.min(b.1);
    if overlap_start >= overlap_end {
        return false;
    }
    let duration_a = a.1 - a.0;
    let duration_b = b.1 - b.0;
    if duration_a <= 0.0 || duration_b <= 0.0 {
        return false;
    }
    let overlap = overlap_end - overlap_start;
    (overlap / duration_a).max(overlap / duration_b) >= min_fraction
}

/// group the events of one sample into multi-element particles
///
/// Events are sorted by start time; each joins the last group when it overlaps
/// the group's span, which then widens and accumulates the event's counts
/// under its label.
///
/// Arguments:
///
/// * `events` - events of all isotopes of one sample
/// * `min_fraction` - required overlap, see [`is_overlapping`]
///
/// Returns:
///
/// * `Vec<MultiElementParticle>` - groups in start-time order
pub fn group_multi_element(events: &[ElementEvent], min_fraction: f64) -> Vec<MultiElementParticle> {
    let mut sorted: Vec<&ElementEvent> = events.iter().collect();
    sorted.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let mut groups: Vec<MultiElementParticle> = Vec::new();
    for event in sorted {
        let span = (event.start_time, event.end_time);
        match groups.last_mut() {
            Some(group) if is_overlapping(span, (group.start_time, group.end_time), min_fraction) => {
                group.start_time = group.start_time.min(event.start_time);
                group.end_time = group.end_time.max(event.end_time);
                *group.elements.entry(event.label.clone()).or_insert(0.0) += event.counts;
            }
            _ => {
                let mut elements = BTreeMap::new();
                elements.insert(event.label.clone(), event.counts);
                groups.push(MultiElementParticle { start_time: event.start_time, end_time: event.end_time, elements });
            }
        }
    }
    groups
}
