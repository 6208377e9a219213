//! Vertical-profile validation of detected dust events.
//!
//! A high column AOD alone cannot tell desert dust from smoke or pollution.
//! An [`EventValidator`] checks each event against independent evidence. The
//! bundled [`ProfileValidator`] uses CALIOP aerosol subtyping: the mean dust
//! fraction of the overpasses during the event (widened by `match_days`)
//! decides between confirmation and rejection. Events without any usable
//! overpass stay unverified and pass through unchanged.

use chrono::Days;
use medust_model::{DateRange, DustEvent, DustProfile, EventKey, RejectAction, ValidationConfig};
use tracing::debug;

/// Outcome of validating one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Profiles show dust.
    Confirmed {
        /// Mean dust fraction of the matched overpasses.
        dust_fraction: f64,
        /// Overpasses used.
        profiles: usize,
    },
    /// Profiles contradict a dust origin.
    Rejected {
        /// Mean dust fraction of the matched overpasses.
        dust_fraction: f64,
        /// Overpasses used.
        profiles: usize,
    },
    /// No evidence either way.
    Unverified,
}

/// Checks detected events against independent evidence of dust.
///
/// Shared read-only between worker threads.
pub trait EventValidator: Send + Sync {
    /// Judge one event.
    fn verify(&self, event: &DustEvent) -> Verdict;
}

/// Validator backed by a region's CALIOP dust profiles.
#[derive(Debug, Clone)]
pub struct ProfileValidator {
    config: ValidationConfig,
    /// Valid profiles, sorted by date.
    profiles: Vec<DustProfile>,
}

impl ProfileValidator {
    /// Create a validator. Invalid and low-quality profiles are dropped.
    pub fn new(config: ValidationConfig, profiles: &[DustProfile]) -> Self {
        let mut profiles: Vec<DustProfile> = profiles
            .iter()
            .filter(|p| p.is_valid(config.min_quality))
            .cloned()
            .collect();
        profiles.sort_by_key(|p| p.date);
        Self { config, profiles }
    }

    fn matching_window(&self, event: &DustEvent) -> DateRange {
        let margin = Days::new(u64::from(self.config.match_days));
        DateRange::new(
            event.start.checked_sub_days(margin).unwrap_or(event.start),
            event.end.checked_add_days(margin).unwrap_or(event.end),
        )
    }
}

impl EventValidator for ProfileValidator {
    fn verify(&self, event: &DustEvent) -> Verdict {
        let window = self.matching_window(event);
        let fractions: Vec<f64> = self
            .profiles
            .iter()
            .filter(|p| p.region == event.region && window.contains(p.date))
            .map(|p| p.dust_fraction)
            .collect();

        if fractions.is_empty() {
            return Verdict::Unverified;
        }
        let dust_fraction = fractions.iter().sum::<f64>() / fractions.len() as f64;
        if dust_fraction >= self.config.min_dust_fraction {
            Verdict::Confirmed {
                dust_fraction,
                profiles: fractions.len(),
            }
        } else {
            Verdict::Rejected {
                dust_fraction,
                profiles: fractions.len(),
            }
        }
    }
}

/// Events after validation.
#[derive(Debug, Clone, Default)]
pub struct ValidatedEvents {
    /// Events kept, in input order.
    pub events: Vec<DustEvent>,
    /// Events the profiles confirmed.
    pub confirmed: usize,
    /// Events without evidence.
    pub unverified: usize,
    /// Events the profiles contradicted, whether dropped or downweighted.
    pub rejected: Vec<EventKey>,
}

/// Apply a validator to a batch of events.
///
/// Rejected events are removed or have their confidence scaled by
/// `downweight_factor`, depending on `on_reject`.
pub fn validate_events(
    events: Vec<DustEvent>,
    validator: &dyn EventValidator,
    config: &ValidationConfig,
) -> ValidatedEvents {
    let mut out = ValidatedEvents::default();
    for mut event in events {
        match validator.verify(&event) {
            Verdict::Confirmed { .. } => {
                out.confirmed += 1;
                out.events.push(event);
            }
            Verdict::Unverified => {
                out.unverified += 1;
                out.events.push(event);
            }
            Verdict::Rejected {
                dust_fraction,
                profiles,
            } => {
                debug!(
                    "{} rejected: dust fraction {:.2} over {} profiles",
                    event.key(),
                    dust_fraction,
                    profiles
                );
                out.rejected.push(event.key());
                if config.on_reject == RejectAction::Downweight {
                    event.confidence *= config.downweight_factor;
                    out.events.push(event);
                }
            }
        }
    }
    out
}
