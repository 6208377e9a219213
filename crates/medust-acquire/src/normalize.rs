//! Normalization of service responses into observation records.
//!
//! The service returns region-aggregated, quality-filtered daily composites:
//!
//! ```json
//! { "records": [ { "date": "2020-06-15", "value": 0.42, "qa": "good" } ] }
//! ```
//!
//! `value` may be `null` (no retrieval that day) and `qa` may be omitted, in
//! which case the service's own filtering is trusted and the reading is
//! marked good.

use chrono::NaiveDate;
use medust_model::{AodObservation, CloudObservation, CloudProperty, DustProfile, QualityFlag};
use serde::Deserialize;

use crate::{AcquireError, Result};

/// Raw service response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceResponse {
    /// Daily records, in any order.
    #[serde(default)]
    pub records: Vec<ServiceRecord>,
}

/// One daily record of a service response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRecord {
    /// Day, `YYYY-MM-DD`.
    pub date: String,
    /// Aggregated value, `null` when nothing was retrieved.
    pub value: Option<f64>,
    /// Quality label.
    #[serde(default)]
    pub qa: Option<String>,
}

impl ServiceResponse {
    /// Decode a response body.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Normalize into AOD observations, sorted by date.
    pub fn into_aod(self, product: &str, region: &str) -> Result<Vec<AodObservation>> {
        let mut out = Vec::with_capacity(self.records.len());
        for record in self.records {
            let (date, value, quality) = record.decode(product)?;
            out.push(AodObservation::new(date, region, value, quality));
        }
        out.sort_by_key(|o| o.date);
        Ok(out)
    }

    /// Normalize into cloud observations, sorted by date.
    pub fn into_cloud(
        self,
        product: &str,
        region: &str,
        property: CloudProperty,
    ) -> Result<Vec<CloudObservation>> {
        let mut out = Vec::with_capacity(self.records.len());
        for record in self.records {
            let (date, value, quality) = record.decode(product)?;
            out.push(CloudObservation::new(date, region, property, value, quality));
        }
        out.sort_by_key(|o| o.date);
        Ok(out)
    }

    /// Normalize into dust profiles, sorted by date. `value` is the dust
    /// fraction of the day's aerosol layers.
    pub fn into_dust_profiles(self, product: &str, region: &str) -> Result<Vec<DustProfile>> {
        let mut out = Vec::with_capacity(self.records.len());
        for record in self.records {
            let (date, value, quality) = record.decode(product)?;
            out.push(DustProfile::new(date, region, value, quality));
        }
        out.sort_by_key(|p| p.date);
        Ok(out)
    }
}

impl ServiceRecord {
    fn decode(self, product: &str) -> Result<(NaiveDate, f64, QualityFlag)> {
        let invalid = |reason: String| AcquireError::InvalidRecord {
            source_name: product.to_string(),
            reason,
        };

        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|e| invalid(format!("date '{}': {}", self.date, e)))?;
        let quality = match self.qa.as_deref() {
            Some(qa) => qa.parse::<QualityFlag>().map_err(invalid)?,
            None => QualityFlag::Good,
        };
        Ok((date, self.value.unwrap_or(f64::NAN), quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aod_normalization_sorts_and_maps_nulls() {
        let body = r#"{"records": [
            {"date": "2020-06-16", "value": 0.71, "qa": "good"},
            {"date": "2020-06-15", "value": null, "qa": "bad"},
            {"date": "2020-06-17", "value": 0.33}
        ]}"#;
        let obs = ServiceResponse::from_json(body)
            .unwrap()
            .into_aod("MCD19A2", "central_med")
            .unwrap();

        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].date, NaiveDate::from_ymd_opt(2020, 6, 15).unwrap());
        assert!(obs[0].aod.is_nan());
        assert_eq!(obs[0].quality, QualityFlag::Bad);
        assert_eq!(obs[1].aod, 0.71);
        assert_eq!(obs[2].quality, QualityFlag::Good);
        assert!(obs.iter().all(|o| o.region == "central_med"));
    }

    #[test]
    fn test_cloud_normalization() {
        let body = r#"{"records": [{"date": "2020-06-15", "value": 11.5, "qa": "marginal"}]}"#;
        let obs = ServiceResponse::from_json(body)
            .unwrap()
            .into_cloud("MOD06_L2", "aegean", CloudProperty::CloudEffectiveRadius)
            .unwrap();
        assert_eq!(obs[0].property, CloudProperty::CloudEffectiveRadius);
        assert_eq!(obs[0].quality, QualityFlag::Marginal);
    }

    #[test]
    fn test_dust_profile_normalization() {
        let body = r#"{"records": [
            {"date": "2020-06-12", "value": 0.8},
            {"date": "2020-06-04", "value": null, "qa": "good"}
        ]}"#;
        let profiles = ServiceResponse::from_json(body)
            .unwrap()
            .into_dust_profiles("CAL_LID_L2_05kmAPro", "levant")
            .unwrap();
        assert_eq!(profiles[0].date, NaiveDate::from_ymd_opt(2020, 6, 4).unwrap());
        assert!(!profiles[0].is_valid(QualityFlag::Marginal));
        assert_eq!(profiles[1].dust_fraction, 0.8);
        assert!(profiles[1].is_valid(QualityFlag::Marginal));
    }

    #[test]
    fn test_bad_date_rejected() {
        let body = r#"{"records": [{"date": "15/06/2020", "value": 0.2}]}"#;
        let err = ServiceResponse::from_json(body)
            .unwrap()
            .into_aod("MCD19A2", "r")
            .unwrap_err();
        assert!(matches!(err, AcquireError::InvalidRecord { .. }));
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            ServiceResponse::from_json("<html>"),
            Err(AcquireError::MalformedResponse(_))
        ));
    }
}
