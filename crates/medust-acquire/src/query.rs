//! Translation of study parameters into service queries.
//!
//! The service takes a product identifier, a collection, a date range and a
//! bounding box, plus the science variable for the cloud and lidar products:
//!
//! ```text
//! {base_url}?products=MCD19A2&collection=61&start=2020-06-01&end=2020-06-30&bbox=10,33,20,40
//! ```

use medust_model::{BoundingBox, CloudProperty, DateRange, Satellite};
use std::fmt;
use std::path::{Path, PathBuf};

/// Satellite products used by the study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    /// MODIS MAIAC daily aerosol optical depth.
    Mcd19a2,
    /// MODIS Terra cloud product.
    Mod06L2,
    /// MODIS Aqua cloud product.
    Myd06L2,
    /// CALIOP level 2 aerosol profiles.
    CalLid2Apro,
}

/// Aerosol subtype classification in the CALIOP profile product.
pub const CALIOP_AEROSOL_TYPE: &str = "Aerosol_Type_532";

impl Product {
    /// The product identifier understood by the service.
    pub const fn id(&self) -> &'static str {
        match self {
            Product::Mcd19a2 => "MCD19A2",
            Product::Mod06L2 => "MOD06_L2",
            Product::Myd06L2 => "MYD06_L2",
            Product::CalLid2Apro => "CAL_LID_L2_05kmAPro",
        }
    }

    /// Cloud product for a platform.
    pub const fn cloud_for(satellite: Satellite) -> Self {
        match satellite {
            Satellite::Terra => Product::Mod06L2,
            Satellite::Aqua => Product::Myd06L2,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A single request to the acquisition service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuery {
    /// Product to fetch.
    pub product: Product,
    /// Product collection (e.g. "61").
    pub collection: String,
    /// Region name, used for caching.
    pub region: String,
    /// Spatial extent.
    pub bbox: BoundingBox,
    /// Days requested.
    pub range: DateRange,
    /// Science variable for cloud products.
    pub variable: Option<CloudProperty>,
}

impl ProductQuery {
    /// AOD query for a region.
    pub fn aod(collection: &str, region: &str, bbox: BoundingBox, range: DateRange) -> Self {
        Self {
            product: Product::Mcd19a2,
            collection: collection.to_string(),
            region: region.to_string(),
            bbox,
            range,
            variable: None,
        }
    }

    /// Cloud-property query for a region.
    pub fn cloud(
        collection: &str,
        satellite: Satellite,
        region: &str,
        bbox: BoundingBox,
        range: DateRange,
        property: CloudProperty,
    ) -> Self {
        Self {
            product: Product::cloud_for(satellite),
            collection: collection.to_string(),
            region: region.to_string(),
            bbox,
            range,
            variable: Some(property),
        }
    }

    /// Dust-profile query for a region. `version` is the CALIOP data release.
    pub fn dust_profile(version: &str, region: &str, bbox: BoundingBox, range: DateRange) -> Self {
        Self {
            product: Product::CalLid2Apro,
            collection: version.to_string(),
            region: region.to_string(),
            bbox,
            range,
            variable: None,
        }
    }

    /// Science variable requested from the service, if any.
    pub fn variable_name(&self) -> Option<&'static str> {
        match (self.product, self.variable) {
            (Product::CalLid2Apro, _) => Some(CALIOP_AEROSOL_TYPE),
            (_, Some(property)) => Some(property.modis_variable()),
            _ => None,
        }
    }

    /// Query parameters in the order the service documents them.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("products", self.product.id().to_string()),
            ("collection", self.collection.clone()),
            ("start", self.range.start.format("%Y-%m-%d").to_string()),
            ("end", self.range.end.format("%Y-%m-%d").to_string()),
            ("bbox", self.bbox.query_string()),
        ];
        if let Some(variable) = self.variable_name() {
            params.push(("variable", variable.to_string()));
        }
        params
    }

    /// Cache file for this query's response.
    ///
    /// Layout: `<cache_dir>/<product>/<region>/<start>_<end>[_<variable>].json`.
    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        let mut file = format!(
            "{}_{}",
            self.range.start.format("%Y%m%d"),
            self.range.end.format("%Y%m%d")
        );
        if let Some(variable) = self.variable {
            file.push('_');
            file.push_str(variable.as_str());
        }
        file.push_str(".json");
        cache_dir
            .join(self.product.id())
            .join(&self.region)
            .join(file)
    }
}

impl fmt::Display for ProductQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}..{}",
            self.product, self.region, self.range.start, self.range.end
        )?;
        if let Some(variable) = self.variable {
            write!(f, " [{}]", variable)?;
        }
        Ok(())
    }
}
