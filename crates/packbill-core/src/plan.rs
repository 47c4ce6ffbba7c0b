//! Plan catalog.
//!
//! A static table of plan tiers, their feature flags, and their prices per billing
//! cycle. Nothing here is persisted; subscriptions store a [`FeatureSet`] snapshot
//! taken at activation time, so editing this table never changes an already
//! activated subscription.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

// ============================================================================
// Prices (whole currency units per cycle)
// ============================================================================

/// Starter plan monthly price.
pub const STARTER_MONTHLY_PRICE: i64 = 199;

/// Starter plan annual price.
pub const STARTER_ANNUAL_PRICE: i64 = 1990;

/// Pro plan monthly price.
pub const PRO_MONTHLY_PRICE: i64 = 299;

/// Pro plan annual price.
pub const PRO_ANNUAL_PRICE: i64 = 2990;

/// Exclusive plan monthly price.
pub const EXCLUSIVE_MONTHLY_PRICE: i64 = 499;

/// Exclusive plan annual price.
pub const EXCLUSIVE_ANNUAL_PRICE: i64 = 4990;

/// Available plan tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Free trial window with every feature on.
    Trial,
    /// Entry tier: 10 boxes, 3D view only.
    Starter,
    /// CSV upload, PDF export, container customization.
    Pro,
    /// Everything, unlimited boxes.
    Exclusive,
}

impl PlanType {
    /// Plans that can be bought through the gateway. Trial is never purchased.
    pub const PURCHASABLE: [Self; 3] = [Self::Starter, Self::Pro, Self::Exclusive];

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Exclusive => "exclusive",
        }
    }

    /// Human readable name for catalog listings.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Trial => "Trial",
            Self::Starter => "Starter",
            Self::Pro => "Pro",
            Self::Exclusive => "Exclusive",
        }
    }

    /// Whether the plan can be bought.
    #[must_use]
    pub const fn is_purchasable(&self) -> bool {
        !matches!(self, Self::Trial)
    }

    /// Parse a plan that a customer is allowed to buy.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPlan` for unknown names and for `trial`.
    pub fn parse_purchasable(s: &str) -> Result<Self, BillingError> {
        let plan: Self = s.parse()?;
        if plan.is_purchasable() {
            Ok(plan)
        } else {
            Err(BillingError::InvalidPlan(s.to_string()))
        }
    }

    /// Feature set granted by this plan.
    #[must_use]
    pub const fn features(&self) -> FeatureSet {
        match self {
            Self::Trial => FeatureSet {
                max_boxes: 10,
                unlimited_boxes: true,
                csv_upload: true,
                pdf_export: true,
                container_customization: true,
                advanced_optimization: true,
                animated_visualizer: true,
                three_d_view: true,
                premium_support: true,
            },
            Self::Starter => FeatureSet {
                max_boxes: 10,
                unlimited_boxes: false,
                csv_upload: false,
                pdf_export: false,
                container_customization: false,
                advanced_optimization: false,
                animated_visualizer: false,
                three_d_view: true,
                premium_support: false,
            },
            Self::Pro => FeatureSet {
                max_boxes: 10,
                unlimited_boxes: false,
                csv_upload: true,
                pdf_export: true,
                container_customization: true,
                advanced_optimization: false,
                animated_visualizer: false,
                three_d_view: true,
                premium_support: false,
            },
            Self::Exclusive => FeatureSet {
                max_boxes: 100,
                unlimited_boxes: true,
                csv_upload: true,
                pdf_export: true,
                container_customization: true,
                advanced_optimization: true,
                animated_visualizer: true,
                three_d_view: true,
                premium_support: true,
            },
        }
    }

    /// Price for one billing cycle, or 0 when the plan is not sold.
    #[must_use]
    pub const fn price(&self, cycle: BillingCycle) -> i64 {
        match (self, cycle) {
            (Self::Starter, BillingCycle::Monthly) => STARTER_MONTHLY_PRICE,
            (Self::Starter, BillingCycle::Annually) => STARTER_ANNUAL_PRICE,
            (Self::Pro, BillingCycle::Monthly) => PRO_MONTHLY_PRICE,
            (Self::Pro, BillingCycle::Annually) => PRO_ANNUAL_PRICE,
            (Self::Exclusive, BillingCycle::Monthly) => EXCLUSIVE_MONTHLY_PRICE,
            (Self::Exclusive, BillingCycle::Annually) => EXCLUSIVE_ANNUAL_PRICE,
            (Self::Trial, _) => 0,
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trial" => Ok(Self::Trial),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "exclusive" => Ok(Self::Exclusive),
            _ => Err(BillingError::InvalidPlan(s.to_string())),
        }
    }
}

/// Length of a paid period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// One calendar month.
    #[default]
    Monthly,
    /// One calendar year.
    Annually,
}

impl BillingCycle {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annually => "annually",
        }
    }

    /// The end of a period of this cycle that starts at `from`.
    ///
    /// Calendar arithmetic: Jan 31 + 1 month is the last day of February.
    #[must_use]
    pub fn period_end(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::Monthly => Months::new(1),
            Self::Annually => Months::new(12),
        };
        // Only overflows near the end of chrono's representable range.
        from.checked_add_months(months).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "annually" => Ok(Self::Annually),
            _ => Err(BillingError::InvalidBillingCycle(s.to_string())),
        }
    }
}

/// Feature flags and limits of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct FeatureSet {
    /// Maximum number of box types per packing request, unless `unlimited_boxes`.
    pub max_boxes: u32,
    /// Lifts the `max_boxes` limit.
    pub unlimited_boxes: bool,
    /// Bulk box import from CSV.
    pub csv_upload: bool,
    /// PDF export of packing results.
    pub pdf_export: bool,
    /// Custom container dimensions and presets.
    pub container_customization: bool,
    /// Advanced optimisation strategies.
    pub advanced_optimization: bool,
    /// Animated loading-sequence visualiser.
    pub animated_visualizer: bool,
    /// 3D view of the packed container.
    pub three_d_view: bool,
    /// Priority support.
    pub premium_support: bool,
}

impl FeatureSet {
    /// Whether the given feature flag is on.
    #[must_use]
    pub const fn allows(&self, feature: Feature) -> bool {
        match feature {
            Feature::CsvUpload => self.csv_upload,
            Feature::PdfExport => self.pdf_export,
            Feature::ContainerCustomization => self.container_customization,
            Feature::AdvancedOptimization => self.advanced_optimization,
            Feature::AnimatedVisualizer => self.animated_visualizer,
            Feature::ThreeDView => self.three_d_view,
            Feature::PremiumSupport => self.premium_support,
        }
    }

    /// The box limit, or `None` when unlimited.
    #[must_use]
    pub const fn box_limit(&self) -> Option<u32> {
        if self.unlimited_boxes {
            None
        } else {
            Some(self.max_boxes)
        }
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        PlanType::Trial.features()
    }
}

/// A gated feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// `csv_upload`
    CsvUpload,
    /// `pdf_export`
    PdfExport,
    /// `container_customization`
    ContainerCustomization,
    /// `advanced_optimization`
    AdvancedOptimization,
    /// `animated_visualizer`
    AnimatedVisualizer,
    /// `three_d_view`
    ThreeDView,
    /// `premium_support`
    PremiumSupport,
}

impl Feature {
    /// Flag name as it appears in the feature set.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CsvUpload => "csv_upload",
            Self::PdfExport => "pdf_export",
            Self::ContainerCustomization => "container_customization",
            Self::AdvancedOptimization => "advanced_optimization",
            Self::AnimatedVisualizer => "animated_visualizer",
            Self::ThreeDView => "three_d_view",
            Self::PremiumSupport => "premium_support",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv_upload" => Ok(Self::CsvUpload),
            "pdf_export" => Ok(Self::PdfExport),
            "container_customization" => Ok(Self::ContainerCustomization),
            "advanced_optimization" => Ok(Self::AdvancedOptimization),
            "animated_visualizer" => Ok(Self::AnimatedVisualizer),
            "three_d_view" => Ok(Self::ThreeDView),
            "premium_support" => Ok(Self::PremiumSupport),
            _ => Err(BillingError::Validation(format!("unknown feature: {s}"))),
        }
    }
}

/// Feature set for a plan name.
///
/// Unknown names fall back to the trial feature set rather than failing.
#[must_use]
pub fn features_for(plan_type: &str) -> FeatureSet {
    plan_type
        .parse::<PlanType>()
        .unwrap_or(PlanType::Trial)
        .features()
}

/// Price for a plan name and cycle name.
///
/// Returns 0 for any unknown plan or cycle; callers must refuse to create a
/// gateway order for a zero amount.
#[must_use]
pub fn price_for(plan_type: &str, billing_cycle: &str) -> i64 {
    match (plan_type.parse::<PlanType>(), billing_cycle.parse::<BillingCycle>()) {
        (Ok(plan), Ok(cycle)) => plan.price(cycle),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unknown_plan_gets_trial_features() {
        assert_eq!(features_for("platinum"), PlanType::Trial.features());
        assert_eq!(features_for("pro"), PlanType::Pro.features());
    }

    #[test]
    fn prices_follow_catalog() {
        assert_eq!(price_for("starter", "monthly"), 199);
        assert_eq!(price_for("pro", "monthly"), 299);
        assert_eq!(price_for("exclusive", "annually"), 4990);
    }

    #[test]
    fn unknown_pairs_price_at_zero() {
        assert_eq!(price_for("trial", "monthly"), 0);
        assert_eq!(price_for("pro", "weekly"), 0);
        assert_eq!(price_for("gold", "monthly"), 0);
    }

    #[test]
    fn trial_is_not_purchasable() {
        assert!(PlanType::parse_purchasable("trial").is_err());
        assert!(PlanType::parse_purchasable("unknown").is_err());
        assert_eq!(PlanType::parse_purchasable("Pro").unwrap(), PlanType::Pro);
    }

    #[test]
    fn starter_box_limit() {
        let features = PlanType::Starter.features();
        assert_eq!(features.box_limit(), Some(10));
        assert!(!features.allows(Feature::CsvUpload));
        assert!(features.allows(Feature::ThreeDView));
        assert_eq!(PlanType::Exclusive.features().box_limit(), None);
    }

    #[test]
    fn monthly_period_clamps_to_month_end() {
        let jan_31 = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let end = BillingCycle::Monthly.period_end(jan_31);
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn annual_period_adds_a_year() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap();
        let end = BillingCycle::Annually.period_end(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 10, 8, 30, 0).unwrap());
    }

    #[test]
    fn feature_names_parse() {
        assert_eq!("pdf_export".parse::<Feature>().unwrap(), Feature::PdfExport);
        assert!("teleport".parse::<Feature>().is_err());
    }
}
