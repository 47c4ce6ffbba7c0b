//! Packing job description and result summary.
//!
//! Fields the service does not interpret (presets, colours, extra result
//! metrics) pass through untouched in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PackerError;

/// Container to pack into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Inner length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    /// Inner width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Inner height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Maximum total load weight, if the container has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_capacity: Option<f64>,
    /// Pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One box type to place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxSpec {
    /// Display name, used to group results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Box length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    /// Box width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Box height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Box weight. Required when the container has a weight capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// How many of this box to place. Kept as raw JSON so a non-integer can be
    /// rejected with a message instead of a parse error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Value>,
    /// Pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A packing request as submitted by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackingJob {
    /// Container dimensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    /// Box types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boxes: Option<Vec<BoxSpec>>,
    /// Pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn positive(value: Option<f64>) -> bool {
    value.is_some_and(|v| v > 0.0)
}

impl PackingJob {
    /// Number of box types submitted.
    #[must_use]
    pub fn box_count(&self) -> usize {
        self.boxes.as_ref().map_or(0, Vec::len)
    }

    /// Check the job is complete enough to hand to the packer.
    ///
    /// # Errors
    ///
    /// Returns `PackerError::InvalidJob` naming the first problem found.
    pub fn validate(&self) -> Result<(), PackerError> {
        let invalid = |msg: String| Err(PackerError::InvalidJob(msg));

        let container = match &self.container {
            Some(c) if positive(c.length) && positive(c.width) && positive(c.height) => c,
            _ => {
                return invalid(
                    "Container dimensions (length, width, height) are required".to_string(),
                )
            }
        };

        let weighted = container.weight_capacity.is_some();
        if weighted && !positive(container.weight_capacity) {
            return invalid("Container weight capacity must be a positive number".to_string());
        }

        let boxes = match &self.boxes {
            Some(boxes) if !boxes.is_empty() => boxes,
            _ => return invalid("At least one box type is required".to_string()),
        };

        for (i, b) in boxes.iter().enumerate() {
            let named = b.name.as_deref().is_some_and(|n| !n.is_empty());
            if !named || !positive(b.length) || !positive(b.width) || !positive(b.height) {
                return invalid(format!(
                    "Box at index {i} is missing required fields (name, length, width, height)"
                ));
            }
            if weighted && !positive(b.weight) {
                return invalid(format!(
                    "Box at index {i} must have a positive weight when container has weight capacity"
                ));
            }
            if let Some(quantity) = &b.quantity {
                if !quantity.as_u64().is_some_and(|q| q >= 1) {
                    return invalid(format!(
                        "Box at index {i} has invalid quantity. Must be a positive integer."
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Placement count for one box type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSummary {
    /// Box type name.
    pub name: String,
    /// How many were placed.
    pub count: u64,
    /// Pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the packer reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingSummary {
    /// Per-type placement counts.
    pub box_summary: Vec<BoxSummary>,
    /// Sum of `box_summary` counts.
    #[serde(default)]
    pub total_boxes: u64,
    /// Weight of everything placed.
    #[serde(default)]
    pub total_weight: f64,
    /// Space utilisation above the fullness threshold.
    #[serde(default)]
    pub container_full: bool,
    /// Weight utilisation above the fullness threshold.
    #[serde(default)]
    pub weight_limit_reached: bool,
    /// Percentage of container volume used.
    #[serde(default)]
    pub space_utilization: f64,
    /// Percentage of weight capacity used.
    #[serde(default)]
    pub weight_utilization: f64,
    /// Error reported by the packer itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackingSummary {
    /// Sum of the per-type counts.
    #[must_use]
    pub fn counted_boxes(&self) -> u64 {
        self.box_summary.iter().map(|b| b.count).sum()
    }
}
