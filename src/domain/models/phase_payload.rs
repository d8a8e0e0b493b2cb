//! Tagged per-phase result payloads.
//!
//! Collaborators store what a phase produced as a [`PhasePayload`]. Known
//! phases get a typed schema; anything else (a phase added later, or a known
//! phase whose payload has grown fields this build does not know) is kept as
//! [`PhasePayload::Unknown`] and written back byte-for-byte equivalent.
//!
//! Wire format: `{"phase": "<name>", "data": { ... }}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataImportResult {
    pub records_imported: u64,
    #[serde(default)]
    pub records_rejected: u64,
    #[serde(default)]
    pub source_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMappingResult {
    /// Source field → target attribute
    pub mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub unmapped_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetInventoryResult {
    pub assets_created: u64,
    #[serde(default)]
    pub asset_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataGap {
    pub field: String,
    #[serde(default)]
    pub asset_id: Option<Uuid>,
    pub severity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GapAnalysisResult {
    pub gaps: Vec<DataGap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Wave {
    pub number: u32,
    #[serde(default)]
    pub asset_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WavePlanningResult {
    pub waves: Vec<Wave>,
}

/// Result payload of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPhasePayload", into = "RawPhasePayload")]
pub enum PhasePayload {
    DataImport(DataImportResult),
    FieldMapping(FieldMappingResult),
    AssetInventory(AssetInventoryResult),
    GapAnalysis(GapAnalysisResult),
    WavePlanning(WavePlanningResult),
    /// Payload for a phase without a typed schema, kept verbatim
    Unknown { phase: String, data: Value },
}

impl PhasePayload {
    /// Phase this payload belongs to.
    pub fn phase(&self) -> &str {
        match self {
            Self::DataImport(_) => "data_import",
            Self::FieldMapping(_) => "field_mapping",
            Self::AssetInventory(_) => "asset_inventory",
            Self::GapAnalysis(_) => "gap_analysis",
            Self::WavePlanning(_) => "wave_planning",
            Self::Unknown { phase, .. } => phase,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    /// The payload body as JSON.
    pub fn data(&self) -> Value {
        RawPhasePayload::from(self.clone()).data
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPhasePayload {
    phase: String,
    #[serde(default)]
    data: Value,
}

fn typed<T: serde::de::DeserializeOwned>(
    data: &Value,
    wrap: impl FnOnce(T) -> PhasePayload,
) -> Option<PhasePayload> {
    serde_json::from_value(data.clone()).ok().map(wrap)
}

impl From<RawPhasePayload> for PhasePayload {
    fn from(raw: RawPhasePayload) -> Self {
        let parsed = match raw.phase.as_str() {
            "data_import" => typed(&raw.data, Self::DataImport),
            "field_mapping" => typed(&raw.data, Self::FieldMapping),
            "asset_inventory" => typed(&raw.data, Self::AssetInventory),
            "gap_analysis" => typed(&raw.data, Self::GapAnalysis),
            "wave_planning" => typed(&raw.data, Self::WavePlanning),
            _ => None,
        };
        parsed.unwrap_or(Self::Unknown {
            phase: raw.phase,
            data: raw.data,
        })
    }
}

impl From<PhasePayload> for RawPhasePayload {
    fn from(payload: PhasePayload) -> Self {
        let phase = payload.phase().to_string();
        let data = match payload {
            PhasePayload::DataImport(r) => serde_json::to_value(r),
            PhasePayload::FieldMapping(r) => serde_json::to_value(r),
            PhasePayload::AssetInventory(r) => serde_json::to_value(r),
            PhasePayload::GapAnalysis(r) => serde_json::to_value(r),
            PhasePayload::WavePlanning(r) => serde_json::to_value(r),
            PhasePayload::Unknown { data, .. } => Ok(data),
        };
        Self {
            phase,
            data: data.unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_phase_parses_typed() {
        let payload: PhasePayload = serde_json::from_value(json!({
            "phase": "data_import",
            "data": {"records_imported": 120, "records_rejected": 3}
        }))
        .unwrap();

        assert_eq!(
            payload,
            PhasePayload::DataImport(DataImportResult {
                records_imported: 120,
                records_rejected: 3,
                source_name: None,
            })
        );
        assert_eq!(payload.phase(), "data_import");
    }

    #[test]
    fn test_unknown_phase_round_trips_unchanged() {
        let original = json!({
            "phase": "compliance_check",
            "data": {"score": 0.82, "nested": {"rules": ["a", "b"]}}
        });
        let payload: PhasePayload = serde_json::from_value(original.clone()).unwrap();
        assert!(payload.is_unknown());
        assert_eq!(payload.phase(), "compliance_check");
        assert_eq!(serde_json::to_value(&payload).unwrap(), original);
    }

    #[test]
    fn test_known_phase_with_extra_fields_is_kept_verbatim() {
        let original = json!({
            "phase": "field_mapping",
            "data": {"mappings": {"hostname": "name"}, "confidence": 0.9}
        });
        let payload: PhasePayload = serde_json::from_value(original.clone()).unwrap();
        assert!(payload.is_unknown());
        assert_eq!(serde_json::to_value(&payload).unwrap(), original);
    }
}
