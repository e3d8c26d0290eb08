//! Persistent tag model and Advance Shipping Notice (ASN) context
//!
//! A `Tag` row is keyed by its EPC. Tags come into existence two ways:
//! a sensor read, or an ASN declaring the EPC is expected to arrive.
//! `is_asn_only` / `is_sensor_read` distinguish the two so downstream
//! consumers can tell shipped-but-unread items from read items.

use serde::{Deserialize, Serialize};

/// Reads originating from fixed sensors
pub const SOURCE_FIXED: &str = "fixed";
/// Reads originating from handheld readers
pub const SOURCE_HANDHELD: &str = "handheld";

/// EPC state values persisted on a tag
pub const EPC_STATE_PRESENT: &str = "present";
pub const EPC_STATE_DEPARTED: &str = "departed";

/// One entry in a tag's whereabouts history; the head is the current location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationHistory {
    pub location: String,
    pub timestamp: u64,
    pub source: String,
}

/// Persistent tag record, merged by EPC on upsert
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    /// URI string representation of the tag
    pub uri: String,
    /// SGTIN EPC code (24 hex chars, primary key)
    pub epc: String,
    /// GTIN-14 (or proprietary id) decoded from the EPC
    pub product_id: String,
    /// Part of the EPC, denotes packaging level of the item
    pub filter_value: i64,
    /// Tag manufacturer ID
    pub tid: String,
    /// Encoding scheme the EPC decoded under
    pub encode_format: String,
    pub facility_id: String,
    /// Last lifecycle event recorded for the tag
    pub event: String,
    /// Arrival time in milliseconds epoch
    pub arrived: u64,
    /// Last read time in milliseconds epoch
    pub last_read: u64,
    /// Where the tag was read from (fixed or handheld)
    pub source: String,
    /// History of the tag's location; head is current
    pub location_history: Vec<LocationHistory>,
    /// Either "present" or "departed"
    pub epc_state: String,
    /// Customer defined state
    pub qualified_state: String,
    /// Customer defined context; may hold serialized [`AsnContext`]
    pub epc_context: String,
    /// Probability the item is actually present; never persisted
    #[serde(skip_serializing_if = "confidence_is_zero")]
    pub confidence: f64,
    /// Cycle count indicator, transient
    #[serde(skip)]
    pub cycle_count: bool,
}

fn confidence_is_zero(v: &f64) -> bool {
    *v == 0.0
}

impl Tag {
    pub fn new(epc: &str) -> Self {
        Self { epc: epc.to_string(), ..Self::default() }
    }

    /// A tag with no fields set at all
    pub fn is_empty(&self) -> bool {
        self.epc.is_empty()
            && self.uri.is_empty()
            && self.product_id.is_empty()
            && self.filter_value == 0
            && self.tid.is_empty()
            && self.encode_format.is_empty()
            && self.facility_id.is_empty()
            && self.event.is_empty()
            && self.arrived == 0
            && self.last_read == 0
            && self.source.is_empty()
            && self.location_history.is_empty()
            && self.epc_state.is_empty()
            && self.qualified_state.is_empty()
            && self.epc_context.is_empty()
    }

    /// Current location of the tag, i.e. the head of its history
    pub fn current_location(&self) -> Option<&str> {
        self.location_history.first().map(|h| h.location.as_str())
    }

    /// True iff the tag exists *only because* of a shipping notice: every
    /// sensor-derived field is empty/zero, the facility is the configured ASN
    /// facility, and the context round-trips as a fully-populated AsnContext.
    ///
    /// NOTE: this does not say the tag *has* a shipping notice attached; a
    /// sensor-read tag can carry an epc_context too.
    pub fn is_asn_only(&self, asn_facility: &str) -> bool {
        if self.epc_context.is_empty()
            || self.filter_value != 0
            || !self.tid.is_empty()
            || !self.encode_format.is_empty()
            || self.facility_id != asn_facility
            || !self.event.is_empty()
            || self.arrived != 0
            || self.last_read != 0
            || !self.source.is_empty()
            || !self.location_history.is_empty()
            || !self.epc_state.is_empty()
            || !self.qualified_state.is_empty()
        {
            return false;
        }

        let Ok(asn) = serde_json::from_str::<AsnContext>(&self.epc_context) else {
            return false;
        };
        !asn.asn_id.is_empty()
            && !asn.event_time.is_empty()
            && !asn.site_id.is_empty()
            && !asn.item_gtin.is_empty()
            && !asn.item_id.is_empty()
    }

    /// True if the tag was stored because a sensor read it, versus being
    /// synthesized from an ASN
    pub fn is_sensor_read(&self, asn_facility: &str) -> bool {
        !self.is_empty() && !self.is_asn_only(asn_facility)
    }

    /// Field-by-field structural equality, excluding the transient
    /// `confidence` and `cycle_count` fields
    pub fn is_equal(&self, other: &Tag) -> bool {
        self.uri == other.uri
            && self.epc == other.epc
            && self.product_id == other.product_id
            && self.filter_value == other.filter_value
            && self.tid == other.tid
            && self.encode_format == other.encode_format
            && self.facility_id == other.facility_id
            && self.event == other.event
            && self.arrived == other.arrived
            && self.last_read == other.last_read
            && self.source == other.source
            && self.location_history == other.location_history
            && self.epc_state == other.epc_state
            && self.qualified_state == other.qualified_state
            && self.epc_context == other.epc_context
    }
}

/// The data serialized into a tag's `epc_context` field when an ASN covers
/// its EPC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsnContext {
    /// ID of the shipment, copied from the top level of the ASN
    #[serde(rename = "asnId")]
    pub asn_id: String,
    /// When the ASN was updated, as provided upstream
    #[serde(rename = "eventTime")]
    pub event_time: String,
    /// Site the ASN applies to
    #[serde(rename = "siteId")]
    pub site_id: String,
    #[serde(rename = "itemGtin")]
    pub item_gtin: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
}

/// A block of item metadata and the EPCs it applies to
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AsnInputItem {
    #[serde(rename = "itemEpcs")]
    pub epcs: Vec<String>,
    #[serde(rename = "itemGtin")]
    pub item_gtin: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
}

/// An Advance Shipping Notice: EPCs declared to be on their way
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceShippingNotice {
    #[serde(rename = "asnId")]
    pub id: String,
    #[serde(rename = "eventTime", default)]
    pub event_time: String,
    #[serde(rename = "siteId", default)]
    pub site_id: String,
    #[serde(default)]
    pub items: Vec<AsnInputItem>,
}

impl AdvanceShippingNotice {
    /// Reject notices missing any required top-level field
    pub fn validate(&self) -> Result<(), crate::domain::types::ValidationError> {
        use crate::domain::types::ValidationError;
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("asnId"));
        }
        if self.event_time.is_empty() {
            return Err(ValidationError::MissingField("eventTime"));
        }
        if self.site_id.is_empty() {
            return Err(ValidationError::MissingField("siteId"));
        }
        if self.items.is_empty() {
            return Err(ValidationError::MissingField("items"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASN_FACILITY: &str = "ASN_Data";

    fn asn_context_json() -> String {
        serde_json::to_string(&AsnContext {
            asn_id: "asn-1".to_string(),
            event_time: "2023-04-01T12:00:00Z".to_string(),
            site_id: "site-9".to_string(),
            item_gtin: "00888446671424".to_string(),
            item_id: "item-7".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_empty_tag() {
        assert!(Tag::default().is_empty());
        assert!(!Tag::new("301400000000000000000001").is_empty());
    }

    #[test]
    fn test_asn_only_classification() {
        let mut tag = Tag::new("301400000000000000000001");
        tag.facility_id = ASN_FACILITY.to_string();
        tag.epc_context = asn_context_json();

        assert!(tag.is_asn_only(ASN_FACILITY));
        assert!(!tag.is_sensor_read(ASN_FACILITY));
    }

    #[test]
    fn test_sensor_read_beats_asn_only() {
        let mut tag = Tag::new("301400000000000000000001");
        tag.facility_id = ASN_FACILITY.to_string();
        tag.epc_context = asn_context_json();
        // any sensor-derived field disqualifies the ASN-only classification
        tag.last_read = 1736012345678;

        assert!(!tag.is_asn_only(ASN_FACILITY));
        assert!(tag.is_sensor_read(ASN_FACILITY));
    }

    #[test]
    fn test_asn_only_requires_full_context() {
        let mut tag = Tag::new("301400000000000000000001");
        tag.facility_id = ASN_FACILITY.to_string();
        tag.epc_context = r#"{"asnId":"asn-1"}"#.to_string();

        assert!(!tag.is_asn_only(ASN_FACILITY));

        tag.epc_context = "not json".to_string();
        assert!(!tag.is_asn_only(ASN_FACILITY));
    }

    #[test]
    fn test_asn_only_requires_asn_facility() {
        let mut tag = Tag::new("301400000000000000000001");
        tag.facility_id = "salesFloor".to_string();
        tag.epc_context = asn_context_json();

        assert!(!tag.is_asn_only(ASN_FACILITY));
        assert!(tag.is_sensor_read(ASN_FACILITY));
    }

    #[test]
    fn test_structural_equality_excludes_transients() {
        let mut a = Tag::new("301400000000000000000001");
        a.facility_id = "salesFloor".to_string();
        a.location_history.push(LocationHistory {
            location: "RSP-150000-0".to_string(),
            timestamp: 100,
            source: SOURCE_FIXED.to_string(),
        });

        let mut b = a.clone();
        b.confidence = 0.75;
        b.cycle_count = true;
        assert!(a.is_equal(&b));

        b.facility_id = "backStock".to_string();
        assert!(!a.is_equal(&b));
    }

    #[test]
    fn test_confidence_not_serialized_when_zero() {
        let tag = Tag::new("301400000000000000000001");
        let json = serde_json::to_value(&tag).unwrap();
        assert!(json.get("confidence").is_none());
        assert!(json.get("cycle_count").is_none());
    }

    #[test]
    fn test_asn_validate() {
        let asn: AdvanceShippingNotice = serde_json::from_str(
            r#"{"asnId":"asn-1","eventTime":"t","siteId":"s","items":[{"itemEpcs":["301400000000000000000001"],"itemGtin":"g","itemId":"i"}]}"#,
        )
        .unwrap();
        assert!(asn.validate().is_ok());

        let missing: AdvanceShippingNotice =
            serde_json::from_str(r#"{"asnId":"asn-1"}"#).unwrap();
        assert!(missing.validate().is_err());
    }
}
