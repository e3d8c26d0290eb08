//! ASN reconciliation
//!
//! Each EPC named by an Advance Shipping Notice is either inserted as a new
//! ASN-only tag (ASN facility, serialized context, everything else zero) or,
//! when the tag already exists, updated in place with only the new context.
//! This runs on the ingest path, outside the engine's state transitions.

use crate::domain::epc::{decode_tag_data, is_whitelisted, TagDecoder};
use crate::domain::tag::{AdvanceShippingNotice, AsnContext, Tag};
use crate::domain::types::ValidationError;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::store::{StoreError, TagStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("ASN is missing data: {0}")]
    Validation(#[from] ValidationError),
    #[error("unable to serialize ASN context: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AsnReconciler {
    store: Arc<dyn TagStore>,
    decoders: Vec<TagDecoder>,
    asn_facility: String,
    epc_filters: Vec<String>,
    metrics: Arc<Metrics>,
}

impl AsnReconciler {
    pub fn new(config: &Config, store: Arc<dyn TagStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            decoders: TagDecoder::chain(config.decoder_order(), config.proprietary_prefix()),
            asn_facility: config.asn_facility_id().to_string(),
            epc_filters: config.epc_filters().to_vec(),
            metrics,
        }
    }

    /// Reconcile a batch of shipping notices against the store. Returns the
    /// number of EPCs written. Re-processing the same notice is idempotent
    /// on the stored context.
    pub async fn process_shipping_notices(
        &self,
        notices: &[AdvanceShippingNotice],
    ) -> Result<usize, ReconcileError> {
        let mut written = 0;

        for asn in notices {
            asn.validate()?;

            let mut tag_data: Vec<Tag> = Vec::new();
            for item in &asn.items {
                let context = serde_json::to_string(&AsnContext {
                    asn_id: asn.id.clone(),
                    event_time: asn.event_time.clone(),
                    site_id: asn.site_id.clone(),
                    item_gtin: item.item_gtin.clone(),
                    item_id: item.item_id.clone(),
                })?;

                for epc in &item.epcs {
                    if !is_whitelisted(epc, &self.epc_filters) {
                        debug!(epc = %epc, "asn_epc_not_whitelisted");
                        continue;
                    }

                    match self.store.find_by_epc(epc).await? {
                        Some(mut existing) if !existing.is_empty() => {
                            // found: only the context is overwritten
                            existing.epc_context = context.clone();
                            tag_data.push(existing);
                        }
                        _ => {
                            let mut tag = Tag::new(epc);
                            if let Ok(decoded) = decode_tag_data(&self.decoders, epc) {
                                tag.product_id = decoded.product_id;
                                tag.uri = decoded.uri;
                            }
                            tag.facility_id = self.asn_facility.clone();
                            tag.epc_context = context.clone();
                            tag_data.push(tag);
                        }
                    }
                }
            }

            if !tag_data.is_empty() {
                self.store.replace(&tag_data).await?;
                written += tag_data.len();
            }

            info!(
                asn_id = %asn.id,
                site_id = %asn.site_id,
                epcs = %tag_data.len(),
                "asn_reconciled"
            );
        }

        self.metrics.record_asn_epcs(written as u64);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryTagStore;

    const EPC: &str = "3014000000000000000000E9";

    fn asn(asn_id: &str, epcs: &[&str]) -> AdvanceShippingNotice {
        serde_json::from_value(serde_json::json!({
            "asnId": asn_id,
            "eventTime": "2023-04-01T12:00:00Z",
            "siteId": "site-1",
            "items": [{
                "itemEpcs": epcs,
                "itemGtin": "00888446671424",
                "itemId": "item-1",
            }],
        }))
        .unwrap()
    }

    fn reconciler(store: Arc<MemoryTagStore>) -> AsnReconciler {
        AsnReconciler::new(&Config::default(), store, Arc::new(Metrics::new()))
    }

    fn reconciler_with_filters(store: Arc<MemoryTagStore>, filters: &[&str]) -> AsnReconciler {
        let mut r = reconciler(store);
        r.epc_filters = filters.iter().map(|s| s.to_string()).collect();
        r
    }

    #[tokio::test]
    async fn test_new_epc_inserted_as_asn_only() {
        let store = Arc::new(MemoryTagStore::new());
        let r = reconciler(store.clone());

        let written = r.process_shipping_notices(&[asn("A1", &[EPC])]).await.unwrap();
        assert_eq!(written, 1);

        let tag = store.find_by_epc(EPC).await.unwrap().unwrap();
        assert!(tag.is_asn_only("ASN_Data"));
        assert!(!tag.is_sensor_read("ASN_Data"));
        assert_eq!(tag.facility_id, "ASN_Data");
        assert_eq!(tag.last_read, 0);

        let ctx: AsnContext = serde_json::from_str(&tag.epc_context).unwrap();
        assert_eq!(ctx.asn_id, "A1");
        assert_eq!(ctx.item_gtin, "00888446671424");
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let store = Arc::new(MemoryTagStore::new());
        let r = reconciler(store.clone());
        let notice = asn("A1", &[EPC]);

        r.process_shipping_notices(std::slice::from_ref(&notice)).await.unwrap();
        let first = store.find_by_epc(EPC).await.unwrap().unwrap();

        r.process_shipping_notices(std::slice::from_ref(&notice)).await.unwrap();
        let second = store.find_by_epc(EPC).await.unwrap().unwrap();

        assert!(first.is_equal(&second));
        assert_eq!(first.epc_context, second.epc_context);
    }

    #[tokio::test]
    async fn test_existing_tag_keeps_sensor_fields() {
        let store = Arc::new(MemoryTagStore::new());

        // a tag the sensors have already seen
        let mut seen = Tag::new(EPC);
        seen.facility_id = "salesFloor".to_string();
        seen.last_read = 1736012345678;
        seen.arrived = 1736012345678;
        seen.epc_state = "present".to_string();
        store.replace(&[seen]).await.unwrap();

        let r = reconciler(store.clone());
        r.process_shipping_notices(&[asn("A2", &[EPC])]).await.unwrap();

        let tag = store.find_by_epc(EPC).await.unwrap().unwrap();
        // only the context changed
        assert_eq!(tag.facility_id, "salesFloor");
        assert_eq!(tag.last_read, 1736012345678);
        assert!(tag.is_sensor_read("ASN_Data"));

        let ctx: AsnContext = serde_json::from_str(&tag.epc_context).unwrap();
        assert_eq!(ctx.asn_id, "A2");
    }

    #[tokio::test]
    async fn test_whitelist_skips_non_matching_epcs() {
        let store = Arc::new(MemoryTagStore::new());
        let r = reconciler_with_filters(store.clone(), &["0F"]);

        let written = r.process_shipping_notices(&[asn("A1", &[EPC])]).await.unwrap();
        assert_eq!(written, 0);
        assert!(store.find_by_epc(EPC).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_asn_rejected() {
        let store = Arc::new(MemoryTagStore::new());
        let r = reconciler(store.clone());

        let incomplete: AdvanceShippingNotice =
            serde_json::from_value(serde_json::json!({"asnId": "A1"})).unwrap();
        let err = r.process_shipping_notices(&[incomplete]).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }
}
