//! EPC decoding: SGTIN-96 and proprietary prefix formats
//!
//! Decoders are tried in the configured order; the first one whose header
//! matches wins. An EPC no decoder recognizes yields [`EpcError::UnknownEncoding`]
//! and callers store the tag with the `UNDEFINED_PRODUCT_ID` sentinel.

use thiserror::Error;

/// Sentinel product id for EPCs no configured decoder recognizes
pub const UNDEFINED_PRODUCT_ID: &str = "";

/// Required EPC length in hex characters (96 bits)
pub const EPC_HEX_LEN: usize = 24;

/// SGTIN-96 header byte
const SGTIN_96_HEADER: u8 = 0x30;

#[derive(Debug, Error, PartialEq)]
pub enum EpcError {
    #[error("epc must be {EPC_HEX_LEN} hex characters, got {0:?}")]
    Malformed(String),
    #[error("no decoder recognizes epc {0}")]
    UnknownEncoding(String),
}

/// Result of decoding an EPC
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedEpc {
    /// GTIN-14 for SGTIN, vendor item code for proprietary formats
    pub product_id: String,
    /// EPC tag URI
    pub uri: String,
    /// Packaging-level filter bits
    pub filter_value: i64,
    /// Name of the scheme that matched
    pub encode_format: String,
}

/// One configured decoder in the ordered decode chain
#[derive(Debug, Clone, PartialEq)]
pub enum TagDecoder {
    Sgtin96,
    /// Vendor format identified by a fixed hex prefix; the product id is the
    /// 14 hex chars following the prefix, the remainder is the serial
    Proprietary { prefix: String },
}

impl TagDecoder {
    /// Build the decoder chain from config names; unknown names are skipped
    pub fn chain(names: &[String], proprietary_prefix: &str) -> Vec<TagDecoder> {
        names
            .iter()
            .filter_map(|name| match name.as_str() {
                "sgtin-96" => Some(TagDecoder::Sgtin96),
                "proprietary" if !proprietary_prefix.is_empty() => {
                    Some(TagDecoder::Proprietary { prefix: proprietary_prefix.to_uppercase() })
                }
                _ => None,
            })
            .collect()
    }

    fn decode(&self, epc: &str) -> Option<DecodedEpc> {
        match self {
            TagDecoder::Sgtin96 => decode_sgtin_96(epc),
            TagDecoder::Proprietary { prefix } => decode_proprietary(epc, prefix),
        }
    }
}

/// Decode an EPC through the ordered decoder chain
pub fn decode_tag_data(decoders: &[TagDecoder], epc: &str) -> Result<DecodedEpc, EpcError> {
    if epc.len() != EPC_HEX_LEN || !epc.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EpcError::Malformed(epc.to_string()));
    }
    decoders
        .iter()
        .find_map(|d| d.decode(epc))
        .ok_or_else(|| EpcError::UnknownEncoding(epc.to_string()))
}

/// True when the EPC passes the configured prefix whitelist. An empty
/// whitelist accepts everything.
pub fn is_whitelisted(epc: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|prefix| epc.starts_with(prefix.as_str()))
}

/// SGTIN-96 partition table: (company prefix bits, company prefix digits,
/// item reference bits, item reference digits)
const SGTIN_PARTITIONS: [(u32, usize, u32, usize); 7] = [
    (40, 12, 4, 1),
    (37, 11, 7, 2),
    (34, 10, 10, 3),
    (30, 9, 14, 4),
    (27, 8, 17, 5),
    (24, 7, 20, 6),
    (20, 6, 24, 7),
];

fn decode_sgtin_96(epc: &str) -> Option<DecodedEpc> {
    let bits = u128::from_str_radix(epc, 16).ok()?;

    let header = (bits >> 88) as u8;
    if header != SGTIN_96_HEADER {
        return None;
    }

    let filter = ((bits >> 85) & 0x7) as i64;
    let partition = ((bits >> 82) & 0x7) as usize;
    let &(company_bits, company_digits, item_bits, item_digits) =
        SGTIN_PARTITIONS.get(partition)?;

    let serial = bits & ((1u128 << 38) - 1);
    let item = ((bits >> 38) & ((1u128 << item_bits) - 1)) as u64;
    let company = ((bits >> (38 + item_bits)) & ((1u128 << company_bits) - 1)) as u64;

    let company_str = format!("{:0width$}", company, width = company_digits);
    let item_str = format!("{:0width$}", item, width = item_digits);
    if company_str.len() != company_digits || item_str.len() != item_digits {
        // field value does not fit its digit budget; not a valid encoding
        return None;
    }

    // GTIN-14: indicator digit + company prefix + item reference remainder + check
    let mut gtin13 = String::with_capacity(14);
    gtin13.push_str(&item_str[..1]);
    gtin13.push_str(&company_str);
    gtin13.push_str(&item_str[1..]);
    let check = gtin_check_digit(&gtin13);
    let product_id = format!("{gtin13}{check}");

    let uri = format!("urn:epc:tag:sgtin-96:{filter}.{company_str}.{item_str}.{serial}");

    Some(DecodedEpc {
        product_id,
        uri,
        filter_value: filter,
        encode_format: "sgtin-96".to_string(),
    })
}

/// Mod-10 check digit over a 13-digit body, weights 3/1 from the left
fn gtin_check_digit(digits: &str) -> u32 {
    let sum: u32 = digits
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if i % 2 == 0 {
                d * 3
            } else {
                d
            }
        })
        .sum();
    (10 - sum % 10) % 10
}

fn decode_proprietary(epc: &str, prefix: &str) -> Option<DecodedEpc> {
    let upper = epc.to_uppercase();
    if !upper.starts_with(prefix) || prefix.len() + 14 > upper.len() {
        return None;
    }

    let product_id = upper[prefix.len()..prefix.len() + 14].to_string();
    let serial = &upper[prefix.len() + 14..];
    let uri = format!("urn:epc:tag:proprietary:{product_id}.{serial}");

    Some(DecodedEpc {
        product_id,
        uri,
        filter_value: 0,
        encode_format: "proprietary".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sgtin_chain() -> Vec<TagDecoder> {
        vec![TagDecoder::Sgtin96]
    }

    #[test]
    fn test_rejects_malformed_epc() {
        let err = decode_tag_data(&sgtin_chain(), "30140000").unwrap_err();
        assert!(matches!(err, EpcError::Malformed(_)));

        let err = decode_tag_data(&sgtin_chain(), "3014000000000000000000zz").unwrap_err();
        assert!(matches!(err, EpcError::Malformed(_)));
    }

    #[test]
    fn test_unknown_header_is_unknown_encoding() {
        let err = decode_tag_data(&sgtin_chain(), "ff1400000000000000000001").unwrap_err();
        assert!(matches!(err, EpcError::UnknownEncoding(_)));
    }

    #[test]
    fn test_decode_sgtin_96() {
        // header 0x30, filter 1, partition 5 (7-digit company / 6-digit item),
        // company 0614141, item 812345 (indicator 8), serial 6789
        let epc = "3034257BF7194E4000001A85";
        let decoded = decode_tag_data(&sgtin_chain(), epc).unwrap();

        assert_eq!(decoded.encode_format, "sgtin-96");
        assert_eq!(decoded.filter_value, 1);
        assert_eq!(decoded.uri, "urn:epc:tag:sgtin-96:1.0614141.812345.6789");
        // GTIN-14 of 0614141/812345 with indicator 8
        assert_eq!(decoded.product_id, "80614141123458");
    }

    #[test]
    fn test_decode_proprietary_prefix() {
        let chain = TagDecoder::chain(
            &["sgtin-96".to_string(), "proprietary".to_string()],
            "0F",
        );
        assert_eq!(chain.len(), 2);

        let decoded = decode_tag_data(&chain, "0F00000000000012340000AB").unwrap();
        assert_eq!(decoded.encode_format, "proprietary");
        assert_eq!(decoded.product_id, "00000000000012");
        assert_eq!(decoded.filter_value, 0);
    }

    #[test]
    fn test_chain_skips_unknown_names() {
        let chain = TagDecoder::chain(
            &["sgtin-96".to_string(), "bogus".to_string()],
            "",
        );
        assert_eq!(chain, vec![TagDecoder::Sgtin96]);
    }

    #[test]
    fn test_whitelist() {
        let filters = vec!["3014".to_string(), "0F".to_string()];
        assert!(is_whitelisted("301400000000000000000001", &filters));
        assert!(is_whitelisted("0F00000000000012340000AB", &filters));
        assert!(!is_whitelisted("301500000000000000000001", &filters));
        // empty whitelist accepts everything
        assert!(is_whitelisted("301500000000000000000001", &[]));
    }

    #[test]
    fn test_gtin_check_digit() {
        assert_eq!(gtin_check_digit("0629104150021"), 3);
        assert_eq!(gtin_check_digit("0000000000000"), 0);
    }
}
