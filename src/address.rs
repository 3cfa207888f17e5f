//! Destination address decoding and validation
//!
//! The burn contract stores the recipient as raw `bytes` holding the ASCII of
//! a bech32 address. Anything that does not decode under the expected prefix
//! cannot be minted to. Both account (20-byte) and contract or module
//! (32-byte) payloads are accepted.

use bech32::FromBase32;
use eyre::{eyre, Result};

/// Decode the recipient bytes of a `LogBurn` event into a string
pub fn recipient_from_bytes(bytes: &[u8]) -> Result<String> {
    let s = std::str::from_utf8(bytes).map_err(|e| eyre!("Recipient is not UTF-8: {}", e))?;
    // web3's hexToAscii leaves trailing zero padding behind
    Ok(s.trim_end_matches('\0').to_string())
}

/// Decode a bech32 address to its raw payload
///
/// Returns (raw_bytes, hrp) where hrp is the human-readable prefix
pub fn decode_bech32_address(addr: &str) -> Result<(Vec<u8>, String)> {
    let (hrp, data, _variant) =
        bech32::decode(addr).map_err(|e| eyre!("Invalid bech32 address: {}", e))?;

    let bytes = Vec::<u8>::from_base32(&data).map_err(|e| eyre!("Invalid base32 data: {}", e))?;
    if bytes.is_empty() {
        return Err(eyre!("Invalid address: empty payload"));
    }

    Ok((bytes, hrp))
}

/// Check a destination address against the expected prefix and checksum
pub fn validate_cosmos_address(addr: &str, expected_prefix: &str) -> Result<()> {
    let (_, hrp) = decode_bech32_address(addr)?;
    if hrp != expected_prefix {
        return Err(eyre!(
            "Unexpected address prefix: expected {}, got {}",
            expected_prefix,
            hrp
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn encode_test_address(raw: &[u8], hrp: &str) -> String {
    use bech32::{ToBase32, Variant};
    bech32::encode(hrp, raw.to_base32(), Variant::Bech32).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = encode_test_address(&[7u8; 20], "secret");
        assert!(validate_cosmos_address(&addr, "secret").is_ok());
    }

    #[test]
    fn test_contract_address_accepted() {
        let addr = encode_test_address(&[7u8; 32], "secret");
        assert!(validate_cosmos_address(&addr, "secret").is_ok());
        assert_eq!(decode_bech32_address(&addr).unwrap().0.len(), 32);
    }

    #[test]
    fn test_known_address_roundtrip() {
        let addr = "secret1an0d4scr5zrwyjywpdxlq80uvr7jnu2emp3n65";
        let (raw, hrp) = decode_bech32_address(addr).unwrap();
        assert_eq!(hrp, "secret");
        assert_eq!(raw.len(), 20);
        assert_eq!(encode_test_address(&raw, "secret"), addr);
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let addr = encode_test_address(&[7u8; 20], "cosmos");
        let err = validate_cosmos_address(&addr, "secret").unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut addr = encode_test_address(&[7u8; 20], "secret");
        let last = addr.pop().unwrap();
        addr.push(if last == 'q' { 'p' } else { 'q' });
        assert!(validate_cosmos_address(&addr, "secret").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validate_cosmos_address("", "secret").is_err());
        assert!(validate_cosmos_address("not an address", "secret").is_err());
        assert!(validate_cosmos_address("0xdead000000000000000000000000000000000000", "secret").is_err());
        assert!(validate_cosmos_address(&encode_test_address(&[], "secret"), "secret").is_err());
    }

    #[test]
    fn test_recipient_from_bytes() {
        let addr = encode_test_address(&[1u8; 20], "secret");
        let mut bytes = addr.as_bytes().to_vec();
        bytes.extend([0u8; 4]);
        assert_eq!(recipient_from_bytes(&bytes).unwrap(), addr);
        assert!(recipient_from_bytes(&[0xff, 0xfe]).is_err());
    }
}
