// Root-of-trust identifier (idmg)
//
// idmg = "z" + base58btc(
//     version (0x02)
//   | certificate notAfter, u32 LE, in units of 1000 seconds (rounded up)
//   | multihash(blake2s-256, certificate DER)
// )

use blake2::{Blake2s256, Digest};
use chrono::{DateTime, TimeZone, Utc};

use super::provider::PkiError;

const IDMG_VERSION: u8 = 0x02;
const MULTIBASE_BASE58BTC: char = 'z';
/// Varint encoding of the blake2s-256 multihash code (0xb260).
const BLAKE2S_256_CODE: [u8; 3] = [0xe0, 0xe4, 0x02];
const DIGEST_LEN: usize = 32;
const IDMG_BYTES: usize = 1 + 4 + BLAKE2S_256_CODE.len() + 1 + DIGEST_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdmgInfo {
    pub version: u8,
    pub expires_at: DateTime<Utc>,
    pub digest: [u8; DIGEST_LEN],
}

/// Derive the idmg of a DER certificate.
pub fn derive_idmg(cert_der: &[u8]) -> Result<String, PkiError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| PkiError::Parse(format!("certificate: {}", e)))?;
    let not_after = cert.validity().not_after.timestamp().max(0) as u64;
    let expiry = u32::try_from(not_after.div_ceil(1000))
        .map_err(|_| PkiError::Parse("certificate expiry out of range".to_string()))?;

    let digest = Blake2s256::digest(cert_der);

    let mut bytes = Vec::with_capacity(IDMG_BYTES);
    bytes.push(IDMG_VERSION);
    bytes.extend_from_slice(&expiry.to_le_bytes());
    bytes.extend_from_slice(&BLAKE2S_256_CODE);
    bytes.push(DIGEST_LEN as u8);
    bytes.extend_from_slice(&digest);

    Ok(format!(
        "{}{}",
        MULTIBASE_BASE58BTC,
        bs58::encode(bytes).into_string()
    ))
}

/// Decode an idmg string.
pub fn parse_idmg(idmg: &str) -> Result<IdmgInfo, PkiError> {
    let encoded = idmg
        .trim()
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or_else(|| PkiError::Parse("idmg must start with 'z'".to_string()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| PkiError::Parse(format!("idmg is not base58: {}", e)))?;
    if bytes.len() != IDMG_BYTES {
        return Err(PkiError::Parse(format!(
            "idmg has {} bytes, expected {}",
            bytes.len(),
            IDMG_BYTES
        )));
    }
    if bytes[0] != IDMG_VERSION {
        return Err(PkiError::Parse(format!(
            "unsupported idmg version {}",
            bytes[0]
        )));
    }
    if bytes[5..8] != BLAKE2S_256_CODE || bytes[8] as usize != DIGEST_LEN {
        return Err(PkiError::Parse("unsupported idmg hash".to_string()));
    }

    let mut expiry = [0u8; 4];
    expiry.copy_from_slice(&bytes[1..5]);
    let expiry_secs = i64::from(u32::from_le_bytes(expiry)) * 1000;
    let expires_at = Utc
        .timestamp_opt(expiry_secs, 0)
        .single()
        .ok_or_else(|| PkiError::Parse("idmg expiry out of range".to_string()))?;

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&bytes[9..]);

    Ok(IdmgInfo {
        version: bytes[0],
        expires_at,
        digest,
    })
}

/// True when `idmg` was derived from `cert_der`.
pub fn matches_certificate(idmg: &str, cert_der: &[u8]) -> bool {
    derive_idmg(cert_der).is_ok_and(|derived| derived == idmg.trim())
}
