// Cryptographic utilities

use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Base58 alphabet (no 0/O/I/l) so a printed passphrase can be typed back without ambiguity.
const PASSPHRASE_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const PASSPHRASE_GROUPS: usize = 6;
const PASSPHRASE_GROUP_LEN: usize = 4;

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 base64 digest (STANDARD).
pub fn sha256_base64(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Compute a safe fingerprint for a secret (hash only; never store the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    sha256_base64(input.as_bytes())
}

/// Fill a fixed-size buffer from the system CSPRNG.
pub fn random_bytes<const N: usize>(rng: &SystemRandom) -> Result<[u8; N], ring::error::Unspecified> {
    let mut buf = [0u8; N];
    rng.fill(&mut buf)?;
    Ok(buf)
}

/// Generate a root key passphrase, e.g. `Xq7k-2Bm9-...` (6 groups of 4 base58 characters).
pub fn generate_passphrase(rng: &SystemRandom) -> Result<String, ring::error::Unspecified> {
    let wanted = PASSPHRASE_GROUPS * PASSPHRASE_GROUP_LEN;
    // Largest multiple of the alphabet size that fits in a byte; anything above is rejected to
    // keep the distribution uniform.
    let limit = (256 / PASSPHRASE_ALPHABET.len() * PASSPHRASE_ALPHABET.len()) as u8;

    let mut chars = Vec::with_capacity(wanted);
    while chars.len() < wanted {
        let block: [u8; 32] = random_bytes(rng)?;
        for b in block {
            if b < limit && chars.len() < wanted {
                chars.push(PASSPHRASE_ALPHABET[b as usize % PASSPHRASE_ALPHABET.len()] as char);
            }
        }
    }

    let groups: Vec<String> = chars
        .chunks(PASSPHRASE_GROUP_LEN)
        .map(|g| g.iter().collect())
        .collect();
    Ok(groups.join("-"))
}
