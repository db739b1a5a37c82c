// Root certificate authority backed by rcgen (Ed25519) and PKCS#8 PBES2 key encryption.

use log::{debug, info};
use pem::{EncodeConfig, LineEnding, Pem};
use pkcs8::pkcs5::pbes2;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use ring::rand::SystemRandom;

use super::idmg;
use super::provider::{GeneratedRoot, KeyCertProvider, LoadedRoot, PkiError, RootMaterial};
use crate::security::crypto;

pub const TAG_CERTIFICATE: &str = "CERTIFICATE";
pub const TAG_ENCRYPTED_KEY: &str = "ENCRYPTED PRIVATE KEY";

/// PBKDF2 rounds for the root key. Tests override this through `with_kdf_iterations`.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
const ROOT_VALIDITY_DAYS: i64 = 20 * 365;
const INTERMEDIATE_VALIDITY_DAYS: i64 = 5 * 365;
const ROOT_COMMON_NAME: &str = "MilleGrille";

pub struct RootAuthority {
    rng: SystemRandom,
    kdf_iterations: u32,
}

impl Default for RootAuthority {
    fn default() -> Self {
        Self::with_kdf_iterations(DEFAULT_KDF_ITERATIONS)
    }
}

impl RootAuthority {
    pub fn with_kdf_iterations(kdf_iterations: u32) -> Self {
        Self {
            rng: SystemRandom::new(),
            kdf_iterations: kdf_iterations.max(1),
        }
    }

    fn random_serial(&self) -> Result<SerialNumber, PkiError> {
        let bytes: [u8; 8] = crypto::random_bytes(&self.rng)
            .map_err(|_| PkiError::Generate("system RNG unavailable".to_string()))?;
        // Keep the serial positive
        Ok(SerialNumber::from(u64::from_be_bytes(bytes) >> 1))
    }

    fn encrypt_key(&self, key_der: &[u8], passphrase: &str) -> Result<String, PkiError> {
        let salt: [u8; 16] = crypto::random_bytes(&self.rng)
            .map_err(|_| PkiError::Encrypt("system RNG unavailable".to_string()))?;
        let iv: [u8; 16] = crypto::random_bytes(&self.rng)
            .map_err(|_| PkiError::Encrypt("system RNG unavailable".to_string()))?;

        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(self.kdf_iterations, &salt, &iv)
            .map_err(|e| PkiError::Encrypt(e.to_string()))?;
        let info = PrivateKeyInfo::try_from(key_der).map_err(|e| PkiError::Encrypt(e.to_string()))?;
        let encrypted = info
            .encrypt_with_params(params, passphrase.as_bytes())
            .map_err(|e| PkiError::Encrypt(e.to_string()))?;

        Ok(encode_pem(TAG_ENCRYPTED_KEY, encrypted.as_bytes().to_vec()))
    }
}

/// Encode DER bytes as PEM with LF line endings.
pub fn encode_pem(tag: &str, der: Vec<u8>) -> String {
    pem::encode_config(
        &Pem::new(tag, der),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    )
}

/// Decode a PEM document, checking its armour tag.
pub fn decode_pem(input: &str, expected_tag: &str) -> Result<Vec<u8>, PkiError> {
    let parsed = pem::parse(input.trim()).map_err(|e| PkiError::Parse(e.to_string()))?;
    if parsed.tag() != expected_tag {
        return Err(PkiError::Parse(format!(
            "expected a {} PEM block, found {}",
            expected_tag,
            parsed.tag()
        )));
    }
    Ok(parsed.into_contents())
}

fn validity_window(days: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    // Small backdate so a slightly skewed node clock still accepts the certificate
    (
        now - time::Duration::minutes(5),
        now + time::Duration::days(days),
    )
}

impl KeyCertProvider for RootAuthority {
    fn generate_root(&self) -> Result<GeneratedRoot, PkiError> {
        info!("[PHASE: pki] [STEP: generate_root] Generating Ed25519 root key and certificate");

        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ED25519)
            .map_err(|e| PkiError::Generate(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, ROOT_COMMON_NAME);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity_window(ROOT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;
        params.serial_number = Some(self.random_serial()?);

        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| PkiError::Generate(e.to_string()))?;
        let idmg = idmg::derive_idmg(certificate.der())?;

        let passphrase = crypto::generate_passphrase(&self.rng)
            .map_err(|_| PkiError::Generate("system RNG unavailable".to_string()))?;
        let encrypted_key_pem = self.encrypt_key(&key_pair.serialize_der(), &passphrase)?;

        info!(
            "[PHASE: pki] [STEP: generate_root] Root generated idmg={} passphrase_fp={}",
            idmg,
            crypto::secret_fingerprint(&passphrase)
        );

        Ok(GeneratedRoot {
            idmg,
            material: RootMaterial {
                certificate_pem: encode_pem(TAG_CERTIFICATE, certificate.der().to_vec()),
                encrypted_key_pem,
                passphrase,
            },
        })
    }

    fn load_root(
        &self,
        certificate_pem: &str,
        encrypted_key_pem: &str,
        passphrase: &str,
    ) -> Result<LoadedRoot, PkiError> {
        let cert_der = decode_pem(certificate_pem, TAG_CERTIFICATE)?;
        let enc_der = decode_pem(encrypted_key_pem, TAG_ENCRYPTED_KEY)?;

        let encrypted =
            EncryptedPrivateKeyInfo::try_from(enc_der.as_slice()).map_err(|e| PkiError::Parse(e.to_string()))?;
        let decrypted = encrypted
            .decrypt(passphrase.trim().as_bytes())
            .map_err(|e| PkiError::Decrypt(e.to_string()))?;
        let key_der = decrypted.as_bytes().to_vec();
        let key_pair =
            KeyPair::try_from(key_der.as_slice()).map_err(|e| PkiError::Decrypt(e.to_string()))?;

        let (_, cert) = x509_parser::parse_x509_certificate(&cert_der)
            .map_err(|e| PkiError::Parse(format!("certificate: {}", e)))?;
        if cert.public_key().subject_public_key.data.as_ref() != key_pair.public_key_raw() {
            return Err(PkiError::KeyMismatch);
        }

        let idmg = idmg::derive_idmg(&cert_der)?;
        debug!("[PHASE: pki] [STEP: load_root] Root key decrypted idmg={}", idmg);

        Ok(LoadedRoot::new(
            idmg,
            RootMaterial {
                certificate_pem: encode_pem(TAG_CERTIFICATE, cert_der),
                encrypted_key_pem: encrypted_key_pem.trim().to_string() + "\n",
                passphrase: passphrase.trim().to_string(),
            },
            key_der,
        ))
    }

    fn sign_csr(&self, root: &LoadedRoot, csr_pem: &str) -> Result<String, PkiError> {
        let key_pair =
            KeyPair::try_from(root.key_der()).map_err(|e| PkiError::Sign(e.to_string()))?;
        let issuer = CertificateParams::from_ca_cert_pem(&root.material.certificate_pem)
            .and_then(|params| params.self_signed(&key_pair))
            .map_err(|e| PkiError::Sign(format!("root certificate: {}", e)))?;

        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem.trim())
            .map_err(|e| PkiError::Sign(format!("CSR: {}", e)))?;
        csr.params
            .distinguished_name
            .push(DnType::OrganizationName, root.idmg.as_str());
        csr.params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        csr.params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity_window(INTERMEDIATE_VALIDITY_DAYS);
        csr.params.not_before = not_before;
        csr.params.not_after = not_after;
        csr.params.serial_number = Some(self.random_serial()?);

        let intermediate = csr
            .signed_by(&issuer, &key_pair)
            .map_err(|e| PkiError::Sign(e.to_string()))?;

        info!(
            "[PHASE: pki] [STEP: sign_csr] Intermediate issued for idmg={}",
            root.idmg
        );
        Ok(encode_pem(TAG_CERTIFICATE, intermediate.der().to_vec()))
    }

    fn derive_idmg(&self, certificate_pem: &str) -> Result<String, PkiError> {
        let der = decode_pem(certificate_pem, TAG_CERTIFICATE)?;
        idmg::derive_idmg(&der)
    }
}
