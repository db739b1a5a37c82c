// Input validation utilities

use anyhow::Result;
use regex::Regex;

use crate::pki::idmg::parse_idmg;

const MAX_DOMAIN_LEN: usize = 253;

/// Check a fully qualified DNS name: dot-separated labels of 1-63 letters, digits or hyphens
/// (never leading or trailing a label), ending with an alphabetic TLD of 2-6 letters.
pub fn validate_domain(domain: &str) -> Result<()> {
    let d = domain.trim();
    if d.is_empty() {
        return Err(anyhow::anyhow!("Domain name is required"));
    }
    if d.len() > MAX_DOMAIN_LEN {
        return Err(anyhow::anyhow!(
            "Domain name cannot exceed {} characters",
            MAX_DOMAIN_LEN
        ));
    }

    let label_re = Regex::new(r"^[A-Za-z0-9-]{1,63}$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile label regex: {}", e))?;
    let tld_re = Regex::new(r"^[A-Za-z]{2,6}$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile TLD regex: {}", e))?;

    let labels: Vec<&str> = d.split('.').collect();
    if labels.len() < 2 {
        return Err(anyhow::anyhow!(
            "Domain name '{}' must include a top-level domain",
            d
        ));
    }

    let (tld, hosts) = labels.split_last().unwrap_or((&"", &[]));
    for label in hosts {
        if !label_re.is_match(label) || label.starts_with('-') || label.ends_with('-') {
            return Err(anyhow::anyhow!(
                "Domain name '{}' contains an invalid label '{}'",
                d,
                label
            ));
        }
    }
    if !tld_re.is_match(tld) {
        return Err(anyhow::anyhow!(
            "Domain name '{}' has an invalid top-level domain '{}'",
            d,
            tld
        ));
    }

    Ok(())
}

pub fn is_valid_domain(domain: &str) -> bool {
    validate_domain(domain).is_ok()
}

/// Validate every additional domain; returns the first offending entry.
pub fn validate_additional_domains(domains: &[String]) -> Result<()> {
    for d in domains {
        validate_domain(d)?;
    }
    Ok(())
}

/// Validate an idmg typed in by the operator.
pub fn validate_idmg(idmg: &str) -> Result<()> {
    let s = idmg.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("The idmg is required"));
    }
    parse_idmg(s).map_err(|e| anyhow::anyhow!("Invalid idmg: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_domains() {
        for d in ["example.com", "node-1.example.com", "a.b.c.example.info", "X1.io"] {
            assert!(is_valid_domain(d), "{} should be valid", d);
        }
    }

    #[test]
    fn rejects_malformed_domains() {
        for d in [
            "",
            "localhost",
            "-bad.example.com",
            "bad-.example.com",
            "under_score.example.com",
            "example.c",
            "example.comtoolong",
            "example.c0m",
            "double..dot.com",
            "trailing.dot.com.",
        ] {
            assert!(!is_valid_domain(d), "{} should be rejected", d);
        }
        let long_label = format!("{}.com", "a".repeat(64));
        assert!(!is_valid_domain(&long_label));
    }

    #[test]
    fn additional_domains_report_first_failure() {
        let ok = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        assert!(validate_additional_domains(&ok).is_ok());
        let bad = vec!["a.example.com".to_string(), "nope".to_string()];
        let err = validate_additional_domains(&bad).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn idmg_format_is_checked() {
        assert!(validate_idmg("").is_err());
        assert!(validate_idmg("abc").is_err());
        assert!(validate_idmg("z0OIl").is_err());

        let mut bytes = vec![0x02, 0x10, 0x27, 0x00, 0x00, 0xe0, 0xe4, 0x02, 0x20];
        bytes.extend_from_slice(&[7u8; 32]);
        let idmg = format!("z{}", bs58::encode(bytes).into_string());
        assert!(validate_idmg(&idmg).is_ok());
    }
}
