/// MAC address normalisation and sweep-output parsing.
///
/// The canonical form is lowercase, colon-separated, 17 characters
/// (`d0:ba:e4:ef:4d:c4`). Dash-separated and uppercase inputs are
/// accepted and normalised; anything else is silently rejected.

use std::collections::HashSet;

/// Length of a canonical MAC string.
pub const MAC_LEN: usize = 17;

/// Whether `mac` is already in canonical form: six groups of two
/// lowercase hex digits joined by colons.
pub fn is_canonical(mac: &str) -> bool {
    if mac.len() != MAC_LEN {
        return false;
    }
    mac.bytes().enumerate().all(|(i, b)| {
        if i % 3 == 2 {
            b == b':'
        } else {
            matches!(b, b'0'..=b'9' | b'a'..=b'f')
        }
    })
}

/// Normalise a MAC address to canonical form. Returns `None` for
/// malformed input -- callers treat that as "no MAC", never an error.
pub fn normalise(raw: &str) -> Option<String> {
    let mac = raw.trim().replace('-', ":").to_lowercase();
    if is_canonical(&mac) {
        Some(mac)
    } else {
        None
    }
}

/// Extract the MACs we care about from raw `arp-scan` stdout.
///
/// Each line is lowercased and split on whitespace; a token counts as a
/// MAC iff it is in canonical form. The result is filtered by `wanted`
/// so it is bounded by the roster.
pub fn extract_macs(stdout: &str, wanted: &HashSet<String>) -> HashSet<String> {
    let mut found = HashSet::new();
    for line in stdout.lines() {
        for token in line.to_lowercase().split_whitespace() {
            if is_canonical(token) && wanted.contains(token) {
                found.insert(token.to_string());
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wanted(macs: &[&str]) -> HashSet<String> {
        macs.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_normalise_lowercase_colon() {
        assert_eq!(
            normalise("d0:ba:e4:ef:4d:c4"),
            Some("d0:ba:e4:ef:4d:c4".to_string())
        );
    }

    #[test]
    fn test_normalise_uppercase_dashes() {
        assert_eq!(
            normalise("D0-BA-E4-EF-4D-C4"),
            Some("d0:ba:e4:ef:4d:c4".to_string())
        );
    }

    #[test]
    fn test_normalise_rejects_malformed() {
        assert_eq!(normalise(""), None);
        assert_eq!(normalise("d0:ba:e4:ef:4d"), None);
        assert_eq!(normalise("d0:ba:e4:ef:4d:c4:aa"), None);
        assert_eq!(normalise("zz:ba:e4:ef:4d:c4"), None);
        assert_eq!(normalise("d0ba.e4ef.4dc4"), None);
    }

    #[test]
    fn test_is_canonical_rejects_uppercase() {
        assert!(!is_canonical("D0:BA:E4:EF:4D:C4"));
        assert!(is_canonical("d0:ba:e4:ef:4d:c4"));
    }

    #[test]
    fn test_extract_macs_from_arp_scan_output() {
        let stdout = "\
Interface: eth0, type: EN10MB, MAC: aa:aa:aa:aa:aa:aa, IPv4: 192.168.1.2
Starting arp-scan 1.10.0 with 256 hosts
192.168.1.10\tD0:BA:E4:EF:4D:C4\tApple, Inc.
192.168.1.23\t11:22:33:44:55:66\tIntel Corporate

2 packets received by filter, 0 packets dropped by kernel
";
        let wanted_set = wanted(&["d0:ba:e4:ef:4d:c4", "ff:ff:ff:ff:ff:ff"]);
        let found = extract_macs(stdout, &wanted_set);
        assert_eq!(found, wanted(&["d0:ba:e4:ef:4d:c4"]));
    }

    #[test]
    fn test_extract_macs_ignores_unwanted_and_malformed() {
        let stdout = "192.168.1.10 d0:ba:e4:ef:4d:c4 vendor\njunk not:a:mac x\n";
        let found = extract_macs(stdout, &wanted(&["11:22:33:44:55:66"]));
        assert!(found.is_empty());
    }

    #[test]
    fn test_extract_macs_empty_output() {
        let found = extract_macs("", &wanted(&["d0:ba:e4:ef:4d:c4"]));
        assert!(found.is_empty());
    }
}
