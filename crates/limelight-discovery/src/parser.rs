//! mDNS TXT record and instance name parsing for streaming hosts.

use limelight_core::error::ParseError;
use limelight_core::HostFingerprint;
use std::collections::HashMap;
use tracing::warn;

/// Host attributes carried in the TXT record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtInfo {
    /// Display name override (`name`).
    pub name: Option<String>,
    /// Advertised identity fingerprint (`pk`).
    pub fingerprint: Option<HostFingerprint>,
}

/// Parser for mDNS TXT records.
pub struct TxtRecordParser;

impl TxtRecordParser {
    /// Parse a TXT record. Unknown keys are ignored.
    pub fn parse(txt: &HashMap<String, String>) -> Result<TxtInfo, ParseError> {
        let name = txt
            .get("name")
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let fingerprint = txt
            .get("pk")
            .map(|pk| HostFingerprint::from_hex(pk))
            .transpose()?;

        Ok(TxtInfo { name, fingerprint })
    }

    /// Parse a TXT record, dropping malformed fields instead of failing.
    pub fn parse_lenient(instance: &str, txt: &HashMap<String, String>) -> TxtInfo {
        match Self::parse(txt) {
            Ok(info) => info,
            Err(e) => {
                warn!("Ignoring malformed TXT field on {}: {}", instance, e);
                TxtInfo {
                    fingerprint: None,
                    ..Self::parse(&Self::without(txt, "pk")).unwrap_or_default()
                }
            }
        }
    }

    /// Instance label without the service type suffix.
    ///
    /// `"LivingRoomPC._nvstream._tcp.local."` becomes `"LivingRoomPC"`.
    pub fn instance_label<'a>(instance: &'a str, service_type: &str) -> &'a str {
        let suffix = format!(".{}", service_type.trim_start_matches('.'));
        instance
            .strip_suffix(suffix.as_str())
            .or_else(|| instance.split('.').next())
            .filter(|label| !label.is_empty())
            .unwrap_or(instance)
    }

    fn without(txt: &HashMap<String, String>, key: &str) -> HashMap<String, String> {
        txt.iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
