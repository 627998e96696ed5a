//! Device registry: which robots have already been harvested
//!
//! Records are keyed by the canonical hardware address (separators
//! stripped, upper case) and stored as `serial|ssid|password|country|flag`.
//! A known address is never re-inserted, so the first harvest wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::protocol::initiator::Harvest;
use crate::storage::KeyValueStore;

const FIELD_SEPARATOR: char = '|';
const RECORD_FIELDS: usize = 5;

/// Peer hardware address in canonical form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Strip `:` and `-` separators and upper-case the rest
    pub fn new(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| *c != ':' && *c != '-')
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        )
    }

    /// Storage key form
    pub fn canonical(&self) -> &str {
        &self.0
    }

    /// `AA:BB:CC:DD:EE:FF` for 48-bit addresses, canonical form otherwise
    pub fn display_form(&self) -> String {
        if self.0.len() == 12 && self.0.chars().all(|c| c.is_ascii_hexdigit()) {
            self.0
                .as_bytes()
                .chunks(2)
                .map(|pair| String::from_utf8_lossy(pair).into_owned())
                .collect::<Vec<_>>()
                .join(":")
        } else {
            self.0.clone()
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_form())
    }
}

impl From<&str> for DeviceAddress {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// One harvested robot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: DeviceAddress,
    pub serial: String,
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
    pub wifi_country: Option<String>,
    pub configured: bool,
}

impl DeviceRecord {
    pub fn new(address: DeviceAddress, serial: impl Into<String>) -> Self {
        Self {
            address,
            serial: serial.into(),
            wifi_ssid: None,
            wifi_password: None,
            wifi_country: None,
            configured: false,
        }
    }

    pub fn from_harvest(address: DeviceAddress, harvest: &Harvest) -> Self {
        let mut record = Self::new(address, harvest.serial.clone());
        if let Some(wifi) = &harvest.wifi {
            record.wifi_ssid = Some(wifi.ssid.clone());
            record.wifi_password = Some(wifi.password.clone());
            record.wifi_country = Some(wifi.country.clone());
            record.configured = true;
        }
        record
    }

    /// Value stored under the address key
    pub fn encode(&self) -> String {
        let optional = |field: &Option<String>| field.as_deref().map(escape).unwrap_or_default();
        [
            escape(&self.serial),
            optional(&self.wifi_ssid),
            optional(&self.wifi_password),
            optional(&self.wifi_country),
            if self.configured { "1" } else { "0" }.to_string(),
        ]
        .join("|")
    }

    /// Rebuild a record from its key and stored value. Missing trailing fields are empty.
    pub fn decode(key: &str, value: &str) -> Result<Self, StoreError> {
        let corrupt = || StoreError::CorruptRecord(key.to_string());

        let fields: Vec<&str> = value.split(FIELD_SEPARATOR).collect();
        if fields.len() > RECORD_FIELDS {
            return Err(corrupt());
        }

        let field = |i: usize| -> Result<Option<String>, StoreError> {
            match fields.get(i) {
                Some(raw) if !raw.is_empty() => unescape(raw).map(Some).ok_or_else(corrupt),
                _ => Ok(None),
            }
        };

        let configured = match fields.get(4).copied() {
            None | Some("") | Some("0") => false,
            Some("1") => true,
            Some(_) => return Err(corrupt()),
        };

        Ok(Self {
            address: DeviceAddress::new(key),
            serial: field(0)?.unwrap_or_default(),
            wifi_ssid: field(1)?,
            wifi_password: field(2)?,
            wifi_country: field(3)?,
            configured,
        })
    }
}

fn escape(field: &str) -> String {
    field.replace('%', "%25").replace('|', "%7C")
}

fn unescape(field: &str) -> Option<String> {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code.to_ascii_uppercase().as_str() {
            "25" => out.push('%'),
            "7C" => out.push('|'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// Registry of harvested robots over any [`KeyValueStore`]
pub struct DeviceRegistry<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> DeviceRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn exists(&self, address: &DeviceAddress) -> Result<bool, StoreError> {
        self.store.contains(address.canonical())
    }

    /// Store `record` unless its address is already known.
    ///
    /// Returns false, leaving the existing record untouched, for a known address.
    pub fn insert(&mut self, record: &DeviceRecord) -> Result<bool, StoreError> {
        if self.exists(&record.address)? {
            debug!("{} already registered; keeping the first record", record.address);
            return Ok(false);
        }

        self.store.put(record.address.canonical(), &record.encode())?;
        info!("💾 Registered {} (serial {})", record.address, record.serial);
        Ok(true)
    }

    pub fn get(&self, address: &DeviceAddress) -> Result<Option<DeviceRecord>, StoreError> {
        self.store
            .get(address.canonical())?
            .map(|value| DeviceRecord::decode(address.canonical(), &value))
            .transpose()
    }

    pub fn list_all(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        self.store
            .entries()?
            .iter()
            .map(|(key, value)| DeviceRecord::decode(key, value))
            .collect()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.store.entries()?.len())
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        info!("🗑️ Clearing device registry");
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::session::WifiConfig;
    use crate::storage::{FileStore, MemoryStore};
    use tempfile::TempDir;

    #[test]
    fn test_address_canonical_and_display() {
        let address = DeviceAddress::new("aa:bb:cc:dd:ee:0f");
        assert_eq!(address.canonical(), "AABBCCDDEE0F");
        assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:0F");
        assert_eq!(DeviceAddress::new("AA-BB-CC-DD-EE-0F"), address);

        let platform_id = DeviceAddress::new("1f0e2d3c-0000-1000-8000-00805f9b34fb");
        assert_eq!(platform_id.to_string(), "1F0E2D3C00001000800000805F9B34FB");
    }

    #[test]
    fn test_record_encoding() {
        let mut record = DeviceRecord::new(DeviceAddress::new("AABBCCDDEEFF"), "B2-0042");
        assert_eq!(record.encode(), "B2-0042||||0");

        record.wifi_ssid = Some("Lab|Net".to_string());
        record.wifi_password = Some("100%;$(id);".to_string());
        record.wifi_country = Some("US".to_string());
        record.configured = true;
        assert_eq!(record.encode(), "B2-0042|Lab%7CNet|100%25;$(id);|US|1");

        let decoded = DeviceRecord::decode("AABBCCDDEEFF", &record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_decode_tolerates_missing_trailing_fields() {
        let record = DeviceRecord::decode("AABBCCDDEEFF", "SERIAL-ONLY").unwrap();
        assert_eq!(record.serial, "SERIAL-ONLY");
        assert_eq!(record.wifi_ssid, None);
        assert!(!record.configured);
    }

    #[test]
    fn test_record_decode_rejects_garbage() {
        assert!(DeviceRecord::decode("K", "a|b|c|d|1|extra").is_err());
        assert!(DeviceRecord::decode("K", "a|||US|yes").is_err());
        assert!(DeviceRecord::decode("K", "bad%zz").is_err());
        assert!(DeviceRecord::decode("K", "trailing%").is_err());
    }

    #[test]
    fn test_insert_is_first_write_wins() {
        let mut registry = DeviceRegistry::new(MemoryStore::new());
        let address = DeviceAddress::new("11:22:33:44:55:66");

        assert!(!registry.exists(&address).unwrap());
        assert!(registry.insert(&DeviceRecord::new(address.clone(), "FIRST")).unwrap());
        assert!(registry.exists(&DeviceAddress::new("112233445566")).unwrap());

        assert!(!registry.insert(&DeviceRecord::new(address.clone(), "SECOND")).unwrap());
        assert_eq!(registry.get(&address).unwrap().unwrap().serial, "FIRST");
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn test_record_from_harvest() {
        let address = DeviceAddress::new("AABBCCDDEEFF");
        let plain = Harvest {
            serial: "S".to_string(),
            wifi: None,
        };
        assert!(!DeviceRecord::from_harvest(address.clone(), &plain).configured);

        let provisioned = Harvest {
            serial: "S".to_string(),
            wifi: Some(WifiConfig::new("Net", "Pass", "US")),
        };
        let record = DeviceRecord::from_harvest(address, &provisioned);
        assert!(record.configured);
        assert_eq!(record.wifi_country.as_deref(), Some("US"));
    }

    #[test]
    fn test_file_backed_registry_lists_display_form() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");

        {
            let mut registry = DeviceRegistry::new(FileStore::open(&path).unwrap());
            registry
                .insert(&DeviceRecord::new(DeviceAddress::new("aa:aa:aa:aa:aa:02"), "TWO"))
                .unwrap();
            registry
                .insert(&DeviceRecord::new(DeviceAddress::new("aa:aa:aa:aa:aa:01"), "ONE"))
                .unwrap();
        }

        let mut registry = DeviceRegistry::new(FileStore::open(&path).unwrap());
        let records = registry.list_all().unwrap();
        let listed: Vec<_> = records
            .iter()
            .map(|r| (r.address.to_string(), r.serial.as_str()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("AA:AA:AA:AA:AA:01".to_string(), "ONE"),
                ("AA:AA:AA:AA:AA:02".to_string(), "TWO"),
            ]
        );

        registry.clear().unwrap();
        assert_eq!(registry.count().unwrap(), 0);
    }
}
