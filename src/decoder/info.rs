//! Device information queries: `D?`, `V?`, `a?` and `s?`.

use std::str::FromStr;

use serde::Serialize;

use crate::error::ProtocolError;

fn text<'a>(payload: &'a [u8], what: &str) -> Result<&'a str, ProtocolError> {
    std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::malformed(format!("{} payload is not UTF-8", what)))
}

fn number<T: FromStr>(raw: &str, what: &str) -> Result<T, ProtocolError> {
    raw.parse()
        .map_err(|_| ProtocolError::malformed(format!("{} has invalid number {:?}", what, raw)))
}

/// Tab-separated answer to `D?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub vendor: String,
    pub article: String,
    pub name: String,
    pub location: String,
    pub ip: String,
    pub subnet: String,
    pub gateway: String,
    pub mac: String,
    pub dhcp: bool,
    pub xml_rpc_port: u16,
}

pub fn decode_device_info(payload: &[u8]) -> Result<DeviceInfo, ProtocolError> {
    let fields: Vec<&str> = text(payload, "device info")?.split('\t').collect();
    let [vendor, article, name, location, ip, subnet, gateway, mac, dhcp, port] = fields[..] else {
        return Err(ProtocolError::malformed(format!(
            "device info has {} fields, expected 10",
            fields.len()
        )));
    };
    let dhcp = match dhcp {
        "0" => false,
        "1" => true,
        other => {
            return Err(ProtocolError::malformed(format!(
                "device info DHCP flag {:?} is not 0 or 1",
                other
            )));
        }
    };
    Ok(DeviceInfo {
        vendor: vendor.to_string(),
        article: article.to_string(),
        name: name.to_string(),
        location: location.to_string(),
        ip: ip.to_string(),
        subnet: subnet.to_string(),
        gateway: gateway.to_string(),
        mac: mac.to_string(),
        dhcp,
        xml_rpc_port: number(port.trim(), "device info port")?,
    })
}

/// Answer to `V?`: `<current> <min> <max>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolVersions {
    pub current: u8,
    pub min: u8,
    pub max: u8,
}

pub fn decode_protocol_version(payload: &[u8]) -> Result<ProtocolVersions, ProtocolError> {
    let parts: Vec<&str> = text(payload, "protocol version")?.split_whitespace().collect();
    let [current, min, max] = parts[..] else {
        return Err(ProtocolError::malformed(format!(
            "protocol version has {} fields, expected 3",
            parts.len()
        )));
    };
    Ok(ProtocolVersions {
        current: number(current, "current protocol version")?,
        min: number(min, "minimum protocol version")?,
        max: number(max, "maximum protocol version")?,
    })
}

/// One `<group><number>` entry of the application list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplicationSlot {
    pub group: u8,
    pub number: u8,
}

impl FromStr for ApplicationSlot {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::malformed(format!(
                "application entry {:?} is not <group><2 digits>",
                s
            )));
        }
        Ok(ApplicationSlot {
            group: number(&s[..1], "application group")?,
            number: number(&s[1..], "application number")?,
        })
    }
}

/// Answer to `a?`: a count, the active application, then every application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationList {
    pub active: Option<ApplicationSlot>,
    pub applications: Vec<ApplicationSlot>,
}

pub fn decode_applications(payload: &[u8]) -> Result<ApplicationList, ProtocolError> {
    let mut parts = text(payload, "application list")?.split_whitespace();
    let count: usize = number(
        parts
            .next()
            .ok_or_else(|| ProtocolError::malformed("empty application list"))?,
        "application count",
    )?;
    let slots = parts
        .map(str::parse)
        .collect::<Result<Vec<ApplicationSlot>, _>>()?;

    if count == 0 && slots.is_empty() {
        return Ok(ApplicationList {
            active: None,
            applications: Vec::new(),
        });
    }
    if slots.len() != count + 1 {
        return Err(ProtocolError::malformed(format!(
            "application list announces {} entries but carries {}",
            count,
            slots.len().saturating_sub(1)
        )));
    }
    Ok(ApplicationList {
        active: Some(slots[0]),
        applications: slots[1..].to_vec(),
    })
}

/// Answer to `s?`: `<total> <good> <bad>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: u64,
    pub good: u64,
    pub bad: u64,
}

pub fn decode_statistics(payload: &[u8]) -> Result<Statistics, ProtocolError> {
    let parts: Vec<&str> = text(payload, "statistics")?.split_whitespace().collect();
    let [total, good, bad] = parts[..] else {
        return Err(ProtocolError::malformed(format!(
            "statistics has {} fields, expected 3",
            parts.len()
        )));
    };
    Ok(Statistics {
        total: number(total, "statistics total")?,
        good: number(good, "statistics good")?,
        bad: number(bad, "statistics bad")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info() {
        let payload = b"IFM ELECTRONIC\tO2D220AC\tline-cam\tstation 4\t192.168.1.110\t255.255.255.0\t192.168.1.1\t00:02:01:AA:BB:CC\t0\t80";
        let info = decode_device_info(payload).unwrap();
        assert_eq!(info.article, "O2D220AC");
        assert_eq!(info.location, "station 4");
        assert_eq!(info.mac, "00:02:01:AA:BB:CC");
        assert!(!info.dhcp);
        assert_eq!(info.xml_rpc_port, 80);
    }

    #[test]
    fn test_device_info_field_count() {
        assert!(matches!(
            decode_device_info(b"IFM\tO2D220AC"),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_protocol_version() {
        assert_eq!(
            decode_protocol_version(b"03 01 03").unwrap(),
            ProtocolVersions {
                current: 3,
                min: 1,
                max: 3
            }
        );
        assert!(decode_protocol_version(b"03 01").is_err());
    }

    #[test]
    fn test_applications() {
        let list = decode_applications(b"002 004 001 004").unwrap();
        assert_eq!(
            list.active,
            Some(ApplicationSlot {
                group: 0,
                number: 4
            })
        );
        assert_eq!(list.applications.len(), 2);
        assert_eq!(list.applications[0].number, 1);

        let empty = decode_applications(b"000").unwrap();
        assert_eq!(empty.active, None);
        assert!(empty.applications.is_empty());

        assert!(decode_applications(b"003 004 001").is_err());
        assert!(decode_applications(b"001 04 04").is_err());
    }

    #[test]
    fn test_statistics() {
        assert_eq!(
            decode_statistics(b"120 115 5").unwrap(),
            Statistics {
                total: 120,
                good: 115,
                bad: 5
            }
        );
        assert!(decode_statistics(b"120 x 5").is_err());
    }
}
