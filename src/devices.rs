//! YubiKey enumeration and device descriptors.
//!
//! `ykman list` prints one free-text line per attached key, e.g.:
//!
//! ```text
//! YubiKey 5 NFC (5.2.7) [OTP+FIDO+CCID] Serial: 16021303
//! ```
//!
//! There is no machine-readable output mode we rely on — each line is kept
//! verbatim as a [`DeviceDescriptor`] label, and the serial is extracted from
//! the trailing token after the `Serial:` phrase. A descriptor whose serial
//! cannot be parsed is unusable for targeting but still listed.

use thiserror::Error;

use crate::ykman::{InvokeError, ToolRunner};

/// The delimiter phrase preceding the serial token in a `ykman list` line.
const SERIAL_PHRASE: &str = "Serial:";

/// One line of `ykman list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// The full enumeration line: model, firmware version, enabled applications.
    pub label: String,
}

impl DeviceDescriptor {
    /// Extract the numeric serial from the label, if present and parseable.
    pub fn serial(&self) -> Option<u64> {
        let (_, rest) = self.label.rsplit_once(SERIAL_PHRASE)?;
        rest.split_whitespace().next()?.parse().ok()
    }
}

/// Enumeration failure — distinct from a valid empty device list.
#[derive(Debug, Error)]
pub enum ListError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("ykman list failed: {stderr}")]
    Failed { stderr: String },
}

/// Run `ykman list` and return the attached devices in enumeration order.
///
/// Zero devices is a valid `Ok(vec![])` outcome, not an error.
pub async fn list_devices<R: ToolRunner>(runner: &R) -> Result<Vec<DeviceDescriptor>, ListError> {
    let inv = runner.run(&["list".to_string()]).await?;
    if !inv.success {
        return Err(ListError::Failed {
            stderr: inv.stderr.trim().to_string(),
        });
    }
    Ok(parse_device_list(&inv.stdout))
}

/// Split `ykman list` stdout into descriptors, one per non-empty line.
pub fn parse_device_list(stdout: &str) -> Vec<DeviceDescriptor> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| DeviceDescriptor {
            label: line.to_string(),
        })
        .collect()
}

/// Render a 1-indexed selection menu from a descriptor list.
pub fn render_menu(devices: &[DeviceDescriptor]) -> String {
    let mut menu = String::from("Multiple YubiKeys are attached. Select the device to use:\n\n");
    for (i, device) in devices.iter().enumerate() {
        menu.push_str(&format!("  {}. {}\n", i + 1, device.label));
    }
    menu.push_str("\nReply with the number of your selection.");
    menu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_from_typical_line() {
        let d = DeviceDescriptor {
            label: "YubiKey 5 NFC (5.2.7) [OTP+FIDO+CCID] Serial: 16021303".into(),
        };
        assert_eq!(d.serial(), Some(16021303));
    }

    #[test]
    fn serial_missing_phrase() {
        let d = DeviceDescriptor {
            label: "YubiKey 5 NFC (5.2.7) [OTP+FIDO+CCID]".into(),
        };
        assert_eq!(d.serial(), None);
    }

    #[test]
    fn serial_non_numeric() {
        let d = DeviceDescriptor {
            label: "YubiKey 5 NFC Serial: n/a".into(),
        };
        assert_eq!(d.serial(), None);
    }

    #[test]
    fn serial_uses_last_phrase_occurrence() {
        let d = DeviceDescriptor {
            label: "Serial: bogus model Serial: 42".into(),
        };
        assert_eq!(d.serial(), Some(42));
    }

    #[test]
    fn parse_skips_blank_lines() {
        let devices = parse_device_list("YubiKey A Serial: 111\n\n  \nYubiKey B Serial: 222\n");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].label, "YubiKey A Serial: 111");
        assert_eq!(devices[1].label, "YubiKey B Serial: 222");
    }

    #[test]
    fn parse_empty_output() {
        assert!(parse_device_list("").is_empty());
        assert!(parse_device_list("\n\n").is_empty());
    }

    #[test]
    fn parse_preserves_order() {
        let stdout = "YubiKey A Serial: 3\nYubiKey B Serial: 1\nYubiKey C Serial: 2\n";
        let first = parse_device_list(stdout);
        let second = parse_device_list(stdout);
        assert_eq!(first, second);
        let serials: Vec<_> = first.iter().filter_map(DeviceDescriptor::serial).collect();
        assert_eq!(serials, vec![3, 1, 2]);
    }

    #[test]
    fn menu_is_one_indexed() {
        let devices = parse_device_list("YubiKey A Serial: 111\nYubiKey B Serial: 222\n");
        let menu = render_menu(&devices);
        assert!(menu.contains("  1. YubiKey A Serial: 111"));
        assert!(menu.contains("  2. YubiKey B Serial: 222"));
    }
}
