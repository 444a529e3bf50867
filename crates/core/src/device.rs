//! Device and locale normalization for client-supplied `userData`.
//!
//! Maps raw hardware identifiers (`iPhone14,7`, `arm64`, `SM-S911B`) to
//! commercial names, splits `XX-YY` locale strings, and copies a handful of
//! display fields under their dashboard names. Unknown fields are carried
//! through untouched and the normalizer never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::types::{JsonMap, NormalizedUserData, RegionInfo};

/// `<identifier> (<display name>)`, as produced by an earlier normalization.
static PAIRED_DEVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s*\((.*)\)$").expect("valid regex"));

/// Two uppercase letters, hyphen, two uppercase letters.
static LOCALE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]{2})-([A-Z]{2})$").expect("valid regex"));

/// Model code to commercial name.
const DEVICE_MODELS: &[(&str, &str)] = &[
    // Simulators report the host architecture.
    ("arm64", "iOS Simulator"),
    ("x86_64", "iOS Simulator"),
    ("i386", "iOS Simulator"),
    // iPhone
    ("iPhone10,1", "iPhone 8"),
    ("iPhone10,4", "iPhone 8"),
    ("iPhone10,2", "iPhone 8 Plus"),
    ("iPhone10,5", "iPhone 8 Plus"),
    ("iPhone10,3", "iPhone X"),
    ("iPhone10,6", "iPhone X"),
    ("iPhone11,2", "iPhone XS"),
    ("iPhone11,4", "iPhone XS Max"),
    ("iPhone11,6", "iPhone XS Max"),
    ("iPhone11,8", "iPhone XR"),
    ("iPhone12,1", "iPhone 11"),
    ("iPhone12,3", "iPhone 11 Pro"),
    ("iPhone12,5", "iPhone 11 Pro Max"),
    ("iPhone12,8", "iPhone SE (2nd generation)"),
    ("iPhone13,1", "iPhone 12 mini"),
    ("iPhone13,2", "iPhone 12"),
    ("iPhone13,3", "iPhone 12 Pro"),
    ("iPhone13,4", "iPhone 12 Pro Max"),
    ("iPhone14,2", "iPhone 13 Pro"),
    ("iPhone14,3", "iPhone 13 Pro Max"),
    ("iPhone14,4", "iPhone 13 mini"),
    ("iPhone14,5", "iPhone 13"),
    ("iPhone14,6", "iPhone SE (3rd generation)"),
    ("iPhone14,7", "iPhone 14"),
    ("iPhone14,8", "iPhone 14 Plus"),
    ("iPhone15,2", "iPhone 14 Pro"),
    ("iPhone15,3", "iPhone 14 Pro Max"),
    ("iPhone15,4", "iPhone 15"),
    ("iPhone15,5", "iPhone 15 Plus"),
    ("iPhone16,1", "iPhone 15 Pro"),
    ("iPhone16,2", "iPhone 15 Pro Max"),
    ("iPhone17,1", "iPhone 16 Pro"),
    ("iPhone17,2", "iPhone 16 Pro Max"),
    ("iPhone17,3", "iPhone 16"),
    ("iPhone17,4", "iPhone 16 Plus"),
    ("iPhone17,5", "iPhone 16e"),
    // iPad
    ("iPad11,6", "iPad (8th generation)"),
    ("iPad11,7", "iPad (8th generation)"),
    ("iPad12,1", "iPad (9th generation)"),
    ("iPad12,2", "iPad (9th generation)"),
    ("iPad13,18", "iPad (10th generation)"),
    ("iPad13,19", "iPad (10th generation)"),
    ("iPad13,1", "iPad Air (4th generation)"),
    ("iPad13,2", "iPad Air (4th generation)"),
    ("iPad13,16", "iPad Air (5th generation)"),
    ("iPad13,17", "iPad Air (5th generation)"),
    ("iPad14,1", "iPad mini (6th generation)"),
    ("iPad14,2", "iPad mini (6th generation)"),
    ("iPad13,4", "iPad Pro 11-inch (3rd generation)"),
    ("iPad13,5", "iPad Pro 11-inch (3rd generation)"),
    ("iPad13,6", "iPad Pro 11-inch (3rd generation)"),
    ("iPad13,7", "iPad Pro 11-inch (3rd generation)"),
    ("iPad13,8", "iPad Pro 12.9-inch (5th generation)"),
    ("iPad13,9", "iPad Pro 12.9-inch (5th generation)"),
    ("iPad13,10", "iPad Pro 12.9-inch (5th generation)"),
    ("iPad13,11", "iPad Pro 12.9-inch (5th generation)"),
    ("iPad14,3", "iPad Pro 11-inch (4th generation)"),
    ("iPad14,4", "iPad Pro 11-inch (4th generation)"),
    ("iPad14,5", "iPad Pro 12.9-inch (6th generation)"),
    ("iPad14,6", "iPad Pro 12.9-inch (6th generation)"),
    // Android
    ("SM-G991B", "Galaxy S21"),
    ("SM-G996B", "Galaxy S21+"),
    ("SM-G998B", "Galaxy S21 Ultra"),
    ("SM-S901B", "Galaxy S22"),
    ("SM-S908B", "Galaxy S22 Ultra"),
    ("SM-S911B", "Galaxy S23"),
    ("SM-S918B", "Galaxy S23 Ultra"),
    ("SM-S921B", "Galaxy S24"),
    ("SM-S928B", "Galaxy S24 Ultra"),
    ("SM-A546B", "Galaxy A54 5G"),
    ("SM-A156B", "Galaxy A15 5G"),
];

/// Look up the commercial name for a raw model code.
pub fn commercial_name(identifier: &str) -> Option<&'static str> {
    DEVICE_MODELS
        .iter()
        .find(|(code, _)| *code == identifier)
        .map(|(_, name)| *name)
}

/// Result of decomposing a `device` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName {
    pub identifier: String,
    pub commercial_name: String,
}

impl DeviceName {
    /// `identifier (commercialName)` when they differ, else the identifier.
    pub fn display(&self) -> String {
        if self.identifier == self.commercial_name {
            self.identifier.clone()
        } else {
            format!("{} ({})", self.identifier, self.commercial_name)
        }
    }
}

/// Split a raw `device` value into identifier and commercial name.
///
/// The table wins over a name already paired in the input; an unmapped code
/// keeps the paired name if there is one, otherwise passes through unchanged.
pub fn parse_device(raw: &str) -> DeviceName {
    let raw = raw.trim();
    let (identifier, paired) = match PAIRED_DEVICE_RE.captures(raw) {
        Some(caps) => (
            caps[1].to_string(),
            Some(caps[2].trim().to_string()).filter(|s| !s.is_empty()),
        ),
        None => (raw.to_string(), None),
    };

    let commercial_name = commercial_name(&identifier)
        .map(str::to_string)
        .or(paired)
        .unwrap_or_else(|| identifier.clone());

    DeviceName {
        identifier,
        commercial_name,
    }
}

/// Split an `XX-YY` locale into region info, or `None` if it does not match.
pub fn parse_locale(raw: &str) -> Option<RegionInfo> {
    let caps = LOCALE_RE.captures(raw)?;
    Some(RegionInfo {
        language: caps[1].to_string(),
        country: caps[2].to_string(),
        locale: raw.to_string(),
    })
}

/// Produce the enriched copy of a client's `userData`.
pub fn normalize_user_data(raw: &JsonMap) -> NormalizedUserData {
    let mut out = NormalizedUserData {
        passthrough: raw.clone(),
        ..Default::default()
    };

    if let Some(Value::String(device)) = raw.get("device") {
        if !device.trim().is_empty() {
            let parsed = parse_device(device);
            out.device = Some(parsed.display());
            out.device_identifier = Some(parsed.identifier);
            out.device_commercial_name = Some(parsed.commercial_name);
        }
    }

    if let Some(country) = raw.get("country") {
        let country = value_to_string(country);
        match parse_locale(&country) {
            Some(region) => {
                out.language_code = Some(region.language.clone());
                out.country_code = Some(region.country.clone());
                out.locale = Some(region.locale.clone());
                out.region_info = Some(region);
            }
            None => out.locale = Some(country),
        }
    }

    out.screen_resolution = raw.get("screenSize").cloned();
    out.color_depth = raw
        .get("depth")
        .map(|depth| format!("{} bits", value_to_string(depth)));
    out.system_font_size = raw.get("fontSize").cloned();
    out.device_language = raw.get("userLanguage").cloned();

    remove_owned_keys(&mut out);
    out
}

/// Drop passthrough entries that a typed field now carries, so the flattened
/// JSON never holds the same key twice.
fn remove_owned_keys(data: &mut NormalizedUserData) {
    let owned = [
        ("device", data.device.is_some()),
        ("deviceIdentifier", data.device_identifier.is_some()),
        ("deviceCommercialName", data.device_commercial_name.is_some()),
        ("locale", data.locale.is_some()),
        ("languageCode", data.language_code.is_some()),
        ("countryCode", data.country_code.is_some()),
        ("regionInfo", data.region_info.is_some()),
        ("screenResolution", data.screen_resolution.is_some()),
        ("colorDepth", data.color_depth.is_some()),
        ("systemFontSize", data.system_font_size.is_some()),
        ("deviceLanguage", data.device_language.is_some()),
    ];
    for (key, set) in owned {
        if set {
            data.passthrough.remove(key);
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
