//! Device profiles and matrix expansion.
//!
//! A [`DeviceProfile`] identifies one execution target. A [`DeviceMatrix`] is
//! the ordered, de-duplicated set of profiles a submission runs against; the
//! cross-product helper is a pure transform performed once at submission.

use crate::result::EspejoError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Physical form factor of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormFactor {
    /// Handset
    Phone,
    /// Tablet
    Tablet,
    /// Foldable in its unfolded posture
    Foldable,
    /// Wearable / watch
    Watch,
}

impl FormFactor {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Foldable => "foldable",
            Self::Watch => "watch",
        }
    }
}

impl fmt::Display for FormFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormFactor {
    type Err = EspejoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phone" => Ok(Self::Phone),
            "tablet" => Ok(Self::Tablet),
            "foldable" => Ok(Self::Foldable),
            "watch" => Ok(Self::Watch),
            other => Err(EspejoError::config(format!("unknown form factor: {other}"))),
        }
    }
}

/// One execution target: device family, OS version, locale and form factor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device family (e.g. "pixel-8", "iphone-15")
    pub family: String,
    /// OS version (e.g. "14", "17.2")
    pub os_version: String,
    /// Locale tag (e.g. "en-US")
    pub locale: String,
    /// Form factor
    pub form_factor: FormFactor,
}

impl DeviceProfile {
    /// Create a new device profile
    #[must_use]
    pub fn new(
        family: impl Into<String>,
        os_version: impl Into<String>,
        locale: impl Into<String>,
        form_factor: FormFactor,
    ) -> Self {
        Self {
            family: family.into(),
            os_version: os_version.into(),
            locale: locale.into(),
            form_factor,
        }
    }

    /// Stable, filesystem-safe key: `family_os_locale_formfactor`
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            sanitize_component(&self.family),
            sanitize_component(&self.os_version),
            sanitize_component(&self.locale),
            self.form_factor
        )
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {}, {})",
            self.family, self.os_version, self.locale, self.form_factor
        )
    }
}

/// Parses `family:os_version:locale:form_factor`
impl FromStr for DeviceProfile {
    type Err = EspejoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [family, os, locale, form] = parts.as_slice() else {
            return Err(EspejoError::config(format!(
                "device profile must be family:os:locale:form_factor, got {s:?}"
            )));
        };
        if [family, os, locale].iter().any(|p| p.trim().is_empty()) {
            return Err(EspejoError::config(format!("empty component in profile {s:?}")));
        }
        Ok(Self::new(*family, *os, *locale, form.parse()?))
    }
}

/// Encode one path component so distinct inputs map to distinct names.
///
/// `[A-Za-z0-9.-]` pass through with case kept; every other byte becomes
/// `%XX`. Dots are encoded too when the component is only dots, and the
/// empty string becomes `_`, so the result is never `.`, `..` or empty.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    use std::fmt::Write as _;

    if raw.is_empty() {
        return "_".to_string();
    }
    let only_dots = raw.bytes().all(|b| b == b'.');
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        let keep = b.is_ascii_alphanumeric() || b == b'-' || (b == b'.' && !only_dots);
        if keep {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

/// Ordered set of device profiles to execute against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMatrix {
    profiles: Vec<DeviceProfile>,
}

impl DeviceMatrix {
    /// Build a matrix from explicit profiles, dropping duplicates (first occurrence wins)
    #[must_use]
    pub fn new(profiles: impl IntoIterator<Item = DeviceProfile>) -> Self {
        let mut seen = HashSet::new();
        let profiles = profiles
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        Self { profiles }
    }

    /// Cross-product of families × OS versions × locales × form factors.
    ///
    /// Order is family-major, then OS version, then locale, then form factor.
    #[must_use]
    pub fn cross(
        families: &[&str],
        os_versions: &[&str],
        locales: &[&str],
        form_factors: &[FormFactor],
    ) -> Self {
        let mut profiles = Vec::with_capacity(
            families.len() * os_versions.len() * locales.len() * form_factors.len(),
        );
        for family in families {
            for os in os_versions {
                for locale in locales {
                    for ff in form_factors {
                        profiles.push(DeviceProfile::new(*family, *os, *locale, *ff));
                    }
                }
            }
        }
        Self::new(profiles)
    }

    /// Profiles in submission order
    #[must_use]
    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    /// Number of profiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the matrix is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Iterate profiles in submission order
    pub fn iter(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.profiles.iter()
    }
}

impl FromIterator<DeviceProfile> for DeviceMatrix {
    fn from_iter<I: IntoIterator<Item = DeviceProfile>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel() -> DeviceProfile {
        DeviceProfile::new("Pixel 8", "14", "en-US", FormFactor::Phone)
    }

    mod profile_tests {
        use super::*;

        #[test]
        fn test_key_is_filesystem_safe() {
            assert_eq!(pixel().key(), "Pixel%208_14_en-US_phone");
            let plain = DeviceProfile::new("pixel-8", "17.2", "en-US", FormFactor::Phone);
            assert_eq!(plain.key(), "pixel-8_17.2_en-US_phone");
        }

        #[test]
        fn test_key_rejects_traversal() {
            let p = DeviceProfile::new("..", "/", "en_US", FormFactor::Tablet);
            let key = p.key();
            assert!(!key.contains('/'));
            assert!(!key.starts_with(".."));
            assert_eq!(key, "%2E%2E_%2F_en%5FUS_tablet");
        }

        #[test]
        fn test_key_keeps_case_and_separators_apart() {
            let upper = DeviceProfile::new("pixel-8", "14", "en-US", FormFactor::Phone);
            let lower = DeviceProfile::new("pixel-8", "14", "en-us", FormFactor::Phone);
            assert_ne!(upper.key(), lower.key());
            let slash = DeviceProfile::new("a/b", "14", "en", FormFactor::Phone);
            let dash = DeviceProfile::new("a-b", "14", "en", FormFactor::Phone);
            assert_ne!(slash.key(), dash.key());
            let joined = DeviceProfile::new("a_b", "14", "en", FormFactor::Phone);
            let split = DeviceProfile::new("a", "b_14", "en", FormFactor::Phone);
            assert_ne!(joined.key(), split.key());
        }

        #[test]
        fn test_parse_profile() {
            let p: DeviceProfile = "Pixel 8:14:en-US:Phone".parse().unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(p, pixel());
            assert!("pixel:14:en-US".parse::<DeviceProfile>().is_err());
            assert!("pixel:14::phone".parse::<DeviceProfile>().is_err());
            assert!("pixel:14:en:toaster".parse::<DeviceProfile>().is_err());
        }

        #[test]
        fn test_display() {
            assert_eq!(pixel().to_string(), "Pixel 8 (14 en-US, phone)");
        }

        #[test]
        fn test_serde_form_factor_lowercase() {
            let json = serde_json::to_string(&FormFactor::Foldable).unwrap();
            assert_eq!(json, "\"foldable\"");
        }
    }

    mod matrix_tests {
        use super::*;

        #[test]
        fn test_cross_product_size_and_order() {
            let m = DeviceMatrix::cross(
                &["pixel-8", "iphone-15"],
                &["14"],
                &["en-US", "de-DE"],
                &[FormFactor::Phone],
            );
            assert_eq!(m.len(), 4);
            assert_eq!(m.profiles()[0].family, "pixel-8");
            assert_eq!(m.profiles()[0].locale, "en-US");
            assert_eq!(m.profiles()[1].locale, "de-DE");
            assert_eq!(m.profiles()[2].family, "iphone-15");
        }

        #[test]
        fn test_duplicates_removed_first_wins() {
            let other = DeviceProfile::new("iphone-15", "17", "en-US", FormFactor::Phone);
            let m = DeviceMatrix::new(vec![pixel(), other.clone(), pixel()]);
            assert_eq!(m.profiles(), &[pixel(), other]);
        }

        #[test]
        fn test_empty_axis_yields_empty_matrix() {
            let m = DeviceMatrix::cross(&["pixel-8"], &[], &["en-US"], &[FormFactor::Phone]);
            assert!(m.is_empty());
        }
    }

    mod sanitize_tests {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn test_special_components() {
            assert_eq!(sanitize_component(""), "_");
            assert_eq!(sanitize_component("."), "%2E");
            assert_eq!(sanitize_component("v1.2"), "v1.2");
            assert_eq!(sanitize_component("50%"), "50%25");
            assert_eq!(sanitize_component("é"), "%C3%A9");
        }

        proptest! {
            #[test]
            fn prop_distinct_inputs_stay_distinct(a in ".{0,8}", b in ".{0,8}") {
                prop_assume!(a != b);
                prop_assert_ne!(sanitize_component(&a), sanitize_component(&b));
            }

            #[test]
            fn prop_output_is_a_single_safe_component(raw in ".{0,12}") {
                let out = sanitize_component(&raw);
                prop_assert!(!out.is_empty());
                prop_assert!(out != "." && out != "..");
                prop_assert!(out.chars().all(|c| c.is_ascii_alphanumeric() || "-.%_".contains(c)));
            }
        }
    }
}
