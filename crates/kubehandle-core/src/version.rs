//! Kubernetes API version ordering and selection
//!
//! Versions follow the cluster scheme `v<major>` with an optional
//! `alpha<N>` / `beta<N>` suffix. For one major number the stable version
//! is newest, then betas, then alphas; a higher `N` is newer within a channel.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v([1-9][0-9]*)(?:(alpha|beta)([1-9][0-9]*))?$").expect("valid regex")
});

/// Release channel of an API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stability {
    Alpha(u32),
    Beta(u32),
    Stable,
}

/// A parsed API version such as `v1`, `v2beta1` or `v1alpha3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub stability: Stability,
}

impl ApiVersion {
    /// Parse a version string, returning `None` if it does not follow the scheme
    pub fn parse(s: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(s)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let stability = match (caps.get(2), caps.get(3)) {
            (Some(channel), Some(n)) => {
                let n = n.as_str().parse().ok()?;
                if channel.as_str() == "alpha" {
                    Stability::Alpha(n)
                } else {
                    Stability::Beta(n)
                }
            }
            _ => Stability::Stable,
        };
        Some(Self { major, stability })
    }

    pub const fn stable(major: u32) -> Self {
        Self {
            major,
            stability: Stability::Stable,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stability == Stability::Stable
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.stability.cmp(&other.stability))
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stability {
            Stability::Stable => write!(f, "v{}", self.major),
            Stability::Beta(n) => write!(f, "v{}beta{}", self.major, n),
            Stability::Alpha(n) => write!(f, "v{}alpha{}", self.major, n),
        }
    }
}

impl FromStr for ApiVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| CoreError::InvalidVersion {
            version: s.to_string(),
        })
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One version of a kind as reported by cluster discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServedVersion {
    pub version: String,
    pub namespaced: bool,
}

impl ServedVersion {
    pub fn new(version: impl Into<String>, namespaced: bool) -> Self {
        Self {
            version: version.into(),
            namespaced,
        }
    }
}

/// Pick the newest version that does not exceed `ceiling`
///
/// Strings that do not follow the versioning scheme are ignored.
pub fn select_version<'a, I>(candidates: I, ceiling: &ApiVersion) -> Option<ApiVersion>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut parsed: Vec<ApiVersion> = candidates.into_iter().filter_map(ApiVersion::parse).collect();
    parsed.sort_by(|a, b| b.cmp(a));
    parsed.into_iter().find(|v| v <= ceiling)
}

/// Resolve the full `apiVersion` string for a discovered kind
///
/// Returns `group/version`, or just `version` for the core group.
pub fn resolve_api_version(
    group: &str,
    kind: &str,
    served: &[ServedVersion],
    ceiling: &ApiVersion,
) -> Result<String> {
    if served.is_empty() {
        return Err(CoreError::UnsupportedResource {
            group: group.to_string(),
            kind: kind.to_string(),
            reason: "not served by the cluster".to_string(),
        });
    }

    let version = select_version(served.iter().map(|s| s.version.as_str()), ceiling).ok_or_else(
        || CoreError::UnsupportedResource {
            group: group.to_string(),
            kind: kind.to_string(),
            reason: format!(
                "no served version <= {} (served: {})",
                ceiling,
                served
                    .iter()
                    .map(|s| s.version.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
    )?;

    Ok(if group.is_empty() {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    })
}

/// Split an `apiVersion` into (group, version)
///
/// - "apps/v1" -> ("apps", "v1")
/// - "v1" -> ("", "v1")
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> ApiVersion {
        ApiVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_versions() {
        assert_eq!(v("v1").stability, Stability::Stable);
        assert_eq!(v("v2beta3").stability, Stability::Beta(3));
        assert_eq!(v("v1alpha1").stability, Stability::Alpha(1));
        assert_eq!(v("v10").major, 10);
        assert!(ApiVersion::parse("v1beta").is_none());
        assert!(ApiVersion::parse("1").is_none());
        assert!(ApiVersion::parse("v0").is_none());
        assert!(ApiVersion::parse("v1gamma1").is_none());
        assert!(ApiVersion::parse("apps/v1").is_none());
    }

    #[test]
    fn test_stable_beats_prerelease() {
        assert!(v("v1") > v("v1beta2"));
        assert!(v("v1beta1") > v("v1alpha5"));
        assert!(v("v1beta2") > v("v1beta1"));
        assert!(v("v2alpha1") > v("v1"));
    }

    #[test]
    fn test_display_round_trips() {
        for s in ["v1", "v2beta1", "v3alpha2"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn test_select_prefers_stable_under_ceiling() {
        let picked = select_version(["v1", "v1beta1"], &v("v1")).unwrap();
        assert_eq!(picked.to_string(), "v1");
    }

    #[test]
    fn test_select_never_exceeds_ceiling() {
        let picked = select_version(["v2", "v1"], &v("v1")).unwrap();
        assert_eq!(picked.to_string(), "v1");
    }

    #[test]
    fn test_select_ignores_unparseable() {
        let picked = select_version(["latest", "v1beta1", "v1-rc"], &v("v2")).unwrap();
        assert_eq!(picked.to_string(), "v1beta1");
    }

    #[test]
    fn test_select_nothing_under_ceiling() {
        assert!(select_version(["v3", "v2beta1"], &v("v2alpha1")).is_none());
    }

    #[test]
    fn test_resolve_core_group() {
        let served = vec![ServedVersion::new("v1", true)];
        assert_eq!(
            resolve_api_version("", "ConfigMap", &served, &v("v2")).unwrap(),
            "v1"
        );
    }

    #[test]
    fn test_resolve_named_group() {
        let served = vec![
            ServedVersion::new("v2", true),
            ServedVersion::new("v1", true),
            ServedVersion::new("v2beta2", true),
        ];
        assert_eq!(
            resolve_api_version("autoscaling", "HorizontalPodAutoscaler", &served, &v("v2")).unwrap(),
            "autoscaling/v2"
        );
    }

    #[test]
    fn test_resolve_unsupported() {
        let err = resolve_api_version("example.io", "Widget", &[], &v("v1")).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedResource { .. }));

        let served = vec![ServedVersion::new("v3", false)];
        let err = resolve_api_version("example.io", "Widget", &served, &v("v1")).unwrap_err();
        assert!(err.to_string().contains("v3"));
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn test_serde_as_string() {
        let parsed: ApiVersion = serde_json::from_str("\"v2beta1\"").unwrap();
        assert_eq!(parsed, v("v2beta1"));
        assert!(serde_json::from_str::<ApiVersion>("\"two\"").is_err());
    }

    fn version_strategy() -> impl Strategy<Value = String> {
        (1u32..5, prop_oneof![Just(None), Just(Some("alpha")), Just(Some("beta"))], 1u32..4)
            .prop_map(|(major, channel, n)| match channel {
                Some(c) => format!("v{}{}{}", major, c, n),
                None => format!("v{}", major),
            })
    }

    proptest! {
        #[test]
        fn prop_selection_is_highest_under_ceiling(
            served in proptest::collection::vec(version_strategy(), 0..8),
            ceiling in version_strategy(),
        ) {
            let ceiling = v(&ceiling);
            let picked = select_version(served.iter().map(String::as_str), &ceiling);
            let eligible: Vec<ApiVersion> = served
                .iter()
                .map(|s| v(s))
                .filter(|c| *c <= ceiling)
                .collect();

            match picked {
                Some(p) => {
                    prop_assert!(p <= ceiling);
                    prop_assert_eq!(Some(p), eligible.iter().max().copied());
                }
                None => prop_assert!(eligible.is_empty()),
            }
        }
    }
}
