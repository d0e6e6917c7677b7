//! # Pretrained Weight Descriptors

use crate::cache::disk::DiskCacheConfig;
use crate::errors::{EyeballError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Build a cache file name from an optional name and a URL.
///
/// The key is ``{name}-{url crc}-{url basename}``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> String {
    let hash = X25.checksum(url.as_bytes());
    let base_name = url.rsplit_once('/').map_or(url, |(_, b)| b);
    match name {
        Some(n) => format!("{n}-{hash}-{base_name}"),
        None => format!("{hash}-{base_name}"),
    }
}

/// The cache resource key of a weights file.
pub fn pretrained_weights_resource_key(cache_key: &str) -> Vec<String> {
    vec!["weights".to_string(), cache_key.to_string()]
}

/// Static form of a [`PretrainedWeightsDescriptor`].
#[derive(Debug)]
pub struct StaticPretrainedWeightsDescriptor<'a> {
    /// Name, as ``{prefab}.{weights}``.
    pub name: &'a str,

    /// Description.
    pub description: &'a str,

    /// License.
    pub license: Option<&'a str>,

    /// Where the weights come from.
    pub origin: Option<&'a str>,

    /// Download URLs, in preference order.
    pub urls: &'a [&'a str],
}

impl StaticPretrainedWeightsDescriptor<'_> {
    /// Convert to an owned descriptor.
    pub fn to_descriptor(&self) -> PretrainedWeightsDescriptor {
        PretrainedWeightsDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            license: self.license.map(|s| s.to_string()),
            origin: self.origin.map(|s| s.to_string()),
            urls: self.urls.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A downloadable pretrained weights file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PretrainedWeightsDescriptor {
    /// Name, as ``{prefab}.{weights}``.
    pub name: String,

    /// Description.
    pub description: String,

    /// License.
    pub license: Option<String>,

    /// Where the weights come from.
    pub origin: Option<String>,

    /// Download URLs, in preference order.
    pub urls: Vec<String>,
}

impl PretrainedWeightsDescriptor {
    /// The prefab part of the name.
    pub fn prefab_name(&self) -> &str {
        self.name.split_once('.').map_or(&self.name, |(p, _)| p)
    }

    fn primary_url(&self) -> Result<&str> {
        self.urls
            .first()
            .map(String::as_str)
            .ok_or_else(|| EyeballError::Pretrained {
                name: self.name.clone(),
                reason: "descriptor has no download URL".to_string(),
            })
    }

    /// The cache file name.
    pub fn cache_key(&self) -> Result<String> {
        Ok(url_to_cache_key(Some(&self.name), self.primary_url()?))
    }

    /// Read-through cache the weights; returns their disk location.
    pub fn fetch_weights_to_disk_cache(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> Result<PathBuf> {
        let url = self.primary_url()?;
        let resource = pretrained_weights_resource_key(&self.cache_key()?);
        disk_cache.fetch_resource(url, &resource)
    }
}

/// Name-indexed descriptors.
#[derive(Debug, Clone)]
pub struct PretrainedWeightsMap {
    /// Descriptors by name.
    pub items: BTreeMap<String, PretrainedWeightsDescriptor>,
}

impl PretrainedWeightsMap {
    /// Build from static descriptors.
    pub fn from_static(items: &[&StaticPretrainedWeightsDescriptor]) -> Self {
        Self {
            items: items
                .iter()
                .map(|d| (d.name.to_string(), d.to_descriptor()))
                .collect(),
        }
    }

    /// Lookup a descriptor by name.
    pub fn try_lookup_by_name(
        &self,
        name: &str,
    ) -> Result<PretrainedWeightsDescriptor> {
        self.items
            .get(name)
            .cloned()
            .ok_or_else(|| EyeballError::Pretrained {
                name: name.to_string(),
                reason: format!(
                    "unknown weights; available: {:?}",
                    self.items.keys().collect::<Vec<_>>()
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MY_WEIGHTS: StaticPretrainedWeightsDescriptor = StaticPretrainedWeightsDescriptor {
        name: "tiny.v1",
        description: "tiny weights",
        license: Some("MIT"),
        origin: None,
        urls: &["https://example.com/models/tiny-v1.pth"],
    };

    #[test]
    fn test_cache_key() {
        let key = url_to_cache_key(Some("tiny.v1"), "https://example.com/models/tiny-v1.pth");
        assert!(key.starts_with("tiny.v1-"));
        assert!(key.ends_with("-tiny-v1.pth"));

        let desc = MY_WEIGHTS.to_descriptor();
        assert_eq!(desc.cache_key().unwrap(), key);
        assert_eq!(desc.prefab_name(), "tiny");
    }

    #[test]
    fn test_lookup() {
        let map = PretrainedWeightsMap::from_static(&[&MY_WEIGHTS]);
        assert_eq!(map.try_lookup_by_name("tiny.v1").unwrap().license.as_deref(), Some("MIT"));
        assert!(matches!(
            map.try_lookup_by_name("huge.v9"),
            Err(EyeballError::Pretrained { .. })
        ));
    }

    #[test]
    fn test_no_urls() {
        let desc = PretrainedWeightsDescriptor {
            urls: vec![],
            ..MY_WEIGHTS.to_descriptor()
        };
        assert!(desc.cache_key().is_err());
    }
}
