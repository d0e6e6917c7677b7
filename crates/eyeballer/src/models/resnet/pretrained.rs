//! # Pretrained `ResNet` Backbones
//!
//! Backbones are named ``{prefab}.{weights}``, e.g. `resnet18.tv_in1k`.

use crate::cache::disk::DiskCacheConfig;
use crate::cache::weights::{
    PretrainedWeightsDescriptor, PretrainedWeightsMap, StaticPretrainedWeightsDescriptor,
};
use crate::errors::{EyeballError, Result};
use crate::models::resnet::pytorch_stubs::load_pytorch_weights;
use crate::models::resnet::resnet_model::{ResNet, ResNetConfig};
use burn::prelude::Backend;

static RESNET18_TV_IN1K: StaticPretrainedWeightsDescriptor = StaticPretrainedWeightsDescriptor {
    name: "resnet18.tv_in1k",
    description: "ResNet-18 pretrained on ImageNet",
    license: Some("bsd-3-clause"),
    origin: Some("https://github.com/pytorch/vision"),
    urls: &["https://download.pytorch.org/models/resnet18-f37072fd.pth"],
};

static RESNET34_TV_IN1K: StaticPretrainedWeightsDescriptor = StaticPretrainedWeightsDescriptor {
    name: "resnet34.tv_in1k",
    description: "ResNet-34 pretrained on ImageNet",
    license: Some("bsd-3-clause"),
    origin: Some("https://github.com/pytorch/vision"),
    urls: &["https://download.pytorch.org/models/resnet34-b627a593.pth"],
};

/// All known pretrained backbones.
pub fn pretrained_backbones() -> PretrainedWeightsMap {
    PretrainedWeightsMap::from_static(&[&RESNET18_TV_IN1K, &RESNET34_TV_IN1K])
}

/// The architecture matching a prefab name.
pub fn prefab_config(prefab: &str) -> Result<ResNetConfig> {
    match prefab {
        "resnet18" => Ok(ResNetConfig::resnet18()),
        "resnet34" => Ok(ResNetConfig::resnet34()),
        other => Err(EyeballError::Pretrained {
            name: other.to_string(),
            reason: "unknown ResNet prefab".to_string(),
        }),
    }
}

/// Look up a pretrained backbone and check it fits `config`.
pub fn resolve_pretrained(
    name: &str,
    config: &ResNetConfig,
) -> Result<PretrainedWeightsDescriptor> {
    let descriptor = pretrained_backbones().try_lookup_by_name(name)?;
    let expected = prefab_config(descriptor.prefab_name())?;
    if expected.blocks != config.blocks || expected.width != config.width {
        return Err(EyeballError::InvalidConfig(format!(
            "pretrained backbone '{name}' needs blocks {:?} width {}, model has blocks {:?} width {}",
            expected.blocks, expected.width, config.blocks, config.width
        )));
    }
    Ok(descriptor)
}

/// Fetch (through the disk cache) and apply pretrained weights.
pub fn load_pretrained<B: Backend>(
    resnet: ResNet<B>,
    descriptor: &PretrainedWeightsDescriptor,
    disk_cache: &DiskCacheConfig,
) -> Result<ResNet<B>> {
    let path = descriptor.fetch_weights_to_disk_cache(disk_cache)?;
    tracing::info!(
        backbone = %descriptor.name,
        path = %path.display(),
        "loading pretrained backbone"
    );
    load_pytorch_weights(resnet, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        let map = pretrained_backbones();
        let d = map.try_lookup_by_name("resnet18.tv_in1k").unwrap();
        assert_eq!(d.prefab_name(), "resnet18");
        assert!(d.urls[0].ends_with("resnet18-f37072fd.pth"));
        assert!(map.try_lookup_by_name("resnet50.tv_in1k").is_err());
    }

    #[test]
    fn test_resolve_pretrained() {
        resolve_pretrained("resnet18.tv_in1k", &ResNetConfig::resnet18()).unwrap();
        resolve_pretrained("resnet34.tv_in1k", &ResNetConfig::resnet34()).unwrap();

        let err = resolve_pretrained("resnet18.tv_in1k", &ResNetConfig::resnet34()).unwrap_err();
        assert!(matches!(err, EyeballError::InvalidConfig(_)));

        let tiny = ResNetConfig::new([2, 2, 2, 2]).with_width(8);
        assert!(resolve_pretrained("resnet18.tv_in1k", &tiny).is_err());
    }
}
