//! Implements peripheral devices connected to HID++ channels.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    cache::CachedFeature,
    channel::HidppChannel,
    error::Error,
    feature::{
        CreatableFeature,
        Feature,
        FeatureFactory,
        feature_set::FeatureSetFeature,
        registry,
        root::{ROOT_FEATURE_INDEX, Root, RootFeature},
    },
    protocol::{self, ProtocolVersion},
};

/// Represents a single HID++2.0 device connected to a [`HidppChannel`].
///
/// Feature implementations are created on first use. Their feature index is
/// taken from the feature index cache of the channel, which negotiates it
/// with the device if needed.
#[derive(Clone)]
pub struct Device {
    chan: Arc<HidppChannel>,
    root: Arc<RootFeature>,

    /// The instantiated feature implementations, by their type.
    features: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,

    /// The index of the device on the HID++ channel.
    pub device_index: u8,

    /// The supported protocol version reported by the device.
    pub protocol_version: ProtocolVersion,
}

impl Device {
    /// Tries to initialize a device on a HID++ channel.
    ///
    /// The device is pinged to determine the protocol version it supports,
    /// see [`protocol::determine_version`].
    pub async fn new(chan: Arc<HidppChannel>, device_index: u8) -> Result<Self, DeviceError> {
        let protocol_version = protocol::determine_version(&chan, device_index)
            .await?
            .ok_or(DeviceError::DeviceNotFound)?;
        if protocol_version == ProtocolVersion::V10 {
            return Err(DeviceError::UnsupportedProtocolVersion);
        }

        let root = Arc::new(
            RootFeature::new(Arc::clone(&chan), device_index, ROOT_FEATURE_INDEX, Root::LATEST.version())
                .map_err(Error::from)?,
        );

        debug!(channel = %chan.id(), device_index, ?protocol_version, "device initialized");
        Ok(Self {
            chan,
            root,
            features: HashMap::new(),
            device_index,
            protocol_version,
        })
    }

    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// The root feature every HID++2.0 device supports at index 0.
    pub fn root(&self) -> Arc<RootFeature> {
        Arc::clone(&self.root)
    }

    /// Adds a feature implementation, replacing an existing implementation of
    /// the same type.
    ///
    /// The caller is responsible for making sure the device actually supports
    /// the feature.
    pub fn add_feature_instance<F: Feature>(&mut self, feature: F) -> Arc<F> {
        let feature = Arc::new(feature);
        self.features
            .insert(TypeId::of::<F>(), Arc::clone(&feature) as Arc<dyn Any + Send + Sync>);
        feature
    }

    /// Checks whether a feature implementation was instantiated already.
    pub fn provides_feature<F: Feature>(&self) -> bool {
        self.features.contains_key(&TypeId::of::<F>())
    }

    /// Retrieves an instantiated feature implementation.
    pub fn get_feature<F: Feature>(&self) -> Option<Arc<F>> {
        self.features
            .get(&TypeId::of::<F>())
            .cloned()
            .and_then(|feature| feature.downcast::<F>().ok())
    }

    /// Retrieves a feature implementation, locating the feature on the device
    /// first if needed.
    ///
    /// Returns `Ok(None)` if the device does not support the feature.
    pub async fn feature<F: CreatableFeature>(&mut self) -> Result<Option<Arc<F>>, Error> {
        if let Some(feature) = self.get_feature::<F>() {
            return Ok(Some(feature));
        }

        let Some(location) = self.locate(F::ID).await? else {
            return Ok(None);
        };
        let feature = F::new(Arc::clone(&self.chan), self.device_index, location.index, location.version)?;
        Ok(Some(self.add_feature_instance(feature)))
    }

    /// Locates a feature in the feature table of the device.
    pub async fn locate(&self, feature_id: u16) -> Result<Option<CachedFeature>, Error> {
        self.chan
            .cache()
            .resolve(&self.chan, self.device_index, feature_id)
            .await
    }

    /// Reads the whole feature table of the device with the `FeatureSet`
    /// feature and records it in the feature index cache, so events of every
    /// feature can be decoded.
    ///
    /// Returns `Ok(None)` if the device does not support `FeatureSet`.
    pub async fn enumerate_features(&mut self) -> Result<Option<Vec<CachedFeature>>, Error> {
        let Some(feature_set) = self.feature::<FeatureSetFeature>().await? else {
            return Ok(None);
        };

        let cache = self.chan.cache();
        let mut features = Vec::new();
        for (index, info) in feature_set.features().await? {
            let feature = CachedFeature {
                id: info.id,
                index,
                version: info.version,
                typ: info.typ,
            };
            cache.insert(self.device_index, feature);
            features.push(feature);

            if registry::lookup(info.id).is_none() {
                debug!(device_index = self.device_index, feature_id = info.id, index, "unknown feature");
            }
        }

        debug!(
            device_index = self.device_index,
            count = features.len(),
            feature_set_version = feature_set.descriptor().version,
            "features enumerated"
        );
        Ok(Some(features))
    }
}

/// Represents a device-specific error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// Indicates that talking to the device failed.
    #[error(transparent)]
    Harness(#[from] Error),

    /// Indicates that the specified device index points to no device.
    #[error("there is no device with the specified device index")]
    DeviceNotFound,

    /// Indicates that the addressed device does only support HID++1.0.
    #[error("the device does not support HID++2.0 or newer")]
    UnsupportedProtocolVersion,
}
