//! Remembers where each device keeps its features.
//!
//! HID++2.0 functions are addressed by feature index, which every device
//! assigns on its own. The index of a feature ID is negotiated once with
//! `Root.getFeature` and cached per device index until something happens
//! that may reorder the feature table of the device.
//!
//! The dispatcher reads the reverse mapping (index to ID) for every frame it
//! routes, so lookups only take a read lock. Negotiation is serialized per
//! device index so that concurrent callers resolving the same feature send a
//! single request.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::{
    channel::HidppChannel,
    error::Error,
    feature::{
        FeatureFactory,
        FeatureType,
        root::{FeatureInformation, ROOT_FEATURE_INDEX, Root, get_feature_request},
    },
};

/// Why cached feature indices are discarded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InvalidationReason {
    HardwareReset,
    SoftwareReset,

    /// A device was paired, unpaired or reconnected under a device index.
    PairingChange,

    /// The device entered or left firmware update mode.
    Dfu,

    /// The channel switched to another protocol.
    ProtocolSwitch,

    /// A test asked for it.
    Explicit,
}

/// A feature as located in the feature table of a device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CachedFeature {
    pub id: u16,
    pub index: u8,
    pub version: u8,
    pub typ: FeatureType,
}

impl CachedFeature {
    /// The entry of the Root feature, which needs no negotiation.
    pub fn root() -> Self {
        Self {
            id: Root::ID,
            index: ROOT_FEATURE_INDEX,
            version: Root::LATEST.version(),
            typ: FeatureType::default(),
        }
    }
}

#[derive(Default)]
struct DeviceTable {
    /// `None` records a feature the device reported as unsupported.
    by_id: HashMap<u16, Option<CachedFeature>>,
    by_index: HashMap<u8, CachedFeature>,
}

impl DeviceTable {
    fn insert(&mut self, feature: CachedFeature) {
        if let Some(Some(previous)) = self.by_id.get(&feature.id) {
            self.by_index.remove(&previous.index);
        }
        if let Some(displaced) = self.by_index.insert(feature.index, feature) {
            if displaced.id != feature.id {
                self.by_id.remove(&displaced.id);
            }
        }
        self.by_id.insert(feature.id, Some(feature));
    }
}

/// The feature index cache of one channel.
#[derive(Default)]
pub struct FeatureIndexCache {
    devices: RwLock<HashMap<u8, DeviceTable>>,

    /// One lock per device index serializing negotiation.
    populators: Mutex<HashMap<u8, Arc<tokio::sync::Mutex<()>>>>,

    /// Bumped by every invalidation. Negotiations that overlap one are not
    /// recorded.
    epoch: AtomicU64,
}

impl FeatureIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a feature ID.
    ///
    /// Returns [`None`] if the feature was not negotiated yet and
    /// `Some(None)` if the device does not support it.
    pub fn get(&self, device_index: u8, feature_id: u16) -> Option<Option<CachedFeature>> {
        if feature_id == Root::ID {
            return Some(Some(CachedFeature::root()));
        }
        self.devices
            .read()
            .get(&device_index)
            .and_then(|table| table.by_id.get(&feature_id).copied())
    }

    /// Looks up the feature at a feature index.
    pub fn feature_at(&self, device_index: u8, feature_index: u8) -> Option<CachedFeature> {
        if feature_index == ROOT_FEATURE_INDEX {
            return Some(CachedFeature::root());
        }
        self.devices
            .read()
            .get(&device_index)
            .and_then(|table| table.by_index.get(&feature_index).copied())
    }

    /// Whether any feature of the device index was negotiated.
    pub fn knows_device(&self, device_index: u8) -> bool {
        self.devices
            .read()
            .get(&device_index)
            .is_some_and(|table| !table.by_id.is_empty())
    }

    /// Records the location of a feature, for example after enumerating the
    /// feature table with `FeatureSet`.
    pub fn insert(&self, device_index: u8, feature: CachedFeature) {
        trace!(device_index, feature_id = feature.id, feature_index = feature.index, "feature index cached");
        self.devices.write().entry(device_index).or_default().insert(feature);
    }

    /// Records that a device does not support a feature.
    pub fn insert_unsupported(&self, device_index: u8, feature_id: u16) {
        let mut devices = self.devices.write();
        let table = devices.entry(device_index).or_default();
        if let Some(Some(previous)) = table.by_id.insert(feature_id, None) {
            table.by_index.remove(&previous.index);
        }
    }

    /// Resolves a feature ID, asking the device with `Root.getFeature` if it
    /// is not cached yet.
    ///
    /// Returns [`None`] if the device does not support the feature.
    pub async fn resolve(
        &self,
        chan: &HidppChannel,
        device_index: u8,
        feature_id: u16,
    ) -> Result<Option<CachedFeature>, Error> {
        if let Some(cached) = self.get(device_index, feature_id) {
            return Ok(cached);
        }

        let populator = Arc::clone(self.populators.lock().entry(device_index).or_default());
        let _guard = populator.lock().await;

        // Another caller may have negotiated it while we waited.
        if let Some(cached) = self.get(device_index, feature_id) {
            return Ok(cached);
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let function = Root::LATEST.descriptor().function(0)?;
        let response = chan
            .call(device_index, ROOT_FEATURE_INDEX, function, &get_feature_request(feature_id)?)
            .await?;
        let info = FeatureInformation::try_from(&response)?;

        let feature = (info.index != 0).then_some(CachedFeature {
            id: feature_id,
            index: info.index,
            version: info.version,
            typ: info.typ,
        });

        if self.epoch.load(Ordering::Acquire) == epoch {
            match feature {
                Some(feature) => self.insert(device_index, feature),
                None => self.insert_unsupported(device_index, feature_id),
            }
        } else {
            debug!(device_index, feature_id, "cache invalidated during negotiation, result not kept");
        }
        Ok(feature)
    }

    /// Forgets the features of one device index, or of all of them.
    pub fn invalidate(&self, device_index: Option<u8>, reason: InvalidationReason) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let mut devices = self.devices.write();
        match device_index {
            Some(device_index) => {
                devices.remove(&device_index);
            },
            None => devices.clear(),
        }
        debug!(?device_index, ?reason, "feature index cache invalidated");
    }

    /// All cached feature locations, by device index.
    pub fn mapping(&self) -> Vec<(u8, CachedFeature)> {
        let devices = self.devices.read();
        let mut mapping: Vec<(u8, CachedFeature)> = devices
            .iter()
            .flat_map(|(device_index, table)| table.by_index.values().map(|feature| (*device_index, *feature)))
            .collect();
        mapping.sort_by_key(|(device_index, feature)| (*device_index, feature.index));
        mapping
    }

    /// Copies all cached feature locations into another cache, for example
    /// the one of a second channel to the same device.
    pub fn copy_mapping_to(&self, other: &FeatureIndexCache) {
        for (device_index, feature) in self.mapping() {
            other.insert(device_index, feature);
        }
    }
}

impl fmt::Debug for FeatureIndexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureIndexCache")
            .field("mapping", &self.mapping())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: u16, index: u8) -> CachedFeature {
        CachedFeature {
            id,
            index,
            version: 0,
            typ: FeatureType::default(),
        }
    }

    #[test]
    fn root_is_always_index_zero() {
        let cache = FeatureIndexCache::new();
        assert_eq!(cache.get(0x01, 0x0000), Some(Some(CachedFeature::root())));
        assert_eq!(cache.feature_at(0x01, 0).map(|feature| feature.id), Some(0x0000));
        assert!(!cache.knows_device(0x01));
    }

    #[test]
    fn both_directions_stay_consistent() {
        let cache = FeatureIndexCache::new();
        cache.insert(0x01, feature(0x1004, 0x04));
        assert_eq!(cache.feature_at(0x01, 0x04).unwrap().id, 0x1004);

        // The feature moved, e.g. after a firmware update.
        cache.insert(0x01, feature(0x1004, 0x06));
        assert_eq!(cache.feature_at(0x01, 0x04), None);

        // Another feature took its index.
        cache.insert(0x01, feature(0x2121, 0x06));
        assert_eq!(cache.get(0x01, 0x1004), None);
        assert_eq!(cache.get(0x01, 0x2121).unwrap().unwrap().index, 0x06);

        cache.insert_unsupported(0x01, 0x2121);
        assert_eq!(cache.get(0x01, 0x2121), Some(None));
        assert_eq!(cache.feature_at(0x01, 0x06), None);
        assert!(cache.knows_device(0x01));
    }

    #[test]
    fn invalidation_is_per_device() {
        let cache = FeatureIndexCache::new();
        cache.insert(0x01, feature(0x1004, 0x04));
        cache.insert(0x02, feature(0x1004, 0x05));

        cache.invalidate(Some(0x01), InvalidationReason::PairingChange);
        assert_eq!(cache.get(0x01, 0x1004), None);
        assert!(cache.get(0x02, 0x1004).is_some());

        cache.invalidate(None, InvalidationReason::ProtocolSwitch);
        assert!(cache.mapping().is_empty());
    }

    #[test]
    fn mapping_is_exported() {
        let cache = FeatureIndexCache::new();
        cache.insert(0x02, feature(0x2121, 0x0b));
        cache.insert(0x01, feature(0x1004, 0x04));

        let other = FeatureIndexCache::new();
        cache.copy_mapping_to(&other);
        assert_eq!(other.mapping(), vec![(0x01, feature(0x1004, 0x04)), (0x02, feature(0x2121, 0x0b))]);
    }
}
