//! Implements the `DisableKeys` feature (ID `0x4521`) that allows disabling
//! a few keyboard keys that are easily pressed by accident.

use std::sync::Arc;

use bitflags::bitflags;

use super::{
    CreatableFeature,
    Feature,
    FeatureDescriptor,
    FeatureError,
    FeatureFactory,
    FeatureFamily,
    FeatureHandle,
    FunctionDescriptor,
};
use crate::{
    bitfield::{BitMessage, FieldDescriptor, Schema},
    channel::HidppChannel,
    error::Error,
};

static EMPTY_REQUEST: Schema = Schema::new("DisableKeysRequest", &[FieldDescriptor::new(0xfa, 24, "Padding", "padding")]);

/// One bit per disableable key.
static KEYS: Schema = Schema::new("DisableableKeys", &[
    FieldDescriptor::new(0xfa, 3, "Reserved", "reserved"),
    FieldDescriptor::new(0xf9, 1, "Windows", "windows"),
    FieldDescriptor::new(0xf8, 1, "Insert", "insert"),
    FieldDescriptor::new(0xf7, 1, "Scroll Lock", "scroll_lock").with_aliases(&["scrollLock"]),
    FieldDescriptor::new(0xf6, 1, "Num Lock", "num_lock").with_aliases(&["numLock"]),
    FieldDescriptor::new(0xf5, 1, "Caps Lock", "caps_lock").with_aliases(&["capsLock"]),
]);

static GET_CAPABILITIES_RESPONSE: Schema = Schema::new("GetCapabilitiesResponse", &[
    FieldDescriptor::nested(0xfa, "Disableable Keys", "keys", &KEYS).with_aliases(&["disableableKeys"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static GET_DISABLED_KEYS_RESPONSE: Schema = Schema::new("GetDisabledKeysResponse", &[
    FieldDescriptor::nested(0xfa, "Disabled Keys", "keys", &KEYS).with_aliases(&["disabledKeys"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static SET_DISABLED_KEYS_REQUEST: Schema = Schema::new("SetDisabledKeys", &[
    FieldDescriptor::nested(0xfa, "Keys To Disable", "keys", &KEYS).with_aliases(&["keysToDisable"]),
    FieldDescriptor::new(0xf9, 16, "Padding", "padding"),
]);

static SET_DISABLED_KEYS_RESPONSE: Schema = Schema::new("SetDisabledKeysResponse", &[
    FieldDescriptor::nested(0xfa, "Disabled Keys", "keys", &KEYS).with_aliases(&["disabledKeys"]),
    FieldDescriptor::new(0xf9, 120, "Padding", "padding"),
]);

static FUNCTIONS: [FunctionDescriptor; 3] = [
    FunctionDescriptor::new(0, "getCapabilities", &EMPTY_REQUEST, &GET_CAPABILITIES_RESPONSE),
    FunctionDescriptor::new(1, "getDisabledKeys", &EMPTY_REQUEST, &GET_DISABLED_KEYS_RESPONSE),
    FunctionDescriptor::new(2, "setDisabledKeys", &SET_DISABLED_KEYS_REQUEST, &SET_DISABLED_KEYS_RESPONSE),
];

static DISABLE_KEYS_V0: FeatureDescriptor = FeatureDescriptor {
    id: DisableKeys::ID,
    name: DisableKeys::NAME,
    version: 0,
    family: FeatureFamily::Keyboard,
    functions: &FUNCTIONS,
    events: &[],
};

/// The versions of the `DisableKeys` / `0x4521` feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DisableKeys {
    V0,
}

impl FeatureFactory for DisableKeys {
    const ID: u16 = 0x4521;
    const NAME: &'static str = "DisableKeys";

    fn create(version: u8) -> Result<Self, FeatureError> {
        match version {
            0 => Ok(Self::V0),
            _ => Err(FeatureError::UnsupportedVersion { id: Self::ID, version }),
        }
    }

    fn version(self) -> u8 {
        0
    }

    fn descriptor(self) -> &'static FeatureDescriptor {
        &DISABLE_KEYS_V0
    }
}

/// Implements the `DisableKeys` / `0x4521` feature.
#[derive(Clone)]
pub struct DisableKeysFeature {
    handle: FeatureHandle,
    version: DisableKeys,
}

impl Feature for DisableKeysFeature {
    fn descriptor(&self) -> &'static FeatureDescriptor {
        self.version.descriptor()
    }
}

impl CreatableFeature for DisableKeysFeature {
    const ID: u16 = DisableKeys::ID;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8, version: u8) -> Result<Self, FeatureError> {
        Ok(Self {
            handle: FeatureHandle::new(chan, device_index, feature_index)?,
            version: DisableKeys::create(version)?,
        })
    }
}

impl DisableKeysFeature {
    /// Retrieves the keys the keyboard allows to disable.
    pub async fn get_capabilities(&self) -> Result<Keys, Error> {
        let function = self.version.descriptor().function(0)?;
        let response = self.handle.call_empty(function).await?;
        Keys::try_from(response.nested("keys")?)
    }

    /// Retrieves the keys that are currently disabled.
    pub async fn get_disabled_keys(&self) -> Result<Keys, Error> {
        let function = self.version.descriptor().function(1)?;
        let response = self.handle.call_empty(function).await?;
        Keys::try_from(response.nested("keys")?)
    }

    /// Disables exactly the given keys and enables all others.
    ///
    /// Returns the keys the device reports as disabled afterwards.
    pub async fn set_disabled_keys(&self, keys: Keys) -> Result<Keys, Error> {
        let function = self.version.descriptor().function(2)?;
        let request = BitMessage::new(function.request).with("keys", keys.to_message()?)?;

        let response = self.handle.call(function, &request).await?;
        Keys::try_from(response.nested("keys")?)
    }
}

bitflags! {
    /// A set of keys as used by the `DisableKeys` feature.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Keys: u8 {
        const CAPS_LOCK = 1 << 0;
        const NUM_LOCK = 1 << 1;
        const SCROLL_LOCK = 1 << 2;
        const INSERT = 1 << 3;
        const WINDOWS = 1 << 4;
    }
}

impl Keys {
    const FIELDS: [(&'static str, Keys); 5] = [
        ("caps_lock", Keys::CAPS_LOCK),
        ("num_lock", Keys::NUM_LOCK),
        ("scroll_lock", Keys::SCROLL_LOCK),
        ("insert", Keys::INSERT),
        ("windows", Keys::WINDOWS),
    ];

    fn to_message(self) -> Result<BitMessage, Error> {
        let mut msg = BitMessage::new(&KEYS);
        for (name, key) in Self::FIELDS {
            msg.set(name, self.contains(key))?;
        }
        Ok(msg)
    }
}

impl TryFrom<&BitMessage> for Keys {
    type Error = Error;

    fn try_from(msg: &BitMessage) -> Result<Self, Self::Error> {
        let mut keys = Keys::empty();
        for (name, key) in Self::FIELDS {
            keys.set(key, msg.uint(name)? != 0);
        }
        Ok(keys)
    }
}
