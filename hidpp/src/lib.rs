//! The HID++ message model and multi-channel dispatcher of a hardware test
//! harness for Logitech input devices.
//!
//! Logitech's mice, keyboards and receivers speak HID++, a vendor protocol
//! on top of [HID](https://en.wikipedia.org/wiki/Human_interface_device).
//! Receivers mostly use the older HID++1.0, which exposes numbered
//! registers. Devices use HID++2.0, which groups functions into versioned
//! features the device lists in a feature table of its own.
//!
//! This crate models both protocols bit by bit and keeps track of all the
//! traffic a test causes:
//!
//! - [`bitfield`] describes message layouts as static schemas and encodes and
//!   decodes them,
//! - [`feature`] and [`register`] hold the descriptors of HID++2.0 features
//!   (per version) and HID++1.0 registers,
//! - [`transport`] abstracts the link to a device: USB HID, BLE GATT, a
//!   device tunnelled through its receiver, or an emulated link driven by a
//!   test instrument,
//! - [`channel`] sends requests over a transport and [`dispatcher`] sorts
//!   everything that arrives: replies go to their waiting request
//!   ([`correlator`]), everything else into named [`queue`]s,
//! - [`cache`] remembers the feature table of every device,
//! - [`manager`] owns the channels of a test session.
//!
//! Logitech kindly provided a [public Google Drive folder](https://drive.google.com/drive/folders/0BxbRzx7vEV7eWmgwazJ3NUFfQ28)
//! with a lot of documentation on HID++ and several device features.
//!
//! # Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hidpp::{
//!     config::HarnessConfig,
//!     device::Device,
//!     feature::hires_wheel::HiResWheelFeature,
//!     manager::{ChannelId, ChannelManager},
//!     transport::{LinkEnabler, emulated::EmulatedTransport},
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ChannelManager::new(HarnessConfig::default());
//!
//! // The instrument plays the receiver on the other end of the link.
//! let (transport, _instrument) = EmulatedTransport::new(0x046d, 0xc548);
//! let receiver = ChannelId::from("receiver");
//! manager.add(receiver.clone(), Arc::new(transport));
//! manager.open(&receiver, LinkEnabler::ALL).await?;
//!
//! // Ask the receiver which devices are connected and talk to each of them
//! // through a channel of its own.
//! for connection in manager.enumerate_receiver(&receiver).await? {
//!     let id = format!("device-{}", connection.device_index);
//!     let chan = manager
//!         .open_through_receiver(&receiver, connection.device_index, id)
//!         .await?;
//!
//!     let mut device = Device::new(chan, connection.device_index).await?;
//!     if let Some(wheel) = device.feature::<HiResWheelFeature>().await? {
//!         println!("wheel mode: {:?}", wheel.get_wheel_mode().await?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use async_trait::async_trait;

pub mod bitfield;
pub mod cache;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod feature;
pub mod manager;
pub mod nibble;
pub mod nvs;
pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod register;
pub mod report;
pub mod transport;
