//! Every schema of every registered feature version survives a round trip.

use hidpp::{
    bitfield::{BitMessage, Schema},
    feature::registry,
    protocol::VERY_LONG_REPORT_LENGTH,
};
use proptest::prelude::*;

fn registered_schemas() -> Vec<(String, &'static Schema)> {
    let mut schemas = Vec::new();
    for feature in registry::known_features().filter(|feature| feature.is_implemented()) {
        for version in 0..=u8::MAX {
            let Ok(descriptor) = feature.descriptor(version) else {
                continue;
            };
            for function in descriptor.functions {
                let name = format!("{} v{version} {}", feature.name, function.name);
                schemas.push((format!("{name} request"), function.request));
                schemas.push((format!("{name} response"), function.response));
            }
            for event in descriptor.events {
                schemas.push((format!("{} v{version} {}", feature.name, event.name), event.schema));
            }
        }
    }
    schemas
}

proptest! {
    #[test]
    fn decoded_payloads_encode_back(payload in prop::collection::vec(any::<u8>(), VERY_LONG_REPORT_LENGTH)) {
        for (name, schema) in registered_schemas() {
            // Payloads violating a validator are refused, which is fine.
            let Ok(decoded) = BitMessage::parse(schema, &payload) else {
                continue;
            };

            let encoded = decoded.serialize().unwrap();
            prop_assert_eq!(encoded.len(), schema.byte_len(), "{}", name);
            prop_assert_eq!(&BitMessage::parse(schema, &encoded).unwrap(), &decoded, "{}", name);
        }
    }
}
