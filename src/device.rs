/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Per-device metadata as returned by the device-list call.

use serde::{Deserialize, Serialize};

/// The category of device, keyed by the vendor's numeric type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum DeviceType {
    Refrigerator,
    KimchiRefrigerator,
    WaterPurifier,
    Washer,
    Dryer,
    Styler,
    Dishwasher,
    Oven,
    Microwave,
    Cooktop,
    Hood,
    /// Includes heat pumps and, in practice, most HVAC devices.
    Ac,
    AirPurifier,
    Dehumidifier,
    RobotKing,
    Arch,
    Missg,
    Sensor,
    SolarSensor,
    IotLighting,
    IotMotionSensor,
    IotSmartPlug,
    IotDustSensor,
    EmsAirStation,
    AirSensor,
    /// A code the schema doesn't have a named variant for yet.
    Unknown(u32),
}

impl From<DeviceType> for u32 {
    fn from(t: DeviceType) -> u32 {
        match t {
            DeviceType::Refrigerator => 101,
            DeviceType::KimchiRefrigerator => 102,
            DeviceType::WaterPurifier => 103,
            DeviceType::Washer => 201,
            DeviceType::Dryer => 202,
            DeviceType::Styler => 203,
            DeviceType::Dishwasher => 204,
            DeviceType::Oven => 301,
            DeviceType::Microwave => 302,
            DeviceType::Cooktop => 303,
            DeviceType::Hood => 304,
            DeviceType::Ac => 401,
            DeviceType::AirPurifier => 402,
            DeviceType::Dehumidifier => 403,
            DeviceType::RobotKing => 501,
            DeviceType::Arch => 1001,
            DeviceType::Missg => 3001,
            DeviceType::Sensor => 3002,
            DeviceType::SolarSensor => 3102,
            DeviceType::IotLighting => 3003,
            DeviceType::IotMotionSensor => 3004,
            DeviceType::IotSmartPlug => 3005,
            DeviceType::IotDustSensor => 3006,
            DeviceType::EmsAirStation => 4001,
            DeviceType::AirSensor => 4003,
            DeviceType::Unknown(code) => code,
        }
    }
}

impl TryFrom<u32> for DeviceType {
    type Error = std::convert::Infallible;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            101 => DeviceType::Refrigerator,
            102 => DeviceType::KimchiRefrigerator,
            103 => DeviceType::WaterPurifier,
            201 => DeviceType::Washer,
            202 => DeviceType::Dryer,
            203 => DeviceType::Styler,
            204 => DeviceType::Dishwasher,
            301 => DeviceType::Oven,
            302 => DeviceType::Microwave,
            303 => DeviceType::Cooktop,
            304 => DeviceType::Hood,
            401 => DeviceType::Ac,
            402 => DeviceType::AirPurifier,
            403 => DeviceType::Dehumidifier,
            501 => DeviceType::RobotKing,
            1001 => DeviceType::Arch,
            3001 => DeviceType::Missg,
            3002 => DeviceType::Sensor,
            3102 => DeviceType::SolarSensor,
            3003 => DeviceType::IotLighting,
            3004 => DeviceType::IotMotionSensor,
            3005 => DeviceType::IotSmartPlug,
            3006 => DeviceType::IotDustSensor,
            4001 => DeviceType::EmsAirStation,
            4003 => DeviceType::AirSensor,
            other => DeviceType::Unknown(other),
        })
    }
}

/// A single raw device-list entry, as returned by `device/deviceList` (legacy)
/// or `service/application/dashboard` (v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "alias")]
    pub alias: String,
    #[serde(rename = "modelNm")]
    pub model_id: String,
    #[serde(rename = "modelJsonUrl")]
    pub model_info_url: String,
    #[serde(rename = "deviceType")]
    pub device_type: DeviceType,
    #[serde(rename = "platformType", default)]
    pub platform_version: Option<String>,
    #[serde(rename = "macAddress", default)]
    pub mac: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_round_trips_known_codes() {
        for code in [101u32, 201, 204, 401, 3005] {
            let t = DeviceType::try_from(code).unwrap();
            let back: u32 = t.into();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn unknown_code_preserved() {
        let t = DeviceType::try_from(999_999).unwrap();
        assert_eq!(t, DeviceType::Unknown(999_999));
    }

    #[test]
    fn deserializes_a_device_list_entry() {
        let json = serde_json::json!({
            "deviceId": "abc-123",
            "alias": "Kitchen Fridge",
            "modelNm": "F1",
            "modelJsonUrl": "https://example.com/model.json",
            "deviceType": 101,
        });
        let d: DeviceDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(d.device_id, "abc-123");
        assert_eq!(d.device_type, DeviceType::Refrigerator);
    }
}
