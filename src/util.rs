use std::sync::Arc;

/// Placeholder replaced by the device identifier in broker topics
pub const CORE_DEVICE_NAME_PLACEHOLDER: &str = "{core-device-name}";

const AWS_IOT_THING_NAME: &str = "AWS_IOT_THING_NAME";

/// Source of the device identifier, consulted once per broker publish
pub type DeviceNameProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Read the device identifier from the environment; empty counts as absent
pub fn get_core_device_name() -> Option<String> {
    std::env::var(AWS_IOT_THING_NAME)
        .ok()
        .filter(|name| !name.is_empty())
}

pub fn env_device_name_provider() -> DeviceNameProvider {
    Arc::new(get_core_device_name)
}

/// Substitute every placeholder occurrence with `device_name`
///
/// Without a usable device name the topic is returned untouched, placeholder
/// included.
pub fn resolve_topic(topic: &str, device_name: Option<&str>) -> String {
    match device_name {
        Some(name) if !name.is_empty() => topic.replace(CORE_DEVICE_NAME_PLACEHOLDER, name),
        _ => topic.to_string(),
    }
}
