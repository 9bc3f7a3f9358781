pub const TOPIC_PREFIX: &str = "button";
pub const TOPIC_EVENT_SUFFIX: &str = "event";

pub fn button_event_topic(device_id: &str) -> String {
    format!("{TOPIC_PREFIX}/{}/{TOPIC_EVENT_SUFFIX}", device_id.trim())
}
