//! Button node: publishes one retained MQTT message per press-release cycle.
//!
//! The `esp32` feature builds the firmware; without it the same connectivity
//! core runs on the host against a real broker with a console button.

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
