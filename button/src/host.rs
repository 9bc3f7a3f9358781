use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Outgoing,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Handle,
    sync::watch,
};
use tracing::{debug, info, warn};

use button_common::{
    escalate, ConnectivityMachine, ConnectivityState, Delay, DoorAlarm, EnqueueFailure,
    FailureIndicator, InputEdgePublisher, InputSampler, Led, MessageId, NetworkConfig,
    NetworkDriver, NetworkEvent, OutputLine, PublishPulser, QoS, RuntimeConfig, SampledLevel,
    SessionDriver, SessionEvent, WifiCredentials,
};

const CLICK_HOLD_MS: u64 = 300;
const PULSE_IDLE_MS: u64 = 50;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config()?;
    let released_level = runtime.button.released_level;
    info!(
        "button node `{}` publishing to {} on {}",
        runtime.button.device_id,
        runtime.button.topic(),
        runtime.network.broker_url()
    );

    let handle = Handle::current();
    let state = Arc::new(ConnectivityState::new(released_level));

    let network = SimulatedNetwork::new(handle.clone(), state.clone(), &runtime.network);
    let session = MqttSession::spawn(&handle, &runtime.network, state.clone());

    let raw_button = SampledLevel::new(released_level);
    spawn_console_button(&handle, raw_button.clone(), network.link(), released_level);

    let level = SampledLevel::new(released_level);
    let sampler = InputSampler::new(
        raw_button,
        ThreadDelay,
        level.clone(),
        runtime.button.sample_interval_ms,
        runtime.button.stable_samples,
    );
    thread::Builder::new()
        .name("button-sampler".to_string())
        .spawn(move || sampler.run())
        .context("failed to spawn sampler thread")?;

    let alarm = DoorAlarm::new(
        level.clone(),
        Led::new(LogLine::new("door-alarm"), false),
        ThreadDelay,
        released_level,
        runtime.indicator.alarm_after_ms,
        runtime.indicator.alarm_blink_ms,
    );
    thread::Builder::new()
        .name("door-alarm".to_string())
        .spawn(move || alarm.run())
        .context("failed to spawn door alarm thread")?;

    let pulser = PublishPulser::new(
        Led::new(LogLine::new("publish"), false),
        ThreadDelay,
        runtime.indicator.pulse_ms,
    );
    let pulse_state = state.clone();
    thread::Builder::new()
        .name("publish-pulse".to_string())
        .spawn(move || pulser.run(&pulse_state, PULSE_IDLE_MS))
        .context("failed to spawn pulse thread")?;

    let publisher = InputEdgePublisher::new(
        level,
        runtime.button.topic(),
        runtime.button.payload.clone().into_bytes(),
        released_level,
    );
    let mut machine = ConnectivityMachine::new(
        runtime.connectivity.clone(),
        runtime.network.credentials(),
        state.clone(),
        network,
        session,
        publisher,
        ThreadDelay,
    );
    let indicator = FailureIndicator::new(
        Led::new(LogLine::new("failure"), runtime.indicator.failure_active_low),
        ThreadDelay,
    );

    info!("button node started; press enter to click, or type press/release/wifi-down");

    let control = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let kind = machine.run();
        escalate(kind, &state, indicator)
    });

    tokio::select! {
        result = control => result.context("connectivity loop panicked")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let from_file = std::env::var("BUTTON_CONFIG").ok();
    let mut runtime = match from_file.as_deref() {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file `{path}`"))?;
            RuntimeConfig::from_json(&json)
                .with_context(|| format!("invalid config file `{path}`"))?
        }
        None => RuntimeConfig::default(),
    };

    let network = &mut runtime.network;
    match std::env::var("MQTT_HOST") {
        Ok(host) => network.mqtt_host = host,
        Err(_) if from_file.is_none() => network.mqtt_host = "127.0.0.1".to_string(),
        Err(_) => {}
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
        network.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }
    if let Ok(ssid) = std::env::var("WIFI_SSID") {
        network.wifi_ssid = ssid;
    }
    if network.wifi_ssid.is_empty() {
        network.wifi_ssid = "host-sim".to_string();
    }
    if let Ok(device_id) = std::env::var("BUTTON_DEVICE_ID") {
        runtime.button.device_id = device_id;
    }

    runtime.sanitize();
    runtime.validate().context("invalid runtime configuration")?;
    Ok(runtime)
}

struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// LED stand-in that logs level changes.
struct LogLine {
    name: &'static str,
    level: Option<bool>,
}

impl LogLine {
    fn new(name: &'static str) -> Self {
        Self { name, level: None }
    }
}

impl OutputLine for LogLine {
    fn write_line(&mut self, level: bool) {
        if self.level != Some(level) {
            debug!(line = self.name, level, "led");
            self.level = Some(level);
        }
    }
}

/// Shared view of the simulated station link.
#[derive(Clone)]
struct SimulatedLink {
    state: Arc<ConnectivityState>,
    associated: Arc<AtomicBool>,
}

impl SimulatedLink {
    fn drop_link(&self) {
        self.associated.store(false, Ordering::SeqCst);
        self.state.record_network_event(NetworkEvent::Disconnected);
    }
}

/// Association is simulated by resolving the broker host: a resolvable broker
/// counts as an acquired address.
struct SimulatedNetwork {
    handle: Handle,
    link: SimulatedLink,
    target: String,
    in_flight: Arc<AtomicBool>,
}

impl SimulatedNetwork {
    fn new(handle: Handle, state: Arc<ConnectivityState>, network: &NetworkConfig) -> Self {
        Self {
            handle,
            link: SimulatedLink {
                state,
                associated: Arc::new(AtomicBool::new(false)),
            },
            target: format!("{}:{}", network.mqtt_host, network.mqtt_port),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn link(&self) -> SimulatedLink {
        self.link.clone()
    }
}

impl NetworkDriver for SimulatedNetwork {
    fn begin_association(&mut self, credentials: &WifiCredentials) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("association already in flight");
            return;
        }

        info!("associating with `{}`", credentials.ssid);
        let link = self.link.clone();
        let target = self.target.clone();
        let in_flight = self.in_flight.clone();

        self.handle.spawn(async move {
            link.state.record_network_event(NetworkEvent::Started);
            match tokio::net::lookup_host(target.as_str()).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => {
                        debug!("broker `{target}` resolves to {addr}");
                        link.associated.store(true, Ordering::SeqCst);
                        link.state.record_network_event(NetworkEvent::Associated);
                        link.state.record_network_event(NetworkEvent::AddressAcquired);
                    }
                    None => {
                        warn!("broker `{target}` resolved to no addresses");
                        link.drop_link();
                    }
                },
                Err(err) => {
                    warn!("failed to resolve broker `{target}`: {err}");
                    link.drop_link();
                }
            }
            in_flight.store(false, Ordering::SeqCst);
        });
    }

    fn is_associated(&self) -> bool {
        self.link.associated.load(Ordering::SeqCst)
    }
}

/// Broker connection as seen by the event-loop task. A disconnect requested
/// on stop must be flushed on the live connection before the loop parks,
/// otherwise it would go out right after the next session's ConnAck.
#[derive(Debug, Default)]
struct SessionLink {
    up: AtomicBool,
    disconnect_pending: AtomicBool,
}

impl SessionLink {
    /// Returns whether a disconnect has to be queued for the current link.
    fn request_disconnect(&self) -> bool {
        if self.up.load(Ordering::SeqCst) {
            self.disconnect_pending.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn cancel_disconnect(&self) {
        self.disconnect_pending.store(false, Ordering::SeqCst);
    }

    fn keep_polling(&self, enabled: bool) -> bool {
        enabled || self.disconnect_pending.load(Ordering::SeqCst)
    }

    fn connected(&self) {
        self.up.store(true, Ordering::SeqCst);
    }

    fn dropped(&self) {
        self.up.store(false, Ordering::SeqCst);
    }

    fn disconnect_sent(&self) {
        self.disconnect_pending.store(false, Ordering::SeqCst);
        self.up.store(false, Ordering::SeqCst);
    }
}

/// rumqttc client whose event loop only runs while the session is enabled.
struct MqttSession {
    client: AsyncClient,
    enabled: watch::Sender<bool>,
    link: Arc<SessionLink>,
    next_id: MessageId,
}

impl MqttSession {
    fn spawn(handle: &Handle, network: &NetworkConfig, state: Arc<ConnectivityState>) -> Self {
        let mut options = MqttOptions::new(
            network.client_id.clone(),
            network.mqtt_host.clone(),
            network.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(15));
        if !network.mqtt_user.is_empty() {
            options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 32);
        let (enabled, enabled_rx) = watch::channel(false);
        let link = Arc::new(SessionLink::default());
        handle.spawn(drive_session(eventloop, enabled_rx, link.clone(), state));

        Self {
            client,
            enabled,
            link,
            next_id: 0,
        }
    }
}

impl SessionDriver for MqttSession {
    fn start_session(&mut self) {
        if !self.enabled.send_replace(true) {
            info!("mqtt session started");
        }
    }

    fn stop_session(&mut self) {
        if !*self.enabled.borrow() {
            return;
        }

        if self.link.request_disconnect() {
            if let Err(err) = self.client.try_disconnect() {
                warn!("failed to queue mqtt disconnect: {err}");
                self.link.cancel_disconnect();
            }
        }
        self.enabled.send_replace(false);
        info!("mqtt session stopped");
    }

    fn enqueue(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, EnqueueFailure> {
        if !*self.enabled.borrow() {
            return Err(EnqueueFailure::NotStarted);
        }

        self.client
            .try_publish(topic, mqtt_qos(qos), retain, payload.to_vec())
            .map_err(|err| EnqueueFailure::Rejected(err.to_string()))?;
        self.next_id = self.next_id.wrapping_add(1);
        Ok(self.next_id)
    }
}

fn mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

async fn drive_session(
    mut eventloop: EventLoop,
    mut enabled: watch::Receiver<bool>,
    link: Arc<SessionLink>,
    state: Arc<ConnectivityState>,
) {
    loop {
        let active = *enabled.borrow_and_update();
        if !link.keep_polling(active) {
            if enabled.changed().await.is_err() {
                return;
            }
            continue;
        }

        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    link.connected();
                    if active {
                        state.record_session_event(SessionEvent::Connected);
                    } else {
                        debug!("connected while stopped; flushing disconnect");
                    }
                } else {
                    warn!("broker refused session: {:?}", ack.code);
                    state.record_session_event(SessionEvent::Refused);
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                link.dropped();
                state.record_session_event(SessionEvent::Disconnected);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                link.disconnect_sent();
                state.record_session_event(SessionEvent::Disconnected);
            }
            Ok(Event::Incoming(
                packet @ (Incoming::Publish(_) | Incoming::SubAck(_) | Incoming::UnsubAck(_)),
            )) => {
                warn!("unexpected packet on publish-only session: {packet:?}");
                state.record_session_event(SessionEvent::Error);
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                link.dropped();
                warn!("broker refused session: {code:?}");
                state.record_session_event(SessionEvent::Refused);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(err) => {
                link.dropped();
                warn!("mqtt poll error: {err}");
                state.record_session_event(SessionEvent::Disconnected);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Console stand-in for the physical button. An empty line clicks.
fn spawn_console_button(
    handle: &Handle,
    raw: SampledLevel,
    link: SimulatedLink,
    released_level: bool,
) {
    handle.spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "" => {
                    raw.store(!released_level);
                    tokio::time::sleep(Duration::from_millis(CLICK_HOLD_MS)).await;
                    raw.store(released_level);
                }
                "press" => raw.store(!released_level),
                "release" => raw.store(released_level),
                "wifi-down" => {
                    warn!("dropping simulated wifi link");
                    link.drop_link();
                }
                other => warn!("unknown command `{other}`"),
            }
        }
        debug!("console input closed");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_on_live_link_keeps_polling_until_disconnect_is_sent() {
        let link = SessionLink::default();
        link.connected();

        assert!(link.request_disconnect());
        assert!(link.keep_polling(false));

        link.disconnect_sent();
        assert!(!link.keep_polling(false));
        assert!(!link.request_disconnect());
    }

    #[test]
    fn stop_without_link_queues_nothing_and_parks() {
        let link = SessionLink::default();

        assert!(!link.request_disconnect());
        assert!(!link.keep_polling(false));
        assert!(link.keep_polling(true));
    }

    #[test]
    fn dropped_link_needs_no_disconnect() {
        let link = SessionLink::default();
        link.connected();
        link.dropped();

        assert!(!link.request_disconnect());
        assert!(!link.keep_polling(false));
    }

    #[test]
    fn failed_disconnect_request_does_not_hold_loop() {
        let link = SessionLink::default();
        link.connected();

        assert!(link.request_disconnect());
        link.cancel_disconnect();
        assert!(!link.keep_polling(false));
    }
}
