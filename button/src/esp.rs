use std::{sync::Arc, thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::{
    mqtt::client::{EventPayload, QoS as MqttQoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    netif::IpEvent,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::EspError,
    wifi::{EspWifi, WifiEvent},
};
use log::{error, info, warn};

use button_common::{
    escalate, ConnectivityMachine, ConnectivityState, Delay, DoorAlarm, EnqueueFailure,
    FailureIndicator, FailureKind, IndicatorConfig, InputEdgePublisher, InputLine, InputSampler,
    Led, MessageId, NetworkConfig, NetworkDriver, NetworkEvent, OutputLine, PublishPulser, QoS,
    RuntimeConfig, SampledLevel, SessionDriver, SessionEvent, WifiCredentials,
};

const NVS_NAMESPACE: &str = "button";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const PULSE_IDLE_MS: u64 = 50;
const WORKER_STACK_SIZE: usize = 4096;

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(RuntimeConfig::from_json(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();
    log_boot_diagnostics();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_network_defaults(&mut runtime);
    runtime.sanitize();

    let Peripherals { modem, .. } = Peripherals::take()?;

    let state = Arc::new(ConnectivityState::new(runtime.button.released_level));
    let failure_led = GpioOutput::new(runtime.indicator.failure_pin)?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    if let Err(err) = runtime.validate() {
        error!("invalid runtime configuration: {err}");
        let indicator = FailureIndicator::new(
            Led::new(failure_led, runtime.indicator.failure_active_low),
            WatchdogDelay,
        );
        escalate(FailureKind::NoNetwork, &state, indicator)
    }
    info!(
        "button `{}` on GPIO{} publishing to {} via {}",
        runtime.button.device_id,
        runtime.button.pin,
        runtime.button.topic(),
        runtime.network.broker_url()
    );

    let level = spawn_sampler(&runtime)?;
    spawn_pulser(state.clone(), &runtime.indicator)?;
    spawn_door_alarm(level.clone(), &runtime)?;

    let network = WifiNetwork::new(modem, sys_loop, nvs_partition, state.clone())?;
    let session = MqttSession::new(runtime.network.clone(), state.clone());

    let publisher = InputEdgePublisher::new(
        level,
        runtime.button.topic(),
        runtime.button.payload.clone().into_bytes(),
        runtime.button.released_level,
    );
    let mut machine = ConnectivityMachine::new(
        runtime.connectivity.clone(),
        runtime.network.credentials(),
        state.clone(),
        network,
        session,
        publisher,
        WatchdogDelay,
    );

    let kind = machine.run();
    let indicator = FailureIndicator::new(
        Led::new(failure_led, runtime.indicator.failure_active_low),
        WatchdogDelay,
    );
    escalate(kind, &state, indicator)
}

fn spawn_sampler(runtime: &RuntimeConfig) -> anyhow::Result<SampledLevel> {
    let button = &runtime.button;
    let raw = GpioInput::new(button.pin, button.released_level)?;
    let level = SampledLevel::new(button.released_level);
    let sampler = InputSampler::new(
        raw,
        ThreadDelay,
        level.clone(),
        button.sample_interval_ms,
        button.stable_samples,
    );

    thread::Builder::new()
        .name("button-sampler".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || sampler.run())
        .context("failed to spawn sampler thread")?;
    Ok(level)
}

fn spawn_pulser(state: Arc<ConnectivityState>, indicator: &IndicatorConfig) -> anyhow::Result<()> {
    let led = Led::new(GpioOutput::new(indicator.pulse_pin)?, false);
    let pulser = PublishPulser::new(led, ThreadDelay, indicator.pulse_ms);

    thread::Builder::new()
        .name("publish-pulse".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || pulser.run(&state, PULSE_IDLE_MS))
        .context("failed to spawn pulse thread")?;
    Ok(())
}

fn spawn_door_alarm(level: SampledLevel, runtime: &RuntimeConfig) -> anyhow::Result<()> {
    let indicator = &runtime.indicator;
    let alarm = DoorAlarm::new(
        level,
        Led::new(GpioOutput::new(indicator.status_pin)?, false),
        ThreadDelay,
        runtime.button.released_level,
        indicator.alarm_after_ms,
        indicator.alarm_blink_ms,
    );

    thread::Builder::new()
        .name("door-alarm".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || alarm.run())
        .context("failed to spawn door alarm thread")?;
    Ok(())
}

fn ensure_network_defaults(runtime: &mut RuntimeConfig) {
    let network = &mut runtime.network;
    if network.wifi_ssid.is_empty() {
        network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or_default().to_string();
    }
    if network.wifi_pass.is_empty() {
        network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }
    if let Some(host) = option_env!("MQTT_HOST") {
        if network.mqtt_host == NetworkConfig::default().mqtt_host {
            network.mqtt_host = host.to_string();
        }
    }
}

fn log_boot_diagnostics() {
    let mut chip = esp_idf_svc::sys::esp_chip_info_t::default();
    unsafe { esp_idf_svc::sys::esp_chip_info(&mut chip) };
    let min_free_heap = unsafe { esp_idf_svc::sys::esp_get_minimum_free_heap_size() };

    info!(
        "chip model {} with {} core(s), revision v{}.{}",
        chip.model,
        chip.cores,
        chip.revision / 100,
        chip.revision % 100
    );
    info!("minimum free heap: {min_free_heap} bytes");
}

/// Station interface driven without blocking. Link events are recorded into
/// the shared state from the system event loop.
struct WifiNetwork {
    wifi: EspWifi<'static>,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl WifiNetwork {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        state: Arc<ConnectivityState>,
    ) -> anyhow::Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

        let wifi_state = state.clone();
        let wifi_events = sys_loop.subscribe::<WifiEvent, _>(move |event| match event {
            WifiEvent::StaStarted => wifi_state.record_network_event(NetworkEvent::Started),
            WifiEvent::StaConnected(_) => {
                wifi_state.record_network_event(NetworkEvent::Associated)
            }
            WifiEvent::StaDisconnected(_) => {
                wifi_state.record_network_event(NetworkEvent::Disconnected)
            }
            _ => {}
        })?;

        let ip_events = sys_loop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(_) = event {
                state.record_network_event(NetworkEvent::AddressAcquired);
            }
        })?;

        Ok(Self {
            wifi,
            _wifi_events: wifi_events,
            _ip_events: ip_events,
        })
    }

    fn request_association(&mut self, credentials: &WifiCredentials) -> anyhow::Result<()> {
        if !self.wifi.is_started()? {
            let auth_method = if credentials.passphrase.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPAWPA2Personal
            };

            self.wifi
                .set_configuration(&Configuration::Client(ClientConfiguration {
                    ssid: credentials
                        .ssid
                        .as_str()
                        .try_into()
                        .map_err(|_| anyhow!("wifi ssid too long"))?,
                    password: credentials
                        .passphrase
                        .as_str()
                        .try_into()
                        .map_err(|_| anyhow!("wifi password too long"))?,
                    auth_method,
                    ..Default::default()
                }))?;
            self.wifi.start()?;
            info!("wifi started, associating with `{}`", credentials.ssid);
        }

        self.wifi.connect()?;
        Ok(())
    }
}

impl NetworkDriver for WifiNetwork {
    fn begin_association(&mut self, credentials: &WifiCredentials) {
        if let Err(err) = self.request_association(credentials) {
            warn!("wifi association request failed: {err:#}");
        }
    }

    fn is_associated(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }
}

/// ESP-MQTT client created on session start and dropped on stop. Its event
/// callback runs on the client task and only records status.
struct MqttSession {
    network: NetworkConfig,
    state: Arc<ConnectivityState>,
    client: Option<EspMqttClient<'static>>,
}

impl MqttSession {
    fn new(network: NetworkConfig, state: Arc<ConnectivityState>) -> Self {
        Self {
            network,
            state,
            client: None,
        }
    }
}

impl SessionDriver for MqttSession {
    fn start_session(&mut self) {
        if self.client.is_some() {
            return;
        }

        match create_mqtt_client(&self.network, self.state.clone()) {
            Ok(client) => {
                info!("mqtt session started against {}", self.network.broker_url());
                self.client = Some(client);
            }
            Err(err) => warn!("failed to start mqtt session: {err:#}"),
        }
    }

    fn stop_session(&mut self) {
        if self.client.take().is_some() {
            info!("mqtt session stopped");
        }
    }

    fn enqueue(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, EnqueueFailure> {
        let client = self.client.as_mut().ok_or(EnqueueFailure::NotStarted)?;
        client
            .enqueue(topic, mqtt_qos(qos), retain, payload)
            .map_err(|err| EnqueueFailure::Rejected(err.to_string()))
    }
}

fn mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn create_mqtt_client(
    network: &NetworkConfig,
    state: Arc<ConnectivityState>,
) -> anyhow::Result<EspMqttClient<'static>> {
    let url = network.broker_url();

    let conf = MqttClientConfiguration {
        client_id: Some(network.client_id.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    let client = EspMqttClient::new_cb(&url, &conf, move |event| {
        if let Some(session_event) = session_event(&event.payload()) {
            state.record_session_event(session_event);
        }
    })?;
    Ok(client)
}

/// The client reports refusals and transport failures alike as errors, so
/// they all surface as `SessionEvent::Error`.
fn session_event(payload: &EventPayload<'_, EspError>) -> Option<SessionEvent> {
    match payload {
        EventPayload::Connected(_) => Some(SessionEvent::Connected),
        EventPayload::Disconnected => Some(SessionEvent::Disconnected),
        EventPayload::BeforeConnect | EventPayload::Published(_) | EventPayload::Deleted(_) => {
            None
        }
        EventPayload::Error(err) => {
            warn!("mqtt error: {err}");
            Some(SessionEvent::Error)
        }
        other => {
            warn!("unexpected mqtt event on publish-only session: {other:?}");
            Some(SessionEvent::Error)
        }
    }
}

struct GpioInput {
    pin: PinDriver<'static, AnyIOPin, Input>,
}

impl GpioInput {
    fn new(pin: i32, released_level: bool) -> anyhow::Result<Self> {
        let mut pin_driver = PinDriver::input(unsafe { AnyIOPin::new(pin) })
            .with_context(|| format!("failed to configure button on GPIO{pin}"))?;
        pin_driver.set_pull(if released_level { Pull::Up } else { Pull::Down })?;
        Ok(Self { pin: pin_driver })
    }
}

impl InputLine for GpioInput {
    fn read_line(&mut self) -> bool {
        self.pin.is_high()
    }
}

struct GpioOutput {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl GpioOutput {
    fn new(pin: i32) -> anyhow::Result<Self> {
        let pin_driver = PinDriver::output(unsafe { AnyOutputPin::new(pin) })
            .with_context(|| format!("failed to configure output on GPIO{pin}"))?;
        Ok(Self { pin: pin_driver })
    }
}

impl OutputLine for GpioOutput {
    fn write_line(&mut self, level: bool) {
        let result = if level {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(err) = result {
            warn!("failed to drive GPIO: {err:?}");
        }
    }
}

struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Delay for the watched control task: every wait feeds the task watchdog.
struct WatchdogDelay;

impl Delay for WatchdogDelay {
    fn delay_ms(&mut self, ms: u64) {
        feed_watchdog();
        thread::sleep(Duration::from_millis(ms));
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}
