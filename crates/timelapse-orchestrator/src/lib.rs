//! Camera orchestration: power state machine, periodic capture, gating and
//! the query surface handed to the host.

pub mod gate;
pub mod host;
pub mod power;

use std::{
    convert::Infallible,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock, Weak},
};

use bytes::Bytes;
use chrono::Utc;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use timelapse_fetcher::{FetchOutcome, Fetcher, SessionState, SnapshotClient};
use timelapse_store::FrameStore;
use timelapse_stream::{frame_stream, mjpeg_body, FrameCursor};
use timelapse_types::{
    config::SourceConfig,
    events::{CameraEvent, CameraEventKind},
    status::{CameraStatus, PowerState},
    Result, TimelapseError,
};
use tokio::{
    sync::{oneshot, watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

pub use gate::{Clock, Gate, GateDecision, SystemClock};
pub use host::Host;
pub use power::{PowerFlags, TimerAction};

/// Everything derived from one `SourceConfig`; swapped wholesale on reconfigure.
#[derive(Clone)]
struct CameraSetup {
    config: Arc<SourceConfig>,
    store: FrameStore,
    gate: Arc<Gate>,
}

impl CameraSetup {
    fn build(config: SourceConfig, data_dir: &Path) -> Result<Self> {
        config.validate()?;
        let store = FrameStore::for_source(
            data_dir,
            &config.image_url,
            config.jpeg_quality(),
            config.max_frames,
        );
        let gate = Gate::from_source(&config)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            gate: Arc::new(gate),
        })
    }
}

/// Periodic capture loop. Stopped cooperatively so a capture that has
/// already started always finishes before the caller proceeds.
struct TimerTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TimerTask {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Default)]
struct Tasks {
    timer: Option<TimerTask>,
    listener: Option<JoinHandle<()>>,
}

struct CameraInner<C, H> {
    data_dir: PathBuf,
    fetcher: Fetcher<C>,
    host: Arc<H>,
    clock: Arc<dyn Clock>,
    setup: RwLock<CameraSetup>,
    session: AsyncMutex<SessionState>,
    flags: Mutex<PowerFlags>,
    /// Serialises power transitions and owns the background tasks.
    tasks: AsyncMutex<Tasks>,
    power: watch::Sender<bool>,
}

/// One configured snapshot source with its store, timer and viewers.
pub struct TimelapseCamera<C, H> {
    inner: Arc<CameraInner<C, H>>,
}

impl<C, H> Clone for TimelapseCamera<C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, H> TimelapseCamera<C, H>
where
    C: SnapshotClient + 'static,
    H: Host,
{
    pub fn new(
        config: SourceConfig,
        data_dir: impl Into<PathBuf>,
        client: C,
        host: Arc<H>,
    ) -> Result<Self> {
        Self::with_clock(config, data_dir, client, host, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SourceConfig,
        data_dir: impl Into<PathBuf>,
        client: C,
        host: Arc<H>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let setup = CameraSetup::build(config, &data_dir)?;
        let (power, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(CameraInner {
                data_dir,
                fetcher: Fetcher::new(client),
                host,
                clock,
                setup: RwLock::new(setup),
                session: AsyncMutex::new(SessionState::default()),
                flags: Mutex::new(PowerFlags::default()),
                tasks: AsyncMutex::new(Tasks::default()),
                power,
            }),
        })
    }

    fn setup(&self) -> CameraSetup {
        match self.inner.setup.read() {
            Ok(setup) => setup.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn flags(&self) -> PowerFlags {
        self.inner
            .flags
            .lock()
            .map(|flags| *flags)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn update_flags<F>(&self, update: F) -> (TimerAction, PowerFlags)
    where
        F: FnOnce(&mut PowerFlags) -> TimerAction,
    {
        let mut flags = self
            .inner
            .flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let action = update(&mut flags);
        (action, *flags)
    }

    pub fn name(&self) -> String {
        self.setup().config.name.clone()
    }

    pub fn config(&self) -> Arc<SourceConfig> {
        self.setup().config
    }

    pub fn store(&self) -> FrameStore {
        self.setup().store
    }

    pub fn power(&self) -> PowerFlags {
        self.flags()
    }

    pub fn state(&self) -> PowerState {
        self.flags().state()
    }

    pub async fn timer_active(&self) -> bool {
        let tasks = self.inner.tasks.lock().await;
        tasks.timer.as_ref().is_some_and(TimerTask::is_active)
    }

    /// Attaches the enabling-entity listener and switches the camera on.
    pub async fn start(&self) {
        {
            let mut tasks = self.inner.tasks.lock().await;
            self.attach_listener(&mut tasks);
        }
        self.turn_on().await;
    }

    pub async fn turn_on(&self) {
        self.transition("turn_on", PowerFlags::turn_on).await;
    }

    pub async fn turn_off(&self) {
        self.transition("turn_off", PowerFlags::turn_off).await;
    }

    pub async fn pause(&self) {
        self.transition("pause", PowerFlags::pause).await;
    }

    pub async fn resume(&self) {
        self.transition("resume", PowerFlags::resume).await;
    }

    /// Reacts to a change of the enabling entity.
    pub async fn on_signal(&self, signal_on: bool) {
        self.transition("enable_signal", |flags| flags.signal_changed(signal_on))
            .await;
    }

    async fn transition<F>(&self, label: &str, update: F)
    where
        F: FnOnce(&mut PowerFlags) -> TimerAction,
    {
        {
            let mut tasks = self.inner.tasks.lock().await;
            let (action, flags) = self.update_flags(update);
            self.inner.power.send_replace(flags.on);
            match action {
                TimerAction::Start => self.start_timer(&mut tasks),
                TimerAction::Stop => stop_timer(&mut tasks.timer).await,
                TimerAction::Keep => {}
            }
            info!(
                "Camera '{}' {label}: state {:?}, timer {:?}",
                self.name(),
                flags.state(),
                action
            );
        }
        self.notify().await;
    }

    fn start_timer(&self, tasks: &mut Tasks) {
        if tasks.timer.as_ref().is_some_and(TimerTask::is_active) {
            return;
        }
        let period = self.setup().config.fetch_interval();
        let camera = Arc::downgrade(&self.inner);
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {}
                }
                let Some(camera) = upgrade(&camera) else {
                    break;
                };
                camera.tick().await;
            }
        });
        tasks.timer = Some(TimerTask { stop, handle });
    }

    /// Seeds the signal veto from the host and follows later changes.
    fn attach_listener(&self, tasks: &mut Tasks) {
        if let Some(listener) = tasks.listener.take() {
            listener.abort();
        }
        let gate = self.setup().gate;
        let Some(entity) = gate.enabling_entity() else {
            self.update_flags(|flags| {
                flags.signal_off = false;
                TimerAction::Keep
            });
            return;
        };

        let signal_on = self.inner.host.read_external_signal(entity) == Some(true);
        self.update_flags(|flags| {
            flags.signal_off = !signal_on;
            TimerAction::Keep
        });

        let mut signals = self.inner.host.subscribe_signal(entity);
        let camera = Arc::downgrade(&self.inner);
        let entity = entity.to_owned();
        tasks.listener = Some(tokio::spawn(async move {
            while let Some(signal_on) = signals.next().await {
                let Some(camera) = upgrade(&camera) else {
                    break;
                };
                debug!("Enabling entity {entity} reported {signal_on}");
                camera.on_signal(signal_on).await;
            }
        }));
    }

    /// One scheduled capture attempt. Returns `None` when a gate is closed.
    pub async fn tick(&self) -> Option<FetchOutcome> {
        let setup = self.setup();
        let now = self.inner.clock.now();
        let decision = setup.gate.evaluate(now.time(), self.inner.host.as_ref());
        if decision != GateDecision::Open {
            debug!("Camera '{}' skipping capture: {:?}", setup.config.name, decision);
            return None;
        }

        let (outcome, availability_changed) = {
            let mut session = self.inner.session.lock().await;
            let was_available = session.available;
            let outcome = self
                .inner
                .fetcher
                .fetch(&setup.config, &setup.store, &mut session)
                .await;
            (outcome, was_available != session.available)
        };

        if let Some(max_age) = setup.config.max_age() {
            let store = setup.store.clone();
            let cutoff_base = now.with_timezone(&Utc);
            match tokio::task::spawn_blocking(move || store.evict_older_than(max_age, cutoff_base))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!("Age eviction failed for '{}': {err}", setup.config.name),
                Err(err) => warn!("Age eviction task failed: {err}"),
            }
        }

        match outcome {
            FetchOutcome::Stored(frame) => {
                self.inner.host.publish(CameraEvent::new(
                    setup.config.name.as_str(),
                    CameraEventKind::FrameStored { frame },
                ));
            }
            FetchOutcome::Unreachable if availability_changed => {
                self.inner.host.publish(CameraEvent::new(
                    setup.config.name.as_str(),
                    CameraEventKind::Unreachable {
                        reason: format!("{} did not answer", setup.config.image_url),
                    },
                ));
            }
            _ => {}
        }
        if availability_changed || matches!(outcome, FetchOutcome::Stored(_)) {
            self.notify().await;
        }
        Some(outcome)
    }

    /// Deletes every stored frame; capture state is left alone.
    pub async fn clear_images(&self) {
        let setup = self.setup();
        let store = setup.store.clone();
        match tokio::task::spawn_blocking(move || store.clear()).await {
            Ok(Ok(())) => {
                info!("Cleared stored frames for '{}'", setup.config.name);
                self.inner.host.publish(CameraEvent::new(
                    setup.config.name.as_str(),
                    CameraEventKind::Cleared,
                ));
            }
            Ok(Err(err)) => warn!("Failed to clear '{}': {err}", setup.config.name),
            Err(err) => warn!("Clear task failed: {err}"),
        }
        self.notify().await;
    }

    /// Permanent removal: stops every background task, then deletes the store.
    pub async fn teardown(&self) {
        {
            let mut tasks = self.inner.tasks.lock().await;
            stop_timer(&mut tasks.timer).await;
            stop_task(&mut tasks.listener).await;
            self.update_flags(|flags| flags.turn_off());
            self.inner.power.send_replace(false);
        }
        let setup = self.setup();
        let store = setup.store.clone();
        match tokio::task::spawn_blocking(move || store.clear()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Failed to remove frames of '{}': {err}", setup.config.name),
            Err(err) => warn!("Removal task failed: {err}"),
        }
        info!("Camera '{}' removed", setup.config.name);
        self.inner.host.publish(CameraEvent::new(
            setup.config.name.as_str(),
            CameraEventKind::Removed,
        ));
    }

    /// Replaces the whole source configuration. A new URL gets a new store
    /// directory and forgets the previous conditional-GET validator.
    pub async fn reconfigure(&self, config: SourceConfig) -> Result<()> {
        let next = CameraSetup::build(config, &self.inner.data_dir)?;
        {
            let mut tasks = self.inner.tasks.lock().await;
            stop_timer(&mut tasks.timer).await;
            let previous = {
                let mut setup = self
                    .inner
                    .setup
                    .write()
                    .map_err(|_| scheduler_error("camera setup lock poisoned"))?;
                std::mem::replace(&mut *setup, next)
            };
            if previous.config.image_url != self.setup().config.image_url {
                *self.inner.session.lock().await = SessionState::default();
            }
            self.update_flags(|flags| {
                flags.running = false;
                TimerAction::Keep
            });
            self.attach_listener(&mut tasks);
            let (action, flags) = self.update_flags(PowerFlags::sync);
            if action == TimerAction::Start {
                self.start_timer(&mut tasks);
            }
            info!(
                "Camera '{}' reconfigured: state {:?}",
                self.name(),
                flags.state()
            );
        }
        self.notify().await;
        Ok(())
    }

    pub async fn latest_frame(&self) -> Option<Bytes> {
        let store = self.setup().store;
        match tokio::task::spawn_blocking(move || store.latest()).await {
            Ok(Ok(frame)) => frame.map(Bytes::from),
            Ok(Err(err)) => {
                warn!("Unable to read latest frame: {err}");
                None
            }
            Err(err) => {
                warn!("Latest frame task failed: {err}");
                None
            }
        }
    }

    /// Stored frames in capture order, looping if configured. Ends when the
    /// camera is switched off.
    pub async fn frame_stream(&self) -> BoxStream<'static, Bytes> {
        let setup = self.setup();
        match FrameCursor::open(setup.store, setup.config.loop_frames).await {
            Ok(cursor) => frame_stream(cursor.with_power(self.inner.power.subscribe())),
            Err(err) => {
                warn!("Unable to open frame stream: {err}");
                stream::empty().boxed()
            }
        }
    }

    /// MJPEG multipart body paced at the configured frame rate.
    pub async fn mjpeg_stream(&self) -> BoxStream<'static, std::result::Result<Bytes, Infallible>> {
        let interval = self.setup().config.frame_interval();
        mjpeg_body(self.frame_stream().await, interval)
    }

    pub async fn status(&self) -> CameraStatus {
        let setup = self.setup();
        let flags = self.flags();
        let (last_updated, available) = {
            let session = self.inner.session.lock().await;
            (session.last_capture, session.available)
        };
        let store = setup.store.clone();
        let frame_count = tokio::task::spawn_blocking(move || store.frame_count())
            .await
            .ok()
            .and_then(|count| count.ok())
            .unwrap_or_default();
        let config = &setup.config;
        let window = setup.gate.window();
        CameraStatus {
            name: config.name.clone(),
            image_url: config.image_url.clone(),
            fetch_interval: config.fetch_interval,
            framerate: config.framerate,
            max_frames: config.max_frames,
            quality: config.quality,
            loop_frames: config.loop_frames,
            headers: config.headers.clone(),
            last_updated,
            state: flags.state(),
            on: flags.on,
            paused: flags.paused,
            running: flags.running,
            available,
            start_time: window.start.format("%H:%M:%S").to_string(),
            end_time: window.end.format("%H:%M:%S").to_string(),
            max_duration_minutes: config.max_duration_minutes,
            enabling_entity_id: config.enabling_entity().map(str::to_owned),
            frame_count,
        }
    }

    async fn notify(&self) {
        let status = self.status().await;
        self.inner.host.notify_state_changed(status);
    }
}

fn upgrade<C, H>(weak: &Weak<CameraInner<C, H>>) -> Option<TimelapseCamera<C, H>> {
    weak.upgrade().map(|inner| TimelapseCamera { inner })
}

/// Signals the capture loop and waits for the tick in progress, including its
/// store write, to complete.
async fn stop_timer(slot: &mut Option<TimerTask>) {
    if let Some(timer) = slot.take() {
        let _ = timer.stop.send(());
        let _ = timer.handle.await;
    }
}

/// Aborts a background task and waits until it has fully stopped.
async fn stop_task(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
        let _ = handle.await;
    }
}

pub fn scheduler_error(message: impl Into<String>) -> TimelapseError {
    TimelapseError::Scheduler(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, time::Duration};

    use chrono::{DateTime, Local, TimeZone};
    use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
    use timelapse_fetcher::MockSnapshotClient;
    use timelapse_types::frame::FrameId;
    use tokio_stream::wrappers::WatchStream;

    #[derive(Default)]
    struct TestHost {
        signals: Mutex<HashMap<String, watch::Sender<bool>>>,
        events: Mutex<Vec<CameraEvent>>,
    }

    impl TestHost {
        fn set_signal(&self, id: &str, value: bool) {
            let mut signals = self.signals.lock().expect("signals lock");
            signals
                .entry(id.to_owned())
                .or_insert_with(|| watch::channel(value).0)
                .send_replace(value);
        }

        fn events(&self) -> Vec<CameraEvent> {
            self.events.lock().expect("events lock").clone()
        }
    }

    impl Host for TestHost {
        fn publish(&self, event: CameraEvent) {
            self.events.lock().expect("events lock").push(event);
        }

        fn read_external_signal(&self, id: &str) -> Option<bool> {
            let signals = self.signals.lock().expect("signals lock");
            signals.get(id).map(|tx| *tx.borrow())
        }

        fn subscribe_signal(&self, id: &str) -> BoxStream<'static, bool> {
            let mut signals = self.signals.lock().expect("signals lock");
            let tx = signals
                .entry(id.to_owned())
                .or_insert_with(|| watch::channel(false).0);
            WatchStream::new(tx.subscribe()).boxed()
        }
    }

    struct FixedClock(DateTime<Local>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            self.0
        }
    }

    fn local(h: u32, m: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, h, m, 0)
            .earliest()
            .expect("valid local time")
    }

    fn jpeg_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(4, 4, Rgb([30, 60, 90]));
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 90)
            .encode_image(&image)
            .expect("encode jpeg");
        buf
    }

    /// Big enough that decoding and re-encoding takes a noticeable while.
    fn large_jpeg_bytes() -> Vec<u8> {
        let image = RgbImage::from_fn(1600, 1200, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
        });
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 95)
            .encode_image(&image)
            .expect("encode jpeg");
        buf
    }

    fn source() -> SourceConfig {
        let mut source = SourceConfig::new("http://camera.local/snapshot.jpg");
        source.name = "porch".into();
        source.fetch_interval = 3600.0;
        source
    }

    type TestCamera = TimelapseCamera<MockSnapshotClient, TestHost>;

    fn build_camera(
        dir: &Path,
        source: SourceConfig,
        at: DateTime<Local>,
    ) -> (TestCamera, MockSnapshotClient, Arc<TestHost>) {
        let client = MockSnapshotClient::new();
        let host = Arc::new(TestHost::default());
        let camera = TimelapseCamera::with_clock(
            source,
            dir,
            client.clone(),
            Arc::clone(&host),
            Arc::new(FixedClock(at)),
        )
        .expect("build camera");
        (camera, client, host)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut bad = source();
        bad.quality = 0;
        let err = TimelapseCamera::new(
            bad,
            temp.path(),
            MockSnapshotClient::new(),
            Arc::new(TestHost::default()),
        )
        .err()
        .expect("invalid quality rejected");
        assert_eq!(err.field(), Some("quality"));
    }

    #[tokio::test]
    async fn pause_survives_power_cycle() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, _client, _host) = build_camera(temp.path(), source(), local(12, 0));

        camera.turn_on().await;
        assert_eq!(camera.state(), PowerState::Running);
        assert!(camera.timer_active().await);

        camera.pause().await;
        assert_eq!(camera.state(), PowerState::Paused);
        assert!(!camera.timer_active().await);

        camera.turn_off().await;
        assert_eq!(camera.state(), PowerState::Stopped);
        camera.turn_on().await;
        assert_eq!(camera.state(), PowerState::Paused);
        assert!(!camera.timer_active().await);

        camera.resume().await;
        assert_eq!(camera.state(), PowerState::Running);
        assert!(camera.timer_active().await);
        camera.turn_off().await;
    }

    #[tokio::test]
    async fn timer_captures_immediately_and_stops_on_turn_off() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, client, _host) = build_camera(temp.path(), source(), local(12, 0));
        client.push_image(None, jpeg_bytes());

        camera.turn_on().await;
        assert!(wait_for(|| camera.store().frame_count().unwrap_or(0) == 1).await);

        camera.turn_off().await;
        assert!(!camera.timer_active().await);
        let calls = client.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.calls(), calls);
    }

    #[tokio::test]
    async fn tick_outside_window_skips_fetch() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut windowed = source();
        windowed.start_time = Some("09:00".into());
        windowed.end_time = Some("17:00".into());

        let (camera, client, _host) = build_camera(temp.path(), windowed.clone(), local(20, 0));
        assert_eq!(camera.tick().await, None);
        assert_eq!(client.calls(), 0);
        let status = camera.status().await;
        assert_eq!(status.start_time, "09:00:00");
        assert_eq!(status.end_time, "17:00:00");

        let (camera, client, _host) = build_camera(temp.path(), windowed, local(12, 0));
        client.push_not_modified();
        assert_eq!(camera.tick().await, Some(FetchOutcome::Unchanged));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn tick_requires_enabling_entity_on() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut gated = source();
        gated.enabling_entity_id = Some("binary_sensor.daylight".into());
        let (camera, client, host) = build_camera(temp.path(), gated, local(12, 0));

        assert_eq!(camera.tick().await, None);
        host.set_signal("binary_sensor.daylight", false);
        assert_eq!(camera.tick().await, None);
        assert_eq!(client.calls(), 0);

        host.set_signal("binary_sensor.daylight", true);
        client.push_not_modified();
        assert_eq!(camera.tick().await, Some(FetchOutcome::Unchanged));
    }

    #[tokio::test]
    async fn enabling_signal_vetoes_capture_without_turning_off() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut gated = source();
        gated.enabling_entity_id = Some("binary_sensor.daylight".into());
        let (camera, _client, host) = build_camera(temp.path(), gated, local(12, 0));
        host.set_signal("binary_sensor.daylight", true);

        camera.start().await;
        assert_eq!(camera.state(), PowerState::Running);

        host.set_signal("binary_sensor.daylight", false);
        assert!(wait_for(|| !camera.power().running).await);
        assert!(camera.power().on);
        assert!(!camera.timer_active().await);

        host.set_signal("binary_sensor.daylight", true);
        assert!(wait_for(|| camera.power().running).await);
        assert!(camera.timer_active().await);

        camera.teardown().await;
    }

    #[tokio::test]
    async fn signal_off_at_start_keeps_timer_idle() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut gated = source();
        gated.enabling_entity_id = Some("binary_sensor.daylight".into());
        let (camera, _client, host) = build_camera(temp.path(), gated, local(12, 0));
        host.set_signal("binary_sensor.daylight", false);

        camera.start().await;
        assert!(camera.power().on);
        assert!(!camera.timer_active().await);
        camera.teardown().await;
    }

    #[tokio::test]
    async fn tick_applies_max_age() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut aged = source();
        aged.max_duration_minutes = Some(10);
        let now = local(12, 0);
        let (camera, client, host) = build_camera(temp.path(), aged, now);

        let store = camera.store();
        let old = FrameId(now.timestamp() - 3600);
        store.append(old, &jpeg_bytes()).expect("seed old frame");
        let fresh = now.with_timezone(&Utc).to_rfc2822();
        client.push_image(Some(fresh.as_str()), jpeg_bytes());

        assert_eq!(
            camera.tick().await,
            Some(FetchOutcome::Stored(FrameId(now.timestamp())))
        );
        assert_eq!(
            store.list_ordered().expect("list"),
            vec![FrameId(now.timestamp())]
        );
        assert!(host
            .events()
            .iter()
            .any(|event| matches!(event.kind, CameraEventKind::FrameStored { .. })));
        assert!(camera.status().await.last_updated.is_some());
    }

    #[tokio::test]
    async fn unreachable_source_reports_unavailable() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, client, host) = build_camera(temp.path(), source(), local(12, 0));
        client.push_failure("timed out");

        assert_eq!(camera.tick().await, Some(FetchOutcome::Unreachable));
        assert!(!camera.status().await.available);
        assert!(host
            .events()
            .iter()
            .any(|event| matches!(event.kind, CameraEventKind::Unreachable { .. })));
    }

    #[tokio::test]
    async fn latest_frame_and_clear() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, client, _host) = build_camera(temp.path(), source(), local(12, 0));
        assert!(camera.latest_frame().await.is_none());

        client.push_image(None, jpeg_bytes());
        camera.tick().await;
        let frame = camera.latest_frame().await.expect("latest frame");
        assert_eq!(image::guess_format(&frame).ok(), Some(image::ImageFormat::Jpeg));

        camera.clear_images().await;
        assert!(camera.latest_frame().await.is_none());
        assert_eq!(camera.status().await.frame_count, 0);
    }

    #[tokio::test]
    async fn teardown_stops_and_removes_frames() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, client, host) = build_camera(temp.path(), source(), local(12, 0));
        client.push_image(None, jpeg_bytes());
        camera.turn_on().await;
        assert!(wait_for(|| camera.store().frame_count().unwrap_or(0) == 1).await);

        camera.teardown().await;
        assert!(!camera.timer_active().await);
        assert!(!camera.store().dir().exists());
        assert_eq!(camera.state(), PowerState::Stopped);
        assert!(host
            .events()
            .iter()
            .any(|event| matches!(event.kind, CameraEventKind::Removed)));
    }

    #[tokio::test]
    async fn teardown_waits_for_capture_in_progress() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, client, _host) = build_camera(temp.path(), source(), local(12, 0));
        client.push_image(None, large_jpeg_bytes());
        camera.turn_on().await;
        assert!(wait_for(|| client.calls() == 1).await);

        camera.teardown().await;
        assert!(!camera.timer_active().await);
        assert!(!camera.store().dir().exists());
        assert!(!wait_for(|| camera.store().dir().exists()).await);
    }

    #[tokio::test]
    async fn stream_ends_when_turned_off() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, _client, _host) = build_camera(temp.path(), source(), local(12, 0));
        let store = camera.store();
        store.append(FrameId(1), &jpeg_bytes()).expect("append");
        store.append(FrameId(2), &jpeg_bytes()).expect("append");

        camera.turn_on().await;
        let mut frames = camera.frame_stream().await;
        assert!(frames.next().await.is_some());
        assert!(frames.next().await.is_some());
        assert!(frames.next().await.is_some());

        camera.turn_off().await;
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn reconfigure_swaps_store_and_validates() {
        let temp = tempfile::tempdir().expect("temp dir");
        let (camera, _client, _host) = build_camera(temp.path(), source(), local(12, 0));
        camera.turn_on().await;
        let old_dir = camera.store().dir().to_path_buf();

        let mut invalid = source();
        invalid.framerate = 0.0;
        let err = camera.reconfigure(invalid).await.unwrap_err();
        assert_eq!(err.field(), Some("framerate"));
        assert_eq!(camera.store().dir(), old_dir.as_path());

        let mut moved = source();
        moved.image_url = "http://camera.local/other.jpg".into();
        moved.loop_frames = false;
        camera.reconfigure(moved).await.expect("reconfigure");
        assert_ne!(camera.store().dir(), old_dir.as_path());
        assert!(!camera.config().loop_frames);
        assert_eq!(camera.state(), PowerState::Running);
        assert!(camera.timer_active().await);
        camera.turn_off().await;
    }
}
