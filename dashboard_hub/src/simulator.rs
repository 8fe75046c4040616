//! 模拟事件源。
//!
//! 在没有真实飞控与检测后端接入时，按固定节奏生成遥测、检测、告警、统计与心跳，
//! 经 [`BroadcastDispatcher`] 推送到各频道：
//!
//! | 频道                  | 周期 (默认) | 内容                                        |
//! |-----------------------|-------------|---------------------------------------------|
//! | `dashboard`           | 2 s         | 全部无人机遥测、每 3 拍一次检测、偶发告警、统计 |
//! | `telemetry:{uav_id}`  | 1 s         | 该无人机的遥测                              |
//! | `detection:{session}` | 0.5 s       | 该会话的检测结果                            |
//! | `status`              | 5 s         | 心跳                                        |
//!
//! 每个频道只有订阅者时才生成数据，各频道维护自己的步数。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common_models::channels::{
    detection_session_id, telemetry_uav_id, DASHBOARD_CHANNEL, STATUS_CHANNEL,
};
use common_models::{AlertLevel, DetectionBox, DetectionClass, FlightMode, TelemetrySample};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SimulatorConfig;
use crate::error::AppError;
use crate::ws_server::dispatcher::{BroadcastDispatcher, StatsSnapshot};
use crate::ws_server::service::HubState;

const BASE_LATITUDE: f64 = 30.5728;
const BASE_LONGITUDE: f64 = 104.0668;
const ORBIT_RADIUS_DEG: f64 = 0.003;

const ALERT_PROBABILITY: f64 = 0.1;
const ALERT_CATALOGUE: [(AlertLevel, &str); 5] = [
    (AlertLevel::Warning, "UAV-01 电量低于 30%"),
    (AlertLevel::Info, "检测到新目标进入监控区域"),
    (AlertLevel::Warning, "UAV-02 信号强度下降"),
    (AlertLevel::Error, "UAV-03 通信中断"),
    (AlertLevel::Info, "任务 M-005 已完成"),
];

/// 第 `step` 拍的遥测：绕基准点做圆周飞行，速度、卫星数、信号强度带随机扰动。
pub fn telemetry_sample<R: Rng + ?Sized>(rng: &mut R, step: u64) -> TelemetrySample {
    let step_f = step as f64;
    let angle = step_f * 0.05;
    TelemetrySample {
        latitude: BASE_LATITUDE + ORBIT_RADIUS_DEG * angle.sin(),
        longitude: BASE_LONGITUDE + ORBIT_RADIUS_DEG * angle.cos(),
        altitude: 100.0 + 10.0 * (step_f * 0.1).sin(),
        speed: 8.0 + rng.gen_range(-1.0..=1.0),
        heading: ((step * 3) % 360) as f64,
        battery: (95.0 - step_f * 0.1).max(20.0),
        satellites: rng.gen_range(10..=16),
        signal_strength: -60 + rng.gen_range(-10..=5),
        flight_mode: FlightMode::Auto,
    }
}

/// 一帧随机检测结果，0 到 3 个目标框。
pub fn detection_boxes<R: Rng + ?Sized>(rng: &mut R) -> Vec<DetectionBox> {
    let count = rng.gen_range(0..=3);
    (0..count)
        .map(|_| DetectionBox {
            class_name: DetectionClass::ALL
                .choose(rng)
                .copied()
                .unwrap_or(DetectionClass::Unknown),
            confidence: (rng.gen_range(0.5..=0.99_f64) * 100.0).round() / 100.0,
            bbox: [
                rng.gen_range(50..=400),
                rng.gen_range(50..=300),
                rng.gen_range(100..=200),
                rng.gen_range(100..=200),
            ],
        })
        .collect()
}

/// 以 10% 的概率从告警目录中抽取一条告警。
pub fn maybe_alert<R: Rng + ?Sized>(rng: &mut R) -> Option<(AlertLevel, &'static str)> {
    if rng.gen::<f64>() >= ALERT_PROBABILITY {
        return None;
    }
    ALERT_CATALOGUE.choose(rng).copied()
}

/// 看板频道上各无人机的相位偏移，让多架无人机不在同一位置重叠。
pub fn uav_step_offset(uav_id: &str) -> u64 {
    uav_id.bytes().map(u64::from).sum::<u64>() % 100
}

/// 看板统计快照，检测总数随步数增长。
pub fn stats_snapshot<R: Rng + ?Sized>(rng: &mut R, step: u64) -> StatsSnapshot {
    StatsSnapshot {
        online_uavs: 3,
        active_missions: 2,
        today_detections: 1284 + step * rng.gen_range(0..=3),
        active_tracks: rng.gen_range(3..=8),
    }
}

/// 驱动各频道节奏的模拟事件源。
pub struct EventSimulator {
    state: Arc<HubState>,
    config: SimulatorConfig,
}

impl EventSimulator {
    pub fn new(state: Arc<HubState>, config: SimulatorConfig) -> Self {
        Self { state, config }
    }

    fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.state.dispatcher
    }

    /// 看板频道的一拍。没有订阅者时不生成任何事件，返回 `false`。
    pub fn dashboard_tick<R: Rng + ?Sized>(&self, rng: &mut R, step: u64) -> Result<bool, AppError> {
        if self.state.registry.channel_len(DASHBOARD_CHANNEL) == 0 {
            return Ok(false);
        }
        let dispatcher = self.dispatcher();
        for uav_id in &self.config.uav_ids {
            let sample = telemetry_sample(rng, step + uav_step_offset(uav_id));
            dispatcher.publish_telemetry(DASHBOARD_CHANNEL, uav_id, sample)?;
        }
        if step % 3 == 0 {
            dispatcher.publish_detection(DASHBOARD_CHANNEL, step, detection_boxes(rng))?;
        }
        if let Some((level, message)) = maybe_alert(rng) {
            dispatcher.publish_alert(DASHBOARD_CHANNEL, level, message)?;
        }
        dispatcher.publish_stats(DASHBOARD_CHANNEL, stats_snapshot(rng, step))?;
        Ok(true)
    }

    /// 所有 `telemetry:{uav_id}` 频道的一拍。`steps` 保存各频道的步数。
    pub fn telemetry_tick<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        steps: &mut HashMap<String, u64>,
    ) -> Result<(), AppError> {
        let channels = self.state.registry.channels();
        steps.retain(|channel, _| channels.contains(channel));
        for channel in channels {
            let Some(uav_id) = telemetry_uav_id(&channel) else {
                continue;
            };
            let uav_id = uav_id.to_string();
            let step = steps.entry(channel.clone()).or_insert(0);
            self.dispatcher()
                .publish_telemetry(&channel, &uav_id, telemetry_sample(rng, *step))?;
            *step += 1;
        }
        Ok(())
    }

    /// 所有 `detection:{session_id}` 频道的一拍，帧号即该频道的步数。
    pub fn detection_tick<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        steps: &mut HashMap<String, u64>,
    ) -> Result<(), AppError> {
        let channels = self.state.registry.channels();
        steps.retain(|channel, _| channels.contains(channel));
        for channel in channels {
            if detection_session_id(&channel).is_none() {
                continue;
            }
            let step = steps.entry(channel.clone()).or_insert(0);
            self.dispatcher()
                .publish_detection(&channel, *step, detection_boxes(rng))?;
            *step += 1;
        }
        Ok(())
    }

    /// 状态频道心跳。
    pub fn status_tick(&self) -> Result<(), AppError> {
        if self.state.registry.channel_len(STATUS_CHANNEL) == 0 {
            return Ok(());
        }
        self.dispatcher()
            .publish_heartbeat(STATUS_CHANNEL, self.state.uptime().as_secs())?;
        Ok(())
    }

    /// 为每个频道派生一个周期任务。
    pub fn spawn(self) -> SimulatorHandle {
        let simulator = Arc::new(self);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = &simulator.config;
        info!(
            "[模拟事件源] 启动：无人机 {:?}，看板 {:?} / 遥测 {:?} / 检测 {:?} / 心跳 {:?}",
            config.uav_ids,
            config.dashboard_interval(),
            config.telemetry_interval(),
            config.detection_interval(),
            config.status_interval()
        );

        let tasks = vec![
            spawn_periodic(
                "dashboard",
                config.dashboard_interval(),
                shutdown_rx.clone(),
                {
                    let simulator = Arc::clone(&simulator);
                    let mut rng = StdRng::from_entropy();
                    let mut step = 0u64;
                    move || {
                        step = next_dashboard_step(simulator.dashboard_tick(&mut rng, step)?, step);
                        Ok(())
                    }
                },
            ),
            spawn_periodic(
                "telemetry",
                config.telemetry_interval(),
                shutdown_rx.clone(),
                {
                    let simulator = Arc::clone(&simulator);
                    let mut rng = StdRng::from_entropy();
                    let mut steps = HashMap::new();
                    move || simulator.telemetry_tick(&mut rng, &mut steps)
                },
            ),
            spawn_periodic(
                "detection",
                config.detection_interval(),
                shutdown_rx.clone(),
                {
                    let simulator = Arc::clone(&simulator);
                    let mut rng = StdRng::from_entropy();
                    let mut steps = HashMap::new();
                    move || simulator.detection_tick(&mut rng, &mut steps)
                },
            ),
            spawn_periodic("status", config.status_interval(), shutdown_rx, {
                let simulator = Arc::clone(&simulator);
                move || simulator.status_tick()
            }),
        ];

        SimulatorHandle { shutdown, tasks }
    }
}

/// 看板频道下一拍的步数：本拍有订阅者则前进一步，频道清空则从 0 重新开始。
fn next_dashboard_step(published: bool, step: u64) -> u64 {
    if published { step + 1 } else { 0 }
}

fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Result<(), AppError> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut shutdown) => break,
                _ = ticker.tick() => {
                    if let Err(e) = tick() {
                        warn!("[模拟事件源] {} 任务本拍生成事件失败: {}", name, e);
                    }
                }
            }
        }
        debug!("[模拟事件源] {} 任务已停止", name);
    })
}

async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// 模拟事件源的运行句柄。
pub struct SimulatorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SimulatorHandle {
    /// 停止所有周期任务并等待其退出。
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[模拟事件源] 周期任务异常结束: {}", e);
            }
        }
        info!("[模拟事件源] 已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_models::channels::{detection_channel, telemetry_channel};
    use common_models::DashboardEvent;
    use rust_websocket_utils::message::decode_frame;
    use rust_websocket_utils::server::{ConnectionRegistry, QueuedConnection};
    use std::f64::consts::PI;
    use tokio::sync::mpsc;

    fn hub() -> Arc<HubState> {
        Arc::new(HubState::new(Arc::new(ConnectionRegistry::new()), 64))
    }

    fn subscribe(state: &HubState, channel: &str) -> mpsc::Receiver<String> {
        let (connection, rx) = QueuedConnection::new(None, 64);
        state.registry.register(channel, connection).unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<DashboardEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(decode_frame(&frame).unwrap());
        }
        events
    }

    #[test]
    fn test_telemetry_follows_orbit_formulas() {
        let mut rng = StdRng::seed_from_u64(7);
        let first = telemetry_sample(&mut rng, 0);
        assert!((first.latitude - BASE_LATITUDE).abs() < 1e-9);
        assert!((first.longitude - (BASE_LONGITUDE + ORBIT_RADIUS_DEG)).abs() < 1e-9);
        assert!((first.altitude - 100.0).abs() < 1e-9);
        assert_eq!(first.heading, 0.0);
        assert_eq!(first.battery, 95.0);

        let later = telemetry_sample(&mut rng, 130);
        assert_eq!(later.heading, 30.0);
        assert!((later.battery - 82.0).abs() < 1e-9);
        assert_eq!(telemetry_sample(&mut rng, 5000).battery, 20.0);

        let quarter = (PI / 2.0 / 0.05).round() as u64;
        let sample = telemetry_sample(&mut rng, quarter);
        assert!((sample.latitude - (BASE_LATITUDE + ORBIT_RADIUS_DEG)).abs() < 1e-4);

        for step in 0..200 {
            let sample = telemetry_sample(&mut rng, step);
            assert!((7.0..=9.0).contains(&sample.speed));
            assert!((10..=16).contains(&sample.satellites));
            assert!((-70..=-55).contains(&sample.signal_strength));
            assert_eq!(sample.flight_mode, FlightMode::Auto);
        }
    }

    #[test]
    fn test_detection_boxes_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen_non_empty = false;
        for _ in 0..200 {
            let boxes = detection_boxes(&mut rng);
            assert!(boxes.len() <= 3);
            seen_non_empty |= !boxes.is_empty();
            for detection in boxes {
                assert!((0.5..=0.99).contains(&detection.confidence));
                assert_eq!((detection.confidence * 100.0).round() / 100.0, detection.confidence);
                let [x, y, w, h] = detection.bbox;
                assert!((50..=400).contains(&x));
                assert!((50..=300).contains(&y));
                assert!((100..=200).contains(&w));
                assert!((100..=200).contains(&h));
            }
        }
        assert!(seen_non_empty);
    }

    #[test]
    fn test_alerts_are_rare_and_from_catalogue() {
        let mut rng = StdRng::seed_from_u64(3);
        let alerts: Vec<_> = (0..2000).filter_map(|_| maybe_alert(&mut rng)).collect();
        assert!(alerts.len() > 100 && alerts.len() < 320, "告警数量 {}", alerts.len());
        assert!(alerts.iter().all(|alert| ALERT_CATALOGUE.contains(alert)));
    }

    #[test]
    fn test_uav_offsets_are_stable_and_distinct() {
        assert_eq!(uav_step_offset("UAV-01"), uav_step_offset("UAV-01"));
        assert_ne!(uav_step_offset("UAV-01"), uav_step_offset("UAV-02"));
        assert!(uav_step_offset("UAV-03") < 100);
    }

    #[tokio::test]
    async fn test_dashboard_tick_publishes_full_round() {
        let state = hub();
        let simulator = EventSimulator::new(Arc::clone(&state), SimulatorConfig::default());
        let mut rng = StdRng::seed_from_u64(1);

        assert!(!simulator.dashboard_tick(&mut rng, 0).unwrap());

        let mut rx = subscribe(&state, DASHBOARD_CHANNEL);
        assert!(simulator.dashboard_tick(&mut rng, 0).unwrap());
        let events = drain(&mut rx);

        let telemetry: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                DashboardEvent::Telemetry(t) => Some(t.uav_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(telemetry, vec!["UAV-01", "UAV-02", "UAV-03"]);
        assert!(events.iter().any(|e| matches!(e, DashboardEvent::Detection(d) if d.frame_number == 0)));
        match events.last() {
            Some(DashboardEvent::Stats(stats)) => {
                assert_eq!(stats.online_uavs, 3);
                assert_eq!(stats.connections, 1);
                assert!((3..=8).contains(&stats.active_tracks));
            }
            other => panic!("每拍最后一个事件应为统计，实际为 {:?}", other),
        }

        // 非 3 的倍数拍不带检测
        simulator.dashboard_tick(&mut rng, 1).unwrap();
        assert!(!drain(&mut rx).iter().any(|e| matches!(e, DashboardEvent::Detection(_))));
    }

    #[tokio::test]
    async fn test_dashboard_step_restarts_after_channel_empties() {
        let state = hub();
        let simulator = EventSimulator::new(Arc::clone(&state), SimulatorConfig::default());
        let mut rng = StdRng::seed_from_u64(9);

        let rx = subscribe(&state, DASHBOARD_CHANNEL);
        let mut step = 0;
        for _ in 0..4 {
            step = next_dashboard_step(simulator.dashboard_tick(&mut rng, step).unwrap(), step);
        }
        assert_eq!(step, 4);

        // 最后一个订阅者离开后，下一次广播时投递失败的连接被注销，频道随之清空
        drop(rx);
        step = next_dashboard_step(simulator.dashboard_tick(&mut rng, step).unwrap(), step);
        assert_eq!(state.registry.channel_len(DASHBOARD_CHANNEL), 0);
        step = next_dashboard_step(simulator.dashboard_tick(&mut rng, step).unwrap(), step);
        assert_eq!(step, 0);

        // 新订阅者从第 0 拍开始，第 0 拍带检测帧 0
        let mut rx = subscribe(&state, DASHBOARD_CHANNEL);
        step = next_dashboard_step(simulator.dashboard_tick(&mut rng, step).unwrap(), step);
        assert_eq!(step, 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, DashboardEvent::Detection(d) if d.frame_number == 0)));
    }

    #[tokio::test]
    async fn test_per_channel_ticks_follow_subscriptions() {
        let state = hub();
        let simulator = EventSimulator::new(Arc::clone(&state), SimulatorConfig::default());
        let mut rng = StdRng::seed_from_u64(5);
        let mut telemetry_steps = HashMap::new();
        let mut detection_steps = HashMap::new();

        let mut uav = subscribe(&state, &telemetry_channel("UAV-07"));
        let mut session = subscribe(&state, &detection_channel("S-42"));
        let mut status = subscribe(&state, STATUS_CHANNEL);

        simulator.telemetry_tick(&mut rng, &mut telemetry_steps).unwrap();
        simulator.telemetry_tick(&mut rng, &mut telemetry_steps).unwrap();
        simulator.detection_tick(&mut rng, &mut detection_steps).unwrap();
        simulator.status_tick().unwrap();

        let events = drain(&mut uav);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, DashboardEvent::Telemetry(t) if t.uav_id == "UAV-07")));
        assert_eq!(telemetry_steps.get(&telemetry_channel("UAV-07")), Some(&2));

        assert!(matches!(
            drain(&mut session).as_slice(),
            [DashboardEvent::Detection(d)] if d.frame_number == 0
        ));
        assert!(matches!(
            drain(&mut status).as_slice(),
            [DashboardEvent::Heartbeat(h)] if h.connections == 3
        ));

        // 频道清空后步数随之丢弃
        drop(uav);
        simulator.telemetry_tick(&mut rng, &mut telemetry_steps).unwrap();
        simulator.telemetry_tick(&mut rng, &mut telemetry_steps).unwrap();
        assert!(telemetry_steps.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_tasks_stop_on_request() {
        let state = hub();
        let mut rx = subscribe(&state, STATUS_CHANNEL);
        let config = SimulatorConfig {
            status_interval_ms: 100,
            ..SimulatorConfig::default()
        };
        let handle = EventSimulator::new(Arc::clone(&state), config).spawn();

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.stop().await;
        let beats = drain(&mut rx).len();
        assert!(beats >= 2, "心跳次数 {}", beats);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
