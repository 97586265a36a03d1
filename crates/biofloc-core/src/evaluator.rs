// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Biofloc Monitor.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Device connectivity and health evaluation.
//!
//! A pass is a pure function `(records, thresholds, previous state) -> (devices,
//! new state)`. [`DeviceManager`] keeps the state between passes for callers
//! that want the stateful API.

use crate::clock::Clock;
use crate::resolver::ThresholdResolver;
use biofloc_types::{
    CanonicalRecord, ConnectionStatus, DeviceInfo, HealthStatus, SummaryMetrics,
};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Devices silent for longer than this are offline
pub const DEFAULT_OFFLINE_TIMEOUT: Duration = Duration::from_secs(60);

/// Health of every device as of its last online evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluatorState {
    health: HashMap<String, HealthStatus>,
}

impl EvaluatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<HealthStatus> {
        self.health.get(device_id).copied()
    }

    pub fn len(&self) -> usize {
        self.health.len()
    }

    pub fn is_empty(&self) -> bool {
        self.health.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, HealthStatus> {
        &self.health
    }

    fn record(&mut self, device_id: &str, health: HealthStatus) {
        if let Some(previous) = self.health.insert(device_id.to_owned(), health)
            && previous != health
        {
            info!("🔄 [EVAL] {}: {} -> {}", device_id, previous, health);
        }
    }
}

impl From<HashMap<String, HealthStatus>> for EvaluatorState {
    fn from(health: HashMap<String, HealthStatus>) -> Self {
        Self { health }
    }
}

/// Output of one evaluation pass
#[derive(Debug, Clone)]
pub struct EvaluationPass {
    pub devices: Vec<DeviceInfo>,
    pub state: EvaluatorState,
}

#[derive(Debug, Clone)]
pub struct DeviceHealthEvaluator {
    offline_timeout: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl DeviceHealthEvaluator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            offline_timeout: to_delta(DEFAULT_OFFLINE_TIMEOUT),
            clock,
        }
    }

    #[must_use]
    pub fn with_offline_timeout(mut self, timeout: Duration) -> Self {
        self.offline_timeout = to_delta(timeout);
        self
    }

    pub fn offline_timeout(&self) -> TimeDelta {
        self.offline_timeout
    }

    /// Evaluate every record. `now` is read once so all devices in a pass are
    /// judged against the same instant.
    pub fn evaluate(
        &self,
        records: &[CanonicalRecord],
        thresholds: &ThresholdResolver,
        previous: &EvaluatorState,
    ) -> EvaluationPass {
        let now = self.clock.now();
        let mut state = previous.clone();

        let devices = records
            .iter()
            .filter(|record| {
                if record.is_rejected() {
                    debug!(
                        "[EVAL] Skipping record without device id (source id '{}')",
                        record.source_id
                    );
                    return false;
                }
                true
            })
            .map(|record| self.evaluate_record(record, now, thresholds, &mut state))
            .collect::<Vec<_>>();

        debug!("[EVAL] Evaluated {} devices", devices.len());
        EvaluationPass { devices, state }
    }

    fn evaluate_record(
        &self,
        record: &CanonicalRecord,
        now: DateTime<Utc>,
        thresholds: &ThresholdResolver,
        state: &mut EvaluatorState,
    ) -> DeviceInfo {
        let connection = self.evaluate_connection(record.timestamp, now);

        // Offline devices keep whatever health they had when last seen online
        let health = match connection {
            ConnectionStatus::Online => {
                let health = self.evaluate_health(
                    &record.device_id,
                    &record.sensors,
                    &record.alerts,
                    thresholds,
                );
                state.record(&record.device_id, health);
                health
            }
            ConnectionStatus::Offline => HealthStatus::Unknown,
        };

        DeviceInfo {
            device_id: record.device_id.clone(),
            location: record.location.clone(),
            last_update: record.timestamp,
            connection,
            health,
            sensor_values: record.sensors.clone(),
            alerts: record.alerts.clone(),
        }
    }

    /// Online when the last update is within the offline timeout of `now`, in
    /// either direction (tolerates device clocks running ahead).
    pub fn evaluate_connection(
        &self,
        last_update: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ConnectionStatus {
        match last_update {
            Some(ts) if (now - ts).abs() <= self.offline_timeout => ConnectionStatus::Online,
            _ => ConnectionStatus::Offline,
        }
    }

    /// Worst classification over the device's readings; any alert is critical
    pub fn evaluate_health(
        &self,
        device_id: &str,
        sensors: &BTreeMap<String, f64>,
        alerts: &[String],
        thresholds: &ThresholdResolver,
    ) -> HealthStatus {
        if !alerts.is_empty() {
            debug!("[EVAL] {} reports {} alert(s)", device_id, alerts.len());
            return HealthStatus::Critical;
        }

        let mut health = HealthStatus::Ok;
        for (sensor, &value) in sensors {
            let Some(spec) = thresholds.resolve(device_id, sensor) else {
                trace!("[EVAL] {}: no thresholds for '{}'", device_id, sensor);
                continue;
            };
            let status = spec.classify(value);
            if status != HealthStatus::Ok {
                debug!("[EVAL] {}: {} = {} is {}", device_id, sensor, value, status);
            }
            health = health.worst(status);
            if health == HealthStatus::Critical {
                break;
            }
        }
        health
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Counts per connectivity and health class
pub fn calculate_summary_metrics(devices: &[DeviceInfo]) -> SummaryMetrics {
    SummaryMetrics::from_devices(devices)
}

/// Evaluator plus the state carried between passes.
///
/// The state lock is held for the whole pass so concurrent passes serialize;
/// a pass does no I/O, so the lock is never held across a network call.
#[derive(Debug)]
pub struct DeviceManager {
    evaluator: DeviceHealthEvaluator,
    state: Mutex<EvaluatorState>,
}

impl DeviceManager {
    pub fn new(evaluator: DeviceHealthEvaluator) -> Self {
        Self::with_state(evaluator, EvaluatorState::default())
    }

    pub fn with_state(evaluator: DeviceHealthEvaluator, state: EvaluatorState) -> Self {
        Self {
            evaluator,
            state: Mutex::new(state),
        }
    }

    pub fn evaluator(&self) -> &DeviceHealthEvaluator {
        &self.evaluator
    }

    pub fn get_all_devices_info(
        &self,
        records: &[CanonicalRecord],
        thresholds: &ThresholdResolver,
    ) -> Vec<DeviceInfo> {
        let mut state = self.state.lock();
        let pass = self.evaluator.evaluate(records, thresholds, &state);
        *state = pass.state;
        pass.devices
    }

    pub fn get_health_states(&self) -> HashMap<String, HealthStatus> {
        self.state.lock().as_map().clone()
    }

    pub fn calculate_summary_metrics(&self, devices: &[DeviceInfo]) -> SummaryMetrics {
        calculate_summary_metrics(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::SensorRegistry;
    use biofloc_types::ThresholdSpec;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn evaluator() -> DeviceHealthEvaluator {
        DeviceHealthEvaluator::new(Arc::new(ManualClock::new(now())))
    }

    fn thresholds() -> ThresholdResolver {
        let mut resolver = ThresholdResolver::new(Arc::new(SensorRegistry::empty()));
        resolver.set_global("ph", ThresholdSpec::new(6.0, 6.8, 8.4, 9.5));
        resolver.set_global("temperature", ThresholdSpec::new(18.0, 24.0, 32.0, 35.0));
        resolver
    }

    fn online(device: &str) -> CanonicalRecord {
        CanonicalRecord::new(device).with_timestamp(now() - TimeDelta::seconds(5))
    }

    #[test]
    fn test_connectivity_boundary() {
        let evaluator = evaluator();
        assert_eq!(
            evaluator.evaluate_connection(Some(now() - TimeDelta::seconds(59)), now()),
            ConnectionStatus::Online
        );
        assert_eq!(
            evaluator.evaluate_connection(Some(now() - TimeDelta::seconds(61)), now()),
            ConnectionStatus::Offline
        );
        assert_eq!(
            evaluator.evaluate_connection(None, now()),
            ConnectionStatus::Offline
        );
        // Clock skew ahead of us is tolerated within the timeout
        assert_eq!(
            evaluator.evaluate_connection(Some(now() + TimeDelta::seconds(30)), now()),
            ConnectionStatus::Online
        );
    }

    #[test]
    fn test_custom_offline_timeout() {
        let evaluator = evaluator().with_offline_timeout(Duration::from_secs(300));
        assert_eq!(
            evaluator.evaluate_connection(Some(now() - TimeDelta::seconds(200)), now()),
            ConnectionStatus::Online
        );
    }

    #[test]
    fn test_critical_beats_warning() {
        let record = online("tank-1")
            .with_sensor("ph", 10.0) // critical
            .with_sensor("temperature", 33.0); // warning
        let pass = evaluator().evaluate(&[record], &thresholds(), &EvaluatorState::new());
        assert_eq!(pass.devices[0].health, HealthStatus::Critical);
        assert_eq!(pass.state.get("tank-1"), Some(HealthStatus::Critical));
    }

    #[test]
    fn test_warning_and_ok() {
        let warning = online("warn").with_sensor("temperature", 33.0).with_sensor("ph", 7.5);
        let ok = online("ok").with_sensor("temperature", 28.0).with_sensor("ph", 7.5);
        let pass = evaluator().evaluate(&[warning, ok], &thresholds(), &EvaluatorState::new());
        assert_eq!(pass.devices[0].health, HealthStatus::Warning);
        assert_eq!(pass.devices[1].health, HealthStatus::Ok);
    }

    #[test]
    fn test_alert_short_circuits_thresholds() {
        let record = online("tank-1")
            .with_sensor("ph", 7.5)
            .with_alert("pump failure");
        let pass = evaluator().evaluate(&[record], &thresholds(), &EvaluatorState::new());
        assert_eq!(pass.devices[0].health, HealthStatus::Critical);
        assert_eq!(pass.state.get("tank-1"), Some(HealthStatus::Critical));
    }

    #[test]
    fn test_sensor_without_thresholds_is_skipped() {
        let record = online("tank-1").with_sensor("chlorophyll", 1000.0);
        let pass = evaluator().evaluate(&[record], &thresholds(), &EvaluatorState::new());
        assert_eq!(pass.devices[0].health, HealthStatus::Ok);
    }

    #[test]
    fn test_offline_device_is_unknown_and_keeps_memory() {
        let previous = EvaluatorState::from(HashMap::from([(
            "tank-1".to_owned(),
            HealthStatus::Warning,
        )]));
        let record = CanonicalRecord::new("tank-1")
            .with_timestamp(now() - TimeDelta::minutes(10))
            .with_sensor("ph", 12.0);
        let pass = evaluator().evaluate(&[record], &thresholds(), &previous);

        let device = &pass.devices[0];
        assert_eq!(device.connection, ConnectionStatus::Offline);
        assert_eq!(device.health, HealthStatus::Unknown);
        assert_eq!(pass.state.get("tank-1"), Some(HealthStatus::Warning));
    }

    #[test]
    fn test_unknown_device_never_produces_info() {
        let pass = evaluator().evaluate(
            &[online(biofloc_types::UNKNOWN_DEVICE_ID), online("tank-1")],
            &thresholds(),
            &EvaluatorState::new(),
        );
        assert_eq!(pass.devices.len(), 1);
        assert_eq!(pass.devices[0].device_id, "tank-1");
    }

    #[test]
    fn test_device_manager_carries_state() {
        let clock = Arc::new(ManualClock::new(now()));
        let manager = DeviceManager::new(DeviceHealthEvaluator::new(clock.clone()));
        let thresholds = thresholds();

        let record = online("tank-1").with_sensor("temperature", 33.0);
        let devices = manager.get_all_devices_info(&[record.clone()], &thresholds);
        assert_eq!(devices[0].health, HealthStatus::Warning);
        assert_eq!(
            manager.get_health_states().get("tank-1"),
            Some(&HealthStatus::Warning)
        );

        // Same reading five minutes later: offline, memory untouched
        clock.advance(TimeDelta::minutes(5));
        let devices = manager.get_all_devices_info(&[record], &thresholds);
        assert_eq!(devices[0].health, HealthStatus::Unknown);
        assert_eq!(
            manager.get_health_states().get("tank-1"),
            Some(&HealthStatus::Warning)
        );

        let summary = manager.calculate_summary_metrics(&devices);
        assert_eq!(summary.offline, 1);
        assert_eq!(summary.total, 1);
    }
}
