// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and OpenTelemetry metrics for cache client operations.
//!
//! Every strategy call ends in exactly one recorded event describing what happened
//! (hit, miss, stale read, lock contention and so on). Events are emitted as `tracing`
//! records named `herdguard.event` and, when a meter provider is configured, counted and timed
//! through OpenTelemetry instruments.

use std::time::Duration;

use opentelemetry::{
    KeyValue,
    logs::Severity,
    metrics::{Counter, Histogram, Meter},
};

use crate::client::ClientName;

pub(crate) mod attributes;
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

/// The client entry point that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    PassThrough,
    Mutex,
    LogicalExpire,
    Warm,
    Rebuild,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PassThrough => "pass_through",
            Self::Mutex => "mutex",
            Self::LogicalExpire => "logical_expire",
            Self::Warm => "warm",
            Self::Rebuild => "rebuild",
        }
    }
}

/// What an operation observed or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Hit,
    NullHit,
    Miss,
    Loaded,
    LoadedAbsent,
    Stale,
    LockBusy,
    LockTimeout,
    RebuildScheduled,
    Rebuilt,
    RebuildFailed,
    Error,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::NullHit => "null_hit",
            Self::Miss => "miss",
            Self::Loaded => "loaded",
            Self::LoadedAbsent => "loaded_absent",
            Self::Stale => "stale",
            Self::LockBusy => "lock_busy",
            Self::LockTimeout => "lock_timeout",
            Self::RebuildScheduled => "rebuild_scheduled",
            Self::Rebuilt => "rebuilt",
            Self::RebuildFailed => "rebuild_failed",
            Self::Error => "error",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::NullHit | Self::Miss | Self::Stale | Self::LockBusy => Severity::Debug,
            Self::Loaded | Self::LoadedAbsent | Self::RebuildScheduled | Self::Rebuilt => Severity::Info,
            Self::LockTimeout | Self::RebuildFailed => Severity::Warn,
            Self::Error => Severity::Error,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ClientTelemetry {
    logging_enabled: bool,
    event_counter: Option<Counter<u64>>,
    operation_duration: Option<Histogram<f64>>,
}

impl ClientTelemetry {
    pub(crate) fn new(logging_enabled: bool, meter: Option<&Meter>) -> Self {
        Self {
            logging_enabled,
            event_counter: meter.map(metrics::create_event_counter),
            operation_duration: meter.map(metrics::create_operation_duration_histogram),
        }
    }

    pub(crate) fn record(&self, client: ClientName, operation: Operation, activity: Activity, duration: Option<Duration>) {
        let attrs = [
            KeyValue::new(attributes::CLIENT_NAME, client),
            KeyValue::new(attributes::OPERATION_NAME, operation.as_str()),
            KeyValue::new(attributes::ACTIVITY_NAME, activity.as_str()),
        ];

        if let Some(counter) = &self.event_counter {
            counter.add(1, &attrs);
        }

        if let (Some(d), Some(h)) = (duration, &self.operation_duration) {
            h.record(d.as_secs_f64(), &attrs);
        }

        if self.logging_enabled {
            Self::emit(client, operation, activity, duration);
        }
    }

    fn emit(client: ClientName, operation: Operation, activity: Activity, duration: Option<Duration>) {
        let op = operation.as_str();
        let act = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // Tracing levels must be constant, hence one macro arm per level.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    herdguard.client = client,
                    herdguard.operation = op,
                    herdguard.activity = act,
                    herdguard.duration_ns = ?duration_ns,
                    "herdguard.event"
                )
            };
        }

        match activity.severity() {
            Severity::Error => emit_event!(error),
            Severity::Warn => emit_event!(warn),
            Severity::Info => emit_event!(info),
            _ => emit_event!(debug),
        }
    }
}
