//! HAR style timings derived from the stage table.

use soulbrowser_core_types::{ActivitySubtype as S, TimedChannelInfo};

use crate::activity::StageTimings;
use crate::owner::{HarOffsets, HarTimings, ServiceWorkerTimings};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventTimings {
    pub total: i64,
    pub timings: HarTimings,
    pub offsets: HarOffsets,
}

/// Microseconds to milliseconds, rounding halves up and clamping at -1.
fn to_millis(micros: i64) -> i64 {
    let millis = (micros as f64 / 1000.0 + 0.5).floor() as i64;
    millis.max(-1)
}

fn span(from: Option<i64>, to: Option<i64>) -> i64 {
    match (from, to) {
        (Some(from), Some(to)) => to - from,
        _ => -1,
    }
}

pub fn har_timings(stages: &StageTimings, from_cache: bool) -> EventTimings {
    // Cached responses never went through the network.
    if from_cache {
        return EventTimings::default();
    }

    let first = |subtype: S| stages.get(subtype).map(|timing| timing.first);
    let last = |subtype: S| stages.get(subtype).map(|timing| timing.last);

    let blocked = if first(S::StatusResolving).is_some() && first(S::StatusConnectingTo).is_some() {
        span(first(S::RequestHeader), first(S::StatusResolving))
    } else if first(S::StatusSendingTo).is_some() {
        span(first(S::RequestHeader), first(S::StatusSendingTo))
    } else {
        -1
    };

    // Only present when the DNS record was not cached.
    let dns = span(first(S::StatusResolving), last(S::StatusResolved));
    let connect = span(first(S::StatusConnectingTo), last(S::StatusConnectedTo));

    // With TCP fast open or TLS 0-RTT, TLS and the request can start before the
    // socket is connected, so both are placed relative to CONNECTING_TO.
    let ssl = span(first(S::StatusTlsStarting), last(S::StatusTlsEnding));
    let secure_start = (ssl != -1).then(|| {
        first(S::StatusConnectingTo)
            .zip(first(S::StatusTlsStarting))
            .map(|(connecting, tls)| (tls - connecting).max(0))
            .unwrap_or(0)
    });

    let (send, start_sending) = if let Some(sending) = stages.get(S::StatusSendingTo) {
        let relative = first(S::StatusConnectingTo).map(|connecting| (sending.first - connecting).max(0));
        (sending.last - sending.first, relative)
    } else {
        (span(first(S::RequestHeader), last(S::RequestBodySent)), None)
    };

    let request_end = last(S::RequestBodySent).or_else(|| last(S::StatusSendingTo));
    let wait = span(request_end, first(S::ResponseStart));
    let receive = span(first(S::ResponseStart), last(S::ResponseComplete));

    let timings = HarTimings {
        blocked: to_millis(blocked),
        dns: to_millis(dns),
        connect: to_millis(connect),
        ssl: to_millis(ssl),
        send: to_millis(send),
        wait: to_millis(wait),
        receive: to_millis(receive),
    };

    let total: i64 = [timings.blocked, timings.dns, timings.send, timings.wait, timings.receive]
        .into_iter()
        .filter(|time| *time > -1)
        .sum();

    let mut offsets = HarOffsets {
        blocked: 0,
        dns: timings.blocked,
        ..HarOffsets::default()
    };
    offsets.connect = offsets.dns + timings.dns;
    offsets.ssl = match secure_start {
        Some(start) => offsets.connect + to_millis(start),
        None => offsets.connect + timings.connect,
    };
    offsets.send = match start_sending {
        Some(start) => offsets.connect + to_millis(start),
        None => offsets.ssl + timings.ssl,
    };
    offsets.wait = offsets.send + timings.send;
    offsets.receive = offsets.wait + timings.wait;

    EventTimings {
        total,
        timings,
        offsets,
    }
}

/// Service-worker phases of an intercepted request, zero otherwise.
pub fn service_worker_timings(
    info: Option<TimedChannelInfo>,
    from_service_worker: bool,
) -> ServiceWorkerTimings {
    let Some(info) = info.filter(|_| from_service_worker) else {
        return ServiceWorkerTimings::default();
    };
    ServiceWorkerTimings {
        launch_service_worker: to_millis(
            info.launch_service_worker_end - info.launch_service_worker_start,
        ),
        request_to_service_worker: to_millis(
            info.dispatch_fetch_event_start - info.launch_service_worker_end,
        ),
        handled_by_service_worker: to_millis(
            info.handle_fetch_event_end - info.dispatch_fetch_event_start,
        ),
    }
}
