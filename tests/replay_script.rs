use pretty_assertions::assert_eq;
use soulbrowser_netmonitor::cli::replay::human_line;
use soulbrowser_netmonitor::replay::{parse_script, replay, OwnerCall, ReplayError, Replayer};
use network_observer::{BlockedReason, ObserverConfig};

const SCRIPT: &str = r#"
- step: open
  channel: page
  spec:
    url: https://example.test/index.html
    response_status: 200
    content_type: text/html
    charset: utf-8
- step: activity
  channel: page
  subtype: RequestHeader
  timestamp: 1700000000000000
  extra: "GET /index.html HTTP/1.1\r\n\r\n"
- step: topic
  channel: page
  topic: http-on-before-connect
- step: activity
  channel: page
  subtype: ResponseHeader
  timestamp: 1700000000020000
  extra: "HTTP/1.1 200 OK\r\n\r\n"
- step: topic
  channel: page
  topic: http-on-examine-response
- step: respond
  channel: page
  body: "<h1>hi</h1>"
  chunk: 4
- step: open
  channel: ad
  spec:
    url: https://ads.test/banner.js
- step: block
  pattern: "*ads.test*"
- step: topic
  channel: ad
  topic: http-on-before-connect
"#;

#[test]
fn script_produces_owner_calls_per_channel() {
    let steps = parse_script(SCRIPT).unwrap();
    let results = replay(&steps, ObserverConfig::default(), &[]).unwrap();
    assert_eq!(results.steps, 9);
    assert_eq!(results.network_events, 2);

    let page: Vec<&str> = results
        .records
        .iter()
        .filter(|record| record.channel == "page")
        .map(|record| record.call.name())
        .collect();
    assert_eq!(page, vec!["network_event", "response_start", "response_content"]);

    let ad = results
        .records
        .iter()
        .find(|record| record.channel == "ad")
        .expect("ad request reported");
    match &ad.call {
        OwnerCall::NetworkEvent { init, .. } => {
            assert_eq!(init.blocked_reason, Some(BlockedReason::DevTools))
        }
        other => panic!("unexpected first call {other:?}"),
    }

    let content = results
        .records
        .iter()
        .find_map(|record| match &record.call {
            OwnerCall::ResponseContent { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(content.text, "<h1>hi</h1>");
    assert_eq!(content.mime_type, "text/html; charset=utf-8");
}

#[test]
fn records_serialize_with_a_call_tag() {
    let steps = parse_script(SCRIPT).unwrap();
    let results = replay(&steps, ObserverConfig::default(), &[]).unwrap();
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json["records"][0]["channel"], "page");
    assert_eq!(json["records"][0]["call"], "network_event");
    assert_eq!(
        json["records"][0]["init"]["url"],
        "https://example.test/index.html"
    );
}

#[test]
fn human_lines_name_the_channel_and_call() {
    let steps = parse_script(SCRIPT).unwrap();
    let results = replay(&steps, ObserverConfig::default(), &[]).unwrap();
    let first = human_line(&results.records[0]);
    assert!(first.starts_with("page"));
    assert!(first.contains("network_event"));
    assert!(first.contains("GET https://example.test/index.html"));
}

#[test]
fn unknown_channels_stop_the_replay() {
    let steps = parse_script(
        r#"
- step: topic
  channel: ghost
  topic: http-on-stop-request
"#,
    )
    .unwrap();
    let err = replay(&steps, ObserverConfig::default(), &[]).unwrap_err();
    assert!(matches!(
        err,
        ReplayError::UnknownChannel { index: 0, ref label } if label == "ghost"
    ));
}

#[test]
fn overrides_are_served_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mock.json");
    std::fs::write(&path, "[1,2,3]").unwrap();
    let script = format!(
        r#"
- step: override
  url: https://example.test/api
  path: {}
- step: open
  channel: api
  spec:
    url: https://example.test/api
- step: topic
  channel: api
  topic: http-on-before-connect
- step: respond
  channel: api
"#,
        path.display()
    );
    let steps = parse_script(&script).unwrap();
    let mut replayer = Replayer::new(ObserverConfig::default(), &[]).unwrap();
    replayer.run(&steps).unwrap();
    let content = replayer
        .records()
        .into_iter()
        .find_map(|record| match record.call {
            OwnerCall::ResponseContent { content, .. } => Some(content),
            _ => None,
        })
        .unwrap();
    assert_eq!(content.text, "[1,2,3]");
    assert_eq!(content.mime_type, "application/json");
    let results = replayer.finish();
    assert_eq!(results.network_events, 1);
}

#[test]
fn initial_blocklist_comes_from_configuration() {
    let steps = parse_script(
        r#"
- step: open
  channel: t
  spec:
    url: https://tracker.test/p.gif
- step: topic
  channel: t
  topic: http-on-before-connect
"#,
    )
    .unwrap();
    let results = replay(&steps, ObserverConfig::default(), &["*tracker*".to_owned()]).unwrap();
    match &results.records[0].call {
        OwnerCall::NetworkEvent { init, .. } => {
            assert_eq!(init.blocked_reason, Some(BlockedReason::DevTools))
        }
        other => panic!("unexpected call {other:?}"),
    }
}
