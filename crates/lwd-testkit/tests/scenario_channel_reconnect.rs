//! Channel lifecycle through the runtime: reconnect on config change, probe
//! timeout, transport drop and simulator bounds.

use std::sync::Arc;
use std::time::Duration;

use lwd_bus::{ChannelStatusChange, DomainEvent};
use lwd_config::ControllerChannelPatch;
use lwd_schemas::{ConnectionState, Grams, WeightSource};
use lwd_testkit::{
    desk_config, next_matching, start_desk, wait_until, ChannelScript, Script, ScriptedConnectors,
};

fn controller_status(e: &DomainEvent) -> Option<ChannelStatusChange> {
    match e {
        DomainEvent::ChannelStatus(c) if c.channel == WeightSource::Controller => Some(c.clone()),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn controller_update_runs_exactly_one_reconnect_cycle() {
    let controller = ChannelScript::new(
        vec![
            Script::frames([r#"{"weight": 11.5}"#]),
            Script::frames([r#"{"weight": "13.25", "stable": false}"#]),
        ],
        Script::Refuse,
    );
    let connectors = ScriptedConnectors::new(controller.clone(), ChannelScript::refusing());

    let mut cfg = desk_config();
    cfg.controller.enabled = true;
    let desk = start_desk(&cfg, Arc::new(connectors)).await.unwrap();
    let rt = &desk.runtime;
    let engine = rt.engine().clone();

    assert_eq!(
        rt.config().channel_state(WeightSource::Controller),
        ConnectionState::Connected
    );
    assert!(
        wait_until(Duration::from_secs(1), || {
            engine.latest(WeightSource::Controller).map(|s| s.value) == Some(Grams::new(11_500))
        })
        .await
    );

    let mut rx = rt.bus().subscribe();
    let updated = rt
        .config()
        .update_controller(&ControllerChannelPatch {
            topic: Some("line2/weight".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.topic, "line2/weight");

    let mut seen = Vec::new();
    for _ in 0..3 {
        let env = next_matching(&mut rx, Duration::from_secs(1), |e| {
            controller_status(e).is_some()
        })
        .await
        .expect("controller status event");
        seen.extend(controller_status(&env.event).map(|c| (c.state, c.generation)));
    }
    assert_eq!(
        seen,
        vec![
            (ConnectionState::Disconnected, 1),
            (ConnectionState::Connecting, 2),
            (ConnectionState::Connected, 2),
        ]
    );

    assert!(
        wait_until(Duration::from_secs(1), || {
            engine.latest(WeightSource::Controller).map(|s| s.value) == Some(Grams::new(13_250))
        })
        .await
    );
    let latest = engine.latest(WeightSource::Controller).unwrap();
    assert!(!latest.stable);
    assert_eq!(controller.opens(), 2);
    assert_eq!(rt.config().channel_generation(WeightSource::Controller), 2);
    assert_eq!(rt.config().channel_generation(WeightSource::Scale), 1);

    // No further cycles follow.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(next_matching(&mut rx, Duration::from_millis(200), |e| {
        controller_status(e).is_some()
    })
    .await
    .is_none());
}

#[tokio::test(start_paused = true)]
async fn hanging_probe_falls_back_after_timeout() {
    let controller = ChannelScript::new(Vec::new(), Script::Hang);
    let connectors = ScriptedConnectors::new(controller, ChannelScript::refusing());

    let mut cfg = desk_config();
    cfg.controller.enabled = true;
    cfg.controller.probe_timeout_ms = 300;

    let started = tokio::time::Instant::now();
    let desk = start_desk(&cfg, Arc::new(connectors)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(
        desk.runtime.config().channel_state(WeightSource::Controller),
        ConnectionState::Simulated
    );
    assert!(desk.wait_for_samples(Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn dropped_transport_degrades_to_simulated() {
    let controller = ChannelScript::new(
        vec![Script::then_close([r#"{"weight": 12.0}"#])],
        Script::Refuse,
    );
    let connectors = ScriptedConnectors::new(controller.clone(), ChannelScript::refusing());

    let mut cfg = desk_config();
    cfg.controller.enabled = true;
    let desk = start_desk(&cfg, Arc::new(connectors)).await.unwrap();
    let rt = &desk.runtime;

    assert!(
        wait_until(Duration::from_secs(1), || {
            rt.config().channel_state(WeightSource::Controller) == ConnectionState::Simulated
        })
        .await
    );
    // Same connection attempt, so the generation is unchanged.
    assert_eq!(rt.config().channel_generation(WeightSource::Controller), 1);
    assert_eq!(controller.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn simulated_samples_stay_within_variance() {
    let mut cfg = desk_config();
    cfg.scale.simulation.variance_kg = Grams::new(100);
    let desk = start_desk(&cfg, Arc::new(ScriptedConnectors::offline()))
        .await
        .unwrap();
    let mut rx = desk.runtime.bus().subscribe();

    let mut values = Vec::new();
    while values.len() < 40 {
        let env = next_matching(&mut rx, Duration::from_secs(2), |e| {
            matches!(e, DomainEvent::SampleUpdated(u) if u.sample.source == WeightSource::Scale)
        })
        .await
        .expect("scale sample");
        if let DomainEvent::SampleUpdated(u) = env.event {
            values.push(u.sample.value);
        }
    }

    for v in &values {
        assert!(
            (Grams::new(11_900)..=Grams::new(12_100)).contains(v),
            "{v:?} outside baseline ± variance"
        );
    }
    assert!(values.iter().any(|v| *v != values[0]), "variance produces spread");
}
