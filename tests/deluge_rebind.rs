mod common;

use common::{core_conf, Rig, TUNNEL_IP};
use mediawatch::adapters::CoreConf;
use mediawatch::{AppConfig, RepairAction, RepairOutcome, Repairer};
use std::path::Path;
use std::sync::atomic::Ordering;

fn backups(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().contains(".bak-"))
        .count()
}

fn config_in(dir: &Path, bound_ip: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.deluge.core_conf_path = dir.join("core.conf");
    std::fs::write(&config.deluge.core_conf_path, core_conf(bound_ip)).unwrap();
    config
}

#[tokio::test]
async fn rebind_moves_both_interfaces_to_the_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "10.8.0.2");
    let rig = Rig::healthy();

    let outcome = Repairer::new(&config, &rig.services, true)
        .run(&RepairAction::RebindDeluge)
        .await;

    assert!(matches!(outcome, RepairOutcome::Applied(_)), "{:?}", outcome);
    let conf = CoreConf::load(&config.deluge.core_conf_path).await.unwrap();
    assert_eq!(conf.listen_interface(), Some(TUNNEL_IP));
    assert_eq!(conf.outgoing_interface(), Some(TUNNEL_IP));
    let raw = std::fs::read_to_string(&config.deluge.core_conf_path).unwrap();
    assert!(raw.contains("max_connections_global"));
    assert!(raw.starts_with("{\n    \"file\": 1"));

    assert_eq!(rig.docker.count("stop deluge"), 1);
    assert_eq!(rig.docker.count("start deluge"), 1);
    assert_eq!(rig.docker.count("restart deluge"), 0);
    assert_eq!(backups(dir.path()), 1);
    assert!(rig.inbox.any_contains("[D-004]"));
}

#[tokio::test]
async fn second_rebind_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "10.8.0.2");
    let rig = Rig::healthy();
    let repairer = Repairer::new(&config, &rig.services, true);

    repairer.run(&RepairAction::RebindDeluge).await;
    let first = std::fs::read(&config.deluge.core_conf_path).unwrap();
    let second = repairer.run(&RepairAction::RebindDeluge).await;

    assert!(matches!(second, RepairOutcome::NoChange(_)), "{:?}", second);
    assert_eq!(std::fs::read(&config.deluge.core_conf_path).unwrap(), first);
    assert_eq!(backups(dir.path()), 1);
    assert_eq!(rig.docker.count("stop deluge"), 1);
    assert_eq!(rig.docker.count("start deluge"), 1);
}

#[tokio::test]
async fn bound_but_offline_only_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), TUNNEL_IP);
    let rig = Rig::healthy();
    rig.docker.online.store(false, Ordering::SeqCst);
    let before = std::fs::read(&config.deluge.core_conf_path).unwrap();

    let outcome = Repairer::new(&config, &rig.services, true)
        .run(&RepairAction::RebindDeluge)
        .await;

    assert!(matches!(outcome, RepairOutcome::Applied(_)), "{:?}", outcome);
    assert_eq!(rig.docker.count("restart deluge"), 1);
    assert_eq!(rig.docker.count("stop deluge"), 0);
    assert_eq!(std::fs::read(&config.deluge.core_conf_path).unwrap(), before);
    assert_eq!(backups(dir.path()), 0);
}

#[tokio::test]
async fn preview_leaves_everything_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "10.8.0.2");
    let rig = Rig::healthy();
    let before = std::fs::read(&config.deluge.core_conf_path).unwrap();

    let outcome = Repairer::new(&config, &rig.services, false)
        .run(&RepairAction::RebindDeluge)
        .await;

    assert!(matches!(outcome, RepairOutcome::Preview(_)));
    assert_eq!(std::fs::read(&config.deluge.core_conf_path).unwrap(), before);
    assert!(rig.docker.calls().iter().all(|c| c.starts_with("exec")));
    assert!(rig.inbox.any_contains("dry run"));
}

#[tokio::test]
async fn unknown_tunnel_address_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "10.8.0.2");
    let rig = Rig::healthy();
    *rig.docker.tunnel_ip.lock().unwrap() = None;

    let outcome = Repairer::new(&config, &rig.services, true)
        .run(&RepairAction::RebindDeluge)
        .await;

    assert!(outcome.is_failure());
    assert!(rig.inbox.any_contains("repair failed"));
}
