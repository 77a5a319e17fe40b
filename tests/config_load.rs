// tests/config_load.rs
use lodestone_relay::config::relay::MAX_SCHEDULE_OFFSET_SECS;
use lodestone_relay::config::{load_config_default, load_config_from, RelayConfig};
use lodestone_relay::news::Category;
use std::time::Duration;
use std::{env, fs};

const ENV_VARS: [&str; 4] = [
    "RELAY_CONFIG_PATH",
    "RELAY_POLL_INTERVAL_SECS",
    "RELAY_DISPATCH",
    "RELAY_PERSIST",
];

fn clear_env() {
    for k in ENV_VARS {
        env::remove_var(k);
    }
}

#[test]
fn parse_toml_and_json_files() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("relay.toml");
    fs::write(
        &p_toml,
        r#"
capacity = 8
poll_interval_secs = 60
reminder_lead_secs = 1800
seed_empty_stores = false
metrics_addr = "127.0.0.1:9100"

[capacity_overrides]
maintenance = 15
"#,
    )
    .unwrap();
    let c = load_config_from(&p_toml).unwrap();
    assert_eq!(c.capacity_for(Category::Topic), 8);
    assert_eq!(c.capacity_for(Category::Maintenance), 15);
    assert_eq!(c.poll_interval(), Duration::from_secs(60));
    assert_eq!(c.reminder_lead(), chrono::Duration::minutes(30));
    assert!(!c.seed_empty_stores);
    assert_eq!(c.metrics_addr.as_deref(), Some("127.0.0.1:9100"));

    let p_json = dir.path().join("relay.json");
    fs::write(&p_json, r#"{"capacity": 3, "dispatch_notifications": false}"#).unwrap();
    let cj = load_config_from(&p_json).unwrap();
    assert_eq!(cj.capacity, 3);
    assert!(!cj.dispatch_notifications);
    // untouched keys keep their defaults
    assert_eq!(cj.broadcast_grace_secs, 7200);
}

#[test]
fn schedule_offsets_are_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("relay.toml");
    fs::write(
        &p,
        "reminder_lead_secs = 10000000000000\nbroadcast_grace_secs = 9223372036854775807",
    )
    .unwrap();
    let c = load_config_from(&p).unwrap();
    assert_eq!(c.reminder_lead_secs, MAX_SCHEDULE_OFFSET_SECS);
    assert_eq!(c.broadcast_grace_secs, MAX_SCHEDULE_OFFSET_SECS);
    assert_eq!(c.reminder_lead(), chrono::Duration::days(365));

    // struct literals skip sanitizing; the getters still stay in range
    let raw = RelayConfig {
        reminder_lead_secs: u64::MAX,
        ..RelayConfig::default()
    };
    assert_eq!(raw.reminder_lead(), chrono::Duration::days(365));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("relay.toml");
    fs::write(&p, "capacity = \"lots\"").unwrap();
    assert!(load_config_from(&p).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // isolate cwd so the repo's own config/ is not read
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) nothing present -> defaults
    let c = load_config_default().unwrap();
    assert_eq!(c.capacity, 20);
    assert_eq!(c.poll_interval_secs, 300);

    // 2) ./config/relay.toml fallback
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("relay.toml"), "capacity = 4").unwrap();
    assert_eq!(load_config_default().unwrap().capacity, 4);

    // 3) RELAY_CONFIG_PATH wins over the fallback
    let p_env = tmp.path().join("other.json");
    fs::write(&p_env, r#"{"capacity": 9}"#).unwrap();
    env::set_var("RELAY_CONFIG_PATH", p_env.display().to_string());
    assert_eq!(load_config_default().unwrap().capacity, 9);

    // 4) a dangling RELAY_CONFIG_PATH is an error
    env::set_var("RELAY_CONFIG_PATH", tmp.path().join("missing.toml").display().to_string());
    assert!(load_config_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_on_top_of_file() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    let p = tmp.path().join("relay.toml");
    fs::write(&p, "poll_interval_secs = 120\npersist_items = true").unwrap();
    env::set_var("RELAY_CONFIG_PATH", p.display().to_string());
    env::set_var("RELAY_POLL_INTERVAL_SECS", "0");
    env::set_var("RELAY_DISPATCH", "off");
    env::set_var("RELAY_PERSIST", "0");

    let c = load_config_default().unwrap();
    // zero is clamped so the scheduler never spins
    assert_eq!(c.poll_interval_secs, 1);
    assert!(!c.dispatch_notifications);
    assert!(!c.persist_items);

    // unparseable values are ignored
    env::set_var("RELAY_DISPATCH", "maybe");
    env::set_var("RELAY_POLL_INTERVAL_SECS", "soon");
    let c = load_config_default().unwrap();
    assert!(c.dispatch_notifications);
    assert_eq!(c.poll_interval_secs, 120);

    clear_env();
    env::set_current_dir(&old).unwrap();
}
