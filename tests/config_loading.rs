use std::fs;

use chatpace::config::EngineConfig;
use chatpace::emotion::Mood;

#[test]
fn loads_partial_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    fs::write(
        &path,
        r#"{
            "behavior": {
                "base_typo_rate": 0.2,
                "typo_multipliers": {"angry": 3.0},
                "enable_recall": false
            },
            "sticker": {"asset_root": "/srv/stickers", "packs": ["cats"]}
        }"#,
    )
    .unwrap();

    let cfg = EngineConfig::from_json_file(&path).unwrap();

    assert!(!cfg.behavior.enable_recall);
    assert!((cfg.behavior.typo_rate_for(Mood::Angry) - 0.6).abs() < 1e-9);
    assert!((cfg.behavior.typo_rate_for(Mood::Sad) - 0.2).abs() < 1e-9);
    assert_eq!(cfg.behavior.max_segment_length, 50);
    assert!(cfg.sticker.is_configured());
    assert_eq!(cfg.timeline.lead_time_ms(3), 1200);
    assert_eq!(cfg.timeline.lead_time_ms(20), 2000);
    assert_eq!(cfg.timeline.lead_time_ms(51), 8800);
}

#[test]
fn rejects_out_of_range_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    fs::write(&path, r#"{"behavior": {"typo_recall_rate": 1.5}}"#).unwrap();

    let err = EngineConfig::from_json_file(&path).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("typo_recall_rate"), "{msg}");
    assert!(msg.contains("behavior"), "{msg}");
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.json");
    let err = EngineConfig::from_json_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("nope.json"));
}
