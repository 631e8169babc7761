//! Scenario: the config shipped with the daemon loads cleanly and keeps the
//! manager defaults for dedup and retry.

use esub_config::{load_layered_yaml, DedupSettings, ManagerSettings, MirrorAction};

fn shipped() -> ManagerSettings {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/base.yaml");
    let loaded = load_layered_yaml(&[path]).expect("base.yaml loads");
    loaded.settings().expect("base.yaml maps onto settings")
}

#[test]
fn shipped_config_dedups_every_type() {
    let settings = shipped();
    assert!(settings.dedup.bypass_types.is_empty());
    assert_eq!(settings.dedup, DedupSettings::default());
    assert_eq!(settings.retry, ManagerSettings::default().retry);
}

#[test]
fn shipped_config_mirrors_chat_and_moderation() {
    let settings = shipped();
    let mirrored: Vec<(&str, MirrorAction)> = settings
        .subscriptions
        .iter()
        .filter_map(|s| s.mirror.map(|m| (s.kind.as_str(), m)))
        .collect();
    assert!(mirrored.contains(&("channel.chat.message_delete", MirrorAction::MessageDelete)));
    assert!(mirrored.contains(&("channel.moderate", MirrorAction::ModAction)));
}
