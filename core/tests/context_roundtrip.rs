//! End-to-end tests: a composed data context over real files, edited,
//! saved, reverted, and reloaded.

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use tabula_core::context::DataContext;
use tabula_core::model::{FieldDescriptor, FieldValue, KeyedRecord, Trackable};
use tabula_core::repository::{SingleRepo, TableRepo};
use tabula_core::{DataError, DataFormat, DataRef, LockService};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Character {
    id: String,
    name: String,
    level: i64,
    home: DataRef<Zone>,
}

impl KeyedRecord for Character {
    type Key = String;
    fn key(&self) -> String {
        self.id.clone()
    }
}

const CHARACTER_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor { index: 0, name: "name" },
    FieldDescriptor { index: 1, name: "level" },
];

impl Trackable for Character {
    fn tracked_fields() -> &'static [FieldDescriptor] {
        CHARACTER_FIELDS
    }

    fn field(&self, index: usize) -> Option<FieldValue> {
        match index {
            0 => Some(FieldValue::Text(self.name.clone())),
            1 => Some(FieldValue::Integer(self.level)),
            _ => None,
        }
    }

    fn apply_field(&mut self, index: usize, value: FieldValue) -> bool {
        match (index, value) {
            (0, FieldValue::Text(v)) => self.name = v,
            (1, FieldValue::Integer(v)) => self.level = v,
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Zone {
    id: i64,
    title: String,
}

impl KeyedRecord for Zone {
    type Key = i64;
    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WorldSettings {
    title: String,
    max_party_size: u32,
}

const CHARACTERS_YAML: &str = "\
- id: a
  name: Alice
  level: 1
  home: 0
- id: b
  name: Bob
  level: 2
  home: null
";

const ZONES_JSON: &str = r#"[
  {"id": 0, "title": "Hub"},
  {"id": 7, "title": "Caves"}
]"#;

const SETTINGS_TOML: &str = "title = \"Realm\"\nmax_party_size = 4\n";

fn seed(dir: &TempDir) {
    std::fs::write(dir.path().join("characters.yml"), CHARACTERS_YAML).unwrap();
    std::fs::write(dir.path().join("zones.json"), ZONES_JSON).unwrap();
    std::fs::write(dir.path().join("settings.toml"), SETTINGS_TOML).unwrap();
}

fn build_context(dir: &TempDir) -> DataContext {
    DataContext::builder(dir.path())
        .editable_table::<Character>("characters", "characters.yml")
        .runtime_table::<Zone>("zones", "zones.json")
        .editable_single::<WorldSettings>("settings", "settings.toml")
        .build()
        .unwrap()
}

#[tokio::test]
async fn edit_save_and_revert_scenario() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    let ctx = build_context(&dir);

    let report = ctx.load_all().await;
    assert!(report.is_success(), "load_all failed: {report:?}");

    let characters = ctx.editable_table::<Character>("characters").unwrap();
    let a = "a".to_string();

    // Edit a.level to 5 through property tracking.
    characters
        .track_property_change(&a, "level", FieldValue::Integer(5))
        .unwrap();
    assert!(characters.has_unsaved_changes(&a));
    assert_eq!(characters.modified_properties(&a), vec!["level"]);

    // Save folds the edit into the baseline.
    characters.save().await.unwrap();
    assert!(!characters.has_unsaved_changes(&a));
    assert_eq!(characters.get(&a).await.unwrap().level, 5);

    // Alternate run: edit again and revert before saving.
    characters
        .track_property_change(&a, "level", FieldValue::Integer(40))
        .unwrap();
    characters.revert_key(&a).unwrap();
    assert_eq!(characters.get(&a).await.unwrap().level, 5);
    assert!(!characters.has_any_unsaved_changes());

    // The saved state is what a fresh context reads back.
    let ctx2 = build_context(&dir);
    let characters2 = ctx2.editable_table::<Character>("characters").unwrap();
    assert_eq!(characters2.get(&a).await.unwrap().level, 5);
}

#[tokio::test]
async fn references_resolve_across_repositories() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    let ctx = build_context(&dir);
    ctx.load_all().await;

    let characters = ctx.editable_table::<Character>("characters").unwrap();

    // Alice's home is zone 0, a real key rather than "unset".
    let alice = characters.get(&"a".to_string()).await.unwrap();
    assert!(alice.home.has_value());
    let home = alice.home.resolve(&ctx).await.unwrap().unwrap();
    assert_eq!(home.title, "Hub");

    // Bob has no home; absence is a value, not an error.
    let bob = characters.get(&"b".to_string()).await.unwrap();
    assert!(!bob.home.has_value());
    assert_eq!(bob.home.resolve(&ctx).await.unwrap(), None);

    // A dangling reference is also absence.
    let dangling: DataRef<Zone> = DataRef::to(999);
    assert_eq!(dangling.resolve(&ctx).await.unwrap(), None);

    // A reference into an unregistered repository is a configuration
    // error.
    let lonely_ctx = DataContext::builder(dir.path()).build().unwrap();
    let reference: DataRef<Zone> = DataRef::to(0);
    assert!(matches!(
        reference.resolve(&lonely_ctx).await,
        Err(DataError::Configuration { .. })
    ));
}

#[tokio::test]
async fn runtime_slots_reject_writes_but_serve_reads() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    let ctx = build_context(&dir);
    ctx.load_all().await;

    let zones = ctx.table::<Zone>("zones").unwrap();
    assert_eq!(zones.get_all().await.unwrap().len(), 2);
    assert!(zones.as_editable().is_none());

    let single = ctx.editable_single::<WorldSettings>("settings").unwrap();
    let settings = single.get().await.unwrap().unwrap();
    assert_eq!(settings.title, "Realm");

    single.modify(|s| s.max_party_size = 6).unwrap();
    assert!(single.has_unsaved_changes());
    single.save().await.unwrap();
    assert!(!single.has_unsaved_changes());
}

#[tokio::test]
async fn bulk_load_isolates_failures() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    // Break one of three sources.
    std::fs::write(dir.path().join("zones.json"), "[{\"id\": ").unwrap();

    let ctx = build_context(&dir);
    let report = ctx.load_all().await;

    assert!(!report.is_success());
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "zones");

    // The other two repositories are initialized with correct data.
    let characters = ctx.editable_table::<Character>("characters").unwrap();
    assert!(characters.is_initialized());
    assert_eq!(characters.get(&"a".to_string()).await.unwrap().name, "Alice");

    let settings = ctx.editable_single::<WorldSettings>("settings").unwrap();
    assert!(settings.is_initialized());

    let infos = ctx.data_type_infos();
    let zones_info = infos.iter().find(|i| i.name == "zones").unwrap();
    assert!(!zones_info.initialized);
}

#[tokio::test]
async fn reload_replaces_one_repository() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    let ctx = build_context(&dir);
    ctx.load_all().await;

    let characters = ctx.editable_table::<Character>("characters").unwrap();
    characters
        .modify(&"a".to_string(), |c| c.level = 99)
        .unwrap();
    assert!(characters.has_any_unsaved_changes());

    // Reload discards edits and re-reads the file.
    ctx.reload("characters").await.unwrap();
    assert!(!characters.has_any_unsaved_changes());
    assert_eq!(characters.get(&"a".to_string()).await.unwrap().level, 1);

    // Unknown names are configuration errors.
    assert!(matches!(
        ctx.reload("nope").await,
        Err(DataError::Configuration { .. })
    ));
}

#[tokio::test]
async fn save_all_skips_read_only_slots() {
    let dir = TempDir::new().unwrap();
    seed(&dir);
    let ctx = build_context(&dir);
    ctx.load_all().await;

    let characters = ctx.editable_table::<Character>("characters").unwrap();
    characters
        .modify(&"b".to_string(), |c| c.level = 3)
        .unwrap();

    let report = ctx.save_all().await;
    assert!(report.is_success(), "save_all failed: {report:?}");
    assert!(report.outcomes.iter().all(|o| o.name != "zones"));
    assert!(!characters.has_any_unsaved_changes());
}

#[tokio::test]
async fn explicit_format_overrides_extension() {
    let dir = TempDir::new().unwrap();
    // YAML content in a file with a nonstandard extension.
    std::fs::write(dir.path().join("characters.data"), CHARACTERS_YAML).unwrap();

    let ctx = DataContext::builder(dir.path())
        .editable_table_with::<Character>("characters", "characters.data", DataFormat::Yaml)
        .build()
        .unwrap();

    let characters = ctx.editable_table::<Character>("characters").unwrap();
    assert_eq!(characters.get_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn asset_slot_in_context_keeps_identity_across_rename() {
    let dir = TempDir::new().unwrap();
    seed(&dir);

    let ctx = DataContext::builder(dir.path())
        .editable_table::<Character>("characters", "characters.yml")
        .assets::<Zone>("zone-maps", "maps", "yml")
        .build()
        .unwrap();
    let report = ctx.load_all().await;
    assert!(report.is_success(), "load_all failed: {report:?}");

    let maps = ctx.assets::<Zone>("zone-maps").unwrap();
    let id = maps
        .insert(
            "hub.yml",
            &Zone {
                id: 0,
                title: "Hub".to_string(),
            },
        )
        .await
        .unwrap();

    maps.rename(&id, "nexus.yml").await.unwrap();
    let summary = maps
        .get_by_path(&dir.path().join("maps/nexus.yml"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.id, id);

    // A second context over the same folder resolves the same
    // identity from the sidecar.
    let ctx2 = DataContext::builder(dir.path())
        .assets::<Zone>("zone-maps", "maps", "yml")
        .build()
        .unwrap();
    let maps2 = ctx2.assets::<Zone>("zone-maps").unwrap();
    let summary2 = maps2.get_by_name("nexus").await.unwrap().unwrap();
    assert_eq!(summary2.id, id);
    assert_eq!(maps2.get(&id).await.unwrap().title, "Hub");
}

#[tokio::test]
async fn locks_coordinate_two_sessions_over_context_data() {
    let dir = TempDir::new().unwrap();
    seed(&dir);

    let locks_a = LockService::new(dir.path().join(".locks"));
    let locks_b = LockService::new(dir.path().join(".locks"));

    locks_a
        .acquire("tables/characters", "session-a", None)
        .await
        .unwrap();
    assert!(locks_b
        .is_locked_by_other("tables/characters", "session-b")
        .await
        .unwrap());
    assert!(matches!(
        locks_b.acquire("tables/characters", "session-b", None).await,
        Err(DataError::LockConflict { .. })
    ));

    locks_a.release("tables/characters", "session-a").await.unwrap();
    locks_b
        .acquire("tables/characters", "session-b", None)
        .await
        .unwrap();
}
