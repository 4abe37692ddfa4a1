use pirate_proto::favorites::{default_stations, Favorites, FavoritesStore, JsonFavoritesStore};
use pirate_proto::protocol::Station;

fn station(name: &str) -> Station {
    Station::new(name, &format!("uuid-{name}"), &format!("http://{name}.test/"), "jazz")
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFavoritesStore::new(dir.path().join("favstations.json"));
    assert_eq!(store.load(), default_stations());
}

#[test]
fn empty_and_corrupt_files_yield_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("favstations.json");
    let store = JsonFavoritesStore::new(path.clone());

    std::fs::write(&path, "").unwrap();
    assert_eq!(store.load(), default_stations());

    std::fs::write(&path, "[]").unwrap();
    assert_eq!(store.load(), default_stations());

    std::fs::write(&path, "{ not json").unwrap();
    assert_eq!(store.load(), default_stations());
}

#[test]
fn save_then_load_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFavoritesStore::new(dir.path().join("nested").join("favstations.json"));

    let mut favs = Favorites::new(default_stations());
    assert!(favs.insert(station("kexp")));
    assert!(favs.insert(station("fip")));
    store.save(favs.as_slice()).unwrap();

    let names: Vec<String> = store.load().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["BBC One", "106,7 Rockklassiker", "kexp", "fip"]);
}

#[test]
fn saved_file_uses_radio_browser_field_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("favstations.json");
    let store = JsonFavoritesStore::new(path.clone());
    store.save(&[station("kexp")]).unwrap();

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw[0]["name"], "kexp");
    assert_eq!(raw[0]["stationuuid"], "uuid-kexp");
    assert_eq!(raw[0]["url_resolved"], "http://kexp.test/");
}

#[test]
fn duplicate_names_on_disk_are_collapsed() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFavoritesStore::new(dir.path().join("favstations.json"));
    let mut dup = station("kexp");
    dup.id = "another-uuid".to_string();
    store.save(&[station("kexp"), dup, station("fip")]).unwrap();

    let loaded = store.load();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, "uuid-kexp");
}
