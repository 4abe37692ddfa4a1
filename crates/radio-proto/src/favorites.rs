use crate::protocol::Station;
use std::path::PathBuf;
use tracing::{info, warn};

/// Persistence for the favorites list.
pub trait FavoritesStore: Send + Sync {
    /// Never empty: falls back to the seeded defaults.
    fn load(&self) -> Vec<Station>;
    fn save(&self, stations: &[Station]) -> anyhow::Result<()>;
}

/// Stations the appliance starts with when nothing has been saved yet.
pub fn default_stations() -> Vec<Station> {
    vec![
        Station::new(
            "BBC One",
            "0af24a33-1631-4c23-b09a-c1413d2c4fb0",
            "http://as-hls-ww-live.akamaized.net/pool_904/live/ww/bbc_radio_one/bbc_radio_one.isml/bbc_radio_one-audio%3d96000.norewind.m3u8",
            "pop",
        ),
        Station::new(
            "106,7 Rockklassiker",
            "9642ad8b-0601-11e8-ae97-52543be04c81",
            "http://edge-bauerse-02-thn.sharp-stream.com/rockklassiker_instream_se_mp3?ua=WEB&",
            "classic rock",
        ),
    ]
}

/// JSON array of stations on disk.
pub struct JsonFavoritesStore {
    path: PathBuf,
}

impl JsonFavoritesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl FavoritesStore for JsonFavoritesStore {
    fn load(&self) -> Vec<Station> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                info!("favorites: {} unreadable ({}), using defaults", self.path.display(), e);
                return default_stations();
            }
        };
        match serde_json::from_str::<Vec<Station>>(&content) {
            Ok(stations) if !stations.is_empty() => {
                let mut list = Favorites::default();
                for s in stations {
                    list.insert(s);
                }
                list.into_vec()
            }
            Ok(_) => {
                info!("favorites: {} is empty, using defaults", self.path.display());
                default_stations()
            }
            Err(e) => {
                warn!("favorites: {} is corrupt ({}), using defaults", self.path.display(), e);
                default_stations()
            }
        }
    }

    fn save(&self, stations: &[Station]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(stations)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Ordered favorites, unique by station name.  Entries are only ever added.
#[derive(Debug, Clone, Default)]
pub struct Favorites {
    stations: Vec<Station>,
}

impl Favorites {
    pub fn new(stations: Vec<Station>) -> Self {
        let mut list = Self::default();
        for s in stations {
            list.insert(s);
        }
        list
    }

    /// Returns false when a station with the same name is already present.
    pub fn insert(&mut self, station: Station) -> bool {
        if self.contains_name(&station.name) {
            return false;
        }
        self.stations.push(station);
        true
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.stations.iter().any(|s| s.name == name)
    }

    /// Favorites whose id differs from `current`.
    pub fn others(&self, current: Option<&Station>) -> Vec<Station> {
        self.stations
            .iter()
            .filter(|s| current.map_or(true, |c| s.id != c.id))
            .cloned()
            .collect()
    }

    pub fn as_slice(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn into_vec(self) -> Vec<Station> {
        self.stations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_unique_by_name() {
        let mut favs = Favorites::new(default_stations());
        let before = favs.len();
        let dup = Station::new("BBC One", "other-id", "http://elsewhere", "");
        assert!(!favs.insert(dup));
        assert_eq!(favs.len(), before);
        assert!(favs.insert(Station::new("New", "n1", "http://n", "")));
        assert_eq!(favs.len(), before + 1);
    }

    #[test]
    fn test_others_excludes_current_by_id() {
        let favs = Favorites::new(default_stations());
        let current = favs.as_slice()[0].clone();
        let others = favs.others(Some(&current));
        assert_eq!(others.len(), 1);
        assert_ne!(others[0], current);
        assert_eq!(favs.others(None).len(), 2);
    }
}
