use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An internet radio stream endpoint as returned by radio-browser.
///
/// Two stations are the same station when their ids match, whatever their
/// names or URLs say.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Station {
    pub name: String,
    #[serde(rename = "stationuuid")]
    pub id: String,
    #[serde(rename = "url_resolved")]
    pub url: String,
    /// Comma separated genre / style tags
    #[serde(default)]
    pub tags: String,
}

impl PartialEq for Station {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Station {}

impl Station {
    pub fn new(name: &str, id: &str, url: &str, tags: &str) -> Self {
        Self {
            name: name.to_string(),
            id: id.to_string(),
            url: url.to_string(),
            tags: tags.to_string(),
        }
    }
}

/// Result of a song identification attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    /// Music-service track id (Spotify), when the match carries one.
    pub provider_id: Option<String>,
    pub provider_url: Option<String>,
    pub ok: bool,
}

impl Track {
    pub fn failed() -> Self {
        Self::default()
    }

    /// "Title Artist", the query used for the fallback web search.
    pub fn search_query(&self) -> String {
        format!("{} {}", self.title, self.artist).trim().to_string()
    }
}

/// What the status display is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayStatus {
    Splash,
    Searching,
    Playing,
    PlayingFavorite,
    AddingFavorite,
    Identifying,
    Error,
    Success,
    Confused,
    /// A code image drawn by `show_code`; has no animation of its own.
    StaticImage,
}

/// What happens to a status once it is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Stays until something else is shown.
    Permanent,
    /// Falls back to `target` after `after` unless replaced first.
    Transient { after: Duration, target: DisplayStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusConfig {
    /// Animation asset name (file prefix in the assets directory).
    pub asset: &'static str,
    pub refresh: Duration,
    pub restore: RestorePolicy,
}

/// Default delay before a transient status falls back.
pub const TRANSIENT_RESTORE: Duration = Duration::from_secs(5);

const FRAME_INTERVAL: Duration = Duration::from_millis(100);

impl DisplayStatus {
    pub const ALL: [DisplayStatus; 10] = [
        DisplayStatus::Splash,
        DisplayStatus::Searching,
        DisplayStatus::Playing,
        DisplayStatus::PlayingFavorite,
        DisplayStatus::AddingFavorite,
        DisplayStatus::Identifying,
        DisplayStatus::Error,
        DisplayStatus::Success,
        DisplayStatus::Confused,
        DisplayStatus::StaticImage,
    ];

    /// Asset name, refresh interval and restore policy for this status,
    /// with transient statuses falling back after `transient_after`.
    pub fn config(self, transient_after: Duration) -> StatusConfig {
        let permanent = |asset| StatusConfig {
            asset,
            refresh: FRAME_INTERVAL,
            restore: RestorePolicy::Permanent,
        };
        let transient = |asset| StatusConfig {
            asset,
            refresh: FRAME_INTERVAL,
            restore: RestorePolicy::Transient {
                after: transient_after,
                target: DisplayStatus::Playing,
            },
        };
        match self {
            DisplayStatus::Splash => permanent("splash"),
            DisplayStatus::Searching => permanent("search"),
            DisplayStatus::Playing => permanent("play"),
            DisplayStatus::PlayingFavorite => permanent("playfav"),
            DisplayStatus::Identifying => permanent("identify"),
            DisplayStatus::StaticImage => permanent("static"),
            DisplayStatus::AddingFavorite => transient("addfav"),
            DisplayStatus::Error => transient("error"),
            DisplayStatus::Success => transient("okay"),
            DisplayStatus::Confused => transient("huh"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayStatus::Splash => "splash",
            DisplayStatus::Searching => "searching",
            DisplayStatus::Playing => "playing",
            DisplayStatus::PlayingFavorite => "playing-favorite",
            DisplayStatus::AddingFavorite => "adding-favorite",
            DisplayStatus::Identifying => "identifying",
            DisplayStatus::Error => "error",
            DisplayStatus::Success => "success",
            DisplayStatus::Confused => "confused",
            DisplayStatus::StaticImage => "static-image",
        }
    }
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_equality_is_by_id() {
        let a = Station::new("One", "abc", "http://a", "pop");
        let b = Station::new("Other name", "abc", "http://b", "");
        let c = Station::new("One", "def", "http://a", "pop");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_station_decodes_radio_browser_json() {
        let json = r#"{"name":"BBC One","stationuuid":"0af2","url_resolved":"http://x","tags":"pop","votes":12}"#;
        let s: Station = serde_json::from_str(json).unwrap();
        assert_eq!(s.id, "0af2");
        assert_eq!(s.url, "http://x");
        assert_eq!(s.tags, "pop");
    }

    #[test]
    fn test_transient_statuses_restore_to_playing() {
        let after = Duration::from_secs(5);
        for status in [
            DisplayStatus::AddingFavorite,
            DisplayStatus::Error,
            DisplayStatus::Success,
            DisplayStatus::Confused,
        ] {
            match status.config(after).restore {
                RestorePolicy::Transient { after: a, target } => {
                    assert_eq!(a, after);
                    assert_eq!(target, DisplayStatus::Playing);
                }
                RestorePolicy::Permanent => panic!("{} should be transient", status),
            }
        }
        assert_eq!(
            DisplayStatus::Playing.config(after).restore,
            RestorePolicy::Permanent
        );
    }

    #[test]
    fn test_search_query() {
        let t = Track {
            title: "Hey Jude".into(),
            artist: "The Beatles".into(),
            ok: true,
            ..Default::default()
        };
        assert_eq!(t.search_query(), "Hey Jude The Beatles");
    }
}
