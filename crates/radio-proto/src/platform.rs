use std::path::PathBuf;

const APP_DIR: &str = "pirate-radio";

/// Directory holding the binary; assets and token files live beside it on
/// the appliance image.
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/pirate-radio, falling back to /tmp on a bare image
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join(APP_DIR)
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(APP_DIR)
}

fn find_beside_exe(name: &str) -> Option<PathBuf> {
    let dir = exe_dir();
    let p = dir.join(name);
    if p.exists() {
        return Some(p);
    }
    let p = dir.join("external").join(name);
    if p.exists() {
        return Some(p);
    }
    None
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    for dir in path.split(':') {
        let p = PathBuf::from(dir).join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_binary(env_override: &str, name: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_override) {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    find_beside_exe(name).or_else(|| find_on_path(name))
}

/// ffmpeg decodes station streams and encodes identification samples.
/// `FFMPEG_PATH` overrides the lookup.
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    find_binary("FFMPEG_PATH", "ffmpeg")
}

/// aplay is the audio sink.
pub fn find_aplay_binary() -> Option<PathBuf> {
    find_binary("APLAY_PATH", "aplay")
}

/// amixer drives the mute button.
pub fn find_amixer_binary() -> Option<PathBuf> {
    find_binary("AMIXER_PATH", "amixer")
}
