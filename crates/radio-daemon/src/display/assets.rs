//! Animation frames on disk.
//!
//! Files are named `<name><variant>_<frame>.<ext>`, e.g. `play2_014.gif`.
//! The directory is scanned once; the index remembers the real file name of
//! every frame so zero padding and extensions may differ between files.
//! Frame bytes are read on demand with [`read_frames`].

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("no images for `{0}`")]
    MissingAnimation(String),
    #[error("no frames for `{name}` variant {variant}")]
    MissingVariant { name: String, variant: u32 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("frame loader failed: {0}")]
    Loader(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameName {
    pub name: String,
    pub variant: u32,
    pub frame: u32,
    pub ext: String,
}

fn frame_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-zA-Z]+)(\d+)_(\d+)\.([A-Za-z0-9]+)$").expect("valid frame pattern")
    })
}

pub fn parse_frame_name(file_name: &str) -> Option<FrameName> {
    let caps = frame_pattern().captures(file_name)?;
    Some(FrameName {
        name: caps[1].to_string(),
        variant: caps[2].parse().ok()?,
        frame: caps[3].parse().ok()?,
        ext: caps[4].to_string(),
    })
}

/// Frame number to file name, in frame order.
type Frames = BTreeMap<u32, String>;

/// Lookup tables for the animation directory.
#[derive(Debug, Default)]
pub struct AnimationIndex {
    dir: PathBuf,
    animations: HashMap<String, BTreeMap<u32, Frames>>,
}

impl AnimationIndex {
    pub fn scan(dir: &Path) -> anyhow::Result<Self> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        let index = Self::from_file_names(dir, names);
        info!(
            "display: indexed {} animations ({} variants) in {}",
            index.animations.len(),
            index.animations.values().map(BTreeMap::len).sum::<usize>(),
            dir.display()
        );
        Ok(index)
    }

    pub fn from_file_names<I>(dir: &Path, names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut index = Self {
            dir: dir.to_path_buf(),
            ..Default::default()
        };
        for file_name in names {
            let Some(parsed) = parse_frame_name(&file_name) else {
                debug!("display: skipping {}", file_name);
                continue;
            };
            let frames = index
                .animations
                .entry(parsed.name)
                .or_default()
                .entry(parsed.variant)
                .or_default();
            if let Some(previous) = frames.insert(parsed.frame, file_name.clone()) {
                debug!("display: {} replaces {}", file_name, previous);
            }
        }
        index
    }

    /// Variants present for `name`, ascending.  Numbering may have gaps.
    pub fn variants(&self, name: &str) -> Vec<u32> {
        self.animations
            .get(name)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn highest_variant(&self, name: &str) -> Option<u32> {
        self.animations.get(name)?.keys().next_back().copied()
    }

    pub fn highest_frame(&self, name: &str, variant: u32) -> Option<u32> {
        self.animations
            .get(name)?
            .get(&variant)?
            .keys()
            .next_back()
            .copied()
    }

    /// Paths of every frame of one variant, in frame order.
    pub fn frame_paths(&self, name: &str, variant: u32) -> Result<Vec<PathBuf>, AssetError> {
        let frames = self
            .animations
            .get(name)
            .and_then(|v| v.get(&variant))
            .ok_or_else(|| AssetError::MissingVariant {
                name: name.to_string(),
                variant,
            })?;
        Ok(frames.values().map(|f| self.dir.join(f)).collect())
    }
}

/// Read frame files into memory.  Blocking; run it off the async threads.
pub fn read_frames(paths: &[PathBuf]) -> Result<Vec<Arc<[u8]>>, AssetError> {
    paths
        .iter()
        .map(|path| {
            std::fs::read(path)
                .map(Arc::from)
                .map_err(|source| AssetError::Io {
                    path: path.clone(),
                    source,
                })
        })
        .collect()
}

/// One in-memory frame served as an endless byte stream.
///
/// Each pass through the data ends with a single `Ok(0)`, so a driver that
/// reads to end-of-stream gets exactly one frame per draw, and the next draw
/// starts again from the first byte without touching storage.
#[derive(Debug, Clone)]
pub struct FrameReader {
    data: Arc<[u8]>,
    pos: usize,
    wrapped: bool,
}

impl FrameReader {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self {
            data,
            pos: 0,
            wrapped: false,
        }
    }
}

impl Read for FrameReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.data.is_empty() || buf.is_empty() {
            return Ok(0);
        }
        if self.wrapped {
            self.wrapped = false;
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        if self.pos == self.data.len() {
            self.pos = 0;
            self.wrapped = true;
        }
        Ok(n)
    }
}
