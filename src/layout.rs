//! On-disk migration layout.
//!
//! `<folder>/<schema>/<version>_<kind>_<name>.<up|down>.sql`; hand-written
//! migrations drop the kind: `<version>_<name>.<up|down>.sql`.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SeqResult;
use crate::objects::{ObjectKind, Script};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Down,
    Up,
}

impl Direction {
    pub fn suffix(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// One physical migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: u64,
    pub kind: Option<ObjectKind>,
    pub name: String,
    pub direction: Direction,
}

impl MigrationFile {
    pub fn new(version: u64, kind: Option<ObjectKind>, name: impl Into<String>, direction: Direction) -> Self {
        Self {
            version,
            kind,
            name: name.into(),
            direction,
        }
    }

    pub fn file_name(&self) -> String {
        match self.kind {
            Some(kind) => format!(
                "{}_{}_{}.{}.sql",
                self.version,
                kind.tag(),
                self.name,
                self.direction.suffix()
            ),
            None => format!("{}_{}.{}.sql", self.version, self.name, self.direction.suffix()),
        }
    }

    /// Parse a file name; anything that isn't a migration gives `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".sql")?;
        let (stem, direction) = if let Some(s) = stem.strip_suffix(".up") {
            (s, Direction::Up)
        } else if let Some(s) = stem.strip_suffix(".down") {
            (s, Direction::Down)
        } else {
            return None;
        };

        let (version, rest) = stem.split_once('_')?;
        let version: u64 = version.parse().ok()?;

        for kind in ObjectKind::ALL {
            if let Some(name) = rest.strip_prefix(kind.tag()).and_then(|r| r.strip_prefix('_')) {
                if !name.is_empty() {
                    return Some(Self::new(version, Some(kind), name, direction));
                }
            }
        }

        Some(Self::new(version, None, rest, direction))
    }
}

impl fmt::Display for MigrationFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Migration files in `dir`, ordered by version, then name, down before up.
pub fn list_migrations(dir: &Path) -> SeqResult<Vec<MigrationFile>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match MigrationFile::parse(&name) {
            Some(file) => files.push(file),
            None => debug!("Ignoring non-migration file {}", name),
        }
    }

    files.sort_by(|a, b| {
        a.version
            .cmp(&b.version)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.direction.cmp(&b.direction))
    });

    Ok(files)
}

/// One version per logical step; an up/down pair is a single step.
pub fn logical_steps(files: &[MigrationFile]) -> Vec<u64> {
    let mut steps: Vec<u64> = files.iter().map(|f| f.version).collect();
    steps.dedup();
    steps
}

/// Logical steps of the migrations in `dir`.
pub fn read_steps(dir: &Path) -> SeqResult<Vec<u64>> {
    Ok(logical_steps(&list_migrations(dir)?))
}

/// Whether any file in `dir` carries `version`.
pub fn has_version(dir: &Path, version: u64) -> SeqResult<bool> {
    Ok(list_migrations(dir)?.iter().any(|f| f.version == version))
}

pub fn path_for(dir: &Path, file: &MigrationFile) -> PathBuf {
    dir.join(file.file_name())
}

/// Write an up/down pair. Stops at the first failed write.
pub async fn write_pair(
    dir: &Path,
    version: u64,
    kind: Option<ObjectKind>,
    name: &str,
    script: &Script,
) -> SeqResult<[PathBuf; 2]> {
    let up = path_for(dir, &MigrationFile::new(version, kind, name, Direction::Up));
    tokio::fs::write(&up, &script.up).await?;

    let down = path_for(dir, &MigrationFile::new(version, kind, name, Direction::Down));
    tokio::fs::write(&down, &script.down).await?;

    Ok([up, down])
}
