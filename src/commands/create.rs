//! `pgseq create <schema> <name>`

use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::*;

use super::Workspace;
use crate::error::{SeqError, SeqResult};
use crate::layout::write_pair;
use crate::objects::Script;
use crate::version::now_version;

/// Turn free text into a file-name-safe migration name.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Write an empty up/down pair stamped with `version` into `dir`.
pub async fn create_pair(dir: &Path, version: u64, name: &str) -> SeqResult<[PathBuf; 2]> {
    let name = sanitize_name(name);
    if name.is_empty() {
        return Err(SeqError::Config("Migration name is empty".to_string()));
    }

    tokio::fs::create_dir_all(dir).await?;
    write_pair(dir, version, None, &name, &Script::default()).await
}

pub async fn create(ws: &Workspace, schema: &str, name: &str) -> Result<()> {
    if !ws.config.has_schema(schema) {
        anyhow::bail!("Schema '{}' isn't configured on any connection", schema);
    }

    let [up, down] = create_pair(&ws.config.schema_dir(schema), now_version(), name).await?;

    println!("  {} {}", "✓ Created:".green(), up.display());
    println!("  {} {}", "✓ Created:".green(), down.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{MigrationFile, list_migrations};

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Add avatar URL"), "add_avatar_url");
        assert_eq!(sanitize_name("  --drop old-index!! "), "drop_old_index");
        assert_eq!(sanitize_name("***"), "");
    }

    #[tokio::test]
    async fn test_create_pair_is_a_hand_written_step() {
        let dir = std::env::temp_dir().join(format!("pgseq-create-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let [up, _] = create_pair(&dir, 1_700_000_000, "Add avatar").await.unwrap();
        assert!(up.ends_with("1700000000_add_avatar.up.sql"));

        let files = list_migrations(&dir).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            MigrationFile::parse("1700000000_add_avatar.down.sql").as_ref(),
            files.first()
        );

        assert!(create_pair(&dir, 1, "!!").await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
