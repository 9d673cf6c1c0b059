//! Destinations for generated script units.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{OutputConfig, OutputMode};
use crate::core::schema::ObjectKind;
use crate::error::Result;
use crate::script::ScriptUnit;

enum Sink {
    None,
    InMemory(Vec<String>),
    RunFile { path: PathBuf, file: File },
    PerObject { dir: PathBuf, written: usize },
}

/// Receives script units in emission order.
///
/// The destination is chosen by configuration; callers always emit the same
/// way. Units may come from concurrent table transfers, so emission is
/// serialized internally.
pub struct ScriptOutput {
    sink: Mutex<Sink>,
    separator: String,
}

impl ScriptOutput {
    /// Open the destination described by `config`. File destinations are
    /// created (or truncated) immediately.
    pub fn open(config: &OutputConfig, separator: impl Into<String>) -> Result<Self> {
        let sink = match (config.mode, config.path.as_deref()) {
            (OutputMode::None, _) => Sink::None,
            (OutputMode::InMemory, _) => Sink::InMemory(Vec::new()),
            (OutputMode::File, Some(path)) if config.per_object => {
                fs::create_dir_all(path)?;
                Sink::PerObject {
                    dir: path.to_path_buf(),
                    written: 0,
                }
            }
            (OutputMode::File, Some(path)) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(path)?;
                Sink::RunFile {
                    path: path.to_path_buf(),
                    file,
                }
            }
            // Rejected by config validation.
            (OutputMode::File, None) => Sink::None,
        };
        Ok(Self {
            sink: Mutex::new(sink),
            separator: separator.into(),
        })
    }

    /// An output that discards everything.
    pub fn none() -> Self {
        Self {
            sink: Mutex::new(Sink::None),
            separator: ";".into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(*self.sink.lock(), Sink::None)
    }

    /// Write one unit to the destination.
    pub fn emit(&self, unit: &ScriptUnit) -> Result<()> {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::None => {}
            Sink::InMemory(scripts) => scripts.push(unit.to_script(&self.separator)),
            Sink::RunFile { file, .. } => {
                file.write_all(unit.to_script(&self.separator).as_bytes())?;
            }
            Sink::PerObject { dir, written } => {
                *written += 1;
                let path = dir.join(file_name(*written, unit));
                debug!("Writing {}", path.display());
                // Data batches of one table share a file.
                let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
                file.write_all(unit.to_script(&self.separator).as_bytes())?;
            }
        }
        Ok(())
    }

    /// Flush and close the destination. Returns the scripts kept in memory.
    pub fn finish(&self) -> Result<Vec<String>> {
        let mut sink = self.sink.lock();
        match std::mem::replace(&mut *sink, Sink::None) {
            Sink::InMemory(scripts) => Ok(scripts),
            Sink::RunFile { path, mut file } => {
                file.flush()?;
                info!("Script written to {}", path.display());
                Ok(Vec::new())
            }
            Sink::PerObject { dir, written } => {
                info!("{} script files written to {}", written, dir.display());
                Ok(Vec::new())
            }
            Sink::None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for ScriptOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.sink.lock() {
            Sink::None => "none",
            Sink::InMemory(_) => "in_memory",
            Sink::RunFile { .. } => "file",
            Sink::PerObject { .. } => "per_object",
        };
        f.debug_struct("ScriptOutput").field("sink", &kind).finish()
    }
}

/// `0001_table_dbo.orders.sql`; data units use a stable name so batches of
/// one table land in one file.
fn file_name(sequence: usize, unit: &ScriptUnit) -> String {
    let kind = unit.kind.as_str().replace(' ', "_");
    let name: String = unit
        .name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect();
    if unit.kind == ObjectKind::Data {
        format!("data_{}.sql", name)
    } else {
        format!("{:04}_{}_{}.sql", sequence, kind, name)
    }
}

/// Files in a per-object output directory, sorted.
pub fn list_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "sql").unwrap_or(false))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(name: &str, kind: ObjectKind) -> ScriptUnit {
        ScriptUnit::new(name, kind, 0, vec![format!("CREATE {} {}", kind, name)])
    }

    #[test]
    fn test_in_memory_keeps_order() {
        let out = ScriptOutput::open(
            &OutputConfig {
                mode: OutputMode::InMemory,
                ..Default::default()
            },
            ";",
        )
        .unwrap();
        out.emit(&unit("a", ObjectKind::Table)).unwrap();
        out.emit(&unit("v", ObjectKind::View)).unwrap();
        let scripts = out.finish().unwrap();
        assert_eq!(scripts, vec!["CREATE table a;\n\n", "CREATE view v;\n\n"]);
    }

    #[test]
    fn test_single_file_per_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("run.sql");
        let out = ScriptOutput::open(
            &OutputConfig {
                mode: OutputMode::File,
                path: Some(path.clone()),
                per_object: false,
            },
            "\nGO",
        )
        .unwrap();
        out.emit(&unit("a", ObjectKind::Table)).unwrap();
        out.emit(&unit("b", ObjectKind::Table)).unwrap();
        assert!(out.finish().unwrap().is_empty());

        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "CREATE table a\nGO\n\nCREATE table b\nGO\n\n");
    }

    #[test]
    fn test_file_per_object() {
        let dir = TempDir::new().unwrap();
        let out = ScriptOutput::open(
            &OutputConfig {
                mode: OutputMode::File,
                path: Some(dir.path().to_path_buf()),
                per_object: true,
            },
            ";",
        )
        .unwrap();
        out.emit(&unit("dbo.orders", ObjectKind::Table)).unwrap();
        out.emit(&unit("dbo.orders", ObjectKind::Data)).unwrap();
        out.emit(&unit("dbo.orders", ObjectKind::Data)).unwrap();
        out.emit(&unit("dbo.fk_x", ObjectKind::ForeignKey)).unwrap();
        out.finish().unwrap();

        let names: Vec<String> = list_scripts(dir.path())
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec![
                "0001_table_dbo.orders.sql",
                "0004_foreign_key_dbo.fk_x.sql",
                "data_dbo.orders.sql",
            ]
        );
        let data = std::fs::read_to_string(dir.path().join("data_dbo.orders.sql")).unwrap();
        assert_eq!(data.matches("CREATE data").count(), 2);
    }

    #[test]
    fn test_none_discards() {
        let out = ScriptOutput::none();
        assert!(!out.is_enabled());
        out.emit(&unit("a", ObjectKind::Table)).unwrap();
        assert!(out.finish().unwrap().is_empty());
    }
}
