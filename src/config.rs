use std::path::{Path, PathBuf};

use clap::Parser;

pub const DEFAULT_PORT: u16 = 31337;

pub const SHOW_FILE_EXTENSION: &str = "show";
pub const TEMPLATE_FILE_EXTENSION: &str = "tmpl";

#[derive(Parser, Debug, Clone)]
#[command(name = "cgcontrold", about = "Live broadcast graphics controller")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// TCP port for control clients.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the shows/ and templates/ subdirectories.
    #[arg(long, default_value = ".")]
    pub data_dir: PathBuf,
}

/// Show and show-file names come off the wire; anything that could escape
/// the data directory is rejected before it reaches the filesystem.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

/// Resolves show and template names to file paths. Both directories are
/// created on startup.
#[derive(Debug, Clone)]
pub struct Paths {
    show_dir: PathBuf,
    template_dir: PathBuf,
}

impl Paths {
    pub fn init(data_dir: &Path) -> anyhow::Result<Self> {
        let show_dir = data_dir.join("shows");
        let template_dir = data_dir.join("templates");
        std::fs::create_dir_all(&show_dir)?;
        std::fs::create_dir_all(&template_dir)?;
        Ok(Self {
            show_dir,
            template_dir,
        })
    }

    pub fn show_file(&self, name: &str) -> PathBuf {
        self.show_dir.join(name)
    }

    pub fn template_file(&self, name: &str) -> PathBuf {
        self.template_dir.join(name)
    }

    pub fn list_shows(&self) -> Vec<String> {
        Self::list_dir(&self.show_dir, SHOW_FILE_EXTENSION)
    }

    pub fn list_templates(&self) -> Vec<String> {
        Self::list_dir(&self.template_dir, TEMPLATE_FILE_EXTENSION)
    }

    fn list_dir(dir: &Path, extension: &str) -> Vec<String> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("failed to read {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|found| found == extension))
            .filter_map(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_names() {
        assert!(is_safe_file_name("news.show"));
        assert!(!is_safe_file_name(""));
        assert!(!is_safe_file_name("../escape.show"));
        assert!(!is_safe_file_name("a/b.show"));
        assert!(!is_safe_file_name(".hidden"));
    }

    #[test]
    fn lists_only_matching_extension_sorted() {
        let dir = std::env::temp_dir().join(format!("cgcontrol-paths-{}", uuid::Uuid::new_v4()));
        let paths = Paths::init(&dir).unwrap();

        std::fs::write(paths.show_file("b.show"), "{}").unwrap();
        std::fs::write(paths.show_file("a.show"), "{}").unwrap();
        std::fs::write(paths.show_file("notes.txt"), "").unwrap();

        assert_eq!(paths.list_shows(), vec!["a.show".to_string(), "b.show".to_string()]);
        assert!(paths.list_templates().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
