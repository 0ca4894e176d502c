use std::path::{Path, PathBuf};

use regex::Regex;

use crate::roles::Role;

const MAX_TITLE_CHARS: usize = 200;

/// Makes a guide title safe to embed in file and directory names.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' | '\n' | '\r' | '\t' | '\x0b' | '\x0c' => '_',
            other => other,
        })
        .collect();
    let replaced = replaced.replace("..", "_");
    let trimmed: String = replaced.trim().chars().take(MAX_TITLE_CHARS).collect();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed
    }
}

/// Filesystem layout of one airing below the videos directory.
///
/// ```text
/// {videos}/{title}-save/{title}_{provider}_{n}_{role}.ts
/// {videos}/{title}-save/start_time_{title}_{provider}_{role}.txt
/// {videos}/{title}-save/{title}-to-watch/{title}_report.txt
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveLayout {
    title: String,
    save_dir: PathBuf,
}

impl SaveLayout {
    pub fn new(videos_dir: impl AsRef<Path>, title: &str) -> Self {
        let title = sanitize_title(title);
        let save_dir = videos_dir.as_ref().join(format!("{title}-save"));
        Self { title, save_dir }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn segment_name(&self, provider: &str, index: u32, role: Role) -> String {
        format!("{}_{provider}_{index}_{}.ts", self.title, role.tag())
    }

    pub fn segment_path(&self, provider: &str, index: u32, role: Role) -> PathBuf {
        self.save_dir.join(self.segment_name(provider, index, role))
    }

    pub fn start_ledger_path(&self, provider: &str, role: Role) -> PathBuf {
        self.save_dir
            .join(format!("start_time_{}_{provider}_{}.txt", self.title, role.tag()))
    }

    pub fn to_watch_dir(&self) -> PathBuf {
        self.save_dir.join(format!("{}-to-watch", self.title))
    }

    pub fn report_path(&self) -> PathBuf {
        self.to_watch_dir().join(format!("{}_report.txt", self.title))
    }

    /// Matches exactly the segments of one provider and role, capturing the
    /// segment index.
    pub fn segment_pattern(&self, provider: &str, role: Role) -> Result<Regex, regex::Error> {
        Regex::new(&format!(
            r"^{}_{}_(\d+)_{}\.ts$",
            regex::escape(&self.title),
            regex::escape(provider),
            regex::escape(role.tag())
        ))
    }

    /// Segments of one provider and role present on disk, ordered by index.
    pub fn list_segments(&self, provider: &str, role: Role) -> std::io::Result<Vec<PathBuf>> {
        let pattern = self
            .segment_pattern(provider, role)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        let entries = match std::fs::read_dir(&self.save_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(captures) = pattern.captures(name) {
                if let Ok(index) = captures[1].parse::<u64>() {
                    found.push((index, entry.path()));
                }
            }
        }
        found.sort_by_key(|(index, _)| *index);
        Ok(found_paths(found))
    }
}

fn found_paths(found: Vec<(u64, PathBuf)>) -> Vec<PathBuf> {
    found.into_iter().map(|(_, path)| path).collect()
}

/// Trimmed output written next to a cut segment.
pub fn trimmed_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_s.ts"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn sanitize_replaces_separators_and_traversal() {
        assert_eq!(sanitize_title("News/Sport\\Live"), "News_Sport_Live");
        assert_eq!(sanitize_title("../../etc"), "____etc");
        assert_eq!(sanitize_title("  Film\tdu soir \n"), "Film_du soir _");
        assert_eq!(sanitize_title("   "), "_");
        assert_eq!(sanitize_title(&"x".repeat(300)).len(), 200);
    }

    #[test]
    fn layout_names_follow_disk_conventions() {
        let layout = SaveLayout::new("/videos", "Le Journal");
        assert_eq!(layout.save_dir(), Path::new("/videos/Le Journal-save"));
        assert_eq!(
            layout.segment_name("alpha", 2, Role::Backup2),
            "Le Journal_alpha_2_backup_2.ts"
        );
        assert_eq!(
            layout.start_ledger_path("alpha", Role::Primary),
            PathBuf::from("/videos/Le Journal-save/start_time_Le Journal_alpha_original.txt")
        );
        assert_eq!(
            layout.report_path(),
            PathBuf::from("/videos/Le Journal-save/Le Journal-to-watch/Le Journal_report.txt")
        );
    }

    #[test]
    fn segment_listing_ignores_trimmed_outputs_and_other_roles() {
        let dir = tempdir().unwrap();
        let layout = SaveLayout::new(dir.path(), "show");
        fs::create_dir_all(layout.save_dir()).unwrap();
        for name in [
            "show_alpha_10_original.ts",
            "show_alpha_2_original.ts",
            "show_alpha_1_original.ts",
            "show_alpha_1_original_s.ts",
            "show_alpha_1_backup.ts",
            "show_beta_1_original.ts",
        ] {
            fs::write(layout.save_dir().join(name), b"x").unwrap();
        }
        let names: Vec<String> = layout
            .list_segments("alpha", Role::Primary)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "show_alpha_1_original.ts",
                "show_alpha_2_original.ts",
                "show_alpha_10_original.ts"
            ]
        );
    }

    #[test]
    fn trimmed_name_appends_suffix() {
        assert_eq!(
            trimmed_name(Path::new("/s/show_alpha_1_backup.ts")),
            PathBuf::from("/s/show_alpha_1_backup_s.ts")
        );
    }
}
