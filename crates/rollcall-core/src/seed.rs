//! Roster seed files.
//!
//! A seed is a TOML document with one `[[section]]` table per class and
//! nested `[[section.student]]` tables. The default seed is embedded at
//! compile time from `contrib/roster/default.toml`.

use crate::roster::{RosterError, RosterStore};
use crate::types::{AttendanceStatus, ClassSection, Student};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_SEED: &str = include_str!("../../../contrib/roster/default.toml");

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    section: Vec<SeedSection>,
}

#[derive(Debug, Deserialize)]
struct SeedSection {
    id: String,
    name: String,
    grade: String,
    total_students: u32,
    #[serde(default)]
    student: Vec<SeedStudent>,
}

#[derive(Debug, Deserialize)]
struct SeedStudent {
    id: String,
    name: String,
    roll_number: String,
    photo_url: String,
}

impl From<SeedSection> for ClassSection {
    fn from(seed: SeedSection) -> Self {
        let students = seed
            .student
            .into_iter()
            .map(|s| Student {
                status: AttendanceStatus::Unmarked,
                ..Student::new(s.id, s.name, s.roll_number, s.photo_url)
            })
            .collect();
        ClassSection {
            id: seed.id,
            name: seed.name,
            grade: seed.grade,
            total_students: seed.total_students,
            students,
        }
    }
}

/// Parse seed TOML into class sections. Every student starts `UNMARKED`.
pub fn parse_seed(src: &str) -> Result<Vec<ClassSection>, RosterError> {
    let file: SeedFile = toml::from_str(src).map_err(|e| RosterError::Seed(e.to_string()))?;
    Ok(file.section.into_iter().map(ClassSection::from).collect())
}

/// Sections from the embedded default seed.
pub fn default_sections() -> Result<Vec<ClassSection>, RosterError> {
    parse_seed(DEFAULT_SEED)
}

/// Build a store from a seed file on disk, or the embedded seed when `path` is `None`.
pub fn load_store(path: Option<&Path>) -> Result<RosterStore, RosterError> {
    let sections = match path {
        Some(path) => {
            let src = std::fs::read_to_string(path)
                .map_err(|e| RosterError::Seed(format!("{}: {e}", path.display())))?;
            tracing::info!(path = %path.display(), "loading roster seed");
            parse_seed(&src)?
        }
        None => default_sections()?,
    };
    RosterStore::new(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_seed_matches_fixed_roster() {
        let sections = default_sections().unwrap();
        assert_eq!(sections.len(), 2);

        let c1 = &sections[0];
        assert_eq!(c1.id, "c1");
        assert_eq!(c1.name, "Class 5-A");
        assert_eq!(c1.total_students, 8);
        assert_eq!(c1.students.len(), 8);
        assert_eq!(c1.students[0].roll_number, "101");
        assert!(c1
            .students
            .iter()
            .all(|s| s.status == AttendanceStatus::Unmarked && s.confidence.is_none()));

        let c2 = &sections[1];
        assert_eq!(c2.total_students, 35);
        assert!(c2.students.is_empty());
    }

    #[test]
    fn test_parse_seed_rejects_malformed_toml() {
        let result = parse_seed("[[section]]\nid = 3");
        assert!(matches!(result, Err(RosterError::Seed(_))));
    }

    #[test]
    fn test_load_store_rejects_duplicate_students() {
        let dir = std::env::temp_dir().join(format!("rollcall-seed-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roster.toml");
        std::fs::write(
            &path,
            r#"
[[section]]
id = "c1"
name = "Class 1"
grade = "1"
total_students = 2

[[section.student]]
id = "1"
name = "A"
roll_number = "1"
photo_url = ""

[[section.student]]
id = "1"
name = "B"
roll_number = "2"
photo_url = ""
"#,
        )
        .unwrap();

        let result = load_store(Some(&path));
        assert!(matches!(result, Err(RosterError::DuplicateStudent { .. })));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_store_missing_file() {
        let result = load_store(Some(Path::new("/nonexistent/rollcall/roster.toml")));
        assert!(matches!(result, Err(RosterError::Seed(_))));
    }
}
