//! In-memory roster store.
//!
//! Holds every class section for the lifetime of the process. The only
//! mutation is [`RosterStore::replace_students`], which swaps a section's
//! whole student list under the write lock.

use crate::types::{AttendanceStatus, ClassSection, Student};
use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("class section not found: {0}")]
    SectionNotFound(String),
    #[error("duplicate class section id: {0}")]
    DuplicateSection(String),
    #[error("duplicate student id {student_id} in section {section_id}")]
    DuplicateStudent {
        section_id: String,
        student_id: String,
    },
    #[error("bad roster seed: {0}")]
    Seed(String),
}

/// Dashboard progress for one section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionProgress {
    /// Students whose status is anything but `UNMARKED`.
    pub marked: u32,
    /// Declared capacity of the section.
    pub capacity: u32,
}

impl SectionProgress {
    /// Fraction of capacity marked, clamped to [0, 1]. Zero capacity yields 0.
    pub fn ratio(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.marked as f32 / self.capacity as f32).clamp(0.0, 1.0)
    }
}

/// Authoritative store of class sections.
#[derive(Debug, Default)]
pub struct RosterStore {
    sections: RwLock<Vec<ClassSection>>,
}

impl RosterStore {
    /// Build a store from seed sections, rejecting duplicate ids.
    pub fn new(sections: Vec<ClassSection>) -> Result<Self, RosterError> {
        let mut seen = HashSet::new();
        for section in &sections {
            if !seen.insert(section.id.as_str()) {
                return Err(RosterError::DuplicateSection(section.id.clone()));
            }
            ensure_unique_ids(&section.id, &section.students)?;
        }
        tracing::debug!(sections = sections.len(), "roster store seeded");
        Ok(Self {
            sections: RwLock::new(sections),
        })
    }

    /// Snapshot of one section.
    pub fn get_section(&self, id: &str) -> Result<ClassSection, RosterError> {
        self.read()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| RosterError::SectionNotFound(id.to_string()))
    }

    /// Snapshot of all sections, in seed order.
    pub fn sections(&self) -> Vec<ClassSection> {
        self.read().clone()
    }

    /// Atomically replace a section's entire student list.
    ///
    /// The new list is taken as-is; nothing from the prior list survives.
    pub fn replace_students(
        &self,
        section_id: &str,
        students: Vec<Student>,
    ) -> Result<(), RosterError> {
        ensure_unique_ids(section_id, &students)?;
        let mut sections = self.write();
        let section = sections
            .iter_mut()
            .find(|s| s.id == section_id)
            .ok_or_else(|| RosterError::SectionNotFound(section_id.to_string()))?;
        tracing::info!(
            section_id,
            previous = section.students.len(),
            replacement = students.len(),
            "replacing section students"
        );
        section.students = students;
        Ok(())
    }

    pub fn progress(&self, section_id: &str) -> Result<SectionProgress, RosterError> {
        let sections = self.read();
        let section = sections
            .iter()
            .find(|s| s.id == section_id)
            .ok_or_else(|| RosterError::SectionNotFound(section_id.to_string()))?;
        let marked = section
            .students
            .iter()
            .filter(|s| s.status != AttendanceStatus::Unmarked)
            .count() as u32;
        Ok(SectionProgress {
            marked,
            capacity: section.total_students,
        })
    }

    /// Present students summed across every section.
    pub fn total_present(&self) -> usize {
        self.read()
            .iter()
            .flat_map(|s| s.students.iter())
            .filter(|s| s.is_present())
            .count()
    }

    // A poisoned lock still holds a consistent list: the only writer swaps
    // the vector in a single assignment.
    fn read(&self) -> RwLockReadGuard<'_, Vec<ClassSection>> {
        self.sections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ClassSection>> {
        self.sections.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn ensure_unique_ids(section_id: &str, students: &[Student]) -> Result<(), RosterError> {
    let mut seen = HashSet::with_capacity(students.len());
    for student in students {
        if !seen.insert(student.id.as_str()) {
            return Err(RosterError::DuplicateStudent {
                section_id: section_id.to_string(),
                student_id: student.id.clone(),
            });
        }
    }
    Ok(())
}
