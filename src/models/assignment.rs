// SPDX-License-Identifier: MIT

//! Assignment cache stored in `assignments/{uid}`.
//!
//! The cache carries one entry per known assignment and remembers the
//! calendar event created for it, so repeated syncs patch events instead of
//! duplicating them.

use crate::models::CourseSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cached assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub name: String,
    /// Due date as an ISO 8601 timestamp.
    pub due_date: String,
    pub completed: bool,
    pub course_id: String,
    /// Calendar event id, empty until an event has been created.
    #[serde(default)]
    pub event_id: String,
    /// Set when name or due date changed since the event was last written.
    #[serde(default)]
    pub outdated: bool,
}

/// Per-user assignment cache document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentCache {
    #[serde(default)]
    pub assignments: BTreeMap<String, Assignment>,
}

impl AssignmentCache {
    /// Merge freshly fetched assignments into the cache.
    ///
    /// - Entries for courses no longer in the user's course list are pruned.
    /// - A completed assignment with no cached entry (so no event to update)
    ///   is skipped entirely.
    /// - Carried-over entries keep their `event_id`; they become `outdated`
    ///   when the name or due date changed.
    pub fn merge_fetched(
        &mut self,
        fetched: BTreeMap<String, Assignment>,
        courses: &BTreeMap<String, CourseSettings>,
    ) {
        self.assignments
            .retain(|_, assignment| courses.contains_key(&assignment.course_id));

        for (assignment_id, mut assignment) in fetched {
            let old = self.assignments.get(&assignment_id);

            if assignment.completed && old.is_none() {
                continue;
            }

            match old {
                None => {
                    assignment.event_id = String::new();
                    assignment.outdated = false;
                }
                Some(old) => {
                    assignment.event_id = old.event_id.clone();
                    assignment.outdated = old.outdated
                        || assignment.due_date != old.due_date
                        || assignment.name != old.name;
                }
            }

            self.assignments.insert(assignment_id, assignment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(name: &str, due: &str, completed: bool, course: &str) -> Assignment {
        Assignment {
            name: name.to_string(),
            due_date: due.to_string(),
            completed,
            course_id: course.to_string(),
            event_id: String::new(),
            outdated: false,
        }
    }

    fn courses(ids: &[&str]) -> BTreeMap<String, CourseSettings> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    CourseSettings {
                        name: Some(format!("Course {id}")),
                        href: Some(format!("/courses/{id}")),
                        color: Some("1".to_string()),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn merge_keeps_event_id_and_flags_changes() {
        let mut cache = AssignmentCache::default();
        let mut cached = assignment("HW 1", "2026-09-01T23:59:00+00:00", false, "42");
        cached.event_id = "evt_1".to_string();
        cache.assignments.insert("42-1".to_string(), cached);

        let fetched = BTreeMap::from([(
            "42-1".to_string(),
            assignment("HW 1", "2026-09-02T23:59:00+00:00", false, "42"),
        )]);
        cache.merge_fetched(fetched, &courses(&["42"]));

        let merged = &cache.assignments["42-1"];
        assert_eq!(merged.event_id, "evt_1");
        assert!(merged.outdated, "due date change must mark entry outdated");
    }

    #[test]
    fn merge_treats_rename_as_update_of_the_same_entry() {
        let mut cache = AssignmentCache::default();
        let mut cached = assignment("HW 1", "2026-09-01T23:59:00+00:00", false, "42");
        cached.event_id = "evt_1".to_string();
        cache.assignments.insert("42-1".to_string(), cached);

        // Keys come from Gradescope's stable assignment id, so the renamed
        // assignment arrives under the same key.
        let fetched = BTreeMap::from([(
            "42-1".to_string(),
            assignment("HW 1 (fixed)", "2026-09-01T23:59:00+00:00", false, "42"),
        )]);
        cache.merge_fetched(fetched, &courses(&["42"]));

        assert_eq!(cache.assignments.len(), 1);
        let merged = &cache.assignments["42-1"];
        assert_eq!(merged.name, "HW 1 (fixed)");
        assert_eq!(merged.event_id, "evt_1");
        assert!(merged.outdated, "name change must mark entry outdated");
    }

    #[test]
    fn merge_skips_completed_without_event() {
        let mut cache = AssignmentCache::default();
        let fetched = BTreeMap::from([(
            "42-1".to_string(),
            assignment("HW 1", "2026-09-01T23:59:00+00:00", true, "42"),
        )]);
        cache.merge_fetched(fetched, &courses(&["42"]));

        assert!(cache.assignments.is_empty());
    }

    #[test]
    fn merge_prunes_dropped_courses() {
        let mut cache = AssignmentCache::default();
        cache.assignments.insert(
            "99-1".to_string(),
            assignment("Old HW", "2026-09-01T23:59:00+00:00", false, "99"),
        );

        cache.merge_fetched(BTreeMap::new(), &courses(&["42"]));
        assert!(cache.assignments.is_empty());
    }

    #[test]
    fn merge_inserts_new_assignment_without_event() {
        let mut cache = AssignmentCache::default();
        let fetched = BTreeMap::from([(
            "42-7".to_string(),
            assignment("HW 7", "2026-10-01T23:59:00+00:00", false, "42"),
        )]);
        cache.merge_fetched(fetched, &courses(&["42"]));

        let entry = &cache.assignments["42-7"];
        assert_eq!(entry.event_id, "");
        assert!(!entry.outdated);
    }
}
