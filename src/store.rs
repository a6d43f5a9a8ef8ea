use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{NewStudent, SearchFilter, StudentPatch, StudentRecord, SubjectSnapshot};
use crate::risk;

/// Student record storage. Implementations own id allocation and ensure a
/// single writer per record; `all` must return a consistent snapshot.
#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<StudentRecord>, StoreError>;

    async fn get_by_student_id(&self, student_id: &str)
        -> Result<Option<StudentRecord>, StoreError>;

    async fn create(&self, student: NewStudent) -> Result<StudentRecord, StoreError>;

    /// Applies `patch` and re-scores the merged metrics. `Ok(None)` if `id`
    /// is unknown.
    async fn update(&self, id: i64, patch: StudentPatch)
        -> Result<Option<StudentRecord>, StoreError>;

    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    async fn all(&self) -> Result<Vec<StudentRecord>, StoreError>;

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<StudentRecord>, StoreError>;

    async fn record_snapshot(&self, snapshot: &SubjectSnapshot) -> Result<(), StoreError>;

    /// Most recent snapshot taken strictly before `before`.
    async fn latest_snapshot(&self, before: NaiveDate)
        -> Result<Option<SubjectSnapshot>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    students: BTreeMap<i64, StudentRecord>,
    snapshots: BTreeMap<NaiveDate, SubjectSnapshot>,
}

/// Process-local store used by `serve --in-memory` and tests.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<StudentRecord>, StoreError> {
        Ok(self.state.read().await.students.get(&id).cloned())
    }

    async fn get_by_student_id(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .find(|record| record.profile.student_id == student_id)
            .cloned())
    }

    async fn create(&self, student: NewStudent) -> Result<StudentRecord, StoreError> {
        let scored = risk::score(&student.metrics)?;
        let mut state = self.state.write().await;

        if state
            .students
            .values()
            .any(|record| record.profile.student_id == student.profile.student_id)
        {
            return Err(StoreError::DuplicateStudentId(student.profile.student_id));
        }

        let id = state.next_id;
        state.next_id += 1;
        let record = StudentRecord {
            id,
            profile: student.profile,
            student: scored,
        };
        state.students.insert(id, record.clone());
        info!(id, student_id = %record.profile.student_id, "student created");
        Ok(record)
    }

    async fn update(
        &self,
        id: i64,
        patch: StudentPatch,
    ) -> Result<Option<StudentRecord>, StoreError> {
        let mut state = self.state.write().await;
        let Some(existing) = state.students.get(&id) else {
            return Ok(None);
        };

        let (profile, metrics) = patch.merge(&existing.profile, existing.student.metrics());
        let scored = risk::score(&metrics)?;

        if state
            .students
            .values()
            .any(|record| record.id != id && record.profile.student_id == profile.student_id)
        {
            return Err(StoreError::DuplicateStudentId(profile.student_id));
        }

        let record = StudentRecord {
            id,
            profile,
            student: scored,
        };
        state.students.insert(id, record.clone());
        debug!(id, level = %record.student.performance_level(), "student updated");
        Ok(Some(record))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.state.write().await.students.remove(&id).is_some();
        if removed {
            info!(id, "student deleted");
        }
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<StudentRecord>, StoreError> {
        Ok(self.state.read().await.students.values().cloned().collect())
    }

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<StudentRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .students
            .values()
            .filter(|record| filter.matches(&record.profile))
            .cloned()
            .collect())
    }

    async fn record_snapshot(&self, snapshot: &SubjectSnapshot) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .snapshots
            .insert(snapshot.taken_on, *snapshot);
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        before: NaiveDate,
    ) -> Result<Option<SubjectSnapshot>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .range(..before)
            .next_back()
            .map(|(_, snapshot)| *snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StudentMetrics, StudentProfile, Subject, SubjectAverages, SubjectGrades};
    use crate::risk::{PerformanceLevel, Prediction};

    fn new_student(student_id: &str, grade: i32) -> NewStudent {
        NewStudent {
            profile: StudentProfile {
                name: format!("Student {student_id}"),
                student_id: student_id.to_string(),
                grade_level: "10th Grade".to_string(),
                section: "Section A".to_string(),
            },
            metrics: StudentMetrics {
                grades: SubjectGrades::uniform(grade),
                attendance_rate: 90.0,
                participation_score: 88,
            },
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_scores() {
        let store = MemoryStore::new();
        let first = store.create(new_student("STU001", 85)).await.unwrap();
        let second = store.create(new_student("STU002", 60)).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.student.performance_level(), PerformanceLevel::Good);
        assert_eq!(second.student.prediction(), Prediction::NeedsSupport);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_student_id() {
        let store = MemoryStore::new();
        store.create(new_student("STU001", 85)).await.unwrap();
        let err = store.create(new_student("STU001", 70)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStudentId(id) if id == "STU001"));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_metrics() {
        let store = MemoryStore::new();
        let mut student = new_student("STU001", 85);
        student.metrics.participation_score = 150;
        let err = store.create(student).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidMetrics(e) if e.field == "participationScore"));
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_rescores_merged_metrics() {
        let store = MemoryStore::new();
        let created = store.create(new_student("STU001", 85)).await.unwrap();
        assert_eq!(created.student.performance_level(), PerformanceLevel::Good);

        let patch = StudentPatch {
            math_grade: Some(20),
            science_grade: Some(20),
            english_grade: Some(20),
            attendance_rate: Some(50.0),
            ..StudentPatch::default()
        };
        let updated = store.update(created.id, patch).await.unwrap().unwrap();

        assert_eq!(updated.profile, created.profile);
        assert_eq!(updated.student.metrics().grades.history_grade, 85);
        assert!((updated.student.average_grade() - 52.5).abs() < 1e-9);
        assert_eq!(updated.student.performance_level(), PerformanceLevel::AtRisk);
        assert_eq!(store.get(created.id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn update_unknown_id_is_none() {
        let store = MemoryStore::new();
        let result = store.update(9, StudentPatch::default()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_keeps_record_on_invalid_patch() {
        let store = MemoryStore::new();
        let created = store.create(new_student("STU001", 85)).await.unwrap();
        let patch = StudentPatch {
            pe_grade: Some(-5),
            ..StudentPatch::default()
        };
        assert!(store.update(created.id, patch).await.is_err());
        assert_eq!(store.get(created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn update_cannot_take_another_student_id() {
        let store = MemoryStore::new();
        store.create(new_student("STU001", 85)).await.unwrap();
        let second = store.create(new_student("STU002", 85)).await.unwrap();
        let patch = StudentPatch {
            student_id: Some("STU001".to_string()),
            ..StudentPatch::default()
        };
        let err = store.update(second.id, patch).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStudentId(_)));
    }

    #[tokio::test]
    async fn delete_reports_removal() {
        let store = MemoryStore::new();
        let created = store.create(new_student("STU001", 85)).await.unwrap();
        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
        assert!(store.get_by_student_id("STU001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_filters_records() {
        let store = MemoryStore::new();
        store.create(new_student("STU001", 85)).await.unwrap();
        let mut senior = new_student("STU002", 90);
        senior.profile.grade_level = "12th Grade".to_string();
        store.create(senior).await.unwrap();

        let filter = SearchFilter {
            q: None,
            grade: Some("Grade 12".to_string()),
        };
        let found = store.search(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].profile.student_id, "STU002");

        let everyone = store.search(&SearchFilter::default()).await.unwrap();
        assert_eq!(everyone.len(), 2);
    }

    #[tokio::test]
    async fn latest_snapshot_is_strictly_before_date() {
        let store = MemoryStore::new();
        let mut averages = SubjectAverages::default();
        averages.set(Subject::Science, 71.0);
        store
            .record_snapshot(&SubjectSnapshot {
                taken_on: date(1),
                averages,
            })
            .await
            .unwrap();
        averages.set(Subject::Science, 74.0);
        store
            .record_snapshot(&SubjectSnapshot {
                taken_on: date(8),
                averages,
            })
            .await
            .unwrap();

        let latest = store.latest_snapshot(date(8)).await.unwrap().unwrap();
        assert_eq!(latest.taken_on, date(1));
        assert_eq!(latest.averages.get(Subject::Science), 71.0);

        let latest = store.latest_snapshot(date(20)).await.unwrap().unwrap();
        assert_eq!(latest.taken_on, date(8));

        assert!(store.latest_snapshot(date(1)).await.unwrap().is_none());
    }
}
