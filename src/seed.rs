use tracing::{info, warn};

use crate::models::{NewStudent, StudentMetrics, StudentProfile, SubjectGrades};
use crate::store::StudentStore;

fn sample(
    name: &str,
    student_id: &str,
    grade_level: &str,
    section: &str,
    grades: [i32; 6],
    attendance_rate: f64,
    participation_score: i32,
) -> NewStudent {
    let [math_grade, science_grade, english_grade, history_grade, arts_grade, pe_grade] = grades;
    NewStudent {
        profile: StudentProfile {
            name: name.to_string(),
            student_id: student_id.to_string(),
            grade_level: grade_level.to_string(),
            section: section.to_string(),
        },
        metrics: StudentMetrics {
            grades: SubjectGrades {
                math_grade,
                science_grade,
                english_grade,
                history_grade,
                arts_grade,
                pe_grade,
            },
            attendance_rate,
            participation_score,
        },
    }
}

pub fn sample_students() -> Vec<NewStudent> {
    vec![
        sample("Sarah Johnson", "STU001", "10th Grade", "Section A", [92, 88, 94, 87, 91, 95], 96.0, 88),
        sample("Michael Chen", "STU002", "10th Grade", "Section A", [78, 82, 75, 80, 85, 90], 85.0, 75),
        sample("Emma Rodriguez", "STU003", "11th Grade", "Section B", [95, 93, 89, 92, 88, 87], 98.0, 92),
        sample("James Wilson", "STU004", "9th Grade", "Section A", [65, 68, 72, 70, 75, 80], 78.0, 65),
        sample("Olivia Thompson", "STU005", "12th Grade", "Section B", [89, 91, 93, 88, 94, 92], 94.0, 89),
        sample("David Kim", "STU006", "11th Grade", "Section C", [55, 60, 58, 62, 65, 70], 72.0, 55),
        sample("Sophia Martinez", "STU007", "10th Grade", "Section B", [86, 84, 90, 85, 89, 88], 91.0, 84),
        sample("Ryan Davis", "STU008", "9th Grade", "Section B", [73, 76, 78, 74, 82, 85], 83.0, 76),
        sample("Isabella Garcia", "STU009", "12th Grade", "Section A", [97, 95, 96, 94, 93, 89], 99.0, 95),
        sample("Ethan Brown", "STU010", "11th Grade", "Section A", [48, 52, 55, 50, 58, 65], 65.0, 48),
    ]
}

/// Creates every sample student, skipping ones the store rejects.
pub async fn load_sample_data(store: &dyn StudentStore) -> usize {
    let mut created = 0usize;
    for student in sample_students() {
        let name = student.profile.name.clone();
        match store.create(student).await {
            Ok(_) => created += 1,
            Err(err) => warn!(%name, error = %err, "skipping sample student"),
        }
    }
    info!(created, "sample data loaded");
    created
}
