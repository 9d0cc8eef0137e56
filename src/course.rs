//! Read-only course content: chapters, lessons, videos, quizzes and the
//! assignment ids attached to a course.

use serde::Serialize;
use sqlx::PgConnection;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{ChapterRow, CourseRow, LessonRow, QuestionRow};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
    pub chapters: Vec<Chapter>,
    pub assignment_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub video: Option<Video>,
    pub quiz: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub vimeo_id: Option<String>,
    pub duration_secs: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: Uuid,
    pub question: String,
    pub options: Vec<String>,
    #[serde(skip_serializing)]
    pub correct_answer: String,
    pub time_limit_secs: Option<i32>,
}

impl Course {
    pub fn chapter(&self, chapter_id: Uuid) -> Option<&Chapter> {
        self.chapters.iter().find(|ch| ch.id == chapter_id)
    }

    pub fn has_chapter(&self, chapter_id: Uuid) -> bool {
        self.chapter(chapter_id).is_some()
    }

    pub fn quiz_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|ch| ch.has_quiz())
    }

    pub fn has_quizzes(&self) -> bool {
        self.quiz_chapters().next().is_some()
    }

    pub fn has_assignments(&self) -> bool {
        !self.assignment_ids.is_empty()
    }

    /// Lessons carrying a video, identified or not.
    pub fn total_videos(&self) -> usize {
        self.chapters.iter().map(Chapter::video_count).sum()
    }

    /// Distinct vimeo ids across the course.
    pub fn video_ids(&self) -> BTreeSet<&str> {
        self.chapters.iter().flat_map(Chapter::video_ids).collect()
    }

    pub fn chapter_for_video(&self, vimeo_id: &str) -> Option<&Chapter> {
        self.chapters
            .iter()
            .find(|ch| ch.video_ids().any(|id| id == vimeo_id))
    }

    pub fn total_duration_secs(&self) -> i64 {
        self.chapters
            .iter()
            .flat_map(|ch| ch.lessons.iter())
            .filter_map(|l| l.video.as_ref()?.duration_secs)
            .map(i64::from)
            .sum()
    }
}

impl Chapter {
    /// The chapter quiz: the questions of its lessons, in lesson order.
    pub fn quiz_questions(&self) -> Vec<&QuizQuestion> {
        self.lessons.iter().flat_map(|l| l.quiz.iter()).collect()
    }

    pub fn has_quiz(&self) -> bool {
        self.lessons.iter().any(|l| !l.quiz.is_empty())
    }

    pub fn video_count(&self) -> usize {
        self.lessons.iter().filter(|l| l.video.is_some()).count()
    }

    pub fn video_ids(&self) -> impl Iterator<Item = &str> {
        self.lessons
            .iter()
            .filter_map(|l| l.video.as_ref()?.vimeo_id.as_deref())
    }
}

pub async fn find_course_row(
    conn: &mut PgConnection,
    course_id: Uuid,
) -> Result<Option<CourseRow>, sqlx::Error> {
    sqlx::query_as::<_, CourseRow>("SELECT id, instructor_id, title FROM courses WHERE id = $1")
        .bind(course_id)
        .fetch_optional(conn)
        .await
}

/// Loads a course and all of its content. `None` when the course does not exist.
pub async fn load(conn: &mut PgConnection, course_id: Uuid) -> Result<Option<Course>, sqlx::Error> {
    let Some(row) = find_course_row(&mut *conn, course_id).await? else {
        return Ok(None);
    };

    let chapters = sqlx::query_as::<_, ChapterRow>(
        r#"SELECT id, course_id, title, position FROM chapters
           WHERE course_id = $1 ORDER BY position, id"#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let lessons = sqlx::query_as::<_, LessonRow>(
        r#"
        SELECT l.id, l.chapter_id, l.title, l.position, l.has_video, l.video_vimeo_id, l.video_duration_secs
        FROM lessons l JOIN chapters c ON c.id = l.chapter_id
        WHERE c.course_id = $1
        ORDER BY l.position, l.id
        "#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let questions = sqlx::query_as::<_, QuestionRow>(
        r#"
        SELECT q.id, q.lesson_id, q.position, q.question, q.options, q.correct_answer, q.time_limit_secs
        FROM quiz_questions q
        JOIN lessons l ON l.id = q.lesson_id
        JOIN chapters c ON c.id = l.chapter_id
        WHERE c.course_id = $1
        ORDER BY q.position, q.id
        "#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let assignment_ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM assignments WHERE course_id = $1 ORDER BY id")
            .bind(course_id)
            .fetch_all(&mut *conn)
            .await?;

    Ok(Some(assemble(row, chapters, lessons, questions, assignment_ids)))
}

fn assemble(
    row: CourseRow,
    chapters: Vec<ChapterRow>,
    lessons: Vec<LessonRow>,
    questions: Vec<QuestionRow>,
    assignment_ids: Vec<Uuid>,
) -> Course {
    let mut questions = questions;
    questions.sort_by_key(|q| (q.position, q.id));

    let mut questions_by_lesson: HashMap<Uuid, Vec<QuizQuestion>> = HashMap::new();
    for q in questions {
        questions_by_lesson
            .entry(q.lesson_id)
            .or_default()
            .push(QuizQuestion {
                id: q.id,
                question: q.question,
                options: q.options,
                correct_answer: q.correct_answer,
                time_limit_secs: q.time_limit_secs,
            });
    }

    let mut lessons_by_chapter: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
    for l in lessons {
        let video = l.has_video.then(|| Video {
            vimeo_id: l.video_vimeo_id,
            duration_secs: l.video_duration_secs,
        });
        lessons_by_chapter.entry(l.chapter_id).or_default().push(Lesson {
            id: l.id,
            title: l.title,
            position: l.position,
            video,
            quiz: questions_by_lesson.remove(&l.id).unwrap_or_default(),
        });
    }

    let chapters = chapters
        .into_iter()
        .map(|c| Chapter {
            id: c.id,
            title: c.title,
            position: c.position,
            lessons: lessons_by_chapter.remove(&c.id).unwrap_or_default(),
        })
        .collect();

    Course {
        id: row.id,
        instructor_id: row.instructor_id,
        title: row.title,
        chapters,
        assignment_ids,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn chapter_quiz_concatenates_lesson_quizzes_in_order() {
        let ch = chapter(vec![
            lesson(None, vec![question("A")]),
            lesson(None, vec![]),
            lesson(None, vec![question("B"), question("C")]),
        ]);
        let answers: Vec<&str> = ch
            .quiz_questions()
            .iter()
            .map(|q| q.correct_answer.as_str())
            .collect();
        assert_eq!(answers, vec!["A", "B", "C"]);
        assert!(ch.has_quiz());
    }

    #[test]
    fn content_shape_queries() {
        let c = course(
            vec![
                chapter(vec![lesson(Some("v1"), vec![question("A")])]),
                chapter(vec![lesson(Some("v2"), vec![]), lesson(Some("v3"), vec![])]),
            ],
            0,
        );
        assert!(c.has_quizzes());
        assert!(!c.has_assignments());
        assert_eq!(c.quiz_chapters().count(), 1);
        assert_eq!(c.total_videos(), 3);
        assert_eq!(c.video_ids().len(), 3);
        assert_eq!(c.chapter_for_video("v3").map(|ch| ch.id), Some(c.chapters[1].id));
        assert!(c.chapter_for_video("missing").is_none());
        assert_eq!(c.total_duration_secs(), 1800);
    }

    #[test]
    fn assemble_groups_rows_by_parent() {
        let course_id = Uuid::new_v4();
        let chapter_id = Uuid::new_v4();
        let lesson_id = Uuid::new_v4();
        let course = assemble(
            CourseRow {
                id: course_id,
                instructor_id: Uuid::new_v4(),
                title: "Intro".into(),
            },
            vec![ChapterRow {
                id: chapter_id,
                course_id,
                title: "One".into(),
                position: 1,
            }],
            vec![LessonRow {
                id: lesson_id,
                chapter_id,
                title: "L1".into(),
                position: 1,
                has_video: true,
                video_vimeo_id: Some("123".into()),
                video_duration_secs: Some(90),
            }],
            vec![QuestionRow {
                id: Uuid::new_v4(),
                lesson_id,
                position: 1,
                question: "2+2?".into(),
                options: vec!["3".into(), "4".into()],
                correct_answer: "4".into(),
                time_limit_secs: Some(30),
            }],
            vec![Uuid::new_v4()],
        );
        assert_eq!(course.chapters.len(), 1);
        assert_eq!(course.chapters[0].lessons.len(), 1);
        assert_eq!(course.chapters[0].quiz_questions().len(), 1);
        assert!(course.has_assignments());
        assert_eq!(course.chapter_for_video("123").map(|c| c.id), Some(chapter_id));
    }

    #[test]
    fn questions_follow_their_position() {
        let course_id = Uuid::new_v4();
        let chapter_id = Uuid::new_v4();
        let lesson_id = Uuid::new_v4();
        let q = |position: i32, correct: &str| QuestionRow {
            id: Uuid::new_v4(),
            lesson_id,
            position,
            question: format!("q{position}"),
            options: vec![],
            correct_answer: correct.into(),
            time_limit_secs: None,
        };
        let course = assemble(
            CourseRow {
                id: course_id,
                instructor_id: Uuid::new_v4(),
                title: "Order".into(),
            },
            vec![ChapterRow {
                id: chapter_id,
                course_id,
                title: "One".into(),
                position: 0,
            }],
            vec![LessonRow {
                id: lesson_id,
                chapter_id,
                title: "L".into(),
                position: 0,
                has_video: false,
                video_vimeo_id: None,
                video_duration_secs: None,
            }],
            vec![q(3, "C"), q(1, "A"), q(2, "B")],
            vec![],
        );
        let answers: Vec<&str> = course.chapters[0]
            .quiz_questions()
            .iter()
            .map(|q| q.correct_answer.as_str())
            .collect();
        assert_eq!(answers, ["A", "B", "C"]);
    }
}
