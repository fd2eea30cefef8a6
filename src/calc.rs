use crate::grades::{letter_percent_equivalent, Grade, Scale};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One term's summative + formative component for a regular subject.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermMarks {
    pub summative_obtained: f64,
    pub summative_full: f64,
    pub formative_obtained: f64,
    pub formative_full: f64,
}

impl TermMarks {
    pub fn obtained(&self) -> f64 {
        self.summative_obtained + self.formative_obtained
    }

    pub fn full(&self) -> f64 {
        self.summative_full + self.formative_full
    }
}

/// A regular-subject result: three terms, six obtained + six full values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMarks {
    pub subject_id: String,
    pub subject_name: String,
    pub first: TermMarks,
    pub second: TermMarks,
    pub third: TermMarks,
}

impl SubjectMarks {
    pub fn total_obtained(&self) -> f64 {
        self.first.obtained() + self.second.obtained() + self.third.obtained()
    }

    pub fn total_full(&self) -> f64 {
        self.first.full() + self.second.full() + self.third.full()
    }

    pub fn grade(&self) -> Grade {
        Scale::Overall.grade_for(percent_of(self.total_obtained(), self.total_full()))
    }
}

/// Legacy co-curricular term cell: either a numeric mark or a letter grade.
/// Older records stored whichever the entering teacher typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum TermEntry {
    Numeric(f64),
    Lettered(String),
}

/// Collapse a term entry to a numeric mark out of `full_marks`.
///
/// A lettered value that parses as an integer is taken at face value (some
/// legacy rows stored digits in the grade column). A real letter goes
/// through the fixed percent point-estimates, scaled to full marks and
/// rounded; unknown letters resolve to 0 via the reverse table.
pub fn resolve_term_entry(entry: &TermEntry, full_marks: f64) -> f64 {
    match entry {
        TermEntry::Numeric(v) => *v,
        TermEntry::Lettered(s) => {
            if let Ok(n) = s.trim().parse::<i64>() {
                return n as f64;
            }
            (letter_percent_equivalent(s) / 100.0 * full_marks).round()
        }
    }
}

/// A co-curricular result: three per-term entries and a configurable
/// full-marks value (default 50).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CocurricularMarks {
    pub subject_id: String,
    pub subject_name: String,
    pub first_term: Option<TermEntry>,
    pub second_term: Option<TermEntry>,
    pub final_term: Option<TermEntry>,
    pub full_marks: f64,
}

impl CocurricularMarks {
    fn entered_terms(&self) -> impl Iterator<Item = &TermEntry> {
        [
            self.first_term.as_ref(),
            self.second_term.as_ref(),
            self.final_term.as_ref(),
        ]
        .into_iter()
        .flatten()
    }

    /// Sum of resolved marks over entered terms. Unentered terms contribute
    /// nothing, matching the missing-record rule.
    pub fn total_obtained(&self) -> f64 {
        self.entered_terms()
            .map(|e| resolve_term_entry(e, self.full_marks))
            .sum()
    }

    /// Full marks counted once per entered term.
    pub fn total_full(&self) -> f64 {
        self.entered_terms().count() as f64 * self.full_marks
    }

    /// Average of the entered terms as a percent of full marks, graded on
    /// the co-curricular scale.
    pub fn overall_grade(&self) -> Grade {
        let n = self.entered_terms().count();
        if n == 0 || self.full_marks <= 0.0 {
            return Grade::D;
        }
        let avg = self.total_obtained() / n as f64;
        Scale::Cocurricular.grade_for(100.0 * avg / self.full_marks)
    }
}

/// An optional (elective) subject result: one mark per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalMarks {
    pub subject_id: String,
    pub subject_name: String,
    pub obtained_marks: f64,
    pub full_marks: f64,
}

impl OptionalMarks {
    pub fn grade(&self) -> Grade {
        Scale::Cocurricular.grade_for(percent_of(self.obtained_marks, self.full_marks))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub student_id: String,
    pub display_name: String,
    pub roll_no: Option<String>,
}

/// Computed per-student summary across all three result categories.
/// Recomputed on every read; nothing here is persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    #[serde(flatten)]
    pub student: StudentIdentity,
    pub subjects: Vec<SubjectRow>,
    pub cocurricular: Vec<CocurricularRow>,
    pub optional: Vec<OptionalRow>,
    pub total_marks: f64,
    pub total_full_marks: f64,
    pub percentage: f64,
    pub overall_grade: Grade,
    /// 1-based rank within the cohort; 0 until `rank` has run.
    pub position: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    #[serde(flatten)]
    pub marks: SubjectMarks,
    pub total_obtained: f64,
    pub total_full: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CocurricularRow {
    pub subject_id: String,
    pub subject_name: String,
    pub first_term: Option<f64>,
    pub second_term: Option<f64>,
    pub final_term: Option<f64>,
    pub full_marks: f64,
    pub overall_grade: Grade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalRow {
    pub subject_id: String,
    pub subject_name: String,
    pub obtained_marks: f64,
    pub full_marks: f64,
    pub grade: Grade,
}

pub fn percent_of(obtained: f64, full: f64) -> f64 {
    if full > 0.0 {
        100.0 * obtained / full
    } else {
        0.0
    }
}

/// Aggregate one student's result records into a summary. Pure over its
/// inputs; missing records simply aren't in the slices and contribute 0/0.
pub fn aggregate(
    student: StudentIdentity,
    subjects: &[SubjectMarks],
    cocurricular: &[CocurricularMarks],
    optional: &[OptionalMarks],
) -> StudentSummary {
    let mut total_marks = 0.0;
    let mut total_full_marks = 0.0;

    let subject_rows: Vec<SubjectRow> = subjects
        .iter()
        .map(|s| {
            let total_obtained = s.total_obtained();
            let total_full = s.total_full();
            total_marks += total_obtained;
            total_full_marks += total_full;
            SubjectRow {
                grade: s.grade(),
                total_obtained,
                total_full,
                marks: s.clone(),
            }
        })
        .collect();

    let cocurricular_rows: Vec<CocurricularRow> = cocurricular
        .iter()
        .map(|c| {
            total_marks += c.total_obtained();
            total_full_marks += c.total_full();
            let resolve = |e: &Option<TermEntry>| {
                e.as_ref().map(|t| resolve_term_entry(t, c.full_marks))
            };
            CocurricularRow {
                subject_id: c.subject_id.clone(),
                subject_name: c.subject_name.clone(),
                first_term: resolve(&c.first_term),
                second_term: resolve(&c.second_term),
                final_term: resolve(&c.final_term),
                full_marks: c.full_marks,
                overall_grade: c.overall_grade(),
            }
        })
        .collect();

    let optional_rows: Vec<OptionalRow> = optional
        .iter()
        .map(|o| {
            total_marks += o.obtained_marks;
            total_full_marks += o.full_marks;
            OptionalRow {
                subject_id: o.subject_id.clone(),
                subject_name: o.subject_name.clone(),
                obtained_marks: o.obtained_marks,
                full_marks: o.full_marks,
                grade: o.grade(),
            }
        })
        .collect();

    let percentage = percent_of(total_marks, total_full_marks);

    StudentSummary {
        student,
        subjects: subject_rows,
        cocurricular: cocurricular_rows,
        optional: optional_rows,
        total_marks,
        total_full_marks,
        percentage,
        overall_grade: Scale::Overall.grade_for(percentage),
        position: 0,
    }
}

/// Rank the whole cohort by percentage descending and assign 1-based
/// positions. The sort is stable, so ties keep input order and receive
/// consecutive positions; there is no shared-rank logic. Callers must rank
/// before filtering for a marksheet selection so a subset render never
/// changes anyone's position.
pub fn rank(summaries: &mut [StudentSummary]) {
    summaries.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
    });
    for (i, s) in summaries.iter_mut().enumerate() {
        s.position = i + 1;
    }
}
