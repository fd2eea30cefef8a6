use serde::{Deserialize, Serialize};

/// Letter grades, ordered worst-to-best so `Ord` agrees with "higher grade".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    D,
    C,
    B,
    #[serde(rename = "B+")]
    BPlus,
    A,
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "AA")]
    Aa,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Aa => "AA",
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two historical grading presets. They drifted apart module-by-module
/// in the legacy system and downstream marksheets depend on the exact
/// boundaries, so they stay distinct rather than being unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Per-subject grading of co-curricular and optional subjects.
    Cocurricular,
    /// Regular-subject and overall grading.
    Overall,
}

impl Scale {
    /// Lower bounds, highest first. The first row whose bound the
    /// percentage meets wins; anything below the last bound is D.
    fn table(self) -> &'static [(f64, Grade)] {
        match self {
            Scale::Cocurricular => &[
                (90.0, Grade::Aa),
                (80.0, Grade::APlus),
                (70.0, Grade::A),
                (60.0, Grade::BPlus),
                (50.0, Grade::B),
                (40.0, Grade::C),
            ],
            Scale::Overall => &[
                (90.0, Grade::Aa),
                (75.0, Grade::APlus),
                (60.0, Grade::A),
                (45.0, Grade::BPlus),
                (34.0, Grade::B),
                (25.0, Grade::C),
            ],
        }
    }

    pub fn grade_for(self, percentage: f64) -> Grade {
        for &(bound, grade) in self.table() {
            if percentage >= bound {
                return grade;
            }
        }
        Grade::D
    }
}

/// Percent point-estimate for a legacy letter grade. This is the reverse
/// half of the legacy reconciliation path and is intentionally asymmetric
/// with the forward tables: fixed mid-band estimates, not lower bounds.
/// Unknown letters resolve to 0 so reconciliation stays total.
pub fn letter_percent_equivalent(letter: &str) -> f64 {
    match letter.trim().to_ascii_uppercase().as_str() {
        "AA" => 95.0,
        "A+" => 85.0,
        "A" => 75.0,
        "B+" => 65.0,
        "B" => 55.0,
        "C" => 45.0,
        "D" => 35.0,
        other => {
            tracing::warn!(letter = other, "unknown legacy letter grade, treating as 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_scale_boundaries() {
        assert_eq!(Scale::Overall.grade_for(90.0), Grade::Aa);
        assert_eq!(Scale::Overall.grade_for(89.999), Grade::APlus);
        assert_eq!(Scale::Overall.grade_for(75.0), Grade::APlus);
        assert_eq!(Scale::Overall.grade_for(74.9), Grade::A);
        assert_eq!(Scale::Overall.grade_for(34.0), Grade::B);
        assert_eq!(Scale::Overall.grade_for(24.9), Grade::D);
        assert_eq!(Scale::Overall.grade_for(0.0), Grade::D);
    }

    #[test]
    fn cocurricular_scale_boundaries() {
        assert_eq!(Scale::Cocurricular.grade_for(80.0), Grade::APlus);
        assert_eq!(Scale::Cocurricular.grade_for(79.999), Grade::A);
        assert_eq!(Scale::Cocurricular.grade_for(40.0), Grade::C);
        assert_eq!(Scale::Cocurricular.grade_for(39.999), Grade::D);
    }

    #[test]
    fn grades_are_monotonic_in_percentage() {
        for scale in [Scale::Cocurricular, Scale::Overall] {
            let mut prev = scale.grade_for(0.0);
            let mut p = 0.0;
            while p <= 100.0 {
                let g = scale.grade_for(p);
                assert!(g >= prev, "{:?} dropped from {} to {} at {}", scale, prev, g, p);
                prev = g;
                p += 0.125;
            }
        }
    }

    #[test]
    fn reverse_table_covers_every_letter() {
        assert_eq!(letter_percent_equivalent("AA"), 95.0);
        assert_eq!(letter_percent_equivalent("A+"), 85.0);
        assert_eq!(letter_percent_equivalent("A"), 75.0);
        assert_eq!(letter_percent_equivalent("B+"), 65.0);
        assert_eq!(letter_percent_equivalent("B"), 55.0);
        assert_eq!(letter_percent_equivalent("C"), 45.0);
        assert_eq!(letter_percent_equivalent("D"), 35.0);
    }

    #[test]
    fn reverse_table_fails_closed_on_unknown_letters() {
        assert_eq!(letter_percent_equivalent("Z"), 0.0);
        assert_eq!(letter_percent_equivalent(""), 0.0);
        assert_eq!(letter_percent_equivalent("A++"), 0.0);
    }

    #[test]
    fn reverse_table_is_case_and_space_insensitive() {
        assert_eq!(letter_percent_equivalent(" a+ "), 85.0);
        assert_eq!(letter_percent_equivalent("aa"), 95.0);
    }

    #[test]
    fn grade_labels_round_trip_serde() {
        let j = serde_json::to_string(&Grade::APlus).expect("serialize");
        assert_eq!(j, "\"A+\"");
        let g: Grade = serde_json::from_str("\"AA\"").expect("deserialize");
        assert_eq!(g, Grade::Aa);
    }
}
