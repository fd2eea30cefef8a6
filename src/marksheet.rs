use crate::calc::StudentSummary;
use serde::{Deserialize, Serialize};

/// Fixed subject print order. Each slot lists the accepted names; matching
/// is an exact whole-name comparison after trimming and lowercasing, so
/// "History of Art" does not land in the history slot. Subjects matching no
/// slot sort after all matched subjects, keeping their relative order.
const SUBJECT_PRIORITY: &[&[&str]] = &[
    &["bengali"],
    &["english"],
    &["sanskrit"],
    &["hindi"],
    &["math", "mathematics"],
    &["science", "physical science", "life science"],
    &["history"],
    &["geography"],
];

pub fn subject_priority(name: &str) -> usize {
    let needle = name.trim().to_ascii_lowercase();
    for (i, aliases) in SUBJECT_PRIORITY.iter().enumerate() {
        if aliases.iter().any(|a| *a == needle) {
            return i;
        }
    }
    SUBJECT_PRIORITY.len()
}

/// Stable sort by priority slot; unmatched names share the max key and so
/// keep their original relative order.
pub fn sort_subjects_for_print<T, F>(items: &mut [T], name_of: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by_key(|item| subject_priority(name_of(item)));
}

/// School identity + labels printed on every page. Labeling only; none of
/// this participates in grade computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolMeta {
    pub school_name: String,
    #[serde(default)]
    pub school_address: String,
    pub session_name: String,
    pub class_name: String,
    pub section_name: String,
    #[serde(default)]
    pub total_school_days: Option<i64>,
}

fn esc(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn fmt_marks(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        format!("{:.2}", v)
    }
}

const PAGE_CSS: &str = "margin:0 auto;width:190mm;padding:8mm;box-sizing:border-box;\
font-family:'Times New Roman',serif;font-size:11pt;color:#000;page-break-after:always";
const TABLE_CSS: &str = "width:100%;border-collapse:collapse;margin-top:6px";
const TH_CSS: &str = "border:1px solid #000;padding:2px 4px;text-align:center;\
background:#efefef;font-weight:bold";
const TD_CSS: &str = "border:1px solid #000;padding:2px 4px;text-align:center";
const TD_LEFT_CSS: &str = "border:1px solid #000;padding:2px 4px;text-align:left";

/// Render one printable page per student into a single self-contained HTML
/// document (inline styles only, so the string can be opened in a new
/// window, printed, or rasterized for PDF export as-is).
///
/// Selection is the caller's concern: this function renders exactly the
/// summaries it is given, which must already carry cohort-wide positions.
pub fn render(pages: &[&StudentSummary], school: &SchoolMeta) -> String {
    let mut html = String::with_capacity(4096 * pages.len().max(1));
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    html.push_str("<title>Marksheet</title></head><body style=\"margin:0;background:#fff\">");

    for summary in pages {
        render_page(&mut html, summary, school);
    }

    html.push_str("</body></html>");
    html
}

fn render_page(html: &mut String, summary: &StudentSummary, school: &SchoolMeta) {
    html.push_str(&format!("<div style=\"{}\">", PAGE_CSS));

    // School identity header.
    html.push_str(&format!(
        "<div style=\"text-align:center;border-bottom:2px solid #000;padding-bottom:4px\">\
         <div style=\"font-size:18pt;font-weight:bold\">{}</div>\
         <div style=\"font-size:10pt\">{}</div>\
         <div style=\"font-size:12pt;font-weight:bold;margin-top:2px\">\
         Progress Report &mdash; Session {}</div></div>",
        esc(&school.school_name),
        esc(&school.school_address),
        esc(&school.session_name),
    ));

    // Student identity block.
    let roll = summary.student.roll_no.as_deref().unwrap_or("-");
    let days = school
        .total_school_days
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    html.push_str(&format!(
        "<table style=\"{TABLE_CSS}\"><tr>\
         <td style=\"{TD_LEFT_CSS}\">Name: <b>{}</b></td>\
         <td style=\"{TD_LEFT_CSS}\">Roll No: <b>{}</b></td>\
         <td style=\"{TD_LEFT_CSS}\">Class: <b>{}</b></td>\
         <td style=\"{TD_LEFT_CSS}\">Section: <b>{}</b></td>\
         <td style=\"{TD_LEFT_CSS}\">School Days: <b>{}</b></td>\
         </tr></table>",
        esc(&summary.student.display_name),
        esc(roll),
        esc(&school.class_name),
        esc(&school.section_name),
        esc(&days),
    ));

    render_subject_table(html, summary);
    render_cocurricular_table(html, summary);
    render_optional_table(html, summary);
    render_signatures(html);
    render_legend(html);

    html.push_str("</div>");
}

fn render_subject_table(html: &mut String, summary: &StudentSummary) {
    let mut rows: Vec<&crate::calc::SubjectRow> = summary.subjects.iter().collect();
    sort_subjects_for_print(&mut rows, |r| r.marks.subject_name.as_str());

    html.push_str(&format!(
        "<table style=\"{TABLE_CSS}\">\
         <tr><th style=\"{TH_CSS}\" rowspan=\"2\">Subject</th>\
         <th style=\"{TH_CSS}\" colspan=\"3\">First Term</th>\
         <th style=\"{TH_CSS}\" colspan=\"3\">Second Term</th>\
         <th style=\"{TH_CSS}\" colspan=\"3\">Third Term</th>\
         <th style=\"{TH_CSS}\" rowspan=\"2\">Total</th>\
         <th style=\"{TH_CSS}\" rowspan=\"2\">%</th>\
         <th style=\"{TH_CSS}\" rowspan=\"2\">Grade</th></tr><tr>"
    ));
    for _ in 0..3 {
        html.push_str(&format!(
            "<th style=\"{TH_CSS}\">Summ.</th>\
             <th style=\"{TH_CSS}\">Form.</th>\
             <th style=\"{TH_CSS}\">Term</th>"
        ));
    }
    html.push_str("</tr>");

    for row in &rows {
        let pct = crate::calc::percent_of(row.total_obtained, row.total_full);
        html.push_str(&format!("<tr><td style=\"{TD_LEFT_CSS}\">{}</td>", esc(&row.marks.subject_name)));
        for term in [&row.marks.first, &row.marks.second, &row.marks.third] {
            html.push_str(&format!(
                "<td style=\"{TD_CSS}\">{}</td>\
                 <td style=\"{TD_CSS}\">{}</td>\
                 <td style=\"{TD_CSS}\">{}</td>",
                fmt_marks(term.summative_obtained),
                fmt_marks(term.formative_obtained),
                fmt_marks(term.obtained()),
            ));
        }
        html.push_str(&format!(
            "<td style=\"{TD_CSS}\"><b>{}</b>/{}</td>\
             <td style=\"{TD_CSS}\">{:.1}</td>\
             <td style=\"{TD_CSS}\"><b>{}</b></td></tr>",
            fmt_marks(row.total_obtained),
            fmt_marks(row.total_full),
            pct,
            row.grade,
        ));
    }

    // Overall performance row.
    html.push_str(&format!(
        "<tr><td style=\"{TD_LEFT_CSS}\" colspan=\"10\"><b>Overall Performance</b></td>\
         <td style=\"{TD_CSS}\"><b>{}</b>/{}</td>\
         <td style=\"{TD_CSS}\"><b>{:.1}</b></td>\
         <td style=\"{TD_CSS}\"><b>{}</b></td></tr>",
        fmt_marks(summary.total_marks),
        fmt_marks(summary.total_full_marks),
        summary.percentage,
        summary.overall_grade,
    ));
    html.push_str(&format!(
        "<tr><td style=\"{TD_LEFT_CSS}\" colspan=\"10\"><b>Position in Class</b></td>\
         <td style=\"{TD_CSS}\" colspan=\"3\"><b>{}</b></td></tr></table>",
        summary.position,
    ));
}

fn render_cocurricular_table(html: &mut String, summary: &StudentSummary) {
    if summary.cocurricular.is_empty() {
        return;
    }
    let mut rows: Vec<&crate::calc::CocurricularRow> = summary.cocurricular.iter().collect();
    sort_subjects_for_print(&mut rows, |r| r.subject_name.as_str());

    html.push_str(&format!(
        "<div style=\"font-weight:bold;margin-top:8px\">Co-curricular Subjects</div>\
         <table style=\"{TABLE_CSS}\">\
         <tr><th style=\"{TH_CSS}\">Subject</th>\
         <th style=\"{TH_CSS}\">First Term</th>\
         <th style=\"{TH_CSS}\">Second Term</th>\
         <th style=\"{TH_CSS}\">Final Term</th>\
         <th style=\"{TH_CSS}\">Full Marks</th>\
         <th style=\"{TH_CSS}\">Grade</th></tr>"
    ));
    for row in &rows {
        let cell = |v: Option<f64>| v.map(fmt_marks).unwrap_or_else(|| "-".to_string());
        html.push_str(&format!(
            "<tr><td style=\"{TD_LEFT_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\"><b>{}</b></td></tr>",
            esc(&row.subject_name),
            cell(row.first_term),
            cell(row.second_term),
            cell(row.final_term),
            fmt_marks(row.full_marks),
            row.overall_grade,
        ));
    }
    html.push_str("</table>");
}

fn render_optional_table(html: &mut String, summary: &StudentSummary) {
    if summary.optional.is_empty() {
        return;
    }
    let mut rows: Vec<&crate::calc::OptionalRow> = summary.optional.iter().collect();
    sort_subjects_for_print(&mut rows, |r| r.subject_name.as_str());

    html.push_str(&format!(
        "<div style=\"font-weight:bold;margin-top:8px\">Optional Subjects</div>\
         <table style=\"{TABLE_CSS}\">\
         <tr><th style=\"{TH_CSS}\">Subject</th>\
         <th style=\"{TH_CSS}\">Marks Obtained</th>\
         <th style=\"{TH_CSS}\">Full Marks</th>\
         <th style=\"{TH_CSS}\">Grade</th></tr>"
    ));
    for row in &rows {
        html.push_str(&format!(
            "<tr><td style=\"{TD_LEFT_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\">{}</td>\
             <td style=\"{TD_CSS}\"><b>{}</b></td></tr>",
            esc(&row.subject_name),
            fmt_marks(row.obtained_marks),
            fmt_marks(row.full_marks),
            row.grade,
        ));
    }
    html.push_str("</table>");
}

fn render_signatures(html: &mut String) {
    html.push_str(
        "<table style=\"width:100%;margin-top:36px;border-collapse:collapse\"><tr>",
    );
    for label in ["Class Teacher", "Guardian", "Head of the Institution"] {
        html.push_str(&format!(
            "<td style=\"text-align:center;padding-top:4px\">\
             <div style=\"border-top:1px solid #000;width:70%;margin:0 auto;\
             padding-top:2px\">{}</div></td>",
            label
        ));
    }
    html.push_str("</tr></table>");
}

fn render_legend(html: &mut String) {
    // Fixed overall-scale legend printed on every page.
    let bands = [
        ("90-100", "AA"),
        ("75-89", "A+"),
        ("60-74", "A"),
        ("45-59", "B+"),
        ("34-44", "B"),
        ("25-33", "C"),
        ("0-24", "D"),
    ];
    html.push_str(&format!(
        "<table style=\"{TABLE_CSS};font-size:9pt\"><tr>\
         <th style=\"{TH_CSS}\" colspan=\"{}\">Grading Scale</th></tr><tr>",
        bands.len(),
    ));
    for (range, label) in bands {
        html.push_str(&format!(
            "<td style=\"{TD_CSS}\">{} = {}</td>",
            label, range
        ));
    }
    html.push_str("</tr></table>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{aggregate, rank, StudentIdentity, SubjectMarks, TermMarks};

    fn summary_with_subjects(names: &[&str]) -> StudentSummary {
        let subjects: Vec<SubjectMarks> = names
            .iter()
            .map(|n| SubjectMarks {
                subject_id: n.to_ascii_lowercase(),
                subject_name: n.to_string(),
                first: TermMarks {
                    summative_obtained: 40.0,
                    summative_full: 40.0,
                    formative_obtained: 10.0,
                    formative_full: 10.0,
                },
                second: TermMarks::default(),
                third: TermMarks::default(),
            })
            .collect();
        let mut s = aggregate(
            StudentIdentity {
                student_id: "s1".into(),
                display_name: "Das, Anik".into(),
                roll_no: Some("7".into()),
            },
            &subjects,
            &[],
            &[],
        );
        s.position = 1;
        s
    }

    fn school() -> SchoolMeta {
        SchoolMeta {
            school_name: "Model Academy".into(),
            school_address: "Station Road".into(),
            session_name: "2025".into(),
            class_name: "V".into(),
            section_name: "A".into(),
            total_school_days: Some(210),
        }
    }

    #[test]
    fn priority_list_orders_known_subjects() {
        let mut names = vec!["Geography", "English", "History of Art", "Bengali"];
        sort_subjects_for_print(&mut names, |n| n);
        assert_eq!(names, vec!["Bengali", "English", "Geography", "History of Art"]);
    }

    #[test]
    fn whole_name_match_only() {
        assert_eq!(subject_priority("History"), 6);
        assert_eq!(subject_priority("  history "), 6);
        // Containing a keyword is not enough.
        assert_eq!(subject_priority("History of Art"), SUBJECT_PRIORITY.len());
        assert_eq!(subject_priority("Prehistory"), SUBJECT_PRIORITY.len());
    }

    #[test]
    fn priority_aliases_cover_multiword_names() {
        assert_eq!(subject_priority("Mathematics"), subject_priority("Math"));
        assert_eq!(subject_priority("Physical Science"), subject_priority("Science"));
        assert_eq!(subject_priority("Life Science"), subject_priority("Science"));
    }

    #[test]
    fn unmatched_subjects_keep_relative_order() {
        let mut names = vec!["Drawing", "English", "Computer", "Bengali"];
        sort_subjects_for_print(&mut names, |n| n);
        assert_eq!(names, vec!["Bengali", "English", "Drawing", "Computer"]);
    }

    #[test]
    fn render_is_self_contained_markup() {
        let s = summary_with_subjects(&["English", "Bengali"]);
        let html = render(&[&s], &school());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.ends_with("</body></html>"));
        assert!(!html.contains("<link"));
        assert!(!html.contains("class="));
        assert!(html.contains("Model Academy"));
        assert!(html.contains("Das, Anik"));
        assert!(html.contains("Grading Scale"));
    }

    #[test]
    fn render_emits_one_page_per_student() {
        let a = summary_with_subjects(&["Bengali"]);
        let mut b = summary_with_subjects(&["Bengali"]);
        b.student.display_name = "Roy, Mita".into();
        let html = render(&[&a, &b], &school());
        assert_eq!(html.matches("page-break-after").count(), 2);
        assert!(html.contains("Roy, Mita"));
    }

    #[test]
    fn render_subjects_appear_in_priority_order() {
        let s = summary_with_subjects(&["Geography", "Bengali"]);
        let html = render(&[&s], &school());
        let bengali = html.find(">Bengali<").expect("bengali cell");
        let geography = html.find(">Geography<").expect("geography cell");
        assert!(bengali < geography);
    }

    #[test]
    fn render_escapes_names() {
        let mut s = summary_with_subjects(&["Bengali"]);
        s.student.display_name = "O'Brien <X>".into();
        let html = render(&[&s], &school());
        assert!(html.contains("O'Brien &lt;X&gt;"));
    }

    #[test]
    fn ranked_position_is_printed() {
        let mut cohort = vec![
            summary_with_subjects(&["Bengali"]),
            summary_with_subjects(&["Bengali"]),
        ];
        cohort[1].student.display_name = "Second, Kid".into();
        cohort[1].subjects[0].total_obtained = 10.0;
        cohort[1].total_marks = 10.0;
        cohort[1].percentage = 20.0;
        rank(&mut cohort);
        let html = render(&[&cohort[1]], &school());
        assert!(html.contains("Position in Class"));
        assert!(html.contains("<b>2</b>"));
    }
}
