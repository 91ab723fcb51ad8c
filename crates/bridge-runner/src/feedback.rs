use crate::results::{classify, ResultDocument, TestOutcome};
use std::fmt::Write;

const FAILED_COLOR: &str = "#b94a48";
const PASSED_COLOR: &str = "#468847";

/// Renders the HTML report shown to the student next to the grade; `score`
/// is the value computed for `doc`.
///
/// Groups with no tests are left out entirely. With `verbose`, each test also
/// gets a collapsible block holding its captured output.
pub fn render_feedback(doc: &ResultDocument, score: i64, verbose: bool) -> String {
    let (passed, failed) = classify(&doc.tests);
    let mut html = String::new();
    html.push_str("<p>Total Points<br/>");
    let _ = write!(html, "<b>{} / 100</b><br/>", score);
    write_group(&mut html, "Failed Tests", FAILED_COLOR, &failed, verbose);
    write_group(&mut html, "Passed Tests", PASSED_COLOR, &passed, verbose);
    html.push_str("</p>");
    html
}

fn write_group(html: &mut String, title: &str, color: &str, tests: &[&TestOutcome], verbose: bool) {
    if tests.is_empty() {
        return;
    }
    let _ = write!(html, "<br/><p style='color: {}'><b>{}</b><br/>", color, title);
    for test in tests {
        let name = if test.name.trim().is_empty() {
            "(unnamed test)".to_string()
        } else {
            escape_html(&test.name)
        };
        let _ = write!(
            html,
            "{} ({:.2}/{:.2})<br/>",
            name, test.score, test.max_score
        );
        if verbose {
            let _ = write!(
                html,
                "<details><summary>Output</summary><pre>{}</pre></details>",
                escape_html(&test.output)
            );
        }
    }
    html.push_str("</p>");
}

/// Test names and output come from untrusted code.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, score: f64, max: f64, output: &str) -> TestOutcome {
        TestOutcome {
            score,
            max_score: max,
            name: name.to_string(),
            output: output.to_string(),
            ..TestOutcome::default()
        }
    }

    fn render(score: i64, tests: &[TestOutcome], verbose: bool) -> String {
        let doc = ResultDocument {
            tests: tests.to_vec(),
            ..ResultDocument::default()
        };
        render_feedback(&doc, score, verbose)
    }

    #[test]
    fn all_passing_report_has_no_failed_group() {
        let html = render(100, &[outcome("A", 10.0, 10.0, "ok")], false);
        assert!(html.starts_with("<p>Total Points<br/><b>100 / 100</b><br/>"));
        assert!(html.contains("Passed Tests"));
        assert!(!html.contains("Failed Tests"));
        assert!(!html.contains(FAILED_COLOR));
        assert!(html.contains("A (10.00/10.00)<br/>"));
        assert!(!html.contains("<pre>"));
    }

    #[test]
    fn failed_group_precedes_passed_group() {
        let tests = [outcome("B", 0.0, 5.0, ""), outcome("C", 5.0, 5.0, "")];
        let html = render(50, &tests, false);
        let failed_at = html.find("Failed Tests").expect("failed group");
        let passed_at = html.find("Passed Tests").expect("passed group");
        assert!(failed_at < passed_at);
        assert!(html.contains("B (0.00/5.00)"));
        assert!(html.ends_with("</p></p>"));
    }

    #[test]
    fn empty_test_list_renders_headline_only() {
        let html = render(80, &[], true);
        assert_eq!(html, "<p>Total Points<br/><b>80 / 100</b><br/></p>");
    }

    #[test]
    fn verbose_output_is_escaped() {
        let tests = [outcome("<script>x</script>", 0.0, 1.0, "expected <b> & got \"c\"")];
        let html = render(0, &tests, true);
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt; (0.00/1.00)"));
        assert!(html.contains(
            "<details><summary>Output</summary><pre>expected &lt;b&gt; &amp; got &quot;c&quot;</pre></details>"
        ));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn unnamed_tests_get_a_label() {
        let html = render(0, &[outcome("", 0.0, 1.0, "")], false);
        assert!(html.contains("(unnamed test) (0.00/1.00)"));
    }
}
