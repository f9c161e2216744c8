//! Flattening a terminal analysis result into plain text.

use serde::Deserialize;

use super::OcrError;

/// Payload carried by a terminal successful poll response.
///
/// `analyze_result` is optional on the wire: a succeeded status without it is
/// malformed and reported as [`OcrError::ExtractionFailed`] rather than a
/// deserialization error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOutcome {
    pub analyze_result: Option<AnalyzeResult>,
}

/// Structured recognition result: pages in document order, each with its
/// recognized lines in reading order.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeResult {
    #[serde(default)]
    pub pages: Vec<Page>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
pub struct Line {
    pub content: String,
}

/// Concatenate every recognized line, page order then line order within each
/// page, newline-separated.
pub fn extract_text(outcome: &AnalyzeOutcome) -> Result<String, OcrError> {
    let result = outcome.analyze_result.as_ref().ok_or(OcrError::ExtractionFailed)?;

    let lines: Vec<&str> = result
        .pages
        .iter()
        .flat_map(|page| page.lines.iter())
        .map(|line| line.content.as_str())
        .collect();

    Ok(lines.join("\n"))
}
