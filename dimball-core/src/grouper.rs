//! Token Grouper (component D): merges adjacent OCR word spans that belong
//! to one logical dimension (compound atoms, tolerances, mixed fractions,
//! modifier attachments, descriptive tails) without merging independent
//! neighboring dimensions.
//!
//! The merge runs in two passes: spans are first clustered into lines and
//! greedily accreted left-to-right within a line (rules 1-9 below), then
//! adjacent lines are considered for vertical stacking (tolerance lines,
//! descriptive tails) with the anti-merge safeguard applied between passes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::entities::{BBox, OcrSpan};
use crate::pattern;

struct Thresholds {
    avg_char_height: f32,
    h_gap: f32,
    v_same_line: f32,
    v_stack: f32,
}

impl Thresholds {
    fn from_spans(spans: &[OcrSpan]) -> Self {
        let avg_char_height = if spans.is_empty() {
            12.0
        } else {
            let sum: f32 = spans.iter().map(|s| s.bbox.height() as f32).sum();
            (sum / spans.len() as f32).clamp(5.0, 200.0)
        };
        Self {
            avg_char_height,
            h_gap: (3.0 * avg_char_height).max(40.0),
            v_same_line: 0.6 * avg_char_height,
            v_stack: 2.5 * avg_char_height,
        }
    }
}

static MIXED_FRACTION_RHS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\d+/\d+["']?$"#).unwrap());
static WHOLE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static BARE_FRACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+/\d+$").unwrap());
static TOLERANCE_RHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+\-±]\d+(?:\.\d+)?$").unwrap());
static NUMERIC_LHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.?\d*$").unwrap());
static TOLERANCE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+\-±]\s*\.?\d+(?:\.\d+)?(?:/[+\-±]\s*\.?\d+(?:\.\d+)?)?$").unwrap());

const COMPOUND_CONNECTORS: &[&str] = &["x", "×", "wd.", "lg.", "key", "od", "id", "pitch", "teeth", "dia"];
const CONTINUATION_PUNCTUATION: &[&str] = &["-", "/", "(", ")", ":", "\"", "'"];
const UNIT_WORDS: &[&str] = &["in", "mm", "cm", "\"", "'", "deg"];
const PHRASE_STARTERS: &[&str] = &["for", "max", "min", "typ", "ref", "approx", "nominal"];
const PHRASE_TERMINATORS: &[&str] = &[
    "width", "length", "diameter", "depth", "height", "od", "id", "dia", "thk", "thickness",
    "travel", "shaft", "bore", "thread",
];
const DESCRIPTIVE_TAILS: &[&str] = &[
    "flange", "tube", "od", "id", "pipe", "thread", "for", "pitch", "teeth", "max", "min", "typ",
    "diameter", "major", "minor",
];
const MAX_PHRASE_WORDS: usize = 8;

fn lower(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Rules 1-7 and 9 of §4.D: should `right` attach to the right of `left` on
/// the same line? `x_gap` is `right.xmin - left.xmax`.
fn should_attach_horizontal(left: &str, right: &str, x_gap: f32, thresholds: &Thresholds) -> bool {
    let (l, r) = (lower(left), lower(right));

    // 1. modifier <-> dimension attachment, either order.
    let modifier_pair = (pattern::is_modifier(left) && pattern::is_dimension_text(right))
        || (pattern::is_dimension_text(left) && pattern::is_modifier(right));
    if modifier_pair {
        return true;
    }
    // 2. mixed fraction.
    if WHOLE_NUMBER.is_match(left) && MIXED_FRACTION_RHS.is_match(right) {
        return true;
    }
    // 3. fraction + unit.
    if BARE_FRACTION.is_match(left) && UNIT_WORDS.contains(&r.as_str()) {
        return true;
    }
    // 4. tolerance attachment.
    if TOLERANCE_RHS.is_match(right) {
        return true;
    }
    // 5. compound connector.
    if COMPOUND_CONNECTORS.contains(&l.as_str()) || COMPOUND_CONNECTORS.contains(&r.as_str()) {
        return true;
    }
    // 6. continuation punctuation.
    if CONTINUATION_PUNCTUATION.contains(&l.as_str()) || CONTINUATION_PUNCTUATION.contains(&r.as_str()) {
        return true;
    }
    // 7. unit after number.
    if NUMERIC_LHS.is_match(left) && UNIT_WORDS.contains(&r.as_str()) {
        return true;
    }
    // 9. very small residual gap, unless both sides are already standalone dimensions.
    if x_gap <= 15.0 {
        let both_standalone = is_standalone_dimension(left) && is_standalone_dimension(right);
        if !both_standalone {
            return true;
        }
    }
    let _ = thresholds;
    false
}

fn is_standalone_dimension(text: &str) -> bool {
    pattern::is_dimension_text(text) && !pattern::is_modifier(text)
}

fn is_phrase_starter(text: &str) -> bool {
    PHRASE_STARTERS.contains(&lower(text).trim_end_matches('.').as_str())
}

fn is_phrase_terminator(text: &str) -> bool {
    PHRASE_TERMINATORS.contains(&lower(text).trim_end_matches('.').as_str())
}

fn is_descriptive_tail(text: &str) -> bool {
    DESCRIPTIVE_TAILS.contains(&lower(text).trim_end_matches('.').as_str())
}

/// One accreted group of spans, in reading order, before final flattening.
struct Group {
    members: Vec<OcrSpan>,
}

impl Group {
    fn bbox(&self) -> BBox {
        self.members
            .iter()
            .skip(1)
            .fold(self.members[0].bbox, |acc, s| acc.merge(&s.bbox))
    }

    fn finalize(self) -> OcrSpan {
        let bbox = self.bbox();
        let avg_h: f32 = self.members.iter().map(|s| s.bbox.height() as f32).sum::<f32>()
            / self.members.len() as f32;
        let mut text = String::new();
        let mut prev: Option<&OcrSpan> = None;
        for span in &self.members {
            if let Some(p) = prev {
                let y_gap = (span.bbox.ymin - p.bbox.ymin).unsigned_abs() as f32;
                let x_gap = (span.bbox.xmin - p.bbox.xmax) as f32;
                if y_gap > 0.6 * avg_h || x_gap > 0.6 * avg_h {
                    text.push(' ');
                }
            }
            text.push_str(&span.text);
            prev = Some(span);
        }
        let confidence =
            self.members.iter().map(|s| s.confidence).sum::<f32>() / self.members.len() as f32;
        OcrSpan {
            text,
            bbox,
            confidence,
        }
    }
}

/// Turns word-level OCR spans into semantic dimension spans. Degenerate
/// spans (zero area) are dropped first (B4).
pub fn group_tokens(spans: Vec<OcrSpan>) -> Vec<OcrSpan> {
    let mut spans: Vec<OcrSpan> = spans.into_iter().filter(|s| !s.bbox.is_degenerate()).collect();
    if spans.is_empty() {
        return Vec::new();
    }
    let thresholds = Thresholds::from_spans(&spans);
    spans.sort_by_key(|s| (s.bbox.ymin, s.bbox.xmin));

    let lines = cluster_into_lines(spans, &thresholds);
    let mut groups: Vec<Group> = lines
        .into_iter()
        .flat_map(|line| accrete_line(line, &thresholds))
        .collect();

    groups.sort_by_key(|g| (g.members[0].bbox.ymin, g.members[0].bbox.xmin));
    stack_vertically(&mut groups, &thresholds);

    groups.into_iter().map(Group::finalize).collect()
}

/// Groups spans whose vertical centers are within `V_SAME_LINE` of each
/// other into the same line, preserving left-to-right order.
fn cluster_into_lines(spans: Vec<OcrSpan>, thresholds: &Thresholds) -> Vec<Vec<OcrSpan>> {
    let mut lines: Vec<Vec<OcrSpan>> = Vec::new();
    for span in spans {
        let (_, cy) = span.bbox.center();
        match lines
            .iter_mut()
            .find(|line| (line[0].bbox.center().1 - cy).abs() <= thresholds.v_same_line)
        {
            Some(line) => {
                line.push(span);
                line.sort_by_key(|s| s.bbox.xmin);
            }
            None => lines.push(vec![span]),
        }
    }
    lines
}

/// Greedily accretes left-to-right within one line, applying rules 1-9 and
/// the phrase-mode extension of rule 8.
fn accrete_line(line: Vec<OcrSpan>, thresholds: &Thresholds) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut phrase_words_consumed = 0usize;
    let mut in_phrase = false;

    for span in line {
        let attach = groups.last().and_then(|g| {
            let left = g.members.last().unwrap();
            if left.bbox.xmax > span.bbox.xmin {
                return None;
            }
            let x_gap = (span.bbox.xmin - left.bbox.xmax) as f32;
            if x_gap > thresholds.h_gap {
                return None;
            }
            Some((left.text.clone(), x_gap))
        });

        let should_join = match attach {
            Some((left_text, x_gap)) => {
                if in_phrase {
                    phrase_words_consumed += 1;
                    let terminate =
                        is_phrase_terminator(&span.text) || phrase_words_consumed >= MAX_PHRASE_WORDS;
                    if terminate {
                        in_phrase = false;
                    }
                    true
                } else if is_standalone_dimension(&left_text) && is_phrase_starter(&span.text) {
                    // Rule 8: description phrase starter opens phrase mode.
                    in_phrase = true;
                    phrase_words_consumed = 0;
                    true
                } else {
                    should_attach_horizontal(&left_text, &span.text, x_gap, thresholds)
                }
            }
            None => false,
        };

        if should_join {
            groups.last_mut().unwrap().members.push(span);
        } else {
            in_phrase = false;
            phrase_words_consumed = 0;
            groups.push(Group {
                members: vec![span],
            });
        }
    }
    groups
}

/// Rules for vertical stacking plus the anti-merge safeguard: a completed
/// group above only absorbs the group below it if that group is a tolerance
/// line or opens a "For ..." phrase.
fn stack_vertically(groups: &mut Vec<Group>, thresholds: &Thresholds) {
    let mut i = 0;
    while i < groups.len() {
        let mut absorbed = false;
        if i + 1 < groups.len() {
            let (top_bbox, top_is_complete_feature) = {
                let top = &groups[i];
                (top.bbox(), top.finalized_text_is_complete_feature())
            };
            let bottom = &groups[i + 1];
            let bottom_bbox = bottom.bbox();
            let (top_cx, _) = top_bbox.center();
            let (bottom_cx, _) = bottom_bbox.center();
            let y_gap = (bottom_bbox.ymin - top_bbox.ymax) as f32;
            let x_aligned = (top_cx - bottom_cx).abs() <= thresholds.h_gap;
            let within_stack_range = y_gap >= 0.0 && y_gap <= thresholds.v_stack;

            if x_aligned && within_stack_range {
                let bottom_text = bottom.members.first().map(|s| s.text.as_str()).unwrap_or("");
                let bottom_is_tolerance_line = TOLERANCE_LINE.is_match(bottom_text.trim());
                let bottom_is_tail = is_descriptive_tail(bottom_text) || is_phrase_starter(bottom_text);

                let allowed = if top_is_complete_feature {
                    bottom_is_tolerance_line || is_phrase_starter(bottom_text)
                } else {
                    bottom_is_tolerance_line || bottom_is_tail
                };

                if allowed {
                    let absorbed_group = groups.remove(i + 1);
                    groups[i].members.extend(absorbed_group.members);
                    groups[i].members.sort_by_key(|s| (s.bbox.ymin, s.bbox.xmin));
                    absorbed = true;
                }
            }
        }
        if !absorbed {
            i += 1;
        }
    }
}

impl Group {
    /// Is this group's merged text already a "complete feature" (anti-merge
    /// safeguard gate, §4.D)? A single dimension-like token, or a
    /// modifier+dimension pair, counts; a bare label does not.
    fn finalized_text_is_complete_feature(&self) -> bool {
        let joined: String = self.members.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
        pattern::is_dimension_text(&joined) || self.members.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> OcrSpan {
        OcrSpan {
            text: text.to_string(),
            bbox: BBox::new(xmin, ymin, xmax, ymax),
            confidence: 0.9,
        }
    }

    #[test]
    fn mixed_fraction_merges() {
        // S6: "3" and "1/4\"" with a small gap on the same line.
        let spans = vec![span("3", 100, 100, 110, 112), span("1/4\"", 116, 100, 140, 112)];
        let result = group_tokens(spans);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "3 1/4\"");
    }

    #[test]
    fn compound_wd_lg_key_merges_into_one_span() {
        let spans = vec![
            span("0.188\"", 0, 0, 40, 12),
            span("Wd.", 44, 0, 60, 12),
            span("x", 64, 0, 70, 12),
            span("7/8\"", 74, 0, 100, 12),
            span("Lg.", 104, 0, 120, 12),
            span("Key", 124, 0, 150, 12),
        ];
        let result = group_tokens(spans);
        assert_eq!(result.len(), 1);
        assert!(result[0].text.contains("Key"));
    }

    #[test]
    fn anti_merge_keeps_independent_stacked_dimensions_separate() {
        // S2: "21"/"Teeth" stacked above "0.080in"/"Pitch", far enough apart
        // vertically that they must not merge into one dimension.
        let top = vec![span("21", 100, 100, 115, 112), span("Teeth", 119, 100, 150, 112)];
        let bottom = vec![
            span("0.080in", 100, 400, 140, 412),
            span("Pitch", 144, 400, 170, 412),
        ];
        let mut all = top;
        all.extend(bottom);
        let result = group_tokens(all);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn degenerate_span_is_dropped() {
        let spans = vec![span("x", 10, 10, 10, 20), span("2.500\"", 20, 10, 60, 22)];
        let result = group_tokens(spans);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "2.500\"");
    }

    #[test]
    fn tolerance_line_attaches_below_nominal() {
        let spans = vec![span("2.500", 100, 100, 140, 112), span("±.005", 102, 116, 140, 128)];
        let result = group_tokens(spans);
        assert_eq!(result.len(), 1);
        assert!(result[0].text.contains("±.005"));
    }
}
