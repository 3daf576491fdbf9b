//! Fusion & Matcher (component F): for each VLM dimension, finds the best
//! grouped-OCR span (or, failing that, a combination of raw spans) that
//! localizes it, producing one `Dimension` whose value is the VLM's verbatim
//! text and whose bbox is OCR-derived or synthesized.

use itertools::Itertools;

use crate::entities::{BBox, Dimension, OcrToken, VlmDimension};
use crate::pattern;

const SYNTHETIC_WIDTH: i32 = 60;
const SYNTHETIC_HEIGHT: i32 = 30;
const VIRTUAL_CONFIDENCE_THRESHOLD: f32 = 0.75;
const MAX_RAW_COMBINATION_SPANS: usize = 6;

fn longest_common_subsequence_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

/// `text_sim(v, o)` from §4.F: exact match after normalization scores 1.0,
/// substring either way scores 0.8, otherwise the LCS ratio.
pub fn text_sim(value: &str, other: &str) -> f32 {
    let nv = pattern::normalize(value);
    let no = pattern::normalize(other);
    if nv == no {
        return 1.0;
    }
    if nv.is_empty() || no.is_empty() {
        return 0.0;
    }
    if nv.contains(&no) || no.contains(&nv) {
        return 0.8;
    }
    let lcs = longest_common_subsequence_len(&nv, &no);
    let longer = nv.chars().count().max(no.chars().count());
    lcs as f32 / longer as f32
}

struct Candidate {
    index: usize,
    score: f32,
    ts: f32,
}

/// Fuses one page's VLM entries against its grouped OCR tokens. `max_dist`
/// is `max(150, 5.0 * avg_char_height)` per §4.F, computed by the caller
/// (the orchestrator has `avg_char_height` from the grouping step).
pub fn fuse_page(
    vlm_entries: &[VlmDimension],
    grouped: &mut [OcrToken],
    raw_spans: &mut [OcrToken],
    max_dist: f32,
) -> Vec<Dimension> {
    let mut out = Vec::with_capacity(vlm_entries.len());

    for vlm in vlm_entries {
        let target = vlm.anchor();

        let matched = match match_strategy_1(vlm, target, grouped, max_dist) {
            Some(dim) => Some(dim),
            None => match match_strategy_2(vlm, target, grouped, max_dist) {
                Some(dim) => Some(dim),
                None => match_strategy_3(vlm, target, raw_spans, grouped),
            },
        };

        match matched {
            Some(dim) => out.push(dim),
            None if vlm.confidence >= VIRTUAL_CONFIDENCE_THRESHOLD => {
                out.push(virtual_placement(vlm, target))
            }
            None => {}
        }
    }

    out
}

fn loc_score(center: (f32, f32), target: (f32, f32), max_dist: f32) -> (f32, f32) {
    let dist = ((center.0 - target.0).powi(2) + (center.1 - target.1).powi(2)).sqrt();
    (dist, (1.0 - dist / max_dist).max(0.0))
}

fn match_strategy_1(
    vlm: &VlmDimension,
    target: (f32, f32),
    grouped: &mut [OcrToken],
    max_dist: f32,
) -> Option<Dimension> {
    let mut best: Option<Candidate> = None;
    for (i, tok) in grouped.iter().enumerate() {
        if tok.used {
            continue;
        }
        let ts = text_sim(&vlm.value, &tok.text);
        if ts < 0.15 {
            continue;
        }
        let (_, loc) = loc_score(tok.bbox.center(), target, max_dist);
        if loc > 0.3 && ts > 0.3 {
            let score = 0.6 * loc + 0.4 * ts;
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(Candidate { index: i, score, ts });
            }
        }
    }
    let candidate = best.filter(|c| c.score >= 0.5)?;
    grouped[candidate.index].used = true;
    Some(make_dimension(vlm, grouped[candidate.index].bbox, vlm.confidence.min(1.0)))
}

fn match_strategy_2(
    vlm: &VlmDimension,
    target: (f32, f32),
    grouped: &mut [OcrToken],
    max_dist: f32,
) -> Option<Dimension> {
    let mut best: Option<Candidate> = None;
    for (i, tok) in grouped.iter().enumerate() {
        if tok.used {
            continue;
        }
        let ts = text_sim(&vlm.value, &tok.text);
        if ts < 0.5 {
            continue;
        }
        let (dist, _) = loc_score(tok.bbox.center(), target, max_dist);
        let limit = if ts > 0.8 { 1.5 * max_dist } else { max_dist };
        if dist <= limit {
            let better = match &best {
                None => true,
                Some(b) => {
                    let b_dist = loc_score(grouped[b.index].bbox.center(), target, max_dist).0;
                    dist < b_dist || (dist == b_dist && ts > b.ts)
                }
            };
            if better {
                best = Some(Candidate {
                    index: i,
                    score: dist,
                    ts,
                });
            }
        }
    }
    let candidate = best?;
    grouped[candidate.index].used = true;
    Some(make_dimension(vlm, grouped[candidate.index].bbox, vlm.confidence.min(1.0)))
}

fn match_strategy_3(
    vlm: &VlmDimension,
    target: (f32, f32),
    raw_spans: &mut [OcrToken],
    grouped: &[OcrToken],
) -> Option<Dimension> {
    // Indices rather than `&OcrToken` refs: the accepted combo needs its
    // spans flipped to `used` afterward, which a shared borrow would block.
    let mut nearest: Vec<usize> = raw_spans
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.used && !grouped.iter().any(|g| g.used && g.bbox.intersects(&s.bbox)))
        .map(|(i, _)| i)
        .collect();
    nearest.sort_by(|&a, &b| {
        let ca = raw_spans[a].bbox.center();
        let cb = raw_spans[b].bbox.center();
        let da = (ca.0 - target.0).powi(2) + (ca.1 - target.1).powi(2);
        let db = (cb.0 - target.0).powi(2) + (cb.1 - target.1).powi(2);
        da.partial_cmp(&db).unwrap()
    });
    nearest.truncate(MAX_RAW_COMBINATION_SPANS);

    for size in (1..=nearest.len()).rev() {
        for combo in nearest.iter().copied().combinations(size) {
            let mut ordered = combo;
            ordered.sort_by_key(|&i| (raw_spans[i].bbox.ymin, raw_spans[i].bbox.xmin));
            let text = ordered
                .iter()
                .map(|&i| raw_spans[i].text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            if text_sim(&vlm.value, &text) >= 0.7 {
                let bbox = ordered
                    .iter()
                    .skip(1)
                    .fold(raw_spans[ordered[0]].bbox, |acc, &i| acc.merge(&raw_spans[i].bbox));
                let confidence = ordered.iter().map(|&i| raw_spans[i].confidence).sum::<f32>()
                    / ordered.len() as f32;
                for &i in &ordered {
                    raw_spans[i].used = true;
                }
                return Some(make_dimension(vlm, bbox, confidence.min(vlm.confidence).min(1.0)));
            }
        }
    }
    None
}

fn virtual_placement(vlm: &VlmDimension, target: (f32, f32)) -> Dimension {
    let half_w = SYNTHETIC_WIDTH / 2;
    let half_h = SYNTHETIC_HEIGHT / 2;
    let cx = target.0 as i32;
    let cy = target.1 as i32;
    let bbox = BBox::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h);
    make_dimension(vlm, bbox, vlm.confidence)
}

/// Builds a manual, inspector-drawn dimension record (§6 "exposed to
/// collaborators"). `id` is 0 and `confidence` is 1.0; `zone` is left as the
/// empty string, which is never a real zone label — it means "not yet
/// assigned". The caller must run the record through the Page Assembler (or
/// call `assemble::recompute_zone` directly) before treating it as final.
pub fn make_manual_dimension(value: String, bbox: BBox) -> Dimension {
    Dimension {
        id: 0,
        page: 0,
        value,
        bbox,
        zone: String::new(),
        confidence: 1.0,
    }
}

/// `zone` is left unset here too (see `make_manual_dimension`) — `fuse_page`
/// never assigns it; the orchestrator always routes its output through
/// `assemble::assemble` before a `Dimension` reaches a caller.
fn make_dimension(vlm: &VlmDimension, bbox: BBox, confidence: f32) -> Dimension {
    Dimension {
        id: 0,
        page: 0,
        value: vlm.value.clone(),
        bbox,
        zone: String::new(),
        confidence: confidence.min(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str, xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> OcrToken {
        OcrToken {
            text: text.to_string(),
            bbox: BBox::new(xmin, ymin, xmax, ymax),
            confidence: 0.9,
            used: false,
        }
    }

    fn vlm(value: &str, x_percent: f32, y_percent: f32, confidence: f32) -> VlmDimension {
        VlmDimension {
            value: value.to_string(),
            x_percent,
            y_percent,
            confidence,
        }
    }

    #[test]
    fn text_sim_exact_match_is_one() {
        assert_eq!(text_sim("2.500\"", "2.500\""), 1.0);
    }

    #[test]
    fn text_sim_substring_is_point_eight() {
        assert_eq!(text_sim("2.500\" TYP", "2.500\""), 0.8);
    }

    #[test]
    fn strategy_1_matches_closest_similar_token_and_consumes_it() {
        let mut grouped = vec![token("2.500\"", 490, 390, 520, 410)];
        let mut raw = vec![];
        let entries = vec![vlm("2.500\"", 50.0, 40.0, 0.9)];
        let out = fuse_page(&entries, &mut grouped, &mut raw, 150.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, "2.500\"");
        assert!(grouped[0].used);
    }

    #[test]
    fn no_ocr_span_is_used_twice_even_with_duplicate_vlm_entries() {
        // S5: two identical-text OCR spans, VLM lists the value twice.
        let mut grouped = vec![
            token("0.250\"", 490, 390, 520, 410),
            token("0.250\"", 690, 390, 720, 410),
        ];
        let mut raw = vec![];
        let entries = vec![vlm("0.250\"", 50.0, 40.0, 0.9), vlm("0.250\"", 70.0, 40.0, 0.9)];
        let out = fuse_page(&entries, &mut grouped, &mut raw, 150.0);
        assert_eq!(out.len(), 2);
        assert!(grouped.iter().all(|t| t.used));
        assert_ne!(out[0].bbox, out[1].bbox);
    }

    #[test]
    fn no_raw_span_is_used_twice_when_duplicate_vlm_entries_only_match_via_strategy_3() {
        // Two raw spans whose combined text matches; no grouped token exists
        // at all, so both VLM entries must fall through to Strategy 3. The
        // second entry has nothing left to combine once the first consumes
        // both spans, and (confidence held below the Strategy 4 threshold)
        // must be dropped rather than reusing them.
        let mut grouped: Vec<OcrToken> = vec![];
        let mut raw = vec![
            token("7/16-20", 490, 390, 560, 410),
            token("UNF", 565, 390, 600, 410),
        ];
        let entries = vec![
            vlm("7/16-20 UNF", 52.0, 40.0, 0.6),
            vlm("7/16-20 UNF", 52.0, 40.0, 0.6),
        ];
        let out = fuse_page(&entries, &mut grouped, &mut raw, 150.0);
        assert_eq!(out.len(), 1);
        assert!(raw.iter().all(|t| t.used));
    }

    #[test]
    fn strategy_4_emits_synthetic_bbox_when_ocr_empty_and_confidence_high() {
        let mut grouped: Vec<OcrToken> = vec![];
        let mut raw = vec![];
        let entries = vec![vlm("45°", 10.0, 10.0, 0.9)];
        let out = fuse_page(&entries, &mut grouped, &mut raw, 150.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox.width(), SYNTHETIC_WIDTH);
        assert_eq!(out[0].bbox.height(), SYNTHETIC_HEIGHT);
    }

    #[test]
    fn manual_dimension_has_placeholder_id_and_full_confidence() {
        let dim = make_manual_dimension("0.375\"".into(), BBox::new(10, 10, 40, 30));
        assert_eq!(dim.id, 0);
        assert_eq!(dim.confidence, 1.0);
        assert_eq!(dim.value, "0.375\"");
    }

    #[test]
    fn low_confidence_unmatched_vlm_entry_is_dropped() {
        let mut grouped: Vec<OcrToken> = vec![];
        let mut raw = vec![];
        let entries = vec![vlm("45°", 10.0, 10.0, 0.5)];
        let out = fuse_page(&entries, &mut grouped, &mut raw, 150.0);
        assert!(out.is_empty());
    }
}
