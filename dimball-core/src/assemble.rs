//! Page Assembler (component G): orders each page's fused dimensions into
//! reading order, assigns dense global IDs across the whole assembly, and
//! labels each dimension's grid zone.

use crate::entities::{BBox, Dimension, PageIndex};

const BAND_HEIGHT: i32 = 100;
const COORD_SYSTEM: i32 = 1000;

/// Horizontal band index used for reading-order sorting and as the
/// secondary sort key in `(page, band, center_x)` (§8 P2).
pub fn band(center_y: f32) -> i32 {
    (center_y as i32) / BAND_HEIGHT
}

/// Sorts one page's dimensions into reading order: top-to-bottom by band,
/// then left-to-right within a band.
pub fn sort_reading_order(dimensions: &mut [Dimension]) {
    dimensions.sort_by(|a, b| {
        let (acx, acy) = a.bbox.center();
        let (bcx, bcy) = b.bbox.center();
        (band(acy), acx as i32).cmp(&(band(bcy), bcx as i32))
    });
}

/// A drawing's zone grid: column labels left-to-right, row labels
/// top-to-bottom. The spec default is 8 columns (`H..A`) by 4 rows (`4..1`).
pub struct Grid {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
}

impl Grid {
    pub fn zone_of(&self, bbox: &BBox) -> String {
        let (cx, cy) = bbox.center();
        let col = column_index(cx, self.columns.len());
        let row = row_index(cy, self.rows.len());
        format!("{}{}", self.columns[col], self.rows[row])
    }
}

impl Default for Grid {
    fn default() -> Self {
        Grid {
            columns: crate::config::DEFAULT_GRID_COLUMNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows: crate::config::DEFAULT_GRID_ROWS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Recomputes the zone label for a moved or edited bounding box under the
/// core default grid (§6 "exposed to collaborators"; R2). Callers running a
/// non-default grid should go through `Grid::zone_of` directly instead.
pub fn recompute_zone(bbox: &BBox) -> String {
    Grid::default().zone_of(bbox)
}

fn column_index(center_x: f32, ncols: usize) -> usize {
    let col_width = COORD_SYSTEM as f32 / ncols as f32;
    ((center_x / col_width) as usize).min(ncols - 1)
}

fn row_index(center_y: f32, nrows: usize) -> usize {
    let row_height = COORD_SYSTEM as f32 / nrows as f32;
    ((center_y / row_height) as usize).min(nrows - 1)
}

/// Assigns dense, 1-based global IDs in page-major, reading-order-major
/// order, and zone-labels every dimension against `grid`. `pages` must
/// already be in ascending page order; each page's dimensions need not be
/// pre-sorted (this function sorts them).
pub fn assemble(pages: &mut [(PageIndex, Vec<Dimension>)], grid: &Grid) -> Vec<Dimension> {
    let mut next_id = 1usize;
    let mut flattened = Vec::new();

    for (page, dims) in pages.iter_mut() {
        sort_reading_order(dims);
        for dim in dims.iter_mut() {
            dim.id = next_id;
            dim.page = *page;
            dim.zone = grid.zone_of(&dim.bbox);
            next_id += 1;
        }
        flattened.extend(dims.iter().cloned());
    }

    flattened
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(value: &str, xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Dimension {
        Dimension {
            id: 0,
            page: 0,
            value: value.to_string(),
            bbox: BBox::new(xmin, ymin, xmax, ymax),
            zone: String::new(),
            confidence: 1.0,
        }
    }

    fn default_grid() -> Grid {
        Grid {
            columns: vec!["H", "G", "F", "E", "D", "C", "B", "A"]
                .into_iter()
                .map(String::from)
                .collect(),
            rows: vec!["4", "3", "2", "1"].into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn zone_of_center_page_is_expected_label() {
        let grid = default_grid();
        // center (500, 400) -> column index 4 of 8 ("D"), row index 1 of 4 ("3").
        let bbox = BBox::new(490, 390, 510, 410);
        assert_eq!(grid.zone_of(&bbox), "D3");
    }

    #[test]
    fn zone_of_top_left_corner() {
        let grid = default_grid();
        let bbox = BBox::new(0, 0, 2, 2);
        assert_eq!(grid.zone_of(&bbox), "H4");
    }

    #[test]
    fn zone_of_bottom_right_corner_clamps() {
        let grid = default_grid();
        let bbox = BBox::new(999, 999, 1000, 1000);
        assert_eq!(grid.zone_of(&bbox), "A1");
    }

    #[test]
    fn recompute_zone_matches_zone_of_under_default_grid() {
        let bbox = BBox::new(490, 390, 510, 410);
        assert_eq!(recompute_zone(&bbox), "D3");
        assert_eq!(recompute_zone(&bbox), default_grid().zone_of(&bbox));
    }

    #[test]
    fn ids_are_dense_and_reading_order_is_band_then_x() {
        let mut pages = vec![
            (
                1,
                vec![
                    dim("b", 700, 50, 720, 60),
                    dim("a", 100, 50, 120, 60),
                    dim("c", 100, 250, 120, 260),
                ],
            ),
            (2, vec![dim("d", 100, 50, 120, 60)]),
        ];
        let grid = default_grid();
        let flat = assemble(&mut pages, &grid);
        let ids: Vec<usize> = flat.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(flat[0].value, "a");
        assert_eq!(flat[1].value, "b");
        assert_eq!(flat[2].value, "c");
        assert_eq!(flat[3].page, 2);
    }
}
